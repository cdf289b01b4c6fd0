//! Self-healing session connection.
//!
//! A [`SessionConnection`] is a cheap handle to a spawned driver task. The
//! driver owns all lifecycle state and handles, in this order of priority:
//!
//! 1. Commands from handles (`connect`, `restart`, `dispose`)
//! 2. The disconnect signal of the live protocol client
//! 3. The in-flight open (transport open + handshake)
//! 4. The backoff timer
//! 5. The keepalive tick
//!
//! Handling everything on one task keeps transitions for a session strictly
//! ordered: a command that arrives while an open is in flight always wins.
//!
//! # Transitions
//!
//! | From | Trigger | To |
//! |------|---------|----|
//! | Disconnected | `connect()` | Connecting |
//! | Connecting | open + handshake ok | Connected |
//! | Connecting | open/handshake failure | Error, then Reconnecting if attempts remain |
//! | Connected | recoverable close or transport error | Reconnecting, or Error when out of attempts |
//! | Connected | terminal close | Disconnected |
//! | Reconnecting | timer | Connecting |
//! | any | `dispose()` | Disconnected |
//! | any | `restart()` | Connecting |

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, Interval, Sleep, interval_at, sleep, timeout};
use tracing::{debug, info, trace, warn};

use crate::backoff;
use crate::error::{Error, Result};
use crate::identifiers::{SessionId, SubscriptionId};
use crate::protocol::{Disconnect, Notification, NotificationRouter, ProtocolClient, RpcError};
use crate::transport::TransportFactory;

use super::options::SessionOptions;
use super::status::{SessionSnapshot, SessionStatus};

// ============================================================================
// Types
// ============================================================================

/// Callback invoked synchronously by the driver on every status change.
pub type StatusListener = Arc<dyn Fn(&SessionId, &SessionSnapshot) + Send + Sync>;

/// Commands for the driver task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Connect,
    Restart,
    Dispose,
}

/// A client that completed its handshake.
struct Opened {
    client: ProtocolClient,
    disconnect: oneshot::Receiver<Disconnect>,
}

/// In-flight open.
type OpenFuture = BoxFuture<'static, Result<Opened>>;

/// State readable from every handle.
struct Shared {
    /// Session name.
    id: SessionId,
    /// Resolved endpoint.
    endpoint: String,
    /// Latest snapshot.
    snapshot: watch::Sender<SessionSnapshot>,
    /// Live client, present while connected.
    client: RwLock<Option<ProtocolClient>>,
    /// Subscribers, kept across reconnects.
    router: NotificationRouter,
}

// ============================================================================
// SessionConnection
// ============================================================================

/// Handle to a self-healing session.
///
/// Cloning is cheap. The driver stops, closing any live transport, once the
/// last handle is dropped.
///
/// # Example
///
/// ```ignore
/// let session = SessionConnection::new(
///     SessionId::new("pyright"),
///     "ws://localhost:8000/api/lsp/pyright?project_id=p1",
///     Arc::new(WebSocketFactory::default()),
///     SessionOptions::language_server(),
/// );
/// session.connect();
/// session.wait_for(|s| s.status == SessionStatus::Connected).await?;
/// let hover = session.request("textDocument/hover", params).await?;
/// ```
#[derive(Clone)]
pub struct SessionConnection {
    /// Channel to the driver.
    commands: mpsc::UnboundedSender<Command>,
    /// Shared state.
    shared: Arc<Shared>,
}

impl std::fmt::Debug for SessionConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConnection")
            .field("id", &self.shared.id)
            .field("endpoint", &self.shared.endpoint)
            .field("status", &self.status())
            .finish()
    }
}

impl SessionConnection {
    /// Creates a session in `Disconnected` and spawns its driver.
    ///
    /// Must be called within a tokio runtime. Nothing is opened until
    /// [`connect`](Self::connect).
    #[must_use]
    pub fn new(
        id: SessionId,
        endpoint: impl Into<String>,
        factory: Arc<dyn TransportFactory>,
        options: SessionOptions,
    ) -> Self {
        Self::spawn(id, endpoint.into(), factory, options, None)
    }

    /// Like [`new`](Self::new), with a listener called on every status change.
    #[must_use]
    pub fn with_listener(
        id: SessionId,
        endpoint: impl Into<String>,
        factory: Arc<dyn TransportFactory>,
        options: SessionOptions,
        listener: StatusListener,
    ) -> Self {
        Self::spawn(id, endpoint.into(), factory, options, Some(listener))
    }

    fn spawn(
        id: SessionId,
        endpoint: String,
        factory: Arc<dyn TransportFactory>,
        options: SessionOptions,
        listener: Option<StatusListener>,
    ) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (snapshot, _) = watch::channel(SessionSnapshot::default());
        let shared = Arc::new(Shared {
            id,
            endpoint,
            snapshot,
            client: RwLock::new(None),
            router: NotificationRouter::new(),
        });

        let driver = Driver {
            shared: Arc::clone(&shared),
            factory,
            options,
            listener,
            status: SessionStatus::Disconnected,
            attempt: 0,
            disposed: false,
            last_error: None,
            pending_timer: None,
            opening: None,
            client: None,
            disconnect: None,
            keepalive: None,
        };
        tokio::spawn(driver.run(command_rx));

        Self { commands, shared }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Starts connecting. No-op unless `Disconnected` and not disposed.
    pub fn connect(&self) {
        let _ = self.commands.send(Command::Connect);
    }

    /// Tears everything down and connects afresh with `attempt = 0`.
    ///
    /// Also revives a disposed session or one stuck in `Error`.
    pub fn restart(&self) {
        let _ = self.commands.send(Command::Restart);
    }

    /// Cancels any timer, closes the transport and settles in `Disconnected`.
    ///
    /// Idempotent. Only [`restart`](Self::restart) brings the session back.
    pub fn dispose(&self) {
        let _ = self.commands.send(Command::Dispose);
    }

    // ========================================================================
    // Status
    // ========================================================================

    /// Returns the session id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.shared.id
    }

    /// Returns the resolved endpoint.
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.shared.endpoint
    }

    /// Returns the current status.
    #[inline]
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.shared.snapshot.borrow().status
    }

    /// Returns the current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.snapshot.borrow().clone()
    }

    /// Returns reconnect attempts since the last successful open.
    #[inline]
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.shared.snapshot.borrow().attempt
    }

    /// Returns `true` if connected.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.status().is_connected()
    }

    /// Returns a receiver of snapshots.
    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<SessionSnapshot> {
        self.shared.snapshot.subscribe()
    }

    /// Waits until the snapshot satisfies `predicate` and returns it.
    ///
    /// # Errors
    ///
    /// [`Error::SessionClosed`] if the driver stopped first.
    pub async fn wait_for<F>(&self, mut predicate: F) -> Result<SessionSnapshot>
    where
        F: FnMut(&SessionSnapshot) -> bool,
    {
        let mut rx = self.subscribe_status();
        let snapshot = rx
            .wait_for(|snapshot| predicate(snapshot))
            .await
            .map_err(|_| Error::SessionClosed)?;
        Ok((*snapshot).clone())
    }

    // ========================================================================
    // Messaging
    // ========================================================================

    /// Returns the live protocol client.
    ///
    /// # Errors
    ///
    /// [`Error::NotConnected`] unless the session is connected.
    pub fn client(&self) -> Result<ProtocolClient> {
        self.shared
            .client
            .read()
            .clone()
            .ok_or_else(|| Error::not_connected(self.shared.id.clone()))
    }

    /// Sends a request with the session's default timeout.
    ///
    /// # Errors
    ///
    /// [`Error::NotConnected`] plus everything [`ProtocolClient::request`] returns.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        self.client()?.request(method, params).await
    }

    /// Sends a request with a custom timeout.
    ///
    /// # Errors
    ///
    /// Same as [`request`](Self::request).
    pub async fn request_with_timeout(
        &self,
        method: &str,
        params: Value,
        request_timeout: Duration,
    ) -> Result<Value> {
        self.client()?
            .request_with_timeout(method, params, request_timeout)
            .await
    }

    /// Sends a notification.
    ///
    /// # Errors
    ///
    /// [`Error::NotConnected`] or [`Error::SessionClosed`].
    pub fn notify(&self, method: &str, params: Value) -> Result<()> {
        self.client()?.notify(method, params)
    }

    /// Subscribes to every notification; survives reconnects.
    pub fn subscribe_notifications<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.shared.router.subscribe(handler)
    }

    /// Subscribes to notifications of one method; survives reconnects.
    pub fn subscribe_method<F>(&self, method: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.shared.router.subscribe_method(method, handler)
    }

    /// Removes a notification subscriber.
    pub fn unsubscribe_notifications(&self, id: SubscriptionId) -> bool {
        self.shared.router.unsubscribe(id)
    }

    /// Sets the answerer for peer-initiated requests.
    pub fn set_request_handler<F>(&self, handler: F)
    where
        F: Fn(&str, &Value) -> std::result::Result<Value, RpcError> + Send + Sync + 'static,
    {
        self.shared.router.set_request_handler(handler);
    }
}

// ============================================================================
// Driver
// ============================================================================

/// Owns the lifecycle state of one session.
struct Driver {
    shared: Arc<Shared>,
    factory: Arc<dyn TransportFactory>,
    options: SessionOptions,
    listener: Option<StatusListener>,

    status: SessionStatus,
    attempt: u32,
    disposed: bool,
    last_error: Option<Arc<Error>>,

    /// Backoff timer; cancelling is dropping it.
    pending_timer: Option<Pin<Box<Sleep>>>,
    /// In-flight open.
    opening: Option<OpenFuture>,
    /// Live client.
    client: Option<ProtocolClient>,
    /// Disconnect signal of the live client.
    disconnect: Option<oneshot::Receiver<Disconnect>>,
    /// Keepalive ticker while connected.
    keepalive: Option<Interval>,
}

impl Driver {
    /// Event loop of the session.
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        debug!(session = %self.shared.id, endpoint = %self.shared.endpoint, "Session driver started");

        loop {
            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },

                result = next_of(&mut self.disconnect) => {
                    self.disconnect = None;
                    self.handle_disconnect(result.ok());
                }

                outcome = next_of(&mut self.opening) => {
                    self.opening = None;
                    self.handle_open_outcome(outcome);
                }

                () = next_of(&mut self.pending_timer) => {
                    self.pending_timer = None;
                    self.handle_timer();
                }

                () = tick_of(&mut self.keepalive) => self.send_keepalive(),
            }
        }

        // Every handle is gone.
        self.disposed = true;
        self.cancel_all();
        self.set_status(SessionStatus::Disconnected);
        debug!(session = %self.shared.id, "Session driver terminated");
    }

    // ========================================================================
    // Commands
    // ========================================================================

    fn handle_command(&mut self, command: Command) {
        trace!(session = %self.shared.id, ?command, status = %self.status, "Command received");

        match command {
            Command::Connect => {
                if self.disposed || self.status != SessionStatus::Disconnected {
                    debug!(session = %self.shared.id, status = %self.status, disposed = self.disposed, "Connect ignored");
                    return;
                }
                self.begin_open();
            }

            Command::Restart => {
                info!(session = %self.shared.id, "Restarting session");
                self.disposed = false;
                self.attempt = 0;
                self.cancel_all();
                self.begin_open();
            }

            Command::Dispose => {
                if self.disposed && self.status == SessionStatus::Disconnected {
                    return;
                }
                self.disposed = true;
                self.cancel_all();
                self.set_status(SessionStatus::Disconnected);
                info!(session = %self.shared.id, "Session disposed");
            }
        }
    }

    // ========================================================================
    // Opening
    // ========================================================================

    /// Starts a fresh open and moves to `Connecting`.
    fn begin_open(&mut self) {
        self.opening = Some(self.open_future());
        self.set_status(SessionStatus::Connecting);
    }

    /// Builds the open + handshake future for a fresh transport.
    fn open_future(&self) -> OpenFuture {
        let transport = self.factory.create();
        let id = self.shared.id.clone();
        let endpoint = self.shared.endpoint.clone();
        let router = self.shared.router.clone();
        let options = self.options.clone();
        let attempt = self.attempt;

        async move {
            debug!(session = %id, %endpoint, attempt, "Opening transport");

            let events = match timeout(options.open_timeout, transport.open(&endpoint)).await {
                Ok(Ok(events)) => events,
                Ok(Err(e)) => {
                    transport.close();
                    return Err(e);
                }
                Err(_) => {
                    transport.close();
                    return Err(Error::open_timeout(options.open_timeout.as_millis() as u64));
                }
            };

            let client = ProtocolClient::new(
                id,
                transport,
                Arc::clone(&options.codec),
                router,
                options.request_timeout,
            );
            let handshake = options.handshake.start(&client, &options.init_options);
            let disconnect = client.listen(events);

            match timeout(options.handshake_timeout, handshake).await {
                Ok(Ok(())) => Ok(Opened { client, disconnect }),
                Ok(Err(e)) => {
                    client.close();
                    Err(match e {
                        Error::HandshakeFailed { .. } => e,
                        other => Error::handshake_failed(other.to_string()),
                    })
                }
                Err(_) => {
                    client.close();
                    Err(Error::handshake_failed(format!(
                        "no reply within {}ms",
                        options.handshake_timeout.as_millis()
                    )))
                }
            }
        }
        .boxed()
    }

    fn handle_open_outcome(&mut self, outcome: Result<Opened>) {
        match outcome {
            Ok(opened) => {
                if self.disposed {
                    opened.client.close();
                    return;
                }

                self.attempt = 0;
                self.last_error = None;
                *self.shared.client.write() = Some(opened.client.clone());
                self.client = Some(opened.client);
                self.disconnect = Some(opened.disconnect);
                self.keepalive = self.options.keepalive.as_ref().map(|keepalive| {
                    interval_at(Instant::now() + keepalive.interval, keepalive.interval)
                });

                self.set_status(SessionStatus::Connected);
                info!(session = %self.shared.id, endpoint = %self.shared.endpoint, "Session connected");
            }

            Err(e) => {
                warn!(session = %self.shared.id, attempt = self.attempt, error = %e, "Open failed");
                self.last_error = Some(Arc::new(e));
                self.set_status(SessionStatus::Error);
                self.schedule_reconnect();
            }
        }
    }

    // ========================================================================
    // Disconnects and Reconnects
    // ========================================================================

    fn handle_disconnect(&mut self, disconnect: Option<Disconnect>) {
        self.drop_client();

        // Our own teardown clears `self.disconnect` first, so an empty
        // disconnect here means the client was closed from outside.
        let Some(disconnect) = disconnect else {
            warn!(session = %self.shared.id, "Client closed outside the session");
            self.last_error = Some(Arc::new(Error::SessionClosed));
            self.schedule_reconnect();
            return;
        };

        match disconnect {
            Disconnect::Closed(reason) => {
                if self.options.classifier.is_recoverable(&reason) {
                    warn!(session = %self.shared.id, code = ?reason.code, reason = %reason.reason, "Recoverable close");
                    self.last_error = Some(Arc::new(Error::abnormal_close(reason.code, reason.reason)));
                    self.schedule_reconnect();
                } else {
                    info!(session = %self.shared.id, code = ?reason.code, reason = %reason.reason, "Session closed");
                    self.set_status(SessionStatus::Disconnected);
                }
            }

            Disconnect::Failed(message) => {
                warn!(session = %self.shared.id, error = %message, "Transport failed");
                self.last_error = Some(Arc::new(Error::transport(message)));
                self.schedule_reconnect();
            }
        }
    }

    /// Arms the backoff timer, or gives up when out of attempts.
    fn schedule_reconnect(&mut self) {
        if self.disposed {
            return;
        }

        let config = self.options.backoff;
        if self.attempt >= config.max_attempts {
            self.last_error = Some(Arc::new(Error::max_reconnect_attempts(self.attempt)));
            self.set_status(SessionStatus::Error);
            info!(session = %self.shared.id, attempts = self.attempt, "Giving up reconnecting");
            return;
        }

        self.attempt += 1;
        let delay = backoff::delay(self.attempt, &config, self.options.jitter.sample());
        self.pending_timer = Some(Box::pin(sleep(delay)));
        self.set_status(SessionStatus::Reconnecting);

        debug!(
            session = %self.shared.id,
            attempt = self.attempt,
            delay_ms = delay.as_millis() as u64,
            "Reconnect scheduled"
        );
    }

    fn handle_timer(&mut self) {
        if self.disposed {
            return;
        }
        self.begin_open();
    }

    // ========================================================================
    // Keepalive
    // ========================================================================

    fn send_keepalive(&mut self) {
        let (Some(client), Some(keepalive)) = (&self.client, &self.options.keepalive) else {
            return;
        };
        match client.notify(&keepalive.method, keepalive.params.clone()) {
            Ok(()) => trace!(session = %self.shared.id, method = %keepalive.method, "Keepalive sent"),
            Err(e) => warn!(session = %self.shared.id, error = %e, "Keepalive failed"),
        }
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Drops the live client, closing it.
    fn drop_client(&mut self) {
        self.keepalive = None;
        self.disconnect = None;
        self.shared.client.write().take();
        if let Some(client) = self.client.take() {
            client.close();
        }
    }

    /// Cancels the timer, the live client and any in-flight open.
    fn cancel_all(&mut self) {
        self.pending_timer = None;
        self.drop_client();

        if let Some(opening) = self.opening.take() {
            let id = self.shared.id.clone();
            tokio::spawn(async move {
                match opening.await {
                    Ok(opened) => {
                        opened.client.close();
                        debug!(session = %id, reason = %Error::DisposedWhileConnecting, "Closed late transport");
                    }
                    Err(e) => trace!(session = %id, error = %e, "Abandoned open failed"),
                }
            });
        }
    }

    // ========================================================================
    // Publishing
    // ========================================================================

    /// Publishes the current state; notifies the listener on status changes.
    fn set_status(&mut self, status: SessionStatus) {
        let previous = self.status;
        self.status = status;

        let snapshot = SessionSnapshot {
            status,
            attempt: self.attempt,
            disposed: self.disposed,
            last_error: self.last_error.clone(),
        };
        self.shared.snapshot.send_replace(snapshot.clone());

        if previous != status {
            debug!(session = %self.shared.id, from = %previous, to = %status, attempt = self.attempt, "Status changed");
            if let Some(listener) = &self.listener {
                listener(&self.shared.id, &snapshot);
            }
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Awaits an optional future; pends forever when absent.
async fn next_of<F>(slot: &mut Option<F>) -> F::Output
where
    F: Future + Unpin,
{
    match slot {
        Some(future) => future.await,
        None => std::future::pending().await,
    }
}

/// Awaits the next tick of an optional interval; pends forever when absent.
async fn tick_of(slot: &mut Option<Interval>) {
    match slot {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use parking_lot::Mutex;
    use serde_json::json;

    use crate::backoff::{BackoffConfig, FixedJitter};
    use crate::protocol::NoHandshake;
    use crate::transport::{AcceptMode, MemoryAcceptor, MemoryFactory};

    fn quick_options() -> SessionOptions {
        SessionOptions::language_server()
            .with_handshake(NoHandshake)
            .with_jitter(FixedJitter::new(0.0))
            .with_backoff(BackoffConfig::new(3, 1000, 30_000, 0.3).unwrap())
    }

    fn session(options: SessionOptions) -> (SessionConnection, MemoryFactory, MemoryAcceptor) {
        let (factory, acceptor) = MemoryFactory::new();
        let session = SessionConnection::new(
            SessionId::new("pyright"),
            "mem://pyright",
            Arc::new(factory.clone()),
            options,
        );
        (session, factory, acceptor)
    }

    async fn wait_status(session: &SessionConnection, status: SessionStatus) -> SessionSnapshot {
        session.wait_for(|s| s.status == status).await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_reaches_connected() {
        let (session, factory, mut acceptor) = session(quick_options());
        assert_eq!(session.status(), SessionStatus::Disconnected);

        session.connect();
        let snapshot = wait_status(&session, SessionStatus::Connected).await;
        assert_eq!(snapshot.attempt, 0);
        assert!(session.is_connected());
        assert!(acceptor.accept().await.is_some());
        assert_eq!(factory.opened_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_is_noop_when_not_disconnected() {
        let (session, factory, _acceptor) = session(quick_options());
        session.connect();
        wait_status(&session, SessionStatus::Connected).await;

        session.connect();
        session.connect();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(factory.created_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recoverable_close_reconnects() {
        let (session, factory, mut acceptor) = session(quick_options());
        session.connect();
        wait_status(&session, SessionStatus::Connected).await;

        let peer = acceptor.accept().await.unwrap();
        peer.close(4003, "pyright crashed");

        let snapshot = wait_status(&session, SessionStatus::Reconnecting).await;
        assert_eq!(snapshot.attempt, 1);
        assert!(matches!(
            snapshot.last_error.as_deref(),
            Some(Error::AbnormalClose { code: Some(4003), .. })
        ));

        let snapshot = wait_status(&session, SessionStatus::Connected).await;
        assert_eq!(snapshot.attempt, 0);
        assert_eq!(factory.created_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_closed_externally_reconnects() {
        let (session, factory, mut acceptor) = session(quick_options());
        session.connect();
        wait_status(&session, SessionStatus::Connected).await;
        let first = acceptor.accept().await.unwrap();

        session.client().unwrap().close();

        let snapshot = wait_status(&session, SessionStatus::Reconnecting).await;
        assert_eq!(snapshot.attempt, 1);
        assert!(matches!(snapshot.last_error.as_deref(), Some(Error::SessionClosed)));
        assert!(first.is_client_closed());

        wait_status(&session, SessionStatus::Connected).await;
        assert!(session.client().is_ok_and(|client| !client.is_closed()));
        assert_eq!(factory.created_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_close_disconnects() {
        let (session, factory, mut acceptor) = session(quick_options());
        session.connect();
        wait_status(&session, SessionStatus::Connected).await;

        acceptor.accept().await.unwrap().close(1000, "bye");
        wait_status(&session, SessionStatus::Disconnected).await;

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(session.status(), SessionStatus::Disconnected);
        assert_eq!(factory.created_count(), 1);

        // A plain connect() works again after a terminal close.
        session.connect();
        wait_status(&session, SessionStatus::Connected).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let (session, factory, _acceptor) = session(quick_options());
        factory.set_mode(AcceptMode::Refuse);
        session.connect();

        let snapshot = session
            .wait_for(|s| {
                matches!(
                    s.last_error.as_deref(),
                    Some(Error::MaxReconnectAttemptsExceeded { .. })
                )
            })
            .await
            .unwrap();
        assert_eq!(snapshot.status, SessionStatus::Error);
        assert_eq!(snapshot.attempt, 3);
        assert_eq!(factory.created_count(), 4);

        // No timer left: nothing else is ever opened.
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(factory.created_count(), 4);
        assert_eq!(session.status(), SessionStatus::Error);

        // connect() does not revive an exhausted session.
        session.connect();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(factory.created_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_revives_and_resets_attempt() {
        let (session, factory, _acceptor) = session(quick_options());
        factory.set_mode(AcceptMode::Refuse);
        session.connect();
        session
            .wait_for(|s| s.status == SessionStatus::Error && s.attempt == 3)
            .await
            .unwrap();

        factory.set_mode(AcceptMode::Accept);
        session.restart();
        let snapshot = wait_status(&session, SessionStatus::Connected).await;
        assert_eq!(snapshot.attempt, 0);
        assert_eq!(factory.created_count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_cancels_pending_timer() {
        let (session, factory, mut acceptor) = session(quick_options());
        session.connect();
        wait_status(&session, SessionStatus::Connected).await;

        acceptor.accept().await.unwrap().drop_connection();
        wait_status(&session, SessionStatus::Reconnecting).await;

        session.dispose();
        let snapshot = wait_status(&session, SessionStatus::Disconnected).await;
        assert!(snapshot.disposed);

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(factory.created_count(), 1);
        assert_eq!(session.status(), SessionStatus::Disconnected);

        // Disposed sessions ignore connect().
        session.connect();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(factory.created_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_while_connecting_closes_late_transport() {
        let (session, factory, mut acceptor) = session(quick_options());
        factory.set_mode(AcceptMode::Delay(Duration::from_secs(5)));
        session.connect();
        wait_status(&session, SessionStatus::Connecting).await;

        session.dispose();
        wait_status(&session, SessionStatus::Disconnected).await;

        let peer = acceptor.accept().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(peer.is_client_closed());
        assert_eq!(session.status(), SessionStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_timeout_schedules_reconnect() {
        let options = quick_options().with_open_timeout(Duration::from_secs(2));
        let (session, factory, _acceptor) = session(options);
        factory.set_mode(AcceptMode::Hang);
        session.connect();

        let snapshot = wait_status(&session, SessionStatus::Reconnecting).await;
        assert!(matches!(
            snapshot.last_error.as_deref(),
            Some(Error::OpenTimeout { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_requires_connection() {
        let (session, _factory, _acceptor) = session(quick_options());
        let err = session.request("textDocument/hover", json!({})).await.unwrap_err();
        assert!(matches!(err, Error::NotConnected { .. }));
        assert!(session.notify("exit", Value::Null).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscriptions_survive_reconnect() {
        let (session, _factory, mut acceptor) = session(quick_options());
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        session.subscribe_method("window/logMessage", move |n| {
            sink.lock().push(n.params["message"].as_str().unwrap_or_default().to_string());
        });

        session.connect();
        wait_status(&session, SessionStatus::Connected).await;
        let first = acceptor.accept().await.unwrap();
        first.send_json(&json!({ "jsonrpc": "2.0", "method": "window/logMessage", "params": { "message": "one" } }));
        first.close(4001, "restarting");

        wait_status(&session, SessionStatus::Reconnecting).await;
        wait_status(&session, SessionStatus::Connected).await;
        let second = acceptor.accept().await.unwrap();
        second.send_json(&json!({ "jsonrpc": "2.0", "method": "window/logMessage", "params": { "message": "two" } }));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(*received.lock(), vec!["one".to_string(), "two".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_while_connected() {
        let options = SessionOptions::shell()
            .with_handshake(NoHandshake)
            .with_keepalive(Duration::from_secs(30), "heartbeat");
        let (session, _factory, mut acceptor) = session(options);
        session.connect();
        wait_status(&session, SessionStatus::Connected).await;

        let mut peer = acceptor.accept().await.unwrap();
        let frame = peer.recv_json().await.unwrap();
        assert_eq!(frame, json!({ "type": "heartbeat" }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_listener_sees_every_change_once() {
        let (factory, _acceptor) = MemoryFactory::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let session = SessionConnection::with_listener(
            SessionId::new("ruff"),
            "mem://ruff",
            Arc::new(factory.clone()),
            quick_options(),
            Arc::new(move |_, snapshot| sink.lock().push(snapshot.status)),
        );

        factory.set_mode(AcceptMode::Refuse);
        session.connect();
        session
            .wait_for(|s| s.status == SessionStatus::Reconnecting)
            .await
            .unwrap();

        assert_eq!(
            seen.lock()[..3],
            [
                SessionStatus::Connecting,
                SessionStatus::Error,
                SessionStatus::Reconnecting
            ]
        );
    }
}
