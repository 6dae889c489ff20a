//! The protocol client: request/reply correlation plus server push dispatch.
//!
//! All bookkeeping happens on one driver task that owns the pending table and
//! consumes both caller commands and transport events. Host calls that touch
//! editor state, and connection listeners, run on a separate UI task so the
//! driver never waits on them.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc, PoisonError, RwLock as StdRwLock,
    },
    task::{ready, Context, Poll},
    time::Duration,
};

use serde_json::{Map, Value};
use tokio::{
    sync::{mpsc, oneshot, RwLock},
    time::Instant,
};
use tokio_util::sync::{CancellationToken, DropGuard};

use super::{
    dispatch::{self, DispatchTable, ServerRequest},
    pending::{CorrelationKey, CorrelationMode, PendingTable, ReplyResult, Waiter},
    protocol::{self, Envelope},
    selection::{HighlightedCodeFormatter, SelectionFormatter, TextSelection},
    transport::{self, Connection, Outbox, TransportEvent},
};
use crate::{
    config::ClientConfig,
    error::{ProtocolError, RequestError, TransportError},
    host::Host,
};

/// Observer of hard connection failures.
pub trait ConnectionListener: Send + Sync {
    fn on_connection_error(&self, error: &TransportError);
}

impl<F> ConnectionListener for F
where
    F: Fn(&TransportError) + Send + Sync,
{
    fn on_connection_error(&self, error: &TransportError) {
        self(error);
    }
}

/// Copy-on-write: readers clone the inner `Arc` and iterate without the lock.
type Listeners = Arc<StdRwLock<Arc<Vec<Arc<dyn ConnectionListener>>>>>;

enum Command {
    Request {
        envelope: Envelope,
        key: CorrelationKey,
        waiter: Waiter,
    },
    Notify(Envelope),
    Release {
        key: CorrelationKey,
        reason: RequestError,
    },
    Close,
}

enum UiTask {
    Serve {
        request: ServerRequest,
        request_id: Option<u64>,
    },
    Selection(Map<String, Value>),
    ConnectionFailed(TransportError),
}

/// The reply to a request sent with [`ProtocolClient::send_and_receive`].
///
/// Awaiting it waits without a deadline; use [`PendingReply::with_timeout`]
/// to bound the wait. Dropping it before the reply arrives abandons the
/// request.
pub struct PendingReply {
    key: CorrelationKey,
    rx: oneshot::Receiver<ReplyResult>,
    commands: mpsc::UnboundedSender<Command>,
    settled: bool,
}

impl PendingReply {
    pub const fn key(&self) -> &CorrelationKey {
        &self.key
    }

    /// Wait at most `limit`. On expiry the local wait is dropped; the request
    /// itself stays answered or unanswered on the wire.
    pub async fn with_timeout(mut self, limit: Duration) -> ReplyResult {
        if let Ok(result) = tokio::time::timeout(limit, &mut self).await {
            return result;
        }
        self.release(RequestError::Timeout);
        Err(RequestError::Timeout)
    }

    /// Stop waiting for the reply.
    pub fn abandon(mut self) {
        self.release(RequestError::Abandoned);
    }

    fn release(&mut self, reason: RequestError) {
        if self.settled {
            return;
        }
        self.settled = true;
        // Closed before the driver looks, so the entry counts as unwanted.
        self.rx.close();
        let _ = self.commands.send(Command::Release {
            key: self.key.clone(),
            reason,
        });
    }
}

impl Future for PendingReply {
    type Output = ReplyResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let result = ready!(Pin::new(&mut self.rx).poll(cx));
        self.settled = true;
        Poll::Ready(result.unwrap_or(Err(RequestError::Disconnected)))
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.release(RequestError::Abandoned);
    }
}

pub struct ClientBuilder {
    host: Arc<dyn Host>,
    config: ClientConfig,
    formatter: Arc<dyn SelectionFormatter>,
}

impl ClientBuilder {
    pub fn new(host: Arc<dyn Host>) -> Self {
        Self {
            host,
            config: ClientConfig::default(),
            formatter: Arc::new(HighlightedCodeFormatter),
        }
    }

    #[must_use]
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace how text selections are turned into payloads.
    #[must_use]
    pub fn formatter(mut self, formatter: impl SelectionFormatter + 'static) -> Self {
        self.formatter = Arc::new(formatter);
        self
    }

    /// Open a WebSocket to the configured endpoint and start the client.
    pub async fn connect(self) -> Result<ProtocolClient, TransportError> {
        let connection = transport::connect(&self.config.url).await?;
        Ok(self.start(connection))
    }

    /// Start the client on an already open connection. Must be called from
    /// within a Tokio runtime.
    pub fn start(self, connection: Connection) -> ProtocolClient {
        let Connection { outbox, events } = connection;
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (ui_tx, ui_rx) = mpsc::unbounded_channel();
        let listeners: Listeners = Arc::default();
        let shutdown = CancellationToken::new();
        let unsent = Arc::new(AtomicUsize::new(0));

        let driver = Driver {
            pending: PendingTable::new(),
            dispatch: DispatchTable::standard(),
            host: self.host.clone(),
            outbox: outbox.clone(),
            ui: ui_tx.clone(),
            commands: command_rx,
            unsent: unsent.clone(),
            events: Some(events),
        };
        tokio::spawn(driver.run(shutdown.clone()));
        tokio::spawn(run_ui_queue(
            ui_rx,
            self.host,
            outbox.clone(),
            listeners.clone(),
        ));

        ProtocolClient {
            config: self.config,
            commands: command_tx,
            ui: ui_tx,
            outbox,
            formatter: self.formatter,
            listeners,
            next_request_id: AtomicU64::new(1),
            unsent,
            session_id: RwLock::new(None),
            _shutdown: shutdown.drop_guard(),
        }
    }
}

/// Handle to a running connection. Dropping it stops the client and closes
/// the connection.
pub struct ProtocolClient {
    config: ClientConfig,
    commands: mpsc::UnboundedSender<Command>,
    ui: mpsc::UnboundedSender<UiTask>,
    outbox: Outbox,
    formatter: Arc<dyn SelectionFormatter>,
    listeners: Listeners,
    next_request_id: AtomicU64,
    /// Requests and notifications the driver has not passed on yet.
    unsent: Arc<AtomicUsize>,
    session_id: RwLock<Option<String>>,
    _shutdown: DropGuard,
}

impl ProtocolClient {
    pub fn builder(host: Arc<dyn Host>) -> ClientBuilder {
        ClientBuilder::new(host)
    }

    /// Send a request and return its reply without waiting for it.
    pub fn send_and_receive(&self, message_type: &str, data: Map<String, Value>) -> PendingReply {
        let (key, request_id) = match self.config.correlation {
            CorrelationMode::RequestId => {
                let id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
                (CorrelationKey::RequestId(id), Some(id))
            }
            CorrelationMode::MessageType => {
                (CorrelationKey::MessageType(message_type.to_string()), None)
            }
        };

        let (waiter, rx) = oneshot::channel();
        let envelope = Envelope::new(message_type, data).with_request_id(request_id);
        let command = Command::Request {
            envelope,
            key: key.clone(),
            waiter,
        };
        if !self.submit(command) {
            tracing::warn!("Request {message_type} sent after the client stopped");
        }

        PendingReply {
            key,
            rx,
            commands: self.commands.clone(),
            settled: false,
        }
    }

    /// Send a message that expects no reply.
    pub fn notify(&self, message_type: &str, data: Map<String, Value>) {
        if !self.submit(Command::Notify(Envelope::new(message_type, data))) {
            tracing::warn!("Notification {message_type} sent after the client stopped");
        }
    }

    /// Hand an outgoing message to the driver, counting it as queued until
    /// it reaches the transport.
    fn submit(&self, command: Command) -> bool {
        self.unsent.fetch_add(1, Ordering::SeqCst);
        if self.commands.send(command).is_err() {
            self.unsent.fetch_sub(1, Ordering::SeqCst);
            return false;
        }
        true
    }

    /// Ask the agent for the session id and remember it.
    ///
    /// Waits for already queued frames to be written first, polling up to the
    /// configured drain timeout. The reply itself is awaited without a
    /// deadline.
    pub async fn get_session_id(&self) -> Option<String> {
        let deadline = Instant::now() + self.config.drain_timeout;
        while self.queued_frames() > 0 && Instant::now() < deadline {
            tokio::time::sleep(self.config.drain_poll_interval).await;
        }
        let queued = self.queued_frames();
        if queued > 0 {
            tracing::warn!("Requesting session id with {queued} frames still queued");
        }

        let session_id = match self
            .send_and_receive(protocol::GET_SESSION_ID, Map::new())
            .await
        {
            Ok(reply) => session_id_from(&reply),
            Err(e) => {
                tracing::warn!("No session id: {e}");
                None
            }
        };

        if let Some(id) = &session_id {
            tracing::info!("Session id: {id}");
            *self.session_id.write().await = Some(id.clone());
        }
        session_id
    }

    /// The session id from the last successful [`ProtocolClient::get_session_id`].
    pub async fn session_id(&self) -> Option<String> {
        self.session_id.read().await.clone()
    }

    /// Report a selection to the agent and to the local UI.
    pub fn on_text_selected(&self, selection: &TextSelection) {
        let payload = self.formatter.format(selection);
        self.notify(protocol::HIGHLIGHTED_CODE_PUSH, payload.clone());
        if self.ui.send(UiTask::Selection(payload)).is_err() {
            tracing::warn!("UI queue is gone; selection not shown");
        }
    }

    /// Register an observer of connection failures.
    pub fn add_event_listener(&self, listener: impl ConnectionListener + 'static) {
        let mut current = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let mut next = Vec::clone(&current);
        next.push(Arc::new(listener));
        *current = Arc::new(next);
    }

    /// Outgoing messages not yet written to the connection.
    pub fn queued_frames(&self) -> usize {
        self.unsent.load(Ordering::SeqCst) + self.outbox.queued()
    }

    /// Close the connection normally. Outstanding requests resolve with
    /// [`RequestError::Disconnected`].
    pub fn disconnect(&self) {
        let _ = self.commands.send(Command::Close);
    }
}

/// `data.sessionId` as a string; numbers are accepted and stringified.
fn session_id_from(reply: &Envelope) -> Option<String> {
    match reply.data.get("sessionId")? {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        other => {
            tracing::warn!("Unexpected sessionId in reply: {other}");
            None
        }
    }
}

struct Driver {
    pending: PendingTable,
    dispatch: DispatchTable,
    host: Arc<dyn Host>,
    outbox: Outbox,
    ui: mpsc::UnboundedSender<UiTask>,
    commands: mpsc::UnboundedReceiver<Command>,
    unsent: Arc<AtomicUsize>,
    /// `None` once the transport stopped delivering.
    events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
}

impl Driver {
    async fn run(mut self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(Command::Close) | None => break,
                    Some(command) => self.handle_command(command),
                },
                event = next_event(&mut self.events) => match event {
                    Some(event) => self.handle_event(event),
                    None => self.events = None,
                },
            }
        }

        self.outbox.close();
        if !self.pending.is_empty() {
            tracing::info!(
                "Client stopped with {} requests pending and {} displaced callers",
                self.pending.len(),
                self.pending.orphaned()
            );
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Request {
                envelope,
                key,
                waiter,
            } => {
                self.pending
                    .register_waiter(key, &envelope.message_type, waiter);
                self.send(&envelope);
                self.unsent.fetch_sub(1, Ordering::SeqCst);
            }
            Command::Notify(envelope) => {
                self.send(&envelope);
                self.unsent.fetch_sub(1, Ordering::SeqCst);
            }
            Command::Release { key, reason } => {
                self.pending.release(&key, reason);
            }
            Command::Close => {}
        }
    }

    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Frame(frame) => self.handle_frame(&frame),
            TransportEvent::Failed(error) => {
                if self.ui.send(UiTask::ConnectionFailed(error)).is_err() {
                    tracing::error!("Connection failed with nobody left to tell");
                }
            }
        }
    }

    fn handle_frame(&mut self, frame: &str) {
        let envelope = match protocol::decode(frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!("Dropping frame: {e}");
                return;
            }
        };
        tracing::debug!("<- {}", envelope.message_type);

        match self.dispatch.decode(&envelope) {
            Ok(request) if request.is_pure() => {
                if let Some(reply) = dispatch::handle(self.host.as_ref(), &request) {
                    self.send(&reply.with_request_id(envelope.request_id));
                }
            }
            Ok(request) => {
                let task = UiTask::Serve {
                    request,
                    request_id: envelope.request_id,
                };
                if self.ui.send(task).is_err() {
                    tracing::warn!("UI queue is gone; {} ignored", envelope.message_type);
                }
            }
            Err(ProtocolError::UnknownDiscriminator(message_type)) => {
                if !self.pending.matches(&envelope) {
                    tracing::warn!("Ignoring unknown message type {message_type}");
                }
            }
            Err(e) => tracing::warn!("{e}"),
        }

        self.pending.resolve_and_remove(envelope);
    }

    fn send(&self, envelope: &Envelope) {
        send_envelope(&self.outbox, envelope);
    }
}

async fn next_event(
    events: &mut Option<mpsc::UnboundedReceiver<TransportEvent>>,
) -> Option<TransportEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

fn send_envelope(outbox: &Outbox, envelope: &Envelope) {
    let frame = match protocol::encode(envelope) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::error!("Could not encode {}: {e}", envelope.message_type);
            return;
        }
    };
    tracing::debug!("-> {}", envelope.message_type);
    if let Err(e) = outbox.send(frame) {
        tracing::warn!("{} not sent: {e}", envelope.message_type);
    }
}

async fn run_ui_queue(
    mut tasks: mpsc::UnboundedReceiver<UiTask>,
    host: Arc<dyn Host>,
    outbox: Outbox,
    listeners: Listeners,
) {
    while let Some(task) = tasks.recv().await {
        match task {
            UiTask::Serve {
                request,
                request_id,
            } => {
                if let Some(reply) = dispatch::handle(host.as_ref(), &request) {
                    send_envelope(&outbox, &reply.with_request_id(request_id));
                }
            }
            UiTask::Selection(payload) => {
                host.dispatch_to_ui(protocol::HIGHLIGHTED_CODE_EVENT, &Value::Object(payload));
            }
            UiTask::ConnectionFailed(error) => {
                let snapshot = listeners
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                tracing::info!("Notifying {} listeners of: {error}", snapshot.len());
                for listener in snapshot.iter() {
                    listener.on_connection_error(&error);
                }
            }
        }
    }
}
