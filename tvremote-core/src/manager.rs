//! Connection manager: transport lifecycle, pairing handshake and command
//! dispatch for one device.
//!
//! Every transition happens under a single mutex and every notification is
//! queued onto the event channel while that mutex is held, so callers see
//! events in exactly the order the transitions happened. Each lifecycle
//! gets a generation number; a session task whose generation is stale
//! stops without emitting anything, which is what makes
//! [`ConnectionManager::disconnect_from_tv`] a hard barrier.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::command::{CommandEncoder, RemoteCommand};
use crate::config::{AuthToken, SessionConfig};
use crate::error::RemoteError;
use crate::network::{
    ChannelRequest, ChannelSender, Connector, Outgoing, TransportEvent, WebSocketConnector,
};
use crate::packet::{DeviceEvent, Packet};
use crate::state::{AuthorizationState, CommandLedger, ConnectionState};

// ── Events ───────────────────────────────────────────────────────

/// Notifications delivered to the caller, in transition order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteEvent {
    /// Transport opened.
    Connected,
    /// Waiting for the device's pairing decision.
    Authorizing,
    /// The device answered (or the prompt timed out).
    Authorization(AuthorizationState),
    /// Commands may now be sent.
    Ready,
    /// The transport wrote the command. Says nothing about execution.
    CommandWritten(RemoteCommand),
    /// The device echoed a previously written command.
    CommandAcknowledged(RemoteCommand),
    /// The lifecycle ended. Emitted once per lifecycle.
    Disconnected,
    Error(RemoteError),
}

pub type EventReceiver = mpsc::UnboundedReceiver<RemoteEvent>;

// ── Shared state ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Teardown {
    /// Close the channel: `Closing → Disconnected`.
    Graceful,
    /// The channel is already gone: straight to `Disconnected`.
    Abort,
}

struct Shared {
    state: ConnectionState,
    auth: AuthorizationState,
    /// Latest known token: the configured one, then whatever the device issued.
    token: Option<AuthToken>,
    generation: u64,
    sender: Option<ChannelSender>,
    cancel: Option<CancellationToken>,
    ledger: CommandLedger,
    events: mpsc::UnboundedSender<RemoteEvent>,
}

impl Shared {
    fn emit(&self, event: RemoteEvent) {
        // A dropped receiver only means nobody is listening.
        let _ = self.events.send(event);
    }

    /// Report `err` on the event channel and hand it back for returning.
    fn fail(&self, err: RemoteError) -> RemoteError {
        self.emit(RemoteEvent::Error(err.clone()));
        err
    }

    fn teardown(&mut self, how: Teardown) {
        if self.state.is_disconnected() {
            return;
        }
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(Outgoing::Close);
        }
        let ready_for = self.state.ready_duration();
        self.generation += 1;
        self.ledger.clear();
        if self.auth == AuthorizationState::Pending {
            self.auth = AuthorizationState::None;
        }

        match how {
            Teardown::Graceful => {
                if self.state.begin_close().is_err() || self.state.finish_close().is_err() {
                    self.state.force_disconnect();
                }
            }
            Teardown::Abort => self.state.force_disconnect(),
        }
        info!(?ready_for, "control channel disconnected");
        self.emit(RemoteEvent::Disconnected);
    }

    /// Apply one transport event. Returns `false` once the lifecycle ended.
    fn on_transport_event(&mut self, event: TransportEvent) -> bool {
        match event {
            TransportEvent::Written(seq) => {
                if let Some(command) = self.ledger.mark_written(seq).cloned() {
                    self.emit(RemoteEvent::CommandWritten(command));
                }
            }
            TransportEvent::Frame(text) => self.on_frame(&text),
            TransportEvent::Closed { clean } => {
                if !clean {
                    let err =
                        RemoteError::TransportFailure("channel ended without close frame".into());
                    self.emit(RemoteEvent::Error(err));
                }
                self.teardown(Teardown::Abort);
            }
            TransportEvent::Failed(err) => {
                warn!("control channel failed: {err}");
                self.emit(RemoteEvent::Error(err));
                self.teardown(Teardown::Abort);
            }
        }
        !self.state.is_disconnected()
    }

    fn on_frame(&mut self, text: &str) {
        let event = match Packet::decode(text) {
            Ok(Packet::Event(event)) => event,
            Ok(Packet::Request(req)) => {
                let err = RemoteError::DecodeFailure(format!(
                    "device sent a request envelope ({})",
                    req.method
                ));
                self.emit(RemoteEvent::Error(err));
                return;
            }
            Err(err) => {
                debug!("undecodable frame: {err}");
                self.emit(RemoteEvent::Error(err));
                return;
            }
        };

        match event.kind() {
            DeviceEvent::Connect { token } => self.on_allowed(token),
            DeviceEvent::Unauthorized => self.on_denied(),
            DeviceEvent::Timeout => self.on_prompt_timeout(),
            DeviceEvent::RemoteControl => match self.ledger.acknowledge() {
                Some(tracked) => {
                    trace!(seq = tracked.seq, "command acknowledged");
                    self.emit(RemoteEvent::CommandAcknowledged(tracked.command));
                }
                None => trace!("echo with no outstanding command"),
            },
            DeviceEvent::Error(message) => {
                warn!("device error: {message}");
                self.emit(RemoteEvent::Error(RemoteError::DeviceError(message)));
            }
            DeviceEvent::Other(name) => trace!(event = %name, "ignoring channel event"),
        }
    }

    fn on_allowed(&mut self, issued: Option<String>) {
        if self.state != ConnectionState::Authorizing {
            debug!(state = %self.state, "ignoring connect event outside authorization");
            return;
        }
        let Some(token) = issued.map(AuthToken::from).or_else(|| self.token.clone()) else {
            let err = RemoteError::DecodeFailure("connect event carried no token".into());
            self.emit(RemoteEvent::Error(err));
            return;
        };

        info!("authorization allowed");
        self.token = Some(token.clone());
        self.auth = AuthorizationState::Allowed(token);
        self.emit(RemoteEvent::Authorization(self.auth.clone()));
        if let Err(err) = self.state.complete_authorize() {
            self.emit(RemoteEvent::Error(err));
            return;
        }
        self.emit(RemoteEvent::Ready);
    }

    fn on_denied(&mut self) {
        info!(state = %self.state, "authorization denied");
        // A refused token is worthless for the next attempt.
        self.token = None;
        self.auth = AuthorizationState::Denied;
        self.emit(RemoteEvent::Authorization(AuthorizationState::Denied));
        self.emit(RemoteEvent::Error(RemoteError::Denied));
        self.teardown(Teardown::Graceful);
    }

    fn on_prompt_timeout(&mut self) {
        if self.state != ConnectionState::Authorizing {
            debug!(state = %self.state, "ignoring prompt timeout outside authorization");
            return;
        }
        debug!("pairing prompt not answered yet");
        self.auth = AuthorizationState::None;
        self.emit(RemoteEvent::Authorization(AuthorizationState::None));
    }
}

// ── ConnectionManager ────────────────────────────────────────────

/// Owns one control channel to one device.
pub struct ConnectionManager {
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    encoder: CommandEncoder,
    shared: Arc<Mutex<Shared>>,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ConnectionManager {
    /// Manager using the WebSocket connector. The device, app name and
    /// starting token are fixed for the manager's lifetime; every
    /// `connect()` targets them, presenting the latest issued token.
    pub fn new(config: SessionConfig) -> Result<(Self, EventReceiver), RemoteError> {
        Self::with_connector(config, Arc::new(WebSocketConnector))
    }

    /// Manager using a caller-supplied connector.
    pub fn with_connector(
        config: SessionConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<(Self, EventReceiver), RemoteError> {
        config.validate()?;
        let (events, rx) = mpsc::unbounded_channel();
        let shared = Shared {
            state: ConnectionState::default(),
            auth: AuthorizationState::default(),
            token: config.token.clone(),
            generation: 0,
            sender: None,
            cancel: None,
            ledger: CommandLedger::new(),
            events,
        };
        let manager = Self {
            config,
            connector,
            encoder: CommandEncoder,
            shared: Arc::new(Mutex::new(shared)),
        };
        Ok((manager, rx))
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn connection_state(&self) -> ConnectionState {
        lock(&self.shared).state.clone()
    }

    pub fn authorization_state(&self) -> AuthorizationState {
        lock(&self.shared).auth.clone()
    }

    /// The token the next `connect()` will present.
    pub fn token(&self) -> Option<AuthToken> {
        lock(&self.shared).token.clone()
    }

    /// Start a lifecycle. Returns once the open is in flight; progress is
    /// reported on the event channel. Must be called inside a Tokio runtime.
    pub fn connect(&self) -> Result<(), RemoteError> {
        let mut shared = lock(&self.shared);
        let url = match self.config.channel_url(shared.token.as_ref()) {
            Ok(url) => url,
            Err(err) => return Err(shared.fail(err)),
        };
        if let Err(err) = shared.state.begin_connect() {
            return Err(shared.fail(err));
        }
        shared.generation += 1;
        shared.auth = AuthorizationState::None;
        shared.ledger.clear();

        let generation = shared.generation;
        let cancel = CancellationToken::new();
        shared.cancel = Some(cancel.clone());

        let request = ChannelRequest {
            url,
            host: self.config.device.address.to_string(),
            secure: self.config.secure,
            certificate_validator: self.config.certificate_validator.clone(),
        };
        info!(
            device = %self.config.device,
            token = shared.token.is_some(),
            "connecting"
        );
        drop(shared);

        tokio::spawn(run_session(
            self.shared.clone(),
            self.connector.clone(),
            request,
            generation,
            cancel,
        ));
        Ok(())
    }

    /// Encode `command` and queue it on the channel.
    ///
    /// Requires `Ready` and `Allowed`. `RemoteEvent::CommandWritten` follows
    /// once the transport has written the frame.
    pub fn send_remote_command(&self, command: RemoteCommand) -> Result<(), RemoteError> {
        let mut shared = lock(&self.shared);
        if !shared.state.is_ready() {
            let err = RemoteError::precondition(format!(
                "cannot send {command}: state is {}, need Ready",
                shared.state
            ));
            return Err(shared.fail(err));
        }
        if !shared.auth.is_allowed() {
            let err = RemoteError::precondition(format!(
                "cannot send {command}: authorization is {}, need allowed",
                shared.auth
            ));
            return Err(shared.fail(err));
        }
        let Some(sender) = shared.sender.clone() else {
            let err = RemoteError::precondition("cannot send: no open transport");
            return Err(shared.fail(err));
        };

        let text = match self.encoder.encode(&command) {
            Ok(text) => text,
            Err(err) => return Err(shared.fail(err)),
        };
        debug!(%command, "queueing command");
        let seq = shared.ledger.queue(command);
        if let Err(e) = sender.send(Outgoing::Frame { seq, text }) {
            shared.ledger.abandon(seq);
            let err = shared.fail(e.into());
            shared.teardown(Teardown::Abort);
            return Err(err);
        }
        Ok(())
    }

    /// Close the channel from any live state. Exactly one
    /// `RemoteEvent::Disconnected` follows; nothing else is emitted for this
    /// lifecycle afterwards.
    pub fn disconnect_from_tv(&self) -> Result<(), RemoteError> {
        let mut shared = lock(&self.shared);
        if shared.state.is_disconnected() {
            return Err(shared.fail(RemoteError::precondition(
                "cannot disconnect: already disconnected",
            )));
        }
        info!(state = %shared.state, "disconnect requested");
        shared.teardown(Teardown::Graceful);
        Ok(())
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        lock(&self.shared).teardown(Teardown::Graceful);
    }
}

/// Drive one lifecycle: open the transport, then feed its events into the
/// state machine until the lifecycle ends or goes stale.
async fn run_session(
    shared: Arc<Mutex<Shared>>,
    connector: Arc<dyn Connector>,
    request: ChannelRequest,
    generation: u64,
    cancel: CancellationToken,
) {
    let opened = tokio::select! {
        _ = cancel.cancelled() => return,
        result = connector.open(&request) => result,
    };

    let mut events = {
        let mut guard = lock(&shared);
        if guard.generation != generation {
            return;
        }
        let channel = match opened {
            Ok(channel) => channel,
            Err(err) => {
                warn!("failed to open control channel: {err}");
                guard.emit(RemoteEvent::Error(err));
                guard.teardown(Teardown::Abort);
                return;
            }
        };
        let (sender, events) = channel.split();

        if let Err(err) = guard.state.transport_opened() {
            guard.emit(RemoteEvent::Error(err));
            return;
        }
        guard.emit(RemoteEvent::Connected);
        if let Err(err) = guard.state.begin_authorize() {
            guard.emit(RemoteEvent::Error(err));
            return;
        }
        guard.auth = AuthorizationState::Pending;
        guard.sender = Some(sender);
        guard.emit(RemoteEvent::Authorizing);
        events
    };

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => return,
            event = events.recv() => event,
        };

        let mut guard = lock(&shared);
        if guard.generation != generation {
            return;
        }
        let Some(event) = event else {
            guard.emit(RemoteEvent::Error(RemoteError::TransportFailure(
                "transport stopped without reporting".into(),
            )));
            guard.teardown(Teardown::Abort);
            return;
        };
        if !guard.on_transport_event(event) {
            return;
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;

    use crate::command::RemoteKey;
    use crate::device::Device;
    use crate::network::{PeerChannel, TransportChannel};
    use crate::packet::{ChannelEvent, EVENT_CHANNEL_CONNECT, EVENT_TIMEOUT, EVENT_UNAUTHORIZED};

    // ── Helpers ──────────────────────────────────────────────────

    /// Hands each opened channel's device end to the test.
    struct ScriptedConnector {
        peers: mpsc::UnboundedSender<PeerChannel>,
        urls: Mutex<Vec<String>>,
        refuse: bool,
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn open(&self, request: &ChannelRequest) -> Result<TransportChannel, RemoteError> {
            self.urls.lock().unwrap().push(request.url.clone());
            if self.refuse {
                return Err(RemoteError::TransportFailure("connection refused".into()));
            }
            let (channel, peer) = TransportChannel::pair();
            self.peers.send(peer).unwrap();
            Ok(channel)
        }
    }

    /// Never finishes opening.
    struct HangingConnector;

    #[async_trait]
    impl Connector for HangingConnector {
        async fn open(&self, _: &ChannelRequest) -> Result<TransportChannel, RemoteError> {
            futures::future::pending().await
        }
    }

    struct Harness {
        manager: ConnectionManager,
        events: EventReceiver,
        peers: mpsc::UnboundedReceiver<PeerChannel>,
        connector: Arc<ScriptedConnector>,
    }

    fn config() -> SessionConfig {
        SessionConfig::new(Device::from_address("10.0.0.5".parse().unwrap()), "MyApp")
    }

    fn harness_with(config: SessionConfig, refuse: bool) -> Harness {
        let (tx, peers) = mpsc::unbounded_channel();
        let connector = Arc::new(ScriptedConnector {
            peers: tx,
            urls: Mutex::new(Vec::new()),
            refuse,
        });
        let (manager, events) =
            ConnectionManager::with_connector(config, connector.clone()).unwrap();
        Harness {
            manager,
            events,
            peers,
            connector,
        }
    }

    fn harness() -> Harness {
        harness_with(config(), false)
    }

    async fn next_event(rx: &mut EventReceiver) -> RemoteEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    async fn assert_quiet(rx: &mut EventReceiver) {
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err(), "unexpected event");
    }

    fn frame(event: &str, data: serde_json::Value) -> TransportEvent {
        let text = Packet::Event(ChannelEvent::new(event, Some(data))).encode().unwrap();
        TransportEvent::Frame(text)
    }

    /// Connect and play the device up to `Authorizing`.
    async fn open(h: &mut Harness) -> PeerChannel {
        h.manager.connect().unwrap();
        let peer = h.peers.recv().await.unwrap();
        assert_eq!(next_event(&mut h.events).await, RemoteEvent::Connected);
        assert_eq!(next_event(&mut h.events).await, RemoteEvent::Authorizing);
        peer
    }

    /// Connect and authorize with token `abc123`.
    async fn ready(h: &mut Harness) -> PeerChannel {
        let peer = open(h).await;
        peer.events
            .send(frame(EVENT_CHANNEL_CONNECT, json!({ "token": "abc123" })))
            .unwrap();
        assert!(matches!(
            next_event(&mut h.events).await,
            RemoteEvent::Authorization(AuthorizationState::Allowed(_))
        ));
        assert_eq!(next_event(&mut h.events).await, RemoteEvent::Ready);
        peer
    }

    // ── Handshake ────────────────────────────────────────────────

    #[tokio::test]
    async fn pairing_then_command_emits_events_in_order() {
        let mut h = harness();
        h.manager.connect().unwrap();
        let mut peer = h.peers.recv().await.unwrap();

        peer.events
            .send(frame(EVENT_CHANNEL_CONNECT, json!({ "token": "abc123" })))
            .unwrap();

        assert_eq!(next_event(&mut h.events).await, RemoteEvent::Connected);
        assert_eq!(next_event(&mut h.events).await, RemoteEvent::Authorizing);
        assert_eq!(
            next_event(&mut h.events).await,
            RemoteEvent::Authorization(AuthorizationState::Allowed(AuthToken::new("abc123")))
        );
        assert_eq!(next_event(&mut h.events).await, RemoteEvent::Ready);

        h.manager
            .send_remote_command(RemoteCommand::key(RemoteKey::Enter))
            .unwrap();
        let Some(Outgoing::Frame { seq, text }) = peer.outgoing.recv().await else {
            panic!("expected a frame");
        };
        assert!(text.contains("KEY_ENTER"));
        peer.events.send(TransportEvent::Written(seq)).unwrap();

        assert_eq!(
            next_event(&mut h.events).await,
            RemoteEvent::CommandWritten(RemoteCommand::key(RemoteKey::Enter))
        );
        assert_eq!(h.manager.token(), Some(AuthToken::new("abc123")));
        assert!(h.manager.connection_state().is_ready());

        let urls = h.connector.urls.lock().unwrap().clone();
        assert_eq!(
            urls,
            vec!["wss://10.0.0.5:8002/api/v2/channels/samsung.remote.control?name=TXlBcHA="]
        );
    }

    #[tokio::test]
    async fn supplied_token_is_sent_and_reused_when_not_echoed() {
        let mut h = harness_with(config().with_token("prev42"), false);
        let peer = open(&mut h).await;
        assert!(h.connector.urls.lock().unwrap()[0].ends_with("&token=prev42"));

        peer.events.send(frame(EVENT_CHANNEL_CONNECT, json!({}))).unwrap();
        assert_eq!(
            next_event(&mut h.events).await,
            RemoteEvent::Authorization(AuthorizationState::Allowed(AuthToken::new("prev42")))
        );
        assert_eq!(next_event(&mut h.events).await, RemoteEvent::Ready);
    }

    #[tokio::test]
    async fn connect_event_without_any_token_is_a_decode_failure() {
        let mut h = harness();
        let peer = open(&mut h).await;
        peer.events.send(frame(EVENT_CHANNEL_CONNECT, json!({}))).unwrap();
        assert!(matches!(
            next_event(&mut h.events).await,
            RemoteEvent::Error(RemoteError::DecodeFailure(_))
        ));
        assert_eq!(h.manager.connection_state(), ConnectionState::Authorizing);
    }

    #[tokio::test]
    async fn denial_disconnects_once_and_blocks_commands() {
        let mut h = harness_with(config().with_token("stale"), false);
        let peer = open(&mut h).await;
        peer.events.send(frame(EVENT_UNAUTHORIZED, json!({}))).unwrap();

        assert_eq!(
            next_event(&mut h.events).await,
            RemoteEvent::Authorization(AuthorizationState::Denied)
        );
        assert_eq!(
            next_event(&mut h.events).await,
            RemoteEvent::Error(RemoteError::Denied)
        );
        assert_eq!(next_event(&mut h.events).await, RemoteEvent::Disconnected);
        assert!(h.manager.connection_state().is_disconnected());
        assert_eq!(h.manager.authorization_state(), AuthorizationState::Denied);
        assert!(h.manager.token().is_none());

        let err = h
            .manager
            .send_remote_command(RemoteCommand::key(RemoteKey::Enter))
            .unwrap_err();
        assert!(matches!(err, RemoteError::PreconditionViolation(_)));
    }

    #[tokio::test]
    async fn repeated_prompt_timeouts_keep_authorizing() {
        let mut h = harness();
        let peer = open(&mut h).await;
        for _ in 0..3 {
            peer.events.send(frame(EVENT_TIMEOUT, json!({}))).unwrap();
            assert_eq!(
                next_event(&mut h.events).await,
                RemoteEvent::Authorization(AuthorizationState::None)
            );
        }
        assert_eq!(h.manager.connection_state(), ConnectionState::Authorizing);
        assert!(h.manager.send_remote_command(RemoteCommand::text("x")).is_err());
    }

    // ── Preconditions ────────────────────────────────────────────

    #[tokio::test]
    async fn second_connect_is_rejected_without_state_change() {
        let mut h = harness();
        let _peer = open(&mut h).await;

        let err = h.manager.connect().unwrap_err();
        assert!(matches!(err, RemoteError::AlreadyConnected(_)));
        assert!(matches!(
            next_event(&mut h.events).await,
            RemoteEvent::Error(RemoteError::AlreadyConnected(_))
        ));
        assert_eq!(h.manager.connection_state(), ConnectionState::Authorizing);
        assert_eq!(h.manager.authorization_state(), AuthorizationState::Pending);
        assert_eq!(h.connector.urls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn send_while_connecting_fails_without_write() {
        let (manager, mut events) =
            ConnectionManager::with_connector(config(), Arc::new(HangingConnector)).unwrap();
        manager.connect().unwrap();
        assert_eq!(manager.connection_state(), ConnectionState::Connecting);

        let err = manager
            .send_remote_command(RemoteCommand::key(RemoteKey::Power))
            .unwrap_err();
        assert!(
            matches!(err, RemoteError::PreconditionViolation(ref m) if m.contains("Connecting"))
        );
        assert!(matches!(
            next_event(&mut events).await,
            RemoteEvent::Error(RemoteError::PreconditionViolation(_))
        ));

        manager.disconnect_from_tv().unwrap();
        assert_eq!(next_event(&mut events).await, RemoteEvent::Disconnected);
        assert_quiet(&mut events).await;
    }

    // ── Teardown ─────────────────────────────────────────────────

    #[tokio::test]
    async fn double_disconnect_emits_one_notification() {
        let mut h = harness();
        let mut peer = ready(&mut h).await;

        h.manager.disconnect_from_tv().unwrap();
        assert!(h.manager.disconnect_from_tv().is_err());

        assert_eq!(next_event(&mut h.events).await, RemoteEvent::Disconnected);
        assert!(matches!(
            next_event(&mut h.events).await,
            RemoteEvent::Error(RemoteError::PreconditionViolation(_))
        ));
        assert_quiet(&mut h.events).await;
        assert_eq!(peer.outgoing.recv().await, Some(Outgoing::Close));
    }

    #[tokio::test]
    async fn nothing_is_emitted_after_disconnect() {
        let mut h = harness();
        let peer = ready(&mut h).await;
        h.manager.disconnect_from_tv().unwrap();
        assert_eq!(next_event(&mut h.events).await, RemoteEvent::Disconnected);

        let _ = peer.events.send(frame(EVENT_UNAUTHORIZED, json!({})));
        let _ = peer.events.send(TransportEvent::Closed { clean: false });
        assert_quiet(&mut h.events).await;
    }

    #[tokio::test]
    async fn device_close_in_ready_disconnects() {
        let mut h = harness();
        let peer = ready(&mut h).await;
        peer.events.send(TransportEvent::Closed { clean: true }).unwrap();
        assert_eq!(next_event(&mut h.events).await, RemoteEvent::Disconnected);
        assert!(h.manager.connection_state().is_disconnected());
    }

    #[tokio::test]
    async fn transport_failure_reports_then_disconnects() {
        let mut h = harness();
        let peer = ready(&mut h).await;
        peer.events
            .send(TransportEvent::Failed(RemoteError::TransportFailure("reset".into())))
            .unwrap();
        assert_eq!(
            next_event(&mut h.events).await,
            RemoteEvent::Error(RemoteError::TransportFailure("reset".into()))
        );
        assert_eq!(next_event(&mut h.events).await, RemoteEvent::Disconnected);
    }

    #[tokio::test]
    async fn refused_open_disconnects_and_allows_retry() {
        let mut h = harness_with(config(), true);
        h.manager.connect().unwrap();
        assert!(matches!(
            next_event(&mut h.events).await,
            RemoteEvent::Error(RemoteError::TransportFailure(_))
        ));
        assert_eq!(next_event(&mut h.events).await, RemoteEvent::Disconnected);
        assert!(h.manager.connect().is_ok());
    }

    // ── Frames ───────────────────────────────────────────────────

    #[tokio::test]
    async fn malformed_frame_reports_decode_failure_only() {
        let mut h = harness();
        let peer = ready(&mut h).await;
        peer.events
            .send(TransportEvent::Frame("{\"data\":1}".into()))
            .unwrap();
        assert!(matches!(
            next_event(&mut h.events).await,
            RemoteEvent::Error(RemoteError::DecodeFailure(_))
        ));
        assert!(h.manager.connection_state().is_ready());
    }

    #[tokio::test]
    async fn echo_acknowledges_oldest_written_command() {
        let mut h = harness();
        let mut peer = ready(&mut h).await;

        h.manager.send_remote_command(RemoteCommand::key(RemoteKey::Up)).unwrap();
        h.manager.send_remote_command(RemoteCommand::text("hi")).unwrap();
        for _ in 0..2 {
            let Some(Outgoing::Frame { seq, .. }) = peer.outgoing.recv().await else {
                panic!("expected a frame");
            };
            peer.events.send(TransportEvent::Written(seq)).unwrap();
        }
        peer.events
            .send(frame("ms.remote.control", json!({})))
            .unwrap();

        assert_eq!(
            next_event(&mut h.events).await,
            RemoteEvent::CommandWritten(RemoteCommand::key(RemoteKey::Up))
        );
        assert_eq!(
            next_event(&mut h.events).await,
            RemoteEvent::CommandWritten(RemoteCommand::text("hi"))
        );
        assert_eq!(
            next_event(&mut h.events).await,
            RemoteEvent::CommandAcknowledged(RemoteCommand::key(RemoteKey::Up))
        );
    }

    #[tokio::test]
    async fn device_error_event_is_surfaced() {
        let mut h = harness();
        let peer = ready(&mut h).await;
        peer.events
            .send(frame("ms.error", json!({ "message": "bad params" })))
            .unwrap();
        assert_eq!(
            next_event(&mut h.events).await,
            RemoteEvent::Error(RemoteError::DeviceError("bad params".into()))
        );
    }

    #[tokio::test]
    async fn reconnect_presents_issued_token() {
        let mut h = harness();
        let _peer = ready(&mut h).await;
        h.manager.disconnect_from_tv().unwrap();
        assert_eq!(next_event(&mut h.events).await, RemoteEvent::Disconnected);

        let _peer = open(&mut h).await;
        let urls = h.connector.urls.lock().unwrap().clone();
        assert!(urls[1].ends_with("&token=abc123"));
    }

    #[tokio::test]
    async fn issued_token_is_encoded_on_reconnect() {
        let mut h = harness();
        let peer = open(&mut h).await;
        peer.events
            .send(frame(EVENT_CHANNEL_CONNECT, json!({ "token": "a&name=evil" })))
            .unwrap();
        assert_eq!(
            next_event(&mut h.events).await,
            RemoteEvent::Authorization(AuthorizationState::Allowed(AuthToken::new("a&name=evil")))
        );
        assert_eq!(next_event(&mut h.events).await, RemoteEvent::Ready);
        h.manager.disconnect_from_tv().unwrap();
        assert_eq!(next_event(&mut h.events).await, RemoteEvent::Disconnected);

        let _peer = open(&mut h).await;
        let urls = h.connector.urls.lock().unwrap().clone();
        assert_eq!(
            urls[1],
            "wss://10.0.0.5:8002/api/v2/channels/samsung.remote.control?name=TXlBcHA=&token=a%26name%3Devil"
        );
    }

    #[tokio::test]
    async fn disconnect_while_prompt_pending() {
        let mut h = harness();
        let mut peer = open(&mut h).await;
        peer.events.send(frame(EVENT_TIMEOUT, json!({}))).unwrap();
        assert_eq!(
            next_event(&mut h.events).await,
            RemoteEvent::Authorization(AuthorizationState::None)
        );
        assert_eq!(h.manager.connection_state(), ConnectionState::Authorizing);

        h.manager.disconnect_from_tv().unwrap();
        assert_eq!(next_event(&mut h.events).await, RemoteEvent::Disconnected);
        assert!(h.manager.connection_state().is_disconnected());
        assert_eq!(h.manager.authorization_state(), AuthorizationState::None);
        assert_eq!(peer.outgoing.recv().await, Some(Outgoing::Close));

        // The user accepts the prompt too late.
        let _ = peer
            .events
            .send(frame(EVENT_CHANNEL_CONNECT, json!({ "token": "late" })));
        assert_quiet(&mut h.events).await;
        assert!(h.manager.token().is_none());
    }

    #[test]
    fn invalid_configuration_is_rejected_at_construction() {
        let bad = SessionConfig::new(Device::from_address("10.0.0.5".parse().unwrap()), "");
        let err = ConnectionManager::new(bad).err().unwrap();
        assert!(matches!(err, RemoteError::InvalidConfiguration(_)));
    }
}
