//! SSDP discovery of remote-control receivers on the local network.
//!
//! A search session binds one UDP socket, repeats an `M-SEARCH` on an
//! interval and turns `200 OK` answers into [`Device`]s, deduplicated by id.
//! Observer calls are serialized behind a delivery gate but run without the
//! state lock, so an observer may stop the search or change the observer set.

use std::cell::Cell;
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::net::UdpSocket;
use tokio_util::codec::{Decoder, Encoder};
use tokio_util::sync::CancellationToken;
use tokio_util::udp::UdpFramed;
use tracing::{debug, info, trace, warn};

use crate::device::Device;
use crate::error::RemoteError;

/// Service type answered by remote-control capable TVs.
pub const SEARCH_TARGET: &str = "urn:samsung.com:device:RemoteControlReceiver:1";

pub const SSDP_GROUP: SocketAddr =
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(239, 255, 255, 250), 1900));

/// Headers some devices use to advertise a display name.
const NAME_HEADERS: &[&str] = &["x-friendly-name", "friendlyname"];

// ── Config ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Where `M-SEARCH` requests go.
    pub group: SocketAddr,
    /// Local address for the search socket.
    pub bind: SocketAddr,
    pub search_target: String,
    /// Delay between repeated `M-SEARCH` requests.
    pub interval: Duration,
    /// Whole-session limit. `None` searches until stopped.
    pub timeout: Option<Duration>,
    /// Maximum response delay advertised to devices, in seconds.
    pub mx: u8,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            group: SSDP_GROUP,
            bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            search_target: SEARCH_TARGET.to_string(),
            interval: Duration::from_secs(1),
            timeout: None,
            mx: 1,
        }
    }
}

impl DiscoveryConfig {
    pub fn with_group(mut self, group: SocketAddr) -> Self {
        self.group = group;
        self
    }

    pub fn with_bind(mut self, bind: SocketAddr) -> Self {
        self.bind = bind;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

// ── Codec ────────────────────────────────────────────────────────

/// An `M-SEARCH` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MSearch {
    pub host: SocketAddr,
    pub search_target: String,
    pub mx: u8,
}

/// A decoded `200 OK` search answer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchResponse {
    pub usn: String,
    pub location: Option<String>,
    pub search_target: Option<String>,
    pub friendly_name: Option<String>,
}

/// One datagram. Unusable datagrams surface as `Ignored` so a bad packet
/// never ends the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SsdpMessage {
    Response(SearchResponse),
    Ignored(String),
}

/// Datagram codec for `UdpFramed`: each call consumes one whole datagram.
#[derive(Debug, Clone)]
pub struct SsdpCodec {
    search_target: String,
}

impl SsdpCodec {
    pub fn new(search_target: impl Into<String>) -> Self {
        Self {
            search_target: search_target.into(),
        }
    }

    fn parse(&self, datagram: &str) -> SsdpMessage {
        let mut lines = datagram.lines();
        let status = lines.next().unwrap_or_default();
        let mut parts = status.split_whitespace();
        let version = parts.next().unwrap_or_default();
        let code = parts.next().unwrap_or_default();
        if !version.eq_ignore_ascii_case("HTTP/1.1") || code != "200" {
            return SsdpMessage::Ignored(format!("not a search response: {status:?}"));
        }

        let mut response = SearchResponse::default();
        for line in lines {
            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            let name = name.trim().to_ascii_lowercase();
            let value = value.trim().to_string();
            match name.as_str() {
                "usn" => response.usn = value,
                "location" => response.location = Some(value),
                "st" => response.search_target = Some(value),
                n if NAME_HEADERS.contains(&n) && !value.is_empty() => {
                    response.friendly_name = Some(value)
                }
                _ => {}
            }
        }

        if response.usn.is_empty() {
            return SsdpMessage::Ignored("response has no USN".into());
        }
        if let Some(st) = &response.search_target {
            if st != &self.search_target {
                return SsdpMessage::Ignored(format!("unrelated service {st}"));
            }
        }
        SsdpMessage::Response(response)
    }
}

impl Decoder for SsdpCodec {
    type Item = SsdpMessage;
    type Error = RemoteError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }
        let datagram = src.split();
        let message = match std::str::from_utf8(&datagram) {
            Ok(text) => self.parse(text),
            Err(_) => SsdpMessage::Ignored("datagram is not UTF-8".into()),
        };
        Ok(Some(message))
    }
}

impl Encoder<MSearch> for SsdpCodec {
    type Error = RemoteError;

    fn encode(&mut self, item: MSearch, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let request = format!(
            "M-SEARCH * HTTP/1.1\r\nHOST: {}\r\nMAN: \"ssdp:discover\"\r\nMX: {}\r\nST: {}\r\n\r\n",
            item.host, item.mx, item.search_target
        );
        dst.put_slice(request.as_bytes());
        Ok(())
    }
}

impl SearchResponse {
    /// `uuid:` segment of the USN.
    pub fn device_id(&self) -> Option<&str> {
        let start = self.usn.find("uuid:")? + "uuid:".len();
        let rest = &self.usn[start..];
        let id = rest.split("::").next().unwrap_or(rest).trim();
        (!id.is_empty()).then_some(id)
    }

    /// Host of the LOCATION URL when it is a literal IP.
    pub fn location_address(&self) -> Option<IpAddr> {
        let location = self.location.as_deref()?;
        let rest = location.split_once("://").map_or(location, |(_, r)| r);
        let authority = rest.split('/').next()?;
        if let Some(v6) = authority.strip_prefix('[') {
            return v6.split(']').next()?.parse().ok();
        }
        authority.split(':').next()?.parse().ok()
    }

    /// Build the device record. `source` is the datagram's sender.
    pub fn to_device(&self, source: IpAddr) -> Option<Device> {
        let id = self.device_id()?;
        let address = self.location_address().unwrap_or(source);
        let name = self
            .friendly_name
            .clone()
            .unwrap_or_else(|| address.to_string());
        Some(Device::new(id, name, address))
    }
}

// ── Observers ────────────────────────────────────────────────────

/// Receives search progress. Calls from one engine never overlap, and an
/// observer may call back into the engine (to stop the search, say).
pub trait DiscoveryObserver: Send + Sync {
    fn device_found(&self, device: &Device);

    fn search_started(&self) {}

    fn search_stopped(&self) {}

    /// The session ended on an error (socket failure, or target not found
    /// before the timeout).
    fn search_failed(&self, _error: &RemoteError) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

// ── Engine ───────────────────────────────────────────────────────

thread_local! {
    /// Address of the `Shared` whose gate this thread holds, or 0.
    static DELIVERING: Cell<usize> = const { Cell::new(0) };
}

/// Restores the previous holder on drop.
struct DeliveringGuard(usize);

impl Drop for DeliveringGuard {
    fn drop(&mut self) {
        DELIVERING.with(|d| d.set(self.0));
    }
}

struct Session {
    id: u64,
    cancel: CancellationToken,
    target: Option<String>,
    seen: HashSet<String>,
}

enum Offer {
    /// The session is over.
    Stale,
    /// Filtered out or already reported.
    Skip,
    New { targeted: bool },
}

#[derive(Default)]
struct State {
    observers: Vec<(ObserverId, Arc<dyn DiscoveryObserver>)>,
    next_observer: u64,
    next_session: u64,
    session: Option<Session>,
}

impl State {
    fn observers(&self) -> Vec<Arc<dyn DiscoveryObserver>> {
        self.observers.iter().map(|(_, o)| o.clone()).collect()
    }

    fn is_current(&self, session_id: u64) -> bool {
        self.session.as_ref().is_some_and(|s| s.id == session_id)
    }

    fn take_session(&mut self, session_id: u64) -> Option<Session> {
        if !self.is_current(session_id) {
            return None;
        }
        self.session.take()
    }

    fn offer(&mut self, session_id: u64, device: &Device) -> Offer {
        let Some(session) = self.session.as_mut().filter(|s| s.id == session_id) else {
            return Offer::Stale;
        };
        if session.target.as_ref().is_some_and(|t| *t != device.id) {
            trace!(id = %device.id, "not the search target");
            return Offer::Skip;
        }
        if !session.seen.insert(device.id.clone()) {
            trace!(id = %device.id, "already reported");
            return Offer::Skip;
        }
        Offer::New {
            targeted: session.target.is_some(),
        }
    }
}

/// Engine state plus the gate that serializes observer calls. Observers run
/// with the gate held but the state unlocked.
#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    gate: Mutex<()>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` holding the delivery gate. Re-entrant on the delivering thread.
    fn deliver<R>(&self, f: impl FnOnce() -> R) -> R {
        let me = self as *const Shared as usize;
        if DELIVERING.with(Cell::get) == me {
            return f();
        }
        let _gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        let _reset = DeliveringGuard(DELIVERING.with(|d| d.replace(me)));
        f()
    }

    /// Call every registered observer. Caller holds the gate.
    fn notify(&self, f: impl Fn(&dyn DiscoveryObserver)) {
        let observers = self.state().observers();
        for observer in &observers {
            f(observer.as_ref());
        }
    }

    /// Report a device from session `session_id`. Returns `false` once the
    /// session is over.
    fn offer(&self, session_id: u64, device: Device) -> bool {
        self.deliver(|| {
            let (observers, targeted) = {
                let mut state = self.state();
                match state.offer(session_id, &device) {
                    Offer::Stale => return false,
                    Offer::Skip => return true,
                    Offer::New { targeted } => (state.observers(), targeted),
                }
            };

            info!(%device, "device found");
            for observer in &observers {
                // An earlier observer may have stopped the search.
                if !self.state().is_current(session_id) {
                    return false;
                }
                observer.device_found(&device);
            }
            if targeted {
                if self.state().take_session(session_id).is_some() {
                    self.notify(|o| o.search_stopped());
                }
                return false;
            }
            self.state().is_current(session_id)
        })
    }

    /// End the session on a timeout.
    fn expire(&self, session_id: u64) {
        self.deliver(|| {
            let session = self.state().take_session(session_id);
            let Some(session) = session else {
                return;
            };
            match session.target {
                Some(target) => {
                    let err = RemoteError::DiscoveryTimeout(format!("{target} not found"));
                    info!("discovery timed out: {err}");
                    self.notify(|o| o.search_failed(&err));
                }
                None => {
                    info!(found = session.seen.len(), "discovery finished");
                    self.notify(|o| o.search_stopped());
                }
            }
        })
    }

    fn fail(&self, session_id: u64, err: &RemoteError) {
        self.deliver(|| {
            if self.state().take_session(session_id).is_none() {
                return;
            }
            warn!("discovery failed: {err}");
            self.notify(|o| o.search_failed(err));
        })
    }
}

/// Runs at most one search session at a time. Once
/// [`stop_search`](Self::stop_search) returns, no observer call is in flight
/// or will follow.
pub struct DiscoveryEngine {
    config: DiscoveryConfig,
    shared: Arc<Shared>,
}

impl DiscoveryEngine {
    pub fn new(config: DiscoveryConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Shared::default()),
        }
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    pub fn add_observer(&self, observer: Arc<dyn DiscoveryObserver>) -> ObserverId {
        let mut state = self.shared.state();
        state.next_observer += 1;
        let id = ObserverId(state.next_observer);
        state.observers.push((id, observer));
        id
    }

    /// Returns `false` if `id` was not registered.
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        let mut state = self.shared.state();
        let before = state.observers.len();
        state.observers.retain(|(oid, _)| *oid != id);
        state.observers.len() != before
    }

    pub fn is_searching(&self) -> bool {
        self.shared.state().session.is_some()
    }

    /// Begin a session. With `target_id` the session stops at the first
    /// device with that id. Must be called inside a Tokio runtime.
    pub fn start_search(&self, target_id: Option<String>) -> Result<(), RemoteError> {
        let (id, cancel) = {
            let mut state = self.shared.state();
            if state.session.is_some() {
                return Err(RemoteError::AlreadySearching);
            }
            state.next_session += 1;
            let id = state.next_session;
            let cancel = CancellationToken::new();
            state.session = Some(Session {
                id,
                cancel: cancel.clone(),
                target: target_id.clone(),
                seen: HashSet::new(),
            });
            (id, cancel)
        };
        info!(target = ?target_id, group = %self.config.group, "starting discovery");

        self.shared.deliver(|| {
            if self.shared.state().is_current(id) {
                self.shared.notify(|o| o.search_started());
            }
        });
        if !cancel.is_cancelled() {
            tokio::spawn(run_search(self.shared.clone(), self.config.clone(), id, cancel));
        }
        Ok(())
    }

    /// End the current session, if any. Idempotent.
    pub fn stop_search(&self) {
        self.shared.deliver(|| {
            let session = self.shared.state().session.take();
            let Some(session) = session else {
                return;
            };
            session.cancel.cancel();
            info!(found = session.seen.len(), "discovery stopped");
            self.shared.notify(|o| o.search_stopped());
        })
    }
}

impl Drop for DiscoveryEngine {
    fn drop(&mut self) {
        self.stop_search();
    }
}

async fn run_search(
    shared: Arc<Shared>,
    config: DiscoveryConfig,
    session_id: u64,
    cancel: CancellationToken,
) {
    if let Err(err) = search(&shared, &config, session_id, &cancel).await {
        shared.fail(session_id, &err);
    }
}

async fn search(
    shared: &Shared,
    config: &DiscoveryConfig,
    session_id: u64,
    cancel: &CancellationToken,
) -> Result<(), RemoteError> {
    let socket = UdpSocket::bind(config.bind).await?;
    debug!(local = %socket.local_addr()?, "discovery socket bound");
    let framed = UdpFramed::new(socket, SsdpCodec::new(config.search_target.clone()));
    let (mut sink, mut stream) = framed.split();

    let request = MSearch {
        host: config.group,
        search_target: config.search_target.clone(),
        mx: config.mx,
    };
    let mut ticker = tokio::time::interval(config.interval);
    let deadline = async {
        match config.timeout {
            Some(timeout) => tokio::time::sleep(timeout).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = &mut deadline => {
                shared.expire(session_id);
                return Ok(());
            }
            _ = ticker.tick() => {
                trace!("sending M-SEARCH");
                sink.send((request.clone(), config.group)).await?;
            }
            received = stream.next() => match received {
                Some(Ok((SsdpMessage::Response(response), from))) => {
                    let Some(device) = response.to_device(from.ip()) else {
                        debug!(%from, usn = %response.usn, "dropping response without uuid");
                        continue;
                    };
                    if !shared.offer(session_id, device) {
                        return Ok(());
                    }
                }
                Some(Ok((SsdpMessage::Ignored(reason), from))) => {
                    debug!(%from, "dropping datagram: {reason}");
                }
                Some(Err(err)) => return Err(err),
                None => return Err(RemoteError::TransportFailure("discovery socket closed".into())),
            },
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const RESPONSE: &str = "HTTP/1.1 200 OK\r\n\
        CACHE-CONTROL: max-age=1800\r\n\
        LOCATION: http://192.168.1.40:9197/dmr\r\n\
        ST: urn:samsung.com:device:RemoteControlReceiver:1\r\n\
        USN: uuid:0ee7f6a1-00aa-1000-b8b4-8c79f5e2a1b2::urn:samsung.com:device:RemoteControlReceiver:1\r\n\
        \r\n";

    fn decode(text: &str) -> SsdpMessage {
        let mut codec = SsdpCodec::new(SEARCH_TARGET);
        let mut buf = BytesMut::from(text.as_bytes());
        let message = codec.decode(&mut buf).unwrap().unwrap();
        assert!(buf.is_empty());
        message
    }

    fn response(text: &str) -> SearchResponse {
        match decode(text) {
            SsdpMessage::Response(r) => r,
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn response_becomes_device() {
        let source: IpAddr = "192.168.1.99".parse().unwrap();
        let device = response(RESPONSE).to_device(source).unwrap();
        assert_eq!(device.id, "0ee7f6a1-00aa-1000-b8b4-8c79f5e2a1b2");
        assert_eq!(device.address, "192.168.1.40".parse::<IpAddr>().unwrap());
        assert_eq!(device.name, "192.168.1.40");
    }

    #[test]
    fn missing_location_falls_back_to_source() {
        let text = "HTTP/1.1 200 OK\r\nUSN: uuid:abc\r\nX-Friendly-Name: Living Room\r\n\r\n";
        let device = response(text).to_device("10.0.0.7".parse().unwrap()).unwrap();
        assert_eq!(device.id, "abc");
        assert_eq!(device.name, "Living Room");
        assert_eq!(device.address.to_string(), "10.0.0.7");
    }

    #[test]
    fn ipv6_location() {
        let r = SearchResponse {
            usn: "uuid:x".into(),
            location: Some("http://[fe80::1]:9197/dmr".into()),
            ..Default::default()
        };
        assert_eq!(r.location_address(), Some("fe80::1".parse().unwrap()));
    }

    #[test]
    fn unusable_datagrams_are_ignored() {
        assert!(matches!(
            decode("NOTIFY * HTTP/1.1\r\nNTS: ssdp:alive\r\n\r\n"),
            SsdpMessage::Ignored(_)
        ));
        assert!(matches!(
            decode("HTTP/1.1 200 OK\r\nLOCATION: http://1.2.3.4/\r\n\r\n"),
            SsdpMessage::Ignored(_)
        ));
        assert!(matches!(
            decode("HTTP/1.1 200 OK\r\nST: upnp:rootdevice\r\nUSN: uuid:a\r\n\r\n"),
            SsdpMessage::Ignored(_)
        ));

        let mut codec = SsdpCodec::new(SEARCH_TARGET);
        let mut buf = BytesMut::from(&[0xffu8, 0xfe, 0x00][..]);
        assert!(matches!(
            codec.decode(&mut buf).unwrap(),
            Some(SsdpMessage::Ignored(_))
        ));
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn usn_without_uuid_has_no_id() {
        let r = SearchResponse {
            usn: "urn:something".into(),
            ..Default::default()
        };
        assert!(r.to_device("10.0.0.1".parse().unwrap()).is_none());
    }

    #[test]
    fn msearch_encoding() {
        let mut codec = SsdpCodec::new(SEARCH_TARGET);
        let mut buf = BytesMut::new();
        codec
            .encode(
                MSearch {
                    host: SSDP_GROUP,
                    search_target: SEARCH_TARGET.into(),
                    mx: 2,
                },
                &mut buf,
            )
            .unwrap();
        let text = std::str::from_utf8(&buf).unwrap();
        assert!(text.starts_with("M-SEARCH * HTTP/1.1\r\n"));
        assert!(text.contains("HOST: 239.255.255.250:1900\r\n"));
        assert!(text.contains("MAN: \"ssdp:discover\"\r\n"));
        assert!(text.contains("MX: 2\r\n"));
        assert!(text.ends_with(&format!("ST: {SEARCH_TARGET}\r\n\r\n")));
    }

    #[tokio::test]
    async fn second_start_is_already_searching() {
        let engine = DiscoveryEngine::new(
            DiscoveryConfig::default()
                .with_group("127.0.0.1:9".parse().unwrap())
                .with_bind("127.0.0.1:0".parse().unwrap()),
        );
        engine.start_search(None).unwrap();
        assert_eq!(engine.start_search(None), Err(RemoteError::AlreadySearching));
        engine.stop_search();
        engine.stop_search();
        assert!(!engine.is_searching());
        engine.start_search(None).unwrap();
    }

    struct Noop;
    impl DiscoveryObserver for Noop {
        fn device_found(&self, _: &Device) {}
    }

    #[test]
    fn observers_are_removed_by_id() {
        let engine = DiscoveryEngine::new(DiscoveryConfig::default());
        let a = engine.add_observer(Arc::new(Noop));
        let b = engine.add_observer(Arc::new(Noop));
        assert_ne!(a, b);
        assert!(engine.remove_observer(a));
        assert!(!engine.remove_observer(a));
        assert!(engine.remove_observer(b));
    }
}
