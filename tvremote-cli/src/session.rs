//! Drive a `ConnectionManager` or `DiscoveryEngine` to completion from a
//! one-shot command.

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use tvremote_core::{
    AuthToken, AuthorizationState, ConnectionManager, Device, DiscoveryObserver, EventReceiver,
    RemoteCommand, RemoteError, RemoteEvent,
};

// ── Connection ───────────────────────────────────────────────────

/// Wait until the channel is ready. `on_token` sees every token the device
/// issues.
pub async fn wait_ready(
    events: &mut EventReceiver,
    mut on_token: impl FnMut(&AuthToken),
) -> Result<(), RemoteError> {
    let mut last_error = None;
    while let Some(event) = events.recv().await {
        match event {
            RemoteEvent::Ready => return Ok(()),
            RemoteEvent::Authorization(AuthorizationState::Allowed(token)) => on_token(&token),
            RemoteEvent::Authorization(AuthorizationState::None) => {
                info!("waiting for the pairing prompt to be accepted on the TV");
            }
            RemoteEvent::Error(RemoteError::Denied) => return Err(RemoteError::Denied),
            RemoteEvent::Error(err) => {
                warn!("{err}");
                last_error = Some(err);
            }
            RemoteEvent::Disconnected => {
                return Err(last_error.unwrap_or_else(|| {
                    RemoteError::TransportFailure("disconnected before ready".into())
                }));
            }
            other => debug!(?other, "session event"),
        }
    }
    Err(RemoteError::TransportFailure("event channel closed".into()))
}

/// Send `commands` in order, each after the previous one was written.
pub async fn send_all(
    manager: &ConnectionManager,
    events: &mut EventReceiver,
    commands: Vec<RemoteCommand>,
) -> Result<(), RemoteError> {
    for command in commands {
        manager.send_remote_command(command.clone())?;
        wait_written(events, &command).await?;
        info!(%command, "sent");
    }
    Ok(())
}

async fn wait_written(
    events: &mut EventReceiver,
    command: &RemoteCommand,
) -> Result<(), RemoteError> {
    while let Some(event) = events.recv().await {
        match event {
            RemoteEvent::CommandWritten(written) if written == *command => return Ok(()),
            RemoteEvent::Error(err) => return Err(err),
            RemoteEvent::Disconnected => {
                return Err(RemoteError::TransportFailure("disconnected while sending".into()));
            }
            other => debug!(?other, "session event"),
        }
    }
    Err(RemoteError::TransportFailure("event channel closed".into()))
}

/// Disconnect and wait for the notification.
pub async fn close(
    manager: &ConnectionManager,
    events: &mut EventReceiver,
) -> Result<(), RemoteError> {
    if manager.connection_state().is_disconnected() {
        return Ok(());
    }
    manager.disconnect_from_tv()?;
    while let Some(event) = events.recv().await {
        if event == RemoteEvent::Disconnected {
            break;
        }
    }
    Ok(())
}

// ── Discovery ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchUpdate {
    Found(Device),
    Finished,
    Failed(RemoteError),
}

/// Forwards discovery callbacks onto a channel.
pub struct ForwardingObserver {
    tx: mpsc::UnboundedSender<SearchUpdate>,
}

impl ForwardingObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SearchUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl DiscoveryObserver for ForwardingObserver {
    fn device_found(&self, device: &Device) {
        let _ = self.tx.send(SearchUpdate::Found(device.clone()));
    }

    fn search_stopped(&self) {
        let _ = self.tx.send(SearchUpdate::Finished);
    }

    fn search_failed(&self, error: &RemoteError) {
        let _ = self.tx.send(SearchUpdate::Failed(error.clone()));
    }
}

// ── Tests ────────────────────────────────────────────────────────
