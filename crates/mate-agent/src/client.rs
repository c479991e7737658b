use crate::config::Config;
use crate::discovery::{DiscoveryListener, DISCOVERY_PORT};
use crate::executor;
use crate::logreader;
use crate::monitor::Monitor;
use crate::shutdown::StopSignal;
use crate::transport::{NavigatorSink, Transport, TransportError, WsSource};
use futures_util::StreamExt;
use mate_core::{
    CommandKind, CommandPolicy, ExecuteCommandRequest, InboundCommand, MessageKind,
    OutboundMessage, ReadLogRequest, RegisterInfo,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{info, warn};
use url::Url;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
/// How long listener mode waits for a discovery beacon before retrying
/// anyway, in case broadcasts are not reaching this host.
const LISTENER_MODE_TIMEOUT: Duration = Duration::from_secs(300);
const READ_RETRY_DELAY: Duration = Duration::from_secs(1);
const MAX_CONSECUTIVE_READ_ERRORS: u32 = 5;
const SHUTDOWN_COMMAND_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid navigator url: {0}")]
    InvalidUrl(String),
    #[error("failed to encode message: {0}")]
    Encode(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetryAction {
    Delay,
    ListenerMode,
}

/// With a bounded attempt budget, exhausting it switches from blind retries
/// to waiting for discovery. Zero budget means retry forever.
fn retry_action(attempts: u32, max_attempts: u32) -> RetryAction {
    if max_attempts > 0 && attempts >= max_attempts {
        RetryAction::ListenerMode
    } else {
        RetryAction::Delay
    }
}

enum ListenerOutcome {
    Wakeup,
    TimedOut,
    Stopped,
}

enum EpochOutcome {
    ConnectionLost,
    Stopped,
}

/// Drives connect → run → detect-loss → recover against the Navigator and
/// owns the per-epoch sender tasks.
pub struct NavigatorClient {
    config: Arc<Config>,
    policy: Arc<CommandPolicy>,
    monitor: Arc<Monitor>,
    stop: StopSignal,
    discovery_port: u16,
}

impl NavigatorClient {
    pub fn new(
        config: Arc<Config>,
        policy: Arc<CommandPolicy>,
        monitor: Arc<Monitor>,
        stop: StopSignal,
    ) -> Self {
        Self {
            config,
            policy,
            monitor,
            stop,
            discovery_port: DISCOVERY_PORT,
        }
    }

    #[cfg(test)]
    fn with_discovery_port(mut self, port: u16) -> Self {
        self.discovery_port = port;
        self
    }

    /// Runs until an external stop is commanded or the Navigator closes the
    /// connection cleanly.
    pub async fn run(&self) {
        let (wakeup_tx, mut wakeup_rx) = mpsc::channel::<()>(1);
        // Keeps the channel open even when the listener failed to bind, so
        // listener mode falls back to its timeout instead of spinning.
        let _wakeup_keepalive = wakeup_tx.clone();
        match DiscoveryListener::bind(self.discovery_port).await {
            Ok(listener) => {
                tokio::spawn(listener.run(wakeup_tx, self.stop.clone()));
            }
            Err(err) => {
                warn!(event = "discovery_bind_failed", port = self.discovery_port, error = %err);
            }
        }

        let max_attempts = self.config.navigator.max_reconnect_attempts;
        let mut attempts = 0u32;

        while !self.stop.is_stopped() {
            match self.connect_and_register().await {
                Err(err) => {
                    attempts = attempts.saturating_add(1);
                    warn!(event = "connect_failed", attempt = attempts, error = %err);
                    match retry_action(attempts, max_attempts) {
                        RetryAction::ListenerMode => {
                            info!(event = "listener_mode", reason = "max_attempts_reached");
                            match self.listener_mode_wait(&mut wakeup_rx).await {
                                ListenerOutcome::Wakeup => attempts = 0,
                                ListenerOutcome::TimedOut => {}
                                ListenerOutcome::Stopped => return,
                            }
                        }
                        RetryAction::Delay => {
                            let delay = self.config.navigator.reconnect_interval();
                            info!(event = "reconnect_scheduled", delay_secs = delay.as_secs());
                            tokio::select! {
                                _ = tokio::time::sleep(delay) => {}
                                _ = self.stop.stopped() => return,
                            }
                        }
                    }
                }
                Ok((transport, source)) => {
                    attempts = 0;
                    info!(event = "connected", navigator = %self.config.navigator.url);
                    match self.run_epoch(transport, source).await {
                        EpochOutcome::Stopped => return,
                        EpochOutcome::ConnectionLost => {
                            info!(event = "listener_mode", reason = "connection_lost");
                            match self.listener_mode_wait(&mut wakeup_rx).await {
                                ListenerOutcome::Wakeup => attempts = 0,
                                ListenerOutcome::TimedOut => {}
                                ListenerOutcome::Stopped => return,
                            }
                        }
                    }
                }
            }
        }
    }

    fn navigator_url(&self) -> Result<Url, ClientError> {
        let raw = format!("{}/{}", self.config.navigator.url, self.config.mate.id);
        Url::parse(&raw).map_err(|err| ClientError::InvalidUrl(format!("{raw}: {err}")))
    }

    async fn connect_and_register(&self) -> Result<(Transport, WsSource), ClientError> {
        let url = self.navigator_url()?;
        info!(event = "connecting", url = %url);
        let (transport, source) = Transport::connect(&url).await?;

        let info = RegisterInfo {
            name: self.config.mate.name.clone(),
            description: self.config.mate.description.clone(),
        };
        let data = serde_json::to_value(&info).map_err(|err| ClientError::Encode(err.to_string()))?;
        let register =
            OutboundMessage::with_data(MessageKind::Register, self.config.mate.id.clone(), data);
        if let Err(err) = transport.send(&register).await {
            transport.close().await;
            return Err(err.into());
        }
        Ok((transport, source))
    }

    /// One connection epoch: three senders on a fresh cancellation signal,
    /// torn down together when the connection dies or a stop is commanded.
    async fn run_epoch(&self, transport: Transport, source: WsSource) -> EpochOutcome {
        let epoch = StopSignal::new();
        let (lost_tx, mut lost_rx) = mpsc::channel::<()>(1);

        let stats_task = tokio::spawn(stats_loop(
            self.config.clone(),
            self.monitor.clone(),
            transport.clone(),
            epoch.clone(),
        ));
        let heartbeat_task = tokio::spawn(heartbeat_loop(
            self.config.clone(),
            transport.clone(),
            epoch.clone(),
        ));
        let reader_task = tokio::spawn(read_loop(
            self.config.clone(),
            self.policy.clone(),
            self.monitor.clone(),
            transport.clone(),
            source,
            epoch.clone(),
            self.stop.clone(),
            lost_tx,
        ));

        let outcome = tokio::select! {
            received = lost_rx.recv() => match received {
                Some(()) => EpochOutcome::ConnectionLost,
                // The reader ended without signaling loss: either it
                // commanded a stop (clean close) or it died outright.
                None if self.stop.is_stopped() => EpochOutcome::Stopped,
                None => EpochOutcome::ConnectionLost,
            },
            _ = self.stop.stopped() => EpochOutcome::Stopped,
        };

        epoch.stop();
        transport.close().await;
        let _ = stats_task.await;
        let _ = heartbeat_task.await;
        let _ = reader_task.await;
        outcome
    }

    async fn listener_mode_wait(&self, wakeup: &mut mpsc::Receiver<()>) -> ListenerOutcome {
        info!(event = "awaiting_discovery");
        tokio::select! {
            _ = wakeup.recv() => {
                info!(event = "wakeup_received");
                ListenerOutcome::Wakeup
            }
            _ = tokio::time::sleep(LISTENER_MODE_TIMEOUT) => {
                info!(event = "listener_mode_timeout");
                ListenerOutcome::TimedOut
            }
            _ = self.stop.stopped() => ListenerOutcome::Stopped,
        }
    }
}

async fn stats_loop(
    config: Arc<Config>,
    monitor: Arc<Monitor>,
    transport: Transport,
    epoch: StopSignal,
) {
    let period = config.monitoring.interval();
    let mut ticker = interval_at(Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = epoch.stopped() => return,
            _ = ticker.tick() => {
                send_stats(&config, &monitor, &transport).await;
            }
        }
    }
}

async fn send_stats(config: &Arc<Config>, monitor: &Arc<Monitor>, transport: &Transport) {
    let snapshot = monitor.collect().await;
    let data = match serde_json::to_value(&snapshot) {
        Ok(data) => data,
        Err(err) => {
            warn!(event = "stats_encode_failed", error = %err);
            return;
        }
    };
    let message = OutboundMessage::with_data(MessageKind::Stats, config.mate.id.clone(), data);
    if let Err(err) = transport.send(&message).await {
        warn!(event = "stats_send_failed", error = %err);
    }
}

async fn heartbeat_loop(config: Arc<Config>, transport: Transport, epoch: StopSignal) {
    let mut ticker = interval_at(Instant::now() + HEARTBEAT_INTERVAL, HEARTBEAT_INTERVAL);
    loop {
        tokio::select! {
            _ = epoch.stopped() => return,
            _ = ticker.tick() => {
                let message = OutboundMessage::new(MessageKind::Heartbeat, config.mate.id.clone());
                if let Err(err) = transport.send(&message).await {
                    warn!(event = "heartbeat_send_failed", error = %err);
                }
            }
        }
    }
}

/// Blocking receive of inbound commands. Transient read or decode failures
/// are retried up to a threshold; a close frame or a dead socket ends the
/// epoch. Senders of this epoch observe only this epoch's signal.
#[allow(clippy::too_many_arguments)]
async fn read_loop(
    config: Arc<Config>,
    policy: Arc<CommandPolicy>,
    monitor: Arc<Monitor>,
    transport: Transport,
    mut source: WsSource,
    epoch: StopSignal,
    stop: StopSignal,
    lost: mpsc::Sender<()>,
) {
    let mut consecutive_errors = 0u32;
    loop {
        let next = tokio::select! {
            _ = epoch.stopped() => return,
            next = source.next() => next,
        };
        match next {
            None => {
                warn!(event = "connection_lost", reason = "stream_end");
                let _ = lost.try_send(());
                return;
            }
            Some(Ok(WsMessage::Text(text))) => match serde_json::from_str::<InboundCommand>(&text)
            {
                Ok(command) => {
                    consecutive_errors = 0;
                    info!(event = "command_received", kind = %command.command_type);
                    dispatch_command(command, &config, &policy, &monitor, &transport, &stop).await;
                }
                Err(err) => {
                    consecutive_errors += 1;
                    warn!(
                        event = "command_decode_failed",
                        error = %err,
                        consecutive = consecutive_errors,
                    );
                    if consecutive_errors >= MAX_CONSECUTIVE_READ_ERRORS {
                        warn!(event = "connection_lost", reason = "read_errors", count = consecutive_errors);
                        let _ = lost.try_send(());
                        return;
                    }
                    tokio::time::sleep(READ_RETRY_DELAY).await;
                }
            },
            Some(Ok(WsMessage::Close(frame))) => {
                let normal = frame
                    .as_ref()
                    .map(|frame| frame.code == CloseCode::Normal)
                    .unwrap_or(false);
                if normal {
                    // A clean close means the Navigator is done with us.
                    info!(event = "connection_closed", reason = "normal");
                    stop.stop();
                } else {
                    warn!(event = "connection_lost", reason = "abnormal_close");
                    let _ = lost.try_send(());
                }
                return;
            }
            Some(Ok(_)) => {}
            Some(Err(err)) => match err {
                WsError::ConnectionClosed | WsError::AlreadyClosed | WsError::Protocol(_) => {
                    warn!(event = "connection_lost", error = %err);
                    let _ = lost.try_send(());
                    return;
                }
                other => {
                    consecutive_errors += 1;
                    warn!(event = "read_error", error = %other, consecutive = consecutive_errors);
                    if consecutive_errors >= MAX_CONSECUTIVE_READ_ERRORS {
                        warn!(event = "connection_lost", reason = "read_errors", count = consecutive_errors);
                        let _ = lost.try_send(());
                        return;
                    }
                    tokio::time::sleep(READ_RETRY_DELAY).await;
                }
            },
        }
    }
}

async fn dispatch_command(
    command: InboundCommand,
    config: &Arc<Config>,
    policy: &Arc<CommandPolicy>,
    monitor: &Arc<Monitor>,
    transport: &Transport,
    stop: &StopSignal,
) {
    match command.kind() {
        CommandKind::Ping => {
            let pong = OutboundMessage::new(MessageKind::Pong, config.mate.id.clone());
            if let Err(err) = transport.send(&pong).await {
                warn!(event = "pong_send_failed", error = %err);
            }
        }
        CommandKind::CollectStats => {
            send_stats(config, monitor, transport).await;
        }
        CommandKind::ReadLog => {
            let request = ReadLogRequest::from_payload(&command.payload);
            let sink = NavigatorSink::new(transport.clone(), config.mate.id.clone());
            let mate_id = config.mate.id.clone();
            tokio::spawn(async move {
                if let Err(err) = logreader::handle_read_log(request, &mate_id, &sink).await {
                    warn!(event = "read_log_failed", error = %err);
                }
            });
        }
        CommandKind::ExecuteCommand => {
            let request = ExecuteCommandRequest::from_payload(&command.payload);
            let sink = NavigatorSink::new(transport.clone(), config.mate.id.clone());
            let policy = policy.clone();
            tokio::spawn(async move {
                executor::handle_execute(request, &policy, &sink).await;
            });
        }
        CommandKind::Shutdown => {
            info!(event = "shutdown_command");
            let stop = stop.clone();
            tokio::spawn(async move {
                tokio::time::sleep(SHUTDOWN_COMMAND_DELAY).await;
                stop.stop();
            });
        }
        CommandKind::Unknown => {
            warn!(event = "unknown_command", kind = %command.command_type);
        }
    }
}
