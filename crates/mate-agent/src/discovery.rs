use crate::shutdown::StopSignal;
use std::io;
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Navigators announce themselves by broadcasting on this port.
pub const DISCOVERY_PORT: u16 = 9090;
/// Beacon payload, compared after whitespace trimming.
pub const DISCOVERY_BEACON: &str = "FLEET_NAVIGATOR_READY";

/// Passive broadcast listener. Runs for the process lifetime, independent of
/// connection epochs; a recognized beacon offers one wakeup to the lifecycle
/// manager. Discovery is an optimization; when the bind fails the timed
/// retry path still recovers the connection.
pub struct DiscoveryListener {
    socket: UdpSocket,
}

impl DiscoveryListener {
    pub async fn bind(port: u16) -> io::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", port)).await?;
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub async fn run(self, wakeup: mpsc::Sender<()>, stop: StopSignal) {
        info!(event = "discovery_listen", port = self.local_addr().map(|a| a.port()).unwrap_or(0));
        let mut buffer = [0u8; 1024];
        loop {
            tokio::select! {
                _ = stop.stopped() => {
                    info!(event = "discovery_stopped");
                    return;
                }
                received = self.socket.recv_from(&mut buffer) => {
                    match received {
                        Ok((len, remote)) => {
                            let payload = String::from_utf8_lossy(&buffer[..len]);
                            let payload = payload.trim();
                            debug!(event = "discovery_datagram", from = %remote.ip(), payload = %payload);
                            if payload == DISCOVERY_BEACON {
                                info!(event = "navigator_discovered", from = %remote.ip());
                                // Capacity-1 offer; a pending wakeup is enough.
                                let _ = wakeup.try_send(());
                            }
                        }
                        Err(err) => {
                            warn!(event = "discovery_read_error", error = %err);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc::error::TryRecvError;

    async fn start_listener() -> (SocketAddr, mpsc::Receiver<()>, StopSignal, tokio::task::JoinHandle<()>) {
        let listener = DiscoveryListener::bind(0).await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let target: SocketAddr = format!("127.0.0.1:{port}").parse().expect("target");
        let (wakeup_tx, wakeup_rx) = mpsc::channel(1);
        let stop = StopSignal::new();
        let task = tokio::spawn(listener.run(wakeup_tx, stop.clone()));
        (target, wakeup_rx, stop, task)
    }

    #[tokio::test]
    async fn beacon_raises_a_wakeup() {
        let (target, mut wakeup_rx, stop, task) = start_listener().await;
        let sender = UdpSocket::bind("127.0.0.1:0").await.expect("bind sender");
        sender
            .send_to(b"FLEET_NAVIGATOR_READY\n", target)
            .await
            .expect("send");

        tokio::time::timeout(Duration::from_secs(2), wakeup_rx.recv())
            .await
            .expect("wakeup within deadline")
            .expect("channel open");

        stop.stop();
        task.await.expect("listener task");
    }

    #[tokio::test]
    async fn unrelated_payloads_are_ignored() {
        let (target, mut wakeup_rx, stop, task) = start_listener().await;
        let sender = UdpSocket::bind("127.0.0.1:0").await.expect("bind sender");
        sender.send_to(b"HELLO", target).await.expect("send");
        sender
            .send_to(b"FLEET_NAVIGATOR_READY_V2", target)
            .await
            .expect("send");

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(matches!(wakeup_rx.try_recv(), Err(TryRecvError::Empty)));

        stop.stop();
        task.await.expect("listener task");
    }

    #[tokio::test]
    async fn pending_wakeups_never_accumulate() {
        let (target, mut wakeup_rx, stop, task) = start_listener().await;
        let sender = UdpSocket::bind("127.0.0.1:0").await.expect("bind sender");
        for _ in 0..3 {
            sender
                .send_to(b"FLEET_NAVIGATOR_READY", target)
                .await
                .expect("send");
        }

        tokio::time::timeout(Duration::from_secs(2), wakeup_rx.recv())
            .await
            .expect("first wakeup")
            .expect("channel open");
        tokio::time::sleep(Duration::from_millis(300)).await;
        // The extra beacons were offered while one was already pending or
        // being consumed; at most one more may be buffered, never two.
        if wakeup_rx.try_recv().is_ok() {
            assert!(matches!(wakeup_rx.try_recv(), Err(TryRecvError::Empty)));
        }

        stop.stop();
        task.await.expect("listener task");
    }
}
