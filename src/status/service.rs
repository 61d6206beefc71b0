use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::net::TcpStream;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::health::ServerHealth;
use crate::proxy::{ProxyHost, ProxyState};

/// First of the addresses a server reports after binding.
pub fn first_address(addresses: &[SocketAddr]) -> Option<SocketAddr> {
    addresses.first().copied()
}

/// Checks the control plane and the proxy and publishes the latest result.
pub struct StatusService {
    control_plane: Option<SocketAddr>,
    proxy: Arc<ProxyHost>,
    probe_timeout: Duration,
    latest: watch::Sender<Option<ServerHealth>>,
}

impl StatusService {
    pub fn new(
        control_plane: Option<SocketAddr>,
        proxy: Arc<ProxyHost>,
        probe_timeout: Duration,
    ) -> Self {
        let (latest, _) = watch::channel(None);
        Self {
            control_plane,
            proxy,
            probe_timeout,
            latest,
        }
    }

    /// Probe both ports. Reads state only; publishes nothing.
    pub async fn check_status(&self) -> ServerHealth {
        let proxy = self.proxy.status();

        let (control_plane_reachable, proxy_reachable) = tokio::join!(
            async {
                match self.control_plane {
                    Some(addr) => self.probe(addr).await,
                    None => false,
                }
            },
            self.probe(SocketAddr::new(self.proxy.bind_addr(), proxy.port)),
        );

        ServerHealth {
            healthy: control_plane_reachable && proxy_reachable && proxy.last_error.is_none(),
            control_plane_reachable,
            proxy_reachable,
            proxy_state: proxy.state,
            control_plane_port: self.control_plane.map(|addr| addr.port()),
            proxy_port: proxy.port,
            last_error: proxy.last_error,
            checked_at: Utc::now(),
        }
    }

    /// Check and publish the result as the latest snapshot.
    pub async fn refresh(&self) -> ServerHealth {
        let health = self.check_status().await;
        let changed = self
            .latest
            .borrow()
            .as_ref()
            .is_none_or(|prev| prev.summary() != health.summary());
        if changed {
            info!("Server status: {}", health.summary());
        } else {
            debug!("Server status: {}", health.summary());
        }
        self.latest.send_replace(Some(health.clone()));
        health
    }

    pub fn latest(&self) -> Option<ServerHealth> {
        self.latest.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Option<ServerHealth>> {
        self.latest.subscribe()
    }

    /// Re-check whenever the proxy host changes state.
    pub fn spawn_transition_watcher(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let service = Arc::clone(self);
        let mut transitions = self.proxy.subscribe();
        tokio::spawn(async move {
            loop {
                let state = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = transitions.recv() => match event {
                        Ok(status) => Some(status.state),
                        Err(RecvError::Lagged(_)) => None,
                        Err(RecvError::Closed) => break,
                    },
                };
                debug!(state = ?state, "Proxy transition, refreshing status");
                service.refresh().await;
                if state == Some(ProxyState::Stopped) {
                    break;
                }
            }
        })
    }

    async fn probe(&self, addr: SocketAddr) -> bool {
        let addr = if addr.ip().is_unspecified() {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port())
        } else {
            addr
        };
        matches!(
            tokio::time::timeout(self.probe_timeout, TcpStream::connect(addr)).await,
            Ok(Ok(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    const LOOPBACK: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
    const TIMEOUT: Duration = Duration::from_millis(500);

    async fn listening() -> (TcpListener, SocketAddr) {
        let listener = TcpListener::bind((LOOPBACK, 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr)
    }

    fn closed_port() -> u16 {
        let listener = std::net::TcpListener::bind((LOOPBACK, 0)).unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn first_address_wins() {
        let a: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        let b: SocketAddr = "[::1]:5001".parse().unwrap();
        assert_eq!(first_address(&[a, b]), Some(a));
        assert_eq!(first_address(&[]), None);
    }

    #[tokio::test]
    async fn unreachable_proxy_is_unhealthy() {
        let (_control, control_addr) = listening().await;
        let proxy = Arc::new(ProxyHost::new(LOOPBACK, closed_port()));
        let service = StatusService::new(Some(control_addr), proxy, TIMEOUT);

        let health = service.check_status().await;
        assert!(health.control_plane_reachable);
        assert!(!health.proxy_reachable);
        assert!(!health.healthy);
        assert_eq!(health.proxy_state, ProxyState::NotStarted);
        assert_eq!(health.control_plane_port, Some(control_addr.port()));
        assert!(service.latest().is_none());
    }

    #[tokio::test]
    async fn running_proxy_and_control_plane_are_healthy() {
        let (_control, control_addr) = listening().await;
        let proxy = Arc::new(ProxyHost::new(LOOPBACK, 0));
        proxy.start(&format!("http://{}", control_addr)).await.unwrap();
        let service = StatusService::new(Some(control_addr), proxy.clone(), TIMEOUT);

        let health = service.refresh().await;
        assert!(health.healthy, "{}", health.summary());
        assert_eq!(service.latest(), Some(health));

        proxy.dispose().await;
    }

    #[tokio::test]
    async fn recorded_proxy_error_makes_status_unhealthy() {
        let (_control, control_addr) = listening().await;
        // Someone else owns the proxy port: reachable, but not ours.
        let (_squatter, squatted) = listening().await;
        let proxy = Arc::new(ProxyHost::new(LOOPBACK, squatted.port()));
        assert!(proxy.start(&format!("http://{}", control_addr)).await.is_none());

        let service = StatusService::new(Some(control_addr), proxy, TIMEOUT);
        let health = service.check_status().await;
        assert!(health.control_plane_reachable);
        assert!(health.proxy_reachable);
        assert!(health.last_error.is_some());
        assert!(!health.healthy);
    }

    #[tokio::test]
    async fn unknown_control_plane_is_unreachable() {
        let proxy = Arc::new(ProxyHost::new(LOOPBACK, closed_port()));
        let service = StatusService::new(None, proxy, TIMEOUT);
        let health = service.check_status().await;
        assert!(!health.control_plane_reachable);
        assert_eq!(health.control_plane_port, None);
    }

    #[tokio::test]
    async fn proxy_transitions_publish_status() {
        let (_control, control_addr) = listening().await;
        let proxy = Arc::new(ProxyHost::new(LOOPBACK, 0));
        let service = Arc::new(StatusService::new(Some(control_addr), proxy.clone(), TIMEOUT));

        let cancel = CancellationToken::new();
        let watcher = service.spawn_transition_watcher(cancel.clone());
        let mut latest = service.watch();

        proxy.start(&format!("http://{}", control_addr)).await.unwrap();
        tokio::time::timeout(
            Duration::from_secs(5),
            latest.wait_for(|h| h.as_ref().is_some_and(|h| h.proxy_state == ProxyState::Started)),
        )
        .await
        .unwrap()
        .unwrap();

        proxy.dispose().await;
        tokio::time::timeout(Duration::from_secs(5), watcher)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(service.latest().unwrap().proxy_state, ProxyState::Stopped);
    }
}
