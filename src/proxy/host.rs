use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use super::forward::{Forwarder, forward};
use super::{ProxyState, ProxyStatus};
use crate::config::ProxyConfig;

/// How long disposal waits for open connections to drain.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// A running proxy listener.
pub struct ProxyInstance {
    local_addr: SocketAddr,
    target: String,
    shutdown: CancellationToken,
    server: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ProxyInstance {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn stop(&self) {
        self.shutdown.cancel();
        let server = self
            .server
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(mut server) = server
            && tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await.is_err()
        {
            warn!(addr = %self.local_addr, "Proxy did not drain in {:?}, aborting", SHUTDOWN_GRACE);
            server.abort();
        }
    }
}

/// Owns the proxy listener and its status.
///
/// Start is idempotent while running, a failed start can be retried, and once
/// disposed the host stays stopped.
pub struct ProxyHost {
    bind: IpAddr,
    port: u16,
    status: watch::Sender<ProxyStatus>,
    transitions: broadcast::Sender<ProxyStatus>,
    instance: Mutex<Option<Arc<ProxyInstance>>>,
    disposed: AtomicBool,
}

impl ProxyHost {
    pub fn new(bind: IpAddr, port: u16) -> Self {
        let (status, _) = watch::channel(ProxyStatus::new(port));
        let (transitions, _) = broadcast::channel(32);
        Self {
            bind,
            port,
            status,
            transitions,
            instance: Mutex::new(None),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn from_config(config: &ProxyConfig) -> Result<Self> {
        let bind: IpAddr = config
            .bind
            .parse()
            .with_context(|| format!("Invalid proxy bind address '{}'", config.bind))?;
        Ok(Self::new(bind, config.port))
    }

    pub fn bind_addr(&self) -> IpAddr {
        self.bind
    }

    /// Current status snapshot.
    pub fn status(&self) -> ProxyStatus {
        self.status.borrow().clone()
    }

    /// Latest status, for readers that only care about the current value.
    pub fn watch(&self) -> watch::Receiver<ProxyStatus> {
        self.status.subscribe()
    }

    /// Every transition, in order.
    pub fn subscribe(&self) -> broadcast::Receiver<ProxyStatus> {
        self.transitions.subscribe()
    }

    /// Start forwarding everything to `target`.
    ///
    /// Returns the running instance, or `None` if the proxy could not start or
    /// the host was disposed. A start while already running returns the
    /// existing instance without a new transition.
    pub async fn start(&self, target: &str) -> Option<Arc<ProxyInstance>> {
        let mut slot = self.instance.lock().await;

        if self.disposed.load(Ordering::SeqCst) {
            debug!("Proxy host disposed, not starting");
            return None;
        }

        if let Some(instance) = slot.as_ref() {
            debug!(addr = %instance.local_addr, "Proxy already started");
            return Some(instance.clone());
        }

        let last_error = self.status.borrow().last_error.clone();
        self.transition(ProxyState::Starting, last_error, self.port);

        match self.spawn(target).await {
            Ok(instance) => {
                let instance = Arc::new(instance);
                info!(addr = %instance.local_addr, target = %instance.target, "Proxy started");
                self.transition(ProxyState::Started, None, instance.local_addr.port());
                *slot = Some(instance.clone());
                Some(instance)
            }
            Err(e) => {
                warn!(port = self.port, "Proxy failed to start: {:#}", e);
                self.transition(ProxyState::Failed, Some(format!("{:#}", e)), self.port);
                None
            }
        }
    }

    /// Stop the listener. Only the first call has any effect.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        let instance = self.instance.lock().await.take();
        if let Some(instance) = instance {
            instance.stop().await;
            info!(addr = %instance.local_addr, "Proxy stopped");
        }

        let last_error = self.status.borrow().last_error.clone();
        let port = self.status.borrow().port;
        self.transition(ProxyState::Stopped, last_error, port);
    }

    async fn spawn(&self, target: &str) -> Result<ProxyInstance> {
        let forwarder = Arc::new(
            Forwarder::new(target).with_context(|| format!("Invalid proxy target '{}'", target))?,
        );
        let target = forwarder.base().to_string();

        let addr = SocketAddr::new(self.bind, self.port);
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        let local_addr = listener.local_addr()?;

        let app = Router::new()
            .fallback(forward)
            .with_state(forwarder)
            .layer(TraceLayer::new_for_http());

        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(signal.cancelled_owned())
                .await
            {
                warn!(addr = %local_addr, "Proxy server error: {}", e);
            }
        });

        Ok(ProxyInstance {
            local_addr,
            target,
            shutdown,
            server: std::sync::Mutex::new(Some(server)),
        })
    }

    fn transition(&self, state: ProxyState, last_error: Option<String>, port: u16) {
        let status = ProxyStatus {
            state,
            last_error,
            port,
        };
        debug!(state = %state, port, "Proxy status changed");
        self.status.send_replace(status.clone());
        let _ = self.transitions.send(status);
    }
}
