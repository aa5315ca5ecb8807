//! Startup and shutdown of the repository server.
//!
//! A server goes through a single linear sequence of states. Packaging and
//! indexing run exactly once, before the listener is bound; refreshing the
//! served charts means restarting the process.

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RepoConfig;
use crate::conn::{self, ConnectionTimeouts};
use crate::error::{RepoError, RepoResult};
use crate::hostname::{HostnameResolver, IngressDomainResolver, StaticHostname};
use crate::pipeline;
use crate::store::IndexStore;
use crate::web;

/// Upper bound on the time spent handling a single request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Time a client has to send complete request headers.
pub const READ_TIMEOUT: Duration = Duration::from_secs(30);
/// Time a response write may stay blocked on a client.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(30);
/// Time a connection may sit without traffic before it is closed.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(30);
/// How long in-flight requests may run after shutdown starts.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Where a [`RepoServer`] is in its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Init,
    Packaging,
    Indexing,
    RouterReady,
    Listening,
    Draining,
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Init => "init",
            LifecycleState::Packaging => "packaging",
            LifecycleState::Indexing => "indexing",
            LifecycleState::RouterReady => "router-ready",
            LifecycleState::Listening => "listening",
            LifecycleState::Draining => "draining",
            LifecycleState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// How the listener finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every in-flight request completed within the grace period.
    Drained,
    /// The grace period ran out and remaining connections were dropped.
    Forced,
}

impl Default for ConnectionTimeouts {
    fn default() -> Self {
        Self {
            read: READ_TIMEOUT,
            write: WRITE_TIMEOUT,
            idle: IDLE_TIMEOUT,
        }
    }
}

/// A packaged, indexed repository ready to be served.
pub struct RepoServer {
    config: RepoConfig,
    hostname: String,
    store: Arc<IndexStore>,
    router: Router,
    state: LifecycleState,
    grace: Duration,
    timeouts: ConnectionTimeouts,
}

impl RepoServer {
    /// Run the startup pipeline.
    ///
    /// Validates `config`, packages every chart, resolves the hostname and
    /// builds the index. Any failure is returned before a socket is bound.
    pub async fn build(config: RepoConfig, resolver: &dyn HostnameResolver) -> RepoResult<Self> {
        config.validate()?;
        debug!("Entering state {}", LifecycleState::Init);

        debug!("Entering state {}", LifecycleState::Packaging);
        let packaging_config = config.clone();
        tokio::task::spawn_blocking(move || pipeline::package_charts(&packaging_config))
            .await
            .map_err(RepoError::server)??;

        let hostname = resolver.resolve().await?;
        info!("Serving charts for host {}", hostname);

        debug!("Entering state {}", LifecycleState::Indexing);
        let indexing_config = config.clone();
        let indexing_host = hostname.clone();
        let index = tokio::task::spawn_blocking(move || {
            pipeline::build_index(&indexing_config, &indexing_host)
        })
        .await
        .map_err(RepoError::server)??;
        let store = Arc::new(IndexStore::new(index));

        let router = web::router(store.clone(), &config.repo_dir, REQUEST_TIMEOUT);
        let state = LifecycleState::RouterReady;
        debug!("Entering state {}", state);

        Ok(Self {
            config,
            hostname,
            store,
            router,
            state,
            grace: SHUTDOWN_GRACE,
            timeouts: ConnectionTimeouts::default(),
        })
    }

    /// Override the shutdown grace period.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Override the per-connection timeouts.
    pub fn with_timeouts(mut self, timeouts: ConnectionTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn store(&self) -> &Arc<IndexStore> {
        &self.store
    }

    /// Bind the configured port on all interfaces.
    pub async fn bind(&self) -> RepoResult<TcpListener> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.port));
        TcpListener::bind(addr)
            .await
            .map_err(|e| RepoError::server(format!("unable to listen on {}: {}", addr, e)))
    }

    /// Serve until `shutdown` completes, then drain.
    ///
    /// Each accepted connection runs on its own task under the configured
    /// [`ConnectionTimeouts`]. Once `shutdown` fires the listener is closed,
    /// so no new connections are accepted. In-flight requests get the grace
    /// period to finish; connections still open after that are aborted and
    /// reported as [`ShutdownOutcome::Forced`].
    pub async fn serve<F>(mut self, listener: TcpListener, shutdown: F) -> RepoResult<ShutdownOutcome>
    where
        F: Future<Output = ()> + Send,
    {
        let addr = listener.local_addr()?;
        let builder = conn::connection_builder(&self.timeouts);
        let token = CancellationToken::new();
        let mut connections = JoinSet::new();

        self.enter(LifecycleState::Listening);
        info!("Chart repository listening on {}", addr);

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                () = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!("Accepted connection from {}", peer);
                        connections.spawn(conn::serve_connection(
                            stream,
                            peer,
                            builder.clone(),
                            self.router.clone(),
                            self.timeouts,
                            token.clone(),
                        ));
                    }
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }
        drop(listener);

        self.enter(LifecycleState::Draining);
        token.cancel();

        let drained = tokio::time::timeout(self.grace, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        let outcome = match drained {
            Ok(()) => ShutdownOutcome::Drained,
            Err(_) => {
                warn!(
                    "{} connections still open after {:?}; forcing them closed",
                    connections.len(),
                    self.grace
                );
                connections.abort_all();
                while connections.join_next().await.is_some() {}
                ShutdownOutcome::Forced
            }
        };

        self.enter(LifecycleState::Stopped);
        info!("Chart repository stopped");
        Ok(outcome)
    }

    fn enter(&mut self, state: LifecycleState) {
        debug!("Moving from state {} to {}", self.state, state);
        self.state = state;
    }
}

/// Pick the hostname resolver for `config`.
///
/// A configured host wins; otherwise the ingress domain is looked up from
/// inside the cluster.
pub fn resolver_for(config: &RepoConfig) -> RepoResult<Box<dyn HostnameResolver>> {
    match &config.host {
        Some(host) => Ok(Box::new(StaticHostname(host.clone()))),
        None => Ok(Box::new(IngressDomainResolver::in_cluster()?)),
    }
}

/// Install SIGTERM and SIGINT handlers.
///
/// The returned future completes when either signal arrives.
pub fn shutdown_signal() -> RepoResult<impl Future<Output = ()> + Send + 'static> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    Ok(async move {
        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM, initiating graceful shutdown");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT, initiating graceful shutdown");
            }
        }
    })
}

/// Build, bind and serve until a termination signal arrives.
pub async fn run(config: RepoConfig) -> RepoResult<ShutdownOutcome> {
    config.validate()?;
    let resolver = resolver_for(&config)?;
    let server = RepoServer::build(config, resolver.as_ref()).await?;
    let listener = server.bind().await?;
    let shutdown = shutdown_signal()?;
    server.serve(listener, shutdown).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn config(temp_dir: &TempDir) -> RepoConfig {
        let chart_dir = temp_dir.path().join("charts");
        let app = chart_dir.join("app");
        fs::create_dir_all(&app).unwrap();
        fs::write(
            app.join("Chart.yaml"),
            "apiVersion: v2\nname: app\nversion: 0.0.1\n",
        )
        .unwrap();
        RepoConfig::new(chart_dir, temp_dir.path().join("repo"))
    }

    #[test]
    fn test_state_display() {
        assert_eq!(LifecycleState::RouterReady.to_string(), "router-ready");
        assert_eq!(LifecycleState::Stopped.to_string(), "stopped");
    }

    #[tokio::test]
    async fn test_build_reaches_router_ready() {
        let temp_dir = TempDir::new().unwrap();
        let server = RepoServer::build(config(&temp_dir), &StaticHostname("host".into()))
            .await
            .unwrap();

        assert_eq!(server.state(), LifecycleState::RouterReady);
        assert_eq!(server.hostname(), "host");
        let index = String::from_utf8(server.store().read().to_vec()).unwrap();
        assert!(index.contains("https://host/charts/app-2.5.0.tgz"));
    }

    #[tokio::test]
    async fn test_bad_port_fails_before_packaging() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = config(&temp_dir);
        config.port = 80;

        let err = RepoServer::build(config.clone(), &StaticHostname("host".into()))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RepoError::InvalidConfiguration(_)));
        assert!(!config.repo_dir.exists());
    }

    #[tokio::test]
    async fn test_hostname_failure_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let err = RepoServer::build(config(&temp_dir), &StaticHostname(String::new()))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RepoError::HostnameDiscovery(_)));
    }

    #[test]
    fn test_resolver_for_configured_host() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = config(&temp_dir);
        config.host = Some("apps.example.com".to_string());
        assert!(resolver_for(&config).is_ok());
    }

    #[tokio::test]
    async fn test_serve_and_shutdown() {
        let temp_dir = TempDir::new().unwrap();
        let server = RepoServer::build(config(&temp_dir), &StaticHostname("host".into()))
            .await
            .unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let outcome = server.serve(listener, async {}).await.unwrap();
        assert_eq!(outcome, ShutdownOutcome::Drained);
    }
}
