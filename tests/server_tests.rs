use std::collections::BTreeSet;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::{Duration, Instant};

use chart_repository::IndexFile;
use hub_repo::{
    ConnectionTimeouts, LifecycleState, RepoConfig, RepoError, RepoResult, RepoServer,
    ShutdownOutcome, StaticHostname,
};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

fn write_chart(chart_dir: &Path, name: &str, version: &str) {
    let dir = chart_dir.join(name);
    fs::create_dir_all(dir.join("templates")).unwrap();
    fs::write(
        dir.join("Chart.yaml"),
        format!("apiVersion: v2\nname: {}\nversion: {}\n", name, version),
    )
    .unwrap();
    fs::write(dir.join("values.yaml"), "image: nginx\n").unwrap();
}

fn test_config(temp_dir: &TempDir) -> RepoConfig {
    let chart_dir = temp_dir.path().join("charts");
    write_chart(&chart_dir, "policy", "0.1.0");
    write_chart(&chart_dir, "observability", "1.4.2");
    fs::write(chart_dir.join("NOTES.txt"), "not a chart").unwrap();
    RepoConfig::new(chart_dir, temp_dir.path().join("repo"))
}

struct RunningServer {
    addr: SocketAddr,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<RepoResult<ShutdownOutcome>>,
}

impl RunningServer {
    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn shutdown(self) -> ShutdownOutcome {
        let _ = self.stop.send(());
        self.handle.await.unwrap().unwrap()
    }
}

async fn start(server: RepoServer) -> RunningServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, stopped) = oneshot::channel::<()>();
    let handle = tokio::spawn(server.serve(listener, async move {
        let _ = stopped.await;
    }));
    RunningServer { addr, stop, handle }
}

async fn build(config: RepoConfig) -> RepoServer {
    RepoServer::build(config, &StaticHostname("apps.example.com".to_string()))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_index_matches_archives_on_disk() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(&temp_dir);
    let repo_dir = config.repo_dir.clone();
    let server = build(config).await;
    assert_eq!(server.state(), LifecycleState::RouterReady);
    let running = start(server).await;

    let response = reqwest::get(running.url("/charts/index.yaml")).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "application/x-yaml"
    );
    let index = IndexFile::from_yaml(&response.bytes().await.unwrap()).unwrap();

    let on_disk: BTreeSet<String> = fs::read_dir(&repo_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    let indexed: BTreeSet<String> = index
        .urls()
        .map(|url| {
            url.strip_prefix("https://apps.example.com/charts/")
                .unwrap()
                .to_string()
        })
        .collect();
    assert_eq!(indexed, on_disk);
    assert_eq!(
        on_disk,
        BTreeSet::from([
            "observability-2.5.0.tgz".to_string(),
            "policy-2.5.0.tgz".to_string(),
        ])
    );
    assert!(index.get("policy", "2.5.0").is_some());

    assert_eq!(running.shutdown().await, ShutdownOutcome::Drained);
}

#[tokio::test]
async fn test_archive_downloads() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(&temp_dir);
    let archive = config.repo_dir.join("policy-2.5.0.tgz");
    let running = start(build(config).await).await;

    let response = reqwest::get(running.url("/charts/policy-2.5.0.tgz"))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body = response.bytes().await.unwrap();
    assert_eq!(&body[..], &fs::read(&archive).unwrap()[..]);

    let response = reqwest::get(running.url("/charts/policy-9.9.9.tgz"))
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    running.shutdown().await;
}

#[tokio::test]
async fn test_health_routes() {
    let temp_dir = TempDir::new().unwrap();
    let running = start(build(test_config(&temp_dir)).await).await;

    for path in ["/liveness", "/readiness"] {
        let response = reqwest::get(running.url(path)).await.unwrap();
        assert_eq!(response.status(), 200, "{}", path);
    }

    running.shutdown().await;
}

#[tokio::test]
async fn test_out_of_range_port_fails_before_packaging() {
    let temp_dir = TempDir::new().unwrap();
    for port in [80, 1023] {
        let mut config = test_config(&temp_dir);
        config.port = port;
        let repo_dir = config.repo_dir.clone();

        let err = RepoServer::build(config, &StaticHostname("host".to_string()))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RepoError::InvalidConfiguration(_)));
        assert!(!repo_dir.exists());
    }
}

#[tokio::test]
async fn test_packaging_failure_is_fatal() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(&temp_dir);
    fs::create_dir_all(config.chart_dir.join("empty")).unwrap();

    let err = RepoServer::build(config, &StaticHostname("host".to_string()))
        .await
        .err()
        .unwrap();
    match err {
        RepoError::Packaging { bundle, .. } => assert_eq!(bundle, "empty"),
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_no_connections_accepted_after_shutdown() {
    let temp_dir = TempDir::new().unwrap();
    let running = start(build(test_config(&temp_dir)).await).await;
    let addr = running.addr;

    running.shutdown().await;

    assert!(TcpStream::connect(addr).await.is_err());
}

/// Write a file of `len` bytes into the served directory.
fn write_bulk_file(repo_dir: &Path, name: &str, len: usize) -> Vec<u8> {
    let data: Vec<u8> = (0..=250u8).cycle().take(len).collect();
    fs::write(repo_dir.join(name), &data).unwrap();
    data
}

#[tokio::test]
async fn test_download_in_flight_at_shutdown_completes() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(&temp_dir);
    let repo_dir = config.repo_dir.clone();
    let running = start(build(config).await).await;
    let data = write_bulk_file(&repo_dir, "bulk-1.0.0.tgz", 8 * 1024 * 1024);

    let mut response = reqwest::get(running.url("/charts/bulk-1.0.0.tgz"))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let mut body = response.chunk().await.unwrap().unwrap().to_vec();
    assert!(body.len() < data.len());

    running.stop.send(()).unwrap();
    while let Some(chunk) = response.chunk().await.unwrap() {
        body.extend_from_slice(&chunk);
    }

    assert_eq!(body.len(), data.len());
    assert!(body == data);
    let outcome = running.handle.await.unwrap().unwrap();
    assert_eq!(outcome, ShutdownOutcome::Drained);
}

#[tokio::test]
async fn test_client_not_reading_is_forced_closed_after_grace() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(&temp_dir);
    let repo_dir = config.repo_dir.clone();
    let server = build(config).await.with_grace(Duration::from_millis(200));
    let running = start(server).await;
    write_bulk_file(&repo_dir, "bulk-1.0.0.tgz", 32 * 1024 * 1024);

    // Request a large archive and never read the response.
    let mut client = TcpStream::connect(running.addr).await.unwrap();
    client
        .write_all(b"GET /charts/bulk-1.0.0.tgz HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let start = Instant::now();
    let outcome = running.shutdown().await;
    assert_eq!(outcome, ShutdownOutcome::Forced);
    assert!(start.elapsed() < Duration::from_secs(5));
    drop(client);
}

fn short_timeouts() -> ConnectionTimeouts {
    ConnectionTimeouts {
        read: Duration::from_millis(200),
        write: Duration::from_secs(30),
        idle: Duration::from_millis(500),
    }
}

#[tokio::test]
async fn test_stalled_client_is_disconnected() {
    let temp_dir = TempDir::new().unwrap();
    let server = build(test_config(&temp_dir))
        .await
        .with_timeouts(short_timeouts());
    let running = start(server).await;

    // Send a request line and never finish the headers.
    let mut stalled = TcpStream::connect(running.addr).await.unwrap();
    stalled
        .write_all(b"GET /charts/index.yaml HTTP/1.1\r\nHost: localhost\r\n")
        .await
        .unwrap();

    let mut buf = Vec::new();
    let closed = tokio::time::timeout(Duration::from_secs(3), stalled.read_to_end(&mut buf)).await;
    assert!(closed.is_ok(), "server kept a stalled connection open");

    assert_eq!(running.shutdown().await, ShutdownOutcome::Drained);
}

#[tokio::test]
async fn test_silent_client_is_disconnected() {
    let temp_dir = TempDir::new().unwrap();
    let server = build(test_config(&temp_dir))
        .await
        .with_timeouts(short_timeouts());
    let running = start(server).await;

    let mut silent = TcpStream::connect(running.addr).await.unwrap();
    let mut buf = Vec::new();
    let closed = tokio::time::timeout(Duration::from_secs(3), silent.read_to_end(&mut buf)).await;
    assert!(closed.is_ok(), "server kept a silent connection open");

    running.shutdown().await;
}

#[tokio::test]
async fn test_idle_keep_alive_connection_is_closed() {
    let temp_dir = TempDir::new().unwrap();
    let server = build(test_config(&temp_dir))
        .await
        .with_timeouts(short_timeouts());
    let running = start(server).await;

    let mut client = TcpStream::connect(running.addr).await.unwrap();
    client
        .write_all(b"GET /liveness HTTP/1.1\r\nHost: localhost\r\nConnection: keep-alive\r\n\r\n")
        .await
        .unwrap();

    let mut buf = Vec::new();
    let closed = tokio::time::timeout(Duration::from_secs(3), client.read_to_end(&mut buf)).await;
    assert!(closed.is_ok(), "server kept an idle connection open");
    let response = String::from_utf8_lossy(&buf);
    assert!(response.starts_with("HTTP/1.1 200"), "{}", response);

    running.shutdown().await;
}
