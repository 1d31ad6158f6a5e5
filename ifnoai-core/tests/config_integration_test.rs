use ifnoai_config::Config;
use ifnoai_core::{Protocol, SinkholeServer};
use prometheus::Registry;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time::timeout;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_server_from_yaml_config() {
    let yaml = r#"
http_port: 0
https_port: 0
ipv6: false
backlog: 8
max_read_bytes: 16
timeouts:
  read_ms: 200
"#;
    let config = Config::parse(yaml).expect("Failed to parse config");
    let server = SinkholeServer::new(config);
    server.start().await;

    let endpoints = server.endpoints().await;
    assert_eq!(endpoints.len(), 2);
    assert!(endpoints.iter().any(|e| e.protocol == Protocol::Http));
    assert!(endpoints.iter().any(|e| e.protocol == Protocol::Https));

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_read_timeout_from_config() {
    let config = Config::parse(
        "http_port: 0\nhttps_port: 0\nipv6: false\ntimeouts:\n  read_ms: 100\n",
    )
    .unwrap();
    let server = SinkholeServer::new(config);
    server.start().await;
    let https = server
        .endpoints()
        .await
        .into_iter()
        .find(|e| e.protocol == Protocol::Https)
        .unwrap()
        .local_addr;

    // A silent client is closed shortly after the configured timeout
    let mut stream = TcpStream::connect(https).await.unwrap();
    let mut buf = Vec::new();
    let read = timeout(Duration::from_secs(2), stream.read_to_end(&mut buf)).await;
    assert!(read.is_ok(), "connection should close after read_ms");
    assert!(buf.is_empty());
    assert_eq!(server.snapshot().domain_counts["Encrypted AI Service"], 1);

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_max_read_bytes_limits_first_read() {
    // The Host header lies beyond the first 16 bytes, so it is never seen
    let config = Config::parse(
        "http_port: 0\nhttps_port: 0\nipv6: false\nmax_read_bytes: 16\ntimeouts:\n  read_ms: 200\n",
    )
    .unwrap();
    let registry = Registry::new();
    let server = SinkholeServer::with_metrics(config, &registry).unwrap();
    server.start().await;
    let http = server
        .endpoints()
        .await
        .into_iter()
        .find(|e| e.protocol == Protocol::Http)
        .unwrap()
        .local_addr;

    let mut stream = TcpStream::connect(http).await.unwrap();
    tokio::io::AsyncWriteExt::write_all(
        &mut stream,
        b"GET /a/long/path HTTP/1.1\r\nHost: chat.openai.com\r\n\r\n",
    )
    .await
    .unwrap();
    let mut buf = Vec::new();
    let _ = timeout(Duration::from_secs(2), stream.read_to_end(&mut buf)).await;

    assert_eq!(server.snapshot().domain_counts["Unencrypted AI Service"], 1);
    server.stop().await;
}
