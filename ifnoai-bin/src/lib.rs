use bytes::Bytes;
use clap::Parser;
use http_body_util::Full;
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::server::conn::http1;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use ifnoai_config::Config;
use ifnoai_core::{SinkholeServer, StatsSnapshot, StatsStore};
use prometheus::{Encoder, Registry, TextEncoder};
use std::convert::Infallible;
use std::error::Error;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

const REPORT_TOP_DOMAINS: usize = 10;

#[derive(Parser, Debug, Default)]
#[command(name = "ifnoai-sinkhole", author, version, about, long_about = None)]
pub struct Args {
    /// YAML configuration file; built-in defaults are used when omitted
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override the HTTP refusal port
    #[arg(long)]
    pub http_port: Option<u16>,

    /// Override the TLS port
    #[arg(long)]
    pub https_port: Option<u16>,

    /// Only bind IPv4 loopback
    #[arg(long)]
    pub no_ipv6: bool,
}

/// Builds the effective configuration: file (or defaults), then CLI overrides.
pub fn load_config(args: &Args) -> Result<Config, Box<dyn Error>> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    if let Some(port) = args.http_port {
        config.http_port = port;
    }
    if let Some(port) = args.https_port {
        config.https_port = port;
    }
    if args.no_ipv6 {
        config.ipv6 = false;
    }

    config.validate()?;
    Ok(config)
}

pub async fn run(args: Args) -> Result<(), Box<dyn Error>> {
    // Initialize logging
    fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into())
                .add_directive("ifnoai_core=debug".parse()?),
        )
        .with_target(false)
        .json()
        .init();

    let config = load_config(&args)?;
    let metrics_config = config.metrics.clone();
    let report_interval = config.report_interval;

    // Set up metrics
    let server = if metrics_config.enabled {
        let registry = Registry::new();
        let server = SinkholeServer::with_metrics(config, &registry)?;

        let metrics_addr: SocketAddr = metrics_config.address.parse()?;
        let metrics_listener = TcpListener::bind(metrics_addr).await?;
        info!(addr = %metrics_addr, "Serving /metrics and /stats");
        tokio::spawn(serve_metrics(metrics_listener, registry, server.stats()));

        server
    } else {
        SinkholeServer::new(config)
    };

    let session_start = Instant::now();
    server.start().await;

    let reporter = report_interval.map(|secs| {
        let stats = server.stats();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(secs));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let snapshot = stats.snapshot();
                let top = snapshot
                    .top_domains(1)
                    .into_iter()
                    .next()
                    .map(|(domain, _)| domain)
                    .unwrap_or_default();
                info!(total = snapshot.total, top_domain = %top, "Interception stats");
            }
        })
    });

    info!("Sinkhole started, waiting for connections...");
    signal::ctrl_c().await?;
    info!("Received shutdown signal");

    if let Some(reporter) = reporter {
        reporter.abort();
    }
    server.stop().await;

    log_session_report(&server.snapshot(), session_start.elapsed());
    Ok(())
}

async fn serve_metrics(listener: TcpListener, registry: Registry, stats: Arc<StatsStore>) {
    loop {
        let (stream, _) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!(error = %e, "Metrics accept error");
                continue;
            }
        };

        let registry = registry.clone();
        let stats = stats.clone();
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            let service = hyper::service::service_fn(move |req: Request<hyper::body::Incoming>| {
                let response = route(req.uri().path(), &registry, &stats);
                async move { Ok::<_, Infallible>(response) }
            });

            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                error!(error = %err, "Metrics server error");
            }
        });
    }
}

/// Answers a metrics-server request for `path`.
pub fn route(path: &str, registry: &Registry, stats: &StatsStore) -> Response<Full<Bytes>> {
    match path {
        "/metrics" => {
            let encoder = TextEncoder::new();
            let mut buffer = Vec::new();
            match encoder.encode(&registry.gather(), &mut buffer) {
                Ok(()) => with_content_type(buffer, encoder.format_type()),
                Err(e) => status_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Metrics encoding error: {}", e),
                ),
            }
        }
        "/stats" => match serde_json::to_vec(&stats.snapshot()) {
            Ok(body) => with_content_type(body, "application/json"),
            Err(e) => status_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Stats encoding error: {}", e),
            ),
        },
        _ => status_response(StatusCode::NOT_FOUND, "Not Found".to_string()),
    }
}

fn with_content_type(body: Vec<u8>, content_type: &str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    if let Ok(value) = HeaderValue::from_str(content_type) {
        response.headers_mut().insert(CONTENT_TYPE, value);
    }
    response
}

fn status_response(status: StatusCode, message: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(message)));
    *response.status_mut() = status;
    response
}

fn log_session_report(snapshot: &StatsSnapshot, elapsed: Duration) {
    info!(
        duration = %format_duration(elapsed),
        total_interceptions = snapshot.total,
        "Session complete"
    );
    for (rank, (domain, count)) in snapshot
        .top_domains(REPORT_TOP_DOMAINS)
        .into_iter()
        .enumerate()
    {
        info!(rank = rank + 1, %domain, attempts = count, "Top intercepted target");
    }
}

/// Formats a duration as `HH:MM:SS`.
pub fn format_duration(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}
