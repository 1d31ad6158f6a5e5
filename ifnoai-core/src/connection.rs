use crate::http::extract_host;
use crate::metrics::SinkholeMetrics;
use crate::sni_hostname;
use crate::stats::StatsStore;
use ifnoai_config::{Config, MAX_READ_BYTES_LIMIT};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{Duration, timeout};
use tracing::debug;

/// Sent verbatim to every connection on the HTTP port before closing.
pub const REFUSAL_RESPONSE: &[u8] =
    b"HTTP/1.1 403 Forbidden\r\nContent-Type: text/plain\r\n\r\nAccess Denied by IfNoAI Protocol.";

const TLS_PLACEHOLDER: &str = "Encrypted AI Service";
const HTTP_PLACEHOLDER: &str = "Unencrypted AI Service";

/// How a listener classifies the connections it accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// Plain HTTP: classified by Host header, answered with [`REFUSAL_RESPONSE`]
    Http,
    /// TLS: classified by ClientHello SNI, closed without a reply
    Https,
}

impl Protocol {
    /// Returns a string representation of the protocol for metrics and logging
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }

    /// Domain label recorded when no hostname can be extracted
    #[inline]
    pub fn placeholder(&self) -> &'static str {
        match self {
            Protocol::Http => HTTP_PLACEHOLDER,
            Protocol::Https => TLS_PLACEHOLDER,
        }
    }

    /// Port this protocol listens on under `config`
    #[inline]
    pub fn port(&self, config: &Config) -> u16 {
        match self {
            Protocol::Http => config.http_port,
            Protocol::Https => config.https_port,
        }
    }
}

/// One intercepted connection, ready to be counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hit {
    pub protocol: Protocol,
    pub domain: String,
    /// Whether `domain` came from the traffic rather than the placeholder
    pub classified: bool,
}

/// Classifies the first bytes of a connection. Never fails: unparseable
/// input falls back to the protocol's placeholder label.
pub fn classify(protocol: Protocol, data: &[u8]) -> Hit {
    let extracted = match protocol {
        Protocol::Http => extract_host(data),
        Protocol::Https => sni_hostname(data),
    };

    match extracted {
        Some(domain) => Hit {
            protocol,
            domain,
            classified: true,
        },
        None => Hit {
            protocol,
            domain: protocol.placeholder().to_string(),
            classified: false,
        },
    }
}

#[derive(Debug)]
enum HandlerError {
    Io(io::Error),
    Timeout,
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandlerError::Io(e) => write!(f, "IO error: {}", e),
            HandlerError::Timeout => write!(f, "Operation timed out"),
        }
    }
}

impl std::error::Error for HandlerError {}

impl From<io::Error> for HandlerError {
    fn from(err: io::Error) -> Self {
        HandlerError::Io(err)
    }
}

impl From<tokio::time::error::Elapsed> for HandlerError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        HandlerError::Timeout
    }
}

#[derive(Clone)]
pub struct ConnectionHandler {
    stats: Arc<StatsStore>,
    metrics: Option<Arc<SinkholeMetrics>>,
    read_timeout: Duration,
    max_read_bytes: usize,
}

impl ConnectionHandler {
    pub fn new(
        config: &Config,
        stats: Arc<StatsStore>,
        metrics: Option<Arc<SinkholeMetrics>>,
    ) -> Self {
        Self {
            stats,
            metrics,
            read_timeout: Duration::from_millis(config.timeouts.read_ms),
            // The server also accepts configs that never went through validate()
            max_read_bytes: config.max_read_bytes.clamp(1, MAX_READ_BYTES_LIMIT),
        }
    }

    /// Reads, classifies, counts and refuses a single connection.
    ///
    /// Exactly one hit is recorded per call whatever the client sends. Errors
    /// are logged at debug level and never returned; the stream is dropped,
    /// and therefore closed, on every path.
    pub async fn handle_connection<S>(&self, mut client: S, peer: SocketAddr, protocol: Protocol)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if let Some(ref metrics) = self.metrics {
            metrics.connections_active.inc();
        }

        let data = match self.read_first(&mut client).await {
            Ok(data) => data,
            Err(HandlerError::Timeout) => {
                debug!(%peer, protocol = protocol.as_str(), "No data before read timeout");
                Vec::new()
            }
            Err(e) => {
                debug!(%peer, protocol = protocol.as_str(), error = %e, "Read failed");
                self.count_error("read");
                Vec::new()
            }
        };

        let hit = classify(protocol, &data);
        self.stats.record_hit(&hit.domain);
        debug!(
            %peer,
            protocol = protocol.as_str(),
            domain = %hit.domain,
            classified = hit.classified,
            bytes = data.len(),
            "Intercepted connection"
        );

        if let Some(ref metrics) = self.metrics {
            let classified = if hit.classified { "true" } else { "false" };
            metrics
                .hits_total
                .with_label_values(&[protocol.as_str(), classified])
                .inc();
        }

        if protocol == Protocol::Http
            && let Err(e) = refuse(&mut client).await
        {
            debug!(%peer, error = %e, "Failed to send refusal");
            self.count_error("write");
        }

        drop(client);

        if let Some(ref metrics) = self.metrics {
            metrics.connections_active.dec();
        }
    }

    /// Single read of at most `max_read_bytes`; an orderly close yields an
    /// empty buffer.
    async fn read_first<S>(&self, client: &mut S) -> Result<Vec<u8>, HandlerError>
    where
        S: AsyncRead + Unpin,
    {
        let mut buf = vec![0u8; self.max_read_bytes];
        let n = timeout(self.read_timeout, client.read(&mut buf)).await??;
        buf.truncate(n);
        Ok(buf)
    }

    fn count_error(&self, stage: &str) {
        if let Some(ref metrics) = self.metrics {
            metrics
                .connection_errors_total
                .with_label_values(&[stage])
                .inc();
        }
    }
}

async fn refuse<S>(client: &mut S) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    client.write_all(REFUSAL_RESPONSE).await?;
    client.shutdown().await
}
