pub mod connection;
mod http;
pub mod metrics;
pub mod server;
pub mod stats;

pub use connection::{ConnectionHandler, Hit, Protocol, REFUSAL_RESPONSE, classify};
pub use http::extract_host;
pub use metrics::SinkholeMetrics;
pub use server::{ListenerEndpoint, SinkholeServer};
pub use stats::{StatsSnapshot, StatsStore};

const TLS_HANDSHAKE: u8 = 0x16;
const CLIENT_HELLO: u8 = 0x01;
const SNI_EXTENSION: u16 = 0x0000;
const SNI_HOST_NAME: u8 = 0x00;

/// Why a buffer did not yield an SNI hostname.
///
/// None of these are failures of the sinkhole itself; they only explain a
/// no-match to the debug log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SniError {
    NotHandshake,
    NotClientHello,
    MessageTruncated,
    NoServerName,
    InvalidServerName,
}

impl std::fmt::Display for SniError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SniError::NotHandshake => write!(f, "Not a TLS handshake record"),
            SniError::NotClientHello => write!(f, "Handshake is not a Client Hello"),
            SniError::MessageTruncated => write!(f, "Message truncated"),
            SniError::NoServerName => write!(f, "No server name in Client Hello"),
            SniError::InvalidServerName => write!(f, "Invalid server name"),
        }
    }
}

impl std::error::Error for SniError {}

/// Bounds-checked big-endian reader over a possibly truncated record.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], SniError> {
        let end = self
            .pos
            .checked_add(len)
            .ok_or(SniError::MessageTruncated)?;
        let bytes = self
            .buf
            .get(self.pos..end)
            .ok_or(SniError::MessageTruncated)?;
        self.pos = end;
        Ok(bytes)
    }

    fn skip(&mut self, len: usize) -> Result<(), SniError> {
        self.take(len).map(|_| ())
    }

    fn u8(&mut self) -> Result<u8, SniError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, SniError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }
}

/// Extracts the SNI hostname from the first bytes of a TLS connection.
///
/// Only the fields needed to reach the extensions block are decoded. The
/// declared record and handshake lengths are not required to fit in `record`:
/// a ClientHello is parsed as far as the buffer allows, and any read that
/// would run past the end yields [`SniError::MessageTruncated`].
///
/// # Examples
///
/// ```
/// use ifnoai_core::{SniError, extract_sni};
///
/// assert_eq!(extract_sni(&[]), Err(SniError::MessageTruncated));
/// assert_eq!(extract_sni(b"GET / HTTP/1.1\r\n"), Err(SniError::NotHandshake));
/// ```
pub fn extract_sni(record: &[u8]) -> Result<String, SniError> {
    let mut cursor = Cursor::new(record);

    // Record header: type, version, length
    if cursor.u8()? != TLS_HANDSHAKE {
        return Err(SniError::NotHandshake);
    }
    cursor.skip(2 + 2)?;

    // Handshake header: type, 24-bit length
    if cursor.u8()? != CLIENT_HELLO {
        return Err(SniError::NotClientHello);
    }
    cursor.skip(3)?;

    // Client version and random
    cursor.skip(2 + 32)?;

    let session_id_length = cursor.u8()? as usize;
    cursor.skip(session_id_length)?;

    let cipher_suites_length = cursor.u16()? as usize;
    cursor.skip(cipher_suites_length)?;

    let compression_methods_length = cursor.u8()? as usize;
    cursor.skip(compression_methods_length)?;

    let extensions_length = cursor.u16()? as usize;
    let extensions_end = cursor.pos + extensions_length;

    while cursor.pos < extensions_end {
        let extension_type = cursor.u16()?;
        let extension_length = cursor.u16()? as usize;
        let data = cursor.take(extension_length)?;

        if extension_type != SNI_EXTENSION {
            continue;
        }

        if let Some(name) = parse_server_name(data)? {
            return Ok(name);
        }
    }

    Err(SniError::NoServerName)
}

/// Reads the first entry of a server_name extension. `None` means the entry
/// is not a host_name and the caller should keep scanning.
fn parse_server_name(data: &[u8]) -> Result<Option<String>, SniError> {
    let mut cursor = Cursor::new(data);
    let _list_length = cursor.u16()?;

    if cursor.u8()? != SNI_HOST_NAME {
        return Ok(None);
    }

    let name_length = cursor.u16()? as usize;
    let name = cursor.take(name_length)?;
    match std::str::from_utf8(name) {
        Ok(s) if !s.is_empty() => Ok(Some(s.to_string())),
        _ => Err(SniError::InvalidServerName),
    }
}

/// SNI hostname of a ClientHello, or `None` for anything else.
pub fn sni_hostname(record: &[u8]) -> Option<String> {
    extract_sni(record).ok()
}
