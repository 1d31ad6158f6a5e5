const HOST_HEADER: &str = "host:";

/// Returns the value of the first `Host` header line in `request`.
///
/// Invalid UTF-8 is replaced rather than rejected, so a request with a
/// garbled body still yields its Host header. An empty header value counts
/// as no match.
pub fn extract_host(request: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(request);

    text.split("\r\n")
        .find(|line| {
            line.get(..HOST_HEADER.len())
                .is_some_and(|prefix| prefix.eq_ignore_ascii_case(HOST_HEADER))
        })
        .and_then(|line| line.split_once(':'))
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
