use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use ifnoai_core::{Protocol, classify, extract_host, extract_sni};
use std::hint::black_box;

/// Helper to build a valid TLS ClientHello with SNI, preceded by `filler`
/// unrelated extensions of 16 bytes each
fn build_client_hello_with_sni(domain: &str, filler: usize) -> Vec<u8> {
    let domain_bytes = domain.as_bytes();
    let domain_len = domain_bytes.len() as u16;

    let sni_list_len = 3 + domain_len;
    let sni_ext_len = 2 + sni_list_len;
    let filler_len = (filler * (4 + 16)) as u16;
    let extensions_len = filler_len + 4 + sni_ext_len;
    let handshake_len = 2 + 32 + 1 + 2 + 2 + 2 + 2 + extensions_len;
    let record_len = 4 + handshake_len;

    let mut record = vec![
        0x16,
        0x03,
        0x03,
        (record_len >> 8) as u8,
        (record_len & 0xff) as u8,
        0x01,
        ((handshake_len as u32) >> 16) as u8,
        (handshake_len >> 8) as u8,
        (handshake_len & 0xff) as u8,
        0x03,
        0x03,
    ];
    record.extend_from_slice(&[0; 32]);
    record.extend_from_slice(&[
        0x00,
        0x00,
        0x02,
        0x00,
        0x00,
        0x01,
        0x00,
        (extensions_len >> 8) as u8,
        (extensions_len & 0xff) as u8,
    ]);
    for i in 0..filler {
        record.extend_from_slice(&[0xfa, i as u8, 0x00, 0x10]);
        record.extend_from_slice(&[0; 16]);
    }
    record.extend_from_slice(&[
        0x00,
        0x00,
        (sni_ext_len >> 8) as u8,
        (sni_ext_len & 0xff) as u8,
        (sni_list_len >> 8) as u8,
        (sni_list_len & 0xff) as u8,
        0x00,
        (domain_len >> 8) as u8,
        (domain_len & 0xff) as u8,
    ]);
    record.extend_from_slice(domain_bytes);
    record
}

fn bench_sni_extraction(c: &mut Criterion) {
    let mut group = c.benchmark_group("sni_extraction");

    // Benchmark with different domain lengths
    for domain in &[
        "claude.ai",
        "chat.openai.com",
        "very.long.subdomain.gemini.google.com",
    ] {
        let record = build_client_hello_with_sni(domain, 0);
        group.bench_with_input(BenchmarkId::from_parameter(domain), &record, |b, record| {
            b.iter(|| extract_sni(black_box(record)).unwrap());
        });
    }

    group.finish();
}

fn bench_sni_after_many_extensions(c: &mut Criterion) {
    let record = build_client_hello_with_sni("chat.openai.com", 16);

    c.bench_function("sni_after_16_extensions", |b| {
        b.iter(|| extract_sni(black_box(&record)).unwrap());
    });
}

fn bench_host_extraction(c: &mut Criterion) {
    let request = b"GET /backend-api/conversation HTTP/1.1\r\n\
User-Agent: Mozilla/5.0\r\n\
Accept: */*\r\n\
Accept-Encoding: gzip, deflate, br\r\n\
Host: chat.openai.com\r\n\
Connection: keep-alive\r\n\r\n";

    c.bench_function("host_header", |b| {
        b.iter(|| extract_host(black_box(request)).unwrap());
    });
}

fn bench_no_match_cases(c: &mut Criterion) {
    let mut group = c.benchmark_group("no_match");

    // Truncated record
    let truncated = vec![0x16, 0x03, 0x01];
    group.bench_function("truncated_record", |b| {
        b.iter(|| {
            let _ = extract_sni(black_box(&truncated));
        });
    });

    // First read of a plain HTTP request on the TLS port
    let http = b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n".to_vec();
    group.bench_function("classify_http_on_tls_port", |b| {
        b.iter(|| classify(Protocol::Https, black_box(&http)));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_sni_extraction,
    bench_sni_after_many_extensions,
    bench_host_extraction,
    bench_no_match_cases
);
criterion_main!(benches);
