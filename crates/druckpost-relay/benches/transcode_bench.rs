// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Criterion benchmarks for ingest-side work in the druckpost-relay crate:
// payload transcoding and inbound JSON parsing.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use criterion::{Criterion, black_box, criterion_group, criterion_main};

use druckpost_core::types::InboundJob;
use druckpost_relay::transcode::{Cp850Transcoder, PayloadTransform};

// ---------------------------------------------------------------------------
// Helper: a receipt-sized message with accented characters
// ---------------------------------------------------------------------------

fn receipt_text(lines: usize) -> String {
    let mut text = String::new();
    for i in 0..lines {
        text.push_str(&format!("{i:>3} Café crème       2 × 3,50 €\n"));
    }
    text.replace('€', "EUR").replace('×', "x")
}

fn bench_transcode(c: &mut Criterion) {
    let transcoder = Cp850Transcoder;
    let plain = receipt_text(40);
    let wrapped = STANDARD.encode(plain.as_bytes());

    c.bench_function("transcode (plain, 40 lines)", |b| {
        b.iter(|| transcoder.transform(black_box(plain.as_bytes())).unwrap());
    });

    c.bench_function("transcode (base64, 40 lines)", |b| {
        b.iter(|| transcoder.transform(black_box(wrapped.as_bytes())).unwrap());
    });
}

fn bench_parse_inbound(c: &mut Criterion) {
    let raw = format!(
        r#"{{"id":"order-1042","message":"{}","callback":"http://pos.local/cb","cut":"true"}}"#,
        STANDARD.encode(receipt_text(40))
    );

    c.bench_function("parse_inbound_job", |b| {
        b.iter(|| InboundJob::parse(black_box(raw.as_bytes())).unwrap());
    });
}

criterion_group!(benches, bench_transcode, bench_parse_inbound);
criterion_main!(benches);
