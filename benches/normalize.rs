//! Benchmark for external payload parsing and normalization

use campus_sync::services::external_api::{normalize_records, parse_records};
use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

fn create_payload(records: usize) -> Vec<u8> {
    let items: Vec<String> = (0..records)
        .map(|i| {
            format!(
                r#"{{"deviceId":{},"temperature":{:.1},"humidity":48.0,"windSpeed":2.4,"windDirection":"NW","pm25":14.0,"pm10":31.0,"co2":415.0,"noise":52.5}}"#,
                i % 64,
                18.0 + (i % 10) as f64
            )
        })
        .collect();
    format!("[{}]", items.join(",")).into_bytes()
}

fn bench_parse(c: &mut Criterion) {
    let payload = create_payload(1000);
    let mut group = c.benchmark_group("external_payload");
    group.throughput(Throughput::Elements(1000));

    group.bench_function("parse_1000_records", |b| {
        b.iter(|| black_box(parse_records(black_box(&payload)).unwrap()));
    });

    group.bench_function("parse_and_normalize_1000_records", |b| {
        b.iter(|| {
            let records = parse_records(black_box(&payload)).unwrap();
            black_box(normalize_records(records, Utc::now()))
        });
    });

    group.finish();
}

criterion_group!(benches, bench_parse);
criterion_main!(benches);
