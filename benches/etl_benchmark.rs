//! Benchmarks for filmworks-etl operations.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use filmworks_etl::postgres::bulk_insert_sql;
use filmworks_etl::records::parse_timestamp;

/// Benchmark bulk insert statement building at page size.
fn bench_bulk_insert_sql(c: &mut Criterion) {
    let columns = [
        "title",
        "description",
        "creation_date",
        "type",
        "id",
        "rating",
        "created",
        "modified",
    ];

    c.bench_function("bulk_insert_sql_5000_rows", |b| {
        b.iter(|| {
            black_box(bulk_insert_sql(
                "content.film_work",
                &columns,
                "(id)",
                5000,
            ))
        })
    });
}

/// Benchmark source timestamp parsing across the accepted formats.
fn bench_parse_timestamp(c: &mut Criterion) {
    let samples = [
        "2021-06-16 20:14:09.221838+00",
        "2021-06-16T20:14:09+00:00",
        "2021-06-16 20:14:09",
    ];

    c.bench_function("parse_timestamp", |b| {
        b.iter(|| {
            for raw in &samples {
                black_box(parse_timestamp(raw));
            }
        })
    });
}

criterion_group!(benches, bench_bulk_insert_sql, bench_parse_timestamp);
criterion_main!(benches);
