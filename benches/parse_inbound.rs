/// Benchmarks for inbound auction feed parsing.
///
/// Every frame received from the feed goes through `parse_messages`, including
/// the heartbeat acknowledgements that are filtered out, so this is the hot path.
use auction_feed_client::feed::types::{InboundMessage, parse_messages};
use criterion::{Criterion, Throughput, criterion_group, criterion_main};

fn bench_single_messages(c: &mut Criterion) {
    let mut group = c.benchmark_group("feed/single");

    let update_msg = r#"{
        "type": "update",
        "auctionId": "abc",
        "data": { "lotId": "lot-1", "highestBid": 125, "bidder": "reader-42" }
    }"#;
    group.throughput(Throughput::Bytes(update_msg.len() as u64));
    group.bench_function("update", |b| {
        b.iter(|| {
            parse_messages(std::hint::black_box(update_msg.as_bytes()))
                .expect("Parsing should succeed")
        });
    });

    let snapshot_msg = r#"{
        "type": "snapshot",
        "auctionId": "abc",
        "data": {
            "lots": [
                { "id": "lot-1", "title": "First edition", "highestBid": "120.00" },
                { "id": "lot-2", "title": "Signed ARC", "highestBid": null },
                { "id": "lot-3", "title": "Proof copy", "highestBid": "45.50" }
            ],
            "endsAt": "2026-10-19T18:00:00Z"
        }
    }"#;
    group.throughput(Throughput::Bytes(snapshot_msg.len() as u64));
    group.bench_function("snapshot", |b| {
        b.iter(|| {
            parse_messages(std::hint::black_box(snapshot_msg.as_bytes()))
                .expect("Parsing should succeed")
        });
    });

    let pong_msg = r#"{"type":"pong"}"#;
    group.throughput(Throughput::Bytes(pong_msg.len() as u64));
    group.bench_function("pong", |b| {
        b.iter(|| {
            parse_messages(std::hint::black_box(pong_msg.as_bytes()))
                .expect("Parsing should succeed")
        });
    });

    group.finish();
}

fn bench_batches(c: &mut Criterion) {
    let mut group = c.benchmark_group("feed/batch");

    let updates: Vec<String> = (0..50)
        .map(|i| {
            format!(
                r#"{{"type":"update","auctionId":"abc","data":{{"lotId":"lot-{i}","highestBid":{}}}}}"#,
                100 + i
            )
        })
        .collect();
    let batch = format!("[{}]", updates.join(","));
    group.throughput(Throughput::Bytes(batch.len() as u64));
    group.bench_function("50_updates", |b| {
        b.iter(|| {
            parse_messages(std::hint::black_box(batch.as_bytes()))
                .expect("Parsing should succeed")
        });
    });

    let mixed = r#"[
        {"type":"pong"},
        {"type":"update","auctionId":"abc","data":{"lotId":"lot-1","highestBid":130}},
        {"type":"pong"},
        {"type":"error","auctionId":"abc","data":{"message":"bid too low"}}
    ]"#;
    group.throughput(Throughput::Bytes(mixed.len() as u64));
    group.bench_function("mixed_with_pongs", |b| {
        b.iter(|| {
            parse_messages(std::hint::black_box(mixed.as_bytes()))
                .expect("Parsing should succeed")
        });
    });

    group.finish();
}

fn bench_message_struct(c: &mut Criterion) {
    let mut group = c.benchmark_group("feed/primitives");

    let minimal = r#"{"type":"update"}"#;
    group.throughput(Throughput::Bytes(minimal.len() as u64));
    group.bench_function("InboundMessage::minimal", |b| {
        b.iter(|| {
            let _: InboundMessage = serde_json::from_str(std::hint::black_box(minimal))
                .expect("Deserialization should succeed");
        });
    });

    group.finish();
}

criterion_group!(
    feed_benches,
    bench_single_messages,
    bench_batches,
    bench_message_struct
);
criterion_main!(feed_benches);
