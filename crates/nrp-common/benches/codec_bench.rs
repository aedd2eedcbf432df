use criterion::{black_box, criterion_group, criterion_main, Criterion};
use nrp_common::codec::{validate_request_packet, validate_response_packet, Packet};
use nrp_common::{Direction, MsgType, PacketBuilder, RejectEntry, RejectReason};

fn full_response() -> Vec<u8> {
    let mut b = PacketBuilder::new(Direction::Response, 1236);
    b.reject(&[RejectEntry::new(MsgType::PubKey, RejectReason::Unsupported)])
        .unwrap();
    b.entropy_response(&[0xABu8; 64]).unwrap();
    b.peers_response(MsgType::Ip4Peers, 40, &[0x42u8; 240]).unwrap();
    b.peers_response(MsgType::Ip6Peers, 40, &[0x42u8; 720]).unwrap();
    b.finish().unwrap()
}

fn bench_validate_request(c: &mut Criterion) {
    let mut b = PacketBuilder::new(Direction::Request, 64);
    b.entropy_request(0).unwrap();
    b.peers_request(MsgType::Ip4Peers, 0).unwrap();
    b.peers_request(MsgType::Ip6Peers, 0).unwrap();
    let pkt = b.finish().unwrap();

    c.bench_function("validate_request", |b| {
        b.iter(|| black_box(validate_request_packet(black_box(&pkt))));
    });
}

fn bench_validate_response(c: &mut Criterion) {
    let pkt = full_response();

    c.bench_function("validate_response_1kb", |b| {
        b.iter(|| black_box(validate_response_packet(black_box(&pkt))));
    });
}

fn bench_walk_response(c: &mut Criterion) {
    let pkt = full_response();

    c.bench_function("walk_response_1kb", |b| {
        b.iter(|| {
            let parsed = Packet::parse(&pkt, Direction::Response).unwrap();
            black_box(parsed.messages().map(|m| m.length()).sum::<usize>())
        });
    });
}

fn bench_build_response(c: &mut Criterion) {
    c.bench_function("build_response_1kb", |b| {
        b.iter(|| black_box(full_response()));
    });
}

fn bench_reject_garbage(c: &mut Criterion) {
    let garbage = vec![0xFFu8; 1500];

    c.bench_function("reject_garbage", |b| {
        b.iter(|| black_box(validate_response_packet(black_box(&garbage))));
    });
}

criterion_group!(
    benches,
    bench_validate_request,
    bench_validate_response,
    bench_walk_response,
    bench_build_response,
    bench_reject_garbage,
);
criterion_main!(benches);
