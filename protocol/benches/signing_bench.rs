// Signing & verification benchmarks for the Cerera protocol.
//
// Covers P-256 keypair generation, frame signing and verification of a
// consensus vote, transaction signing, and frame encode/decode.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use cerera_protocol::crypto::keys::KeyPair;
use cerera_protocol::crypto::signatures::{sign, verify};
use cerera_protocol::network::message::{ClientRequest, Message, RequestMsg, Signed, VoteMsg};
use cerera_protocol::transaction::{sign_transaction, TransactionBuilder};

fn vote(kp: &KeyPair) -> VoteMsg {
    VoteMsg {
        digest: "9f".repeat(32),
        view_id: 0,
        sequence_id: 42,
        node_id: kp.address(),
        block_height: 7,
    }
}

fn bench_keypair_generation(c: &mut Criterion) {
    c.bench_function("p256/keypair_generate", |b| {
        b.iter(KeyPair::generate);
    });
}

fn bench_sign_vote(c: &mut Criterion) {
    let keypair = KeyPair::generate();
    let msg = vote(&keypair);

    c.bench_function("p256/sign_vote", |b| {
        b.iter(|| sign(&msg, &keypair).unwrap());
    });
}

fn bench_verify_vote(c: &mut Criterion) {
    let keypair = KeyPair::generate();
    let msg = vote(&keypair);
    let signature = sign(&msg, &keypair).unwrap();

    c.bench_function("p256/verify_vote", |b| {
        b.iter(|| assert!(verify(&msg, &signature, keypair.public_key())));
    });
}

fn bench_sign_transaction(c: &mut Criterion) {
    let keypair = KeyPair::generate();
    let to = KeyPair::generate().address();

    c.bench_function("p256/sign_transaction", |b| {
        b.iter(|| {
            let mut tx = TransactionBuilder::transfer(keypair.address(), to)
                .value(1_000_000u64)
                .gas(21_000, 3u64)
                .nonce(42)
                .build()
                .unwrap();
            sign_transaction(&mut tx, &keypair).unwrap();
        });
    });
}

fn bench_request_frames(c: &mut Criterion) {
    let keypair = KeyPair::generate();
    let mut group = c.benchmark_group("codec/request_frame");

    for size in [64usize, 1024, 16 * 1024] {
        let body = ClientRequest::new(format!("{{\"data\":\"{}\"}}", "a".repeat(size)));
        let request = RequestMsg::new("transfer", keypair.address(), body);
        let frame = Message::Request(Signed::new(request, &keypair).unwrap())
            .encode()
            .unwrap();
        group.throughput(Throughput::Bytes(frame.len() as u64));

        group.bench_with_input(BenchmarkId::new("decode", size), &frame, |b, frame| {
            b.iter(|| Message::decode(frame).unwrap());
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_keypair_generation,
    bench_sign_vote,
    bench_verify_vote,
    bench_sign_transaction,
    bench_request_frames,
);
criterion_main!(benches);
