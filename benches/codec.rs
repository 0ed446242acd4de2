use async_smtp_connection::codec::ClientCodec;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn bench_encode(c: &mut Criterion) {
    let message: Vec<u8> = "line one\r\n.leading dot\r\nbare\nline feeds\r\ntail"
        .repeat(1024)
        .into_bytes();

    c.bench_function("encode message body", move |b| {
        b.iter(|| {
            let result = black_box(async_std::task::block_on(async {
                let mut codec = ClientCodec::new();
                let mut out: Vec<u8> = Vec::with_capacity(message.len() + 16);
                codec.encode(&message, &mut out).await?;
                codec.finish(&mut out).await?;
                Ok::<_, futures::io::Error>(out)
            }));
            result.unwrap();
        })
    });
}

criterion_group!(benches, bench_encode);
criterion_main!(benches);
