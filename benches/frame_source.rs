//! Chunk receive cost: single read-exact call vs. manual accumulate loop

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::io::{Cursor, Read};

use pcm_relay::audio::BufferPool;
use pcm_relay::config::ReadStrategy;
use pcm_relay::constants::DEFAULT_FRAME_BYTES;
use pcm_relay::network::{FrameRead, FrameSource};

const CHUNKS: usize = 256;

/// Reader that hands out at most `step` bytes per call, like a socket
/// delivering segments
struct Segmented {
    inner: Cursor<Vec<u8>>,
    step: usize,
}

impl Read for Segmented {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = buf.len().min(self.step);
        self.inner.read(&mut buf[..n])
    }
}

fn drain(strategy: ReadStrategy, payload: &[u8], step: usize) -> u64 {
    let mut pool = BufferPool::new(1, DEFAULT_FRAME_BYTES, 4).expect("pool");
    let mut buffer = pool.acquire_slot(0, 0).expect("slot");
    let reader = Segmented {
        inner: Cursor::new(payload.to_vec()),
        step,
    };
    let mut source = FrameSource::new(reader, strategy);

    while let Ok(FrameRead::Complete(_)) = source.read_frame(&mut buffer) {}
    pool.release(buffer);
    source.bytes_read()
}

fn bench_read_strategies(c: &mut Criterion) {
    let payload = vec![0x5au8; CHUNKS * DEFAULT_FRAME_BYTES];
    let mut group = c.benchmark_group("frame_source");
    group.throughput(Throughput::Bytes(payload.len() as u64));

    for step in [1460usize, DEFAULT_FRAME_BYTES] {
        for (name, strategy) in [("read_exact", ReadStrategy::ReadExact), ("accumulate", ReadStrategy::Accumulate)] {
            group.bench_with_input(BenchmarkId::new(name, step), &step, |b, &step| {
                b.iter(|| black_box(drain(strategy, &payload, step)));
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_read_strategies);
criterion_main!(benches);
