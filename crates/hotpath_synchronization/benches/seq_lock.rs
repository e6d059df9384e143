use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use hotpath_synchronization::seq_lock::seq_lock;

pub fn writes(c: &mut Criterion) {
    let mut group = c.benchmark_group("seq_lock");
    group.throughput(Throughput::Elements(1));

    group.bench_function("write", |b| {
        let (mut writer, _reader) = seq_lock([0u64; 4]);
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            writer.write(black_box([i, i, i, i]));
        });
    });

    group.bench_function("read", |b| {
        let (mut writer, reader) = seq_lock([0u64; 4]);
        writer.write([1, 2, 3, 4]);
        b.iter(|| black_box(reader.read()));
    });

    group.finish();
}

pub fn contended_reads(c: &mut Criterion) {
    let mut group = c.benchmark_group("seq_lock_contended");
    group.throughput(Throughput::Elements(1));

    // Reads while a background writer republishes constantly; measures the retry cost.
    group.bench_function("read_under_writes", |b| {
        let (mut writer, reader) = seq_lock([0u64; 4]);
        let stop = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let writer_thread = {
            let stop = stop.clone();
            std::thread::spawn(move || {
                let mut i = 0u64;
                while !stop.load(std::sync::atomic::Ordering::Relaxed) {
                    i += 1;
                    writer.write([i, i, i, i]);
                }
            })
        };

        b.iter(|| black_box(reader.read()));

        stop.store(true, std::sync::atomic::Ordering::Relaxed);
        writer_thread.join().unwrap();
    });

    group.finish();
}

criterion_group!(benches, writes, contended_reads);
criterion_main!(benches);
