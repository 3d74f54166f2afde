//! Benchmarks for the core executor allocation and collection paths.
//!
//! Run with `cargo bench --package vmgc`.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use vmgc::builders;
use vmgc::config::VmConfig;
use vmgc::value::Tag;
use vmgc::Executor;

fn small_heap_config() -> VmConfig {
    VmConfig {
        stack_size: 4096,
        initial_heap_size: 1024 * 1024,
        max_heap_size: 256 * 1024 * 1024,
        heap_growth_threshold: 0.75,
        mailbox_capacity: 256,
        recv_poll_interval: std::time::Duration::from_millis(50),
        verbose: false,
    }
}

fn bench_executor_creation(c: &mut Criterion) {
    let mut group = c.benchmark_group("executor_creation");

    group.bench_function("default_config", |b| {
        b.iter(|| black_box(Executor::new(1, VmConfig::default()).unwrap()))
    });

    group.bench_function("small_heap", |b| {
        b.iter(|| black_box(Executor::new(1, small_heap_config()).unwrap()))
    });

    group.finish();
}

fn bench_allocate_float(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocate_float");
    let exec = Executor::new(1, small_heap_config()).unwrap();

    group.throughput(Throughput::Elements(1));
    group.bench_function("single", |b| {
        b.iter(|| black_box(builders::float_new(&exec, 1.5, false).unwrap()))
    });

    group.finish();
}

fn bench_allocate_bitwords(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocate_bitwords");
    let exec = Executor::new(1, small_heap_config()).unwrap();

    group.bench_function("bits8", |b| {
        b.iter(|| black_box(builders::bits8(&exec, 7, false).unwrap()))
    });
    group.bench_function("bits16", |b| {
        b.iter(|| black_box(builders::bits16(&exec, 0xBEEF, false).unwrap()))
    });
    group.bench_function("bits32", |b| {
        b.iter(|| black_box(builders::bits32(&exec, 0xDEADBEEF, false).unwrap()))
    });
    group.bench_function("bits64", |b| {
        b.iter(|| black_box(builders::bits64(&exec, 0x0123456789ABCDEF, false).unwrap()))
    });

    group.finish();
}

fn bench_string_builders(c: &mut Criterion) {
    let mut group = c.benchmark_group("string_builders");
    let exec = Executor::new(1, small_heap_config()).unwrap();

    let lengths = [4usize, 16, 64, 256];
    for &len in &lengths {
        let bytes = vec![b'a'; len];
        group.throughput(Throughput::Bytes(len as u64));
        group.bench_function(format!("string_new_{len}"), |b| {
            b.iter(|| black_box(builders::string_new(&exec, &bytes, false).unwrap()))
        });
    }

    let s = builders::string_new(&exec, b"hello world", false).unwrap();
    group.bench_function("string_tail", |b| {
        b.iter(|| black_box(builders::string_tail(&exec, s).unwrap()))
    });
    group.bench_function("string_reverse", |b| {
        b.iter(|| black_box(builders::string_reverse(&exec, s).unwrap()))
    });
    group.bench_function("string_cons", |b| {
        b.iter(|| black_box(builders::string_cons(&exec, b'!', s).unwrap()))
    });
    group.bench_function("cast_int_to_string", |b| {
        b.iter(|| black_box(builders::cast_int_to_string(&exec, 123_456_789).unwrap()))
    });

    group.finish();
}

fn bench_buffer_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffer_append");
    let exec = Executor::new(1, small_heap_config()).unwrap();

    group.bench_function("append_bits16_into_preallocated", |b| {
        b.iter(|| {
            let mut buf = builders::buffer_allocate(&exec, 4096, false).unwrap();
            for _ in 0..64 {
                buf = builders::buffer_append_bits(
                    &exec,
                    buf,
                    Tag::Bits16,
                    0xBEEF,
                    builders::Endian::Little,
                )
                .unwrap();
            }
            black_box(buf)
        })
    });

    group.bench_function("append_forces_growth", |b| {
        b.iter(|| {
            let mut buf = builders::buffer_allocate(&exec, 8, false).unwrap();
            for _ in 0..64 {
                buf = builders::buffer_append(&exec, buf, &[1, 2, 3, 4]).unwrap();
            }
            black_box(buf)
        })
    });

    group.finish();
}

fn bench_collection(c: &mut Criterion) {
    let mut group = c.benchmark_group("collection");

    group.bench_function("force_one_collection", |b| {
        b.iter(|| {
            let exec = Executor::new(1, small_heap_config()).unwrap();
            let before = exec.stats().collection_count;
            let mut i = 0;
            while exec.stats().collection_count == before {
                black_box(builders::float_new(&exec, i as f64, false).unwrap());
                i += 1;
                if i > 200_000 {
                    break;
                }
            }
        })
    });

    group.finish();
}

fn bench_mailbox_send_recv(c: &mut Criterion) {
    let mut group = c.benchmark_group("mailbox_send_recv");
    let sender = Executor::new(1, small_heap_config()).unwrap();
    let receiver = Executor::new(2, small_heap_config()).unwrap();

    group.bench_function("integer_roundtrip", |b| {
        b.iter(|| {
            receiver
                .send(sender.id(), builders::integer(black_box(42)))
                .unwrap();
            black_box(receiver.mailbox().recv(receiver.id(), None).unwrap());
        })
    });

    let shared_string = builders::string_new(&sender, b"a shared payload string", false).unwrap();
    group.bench_function("string_roundtrip", |b| {
        b.iter(|| {
            receiver.send(sender.id(), shared_string).unwrap();
            black_box(receiver.mailbox().recv(receiver.id(), None).unwrap());
        })
    });

    group.finish();
}

fn bench_config_validation(c: &mut Criterion) {
    let mut group = c.benchmark_group("config_validation");

    group.bench_function("default", |b| {
        b.iter(|| black_box(VmConfig::default().validate()))
    });

    group.bench_function("custom_valid", |b| {
        b.iter(|| {
            let config = VmConfig {
                max_heap_size: 128 * 1024 * 1024,
                heap_growth_threshold: 0.5,
                ..VmConfig::default()
            };
            black_box(config.validate())
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_executor_creation,
    bench_allocate_float,
    bench_allocate_bitwords,
    bench_string_builders,
    bench_buffer_append,
    bench_collection,
    bench_mailbox_send_recv,
    bench_config_validation
);
criterion_main!(benches);
