use std::io::Write;

use criterion::{criterion_group, criterion_main, Criterion};
use tempfile::NamedTempFile;

use csv_unify::profiler::build_signature;
use csv_unify::sampling::{count_lines, plan_blocks, stream_blocks};

fn synthetic_file(lines: usize) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp file");
    writeln!(file, "id,name,price").unwrap();
    for i in 0..lines {
        writeln!(file, "{i},item-{},{}.25", i % 97, i % 500).unwrap();
    }
    file.flush().unwrap();
    file
}

fn bench_sampled_vs_full(c: &mut Criterion) {
    let file = synthetic_file(200_000);
    let path = file.path().to_path_buf();
    let total_lines = count_lines(&path).unwrap();

    let mut group = c.benchmark_group("analysis");
    group.sample_size(10);

    group.bench_function("block_sampled", |b| {
        b.iter(|| {
            let plan = plan_blocks(total_lines, 1_000, 20_000);
            let mut signatures = 0usize;
            stream_blocks(&path, &plan, encoding_rs::UTF_8, |_, buffer| {
                let (signature, _) = build_signature(&buffer.lines, 16, 0.7, false);
                signatures += signature.column_count;
                Ok(())
            })
            .unwrap();
            signatures
        })
    });

    group.bench_function("full_scan", |b| {
        b.iter(|| {
            let content = std::fs::read_to_string(&path).unwrap();
            let lines: Vec<String> = content.lines().map(|line| line.to_string()).collect();
            let (signature, _) = build_signature(&lines, 16, 0.7, false);
            signature.column_count
        })
    });

    group.finish();
}

criterion_group!(benches, bench_sampled_vs_full);
criterion_main!(benches);
