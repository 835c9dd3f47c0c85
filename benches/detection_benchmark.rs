use cellseg::edges::EdgeFusion;
use cellseg::preprocess::Preprocessor;
use cellseg::sweep::OffsetOptimizer;
use cellseg::{detect, DetectionParameters, Frame};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ndarray::Array2;

/// Gray frame with a grid of dark disks on a bright background.
fn synthetic_frame(size: u32, radius: f32) -> Frame {
    let spacing = radius * 3.0;
    let data = (0..size * size)
        .map(|i| {
            let x = (i % size) as f32;
            let y = (i / size) as f32;
            let dx = (x % spacing) - spacing / 2.0;
            let dy = (y % spacing) - spacing / 2.0;
            if dx * dx + dy * dy <= radius * radius {
                40
            } else {
                200
            }
        })
        .collect();
    Frame::from_gray8(size, size, data).expect("valid synthetic frame")
}

fn bench_params() -> DetectionParameters {
    DetectionParameters {
        hole_area_threshold: 4000,
        area_min: 100,
        area_max: 6000,
        perimeter_max: 400.0,
        aspect_ratio_threshold: 3.0,
        ..Default::default()
    }
}

fn benchmark_full_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_pipeline");
    group.sample_size(10);

    let params = bench_params();
    for size in [256u32, 512, 1024] {
        let frame = synthetic_frame(size, 16.0);
        group.bench_with_input(BenchmarkId::from_parameter(size), &frame, |b, frame| {
            b.iter(|| detect(black_box(frame), None, &params).expect("detection failed"));
        });
    }

    group.finish();
}

fn benchmark_stages(c: &mut Criterion) {
    let mut group = c.benchmark_group("stages");
    group.sample_size(20);

    let params = bench_params();
    let gray = synthetic_frame(512, 16.0).as_dynamic().to_luma8();
    let preprocessor = Preprocessor::from_params(&params);
    let pre = preprocessor.run(&gray).expect("preprocess failed");

    group.bench_function("preprocess", |b| {
        b.iter(|| preprocessor.run(black_box(&gray)).expect("preprocess failed"));
    });

    let fusion = EdgeFusion::from_params(&params);
    group.bench_function("edge_fusion", |b| {
        b.iter(|| fusion.run(black_box(&pre)).fused());
    });

    group.finish();
}

fn benchmark_offset_sweep(c: &mut Criterion) {
    let mut group = c.benchmark_group("offset_sweep");
    group.sample_size(10);

    let image = Array2::from_shape_fn((512, 512), |(y, x)| ((x * 7 + y * 13) % 255) as f32);
    let mask = Array2::from_shape_fn((512, 512), |(y, x)| (x / 32 + y / 32) % 3 == 0);
    let optimizer = OffsetOptimizer::new(5).expect("thread pool");

    group.bench_function("range_5", |b| {
        b.iter(|| optimizer.optimize(black_box(&image), &mask, (0, 0)));
    });

    group.finish();
}

criterion_group!(benches, benchmark_full_pipeline, benchmark_stages, benchmark_offset_sweep);
criterion_main!(benches);
