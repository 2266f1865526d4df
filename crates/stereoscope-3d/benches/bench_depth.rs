use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use stereoscope_3d::{
    compute_depth_map, localize_objects, normalize_disparity, BoundingBox, CalibrationParameters,
    Detection2D, DepthRange, DisparityEncoding, LocalizerConfig,
};
use stereoscope_image::Image;

// fixed-point disparity ramp with a band of unmatched pixels on the left
fn synthetic_disparity(width: usize, height: usize) -> Image<i16, 1> {
    let data = (0..height)
        .flat_map(|_| {
            (0..width).map(|x| {
                if x < width / 8 {
                    -16
                } else {
                    64 + (x % 512) as i16
                }
            })
        })
        .collect();
    Image::new([width, height].into(), data).unwrap()
}

fn bench_depth(c: &mut Criterion) {
    let mut group = c.benchmark_group("Depth");

    for (width, height) in [(320, 240), (640, 480), (1280, 720)].iter() {
        group.throughput(criterion::Throughput::Elements((*width * *height) as u64));

        let parameter_string = format!("{}x{}", width, height);

        let raw = synthetic_disparity(*width, *height);
        let calibration = CalibrationParameters::new(
            700.0,
            700.0,
            *width as f64 / 2.0,
            *height as f64 / 2.0,
            0.12,
            [*width, *height].into(),
        )
        .unwrap();
        let encoding = DisparityEncoding::default();
        let range = DepthRange::default();

        group.bench_with_input(
            BenchmarkId::new("normalize_disparity", &parameter_string),
            &raw,
            |b, i| b.iter(|| black_box(normalize_disparity(i, &encoding))),
        );

        let disparity = normalize_disparity(&raw, &encoding).unwrap();

        group.bench_with_input(
            BenchmarkId::new("compute_depth_map", &parameter_string),
            &disparity,
            |b, i| b.iter(|| black_box(compute_depth_map(i, &calibration, &range))),
        );

        let depth_map = compute_depth_map(&disparity, &calibration, &range).unwrap();
        let detections = (0..16)
            .map(|i| {
                let x = (i * *width / 16) as f32;
                Detection2D {
                    bbox: BoundingBox::new(x, 0.0, x + *width as f32 / 16.0, *height as f32 / 2.0),
                    class_id: 0,
                    class_name: "object".to_string(),
                    confidence: 0.9,
                }
            })
            .collect::<Vec<_>>();
        let config = LocalizerConfig::default();

        group.bench_with_input(
            BenchmarkId::new("localize_objects", &parameter_string),
            &detections,
            |b, i| b.iter(|| black_box(localize_objects(i, &depth_map, &calibration, &config))),
        );
    }
    group.finish();
}

criterion_group!(benches, bench_depth);
criterion_main!(benches);
