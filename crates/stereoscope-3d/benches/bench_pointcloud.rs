use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use stereoscope_3d::{
    depth_to_pointcloud, CalibrationParameters, DepthMap, DepthRange, PointCloudConfig, VoxelGrid,
};
use stereoscope_image::Image;

fn bench_pointcloud(c: &mut Criterion) {
    let mut group = c.benchmark_group("PointCloud");

    for (width, height) in [(320, 240), (640, 480), (1280, 720)].iter() {
        group.throughput(criterion::Throughput::Elements((*width * *height) as u64));

        let parameter_string = format!("{}x{}", width, height);

        // slanted plane between 2 and 10 meters
        let depth = (0..*height)
            .flat_map(|y| (0..*width).map(move |_| 2.0 + 8.0 * y as f32 / *height as f32))
            .collect();
        let depth = Image::new([*width, *height].into(), depth).unwrap();
        let depth_map = DepthMap::from_depth(depth, &DepthRange::default()).unwrap();
        let color = Image::<u8, 3>::from_size_val([*width, *height].into(), 127).unwrap();
        let calibration = CalibrationParameters::new(
            700.0,
            700.0,
            *width as f64 / 2.0,
            *height as f64 / 2.0,
            0.12,
            [*width, *height].into(),
        )
        .unwrap();

        group.bench_with_input(
            BenchmarkId::new("depth_to_pointcloud", &parameter_string),
            &depth_map,
            |b, i| b.iter(|| black_box(depth_to_pointcloud(i, &calibration, Some(&color)))),
        );

        let cloud = depth_to_pointcloud(&depth_map, &calibration, Some(&color)).unwrap();
        let voxel_grid = VoxelGrid::from_config(&PointCloudConfig::default()).unwrap();

        group.bench_with_input(
            BenchmarkId::new("voxel_downsample", &parameter_string),
            &cloud,
            |b, i| b.iter(|| black_box(voxel_grid.downsample(i))),
        );
    }
    group.finish();
}

criterion_group!(benches, bench_pointcloud);
criterion_main!(benches);
