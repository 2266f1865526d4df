use argh::FromArgs;
use std::{path::PathBuf, sync::Arc};

use stereoscope::{
    image::{Image, ImageSize},
    k3d::{
        io::ply::write_ply_ascii, pointcloud::crop_around_objects, BoundingBox,
        CalibrationParameters, Detection2D,
    },
    pipeline::{
        DetectorError, FrameOptions, MatcherError, ObjectDetector, PipelineConfig, RawDisparity,
        StereoMatcher, StereoPipeline,
    },
};

#[derive(FromArgs)]
/// Run the stereo pipeline on a synthetic scene: a box in front of a flat wall
struct Args {
    /// depth of the wall in meters
    #[argh(option, default = "5.0")]
    depth: f64,

    /// focal length in pixels
    #[argh(option, default = "700.0")]
    focal: f64,

    /// stereo baseline in meters
    #[argh(option, default = "0.12")]
    baseline: f64,

    /// image width in pixels
    #[argh(option, default = "640")]
    width: usize,

    /// image height in pixels
    #[argh(option, default = "480")]
    height: usize,

    /// path of the PLY file to write the point cloud to
    #[argh(option, short = 'o')]
    output: Option<PathBuf>,

    /// path of a JSON pipeline configuration
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,
}

/// Renders the ground truth disparity of the scene in 1/16 pixel fixed point, leaving the
/// left border without match as a block matcher would.
struct SyntheticMatcher {
    disparity: Image<i16, 1>,
}

impl SyntheticMatcher {
    fn new(
        calibration: &CalibrationParameters,
        wall_depth: f64,
        object: &BoundingBox,
        object_depth: f64,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let size = calibration.image_size;
        let to_fixed = |depth: f64| (calibration.focal_baseline() / depth * 16.0).round() as i16;
        let border = (calibration.focal_baseline() / object_depth).ceil() as usize;

        let data = (0..size.height)
            .flat_map(|y| {
                (0..size.width).map(move |x| {
                    let (u, v) = (x as f32 + 0.5, y as f32 + 0.5);
                    if x < border {
                        -16
                    } else if u >= object.x_min
                        && u < object.x_max
                        && v >= object.y_min
                        && v < object.y_max
                    {
                        to_fixed(object_depth)
                    } else {
                        to_fixed(wall_depth)
                    }
                })
            })
            .collect();

        Ok(Self {
            disparity: Image::new(size, data)?,
        })
    }
}

impl StereoMatcher for SyntheticMatcher {
    fn compute(
        &self,
        left: &Image<u8, 3>,
        right: &Image<u8, 3>,
    ) -> Result<RawDisparity, MatcherError> {
        if left.size() != right.size() {
            return Err(MatcherError::SizeMismatch(left.size(), right.size()));
        }
        Ok(RawDisparity::I16(self.disparity.clone()))
    }
}

/// Always reports the same detections.
struct ScriptedDetector {
    detections: Vec<Detection2D>,
}

impl ObjectDetector for ScriptedDetector {
    fn detect(&self, _image: &Image<u8, 3>) -> Result<Vec<Detection2D>, DetectorError> {
        Ok(self.detections.clone())
    }
}

fn checkerboard(size: ImageSize) -> Result<Image<u8, 3>, Box<dyn std::error::Error>> {
    let data = (0..size.height)
        .flat_map(|y| {
            (0..size.width).flat_map(move |x| {
                let c = if (x / 16 + y / 16) % 2 == 0 { 200 } else { 60 };
                [c, (x % 256) as u8, (y % 256) as u8]
            })
        })
        .collect();
    Ok(Image::new(size, data)?)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: Args = argh::from_env();

    let config = match &args.config {
        Some(path) => PipelineConfig::from_json_file(path)?,
        None => PipelineConfig::default(),
    };

    let size = ImageSize {
        width: args.width,
        height: args.height,
    };
    let calibration = Arc::new(CalibrationParameters::new(
        args.focal,
        args.focal,
        args.width as f64 / 2.0,
        args.height as f64 / 2.0,
        args.baseline,
        size,
    )?);

    // a box at 60% of the wall distance, centered in the image
    let (w, h) = (args.width as f32, args.height as f32);
    let object_box = BoundingBox::new(0.35 * w, 0.3 * h, 0.65 * w, 0.7 * h);
    let object_depth = 0.6 * args.depth;

    let matcher = SyntheticMatcher::new(&calibration, args.depth, &object_box, object_depth)?;
    let detector = ScriptedDetector {
        detections: vec![
            Detection2D {
                bbox: object_box,
                class_id: 1,
                class_name: "box".to_string(),
                confidence: 0.92,
            },
            Detection2D {
                bbox: BoundingBox::new(0.75 * w, 0.1 * h, 0.95 * w, 0.3 * h),
                class_id: 2,
                class_name: "poster".to_string(),
                confidence: 0.61,
            },
            Detection2D {
                bbox: BoundingBox::new(w + 10.0, 0.0, w + 50.0, 40.0),
                class_id: 3,
                class_name: "ghost".to_string(),
                confidence: 0.2,
            },
        ],
    };

    let pipeline = StereoPipeline::new(
        calibration.clone(),
        Box::new(matcher),
        Box::new(detector),
        config,
    )?;

    let left = checkerboard(size)?;
    let right = left.clone();
    let options = FrameOptions {
        point_cloud: true,
        colored: true,
    };
    let result = pipeline.process_frame(0, &left, &right, &options)?;

    let stats = result.depth_stats();
    println!(
        "depth: {}/{} valid ({:.1}%), {} rejected, median {:?} m",
        stats.valid_pixels,
        stats.total_pixels,
        stats.valid_percentage,
        stats.rejected_pixels,
        stats.median_depth
    );

    for object in result.objects() {
        println!(
            "{:>8} {:?} position {:?} distance {:?}",
            object.detection().class_name,
            object.status(),
            object.position(),
            object.distance()
        );
    }
    println!("{}", serde_json::to_string_pretty(result.objects())?);

    let timings = result.timings();
    println!(
        "timings: matching {:?}, depth {:?}, detection {:?}, localization {:?}, point cloud {:?}, total {:?}",
        timings.matching,
        timings.depth,
        timings.detection,
        timings.localization,
        timings.point_cloud,
        timings.total
    );

    if let Some(cloud) = result.point_cloud() {
        println!("point cloud: #{} points", cloud.len());

        for crop in crop_around_objects(cloud, result.objects(), 0.25) {
            println!("  {} #{} points", crop.class_name, crop.cloud.len());
        }

        if let Some(path) = &args.output {
            write_ply_ascii(path, cloud)?;
            log::info!("point cloud written to {}", path.display());
        }
    }

    Ok(())
}
