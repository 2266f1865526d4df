use std::io::{BufRead, BufWriter, Write};
use std::path::Path;

use crate::pointcloud::PointCloud;

/// Error types for the PLY module.
#[derive(Debug, thiserror::Error)]
pub enum PlyError {
    /// Failed to read or write the PLY file
    #[error("Failed to access PLY file")]
    Io(#[from] std::io::Error),

    /// The header is not an ASCII PLY vertex header
    #[error("Unsupported PLY header: {0}")]
    UnsupportedHeader(String),

    /// A vertex line could not be parsed
    #[error("Malformed PLY vertex at line {0}")]
    MalformedVertex(usize),
}

/// Write a point cloud as an ASCII PLY file.
///
/// Vertices carry `x y z` as `float` and, when the cloud has colors, `red green blue` as
/// `uchar`.
///
/// # Arguments
///
/// * `path` - The path of the file to create.
/// * `pointcloud` - The point cloud to write.
pub fn write_ply_ascii(path: impl AsRef<Path>, pointcloud: &PointCloud) -> Result<(), PlyError> {
    let file = std::fs::File::create(path)?;
    let mut writer = BufWriter::new(file);
    write_ply_ascii_to(&mut writer, pointcloud)?;
    writer.flush()?;
    Ok(())
}

/// Write a point cloud as ASCII PLY into any writer.
pub fn write_ply_ascii_to<W: Write>(
    writer: &mut W,
    pointcloud: &PointCloud,
) -> Result<(), PlyError> {
    writeln!(writer, "ply")?;
    writeln!(writer, "format ascii 1.0")?;
    writeln!(writer, "element vertex {}", pointcloud.len())?;
    writeln!(writer, "property float x")?;
    writeln!(writer, "property float y")?;
    writeln!(writer, "property float z")?;
    if pointcloud.colors().is_some() {
        writeln!(writer, "property uchar red")?;
        writeln!(writer, "property uchar green")?;
        writeln!(writer, "property uchar blue")?;
    }
    writeln!(writer, "end_header")?;

    match pointcloud.colors() {
        Some(colors) => {
            for (p, c) in pointcloud.points().iter().zip(colors) {
                writeln!(
                    writer,
                    "{} {} {} {} {} {}",
                    p[0] as f32, p[1] as f32, p[2] as f32, c[0], c[1], c[2]
                )?;
            }
        }
        None => {
            for p in pointcloud.points() {
                writeln!(writer, "{} {} {}", p[0] as f32, p[1] as f32, p[2] as f32)?;
            }
        }
    }

    Ok(())
}

/// Read an ASCII PLY file written by [`write_ply_ascii`].
pub fn read_ply_ascii(path: impl AsRef<Path>) -> Result<PointCloud, PlyError> {
    let file = std::fs::File::open(path)?;
    let mut lines = std::io::BufReader::new(file).lines().enumerate();

    let mut is_ascii = false;
    let mut vertex_count = None;
    let mut num_properties = 0;

    for (_, line) in lines.by_ref() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed == "end_header" {
            break;
        }
        if trimmed.starts_with("format") {
            is_ascii = trimmed.starts_with("format ascii");
        } else if let Some(count) = trimmed.strip_prefix("element vertex") {
            vertex_count = count.trim().parse::<usize>().ok();
        } else if trimmed.starts_with("property") {
            num_properties += 1;
        }
    }

    if !is_ascii {
        return Err(PlyError::UnsupportedHeader(
            "expected ascii format".to_string(),
        ));
    }
    let vertex_count = vertex_count
        .ok_or_else(|| PlyError::UnsupportedHeader("missing vertex element".to_string()))?;
    let has_colors = match num_properties {
        3 => false,
        6 => true,
        n => return Err(PlyError::UnsupportedHeader(format!("{n} vertex properties"))),
    };

    let mut points = Vec::with_capacity(vertex_count);
    let mut colors = Vec::with_capacity(if has_colors { vertex_count } else { 0 });

    for (line_idx, line) in lines.take(vertex_count) {
        let line = line?;
        let values = line.split_whitespace().collect::<Vec<_>>();
        if values.len() != num_properties {
            return Err(PlyError::MalformedVertex(line_idx + 1));
        }

        let mut point = [0.0; 3];
        for (dst, src) in point.iter_mut().zip(&values[..3]) {
            *dst = src
                .parse::<f32>()
                .map_err(|_| PlyError::MalformedVertex(line_idx + 1))? as f64;
        }
        points.push(point);

        if has_colors {
            let mut color = [0u8; 3];
            for (dst, src) in color.iter_mut().zip(&values[3..]) {
                *dst = src
                    .parse()
                    .map_err(|_| PlyError::MalformedVertex(line_idx + 1))?;
            }
            colors.push(color);
        }
    }

    if points.len() != vertex_count {
        return Err(PlyError::MalformedVertex(points.len() + 1));
    }

    Ok(PointCloud::new(points, has_colors.then_some(colors)))
}
