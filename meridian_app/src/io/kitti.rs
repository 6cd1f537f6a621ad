// meridian_app/src/io/kitti.rs

//! KITTI Velodyne scans: a flat little-endian `f32` array of `x y z intensity`.

use meridian_core::error::DatasetError;
use meridian_core::types::PointCloud;
use nalgebra::Point3;
use std::path::Path;

const FLOATS_PER_POINT: usize = 4;
const BYTES_PER_POINT: usize = FLOATS_PER_POINT * 4;

/// Reads a `.bin` scan, dropping intensity and any non-finite point.
pub fn read_kitti_bin(path: &Path) -> Result<PointCloud, DatasetError> {
    let bytes = std::fs::read(path).map_err(|source| DatasetError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if bytes.len() % BYTES_PER_POINT != 0 {
        return Err(DatasetError::Format {
            path: path.to_path_buf(),
            reason: format!(
                "size {} is not a multiple of {} bytes",
                bytes.len(),
                BYTES_PER_POINT
            ),
        });
    }
    Ok(decode_points(&bytes))
}

fn decode_points(bytes: &[u8]) -> PointCloud {
    bytes
        .chunks_exact(BYTES_PER_POINT)
        .filter_map(|record| {
            let mut xyz = [0.0f64; 3];
            for (axis, chunk) in record.chunks_exact(4).take(3).enumerate() {
                // chunks_exact(4) always yields 4-byte slices
                let raw = [chunk[0], chunk[1], chunk[2], chunk[3]];
                xyz[axis] = f32::from_le_bytes(raw) as f64;
            }
            xyz.iter()
                .all(|v| v.is_finite())
                .then(|| Point3::new(xyz[0], xyz[1], xyz[2]))
        })
        .collect()
}

/// Writes `cloud` as a `.bin` scan with zero intensity.
pub fn write_kitti_bin(path: &Path, cloud: &PointCloud) -> Result<(), DatasetError> {
    let mut bytes = Vec::with_capacity(cloud.len() * BYTES_PER_POINT);
    for p in &cloud.points {
        for v in [p.x as f32, p.y as f32, p.z as f32, 0.0f32] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
    }
    std::fs::write(path, bytes).map_err(|source| DatasetError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("000000.bin");
        let cloud = PointCloud::new(vec![Point3::new(1.5, -2.0, 0.25), Point3::new(10.0, 0.0, 3.0)]);
        write_kitti_bin(&path, &cloud).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 32);

        let back = read_kitti_bin(&path).unwrap();
        assert_eq!(back.len(), 2);
        assert_abs_diff_eq!(back.points[0].y, -2.0);
        assert_abs_diff_eq!(back.points[1].z, 3.0);
    }

    #[test]
    fn test_truncated_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.bin");
        std::fs::write(&path, [0u8; 20]).unwrap();
        assert!(matches!(
            read_kitti_bin(&path),
            Err(DatasetError::Format { .. })
        ));
    }

    #[test]
    fn test_non_finite_points_are_dropped() {
        let mut bytes = Vec::new();
        for v in [f32::NAN, 0.0, 0.0, 0.0, 1.0, 2.0, 3.0, 0.5] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let cloud = decode_points(&bytes);
        assert_eq!(cloud.len(), 1);
        assert_eq!(cloud.points[0], Point3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        assert!(matches!(
            read_kitti_bin(Path::new("/no/such/scan.bin")),
            Err(DatasetError::Io { .. })
        ));
    }
}
