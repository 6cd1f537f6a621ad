// meridian_app/src/io/pcd.rs

//! Point Cloud Data files. Reads `ascii` and `binary` bodies; only the
//! `x y z` fields are kept. Writes `binary` with `x y z` as `F 4`.

use meridian_core::error::DatasetError;
use meridian_core::types::PointCloud;
use nalgebra::Point3;
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;

const MAX_POINT_STEP: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PcdData {
    Ascii,
    Binary,
}

#[derive(Debug, Clone, Copy)]
struct PcdField {
    /// Byte offset inside a binary record.
    offset: usize,
    /// Column index inside an ascii record.
    column: usize,
    size: usize,
    kind: char,
}

#[derive(Debug)]
struct PcdLayout {
    fields: HashMap<String, PcdField>,
    point_step: usize,
    num_points: usize,
    data: PcdData,
}

impl PcdLayout {
    fn xyz(&self) -> Result<[PcdField; 3], String> {
        let get = |name: &str| {
            self.fields
                .get(name)
                .copied()
                .ok_or_else(|| format!("missing field '{name}'"))
        };
        Ok([get("x")?, get("y")?, get("z")?])
    }
}

fn parse_layout<R: BufRead>(reader: &mut R) -> Result<PcdLayout, String> {
    let mut names: Vec<String> = Vec::new();
    let mut sizes: Vec<usize> = Vec::new();
    let mut types: Vec<char> = Vec::new();
    let mut counts: Vec<usize> = Vec::new();
    let mut points: Option<usize> = None;
    let mut width_height: Option<usize> = None;

    let data = loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).map_err(|e| e.to_string())?;
        if n == 0 {
            return Err("header ends before DATA".into());
        }
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut it = line.split_whitespace();
        let parse_usize = |v: &str| v.parse::<usize>().map_err(|_| format!("bad number '{v}'"));
        match it.next() {
            Some("FIELDS") => names = it.map(String::from).collect(),
            Some("SIZE") => sizes = it.map(parse_usize).collect::<Result<_, _>>()?,
            Some("TYPE") => {
                types = it
                    .map(|v| v.chars().next().ok_or_else(|| "empty TYPE".to_string()))
                    .collect::<Result<_, _>>()?
            }
            Some("COUNT") => counts = it.map(parse_usize).collect::<Result<_, _>>()?,
            Some("POINTS") => {
                points = Some(parse_usize(it.next().ok_or("POINTS without value")?)?)
            }
            Some("WIDTH") => {
                width_height = Some(parse_usize(it.next().ok_or("WIDTH without value")?)?)
            }
            Some("DATA") => match it.next() {
                Some("ascii") => break PcdData::Ascii,
                Some("binary") => break PcdData::Binary,
                other => return Err(format!("unsupported DATA '{}'", other.unwrap_or(""))),
            },
            _ => {}
        }
    };

    if names.is_empty() || sizes.len() != names.len() || types.len() != names.len() {
        return Err("FIELDS, SIZE and TYPE disagree".into());
    }
    if !counts.is_empty() && counts.len() != names.len() {
        return Err("COUNT disagrees with FIELDS".into());
    }

    let mut fields = HashMap::new();
    let mut offset = 0usize;
    let mut column = 0usize;
    for (i, name) in names.iter().enumerate() {
        let count = counts.get(i).copied().unwrap_or(1);
        let field = PcdField {
            offset,
            column,
            size: sizes[i],
            kind: types[i],
        };
        if matches!(name.as_str(), "x" | "y" | "z")
            && !(field.kind == 'F' && (field.size == 4 || field.size == 8) && count == 1)
        {
            return Err(format!("field '{name}' must be a single F 4 or F 8"));
        }
        offset = sizes[i]
            .checked_mul(count)
            .and_then(|bytes| offset.checked_add(bytes))
            .ok_or("record size overflow")?;
        if offset > MAX_POINT_STEP {
            return Err("record too large".into());
        }
        column += count;
        if fields.insert(name.clone(), field).is_some() {
            return Err(format!("duplicate field '{name}'"));
        }
    }

    Ok(PcdLayout {
        fields,
        point_step: offset,
        num_points: points.or(width_height).unwrap_or(0),
        data,
    })
}

fn read_float(record: &[u8], field: &PcdField) -> Option<f64> {
    let bytes = record.get(field.offset..field.offset + field.size)?;
    match field.size {
        4 => Some(f32::from_le_bytes(bytes.try_into().ok()?) as f64),
        8 => Some(f64::from_le_bytes(bytes.try_into().ok()?)),
        _ => None,
    }
}

/// Reads a `.pcd` file into a cloud. Non-finite points are dropped.
pub fn read_pcd(path: &Path) -> Result<PointCloud, DatasetError> {
    let file = std::fs::File::open(path).map_err(|source| DatasetError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let format_err = |reason: String| DatasetError::Format {
        path: path.to_path_buf(),
        reason,
    };

    let mut reader = BufReader::new(file);
    let layout = parse_layout(&mut reader).map_err(format_err)?;
    let [fx, fy, fz] = layout.xyz().map_err(format_err)?;
    let mut points = Vec::with_capacity(layout.num_points);

    match layout.data {
        PcdData::Ascii => {
            for (lineno, line) in reader.lines().enumerate() {
                let line = line.map_err(|e| format_err(e.to_string()))?;
                let tokens: Vec<&str> = line.split_whitespace().collect();
                if tokens.is_empty() {
                    continue;
                }
                let value = |f: &PcdField| -> Result<f64, DatasetError> {
                    tokens
                        .get(f.column)
                        .and_then(|t| t.parse::<f64>().ok())
                        .ok_or_else(|| format_err(format!("bad point on data line {}", lineno + 1)))
                };
                points.push(Point3::new(value(&fx)?, value(&fy)?, value(&fz)?));
            }
        }
        PcdData::Binary => {
            let mut body = Vec::new();
            reader
                .read_to_end(&mut body)
                .map_err(|e| format_err(e.to_string()))?;
            let expected = layout.num_points * layout.point_step;
            if body.len() < expected {
                return Err(format_err(format!(
                    "body has {} bytes, header promises {}",
                    body.len(),
                    expected
                )));
            }
            for record in body[..expected].chunks_exact(layout.point_step) {
                let (Some(x), Some(y), Some(z)) = (
                    read_float(record, &fx),
                    read_float(record, &fy),
                    read_float(record, &fz),
                ) else {
                    return Err(format_err("truncated record".into()));
                };
                points.push(Point3::new(x, y, z));
            }
        }
    }

    points.retain(|p| p.coords.iter().all(|v| v.is_finite()));
    Ok(PointCloud::new(points))
}

/// Writes `cloud` as a binary PCD with `x y z` float fields.
pub fn write_pcd(path: &Path, cloud: &PointCloud) -> Result<(), DatasetError> {
    let io_err = |source| DatasetError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = std::fs::File::create(path).map_err(io_err)?;
    let mut out = std::io::BufWriter::new(file);
    let n = cloud.len();
    write!(
        out,
        "# .PCD v0.7 - Point Cloud Data file format\n\
         VERSION 0.7\n\
         FIELDS x y z\n\
         SIZE 4 4 4\n\
         TYPE F F F\n\
         COUNT 1 1 1\n\
         WIDTH {n}\n\
         HEIGHT 1\n\
         VIEWPOINT 0 0 0 1 0 0 0\n\
         POINTS {n}\n\
         DATA binary\n"
    )
    .map_err(io_err)?;
    for p in &cloud.points {
        for v in [p.x as f32, p.y as f32, p.z as f32] {
            out.write_all(&v.to_le_bytes()).map_err(io_err)?;
        }
    }
    out.flush().map_err(io_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_binary_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.pcd");
        let cloud = PointCloud::new(vec![Point3::new(1.0, 2.0, 3.0), Point3::new(-4.5, 0.0, 0.5)]);
        write_pcd(&path, &cloud).unwrap();

        let back = read_pcd(&path).unwrap();
        assert_eq!(back.len(), 2);
        assert_abs_diff_eq!(back.points[1].x, -4.5);
    }

    #[test]
    fn test_ascii_with_extra_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ascii.pcd");
        std::fs::write(
            &path,
            "VERSION .7\nFIELDS x y z intensity\nSIZE 4 4 4 4\nTYPE F F F F\nCOUNT 1 1 1 1\n\
             WIDTH 2\nHEIGHT 1\nPOINTS 2\nDATA ascii\n1 2 3 0.5\n4 5 6 0.1\n",
        )
        .unwrap();

        let cloud = read_pcd(&path).unwrap();
        assert_eq!(cloud.len(), 2);
        assert_eq!(cloud.points[1], Point3::new(4.0, 5.0, 6.0));
    }

    #[test]
    fn test_binary_with_leading_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offset.pcd");
        let mut bytes =
            b"FIELDS rgb x y z\nSIZE 4 4 4 4\nTYPE U F F F\nPOINTS 1\nDATA binary\n".to_vec();
        bytes.extend_from_slice(&7u32.to_le_bytes());
        for v in [1.0f32, 2.0, 3.0] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        std::fs::write(&path, bytes).unwrap();

        let cloud = read_pcd(&path).unwrap();
        assert_eq!(cloud.points, vec![Point3::new(1.0, 2.0, 3.0)]);
    }

    #[test]
    fn test_compressed_body_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.pcd");
        std::fs::write(
            &path,
            "FIELDS x y z\nSIZE 4 4 4\nTYPE F F F\nPOINTS 0\nDATA binary_compressed\n",
        )
        .unwrap();
        assert!(matches!(read_pcd(&path), Err(DatasetError::Format { .. })));
    }

    #[test]
    fn test_missing_z_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("xy.pcd");
        std::fs::write(&path, "FIELDS x y\nSIZE 4 4\nTYPE F F\nPOINTS 1\nDATA ascii\n1 2\n")
            .unwrap();
        assert!(matches!(read_pcd(&path), Err(DatasetError::Format { .. })));
    }
}
