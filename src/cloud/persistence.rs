//! Point cloud files.
//!
//! Two formats, both one record per pixel in row-major order:
//! - CSV with an `x,y,z,r,g,b` header; invalid points and missing colours
//!   are empty fields
//! - flat little endian f32 records of 3 (xyz) or 6 (xyz + rgb in 0..1)
//!   values; invalid points and missing colours are NaN
//!
//! Neither format stores the frame shape, so readers are told the expected
//! width and height and reject anything else.

use super::point::{Point3D, PointCloud};
use crate::error::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Cursor, Read, Write};
use std::path::Path;

#[derive(Debug, Serialize, Deserialize)]
struct PointRecord {
    x: Option<f32>,
    y: Option<f32>,
    z: Option<f32>,
    r: Option<u8>,
    g: Option<u8>,
    b: Option<u8>,
}

impl From<&Point3D> for PointRecord {
    fn from(point: &Point3D) -> Self {
        let valid = point.is_valid();
        let [r, g, b] = match point.color {
            Some([r, g, b]) if valid => [Some(r), Some(g), Some(b)],
            _ => [None; 3],
        };
        Self {
            x: valid.then_some(point.x),
            y: valid.then_some(point.y),
            z: valid.then_some(point.z),
            r,
            g,
            b,
        }
    }
}

impl From<PointRecord> for Point3D {
    fn from(record: PointRecord) -> Self {
        let (Some(x), Some(y), Some(z)) = (record.x, record.y, record.z) else {
            return Point3D::INVALID;
        };
        let point = Point3D::new(x, y, z);
        match (record.r, record.g, record.b) {
            (Some(r), Some(g), Some(b)) => point.with_color([r, g, b]),
            _ => point,
        }
    }
}

pub fn write_csv<W: Write>(cloud: &PointCloud, writer: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(writer);
    for point in cloud.iter() {
        writer.serialize(PointRecord::from(point))?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_csv<R: Read>(reader: R, width: usize, height: usize) -> Result<PointCloud> {
    let mut reader = csv::Reader::from_reader(reader);
    let mut points = Vec::with_capacity(width * height);
    for result in reader.deserialize() {
        let record: PointRecord = result?;
        points.push(Point3D::from(record));
    }
    let count = points.len();
    PointCloud::from_points(width, height, points).ok_or_else(|| {
        Error::InvalidCloudFile(format!(
            "{} records for a {}x{} cloud",
            count, width, height
        ))
    })
}

/// Write flat f32 records, with colour when `with_color` is set
pub fn write_binary<W: Write>(cloud: &PointCloud, writer: W, with_color: bool) -> Result<()> {
    let mut writer = BufWriter::new(writer);
    for point in cloud.iter() {
        for value in [point.x, point.y, point.z] {
            writer.write_f32::<LittleEndian>(if point.is_valid() { value } else { f32::NAN })?;
        }
        if with_color {
            let channels = match point.color {
                Some(rgb) if point.is_valid() => rgb.map(|c| c as f32 / 255.0),
                _ => [f32::NAN; 3],
            };
            for value in channels {
                writer.write_f32::<LittleEndian>(value)?;
            }
        }
    }
    writer.flush()?;
    Ok(())
}

pub fn read_binary<R: Read>(mut reader: R, width: usize, height: usize) -> Result<PointCloud> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;

    let pixels = width * height;
    let floats_per_point = match bytes.len() {
        n if n == pixels * 3 * 4 => 3,
        n if n == pixels * 6 * 4 => 6,
        n => {
            return Err(Error::InvalidCloudFile(format!(
                "{} bytes is neither 3 nor 6 floats per pixel for {}x{}",
                n, width, height
            )))
        }
    };

    let mut values = vec![0.0f32; pixels * floats_per_point];
    Cursor::new(bytes).read_f32_into::<LittleEndian>(&mut values)?;

    let points = values
        .chunks_exact(floats_per_point)
        .map(|record| {
            let point = Point3D::new(record[0], record[1], record[2]);
            if !point.is_valid() {
                return Point3D::INVALID;
            }
            match record.get(3..6) {
                Some(rgb) if rgb.iter().all(|c| c.is_finite()) => point.with_color([
                    unit_to_byte(rgb[0]),
                    unit_to_byte(rgb[1]),
                    unit_to_byte(rgb[2]),
                ]),
                _ => point,
            }
        })
        .collect();

    PointCloud::from_points(width, height, points)
        .ok_or_else(|| Error::InvalidCloudFile("record count mismatch".into()))
}

fn unit_to_byte(value: f32) -> u8 {
    (value * 255.0).round().clamp(0.0, 255.0) as u8
}

/// Export to `path`, choosing the format from the extension (`.csv` or binary)
pub fn export_cloud<P: AsRef<Path>>(cloud: &PointCloud, path: P) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path)?;
    if is_csv(path) {
        write_csv(cloud, file)?;
    } else {
        write_binary(cloud, file, true)?;
    }
    log::info!("Exported {} valid points to {}", cloud.valid_count(), path.display());
    Ok(())
}

/// Import from `path`, choosing the format from the extension
pub fn import_cloud<P: AsRef<Path>>(path: P, width: usize, height: usize) -> Result<PointCloud> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);
    let cloud = if is_csv(path) {
        read_csv(reader, width, height)?
    } else {
        read_binary(reader, width, height)?
    };
    log::info!("Imported {} valid points from {}", cloud.valid_count(), path.display());
    Ok(cloud)
}

fn is_csv(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_cloud() -> PointCloud {
        let points = vec![
            Point3D::new(0.5, -1.0, 2.0).with_color([255, 0, 128]),
            Point3D::INVALID,
            Point3D::new(-0.25, 0.75, 3.5),
            Point3D::new(1.0, 1.0, 1.0).with_color([0, 0, 0]),
        ];
        PointCloud::from_points(2, 2, points).unwrap()
    }

    #[test]
    fn test_csv_keeps_invalid_and_colour() {
        let mut buffer = Vec::new();
        write_csv(&sample_cloud(), &mut buffer).unwrap();
        let text = String::from_utf8(buffer.clone()).unwrap();
        assert!(text.starts_with("x,y,z,r,g,b"));
        assert!(text.contains("\n,,,,,\n"));

        let cloud = read_csv(buffer.as_slice(), 2, 2).unwrap();
        let expected = sample_cloud();
        for (decoded, original) in cloud.iter().zip(expected.iter()) {
            assert_eq!(decoded.is_valid(), original.is_valid());
            if original.is_valid() {
                assert_eq!(decoded, original);
            }
        }
        assert_eq!(cloud.get(0, 0).unwrap().color, Some([255, 0, 128]));
        assert_eq!(cloud.get(0, 1).unwrap().color, None);
    }

    #[test]
    fn test_csv_shape_mismatch() {
        let mut buffer = Vec::new();
        write_csv(&sample_cloud(), &mut buffer).unwrap();
        assert!(matches!(
            read_csv(buffer.as_slice(), 3, 3),
            Err(Error::InvalidCloudFile(_))
        ));
    }

    #[test]
    fn test_binary_with_and_without_colour() {
        let mut with_color = Vec::new();
        write_binary(&sample_cloud(), &mut with_color, true).unwrap();
        assert_eq!(with_color.len(), 4 * 6 * 4);
        let cloud = read_binary(with_color.as_slice(), 2, 2).unwrap();
        assert_eq!(cloud.get(0, 0).unwrap().color, Some([255, 0, 128]));
        assert_eq!(cloud.get(0, 1).unwrap().color, None);
        assert!(!cloud.get(1, 0).unwrap().is_valid());

        let mut plain = Vec::new();
        write_binary(&sample_cloud(), &mut plain, false).unwrap();
        assert_eq!(plain.len(), 4 * 3 * 4);
        let cloud = read_binary(plain.as_slice(), 2, 2).unwrap();
        let point = cloud.get(0, 1).unwrap();
        assert_eq!((point.x, point.y, point.z), (-0.25, 0.75, 3.5));
        assert_eq!(cloud.get(0, 0).unwrap().color, None);
    }

    #[test]
    fn test_binary_rejects_wrong_size() {
        assert!(matches!(
            read_binary(&[0u8; 10][..], 2, 2),
            Err(Error::InvalidCloudFile(_))
        ));
    }

    #[test]
    fn test_file_round_trip_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["cloud.csv", "cloud.bin"] {
            let path = dir.path().join(name);
            export_cloud(&sample_cloud(), &path).unwrap();
            let cloud = import_cloud(&path, 2, 2).unwrap();
            assert_eq!(cloud.valid_count(), 3);
            assert_eq!(cloud.get(1, 1).unwrap().z, 1.0);
        }
    }
}
