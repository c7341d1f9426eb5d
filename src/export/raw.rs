//! RAW dumps of field snapshots.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use clap::ValueEnum;
use thiserror::Error;

/// Errors that can occur during RAW export.
#[derive(Error, Debug)]
pub enum RawExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid value range: min ({0}) >= max ({1})")]
    InvalidRange(f32, f32),
    #[error("Component {component} out of range for a {components}-component field")]
    BadComponent { component: u32, components: u32 },
    #[error("RAW file holds {found} bytes, expected {expected}")]
    BadSize { expected: u64, found: u64 },
}

/// RAW export format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum RawFormat {
    /// Every component as 32-bit little-endian floats, interleaved per cell.
    #[default]
    R32Float,
    /// One component as 16-bit unsigned little-endian, normalised over a range.
    R16LittleEndian,
    /// One component as 16-bit unsigned big-endian, normalised over a range.
    R16BigEndian,
}

/// Which component and range an R16 export uses.
#[derive(Debug, Clone, Copy)]
pub struct R16Channel {
    pub component: u32,
    pub min_value: f32,
    pub max_value: f32,
}

/// Write a field snapshot. `channel` is only read by the R16 formats.
pub fn export_field_raw(
    data: &[f32],
    components: u32,
    path: &Path,
    format: RawFormat,
    channel: R16Channel,
) -> Result<(), RawExportError> {
    if format != RawFormat::R32Float {
        if channel.min_value >= channel.max_value {
            return Err(RawExportError::InvalidRange(channel.min_value, channel.max_value));
        }
        if channel.component >= components {
            return Err(RawExportError::BadComponent {
                component: channel.component,
                components,
            });
        }
    }

    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    let range = channel.max_value - channel.min_value;
    let quantize = |v: f32| (((v - channel.min_value) / range).clamp(0.0, 1.0) * 65535.0) as u16;
    let channel_values = || {
        data.iter()
            .skip(channel.component as usize)
            .step_by(components.max(1) as usize)
            .copied()
    };

    match format {
        RawFormat::R32Float => {
            for v in data {
                writer.write_all(&v.to_le_bytes())?;
            }
        }
        RawFormat::R16LittleEndian => {
            for v in channel_values() {
                writer.write_all(&quantize(v).to_le_bytes())?;
            }
        }
        RawFormat::R16BigEndian => {
            for v in channel_values() {
                writer.write_all(&quantize(v).to_be_bytes())?;
            }
        }
    }

    writer.flush()?;
    Ok(())
}

/// Read an R32 snapshot back, e.g. to seed a field with `FrameScheduler::upload_field`.
pub fn import_field_raw_r32(path: &Path, len: usize) -> Result<Vec<f32>, RawExportError> {
    let expected = (len * std::mem::size_of::<f32>()) as u64;
    let found = std::fs::metadata(path)?.len();
    if found != expected {
        return Err(RawExportError::BadSize { expected, found });
    }
    let mut bytes = Vec::with_capacity(expected as usize);
    File::open(path)?.read_to_end(&mut bytes)?;
    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

/// Returns the expected file size for a RAW export.
pub fn expected_file_size(resolution: u32, components: u32, format: RawFormat) -> u64 {
    let cells = (resolution as u64) * (resolution as u64);
    match format {
        RawFormat::R16LittleEndian | RawFormat::R16BigEndian => cells * 2,
        RawFormat::R32Float => cells * components as u64 * 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const FULL: R16Channel = R16Channel {
        component: 0,
        min_value: -1.0,
        max_value: 1.0,
    };

    #[test]
    fn test_r32_snapshot_roundtrip() {
        let data: Vec<f32> = (0..8 * 8 * 2).map(|i| i as f32 * 0.25 - 3.0).collect();
        let dir = tempdir().unwrap();
        let path = dir.path().join("velocity.raw");

        export_field_raw(&data, 2, &path, RawFormat::R32Float, FULL).unwrap();
        let metadata = std::fs::metadata(&path).unwrap();
        assert_eq!(metadata.len(), expected_file_size(8, 2, RawFormat::R32Float));
        assert_eq!(import_field_raw_r32(&path, data.len()).unwrap(), data);

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes[..4], data[0].to_le_bytes());
        assert_eq!(bytes[4..8], data[1].to_le_bytes());

        assert!(matches!(
            import_field_raw_r32(&path, data.len() + 1),
            Err(RawExportError::BadSize { .. })
        ));
    }

    #[test]
    fn test_r16_picks_one_component() {
        let data: Vec<f32> = (0..4 * 4).flat_map(|_| [1.0, -1.0, 0.0, 0.0]).collect();
        let dir = tempdir().unwrap();
        let path = dir.path().join("terrain.r16");
        let channel = R16Channel { component: 1, ..FULL };

        export_field_raw(&data, 4, &path, RawFormat::R16BigEndian, channel).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len() as u64, expected_file_size(4, 4, RawFormat::R16BigEndian));
        assert!(bytes.iter().all(|&b| b == 0));

        export_field_raw(&data, 4, &path, RawFormat::R16LittleEndian, FULL).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.iter().all(|&b| b == 0xff));
    }

    #[test]
    fn test_r16_validation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("x.raw");
        let bad_range = R16Channel { min_value: 1.0, max_value: 1.0, ..FULL };
        assert!(matches!(
            export_field_raw(&[0.0; 16], 1, &path, RawFormat::R16LittleEndian, bad_range),
            Err(RawExportError::InvalidRange(..))
        ));
        let bad_component = R16Channel { component: 3, ..FULL };
        assert!(matches!(
            export_field_raw(&[0.0; 16], 1, &path, RawFormat::R16LittleEndian, bad_component),
            Err(RawExportError::BadComponent { .. })
        ));
    }
}
