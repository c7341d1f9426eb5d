//! PNG export for display frames and field snapshots.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ImageBuffer, ImageEncoder, Luma};
use thiserror::Error;

use crate::scheduler::{DisplayError, DisplayFrame, DisplaySink};

/// Errors that can occur during PNG export.
#[derive(Error, Debug)]
pub enum PngExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Image encoding error: {0}")]
    Image(#[from] image::ImageError),
    #[error("Invalid value range: min ({0}) >= max ({1})")]
    InvalidRange(f32, f32),
    #[error("Field holds {found} floats, expected {expected}")]
    BadLength { expected: usize, found: usize },
}

/// Options for PNG export.
#[derive(Debug, Clone)]
pub struct PngExportOptions {
    /// PNG compression type.
    pub compression: CompressionType,
    /// PNG filter type.
    pub filter: FilterType,
}

impl Default for PngExportOptions {
    fn default() -> Self {
        Self {
            compression: CompressionType::Fast,
            filter: FilterType::Adaptive,
        }
    }
}

/// Writes a display frame as an 8-bit RGBA PNG, top row first.
pub fn export_frame_png(frame: &DisplayFrame, path: &Path, options: &PngExportOptions) -> Result<(), PngExportError> {
    let expected = (frame.width as usize) * (frame.height as usize) * 4;
    if frame.rgba.len() != expected {
        return Err(PngExportError::BadLength { expected, found: frame.rgba.len() });
    }

    // The grid stores its bottom row first.
    let row = frame.width as usize * 4;
    let flipped: Vec<u8> = frame.rgba.chunks(row).rev().flatten().copied().collect();

    let file = File::create(path)?;
    let writer = BufWriter::new(file);
    let encoder = PngEncoder::new_with_quality(writer, options.compression, options.filter);
    encoder.write_image(&flipped, frame.width, frame.height, image::ExtendedColorType::Rgba8)?;
    Ok(())
}

/// Export one component of a square field as a 16-bit grayscale PNG.
///
/// `data` holds `resolution * resolution * components` floats, row-major, bottom row first.
pub fn export_field_png(
    resolution: u32,
    components: u32,
    component: u32,
    data: &[f32],
    path: &Path,
    min_value: f32,
    max_value: f32,
) -> Result<(), PngExportError> {
    if min_value >= max_value {
        return Err(PngExportError::InvalidRange(min_value, max_value));
    }
    let expected = (resolution as usize) * (resolution as usize) * components as usize;
    if data.len() != expected || component >= components {
        return Err(PngExportError::BadLength { expected, found: data.len() });
    }

    let range = max_value - min_value;
    let mut img: ImageBuffer<Luma<u16>, Vec<u16>> = ImageBuffer::new(resolution, resolution);
    for y in 0..resolution {
        for x in 0..resolution {
            let v = data[((y * resolution + x) * components + component) as usize];
            // Normalize to [0, 1] then scale to u16
            let normalized = ((v - min_value) / range).clamp(0.0, 1.0);
            let value = (normalized * 65535.0) as u16;
            img.put_pixel(x, resolution - 1 - y, Luma([value]));
        }
    }

    let file = File::create(path)?;
    let writer = BufWriter::new(file);
    let options = PngExportOptions::default();
    let encoder = PngEncoder::new_with_quality(writer, options.compression, options.filter);
    let byte_slice: &[u8] = bytemuck::cast_slice(img.as_raw());
    encoder.write_image(byte_slice, resolution, resolution, image::ExtendedColorType::L16)?;
    Ok(())
}

/// Display sink writing every `every`-th frame to `{prefix}_{tick:06}.png`.
#[derive(Debug)]
pub struct PngFrameSink {
    dir: PathBuf,
    prefix: String,
    every: u64,
    options: PngExportOptions,
    seen: u64,
    written: Vec<PathBuf>,
}

impl PngFrameSink {
    pub fn new(dir: &Path, prefix: &str, every: u64) -> Result<Self, PngExportError> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            prefix: prefix.to_string(),
            every: every.max(1),
            options: PngExportOptions::default(),
            seen: 0,
            written: Vec::new(),
        })
    }

    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }
}

impl DisplaySink for PngFrameSink {
    fn present(&mut self, frame: &DisplayFrame) -> Result<(), DisplayError> {
        let index = self.seen;
        self.seen += 1;
        if index % self.every != 0 {
            return Ok(());
        }

        let path = self.dir.join(format!("{}_{:06}.png", self.prefix, frame.tick));
        export_frame_png(frame, &path, &self.options).map_err(|e| match e {
            PngExportError::Io(io) => DisplayError::Io(io),
            other => DisplayError::Encode {
                tick: frame.tick,
                reason: other.to_string(),
            },
        })?;
        log::debug!("Wrote frame {} to {}", frame.tick, path.display());
        self.written.push(path);
        Ok(())
    }
}
