//! Export of display frames and field snapshots.
//!
//! 8-bit RGBA PNG for frames, 16-bit grayscale PNG for a single field component, and
//! RAW dumps for reloading or external tools.

mod png;
mod raw;

pub use png::{export_field_png, export_frame_png, PngExportError, PngExportOptions, PngFrameSink};
pub use raw::{
    expected_file_size, export_field_raw, import_field_raw_r32, R16Channel, RawExportError, RawFormat,
};
