//! Strip output sinks. `compositor::composite` is generic over
//! [`StripSink`] so the renderer can be driven against an in-memory
//! buffer in tests without touching the filesystem.

use std::io::Write;

use image::codecs::tiff::TiffEncoder;
use image::{ExtendedColorType, ImageEncoder};

use crate::error::GerberError;

pub trait StripSink {
    /// Receives the next run of packed rows, top to bottom.
    fn write_strip(&mut self, rows: &[Vec<u8>]) -> Result<(), GerberError>;
    /// Called once after the last strip. Idempotent implementations may
    /// treat a second call as a no-op.
    fn finish(&mut self) -> Result<(), GerberError>;
}

/// Buffers every strip handed to it and encodes a single-page 1-bit TIFF on
/// `finish()` via `image`'s encoder. The crate's high-level `TiffEncoder`
/// doesn't expose per-tag control over compression or resolution, so those
/// come out at the crate's own defaults rather than CCITT/custom DPI tags
/// (noted in DESIGN.md).
///
/// Our compositor packs "dark" ink as bit 1. `image`'s `L1` is plain
/// grayscale luminance, where 1 means white — the opposite sense — so every
/// byte is inverted here at the sink boundary rather than threading the
/// flip back through the painter.
pub struct TiffStripSink<W: Write> {
    writer: Option<W>,
    width: u32,
    height: u32,
    bytes_per_row: usize,
    buffer: Vec<u8>,
}

impl<W: Write> TiffStripSink<W> {
    pub fn new(writer: W, width: u32, height: u32) -> Self {
        let bytes_per_row = width as usize / 8;
        TiffStripSink {
            writer: Some(writer),
            width,
            height,
            bytes_per_row,
            buffer: Vec::with_capacity(bytes_per_row * height as usize),
        }
    }
}

impl<W: Write> StripSink for TiffStripSink<W> {
    fn write_strip(&mut self, rows: &[Vec<u8>]) -> Result<(), GerberError> {
        for row in rows {
            debug_assert_eq!(row.len(), self.bytes_per_row);
            self.buffer.extend_from_slice(row);
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), GerberError> {
        let writer = match self.writer.take() {
            Some(w) => w,
            None => return Ok(()),
        };
        let inverted: Vec<u8> = self.buffer.iter().map(|b| !b).collect();
        TiffEncoder::new(writer)
            .write_image(&inverted, self.width, self.height, ExtendedColorType::L1)
            .map_err(image_err)
    }
}

fn image_err(err: image::ImageError) -> GerberError {
    GerberError::Io(std::io::Error::new(std::io::ErrorKind::Other, err.to_string()))
}

/// In-memory sink for tests: records every strip verbatim, in our own
/// dark=1 packing, so pixel-count assertions don't depend on the TIFF
/// encoder's compression or photometric choices. Kept unguarded (not
/// `#[cfg(test)]`) so the crate's own integration tests in `tests/` can
/// construct one against the compiled library.
pub struct MemoryStripSink {
    pub rows: Vec<Vec<u8>>,
    pub finished: bool,
}

impl Default for MemoryStripSink {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStripSink {
    pub fn new() -> Self {
        MemoryStripSink {
            rows: Vec::new(),
            finished: false,
        }
    }
}

impl StripSink for MemoryStripSink {
    fn write_strip(&mut self, rows: &[Vec<u8>]) -> Result<(), GerberError> {
        self.rows.extend_from_slice(rows);
        Ok(())
    }

    fn finish(&mut self) -> Result<(), GerberError> {
        self.finished = true;
        Ok(())
    }
}
