//! Gerber RS-274X to monochrome raster conversion.
//!
//! Pipeline: [`parsing::gerber`] turns source text into a command list,
//! [`machine::Machine`] interprets it into [`geometry::Polygon`]s, and
//! [`compositor`] paints those polygons into packed rows handed to a
//! [`sink::StripSink`]. Split out as a library so `tests/` can drive the
//! whole pipeline against [`sink::MemoryStripSink`] without shelling out to
//! the `gerber_raster` binary.

pub mod aperture;
pub mod arc;
pub mod compositor;
pub mod config;
pub mod error;
pub mod expression;
pub mod geometry;
pub mod machine;
pub mod parsing;
pub mod scanline;
pub mod sink;
