//! CLI surface, `argh`-based. There is only one operation — render — so
//! this is a single flat struct rather than a subcommand enum.

use std::path::PathBuf;

use argh::FromArgs;

#[derive(FromArgs, PartialEq, Debug)]
/// Rasterize one or more Gerber RS-274X files into a monochrome TIFF.
pub struct Arguments {
    /// input Gerber files, merged into one image in file order.
    #[argh(positional)]
    pub inputs: Vec<PathBuf>,

    /// output TIFF path.
    #[argh(option, short = 'o')]
    pub output: Option<PathBuf>,

    /// dots per inch (default 2400).
    #[argh(option, short = 'p')]
    pub dpi: Option<f64>,

    /// invert output polarity.
    #[argh(switch, short = 'n')]
    pub negative: bool,

    /// border padding, in millimetres.
    #[argh(option)]
    pub boarder_mm: Option<f64>,

    /// border padding, in pixels.
    #[argh(option)]
    pub boarder_pixels: Option<f64>,

    /// perimeter growth, in millimetres (negative shrinks).
    #[argh(option)]
    pub grow_mm: Option<f64>,

    /// perimeter growth, in pixels (negative shrinks).
    #[argh(option)]
    pub grow_pixels: Option<f64>,

    /// additional image rotation, in degrees, composed with any in-file `%IRn*%`.
    #[argh(option, default = "0.0")]
    pub rotation: f64,

    /// X axis scale factor.
    #[argh(option, default = "1.0")]
    pub scale_x: f64,

    /// Y axis scale factor.
    #[argh(option, default = "1.0")]
    pub scale_y: f64,

    /// rows per TIFF strip.
    #[argh(option)]
    pub strip_rows: Option<u32>,

    /// report dark/clear area in cm^2.
    #[argh(switch, short = 'a')]
    pub area: bool,

    /// parse only, do not render or write output.
    #[argh(switch, short = 't')]
    pub test: bool,

    /// suppress informational logging.
    #[argh(switch, short = 'q')]
    pub quiet: bool,

    /// verbose logging.
    #[argh(switch, short = 'v')]
    pub verbose: bool,
}
