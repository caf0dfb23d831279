use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};

mod arguments;

use gerber_raster::compositor;
use gerber_raster::config::Config;
use gerber_raster::machine::{Machine, MachineOptions};
use gerber_raster::parsing::gerber::{parse_gerber_file, Span};
use gerber_raster::sink::TiffStripSink;

fn main() {
    let arguments: arguments::Arguments = argh::from_env();

    let level = if arguments.quiet {
        log::LevelFilter::Warn
    } else if arguments.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    simple_logger::SimpleLogger::new()
        .with_level(level)
        .init()
        .expect("Failed to initialize logger.");

    match trampoline(arguments) {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            log::error!("Fatal error: {:?}", error);
            std::process::exit(1);
        }
    }
}

fn trampoline(arguments: arguments::Arguments) -> Result<()> {
    let config = match Config::load() {
        Ok(config) => config,
        Err(error) => {
            log::warn!(
                "Failed to read config file at {}: {:?}",
                Config::get_path()
                    .map(|path| path.to_string_lossy().to_string())
                    .unwrap_or(String::from("'unavailable'")),
                error
            );
            Config::default()
        }
    };

    if arguments.inputs.is_empty() {
        bail!("No input Gerber files given.");
    }

    let dots_per_inch = arguments.dpi.unwrap_or(config.dots_per_inch);
    let grow_px = arguments
        .grow_pixels
        .or_else(|| arguments.grow_mm.map(|mm| mm / 25.4 * dots_per_inch))
        .unwrap_or(0.0);
    let border_px = arguments
        .boarder_pixels
        .or_else(|| arguments.boarder_mm.map(|mm| mm / 25.4 * dots_per_inch))
        .unwrap_or(0.0)
        .round() as i32;
    let rows_per_strip = arguments.strip_rows.unwrap_or(config.strip_rows);

    let options = MachineOptions {
        dots_per_inch,
        grow_px,
        scale_x: arguments.scale_x,
        scale_y: arguments.scale_y,
        rotation_seed: arguments.rotation.to_radians(),
    };

    let mut all_polygons = Vec::new();
    let mut all_warnings = Vec::new();
    let mut next_number = 0u64;
    let mut warning_count = 0u32;
    let mut first_file_polarity_dark = true;

    for (index, path) in arguments.inputs.iter().enumerate() {
        log::info!("Reading Gerber file: {:?}", path);
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read Gerber file {:?}", path))?;

        let (_, commands) = parse_gerber_file(Span::new(&contents))
            .map_err(|error| anyhow::anyhow!("Failed to parse {:?}: {:?}", path, error))?;

        let mut file_machine = Machine::new(options)
            .with_context(|| format!("Failed to initialise machine for {:?}", path))?;
        file_machine.seed(next_number, warning_count, all_warnings);

        file_machine
            .run(&commands)
            .with_context(|| format!("Failed while interpreting {:?}", path))?;

        if index == 0 {
            first_file_polarity_dark = file_machine.image_polarity_dark;
        }

        let (polygons, warnings, count, number) = file_machine
            .finalize()
            .with_context(|| format!("Failed finalising {:?}", path))?;

        all_polygons.extend(polygons);
        all_warnings = warnings;
        warning_count = count;
        next_number = number;
    }

    for warning in &all_warnings {
        log::warn!("{}", warning);
    }

    if arguments.test {
        log::info!(
            "Parse-only run complete: {} polygon(s), {} warning(s).",
            all_polygons.len(),
            all_warnings.len()
        );
        return Ok(());
    }

    if all_polygons.is_empty() {
        bail!("Nothing to draw: no polygons were produced from the given input.");
    }

    let background_dark = arguments.negative ^ first_file_polarity_dark;

    let output_path = resolve_output_path(&arguments, &config)?;
    let file = fs::File::create(&output_path)
        .with_context(|| format!("Failed to create output file {:?}", output_path))?;

    let (min_x, min_y, max_x, max_y) = compositor::bounds(&all_polygons, border_px);
    let width = compositor::round_up_to_byte_multiple(max_x - min_x + 1);
    let height = (max_y - min_y + 1).max(1) as u32;

    let mut sink = TiffStripSink::new(std::io::BufWriter::new(file), width, height);
    let result = compositor::composite(
        all_polygons,
        background_dark,
        border_px,
        rows_per_strip,
        &mut sink,
    )
    .context("Failed while compositing the final raster")?;

    log::info!(
        "Wrote {:?}: {}x{} px at {} dpi.",
        output_path,
        result.width,
        result.height,
        dots_per_inch
    );

    if arguments.area {
        let px_area_cm2 = (2.54 / dots_per_inch) * (2.54 / dots_per_inch);
        let dark_cm2 = result.dark_pixel_count as f64 * px_area_cm2;
        let total_cm2 = result.width as f64 * result.height as f64 * px_area_cm2;
        log::info!(
            "Dark area: {:.4} cm^2, clear area: {:.4} cm^2",
            dark_cm2,
            total_cm2 - dark_cm2
        );
    }

    Ok(())
}

fn resolve_output_path(arguments: &arguments::Arguments, config: &Config) -> Result<PathBuf> {
    if let Some(output) = &arguments.output {
        return Ok(output.clone());
    }
    let first_input = arguments
        .inputs
        .first()
        .context("No input Gerber files given.")?;
    let stem = first_input
        .file_stem()
        .context("Input path has no file stem.")?;
    let mut name = PathBuf::from(stem);
    name.set_extension("tif");
    match &config.default_output_directory {
        Some(dir) => Ok(dir.join(name)),
        None => Ok(name),
    }
}
