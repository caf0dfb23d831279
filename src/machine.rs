//! The Gerber interpreter itself. Consumes the command stream produced by
//! [`crate::parsing::gerber`] and emits a flat [`Polygon`] list ready for the
//! compositor; aperture geometry comes from [`crate::aperture`], arc solving
//! from [`crate::arc`], and the fill/trace scan tables from
//! [`crate::geometry::VertexData::initialise`].
//!
//! A `Machine` is constructed once per input file. Warnings and the
//! polygon creation counter are seeded from (and handed back to) the
//! caller so a multi-file run shares one 30-warning cap and one
//! creation-order tiebreak across files.

use std::collections::HashMap;
use std::rc::Rc;

use crate::aperture::{self, RenderedPrimitive};
use crate::arc::{self, ArcDirection, ArcInput};
use crate::error::GerberError;
use crate::geometry::{Point, Polygon, VertexData};
use crate::parsing::gerber::{
    ApertureTemplate, GerberCommand, GerberCommandContext, MacroContent, Operation, Polarity,
    Span, UnitMode,
};

const MAX_WARNINGS: u32 = 30;

/// D-code reserved for the synthesised 1.5px default circle aperture; real
/// D-codes are always >= 10, so this can never collide with a definition.
const DEFAULT_DCODE: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Units {
    Inch,
    Millimeter,
    Undefined,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum DrawingMode {
    Linear1x,
    Linear10x,
    Linear01x,
    Linear001x,
    CircleCw,
    CircleCcw,
}

#[derive(Debug, Clone, Copy)]
struct CoordinateFormat {
    int_digits: [u32; 2],
    dec_digits: [u32; 2],
    omit_leading_zeroes: bool,
    is_absolute: bool,
}

impl Default for CoordinateFormat {
    fn default() -> Self {
        CoordinateFormat {
            int_digits: [2, 3],
            dec_digits: [3, 3],
            omit_leading_zeroes: true,
            is_absolute: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ApertureKind {
    StandardCircle,
    StandardRectangle,
    StandardObround,
    StandardPolygon,
    Macro,
}

fn kind_name(kind: ApertureKind) -> &'static str {
    match kind {
        ApertureKind::StandardCircle => "circle",
        ApertureKind::StandardRectangle => "rectangle",
        ApertureKind::StandardObround => "obround",
        ApertureKind::StandardPolygon => "polygon",
        ApertureKind::Macro => "macro",
    }
}

struct InstantiatedAperture {
    kind: ApertureKind,
    std_width: f64,
    std_height: f64,
    chain: Vec<RenderedPrimitive>,
}

/// Knobs a `Machine` is constructed with; the CLI-level counterparts of
/// `--dpi`, `--grow-*`, `--scale-*` and `--rotation`.
#[derive(Debug, Clone, Copy)]
pub struct MachineOptions {
    pub dots_per_inch: f64,
    pub grow_px: f64,
    pub scale_x: f64,
    pub scale_y: f64,
    /// CLI `--rotation`, in radians, composed with any in-file `%IRn*%`.
    pub rotation_seed: f64,
}

impl Default for MachineOptions {
    fn default() -> Self {
        MachineOptions {
            dots_per_inch: 2400.0,
            grow_px: 0.0,
            scale_x: 1.0,
            scale_y: 1.0,
            rotation_seed: 0.0,
        }
    }
}

pub struct Machine<'a> {
    options: MachineOptions,

    format: Option<CoordinateFormat>,
    units: Units,

    drawing_mode: DrawingMode,
    is_circular_360: bool,
    is_polygon_fill: bool,
    is_lamp_on: bool,
    is_drawing_enabled: bool,

    coord_previous: [f64; 2],
    image_offset_px: [f64; 2],
    image_rotate_file_deg: f64,

    pub image_polarity_dark: bool,
    layer_polarity_clear: bool,

    x: f64,
    y: f64,
    old_x: f64,
    old_y: f64,
    i: f64,
    j: f64,

    macro_templates: HashMap<String, Vec<MacroContent<'a>>>,
    catalog: HashMap<u32, Rc<InstantiatedAperture>>,
    aperture_select: u32,
    warned_no_aperture_select: bool,
    warned_unapplied_scale_mode: bool,

    last_drawn_aperture: Option<u32>,
    last_drawn_xy: Option<(f64, f64)>,

    fill_draft: Option<VertexData>,
    fill_polarity: Polarity,

    pub polygons: Vec<Polygon>,
    pub warnings: Vec<String>,
    pub warning_count: u32,
    pub next_number: u64,
    current_line: u32,
}

impl<'a> Machine<'a> {
    pub fn new(options: MachineOptions) -> Result<Self, GerberError> {
        let mut machine = Machine {
            options,
            format: None,
            units: Units::Undefined,
            drawing_mode: DrawingMode::Linear1x,
            is_circular_360: false,
            is_polygon_fill: false,
            is_lamp_on: false,
            is_drawing_enabled: false,
            coord_previous: [0.0, 0.0],
            image_offset_px: [0.0, 0.0],
            image_rotate_file_deg: 0.0,
            image_polarity_dark: true,
            layer_polarity_clear: false,
            x: 0.0,
            y: 0.0,
            old_x: 0.0,
            old_y: 0.0,
            i: 0.0,
            j: 0.0,
            macro_templates: HashMap::new(),
            catalog: HashMap::new(),
            aperture_select: DEFAULT_DCODE,
            warned_no_aperture_select: false,
            warned_unapplied_scale_mode: false,
            last_drawn_aperture: None,
            last_drawn_xy: None,
            fill_draft: None,
            fill_polarity: Polarity::Dark,
            polygons: Vec::new(),
            warnings: Vec::new(),
            warning_count: 0,
            next_number: 0,
            current_line: 0,
        };
        machine.install_default_aperture()?;
        Ok(machine)
    }

    /// Seeds the warning list/counter and creation-number sequence from a
    /// prior file's [`Machine::finalize`] output, so a multi-file run shares
    /// one 30-warning cap and one creation-order tiebreak across files.
    pub fn seed(&mut self, next_number: u64, warning_count: u32, warnings: Vec<String>) {
        self.next_number = next_number;
        self.warning_count = warning_count;
        self.warnings = warnings;
    }

    /// Synthesises the 1.5px circle used whenever a trace is drawn before
    /// any `%AD` has selected an aperture. Sized in inches regardless of the
    /// file's actual (possibly still undefined) units, so it always comes
    /// out to exactly 1.5px at the configured dpi.
    fn install_default_aperture(&mut self) -> Result<(), GerberError> {
        let template = ApertureTemplate::Circle {
            diameter: (1.5 / self.options.dots_per_inch) as f32,
            hole_diameter: None,
        };
        let (polys, w, h) = aperture::render_standard(&template, self.options.dots_per_inch, 0.0)?;
        let chain = self.rescale_chain(polys)?;
        self.catalog.insert(
            DEFAULT_DCODE,
            Rc::new(InstantiatedAperture {
                kind: ApertureKind::StandardCircle,
                std_width: w,
                std_height: h,
                chain,
            }),
        );
        Ok(())
    }

    fn warn(&mut self, message: impl Into<String>) {
        self.warning_count += 1;
        if self.warning_count < MAX_WARNINGS {
            self.warnings
                .push(format!("{} at line {}", message.into(), self.current_line));
        } else if self.warning_count == MAX_WARNINGS {
            self.warnings
                .push("Too many warnings, suppressing further ones.".to_string());
        }
    }

    /// Processes every top-level command in file order, then folds the
    /// image-level rotate into the accumulated polygon list. Matches the
    /// `Gerber` constructor's parse-then-finalise structure.
    pub fn run(&mut self, commands: &[GerberCommandContext<'a>]) -> Result<(), GerberError> {
        for ctx in commands {
            self.current_line = ctx.location_info().line;
            self.process_command(&ctx.command)?;
        }
        Ok(())
    }

    /// Applies the composed image rotation to every unique vertex buffer and
    /// polygon offset, then drops empty polygons and re-sorts. Mirrors the
    /// `Gerber` constructor's single pass over `vertexdata`/`polygons` after
    /// parsing, deferred (unlike scale) to run once at the very end
    /// regardless of how many aperture/trace creation sites contributed.
    pub fn finalize(mut self) -> Result<(Vec<Polygon>, Vec<String>, u32, u64), GerberError> {
        let rotate = self.options.rotation_seed + self.image_rotate_file_deg.to_radians();
        if rotate != 0.0 {
            let mut rotated: HashMap<*const VertexData, Rc<VertexData>> = HashMap::new();
            let mut out = Vec::with_capacity(self.polygons.len());
            for poly in self.polygons.drain(..) {
                let key = Rc::as_ptr(&poly.vdata);
                let vdata = if let Some(existing) = rotated.get(&key) {
                    existing.clone()
                } else {
                    let mut v = (*poly.vdata).clone();
                    v.rotate(rotate);
                    v.initialise()?;
                    let rc = Rc::new(v);
                    rotated.insert(key, rc.clone());
                    rc
                };
                let offset = poly.offset.rotate(rotate);
                out.push(Polygon::new(vdata, offset, poly.polarity, poly.number));
            }
            self.polygons = out;
        }

        self.polygons.retain(|p| !p.vdata.is_empty());
        if self.polygons.is_empty() {
            self.warn("Nothing to draw");
        }
        self.polygons.sort();

        Ok((self.polygons, self.warnings, self.warning_count, self.next_number))
    }

    // -- parameter-level commands --------------------------------------

    fn process_command(&mut self, command: &GerberCommand<'a>) -> Result<(), GerberError> {
        match command {
            GerberCommand::Attribute(_) | GerberCommand::Comment(_) => {}

            GerberCommand::SetAperture(code) => {
                self.select_aperture(*code);
                self.is_lamp_on = false;
                self.execute_data_block()?;
            }

            GerberCommand::Operation(op) => self.process_operation(op)?,

            GerberCommand::MultiQuadrantMode(multi) => {
                self.is_circular_360 = *multi;
                self.execute_data_block()?;
            }

            GerberCommand::Region(ops) => self.process_region(ops)?,

            GerberCommand::DeprecatedGCode(code) => self.process_deprecated_gcode(*code)?,

            GerberCommand::StepAndRepeat { .. } => {
                self.warn("Step-and-repeat blocks are parsed but not rendered");
            }

            GerberCommand::UnitMode(mode) => {
                self.units = match mode {
                    UnitMode::Metric => Units::Millimeter,
                    UnitMode::Imperial => Units::Inch,
                };
            }

            GerberCommand::FormatSpecification {
                integer_digits,
                decimal_digits,
                omit_leading_zeroes,
                is_absolute,
            } => {
                self.format = Some(CoordinateFormat {
                    int_digits: [*integer_digits, *integer_digits],
                    dec_digits: [*decimal_digits, *decimal_digits],
                    omit_leading_zeroes: *omit_leading_zeroes,
                    is_absolute: *is_absolute,
                });
            }

            GerberCommand::ApertureDefine { identity, template } => {
                self.define_aperture(*identity, template)?;
            }

            GerberCommand::ApertureMacro { name, content } => {
                self.macro_templates
                    .insert(name.fragment().to_string(), content.clone());
            }

            GerberCommand::LoadPolarity(polarity) => {
                self.layer_polarity_clear = *polarity == Polarity::Clear;
            }

            GerberCommand::LoadMirroring(_)
            | GerberCommand::LoadRotation(_)
            | GerberCommand::LoadScaling(_) => {
                // Parsed and tolerated, not applied to rendering.
            }

            GerberCommand::ApertureBlock(_, _) => {
                self.warn("Aperture blocks are parsed but not instantiated");
            }

            GerberCommand::ImagePolarity(polarity) => {
                self.image_polarity_dark = *polarity == Polarity::Dark;
            }

            GerberCommand::ImageOffset { a, b } => {
                let dpu = self.dots_per_unit();
                self.image_offset_px = [*a as f64 * dpu, *b as f64 * dpu];
            }

            GerberCommand::ImageRotation(degrees) => {
                self.image_rotate_file_deg = *degrees as f64;
            }

            GerberCommand::ImageMirror { .. } | GerberCommand::ImageScaleFactor { .. } => {
                // Tolerated, not consumed.
            }

            GerberCommand::ImageName(_) | GerberCommand::LayerName(_) => {}
        }
        Ok(())
    }

    fn process_deprecated_gcode(&mut self, code: u32) -> Result<(), GerberError> {
        match code {
            10 => {
                self.drawing_mode = DrawingMode::Linear10x;
                self.warn_scale_mode_once();
            }
            11 => {
                self.drawing_mode = DrawingMode::Linear01x;
                self.warn_scale_mode_once();
            }
            12 => {
                self.drawing_mode = DrawingMode::Linear001x;
                self.warn_scale_mode_once();
            }
            70 => self.units = Units::Inch,
            71 => self.units = Units::Millimeter,
            90 => self.set_absolute(true),
            91 => self.set_absolute(false),
            _ => {}
        }
        self.execute_data_block()
    }

    fn warn_scale_mode_once(&mut self) {
        if !self.warned_unapplied_scale_mode {
            self.warn("G10/G11/G12 linear scale mode is tracked but not applied to drawn geometry");
            self.warned_unapplied_scale_mode = true;
        }
    }

    fn set_absolute(&mut self, absolute: bool) {
        let mut format = self.format_or_default();
        format.is_absolute = absolute;
        self.format = Some(format);
    }

    // -- aperture instantiation ------------------------------------------

    fn rescale_chain(
        &self,
        chain: Vec<RenderedPrimitive>,
    ) -> Result<Vec<RenderedPrimitive>, GerberError> {
        chain
            .into_iter()
            .map(|(vdata, polarity)| {
                let mut v = (*vdata).clone();
                v.scale(self.options.scale_x, -self.options.scale_y);
                v.initialise()?;
                Ok((Rc::new(v), polarity))
            })
            .collect()
    }

    fn define_aperture(
        &mut self,
        d_code: u32,
        template: &ApertureTemplate<'a>,
    ) -> Result<(), GerberError> {
        let dpu = self.dots_per_unit();
        let grow = self.options.grow_px;

        let (chain, kind, std_width, std_height) = match template {
            ApertureTemplate::Circle { .. } => {
                let (polys, w, h) = aperture::render_standard(template, dpu, grow)?;
                (polys, ApertureKind::StandardCircle, w, h)
            }
            ApertureTemplate::Rectangle { .. } => {
                let (polys, w, h) = aperture::render_standard(template, dpu, grow)?;
                (polys, ApertureKind::StandardRectangle, w, h)
            }
            ApertureTemplate::Obround { .. } => {
                let (polys, w, h) = aperture::render_standard(template, dpu, grow)?;
                (polys, ApertureKind::StandardObround, w, h)
            }
            ApertureTemplate::Polygon { .. } => {
                let (polys, w, h) = aperture::render_standard(template, dpu, grow)?;
                (polys, ApertureKind::StandardPolygon, w, h)
            }
            ApertureTemplate::Macro { name, arguments } => {
                let key = name.fragment().to_string();
                let content = self
                    .macro_templates
                    .get(&key)
                    .ok_or_else(|| GerberError::UnknownMacro(key.clone()))?;
                let bindings: Vec<f64> = arguments.iter().map(|&a| a as f64).collect();
                let polys = aperture::render_macro(content, &bindings, dpu, grow)?;
                (polys, ApertureKind::Macro, 0.0, 0.0)
            }
        };

        let chain = self.rescale_chain(chain)?;
        self.catalog.insert(
            d_code,
            Rc::new(InstantiatedAperture {
                kind,
                std_width,
                std_height,
                chain,
            }),
        );
        Ok(())
    }

    /// D10+ aperture selection. On a miss, warns and falls back to
    /// whatever aperture is currently selected, or to the synthesised
    /// default if nothing has been selected yet.
    fn select_aperture(&mut self, code: u32) {
        if self.catalog.contains_key(&code) {
            self.aperture_select = code;
        } else {
            self.warn(format!("Aperture D{} has not been defined", code));
            // Fall back to whatever is currently selected (the synthesised
            // default if nothing has been selected yet) rather than reset.
        }
    }

    fn flash_aperture(&mut self, x: f64, y: f64) -> Result<(), GerberError> {
        let chain = self
            .catalog
            .get(&self.aperture_select)
            .expect("aperture_select always resolvable")
            .chain
            .clone();
        let offset = Point::new(x * self.options.scale_x, -y * self.options.scale_y);
        for (vdata, polarity) in chain {
            let polarity = if self.layer_polarity_clear {
                Polarity::Clear
            } else {
                polarity
            };
            let number = self.next_number;
            self.next_number += 1;
            self.polygons.push(Polygon::new(vdata, offset, polarity, number));
        }
        Ok(())
    }

    fn push_draft_polygon(&mut self, mut vdata: VertexData, polarity: Polarity) -> Result<(), GerberError> {
        vdata.scale(self.options.scale_x, -self.options.scale_y);
        vdata.initialise()?;
        let number = self.next_number;
        self.next_number += 1;
        self.polygons
            .push(Polygon::new(Rc::new(vdata), Point::zero(), polarity, number));
        Ok(())
    }

    // -- units and coordinates -------------------------------------------

    fn dots_per_unit(&mut self) -> f64 {
        match self.units {
            Units::Millimeter => self.options.dots_per_inch / 25.4,
            Units::Inch => self.options.dots_per_inch,
            Units::Undefined => {
                self.warn("Dimension specified without units. Defaulting to inches.");
                self.units = Units::Inch;
                self.options.dots_per_inch
            }
        }
    }

    fn dots_per_unit_readonly(&self) -> f64 {
        match self.units {
            Units::Millimeter => self.options.dots_per_inch / 25.4,
            _ => self.options.dots_per_inch,
        }
    }

    fn format_or_default(&mut self) -> CoordinateFormat {
        if self.format.is_none() {
            self.warn("FS parameter missing. Defaulting to FSLAX23Y23.");
            self.format = Some(CoordinateFormat::default());
        }
        self.format.unwrap()
    }

    fn coord_precision(&self) -> f64 {
        let format = self.format.unwrap_or_default();
        let digits = format.dec_digits[0].min(format.dec_digits[1]);
        10f64.powi(-(digits as i32)) * self.dots_per_unit_readonly()
    }

    fn get_coordinate(&mut self, axis: usize, span: &Span<'a>, is_ij: bool) -> f64 {
        self.is_drawing_enabled = true;
        let format = self.format_or_default();
        let text = *span.fragment();
        let digits = text.trim_start_matches(['+', '-']);
        let max_digits = format.int_digits[axis] + format.dec_digits[axis];

        let mut value: f64 = text.parse::<i64>().unwrap_or(0) as f64;

        let excess = digits.len() as i64 - max_digits as i64;
        if excess > 0 {
            self.warn(format!("found {} surplus digit(s) in coordinate", excess));
        }

        if format.omit_leading_zeroes {
            value /= 10f64.powi(format.dec_digits[axis] as i32);
        } else {
            value /= 10f64.powi(digits.len() as i32 - format.int_digits[axis] as i32);
        }

        value *= self.dots_per_unit();
        if !is_ij {
            value += self.image_offset_px[axis];
        }

        if is_ij || format.is_absolute {
            return value;
        }

        self.coord_previous[axis] += value;
        self.coord_previous[axis]
    }

    fn update_xy(&mut self, x: &Option<Span<'a>>, y: &Option<Span<'a>>) {
        if let Some(span) = x {
            self.x = self.get_coordinate(0, span, false);
        }
        if let Some(span) = y {
            self.y = self.get_coordinate(1, span, false);
        }
    }

    fn update_ij(&mut self, i: &Option<Span<'a>>, j: &Option<Span<'a>>) {
        if let Some(span) = i {
            self.i = self.get_coordinate(0, span, true);
        }
        if let Some(span) = j {
            self.j = self.get_coordinate(1, span, true);
        }
    }

    // -- operations and data blocks ---------------------------------------

    fn process_operation(&mut self, op: &Operation<'a>) -> Result<(), GerberError> {
        match op {
            Operation::Plot { x, y, i, j } => {
                self.update_xy(x, y);
                self.update_ij(i, j);
                self.is_lamp_on = true;
                self.is_drawing_enabled = true;
                self.execute_data_block()?;
            }
            Operation::Move { x, y } => {
                self.update_xy(x, y);
                self.is_lamp_on = false;
                self.execute_data_block()?;
            }
            Operation::Flash { x, y } => {
                self.update_xy(x, y);
                let (x, y) = (self.x, self.y);
                self.flash_aperture(x, y)?;
                self.is_lamp_on = false;
                self.execute_data_block()?;
            }
            Operation::LinearMode => {
                self.drawing_mode = DrawingMode::Linear1x;
                self.execute_data_block()?;
            }
            Operation::ClockwiseMode => {
                self.drawing_mode = DrawingMode::CircleCw;
                self.execute_data_block()?;
            }
            Operation::CounterClockwiseMode => {
                self.drawing_mode = DrawingMode::CircleCcw;
                self.execute_data_block()?;
            }
        }
        Ok(())
    }

    fn process_region(&mut self, ops: &[crate::parsing::gerber::OperationContext<'a>]) -> Result<(), GerberError> {
        self.is_lamp_on = false;
        self.is_polygon_fill = true;
        self.fill_draft = Some(VertexData::new());
        self.fill_polarity = if self.layer_polarity_clear {
            Polarity::Clear
        } else {
            Polarity::Dark
        };

        for op_ctx in ops {
            self.current_line = op_ctx.location_info().line;
            self.process_operation(&op_ctx.operation)?;
        }

        self.is_polygon_fill = false;
        self.is_drawing_enabled = false;
        if let Some(vdata) = self.fill_draft.take() {
            self.push_draft_polygon(vdata, self.fill_polarity)?;
        }
        Ok(())
    }

    fn resolve_arc(&mut self) -> arc::ResolvedArc {
        let input = ArcInput {
            start: Point::new(self.old_x, self.old_y),
            end: Point::new(self.x, self.y),
            i: self.i,
            j: self.j,
            direction: if self.drawing_mode == DrawingMode::CircleCw {
                ArcDirection::Clockwise
            } else {
                ArcDirection::CounterClockwise
            },
            is_multi_quadrant: self.is_circular_360,
            coord_precision: self.coord_precision(),
        };
        let mut raw = Vec::new();
        let resolved = arc::resolve(&input, &mut raw);
        for message in raw {
            self.warn(message);
        }
        resolved
    }

    /// Draws or accumulates a vertex when the lamp is on, then
    /// unconditionally resets `I`/`J` and advances the tool position.
    /// Called after every block regardless of its content.
    fn execute_data_block(&mut self) -> Result<(), GerberError> {
        let dx = self.x - self.old_x;
        let dy = self.y - self.old_y;
        let tool_shift = (dx * dx + dy * dy).sqrt();

        if self.is_lamp_on && self.is_drawing_enabled {
            if self.is_polygon_fill {
                self.fill_data_block()?;
            } else {
                self.trace_data_block(dx, dy, tool_shift)?;
            }
        }

        self.i = 0.0;
        self.j = 0.0;
        self.old_x = self.x;
        self.old_y = self.y;
        self.is_drawing_enabled = false;
        Ok(())
    }

    fn fill_data_block(&mut self) -> Result<(), GerberError> {
        let is_arc = matches!(self.drawing_mode, DrawingMode::CircleCw | DrawingMode::CircleCcw);
        let (old_x, old_y, x, y) = (self.old_x, self.old_y, self.x, self.y);
        let resolved = if is_arc { Some(self.resolve_arc()) } else { None };
        let clockwise = self.drawing_mode == DrawingMode::CircleCw;

        let draft = self
            .fill_draft
            .as_mut()
            .expect("fill region active during G36..G37");
        if draft.is_empty() {
            draft.add_xy(old_x, old_y);
        }
        match resolved {
            Some(arc) if !arc.is_degenerate => {
                draft.add_arc(arc.start_angle, arc.end_angle, arc.radius, arc.center.x, arc.center.y, clockwise);
            }
            _ => draft.add_xy(x, y),
        }
        Ok(())
    }

    fn trace_data_block(&mut self, dx: f64, dy: f64, tool_shift: f64) -> Result<(), GerberError> {
        if self.aperture_select == DEFAULT_DCODE && !self.warned_no_aperture_select {
            self.warn("Drawing started without an aperture selected. Using default.");
            self.warned_no_aperture_select = true;
        }

        let d_code = self.aperture_select;
        let (kind, mut std_width, mut std_height) = {
            let ap = self.catalog.get(&d_code).expect("aperture always resolvable");
            (ap.kind, ap.std_width, ap.std_height)
        };

        match self.drawing_mode {
            DrawingMode::CircleCw | DrawingMode::CircleCcw if kind != ApertureKind::StandardCircle => {
                return Err(GerberError::UnsupportedApertureForDrawMode {
                    dcode: d_code,
                    kind: kind_name(kind),
                });
            }
            DrawingMode::Linear1x
                if !(kind == ApertureKind::StandardCircle || kind == ApertureKind::StandardRectangle) =>
            {
                return Err(GerberError::UnsupportedApertureForDrawMode {
                    dcode: d_code,
                    kind: kind_name(kind),
                });
            }
            _ => {}
        }

        if self.last_drawn_aperture != Some(d_code) || self.last_drawn_xy != Some((self.old_x, self.old_y)) {
            let (ox, oy) = (self.old_x, self.old_y);
            self.flash_aperture(ox, oy)?;
        }

        let f = self.options.scale_y.abs();
        if f > 1e-10 && std_height * f < 1.1 {
            std_height = 1.1 / f;
        }

        match self.drawing_mode {
            DrawingMode::Linear1x => {
                if tool_shift > 1.0 {
                    let (sx, sy) = if kind == ApertureKind::StandardCircle {
                        let trace_width = std_height.max(std_width) - 0.05;
                        let mut sy = (trace_width * dx) / tool_shift;
                        let sx = (trace_width * trace_width - sy * sy).max(0.0).sqrt() / 2.0;
                        sy /= 2.0;
                        if dy > 0.0 {
                            sy = -sy;
                        }
                        (sx, sy)
                    } else {
                        let mut sx = std_width / 2.0;
                        let sy = -std_height / 2.0;
                        if dx * dy < 0.0 {
                            sx = -sx;
                        }
                        (sx, sy)
                    };

                    let (old_x, old_y, x, y) = (self.old_x, self.old_y, self.x, self.y);
                    let mut vdata = VertexData::new();
                    vdata.add_xy(old_x + sx, old_y + sy);
                    vdata.add_xy(old_x - sx, old_y - sy);
                    vdata.add_xy(x - sx, y - sy);
                    vdata.add_xy(x + sx, y + sy);
                    let polarity = if self.layer_polarity_clear { Polarity::Clear } else { Polarity::Dark };
                    self.push_draft_polygon(vdata, polarity)?;
                }
                if tool_shift > 0.0 {
                    let (x, y) = (self.x, self.y);
                    self.flash_aperture(x, y)?;
                }
            }
            DrawingMode::CircleCw | DrawingMode::CircleCcw => {
                let resolved = self.resolve_arc();
                if !resolved.is_degenerate {
                    let clockwise = self.drawing_mode == DrawingMode::CircleCw;
                    let mut vdata = VertexData::new();
                    vdata.add_arc(
                        resolved.start_angle,
                        resolved.end_angle,
                        resolved.radius - std_height / 2.0,
                        resolved.center.x,
                        resolved.center.y,
                        clockwise,
                    );
                    vdata.add_arc(
                        resolved.end_angle,
                        resolved.start_angle,
                        resolved.radius + std_height / 2.0,
                        resolved.center.x,
                        resolved.center.y,
                        !clockwise,
                    );
                    let polarity = if self.layer_polarity_clear { Polarity::Clear } else { Polarity::Dark };
                    self.push_draft_polygon(vdata, polarity)?;
                    self.old_x = resolved.stopped_point.x;
                    self.old_y = resolved.stopped_point.y;
                }

                let saved_mode = self.drawing_mode;
                self.drawing_mode = DrawingMode::Linear1x;
                self.last_drawn_aperture = Some(d_code);
                self.execute_data_block()?;
                self.drawing_mode = saved_mode;
            }
            _ => {
                return Err(GerberError::Syntax(
                    "drawing mode is not supported for traces".to_string(),
                ));
            }
        }

        self.last_drawn_aperture = Some(d_code);
        self.last_drawn_xy = Some((self.x, self.y));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsing::gerber::parse_gerber_file;

    #[test]
    fn missing_format_specification_defaults_and_warns() {
        let source = "%MOIN*%%ADD10C,0.050*%D10*X1000Y1000D03*M02*";
        let (_, commands) = parse_gerber_file(Span::new(source)).expect("should parse");
        let mut machine = Machine::new(MachineOptions::default()).expect("should construct");
        machine.run(&commands).expect("should interpret");
        assert!(machine
            .warnings
            .iter()
            .any(|w| w.contains("FS parameter missing")));
    }

    #[test]
    fn undefined_aperture_select_falls_back_and_warns() {
        let source = "%FSLAX23Y23*%%MOIN*%D99*X1000Y1000D03*M02*";
        let (_, commands) = parse_gerber_file(Span::new(source)).expect("should parse");
        let mut machine = Machine::new(MachineOptions::default()).expect("should construct");
        machine.run(&commands).expect("should interpret");
        assert!(machine
            .warnings
            .iter()
            .any(|w| w.contains("Aperture D99 has not been defined")));
    }

    #[test]
    fn drawing_without_aperture_select_warns_and_uses_default() {
        let source = "%FSLAX23Y23*%%MOIN*%X0Y0D02*X1000Y1000D01*M02*";
        let (_, commands) = parse_gerber_file(Span::new(source)).expect("should parse");
        let mut machine = Machine::new(MachineOptions::default()).expect("should construct");
        machine.run(&commands).expect("should interpret");
        assert!(machine
            .warnings
            .iter()
            .any(|w| w.contains("Drawing started without an aperture selected")));
    }

    #[test]
    fn seed_carries_warnings_and_counter_into_the_next_file() {
        let mut machine = Machine::new(MachineOptions::default()).expect("should construct");
        machine.seed(7, 2, vec!["carried over".to_string()]);
        assert_eq!(machine.next_number, 7);
        assert_eq!(machine.warning_count, 2);
        assert_eq!(machine.warnings, vec!["carried over".to_string()]);
    }

    #[test]
    fn empty_file_warns_nothing_to_draw_on_finalize() {
        let source = "%FSLAX23Y23*%%MOIN*%M02*";
        let (_, commands) = parse_gerber_file(Span::new(source)).expect("should parse");
        let mut machine = Machine::new(MachineOptions::default()).expect("should construct");
        machine.run(&commands).expect("should interpret");
        let (polygons, warnings, _count, _next) = machine.finalize().expect("should finalize");
        assert!(polygons.is_empty());
        assert!(warnings.iter().any(|w| w.contains("Nothing to draw")));
    }

    #[test]
    fn single_flash_produces_one_dark_polygon() {
        let source = "%FSLAX23Y23*%%MOIN*%%ADD10C,0.050*%D10*X1000Y1000D03*M02*";
        let (_, commands) = parse_gerber_file(Span::new(source)).expect("should parse");
        let mut machine = Machine::new(MachineOptions::default()).expect("should construct");
        machine.run(&commands).expect("should interpret");
        let (polygons, _warnings, _count, _next) = machine.finalize().expect("should finalize");
        assert_eq!(polygons.len(), 1);
        assert_eq!(polygons[0].polarity, Polarity::Dark);
    }
}
