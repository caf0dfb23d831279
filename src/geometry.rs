//! Points, infinite lines, and the vertex/polygon types that flow from
//! aperture rendering through to the scanline filler.
//!
//! `VertexData` is built by the aperture and trace-building code, then
//! frozen by [`VertexData::initialise`]; after that point it is immutable
//! and may be shared by several [`Polygon`]s (flashes of the same aperture
//! at different offsets), using reference counting rather than mutable
//! back-pointers, and an externally supplied row index rather than an
//! internal scan cursor, so rasterization stays repeatable under
//! concurrent readers.

use std::rc::Rc;

use crate::error::GerberError;
use crate::parsing::gerber::Polarity;

/// Conversion from a real coordinate to the nearest pixel centre: round
/// half away from zero, not banker's rounding, so negative coordinates
/// round symmetrically.
pub fn round_dot(x: f64) -> i32 {
    if x < 0.0 {
        (x - 0.5) as i32
    } else {
        (x + 0.5) as i32
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Point { x, y }
    }

    pub fn zero() -> Self {
        Point::new(0.0, 0.0)
    }

    pub fn from_polar(radius: f64, angle: f64) -> Self {
        Point::new(radius * angle.cos(), radius * angle.sin())
    }

    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn angle(&self) -> f64 {
        self.y.atan2(self.x)
    }

    pub fn rotate(&self, theta: f64) -> Point {
        let (sin, cos) = theta.sin_cos();
        Point::new(self.x * cos - self.y * sin, self.y * cos + self.x * sin)
    }

    pub fn add(&self, other: Point) -> Point {
        Point::new(self.x + other.x, self.y + other.y)
    }

    pub fn sub(&self, other: Point) -> Point {
        Point::new(self.x - other.x, self.y - other.y)
    }

    pub fn scale(&self, factor: f64) -> Point {
        Point::new(self.x * factor, self.y * factor)
    }
}

/// An infinite line in canonical form `Ax + By + C = 0`.
#[derive(Debug, Clone, Copy)]
pub struct Line {
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

impl Line {
    pub fn through(p1: Point, p2: Point) -> Self {
        let a = p2.y - p1.y;
        let b = p1.x - p2.x;
        let c = -(a * p1.x + b * p1.y);
        Line { a, b, c }
    }

    /// Translate the line to pass through `p` while keeping its slope.
    pub fn move_parallel(&self, p: Point) -> Line {
        Line {
            a: self.a,
            b: self.b,
            c: -(self.a * p.x + self.b * p.y),
        }
    }

    /// Rotate 90 degrees about the origin and translate to pass through `p`.
    pub fn move_perpendicular(&self, p: Point) -> Line {
        let a = -self.b;
        let b = self.a;
        Line {
            a,
            b,
            c: -(a * p.x + b * p.y),
        }
    }

    /// Intersection with another line, or `(0, 0)` if the lines are parallel.
    pub fn intersect(&self, other: Line) -> Point {
        let denom = self.a * other.b - other.a * self.b;
        if denom.abs() < 1e-12 {
            return Point::zero();
        }
        let x = (self.b * other.c - other.b * self.c) / denom;
        let y = (other.a * self.c - self.a * other.c) / denom;
        Point::new(x, y)
    }
}

/// One row of cached scanline intersections: pairs are consumed as the
/// inclusive pixel run `[x1, x2]` by the compositor, with an externally
/// supplied row index.
#[derive(Debug, Default, Clone)]
pub struct ScanlineTable {
    /// Flattened, row-major intersection x-coordinates; always an even
    /// number of entries per row.
    gx_intersects: Vec<i32>,
    /// `row_offsets[i]..row_offsets[i+1]` indexes a row's slice of
    /// `gx_intersects`. Length is `pixel_height + 2`.
    row_offsets: Vec<u32>,
}

impl ScanlineTable {
    pub fn from_parts(gx_intersects: Vec<i32>, row_offsets: Vec<u32>) -> Self {
        ScanlineTable {
            gx_intersects,
            row_offsets,
        }
    }

    /// Intersections for row `index` (0-based from `pixel_min_y`), or an
    /// empty slice if out of range. Pure function of the table and the
    /// caller-supplied index — no mutation, so a single table may be read
    /// concurrently by multiple strip workers.
    pub fn row(&self, index: usize) -> &[i32] {
        match (self.row_offsets.get(index), self.row_offsets.get(index + 1)) {
            (Some(&start), Some(&end)) => &self.gx_intersects[start as usize..end as usize],
            _ => &[],
        }
    }

    pub fn row_count(&self) -> usize {
        self.row_offsets.len().saturating_sub(1)
    }
}

#[derive(Debug, Clone)]
pub struct VertexData {
    vertices: Vec<Point>,
    last_vertex: Option<Point>,
    pub min: Point,
    pub max: Point,
    pub pixel_width: i32,
    pub pixel_height: i32,
    scanline: ScanlineTable,
}

impl Default for VertexData {
    fn default() -> Self {
        VertexData {
            vertices: Vec::new(),
            last_vertex: None,
            min: Point::zero(),
            max: Point::zero(),
            pixel_width: 0,
            pixel_height: 0,
            scanline: ScanlineTable::default(),
        }
    }
}

impl VertexData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a vertex, dropping it if it lies within 0.5px of the last
    /// one added. Keeps degenerate arc tessellations from producing
    /// zero-length edges.
    pub fn add(&mut self, p: Point) {
        let dedup = self
            .last_vertex
            .map(|last| {
                let d = last.sub(p);
                d.x * d.x + d.y * d.y <= 0.25
            })
            .unwrap_or(false);
        if !dedup {
            self.vertices.push(p);
            self.last_vertex = Some(p);
        }
    }

    pub fn add_xy(&mut self, x: f64, y: f64) {
        self.add(Point::new(x, y));
    }

    /// Tessellates an arc of `radius` about `(x0, y0)` from `start_angle` to
    /// `end_angle`, clockwise if `clockwise`. Step size is chosen so the
    /// chord deviates from the true arc by at most ~0.01px (more at very
    /// small radii).
    pub fn add_arc(
        &mut self,
        start_angle: f64,
        end_angle: f64,
        radius: f64,
        x0: f64,
        y0: f64,
        clockwise: bool,
    ) {
        let mut radius = radius;
        let mut deviation: f64 = 0.01;
        if radius < 0.5 {
            radius = 0.5;
        }
        if radius < 150.0 {
            deviation *= radius / 150.0;
        }
        if deviation < 0.01 {
            deviation = 0.01;
        }
        let mut step = 2.0 * (1.0 - deviation / radius).acos();

        let mut start_angle = start_angle;
        let mut end_angle = end_angle;
        if start_angle < 0.0 {
            start_angle += 2.0 * std::f64::consts::PI;
        }
        if end_angle < 0.0 {
            end_angle += 2.0 * std::f64::consts::PI;
        }

        let mut theta = start_angle;
        let mut arc = end_angle - start_angle;
        if arc < 0.0 {
            arc += 2.0 * std::f64::consts::PI;
        }
        if clockwise {
            arc = 2.0 * std::f64::consts::PI - arc;
        }

        let n = (arc / step).ceil() as i64;
        if n < 2 {
            return;
        }
        step = arc / (n - 1) as f64;
        if clockwise {
            step = -step;
        }

        for _ in 0..n {
            let x = radius * theta.cos() + x0;
            let y = radius * theta.sin() + y0;
            theta += step;
            self.add_xy(x, y);
        }
    }

    pub fn add_regular_polygon(
        &mut self,
        vertex_radius: f64,
        start_angle: f64,
        num_sides: u32,
        x0: f64,
        y0: f64,
    ) {
        if num_sides < 3 {
            return;
        }
        let step = 2.0 * std::f64::consts::PI / num_sides as f64;
        let mut theta = start_angle;
        for _ in 0..num_sides {
            self.add_xy(
                vertex_radius * theta.cos() + x0,
                vertex_radius * theta.sin() + y0,
            );
            theta += step;
        }
    }

    pub fn add_rectangle_at(&mut self, x_size: f64, y_size: f64, x0: f64, y0: f64) {
        let x1 = x0 - x_size / 2.0;
        let y1 = y0 - y_size / 2.0;
        let x2 = x1 + x_size;
        let y2 = y1 + y_size;
        self.add_xy(x1, y1);
        self.add_xy(x2, y1);
        self.add_xy(x2, y2);
        self.add_xy(x1, y2);
    }

    pub fn add_rectangle(&mut self, x_size: f64, y_size: f64) {
        self.add_rectangle_at(x_size, y_size, 0.0, 0.0);
    }

    pub fn rotate(&mut self, theta: f64) {
        if theta == 0.0 {
            return;
        }
        for v in self.vertices.iter_mut() {
            *v = v.rotate(theta);
        }
    }

    pub fn scale(&mut self, scale_x: f64, scale_y: f64) {
        for v in self.vertices.iter_mut() {
            v.x *= scale_x;
            v.y *= scale_y;
        }
    }

    pub fn shift(&mut self, dx: f64, dy: f64) {
        for v in self.vertices.iter_mut() {
            v.x += dx;
            v.y += dy;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn vertices(&self) -> &[Point] {
        &self.vertices
    }

    /// Computes the bounding box and scanline table. Must be called once,
    /// after all vertices have been added and any rotate/scale/shift
    /// transforms applied; the type is treated as immutable afterwards.
    pub fn initialise(&mut self) -> Result<(), GerberError> {
        if self.vertices.is_empty() {
            return Ok(());
        }

        let mut minx = f64::MAX;
        let mut miny = f64::MAX;
        let mut maxx = f64::MIN;
        let mut maxy = f64::MIN;
        for p in &self.vertices {
            minx = minx.min(p.x);
            miny = miny.min(p.y);
            maxx = maxx.max(p.x);
            maxy = maxy.max(p.y);
        }
        self.min = Point::new(minx, miny);
        self.max = Point::new(maxx, maxy);
        self.pixel_height = round_dot(maxy - miny);
        self.pixel_width = round_dot(maxx - minx);

        self.scanline = crate::scanline::build_table(&self.vertices, self.min, self.pixel_height)?;
        Ok(())
    }

    pub fn scanline(&self) -> &ScanlineTable {
        &self.scanline
    }
}

/// A placed instance of an aperture's vertex data: an offset, a polarity,
/// and a creation-order tiebreak for stable compositing.
#[derive(Debug, Clone)]
pub struct Polygon {
    pub vdata: Rc<VertexData>,
    pub offset: Point,
    pub polarity: Polarity,
    pub number: u64,
    pub pixel_min_x: i32,
    pub pixel_max_x: i32,
    pub pixel_min_y: i32,
    pub pixel_max_y: i32,
    pub pixel_offset_x: i32,
}

impl Polygon {
    pub fn new(vdata: Rc<VertexData>, offset: Point, polarity: Polarity, number: u64) -> Self {
        let pixel_min_x = round_dot(vdata.min.x + offset.x);
        let pixel_max_x = pixel_min_x + vdata.pixel_width;
        let pixel_min_y = round_dot(vdata.min.y + offset.y);
        let pixel_max_y = pixel_min_y + vdata.pixel_height;
        let pixel_offset_x = round_dot(offset.x);

        Polygon {
            vdata,
            offset,
            polarity,
            number,
            pixel_min_x,
            pixel_max_x,
            pixel_min_y,
            pixel_max_y,
            pixel_offset_x,
        }
    }

    pub fn row(&self, y: i32) -> &[i32] {
        if y < self.pixel_min_y || y > self.pixel_max_y {
            return &[];
        }
        self.vdata.scanline().row((y - self.pixel_min_y) as usize)
    }
}

impl PartialEq for Polygon {
    fn eq(&self, other: &Self) -> bool {
        self.number == other.number
    }
}
impl Eq for Polygon {}

impl PartialOrd for Polygon {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Polygon {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.pixel_min_y
            .cmp(&other.pixel_min_y)
            .then(self.number.cmp(&other.number))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_dot_matches_round_half_away_from_zero() {
        assert_eq!(round_dot(0.5), 1);
        assert_eq!(round_dot(-0.5), -1);
        assert_eq!(round_dot(1.49), 1);
        assert_eq!(round_dot(-1.49), -1);
    }

    #[test]
    fn rectangle_vertex_data_initialises_bbox() {
        let mut vdata = VertexData::new();
        vdata.add_rectangle(10.0, 4.0);
        vdata.initialise().unwrap();
        assert_eq!(vdata.pixel_width, 10);
        assert_eq!(vdata.pixel_height, 4);
    }

    #[test]
    fn adjacent_vertices_within_half_pixel_are_deduped() {
        let mut vdata = VertexData::new();
        vdata.add_xy(0.0, 0.0);
        vdata.add_xy(0.1, 0.1);
        assert_eq!(vdata.vertices().len(), 1);
    }

    #[test]
    fn line_intersection() {
        let horizontal = Line::through(Point::new(0.0, 1.0), Point::new(1.0, 1.0));
        let vertical = Line::through(Point::new(1.0, 0.0), Point::new(1.0, 1.0));
        let p = horizontal.intersect(vertical);
        assert!((p.x - 1.0).abs() < 1e-9);
        assert!((p.y - 1.0).abs() < 1e-9);
    }

    #[test]
    fn parallel_lines_intersect_at_origin() {
        let a = Line::through(Point::new(0.0, 0.0), Point::new(1.0, 0.0));
        let b = Line::through(Point::new(0.0, 1.0), Point::new(1.0, 1.0));
        let p = a.intersect(b);
        assert_eq!(p, Point::zero());
    }
}
