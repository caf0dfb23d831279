//! Scanline fill edge table and sweep. Produces a
//! [`crate::geometry::ScanlineTable`] consumed later by row index rather
//! than an internal cursor, so the same table can be read concurrently by
//! several strip workers.

use crate::error::GerberError;
use crate::geometry::{round_dot, Point, ScanlineTable};

struct Edge {
    delta_x: f64,
    delta_y: f64,
    c: f64,
    include_bottom: bool,
    ymin: f64,
    ymax: f64,
}

impl Edge {
    fn new(p1: Point, p2: Point) -> Self {
        let ymin = p1.y.min(p2.y);
        let ymax = p1.y.max(p2.y);
        let delta_x = p2.x - p1.x;
        let delta_y = p2.y - p1.y;
        let c = p1.x * delta_y - p1.y * delta_x;
        Edge {
            delta_x,
            delta_y,
            c,
            include_bottom: false,
            ymin,
            ymax,
        }
    }

    fn x_at(&self, y: f64) -> f64 {
        (y * self.delta_x + self.c) / self.delta_y
    }
}

/// Builds the scanline table for a closed polygon boundary given by
/// `vertices` (in original_source's unclosed-loop convention: the edge from
/// the last vertex back to the first is included). `pixel_height` is
/// `VertexData::pixel_height`, already computed by the caller.
pub fn build_table(
    vertices: &[Point],
    min: Point,
    pixel_height: i32,
) -> Result<ScanlineTable, GerberError> {
    if vertices.is_empty() {
        return Ok(ScanlineTable::default());
    }

    // Build the edge table, skipping horizontal edges entirely — they
    // contribute no scanline crossings.
    let mut edges = Vec::new();
    let mut p1 = *vertices.last().unwrap();
    for &p2 in vertices {
        if p1.y != p2.y {
            edges.push(Edge::new(p1, p2));
        }
        p1 = p2;
    }

    if edges.is_empty() {
        return Ok(ScanlineTable::default());
    }

    // Flag edges whose bottom vertex is a local minimum (both neighbouring
    // edges descend into it) so the sweep doesn't evict them one row early
    // and miss the bottommost pixel row.
    let len = edges.len();
    let mut prev = len - 1;
    for i in 0..len {
        if edges[i].delta_y < 0.0 && edges[prev].delta_y > 0.0 {
            edges[prev].include_bottom = true;
            edges[i].include_bottom = true;
        }
        prev = i;
    }

    // Degenerate case: a polygon less than one pixel tall is treated as a
    // single horizontal line from minx to maxx.
    if pixel_height == 0 {
        let minx = vertices.iter().map(|p| p.x).fold(f64::MAX, f64::min);
        let maxx = vertices.iter().map(|p| p.x).fold(f64::MIN, f64::max);
        return Ok(ScanlineTable::from_parts(
            vec![round_dot(minx), round_dot(maxx)],
            vec![0, 2],
        ));
    }

    edges.sort_by(|a, b| a.ymin.partial_cmp(&b.ymin).unwrap());

    let mut gx_intersects = Vec::new();
    let mut row_offsets = vec![0u32];
    let mut active: Vec<usize> = Vec::new();
    let mut next_edge = 0usize;

    let mut y = round_dot(min.y) as f64 + 0.5;
    for _ in 0..=pixel_height {
        while next_edge < edges.len() && y >= edges[next_edge].ymin {
            active.push(next_edge);
            next_edge += 1;
        }

        active.retain(|&i| !(y > edges[i].ymax || (y == edges[i].ymax && !edges[i].include_bottom)));

        let mut row: Vec<i32> = active.iter().map(|&i| round_dot(edges[i].x_at(y))).collect();
        row.sort_unstable();

        if row.len() % 2 != 0 {
            return Err(GerberError::UnevenScanline);
        }

        gx_intersects.extend_from_slice(&row);
        row_offsets.push(gx_intersects.len() as u32);

        y += 1.0;
    }

    Ok(ScanlineTable::from_parts(gx_intersects, row_offsets))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::VertexData;

    #[test]
    fn rectangle_every_row_has_two_intersections() {
        let mut vdata = VertexData::new();
        vdata.add_rectangle(10.0, 4.0);
        vdata.initialise().unwrap();
        let table = vdata.scanline();
        assert_eq!(table.row_count(), (vdata.pixel_height + 1) as usize);
        for i in 0..table.row_count() {
            assert_eq!(table.row(i).len(), 2);
        }
    }

    #[test]
    fn concave_polygon_rows_are_even() {
        // A 5-vertex concave "house with a notch" shape: every row's
        // intersection count must stay even even at the reflex vertex.
        let mut vdata = VertexData::new();
        for (x, y) in [
            (0.0, 0.0),
            (1000.0, 0.0),
            (1000.0, 1000.0),
            (500.0, 500.0),
            (0.0, 1000.0),
        ] {
            vdata.add_xy(x, y);
        }
        vdata.initialise().unwrap();
        let table = vdata.scanline();
        for i in 0..table.row_count() {
            assert_eq!(table.row(i).len() % 2, 0);
        }
    }

    #[test]
    fn sub_pixel_polygon_is_a_single_row() {
        let mut vdata = VertexData::new();
        vdata.add_xy(0.0, 0.0);
        vdata.add_xy(5.0, 0.0);
        vdata.add_xy(5.0, 0.3);
        vdata.add_xy(0.0, 0.3);
        vdata.initialise().unwrap();
        assert_eq!(vdata.pixel_height, 0);
        let table = vdata.scanline();
        assert_eq!(table.row_count(), 1);
        assert_eq!(table.row(0), &[0, 5]);
    }
}
