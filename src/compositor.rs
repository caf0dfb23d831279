//! Multi-file polygon compositing into a packed monochrome raster: a
//! two-tier active-polygon sweep (promote by `pixel_min_y`, evict by
//! `pixel_max_y`, paint in creation-number order) feeding a lookup-table
//! byte painter.

use crate::geometry::Polygon;
use crate::parsing::gerber::Polarity;
use crate::sink::StripSink;

/// Final raster dimensions and the popcount-based dark-pixel total used for
/// `-a/--area` reporting.
pub struct CompositeResult {
    pub width: u32,
    pub height: u32,
    pub dark_pixel_count: u64,
}

/// Unions every polygon's bounding box (regardless of polarity — a Clear
/// polygon still defines drawn extent) and pads it by `border_px` on all
/// sides.
pub fn bounds(polygons: &[Polygon], border_px: i32) -> (i32, i32, i32, i32) {
    if polygons.is_empty() {
        return (0, 0, 0, 0);
    }
    let min_x = polygons.iter().map(|p| p.pixel_min_x).min().unwrap() - border_px;
    let max_x = polygons.iter().map(|p| p.pixel_max_x).max().unwrap() + border_px;
    let min_y = polygons.iter().map(|p| p.pixel_min_y).min().unwrap() - border_px;
    let max_y = polygons.iter().map(|p| p.pixel_max_y).max().unwrap() + border_px;
    (min_x, min_y, max_x, max_y)
}

/// Rounds up to the next multiple of 8 so every row ends on a whole byte,
/// with no partially-used trailing bits to mask off later.
pub fn round_up_to_byte_multiple(width: i32) -> u32 {
    let w = width.max(1) as u32;
    (w + 7) / 8 * 8
}

/// Paints (or clears) the inclusive pixel run `[x1, x2]` of a single packed
/// row, MSB-left — `x2` is itself the last lit pixel, so `x1 == x2` paints a
/// single bit. `Dark` sets bits (OR), `Clear` unsets them (AND-NOT).
fn paint_run(row: &mut [u8], x1: i32, x2: i32, polarity: Polarity) {
    let width_bits = (row.len() * 8) as i32;
    if width_bits == 0 {
        return;
    }
    let x1 = x1.max(0);
    let x2 = x2.min(width_bits - 1);
    if x1 > x2 {
        return;
    }
    let x1 = x1 as usize;
    let x2 = x2 as usize;
    let byte1 = x1 / 8;
    let bit1 = x1 % 8;
    let byte2 = x2 / 8;
    let bit2 = x2 % 8;

    for byte_idx in byte1..=byte2 {
        let mut mask: u8 = 0xFF;
        if byte_idx == byte1 {
            mask &= 0xFFu8 >> bit1;
        }
        if byte_idx == byte2 {
            mask &= if bit2 == 7 {
                0xFFu8
            } else {
                !(0xFFu8 >> (bit2 + 1))
            };
        }
        match polarity {
            Polarity::Dark => row[byte_idx] |= mask,
            Polarity::Clear => row[byte_idx] &= !mask,
        }
    }
}

/// Composites `polygons` (already merged across every loaded file, sharing
/// one global creation-number sequence) into a packed raster and hands each
/// group of `rows_per_strip` rows to `sink`.
///
/// `background_dark` selects the fill value a strip starts from before any
/// polygon paints over it: the CLI's negative flag XOR'd with the first
/// file's image polarity.
pub fn composite<S: StripSink>(
    mut polygons: Vec<Polygon>,
    background_dark: bool,
    border_px: i32,
    rows_per_strip: u32,
    sink: &mut S,
) -> Result<CompositeResult, crate::error::GerberError> {
    polygons.sort();

    let (min_x, min_y, max_x, max_y) = bounds(&polygons, border_px);
    let width = round_up_to_byte_multiple(max_x - min_x + 1);
    let height = (max_y - min_y + 1).max(1) as u32;
    let bytes_per_row = (width as usize) / 8;
    let fill_byte = if background_dark { 0xFFu8 } else { 0x00u8 };

    let mut active: Vec<&Polygon> = Vec::new();
    let mut next_index = 0usize;
    let mut dark_pixel_count: u64 = 0;
    let mut strip_rows: Vec<Vec<u8>> = Vec::with_capacity(rows_per_strip as usize);

    for row_idx in 0..height {
        let y = min_y + row_idx as i32;

        while next_index < polygons.len() && polygons[next_index].pixel_min_y <= y {
            active.push(&polygons[next_index]);
            next_index += 1;
        }
        active.retain(|p| p.pixel_max_y >= y);
        active.sort_by_key(|p| p.number);

        let mut row = vec![fill_byte; bytes_per_row];
        for poly in &active {
            let intersections = poly.row(y);
            for pair in intersections.chunks_exact(2) {
                let x1 = pair[0] + poly.pixel_offset_x - min_x;
                let x2 = pair[1] + poly.pixel_offset_x - min_x;
                paint_run(&mut row, x1, x2, poly.polarity);
            }
        }

        dark_pixel_count += row.iter().map(|b| b.count_ones() as u64).sum::<u64>();
        strip_rows.push(row);

        if strip_rows.len() as u32 == rows_per_strip || row_idx == height - 1 {
            sink.write_strip(&strip_rows)?;
            strip_rows.clear();
        }
    }

    sink.finish()?;

    Ok(CompositeResult {
        width,
        height,
        dark_pixel_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paints_dark_run_across_a_byte_boundary() {
        let mut row = vec![0u8; 2];
        paint_run(&mut row, 5, 11, Polarity::Dark);
        assert_eq!(row, [0b0000_0111, 0b1111_0000]);
    }

    #[test]
    fn clears_a_run_from_a_filled_row() {
        let mut row = vec![0xFFu8; 2];
        paint_run(&mut row, 5, 11, Polarity::Clear);
        assert_eq!(row, [0b1111_1000, 0b0000_1111]);
    }

    #[test]
    fn run_spanning_a_whole_byte_in_the_middle() {
        let mut row = vec![0u8; 3];
        paint_run(&mut row, 8, 16, Polarity::Dark);
        assert_eq!(row, [0x00, 0xFF, 0x80]);
    }

    #[test]
    fn single_pixel_run_sets_one_bit() {
        let mut row = vec![0u8; 1];
        paint_run(&mut row, 3, 3, Polarity::Dark);
        assert_eq!(row, [0b0001_0000]);
    }

    #[test]
    fn byte_multiple_rounding_never_leaves_partial_bits() {
        assert_eq!(round_up_to_byte_multiple(1), 8);
        assert_eq!(round_up_to_byte_multiple(8), 8);
        assert_eq!(round_up_to_byte_multiple(9), 16);
    }
}
