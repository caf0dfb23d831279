//! Aperture primitive rendering. Each primitive produces one or more
//! `(VertexData, Polarity)` templates in pixel units; the caller
//! ([`crate::machine`]) wraps them as [`crate::geometry::Polygon`]s with a
//! concrete offset and creation number at flash time.
//!
//! Composite macros (several primitives sharing one `%AM` name) are a plain
//! `Vec<MacroContent>`; `render_macro` walks the vec in order, accumulating
//! `$n` variable bindings as `VariableDefinition` entries are encountered.

use std::f64::consts::PI;
use std::rc::Rc;

use crate::error::GerberError;
use crate::geometry::VertexData;
use crate::parsing::gerber::{ApertureTemplate, MacroContent, Polarity};

pub type RenderedPrimitive = (Rc<VertexData>, Polarity);

fn finish(mut vdata: VertexData) -> Result<Rc<VertexData>, GerberError> {
    vdata.initialise()?;
    Ok(Rc::new(vdata))
}

fn clamp_min(value: f64, min: f64) -> f64 {
    if value < min {
        min
    } else {
        value
    }
}

/// Renders one of the four standard aperture shapes (`C`, `R`, `O`, `P`)
/// directly from their literal AD parameters (RS-274X does not allow `$n`
/// expressions in a standard aperture definition, only in `%AM` macros).
pub fn render_standard(
    template: &ApertureTemplate,
    dots_per_unit: f64,
    grow: f64,
) -> Result<(Vec<RenderedPrimitive>, f64, f64), GerberError> {
    match template {
        ApertureTemplate::Circle {
            diameter,
            hole_diameter,
        } => {
            let size = *diameter as f64 * dots_per_unit;
            let (polys, width, height) = render_circle_or_orbround(size, size, grow)?;
            let mut polys = polys;
            if let Some(hole) = hole_diameter {
                polys.push(render_round_hole(*hole as f64 * dots_per_unit)?);
            }
            Ok((polys, width, height))
        }
        ApertureTemplate::Obround {
            width,
            height,
            hole_diameter,
        } => {
            let xsize = *width as f64 * dots_per_unit;
            let ysize = *height as f64 * dots_per_unit;
            let (polys, w, h) = render_circle_or_orbround(xsize, ysize, grow)?;
            let mut polys = polys;
            if let Some(hole) = hole_diameter {
                polys.push(render_round_hole(*hole as f64 * dots_per_unit)?);
            }
            Ok((polys, w, h))
        }
        ApertureTemplate::Rectangle {
            width,
            height,
            hole_diameter,
        } => {
            // Intentional sliver-avoidance fix: a -0.5 pre-grow adjustment on
            // both dimensions, to match existing film output.
            let mut x_size = *width as f64 * dots_per_unit - 0.5 + grow;
            let mut y_size = *height as f64 * dots_per_unit - 0.5 + grow;
            if x_size <= 0.0 {
                x_size = 1.0;
            }
            if y_size <= 0.0 {
                y_size = 1.0;
            }

            let mut vdata = VertexData::new();
            vdata.add_rectangle(x_size, y_size);
            let mut polys = vec![(finish(vdata)?, Polarity::Dark)];
            if let Some(hole) = hole_diameter {
                polys.push(render_round_hole(*hole as f64 * dots_per_unit)?);
            }
            Ok((polys, x_size, y_size))
        }
        ApertureTemplate::Polygon {
            diameter,
            num_vertices,
            rotation,
            hole_diameter,
        } => {
            let mut diameter = *diameter as f64 * dots_per_unit + grow;
            if *num_vertices < 3 || *num_vertices > 24 {
                return Err(GerberError::ParameterOutOfRange(
                    "number of sides out of range 3 to 24".to_string(),
                ));
            }
            if diameter < 1.0 {
                diameter = 1.0;
            }
            let rotation = rotation.map(|r| r as f64 * PI / 180.0).unwrap_or(0.0);

            let mut vdata = VertexData::new();
            vdata.add_regular_polygon(diameter / 2.0, rotation, *num_vertices, 0.0, 0.0);
            let mut polys = vec![(finish(vdata)?, Polarity::Dark)];
            if let Some(hole) = hole_diameter {
                polys.push(render_round_hole(*hole as f64 * dots_per_unit)?);
            }
            Ok((polys, 0.0, 0.0))
        }
        ApertureTemplate::Macro { .. } => unreachable!("macro templates go through render_macro"),
    }
}

fn render_round_hole(diameter: f64) -> Result<RenderedPrimitive, GerberError> {
    let mut vdata = VertexData::new();
    vdata.add_arc(0.0, 2.0 * PI, diameter / 2.0, 0.0, 0.0, false);
    Ok((finish(vdata)?, Polarity::Clear))
}

/// Shared body of standard circle/orbround: two semicircular caps, wider
/// side picks orientation. A plain circle is the degenerate orbround where
/// `xsize == ysize`.
fn render_circle_or_orbround(
    mut xsize: f64,
    mut ysize: f64,
    grow: f64,
) -> Result<(Vec<RenderedPrimitive>, f64, f64), GerberError> {
    if xsize < 0.0 || ysize < 0.0 {
        return Err(GerberError::ParameterOutOfRange(
            "dimension must be > 0".to_string(),
        ));
    }
    xsize += grow;
    ysize += grow;
    if xsize < 1.0 {
        xsize = 1.0;
    }
    if ysize < 1.0 {
        ysize = 1.0;
    }

    let arc_offset = (xsize - ysize) / 2.0;
    let mut vdata = VertexData::new();
    if xsize > ysize {
        vdata.add_arc(0.5 * PI, 1.5 * PI, ysize / 2.0, -arc_offset, 0.0, false);
        vdata.add_arc(1.5 * PI, 2.5 * PI, ysize / 2.0, arc_offset, 0.0, false);
    } else {
        vdata.add_arc(0.0, PI, xsize / 2.0, 0.0, -arc_offset, false);
        vdata.add_arc(PI, 2.0 * PI, xsize / 2.0, 0.0, arc_offset, false);
    }
    Ok((vec![(finish(vdata)?, Polarity::Dark)], xsize, ysize))
}

/// Evaluates an `%AM` macro's primitive list against `bindings` (the D-code
/// instantiation's `$1..$N` arguments, 0-indexed as `bindings[n-1]`).
/// `VariableDefinition` entries extend `bindings` in place so later
/// primitives in the same macro see updated values, matching the RS-274X
/// rule that macro variables may be (re)assigned between primitives.
pub fn render_macro(
    content: &[MacroContent],
    bindings: &[f64],
    dots_per_unit: f64,
    grow: f64,
) -> Result<Vec<RenderedPrimitive>, GerberError> {
    let mut bindings = bindings.to_vec();
    let mut output = Vec::new();

    for item in content {
        match item {
            MacroContent::Comment(_) => {}
            MacroContent::VariableDefinition {
                variable,
                expression,
            } => {
                let value = expression.evaluate(&bindings)?;
                let index = *variable as usize - 1;
                if bindings.len() <= index {
                    bindings.resize(index + 1, 0.0);
                }
                bindings[index] = value;
            }
            MacroContent::Circle {
                exposure,
                diameter,
                center_position,
                angle: _,
            } => {
                let diameter = diameter.evaluate(&bindings)? * dots_per_unit;
                let (x, y) = (
                    center_position.0.evaluate(&bindings)? * dots_per_unit,
                    center_position.1.evaluate(&bindings)? * dots_per_unit,
                );
                let (polys, _, _) = render_circle_or_orbround(diameter, diameter, grow)?;
                for (vdata, _) in polys {
                    let mut vdata = (*vdata).clone();
                    vdata.shift(x, y);
                    vdata.initialise()?;
                    output.push((Rc::new(vdata), *exposure));
                }
            }
            MacroContent::VectorLine {
                exposure,
                width,
                start,
                end,
                angle,
            } => {
                let width = width.evaluate(&bindings)? * dots_per_unit + grow;
                let mut start_pt = crate::geometry::Point::new(
                    start.0.evaluate(&bindings)? * dots_per_unit,
                    start.1.evaluate(&bindings)? * dots_per_unit,
                );
                let mut end_pt = crate::geometry::Point::new(
                    end.0.evaluate(&bindings)? * dots_per_unit,
                    end.1.evaluate(&bindings)? * dots_per_unit,
                );
                let theta = angle.evaluate(&bindings)? * PI / 180.0;
                start_pt = start_pt.rotate(theta);
                end_pt = end_pt.rotate(theta);
                let length = end_pt.sub(start_pt).magnitude();
                let center = start_pt.add(end_pt).scale(0.5);
                let line_theta = end_pt.sub(start_pt).angle();

                let height = clamp_min(width, 1.0);
                let length = clamp_min(length, 1.0);

                let mut vdata = VertexData::new();
                vdata.add_rectangle(length, height);
                vdata.rotate(line_theta);
                vdata.shift(center.x, center.y);
                output.push((finish(vdata)?, *exposure));
            }
            MacroContent::CenterLine {
                exposure,
                size,
                center,
                angle,
            } => {
                let width = size.0.evaluate(&bindings)? * dots_per_unit + grow;
                let height = size.1.evaluate(&bindings)? * dots_per_unit + grow;
                let mut centre = crate::geometry::Point::new(
                    center.0.evaluate(&bindings)? * dots_per_unit,
                    -(center.1.evaluate(&bindings)? * dots_per_unit),
                );
                let theta = angle.evaluate(&bindings)? * PI / 180.0;
                centre = centre.rotate(theta);

                let width = clamp_min(width, 1.0);
                let height = clamp_min(height, 1.0);

                let mut vdata = VertexData::new();
                vdata.add_rectangle(width, height);
                vdata.rotate(theta);
                vdata.shift(centre.x, centre.y);
                output.push((finish(vdata)?, *exposure));
            }
            MacroContent::Outline {
                exposure,
                coordinates,
                angle,
            } => {
                let rotation = angle.evaluate(&bindings)? * PI / 180.0;
                let mut vdata = VertexData::new();
                for (x, y) in coordinates {
                    let p = crate::geometry::Point::new(
                        x.evaluate(&bindings)? * dots_per_unit,
                        y.evaluate(&bindings)? * dots_per_unit,
                    )
                    .rotate(rotation);
                    vdata.add(p);
                }
                output.push((finish(vdata)?, *exposure));
            }
            MacroContent::Polygon {
                exposure,
                num_vertices,
                center_position,
                diameter,
                angle,
            } => {
                if *num_vertices < 3 || *num_vertices > 24 {
                    return Err(GerberError::ParameterOutOfRange(
                        "number of sides out of range 3 to 24".to_string(),
                    ));
                }
                let mut diameter = diameter.evaluate(&bindings)? * dots_per_unit + grow;
                if diameter < 1.0 {
                    diameter = 1.0;
                }
                let (x, y) = (
                    center_position.0.evaluate(&bindings)? * dots_per_unit,
                    center_position.1.evaluate(&bindings)? * dots_per_unit,
                );
                let rotation = angle.evaluate(&bindings)? * PI / 180.0;
                let mut vdata = VertexData::new();
                vdata.add_regular_polygon(diameter / 2.0, rotation, *num_vertices, x, y);
                output.push((finish(vdata)?, *exposure));
            }
            MacroContent::Moire {
                center_position,
                outer_diameter,
                ring_thickness,
                ring_gap,
                max_rings,
                cross_hair_thickness,
                cross_hair_length,
                angle,
            } => {
                let (x, y) = (
                    center_position.0.evaluate(&bindings)? * dots_per_unit,
                    center_position.1.evaluate(&bindings)? * dots_per_unit,
                );
                let mut diameter = outer_diameter.evaluate(&bindings)? * dots_per_unit + grow;
                let mut thickness = ring_thickness.evaluate(&bindings)? * dots_per_unit + grow;
                let gap = clamp_min(ring_gap.evaluate(&bindings)? * dots_per_unit - grow, 1.0);
                let num_rings = max_rings.evaluate(&bindings)? as i64;
                let hair_thickness = clamp_min(
                    cross_hair_thickness.evaluate(&bindings)? * dots_per_unit + grow,
                    1.0,
                );
                let hair_length = clamp_min(
                    cross_hair_length.evaluate(&bindings)? * dots_per_unit + grow,
                    1.0,
                );
                let rotation = (angle.evaluate(&bindings)? * PI / 180.0) % (PI / 2.0);

                for _ in 0..num_rings {
                    if diameter < 1.0 {
                        break;
                    }
                    if thickness > diameter / 2.0 {
                        thickness = diameter / 2.0;
                    }
                    let mut vdata = VertexData::new();
                    vdata.add_arc(0.0, 2.0 * PI, diameter / 2.0, x, y, false);
                    vdata.add_arc(2.0 * PI, 0.0, diameter / 2.0 - thickness, x, y, true);
                    vdata.rotate(rotation);
                    output.push((finish(vdata)?, Polarity::Dark));
                    diameter -= 2.0 * (thickness + gap);
                }

                let mut vertical = VertexData::new();
                vertical.add_rectangle_at(hair_thickness, hair_length, x, y);
                vertical.rotate(rotation);
                output.push((finish(vertical)?, Polarity::Dark));

                let mut horizontal = VertexData::new();
                horizontal.add_rectangle_at(hair_length, hair_thickness, x, y);
                horizontal.rotate(rotation);
                output.push((finish(horizontal)?, Polarity::Dark));
            }
            MacroContent::Thermal {
                center_point,
                outer_diameter,
                inner_diameter,
                gap_thickness,
                angle,
            } => {
                let rotation = (angle.evaluate(&bindings)? * PI / 180.0) % (PI / 2.0);
                let mut hair_thickness = gap_thickness.evaluate(&bindings)? * dots_per_unit + grow;
                let mut inside_radius =
                    inner_diameter.evaluate(&bindings)? / 2.0 * dots_per_unit - grow / 2.0;
                let mut outside_radius =
                    outer_diameter.evaluate(&bindings)? / 2.0 * dots_per_unit + grow / 2.0;
                let (x, y) = (
                    center_point.0.evaluate(&bindings)? * dots_per_unit,
                    center_point.1.evaluate(&bindings)? * dots_per_unit,
                );

                if hair_thickness >= 2.4 * inside_radius {
                    hair_thickness = 2.4 * inside_radius;
                }
                hair_thickness = clamp_min(hair_thickness, 1.0);
                inside_radius = clamp_min(inside_radius, 1.0);
                if outside_radius < 2.0 {
                    continue;
                }
                if inside_radius >= outside_radius {
                    return Err(GerberError::ParameterOutOfRange(
                        "inside radius >= outside radius".to_string(),
                    ));
                }

                let arg_out = PI / 2.0 - (hair_thickness / 2.0 / outside_radius).acos();
                let arg_in = PI / 2.0 - (hair_thickness / 2.0 / inside_radius).acos();

                let mut theta = rotation;
                for _ in 0..4 {
                    let mut vdata = VertexData::new();
                    vdata.add_arc(
                        theta + arg_out,
                        theta + (PI / 2.0 - arg_out),
                        outside_radius,
                        x,
                        y,
                        false,
                    );
                    vdata.add_arc(
                        theta + (PI / 2.0 - arg_in),
                        theta + arg_in,
                        inside_radius,
                        x,
                        y,
                        true,
                    );
                    output.push((finish(vdata)?, Polarity::Dark));
                    theta += PI / 2.0;
                }
            }
        }
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::Expr;

    #[test]
    fn standard_circle_diameter_50_mil_at_1000dpi() {
        // A 0.050" circle at 1000dpi should come out to 50px diameter.
        let template = ApertureTemplate::Circle {
            diameter: 0.050,
            hole_diameter: None,
        };
        let (polys, width, height) = render_standard(&template, 1000.0, 0.0).unwrap();
        assert_eq!(polys.len(), 1);
        assert_eq!(width, 50.0);
        assert_eq!(height, 50.0);
        assert_eq!(polys[0].0.pixel_width, 50);
    }

    #[test]
    fn standard_rectangle_applies_sliver_quirk() {
        let template = ApertureTemplate::Rectangle {
            width: 0.020,
            height: 0.010,
            hole_diameter: None,
        };
        let (polys, width, height) = render_standard(&template, 1000.0, 0.0).unwrap();
        assert_eq!(width, 0.020 * 1000.0 - 0.5);
        assert_eq!(height, 0.010 * 1000.0 - 0.5);
        assert_eq!(polys.len(), 1);
    }

    #[test]
    fn standard_polygon_rejects_out_of_range_sides() {
        let template = ApertureTemplate::Polygon {
            diameter: 1.0,
            num_vertices: 2,
            rotation: None,
            hole_diameter: None,
        };
        assert!(render_standard(&template, 1000.0, 0.0).is_err());
    }

    #[test]
    fn macro_special_circle_with_variable_diameter() {
        let content = vec![MacroContent::Circle {
            exposure: Polarity::Dark,
            diameter: Expr::Variable(1),
            center_position: (Expr::Constant(0.0), Expr::Constant(0.0)),
            angle: Expr::Constant(0.0),
        }];
        let polys = render_macro(&content, &[0.030], 1000.0, 0.0).unwrap();
        assert_eq!(polys.len(), 1);
        assert_eq!(polys[0].0.pixel_width, 30);
    }
}
