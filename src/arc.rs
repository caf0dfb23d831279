//! Arc resolution: given an arc's start/end points and its I/J offset,
//! finds the centre, radius, and sweep direction the plotter would have
//! used, for both single- and multi-quadrant modes.

use crate::geometry::{Line, Point};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArcDirection {
    Clockwise,
    CounterClockwise,
}

#[derive(Debug, Clone, Copy)]
pub struct ResolvedArc {
    pub center: Point,
    pub radius: f64,
    pub start_angle: f64,
    pub end_angle: f64,
    pub stopped_point: Point,
    pub is_degenerate: bool,
}

/// A warning raised during resolution; the caller decides how to surface it
/// (appended to the interpreter's warning list).
#[derive(Debug, Clone)]
pub enum ArcWarning {
    ForcedMultiQuadrant,
    CentreMismatch { offset_units: f64 },
}

pub struct ArcInput {
    pub start: Point,
    pub end: Point,
    pub i: f64,
    pub j: f64,
    pub direction: ArcDirection,
    pub is_multi_quadrant: bool,
    pub coord_precision: f64,
}

/// Resolves `(start, end, I, J, direction, quadrant mode)` into a canonical
/// arc. Mutates nothing; any ambiguity-breaking adjustments to I/J are
/// returned via `resolved_ij` rather than written back into caller state.
pub fn resolve(input: &ArcInput, warnings: &mut Vec<String>) -> ResolvedArc {
    let ArcInput {
        start,
        end,
        mut i,
        mut j,
        direction,
        is_multi_quadrant,
        coord_precision,
    } = *input;

    let mut is_multi_quadrant = is_multi_quadrant;
    if (i < 0.0 || j < 0.0) && !is_multi_quadrant {
        warnings.push(
            "negative I or J found in single quadrant mode. Forcing to 360 degree mode."
                .to_string(),
        );
        is_multi_quadrant = true;
    }

    if !is_multi_quadrant && Point::new(i, j).magnitude() >= 0.01 {
        // Single-quadrant mode: I/J are unsigned magnitudes, one of four
        // candidate centres. Pick the candidate whose sweep direction
        // matches `direction` and whose radius mismatch between start and
        // end is smallest.
        let se = end.sub(start);
        let mut min_delta_r = f64::MAX;
        let mut winner = (i, j);

        for k in 0..4 {
            let delta_r = (Point::new(i, j).magnitude()
                - Point::new(i, j).add(start).sub(end).magnitude())
            .abs();
            let mut theta = se.angle() - Point::new(i, j).angle();
            if theta > std::f64::consts::PI {
                theta -= 2.0 * std::f64::consts::PI;
            }
            if theta < -std::f64::consts::PI {
                theta += 2.0 * std::f64::consts::PI;
            }
            if direction == ArcDirection::CounterClockwise {
                theta = -theta;
            }
            if theta >= 0.0 && delta_r < min_delta_r {
                min_delta_r = delta_r;
                winner = (i, j);
            }
            i = -i;
            if k == 1 {
                j = -j;
            }
        }
        i = winner.0;
        j = winner.1;
    }

    let mut center = Point::new(i, j).add(start);

    // In multi-quadrant mode, snap the centre so the arc's start and end
    // points exactly match the tool's old/new position (impossible when
    // start == end, where the raw I/J centre is kept as-is).
    if is_multi_quadrant && start != end {
        let chord = Line::through(start, end);
        let through_center = chord.move_parallel(center);
        let perpendicular_bisector = chord.move_perpendicular(start.add(end).scale(0.5));
        center = perpendicular_bisector.intersect(through_center);
    }

    let radius = center.sub(start).magnitude();
    let start_angle = start.sub(center).angle();
    let mut end_angle = end.sub(center).angle();
    let stopped_point = center.add(Point::from_polar(radius, end_angle));
    if (start_angle - end_angle).abs() < 1e-10 {
        end_angle += 2.0 * std::f64::consts::PI;
    }

    if radius < 2.0 * coord_precision || (i == 0.0 && j == 0.0) {
        warnings.push("Zero arc radius - replacing with line segment.".to_string());
        return ResolvedArc {
            center,
            radius,
            start_angle,
            end_angle,
            stopped_point,
            is_degenerate: true,
        };
    }

    let mismatch = center.sub(Point::new(i, j).add(start)).magnitude();
    if mismatch > 5.0 * coord_precision {
        warnings.push(format!(
            "Adjusting arc centre mismatch by {:.4} units",
            mismatch
        ));
    }

    ResolvedArc {
        center,
        radius,
        start_angle,
        end_angle,
        stopped_point,
        is_degenerate: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_quadrant_quarter_circle_cw() {
        // A 90 degree single-quadrant CW arc: start (0,0), end (1000,-1000), I=1000 J=0.
        let mut warnings = Vec::new();
        let input = ArcInput {
            start: Point::new(0.0, 0.0),
            end: Point::new(1000.0, -1000.0),
            i: 1000.0,
            j: 0.0,
            direction: ArcDirection::Clockwise,
            is_multi_quadrant: false,
            coord_precision: 0.01,
        };
        let arc = resolve(&input, &mut warnings);
        assert!((arc.center.x - 1000.0).abs() < 1e-6);
        assert!(arc.center.y.abs() < 1e-6);
        assert!((arc.radius - 1000.0).abs() < 1e-6);
        assert!(!arc.is_degenerate);
    }

    #[test]
    fn full_circle_when_start_equals_end() {
        let mut warnings = Vec::new();
        let input = ArcInput {
            start: Point::new(100.0, 0.0),
            end: Point::new(100.0, 0.0),
            i: -100.0,
            j: 0.0,
            direction: ArcDirection::Clockwise,
            is_multi_quadrant: true,
            coord_precision: 0.01,
        };
        let arc = resolve(&input, &mut warnings);
        assert!(!arc.is_degenerate);
        assert!((arc.end_angle - arc.start_angle - 2.0 * std::f64::consts::PI).abs() < 1e-6);
    }

    #[test]
    fn zero_radius_is_flagged_degenerate() {
        let mut warnings = Vec::new();
        let input = ArcInput {
            start: Point::new(0.0, 0.0),
            end: Point::new(0.0, 0.0),
            i: 0.0,
            j: 0.0,
            direction: ArcDirection::Clockwise,
            is_multi_quadrant: true,
            coord_precision: 0.01,
        };
        let arc = resolve(&input, &mut warnings);
        assert!(arc.is_degenerate);
        assert!(warnings.iter().any(|w| w.contains("replacing with line")));
    }
}
