//! Connector path construction
//!
//! Paths are sequences of SVG-like drawing commands. `SmoothStep` routes an
//! orthogonal connector between two anchors and rounds every corner with a
//! quadratic bend, the same shape most node-editor libraries call a
//! "smooth step" edge.

use serde::{Deserialize, Serialize};

use crate::types::{Point, Side};

/// A single drawing command
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EdgeSegment {
    /// Start a new sub-path
    #[serde(rename = "M")]
    MoveTo { to: Point },
    /// Straight line to a point
    #[serde(rename = "L")]
    LineTo { to: Point },
    /// Quadratic curve through a control point
    #[serde(rename = "Q")]
    QuadTo { control: Point, to: Point },
}

impl EdgeSegment {
    fn translated(self, dx: f64, dy: f64) -> Self {
        match self {
            EdgeSegment::MoveTo { to } => EdgeSegment::MoveTo {
                to: to.translated(dx, dy),
            },
            EdgeSegment::LineTo { to } => EdgeSegment::LineTo {
                to: to.translated(dx, dy),
            },
            EdgeSegment::QuadTo { control, to } => EdgeSegment::QuadTo {
                control: control.translated(dx, dy),
                to: to.translated(dx, dy),
            },
        }
    }
}

/// An ordered list of drawing commands
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgePath(pub Vec<EdgeSegment>);

impl EdgePath {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn segments(&self) -> &[EdgeSegment] {
        &self.0
    }

    /// End point of the last command, if any
    pub fn end(&self) -> Option<Point> {
        self.0.last().map(|segment| match *segment {
            EdgeSegment::MoveTo { to } | EdgeSegment::LineTo { to } | EdgeSegment::QuadTo { to, .. } => to,
        })
    }

    /// Shift every command by the given deltas
    pub fn translate(&mut self, dx: f64, dy: f64) {
        for segment in &mut self.0 {
            *segment = segment.translated(dx, dy);
        }
    }

    /// Render as an SVG `d` attribute
    pub fn to_svg(&self) -> String {
        self.0
            .iter()
            .map(|segment| match segment {
                EdgeSegment::MoveTo { to } => format!("M {} {}", to.x, to.y),
                EdgeSegment::LineTo { to } => format!("L {} {}", to.x, to.y),
                EdgeSegment::QuadTo { control, to } => {
                    format!("Q {} {} {} {}", control.x, control.y, to.x, to.y)
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Straight connector between two points
pub fn straight_line(source: Point, target: Point) -> EdgePath {
    EdgePath(vec![
        EdgeSegment::MoveTo { to: source },
        EdgeSegment::LineTo { to: target },
    ])
}

/// Midpoint between two anchors plus the half distances on each axis
///
/// Returns `(center_x, center_y, offset_x, offset_y)`.
pub fn edge_center(source: Point, target: Point) -> (f64, f64, f64, f64) {
    let x_offset = (target.x - source.x).abs() / 2.0;
    let center_x = if target.x < source.x {
        target.x + x_offset
    } else {
        target.x - x_offset
    };

    let y_offset = (target.y - source.y).abs() / 2.0;
    let center_y = if target.y < source.y {
        target.y + y_offset
    } else {
        target.y - y_offset
    };

    (center_x, center_y, x_offset, y_offset)
}

/// Orthogonal connector with rounded corners
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmoothStep {
    pub source: Point,
    pub source_side: Side,
    pub target: Point,
    pub target_side: Side,
    pub border_radius: f64,
    pub center_x: Option<f64>,
    pub center_y: Option<f64>,
    /// Distance a connector travels straight out of (and into) a handle
    pub offset: f64,
}

impl SmoothStep {
    /// Connector leaving the bottom of `source` and entering the top of `target`
    pub fn new(source: Point, target: Point) -> Self {
        Self {
            source,
            source_side: Side::Bottom,
            target,
            target_side: Side::Top,
            border_radius: 10.0,
            center_x: None,
            center_y: None,
            offset: 20.0,
        }
    }

    pub fn with_sides(mut self, source_side: Side, target_side: Side) -> Self {
        self.source_side = source_side;
        self.target_side = target_side;
        self
    }

    pub fn with_center_x(mut self, center_x: f64) -> Self {
        self.center_x = Some(center_x);
        self
    }

    pub fn with_center_y(mut self, center_y: f64) -> Self {
        self.center_y = Some(center_y);
        self
    }

    pub fn with_border_radius(mut self, border_radius: f64) -> Self {
        self.border_radius = border_radius;
        self
    }

    /// Build the full path, starting with a move to the source
    pub fn path(&self) -> EdgePath {
        let points = self.points();
        let mut segments = vec![EdgeSegment::MoveTo { to: self.source }];

        for i in 1..points.len() {
            if i < points.len() - 1 {
                segments.extend(bend(points[i - 1], points[i], points[i + 1], self.border_radius));
            } else {
                segments.push(EdgeSegment::LineTo { to: points[i] });
            }
        }

        EdgePath(segments)
    }

    /// Corner points of the orthogonal route, both anchors included
    pub fn points(&self) -> Vec<Point> {
        let source = self.source;
        let target = self.target;
        let source_dir = self.source_side.vector();
        let target_dir = self.target_side.vector();
        let source_gaped = source.translated(source_dir.x * self.offset, source_dir.y * self.offset);
        let target_gaped = target.translated(target_dir.x * self.offset, target_dir.y * self.offset);

        let dir = heading(source_gaped, self.source_side, target_gaped);
        let on_x = dir.x != 0.0;
        let current = axis(dir, on_x);

        let mut source_gap_offset = Point::ZERO;
        let mut target_gap_offset = Point::ZERO;

        let (default_center_x, default_center_y, _, _) = edge_center(source, target);

        let mut points: Vec<Point>;

        if axis(source_dir, on_x) * axis(target_dir, on_x) == -1.0 {
            let center_x = self.center_x.unwrap_or(default_center_x);
            let center_y = self.center_y.unwrap_or(default_center_y);

            let vertical_split = vec![
                Point::new(center_x, source_gaped.y),
                Point::new(center_x, target_gaped.y),
            ];
            let horizontal_split = vec![
                Point::new(source_gaped.x, center_y),
                Point::new(target_gaped.x, center_y),
            ];

            points = if axis(source_dir, on_x) == current {
                if on_x { vertical_split } else { horizontal_split }
            } else if on_x {
                horizontal_split
            } else {
                vertical_split
            };
        } else {
            let source_target = vec![Point::new(source_gaped.x, target_gaped.y)];
            let target_source = vec![Point::new(target_gaped.x, source_gaped.y)];

            points = if on_x {
                if source_dir.x == current { target_source.clone() } else { source_target.clone() }
            } else if source_dir.y == current {
                source_target.clone()
            } else {
                target_source.clone()
            };

            if self.source_side == self.target_side {
                let diff = (axis(source, on_x) - axis(target, on_x)).abs();

                if diff <= self.offset {
                    let gap_offset = (self.offset - 1.0).min(self.offset - diff);
                    if axis(source_dir, on_x) == current {
                        let sign = if axis(source_gaped, on_x) > axis(source, on_x) { -1.0 } else { 1.0 };
                        set_axis(&mut source_gap_offset, on_x, sign * gap_offset);
                    } else {
                        let sign = if axis(target_gaped, on_x) > axis(target, on_x) { -1.0 } else { 1.0 };
                        set_axis(&mut target_gap_offset, on_x, sign * gap_offset);
                    }
                }
            } else {
                let opposite = !on_x;
                let is_same_dir = axis(source_dir, on_x) == axis(target_dir, opposite);
                let source_gt_target = axis(source_gaped, opposite) > axis(target_gaped, opposite);
                let source_lt_target = axis(source_gaped, opposite) < axis(target_gaped, opposite);
                let flip = (axis(source_dir, on_x) == 1.0
                    && ((!is_same_dir && source_gt_target) || (is_same_dir && source_lt_target)))
                    || (axis(source_dir, on_x) != 1.0
                        && ((!is_same_dir && source_lt_target) || (is_same_dir && source_gt_target)));

                if flip {
                    points = if on_x { source_target } else { target_source };
                }
            }
        }

        let mut route = Vec::with_capacity(points.len() + 4);
        route.push(source);
        route.push(source_gaped.translated(source_gap_offset.x, source_gap_offset.y));
        route.extend(points);
        route.push(target_gaped.translated(target_gap_offset.x, target_gap_offset.y));
        route.push(target);
        route
    }
}

/// Primary heading from a gapped source towards a gapped target
fn heading(source: Point, source_side: Side, target: Point) -> Point {
    if source_side.is_horizontal() {
        if source.x < target.x { Point::new(1.0, 0.0) } else { Point::new(-1.0, 0.0) }
    } else if source.y < target.y {
        Point::new(0.0, 1.0)
    } else {
        Point::new(0.0, -1.0)
    }
}

fn axis(point: Point, on_x: bool) -> f64 {
    if on_x { point.x } else { point.y }
}

fn set_axis(point: &mut Point, on_x: bool, value: f64) {
    if on_x {
        point.x = value;
    } else {
        point.y = value;
    }
}

/// Rounded corner at `b` between segments `a -> b` and `b -> c`
fn bend(a: Point, b: Point, c: Point, size: f64) -> Vec<EdgeSegment> {
    let bend_size = (a.distance(b) / 2.0).min(b.distance(c) / 2.0).min(size);
    let Point { x, y } = b;

    if (a.x == x && x == c.x) || (a.y == y && y == c.y) {
        return vec![EdgeSegment::LineTo { to: b }];
    }

    if a.y == y {
        let x_dir = if a.x < c.x { -1.0 } else { 1.0 };
        let y_dir = if a.y < c.y { 1.0 } else { -1.0 };
        return vec![
            EdgeSegment::LineTo {
                to: Point::new(x + bend_size * x_dir, y),
            },
            EdgeSegment::QuadTo {
                control: b,
                to: Point::new(x, y + bend_size * y_dir),
            },
        ];
    }

    let x_dir = if a.x < c.x { 1.0 } else { -1.0 };
    let y_dir = if a.y < c.y { -1.0 } else { 1.0 };
    vec![
        EdgeSegment::LineTo {
            to: Point::new(x, y + bend_size * y_dir),
        },
        EdgeSegment::QuadTo {
            control: b,
            to: Point::new(x + bend_size * x_dir, y),
        },
    ]
}
