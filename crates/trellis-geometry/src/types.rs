//! Value types shared by layout and connector routines

use serde::{Deserialize, Serialize};

/// A point (or offset) on the canvas
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const ZERO: Point = Point { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Return this point moved by the given deltas
    pub fn translated(self, dx: f64, dy: f64) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }

    /// Euclidean distance to another point
    pub fn distance(self, other: Point) -> f64 {
        ((other.x - self.x).powi(2) + (other.y - self.y).powi(2)).sqrt()
    }
}

/// Width and height of a node
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

impl Default for Size {
    fn default() -> Self {
        Self::new(80.0, 80.0)
    }
}

/// Bounding box over node positions (top-left corners)
///
/// The empty boundary is inverted (`left > right`) so that `union` with any
/// real boundary yields that boundary unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Boundary {
    pub left: f64,
    pub right: f64,
    pub top: f64,
    pub bottom: f64,
}

impl Boundary {
    pub const EMPTY: Boundary = Boundary {
        left: f64::MAX,
        right: f64::MIN,
        top: f64::MAX,
        bottom: f64::MIN,
    };

    /// Boundary covering a single point
    pub fn at(point: Point) -> Self {
        Self {
            left: point.x,
            right: point.x,
            top: point.y,
            bottom: point.y,
        }
    }

    pub fn union(self, other: Boundary) -> Self {
        Self {
            left: self.left.min(other.left),
            right: self.right.max(other.right),
            top: self.top.min(other.top),
            bottom: self.bottom.max(other.bottom),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.left > self.right || self.top > self.bottom
    }
}

impl Default for Boundary {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Anchor pair used to connect a node to its neighbours
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EntryPoint {
    /// Where incoming connectors attach
    #[serde(rename = "in")]
    pub input: Point,
    /// Where outgoing connectors leave
    #[serde(rename = "out")]
    pub output: Point,
}

/// The side of a node a connector leaves from or arrives at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Top,
    Right,
    Bottom,
}

impl Side {
    /// Unit vector pointing out of this side
    pub fn vector(self) -> Point {
        match self {
            Side::Left => Point::new(-1.0, 0.0),
            Side::Right => Point::new(1.0, 0.0),
            Side::Top => Point::new(0.0, -1.0),
            Side::Bottom => Point::new(0.0, 1.0),
        }
    }

    pub fn is_horizontal(self) -> bool {
        matches!(self, Side::Left | Side::Right)
    }
}

/// Render direction of a graph
///
/// Layout code is written in flow coordinates: `along` follows the sequence
/// of tasks, `cross` runs perpendicular to it. Vertical graphs flow along
/// `y`; horizontal graphs flow along `x`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Vertical,
    Horizontal,
}

impl Direction {
    /// Build a screen point from flow coordinates
    pub fn point(self, along: f64, cross: f64) -> Point {
        match self {
            Direction::Vertical => Point::new(cross, along),
            Direction::Horizontal => Point::new(along, cross),
        }
    }

    pub fn along(self, point: Point) -> f64 {
        match self {
            Direction::Vertical => point.y,
            Direction::Horizontal => point.x,
        }
    }

    pub fn cross(self, point: Point) -> f64 {
        match self {
            Direction::Vertical => point.x,
            Direction::Horizontal => point.y,
        }
    }

    /// Extent of a node along the flow
    pub fn along_len(self, size: Size) -> f64 {
        match self {
            Direction::Vertical => size.height,
            Direction::Horizontal => size.width,
        }
    }

    /// Extent of a node across the flow
    pub fn cross_len(self, size: Size) -> f64 {
        match self {
            Direction::Vertical => size.width,
            Direction::Horizontal => size.height,
        }
    }

    /// Lowest cross coordinate covered by a boundary
    pub fn cross_min(self, boundary: &Boundary) -> f64 {
        match self {
            Direction::Vertical => boundary.left,
            Direction::Horizontal => boundary.top,
        }
    }

    /// Highest cross coordinate covered by a boundary
    pub fn cross_max(self, boundary: &Boundary) -> f64 {
        match self {
            Direction::Vertical => boundary.right,
            Direction::Horizontal => boundary.bottom,
        }
    }

    /// Side that outgoing connectors leave from
    pub fn exit_side(self) -> Side {
        match self {
            Direction::Vertical => Side::Bottom,
            Direction::Horizontal => Side::Right,
        }
    }

    /// Side that incoming connectors arrive at
    pub fn entry_side(self) -> Side {
        match self {
            Direction::Vertical => Side::Top,
            Direction::Horizontal => Side::Left,
        }
    }

    /// Side facing the positive cross direction
    pub fn flank_side(self) -> Side {
        match self {
            Direction::Vertical => Side::Right,
            Direction::Horizontal => Side::Bottom,
        }
    }
}
