//! Trellis Geometry - pure layout helpers for workflow graphs
//!
//! This crate knows nothing about nodes or tasks. It provides:
//!
//! - Plain value types (`Point`, `Size`, `Boundary`, `EntryPoint`)
//! - `Direction`, which maps "along the flow" / "across the flow" coordinates
//!   onto screen axes so one layout routine serves both render directions
//! - Connector path builders (`straight_line`, `SmoothStep`) producing
//!   `EdgePath` values that a renderer can turn into SVG
//!
//! # Example
//!
//! ```
//! use trellis_geometry::{Point, SmoothStep};
//!
//! let path = SmoothStep::new(Point::new(40.0, 80.0), Point::new(200.0, 160.0)).path();
//! assert!(path.to_svg().starts_with("M 40 80"));
//! ```

pub mod path;
pub mod types;

pub use path::{edge_center, straight_line, EdgePath, EdgeSegment, SmoothStep};
pub use types::{Boundary, Direction, EntryPoint, Point, Side, Size};
