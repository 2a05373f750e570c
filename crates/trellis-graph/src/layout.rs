//! Layout passes and their output
//!
//! Layout runs in three passes over the tree:
//!
//! 1. `layout` places every node. A cursor walks along the flow; composites
//!    place their header at the cursor, lay their children out with a cursor
//!    of their own and then advance the outer cursor past their exit point.
//! 2. `render_edges` draws connectors once all positions are final.
//! 3. `render_controllers` positions the editing affordances.
//!
//! All arithmetic is done in flow coordinates (`along`, `cross`) through
//! `Direction`, so the same code serves vertical and horizontal graphs.

use serde::{Deserialize, Serialize};
use trellis_geometry::{straight_line, Boundary, Direction, EdgePath, EntryPoint, Point, Size, SmoothStep};

use crate::config::LayoutConfig;
use crate::node::{Node, NodeBehavior, NodeCore, NodeKind};

/// What a controller affordance does when activated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ControllerAction {
    /// Pick a tool to insert after the node
    InsertAfter,
    /// Add a switch case or fork branch
    AddBranch,
    /// Remove a switch case (by name) or fork branch (by index)
    RemoveBranch { branch: String },
}

/// Transient editing affordance; never persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Controller {
    pub node_id: String,
    pub position: Point,
    pub action: ControllerAction,
    pub disabled: bool,
}

/// A rendered connector with a stable id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connector {
    pub id: String,
    pub path: EdgePath,
}

/// Final geometry of one rendered node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePlacement {
    pub id: String,
    pub kind: NodeKind,
    pub position: Point,
    pub size: Size,
    pub entry_point: EntryPoint,
}

/// Everything a renderer needs to draw the graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutResult {
    pub direction: Direction,
    pub nodes: Vec<NodePlacement>,
    pub connectors: Vec<Connector>,
    pub controllers: Vec<Controller>,
    pub canvas: Size,
}

impl LayoutResult {
    pub fn node(&self, id: &str) -> Option<&NodePlacement> {
        self.nodes.iter().find(|node| node.id == id)
    }

    pub fn connector(&self, id: &str) -> Option<&Connector> {
        self.connectors.iter().find(|connector| connector.id == id)
    }
}

/// Parameters shared by every layout pass
#[derive(Debug, Clone, Copy)]
pub struct LayoutCx<'a> {
    pub direction: Direction,
    pub config: &'a LayoutConfig,
    pub max_branches: usize,
    /// Expand collapsed sub-workflows (live execution)
    pub expand_all: bool,
}

impl<'a> LayoutCx<'a> {
    pub fn along_len(&self) -> f64 {
        self.direction.along_len(self.config.node_size)
    }

    pub fn cross_len(&self) -> f64 {
        self.direction.cross_len(self.config.node_size)
    }

    fn along(&self, point: Point) -> f64 {
        self.direction.along(point)
    }

    fn cross(&self, point: Point) -> f64 {
        self.direction.cross(point)
    }

    fn point(&self, along: f64, cross: f64) -> Point {
        self.direction.point(along, cross)
    }

    /// Screen-space delta for a flow-space offset
    fn delta(&self, along: f64, cross: f64) -> (f64, f64) {
        let p = self.direction.point(along, cross);
        (p.x, p.y)
    }

    /// Smooth connector flowing from an exit side to an entry side
    pub(crate) fn smooth(&self, source: Point, target: Point, bend_at: f64) -> EdgePath {
        let step = SmoothStep::new(source, target)
            .with_sides(self.direction.exit_side(), self.direction.entry_side())
            .with_border_radius(self.config.corner_radius);
        match self.direction {
            Direction::Vertical => step.with_center_y(bend_at),
            Direction::Horizontal => step.with_center_x(bend_at),
        }
        .path()
    }

    /// Straight stub leaving `out` towards the next node of a sequence
    pub(crate) fn trailing(&self, id: &str, out: Point) -> Connector {
        let end = self.point(self.along(out) + self.config.rank_gap, self.cross(out));
        Connector {
            id: id.to_string(),
            path: straight_line(out, end),
        }
    }

    /// "Insert after" affordance next to an exit anchor
    pub(crate) fn insert_after(&self, node_id: &str, out: Point) -> Controller {
        Controller {
            node_id: node_id.to_string(),
            position: self.point(
                self.along(out) + self.config.controller_gap,
                self.cross(out) - self.config.controller_inset,
            ),
            action: ControllerAction::InsertAfter,
            disabled: false,
        }
    }
}

/// Move a cursor along the flow
fn advance(cursor: &mut Point, cx: &LayoutCx, along: f64) {
    *cursor = cx.point(along, cx.cross(*cursor));
}

// ---------------------------------------------------------------------------
// Leaves
// ---------------------------------------------------------------------------

/// Place a node with no visible children and advance past it
pub(crate) fn place_leaf(core: &mut NodeCore, cursor: &mut Point, cx: &LayoutCx) {
    place_header(core, cursor, cx);
    let next = cx.along(core.position) + cx.along_len() + cx.config.rank_gap;
    advance(cursor, cx, next);
}

/// Set a node's position and size, dropping stale geometry
pub(crate) fn place_header(core: &mut NodeCore, cursor: &Point, cx: &LayoutCx) {
    core.size = cx.config.node_size;
    core.position = *cursor;
    core.edges.clear();
    core.controllers.clear();
}

/// Anchors on the node's own footprint, centred across the flow
pub(crate) fn leaf_entry(core: &NodeCore, cx: &LayoutCx) -> EntryPoint {
    let along = cx.along(core.position);
    let center = header_center(core, cx);
    EntryPoint {
        input: cx.point(along, center),
        output: cx.point(along + cx.direction.along_len(core.size), center),
    }
}

fn header_center(core: &NodeCore, cx: &LayoutCx) -> f64 {
    cx.cross(core.position) + cx.direction.cross_len(core.size) / 2.0
}

pub(crate) fn leaf_edges(core: &mut NodeCore, cx: &LayoutCx, is_last: bool) {
    core.edges.clear();
    if !is_last {
        let out = leaf_entry(core, cx).output;
        core.edges.push(cx.trailing(&core.id, out));
    }
}

// ---------------------------------------------------------------------------
// Sequences
// ---------------------------------------------------------------------------

pub(crate) fn layout_sequence<'n>(nodes: impl IntoIterator<Item = &'n mut Node>, cursor: &mut Point, cx: &LayoutCx) {
    for node in nodes {
        node.layout(cursor, cx);
    }
}

/// Draw the edges of a sequence; the last node gets `tail_is_last`
pub(crate) fn sequence_edges(nodes: &mut [Node], cx: &LayoutCx, tail_is_last: bool) {
    let count = nodes.len();
    for (index, node) in nodes.iter_mut().enumerate() {
        node.render_edges(cx, tail_is_last && index + 1 == count);
    }
}

pub(crate) fn sequence_controllers(nodes: &mut [Node], cx: &LayoutCx) {
    for node in nodes {
        node.render_controllers(cx);
    }
}

pub(crate) fn sequence_boundary(nodes: &[Node], cx: &LayoutCx) -> Boundary {
    nodes
        .iter()
        .fold(Boundary::EMPTY, |acc, node| acc.union(node.boundary(cx)))
}

fn shift_sequence(nodes: &mut [Node], cx: &LayoutCx, cross: f64) {
    let (dx, dy) = cx.delta(0.0, cross);
    for node in nodes {
        node.move_by(dx, dy);
    }
}

// ---------------------------------------------------------------------------
// Bodies (loops, referenced sub-workflows)
// ---------------------------------------------------------------------------

/// Place a header with its body indented below (or beside) it
///
/// The body starts half a header plus padding across the flow. If anything
/// in the body (typically a branching node) reaches further back than that
/// indent, the whole body is shifted by the deficit so it stays clear of
/// the header's return path.
pub(crate) fn place_body(core: &mut NodeCore, body: &mut [Node], cursor: &mut Point, cx: &LayoutCx) {
    place_header(core, cursor, cx);
    let along = cx.along(core.position);
    let cross = cx.cross(core.position);
    let indent = body_indent(cx);

    let mut body_cursor = cx.point(along + cx.along_len() + cx.config.composite_gap, cross + indent);
    layout_sequence(body.iter_mut(), &mut body_cursor, cx);

    let bounds = sequence_boundary(body, cx);
    if !bounds.is_empty() {
        let offset = cx.direction.cross_min(&bounds) - cross;
        if offset < indent {
            shift_sequence(body, cx, indent - offset);
        }
    }

    let out = body_entry(core, body, cx).output;
    *cursor = cx.point(cx.along(out) + cx.config.rank_gap, cross);
}

/// Cross-axis distance between a header and the nominal body lane
pub fn body_indent(cx: &LayoutCx) -> f64 {
    cx.cross_len() / 2.0 + cx.config.body_padding
}

pub(crate) fn body_entry(core: &NodeCore, body: &[Node], cx: &LayoutCx) -> EntryPoint {
    let header = leaf_entry(core, cx);
    let Some(last) = body.last() else {
        return header;
    };
    let exit = cx.along(last.entry_point(cx).output) + cx.config.return_offset;
    EntryPoint {
        input: header.input,
        output: cx.point(exit, header_center(core, cx)),
    }
}

/// Head, loop-back, exit and trailing connectors of a bodied composite
pub(crate) fn body_edges(core: &mut NodeCore, body: &mut [Node], cx: &LayoutCx, is_last: bool, loop_back: bool) {
    core.edges.clear();
    let header = leaf_entry(core, cx);
    let entry = body_entry(core, body, cx);

    if let Some(first) = body.first() {
        let first_in = first.entry_point(cx).input;
        core.edges.push(Connector {
            id: format!("{}_head", core.id),
            path: cx.smooth(header.output, first_in, cx.along(first_in) - cx.config.head_offset),
        });
    }

    sequence_edges(body, cx, true);

    if let Some(last) = body.last() {
        let last_out = last.entry_point(cx).output;
        if loop_back {
            let flank = cx.point(
                cx.along(core.position) + cx.direction.along_len(core.size) / 2.0,
                cx.cross(core.position) + cx.direction.cross_len(core.size),
            );
            let path = SmoothStep::new(last_out, flank)
                .with_sides(cx.direction.exit_side(), cx.direction.flank_side())
                .with_border_radius(cx.config.corner_radius)
                .path();
            core.edges.push(Connector {
                id: format!("{}_loop", core.id),
                path,
            });
        }
        core.edges.push(Connector {
            id: format!("{}_end", core.id),
            path: cx.smooth(last_out, entry.output, cx.along(last_out) + cx.config.exit_offset),
        });
    }

    if !is_last {
        core.edges.push(cx.trailing(&core.id, entry.output));
    }
}

// ---------------------------------------------------------------------------
// Branches (switch, fork/join)
// ---------------------------------------------------------------------------

/// Place a branching header and its branches side by side
///
/// With an odd branch count the middle branch sits directly below the
/// header. The first half fans out towards negative cross (nearest branch
/// first), the second half towards positive cross. Each branch starts one
/// node plus `branch_spacing` away from its neighbour and is pushed further
/// out whenever its extent would come closer than that.
pub(crate) fn place_branches(core: &mut NodeCore, branches: &mut [&mut Vec<Node>], cursor: &mut Point, cx: &LayoutCx) {
    place_header(core, cursor, cx);
    let along = cx.along(core.position);
    let cross = cx.cross(core.position);
    let start = along + cx.along_len() + cx.config.branch_gap;
    let spacing = cx.cross_len() + cx.config.branch_spacing;

    let count = branches.len();
    let half = count / 2;
    let odd = count % 2 == 1;

    let mut low_base = cross;
    let mut high_base = cross;

    if odd {
        let middle = &mut *branches[half];
        let mut lane_cursor = cx.point(start, cross);
        layout_sequence(middle.iter_mut(), &mut lane_cursor, cx);
        let bounds = sequence_boundary(middle, cx);
        if !bounds.is_empty() {
            low_base = cx.direction.cross_min(&bounds);
            high_base = cx.direction.cross_max(&bounds);
        }
    }

    let mut lane = cross;
    for index in (0..half).rev() {
        let branch = &mut *branches[index];
        lane -= spacing;
        let mut lane_cursor = cx.point(start, lane);
        layout_sequence(branch.iter_mut(), &mut lane_cursor, cx);
        let bounds = sequence_boundary(branch, cx);
        if bounds.is_empty() {
            continue;
        }
        let shift = (spacing - (low_base - cx.direction.cross_max(&bounds))).max(0.0);
        if shift > 0.0 {
            shift_sequence(branch, cx, -shift);
        }
        lane -= shift;
        low_base = cx.direction.cross_min(&bounds) - shift;
    }

    lane = cross;
    for index in (half + usize::from(odd))..count {
        let branch = &mut *branches[index];
        lane += spacing;
        let mut lane_cursor = cx.point(start, lane);
        layout_sequence(branch.iter_mut(), &mut lane_cursor, cx);
        let bounds = sequence_boundary(branch, cx);
        if bounds.is_empty() {
            continue;
        }
        let shift = (spacing - (cx.direction.cross_min(&bounds) - high_base)).max(0.0);
        if shift > 0.0 {
            shift_sequence(branch, cx, shift);
        }
        lane += shift;
        high_base = cx.direction.cross_max(&bounds) + shift;
    }

    let tails: Vec<&Node> = branches.iter().filter_map(|branch| branch.last()).collect();
    let out = branches_entry(core, &tails, cx).output;
    *cursor = cx.point(cx.along(out) + cx.config.rank_gap, cross);
}

/// Along-axis position of the deepest branch end
fn deepest_tail(core: &NodeCore, tails: &[&Node], cx: &LayoutCx) -> f64 {
    tails
        .iter()
        .map(|node| cx.along(node.entry_point(cx).output))
        .fold(None, |acc: Option<f64>, along| Some(acc.map_or(along, |a| a.max(along))))
        .unwrap_or_else(|| cx.along(leaf_entry(core, cx).output))
}

pub(crate) fn branches_entry(core: &NodeCore, tails: &[&Node], cx: &LayoutCx) -> EntryPoint {
    let header = leaf_entry(core, cx);
    let exit = deepest_tail(core, tails, cx) + cx.config.join_offset;
    EntryPoint {
        input: header.input,
        output: cx.point(exit, header_center(core, cx)),
    }
}

/// Head, rejoin and trailing connectors of a branching composite
pub(crate) fn branch_edges(core: &mut NodeCore, branches: Vec<(String, &mut Vec<Node>)>, cx: &LayoutCx, is_last: bool) {
    core.edges.clear();
    let header = leaf_entry(core, cx);
    let (deepest, entry) = {
        let tails: Vec<&Node> = branches.iter().filter_map(|(_, branch)| branch.last()).collect();
        (deepest_tail(core, &tails, cx), branches_entry(core, &tails, cx))
    };
    let rejoin_bend = deepest + cx.config.join_offset / 2.0;

    for (key, branch) in branches {
        if let Some(first) = branch.first() {
            let first_in = first.entry_point(cx).input;
            core.edges.push(Connector {
                id: format!("{}_{}", core.id, key),
                path: cx.smooth(header.output, first_in, cx.along(first_in) - cx.config.branch_head_offset),
            });
        }

        sequence_edges(branch, cx, true);

        if let Some(last) = branch.last() {
            let last_out = last.entry_point(cx).output;
            core.edges.push(Connector {
                id: format!("{}_{}_join", core.id, key),
                path: cx.smooth(last_out, entry.output, rejoin_bend),
            });
        }
    }

    if !is_last {
        core.edges.push(cx.trailing(&core.id, entry.output));
    }
}

/// Add/remove-branch affordances plus the usual insert-after one
pub(crate) fn branch_controllers(
    core: &mut NodeCore,
    branches: Vec<(String, &mut Vec<Node>)>,
    cx: &LayoutCx,
    can_add: bool,
    can_remove: bool,
) {
    let header = leaf_entry(core, cx);
    let entry = {
        let tails: Vec<&Node> = branches.iter().filter_map(|(_, branch)| branch.last()).collect();
        branches_entry(core, &tails, cx)
    };

    let mut controllers = vec![Controller {
        node_id: core.id.clone(),
        position: cx.point(
            cx.along(header.output) + cx.config.controller_gap,
            cx.cross(header.output) - cx.config.controller_inset,
        ),
        action: ControllerAction::AddBranch,
        disabled: !can_add,
    }];

    for (key, branch) in branches {
        if let Some(first) = branch.first() {
            let first_in = first.entry_point(cx).input;
            controllers.push(Controller {
                node_id: core.id.clone(),
                position: cx.point(
                    cx.along(first_in) - cx.config.branch_controller_offset,
                    cx.cross(first_in) - cx.config.controller_inset,
                ),
                action: ControllerAction::RemoveBranch { branch: key },
                disabled: !can_remove,
            });
        }
        sequence_controllers(branch, cx);
    }

    controllers.push(cx.insert_after(&core.id, entry.output));
    core.controllers = controllers;
}

/// Collect placements, connectors and controllers of a laid-out subtree
pub(crate) fn collect(node: &Node, cx: &LayoutCx, result: &mut LayoutResult) {
    if !node.is_transparent(cx) {
        let core = node.core();
        result.nodes.push(NodePlacement {
            id: core.id.clone(),
            kind: node.kind(),
            position: core.position,
            size: core.size,
            entry_point: node.entry_point(cx),
        });
    }
    let core = node.core();
    result.connectors.extend(core.edges.iter().cloned());
    result.controllers.extend(core.controllers.iter().cloned());
    for list in node.visible_lists(cx) {
        for child in list {
            collect(child, cx, result);
        }
    }
}
