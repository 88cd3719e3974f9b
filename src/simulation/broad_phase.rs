//! Sweep-and-prune broad phase
//!
//! Each living body owns an axis-aligned box (`Bounds`) grown by its radius
//! and by one step of velocity in the direction it came from, so the box
//! covers the whole path swept during the last sub-step.
//!
//! The four edges of every box are kept in two lists, one per axis. Bodies
//! move a little each step, so the lists stay nearly sorted and an insertion
//! sort restores order in close to linear time. Whenever an edge has to move
//! past another edge, the boxes owning the two edges are re-tested and the
//! pair is added to or removed from the overlap set.

use std::collections::BTreeMap;

use super::body_manager::PhysicsBody;
use super::states::{BodyId, NVec2};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeAxis {
    X,
    Y,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeLimit {
    Min,
    Max,
}

/// Bounding box of a body. `t` is the minimum y edge, `b` the maximum
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub l: f64,
    pub r: f64,
    pub t: f64,
    pub b: f64,
}

impl Default for Bounds {
    fn default() -> Self {
        Self {
            l: f64::NEG_INFINITY,
            r: f64::INFINITY,
            t: f64::NEG_INFINITY,
            b: f64::INFINITY,
        }
    }
}

impl Bounds {
    /// Recompute all four edges from a body's position, velocity and radius
    pub fn refresh(&mut self, pos: &NVec2, vel: &NVec2, radius: f64) {
        self.l = edge_value(pos.x, vel.x, radius, EdgeLimit::Min);
        self.r = edge_value(pos.x, vel.x, radius, EdgeLimit::Max);
        self.t = edge_value(pos.y, vel.y, radius, EdgeLimit::Min);
        self.b = edge_value(pos.y, vel.y, radius, EdgeLimit::Max);
    }

    /// Do two boxes overlap? Touching counts as overlapping
    pub fn overlap(&self, other: &Bounds) -> bool {
        if self.l > other.r || other.l > self.r {
            return false;
        }
        if self.t > other.b || other.t > self.b {
            return false;
        }
        true
    }

    pub fn edge(&self, axis: EdgeAxis, limit: EdgeLimit) -> f64 {
        match (axis, limit) {
            (EdgeAxis::X, EdgeLimit::Min) => self.l,
            (EdgeAxis::X, EdgeLimit::Max) => self.r,
            (EdgeAxis::Y, EdgeLimit::Min) => self.t,
            (EdgeAxis::Y, EdgeLimit::Max) => self.b,
        }
    }
}

fn edge_value(position: f64, velocity: f64, radius: f64, limit: EdgeLimit) -> f64 {
    match limit {
        // moving forward: the previous position lies behind the min edge
        EdgeLimit::Min => position - radius - velocity.max(0.0),
        EdgeLimit::Max => position + radius - velocity.min(0.0),
    }
}

/// One box edge, referring to its body by slot in the manager's body list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub slot: usize,
    pub axis: EdgeAxis,
    pub limit: EdgeLimit,
}

impl Edge {
    fn value(&self, bodies: &[PhysicsBody]) -> f64 {
        bodies[self.slot].bounds.edge(self.axis, self.limit)
    }
}

/// Unordered body pair, smaller id first
pub type PairKey = (BodyId, BodyId);

pub fn pair_key(a: BodyId, b: BodyId) -> PairKey {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

#[derive(Debug, Default, Clone)]
pub struct SweepAndPrune {
    edges_x: Vec<Edge>,
    edges_y: Vec<Edge>,
    overlaps: BTreeMap<PairKey, (usize, usize)>,
}

impl SweepAndPrune {
    pub fn clear(&mut self) {
        self.edges_x.clear();
        self.edges_y.clear();
        self.overlaps.clear();
    }

    /// Append a body's edges without sorting, so the next `update` tests it
    /// against every box it already overlaps
    pub fn insert(&mut self, slot: usize) {
        use EdgeAxis::{X, Y};
        use EdgeLimit::{Max, Min};

        self.edges_x.push(Edge { slot, axis: X, limit: Min });
        self.edges_x.push(Edge { slot, axis: X, limit: Max });
        self.edges_y.push(Edge { slot, axis: Y, limit: Min });
        self.edges_y.push(Edge { slot, axis: Y, limit: Max });
    }

    /// Remove both edges of a body from both axis lists
    pub fn remove(&mut self, slot: usize) {
        self.edges_x.retain(|edge| edge.slot != slot);
        self.edges_y.retain(|edge| edge.slot != slot);
    }

    /// Re-sort both edge lists against freshly refreshed bounds
    pub fn update(&mut self, bodies: &[PhysicsBody]) {
        sort_edges(&mut self.edges_x, bodies, &mut self.overlaps);
        sort_edges(&mut self.edges_y, bodies, &mut self.overlaps);
    }

    pub fn edge_count(&self) -> usize {
        self.edges_x.len() + self.edges_y.len()
    }

    pub fn edges(&self, axis: EdgeAxis) -> &[Edge] {
        match axis {
            EdgeAxis::X => &self.edges_x,
            EdgeAxis::Y => &self.edges_y,
        }
    }

    pub fn contains(&self, key: &PairKey) -> bool {
        self.overlaps.contains_key(key)
    }

    /// Current overlapping pairs as `(key, (slot, slot))`, in id order
    pub fn pairs(&self) -> Vec<(PairKey, (usize, usize))> {
        self.overlaps.iter().map(|(key, slots)| (*key, *slots)).collect()
    }

    pub fn remove_pair(&mut self, key: &PairKey) {
        self.overlaps.remove(key);
    }

    pub fn len(&self) -> usize {
        self.overlaps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overlaps.is_empty()
    }
}

fn sort_edges(
    edges: &mut [Edge],
    bodies: &[PhysicsBody],
    overlaps: &mut BTreeMap<PairKey, (usize, usize)>,
) {
    for i in 1..edges.len() {
        let item = edges[i];
        let item_value = item.value(bodies);

        let mut j = i;
        while j > 0 {
            let previous = edges[j - 1];
            if previous.value(bodies) < item_value {
                break;
            }
            // the two edges cross: the boxes may have started or stopped overlapping
            check_pair(previous.slot, item.slot, bodies, overlaps);
            edges[j] = previous;
            j -= 1;
        }
        edges[j] = item;
    }
}

fn check_pair(
    a: usize,
    b: usize,
    bodies: &[PhysicsBody],
    overlaps: &mut BTreeMap<PairKey, (usize, usize)>,
) {
    if a == b {
        return;
    }

    let (body_a, body_b) = (&bodies[a], &bodies[b]);
    let key = pair_key(body_a.id, body_b.id);
    let has_pair = overlaps.contains_key(&key);
    let has_overlap = body_a.bounds.overlap(&body_b.bounds);

    if has_pair && !has_overlap {
        overlaps.remove(&key);
    } else if !has_pair && has_overlap {
        let slots = if body_a.id < body_b.id { (a, b) } else { (b, a) };
        overlaps.insert(key, slots);
    }
}
