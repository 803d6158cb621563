//! Street graph used by the tactical rerouter.
//!
//! Nodes carry an OSM id and a position, edges a length and the routing
//! weight `pesoL`. Searches never touch the loaded weights: blocked edges
//! live in a per-search [`EdgeOverlay`].

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TacticalError};
use crate::geofence::GeofenceStore;
use crate::spatial::{haversine_distance, LatLon};

pub type NodeId = u64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub osmid: NodeId,
    pub lat: f64,
    pub lon: f64,
}

impl GraphNode {
    pub fn position(&self) -> LatLon {
        (self.lat, self.lon)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub u: NodeId,
    pub v: NodeId,
    /// Metres
    pub length: f64,
    #[serde(rename = "pesoL")]
    pub weight: f64,
    /// Intermediate shape points as (lat, lon), endpoints excluded
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub geometry: Vec<LatLon>,
    /// Also traversable from `v` to `u`
    #[serde(default)]
    pub bidirectional: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct GraphFile {
    nodes: Vec<GraphNode>,
    edges: Vec<GraphEdge>,
}

/// Directed traversal of one stored edge.
#[derive(Debug, Clone, Copy)]
struct Link {
    edge: usize,
    to: NodeId,
    reversed: bool,
}

/// Per-search weight changes layered over the base graph.
#[derive(Debug, Clone, Default)]
pub struct EdgeOverlay {
    blocked: HashSet<(NodeId, NodeId)>,
}

impl EdgeOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forbid travel from `u` to `v`.
    pub fn block(&mut self, u: NodeId, v: NodeId) {
        self.blocked.insert((u, v));
    }

    pub fn is_blocked(&self, u: NodeId, v: NodeId) -> bool {
        self.blocked.contains(&(u, v))
    }

    fn weight(&self, u: NodeId, v: NodeId, base: f64) -> Option<f64> {
        if self.is_blocked(u, v) {
            return None;
        }
        Some(base)
    }
}

#[derive(Debug, Clone, Copy)]
struct FloatOrd(f64);

impl PartialEq for FloatOrd {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for FloatOrd {}

impl PartialOrd for FloatOrd {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FloatOrd {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct OpenNode {
    cost: FloatOrd,
    node: NodeId,
}

#[derive(Debug, Clone, Default)]
pub struct StreetGraph {
    nodes: Vec<GraphNode>,
    edges: Vec<GraphEdge>,
    index: HashMap<NodeId, usize>,
    adjacency: HashMap<NodeId, Vec<Link>>,
}

impl StreetGraph {
    pub fn from_parts(nodes: Vec<GraphNode>, edges: Vec<GraphEdge>) -> Result<Self> {
        if nodes.is_empty() {
            return Err(TacticalError::EmptyGraph);
        }
        let index: HashMap<NodeId, usize> = nodes.iter().enumerate().map(|(i, n)| (n.osmid, i)).collect();
        let mut adjacency: HashMap<NodeId, Vec<Link>> = HashMap::new();
        let mut dropped = 0usize;
        for (i, edge) in edges.iter().enumerate() {
            if !index.contains_key(&edge.u) || !index.contains_key(&edge.v) {
                dropped += 1;
                continue;
            }
            adjacency.entry(edge.u).or_default().push(Link {
                edge: i,
                to: edge.v,
                reversed: false,
            });
            if edge.bidirectional {
                adjacency.entry(edge.v).or_default().push(Link {
                    edge: i,
                    to: edge.u,
                    reversed: true,
                });
            }
        }
        if dropped > 0 {
            tracing::warn!("street graph: {} edge(s) reference unknown nodes", dropped);
        }
        Ok(Self {
            nodes,
            edges,
            index,
            adjacency,
        })
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let file: GraphFile = serde_json::from_str(json)?;
        Self::from_parts(file.nodes, file.edges)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let graph = Self::from_json_str(&text)?;
        tracing::info!(
            "loaded street graph {}: {} nodes, {} edges",
            path.as_ref().display(),
            graph.node_count(),
            graph.edge_count()
        );
        Ok(graph)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn node(&self, id: NodeId) -> Option<&GraphNode> {
        self.index.get(&id).and_then(|i| self.nodes.get(*i))
    }

    /// Lowest-weight edge usable from `u` to `v`.
    pub fn edge_between(&self, u: NodeId, v: NodeId) -> Option<&GraphEdge> {
        self.link_between(u, v).map(|link| &self.edges[link.edge])
    }

    fn link_between(&self, u: NodeId, v: NodeId) -> Option<Link> {
        self.adjacency
            .get(&u)?
            .iter()
            .filter(|link| link.to == v)
            .min_by(|a, b| self.edges[a.edge].weight.total_cmp(&self.edges[b.edge].weight))
            .copied()
    }

    /// Node closest to `point` by great-circle distance.
    pub fn nearest_node(&self, point: LatLon) -> Result<NodeId> {
        self.nodes
            .iter()
            .map(|n| (n.osmid, haversine_distance(point.0, point.1, n.lat, n.lon)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(id, _)| id)
            .ok_or(TacticalError::EmptyGraph)
    }

    /// Dijkstra over `pesoL` with the overlay applied.
    pub fn shortest_path(&self, from: NodeId, to: NodeId, overlay: &EdgeOverlay) -> Result<Vec<NodeId>> {
        if self.node(from).is_none() || self.node(to).is_none() {
            return Err(TacticalError::NoPath { from, to });
        }
        if from == to {
            return Ok(vec![from]);
        }

        let mut best: HashMap<NodeId, f64> = HashMap::new();
        let mut came_from: HashMap<NodeId, NodeId> = HashMap::new();
        let mut open_set: BinaryHeap<Reverse<OpenNode>> = BinaryHeap::new();
        best.insert(from, 0.0);
        open_set.push(Reverse(OpenNode {
            cost: FloatOrd(0.0),
            node: from,
        }));

        while let Some(Reverse(current)) = open_set.pop() {
            if current.node == to {
                break;
            }
            if best.get(&current.node).is_some_and(|b| current.cost.0 > *b) {
                continue;
            }
            let Some(links) = self.adjacency.get(&current.node) else {
                continue;
            };
            for link in links {
                let base = self.edges[link.edge].weight;
                let Some(weight) = overlay.weight(current.node, link.to, base) else {
                    continue;
                };
                if !weight.is_finite() || weight < 0.0 {
                    continue;
                }
                let tentative = current.cost.0 + weight;
                if best.get(&link.to).map_or(true, |b| tentative < *b) {
                    best.insert(link.to, tentative);
                    came_from.insert(link.to, current.node);
                    open_set.push(Reverse(OpenNode {
                        cost: FloatOrd(tentative),
                        node: link.to,
                    }));
                }
            }
        }

        if !came_from.contains_key(&to) {
            return Err(TacticalError::NoPath { from, to });
        }
        let mut path = vec![to];
        let mut current = to;
        while let Some(prev) = came_from.get(&current) {
            path.push(*prev);
            current = *prev;
        }
        path.reverse();
        Ok(path)
    }

    /// Shape points travelled from `u` to `v`, endpoints included.
    pub fn leg_geometry(&self, u: NodeId, v: NodeId) -> Vec<LatLon> {
        let (Some(start), Some(end)) = (self.node(u), self.node(v)) else {
            return Vec::new();
        };
        let mut points = vec![start.position()];
        if let Some(link) = self.link_between(u, v) {
            let shape = &self.edges[link.edge].geometry;
            if link.reversed {
                points.extend(shape.iter().rev().copied());
            } else {
                points.extend(shape.iter().copied());
            }
        }
        points.push(end.position());
        points
    }

    /// Length in metres of the edge from `u` to `v`, if one exists.
    pub fn leg_length(&self, u: NodeId, v: NodeId) -> Option<f64> {
        self.edge_between(u, v).map(|e| e.length)
    }

    /// Block every edge whose shape crosses the bounding box of a fence.
    ///
    /// Fences containing one of the `keep` points are skipped so that an
    /// aircraft can always leave or reach a fenced node.
    pub fn block_geofences(&self, overlay: &mut EdgeOverlay, fences: &GeofenceStore, keep: &[LatLon]) -> usize {
        if fences.is_empty() {
            return 0;
        }
        let mut count = 0;
        for edge in &self.edges {
            let (Some(a), Some(b)) = (self.node(edge.u), self.node(edge.v)) else {
                continue;
            };
            let mut line = vec![a.position()];
            line.extend(edge.geometry.iter().copied());
            line.push(b.position());

            let crosses = fences.candidates_for_line(&line).into_iter().any(|fence| {
                if keep.iter().any(|p| fence.contains(*p)) {
                    return false;
                }
                let Some(bbox) = fence.bbox() else {
                    return false;
                };
                line.windows(2).any(|w| bbox.intersects_segment(w[0], w[1]))
            });
            if crosses {
                overlay.block(edge.u, edge.v);
                if edge.bidirectional {
                    overlay.block(edge.v, edge.u);
                }
                count += 1;
            }
        }
        count
    }
}
