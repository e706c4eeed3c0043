//! Graph recall (spec §4.2.6): a bounded, in-process adjacency graph over
//! session/turn/memory node ids, with edges created from co-occurrence
//! within a turn's tool calls and keyword overlap between node summaries.
//! This is deliberately not a persisted graph database -- it is rebuilt
//! from the same sqlite mirror on daemon startup and is sized to a single
//! developer's corpus, so an in-memory `HashMap<String, Vec<Edge>>` is
//! the whole engine.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::util::jaccard;

#[derive(Debug, Clone)]
pub struct Edge {
    pub to: String,
    pub weight: f64,
    pub kind: EdgeKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    CoOccurrence,
    ConceptOverlap,
}

#[derive(Debug, Clone)]
pub struct GraphMatch {
    pub node_id: String,
    pub hops: u32,
    pub weight: f64,
}

#[derive(Default)]
pub struct MemoryGraph {
    adjacency: HashMap<String, Vec<Edge>>,
    keywords: HashMap<String, HashSet<String>>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn add_directed_edge(&mut self, from: &str, to: &str, weight: f64, kind: EdgeKind) {
        let edges = self.adjacency.entry(from.to_string()).or_default();
        if let Some(existing) = edges.iter_mut().find(|e| e.to == to && e.kind == kind) {
            existing.weight = existing.weight.max(weight);
        } else {
            edges.push(Edge {
                to: to.to_string(),
                weight,
                kind,
            });
        }
    }

    /// Records that `a` and `b` co-occurred (e.g. both referenced within
    /// the same turn), creating a symmetric edge.
    pub fn add_co_occurrence(&mut self, a: &str, b: &str, weight: f64) {
        if a == b {
            return;
        }
        self.add_directed_edge(a, b, weight, EdgeKind::CoOccurrence);
        self.add_directed_edge(b, a, weight, EdgeKind::CoOccurrence);
    }

    /// Registers `node_id`'s keyword set and lazily links it to every
    /// existing node above the Jaccard overlap threshold.
    pub fn register_node(&mut self, node_id: &str, keywords: HashSet<String>, overlap_threshold: f64) {
        for (other_id, other_keywords) in self.keywords.iter() {
            if other_id == node_id {
                continue;
            }
            let sim = jaccard(keywords.iter().map(|s| s.as_str()), other_keywords.iter().map(|s| s.as_str()));
            if sim >= overlap_threshold {
                self.add_directed_edge(node_id, other_id, sim, EdgeKind::ConceptOverlap);
                self.add_directed_edge(other_id, node_id, sim, EdgeKind::ConceptOverlap);
            }
        }
        self.keywords.insert(node_id.to_string(), keywords);
    }

    /// Breadth-first spreading activation from `seed_id`, bounded to
    /// `max_hops` (spec caps this at 2) with weight decaying multiplicatively
    /// per hop.
    pub fn graph_recall(&self, seed_id: &str, max_hops: u32, top_k: usize) -> Vec<GraphMatch> {
        let mut visited: HashMap<String, (u32, f64)> = HashMap::new();
        let mut queue: VecDeque<(String, u32, f64)> = VecDeque::new();
        queue.push_back((seed_id.to_string(), 0, 1.0));
        visited.insert(seed_id.to_string(), (0, 1.0));

        while let Some((node, hop, weight)) = queue.pop_front() {
            if hop >= max_hops {
                continue;
            }
            if let Some(edges) = self.adjacency.get(&node) {
                for edge in edges {
                    let next_weight = weight * edge.weight;
                    let better = match visited.get(&edge.to) {
                        Some((existing_hop, existing_weight)) => {
                            hop + 1 < *existing_hop || (hop + 1 == *existing_hop && next_weight > *existing_weight)
                        }
                        None => true,
                    };
                    if better {
                        visited.insert(edge.to.clone(), (hop + 1, next_weight));
                        queue.push_back((edge.to.clone(), hop + 1, next_weight));
                    }
                }
            }
        }

        let mut results: Vec<GraphMatch> = visited
            .into_iter()
            .filter(|(id, _)| id != seed_id)
            .map(|(node_id, (hops, weight))| GraphMatch { node_id, hops, weight })
            .collect();
        results.sort_by(|a, b| b.weight.partial_cmp(&a.weight).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(top_k);
        results
    }

    pub fn node_count(&self) -> usize {
        self.keywords.len()
    }
}
