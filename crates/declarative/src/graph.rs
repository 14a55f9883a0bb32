//! Relationship graph over a catalog.
//!
//! Ordering edges (`require`, `before`, auto-requires) constrain the walk
//! and must be acyclic. Notification edges (`subscribe`, `notify`) only
//! route refresh signals and never affect order.

use crate::catalog::{Catalog, ResourceId};
use crate::error::{Error, Result};
use crate::registry::Registry;
use crate::value::ResourceRef;
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EdgeKind {
    Ordering,
    Notification,
}

/// `source` must be handled before (or signals) `target`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Edge {
    pub source: ResourceId,
    pub target: ResourceId,
    pub kind: EdgeKind,
}

/// A relationship that names something outside the catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dangling {
    pub resource: ResourceId,
    pub metaparam: String,
    pub target: ResourceRef,
    /// The target was declared but failed validation
    pub rejected: bool,
}

#[derive(Debug, Clone)]
pub struct Graph {
    names: Vec<String>,
    edges: BTreeSet<Edge>,
    dangling: Vec<Dangling>,
}

impl Graph {
    /// Collect every edge declared by the catalog
    pub fn build(catalog: &Catalog, registry: &Registry) -> Self {
        let mut graph = Self {
            names: catalog
                .resources()
                .iter()
                .map(|r| r.reference.to_string())
                .collect(),
            edges: BTreeSet::new(),
            dangling: Vec::new(),
        };

        for (id, resource) in catalog.resources().iter().enumerate() {
            for metaparam in crate::catalog::RELATIONSHIPS {
                for target in resource.references(metaparam) {
                    let Some(other) = catalog.id_of(&target) else {
                        graph.dangling.push(Dangling {
                            resource: id,
                            metaparam: (*metaparam).to_string(),
                            rejected: catalog.is_rejected(&target),
                            target,
                        });
                        continue;
                    };
                    let (source, target, kind) = match *metaparam {
                        "require" => (other, id, EdgeKind::Ordering),
                        "before" => (id, other, EdgeKind::Ordering),
                        "subscribe" => (other, id, EdgeKind::Notification),
                        _ => (id, other, EdgeKind::Notification),
                    };
                    graph.edges.insert(Edge {
                        source,
                        target,
                        kind,
                    });
                }
            }

            if let Some(definition) = registry.get_type(&resource.reference.type_name) {
                for target in definition.autorequires(resource) {
                    match catalog.id_of(&target) {
                        Some(other) if other != id => {
                            log::debug!("Autorequiring {} for {}", target, resource.reference);
                            graph.edges.insert(Edge {
                                source: other,
                                target: id,
                                kind: EdgeKind::Ordering,
                            });
                        }
                        _ => {}
                    }
                }
            }
        }

        graph
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter()
    }

    pub fn dangling(&self) -> &[Dangling] {
        &self.dangling
    }

    /// Resources that must finish before `id`
    pub fn dependencies(&self, id: ResourceId) -> Vec<ResourceId> {
        self.edges
            .iter()
            .filter(|e| e.kind == EdgeKind::Ordering && e.target == id)
            .map(|e| e.source)
            .collect()
    }

    /// Resources to refresh when `id` changes
    pub fn notification_targets(&self, id: ResourceId) -> Vec<ResourceId> {
        self.edges
            .iter()
            .filter(|e| e.kind == EdgeKind::Notification && e.source == id)
            .map(|e| e.target)
            .collect()
    }

    /// Kahn's algorithm over ordering edges; ready nodes are taken in
    /// declaration order.
    pub fn topological_order(&self) -> Result<Vec<ResourceId>> {
        let size = self.names.len();
        let mut in_degree = vec![0usize; size];
        let mut successors: Vec<Vec<ResourceId>> = vec![Vec::new(); size];
        for edge in self.edges.iter().filter(|e| e.kind == EdgeKind::Ordering) {
            in_degree[edge.target] += 1;
            successors[edge.source].push(edge.target);
        }

        let mut ready: BinaryHeap<Reverse<ResourceId>> = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, &degree)| degree == 0)
            .map(|(id, _)| Reverse(id))
            .collect();

        let mut order = Vec::with_capacity(size);
        while let Some(Reverse(id)) = ready.pop() {
            order.push(id);
            for &next in &successors[id] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        if order.len() == size {
            return Ok(order);
        }

        let stuck: Vec<bool> = in_degree.iter().map(|&d| d > 0).collect();
        Err(Error::CyclicDependency {
            cycle: self.find_cycle(&successors, &stuck),
        })
    }

    /// Walk backwards through unresolved nodes until one repeats.
    ///
    /// Every node left with a positive in-degree after Kahn's algorithm has
    /// an unresolved predecessor, so the walk always closes a cycle.
    fn find_cycle(&self, successors: &[Vec<ResourceId>], stuck: &[bool]) -> Vec<String> {
        let mut predecessor = vec![None; stuck.len()];
        for (source, targets) in successors.iter().enumerate() {
            if !stuck[source] {
                continue;
            }
            for &target in targets {
                if stuck[target] && predecessor[target].is_none() {
                    predecessor[target] = Some(source);
                }
            }
        }

        let Some(start) = stuck.iter().position(|&s| s) else {
            return Vec::new();
        };
        let mut seen = vec![false; stuck.len()];
        let mut path = Vec::new();
        let mut current = start;
        while !seen[current] {
            seen[current] = true;
            path.push(current);
            match predecessor[current] {
                Some(previous) => current = previous,
                None => break,
            }
        }

        let Some(begin) = path.iter().position(|&id| id == current) else {
            return path.iter().map(|&id| self.names[id].clone()).collect();
        };
        let mut cycle: Vec<ResourceId> = path[begin..].to_vec();
        cycle.reverse();
        cycle.push(cycle[0]);
        cycle.iter().map(|&id| self.names[id].clone()).collect()
    }
}
