//! Dependency graph construction and cycle-safe processing order.
//!
//! Documents form a digraph (edge A -> B when A's content references B's
//! path). Processing order is dependency-first so every document sees its
//! dependencies' final hashes before its own content is rewritten. Cycles
//! are collapsed into atomic batches (strongly connected components) that
//! the hash engine treats as a unit.

use camino::Utf8PathBuf;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;
use tracing::{debug, instrument};

use crate::core::document::{DocumentHash, DocumentRegistry, companion_primary};

/// One unit of processing: a single document, or every member of a cycle.
/// Members are sorted by file path — the one documented, deterministic
/// tie-break inside a batch.
pub type Batch = Vec<Utf8PathBuf>;

/// Order all documents into dependency-first batches.
///
/// Tarjan SCC gives components in reverse topological order, which is
/// exactly dependency-first for edges pointing document -> dependency.
/// Node insertion order is fixed (hash-kind priority, then path) so the
/// emitted order never depends on map iteration order: `Direct` documents
/// first, unhashed documents next, `HashFor` documents last — mirrors that
/// indirection targets should be placed before the documents shadowing them
/// whenever the graph leaves the order otherwise unconstrained.
#[instrument(skip_all, fields(documents = registry.len()))]
pub fn sort_documents(registry: &DocumentRegistry) -> Vec<Batch> {
    let mut ordered: Vec<&Utf8PathBuf> = registry.keys().collect();
    ordered.sort_by_key(|path| {
        let priority = match registry.get(*path).and_then(|d| d.content_hash.as_ref()) {
            Some(DocumentHash::Direct(_)) => 0u8,
            None => 1,
            Some(DocumentHash::HashFor(_)) => 2,
        };
        (priority, (*path).clone())
    });

    let mut graph: DiGraph<Utf8PathBuf, ()> = DiGraph::new();
    let mut nodes: HashMap<&Utf8PathBuf, NodeIndex> = HashMap::with_capacity(ordered.len());
    for path in &ordered {
        nodes.insert(*path, graph.add_node((*path).clone()));
    }

    for path in &ordered {
        let Some(document) = registry.get(*path) else { continue };
        let from = nodes[path];
        for dep in &document.dependencies {
            // Self-edges carry no ordering information.
            if dep.file_path == **path {
                continue;
            }
            // Companion targets (maps, declarations, proxies) order through
            // their primary.
            let target = nodes.get(&dep.file_path).copied().or_else(|| {
                companion_primary(&dep.file_path).and_then(|p| nodes.get(&p).copied())
            });
            let Some(to) = target else {
                debug!(from = %path, to = %dep.file_path, "edge target not in registry, skipping");
                continue;
            };
            if to == from {
                continue;
            }
            graph.update_edge(from, to, ());
        }
    }

    let mut batches: Vec<Batch> = tarjan_scc(&graph)
        .into_iter()
        .map(|component| {
            let mut batch: Batch = component.into_iter().map(|idx| graph[idx].clone()).collect();
            batch.sort();
            batch
        })
        .collect();

    // tarjan_scc emits SCCs of isolated nodes too; keep all of them — a
    // document with no edges is simply a batch of one.
    debug!(batches = batches.len(), "sorted documents into batches");
    batches.shrink_to_fit();
    batches
}
