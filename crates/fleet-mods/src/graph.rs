//! Dependency graph over the catalog.

use crate::catalog::ModCatalog;
use petgraph::Direction;
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, Reversed};
use std::collections::{BTreeSet, HashMap};

/// Edges point from a dependency to the mod that needs it.
#[derive(Debug)]
pub struct ModGraph {
    graph: DiGraph<String, ()>,
    index: HashMap<String, NodeIndex>,
    missing: BTreeSet<(String, String)>,
}

impl ModGraph {
    pub fn build(catalog: &ModCatalog) -> Self {
        Self::from_dependencies(
            catalog
                .iter()
                .map(|e| (e.id.as_str(), e.dependencies.as_slice())),
        )
    }

    /// Graph over `(mod, declared dependencies)` pairs. Dependencies not
    /// listed as mods themselves are recorded as missing.
    pub fn from_dependencies<'a>(mods: impl IntoIterator<Item = (&'a str, &'a [String])>) -> Self {
        let mods: Vec<_> = mods.into_iter().collect();
        let mut graph = DiGraph::new();
        let mut index: HashMap<String, NodeIndex> = HashMap::new();
        let mut missing = BTreeSet::new();

        for &(id, _) in &mods {
            index
                .entry(id.to_string())
                .or_insert_with(|| graph.add_node(id.to_string()));
        }

        for (id, deps) in mods {
            let mod_idx = index[id];
            for dep in deps {
                match index.get(dep.as_str()) {
                    Some(&dep_idx) => {
                        graph.update_edge(dep_idx, mod_idx, ());
                    }
                    None => {
                        missing.insert((id.to_string(), dep.clone()));
                    }
                }
            }
        }

        Self {
            graph,
            index,
            missing,
        }
    }

    pub fn has_cycle(&self) -> bool {
        is_cyclic_directed(&self.graph)
    }

    /// `(mod, dependency)` pairs whose dependency is absent from the catalog.
    pub fn missing_dependencies(&self) -> impl Iterator<Item = &(String, String)> {
        self.missing.iter()
    }

    /// `roots` and everything they transitively depend on. Unknown roots
    /// are included as given.
    pub fn closure<'a>(&self, roots: impl IntoIterator<Item = &'a str>) -> BTreeSet<String> {
        let reversed = Reversed(&self.graph);
        let mut out = BTreeSet::new();
        for root in roots {
            let Some(&start) = self.index.get(root) else {
                out.insert(root.to_string());
                continue;
            };
            let mut dfs = Dfs::new(reversed, start);
            while let Some(idx) = dfs.next(reversed) {
                if let Some(id) = self.graph.node_weight(idx) {
                    out.insert(id.clone());
                }
            }
        }
        out
    }

    /// Mods that directly depend on `id`, ascending.
    pub fn dependents(&self, id: &str) -> Vec<&str> {
        let mut out: Vec<&str> = self
            .index
            .get(id)
            .map(|&idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Outgoing)
                    .filter_map(|n| self.graph.node_weight(n))
                    .map(String::as_str)
                    .collect()
            })
            .unwrap_or_default();
        out.sort_unstable();
        out.dedup();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ModCatalogEntry;

    fn entry(id: &str, deps: &[&str]) -> ModCatalogEntry {
        ModCatalogEntry {
            id: id.to_string(),
            name: id.to_string(),
            author: String::new(),
            version: "1".to_string(),
            game_types: vec![],
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            conflicts_with: vec![],
            checksum: None,
            file_size: 0,
            rating: 0.0,
            crash_on_load: false,
        }
    }

    #[test]
    fn test_dependents_and_missing() {
        let catalog = ModCatalog::new([
            entry("core", &[]),
            entry("a", &["core"]),
            entry("b", &["core", "ghost"]),
        ]);
        let graph = ModGraph::build(&catalog);

        assert_eq!(graph.dependents("core"), vec!["a", "b"]);
        assert!(!graph.has_cycle());
        assert_eq!(
            graph.missing_dependencies().collect::<Vec<_>>(),
            vec![&("b".to_string(), "ghost".to_string())]
        );
    }

    #[test]
    fn test_closure_follows_every_branch() {
        let catalog = ModCatalog::new([
            entry("core", &[]),
            entry("lib", &["core"]),
            entry("base1", &[]),
            entry("addon", &["base1", "lib"]),
            entry("unrelated", &[]),
        ]);
        let graph = ModGraph::build(&catalog);

        let closure = graph.closure(["addon", "ghost"]);
        assert_eq!(
            closure.into_iter().collect::<Vec<_>>(),
            vec!["addon", "base1", "core", "ghost", "lib"]
        );
    }

    #[test]
    fn test_cycle_detected() {
        let catalog = ModCatalog::new([entry("a", &["b"]), entry("b", &["a"])]);
        assert!(ModGraph::build(&catalog).has_cycle());
    }
}
