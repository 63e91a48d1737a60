// Invalidation tracking for dev rebuilds: which graph nodes a set of
// changed files reaches through reverse dependency edges

use crate::core::models::Graph;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Reverse dependency edges between source paths
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Files that import each file
    dependents: HashMap<PathBuf, HashSet<PathBuf>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Path-level view of a finished build graph
    pub fn from_graph(graph: &Graph) -> Self {
        let mut tracked = Self::new();
        for node in graph.nodes.values() {
            for dep in node.dependency_ids() {
                if let Some(target) = graph.get(dep) {
                    tracked.add_dependency(node.path.clone(), target.path.clone());
                }
            }
        }
        tracked
    }

    /// Add a dependency relationship: `from` depends on `to`
    pub fn add_dependency(&mut self, from: PathBuf, to: PathBuf) {
        self.dependents.entry(to).or_default().insert(from);
    }

    /// Get all files that depend on this file
    pub fn get_dependents(&self, path: &Path) -> Option<&HashSet<PathBuf>> {
        self.dependents.get(path)
    }

    /// Get all files affected by a change (transitive closure)
    pub fn get_affected_files(&self, changed_file: &Path) -> HashSet<PathBuf> {
        let mut affected = HashSet::new();
        let mut to_process = vec![changed_file.to_path_buf()];

        while let Some(file) = to_process.pop() {
            if !affected.insert(file.clone()) {
                continue;
            }

            if let Some(dependents) = self.get_dependents(&file) {
                to_process.extend(dependents.iter().filter(|d| !affected.contains(*d)).cloned());
            }
        }

        affected
    }

    /// Union of the affected sets of every changed file
    pub fn affected_by<'a>(&self, changed: impl IntoIterator<Item = &'a PathBuf>) -> HashSet<PathBuf> {
        changed
            .into_iter()
            .flat_map(|path| self.get_affected_files(path))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependency_graph() {
        let mut graph = DependencyGraph::new();

        let main = PathBuf::from("main.js");
        let utils = PathBuf::from("utils.js");
        let helpers = PathBuf::from("helpers.js");

        graph.add_dependency(main.clone(), utils.clone());
        graph.add_dependency(utils.clone(), helpers.clone());

        assert!(graph.get_dependents(&helpers).unwrap().contains(&utils));
        assert!(graph.get_dependents(&main).is_none());

        let affected = graph.get_affected_files(&helpers);
        assert_eq!(affected.len(), 3);
        assert!(affected.contains(&main));
    }

    #[test]
    fn test_runtime_cycle_terminates() {
        let mut graph = DependencyGraph::new();
        let a = PathBuf::from("a.js");
        let b = PathBuf::from("b.js");
        graph.add_dependency(a.clone(), b.clone());
        graph.add_dependency(b.clone(), a.clone());

        assert_eq!(graph.get_affected_files(&a).len(), 2);
    }

    #[test]
    fn test_affected_by_unknown_file_is_itself() {
        let graph = DependencyGraph::new();
        let readme = PathBuf::from("README.md");
        let affected = graph.affected_by([&readme]);
        assert_eq!(affected.len(), 1);
        assert!(affected.contains(&readme));
    }

    #[test]
    fn test_from_graph_follows_importers() {
        use crate::core::models::{ContentType, Dependency, DependencyKind, ModuleId, ModuleNode};

        let root = Path::new("/project");
        let mut graph = Graph::default();
        for (file, deps) in [("web/index.js", vec!["web/greet.js"]), ("web/greet.js", vec![]), ("web/other.js", vec![])] {
            let path = root.join(file);
            let mut node = ModuleNode::new(ModuleId::from_path(root, &path), path.clone(), ContentType::from_path(&path));
            for dep in deps {
                node.dependencies.push(Dependency {
                    specifier: format!("./{}", dep.trim_start_matches("web/")),
                    target: ModuleId::from_path(root, &root.join(dep)),
                    kind: DependencyKind::Import,
                });
            }
            graph.nodes.insert(node.id.clone(), node);
        }

        let changed = root.join("web/greet.js");
        let affected = DependencyGraph::from_graph(&graph).affected_by([&changed]);
        assert_eq!(affected, HashSet::from([changed.clone(), root.join("web/index.js")]));
    }
}
