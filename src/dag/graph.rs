//! Task dependency graph.
//!
//! `TaskDag` is a pure data structure: it knows which task waits on which,
//! nothing about execution.

use crate::errors::{BuildError, BuildResult};
use std::collections::{HashMap, HashSet};

/// DFS visitation marks for cycle detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    White,
    Gray,
    Black,
}

/// Directed acyclic graph of task ids.
#[derive(Debug, Clone, Default)]
pub struct TaskDag {
    /// Explicitly added task ids, in insertion order
    tasks: Vec<String>,
    /// Task id -> ids it depends on
    dependencies: HashMap<String, Vec<String>>,
}

impl TaskDag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a task, replacing any dependency set it had before.
    pub fn add_task<I, S>(&mut self, id: &str, dependencies: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut deps: Vec<String> = Vec::new();
        for dep in dependencies {
            let dep = dep.into();
            if !deps.contains(&dep) {
                deps.push(dep);
            }
        }

        if !self.dependencies.contains_key(id) {
            self.tasks.push(id.to_string());
        }
        self.dependencies.insert(id.to_string(), deps);
    }

    /// Number of explicitly added tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.dependencies.contains_key(id)
    }

    /// Task ids in insertion order.
    pub fn task_ids(&self) -> &[String] {
        &self.tasks
    }

    /// Direct dependencies of a task.
    pub fn dependencies(&self, id: &str) -> &[String] {
        self.dependencies.get(id).map_or(&[], |v| v.as_slice())
    }

    /// Tasks that directly depend on the given task.
    pub fn dependents(&self, id: &str) -> Vec<String> {
        self.tasks
            .iter()
            .filter(|t| self.dependencies(t).iter().any(|d| d == id))
            .cloned()
            .collect()
    }

    /// Every task reachable by walking dependencies backwards from `id`.
    pub fn transitive_predecessors(&self, id: &str) -> Vec<String> {
        let mut result = Vec::new();
        let mut visited: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = self.dependencies(id).iter().map(String::as_str).collect();

        while let Some(dep) = stack.pop() {
            if !visited.insert(dep) {
                continue;
            }
            result.push(dep.to_string());
            stack.extend(self.dependencies(dep).iter().map(String::as_str));
        }

        result
    }

    /// Topological order: every task appears after all of its dependencies.
    ///
    /// Ids referenced as dependencies but never added are included as roots.
    pub fn get_order(&self) -> BuildResult<Vec<String>> {
        let mut nodes: Vec<&str> = self.tasks.iter().map(String::as_str).collect();
        for task in &self.tasks {
            for dep in self.dependencies(task) {
                if !self.contains(dep) && !nodes.contains(&dep.as_str()) {
                    nodes.push(dep.as_str());
                }
            }
        }

        let mut marks: HashMap<&str, Mark> = nodes.iter().map(|n| (*n, Mark::White)).collect();
        let mut order = Vec::with_capacity(nodes.len());

        for &root in &nodes {
            if marks[root] != Mark::White {
                continue;
            }

            // Iterative DFS: (node, index of the next dependency to visit)
            let mut stack: Vec<(&str, usize)> = vec![(root, 0)];
            marks.insert(root, Mark::Gray);

            while let Some((node, next)) = stack.pop() {
                let deps = self.dependencies(node);
                if let Some(dep) = deps.get(next) {
                    stack.push((node, next + 1));
                    match marks[dep.as_str()] {
                        Mark::White => {
                            marks.insert(dep.as_str(), Mark::Gray);
                            stack.push((dep.as_str(), 0));
                        }
                        Mark::Gray => {
                            return Err(BuildError::CircularDependency(format!(
                                "cycle detected at task '{}'",
                                dep
                            )));
                        }
                        Mark::Black => {}
                    }
                } else {
                    marks.insert(node, Mark::Black);
                    order.push(node.to_string());
                }
            }
        }

        Ok(order)
    }

    /// Tasks not in `completed` whose dependencies are all in `completed`.
    pub fn get_ready(&self, completed: &HashSet<String>) -> Vec<String> {
        self.tasks
            .iter()
            .filter(|t| !completed.contains(*t))
            .filter(|t| self.dependencies(t).iter().all(|d| completed.contains(d)))
            .cloned()
            .collect()
    }
}
