//! Hierarchical wall-clock timers
//!
//! Scopes nest: a scope started while another is running becomes its child.
//! Paths join scope names with `/`, e.g. `Simulation/HCSITS/Relaxation`.

use std::fmt;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Node {
    name: String,
    parent: Option<usize>,
    children: Vec<usize>,
    total: Duration,
    count: u64,
    started: Option<Instant>,
}

#[derive(Debug, Default)]
pub struct TimingTree {
    nodes: Vec<Node>,
    roots: Vec<usize>,
    stack: Vec<usize>,
}

impl TimingTree {
    pub fn new() -> Self {
        Self::default()
    }

    fn child_named(&self, parent: Option<usize>, name: &str) -> Option<usize> {
        let siblings = match parent {
            Some(p) => &self.nodes[p].children,
            None => &self.roots,
        };
        siblings.iter().copied().find(|&i| self.nodes[i].name == name)
    }

    pub fn start(&mut self, name: &str) {
        let parent = self.stack.last().copied();
        let idx = match self.child_named(parent, name) {
            Some(idx) => idx,
            None => {
                let idx = self.nodes.len();
                self.nodes.push(Node {
                    name: name.to_string(),
                    parent,
                    children: Vec::new(),
                    total: Duration::ZERO,
                    count: 0,
                    started: None,
                });
                match parent {
                    Some(p) => self.nodes[p].children.push(idx),
                    None => self.roots.push(idx),
                }
                idx
            }
        };
        self.nodes[idx].started = Some(Instant::now());
        self.stack.push(idx);
    }

    /// Stops the innermost scope. Returns false (and changes nothing) if
    /// it is not called `name`.
    pub fn stop(&mut self, name: &str) -> bool {
        match self.stack.last() {
            Some(&idx) if self.nodes[idx].name == name => {
                self.stack.pop();
                let node = &mut self.nodes[idx];
                if let Some(t0) = node.started.take() {
                    node.total += t0.elapsed();
                    node.count += 1;
                }
                true
            }
            _ => false,
        }
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.stack.iter().any(|&i| self.nodes[i].name == name)
    }

    /// Closes every open scope, innermost first.
    pub fn stop_all(&mut self) {
        while let Some(&idx) = self.stack.last() {
            let name = self.nodes[idx].name.clone();
            self.stop(&name);
        }
    }

    fn find(&self, path: &str) -> Option<usize> {
        let mut current = None;
        for part in path.split('/') {
            current = Some(self.child_named(current, part)?);
        }
        current
    }

    pub fn total(&self, path: &str) -> Duration {
        self.find(path).map(|i| self.nodes[i].total).unwrap_or(Duration::ZERO)
    }

    fn path_of(&self, mut idx: usize) -> String {
        let mut parts = vec![self.nodes[idx].name.as_str()];
        while let Some(p) = self.nodes[idx].parent {
            parts.push(self.nodes[p].name.as_str());
            idx = p;
        }
        parts.reverse();
        parts.join("/")
    }

    /// Every scope as `(path, total, count)` in creation order.
    pub fn flatten(&self) -> Vec<(String, Duration, u64)> {
        (0..self.nodes.len())
            .map(|i| (self.path_of(i), self.nodes[i].total, self.nodes[i].count))
            .collect()
    }

    fn write_node(&self, f: &mut fmt::Formatter<'_>, idx: usize, depth: usize, parent_total: Duration) -> fmt::Result {
        let node = &self.nodes[idx];
        let share = if parent_total.is_zero() {
            100.0
        } else {
            100.0 * node.total.as_secs_f64() / parent_total.as_secs_f64()
        };
        writeln!(
            f,
            "{:indent$}{:<32} {:>10.3}s {:>6.1}% {:>8}",
            "",
            node.name,
            node.total.as_secs_f64(),
            share,
            node.count,
            indent = depth * 2
        )?;
        for &child in &node.children {
            self.write_node(f, child, depth + 1, node.total)?;
        }
        Ok(())
    }
}

impl fmt::Display for TimingTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &root in &self.roots {
            self.write_node(f, root, 0, Duration::ZERO)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_scopes_build_paths() {
        let mut tree = TimingTree::new();
        tree.start("Simulation");
        tree.start("DEM");
        assert!(tree.stop("DEM"));
        tree.start("DEM");
        assert!(tree.stop("DEM"));
        assert!(tree.stop("Simulation"));

        let flat = tree.flatten();
        assert_eq!(flat.len(), 2);
        assert_eq!(flat[1].0, "Simulation/DEM");
        assert_eq!(flat[1].2, 2);
        assert!(tree.total("Simulation") >= tree.total("Simulation/DEM"));
    }

    #[test]
    fn mismatched_stop_is_rejected() {
        let mut tree = TimingTree::new();
        tree.start("Sync");
        assert!(!tree.stop("Output"));
        assert!(tree.is_running("Sync"));
    }

    #[test]
    fn stop_all_closes_everything() {
        let mut tree = TimingTree::new();
        tree.start("Simulation");
        tree.start("HCSITS");
        tree.stop_all();
        assert!(!tree.is_running("Simulation"));
        assert_eq!(tree.flatten()[0].2, 1);
    }

    #[test]
    fn display_lists_children_indented() {
        let mut tree = TimingTree::new();
        tree.start("Simulation");
        tree.start("Sync");
        tree.stop_all();
        let text = tree.to_string();
        assert!(text.contains("Simulation"));
        assert!(text.contains("  Sync"));
    }
}
