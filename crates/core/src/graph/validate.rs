use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::Serialize;

use crate::errors::GraphError;
use crate::graph::arena::NodeArena;
use crate::result::NodeKind;

/// Name-keyed adjacency, as declared by children lists.
pub type Adjacency = BTreeMap<String, Vec<String>>;

/// Every distinct cycle in the adjacency, each as the ordered name sequence
/// from the repeated node back to itself (exclusive). Self-loops appear as
/// single-element cycles. DFS with recursion-stack coloring.
pub fn detect_cycles(adjacency: &Adjacency) -> Vec<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Grey,
        Black,
    }

    fn visit(
        node: &str,
        adjacency: &Adjacency,
        colors: &mut BTreeMap<String, Color>,
        stack: &mut Vec<String>,
        cycles: &mut Vec<Vec<String>>,
        seen: &mut BTreeSet<Vec<String>>,
    ) {
        colors.insert(node.to_owned(), Color::Grey);
        stack.push(node.to_owned());

        for next in adjacency.get(node).map(Vec::as_slice).unwrap_or_default() {
            match colors.get(next.as_str()).copied().unwrap_or(Color::White) {
                Color::Grey => {
                    if let Some(start) = stack.iter().position(|name| name == next) {
                        let cycle = stack[start..].to_vec();
                        // Canonical rotation so the same loop found from two
                        // entry points is reported once.
                        let mut canonical = cycle.clone();
                        if let Some(min_index) = canonical
                            .iter()
                            .enumerate()
                            .min_by(|(_, a), (_, b)| a.cmp(b))
                            .map(|(index, _)| index)
                        {
                            canonical.rotate_left(min_index);
                        }
                        if seen.insert(canonical) {
                            cycles.push(cycle);
                        }
                    }
                }
                Color::White => visit(next, adjacency, colors, stack, cycles, seen),
                Color::Black => {}
            }
        }

        stack.pop();
        colors.insert(node.to_owned(), Color::Black);
    }

    let mut colors = BTreeMap::new();
    let mut cycles = Vec::new();
    let mut seen = BTreeSet::new();
    for node in adjacency.keys() {
        if colors.get(node.as_str()).copied().unwrap_or(Color::White) == Color::White {
            visit(node, adjacency, &mut colors, &mut Vec::new(), &mut cycles, &mut seen);
        }
    }
    cycles
}

/// Nodes not forward-reachable from `root`. A root absent from the node set
/// makes every node unreachable.
pub fn find_unreachable_nodes(adjacency: &Adjacency, root: &str) -> Vec<String> {
    if !adjacency.contains_key(root) {
        return adjacency.keys().cloned().collect();
    }

    let mut reached = BTreeSet::new();
    let mut queue = VecDeque::from([root.to_owned()]);
    while let Some(current) = queue.pop_front() {
        if !reached.insert(current.clone()) {
            continue;
        }
        for next in adjacency.get(&current).map(Vec::as_slice).unwrap_or_default() {
            if !reached.contains(next) {
                queue.push_back(next.clone());
            }
        }
    }

    adjacency.keys().filter(|name| !reached.contains(*name)).cloned().collect()
}

/// Non-raising aggregate view of a graph's structure.
#[derive(Clone, Debug, Serialize)]
pub struct GraphReport {
    pub total_nodes: usize,
    pub node_counts_by_type: BTreeMap<String, usize>,
    pub routing_valid: bool,
    pub has_cycles: bool,
    pub orphaned_count: usize,
    pub orphaned_nodes: Vec<String>,
}

/// Every splitter's direct children must be classifier nodes. Checked over
/// the arena range `[start, end)`, which covers exactly one added root.
pub(crate) fn check_splitter_children(
    arena: &NodeArena,
    start: usize,
    end: usize,
) -> Result<(), GraphError> {
    for (id, node) in arena.iter() {
        if id.0 < start || id.0 >= end {
            continue;
        }
        if node.kind() != NodeKind::Splitter {
            continue;
        }
        for &child_id in node.children() {
            let child = arena.node(child_id);
            if child.kind() != NodeKind::Classifier {
                return Err(GraphError::SplitterChildMustBeClassifier {
                    parent: node.name.clone(),
                    child: child.name.clone(),
                    kind: child.kind().label(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{detect_cycles, find_unreachable_nodes, Adjacency};

    fn adjacency(edges: &[(&str, &[&str])]) -> Adjacency {
        edges
            .iter()
            .map(|(name, children)| {
                ((*name).to_owned(), children.iter().map(|child| (*child).to_owned()).collect())
            })
            .collect::<BTreeMap<_, _>>()
    }

    #[test]
    fn three_node_loop_is_reported_with_all_names() {
        let graph = adjacency(&[("a", &["b"]), ("b", &["c"]), ("c", &["a"])]);
        let cycles = detect_cycles(&graph);
        assert_eq!(cycles.len(), 1);
        for name in ["a", "b", "c"] {
            assert!(cycles[0].iter().any(|entry| entry == name), "missing {name}");
        }
    }

    #[test]
    fn dag_has_no_cycles() {
        let graph = adjacency(&[("a", &["b", "c"]), ("b", &["d"]), ("c", &["d"]), ("d", &[])]);
        assert!(detect_cycles(&graph).is_empty());
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let graph = adjacency(&[("a", &["a"])]);
        let cycles = detect_cycles(&graph);
        assert_eq!(cycles, vec![vec!["a".to_owned()]]);
    }

    #[test]
    fn unreachable_nodes_are_reported() {
        let graph = adjacency(&[("root", &["a"]), ("a", &[]), ("stray", &[])]);
        assert_eq!(find_unreachable_nodes(&graph, "root"), vec!["stray".to_owned()]);
    }

    #[test]
    fn absent_root_makes_everything_unreachable() {
        let graph = adjacency(&[("a", &["b"]), ("b", &[])]);
        let unreachable = find_unreachable_nodes(&graph, "missing");
        assert_eq!(unreachable.len(), 2);
    }
}
