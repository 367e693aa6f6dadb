//! Stage ordering.
//!
//! With edges, Kahn's algorithm over the retained nodes; ties between nodes
//! that become ready together go to the lower `(sequence_hint, position)`.
//! Without edges, a stable sort on `sequence_hint`.

use super::input::{Edge, Node};
use crate::errors::{ErrorKind, ErrorRecord, GraphError};
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet};
use tracing::debug;

/// Returns indices into `nodes` in execution order.
///
/// `filtered_ids` holds references of nodes removed before ordering; edges
/// touching them are dropped quietly. Edges whose endpoints resolve to
/// nothing at all produce a `DanglingEdge` warning.
///
/// # Errors
///
/// Returns [`GraphError::Cycle`] naming every node that could not be ordered.
pub(crate) fn resolve_order(
    nodes: &[Node],
    edges: &[Edge],
    filtered_ids: &HashSet<String>,
    warnings: &mut Vec<ErrorRecord>,
) -> Result<Vec<usize>, GraphError> {
    let key = |i: usize| (nodes[i].sequence_hint, i);

    if edges.is_empty() {
        let mut order: Vec<usize> = (0..nodes.len()).collect();
        order.sort_by_key(|&i| key(i));
        return Ok(order);
    }

    let mut by_id: HashMap<&str, usize> = HashMap::new();
    for (i, node) in nodes.iter().enumerate() {
        if by_id.contains_key(node.id.as_str()) {
            warnings.push(ErrorRecord::new(
                ErrorKind::AmbiguousNodeRef,
                format!("several nodes are referenced as '{}'; edges bind to the first", node.id),
            ));
        } else {
            by_id.insert(node.id.as_str(), i);
        }
    }

    let mut successors: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); nodes.len()];
    for edge in edges {
        match (by_id.get(edge.source.as_str()), by_id.get(edge.target.as_str())) {
            (Some(&from), Some(&to)) => {
                successors[from].insert(to);
            }
            _ => {
                let unknown = [&edge.source, &edge.target]
                    .into_iter()
                    .filter(|r| !by_id.contains_key(r.as_str()) && !filtered_ids.contains(*r))
                    .cloned()
                    .collect::<Vec<_>>();
                if unknown.is_empty() {
                    debug!(source = %edge.source, target = %edge.target, "Ignoring edge to filtered node");
                } else {
                    warnings.push(ErrorRecord::new(
                        ErrorKind::DanglingEdge,
                        format!(
                            "edge {} -> {} ignored; unknown reference {}",
                            edge.source,
                            edge.target,
                            unknown.join(", ")
                        ),
                    ));
                }
            }
        }
    }

    let mut in_degree = vec![0usize; nodes.len()];
    for targets in &successors {
        for &to in targets {
            in_degree[to] += 1;
        }
    }

    let mut ready: BinaryHeap<Reverse<(i64, usize)>> = (0..nodes.len())
        .filter(|&i| in_degree[i] == 0)
        .map(|i| Reverse(key(i)))
        .collect();
    let mut order = Vec::with_capacity(nodes.len());

    while let Some(Reverse((_, i))) = ready.pop() {
        order.push(i);
        for &to in &successors[i] {
            in_degree[to] -= 1;
            if in_degree[to] == 0 {
                ready.push(Reverse(key(to)));
            }
        }
    }

    if order.len() < nodes.len() {
        let mut stuck: Vec<usize> = (0..nodes.len()).filter(|&i| in_degree[i] > 0).collect();
        stuck.sort_by_key(|&i| key(i));
        return Err(GraphError::cycle(
            stuck.into_iter().map(|i| nodes[i].id.clone()).collect(),
        ));
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn nodes(spec: &[(&str, i64)]) -> Vec<Node> {
        spec.iter().map(|(t, s)| Node::new(t, *s)).collect()
    }

    fn order(nodes: &[Node], edges: &[Edge]) -> Result<Vec<String>, GraphError> {
        let mut warnings = Vec::new();
        resolve_order(nodes, edges, &HashSet::new(), &mut warnings)
            .map(|o| o.into_iter().map(|i| nodes[i].id.clone()).collect())
    }

    #[test]
    fn test_no_edges_sorts_by_hint_stably() {
        let mut graph = nodes(&[("dense", 2), ("flatten", 0), ("dropout", 2), ("conv2d", 1)]);
        graph[2].id = "dropout-x".into();
        assert_eq!(
            order(&graph, &[]).unwrap(),
            vec!["flatten-0", "conv2d-1", "dense-2", "dropout-x"]
        );
    }

    #[test]
    fn test_edges_override_hints() {
        let graph = nodes(&[("flatten", 0), ("dense", 1)]);
        let edges = vec![Edge::new("dense-1", "flatten-0")];
        assert_eq!(order(&graph, &edges).unwrap(), vec!["dense-1", "flatten-0"]);
    }

    #[test]
    fn test_ties_break_by_hint() {
        // a diamond: conv -> {dense-5, dropout-3} -> flatten
        let graph = nodes(&[("conv2d", 0), ("dense", 5), ("dropout", 3), ("flatten", 9)]);
        let edges = vec![
            Edge::new("conv2d-0", "dense-5"),
            Edge::new("conv2d-0", "dropout-3"),
            Edge::new("dense-5", "flatten-9"),
            Edge::new("dropout-3", "flatten-9"),
        ];
        assert_eq!(
            order(&graph, &edges).unwrap(),
            vec!["conv2d-0", "dropout-3", "dense-5", "flatten-9"]
        );
    }

    #[test]
    fn test_cycle_names_both_nodes() {
        let graph = nodes(&[("dense", 1), ("flatten", 0), ("dropout", 2)]);
        let edges = vec![
            Edge::new("flatten-0", "dense-1"),
            Edge::new("dense-1", "flatten-0"),
        ];
        assert_eq!(
            order(&graph, &edges).unwrap_err(),
            GraphError::cycle(vec!["flatten-0".into(), "dense-1".into()])
        );
    }

    #[test]
    fn test_self_loop_is_cycle() {
        let graph = nodes(&[("dense", 1)]);
        let err = order(&graph, &[Edge::new("dense-1", "dense-1")]).unwrap_err();
        assert_eq!(err, GraphError::cycle(vec!["dense-1".into()]));
    }

    #[test]
    fn test_duplicate_edges_collapse() {
        let graph = nodes(&[("flatten", 1), ("dense", 0)]);
        let edges = vec![Edge::new("flatten-1", "dense-0"), Edge::new("flatten-1", "dense-0")];
        assert_eq!(order(&graph, &edges).unwrap(), vec!["flatten-1", "dense-0"]);
    }

    #[test]
    fn test_dangling_and_filtered_edges() {
        let graph = nodes(&[("dense", 1), ("flatten", 0)]);
        let edges = vec![
            Edge::new("mnist-0", "flatten-0"),
            Edge::new("flatten-0", "ghost-9"),
        ];
        let filtered: HashSet<String> = ["mnist-0".to_string()].into_iter().collect();
        let mut warnings = Vec::new();

        let result = resolve_order(&graph, &edges, &filtered, &mut warnings).unwrap();

        assert_eq!(result, vec![1, 0]);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].kind, ErrorKind::DanglingEdge);
        assert!(warnings[0].message.contains("ghost-9"));
    }

    #[test]
    fn test_duplicate_ids_warn_and_bind_first() {
        let graph = nodes(&[("dense", 1), ("dense", 1), ("flatten", 0)]);
        let edges = vec![Edge::new("dense-1", "flatten-0")];
        let mut warnings = Vec::new();

        let result = resolve_order(&graph, &edges, &HashSet::new(), &mut warnings).unwrap();

        assert_eq!(result, vec![0, 2, 1]);
        assert_eq!(warnings[0].kind, ErrorKind::AmbiguousNodeRef);
    }
}
