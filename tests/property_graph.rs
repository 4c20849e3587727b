// tests/property_graph.rs
//
// Property tests for network graph construction and ordering.

use std::collections::HashSet;

use proptest::prelude::*;

use flowrun::network::graph::NetworkGraph;
use flowrun::network::node::NetworkDefinition;
use flowrun_test_utils::builders::{NetworkBuilder, NodeBuilder};

// Strategy for a valid DAG: node N may only depend on nodes 0..N-1, so the
// definition is acyclic by construction.
fn dag_strategy(max_nodes: usize) -> impl Strategy<Value = NetworkDefinition> {
    (1..=max_nodes).prop_flat_map(|num_nodes| {
        let deps = proptest::collection::vec(
            proptest::collection::vec(any::<usize>(), 0..num_nodes),
            num_nodes,
        );
        deps.prop_map(move |raw_deps| {
            let mut builder = NetworkBuilder::new("prop-net");
            for (i, potential) in raw_deps.into_iter().enumerate() {
                let name = format!("node_{i}");
                let mut node = if i == 0 {
                    NodeBuilder::source(&name)
                } else {
                    NodeBuilder::step(&name, "tool")
                };

                let mut valid: HashSet<usize> = HashSet::new();
                for dep in potential {
                    if i > 0 {
                        valid.insert(dep % i);
                    }
                }
                for dep in valid {
                    node = node.after(&format!("node_{dep}"));
                }
                builder = builder.node(node.build());
            }
            builder.build()
        })
    })
}

proptest! {
    #[test]
    fn acyclic_definitions_build(def in dag_strategy(12)) {
        let graph = NetworkGraph::from_definition(&def);
        prop_assert!(graph.is_ok());
    }

    #[test]
    fn topological_order_respects_dependencies(def in dag_strategy(12)) {
        let graph = NetworkGraph::from_definition(&def).expect("acyclic");
        let order = graph.topological_order().expect("orderable");
        prop_assert_eq!(order.len(), def.nodes.len());

        let position = |id: &str| order.iter().position(|n| n == id).expect("present");
        for node in &def.nodes {
            for dep in &node.depends_on {
                prop_assert!(
                    position(dep) < position(&node.id),
                    "{} ordered before its dependency {}",
                    node.id,
                    dep
                );
            }
        }
    }

    #[test]
    fn dependency_lookups_mirror_the_definition(def in dag_strategy(12)) {
        let graph = NetworkGraph::from_definition(&def).expect("acyclic");
        for node in &def.nodes {
            let mut deps = graph.dependencies_of(&node.id);
            deps.sort();
            let mut declared = node.depends_on.clone();
            declared.sort();
            prop_assert_eq!(deps, declared);
        }
    }
}

#[test]
fn cycles_are_rejected() {
    let def = NetworkBuilder::new("net")
        .node(NodeBuilder::step("a", "tool").after("b").build())
        .node(NodeBuilder::step("b", "tool").after("a").build())
        .build();
    assert!(NetworkGraph::from_definition(&def).is_err());
}

#[test]
fn unknown_dependency_is_rejected() {
    let def = NetworkBuilder::new("net")
        .node(NodeBuilder::step("a", "tool").after("ghost").build())
        .build();
    assert!(NetworkGraph::from_definition(&def).is_err());
}
