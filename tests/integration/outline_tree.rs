//! Property tests for outline traversal, numbering and persistence

use proptest::prelude::*;
use std::collections::HashSet;
use storyloom::config::RenderingPolicy;
use storyloom::plan::outline::label_for;
use storyloom::plan::{NodeId, NodeIndex, OutlineDocument, OutlineTree};
use storyloom::render::select_node_to_render;

/// Build a tree where node `i + 1` hangs under one of the nodes created before it.
fn tree_from_parents(parents: &[usize]) -> (OutlineTree, Vec<NodeIndex>) {
    let mut tree = OutlineTree::new();
    let mut created = vec![tree.root()];
    for (i, choice) in parents.iter().enumerate() {
        let parent = created[choice % created.len()];
        created.push(tree.add_child(parent, &format!("Beat {}.", i)));
    }
    (tree, created)
}

fn arb_parents() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(any::<usize>(), 0..40)
}

proptest! {
    #[test]
    fn depth_first_visits_every_node_once(parents in arb_parents()) {
        let (tree, created) = tree_from_parents(&parents);
        let order: Vec<NodeIndex> = tree.depth_first(tree.root(), true, None).collect();
        prop_assert_eq!(order.len(), tree.len());
        let unique: HashSet<NodeIndex> = order.iter().copied().collect();
        prop_assert_eq!(unique.len(), created.len());
        prop_assert_eq!(order[0], tree.root());
    }

    #[test]
    fn parents_precede_children_in_both_orders(parents in arb_parents()) {
        let (tree, _) = tree_from_parents(&parents);
        for order in [
            tree.depth_first(tree.root(), true, None).collect::<Vec<_>>(),
            tree.breadth_first(tree.root(), true, None).collect::<Vec<_>>(),
        ] {
            for (position, ix) in order.iter().enumerate() {
                if let Some(parent) = tree.parent(*ix) {
                    let parent_position = order.iter().position(|n| *n == parent).unwrap();
                    prop_assert!(parent_position < position);
                }
            }
        }
    }

    #[test]
    fn depth_limit_prunes_deeper_nodes(parents in arb_parents(), limit in 0usize..4) {
        let (tree, _) = tree_from_parents(&parents);
        let limited: Vec<NodeIndex> = tree.breadth_first(tree.root(), true, Some(limit)).collect();
        prop_assert!(limited.iter().all(|ix| tree.depth(*ix) <= limit));
        let expected = tree.all_nodes().into_iter().filter(|ix| tree.depth(*ix) <= limit).count();
        prop_assert_eq!(limited.len(), expected);
    }

    #[test]
    fn leaves_partition_under_the_root(parents in arb_parents()) {
        let (tree, _) = tree_from_parents(&parents);
        let leaves = tree.leaves(tree.root());
        let from_children: Vec<NodeIndex> = tree
            .children(tree.root())
            .iter()
            .flat_map(|child| tree.leaves(*child))
            .collect();
        if tree.children(tree.root()).is_empty() {
            prop_assert_eq!(leaves, vec![tree.root()]);
        } else {
            prop_assert_eq!(leaves, from_children);
        }
    }

    #[test]
    fn ancestors_start_at_root(parents in arb_parents()) {
        let (tree, created) = tree_from_parents(&parents);
        for ix in created {
            let chain = tree.ancestors(ix, true);
            prop_assert_eq!(chain[0], tree.root());
            prop_assert_eq!(*chain.last().unwrap(), ix);
            prop_assert_eq!(chain.len(), tree.depth(ix) + 1);
        }
    }

    #[test]
    fn numbering_survives_a_json_round_trip(parents in arb_parents()) {
        let (tree, _) = tree_from_parents(&parents);
        let json = serde_json::to_string(&tree).unwrap();
        let restored: OutlineTree = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(restored.to_string(), tree.to_string());
        prop_assert_eq!(restored.to_document(), tree.to_document());
    }

    #[test]
    fn leaf_rendering_walks_leaves_in_order(parents in arb_parents()) {
        let (tree, _) = tree_from_parents(&parents);
        let mut rendered: Vec<NodeId> = Vec::new();
        while let Some(ix) = select_node_to_render(&tree, RenderingPolicy::Leaves, &rendered) {
            rendered.push(tree.node(ix).id().clone());
        }
        let expected: Vec<NodeId> = tree
            .depth_first(tree.root(), false, None)
            .filter(|ix| tree.node(*ix).is_leaf())
            .map(|ix| tree.node(ix).id().clone())
            .collect();
        prop_assert_eq!(rendered, expected);
    }

    #[test]
    fn letter_labels_are_unique(a in 1usize..2000, b in 1usize..2000) {
        prop_assume!(a != b);
        prop_assert_ne!(label_for(2, a), label_for(2, b));
    }
}

#[test]
fn labels_cycle_number_letter_roman() {
    assert_eq!(label_for(1, 3), "3");
    assert_eq!(label_for(2, 3), "c");
    assert_eq!(label_for(2, 27), "aa");
    assert_eq!(label_for(3, 4), "iv");
    assert_eq!(label_for(4, 12), "12");
}

#[test]
fn document_shape_matches_tree() {
    let (tree, created) = tree_from_parents(&[0, 0, 1, 1, 2]);
    let document: OutlineDocument = tree.to_document();
    assert_eq!(document.children.len(), 2);
    assert_eq!(document.children[0].children.len(), 2);
    assert_eq!(document.children[1].children.len(), 1);
    assert_eq!(document.children[0].children[0].id, *tree.node(created[3]).id());
}
