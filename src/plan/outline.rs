//! Outline tree
//!
//! An ordered tree of narrative beats. Nodes live in an arena owned by the
//! tree; a node's `children` list is the only ownership edge, `parent` is a
//! non-owning handle back into the same arena. Positional numbering is derived
//! from the tree shape on every call and never stored.

use crate::error::ApiError;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::str::FromStr;

/// Stable opaque identity of an outline node, assigned once at creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Generate a fresh random id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for NodeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handle to a node inside one `OutlineTree`. Only meaningful for the tree
/// that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIndex(usize);

/// One narrative beat.
#[derive(Debug, Clone)]
pub struct OutlineNode {
    id: NodeId,
    pub text: String,
    pub scene: String,
    pub entities: Vec<String>,
    parent: Option<NodeIndex>,
    children: Vec<NodeIndex>,
}

impl PartialEq for OutlineNode {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for OutlineNode {}

impl OutlineNode {
    fn new(id: NodeId, text: &str, parent: Option<NodeIndex>) -> Self {
        Self {
            id,
            text: text.trim().to_string(),
            scene: String::new(),
            entities: Vec::new(),
            parent,
            children: Vec::new(),
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn parent(&self) -> Option<NodeIndex> {
        self.parent
    }

    pub fn children(&self) -> &[NodeIndex] {
        &self.children
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn set_text(&mut self, text: &str) {
        self.text = text.trim().to_string();
    }

    /// Replace the entity list, dropping repeated names but keeping first-seen order.
    pub fn set_entities<I, S>(&mut self, entities: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut deduped: Vec<String> = Vec::new();
        for entity in entities {
            let entity = entity.into();
            if !deduped.contains(&entity) {
                deduped.push(entity);
            }
        }
        self.entities = deduped;
    }
}

/// Which other nodes are shown to the generator around a given node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContextPolicy {
    /// Every other node in the tree
    Full,
    /// Strict ancestor chain
    Ancestors,
    /// Siblings (self included) of every ancestor (self included)
    AncestorsWithSiblings,
    /// The above plus the direct children of each such sibling
    AncestorsWithSiblingsChildren,
}

impl FromStr for ContextPolicy {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(ContextPolicy::Full),
            "ancestors" => Ok(ContextPolicy::Ancestors),
            "ancestors-with-siblings" => Ok(ContextPolicy::AncestorsWithSiblings),
            "ancestors-with-siblings-children" => {
                Ok(ContextPolicy::AncestorsWithSiblingsChildren)
            }
            other => Err(ApiError::ConfigError(format!(
                "Outline context type {} not implemented",
                other
            ))),
        }
    }
}

/// Persisted form of an outline node and its subtree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlineDocument {
    pub text: String,
    #[serde(default)]
    pub scene: String,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default = "NodeId::generate")]
    pub id: NodeId,
    #[serde(default)]
    pub children: Vec<OutlineDocument>,
}

/// Ordered, mutable tree of narrative beats.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(into = "OutlineDocument", from = "OutlineDocument")]
pub struct OutlineTree {
    nodes: Vec<OutlineNode>,
    root: NodeIndex,
}

impl Default for OutlineTree {
    fn default() -> Self {
        Self::new()
    }
}

impl OutlineTree {
    /// A tree holding only an empty root.
    pub fn new() -> Self {
        Self {
            nodes: vec![OutlineNode::new(NodeId::generate(), "", None)],
            root: NodeIndex(0),
        }
    }

    pub fn root(&self) -> NodeIndex {
        self.root
    }

    pub fn node(&self, ix: NodeIndex) -> &OutlineNode {
        &self.nodes[ix.0]
    }

    pub fn node_mut(&mut self, ix: NodeIndex) -> &mut OutlineNode {
        &mut self.nodes[ix.0]
    }

    /// Number of nodes, root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn children(&self, ix: NodeIndex) -> &[NodeIndex] {
        &self.nodes[ix.0].children
    }

    pub fn parent(&self, ix: NodeIndex) -> Option<NodeIndex> {
        self.nodes[ix.0].parent
    }

    /// Append a new last child under `parent`.
    pub fn add_child(&mut self, parent: NodeIndex, text: &str) -> NodeIndex {
        self.add_child_with_id(parent, NodeId::generate(), text)
    }

    fn add_child_with_id(&mut self, parent: NodeIndex, id: NodeId, text: &str) -> NodeIndex {
        let ix = NodeIndex(self.nodes.len());
        self.nodes.push(OutlineNode::new(id, text, Some(parent)));
        self.nodes[parent.0].children.push(ix);
        ix
    }

    /// Look a node up by its stable id.
    pub fn find(&self, id: &NodeId) -> Option<NodeIndex> {
        self.nodes
            .iter()
            .position(|node| &node.id == id)
            .map(NodeIndex)
    }

    pub fn depth(&self, ix: NodeIndex) -> usize {
        let mut depth = 0;
        let mut current = self.nodes[ix.0].parent;
        while let Some(parent) = current {
            depth += 1;
            current = self.nodes[parent.0].parent;
        }
        depth
    }

    /// 1-based position among siblings; the root counts as 1.
    pub fn position(&self, ix: NodeIndex) -> usize {
        match self.nodes[ix.0].parent {
            None => 1,
            Some(parent) => {
                self.nodes[parent.0]
                    .children
                    .iter()
                    .position(|c| *c == ix)
                    .unwrap_or(0)
                    + 1
            }
        }
    }

    /// Positional label such as `3`, `c` or `iii`, depending on depth.
    ///
    /// `lookahead` offsets the sibling index so the label of a not-yet-created
    /// next sibling can be predicted.
    pub fn label(&self, ix: NodeIndex, depth_shift: usize, lookahead: usize) -> String {
        let depth = self.depth(ix) + depth_shift;
        label_for(depth, self.position(ix) + lookahead)
    }

    /// Indented outline number, e.g. `"\tb. "`. Empty at depth 0.
    pub fn number(&self, ix: NodeIndex, depth_shift: usize, lookahead: usize) -> String {
        let depth = self.depth(ix) + depth_shift;
        if depth == 0 {
            return String::new();
        }
        format!(
            "{}{}. ",
            "\t".repeat(depth - 1),
            label_for(depth, self.position(ix) + lookahead)
        )
    }

    /// Pre-order traversal from `start`, pruned below `max_depth`.
    pub fn depth_first(
        &self,
        start: NodeIndex,
        include_self: bool,
        max_depth: Option<usize>,
    ) -> DepthFirst<'_> {
        let max_depth = max_depth.unwrap_or(usize::MAX);
        let start_depth = self.depth(start);
        let mut stack = Vec::new();
        if include_self {
            if start_depth <= max_depth {
                stack.push((start, start_depth));
            }
        } else if start_depth < max_depth {
            for child in self.nodes[start.0].children.iter().rev() {
                stack.push((*child, start_depth + 1));
            }
        }
        DepthFirst {
            tree: self,
            stack,
            max_depth,
        }
    }

    /// Level-order traversal from `start`, pruned below `max_depth`.
    pub fn breadth_first(
        &self,
        start: NodeIndex,
        include_self: bool,
        max_depth: Option<usize>,
    ) -> BreadthFirst<'_> {
        let max_depth = max_depth.unwrap_or(usize::MAX);
        let start_depth = self.depth(start);
        let mut queue = VecDeque::new();
        if include_self {
            if start_depth <= max_depth {
                queue.push_back((start, start_depth));
            }
        } else if start_depth < max_depth {
            for child in &self.nodes[start.0].children {
                queue.push_back((*child, start_depth + 1));
            }
        }
        BreadthFirst {
            tree: self,
            queue,
            max_depth,
        }
    }

    /// Every node of the tree in document order, root first.
    pub fn all_nodes(&self) -> Vec<NodeIndex> {
        self.depth_first(self.root, true, None).collect()
    }

    /// Ancestor chain, root first.
    pub fn ancestors(&self, ix: NodeIndex, include_self: bool) -> Vec<NodeIndex> {
        let mut chain = Vec::new();
        if include_self {
            chain.push(ix);
        }
        let mut current = self.nodes[ix.0].parent;
        while let Some(parent) = current {
            chain.push(parent);
            current = self.nodes[parent.0].parent;
        }
        chain.reverse();
        chain
    }

    /// Siblings in narrative order. The root has none.
    pub fn siblings(&self, ix: NodeIndex, include_self: bool) -> Vec<NodeIndex> {
        match self.nodes[ix.0].parent {
            None => Vec::new(),
            Some(parent) => self.nodes[parent.0]
                .children
                .iter()
                .copied()
                .filter(|c| include_self || *c != ix)
                .collect(),
        }
    }

    /// Leaves of the subtree rooted at `ix`, in narrative order.
    pub fn leaves(&self, ix: NodeIndex) -> Vec<NodeIndex> {
        self.depth_first(ix, true, None)
            .filter(|n| self.nodes[n.0].is_leaf())
            .collect()
    }

    /// Previous node in the whole tree's depth-first order.
    pub fn predecessor(&self, ix: NodeIndex) -> Option<NodeIndex> {
        let order = self.all_nodes();
        let position = order.iter().position(|n| *n == ix)?;
        position.checked_sub(1).map(|p| order[p])
    }

    /// Next node in the whole tree's depth-first order.
    pub fn successor(&self, ix: NodeIndex) -> Option<NodeIndex> {
        let order = self.all_nodes();
        let position = order.iter().position(|n| *n == ix)?;
        order.get(position + 1).copied()
    }

    /// `(prefix, suffix)` context blocks around `ix` for the given selection policy.
    pub fn context(&self, ix: NodeIndex, policy: ContextPolicy) -> (String, String) {
        let selected: HashSet<NodeIndex> = match policy {
            ContextPolicy::Full => self.depth_first(self.root, false, None).collect(),
            ContextPolicy::Ancestors => self.ancestors(ix, false).into_iter().collect(),
            ContextPolicy::AncestorsWithSiblings => self.ancestor_siblings(ix).into_iter().collect(),
            ContextPolicy::AncestorsWithSiblingsChildren => {
                let with_siblings = self.ancestor_siblings(ix);
                let mut selected: HashSet<NodeIndex> = with_siblings.iter().copied().collect();
                for node in &with_siblings {
                    selected.extend(self.nodes[node.0].children.iter().copied());
                }
                selected
            }
        };

        let mut prefix = Vec::new();
        let mut suffix = Vec::new();
        let mut in_prefix = true;
        for node in self.depth_first(self.root, false, None) {
            if node == ix {
                in_prefix = false;
            } else if selected.contains(&node) {
                let formatted = self.format_node(node);
                if in_prefix {
                    prefix.push(formatted);
                } else {
                    suffix.push(formatted);
                }
            }
        }
        (prefix.join("\n\n"), suffix.join("\n\n"))
    }

    fn ancestor_siblings(&self, ix: NodeIndex) -> Vec<NodeIndex> {
        self.ancestors(ix, true)
            .into_iter()
            .flat_map(|ancestor| self.siblings(ancestor, true))
            .collect()
    }

    /// One node as an outline line: number, beat, then scene and characters if known.
    pub fn format_node(&self, ix: NodeIndex) -> String {
        let node = &self.nodes[ix.0];
        let mut formatted = self.number(ix, 0, 0) + &node.text;
        if !node.scene.is_empty() {
            formatted.push_str(" Scene: ");
            formatted.push_str(&node.scene);
        }
        if !node.entities.is_empty() {
            formatted.push_str(" Characters: ");
            formatted.push_str(&node.entities.join(", "));
        }
        formatted
    }

    pub fn to_document(&self) -> OutlineDocument {
        self.document_for(self.root)
    }

    fn document_for(&self, ix: NodeIndex) -> OutlineDocument {
        let node = &self.nodes[ix.0];
        OutlineDocument {
            text: node.text.clone(),
            scene: node.scene.clone(),
            entities: node.entities.clone(),
            id: node.id.clone(),
            children: node
                .children
                .iter()
                .map(|child| self.document_for(*child))
                .collect(),
        }
    }

    pub fn from_document(document: &OutlineDocument) -> Self {
        let mut root = OutlineNode::new(document.id.clone(), &document.text, None);
        root.scene = document.scene.clone();
        root.set_entities(document.entities.iter().cloned());
        let mut tree = Self {
            nodes: vec![root],
            root: NodeIndex(0),
        };
        let mut pending: VecDeque<(NodeIndex, &OutlineDocument)> = document
            .children
            .iter()
            .map(|child| (tree.root, child))
            .collect();
        while let Some((parent, child_doc)) = pending.pop_front() {
            let ix = tree.add_child_with_id(parent, child_doc.id.clone(), &child_doc.text);
            let node = tree.node_mut(ix);
            node.scene = child_doc.scene.clone();
            node.set_entities(child_doc.entities.iter().cloned());
            pending.extend(child_doc.children.iter().map(|grandchild| (ix, grandchild)));
        }
        tree
    }
}

impl From<OutlineDocument> for OutlineTree {
    fn from(document: OutlineDocument) -> Self {
        OutlineTree::from_document(&document)
    }
}

impl From<OutlineTree> for OutlineDocument {
    fn from(tree: OutlineTree) -> Self {
        tree.to_document()
    }
}

impl fmt::Display for OutlineTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lines: Vec<String> = self
            .depth_first(self.root, false, None)
            .map(|ix| self.format_node(ix))
            .collect();
        f.write_str(lines.join("\n\n").trim())
    }
}

/// Lazy pre-order iterator; see [`OutlineTree::depth_first`].
pub struct DepthFirst<'a> {
    tree: &'a OutlineTree,
    stack: Vec<(NodeIndex, usize)>,
    max_depth: usize,
}

impl Iterator for DepthFirst<'_> {
    type Item = NodeIndex;

    fn next(&mut self) -> Option<Self::Item> {
        let (ix, depth) = self.stack.pop()?;
        if depth < self.max_depth {
            for child in self.tree.nodes[ix.0].children.iter().rev() {
                self.stack.push((*child, depth + 1));
            }
        }
        Some(ix)
    }
}

/// Lazy level-order iterator; see [`OutlineTree::breadth_first`].
pub struct BreadthFirst<'a> {
    tree: &'a OutlineTree,
    queue: VecDeque<(NodeIndex, usize)>,
    max_depth: usize,
}

impl Iterator for BreadthFirst<'_> {
    type Item = NodeIndex;

    fn next(&mut self) -> Option<Self::Item> {
        let (ix, depth) = self.queue.pop_front()?;
        if depth < self.max_depth {
            for child in &self.tree.nodes[ix.0].children {
                self.queue.push_back((*child, depth + 1));
            }
        }
        Some(ix)
    }
}

/// Label for the `num`-th sibling at `depth`: decimal, letters, then roman numerals.
pub fn label_for(depth: usize, num: usize) -> String {
    match depth {
        0 => String::new(),
        d if d % 3 == 1 => num.to_string(),
        d if d % 3 == 2 => to_letters(num),
        _ => to_roman(num),
    }
}

/// Bijective base-26: 1 -> a, 26 -> z, 27 -> aa.
fn to_letters(mut num: usize) -> String {
    let mut letters = Vec::new();
    while num > 0 {
        let rem = (num - 1) % 26;
        letters.push((b'a' + rem as u8) as char);
        num = (num - 1) / 26;
    }
    letters.iter().rev().collect()
}

fn to_roman(mut num: usize) -> String {
    const TABLE: [(usize, &str); 13] = [
        (1000, "m"),
        (900, "cm"),
        (500, "d"),
        (400, "cd"),
        (100, "c"),
        (90, "xc"),
        (50, "l"),
        (40, "xl"),
        (10, "x"),
        (9, "ix"),
        (5, "v"),
        (4, "iv"),
        (1, "i"),
    ];
    let mut out = String::new();
    for (value, numeral) in TABLE {
        while num >= value {
            out.push_str(numeral);
            num -= value;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    /// root -> [a -> [a1, a2], b -> [b1]]
    fn sample_tree() -> (OutlineTree, Vec<NodeIndex>) {
        let mut tree = OutlineTree::new();
        let root = tree.root();
        let a = tree.add_child(root, "A happens.");
        let a1 = tree.add_child(a, "A1 happens.");
        let a2 = tree.add_child(a, "A2 happens.");
        let b = tree.add_child(root, "B happens.");
        let b1 = tree.add_child(b, "B1 happens.");
        (tree, vec![a, a1, a2, b, b1])
    }

    #[test]
    fn numbering_cycles_through_alphabets() {
        assert_eq!(label_for(0, 4), "");
        assert_eq!(label_for(1, 4), "4");
        assert_eq!(label_for(2, 4), "d");
        assert_eq!(label_for(3, 4), "iv");
        assert_eq!(label_for(4, 12), "12");
        assert_eq!(label_for(2, 27), "aa");
        assert_eq!(label_for(2, 52), "az");
        assert_eq!(label_for(6, 1994), "mcmxciv");
    }

    #[test]
    fn number_indents_by_depth_and_supports_lookahead() {
        let (tree, ix) = sample_tree();
        assert_eq!(tree.number(tree.root(), 0, 0), "");
        assert_eq!(tree.number(ix[0], 0, 0), "1. ");
        assert_eq!(tree.number(ix[2], 0, 0), "\tb. ");
        assert_eq!(tree.number(ix[2], 0, 1), "\tc. ");
        assert_eq!(tree.label(ix[3], 0, 1), "3");
        assert_eq!(tree.number(ix[4], 1, 0), "\t\ti. ");
    }

    #[test]
    fn text_is_trimmed_on_creation() {
        let mut tree = OutlineTree::new();
        let root = tree.root();
        let child = tree.add_child(root, "  padded beat.\n");
        assert_eq!(tree.node(child).text, "padded beat.");
    }

    #[test]
    fn depth_first_is_preorder_and_respects_max_depth() {
        let (tree, ix) = sample_tree();
        let order: Vec<_> = tree.depth_first(tree.root(), false, None).collect();
        assert_eq!(order, ix);

        let shallow: Vec<_> = tree.depth_first(tree.root(), true, Some(1)).collect();
        assert_eq!(shallow, vec![tree.root(), ix[0], ix[3]]);
    }

    #[test]
    fn breadth_first_is_level_order() {
        let (tree, ix) = sample_tree();
        let order: Vec<_> = tree.breadth_first(tree.root(), true, None).collect();
        assert_eq!(order, vec![tree.root(), ix[0], ix[3], ix[1], ix[2], ix[4]]);

        let bounded: Vec<_> = tree.breadth_first(tree.root(), false, Some(1)).collect();
        assert_eq!(bounded, vec![ix[0], ix[3]]);
    }

    #[test]
    fn predecessor_and_successor_cross_subtrees() {
        let (tree, ix) = sample_tree();
        assert_eq!(tree.predecessor(tree.root()), None);
        assert_eq!(tree.predecessor(ix[3]), Some(ix[2]));
        assert_eq!(tree.successor(ix[2]), Some(ix[3]));
        assert_eq!(tree.successor(ix[4]), None);
    }

    #[test]
    fn leaves_in_narrative_order() {
        let (tree, ix) = sample_tree();
        assert_eq!(tree.leaves(tree.root()), vec![ix[1], ix[2], ix[4]]);
        assert_eq!(tree.leaves(ix[4]), vec![ix[4]]);
    }

    #[test]
    fn ancestors_context_only_shows_chain() {
        let (tree, ix) = sample_tree();
        let (prefix, suffix) = tree.context(ix[2], ContextPolicy::Ancestors);
        assert_eq!(prefix, "1. A happens.");
        assert_eq!(suffix, "");
    }

    #[test]
    fn sibling_context_splits_around_current_node() {
        let (tree, ix) = sample_tree();
        let (prefix, suffix) = tree.context(ix[1], ContextPolicy::AncestorsWithSiblings);
        assert_eq!(prefix, "1. A happens.");
        assert_eq!(suffix, "\tb. A2 happens.\n\n2. B happens.");
    }

    #[test]
    fn sibling_children_context_includes_cousins() {
        let (tree, ix) = sample_tree();
        let (_, suffix) = tree.context(ix[0], ContextPolicy::AncestorsWithSiblingsChildren);
        assert!(suffix.contains("B1 happens."));
        let (_, suffix) = tree.context(ix[0], ContextPolicy::AncestorsWithSiblings);
        assert!(!suffix.contains("B1 happens."));
    }

    #[test]
    fn full_context_excludes_only_self() {
        let (tree, ix) = sample_tree();
        let (prefix, suffix) = tree.context(ix[3], ContextPolicy::Full);
        assert_eq!(prefix.split("\n\n").count(), 3);
        assert_eq!(suffix, "\ta. B1 happens.");
    }

    #[test]
    fn unknown_context_policy_is_config_error() {
        let err = "siblings-only".parse::<ContextPolicy>().unwrap_err();
        assert!(matches!(err, ApiError::ConfigError(_)));
    }

    #[test]
    fn format_node_appends_scene_and_characters() {
        let (mut tree, ix) = sample_tree();
        tree.node_mut(ix[0]).scene = "A tavern.".to_string();
        tree.node_mut(ix[0]).set_entities(["Ada", "Bram", "Ada"]);
        assert_eq!(
            tree.format_node(ix[0]),
            "1. A happens. Scene: A tavern. Characters: Ada, Bram"
        );
    }

    #[test]
    fn document_round_trip_preserves_identity() {
        let (mut tree, ix) = sample_tree();
        tree.node_mut(ix[4]).scene = "Docks.".to_string();
        let encoded = serde_json::to_string(&tree).unwrap();
        let decoded: OutlineTree = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.to_document(), tree.to_document());
        let b1 = decoded.find(tree.node(ix[4]).id()).unwrap();
        assert_eq!(decoded.node(b1).scene, "Docks.");
        assert_eq!(decoded.node(b1), tree.node(ix[4]));
    }
}
