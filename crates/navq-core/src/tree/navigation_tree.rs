//! The navigation tree: progressive joins as a binary composition tree.
//!
//! Leaves wrap terminal entity sources; a join pairs two previously
//! independent subtrees into a transparent two-slot record addressed by
//! Outer/Inner. Nodes carry no parent back-pointers: a node's position (its
//! "current parameter") is the Outer/Inner step path from the root, computed
//! lazily and cached until the tree is re-rooted by the next join.

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use navq_ir::ScalarExpr;

use super::entity_reference::EntityReference;

/// One step of a tree position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeSide {
    /// The left slot of a join record.
    Outer,
    /// The right slot of a join record.
    Inner,
}

/// A node position: Outer/Inner steps from the root.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TreePath(Vec<TreeSide>);

impl TreePath {
    /// The step sequence.
    pub fn steps(&self) -> &[TreeSide] {
        &self.0
    }

    /// Depth below the root.
    pub fn depth(&self) -> usize {
        self.0.len()
    }

    fn child(&self, side: TreeSide) -> TreePath {
        let mut steps = self.0.clone();
        steps.push(side);
        TreePath(steps)
    }
}

impl fmt::Display for TreePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "root")?;
        for side in &self.0 {
            match side {
                TreeSide::Outer => write!(f, ".outer")?,
                TreeSide::Inner => write!(f, ".inner")?,
            }
        }
        Ok(())
    }
}

/// Join flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// Matching rows only.
    Inner,
    /// Keep unmatched outer rows.
    Left,
}

/// Equi-join key between two source aliases.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinKey {
    /// Alias of the outer-side source.
    pub outer_source: String,
    /// Join field on the outer side.
    pub outer_field: String,
    /// Alias of the inner-side source.
    pub inner_source: String,
    /// Join field on the inner side.
    pub inner_field: String,
}

/// A terminal source in the tree.
#[derive(Debug, Clone)]
pub struct NavigationTreeLeaf {
    /// Unique source alias, the leaf's materialized variable name.
    pub alias: String,
    /// The entity occurrence this leaf introduces.
    pub reference: EntityReference,
}

impl NavigationTreeLeaf {
    /// Create a leaf.
    pub fn new(alias: impl Into<String>, reference: EntityReference) -> Self {
        Self {
            alias: alias.into(),
            reference,
        }
    }
}

/// A join pairing two subtrees.
#[derive(Debug, Clone)]
pub struct NavigationTreeJoin {
    /// Inner or left join.
    pub kind: JoinKind,
    /// The equi-join key.
    pub key: JoinKey,
    /// Extra predicate applied to inner-side rows before matching
    /// (declarative query filters of the join target).
    pub filter: Option<ScalarExpr>,
    /// Left child.
    pub left: Box<NavigationTreeNode>,
    /// Right child.
    pub right: Box<NavigationTreeNode>,
}

/// A navigation tree node.
#[derive(Debug, Clone)]
pub enum NavigationTreeNode {
    /// A terminal source.
    Leaf(NavigationTreeLeaf),
    /// A join of two subtrees.
    Join(NavigationTreeJoin),
}

/// The navigation tree with its lazy position table.
#[derive(Debug, Clone)]
pub struct NavigationTree {
    root: NavigationTreeNode,
    positions: OnceLock<HashMap<String, TreePath>>,
}

impl NavigationTree {
    /// Create a tree from a single root leaf.
    pub fn new(root: NavigationTreeLeaf) -> Self {
        Self {
            root: NavigationTreeNode::Leaf(root),
            positions: OnceLock::new(),
        }
    }

    /// The root node.
    pub fn root(&self) -> &NavigationTreeNode {
        &self.root
    }

    /// Re-root the tree: the current tree becomes the outer side of a new
    /// join, the given leaf the inner side. Cached positions are detached.
    pub fn push_join(
        &mut self,
        leaf: NavigationTreeLeaf,
        kind: JoinKind,
        key: JoinKey,
        filter: Option<ScalarExpr>,
    ) {
        // Placeholder is swapped out on the next line.
        let placeholder =
            NavigationTreeNode::Leaf(NavigationTreeLeaf::new("", EntityReference::new("")));
        let left = std::mem::replace(&mut self.root, placeholder);
        self.root = NavigationTreeNode::Join(NavigationTreeJoin {
            kind,
            key,
            filter,
            left: Box::new(left),
            right: Box::new(NavigationTreeNode::Leaf(leaf)),
        });
        self.positions = OnceLock::new();
    }

    /// The position of a source alias, computed lazily and cached until the
    /// next re-rooting.
    pub fn position_of(&self, alias: &str) -> Option<&TreePath> {
        self.positions
            .get_or_init(|| {
                let mut table = HashMap::new();
                collect_positions(&self.root, TreePath::default(), &mut table);
                table
            })
            .get(alias)
    }

    /// Find a leaf by alias.
    pub fn leaf(&self, alias: &str) -> Option<&NavigationTreeLeaf> {
        find_leaf(&self.root, alias)
    }

    /// Find a leaf by alias, mutably. Structure is unchanged, so cached
    /// positions stay valid.
    pub fn leaf_mut(&mut self, alias: &str) -> Option<&mut NavigationTreeLeaf> {
        find_leaf_mut(&mut self.root, alias)
    }

    /// All joins in execution order (innermost first).
    pub fn joins(&self) -> Vec<&NavigationTreeJoin> {
        let mut joins = Vec::new();
        collect_joins(&self.root, &mut joins);
        joins
    }

    /// All leaf aliases.
    pub fn aliases(&self) -> Vec<&str> {
        let mut aliases = Vec::new();
        collect_aliases(&self.root, &mut aliases);
        aliases
    }

    /// Number of joins.
    pub fn join_count(&self) -> usize {
        self.joins().len()
    }
}

fn collect_positions(
    node: &NavigationTreeNode,
    path: TreePath,
    table: &mut HashMap<String, TreePath>,
) {
    match node {
        NavigationTreeNode::Leaf(leaf) => {
            table.insert(leaf.alias.clone(), path);
        }
        NavigationTreeNode::Join(join) => {
            collect_positions(&join.left, path.child(TreeSide::Outer), table);
            collect_positions(&join.right, path.child(TreeSide::Inner), table);
        }
    }
}

fn find_leaf<'a>(node: &'a NavigationTreeNode, alias: &str) -> Option<&'a NavigationTreeLeaf> {
    match node {
        NavigationTreeNode::Leaf(leaf) => (leaf.alias == alias).then_some(leaf),
        NavigationTreeNode::Join(join) => {
            find_leaf(&join.left, alias).or_else(|| find_leaf(&join.right, alias))
        }
    }
}

fn find_leaf_mut<'a>(
    node: &'a mut NavigationTreeNode,
    alias: &str,
) -> Option<&'a mut NavigationTreeLeaf> {
    match node {
        NavigationTreeNode::Leaf(leaf) => (leaf.alias == alias).then_some(leaf),
        NavigationTreeNode::Join(join) => find_leaf_mut(&mut join.left, alias)
            .or_else(|| find_leaf_mut(&mut join.right, alias)),
    }
}

fn collect_joins<'a>(node: &'a NavigationTreeNode, joins: &mut Vec<&'a NavigationTreeJoin>) {
    if let NavigationTreeNode::Join(join) = node {
        collect_joins(&join.left, joins);
        collect_joins(&join.right, joins);
        joins.push(join);
    }
}

fn collect_aliases<'a>(node: &'a NavigationTreeNode, aliases: &mut Vec<&'a str>) {
    match node {
        NavigationTreeNode::Leaf(leaf) => aliases.push(&leaf.alias),
        NavigationTreeNode::Join(join) => {
            collect_aliases(&join.left, aliases);
            collect_aliases(&join.right, aliases);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn join_key(outer: &str, inner: &str) -> JoinKey {
        JoinKey {
            outer_source: outer.to_string(),
            outer_field: "id".to_string(),
            inner_source: inner.to_string(),
            inner_field: "parent_id".to_string(),
        }
    }

    fn leaf(alias: &str, entity: &str) -> NavigationTreeLeaf {
        NavigationTreeLeaf::new(alias, EntityReference::new(entity))
    }

    #[test]
    fn test_single_leaf_position() {
        let tree = NavigationTree::new(leaf("e0", "User"));
        let path = tree.position_of("e0").unwrap();
        assert_eq!(path.depth(), 0);
        assert_eq!(path.to_string(), "root");
    }

    #[test]
    fn test_push_join_re_roots() {
        let mut tree = NavigationTree::new(leaf("e0", "User"));
        tree.push_join(leaf("e1", "Post"), JoinKind::Inner, join_key("e0", "e1"), None);
        tree.push_join(leaf("e2", "Comment"), JoinKind::Left, join_key("e1", "e2"), None);

        assert_eq!(tree.join_count(), 2);
        assert_eq!(tree.aliases(), vec!["e0", "e1", "e2"]);

        // Re-rooting shifts earlier leaves deeper on the outer side.
        assert_eq!(tree.position_of("e0").unwrap().to_string(), "root.outer.outer");
        assert_eq!(tree.position_of("e1").unwrap().to_string(), "root.outer.inner");
        assert_eq!(tree.position_of("e2").unwrap().to_string(), "root.inner");
    }

    #[test]
    fn test_positions_invalidated_on_mutation() {
        let mut tree = NavigationTree::new(leaf("e0", "User"));
        assert_eq!(tree.position_of("e0").unwrap().depth(), 0);

        tree.push_join(leaf("e1", "Post"), JoinKind::Inner, join_key("e0", "e1"), None);

        assert_eq!(tree.position_of("e0").unwrap().depth(), 1);
        assert_eq!(tree.position_of("e1").unwrap().steps(), &[TreeSide::Inner]);
    }

    #[test]
    fn test_joins_are_in_execution_order() {
        let mut tree = NavigationTree::new(leaf("e0", "User"));
        tree.push_join(leaf("e1", "Post"), JoinKind::Inner, join_key("e0", "e1"), None);
        tree.push_join(leaf("e2", "Comment"), JoinKind::Inner, join_key("e1", "e2"), None);

        let joins = tree.joins();
        assert_eq!(joins[0].key.inner_source, "e1");
        assert_eq!(joins[1].key.inner_source, "e2");
    }

    #[test]
    fn test_leaf_lookup_and_mutation() {
        let mut tree = NavigationTree::new(leaf("e0", "User"));
        tree.push_join(leaf("e1", "Post"), JoinKind::Inner, join_key("e0", "e1"), None);

        tree.leaf_mut("e0")
            .unwrap()
            .reference
            .record_expansion("posts", "e1");

        assert_eq!(tree.leaf("e0").unwrap().reference.expanded("posts"), Some("e1"));
        assert!(tree.leaf("missing").is_none());
    }
}
