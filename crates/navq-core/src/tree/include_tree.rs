//! Include trees: which navigation paths must be eagerly materialized.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A node in the include tree.
///
/// Maps navigation names to child nodes, one entry per distinct navigation
/// requested for eager load, rooted at an entity type. Attaching is
/// idempotent: requesting `A.B` after `A` exists attaches under the existing
/// `A` node. Structural equality (derived) compares key sets and children
/// recursively, which is what plan-shape comparison needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncludeTreeNode {
    entity_type: String,
    children: BTreeMap<String, IncludeTreeNode>,
}

impl IncludeTreeNode {
    /// Create an empty include tree rooted at an entity type.
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            children: BTreeMap::new(),
        }
    }

    /// The entity type this node roots.
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Attach a navigation, returning the child node.
    ///
    /// Idempotent for an existing key; a conflicting target entity type for
    /// the same key is an internal-consistency fault.
    pub fn attach(
        &mut self,
        navigation: &str,
        target_type: &str,
    ) -> Result<&mut IncludeTreeNode, Error> {
        if let Some(existing) = self.children.get(navigation) {
            if existing.entity_type != target_type {
                return Err(Error::AmbiguousIncludeMerge {
                    navigation: navigation.to_string(),
                    existing: existing.entity_type.clone(),
                    incoming: target_type.to_string(),
                });
            }
        }
        Ok(self
            .children
            .entry(navigation.to_string())
            .or_insert_with(|| IncludeTreeNode::new(target_type)))
    }

    /// Merge another include tree into this one.
    pub fn merge(&mut self, other: &IncludeTreeNode) -> Result<(), Error> {
        for (navigation, child) in &other.children {
            self.attach(navigation, &child.entity_type)?.merge(child)?;
        }
        Ok(())
    }

    /// Look up a child node.
    pub fn child(&self, navigation: &str) -> Option<&IncludeTreeNode> {
        self.children.get(navigation)
    }

    /// Look up a child node, mutably.
    pub fn child_mut(&mut self, navigation: &str) -> Option<&mut IncludeTreeNode> {
        self.children.get_mut(navigation)
    }

    /// Iterate over (navigation, child) entries.
    pub fn children(&self) -> impl Iterator<Item = (&str, &IncludeTreeNode)> {
        self.children.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of direct children.
    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// Whether this node has no children.
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attach_path(root: &mut IncludeTreeNode, path: &[(&str, &str)]) {
        let mut node = root;
        for (nav, target) in path {
            node = node.attach(nav, target).unwrap();
        }
    }

    #[test]
    fn test_attach_is_idempotent() {
        let mut tree = IncludeTreeNode::new("User");
        tree.attach("posts", "Post").unwrap();
        tree.attach("posts", "Post").unwrap();

        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_nested_attach_reuses_existing_node() {
        let mut a = IncludeTreeNode::new("User");
        attach_path(&mut a, &[("posts", "Post")]);
        attach_path(&mut a, &[("posts", "Post"), ("comments", "Comment")]);
        attach_path(&mut a, &[("posts", "Post")]);

        let mut b = IncludeTreeNode::new("User");
        attach_path(&mut b, &[("posts", "Post"), ("comments", "Comment")]);

        // A.B, then A.B.C, then A.B again is structurally A.B.C once.
        assert_eq!(a, b);
    }

    #[test]
    fn test_merge_combines_trees() {
        let mut a = IncludeTreeNode::new("User");
        attach_path(&mut a, &[("posts", "Post")]);

        let mut b = IncludeTreeNode::new("User");
        attach_path(&mut b, &[("posts", "Post"), ("comments", "Comment")]);
        attach_path(&mut b, &[("profile", "Profile")]);

        a.merge(&b).unwrap();

        assert_eq!(a.len(), 2);
        assert!(a.child("posts").unwrap().child("comments").is_some());
    }

    #[test]
    fn test_conflicting_target_type_is_ambiguous() {
        let mut tree = IncludeTreeNode::new("User");
        tree.attach("posts", "Post").unwrap();

        let result = tree.attach("posts", "Comment");
        assert!(matches!(result, Err(Error::AmbiguousIncludeMerge { .. })));
    }

    #[test]
    fn test_serialization_roundtrip() {
        let mut tree = IncludeTreeNode::new("User");
        attach_path(&mut tree, &[("posts", "Post"), ("comments", "Comment")]);

        let json = serde_json::to_string(&tree).unwrap();
        let decoded: IncludeTreeNode = serde_json::from_str(&json).unwrap();
        assert_eq!(tree, decoded);
    }

    #[test]
    fn test_structural_inequality() {
        let mut a = IncludeTreeNode::new("User");
        attach_path(&mut a, &[("posts", "Post")]);

        let mut b = IncludeTreeNode::new("User");
        attach_path(&mut b, &[("posts", "Post"), ("comments", "Comment")]);

        assert_ne!(a, b);
    }
}
