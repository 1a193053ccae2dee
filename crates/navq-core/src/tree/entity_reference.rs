//! Per-occurrence entity references.

use std::collections::HashMap;

use super::include_tree::IncludeTreeNode;

/// Metadata for one distinct entity occurrence reached during expansion.
///
/// The navigation map memoizes which navigations have already been expanded
/// into joins; it only ever grows, and re-expanding a navigation returns the
/// recorded target alias instead of creating a second join. Cloning produces
/// a deep, independent copy (owned map plus cloned include tree) for reuse
/// without aliasing mutation.
#[derive(Debug, Clone)]
pub struct EntityReference {
    /// Owning entity type.
    pub entity_type: String,
    /// Eager-load requests rooted at this occurrence.
    pub include_tree: IncludeTreeNode,
    /// Set when this occurrence is reached through a nullable / left-joined
    /// path.
    pub is_optional: bool,
    navigation_map: HashMap<String, String>,
}

impl EntityReference {
    /// Create a reference for an entity type.
    pub fn new(entity_type: impl Into<String>) -> Self {
        let entity_type = entity_type.into();
        Self {
            include_tree: IncludeTreeNode::new(entity_type.clone()),
            entity_type,
            is_optional: false,
            navigation_map: HashMap::new(),
        }
    }

    /// The recorded expansion target for a navigation, if any.
    pub fn expanded(&self, navigation: &str) -> Option<&str> {
        self.navigation_map.get(navigation).map(String::as_str)
    }

    /// Record a navigation expansion. Append-only: an existing entry wins
    /// and its alias is returned.
    pub fn record_expansion(&mut self, navigation: impl Into<String>, alias: impl Into<String>) -> String {
        let navigation = navigation.into();
        match self.navigation_map.get(&navigation) {
            Some(existing) => existing.clone(),
            None => {
                let alias = alias.into();
                self.navigation_map.insert(navigation, alias.clone());
                alias
            }
        }
    }

    /// Mark this occurrence as reached through an optional path.
    pub fn mark_optional(&mut self) {
        self.is_optional = true;
    }

    /// Number of expanded navigations.
    pub fn expansion_count(&self) -> usize {
        self.navigation_map.len()
    }
}
