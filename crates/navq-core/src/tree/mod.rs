//! Tree structures built during navigation expansion.

mod entity_reference;
mod include_tree;
mod navigation_tree;

pub use entity_reference::EntityReference;
pub use include_tree::IncludeTreeNode;
pub use navigation_tree::{
    JoinKey, JoinKind, NavigationTree, NavigationTreeJoin, NavigationTreeLeaf, NavigationTreeNode,
    TreePath, TreeSide,
};
