//! Execution-side runtime types.
//!
//! The [`ExecutionContext`] is supplied fresh by the caller on each run of a
//! compiled delegate. It carries the parameter store, ambient context values
//! read by parameter extractors, and the ambient tracking session. It is not
//! thread-safe and must not be shared across concurrent invocations; the
//! compiled delegate itself is stateless and safe to share.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use navq_ir::Value;

use crate::error::Error;
use crate::model::NavigationDef;

/// A hashable entity key value.
///
/// Wraps [`Value`] with bit-pattern semantics for floats so keys can be used
/// in hash maps.
#[derive(Debug, Clone)]
pub struct KeyValue(pub Value);

impl PartialEq for KeyValue {
    fn eq(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            (Value::Float32(a), Value::Float32(b)) => a.to_bits() == b.to_bits(),
            (Value::Float64(a), Value::Float64(b)) => a.to_bits() == b.to_bits(),
            (a, b) => a == b,
        }
    }
}

impl Eq for KeyValue {}

impl Hash for KeyValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(&self.0).hash(state);
        match &self.0 {
            Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::Int32(i) => i.hash(state),
            Value::Int64(i) => i.hash(state),
            Value::Float32(f) => f.to_bits().hash(state),
            Value::Float64(f) => f.to_bits().hash(state),
            Value::String(s) => s.hash(state),
            Value::Bytes(b) => b.hash(state),
            Value::Timestamp(t) => t.hash(state),
            Value::Uuid(u) => u.hash(state),
        }
    }
}

/// Identity of an entity occurrence: type plus key value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityKey {
    /// Entity type name.
    pub entity_type: String,
    /// Identity-field value.
    pub key: KeyValue,
}

impl EntityKey {
    /// Create an entity key.
    pub fn new(entity_type: impl Into<String>, key: Value) -> Self {
        Self {
            entity_type: entity_type.into(),
            key: KeyValue(key),
        }
    }
}

/// Per-execution parameter values keyed by name.
///
/// `add` fails on a duplicate name; `replace` and `remove` fail on an absent
/// name.
#[derive(Debug, Clone, Default)]
pub struct ParameterStore {
    values: HashMap<String, Value>,
}

impl ParameterStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter. Fails if the name is already present.
    pub fn add(&mut self, name: impl Into<String>, value: Value) -> Result<(), Error> {
        let name = name.into();
        if self.values.contains_key(&name) {
            return Err(Error::Parameter(format!(
                "parameter '{name}' is already present"
            )));
        }
        self.values.insert(name, value);
        Ok(())
    }

    /// Replace a parameter. Fails if the name is absent.
    pub fn replace(&mut self, name: &str, value: Value) -> Result<(), Error> {
        match self.values.get_mut(name) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(Error::Parameter(format!("parameter '{name}' is absent"))),
        }
    }

    /// Remove a parameter. Fails if the name is absent.
    pub fn remove(&mut self, name: &str) -> Result<Value, Error> {
        self.values
            .remove(name)
            .ok_or_else(|| Error::Parameter(format!("parameter '{name}' is absent")))
    }

    /// Add or overwrite a parameter.
    pub fn upsert(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    /// Look up a parameter value.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Whether a name is present.
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Iterate over name/value pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Lazy-load-state companion for an entity instance.
///
/// Present only when the model configures it for the entity type. Records
/// which navigations have been loaded so later accesses do not re-trigger
/// fetching.
#[derive(Debug, Clone, Default)]
pub struct LazyLoadState {
    loaded: HashSet<String>,
}

impl LazyLoadState {
    fn mark_loaded(&mut self, navigation: &str) {
        self.loaded.insert(navigation.to_string());
    }

    fn is_loaded(&self, navigation: &str) -> bool {
        self.loaded.contains(navigation)
    }
}

struct EntityData {
    entity_type: String,
    key: Value,
    fields: BTreeMap<String, Value>,
    references: HashMap<String, Option<EntityHandle>>,
    collections: HashMap<String, Vec<EntityHandle>>,
    lazy_state: Option<LazyLoadState>,
}

/// A shared, interior-mutable entity instance produced by materialization.
///
/// Handles are cheap to clone; clones alias the same instance. Instances are
/// scoped to a single invocation and are not thread-safe.
#[derive(Clone)]
pub struct EntityHandle(Rc<RefCell<EntityData>>);

impl fmt::Debug for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.0.borrow();
        f.debug_struct("EntityHandle")
            .field("entity_type", &data.entity_type)
            .field("key", &data.key)
            .finish_non_exhaustive()
    }
}

impl EntityHandle {
    /// Create an entity instance.
    pub fn new(
        entity_type: impl Into<String>,
        key: Value,
        fields: BTreeMap<String, Value>,
        lazy_load_state: bool,
    ) -> Self {
        EntityHandle(Rc::new(RefCell::new(EntityData {
            entity_type: entity_type.into(),
            key,
            fields,
            references: HashMap::new(),
            collections: HashMap::new(),
            lazy_state: lazy_load_state.then(LazyLoadState::default),
        })))
    }

    /// The entity type name.
    pub fn entity_type(&self) -> String {
        self.0.borrow().entity_type.clone()
    }

    /// The identity-field value.
    pub fn key(&self) -> Value {
        self.0.borrow().key.clone()
    }

    /// The (type, key) identity of this instance.
    pub fn entity_key(&self) -> EntityKey {
        let data = self.0.borrow();
        EntityKey::new(data.entity_type.clone(), data.key.clone())
    }

    /// Read a field value.
    pub fn field(&self, name: &str) -> Option<Value> {
        self.0.borrow().fields.get(name).cloned()
    }

    /// Read a reference navigation slot.
    pub fn reference(&self, navigation: &str) -> Option<EntityHandle> {
        self.0
            .borrow()
            .references
            .get(navigation)
            .and_then(Clone::clone)
    }

    /// Assign a reference navigation slot.
    pub fn set_reference(&self, navigation: &str, related: Option<EntityHandle>) {
        self.0
            .borrow_mut()
            .references
            .insert(navigation.to_string(), related);
    }

    /// Snapshot a collection navigation.
    pub fn collection(&self, navigation: &str) -> Vec<EntityHandle> {
        self.0
            .borrow()
            .collections
            .get(navigation)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of entities in a collection navigation.
    pub fn collection_len(&self, navigation: &str) -> usize {
        self.0
            .borrow()
            .collections
            .get(navigation)
            .map(Vec::len)
            .unwrap_or(0)
    }

    fn contains_in_collection(&self, navigation: &str, related: &EntityHandle) -> bool {
        let related_key = related.entity_key();
        self.0
            .borrow()
            .collections
            .get(navigation)
            .is_some_and(|items| items.iter().any(|e| e.entity_key() == related_key))
    }

    fn push_collection(&self, navigation: &str, related: EntityHandle) {
        self.0
            .borrow_mut()
            .collections
            .entry(navigation.to_string())
            .or_default()
            .push(related);
    }

    /// Whether this instance carries a lazy-load companion.
    pub fn has_lazy_state(&self) -> bool {
        self.0.borrow().lazy_state.is_some()
    }

    /// Mark a navigation loaded on the lazy-load companion. Returns false
    /// when no companion is configured.
    pub fn mark_lazy_loaded(&self, navigation: &str) -> bool {
        match self.0.borrow_mut().lazy_state.as_mut() {
            Some(state) => {
                state.mark_loaded(navigation);
                true
            }
            None => false,
        }
    }

    /// Whether the lazy-load companion marks a navigation loaded.
    pub fn is_lazy_loaded(&self, navigation: &str) -> bool {
        self.0
            .borrow()
            .lazy_state
            .as_ref()
            .is_some_and(|state| state.is_loaded(navigation))
    }

    /// Whether two handles alias the same instance.
    pub fn same_instance(&self, other: &EntityHandle) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// The model's collection-accessor abstraction for one collection navigation.
///
/// `add` inserts a related entity exactly once per (parent, related-identity)
/// pair; repeated row shapes of the same join never produce duplicates.
#[derive(Debug, Clone)]
pub struct CollectionAccessor {
    navigation: NavigationDef,
}

impl CollectionAccessor {
    pub(crate) fn new(navigation: NavigationDef) -> Self {
        Self { navigation }
    }

    /// The navigation this accessor serves.
    pub fn navigation(&self) -> &NavigationDef {
        &self.navigation
    }

    /// Add a related entity to the parent's collection. Returns false when
    /// an entity with the same identity is already present.
    pub fn add(&self, parent: &EntityHandle, related: EntityHandle) -> bool {
        if parent.contains_in_collection(&self.navigation.name, &related) {
            return false;
        }
        parent.push_collection(&self.navigation.name, related);
        true
    }
}

#[derive(Debug, Default)]
struct TrackedState {
    loaded: HashSet<String>,
}

/// The ambient tracking session.
///
/// In tracking mode all fixup goes through tracked entries; the tracker owns
/// loaded-state and navigation writes for tracked instances.
#[derive(Debug, Default)]
pub struct ChangeTracker {
    entries: RefCell<HashMap<EntityKey, TrackedState>>,
}

impl ChangeTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin tracking an instance.
    pub fn track(&self, handle: &EntityHandle) {
        self.entries
            .borrow_mut()
            .entry(handle.entity_key())
            .or_default();
    }

    /// The tracked entry for an instance, attaching it if needed.
    pub fn entry(&self, handle: &EntityHandle) -> TrackedEntry<'_> {
        self.track(handle);
        TrackedEntry {
            tracker: self,
            handle: handle.clone(),
        }
    }

    /// Whether an instance is tracked.
    pub fn is_tracked(&self, key: &EntityKey) -> bool {
        self.entries.borrow().contains_key(key)
    }

    /// Whether a tracked instance has a navigation marked loaded.
    pub fn is_navigation_loaded(&self, key: &EntityKey, navigation: &str) -> bool {
        self.entries
            .borrow()
            .get(key)
            .is_some_and(|state| state.loaded.contains(navigation))
    }

    /// Number of tracked instances.
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Whether the tracker is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

/// Tracked-entry API over one instance.
pub struct TrackedEntry<'a> {
    tracker: &'a ChangeTracker,
    handle: EntityHandle,
}

impl TrackedEntry<'_> {
    /// Mark a navigation loaded.
    pub fn mark_loaded(&self, navigation: &str) {
        self.tracker
            .entries
            .borrow_mut()
            .entry(self.handle.entity_key())
            .or_default()
            .loaded
            .insert(navigation.to_string());
    }

    /// Whether a navigation is marked loaded.
    pub fn is_loaded(&self, navigation: &str) -> bool {
        self.tracker
            .is_navigation_loaded(&self.handle.entity_key(), navigation)
    }

    /// Assign a reference navigation through the tracker and mark it loaded.
    pub fn set_reference(&self, navigation: &str, related: Option<EntityHandle>) {
        self.handle.set_reference(navigation, related);
        self.mark_loaded(navigation);
    }

    /// Add to a collection navigation through the tracker and mark it
    /// loaded. Returns false on a duplicate identity.
    pub fn add_to_collection(&self, accessor: &CollectionAccessor, related: EntityHandle) -> bool {
        let added = accessor.add(&self.handle, related);
        self.mark_loaded(&accessor.navigation().name);
        added
    }
}

/// Per-invocation execution context.
#[derive(Debug, Default)]
pub struct ExecutionContext {
    parameters: ParameterStore,
    context_values: HashMap<String, Value>,
    tracker: ChangeTracker,
}

impl ExecutionContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an ambient context value.
    pub fn with_context_value(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context_values.insert(name.into(), value.into());
        self
    }

    /// Set an ambient context value.
    pub fn set_context_value(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.context_values.insert(name.into(), value.into());
    }

    /// Read an ambient context value.
    pub fn context_value(&self, name: &str) -> Option<&Value> {
        self.context_values.get(name)
    }

    /// The caller-supplied parameter store.
    pub fn parameters(&self) -> &ParameterStore {
        &self.parameters
    }

    /// Mutable access to the parameter store.
    pub fn parameters_mut(&mut self) -> &mut ParameterStore {
        &mut self.parameters
    }

    /// The ambient tracking session.
    pub fn tracker(&self) -> &ChangeTracker {
        &self.tracker
    }
}

/// Result of invoking a compiled delegate.
#[derive(Debug)]
pub enum QueryResult {
    /// Materialized entity instances.
    Entities(Vec<EntityHandle>),
    /// A cardinality-reduced entity result.
    Entity(Option<EntityHandle>),
    /// Projected rows.
    Rows(Vec<BTreeMap<String, Value>>),
    /// A cardinality-reduced projected row.
    Row(Option<BTreeMap<String, Value>>),
}

impl QueryResult {
    /// The entity list, if this is a list-shaped entity result.
    pub fn as_entities(&self) -> Option<&[EntityHandle]> {
        match self {
            QueryResult::Entities(items) => Some(items),
            _ => None,
        }
    }

    /// The reduced entity, if this is a reduced entity result.
    pub fn as_entity(&self) -> Option<Option<&EntityHandle>> {
        match self {
            QueryResult::Entity(item) => Some(item.as_ref()),
            _ => None,
        }
    }

    /// The projected rows, if this is a list-shaped projection result.
    pub fn as_rows(&self) -> Option<&[BTreeMap<String, Value>]> {
        match self {
            QueryResult::Rows(rows) => Some(rows),
            _ => None,
        }
    }

    /// The reduced row, if this is a reduced projection result.
    pub fn as_row(&self) -> Option<Option<&BTreeMap<String, Value>>> {
        match self {
            QueryResult::Row(row) => Some(row.as_ref()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(key: i32) -> EntityHandle {
        EntityHandle::new(
            "User",
            Value::Int32(key),
            BTreeMap::from([("id".to_string(), Value::Int32(key))]),
            true,
        )
    }

    #[test]
    fn test_parameter_store_contract() {
        let mut store = ParameterStore::new();

        store.add("p", Value::Int32(1)).unwrap();
        assert!(store.add("p", Value::Int32(2)).is_err());

        store.replace("p", Value::Int32(3)).unwrap();
        assert_eq!(store.get("p"), Some(&Value::Int32(3)));
        assert!(store.replace("q", Value::Int32(1)).is_err());

        assert!(store.remove("q").is_err());
        assert_eq!(store.remove("p").unwrap(), Value::Int32(3));
        assert!(store.is_empty());
    }

    #[test]
    fn test_collection_accessor_adds_exactly_once() {
        let nav = NavigationDef::collection("posts", "User", "id", "Post", "author_id");
        let accessor = CollectionAccessor::new(nav);
        let parent = user(1);
        let child = EntityHandle::new("Post", Value::Int32(10), BTreeMap::new(), false);

        assert!(accessor.add(&parent, child.clone()));
        assert!(!accessor.add(&parent, child));
        assert_eq!(parent.collection_len("posts"), 1);
    }

    #[test]
    fn test_tracked_entry_marks_loaded_without_touching_lazy_state() {
        let tracker = ChangeTracker::new();
        let parent = user(1);

        tracker.entry(&parent).mark_loaded("posts");

        assert!(tracker.is_navigation_loaded(&parent.entity_key(), "posts"));
        assert!(!parent.is_lazy_loaded("posts"));
    }

    #[test]
    fn test_lazy_load_state_configured_per_instance() {
        let with_state = user(1);
        let without_state = EntityHandle::new("Post", Value::Int32(2), BTreeMap::new(), false);

        assert!(with_state.mark_lazy_loaded("posts"));
        assert!(with_state.is_lazy_loaded("posts"));

        assert!(!without_state.mark_lazy_loaded("author"));
        assert!(!without_state.is_lazy_loaded("author"));
    }

    #[test]
    fn test_entity_handle_aliasing() {
        let a = user(1);
        let b = a.clone();
        let c = user(1);

        assert!(a.same_instance(&b));
        assert!(!a.same_instance(&c));
        assert_eq!(a.entity_key(), c.entity_key());
    }

    #[test]
    fn test_key_value_hashes_floats_by_bits() {
        use std::collections::HashSet;

        let mut set = HashSet::new();
        set.insert(KeyValue(Value::Float64(1.5)));
        assert!(set.contains(&KeyValue(Value::Float64(1.5))));
        assert!(!set.contains(&KeyValue(Value::Float64(2.5))));
    }
}
