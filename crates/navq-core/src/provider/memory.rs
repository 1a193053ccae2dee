//! In-memory reference provider.
//!
//! Executes shaped plans against an in-memory table store: hash joins for
//! the navigation tree (build the inner side once, probe per outer row),
//! predicate evaluation, ordering, pagination, and keyed child fetches for
//! include shapes. Used by the integration tests and as the reference for
//! provider authors.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use navq_ir::Value;
use parking_lot::RwLock;
use tracing::trace;

use super::{
    AliasedRow, ExecutableShape, FieldValues, IncludeRow, RowEnv, ShapeTranslator,
    ShapedResultSet,
};
use crate::error::Error;
use crate::eval::{self, EvalEnv};
use crate::execution::{KeyValue, ParameterStore};
use crate::shaped::{IncludeShape, ShapedQueryPlan};
use crate::tree::JoinKind;

/// A thread-safe in-memory table store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, Vec<FieldValues>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert one row into an entity table.
    pub fn insert<I, K>(&self, entity: &str, fields: I)
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let values: FieldValues = fields
            .into_iter()
            .map(|(name, value)| (name.into(), value))
            .collect();
        self.tables
            .write()
            .entry(entity.to_string())
            .or_default()
            .push(values);
    }

    /// Snapshot all rows of an entity table.
    pub fn rows(&self, entity: &str) -> Vec<FieldValues> {
        self.tables.read().get(entity).cloned().unwrap_or_default()
    }

    /// Number of rows in an entity table.
    pub fn len(&self, entity: &str) -> usize {
        self.tables.read().get(entity).map(Vec::len).unwrap_or(0)
    }

    /// Whether an entity table is empty.
    pub fn is_empty(&self, entity: &str) -> bool {
        self.len(entity) == 0
    }
}

/// Shape translator executing plans against a [`MemoryStore`].
#[derive(Debug, Clone)]
pub struct MemoryProvider {
    store: Arc<MemoryStore>,
}

impl MemoryProvider {
    /// Create a provider over a store.
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

impl ShapeTranslator for MemoryProvider {
    fn translate(&self, plan: &ShapedQueryPlan) -> Result<ExecutableShape, Error> {
        let plan = plan.clone();
        let store = Arc::clone(&self.store);
        Ok(ExecutableShape::new(move |_ctx, params| {
            run_plan(&store, &plan, params)
        }))
    }
}

fn run_plan(
    store: &MemoryStore,
    plan: &ShapedQueryPlan,
    params: &ParameterStore,
) -> Result<ShapedResultSet, Error> {
    let mut rows: Vec<AliasedRow> = store
        .rows(&plan.root_entity)
        .into_iter()
        .map(|values| AliasedRow::single(&plan.root_source, values))
        .collect();

    for join in plan.tree.joins() {
        rows = execute_join(store, plan, join, rows, params)?;
    }

    if let Some(predicate) = &plan.predicate {
        let mut filtered = Vec::with_capacity(rows.len());
        for row in rows {
            if eval::evaluate_predicate(predicate, &RowEnv { row: &row, params })? {
                filtered.push(row);
            }
        }
        rows = filtered;
    }

    if !plan.orderings.is_empty() {
        rows = order_rows(rows, plan, params)?;
    }

    if let Some(skip) = &plan.skip {
        let count = eval_count(skip, params)?;
        if count >= rows.len() {
            rows.clear();
        } else if count > 0 {
            rows.drain(0..count);
        }
    }
    if let Some(take) = &plan.take {
        let count = eval_count(take, params)?;
        if count < rows.len() {
            rows.truncate(count);
        }
    }

    trace!(
        root = %plan.root_entity,
        rows = rows.len(),
        includes = plan.includes.len(),
        "executed shaped plan"
    );

    let mut include_rows = HashMap::new();
    for include in &plan.includes {
        fetch_include(
            store,
            include,
            ParentData::Tree(&rows, &include.parent_source),
            params,
            &rows,
            &mut include_rows,
        )?;
    }

    Ok(ShapedResultSet {
        root_rows: rows,
        include_rows,
    })
}

fn execute_join(
    store: &MemoryStore,
    plan: &ShapedQueryPlan,
    join: &crate::tree::NavigationTreeJoin,
    rows: Vec<AliasedRow>,
    params: &ParameterStore,
) -> Result<Vec<AliasedRow>, Error> {
    let inner_source = &join.key.inner_source;
    let inner_entity = plan
        .tree
        .leaf(inner_source)
        .map(|leaf| leaf.reference.entity_type.clone())
        .ok_or_else(|| Error::InvalidData(format!("unknown source alias '{inner_source}'")))?;

    // Build phase: scan the inner side once, keyed by the join field.
    let mut table: HashMap<KeyValue, Vec<FieldValues>> = HashMap::new();
    for values in store.rows(&inner_entity) {
        let Some(key) = values.get(&join.key.inner_field) else {
            continue;
        };
        if key.is_null() {
            continue;
        }
        if let Some(filter) = &join.filter {
            let probe = AliasedRow::single(inner_source, values.clone());
            if !eval::evaluate_predicate(filter, &RowEnv { row: &probe, params })? {
                continue;
            }
        }
        table
            .entry(KeyValue(key.clone()))
            .or_default()
            .push(values);
    }

    // Probe phase: match each outer row.
    let mut joined = Vec::with_capacity(rows.len());
    for row in rows {
        let key = row
            .column(&join.key.outer_source, &join.key.outer_field)
            .cloned();
        let matches = key
            .filter(|k| !k.is_null())
            .and_then(|k| table.get(&KeyValue(k)));

        match matches {
            Some(inner_rows) if !inner_rows.is_empty() => {
                for values in inner_rows {
                    let mut extended = row.clone();
                    extended.insert_source(inner_source, values.clone());
                    joined.push(extended);
                }
            }
            _ => {
                if join.kind == JoinKind::Left {
                    joined.push(row);
                }
            }
        }
    }
    Ok(joined)
}

fn order_rows(
    rows: Vec<AliasedRow>,
    plan: &ShapedQueryPlan,
    params: &ParameterStore,
) -> Result<Vec<AliasedRow>, Error> {
    let mut keyed = Vec::with_capacity(rows.len());
    for row in rows {
        let mut keys = Vec::with_capacity(plan.orderings.len());
        for term in &plan.orderings {
            keys.push(eval::evaluate(&term.key, &RowEnv { row: &row, params })?);
        }
        keyed.push((keys, row));
    }

    keyed.sort_by(|(a, _), (b, _)| {
        for (index, term) in plan.orderings.iter().enumerate() {
            let mut ordering = eval::compare_values(&a[index], &b[index]);
            if term.direction == navq_ir::OrderDirection::Desc {
                ordering = ordering.reverse();
            }
            if ordering != std::cmp::Ordering::Equal {
                return ordering;
            }
        }
        std::cmp::Ordering::Equal
    });

    Ok(keyed.into_iter().map(|(_, row)| row).collect())
}

fn eval_count(expr: &navq_ir::ScalarExpr, params: &ParameterStore) -> Result<usize, Error> {
    let env = CountEnv { params };
    let value = eval::evaluate(expr, &env)?;
    let count = value
        .as_i64()
        .ok_or_else(|| Error::InvalidData(format!("row count is not an integer: {value:?}")))?;
    Ok(count.max(0) as usize)
}

struct CountEnv<'a> {
    params: &'a ParameterStore,
}

impl EvalEnv for CountEnv<'_> {
    fn column(&self, source: &str, field: &str) -> Result<Value, Error> {
        Err(Error::InvalidData(format!(
            "column '{source}.{field}' is not in scope for a row count"
        )))
    }

    fn parameter(&self, name: &str) -> Result<Value, Error> {
        self.params
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Parameter(format!("parameter '{name}' is absent")))
    }

    fn context_value(&self, name: &str) -> Result<Value, Error> {
        Err(Error::InvalidData(format!(
            "unresolved context value '{name}' in executable shape"
        )))
    }
}

/// Parent row source of one include level.
enum ParentData<'a> {
    /// Parents ride on the main join tree under the given alias.
    Tree(&'a [AliasedRow], &'a str),
    /// Parents were fetched as a keyed include level.
    Fetched(&'a [IncludeRow]),
}

impl ParentData<'_> {
    fn field_values(&self, field: &str) -> HashSet<KeyValue> {
        match self {
            ParentData::Tree(rows, alias) => rows
                .iter()
                .filter_map(|row| row.column(alias, field))
                .filter(|value| !value.is_null())
                .map(|value| KeyValue(value.clone()))
                .collect(),
            ParentData::Fetched(rows) => rows
                .iter()
                .filter_map(|row| row.values.get(field))
                .filter(|value| !value.is_null())
                .map(|value| KeyValue(value.clone()))
                .collect(),
        }
    }
}

fn fetch_include(
    store: &MemoryStore,
    include: &IncludeShape,
    parents: ParentData<'_>,
    params: &ParameterStore,
    root_rows: &[AliasedRow],
    out: &mut HashMap<String, Vec<IncludeRow>>,
) -> Result<(), Error> {
    if include.from_tree {
        // Related data rides on the main tree rows; only descend.
        for child in &include.children {
            fetch_include(
                store,
                child,
                ParentData::Tree(root_rows, &include.target_source),
                params,
                root_rows,
                out,
            )?;
        }
        return Ok(());
    }

    let nav = &include.navigation;
    let parent_keys = parents.field_values(&nav.from_field);

    let mut fetched = Vec::new();
    for values in store.rows(&nav.to_entity) {
        let Some(link) = values.get(&nav.to_field) else {
            continue;
        };
        if link.is_null() || !parent_keys.contains(&KeyValue(link.clone())) {
            continue;
        }
        if let Some(filter) = &include.filter {
            let probe = AliasedRow::single(&include.target_source, values.clone());
            if !eval::evaluate_predicate(filter, &RowEnv { row: &probe, params })? {
                continue;
            }
        }
        fetched.push(IncludeRow {
            parent_key: link.clone(),
            entity_type: nav.to_entity.clone(),
            values,
        });
    }

    for child in &include.children {
        fetch_include(
            store,
            child,
            ParentData::Fetched(&fetched),
            params,
            root_rows,
            out,
        )?;
    }

    out.insert(include.target_source.clone(), fetched);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_insert_and_snapshot() {
        let store = MemoryStore::new();
        store.insert("User", [("id", Value::Int32(1)), ("name", Value::from("Alice"))]);
        store.insert("User", [("id", Value::Int32(2)), ("name", Value::from("Bob"))]);

        assert_eq!(store.len("User"), 2);
        assert!(store.is_empty("Post"));

        let rows = store.rows("User");
        assert_eq!(rows[0].get("name"), Some(&Value::String("Alice".into())));
    }
}
