//! Shaped-query compilation: materialization, tracking, and include fixup.
//!
//! Wraps the provider's executable shape with the stage that constructs (or
//! locates, via a per-invocation identity map) entity instances and performs
//! fixup: assigning related objects into each other's navigation slots and
//! marking navigations loaded. Tracking mode goes through the tracked-entry
//! API only; non-tracking mode flags the lazy-load companion, assigns
//! through a fixup delegate, and fixes up non-collection inverses.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use navq_ir::{CardinalityOp, ProjectedField};

use crate::compile::QueryBody;
use crate::error::Error;
use crate::eval;
use crate::execution::{
    CollectionAccessor, EntityHandle, EntityKey, ExecutionContext, KeyValue, ParameterStore,
    QueryResult,
};
use crate::model::{Model, NavigationDef};
use crate::provider::{
    AliasedRow, ExecutableShape, FieldValues, IncludeRow, RowEnv, ShapedResultSet,
};
use crate::shaped::{IncludeShape, PendingSelector, ShapedQueryPlan};

/// One generated fixup delegate: the compiled member-assignment (reference)
/// or collection-accessor insertion for one navigation, plus its resolved
/// inverse.
struct FixupDelegate {
    navigation: NavigationDef,
    accessor: Option<CollectionAccessor>,
    inverse: Option<NavigationDef>,
}

impl FixupDelegate {
    /// Assign a related instance directly (non-tracking path).
    fn assign(&self, parent: &EntityHandle, related: EntityHandle) {
        match &self.accessor {
            Some(accessor) => {
                accessor.add(parent, related);
            }
            None => parent.set_reference(&self.navigation.name, Some(related)),
        }
    }
}

/// Fixup delegates, generated once per (entity type, related type,
/// navigation) triple and reused across all rows of a query.
struct FixupDelegates {
    map: HashMap<(String, String, String), Arc<FixupDelegate>>,
}

impl FixupDelegates {
    fn build(model: &Model, plan: &ShapedQueryPlan) -> Result<Self, Error> {
        let mut map = HashMap::new();
        let mut error = None;
        plan.walk_includes(|include| {
            if error.is_some() {
                return;
            }
            let nav = &include.navigation;
            let key = (
                nav.from_entity.clone(),
                nav.to_entity.clone(),
                nav.name.clone(),
            );
            if map.contains_key(&key) {
                return;
            }
            let accessor = nav
                .is_collection()
                .then(|| model.collection_accessor(nav));
            let inverse = match model.inverse_of(nav) {
                Some(inverse) => Some(inverse.clone()),
                None if nav.inverse.is_some() => {
                    error = Some(Error::UnknownNavigation {
                        entity: nav.to_entity.clone(),
                        navigation: nav.inverse.clone().unwrap_or_default(),
                    });
                    None
                }
                None => None,
            };
            map.insert(
                key,
                Arc::new(FixupDelegate {
                    navigation: nav.clone(),
                    accessor,
                    inverse,
                }),
            );
        });
        match error {
            Some(error) => Err(error),
            None => Ok(Self { map }),
        }
    }

    fn get(&self, nav: &NavigationDef) -> Result<&Arc<FixupDelegate>, Error> {
        self.map
            .get(&(
                nav.from_entity.clone(),
                nav.to_entity.clone(),
                nav.name.clone(),
            ))
            .ok_or_else(|| Error::InvalidData(format!("missing fixup delegate for '{}'", nav.name)))
    }
}

/// Per-invocation materializer with an identity map: one instance per
/// (type, key) per execution, so join-based access and eager loading observe
/// the same related instance.
struct Materializer<'a> {
    model: &'a Model,
    tracking: bool,
    ctx: &'a ExecutionContext,
    identity: HashMap<EntityKey, EntityHandle>,
}

impl<'a> Materializer<'a> {
    fn new(model: &'a Model, tracking: bool, ctx: &'a ExecutionContext) -> Self {
        Self {
            model,
            tracking,
            ctx,
            identity: HashMap::new(),
        }
    }

    fn materialize(
        &mut self,
        entity_type: &str,
        values: &FieldValues,
    ) -> Result<EntityHandle, Error> {
        let entity = self.model.entity(entity_type)?;
        let key = values.get(&entity.identity_field).cloned().ok_or_else(|| {
            Error::InvalidData(format!(
                "row for '{entity_type}' is missing identity field '{}'",
                entity.identity_field
            ))
        })?;

        let entity_key = EntityKey::new(entity_type, key.clone());
        if let Some(existing) = self.identity.get(&entity_key) {
            return Ok(existing.clone());
        }

        let handle = self
            .model
            .new_entity_handle(entity_type, key, values.clone());
        if self.tracking {
            self.ctx.tracker().track(&handle);
        }
        self.identity.insert(entity_key, handle.clone());
        Ok(handle)
    }
}

/// Parent rows of one include level.
enum ParentRows<'a> {
    /// Parents ride on the main tree rows under an alias.
    Tree(&'a [AliasedRow], &'a str),
    /// Parents were fetched as a keyed include level.
    Fetched(&'a [IncludeRow]),
}

/// Compile the materialization template plus include directives into the
/// delegate body.
pub fn compile_shaped_query(
    model: Arc<Model>,
    plan: &ShapedQueryPlan,
    shape: ExecutableShape,
) -> Result<QueryBody, Error> {
    let plan = Arc::new(plan.clone());
    let fixups = Arc::new(FixupDelegates::build(&model, &plan)?);

    Ok(Arc::new(move |ctx: &ExecutionContext, params: &ParameterStore| {
        let result_set = shape.fetch(ctx, params)?;

        match &plan.selector {
            PendingSelector::Fields(fields) => {
                project_rows(fields, &result_set, params, plan.cardinality)
            }
            PendingSelector::EntityShape { source } => {
                let mut materializer = Materializer::new(&model, plan.tracking, ctx);

                let mut entities = Vec::new();
                let mut seen = HashSet::new();
                for row in &result_set.root_rows {
                    let Some(values) = row.source(source) else {
                        continue;
                    };
                    let handle = materializer.materialize(&plan.root_entity, values)?;
                    if seen.insert(handle.entity_key()) {
                        entities.push(handle);
                    }
                }

                for include in &plan.includes {
                    apply_include(
                        include,
                        ParentRows::Tree(&result_set.root_rows, &include.parent_source),
                        &result_set,
                        &mut materializer,
                        &fixups,
                        plan.tracking,
                        ctx,
                    )?;
                }

                reduce_entities(entities, plan.cardinality)
            }
        }
    }))
}

fn apply_include(
    include: &IncludeShape,
    parents: ParentRows<'_>,
    result_set: &ShapedResultSet,
    materializer: &mut Materializer<'_>,
    fixups: &FixupDelegates,
    tracking: bool,
    ctx: &ExecutionContext,
) -> Result<(), Error> {
    let nav = &include.navigation;
    let delegate = Arc::clone(fixups.get(nav)?);

    if include.from_tree {
        let ParentRows::Tree(rows, parent_alias) = parents else {
            return Err(Error::InvalidData(
                "tree-backed include below a fetched include".to_string(),
            ));
        };
        for row in rows {
            let Some(parent_values) = row.source(parent_alias) else {
                continue;
            };
            let parent = materializer.materialize(&nav.from_entity, parent_values)?;
            let children: Vec<(&str, &FieldValues)> = row
                .source(&include.target_source)
                .map(|values| vec![(nav.to_entity.as_str(), values)])
                .unwrap_or_default();
            fix_children(&delegate, &parent, &children, materializer, tracking, ctx)?;
        }
    } else {
        let fetched = result_set
            .include_rows
            .get(&include.target_source)
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        let mut groups: HashMap<KeyValue, Vec<&IncludeRow>> = HashMap::new();
        for row in fetched {
            groups
                .entry(KeyValue(row.parent_key.clone()))
                .or_default()
                .push(row);
        }

        let mut process_parent =
            |parent_values: &FieldValues| -> Result<(), Error> {
                let parent = materializer.materialize(&nav.from_entity, parent_values)?;
                let children: Vec<(&str, &FieldValues)> = parent_values
                    .get(&nav.from_field)
                    .filter(|key| !key.is_null())
                    .and_then(|key| groups.get(&KeyValue(key.clone())))
                    .map(|rows| {
                        rows.iter()
                            .map(|row| (row.entity_type.as_str(), &row.values))
                            .collect()
                    })
                    .unwrap_or_default();
                fix_children(&delegate, &parent, &children, materializer, tracking, ctx)
            };

        match &parents {
            ParentRows::Tree(rows, alias) => {
                for row in *rows {
                    if let Some(values) = row.source(alias) {
                        process_parent(values)?;
                    }
                }
            }
            ParentRows::Fetched(rows) => {
                for row in *rows {
                    process_parent(&row.values)?;
                }
            }
        }
    }

    for child in &include.children {
        let parents = if include.from_tree {
            ParentRows::Tree(&result_set.root_rows, &include.target_source)
        } else {
            ParentRows::Fetched(
                result_set
                    .include_rows
                    .get(&include.target_source)
                    .map(Vec::as_slice)
                    .unwrap_or(&[]),
            )
        };
        apply_include(child, parents, result_set, materializer, fixups, tracking, ctx)?;
    }

    Ok(())
}

fn fix_children(
    delegate: &FixupDelegate,
    parent: &EntityHandle,
    children: &[(&str, &FieldValues)],
    materializer: &mut Materializer<'_>,
    tracking: bool,
    ctx: &ExecutionContext,
) -> Result<(), Error> {
    let nav = &delegate.navigation;

    if tracking {
        // The change-tracking layer owns loaded state and navigation writes;
        // the lazy-load companion is never touched on this path.
        let entry = ctx.tracker().entry(parent);
        if children.is_empty() {
            entry.mark_loaded(&nav.name);
            return Ok(());
        }
        for &(entity_type, values) in children {
            check_relation_type(nav, entity_type)?;
            let related = materializer.materialize(&nav.to_entity, values)?;
            match &delegate.accessor {
                Some(accessor) => {
                    entry.add_to_collection(accessor, related);
                }
                None => entry.set_reference(&nav.name, Some(related)),
            }
        }
        return Ok(());
    }

    parent.mark_lazy_loaded(&nav.name);
    for &(entity_type, values) in children {
        check_relation_type(nav, entity_type)?;
        let related = materializer.materialize(&nav.to_entity, values)?;
        delegate.assign(parent, related.clone());

        if let Some(inverse) = &delegate.inverse {
            if !inverse.is_collection() {
                related.set_reference(&inverse.name, Some(parent.clone()));
                related.mark_lazy_loaded(&inverse.name);
            }
        }
    }
    Ok(())
}

fn check_relation_type(nav: &NavigationDef, entity_type: &str) -> Result<(), Error> {
    if entity_type != nav.to_entity {
        return Err(Error::MaterializationTypeMismatch {
            navigation: nav.name.clone(),
            expected: nav.to_entity.clone(),
            actual: entity_type.to_string(),
        });
    }
    Ok(())
}

fn project_rows(
    fields: &[ProjectedField],
    result_set: &ShapedResultSet,
    params: &ParameterStore,
    cardinality: Option<CardinalityOp>,
) -> Result<QueryResult, Error> {
    let mut rows = Vec::with_capacity(result_set.root_rows.len());
    for row in &result_set.root_rows {
        let env = RowEnv { row, params };
        let mut projected = std::collections::BTreeMap::new();
        for field in fields {
            projected.insert(field.name.clone(), eval::evaluate(&field.expr, &env)?);
        }
        rows.push(projected);
    }

    match cardinality {
        None => Ok(QueryResult::Rows(rows)),
        Some(op) => {
            let reduced = reduce(rows, op)?;
            Ok(QueryResult::Row(reduced))
        }
    }
}

fn reduce_entities(
    entities: Vec<EntityHandle>,
    cardinality: Option<CardinalityOp>,
) -> Result<QueryResult, Error> {
    match cardinality {
        None => Ok(QueryResult::Entities(entities)),
        Some(op) => {
            let reduced = reduce(entities, op)?;
            Ok(QueryResult::Entity(reduced))
        }
    }
}

fn reduce<T>(mut items: Vec<T>, op: CardinalityOp) -> Result<Option<T>, Error> {
    match op {
        CardinalityOp::First => {
            if items.is_empty() {
                return Err(Error::NotFound);
            }
            Ok(Some(items.remove(0)))
        }
        CardinalityOp::FirstOrDefault => {
            Ok(if items.is_empty() { None } else { Some(items.remove(0)) })
        }
        CardinalityOp::Single => match items.len() {
            0 => Err(Error::NotFound),
            1 => Ok(Some(items.remove(0))),
            n => Err(Error::InvalidData(format!(
                "sequence contains {n} results where exactly one was expected"
            ))),
        },
        CardinalityOp::SingleOrDefault => match items.len() {
            0 => Ok(None),
            1 => Ok(Some(items.remove(0))),
            n => Err(Error::InvalidData(format!(
                "sequence contains {n} results where at most one was expected"
            ))),
        },
    }
}
