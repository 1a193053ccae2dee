//! The navigation-expansion visitor.
//!
//! Walks the query-composition tree, expands navigation accesses into
//! explicit joins against the target set using the navigation's declared
//! join key, and emits the provider-neutral [`ShapedQueryPlan`]: the join
//! tree, the rewritten predicate and ordering chain, the pending selector,
//! and the include shapes.
//!
//! Expansion is memoizing: re-expanding a navigation on the same entity
//! occurrence returns the recorded join target instead of creating a second
//! join. Include requests resolve against the same memo map, so eager-load
//! and join-based access observe one unified related-entity occurrence.

use std::sync::Arc;

use navq_ir::{ProjectedField, QueryExpr, ScalarExpr};
use tracing::trace;

use crate::compile::{ParameterExtractor, QueryCompilationContext};
use crate::error::Error;
use crate::model::{Model, NavigationDef};
use crate::shaped::{IncludeShape, OrderingTerm, PendingSelector, ShapedQueryPlan};
use crate::tree::{
    EntityReference, IncludeTreeNode, JoinKey, JoinKind, NavigationTree, NavigationTreeLeaf,
};

struct ExpanderState {
    root_entity: String,
    root_source: String,
    tree: NavigationTree,
    predicate: Option<ScalarExpr>,
    orderings: Vec<OrderingTerm>,
    pinned_selector: Option<Vec<ProjectedField>>,
    last_include_path: Option<Vec<String>>,
    skip: Option<ScalarExpr>,
    take: Option<ScalarExpr>,
    cardinality: Option<navq_ir::CardinalityOp>,
    alias_counter: u32,
}

/// The tree-rewriting pass over a query expression.
pub struct NavigationExpander<'a> {
    model: Arc<Model>,
    ctx: &'a mut QueryCompilationContext,
    state: Option<ExpanderState>,
}

impl<'a> NavigationExpander<'a> {
    /// Create an expander bound to a compilation context.
    pub fn new(ctx: &'a mut QueryCompilationContext) -> Self {
        Self {
            model: ctx.model(),
            ctx,
            state: None,
        }
    }

    /// Expand a query expression into a shaped plan.
    pub fn expand(mut self, expr: QueryExpr) -> Result<ShapedQueryPlan, Error> {
        self.visit(expr)?;
        self.finalize()
    }

    fn visit(&mut self, expr: QueryExpr) -> Result<(), Error> {
        match expr {
            QueryExpr::Source { entity } => self.init_source(entity),
            QueryExpr::Filter { source, predicate } => {
                self.visit(*source)?;
                self.apply_filter(predicate)
            }
            QueryExpr::Select { source, projection } => {
                self.visit(*source)?;
                self.apply_select(projection)
            }
            QueryExpr::OrderBy {
                source,
                key,
                direction,
                append,
            } => {
                self.visit(*source)?;
                self.apply_order_by(key, direction, append)
            }
            QueryExpr::Include {
                source,
                path,
                extend_previous,
            } => {
                self.visit(*source)?;
                self.apply_include(path, extend_previous)
            }
            QueryExpr::Take { source, count } => {
                self.visit(*source)?;
                self.guard_composable("take")?;
                let count = self.bind_scalar(count)?;
                self.state_mut()?.take = Some(count);
                Ok(())
            }
            QueryExpr::Skip { source, count } => {
                self.visit(*source)?;
                self.guard_composable("skip")?;
                let count = self.bind_scalar(count)?;
                self.state_mut()?.skip = Some(count);
                Ok(())
            }
            QueryExpr::Reduce { source, op } => {
                self.visit(*source)?;
                self.guard_composable("cardinality reduction")?;
                self.state_mut()?.cardinality = Some(op);
                Ok(())
            }
            QueryExpr::Tag { source, tag } => {
                self.visit(*source)?;
                self.ctx.add_tag(tag);
                Ok(())
            }
            QueryExpr::AsNoTracking { source } => {
                self.visit(*source)?;
                self.ctx.set_tracking(false);
                Ok(())
            }
        }
    }

    fn init_source(&mut self, entity: String) -> Result<(), Error> {
        self.model.entity(&entity)?;

        let root_source = "e0".to_string();
        let reference = EntityReference::new(entity.clone());
        let tree = NavigationTree::new(NavigationTreeLeaf::new(root_source.clone(), reference));

        self.state = Some(ExpanderState {
            root_entity: entity.clone(),
            root_source: root_source.clone(),
            tree,
            predicate: None,
            orderings: Vec::new(),
            pinned_selector: None,
            last_include_path: None,
            skip: None,
            take: None,
            cardinality: None,
            alias_counter: 1,
        });

        // Declarative query filters of the root entity fold into the main
        // predicate; their context values become tier-2 parameters.
        if let Some(filter) = self.bound_query_filters_for(&entity, &root_source)? {
            self.and_into_predicate(filter)?;
        }
        Ok(())
    }

    fn apply_filter(&mut self, predicate: ScalarExpr) -> Result<(), Error> {
        self.guard_composable("filter")?;
        self.guard_not_paginated("filter")?;
        if self.state()?.pinned_selector.is_some() {
            return Err(Error::UnsupportedQueryShape(
                "filter after projection".to_string(),
            ));
        }
        let bound = self.bind_scalar(predicate)?;
        self.and_into_predicate(bound)
    }

    fn apply_select(&mut self, projection: navq_ir::Projection) -> Result<(), Error> {
        self.guard_composable("projection")?;
        if self.state()?.pinned_selector.is_some() {
            return Err(Error::UnsupportedQueryShape(
                "projection after projection".to_string(),
            ));
        }
        match projection {
            navq_ir::Projection::EntityShape => Ok(()),
            navq_ir::Projection::Fields(fields) => {
                let mut bound = Vec::with_capacity(fields.len());
                for field in fields {
                    bound.push(ProjectedField::new(field.name, self.bind_scalar(field.expr)?));
                }
                self.state_mut()?.pinned_selector = Some(bound);
                Ok(())
            }
        }
    }

    fn apply_order_by(
        &mut self,
        key: ScalarExpr,
        direction: navq_ir::OrderDirection,
        append: bool,
    ) -> Result<(), Error> {
        self.guard_composable("ordering")?;
        self.guard_not_paginated("ordering")?;
        if self.state()?.pinned_selector.is_some() {
            return Err(Error::UnsupportedQueryShape(
                "ordering after projection".to_string(),
            ));
        }
        let key = self.bind_scalar(key)?;
        let state = self.state_mut()?;
        if !append {
            // A fresh primary ordering discards the pending chain.
            state.orderings.clear();
        }
        state.orderings.push(OrderingTerm { key, direction });
        Ok(())
    }

    fn apply_include(&mut self, path: Vec<String>, extend_previous: bool) -> Result<(), Error> {
        self.guard_composable("include")?;
        if self.state()?.pinned_selector.is_some() {
            return Err(Error::UnsupportedQueryShape(
                "include after projection".to_string(),
            ));
        }

        let base = if extend_previous {
            match &self.state()?.last_include_path {
                Some(prior) => prior.clone(),
                None => {
                    return Err(Error::UnsupportedQueryShape(
                        "then-include without a preceding include".to_string(),
                    ))
                }
            }
        } else {
            Vec::new()
        };

        let full: Vec<String> = base.into_iter().chain(path).collect();
        let root_source = self.state()?.root_source.clone();
        self.attach_include(&root_source, &full)?;
        self.state_mut()?.last_include_path = Some(full);
        Ok(())
    }

    /// Record an include path. Segments backed by an existing join continue
    /// on that join target's include tree; the rest nests as placeholder
    /// nodes without forcing a join.
    fn attach_include(&mut self, host_alias: &str, path: &[String]) -> Result<(), Error> {
        if path.is_empty() {
            return Ok(());
        }
        let model = Arc::clone(&self.model);
        let segment = &path[0];

        let host_type = self
            .state()?
            .tree
            .leaf(host_alias)
            .map(|leaf| leaf.reference.entity_type.clone())
            .ok_or_else(|| Error::InvalidData(format!("unknown source alias '{host_alias}'")))?;
        let nav = model.navigation(&host_type, segment)?.clone();

        {
            let state = self.state_mut()?;
            let leaf = state.tree.leaf_mut(host_alias).ok_or_else(|| {
                Error::InvalidData(format!("unknown source alias '{host_alias}'"))
            })?;
            leaf.reference.include_tree.attach(segment, &nav.to_entity)?;
        }

        let expanded = self
            .state()?
            .tree
            .leaf(host_alias)
            .and_then(|leaf| leaf.reference.expanded(segment))
            .map(str::to_string);

        match expanded {
            Some(target_alias) => self.attach_include(&target_alias, &path[1..]),
            None => {
                // Resolve the remaining segment types up front, then nest.
                let mut navs = Vec::with_capacity(path.len() - 1);
                let mut current = nav.to_entity.clone();
                for segment in &path[1..] {
                    let nav = model.navigation(&current, segment)?.clone();
                    current = nav.to_entity.clone();
                    navs.push(nav);
                }

                let state = self.state_mut()?;
                let leaf = state.tree.leaf_mut(host_alias).ok_or_else(|| {
                    Error::InvalidData(format!("unknown source alias '{host_alias}'"))
                })?;
                let mut node = leaf
                    .reference
                    .include_tree
                    .child_mut(segment)
                    .ok_or_else(|| Error::InvalidData("missing include node".to_string()))?;
                for (segment, nav) in path[1..].iter().zip(navs) {
                    node = node.attach(segment, &nav.to_entity)?;
                }
                Ok(())
            }
        }
    }

    /// Rewrite a scalar expression: navigation paths become joins and bound
    /// columns, context values become runtime parameters.
    fn bind_scalar(&mut self, expr: ScalarExpr) -> Result<ScalarExpr, Error> {
        match expr {
            ScalarExpr::Column { path, field } => {
                let (source, entity) = self.resolve_column_path(&path)?;
                self.model.entity(&entity)?.get_field(&field).ok_or_else(|| {
                    Error::UnknownField {
                        entity: entity.clone(),
                        field: field.clone(),
                    }
                })?;
                Ok(ScalarExpr::BoundColumn { source, field })
            }
            ScalarExpr::ContextValue(name) => {
                // Hoist the sub-expression into a runtime parameter so it is
                // re-evaluated against each execution's context.
                let parameter = format!("@__ctx_{name}");
                self.ctx.register_runtime_parameter(
                    parameter,
                    ParameterExtractor::from_context_value(name),
                )
            }
            ScalarExpr::BoundColumn { source, field } => Err(Error::UnsupportedQueryShape(
                format!("precompiled column reference '{source}.{field}' in user query"),
            )),
            ScalarExpr::Unary { op, operand } => Ok(ScalarExpr::Unary {
                op,
                operand: Box::new(self.bind_scalar(*operand)?),
            }),
            ScalarExpr::Binary { op, left, right } => {
                let left = Box::new(self.bind_scalar(*left)?);
                let right = Box::new(self.bind_scalar(*right)?);
                Ok(ScalarExpr::Binary { op, left, right })
            }
            other @ (ScalarExpr::Literal(_) | ScalarExpr::Parameter(_)) => Ok(other),
        }
    }

    /// Resolve a navigation path to its expanded source alias, creating
    /// joins as needed.
    fn resolve_column_path(&mut self, path: &[String]) -> Result<(String, String), Error> {
        let model = Arc::clone(&self.model);
        let mut source = self.state()?.root_source.clone();
        let mut entity = self.state()?.root_entity.clone();

        for segment in path {
            let nav = model.navigation(&entity, segment)?.clone();
            if nav.is_collection() {
                return Err(Error::UnsupportedQueryShape(format!(
                    "collection navigation '{segment}' in scalar expression"
                )));
            }
            source = self.expand_navigation(&source, &nav)?;
            entity = nav.to_entity.clone();
        }
        Ok((source, entity))
    }

    /// Expand one navigation from one entity occurrence, memoized per the
    /// occurrence's navigation map.
    fn expand_navigation(
        &mut self,
        source_alias: &str,
        nav: &NavigationDef,
    ) -> Result<String, Error> {
        let (existing, parent_optional) = {
            let state = self.state()?;
            let leaf = state.tree.leaf(source_alias).ok_or_else(|| {
                Error::InvalidData(format!("unknown source alias '{source_alias}'"))
            })?;
            (
                leaf.reference.expanded(&nav.name).map(str::to_string),
                leaf.reference.is_optional,
            )
        };
        if let Some(alias) = existing {
            return Ok(alias);
        }

        let target_alias = self.next_alias()?;
        let mut reference = EntityReference::new(nav.to_entity.clone());
        let optional = nav.optional || parent_optional;
        if optional {
            reference.mark_optional();
        }

        let filter = self.bound_query_filters_for(&nav.to_entity, &target_alias)?;
        let key = JoinKey {
            outer_source: source_alias.to_string(),
            outer_field: nav.from_field.clone(),
            inner_source: target_alias.clone(),
            inner_field: nav.to_field.clone(),
        };
        let kind = if optional { JoinKind::Left } else { JoinKind::Inner };

        trace!(
            navigation = %nav.name,
            source = %source_alias,
            target = %target_alias,
            ?kind,
            "expanding navigation into join"
        );

        let state = self.state_mut()?;
        state.tree.push_join(
            NavigationTreeLeaf::new(target_alias.clone(), reference),
            kind,
            key,
            filter,
        );
        state
            .tree
            .leaf_mut(source_alias)
            .ok_or_else(|| Error::InvalidData(format!("unknown source alias '{source_alias}'")))?
            .reference
            .record_expansion(nav.name.clone(), target_alias.clone());

        Ok(target_alias)
    }

    /// Bind the declarative query filters of an entity type to a source
    /// alias, ANDing them together. Context values become tier-2 parameters.
    fn bound_query_filters_for(
        &mut self,
        entity: &str,
        source_alias: &str,
    ) -> Result<Option<ScalarExpr>, Error> {
        let filters = self.model.query_filters(entity).to_vec();
        let mut combined: Option<ScalarExpr> = None;
        for filter in filters {
            let bound = self.bind_query_filter(filter, entity, source_alias)?;
            combined = Some(match combined {
                Some(existing) => existing.and(bound),
                None => bound,
            });
        }
        Ok(combined)
    }

    fn bind_query_filter(
        &mut self,
        expr: ScalarExpr,
        entity: &str,
        source_alias: &str,
    ) -> Result<ScalarExpr, Error> {
        match expr {
            ScalarExpr::Column { path, field } => {
                if !path.is_empty() {
                    return Err(Error::UnsupportedQueryShape(format!(
                        "navigation path '{}' in a declarative query filter",
                        path.join(".")
                    )));
                }
                self.model.entity(entity)?.get_field(&field).ok_or_else(|| {
                    Error::UnknownField {
                        entity: entity.to_string(),
                        field: field.clone(),
                    }
                })?;
                Ok(ScalarExpr::BoundColumn {
                    source: source_alias.to_string(),
                    field,
                })
            }
            ScalarExpr::ContextValue(name) => {
                let parameter = format!("@__filter_{name}");
                self.ctx
                    .add_parameter_value(parameter, ParameterExtractor::from_context_value(name))
            }
            ScalarExpr::Unary { op, operand } => Ok(ScalarExpr::Unary {
                op,
                operand: Box::new(self.bind_query_filter(*operand, entity, source_alias)?),
            }),
            ScalarExpr::Binary { op, left, right } => {
                let left = Box::new(self.bind_query_filter(*left, entity, source_alias)?);
                let right = Box::new(self.bind_query_filter(*right, entity, source_alias)?);
                Ok(ScalarExpr::Binary { op, left, right })
            }
            other @ (ScalarExpr::Literal(_)
            | ScalarExpr::Parameter(_)
            | ScalarExpr::BoundColumn { .. }) => Ok(other),
        }
    }

    fn finalize(mut self) -> Result<ShapedQueryPlan, Error> {
        let root_source = self.state()?.root_source.clone();
        let includes = self.build_includes(&root_source)?;

        let state = self.state.take().ok_or_else(|| {
            Error::InvalidData("expansion finished without a source".to_string())
        })?;
        let selector = match state.pinned_selector {
            Some(fields) => PendingSelector::Fields(fields),
            None => PendingSelector::EntityShape {
                source: state.root_source.clone(),
            },
        };

        Ok(ShapedQueryPlan {
            root_entity: state.root_entity,
            root_source: state.root_source,
            tree: state.tree,
            predicate: state.predicate,
            orderings: state.orderings,
            selector,
            includes,
            skip: state.skip,
            take: state.take,
            cardinality: state.cardinality,
            tags: self.ctx.tags().clone(),
            tracking: self.ctx.is_tracking(),
        })
    }

    /// Turn recorded include trees into include shapes, attaching the fetch
    /// for navigations that never became joins now that the final shape is
    /// pinned.
    fn build_includes(&mut self, host_alias: &str) -> Result<Vec<IncludeShape>, Error> {
        let model = Arc::clone(&self.model);
        let host_ref = self
            .state()?
            .tree
            .leaf(host_alias)
            .map(|leaf| leaf.reference.clone())
            .ok_or_else(|| Error::InvalidData(format!("unknown source alias '{host_alias}'")))?;

        let mut shapes = Vec::new();
        for (nav_name, subtree) in host_ref.include_tree.children() {
            let nav = model.navigation(&host_ref.entity_type, nav_name)?.clone();
            match host_ref.expanded(nav_name) {
                Some(alias) => {
                    let target = alias.to_string();
                    let children = self.build_includes(&target)?;
                    shapes.push(IncludeShape {
                        navigation: nav,
                        parent_source: host_alias.to_string(),
                        target_source: target,
                        from_tree: true,
                        filter: None, // already applied on the tree join
                        children,
                    });
                }
                None => {
                    let target = self.next_alias()?;
                    let filter = self.bound_query_filters_for(&nav.to_entity, &target)?;
                    let children = self.build_nested_includes(&target, subtree)?;
                    shapes.push(IncludeShape {
                        navigation: nav,
                        parent_source: host_alias.to_string(),
                        target_source: target,
                        from_tree: false,
                        filter,
                        children,
                    });
                }
            }
        }
        Ok(shapes)
    }

    fn build_nested_includes(
        &mut self,
        host_source: &str,
        node: &IncludeTreeNode,
    ) -> Result<Vec<IncludeShape>, Error> {
        let model = Arc::clone(&self.model);
        let mut shapes = Vec::new();
        for (nav_name, subtree) in node.children() {
            let nav = model.navigation(node.entity_type(), nav_name)?.clone();
            let target = self.next_alias()?;
            let filter = self.bound_query_filters_for(&nav.to_entity, &target)?;
            let children = self.build_nested_includes(&target, subtree)?;
            shapes.push(IncludeShape {
                navigation: nav,
                parent_source: host_source.to_string(),
                target_source: target,
                from_tree: false,
                filter,
                children,
            });
        }
        Ok(shapes)
    }

    fn and_into_predicate(&mut self, bound: ScalarExpr) -> Result<(), Error> {
        let state = self.state_mut()?;
        state.predicate = Some(match state.predicate.take() {
            Some(existing) => existing.and(bound),
            None => bound,
        });
        Ok(())
    }

    fn guard_composable(&self, operator: &str) -> Result<(), Error> {
        if self.state()?.cardinality.is_some() {
            return Err(Error::UnsupportedQueryShape(format!(
                "{operator} after cardinality reduction"
            )));
        }
        Ok(())
    }

    fn guard_not_paginated(&self, operator: &str) -> Result<(), Error> {
        let state = self.state()?;
        if state.take.is_some() || state.skip.is_some() {
            return Err(Error::UnsupportedQueryShape(format!(
                "{operator} after pagination"
            )));
        }
        Ok(())
    }

    fn next_alias(&mut self) -> Result<String, Error> {
        let state = self.state_mut()?;
        let alias = format!("e{}", state.alias_counter);
        state.alias_counter += 1;
        Ok(alias)
    }

    fn state(&self) -> Result<&ExpanderState, Error> {
        self.state
            .as_ref()
            .ok_or_else(|| Error::InvalidData("operator applied before a source".to_string()))
    }

    fn state_mut(&mut self) -> Result<&mut ExpanderState, Error> {
        self.state
            .as_mut()
            .ok_or_else(|| Error::InvalidData("operator applied before a source".to_string()))
    }
}
