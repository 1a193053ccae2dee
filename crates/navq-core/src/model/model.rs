//! The read-only model snapshot.
//!
//! A [`Model`] is built once, validated, and then only queried: entity and
//! navigation lookups, declarative query filters, lazy-load configuration,
//! and collection accessors. The compiler never mutates it.

use std::collections::{HashMap, HashSet};

use navq_ir::ScalarExpr;

use super::entity::EntityDef;
use super::navigation::NavigationDef;
use crate::error::Error;
use crate::execution::{CollectionAccessor, EntityHandle};

/// Immutable model metadata.
#[derive(Debug, Clone)]
pub struct Model {
    entities: HashMap<String, EntityDef>,
    navigations: HashMap<String, Vec<NavigationDef>>,
    query_filters: HashMap<String, Vec<ScalarExpr>>,
    lazy_load_types: HashSet<String>,
}

impl Model {
    /// Start building a model.
    pub fn builder() -> ModelBuilder {
        ModelBuilder::default()
    }

    /// Look up an entity definition.
    pub fn entity(&self, name: &str) -> Result<&EntityDef, Error> {
        self.entities
            .get(name)
            .ok_or_else(|| Error::UnknownEntity(name.to_string()))
    }

    /// Look up a navigation declared on an entity.
    pub fn navigation(&self, entity: &str, name: &str) -> Result<&NavigationDef, Error> {
        self.navigations
            .get(entity)
            .and_then(|navs| navs.iter().find(|n| n.name == name))
            .ok_or_else(|| Error::UnknownNavigation {
                entity: entity.to_string(),
                navigation: name.to_string(),
            })
    }

    /// All navigations declared on an entity.
    pub fn navigations_from(&self, entity: &str) -> &[NavigationDef] {
        self.navigations
            .get(entity)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The inverse navigation of `nav`, if declared.
    pub fn inverse_of(&self, nav: &NavigationDef) -> Option<&NavigationDef> {
        let inverse = nav.inverse.as_deref()?;
        self.navigation(&nav.to_entity, inverse).ok()
    }

    /// Declarative query filters attached to an entity type.
    pub fn query_filters(&self, entity: &str) -> &[ScalarExpr] {
        self.query_filters
            .get(entity)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Whether instances of `entity` carry a lazy-load-state companion.
    pub fn has_lazy_load_state(&self, entity: &str) -> bool {
        self.lazy_load_types.contains(entity)
    }

    /// The collection-accessor abstraction for a collection navigation.
    ///
    /// The accessor inserts each related entity into the parent's collection
    /// exactly once, keyed by entity identity.
    pub fn collection_accessor(&self, nav: &NavigationDef) -> CollectionAccessor {
        CollectionAccessor::new(nav.clone())
    }

    /// Materialize an entity handle from field values, attaching the
    /// lazy-load companion when this entity type is configured for one.
    pub fn new_entity_handle(
        &self,
        entity_type: &str,
        key: navq_ir::Value,
        fields: std::collections::BTreeMap<String, navq_ir::Value>,
    ) -> EntityHandle {
        EntityHandle::new(
            entity_type,
            key,
            fields,
            self.has_lazy_load_state(entity_type),
        )
    }
}

/// Builder for [`Model`].
#[derive(Debug, Default)]
pub struct ModelBuilder {
    entities: Vec<EntityDef>,
    navigations: Vec<NavigationDef>,
    query_filters: Vec<(String, ScalarExpr)>,
    lazy_load_types: HashSet<String>,
}

impl ModelBuilder {
    /// Add an entity definition.
    pub fn entity(mut self, entity: EntityDef) -> Self {
        self.entities.push(entity);
        self
    }

    /// Add a navigation definition.
    pub fn navigation(mut self, nav: NavigationDef) -> Self {
        self.navigations.push(nav);
        self
    }

    /// Attach a declarative query filter to an entity type. `ContextValue`
    /// nodes in the predicate become context-scoped parameters re-evaluated
    /// on every execution.
    pub fn query_filter(mut self, entity: impl Into<String>, predicate: ScalarExpr) -> Self {
        self.query_filters.push((entity.into(), predicate));
        self
    }

    /// Configure a lazy-load-state companion for an entity type.
    pub fn lazy_loading(mut self, entity: impl Into<String>) -> Self {
        self.lazy_load_types.insert(entity.into());
        self
    }

    /// Validate and freeze the model.
    ///
    /// Navigation endpoints and join fields must exist; a declared inverse
    /// must exist on the target entity.
    pub fn build(self) -> Result<Model, Error> {
        let mut entities = HashMap::new();
        for entity in self.entities {
            entities.insert(entity.name.clone(), entity);
        }

        let mut navigations: HashMap<String, Vec<NavigationDef>> = HashMap::new();
        for nav in &self.navigations {
            let from = entities
                .get(&nav.from_entity)
                .ok_or_else(|| Error::UnknownEntity(nav.from_entity.clone()))?;
            let to = entities
                .get(&nav.to_entity)
                .ok_or_else(|| Error::UnknownEntity(nav.to_entity.clone()))?;

            if from.get_field(&nav.from_field).is_none() {
                return Err(Error::UnknownField {
                    entity: nav.from_entity.clone(),
                    field: nav.from_field.clone(),
                });
            }
            if to.get_field(&nav.to_field).is_none() {
                return Err(Error::UnknownField {
                    entity: nav.to_entity.clone(),
                    field: nav.to_field.clone(),
                });
            }
            if let Some(inverse) = &nav.inverse {
                let declared = self
                    .navigations
                    .iter()
                    .any(|n| n.from_entity == nav.to_entity && &n.name == inverse);
                if !declared {
                    return Err(Error::UnknownNavigation {
                        entity: nav.to_entity.clone(),
                        navigation: inverse.clone(),
                    });
                }
            }

            navigations
                .entry(nav.from_entity.clone())
                .or_default()
                .push(nav.clone());
        }

        let mut query_filters: HashMap<String, Vec<ScalarExpr>> = HashMap::new();
        for (entity, predicate) in self.query_filters {
            if !entities.contains_key(&entity) {
                return Err(Error::UnknownEntity(entity));
            }
            query_filters.entry(entity).or_default().push(predicate);
        }

        for entity in &self.lazy_load_types {
            if !entities.contains_key(entity) {
                return Err(Error::UnknownEntity(entity.clone()));
            }
        }

        Ok(Model {
            entities,
            navigations,
            query_filters,
            lazy_load_types: self.lazy_load_types,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FieldDef, ScalarType};
    use navq_ir::{col, ctx_value};

    fn blog_model() -> Model {
        Model::builder()
            .entity(
                EntityDef::new("User", "id")
                    .with_field(FieldDef::scalar("id", ScalarType::Uuid))
                    .with_field(FieldDef::scalar("name", ScalarType::String)),
            )
            .entity(
                EntityDef::new("Post", "id")
                    .with_field(FieldDef::scalar("id", ScalarType::Uuid))
                    .with_field(FieldDef::scalar("author_id", ScalarType::Uuid)),
            )
            .navigation(
                NavigationDef::collection("posts", "User", "id", "Post", "author_id")
                    .with_inverse("author"),
            )
            .navigation(
                NavigationDef::reference("author", "Post", "author_id", "User", "id")
                    .with_inverse("posts"),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_navigation_lookup() {
        let model = blog_model();
        let nav = model.navigation("User", "posts").unwrap();
        assert_eq!(nav.to_entity, "Post");
        assert!(model.navigation("User", "missing").is_err());
    }

    #[test]
    fn test_inverse_resolution_is_static() {
        let model = blog_model();
        let posts = model.navigation("User", "posts").unwrap();
        let inverse = model.inverse_of(posts).unwrap();
        assert_eq!(inverse.name, "author");
        assert_eq!(inverse.from_entity, "Post");
    }

    #[test]
    fn test_build_rejects_missing_navigation_target() {
        let result = Model::builder()
            .entity(
                EntityDef::new("User", "id").with_field(FieldDef::scalar("id", ScalarType::Uuid)),
            )
            .navigation(NavigationDef::collection("posts", "User", "id", "Post", "author_id"))
            .build();

        assert!(matches!(result, Err(Error::UnknownEntity(e)) if e == "Post"));
    }

    #[test]
    fn test_build_rejects_undeclared_inverse() {
        let result = Model::builder()
            .entity(
                EntityDef::new("User", "id").with_field(FieldDef::scalar("id", ScalarType::Uuid)),
            )
            .entity(
                EntityDef::new("Post", "id")
                    .with_field(FieldDef::scalar("id", ScalarType::Uuid))
                    .with_field(FieldDef::scalar("author_id", ScalarType::Uuid)),
            )
            .navigation(
                NavigationDef::collection("posts", "User", "id", "Post", "author_id")
                    .with_inverse("author"),
            )
            .build();

        assert!(matches!(result, Err(Error::UnknownNavigation { .. })));
    }

    #[test]
    fn test_query_filters_and_lazy_loading() {
        let model = Model::builder()
            .entity(
                EntityDef::new("User", "id")
                    .with_field(FieldDef::scalar("id", ScalarType::Uuid))
                    .with_field(FieldDef::scalar("tenant", ScalarType::String)),
            )
            .query_filter("User", col("tenant").eq(ctx_value("tenant")))
            .lazy_loading("User")
            .build()
            .unwrap();

        assert_eq!(model.query_filters("User").len(), 1);
        assert!(model.has_lazy_load_state("User"));
        assert!(!model.has_lazy_load_state("Post"));
    }
}
