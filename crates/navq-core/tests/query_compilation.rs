//! Integration tests for the compilation pipeline and include fixup.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use navq_core::compile::{ParameterExtractor, QueryCompilationContext};
use navq_core::execution::{ExecutionContext, ParameterStore};
use navq_core::model::{EntityDef, FieldDef, Model, NavigationDef, ScalarType};
use navq_core::provider::{
    ExecutableShape, MemoryProvider, MemoryStore, ShapeOptimizer, ShapeTranslator,
};
use navq_core::shaped::ShapedQueryPlan;
use navq_core::{Error, QueryEngine};
use navq_ir::{col, ctx_value, lit, nav_col, OrderDirection, ProjectedField, Query, Value};

struct TestContext {
    model: Arc<Model>,
    store: Arc<MemoryStore>,
    engine: QueryEngine,
}

impl TestContext {
    fn new() -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
        Self::with_model(blog_model(false))
    }

    fn with_tenant_filter() -> Self {
        Self::with_model(blog_model(true))
    }

    fn with_model(model: Arc<Model>) -> Self {
        let store = Arc::new(MemoryStore::new());
        let engine = QueryEngine::new(
            Arc::clone(&model),
            Arc::new(MemoryProvider::new(Arc::clone(&store))),
        );
        Self {
            model,
            store,
            engine,
        }
    }

    fn seeded() -> Self {
        let ctx = Self::new();
        ctx.seed();
        ctx
    }

    fn seed(&self) {
        for (id, name, age) in [(1, "Alice", 35), (2, "Bob", 28), (3, "Carol", 42)] {
            self.store.insert(
                "User",
                [
                    ("id", Value::Int32(id)),
                    ("name", Value::from(name)),
                    ("age", Value::Int32(age)),
                ],
            );
        }
        for (id, title, author, editor, tenant) in [
            (10, "Rust ORM", 1, Some(2), "a"),
            (11, "Query plans", 1, None, "a"),
            (12, "Joins", 2, None, "b"),
        ] {
            self.store.insert(
                "Post",
                [
                    ("id", Value::Int32(id)),
                    ("title", Value::from(title)),
                    ("author_id", Value::Int32(author)),
                    ("editor_id", editor.map(Value::Int32).unwrap_or(Value::Null)),
                    ("tenant", Value::from(tenant)),
                ],
            );
        }
        for (id, post, text) in [(100, 10, "nice"), (101, 10, "+1"), (102, 11, "hm")] {
            self.store.insert(
                "Comment",
                [
                    ("id", Value::Int32(id)),
                    ("post_id", Value::Int32(post)),
                    ("text", Value::from(text)),
                ],
            );
        }
    }
}

fn blog_model(with_tenant_filter: bool) -> Arc<Model> {
    let mut builder = Model::builder()
        .entity(
            EntityDef::new("User", "id")
                .with_field(FieldDef::scalar("id", ScalarType::Int32))
                .with_field(FieldDef::scalar("name", ScalarType::String))
                .with_field(FieldDef::scalar("age", ScalarType::Int32)),
        )
        .entity(
            EntityDef::new("Post", "id")
                .with_field(FieldDef::scalar("id", ScalarType::Int32))
                .with_field(FieldDef::scalar("title", ScalarType::String))
                .with_field(FieldDef::scalar("author_id", ScalarType::Int32))
                .with_field(FieldDef::optional("editor_id", ScalarType::Int32))
                .with_field(FieldDef::scalar("tenant", ScalarType::String)),
        )
        .entity(
            EntityDef::new("Comment", "id")
                .with_field(FieldDef::scalar("id", ScalarType::Int32))
                .with_field(FieldDef::scalar("post_id", ScalarType::Int32))
                .with_field(FieldDef::scalar("text", ScalarType::String)),
        )
        .navigation(
            NavigationDef::collection("posts", "User", "id", "Post", "author_id")
                .with_inverse("author"),
        )
        .navigation(
            NavigationDef::reference("author", "Post", "author_id", "User", "id")
                .with_inverse("posts"),
        )
        .navigation(NavigationDef::reference("editor", "Post", "editor_id", "User", "id").optional())
        .navigation(
            NavigationDef::collection("comments", "Post", "id", "Comment", "post_id")
                .with_inverse("post"),
        )
        .navigation(
            NavigationDef::reference("post", "Comment", "post_id", "Post", "id")
                .with_inverse("comments"),
        )
        .lazy_loading("User")
        .lazy_loading("Post");

    if with_tenant_filter {
        builder = builder.query_filter("Post", col("tenant").eq(ctx_value("tenant")));
    }

    Arc::new(builder.build().unwrap())
}

fn entity_names(result: &navq_core::QueryResult) -> Vec<String> {
    result
        .as_entities()
        .unwrap()
        .iter()
        .map(|e| e.field("name").unwrap().as_str().unwrap().to_string())
        .collect()
}

#[test]
fn test_filter_with_captured_literal() {
    let ctx = TestContext::seeded();
    let exec = ExecutionContext::new();

    let result = ctx
        .engine
        .execute(Query::from("User").filter(col("age").gt(lit(30))), &exec)
        .unwrap();

    let mut names = entity_names(&result);
    names.sort();
    assert_eq!(names, vec!["Alice", "Carol"]);
}

#[test]
fn test_captured_literals_share_one_cached_plan() {
    let ctx = TestContext::seeded();
    let exec = ExecutionContext::new();

    let result = ctx
        .engine
        .execute(Query::from("User").filter(col("age").gt(lit(30))), &exec)
        .unwrap();
    assert_eq!(result.as_entities().unwrap().len(), 2);

    let result = ctx
        .engine
        .execute(Query::from("User").filter(col("age").gt(lit(40))), &exec)
        .unwrap();
    assert_eq!(result.as_entities().unwrap().len(), 1);

    assert_eq!(ctx.engine.cache().len(), 1);
    assert_eq!(ctx.engine.cache().stats().hits(), 1);
    assert_eq!(ctx.engine.cache().stats().misses(), 1);
}

#[test]
fn test_collection_include_fixup_non_tracking() {
    let ctx = TestContext::seeded();
    let exec = ExecutionContext::new();

    let result = ctx
        .engine
        .execute(
            Query::from("User")
                .filter(col("name").eq(lit("Alice")))
                .include("posts")
                .as_no_tracking(),
            &exec,
        )
        .unwrap();

    let users = result.as_entities().unwrap();
    assert_eq!(users.len(), 1);
    let alice = &users[0];

    // Exactly the two related rows, no duplicates, loaded on the companion.
    assert_eq!(alice.collection_len("posts"), 2);
    assert!(alice.is_lazy_loaded("posts"));

    // The non-collection inverse is fixed up and marked loaded too.
    for post in alice.collection("posts") {
        let author = post.reference("author").unwrap();
        assert!(author.same_instance(alice));
        assert!(post.is_lazy_loaded("author"));
    }

    // Non-tracking mode never goes through the tracker.
    assert!(exec.tracker().is_empty());
}

#[test]
fn test_collection_include_fixup_tracking() {
    let ctx = TestContext::seeded();
    let exec = ExecutionContext::new();

    let result = ctx
        .engine
        .execute(
            Query::from("User")
                .filter(col("name").eq(lit("Alice")))
                .include("posts"),
            &exec,
        )
        .unwrap();

    let users = result.as_entities().unwrap();
    let alice = &users[0];

    // Loaded state lives in the tracked entry; the lazy-load companion is
    // never touched on the tracking path.
    assert!(exec
        .tracker()
        .is_navigation_loaded(&alice.entity_key(), "posts"));
    assert!(!alice.is_lazy_loaded("posts"));
    assert_eq!(alice.collection_len("posts"), 2);
}

#[test]
fn test_nested_include() {
    let ctx = TestContext::seeded();
    let exec = ExecutionContext::new();

    let result = ctx
        .engine
        .execute(
            Query::from("User")
                .filter(col("name").eq(lit("Alice")))
                .include("posts")
                .then_include("comments")
                .as_no_tracking(),
            &exec,
        )
        .unwrap();

    let alice = &result.as_entities().unwrap()[0];
    let posts = alice.collection("posts");
    let mut comment_counts: Vec<usize> = posts
        .iter()
        .map(|p| p.collection_len("comments"))
        .collect();
    comment_counts.sort();

    assert_eq!(comment_counts, vec![1, 2]);
    for post in &posts {
        assert!(post.is_lazy_loaded("comments"));
    }
}

#[test]
fn test_include_reuses_join_and_unifies_instances() {
    let ctx = TestContext::seeded();
    let exec = ExecutionContext::new();

    let result = ctx
        .engine
        .execute(
            Query::from("Post")
                .filter(nav_col(["author"], "name").eq(lit("Alice")))
                .include("author")
                .as_no_tracking(),
            &exec,
        )
        .unwrap();

    let posts = result.as_entities().unwrap();
    assert_eq!(posts.len(), 2);

    // Join-based access and eager loading observe one related instance.
    let first_author = posts[0].reference("author").unwrap();
    let second_author = posts[1].reference("author").unwrap();
    assert!(first_author.same_instance(&second_author));
    assert_eq!(first_author.field("name").unwrap(), Value::from("Alice"));
}

#[test]
fn test_collection_fixup_is_exactly_once_for_duplicate_rows() {
    let ctx = TestContext::seeded();
    // A duplicate row shape for the same related entity.
    ctx.store.insert(
        "Post",
        [
            ("id", Value::Int32(10)),
            ("title", Value::from("Rust ORM")),
            ("author_id", Value::Int32(1)),
            ("editor_id", Value::Null),
            ("tenant", Value::from("a")),
        ],
    );
    let exec = ExecutionContext::new();

    let result = ctx
        .engine
        .execute(
            Query::from("User")
                .filter(col("name").eq(lit("Alice")))
                .include("posts")
                .as_no_tracking(),
            &exec,
        )
        .unwrap();

    let alice = &result.as_entities().unwrap()[0];
    let ids: Vec<Value> = alice
        .collection("posts")
        .iter()
        .map(|p| p.key())
        .collect();

    // Post 10 appears twice in the store but exactly once in the collection.
    assert_eq!(alice.collection_len("posts"), 2);
    assert!(ids.contains(&Value::Int32(10)));
    assert!(ids.contains(&Value::Int32(11)));
}

#[test]
fn test_optional_reference_include_absent_value() {
    let ctx = TestContext::seeded();
    let exec = ExecutionContext::new();

    let result = ctx
        .engine
        .execute(
            Query::from("Post")
                .include("editor")
                .as_no_tracking(),
            &exec,
        )
        .unwrap();

    let posts = result.as_entities().unwrap();
    assert_eq!(posts.len(), 3);

    for post in posts {
        // Loaded is marked even when no related value exists, so later
        // accesses do not re-trigger fetching.
        assert!(post.is_lazy_loaded("editor"));
        match post.key() {
            Value::Int32(10) => assert!(post.reference("editor").is_some()),
            _ => assert!(post.reference("editor").is_none()),
        }
    }
}

#[test]
fn test_tracking_marks_absent_reference_loaded_via_tracker() {
    let ctx = TestContext::seeded();
    let exec = ExecutionContext::new();

    let result = ctx
        .engine
        .execute(Query::from("Post").include("editor"), &exec)
        .unwrap();

    for post in result.as_entities().unwrap() {
        assert!(exec
            .tracker()
            .is_navigation_loaded(&post.entity_key(), "editor"));
        assert!(!post.is_lazy_loaded("editor"));
    }
}

#[test]
fn test_ordering_reset_and_append() {
    let ctx = TestContext::seeded();
    let exec = ExecutionContext::new();

    // A fresh primary ordering discards the earlier chain.
    let result = ctx
        .engine
        .execute(
            Query::from("User")
                .order_by(col("name"), OrderDirection::Desc)
                .order_by(col("age"), OrderDirection::Asc),
            &exec,
        )
        .unwrap();
    assert_eq!(entity_names(&result), vec!["Bob", "Alice", "Carol"]);

    // ThenBy appends without discarding.
    let result = ctx
        .engine
        .execute(
            Query::from("Post")
                .order_by(nav_col(["author"], "name"), OrderDirection::Asc)
                .then_by(col("title"), OrderDirection::Desc),
            &exec,
        )
        .unwrap();
    let titles: Vec<Value> = result
        .as_entities()
        .unwrap()
        .iter()
        .map(|p| p.field("title").unwrap())
        .collect();
    assert_eq!(
        titles,
        vec![
            Value::from("Rust ORM"),
            Value::from("Query plans"),
            Value::from("Joins"),
        ]
    );
}

#[test]
fn test_parameterized_pagination_shares_plan() {
    let ctx = TestContext::seeded();
    let exec = ExecutionContext::new();

    let query = |skip: i32, take: i32| {
        Query::from("User")
            .order_by(col("age"), OrderDirection::Asc)
            .skip(lit(skip))
            .take(lit(take))
    };

    let result = ctx.engine.execute(query(1, 1), &exec).unwrap();
    assert_eq!(entity_names(&result), vec!["Alice"]);

    let result = ctx.engine.execute(query(0, 2), &exec).unwrap();
    assert_eq!(entity_names(&result), vec!["Bob", "Alice"]);

    assert_eq!(ctx.engine.cache().len(), 1);
}

#[test]
fn test_cardinality_reduction() {
    let ctx = TestContext::seeded();
    let exec = ExecutionContext::new();

    let result = ctx
        .engine
        .execute(
            Query::from("User").filter(col("name").eq(lit("Alice"))).single(),
            &exec,
        )
        .unwrap();
    let alice = result.as_entity().unwrap().unwrap();
    assert_eq!(alice.field("age").unwrap(), Value::Int32(35));

    let too_many = ctx.engine.execute(Query::from("User").single(), &exec);
    assert!(matches!(too_many, Err(Error::InvalidData(_))));

    let none = ctx.engine.execute(
        Query::from("User").filter(col("age").gt(lit(99))).first(),
        &exec,
    );
    assert!(matches!(none, Err(Error::NotFound)));

    let default = ctx
        .engine
        .execute(
            Query::from("User")
                .filter(col("age").gt(lit(99)))
                .first_or_default(),
            &exec,
        )
        .unwrap();
    assert!(default.as_entity().unwrap().is_none());
}

#[test]
fn test_projection_over_navigation() {
    let ctx = TestContext::seeded();
    let exec = ExecutionContext::new();

    let result = ctx
        .engine
        .execute(
            Query::from("Post")
                .order_by(col("id"), OrderDirection::Asc)
                .select(vec![
                    ProjectedField::new("title", col("title")),
                    ProjectedField::new("author", nav_col(["author"], "name")),
                ]),
            &exec,
        )
        .unwrap();

    let rows = result.as_rows().unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].get("title"), Some(&Value::from("Rust ORM")));
    assert_eq!(rows[0].get("author"), Some(&Value::from("Alice")));
    assert_eq!(rows[2].get("author"), Some(&Value::from("Bob")));
}

#[test]
fn test_context_value_predicate_reevaluates_per_invocation() {
    let ctx = TestContext::seeded();

    let query = || Query::from("User").filter(col("age").ge(ctx_value("min_age")));

    let exec = ExecutionContext::new().with_context_value("min_age", 30);
    let result = ctx.engine.execute(query(), &exec).unwrap();
    assert_eq!(result.as_entities().unwrap().len(), 2);

    let exec = ExecutionContext::new().with_context_value("min_age", 40);
    let result = ctx.engine.execute(query(), &exec).unwrap();
    assert_eq!(result.as_entities().unwrap().len(), 1);

    assert_eq!(ctx.engine.cache().len(), 1);
}

#[test]
fn test_runtime_parameter_extractor_runs_once_per_execution() {
    let ctx = TestContext::seeded();

    let mut compilation = QueryCompilationContext::new(Arc::clone(&ctx.model), false);
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let placeholder = compilation
        .register_runtime_parameter(
            "@min_age",
            ParameterExtractor::func(move |exec| {
                counter.fetch_add(1, Ordering::SeqCst);
                exec.context_value("min_age")
                    .cloned()
                    .ok_or_else(|| Error::Parameter("min_age is absent".to_string()))
            }),
        )
        .unwrap();

    let translator = MemoryProvider::new(Arc::clone(&ctx.store));
    let compiled = compilation
        .compile(
            Query::from("User").filter(col("age").ge(placeholder)).build(),
            &translator,
            None,
        )
        .unwrap();

    let exec = ExecutionContext::new().with_context_value("min_age", 30);
    let result = compiled.invoke(&exec, &ParameterStore::new()).unwrap();
    assert_eq!(result.as_entities().unwrap().len(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let exec = ExecutionContext::new().with_context_value("min_age", 40);
    let result = compiled.invoke(&exec, &ParameterStore::new()).unwrap();
    assert_eq!(result.as_entities().unwrap().len(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_declarative_query_filter_scopes_root_and_includes() {
    let ctx = TestContext::with_tenant_filter();
    ctx.seed();

    let exec = ExecutionContext::new().with_context_value("tenant", "a");
    let result = ctx.engine.execute(Query::from("Post"), &exec).unwrap();
    assert_eq!(result.as_entities().unwrap().len(), 2);

    let exec = ExecutionContext::new().with_context_value("tenant", "b");
    let result = ctx.engine.execute(Query::from("Post"), &exec).unwrap();
    assert_eq!(result.as_entities().unwrap().len(), 1);

    // The filter also scopes eagerly-loaded related sets.
    let exec = ExecutionContext::new().with_context_value("tenant", "a");
    let result = ctx
        .engine
        .execute(
            Query::from("User")
                .filter(col("name").eq(lit("Bob")))
                .include("posts")
                .as_no_tracking(),
            &exec,
        )
        .unwrap();
    let bob = &result.as_entities().unwrap()[0];
    // Bob's only post is tenant "b".
    assert_eq!(bob.collection_len("posts"), 0);
    assert!(bob.is_lazy_loaded("posts"));

    assert_eq!(ctx.engine.cache().len(), 2);
}

#[test]
fn test_tags_surface_on_compiled_plan() {
    let ctx = TestContext::seeded();

    let (compiled, _) = ctx
        .engine
        .compile(Query::from("User").tag("report").tag("audit"), false)
        .unwrap();

    assert_eq!(
        compiled.tags().iter().cloned().collect::<Vec<_>>(),
        vec!["audit".to_string(), "report".to_string()]
    );
    assert!(compiled.is_tracking());
    assert!(!compiled.is_async());
}

#[test]
fn test_async_flag_separates_cache_entries() {
    let ctx = TestContext::seeded();

    let (sync_plan, _) = ctx.engine.compile(Query::from("User"), false).unwrap();
    let (async_plan, _) = ctx.engine.compile(Query::from("User"), true).unwrap();

    assert!(!sync_plan.is_async());
    assert!(async_plan.is_async());
    assert_eq!(ctx.engine.cache().len(), 2);
}

struct CountingTranslator {
    inner: MemoryProvider,
    translations: AtomicUsize,
}

impl ShapeTranslator for CountingTranslator {
    fn translate(&self, plan: &ShapedQueryPlan) -> Result<ExecutableShape, Error> {
        self.translations.fetch_add(1, Ordering::SeqCst);
        self.inner.translate(plan)
    }
}

#[test]
fn test_concurrent_first_use_compiles_once() {
    let ctx = TestContext::seeded();
    let translator = Arc::new(CountingTranslator {
        inner: MemoryProvider::new(Arc::clone(&ctx.store)),
        translations: AtomicUsize::new(0),
    });
    let engine = Arc::new(QueryEngine::new(
        Arc::clone(&ctx.model),
        Arc::clone(&translator) as Arc<dyn ShapeTranslator>,
    ));

    std::thread::scope(|scope| {
        for _ in 0..8 {
            let engine = Arc::clone(&engine);
            scope.spawn(move || {
                let exec = ExecutionContext::new();
                let result = engine
                    .execute(Query::from("User").filter(col("age").gt(lit(30))), &exec)
                    .unwrap();
                assert_eq!(result.as_entities().unwrap().len(), 2);
            });
        }
    });

    // Losing callers blocked on the winning compilation instead of racing
    // duplicate compilations.
    assert_eq!(translator.translations.load(Ordering::SeqCst), 1);
    assert_eq!(engine.cache().len(), 1);
}

struct CorruptingTranslator {
    inner: MemoryProvider,
}

impl ShapeTranslator for CorruptingTranslator {
    fn translate(&self, plan: &ShapedQueryPlan) -> Result<ExecutableShape, Error> {
        let shape = self.inner.translate(plan)?;
        Ok(ExecutableShape::new(move |exec, params| {
            let mut result_set = shape.fetch(exec, params)?;
            for rows in result_set.include_rows.values_mut() {
                for row in rows {
                    row.entity_type = "Mystery".to_string();
                }
            }
            Ok(result_set)
        }))
    }
}

#[test]
fn test_materialization_mismatch_drops_cache_entry() {
    let ctx = TestContext::seeded();
    let engine = QueryEngine::new(
        Arc::clone(&ctx.model),
        Arc::new(CorruptingTranslator {
            inner: MemoryProvider::new(Arc::clone(&ctx.store)),
        }),
    );

    let exec = ExecutionContext::new();
    let result = engine.execute(Query::from("User").include("posts"), &exec);

    assert!(matches!(
        result,
        Err(Error::MaterializationTypeMismatch { expected, actual, .. })
            if expected == "Post" && actual == "Mystery"
    ));
    assert!(engine.cache().is_empty());
}

struct RecordingOptimizer {
    calls: AtomicUsize,
}

impl ShapeOptimizer for RecordingOptimizer {
    fn optimize(&self, plan: ShapedQueryPlan) -> Result<ShapedQueryPlan, Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(plan)
    }
}

#[test]
fn test_shape_optimizer_hook_runs_between_expansion_and_translation() {
    let ctx = TestContext::seeded();
    let optimizer = Arc::new(RecordingOptimizer {
        calls: AtomicUsize::new(0),
    });
    let engine = QueryEngine::new(
        Arc::clone(&ctx.model),
        Arc::new(MemoryProvider::new(Arc::clone(&ctx.store))),
    )
    .with_optimizer(Arc::clone(&optimizer) as Arc<dyn ShapeOptimizer>);

    let exec = ExecutionContext::new();
    engine.execute(Query::from("User"), &exec).unwrap();
    engine.execute(Query::from("User"), &exec).unwrap();

    // Once per compilation, not per execution.
    assert_eq!(optimizer.calls.load(Ordering::SeqCst), 1);
}
