//! Compiled-plan cache.
//!
//! Compiled delegates are cached keyed by the structural shape of the
//! expression after parameterization: two queries differing only in captured
//! literal values share one entry. Population is compute-once per key even
//! under concurrent first use: losing callers block on the slot until the
//! winning compilation publishes; a failed compilation leaves no entry.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use dashmap::DashMap;
use navq_ir::{Projection, QueryExpr, ScalarExpr, Value};
use parking_lot::Mutex;
use tracing::trace;

use crate::compile::CompiledQuery;
use crate::error::Error;

/// Structural fingerprint of a parameterized query.
///
/// Captures operator structure, entity/field/parameter names, and flags,
/// never the values captured parameters stand for.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct QueryFingerprint {
    hash: u64,
}

impl QueryFingerprint {
    /// Compute the fingerprint of a parameterized expression.
    pub fn compute(expr: &QueryExpr, is_async: bool) -> Self {
        let mut hasher = DefaultHasher::new();
        hash_query(expr, &mut hasher);
        is_async.hash(&mut hasher);
        Self {
            hash: hasher.finish(),
        }
    }
}

fn hash_query<H: Hasher>(expr: &QueryExpr, hasher: &mut H) {
    std::mem::discriminant(expr).hash(hasher);
    match expr {
        QueryExpr::Source { entity } => entity.hash(hasher),
        QueryExpr::Filter { source, predicate } => {
            hash_query(source, hasher);
            hash_scalar(predicate, hasher);
        }
        QueryExpr::Select { source, projection } => {
            hash_query(source, hasher);
            match projection {
                Projection::EntityShape => 0u8.hash(hasher),
                Projection::Fields(fields) => {
                    1u8.hash(hasher);
                    for field in fields {
                        field.name.hash(hasher);
                        hash_scalar(&field.expr, hasher);
                    }
                }
            }
        }
        QueryExpr::OrderBy {
            source,
            key,
            direction,
            append,
        } => {
            hash_query(source, hasher);
            hash_scalar(key, hasher);
            std::mem::discriminant(direction).hash(hasher);
            append.hash(hasher);
        }
        QueryExpr::Include {
            source,
            path,
            extend_previous,
        } => {
            hash_query(source, hasher);
            path.hash(hasher);
            extend_previous.hash(hasher);
        }
        QueryExpr::Take { source, count } | QueryExpr::Skip { source, count } => {
            hash_query(source, hasher);
            hash_scalar(count, hasher);
        }
        QueryExpr::Reduce { source, op } => {
            hash_query(source, hasher);
            std::mem::discriminant(op).hash(hasher);
        }
        QueryExpr::Tag { source, tag } => {
            hash_query(source, hasher);
            tag.hash(hasher);
        }
        QueryExpr::AsNoTracking { source } => hash_query(source, hasher),
    }
}

fn hash_scalar<H: Hasher>(expr: &ScalarExpr, hasher: &mut H) {
    std::mem::discriminant(expr).hash(hasher);
    match expr {
        ScalarExpr::Literal(value) => hash_value(value, hasher),
        ScalarExpr::Parameter(name) => name.hash(hasher),
        ScalarExpr::Column { path, field } => {
            path.hash(hasher);
            field.hash(hasher);
        }
        ScalarExpr::BoundColumn { source, field } => {
            source.hash(hasher);
            field.hash(hasher);
        }
        ScalarExpr::ContextValue(name) => name.hash(hasher),
        ScalarExpr::Unary { op, operand } => {
            std::mem::discriminant(op).hash(hasher);
            hash_scalar(operand, hasher);
        }
        ScalarExpr::Binary { op, left, right } => {
            std::mem::discriminant(op).hash(hasher);
            hash_scalar(left, hasher);
            hash_scalar(right, hasher);
        }
    }
}

fn hash_value<H: Hasher>(value: &Value, hasher: &mut H) {
    std::mem::discriminant(value).hash(hasher);
    match value {
        Value::Null => {}
        Value::Bool(b) => b.hash(hasher),
        Value::Int32(i) => i.hash(hasher),
        Value::Int64(i) => i.hash(hasher),
        Value::Float32(f) => f.to_bits().hash(hasher),
        Value::Float64(f) => f.to_bits().hash(hasher),
        Value::String(s) => s.hash(hasher),
        Value::Bytes(b) => b.hash(hasher),
        Value::Timestamp(t) => t.hash(hasher),
        Value::Uuid(u) => u.hash(hasher),
    }
}

/// Cache statistics.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStats {
    /// Get hit count.
    pub fn hits(&self) -> u64 {
        self.hits.load(AtomicOrdering::Relaxed)
    }

    /// Get miss count.
    pub fn misses(&self) -> u64 {
        self.misses.load(AtomicOrdering::Relaxed)
    }

    /// Calculate hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total > 0.0 {
            hits / total
        } else {
            0.0
        }
    }
}

#[derive(Default)]
struct CacheSlot {
    cell: Mutex<Option<Arc<CompiledQuery>>>,
}

/// Thread-safe compiled-delegate cache keyed by query fingerprint.
#[derive(Default)]
pub struct QueryCache {
    slots: DashMap<QueryFingerprint, Arc<CacheSlot>>,
    stats: CacheStats,
}

impl QueryCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the compiled delegate for a fingerprint, compiling at most once
    /// per key. Concurrent losers block until the winner publishes.
    pub fn get_or_compile(
        &self,
        fingerprint: &QueryFingerprint,
        compile: impl FnOnce() -> Result<CompiledQuery, Error>,
    ) -> Result<Arc<CompiledQuery>, Error> {
        let slot = {
            let entry = self
                .slots
                .entry(fingerprint.clone())
                .or_insert_with(|| Arc::new(CacheSlot::default()));
            Arc::clone(entry.value())
        };

        let mut cell = slot.cell.lock();
        if let Some(compiled) = cell.as_ref() {
            self.stats.hits.fetch_add(1, AtomicOrdering::Relaxed);
            trace!(?fingerprint, "compiled-plan cache hit");
            return Ok(Arc::clone(compiled));
        }

        self.stats.misses.fetch_add(1, AtomicOrdering::Relaxed);
        trace!(?fingerprint, "compiled-plan cache miss");
        match compile() {
            Ok(compiled) => {
                let compiled = Arc::new(compiled);
                *cell = Some(Arc::clone(&compiled));
                Ok(compiled)
            }
            Err(error) => {
                // Errors are not cached; release the slot so a later attempt
                // can compile again.
                drop(cell);
                self.slots.remove(fingerprint);
                Err(error)
            }
        }
    }

    /// Drop a cache entry (plan invalidation).
    pub fn remove(&self, fingerprint: &QueryFingerprint) {
        self.slots.remove(fingerprint);
    }

    /// Number of populated entries.
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|entry| entry.value().cell.lock().is_some())
            .count()
    }

    /// Whether the cache has no populated entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clear all entries.
    pub fn clear(&self) {
        self.slots.clear();
    }

    /// Get cache statistics.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}
