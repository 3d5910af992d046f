//! Compiled-artifact cache
//!
//! Bounded LRU keyed by fingerprint. The cache stores only the *shape* of
//! compiled execution graphs: stochastic leaves inside a cached graph are
//! re-executed on every invocation, so caching never collapses stochastic
//! behavior. Hit/miss/total counters are atomic and satisfy
//! `hits + misses == total_calls` at all times.

use chrono::{DateTime, Utc};
use operon_core::ExecutionGraph;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

/// Default cache bound.
pub const DEFAULT_MAX_ENTRIES: usize = 1024;

/// Rolling execution statistics of one compiled artifact.
#[derive(Debug, Clone, Default)]
pub struct ArtifactStats {
    /// Times the artifact was executed.
    pub invocations: u64,
    /// Rolling mean execution latency in milliseconds.
    pub mean_latency_ms: f64,
    /// Shape signature of the most recent input.
    pub last_input_shape: String,
}

/// A cached compilation result.
#[derive(Clone)]
pub struct CompiledArtifact {
    /// The optimized execution graph.
    pub graph: Arc<ExecutionGraph>,
    /// Fingerprint the artifact is stored under.
    pub fingerprint: String,
    /// Strategy that produced the graph.
    pub strategy: String,
    /// When the artifact was compiled.
    pub created_at: DateTime<Utc>,
    /// Rolling execution statistics.
    pub stats: ArtifactStats,
}

impl CompiledArtifact {
    /// Wrap a freshly compiled graph.
    pub fn new(graph: ExecutionGraph, fingerprint: String, strategy: String) -> Self {
        Self {
            graph: Arc::new(graph),
            fingerprint,
            strategy,
            created_at: Utc::now(),
            stats: ArtifactStats::default(),
        }
    }
}

struct CacheSlot {
    artifact: CompiledArtifact,
    last_accessed: Instant,
    access_count: u64,
}

/// Aggregated cache statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    /// Lookups that found an artifact.
    pub hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
    /// `hits / total_calls`, `0.0` before any lookup.
    pub hit_rate: f64,
    /// `hits + misses`.
    pub total_calls: u64,
    /// Artifacts currently stored.
    pub entries: usize,
}

/// Bounded LRU cache of compiled artifacts.
pub struct JitCache {
    storage: RwLock<HashMap<String, CacheSlot>>,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl JitCache {
    /// Create a cache bounded at `max_entries`.
    pub fn new(max_entries: usize) -> Self {
        Self {
            storage: RwLock::new(HashMap::new()),
            max_entries: max_entries.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up an artifact, counting the hit or miss and touching LRU
    /// metadata.
    pub async fn get(&self, fingerprint: &str) -> Option<CompiledArtifact> {
        let mut storage = self.storage.write().await;
        match storage.get_mut(fingerprint) {
            Some(slot) => {
                slot.last_accessed = Instant::now();
                slot.access_count += 1;
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(slot.artifact.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert an artifact, evicting the least recently used entry when the
    /// bound is reached.
    pub async fn insert(&self, artifact: CompiledArtifact) {
        let mut storage = self.storage.write().await;
        if storage.len() >= self.max_entries && !storage.contains_key(&artifact.fingerprint) {
            let evictee = storage
                .iter()
                .min_by_key(|(_, slot)| slot.last_accessed)
                .map(|(key, _)| key.clone());
            if let Some(key) = evictee {
                tracing::debug!(fingerprint = %key, "evicting LRU compiled artifact");
                storage.remove(&key);
            }
        }
        storage.insert(
            artifact.fingerprint.clone(),
            CacheSlot {
                artifact,
                last_accessed: Instant::now(),
                access_count: 0,
            },
        );
    }

    /// Fold one execution into an artifact's rolling statistics.
    pub async fn record_invocation(&self, fingerprint: &str, latency_ms: f64, input_shape: &str) {
        let mut storage = self.storage.write().await;
        if let Some(slot) = storage.get_mut(fingerprint) {
            let stats = &mut slot.artifact.stats;
            stats.invocations += 1;
            stats.mean_latency_ms +=
                (latency_ms - stats.mean_latency_ms) / stats.invocations as f64;
            stats.last_input_shape = input_shape.to_string();
        }
    }

    /// Aggregate statistics.
    pub async fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
            total_calls: total,
            entries: self.storage.read().await.len(),
        }
    }

    /// Number of stored artifacts.
    pub async fn len(&self) -> usize {
        self.storage.read().await.len()
    }

    /// Whether the cache is empty.
    pub async fn is_empty(&self) -> bool {
        self.storage.read().await.is_empty()
    }

    /// Drop every artifact (counters are preserved).
    pub async fn clear(&self) {
        self.storage.write().await.clear();
    }
}

impl Default for JitCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}
