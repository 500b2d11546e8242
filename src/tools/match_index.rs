use std::{sync::Arc, time::{Duration, Instant}};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use crate::{domain::embedding::{euclidean_distance, Embedding}, error::RsResult, tools::log::{log_error, log_info, log_warn, LogServiceType}};


/// Anything able to list every identity with its current prototypes.
#[async_trait]
pub trait PrototypeSource: Send + Sync {
    async fn load_all_prototypes(&self) -> RsResult<Vec<(String, Vec<Embedding>)>>;
}

/// Flat storage of every prototype: vectors are laid out contiguously, `labels[i]`
/// owns `vectors[i * dim..(i + 1) * dim]`.
#[derive(Debug, Clone)]
pub struct IndexArena {
    pub generation: u64,
    pub revision: u64,
    dim: usize,
    labels: Vec<String>,
    vectors: Vec<f32>,
    refreshed_at: Option<Instant>,
}

impl IndexArena {
    fn empty(dim: usize) -> Self {
        Self { generation: 0, revision: 0, dim, labels: vec![], vectors: vec![], refreshed_at: None }
    }

    fn push(&mut self, identity_id: &str, prototype: &Embedding) -> bool {
        if prototype.dim() != self.dim || !prototype.is_finite() {
            return false;
        }
        self.labels.push(identity_id.to_string());
        self.vectors.extend_from_slice(prototype.as_slice());
        true
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn label(&self, index: usize) -> &str {
        &self.labels[index]
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &[f32])> {
        self.labels.iter().map(|l| l.as_str()).zip(self.vectors.chunks_exact(self.dim.max(1)))
    }

    /// Prototypes currently indexed for one identity, in index order.
    pub fn prototypes_of(&self, identity_id: &str) -> Vec<Embedding> {
        self.entries().filter(|(label, _)| *label == identity_id).map(|(_, v)| Embedding::new(v.to_vec())).collect()
    }

    /// Closest entry to `query` as `(entry index, distance)`.
    pub fn nearest(&self, query: &Embedding) -> Option<(usize, f32)> {
        if query.dim() != self.dim {
            return None;
        }
        let mut best: Option<(usize, f32)> = None;
        for (index, vector) in self.vectors.chunks_exact(self.dim.max(1)).enumerate() {
            let distance = euclidean_distance(query.as_slice(), vector);
            match best {
                Some((_, best_distance)) if distance >= best_distance => {}
                _ => best = Some((index, distance)),
            }
        }
        best
    }
}

/// Immutable view of the index taken for one matching operation.
pub type MatchIndexSnapshot = Arc<IndexArena>;

pub struct MatchIndex {
    dim: usize,
    refresh_interval: Option<Duration>,
    arena: RwLock<Arc<IndexArena>>,
    // serializes refresh and upsert, snapshots never take it
    write_gate: Mutex<()>,
    // last failed refresh, the next attempt waits one more interval
    failed_at: Mutex<Option<Instant>>,
}

impl MatchIndex {
    /// `refresh_interval` of `None` disables refresh-on-read.
    pub fn new(dim: usize, refresh_interval: Option<Duration>) -> Self {
        Self {
            dim,
            refresh_interval,
            arena: RwLock::new(Arc::new(IndexArena::empty(dim))),
            write_gate: Mutex::new(()),
            failed_at: Mutex::new(None),
        }
    }

    pub async fn snapshot(&self) -> MatchIndexSnapshot {
        let arena = self.arena.read().await;
        arena.clone()
    }

    /// Snapshot after refreshing the index when it is older than the refresh interval.
    /// A failed refresh keeps serving the previous index until the next interval.
    pub async fn snapshot_fresh<S: PrototypeSource + ?Sized>(&self, source: &S) -> MatchIndexSnapshot {
        if self.is_stale().await {
            let _gate = self.write_gate.lock().await;
            // another request may have refreshed while we waited
            if self.is_stale().await {
                if let Err(error) = self.refresh_locked(source).await {
                    *self.failed_at.lock().await = Some(Instant::now());
                    log_error(LogServiceType::Index, format!("Unable to refresh match index, serving stale entries: {:#}", error));
                }
            }
        }
        self.snapshot().await
    }

    pub async fn is_stale(&self) -> bool {
        let Some(interval) = self.refresh_interval else { return false };
        let refreshed_at = self.arena.read().await.refreshed_at;
        let failed_at = *self.failed_at.lock().await;
        match refreshed_at.max(failed_at) {
            Some(attempted_at) => attempted_at.elapsed() >= interval,
            None => true,
        }
    }

    /// Rebuilds the whole index from `source`.
    pub async fn refresh<S: PrototypeSource + ?Sized>(&self, source: &S) -> RsResult<u64> {
        let _gate = self.write_gate.lock().await;
        self.refresh_locked(source).await
    }

    async fn refresh_locked<S: PrototypeSource + ?Sized>(&self, source: &S) -> RsResult<u64> {
        let identities = source.load_all_prototypes().await?;
        let generation = self.arena.read().await.generation + 1;

        let mut arena = IndexArena::empty(self.dim);
        arena.generation = generation;
        arena.refreshed_at = Some(Instant::now());
        let mut skipped = 0;
        for (identity_id, prototypes) in &identities {
            for prototype in prototypes {
                if !arena.push(identity_id, prototype) {
                    skipped += 1;
                }
            }
        }
        if skipped > 0 {
            log_warn(LogServiceType::Index, format!("Skipped {} prototypes not matching dimension {}", skipped, self.dim));
        }
        log_info(LogServiceType::Index, format!("Loaded {} prototypes for {} identities (generation {})", arena.len(), identities.len(), generation));

        *self.arena.write().await = Arc::new(arena);
        *self.failed_at.lock().await = None;
        Ok(generation)
    }

    /// Replaces every entry of `identity_id` with `prototypes` (copy on write).
    pub async fn upsert(&self, identity_id: &str, prototypes: &[Embedding]) {
        let _gate = self.write_gate.lock().await;
        let current = self.snapshot().await;

        let mut arena = IndexArena::empty(self.dim);
        arena.generation = current.generation;
        arena.revision = current.revision + 1;
        arena.refreshed_at = current.refreshed_at;
        for (label, vector) in current.entries() {
            if label != identity_id {
                arena.labels.push(label.to_string());
                arena.vectors.extend_from_slice(vector);
            }
        }
        for prototype in prototypes {
            if !arena.push(identity_id, prototype) {
                log_warn(LogServiceType::Index, format!("Ignoring prototype of {} with dimension {} (expected {})", identity_id, prototype.dim(), self.dim));
            }
        }

        *self.arena.write().await = Arc::new(arena);
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct MemorySource {
        identities: std::sync::Mutex<Vec<(String, Vec<Embedding>)>>,
        loads: AtomicUsize,
    }

    impl MemorySource {
        fn new(identities: Vec<(String, Vec<Embedding>)>) -> Self {
            Self { identities: std::sync::Mutex::new(identities), loads: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl PrototypeSource for MemorySource {
        async fn load_all_prototypes(&self) -> RsResult<Vec<(String, Vec<Embedding>)>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(self.identities.lock().unwrap().clone())
        }
    }

    struct FailingSource;

    #[async_trait]
    impl PrototypeSource for FailingSource {
        async fn load_all_prototypes(&self) -> RsResult<Vec<(String, Vec<Embedding>)>> {
            Err(crate::Error::PersistenceUnavailable("database is locked".into()))
        }
    }

    struct SlowFailingSource {
        loads: AtomicUsize,
    }

    #[async_trait]
    impl PrototypeSource for SlowFailingSource {
        async fn load_all_prototypes(&self) -> RsResult<Vec<(String, Vec<Embedding>)>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(100)).await;
            Err(crate::Error::PersistenceUnavailable("database is locked".into()))
        }
    }

    fn e(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    #[tokio::test]
    async fn test_refresh_replaces_everything() {
        let source = MemorySource::new(vec![
            ("E1".into(), vec![e(&[0.0, 0.0]), e(&[1.0, 0.0])]),
            ("E2".into(), vec![e(&[5.0, 5.0])]),
        ]);
        let index = MatchIndex::new(2, None);
        assert_eq!(index.refresh(&source).await.unwrap(), 1);
        let snapshot = index.snapshot().await;
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot.prototypes_of("E1"), vec![e(&[0.0, 0.0]), e(&[1.0, 0.0])]);

        *source.identities.lock().unwrap() = vec![("E2".into(), vec![e(&[4.0, 4.0])])];
        assert_eq!(index.refresh(&source).await.unwrap(), 2);
        let refreshed = index.snapshot().await;
        assert_eq!(refreshed.len(), 1);
        assert!(refreshed.prototypes_of("E1").is_empty());
        // the old snapshot is untouched
        assert_eq!(snapshot.len(), 3);
    }

    #[tokio::test]
    async fn test_upsert_replaces_identity_entries() {
        let source = MemorySource::new(vec![
            ("E1".into(), vec![e(&[0.0, 0.0]), e(&[1.0, 0.0])]),
            ("E2".into(), vec![e(&[5.0, 5.0])]),
        ]);
        let index = MatchIndex::new(2, None);
        index.refresh(&source).await.unwrap();

        index.upsert("E1", &[e(&[2.0, 2.0])]).await;
        let snapshot = index.snapshot().await;
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.prototypes_of("E1"), vec![e(&[2.0, 2.0])]);
        assert_eq!(snapshot.prototypes_of("E2"), vec![e(&[5.0, 5.0])]);
        assert_eq!(snapshot.revision, 1);

        index.upsert("E3", &[e(&[9.0, 9.0]), e(&[1.0, 2.0, 3.0])]).await;
        let snapshot = index.snapshot().await;
        assert_eq!(snapshot.prototypes_of("E3"), vec![e(&[9.0, 9.0])]);
    }

    #[tokio::test]
    async fn test_refresh_skips_wrong_dimension() {
        let source = MemorySource::new(vec![("E1".into(), vec![e(&[0.0, 0.0]), e(&[1.0])])]);
        let index = MatchIndex::new(2, None);
        index.refresh(&source).await.unwrap();
        assert_eq!(index.snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_on_read() {
        let source = MemorySource::new(vec![("E1".into(), vec![e(&[0.0, 0.0])])]);
        let index = MatchIndex::new(2, Some(Duration::from_millis(50)));
        assert!(index.is_stale().await);
        assert_eq!(index.snapshot_fresh(&source).await.len(), 1);
        assert_eq!(source.loads.load(Ordering::SeqCst), 1);

        index.snapshot_fresh(&source).await;
        assert_eq!(source.loads.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(80)).await;
        index.snapshot_fresh(&source).await;
        assert_eq!(source.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_disabled_refresh_interval_never_reloads() {
        let source = MemorySource::new(vec![("E1".into(), vec![e(&[0.0, 0.0])])]);
        let index = MatchIndex::new(2, None);
        assert!(!index.is_stale().await);
        assert!(index.snapshot_fresh(&source).await.is_empty());
        assert_eq!(source.loads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_stale_entries() {
        let source = MemorySource::new(vec![("E1".into(), vec![e(&[0.0, 0.0])])]);
        let index = MatchIndex::new(2, Some(Duration::from_millis(1)));
        index.refresh(&source).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let snapshot = index.snapshot_fresh(&FailingSource).await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.generation, 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_is_not_retried_by_every_reader() {
        let index = Arc::new(MatchIndex::new(2, Some(Duration::from_millis(500))));
        index.upsert("E1", &[e(&[0.0, 0.0])]).await;
        let source = Arc::new(SlowFailingSource { loads: AtomicUsize::new(0) });

        let started = Instant::now();
        let mut readers = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let (index, source) = (index.clone(), source.clone());
            readers.spawn(async move { index.snapshot_fresh(source.as_ref()).await.len() });
        }
        while let Some(len) = readers.join_next().await {
            assert_eq!(len.unwrap(), 1);
        }
        assert_eq!(source.loads.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_millis(400));
        assert!(!index.is_stale().await);

        // a successful refresh clears the failure
        tokio::time::sleep(Duration::from_millis(550)).await;
        assert!(index.is_stale().await);
        let memory = MemorySource::new(vec![("E2".into(), vec![e(&[1.0, 1.0])])]);
        assert_eq!(index.snapshot_fresh(&memory).await.prototypes_of("E2"), vec![e(&[1.0, 1.0])]);
        assert_eq!(memory.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_nearest() {
        let index = MatchIndex::new(2, None);
        index.upsert("E1", &[e(&[0.0, 0.0]), e(&[3.0, 4.0])]).await;
        index.upsert("E2", &[e(&[10.0, 10.0])]).await;
        let snapshot = index.snapshot().await;
        let (entry, distance) = snapshot.nearest(&e(&[3.0, 3.0])).unwrap();
        assert_eq!(snapshot.label(entry), "E1");
        assert_eq!(distance, 1.0);
        assert_eq!(snapshot.nearest(&e(&[3.0])), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_snapshot_never_sees_partial_upsert() {
        let index = Arc::new(MatchIndex::new(2, None));
        let before = vec![e(&[1.0, 1.0]), e(&[1.0, 1.0]), e(&[1.0, 1.0])];
        let after = vec![e(&[2.0, 2.0]), e(&[2.0, 2.0])];
        index.upsert("E0", &[e(&[0.0, 0.0])]).await;
        index.upsert("X", &before).await;

        let writer = {
            let index = index.clone();
            let (before, after) = (before.clone(), after.clone());
            tokio::spawn(async move {
                for i in 0..200 {
                    let set = if i % 2 == 0 { &after } else { &before };
                    index.upsert("X", set).await;
                    tokio::task::yield_now().await;
                }
            })
        };
        let mut readers = vec![];
        for _ in 0..4 {
            let index = index.clone();
            let (before, after) = (before.clone(), after.clone());
            readers.push(tokio::spawn(async move {
                for _ in 0..200 {
                    let snapshot = index.snapshot().await;
                    let x = snapshot.prototypes_of("X");
                    assert!(x == before || x == after, "torn snapshot: {:?}", x);
                    assert_eq!(snapshot.prototypes_of("E0").len(), 1);
                    tokio::task::yield_now().await;
                }
            }));
        }
        writer.await.unwrap();
        for reader in readers {
            reader.await.unwrap();
        }
    }
}
