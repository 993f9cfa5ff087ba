//! Chaos Testing for the Question Cache
//!
//! This module tests failure scenarios using:
//! 1. **Failing tier wrappers** - precise error injection at specific call counts
//! 2. **Container killing** - abrupt Redis death mid-operation
//! 3. **Data corruption** - garbage data in the fast tier
//!
//! Whatever breaks, the cache must only ever miss: no panics, no errors
//! surfacing to the caller.
//!
//! # Running Chaos Tests
//! ```bash
//! cargo test --test chaos -- --include-ignored --nocapture
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use question_cache::storage::memory::{InMemoryDurableTier, InMemoryFastTier};
use question_cache::storage::redis::RedisFastTier;
use question_cache::{
    CacheConfig, CacheKey, CachedItem, Difficulty, DurableRow, DurableTier, FastTier, QuestionCache, StorageError,
    WriteOutcome,
};

use testcontainers::{clients::Cli, core::WaitFor, Container, GenericImage};

// =============================================================================
// Failing Tier Wrappers - Precise Error Injection
// =============================================================================

/// Call counter shared by both wrappers.
struct FailurePlan {
    call_count: AtomicU64,
    /// Fail on these call numbers (1-indexed)
    fail_on_calls: Vec<u64>,
    /// Fail every call from the first listed one onwards
    fail_permanently: AtomicBool,
}

impl FailurePlan {
    fn new(fail_on_calls: Vec<u64>) -> Self {
        Self {
            call_count: AtomicU64::new(0),
            fail_on_calls,
            fail_permanently: AtomicBool::new(false),
        }
    }

    fn always() -> Self {
        let plan = Self::new(vec![1]);
        plan.fail_permanently.store(true, Ordering::SeqCst);
        plan
    }

    fn maybe_fail(&self) -> Result<(), StorageError> {
        let count = self.call_count.fetch_add(1, Ordering::SeqCst) + 1;
        let fail = if self.fail_permanently.load(Ordering::SeqCst) {
            self.fail_on_calls.first().is_some_and(|first| count >= *first)
        } else {
            self.fail_on_calls.contains(&count)
        };
        if fail {
            Err(StorageError::Backend(format!("injected failure on call {}", count)))
        } else {
            Ok(())
        }
    }
}

pub struct FailingFastTier<S: FastTier> {
    inner: S,
    plan: FailurePlan,
}

impl<S: FastTier> FailingFastTier<S> {
    fn new(inner: S, fail_on_calls: Vec<u64>) -> Self {
        Self { inner, plan: FailurePlan::new(fail_on_calls) }
    }

    fn always(inner: S) -> Self {
        Self { inner, plan: FailurePlan::always() }
    }
}

#[async_trait]
impl<S: FastTier> FastTier for FailingFastTier<S> {
    async fn get(&self, key: &str) -> Result<Option<Vec<CachedItem>>, StorageError> {
        self.plan.maybe_fail()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, items: &[CachedItem], ttl: Duration) -> Result<(), StorageError> {
        self.plan.maybe_fail()?;
        self.inner.set(key, items, ttl).await
    }

    async fn set_if_absent(&self, key: &str, items: &[CachedItem], ttl: Duration) -> Result<bool, StorageError> {
        self.plan.maybe_fail()?;
        self.inner.set_if_absent(key, items, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.plan.maybe_fail()?;
        self.inner.delete(key).await
    }

    async fn ping(&self) -> Result<(), StorageError> {
        self.plan.maybe_fail()?;
        self.inner.ping().await
    }
}

/// Holds back conditional writes, so a promotion lands after whatever the
/// test does next.
pub struct SlowPromotionFastTier {
    inner: InMemoryFastTier,
    delay: Duration,
}

#[async_trait]
impl FastTier for SlowPromotionFastTier {
    async fn get(&self, key: &str) -> Result<Option<Vec<CachedItem>>, StorageError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, items: &[CachedItem], ttl: Duration) -> Result<(), StorageError> {
        self.inner.set(key, items, ttl).await
    }

    async fn set_if_absent(&self, key: &str, items: &[CachedItem], ttl: Duration) -> Result<bool, StorageError> {
        tokio::time::sleep(self.delay).await;
        self.inner.set_if_absent(key, items, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.inner.delete(key).await
    }
}

pub struct FailingDurableTier<S: DurableTier> {
    inner: S,
    plan: FailurePlan,
}

impl<S: DurableTier> FailingDurableTier<S> {
    fn new(inner: S, fail_on_calls: Vec<u64>) -> Self {
        Self { inner, plan: FailurePlan::new(fail_on_calls) }
    }

    fn always(inner: S) -> Self {
        Self { inner, plan: FailurePlan::always() }
    }
}

#[async_trait]
impl<S: DurableTier> DurableTier for FailingDurableTier<S> {
    async fn query(&self, key: &str, not_before: i64, limit: usize) -> Result<Vec<DurableRow>, StorageError> {
        self.plan.maybe_fail()?;
        self.inner.query(key, not_before, limit).await
    }

    async fn upsert(&self, row: &DurableRow) -> Result<bool, StorageError> {
        self.plan.maybe_fail()?;
        self.inner.upsert(row).await
    }

    async fn prune(&self, key: &str, keep: usize) -> Result<u64, StorageError> {
        self.plan.maybe_fail()?;
        self.inner.prune(key, keep).await
    }

    async fn touch(&self, row_id: &str, accessed_at: i64) -> Result<(), StorageError> {
        self.plan.maybe_fail()?;
        self.inner.touch(row_id, accessed_at).await
    }

    async fn delete_key(&self, key: &str) -> Result<u64, StorageError> {
        self.plan.maybe_fail()?;
        self.inner.delete_key(key).await
    }

    async fn purge_before(&self, cutoff: i64) -> Result<u64, StorageError> {
        self.plan.maybe_fail()?;
        self.inner.purge_before(cutoff).await
    }

    async fn count(&self, key: &str) -> Result<u64, StorageError> {
        self.plan.maybe_fail()?;
        self.inner.count(key).await
    }

    async fn count_all(&self) -> Result<u64, StorageError> {
        self.plan.maybe_fail()?;
        self.inner.count_all().await
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn cache_with(fast: Option<Arc<dyn FastTier>>, durable: Option<Arc<dyn DurableTier>>) -> QuestionCache {
    QuestionCache::new(CacheConfig::default(), fast, durable)
}

fn key() -> CacheKey {
    CacheKey::build("gcse-maths", "Circles", Difficulty::Medium)
}

fn question(i: usize) -> CachedItem {
    CachedItem::new(format!("zeta{i} kappa{i} omega{i} delta{i}"), "s", 1)
}

fn redis_container(docker: &Cli) -> Container<'_, GenericImage> {
    let image = GenericImage::new("redis", "7-alpine")
        .with_exposed_port(6379)
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"));
    docker.run(image)
}

// =============================================================================
// Chaos Tests - Injected Tier Failures
// =============================================================================

#[tokio::test]
async fn chaos_fast_tier_down_reads_fall_back_to_durable() {
    let durable = Arc::new(InMemoryDurableTier::new());
    let seeder = cache_with(None, Some(durable.clone() as Arc<dyn DurableTier>));
    assert!(seeder.write(&key(), question(1)).await.is_stored());

    let cache = cache_with(
        Some(Arc::new(FailingFastTier::always(InMemoryFastTier::new()))),
        Some(durable as Arc<dyn DurableTier>),
    );
    let hit = cache.read(&key(), &[]).await.expect("durable tier should serve");
    assert_eq!(hit.content, question(1).content);
}

#[tokio::test]
async fn chaos_durable_down_write_still_lands_in_fast() {
    let fast = Arc::new(InMemoryFastTier::new());
    let cache = cache_with(
        Some(fast.clone() as Arc<dyn FastTier>),
        Some(Arc::new(FailingDurableTier::always(InMemoryDurableTier::new()))),
    );

    assert_eq!(cache.write(&key(), question(1)).await, WriteOutcome::Stored);
    assert_eq!(fast.get(key().as_str()).await.unwrap().map(|items| items.len()), Some(1));
    assert!(cache.read(&key(), &[]).await.is_some());
}

#[tokio::test]
async fn chaos_fast_down_write_lands_in_durable() {
    let durable = Arc::new(InMemoryDurableTier::new());
    let cache = cache_with(
        Some(Arc::new(FailingFastTier::always(InMemoryFastTier::new()))),
        Some(durable.clone() as Arc<dyn DurableTier>),
    );

    assert_eq!(cache.write(&key(), question(1)).await, WriteOutcome::Stored);
    assert_eq!(durable.count(key().as_str()).await.unwrap(), 1);
}

#[tokio::test]
async fn chaos_both_tiers_down_only_miss() {
    let cache = cache_with(
        Some(Arc::new(FailingFastTier::always(InMemoryFastTier::new()))),
        Some(Arc::new(FailingDurableTier::always(InMemoryDurableTier::new()))),
    );

    assert!(cache.read(&key(), &[]).await.is_none());
    assert_eq!(cache.write(&key(), question(1)).await, WriteOutcome::NotStored);
    assert_eq!(cache.supply(&key(), &[]).await, 0);
    assert!(cache.needs_more(&key(), None).await);
    assert_eq!(cache.clear(&key()).await, 0);
    assert_eq!(cache.purge_expired().await, 0);

    let stats = cache.stats().await;
    assert!(!stats.fast_tier_available);
    assert!(!stats.durable_tier_available);
    assert_eq!(stats.approximate_row_count, 0);
}

#[tokio::test]
async fn chaos_touch_failure_does_not_affect_read() {
    // Durable-only write is query(1), upsert(2), prune(3); the read is query(4), touch(5).
    let durable = Arc::new(FailingDurableTier::new(InMemoryDurableTier::new(), vec![5]));
    let cache = cache_with(None, Some(durable as Arc<dyn DurableTier>));

    assert!(cache.write(&key(), question(1)).await.is_stored());
    assert!(cache.read(&key(), &[]).await.is_some());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(cache.read(&key(), &[]).await.is_some());
}

#[tokio::test]
async fn chaos_prune_failure_keeps_write() {
    let durable = Arc::new(FailingDurableTier::new(InMemoryDurableTier::new(), vec![3]));
    let cache = cache_with(None, Some(durable.clone() as Arc<dyn DurableTier>));

    assert_eq!(cache.write(&key(), question(1)).await, WriteOutcome::Stored);
    assert_eq!(durable.inner.count(key().as_str()).await.unwrap(), 1);
}

#[tokio::test]
async fn chaos_working_set_failure_still_writes() {
    // The first fast call is the working-set read; it fails and only the durable rows are checked.
    let fast = Arc::new(FailingFastTier::new(InMemoryFastTier::new(), vec![1]));
    let durable = Arc::new(InMemoryDurableTier::new());
    let cache = cache_with(
        Some(fast.clone() as Arc<dyn FastTier>),
        Some(durable.clone() as Arc<dyn DurableTier>),
    );

    assert_eq!(cache.write(&key(), question(1)).await, WriteOutcome::Stored);
    assert_eq!(fast.inner.get(key().as_str()).await.unwrap().map(|items| items.len()), Some(1));
    assert_eq!(durable.count(key().as_str()).await.unwrap(), 1);
}

#[tokio::test]
async fn chaos_failed_fast_set_still_blocks_paraphrase() {
    // Fast calls: write 1 is get(1), set(2); write 2 is get(3), set(4) which fails.
    let fast = Arc::new(FailingFastTier::new(InMemoryFastTier::new(), vec![4]));
    let durable = Arc::new(InMemoryDurableTier::new());
    let cache = cache_with(
        Some(fast.clone() as Arc<dyn FastTier>),
        Some(durable.clone() as Arc<dyn DurableTier>),
    );
    let circle = CachedItem::new("Calculate the area of a circle with radius 5cm", "s", 1);
    let paraphrase = CachedItem::new("Calculate the area of the circle with radius 5cm", "s", 1);

    assert_eq!(cache.write(&key(), question(1)).await, WriteOutcome::Stored);
    assert_eq!(cache.write(&key(), circle).await, WriteOutcome::Stored);
    // The fast list only holds question 1 now; the durable tier has both.
    assert_eq!(fast.inner.get(key().as_str()).await.unwrap().map(|items| items.len()), Some(1));

    assert_eq!(cache.write(&key(), paraphrase).await, WriteOutcome::NearDuplicate);
    assert_eq!(durable.count(key().as_str()).await.unwrap(), 2);
}

#[tokio::test]
async fn chaos_late_promotion_does_not_clobber_newer_write() {
    let durable = Arc::new(InMemoryDurableTier::new());
    let seeder = cache_with(None, Some(durable.clone() as Arc<dyn DurableTier>));
    assert!(seeder.write(&key(), CachedItem::new("Solve 3x+2=11 for x", "3", 1)).await.is_stored());

    let fast = Arc::new(SlowPromotionFastTier {
        inner: InMemoryFastTier::new(),
        delay: Duration::from_millis(50),
    });
    let cache = cache_with(
        Some(fast.clone() as Arc<dyn FastTier>),
        Some(durable.clone() as Arc<dyn DurableTier>),
    );

    // Cold read starts a promotion of the one durable row.
    assert!(cache.read(&key(), &[]).await.is_some());
    let circle = "Calculate the area of a circle with radius 5cm";
    assert_eq!(cache.write(&key(), CachedItem::new(circle, "s", 1)).await, WriteOutcome::Stored);
    tokio::time::sleep(Duration::from_millis(150)).await;

    let listed: Vec<String> = fast
        .inner
        .get(key().as_str())
        .await
        .unwrap()
        .unwrap()
        .into_iter()
        .map(|item| item.content)
        .collect();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0], circle);

    let paraphrase = CachedItem::new("Calculate the area of the circle with radius 5cm", "s", 1);
    assert_eq!(cache.write(&key(), paraphrase).await, WriteOutcome::NearDuplicate);
    assert_eq!(durable.count(key().as_str()).await.unwrap(), 2);
}

#[tokio::test]
async fn chaos_intermittent_failures_under_concurrency() {
    let fast = Arc::new(FailingFastTier::new(InMemoryFastTier::new(), (1..200).step_by(3).collect()));
    let durable = Arc::new(FailingDurableTier::new(InMemoryDurableTier::new(), (1..200).step_by(4).collect()));
    let config = CacheConfig { max_questions_per_key: 8, ..Default::default() };
    let cache = Arc::new(QuestionCache::new(
        config,
        Some(fast as Arc<dyn FastTier>),
        Some(durable.clone() as Arc<dyn DurableTier>),
    ));

    let mut handles = Vec::new();
    for i in 0..20 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move {
            cache.write(&key(), question(i)).await;
            cache.read(&key(), &[]).await;
            cache.supply(&key(), &[]).await;
        }));
    }
    for handle in handles {
        handle.await.expect("no task should panic");
    }

    // Some prunes were failed on purpose, so the cap is only loosely held here.
    assert!(durable.inner.count(key().as_str()).await.unwrap() <= 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn chaos_concurrent_identical_writes_store_once() {
    let durable = Arc::new(InMemoryDurableTier::new());
    let cache = Arc::new(cache_with(None, Some(durable.clone() as Arc<dyn DurableTier>)));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move { cache.write(&key(), question(7)).await }));
    }
    let mut stored = 0;
    for handle in handles {
        if handle.await.unwrap().is_stored() {
            stored += 1;
        }
    }

    assert_eq!(stored, 1);
    assert_eq!(durable.count(key().as_str()).await.unwrap(), 1);
}

// =============================================================================
// Chaos Tests - Real Redis
// =============================================================================

#[tokio::test]
#[ignore] // Requires Docker
async fn chaos_redis_killed_reads_fall_back() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let url = format!("redis://127.0.0.1:{}", redis.get_host_port_ipv4(6379));

    let fast = RedisFastTier::with_prefix(&url, Some("chaos:"), Duration::from_millis(500))
        .await
        .expect("Redis should connect");
    let durable = Arc::new(InMemoryDurableTier::new());
    let cache = cache_with(Some(Arc::new(fast)), Some(durable as Arc<dyn DurableTier>));

    assert!(cache.write(&key(), question(1)).await.is_stored());

    drop(redis);
    println!("Redis killed!");

    let hit = tokio::time::timeout(Duration::from_secs(10), cache.read(&key(), &[]))
        .await
        .expect("read should not hang on a dead Redis");
    assert_eq!(hit.map(|i| i.content), Some(question(1).content));

    let outcome = tokio::time::timeout(Duration::from_secs(10), cache.write(&key(), question(2)))
        .await
        .expect("write should not hang on a dead Redis");
    assert_eq!(outcome, WriteOutcome::Stored);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn chaos_corrupted_redis_data() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let url = format!("redis://127.0.0.1:{}", redis.get_host_port_ipv4(6379));

    let client = redis::Client::open(url.as_str()).expect("Failed to open client");
    let mut conn = client
        .get_multiplexed_async_connection()
        .await
        .expect("Failed to get connection");
    let redis_key = format!("chaos:{}", key());

    let fast = RedisFastTier::with_prefix(&url, Some("chaos:"), Duration::from_secs(2))
        .await
        .expect("Redis should connect");
    let durable = Arc::new(InMemoryDurableTier::new());
    let cache = cache_with(Some(Arc::new(fast)), Some(durable.clone() as Arc<dyn DurableTier>));
    assert!(cache.write(&key(), question(1)).await.is_stored());

    // Garbage: the fast tier errors and the durable tier serves.
    let _: () = redis::cmd("SET")
        .arg(&redis_key)
        .arg(b"{{{{not valid json at all!!!!")
        .query_async(&mut conn)
        .await
        .expect("Failed to corrupt");
    let hit = cache.read(&key(), &[]).await.expect("durable tier should serve");
    assert_eq!(hit.content, question(1).content);
    // Let the promotion attempt settle; it finds the key taken and leaves it.
    tokio::time::sleep(Duration::from_millis(200)).await;

    // A list with one bad entry: the good entry is still served from Redis.
    let partial = format!(
        "[{}, {{\"content\": 42}}]",
        serde_json::to_string(&question(2)).unwrap()
    );
    let _: () = redis::cmd("SET")
        .arg(&redis_key)
        .arg(partial)
        .query_async(&mut conn)
        .await
        .expect("Failed to set partial list");
    let hit = cache.read(&key(), &[]).await.expect("fast tier should serve");
    assert_eq!(hit.content, question(2).content);

    // Writes still go through after corruption.
    assert!(cache.write(&key(), question(3)).await.is_stored());
}
