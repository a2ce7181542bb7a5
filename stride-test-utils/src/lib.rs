//! Stride Test Utilities
//!
//! Shared test infrastructure for the Stride workspace:
//! - Counting and failing doubles for the persisted stores and the network
//! - A manually driven clock for TTL tests
//! - Proptest generators for keys and payloads
//! - Fixtures for images, exercises and lift records

pub use stride_core::{
    CacheKey, CacheSettings, CachedImageEntry, Clock, DomainSnapshot, Exercise, ExerciseSummary,
    FetchError, LiftRecord, LoadFailure, PipelineError, RawContent, Rgb, StoreError, StrideError,
    StrideResult, Timestamp,
};
pub use stride_storage::{
    ImageFetcher, InMemoryBlobStore, InMemoryKvStore, PersistentBlobStore, PersistentKvStore,
};

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{TimeZone, Utc};

// ============================================================================
// CLOCK
// ============================================================================

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// A clock parked at 2024-03-04T12:00:00Z.
    pub fn fixed() -> Self {
        Self::new(fixtures::epoch())
    }

    pub fn advance(&self, by: Duration) {
        let delta = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::MAX);
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now = now.checked_add_signed(delta).unwrap_or(*now);
    }

    pub fn set(&self, to: Timestamp) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ============================================================================
// NETWORK DOUBLES
// ============================================================================

/// Fetcher serving canned responses per locator and counting every call.
///
/// Locators without a canned response fail with a transport error.
#[derive(Debug, Default)]
pub struct CountingFetcher {
    responses: Mutex<HashMap<String, Result<Bytes, FetchError>>>,
    calls: AtomicUsize,
    latency: Duration,
}

impl CountingFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `bytes` for `locator`.
    pub fn with_response(self, locator: &str, bytes: impl Into<Bytes>) -> Self {
        self.respond(locator, Ok(bytes.into()));
        self
    }

    /// Delay every response by `latency`, so concurrent loads overlap.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail every fetch of `locator` with `error`.
    pub fn with_failure(self, locator: &str, error: FetchError) -> Self {
        self.respond(locator, Err(error));
        self
    }

    pub fn respond(&self, locator: &str, response: Result<Bytes, FetchError>) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(locator.to_string(), response);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageFetcher for CountingFetcher {
    async fn fetch_bytes(&self, locator: &str) -> Result<Bytes, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(locator)
            .cloned()
            .unwrap_or_else(|| {
                Err(FetchError::Transport {
                    reason: format!("no route to {}", locator),
                })
            })
    }
}

// ============================================================================
// STORE DOUBLES
// ============================================================================

/// Per-operation call counters shared by the counting stores.
#[derive(Debug, Default)]
pub struct CallCounts {
    gets: AtomicUsize,
    puts: AtomicUsize,
    deletes: AtomicUsize,
}

impl CallCounts {
    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    fn record(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

/// In-memory blob store that counts calls.
#[derive(Debug, Default)]
pub struct CountingBlobStore {
    inner: InMemoryBlobStore,
    counts: CallCounts,
}

impl CountingBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counts(&self) -> &CallCounts {
        &self.counts
    }

    pub fn inner(&self) -> &InMemoryBlobStore {
        &self.inner
    }
}

#[async_trait]
impl PersistentBlobStore for CountingBlobStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>, StoreError> {
        CallCounts::record(&self.counts.gets);
        self.inner.get(key).await
    }

    async fn put(&self, key: &CacheKey, bytes: Bytes) -> Result<(), StoreError> {
        CallCounts::record(&self.counts.puts);
        self.inner.put(key, bytes).await
    }

    async fn delete(&self, key: &CacheKey) -> Result<(), StoreError> {
        CallCounts::record(&self.counts.deletes);
        self.inner.delete(key).await
    }

    async fn clear(&self) -> Result<u64, StoreError> {
        self.inner.clear().await
    }
}

/// In-memory key-value store that counts calls.
#[derive(Debug, Default)]
pub struct CountingKvStore {
    inner: InMemoryKvStore,
    counts: CallCounts,
}

impl CountingKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counts(&self) -> &CallCounts {
        &self.counts
    }

    pub fn inner(&self) -> &InMemoryKvStore {
        &self.inner
    }
}

#[async_trait]
impl PersistentKvStore for CountingKvStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<RawContent>, StoreError> {
        CallCounts::record(&self.counts.gets);
        self.inner.get(key).await
    }

    async fn put(&self, key: &CacheKey, value: RawContent) -> Result<(), StoreError> {
        CallCounts::record(&self.counts.puts);
        self.inner.put(key, value).await
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool, StoreError> {
        CallCounts::record(&self.counts.deletes);
        self.inner.delete(key).await
    }
}

/// Blob store whose every operation fails.
#[derive(Debug, Default)]
pub struct FailingBlobStore;

#[async_trait]
impl PersistentBlobStore for FailingBlobStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>, StoreError> {
        Err(StoreError::ReadFailed {
            key: key.clone(),
            reason: "disk unavailable".to_string(),
        })
    }

    async fn put(&self, key: &CacheKey, _bytes: Bytes) -> Result<(), StoreError> {
        Err(StoreError::PersistWriteFailed {
            key: key.clone(),
            reason: "disk unavailable".to_string(),
        })
    }

    async fn delete(&self, key: &CacheKey) -> Result<(), StoreError> {
        Err(StoreError::PersistWriteFailed {
            key: key.clone(),
            reason: "disk unavailable".to_string(),
        })
    }

    async fn clear(&self) -> Result<u64, StoreError> {
        Err(StoreError::Backend {
            reason: "disk unavailable".to_string(),
        })
    }
}

/// Key-value store whose every operation fails.
#[derive(Debug, Default)]
pub struct FailingKvStore;

#[async_trait]
impl PersistentKvStore for FailingKvStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<RawContent>, StoreError> {
        Err(StoreError::ReadFailed {
            key: key.clone(),
            reason: "store unavailable".to_string(),
        })
    }

    async fn put(&self, key: &CacheKey, _value: RawContent) -> Result<(), StoreError> {
        Err(StoreError::PersistWriteFailed {
            key: key.clone(),
            reason: "store unavailable".to_string(),
        })
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool, StoreError> {
        Err(StoreError::PersistWriteFailed {
            key: key.clone(),
            reason: "store unavailable".to_string(),
        })
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for keys and cached payloads.

    use super::*;
    use proptest::prelude::*;
    use uuid::Uuid;

    /// Generate an image URL.
    pub fn arb_image_url() -> impl Strategy<Value = String> {
        ("[a-z]{1,12}", "[a-z0-9_-]{1,24}")
            .prop_map(|(host, path)| format!("https://{}.example.com/{}.png", host, path))
    }

    /// Generate a key from any family.
    pub fn arb_cache_key() -> impl Strategy<Value = CacheKey> {
        prop_oneof![
            arb_image_url().prop_map(|url| CacheKey::image(&url)),
            (any::<[u8; 16]>(), 2000i32..2100, 1u32..54).prop_map(|(id, year, week)| {
                CacheKey::weekly_weights(Uuid::from_bytes(id), year, week)
            }),
            Just(CacheKey::exercise_catalog()),
            Just(CacheKey::light_exercise_catalog()),
            Just(CacheKey::domain_snapshot()),
            Just(CacheKey::reference_data()),
        ]
    }

    /// Generate a catalog exercise.
    pub fn arb_exercise() -> impl Strategy<Value = Exercise> {
        (
            "[a-z]{3,10}",
            "[A-Z][a-z]{2,12}",
            prop_oneof![Just("legs"), Just("chest"), Just("back"), Just("arms")],
            proptest::option::of("[a-z]{3,8}"),
            proptest::collection::vec("[A-Za-z ]{1,30}", 0..4),
            proptest::option::of(arb_image_url()),
        )
            .prop_map(|(id, name, group, equipment, instructions, image_url)| Exercise {
                id,
                name,
                muscle_group: group.to_string(),
                equipment,
                instructions,
                image_url,
            })
    }

    /// Generate a logged set within realistic bounds.
    pub fn arb_lift_record() -> impl Strategy<Value = LiftRecord> {
        (
            prop_oneof![Just("squat"), Just("bench"), Just("deadlift")],
            0u32..4000,
            1u32..20,
            0i64..365,
        )
            .prop_map(|(id, decigrams, reps, day)| LiftRecord {
                exercise_id: id.to_string(),
                exercise_name: id.to_uppercase(),
                weight_kg: f64::from(decigrams) / 10.0,
                reps,
                performed_on: fixtures::epoch().date_naive() + chrono::Duration::days(day),
            })
    }

    /// Generate a list of exercises of bounded size.
    pub fn arb_catalog(max: usize) -> impl Strategy<Value = Vec<Exercise>> {
        proptest::collection::vec(arb_exercise(), 0..max)
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built payloads for common scenarios.

    use super::*;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    /// Fixed reference instant used by fixtures and [`ManualClock::fixed`].
    pub fn epoch() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 3, 4, 12, 0, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }

    fn encode(image: &RgbaImage) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        image
            .write_to(&mut cursor, ImageFormat::Png)
            .expect("fixture PNG should encode");
        cursor.into_inner()
    }

    /// PNG of a single opaque color.
    pub fn solid_png(width: u32, height: u32, color: Rgb) -> Vec<u8> {
        encode(&RgbaImage::from_pixel(
            width,
            height,
            Rgba([color.r, color.g, color.b, 255]),
        ))
    }

    /// PNG whose left three quarters are `major` and the rest `minor`.
    pub fn two_tone_png(width: u32, height: u32, major: Rgb, minor: Rgb) -> Vec<u8> {
        let split = width * 3 / 4;
        encode(&RgbaImage::from_fn(width, height, |x, _| {
            let c = if x < split { major } else { minor };
            Rgba([c.r, c.g, c.b, 255])
        }))
    }

    pub fn squat() -> Exercise {
        Exercise {
            id: "squat".to_string(),
            name: "Back Squat".to_string(),
            muscle_group: "legs".to_string(),
            equipment: Some("barbell".to_string()),
            instructions: vec![
                "Brace and unrack".to_string(),
                "Sit between the hips".to_string(),
                "Drive up".to_string(),
            ],
            image_url: Some("https://cdn.example.com/exercises/squat.png".to_string()),
        }
    }

    pub fn bench_press() -> Exercise {
        Exercise {
            id: "bench".to_string(),
            name: "Bench Press".to_string(),
            muscle_group: "chest".to_string(),
            equipment: Some("barbell".to_string()),
            instructions: vec!["Retract shoulders".to_string(), "Press".to_string()],
            image_url: Some("https://cdn.example.com/exercises/bench.png".to_string()),
        }
    }

    pub fn catalog() -> Vec<Exercise> {
        vec![squat(), bench_press()]
    }

    pub fn lift(exercise: &Exercise, weight_kg: f64, reps: u32, days_after_epoch: i64) -> LiftRecord {
        LiftRecord {
            exercise_id: exercise.id.clone(),
            exercise_name: exercise.name.clone(),
            weight_kg,
            reps,
            performed_on: epoch().date_naive() + chrono::Duration::days(days_after_epoch),
        }
    }

    /// A week of squat and bench sessions.
    pub fn training_week() -> DomainSnapshot {
        let squat = squat();
        let bench = bench_press();
        DomainSnapshot::capture(
            vec![
                lift(&squat, 100.0, 5, 0),
                lift(&bench, 70.0, 5, 0),
                lift(&squat, 105.0, 3, 2),
                lift(&bench, 72.5, 4, 4),
            ],
            epoch(),
        )
    }

    pub fn light_catalog() -> Vec<ExerciseSummary> {
        catalog().iter().map(ExerciseSummary::from).collect()
    }

    /// Settings with small bounds, rooted nowhere (in-memory stores only).
    pub fn small_settings() -> CacheSettings {
        CacheSettings::new()
            .with_memory_limits(4, 4 * 64 * 64 * 4)
            .with_image_target(64, 64)
            .with_fetch_timeout(Duration::from_secs(2))
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for Stride-specific outcomes.

    use super::*;

    /// Assert that a result is a `LoadFailed` error.
    #[track_caller]
    pub fn assert_load_failed<T: std::fmt::Debug>(result: &StrideResult<T>) {
        match result {
            Err(StrideError::LoadFailed { .. }) => {}
            other => panic!("Expected LoadFailed, got: {:?}", other),
        }
    }

    /// Assert that a result is a `LoadFailed` caused by the network.
    #[track_caller]
    pub fn assert_fetch_failed<T: std::fmt::Debug>(result: &StrideResult<T>) {
        match result {
            Err(StrideError::LoadFailed {
                cause: LoadFailure::Fetch(_),
                ..
            }) => {}
            other => panic!("Expected fetch LoadFailed, got: {:?}", other),
        }
    }

    /// Assert that a result is a `LoadFailed` caused by undecodable bytes.
    #[track_caller]
    pub fn assert_decode_failed<T: std::fmt::Debug>(result: &StrideResult<T>) {
        match result {
            Err(StrideError::LoadFailed {
                cause: LoadFailure::Pipeline(PipelineError::DecodeFailed { .. }),
                ..
            }) => {}
            other => panic!("Expected decode LoadFailed, got: {:?}", other),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_manual_clock_advances_only_on_demand() {
        let clock = ManualClock::fixed();
        let start = clock.now();
        assert_eq!(clock.now(), start);

        clock.advance(Duration::from_secs(90));
        assert_eq!(clock.now() - start, chrono::Duration::seconds(90));
    }

    #[test]
    fn test_fixture_pngs_decode() {
        let pipeline = stride_storage::DerivedValuePipeline::new(8, 8, 2);
        let solid = pipeline
            .decode(&fixtures::solid_png(8, 8, Rgb::new(1, 2, 3)))
            .expect("solid fixture should decode");
        assert_eq!(solid.dimensions(), (8, 8));

        let two_tone = fixtures::two_tone_png(40, 10, Rgb::new(250, 0, 0), Rgb::new(0, 0, 250));
        let decoded = pipeline.decode(&two_tone).expect("two-tone fixture should decode");
        assert_eq!(
            pipeline.extract_dominant_colors(&decoded),
            vec![Rgb::new(250, 0, 0), Rgb::new(0, 0, 250)]
        );
    }

    #[test]
    fn test_training_week_fixture() {
        let snapshot = fixtures::training_week();
        assert_eq!(snapshot.records.len(), 4);
        assert_eq!(snapshot.stats.workout_days, 3);
        let best = snapshot.best_for("squat").expect("squat best should exist");
        assert_eq!(best.weight_kg, 105.0);
    }

    #[tokio::test]
    async fn test_counting_fetcher_counts_and_fails_unknown() {
        let fetcher = CountingFetcher::new().with_response("a", Bytes::from_static(b"ok"));

        assert_eq!(
            fetcher.fetch_bytes("a").await.expect("fetch should succeed"),
            Bytes::from_static(b"ok")
        );
        assert!(matches!(
            fetcher.fetch_bytes("b").await,
            Err(FetchError::Transport { .. })
        ));
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_counting_kv_store_counts() {
        let store = CountingKvStore::new();
        let key = CacheKey::domain_snapshot();
        store.put(&key, b"1".to_vec()).await.expect("put should succeed");
        let _ = store.get(&key).await;
        let _ = store.get(&key).await;

        assert_eq!(store.counts().puts(), 1);
        assert_eq!(store.counts().gets(), 2);
        assert_eq!(store.counts().deletes(), 0);
    }

    proptest! {
        /// Property: every generated key carries a family prefix.
        #[test]
        fn prop_generated_keys_keep_family_prefix(key in generators::arb_cache_key()) {
            let raw = key.as_str();
            prop_assert!(
                ["img:", "weights:", "catalog:", "domain:"]
                    .iter()
                    .any(|prefix| raw.starts_with(prefix))
            );
        }

        /// Property: generated records have positive reps.
        #[test]
        fn prop_generated_records_are_valid(record in generators::arb_lift_record()) {
            prop_assert!(record.reps > 0);
            prop_assert!(record.weight_kg >= 0.0);
        }
    }
}
