//! Fitness domain payloads cached by the catalog and domain caches.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{CacheKey, Timestamp};

// ============================================================================
// EXERCISE CATALOG
// ============================================================================

/// A catalog exercise as served by the remote API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exercise {
    pub id: String,
    pub name: String,
    pub muscle_group: String,
    pub equipment: Option<String>,
    pub instructions: Vec<String>,
    pub image_url: Option<String>,
}

impl Exercise {
    /// Image cache key for this exercise's illustration, if it has one.
    pub fn image_key(&self) -> Option<CacheKey> {
        self.image_url.as_deref().map(CacheKey::image)
    }
}

/// Lightweight catalog row used by pickers and search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExerciseSummary {
    pub id: String,
    pub name: String,
    pub muscle_group: String,
}

impl From<&Exercise> for ExerciseSummary {
    fn from(exercise: &Exercise) -> Self {
        Self {
            id: exercise.id.clone(),
            name: exercise.name.clone(),
            muscle_group: exercise.muscle_group.clone(),
        }
    }
}

// ============================================================================
// RECORDS & SNAPSHOT
// ============================================================================

/// One logged set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiftRecord {
    pub exercise_id: String,
    pub exercise_name: String,
    pub weight_kg: f64,
    pub reps: u32,
    pub performed_on: NaiveDate,
}

impl LiftRecord {
    pub fn volume_kg(&self) -> f64 {
        self.weight_kg * f64::from(self.reps)
    }

    /// Ordering used to pick a personal best: heavier wins, then more reps,
    /// then the earlier date (the first time the best was achieved).
    fn best_cmp(&self, other: &Self) -> Ordering {
        self.weight_kg
            .total_cmp(&other.weight_kg)
            .then(self.reps.cmp(&other.reps))
            .then(other.performed_on.cmp(&self.performed_on))
    }
}

/// Aggregates over all records in a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingStats {
    pub workout_days: u32,
    pub total_sets: u32,
    pub total_reps: u64,
    pub total_volume_kg: f64,
}

/// Records, derived bests and stats captured together.
///
/// Replaced as a whole; readers never see a partially updated snapshot.
/// `captured_at` is informational and never drives expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainSnapshot {
    pub records: Vec<LiftRecord>,
    pub best_records: Vec<LiftRecord>,
    pub stats: TrainingStats,
    pub captured_at: Timestamp,
}

impl DomainSnapshot {
    /// Build a snapshot, deriving best records and aggregate stats from `records`.
    ///
    /// Best records are ordered by exercise id.
    pub fn capture(records: Vec<LiftRecord>, captured_at: Timestamp) -> Self {
        let mut best: BTreeMap<&str, &LiftRecord> = BTreeMap::new();
        let mut days = BTreeSet::new();
        let mut stats = TrainingStats::default();

        for record in &records {
            days.insert(record.performed_on);
            stats.total_sets += 1;
            stats.total_reps += u64::from(record.reps);
            stats.total_volume_kg += record.volume_kg();

            best.entry(record.exercise_id.as_str())
                .and_modify(|current| {
                    if record.best_cmp(*current) == Ordering::Greater {
                        *current = record;
                    }
                })
                .or_insert(record);
        }
        stats.workout_days = days.len() as u32;

        let best_records = best.into_values().cloned().collect();
        Self {
            records,
            best_records,
            stats,
            captured_at,
        }
    }

    /// Best record for one exercise.
    pub fn best_for(&self, exercise_id: &str) -> Option<&LiftRecord> {
        self.best_records
            .iter()
            .find(|r| r.exercise_id == exercise_id)
    }
}
