use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::bundle::{BallotContent, BundleState};
use crate::domain::result::{BundleProgress, ResultAggregate, ResultState};
use crate::event_sourcing::core::Aggregate;
use super::aggregation::ResultTallies;

// ============================================================================
// Read Model - Query side of results and bundles
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleSnapshot {
    pub bundle_id: Uuid,
    pub number: u32,
    pub list_id: Option<Uuid>,
    pub created_by: String,
    pub state: BundleState,
    pub ballots: BTreeMap<u32, BallotContent>,
    pub sample_ballot_numbers: Vec<u32>,
    /// Sequence number of the last applied bundle event
    pub checkpoint: i64,
}

impl BundleSnapshot {
    pub fn new(bundle_id: Uuid, number: u32, created_by: String, list_id: Option<Uuid>) -> Self {
        Self {
            bundle_id,
            number,
            list_id,
            created_by,
            state: BundleState::InProcess,
            ballots: BTreeMap::new(),
            sample_ballot_numbers: Vec::new(),
            checkpoint: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultSnapshot {
    /// Result state, reduced the same way the write side does
    pub result: ResultAggregate,
    pub bundles: BTreeMap<Uuid, BundleSnapshot>,
    /// Bundles with an issued number, created or not
    pub known_bundles: BTreeSet<Uuid>,
    pub tallies: ResultTallies,
    /// Sequence number of the last applied result event
    pub checkpoint: i64,
}

impl ResultSnapshot {
    pub fn new(result_id: Uuid) -> Self {
        Self {
            result: ResultAggregate::empty(result_id),
            bundles: BTreeMap::new(),
            known_bundles: BTreeSet::new(),
            tallies: ResultTallies::default(),
            checkpoint: 0,
        }
    }

    pub fn result_id(&self) -> Uuid {
        self.result.id
    }

    pub fn state(&self) -> ResultState {
        self.result.state
    }

    pub fn published(&self) -> bool {
        self.result.published
    }

    fn count(&self, predicate: impl Fn(BundleState) -> bool) -> u32 {
        self.bundles.values().filter(|b| predicate(b.state)).count() as u32
    }

    pub fn count_of_bundles_not_reviewed_or_deleted(&self) -> u32 {
        self.count(|state| !state.is_done())
    }

    pub fn all_bundles_reviewed_or_deleted(&self) -> bool {
        self.count_of_bundles_not_reviewed_or_deleted() == 0
    }

    /// Bundles waiting for review
    pub fn submitted_bundles(&self) -> u32 {
        self.count(|state| state == BundleState::ReadyForReview)
    }

    pub fn reviewed_bundles(&self) -> u32 {
        self.count(|state| state == BundleState::Reviewed)
    }

    pub fn deleted_bundles(&self) -> u32 {
        self.count(|state| state == BundleState::Deleted)
    }

    pub fn progress(&self) -> BundleProgress {
        BundleProgress {
            not_reviewed_or_deleted: self.count_of_bundles_not_reviewed_or_deleted(),
            reviewed: self.reviewed_bundles(),
            deleted: self.deleted_bundles(),
        }
    }
}

/// In-memory read model, rebuildable from the event log at any time
#[derive(Default)]
pub struct ReadModel {
    results: RwLock<HashMap<Uuid, ResultSnapshot>>,
}

impl ReadModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn result(&self, result_id: Uuid) -> Option<ResultSnapshot> {
        self.results.read().await.get(&result_id).cloned()
    }

    pub async fn bundle(&self, result_id: Uuid, bundle_id: Uuid) -> Option<BundleSnapshot> {
        self.results
            .read()
            .await
            .get(&result_id)
            .and_then(|r| r.bundles.get(&bundle_id))
            .cloned()
    }

    pub async fn tallies(&self, result_id: Uuid) -> Option<ResultTallies> {
        self.results.read().await.get(&result_id).map(|r| r.tallies.clone())
    }

    /// Review progress of a result; a result not seen yet has no bundles
    pub async fn bundle_progress(&self, result_id: Uuid) -> BundleProgress {
        self.results
            .read()
            .await
            .get(&result_id)
            .map(ResultSnapshot::progress)
            .unwrap_or_default()
    }

    pub(crate) async fn snapshot_or_new(&self, result_id: Uuid) -> ResultSnapshot {
        self.result(result_id)
            .await
            .unwrap_or_else(|| ResultSnapshot::new(result_id))
    }

    pub(crate) async fn store(&self, snapshot: ResultSnapshot) {
        self.results.write().await.insert(snapshot.result_id(), snapshot);
    }

    pub(crate) async fn remove(&self, result_id: Uuid) -> Option<ResultSnapshot> {
        self.results.write().await.remove(&result_id)
    }
}
