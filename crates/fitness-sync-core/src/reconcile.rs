use serde::{Deserialize, Serialize};

use crate::detect::first_mismatch;
use crate::kinds::RecordKind;
use crate::matcher::{find, Lookup};
use crate::model::{NaturalKey, SourceRecord};
use crate::store::DocumentStore;
use crate::SyncError;

pub const SYNC_REPORT_CONTRACT_VERSION: &str = "sync_report.v1";
const UNCHANGED: &str = "unchanged";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Created,
    Updated,
    Skipped,
}

impl Action {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Skipped => "skipped",
        }
    }
}

/// What to do when the existence lookup itself fails.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum LookupFailurePolicy {
    /// Proceed as if no record exists. A record that does exist is then
    /// duplicated.
    #[default]
    TreatAsAbsent,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub action: Action,
    pub kind: String,
    pub key: NaturalKey,
    pub target_id: Option<String>,
    /// `unchanged`, a suppression reason, or the first differing field.
    pub reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Reconciler<K> {
    kind: K,
    collection: String,
    lookup_failure_policy: LookupFailurePolicy,
}

impl<K: RecordKind> Reconciler<K> {
    pub fn new(kind: K, collection: impl Into<String>) -> Self {
        Self {
            kind,
            collection: collection.into(),
            lookup_failure_policy: LookupFailurePolicy::default(),
        }
    }

    #[must_use]
    pub fn with_lookup_failure_policy(mut self, policy: LookupFailurePolicy) -> Self {
        self.lookup_failure_policy = policy;
        self
    }

    pub fn kind(&self) -> &K {
        &self.kind
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Decides create, update or skip for one record and issues at most one
    /// mutation.
    ///
    /// # Errors
    /// Returns [`SyncError::Lookup`] when the lookup fails under
    /// [`LookupFailurePolicy::Fail`] and [`SyncError::Mutation`] when the
    /// store rejects the create or update.
    pub fn reconcile<S: DocumentStore + ?Sized>(
        &self,
        source: &SourceRecord,
        store: &mut S,
    ) -> Result<ReconcileOutcome, SyncError> {
        let mapped = self.kind.map(source);
        let kind = self.kind.name();

        if let Some(reason) = self.kind.suppression(source) {
            tracing::info!(kind, key = %mapped.key, reason, "suppressed record");
            return Ok(self.outcome(Action::Skipped, mapped.key, None, Some(reason)));
        }

        let existing = match find(store, &self.collection, &self.kind.key_fields(), &mapped.key) {
            Lookup::Found(record) => Some(record),
            Lookup::Absent => None,
            Lookup::Degraded(err) => match self.lookup_failure_policy {
                LookupFailurePolicy::Fail => return Err(SyncError::Lookup(err)),
                LookupFailurePolicy::TreatAsAbsent => {
                    tracing::warn!(
                        kind,
                        key = %mapped.key,
                        error = %err,
                        "lookup failed; creating anyway, which may duplicate an existing record"
                    );
                    None
                }
            },
        };

        let Some(existing) = existing else {
            let created = store
                .create(&self.collection, &mapped.create_properties())
                .map_err(SyncError::Mutation)?;
            tracing::info!(kind, key = %mapped.key, target_id = %created.id, action = "created");
            return Ok(self.outcome(Action::Created, mapped.key, Some(created.id), None));
        };

        match first_mismatch(&existing.properties, &mapped.tracked) {
            Some(field) => {
                let field = field.to_string();
                let updated = store
                    .update(&existing.id, &mapped.tracked)
                    .map_err(SyncError::Mutation)?;
                tracing::info!(
                    kind,
                    key = %mapped.key,
                    target_id = %updated.id,
                    field = %field,
                    action = "updated"
                );
                Ok(self.outcome(Action::Updated, mapped.key, Some(updated.id), Some(&field)))
            }
            None => {
                tracing::debug!(
                    kind,
                    key = %mapped.key,
                    target_id = %existing.id,
                    action = "skipped"
                );
                Ok(self.outcome(Action::Skipped, mapped.key, Some(existing.id), Some(UNCHANGED)))
            }
        }
    }

    fn outcome(
        &self,
        action: Action,
        key: NaturalKey,
        target_id: Option<String>,
        reason: Option<&str>,
    ) -> ReconcileOutcome {
        ReconcileOutcome {
            action,
            kind: self.kind.name().to_string(),
            key,
            target_id,
            reason: reason.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordFailure {
    pub index: usize,
    pub key: NaturalKey,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncReport {
    pub contract_version: String,
    pub kind: String,
    pub collection: String,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub outcomes: Vec<ReconcileOutcome>,
    pub failures: Vec<RecordFailure>,
}

impl SyncReport {
    #[must_use]
    pub fn new(kind: &str, collection: &str) -> Self {
        Self {
            contract_version: SYNC_REPORT_CONTRACT_VERSION.to_string(),
            kind: kind.to_string(),
            collection: collection.to_string(),
            created: 0,
            updated: 0,
            skipped: 0,
            failed: 0,
            outcomes: Vec::new(),
            failures: Vec::new(),
        }
    }

    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    fn record(&mut self, outcome: ReconcileOutcome) {
        match outcome.action {
            Action::Created => self.created += 1,
            Action::Updated => self.updated += 1,
            Action::Skipped => self.skipped += 1,
        }
        self.outcomes.push(outcome);
    }
}

/// Reconciles `records` in order. A failing record is counted and the batch
/// moves on.
pub fn sync_records<K: RecordKind, S: DocumentStore + ?Sized>(
    reconciler: &Reconciler<K>,
    records: &[SourceRecord],
    store: &mut S,
) -> SyncReport {
    let mut report = SyncReport::new(reconciler.kind().name(), reconciler.collection());

    for (index, source) in records.iter().enumerate() {
        match reconciler.reconcile(source, store) {
            Ok(outcome) => report.record(outcome),
            Err(err) => {
                let key = reconciler.kind().natural_key(source);
                tracing::warn!(
                    kind = %report.kind,
                    key = %key,
                    index,
                    error = %err,
                    "record failed"
                );
                report.failed += 1;
                report.failures.push(RecordFailure {
                    index,
                    key,
                    error: err.to_string(),
                });
            }
        }
    }

    tracing::info!(
        kind = %report.kind,
        created = report.created,
        updated = report.updated,
        skipped = report.skipped,
        failed = report.failed,
        "sync finished"
    );
    report
}
