mod config;
mod detect;
mod filter;
pub mod format;
mod kinds;
mod labels;
mod matcher;
mod model;
mod provider;
mod reconcile;
mod store;

pub use config::MapperConfig;
pub use detect::{first_mismatch, needs_update};
pub use filter::{Condition, Filter, KeyField, KeyFields, KeyForm, Predicate};
pub use kinds::{ActivityKind, RecordKind, SleepKind, ZERO_DURATION};
pub use labels::{
    apply_name_rewrites, default_activity_rules, default_training_messages,
    resolve_activity_labels, resolve_training_message, ActivityLabels, LabelRule, NameRewrite,
    RuleTarget, TrainingMessageRule,
};
pub use matcher::{find, Lookup};
pub use model::{
    DateRange, MappedRecord, NaturalKey, Properties, PropertyValue, SourceRecord, TargetRecord,
};
pub use provider::{FetchRange, JsonFileProvider, TelemetryProvider};
pub use reconcile::{
    sync_records, Action, LookupFailurePolicy, ReconcileOutcome, Reconciler, RecordFailure,
    SyncReport, SYNC_REPORT_CONTRACT_VERSION,
};
pub use store::{DocumentStore, DryRunStore, MemoryStore, PlannedMutation, StoreError};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("lookup failed: {0}")]
    Lookup(StoreError),
    #[error("mutation failed: {0}")]
    Mutation(StoreError),
    #[error("provider error: {0}")]
    Provider(String),
}
