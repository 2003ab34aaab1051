use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::filter::Filter;
use crate::model::{Properties, TargetRecord};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum StoreError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("store rejected request with status {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Remote document store seen by the reconciler.
///
/// `update` patches: properties not named in the call keep their stored
/// values.
pub trait DocumentStore {
    #[allow(clippy::missing_errors_doc)]
    fn query(&mut self, collection: &str, filter: &Filter) -> Result<Vec<TargetRecord>, StoreError>;

    #[allow(clippy::missing_errors_doc)]
    fn create(
        &mut self,
        collection: &str,
        properties: &Properties,
    ) -> Result<TargetRecord, StoreError>;

    #[allow(clippy::missing_errors_doc)]
    fn update(&mut self, id: &str, properties: &Properties) -> Result<TargetRecord, StoreError>;
}

impl<S: DocumentStore + ?Sized> DocumentStore for &mut S {
    fn query(
        &mut self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Vec<TargetRecord>, StoreError> {
        (**self).query(collection, filter)
    }

    fn create(
        &mut self,
        collection: &str,
        properties: &Properties,
    ) -> Result<TargetRecord, StoreError> {
        (**self).create(collection, properties)
    }

    fn update(&mut self, id: &str, properties: &Properties) -> Result<TargetRecord, StoreError> {
        (**self).update(id, properties)
    }
}

/// In-process store that evaluates filters locally.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Vec<(String, TargetRecord)>,
    next_id: u64,
    id_prefix: Option<&'static str>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids become `<prefix>-<n>` instead of `mem-<n>`.
    #[must_use]
    pub fn with_id_prefix(prefix: &'static str) -> Self {
        Self {
            id_prefix: Some(prefix),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn records(&self, collection: &str) -> Vec<&TargetRecord> {
        self.entries
            .iter()
            .filter(|(owner, _)| owner == collection)
            .map(|(_, record)| record)
            .collect()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&TargetRecord> {
        self.entries
            .iter()
            .map(|(_, record)| record)
            .find(|record| record.id == id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Overwrites a stored record wholesale, bypassing patch semantics.
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] when no record has `id`.
    pub fn replace(&mut self, id: &str, properties: Properties) -> Result<(), StoreError> {
        let record = self
            .entries
            .iter_mut()
            .map(|(_, record)| record)
            .find(|record| record.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        record.properties = properties;
        Ok(())
    }
}

impl DocumentStore for MemoryStore {
    fn query(
        &mut self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Vec<TargetRecord>, StoreError> {
        Ok(self
            .records(collection)
            .into_iter()
            .filter(|record| filter.matches(&record.properties))
            .cloned()
            .collect())
    }

    fn create(
        &mut self,
        collection: &str,
        properties: &Properties,
    ) -> Result<TargetRecord, StoreError> {
        self.next_id += 1;
        let record = TargetRecord {
            id: format!("{}-{}", self.id_prefix.unwrap_or("mem"), self.next_id),
            properties: properties.clone(),
        };
        self.entries.push((collection.to_string(), record.clone()));
        Ok(record)
    }

    fn update(&mut self, id: &str, properties: &Properties) -> Result<TargetRecord, StoreError> {
        let record = self
            .entries
            .iter_mut()
            .map(|(_, record)| record)
            .find(|record| record.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        record.properties.merge(properties);
        Ok(record.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "mutation", rename_all = "snake_case")]
pub enum PlannedMutation {
    Create {
        collection: String,
        properties: Properties,
    },
    Update {
        id: String,
        properties: Properties,
    },
}

/// Reads through to `inner` and records mutations instead of applying them.
///
/// Planned creates and updates land in an overlay that later queries see, so
/// a batch repeating a key previews the same actions a live run takes.
#[derive(Debug)]
pub struct DryRunStore<S> {
    inner: S,
    planned: Vec<PlannedMutation>,
    created: MemoryStore,
    patches: BTreeMap<String, Properties>,
}

impl<S: DocumentStore> DryRunStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            planned: Vec::new(),
            created: MemoryStore::with_id_prefix("dry-run"),
            patches: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn planned(&self) -> &[PlannedMutation] {
        &self.planned
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: DocumentStore> DocumentStore for DryRunStore<S> {
    fn query(
        &mut self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Vec<TargetRecord>, StoreError> {
        let mut records = Vec::new();
        for mut record in self.inner.query(collection, filter)? {
            if let Some(patch) = self.patches.get(&record.id) {
                record.properties.merge(patch);
                if !filter.matches(&record.properties) {
                    continue;
                }
            }
            records.push(record);
        }
        records.extend(self.created.query(collection, filter)?);
        Ok(records)
    }

    fn create(
        &mut self,
        collection: &str,
        properties: &Properties,
    ) -> Result<TargetRecord, StoreError> {
        self.planned.push(PlannedMutation::Create {
            collection: collection.to_string(),
            properties: properties.clone(),
        });
        self.created.create(collection, properties)
    }

    fn update(&mut self, id: &str, properties: &Properties) -> Result<TargetRecord, StoreError> {
        self.planned.push(PlannedMutation::Update {
            id: id.to_string(),
            properties: properties.clone(),
        });
        if self.created.get(id).is_some() {
            return self.created.update(id, properties);
        }

        let patch = self.patches.entry(id.to_string()).or_default();
        patch.merge(properties);
        Ok(TargetRecord {
            id: id.to_string(),
            properties: patch.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{KeyField, KeyFields, KeyForm};
    use crate::model::{DateRange, NaturalKey, PropertyValue};

    fn must<T>(result: Result<T, StoreError>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("test failure: {err}"),
        }
    }

    const FIELDS: KeyFields = KeyFields {
        date: "Long Date",
        category: KeyField {
            property: "Category",
            form: KeyForm::Select,
        },
        discriminator: KeyField {
            property: "Sleep Type",
            form: KeyForm::Select,
        },
    };

    fn sleep_properties(kind: &str) -> Properties {
        Properties::new()
            .with("Long Date", PropertyValue::Date(DateRange::day("2024-01-15")))
            .with("Category", PropertyValue::Select("Sleep".to_string()))
            .with("Sleep Type", PropertyValue::Select(kind.to_string()))
    }

    fn key(kind: &str) -> NaturalKey {
        NaturalKey {
            date: "2024-01-15".to_string(),
            category: "Sleep".to_string(),
            discriminator: kind.to_string(),
        }
    }

    #[test]
    fn memory_store_filters_by_collection_and_key() {
        let mut store = MemoryStore::new();
        let _ = must(store.create("sleep", &sleep_properties("Main Sleep")));
        let _ = must(store.create("sleep", &sleep_properties("Nap")));
        let _ = must(store.create("other", &sleep_properties("Nap")));

        let naps = must(store.query("sleep", &Filter::for_key(&FIELDS, &key("Nap"))));
        assert_eq!(naps.len(), 1);
        assert_eq!(naps[0].properties.label("Sleep Type"), Some("Nap"));
    }

    #[test]
    fn memory_update_patches_named_properties_only() {
        let mut store = MemoryStore::new();
        let created = must(store.create("sleep", &sleep_properties("Main Sleep")));
        let patch = Properties::new().with("Resting HR", PropertyValue::Number(52.0));
        let updated = must(store.update(&created.id, &patch));

        assert_eq!(updated.properties.len(), 4);
        assert_eq!(updated.properties.label("Sleep Type"), Some("Main Sleep"));
        assert!(matches!(
            store.update("missing", &patch),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn dry_run_never_reaches_inner_store() {
        let mut dry_run = DryRunStore::new(MemoryStore::new());
        let created = must(dry_run.create("sleep", &sleep_properties("Nap")));
        let _ = must(dry_run.update(&created.id, &Properties::new()));

        assert_eq!(dry_run.planned().len(), 2);
        assert!(created.id.starts_with("dry-run-"));
        assert!(dry_run.into_inner().is_empty());
    }

    #[test]
    fn dry_run_queries_see_planned_mutations() {
        let mut inner = MemoryStore::new();
        let stored = must(inner.create("sleep", &sleep_properties("Main Sleep")));

        let mut dry_run = DryRunStore::new(&mut inner);
        let _ = must(dry_run.create("sleep", &sleep_properties("Nap")));
        let patch = Properties::new().with("Resting HR", PropertyValue::Number(48.0));
        let _ = must(dry_run.update(&stored.id, &patch));

        let naps = must(dry_run.query("sleep", &Filter::for_key(&FIELDS, &key("Nap"))));
        assert_eq!(naps.len(), 1);
        let main_key = Filter::for_key(&FIELDS, &key("Main Sleep"));
        let main = must(dry_run.query("sleep", &main_key));
        assert_eq!(main.len(), 1);
        assert_eq!(main[0].properties.number("Resting HR"), Some(48.0));

        assert_eq!(inner.len(), 1);
        assert_eq!(inner.records("sleep")[0].properties.number("Resting HR"), None);
    }
}
