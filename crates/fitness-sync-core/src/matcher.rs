use crate::filter::{Filter, KeyFields};
use crate::model::{NaturalKey, TargetRecord};
use crate::store::{DocumentStore, StoreError};

#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Found(TargetRecord),
    Absent,
    /// The query itself failed; nothing is known about existence.
    Degraded(StoreError),
}

/// Issues one query constraining every key component and returns the first
/// match.
pub fn find<S: DocumentStore + ?Sized>(
    store: &mut S,
    collection: &str,
    fields: &KeyFields,
    key: &NaturalKey,
) -> Lookup {
    let filter = Filter::for_key(fields, key);
    match store.query(collection, &filter) {
        Ok(matches) => {
            if matches.len() > 1 {
                tracing::warn!(
                    key = %key,
                    collection,
                    matches = matches.len(),
                    "duplicate records share one natural key; using the first"
                );
            }
            matches.into_iter().next().map_or(Lookup::Absent, Lookup::Found)
        }
        Err(err) => {
            tracing::debug!(key = %key, collection, error = %err, "lookup query failed");
            Lookup::Degraded(err)
        }
    }
}
