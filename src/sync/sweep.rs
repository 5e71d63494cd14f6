//! Mark-and-sweep of stored documents that vanished upstream.
//!
//! Every sweep commits its deletes before returning, so fresh writes queued
//! afterwards for the same sub-collection always land after them.

use std::collections::HashSet;

use serde_json::Value;

use crate::store::{BatchWriter, Collection, StoreError, StoredDocument, SyncStore};

/// Delete every stored document in `collection` whose id is not in `fresh`.
///
/// Returns the number of documents deleted.
pub async fn sweep_stale(
    store: &dyn SyncStore,
    writer: &mut BatchWriter<'_>,
    user_id: &str,
    collection: Collection,
    fresh: &HashSet<String>,
) -> Result<usize, StoreError> {
    let stored = store.document_ids(user_id, collection).await?;
    let mut stale: Vec<String> = stored.into_iter().filter(|id| !fresh.contains(id)).collect();
    stale.sort();

    let removed = stale.len();
    for id in stale {
        writer.delete(collection, id).await?;
    }
    writer.commit().await?;

    if removed > 0 {
        tracing::debug!(
            user = %user_id,
            collection = collection.as_str(),
            removed,
            "Swept stale documents"
        );
    }
    Ok(removed)
}

fn flag(data: &Value, field: &str) -> bool {
    data.get(field).and_then(Value::as_bool).unwrap_or(false)
}

/// Whether a stored list was written by an earlier sync.
fn is_synced(document: &StoredDocument) -> bool {
    flag(&document.data, "synced")
}

/// Delete synced lists whose id is not among `fresh_ids`.
///
/// Lists created locally carry no `synced` marker and are left alone.
pub async fn sweep_synced_lists(
    store: &dyn SyncStore,
    writer: &mut BatchWriter<'_>,
    user_id: &str,
    fresh_ids: &HashSet<String>,
) -> Result<usize, StoreError> {
    let documents = store.documents(user_id, Collection::Lists).await?;

    let mut removed = 0;
    for document in documents {
        if is_synced(&document) && !fresh_ids.contains(&document.id) {
            writer.delete(Collection::Lists, document.id).await?;
            removed += 1;
        }
    }
    writer.commit().await?;

    if removed > 0 {
        tracing::debug!(user = %user_id, removed, "Swept lists removed upstream");
    }
    Ok(removed)
}
