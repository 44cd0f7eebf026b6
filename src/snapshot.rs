use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{AsyncCache, CacheEntry, CacheError, Stores, StoredResult};


/// The state a server render hands over to the client session that continues it.
///
/// Serializes as `{ "allState": {..}, "asyncResults": {..}, "asyncActionOrd": {..} }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Store values by store name.
    pub all_state: BTreeMap<String, Value>,
    pub async_results: BTreeMap<String, SnapshotEntry>,
    /// Generation counters by key.
    pub async_action_ord: BTreeMap<String, u64>,
}

/// One cache entry, serialized as `[started, finished, result, updating, timeCached]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry(pub bool, pub bool, pub Value, pub bool, pub u64);

impl Snapshot {
    /// Copies the result and generation tables of `cache` and the values of `stores`.
    pub fn capture(cache: &AsyncCache, stores: &Stores) -> Result<Self, CacheError> {
        let mut async_results = BTreeMap::new();
        for (key, entry) in cache.results_table() {
            let result = entry.result.to_json()?;
            async_results.insert(
                key,
                SnapshotEntry(
                    entry.started,
                    entry.finished,
                    result,
                    entry.updating,
                    entry.time_cached,
                ),
            );
        }
        let snapshot = Snapshot {
            all_state: stores.capture_states()?,
            async_results,
            async_action_ord: cache.generations_table(),
        };
        tracing::debug!(
            results = snapshot.async_results.len(),
            stores = snapshot.all_state.len(),
            "snapshot captured"
        );
        Ok(snapshot)
    }

    /// Replaces the result and generation tables of `cache` and the values of `stores`.
    ///
    /// Call this before anything dispatches on `cache`: executions in flight are forgotten.
    /// Listeners are kept and are not notified.
    pub fn restore(&self, cache: &AsyncCache, stores: &Stores) -> Result<(), CacheError> {
        stores.restore_states(&self.all_state)?;
        cache.replace_tables(
            self.async_results.iter().map(|(key, entry)| {
                let SnapshotEntry(started, finished, result, updating, time_cached) = entry;
                (
                    key.clone(),
                    CacheEntry {
                        started: *started,
                        finished: *finished,
                        result: StoredResult::from_json(result.clone()),
                        updating: *updating,
                        time_cached: *time_cached,
                    },
                )
            }),
            self.async_action_ord
                .iter()
                .map(|(key, generation)| (key.clone(), *generation)),
        );
        tracing::debug!(results = self.async_results.len(), "snapshot restored");
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, CacheError> {
        Ok(serde_json::to_string(self)?)
    }
    pub fn from_json(json: &str) -> Result<Self, CacheError> {
        Ok(serde_json::from_str(json)?)
    }
}
