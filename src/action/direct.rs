use super::{ActionArgs, ActionPayload};
use crate::{
    ActionResult, AsyncAction, AsyncCache, CacheEntry, DeleteOptions, GetCachedOptions,
    PostActionContext, StoredResult, UpdateCachedOptions,
};

/// The cached state of one key, returned by [`AsyncAction::get_cached`].
#[derive(Debug, Clone, PartialEq)]
pub struct CachedStatus<R, N = ()> {
    pub existed: bool,
    pub started: bool,
    pub finished: bool,
    pub result: ActionResult<R, N>,
    pub updating: bool,
    /// Whether the cache-break hook would discard the entry. Only evaluated on request.
    pub cache_breakable: bool,
    pub time_cached: Option<u64>,
}

impl<A, R, N> AsyncAction<A, R, N>
where
    A: ActionArgs,
    R: ActionPayload,
    N: ActionPayload,
{
    /// Inspects the entry for `args` without starting anything or registering a listener.
    pub fn get_cached(
        &self,
        cache: &AsyncCache,
        args: &A,
        options: GetCachedOptions,
    ) -> CachedStatus<R, N> {
        let key = self.key(args);
        match cache.get_entry_typed::<R, N>(&key) {
            Some((entry, result)) => {
                let cache_breakable = options.check_cache_break
                    && entry.finished
                    && self.is_cache_breakable(cache, args, &result, entry.time_cached);
                CachedStatus {
                    existed: true,
                    started: entry.started,
                    finished: entry.finished,
                    result,
                    updating: entry.updating,
                    cache_breakable,
                    time_cached: Some(entry.time_cached),
                }
            }
            None => CachedStatus {
                existed: false,
                started: false,
                finished: false,
                result: ActionResult::unfinished(),
                updating: false,
                cache_breakable: false,
                time_cached: None,
            },
        }
    }

    /// Writes `result` as the finished entry for `args`.
    pub fn set_cached(&self, cache: &AsyncCache, args: &A, result: ActionResult<R, N>, notify: bool) {
        let key = self.key(args);
        cache.reset_cache_break(&key);
        self.write_finished(cache, &key, StoredResult::new(result));
        if notify {
            cache.notify(&key);
        }
    }

    /// Writes a successful result carrying `payload`.
    pub fn set_cached_payload(&self, cache: &AsyncCache, args: &A, payload: R, notify: bool) {
        self.set_cached(cache, args, ActionResult::success(payload), notify);
    }

    /// Mutates the payload of a finished, successful entry in place.
    ///
    /// Returns `false` and changes nothing if there is no such entry.
    pub fn update_cached(
        &self,
        cache: &AsyncCache,
        args: &A,
        updater: impl FnOnce(&mut R),
        options: UpdateCachedOptions,
    ) -> bool {
        let key = self.key(args);
        let Some((entry, result)) = cache.get_entry_typed::<R, N>(&key) else {
            return false;
        };
        if !entry.finished || result.error {
            return false;
        }
        let Some(mut payload) = result.payload else {
            return false;
        };
        updater(&mut payload);
        let updated = ActionResult::success_with(
            payload,
            options.tags.unwrap_or(result.tags),
            options.message.unwrap_or(result.message),
        );
        let time_cached = if options.reset_time_cached {
            cache.now()
        } else {
            entry.time_cached
        };
        cache.set_entry(
            &key,
            CacheEntry {
                result: StoredResult::new(updated.clone()),
                time_cached,
                ..entry
            },
        );
        tracing::debug!(key = %key, "cached payload updated");
        if options.run_post_action_hook {
            self.post_action(cache, args, &updated, PostActionContext::CacheUpdate);
        }
        if options.notify {
            cache.notify(&key);
        }
        true
    }

    /// Deletes the entry for `args` and invalidates any execution in flight for it.
    pub fn clear_cache(&self, cache: &AsyncCache, args: &A, notify: bool) {
        let key = self.key(args);
        cache.reset_cache_break(&key);
        cache.delete_entry(
            &key,
            DeleteOptions {
                bump_generation: true,
                notify,
            },
        );
    }

    /// Deletes every entry written by this action.
    pub fn clear_all_cache(&self, cache: &AsyncCache, notify: bool) {
        let prefix = self.key_prefix();
        for key in cache.keys() {
            if key.starts_with(&prefix) {
                cache.reset_cache_break(&key);
                cache.delete_entry(
                    &key,
                    DeleteOptions {
                        bump_generation: true,
                        notify,
                    },
                );
            }
        }
    }

    /// Deletes every entry of this action that no listener is watching, and returns how many.
    pub fn clear_all_unwatched_cache(&self, cache: &AsyncCache, notify: bool) -> usize {
        let prefix = self.key_prefix();
        cache.clear_unwatched_where(|key| key.starts_with(&prefix), notify)
    }
}
