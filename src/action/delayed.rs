use futures::{
    future::{AbortHandle, Abortable},
    FutureExt,
};

use super::{ActionArgs, ActionPayload};
use crate::{utils::timer::sleep, AsyncAction, AsyncCache, DelayedRunOptions};

/// Cancellation handle returned by [`AsyncAction::delayed_run`].
#[derive(Debug, Clone)]
pub struct DelayedRun {
    handle: AbortHandle,
}

impl DelayedRun {
    /// Cancels the run if its delay has not elapsed yet.
    ///
    /// A run that has already been dispatched is not affected.
    pub fn cancel(&self) {
        self.handle.abort();
    }
    pub fn is_cancelled(&self) -> bool {
        self.handle.is_aborted()
    }
}

impl<A, R, N> AsyncAction<A, R, N>
where
    A: ActionArgs,
    R: ActionPayload,
    N: ActionPayload,
{
    /// Runs the operation after `options.delay`, debounced per cache key.
    pub fn delayed_run(&self, cache: &AsyncCache, args: A, options: DelayedRunOptions) -> DelayedRun {
        let key = self.key(&args);
        if options.immediate_if_cached {
            if let Some((entry, result)) = self.live_entry(cache, &key) {
                if entry.finished
                    && !self.is_cache_breakable(cache, &args, &result, entry.time_cached)
                {
                    tracing::trace!(key = %key, "delayed run dispatched immediately");
                    if options.clear_old_run {
                        if let Some(old) = cache.take_debounce(&key) {
                            old.abort();
                        }
                    }
                    // Dispatch happens inside `run`; the result is read from the cache.
                    let _ = self.run(cache, args, options.run);
                    let (handle, _) = AbortHandle::new_pair();
                    return DelayedRun { handle };
                }
            }
        }

        let (handle, registration) = AbortHandle::new_pair();
        let (id, old) = cache.replace_debounce(&key, handle.clone());
        if let Some(old) = old {
            if options.clear_old_run {
                tracing::trace!(key = %key, "previous delayed run cancelled");
                old.abort();
            }
        }
        let this = self.clone();
        let run_cache = cache.clone();
        let run = options.run;
        let delay = options.delay;
        let task = Abortable::new(
            async move {
                sleep(delay).await;
                this.run(&run_cache, args, run).await;
            },
            registration,
        );
        let done_cache = cache.clone();
        cache.spawn(task.map(move |_| done_cache.finish_debounce(&key, id)));
        DelayedRun { handle }
    }
}
