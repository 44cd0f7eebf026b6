use std::{
    fmt::Display,
    future::{ready, Future},
    rc::Rc,
    sync::atomic::{AtomicU64, Ordering},
};

use derive_ex::derive_ex;
use futures::{future::LocalBoxFuture, FutureExt};
use serde::{de::DeserializeOwned, Serialize};

use crate::{
    cache::{InFlight, SharedResult},
    derive_key, ActionResult, AsyncCache, CacheEntry, CacheError, DeleteOptions, StoredResult,
};

mod delayed;
mod direct;
mod hooks;
mod options;
mod read;
mod watcher;

pub use delayed::DelayedRun;
pub use direct::CachedStatus;
pub use hooks::*;
pub use options::*;
pub use read::{Read, Suspend};
pub use watcher::{BeckonState, WatchState, Watcher};

use hooks::ActionHooks;


/// Number of consecutive honoured cache-break evaluations after which the hook is ignored.
pub const MAX_CONSECUTIVE_CACHE_BREAKS: u32 = 3;

static NEXT_ORDINAL: AtomicU64 = AtomicU64::new(0);

/// Argument types accepted by an [`AsyncAction`].
pub trait ActionArgs: Clone + Serialize + 'static {}
impl<T: Clone + Serialize + 'static> ActionArgs for T {}

/// Payload types an [`AsyncAction`] can cache and carry through a snapshot.
pub trait ActionPayload: Clone + Serialize + DeserializeOwned + 'static {}
impl<T: Clone + Serialize + DeserializeOwned + 'static> ActionPayload for T {}

/// Future returned by [`AsyncAction::run`].
pub type RunFuture<R, N> = LocalBoxFuture<'static, ActionResult<R, N>>;

type Operation<A, R, N> = Box<dyn Fn(A, ActionScope) -> LocalBoxFuture<'static, ActionResult<R, N>>>;

/// Context handed to a running operation.
pub struct ActionScope {
    cache: AsyncCache,
    key: String,
}
impl ActionScope {
    pub fn cache(&self) -> &AsyncCache {
        &self.cache
    }
    /// The derived cache key this execution will settle.
    pub fn key(&self) -> &str {
        &self.key
    }
    /// Returns the stores supplied by the hosting session.
    ///
    /// # Panics
    ///
    /// Panics if no stores were supplied, or they are not a `T`.
    pub fn stores<T: 'static>(&self) -> Rc<T> {
        self.cache.stores()
    }
    pub fn try_stores<T: 'static>(&self) -> Result<Rc<T>, CacheError> {
        self.cache.try_stores()
    }
}

struct ActionData<A, R, N> {
    ordinal: u64,
    operation: Operation<A, R, N>,
    hooks: ActionHooks<A, R, N>,
    subset_key: Option<Box<dyn Fn(&A) -> String>>,
}

/// An asynchronous operation whose results are cached by argument.
///
/// Create one per operation with [`AsyncAction::builder`] and share it by cloning.
/// Every protocol takes the [`AsyncCache`] of the current session explicitly.
#[derive_ex(Clone, bound())]
pub struct AsyncAction<A, R, N = ()>(Rc<ActionData<A, R, N>>);

/// Builder for [`AsyncAction`].
pub struct AsyncActionBuilder<A, R, N> {
    operation: Operation<A, R, N>,
    hooks: ActionHooks<A, R, N>,
    subset_key: Option<Box<dyn Fn(&A) -> String>>,
}

impl<A, R, N> AsyncActionBuilder<A, R, N>
where
    A: ActionArgs,
    R: ActionPayload,
    N: ActionPayload,
{
    /// Supplies a result without running the operation, when the hook returns `Some`.
    pub fn short_circuit(
        mut self,
        f: impl Fn(ShortCircuitInput<A>) -> Option<ActionResult<R, N>> + 'static,
    ) -> Self {
        self.hooks.short_circuit = Some(Box::new(f));
        self
    }

    /// Treats a finished cached result as stale when the hook returns `true`.
    pub fn cache_break(mut self, f: impl Fn(CacheBreakInput<A, R, N>) -> bool + 'static) -> Self {
        self.hooks.cache_break = Some(Box::new(f));
        self
    }

    pub fn post_action(mut self, f: impl Fn(PostActionInput<A, R, N>) + 'static) -> Self {
        self.hooks.post_action = Some(Box::new(f));
        self
    }

    /// Derives the cache key from a projection of the arguments.
    pub fn subset_key<K: Serialize + 'static>(mut self, f: impl Fn(&A) -> K + 'static) -> Self {
        self.subset_key = Some(Box::new(move |args: &A| derive_key(&f(args))));
        self
    }

    pub fn build(self) -> AsyncAction<A, R, N> {
        let ordinal = NEXT_ORDINAL.fetch_add(1, Ordering::Relaxed);
        AsyncAction(Rc::new(ActionData {
            ordinal,
            operation: self.operation,
            hooks: self.hooks,
            subset_key: self.subset_key,
        }))
    }
}

#[derive(Clone, Copy)]
pub(crate) struct StartOptions {
    pub ignore_short_circuit: bool,
    pub treat_as_update: bool,
    pub notify_start: bool,
    pub post_action: Option<PostActionContext>,
}

/// How [`AsyncAction::observe`] produced its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Origin {
    Hit,
    Pending,
    Started,
    NotStarted,
}

pub(crate) struct Observed<R, N> {
    pub started: bool,
    pub finished: bool,
    pub updating: bool,
    pub time_cached: Option<u64>,
    pub result: ActionResult<R, N>,
    pub origin: Origin,
}
impl<R, N> Observed<R, N> {
    fn from_entry(entry: &CacheEntry, result: ActionResult<R, N>, origin: Origin) -> Self {
        Self {
            started: entry.started,
            finished: entry.finished,
            updating: entry.updating,
            time_cached: Some(entry.time_cached),
            result,
            origin,
        }
    }
    fn not_started() -> Self {
        Self {
            started: false,
            finished: false,
            updating: false,
            time_cached: None,
            result: ActionResult::unfinished(),
            origin: Origin::NotStarted,
        }
    }
}

#[derive(Clone, Copy)]
pub(crate) struct ObserveOptions {
    pub initiate: bool,
    pub cache_break_enabled: bool,
    pub run_context: Option<PostActionContext>,
}

impl<A, R, N> AsyncAction<A, R, N>
where
    A: ActionArgs,
    R: ActionPayload,
    N: ActionPayload,
{
    /// Starts building an action around `operation`.
    ///
    /// An `Err` returned by the operation is recovered into a failure result tagged
    /// [`EndTag::ThrewError`](crate::EndTag::ThrewError) whose message is the error's display text.
    pub fn builder<F, Fut, E>(operation: F) -> AsyncActionBuilder<A, R, N>
    where
        F: Fn(A, ActionScope) -> Fut + 'static,
        Fut: Future<Output = Result<ActionResult<R, N>, E>> + 'static,
        E: Display + 'static,
    {
        let operation: Operation<A, R, N> = Box::new(move |args: A, scope: ActionScope| {
            let fut = operation(args, scope);
            async move {
                match fut.await {
                    Ok(result) => result,
                    Err(e) => ActionResult::threw(e.to_string()),
                }
            }
            .boxed_local()
        });
        AsyncActionBuilder {
            operation,
            hooks: ActionHooks::new(),
            subset_key: None,
        }
    }

    /// Creates an action without hooks.
    pub fn new<F, Fut, E>(operation: F) -> Self
    where
        F: Fn(A, ActionScope) -> Fut + 'static,
        Fut: Future<Output = Result<ActionResult<R, N>, E>> + 'static,
        E: Display + 'static,
    {
        Self::builder(operation).build()
    }

    /// The process-wide number assigned to this action when it was built.
    pub fn ordinal(&self) -> u64 {
        self.0.ordinal
    }

    /// Returns the cache key for `args`.
    pub fn key(&self, args: &A) -> String {
        let body = match &self.0.subset_key {
            Some(f) => f(args),
            None => derive_key(args),
        };
        format!("{}{body}", self.key_prefix())
    }
    fn key_prefix(&self) -> String {
        format!("{}-", self.0.ordinal)
    }

    /// Runs the operation and resolves to its settled result.
    ///
    /// The call is dispatched immediately; the returned future only waits for the result.
    /// If an execution is already in flight for the same key, the call attaches to it.
    pub fn run(&self, cache: &AsyncCache, args: A, options: RunOptions) -> RunFuture<R, N> {
        let key = self.key(&args);
        if options.respect_cache {
            if let Some((entry, result)) = self.live_entry(cache, &key) {
                if entry.finished {
                    if !self.check_cache_break(cache, &key, &args, &result, entry.time_cached) {
                        tracing::trace!(key = %key, "run hit cache");
                        self.post_action(cache, &args, &result, PostActionContext::RunHitCache);
                        return ready(result).boxed_local();
                    }
                    self.break_entry(cache, &key);
                }
            }
        }
        let shared = self.start(
            cache,
            &key,
            &args,
            StartOptions {
                ignore_short_circuit: options.ignore_short_circuit,
                treat_as_update: options.treat_as_update,
                notify_start: true,
                post_action: Some(PostActionContext::DirectRun),
            },
        );
        async move { Self::typed_result(shared.await) }.boxed_local()
    }

    /// Returns the entry for `key`, skipping an unfinished entry that nothing is executing.
    ///
    /// Such entries appear when a snapshot was captured while an operation was in flight.
    fn live_entry(&self, cache: &AsyncCache, key: &str) -> Option<(CacheEntry, ActionResult<R, N>)> {
        let (entry, result) = cache.get_entry_typed::<R, N>(key)?;
        if !entry.finished && cache.in_flight(key).is_none() {
            return None;
        }
        Some((entry, result))
    }

    /// Evaluates the cache-break hook for a finished entry and applies the loop guard.
    ///
    /// Returns `true` if the entry should be discarded.
    fn check_cache_break(
        &self,
        cache: &AsyncCache,
        key: &str,
        args: &A,
        result: &ActionResult<R, N>,
        time_cached: u64,
    ) -> bool {
        if !self.is_cache_breakable(cache, args, result, time_cached) {
            cache.reset_cache_break(key);
            return false;
        }
        let count = cache.cache_break_count(key);
        if count >= MAX_CONSECUTIVE_CACHE_BREAKS {
            if count == MAX_CONSECUTIVE_CACHE_BREAKS {
                tracing::warn!(
                    key,
                    "cache break hook asked to refetch {count} times in a row; \
                     ignoring it until it accepts the entry or the entry is cleared"
                );
                cache.record_cache_break(key);
            }
            return false;
        }
        cache.record_cache_break(key);
        true
    }
    fn is_cache_breakable(
        &self,
        cache: &AsyncCache,
        args: &A,
        result: &ActionResult<R, N>,
        time_cached: u64,
    ) -> bool {
        match &self.0.hooks.cache_break {
            Some(hook) => hook(CacheBreakInput {
                args,
                result,
                time_cached,
                cache,
            }),
            None => false,
        }
    }
    fn break_entry(&self, cache: &AsyncCache, key: &str) {
        tracing::debug!(key, "cache break");
        cache.delete_entry(
            key,
            DeleteOptions {
                bump_generation: true,
                notify: false,
            },
        );
    }

    fn post_action(
        &self,
        cache: &AsyncCache,
        args: &A,
        result: &ActionResult<R, N>,
        context: PostActionContext,
    ) {
        if let Some(hook) = &self.0.hooks.post_action {
            hook(PostActionInput {
                args,
                result,
                context,
                cache,
            });
        }
    }

    fn typed_result(stored: StoredResult) -> ActionResult<R, N> {
        stored
            .typed()
            .unwrap_or_else(|e| ActionResult::threw(e.to_string()))
    }

    /// Starts an execution for `key`, or returns the one already in flight.
    fn start(
        &self,
        cache: &AsyncCache,
        key: &str,
        args: &A,
        options: StartOptions,
    ) -> SharedResult {
        if let Some(in_flight) = cache.in_flight(key) {
            tracing::trace!(key, "attached to execution in flight");
            return in_flight.future;
        }
        if !options.ignore_short_circuit {
            if let Some(hook) = &self.0.hooks.short_circuit {
                if let Some(result) = hook(ShortCircuitInput { args, cache }) {
                    tracing::debug!(key, "short circuit");
                    let stored = StoredResult::new(result.clone());
                    self.write_finished(cache, key, stored.clone());
                    if options.post_action.is_some() {
                        self.post_action(cache, args, &result, PostActionContext::ShortCircuit);
                    }
                    cache.notify(key);
                    return ready(stored).boxed_local().shared();
                }
            }
        }

        let generation = cache.generation(key);
        let entry = match cache.get_entry(key) {
            Some(e) if options.treat_as_update && e.finished => CacheEntry { updating: true, ..e },
            _ => CacheEntry {
                started: true,
                finished: false,
                result: StoredResult::new(ActionResult::<R, N>::unfinished()),
                updating: false,
                time_cached: cache.now(),
            },
        };
        cache.set_entry(key, entry);

        tracing::debug!(key, generation, "action started");
        let fut = (self.0.operation)(
            args.clone(),
            ActionScope {
                cache: cache.clone(),
                key: key.to_string(),
            },
        );
        let this = self.clone();
        let settle_cache = cache.clone();
        let settle_key = key.to_string();
        let settle_args = args.clone();
        let post_action = options.post_action;
        let shared = async move {
            let result = fut.await;
            this.settle(
                &settle_cache,
                &settle_key,
                &settle_args,
                generation,
                &result,
                post_action,
            );
            StoredResult::new(result)
        }
        .boxed_local()
        .shared();
        cache.set_in_flight(
            key,
            InFlight {
                future: shared.clone(),
                generation,
            },
        );
        cache.spawn(shared.clone().map(|_| ()));
        if options.notify_start {
            cache.notify(key);
        }
        shared
    }

    fn settle(
        &self,
        cache: &AsyncCache,
        key: &str,
        args: &A,
        generation: u64,
        result: &ActionResult<R, N>,
        post_action: Option<PostActionContext>,
    ) {
        let current = cache.generation(key);
        if current != generation {
            tracing::debug!(key, generation, current, "discarding stale result");
            return;
        }
        tracing::debug!(key, generation, error = result.error, "action settled");
        self.write_finished(cache, key, StoredResult::new(result.clone()));
        cache.clear_in_flight(key, generation);
        if let Some(context) = post_action {
            self.post_action(cache, args, result, context);
        }
        cache.notify(key);
    }

    fn write_finished(&self, cache: &AsyncCache, key: &str, result: StoredResult) {
        cache.set_entry(
            key,
            CacheEntry {
                started: true,
                finished: true,
                result,
                updating: false,
                time_cached: cache.now(),
            },
        );
    }

    /// The dispatch shared by `watch`, `beckon` and `read`.
    pub(crate) fn observe(
        &self,
        cache: &AsyncCache,
        key: &str,
        args: &A,
        options: ObserveOptions,
    ) -> Observed<R, N> {
        if let Some((entry, result)) = self.live_entry(cache, key) {
            if !entry.finished {
                return Observed::from_entry(&entry, result, Origin::Pending);
            }
            if !(options.cache_break_enabled
                && self.check_cache_break(cache, key, args, &result, entry.time_cached))
            {
                return Observed::from_entry(&entry, result, Origin::Hit);
            }
            self.break_entry(cache, key);
        }
        if !options.initiate {
            return Observed::not_started();
        }
        self.start(
            cache,
            key,
            args,
            StartOptions {
                ignore_short_circuit: false,
                treat_as_update: false,
                notify_start: false,
                post_action: options.run_context,
            },
        );
        match cache.get_entry_typed::<R, N>(key) {
            Some((entry, result)) => Observed::from_entry(&entry, result, Origin::Started),
            None => Observed::not_started(),
        }
    }
}
