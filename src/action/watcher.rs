use std::rc::Rc;

use super::{ActionArgs, ActionPayload, ObserveOptions, Origin};
use crate::{
    ActionResult, AsyncAction, AsyncCache, BeckonOptions, ListenerId, PostActionContext,
    WatchOptions,
};

/// The state returned by [`Watcher::watch`].
#[derive(Debug, Clone, PartialEq)]
pub struct WatchState<R, N = ()> {
    pub started: bool,
    pub finished: bool,
    pub result: ActionResult<R, N>,
    pub updating: bool,
    /// `None` while nothing is cached.
    pub time_cached: Option<u64>,
}

/// The state returned by [`Watcher::beckon`].
#[derive(Debug, Clone, PartialEq)]
pub struct BeckonState<R, N = ()> {
    pub finished: bool,
    pub result: ActionResult<R, N>,
    pub updating: bool,
}

/// A subscription-based consumer of an [`AsyncAction`], owned by one rendering unit.
///
/// Call [`watch`](Self::watch) or [`beckon`](Self::beckon) on every render.
/// The watcher listens to the key of the most recent call and calls the re-render callback
/// whenever that key's entry is written. Dropping the watcher unregisters it.
pub struct Watcher<A, R, N = ()>
where
    A: ActionArgs,
    R: ActionPayload,
    N: ActionPayload,
{
    action: AsyncAction<A, R, N>,
    cache: AsyncCache,
    id: ListenerId,
    rerender: Rc<dyn Fn()>,
    key: Option<String>,
    first_observation: bool,
    previous: Option<ActionResult<R, N>>,
}

impl<A, R, N> AsyncAction<A, R, N>
where
    A: ActionArgs,
    R: ActionPayload,
    N: ActionPayload,
{
    /// Creates a watcher that calls `rerender` whenever the watched entry changes.
    pub fn watcher(&self, cache: &AsyncCache, rerender: impl Fn() + 'static) -> Watcher<A, R, N> {
        Watcher {
            action: self.clone(),
            cache: cache.clone(),
            id: cache.next_listener_id(),
            rerender: Rc::new(rerender),
            key: None,
            first_observation: true,
            previous: None,
        }
    }
}

impl<A, R, N> Watcher<A, R, N>
where
    A: ActionArgs,
    R: ActionPayload,
    N: ActionPayload,
{
    pub fn watch(&mut self, args: A, options: WatchOptions) -> WatchState<R, N> {
        if options.dormant || (self.cache.is_server() && !options.ssr) {
            self.unbind();
            return WatchState {
                started: true,
                finished: true,
                result: ActionResult::dormant(),
                updating: false,
                time_cached: None,
            };
        }
        let key = self.action.key(&args);
        self.bind(&key);

        let hit_context = if options.initiate {
            PostActionContext::BeckonHitCache
        } else {
            PostActionContext::WatchHitCache
        };
        let observed = self.action.observe(
            &self.cache,
            &key,
            &args,
            ObserveOptions {
                initiate: options.initiate,
                cache_break_enabled: options.cache_break_enabled,
                run_context: options
                    .post_action_enabled
                    .then_some(PostActionContext::BeckonRun),
            },
        );
        if self.first_observation {
            self.first_observation = false;
            if observed.origin == Origin::Hit && options.post_action_enabled {
                self.action
                    .post_action(&self.cache, &args, &observed.result, hit_context);
            }
        }

        if observed.finished {
            if observed.result.is_success() {
                self.previous = Some(observed.result.clone());
            }
        } else if options.hold_previous {
            if let Some(previous) = &self.previous {
                return WatchState {
                    started: true,
                    finished: true,
                    result: previous.clone(),
                    updating: true,
                    time_cached: observed.time_cached,
                };
            }
        }
        WatchState {
            started: observed.started,
            finished: observed.finished,
            result: observed.result,
            updating: observed.updating,
            time_cached: observed.time_cached,
        }
    }

    /// Watches `args`, starting the operation if nothing is cached.
    pub fn beckon(&mut self, args: A, options: BeckonOptions) -> BeckonState<R, N> {
        let state = self.watch(args, options.into());
        BeckonState {
            finished: state.finished,
            result: state.result,
            updating: state.updating,
        }
    }

    /// The key this watcher currently listens to.
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    fn bind(&mut self, key: &str) {
        if self.key.as_deref() == Some(key) {
            return;
        }
        self.unbind();
        tracing::trace!(key, "watcher bound");
        self.cache.subscribe_rc(key, self.id, self.rerender.clone());
        self.key = Some(key.to_string());
        self.first_observation = true;
    }
    fn unbind(&mut self) {
        if let Some(key) = self.key.take() {
            self.cache.unsubscribe(&key, self.id);
        }
    }
}
impl<A, R, N> Drop for Watcher<A, R, N>
where
    A: ActionArgs,
    R: ActionPayload,
    N: ActionPayload,
{
    fn drop(&mut self) {
        self.unbind();
    }
}
