use parse_display::Display;

use crate::{ActionResult, AsyncCache};

/// Where a post-action hook call originated.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
#[display(style = "SNAKE_CASE")]
pub enum PostActionContext {
    WatchHitCache,
    BeckonHitCache,
    RunHitCache,
    ReadHitCache,
    ReadRun,
    ShortCircuit,
    DirectRun,
    BeckonRun,
    CacheUpdate,
}

/// Input of the short-circuit hook, consulted before an operation starts.
pub struct ShortCircuitInput<'a, A> {
    pub args: &'a A,
    pub cache: &'a AsyncCache,
}

/// Input of the cache-break hook, consulted when a finished entry is found.
pub struct CacheBreakInput<'a, A, R, N> {
    pub args: &'a A,
    pub result: &'a ActionResult<R, N>,
    pub time_cached: u64,
    pub cache: &'a AsyncCache,
}

/// Input of the post-action hook, called after every settle or cache hit.
pub struct PostActionInput<'a, A, R, N> {
    pub args: &'a A,
    pub result: &'a ActionResult<R, N>,
    pub context: PostActionContext,
    pub cache: &'a AsyncCache,
}

pub(crate) type ShortCircuitHook<A, R, N> =
    Box<dyn Fn(ShortCircuitInput<A>) -> Option<ActionResult<R, N>>>;
pub(crate) type CacheBreakHook<A, R, N> = Box<dyn Fn(CacheBreakInput<A, R, N>) -> bool>;
pub(crate) type PostActionHook<A, R, N> = Box<dyn Fn(PostActionInput<A, R, N>)>;

pub(crate) struct ActionHooks<A, R, N> {
    pub short_circuit: Option<ShortCircuitHook<A, R, N>>,
    pub cache_break: Option<CacheBreakHook<A, R, N>>,
    pub post_action: Option<PostActionHook<A, R, N>>,
}
impl<A, R, N> ActionHooks<A, R, N> {
    pub fn new() -> Self {
        Self {
            short_circuit: None,
            cache_break: None,
            post_action: None,
        }
    }
}
