use std::time::Duration;

use derive_ex::derive_ex;

/// Options for [`AsyncAction::run`](crate::AsyncAction::run).
#[derive(Debug, Clone, Copy)]
#[derive_ex(Default)]
pub struct RunOptions {
    /// Return a finished cached result instead of running the operation again.
    pub respect_cache: bool,
    /// Skip the short-circuit hook.
    pub ignore_short_circuit: bool,
    /// Keep showing the finished result, flagged `updating`, while the operation runs.
    pub treat_as_update: bool,
}

/// Options for [`Watcher::watch`](crate::Watcher::watch).
#[derive(Debug, Clone, Copy)]
#[derive_ex(Default)]
pub struct WatchOptions {
    /// Start the operation if nothing is cached for the arguments.
    pub initiate: bool,
    /// Run on a server cache. When `false`, a server cache yields a dormant result.
    #[default(true)]
    pub ssr: bool,
    pub post_action_enabled: bool,
    pub cache_break_enabled: bool,
    /// Keep returning the last finished result while the result for new arguments is pending.
    pub hold_previous: bool,
    /// Observe nothing and yield a dormant result.
    pub dormant: bool,
}

/// Options for [`Watcher::beckon`](crate::Watcher::beckon).
#[derive(Debug, Clone, Copy)]
#[derive_ex(Default)]
pub struct BeckonOptions {
    #[default(true)]
    pub ssr: bool,
    #[default(true)]
    pub post_action_enabled: bool,
    #[default(true)]
    pub cache_break_enabled: bool,
    pub hold_previous: bool,
    pub dormant: bool,
}
impl From<BeckonOptions> for WatchOptions {
    fn from(o: BeckonOptions) -> Self {
        WatchOptions {
            initiate: true,
            ssr: o.ssr,
            post_action_enabled: o.post_action_enabled,
            cache_break_enabled: o.cache_break_enabled,
            hold_previous: o.hold_previous,
            dormant: o.dormant,
        }
    }
}

/// Options for [`AsyncAction::read`](crate::AsyncAction::read).
#[derive(Debug, Clone, Copy)]
#[derive_ex(Default)]
pub struct ReadOptions {
    #[default(true)]
    pub post_action_enabled: bool,
    #[default(true)]
    pub cache_break_enabled: bool,
}

/// Options for [`AsyncAction::delayed_run`](crate::AsyncAction::delayed_run).
#[derive(Debug, Clone, Copy)]
#[derive_ex(Default)]
pub struct DelayedRunOptions {
    pub delay: Duration,
    /// Cancel a run still waiting for its delay under the same key.
    #[default(true)]
    pub clear_old_run: bool,
    /// Run at once when a finished result is cached and the cache-break hook accepts it.
    #[default(true)]
    pub immediate_if_cached: bool,
    pub run: RunOptions,
}

/// Options for [`AsyncAction::get_cached`](crate::AsyncAction::get_cached).
#[derive(Debug, Clone, Copy, Default)]
pub struct GetCachedOptions {
    /// Evaluate the cache-break hook and report it in `cache_breakable`.
    pub check_cache_break: bool,
}

/// Options for [`AsyncAction::update_cached`](crate::AsyncAction::update_cached).
#[derive(Debug, Clone)]
#[derive_ex(Default)]
pub struct UpdateCachedOptions {
    #[default(true)]
    pub notify: bool,
    #[default(true)]
    pub reset_time_cached: bool,
    pub run_post_action_hook: bool,
    /// Replaces the tags of the updated result.
    pub tags: Option<Vec<String>>,
    /// Replaces the message of the updated result.
    pub message: Option<String>,
}
