use std::{
    fmt,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use futures::{
    future::{self, LocalBoxFuture},
    FutureExt,
};

use super::{ActionArgs, ActionPayload, ObserveOptions, Origin};
use crate::{
    utils::sync::oneshot_broadcast::{oneshot_broadcast, Receiver},
    cache::SharedResult,
    ActionResult, AsyncAction, AsyncCache, PostActionContext, ReadOptions, Subscription,
};

/// The outcome of [`AsyncAction::read`].
#[derive(Debug)]
pub enum Read<R, N = ()> {
    /// The cached result succeeded.
    Ready(R),
    /// The cached result failed.
    Failed(ActionResult<R, N>),
    /// The result is not settled yet; retry after the future completes.
    Pending(Suspend),
}

/// Completes the next time the entry of the key it was created for is written or deleted,
/// or when the execution that was in flight for the key settles, even if its result is stale.
///
/// Dropping it before completion removes its listener.
#[must_use = "futures do nothing unless you .await or poll them"]
pub struct Suspend {
    receiver: Receiver<()>,
    settled: Option<SharedResult>,
    recv: LocalBoxFuture<'static, ()>,
    _subscription: Subscription,
}

impl Suspend {
    fn new(cache: &AsyncCache, key: &str) -> Self {
        let (sender, receiver) = oneshot_broadcast();
        let id = cache.next_listener_id();
        let weak = cache.downgrade();
        let listener_key = key.to_string();
        cache.subscribe(key, id, move || {
            sender.send(());
            if let Some(cache) = weak.upgrade() {
                cache.unsubscribe(&listener_key, id);
            }
        });
        let settled = cache.in_flight(key).map(|in_flight| in_flight.future);
        let weak = cache.downgrade();
        let key = key.to_string();
        let recv = {
            let receiver = receiver.clone();
            let settled = settled.clone();
            async move {
                match settled {
                    Some(settled) => {
                        future::select(receiver.recv().boxed_local(), settled).await;
                    }
                    None => receiver.recv().await,
                }
            }
            .boxed_local()
        };
        Self {
            receiver,
            settled,
            recv,
            _subscription: Subscription::from_fn(move || {
                if let Some(cache) = weak.upgrade() {
                    cache.unsubscribe(&key, id);
                }
            }),
        }
    }

    /// Returns `true` once the entry has been written or the awaited execution has settled.
    pub fn is_ready(&self) -> bool {
        self.receiver.try_recv().is_some()
            || self.settled.as_ref().is_some_and(|s| s.peek().is_some())
    }
}
impl Future for Suspend {
    type Output = ();
    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        self.recv.poll_unpin(cx)
    }
}
impl fmt::Debug for Suspend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Suspend")
            .field("ready", &self.is_ready())
            .finish()
    }
}

impl<A, R, N> AsyncAction<A, R, N>
where
    A: ActionArgs,
    R: ActionPayload,
    N: ActionPayload,
{
    /// Returns the cached payload, or starts the operation and returns a future to wait on.
    ///
    /// A render pass that receives [`Read::Pending`] should await the [`Suspend`] and read again.
    pub fn read(&self, cache: &AsyncCache, args: A, options: ReadOptions) -> Read<R, N> {
        let key = self.key(&args);
        let observed = self.observe(
            cache,
            &key,
            &args,
            ObserveOptions {
                initiate: true,
                cache_break_enabled: options.cache_break_enabled,
                run_context: options
                    .post_action_enabled
                    .then_some(PostActionContext::ReadRun),
            },
        );
        if !observed.finished {
            tracing::trace!(key = %key, "read suspended");
            return Read::Pending(Suspend::new(cache, &key));
        }
        if observed.origin == Origin::Hit && options.post_action_enabled {
            self.post_action(
                cache,
                &args,
                &observed.result,
                PostActionContext::ReadHitCache,
            );
        }
        match observed.result {
            ActionResult {
                error: false,
                payload: Some(payload),
                ..
            } => Read::Ready(payload),
            result => Read::Failed(result),
        }
    }

    /// Calls [`read`](Self::read) until the result is settled.
    pub async fn read_async(
        &self,
        cache: &AsyncCache,
        args: A,
        options: ReadOptions,
    ) -> Result<R, ActionResult<R, N>> {
        loop {
            match self.read(cache, args.clone(), options) {
                Read::Ready(payload) => return Ok(payload),
                Read::Failed(result) => return Err(result),
                Read::Pending(suspend) => suspend.await,
            }
        }
    }
}
