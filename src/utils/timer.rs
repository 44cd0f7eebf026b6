use std::{
    collections::BTreeMap,
    future::Future,
    pin::Pin,
    sync::{Condvar, LazyLock, Mutex, MutexGuard},
    task::{Context, Poll, Waker},
    time::{Duration, Instant},
};

use slabmap::SlabMap;

#[cfg(test)]
mod tests;

static TIMER: LazyLock<TimerRegistry> = LazyLock::new(|| TimerRegistry {
    queue: Mutex::new(TimerQueue::new()),
    condvar: Condvar::new(),
});

struct TimerRegistry {
    queue: Mutex<TimerQueue>,
    condvar: Condvar,
}
impl TimerRegistry {
    fn lock(&self) -> MutexGuard<'_, TimerQueue> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }
    fn run_worker(&self) {
        let mut due = Vec::new();
        let mut queue = self.lock();
        loop {
            let now = Instant::now();
            queue.take_due(now, &mut due);
            if !due.is_empty() {
                drop(queue);
                for waker in due.drain(..) {
                    waker.wake();
                }
                queue = self.lock();
                continue;
            }
            queue = match queue.next_deadline() {
                Some(deadline) => {
                    let wait = deadline.saturating_duration_since(now);
                    self.condvar
                        .wait_timeout(queue, wait)
                        .unwrap_or_else(|e| e.into_inner())
                        .0
                }
                None => self.condvar.wait(queue).unwrap_or_else(|e| e.into_inner()),
            };
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Deadline {
    at: Instant,
    id: usize,
}

enum Slot {
    Waiting { deadline: Deadline, waker: Option<Waker> },
    Fired,
}

struct TimerQueue {
    deadlines: BTreeMap<Deadline, ()>,
    slots: SlabMap<Slot>,
    worker_running: bool,
}

impl TimerQueue {
    fn new() -> Self {
        Self {
            deadlines: BTreeMap::new(),
            slots: SlabMap::new(),
            worker_running: false,
        }
    }

    fn insert(&mut self, at: Instant) -> usize {
        if !self.worker_running {
            self.worker_running = true;
            std::thread::spawn(|| TIMER.run_worker());
        }
        let is_first = self.deadlines.first_key_value().is_none_or(|(d, _)| at < d.at);
        let id = self.slots.insert(Slot::Fired);
        self.slots[id] = Slot::Waiting {
            deadline: Deadline { at, id },
            waker: None,
        };
        self.deadlines.insert(Deadline { at, id }, ());
        if is_first {
            TIMER.condvar.notify_one();
        }
        id
    }

    fn take_due(&mut self, now: Instant, due: &mut Vec<Waker>) {
        while let Some(entry) = self.deadlines.first_entry() {
            if entry.key().at > now {
                break;
            }
            let id = entry.key().id;
            entry.remove();
            if let Some(Slot::Waiting { waker, .. }) =
                self.slots.get_mut(id).map(|s| std::mem::replace(s, Slot::Fired))
            {
                due.extend(waker);
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.first_key_value().map(|(d, _)| d.at)
    }

    fn poll(&mut self, id: usize, cx: &Context) -> Poll<()> {
        match &mut self.slots[id] {
            Slot::Waiting { waker, .. } => {
                match waker {
                    Some(w) if w.will_wake(cx.waker()) => {}
                    _ => *waker = Some(cx.waker().clone()),
                }
                Poll::Pending
            }
            Slot::Fired => {
                self.slots.remove(id);
                Poll::Ready(())
            }
        }
    }

    fn remove(&mut self, id: usize) {
        if let Some(Slot::Waiting { deadline, .. }) = self.slots.remove(id) {
            self.deadlines.remove(&deadline);
        }
    }
}

/// Future returned by [`sleep`].
#[must_use = "futures do nothing unless polled"]
pub struct Sleep {
    at: Instant,
    id: Option<usize>,
    done: bool,
}

impl Future for Sleep {
    type Output = ();
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(());
        }
        if this.at <= Instant::now() {
            this.finish();
            return Poll::Ready(());
        }
        let at = this.at;
        let mut queue = TIMER.lock();
        let id = *this.id.get_or_insert_with(|| queue.insert(at));
        let poll = queue.poll(id, cx);
        if poll.is_ready() {
            this.id = None;
            this.done = true;
        }
        poll
    }
}
impl Sleep {
    fn finish(&mut self) {
        self.done = true;
        if let Some(id) = self.id.take() {
            TIMER.lock().remove(id);
        }
    }
}
impl Drop for Sleep {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            TIMER.lock().remove(id);
        }
    }
}

/// Completes after `duration` has elapsed, independent of any executor.
pub fn sleep(duration: Duration) -> Sleep {
    Sleep {
        at: Instant::now() + duration,
        id: None,
        done: false,
    }
}
