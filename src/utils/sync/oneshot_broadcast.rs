use std::{
    cell::RefCell,
    future::poll_fn,
    mem::take,
    rc::Rc,
    task::{Poll, Waker},
};

use derive_ex::Ex;
use slabmap::SlabMap;

#[cfg(test)]
mod tests;

struct OneshotBroadcast<T> {
    value: Option<T>,
    wakers: SlabMap<Waker>,
}

/// Single-threaded channel whose one value is observed by every receiver.
pub fn oneshot_broadcast<T>() -> (Sender<T>, Receiver<T>) {
    let data = Rc::new(RefCell::new(OneshotBroadcast {
        value: None,
        wakers: SlabMap::new(),
    }));
    (Sender(data.clone()), Receiver(data))
}

#[derive(Ex)]
#[derive_ex(Clone(bound()))]
pub struct Sender<T>(Rc<RefCell<OneshotBroadcast<T>>>);

impl<T> Sender<T> {
    /// Stores the value and wakes all receivers. Later sends are ignored.
    pub fn send(&self, value: T) {
        let wakers = {
            let mut data = self.0.borrow_mut();
            if data.value.is_some() {
                return;
            }
            data.value = Some(value);
            take(&mut data.wakers)
        };
        for (_, waker) in wakers {
            waker.wake();
        }
    }
}

#[derive(Ex)]
#[derive_ex(Clone(bound()))]
pub struct Receiver<T>(Rc<RefCell<OneshotBroadcast<T>>>);

impl<T: Clone> Receiver<T> {
    pub fn try_recv(&self) -> Option<T> {
        self.0.borrow().value.clone()
    }
    pub async fn recv(&self) -> T {
        let mut key = WakerKeyGuard::new(self);
        poll_fn(|cx| {
            let mut d = self.0.borrow_mut();
            if let Some(value) = &d.value {
                Poll::Ready(value.clone())
            } else {
                if let Some(key) = key.key {
                    d.wakers[key].clone_from(cx.waker());
                } else {
                    key.key = Some(d.wakers.insert(cx.waker().clone()));
                }
                Poll::Pending
            }
        })
        .await
    }
}

struct WakerKeyGuard<'a, T> {
    receiver: &'a Receiver<T>,
    key: Option<usize>,
}
impl<'a, T> WakerKeyGuard<'a, T> {
    fn new(receiver: &'a Receiver<T>) -> Self {
        Self {
            receiver,
            key: None,
        }
    }
}
impl<T> Drop for WakerKeyGuard<'_, T> {
    fn drop(&mut self) {
        if let Some(key) = self.key {
            self.receiver.0.borrow_mut().wakers.remove(key);
        }
    }
}
