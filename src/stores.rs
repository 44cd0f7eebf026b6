use std::{
    any::Any,
    cell::{Cell, Ref, RefCell},
    collections::BTreeMap,
    fmt,
    rc::Rc,
};

use derive_ex::derive_ex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::{CacheError, Subscription};

#[cfg(test)]
mod tests;

type Subscriber<T> = Rc<dyn Fn(&T)>;

/// Similar to `Rc<RefCell<T>>`, but with subscribers notified on every update.
#[derive(Default)]
#[derive_ex(Clone, bound())]
pub struct Store<T: 'static>(Rc<StoreNode<T>>);

impl<T: 'static> Store<T> {
    pub fn new(value: T) -> Self {
        Self(Rc::new(StoreNode {
            value: RefCell::new(value),
            subscribers: RefCell::new(BTreeMap::new()),
            next_id: Cell::new(0),
        }))
    }

    /// Borrows the current value.
    ///
    /// Panics if called from within an updater of the same store.
    pub fn borrow(&self) -> Ref<'_, T> {
        self.0.value.borrow()
    }

    /// Returns a copy of the current value.
    pub fn raw_state(&self) -> T
    where
        T: Clone,
    {
        self.borrow().clone()
    }

    /// Mutates the value in place, then notifies subscribers in registration order.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        f(&mut *self.0.value.borrow_mut());
        self.0.notify();
    }

    /// Replaces the value and notifies subscribers.
    pub fn set(&self, value: T) {
        self.update(|v| *v = value);
    }

    /// Calls `callback` with the selected value whenever an update changes it.
    ///
    /// The callback is not called for the value current at subscription time.
    /// It must not update this store.
    pub fn subscribe<S>(
        &self,
        selector: impl Fn(&T) -> S + 'static,
        callback: impl Fn(&S) + 'static,
    ) -> Subscription
    where
        S: PartialEq + 'static,
    {
        let last = RefCell::new(selector(&*self.borrow()));
        let subscriber: Subscriber<T> = Rc::new(move |value| {
            let selected = selector(value);
            if *last.borrow() != selected {
                callback(&selected);
                *last.borrow_mut() = selected;
            }
        });
        let id = self.0.next_id.get();
        self.0.next_id.set(id + 1);
        self.0.subscribers.borrow_mut().insert(id, subscriber);
        Subscription::from_weak_fn(Rc::downgrade(&self.0), move |node| {
            node.subscribers.borrow_mut().remove(&id);
        })
    }

    pub fn subscriber_count(&self) -> usize {
        self.0.subscribers.borrow().len()
    }
}
impl<T: fmt::Debug> fmt::Debug for Store<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.value.try_borrow() {
            Ok(value) => fmt::Debug::fmt(&*value, f),
            Err(_) => write!(f, "<borrowed>"),
        }
    }
}
impl<T> Serialize for Store<T>
where
    T: Serialize,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        match self.0.value.try_borrow() {
            Ok(value) => T::serialize(&*value, serializer),
            Err(_) => Err(serde::ser::Error::custom("borrowed")),
        }
    }
}
impl<'de, T> Deserialize<'de> for Store<T>
where
    T: Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Store<T>, D::Error>
    where
        D: serde::de::Deserializer<'de>,
    {
        T::deserialize(deserializer).map(Store::new)
    }
}

#[derive(Default)]
struct StoreNode<T: 'static> {
    value: RefCell<T>,
    subscribers: RefCell<BTreeMap<u64, Subscriber<T>>>,
    next_id: Cell<u64>,
}
impl<T: 'static> StoreNode<T> {
    fn notify(&self) {
        let subscribers: Vec<(u64, Subscriber<T>)> = self
            .subscribers
            .borrow()
            .iter()
            .map(|(id, s)| (*id, s.clone()))
            .collect();
        for (id, subscriber) in subscribers {
            if self.subscribers.borrow().contains_key(&id) {
                subscriber(&*self.value.borrow());
            }
        }
    }
}

trait DynStore {
    fn capture(&self) -> serde_json::Result<Value>;
    fn restore(&self, value: Value) -> serde_json::Result<()>;
    fn as_any(&self) -> &dyn Any;
}
impl<T> DynStore for Store<T>
where
    T: Serialize + DeserializeOwned + 'static,
{
    fn capture(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
    fn restore(&self, value: Value) -> serde_json::Result<()> {
        let value = serde_json::from_value(value)?;
        self.set(value);
        Ok(())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Named registry of the application's stores.
///
/// The registered stores form the `allState` part of a [`Snapshot`](crate::Snapshot).
#[derive(Default)]
pub struct Stores {
    stores: BTreeMap<String, Box<dyn DynStore>>,
}

impl Stores {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `store` under `name`, replacing any store already registered with that name.
    pub fn register<T>(&mut self, name: impl Into<String>, store: Store<T>)
    where
        T: Serialize + DeserializeOwned + 'static,
    {
        self.stores.insert(name.into(), Box::new(store));
    }

    /// Returns the store registered under `name`, if it holds a `T`.
    pub fn get<T: 'static>(&self, name: &str) -> Option<Store<T>> {
        self.stores
            .get(name)?
            .as_any()
            .downcast_ref::<Store<T>>()
            .cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.stores.keys().map(String::as_str)
    }

    /// Serializes the value of every registered store.
    pub fn capture_states(&self) -> Result<BTreeMap<String, Value>, CacheError> {
        let mut states = BTreeMap::new();
        for (name, store) in &self.stores {
            states.insert(name.clone(), store.capture()?);
        }
        Ok(states)
    }

    /// Replaces the value of every registered store that has a state in `states`.
    ///
    /// States without a registered store are ignored.
    pub fn restore_states(&self, states: &BTreeMap<String, Value>) -> Result<(), CacheError> {
        for (name, value) in states {
            match self.stores.get(name) {
                Some(store) => store.restore(value.clone())?,
                None => tracing::warn!(name = %name, "no store registered for snapshot state"),
            }
        }
        Ok(())
    }
}
impl fmt::Debug for Stores {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.stores.keys()).finish()
    }
}
