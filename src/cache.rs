use std::{
    any::{type_name, Any},
    cell::{Cell, RefCell},
    collections::{BTreeMap, HashMap},
    fmt,
    future::Future,
    rc::{Rc, Weak},
};

use derive_ex::derive_ex;
use futures::{
    future::{join_all, AbortHandle, LocalBoxFuture, Shared},
    task::{LocalSpawn, LocalSpawnExt},
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::{utils::system_time_millis, ActionResult, CacheError};


/// Identifies one listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

/// A cached result whose payload types are known only to the action that wrote it.
///
/// Entries restored from a snapshot hold raw JSON until an action reads them with its own types.
#[derive(Clone)]
pub struct StoredResult(StoredRepr);

#[derive(Clone)]
enum StoredRepr {
    Typed {
        value: Rc<dyn Any>,
        error: bool,
        to_json: fn(&dyn Any) -> serde_json::Result<Value>,
    },
    Json(Value),
}

fn typed_to_json<R, N>(value: &dyn Any) -> serde_json::Result<Value>
where
    R: Serialize + 'static,
    N: Serialize + 'static,
{
    match value.downcast_ref::<ActionResult<R, N>>() {
        Some(value) => serde_json::to_value(value),
        None => Err(serde::ser::Error::custom("stored result has an unexpected type")),
    }
}

impl StoredResult {
    pub fn new<R, N>(result: ActionResult<R, N>) -> Self
    where
        R: Serialize + 'static,
        N: Serialize + 'static,
    {
        let error = result.error;
        StoredResult(StoredRepr::Typed {
            value: Rc::new(result),
            error,
            to_json: typed_to_json::<R, N>,
        })
    }
    pub fn from_json(value: Value) -> Self {
        StoredResult(StoredRepr::Json(value))
    }

    pub fn is_error(&self) -> bool {
        match &self.0 {
            StoredRepr::Typed { error, .. } => *error,
            StoredRepr::Json(value) => value.get("error").and_then(Value::as_bool) != Some(false),
        }
    }

    /// Returns the result as the given types, decoding restored JSON if needed.
    pub fn typed<R, N>(&self) -> serde_json::Result<ActionResult<R, N>>
    where
        R: Clone + DeserializeOwned + 'static,
        N: Clone + DeserializeOwned + 'static,
    {
        match &self.0 {
            StoredRepr::Typed { value, .. } => match value.downcast_ref::<ActionResult<R, N>>() {
                Some(value) => Ok(value.clone()),
                None => Err(serde::de::Error::custom(format!(
                    "stored result is not `{}`",
                    type_name::<ActionResult<R, N>>()
                ))),
            },
            StoredRepr::Json(value) => serde_json::from_value(value.clone()),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<Value> {
        match &self.0 {
            StoredRepr::Typed { value, to_json, .. } => to_json(&**value),
            StoredRepr::Json(value) => Ok(value.clone()),
        }
    }

    fn is_json(&self) -> bool {
        matches!(self.0, StoredRepr::Json(_))
    }
}
impl fmt::Debug for StoredResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_json() {
            Ok(value) => write!(f, "{value}"),
            Err(_) => write!(f, "<unserializable>"),
        }
    }
}
impl PartialEq for StoredResult {
    fn eq(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            (StoredRepr::Typed { value: a, .. }, StoredRepr::Typed { value: b, .. })
                if Rc::ptr_eq(a, b) =>
            {
                true
            }
            _ => match (self.to_json(), other.to_json()) {
                (Ok(a), Ok(b)) => a == b,
                _ => false,
            },
        }
    }
}

/// One row of the result table.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub started: bool,
    pub finished: bool,
    pub result: StoredResult,
    pub updating: bool,
    /// Milliseconds since the UNIX epoch, from the cache's clock.
    pub time_cached: u64,
}

#[derive(Debug, Clone, Copy)]
#[derive_ex(Default)]
pub struct DeleteOptions {
    /// Invalidate any execution in flight for the key.
    #[default(true)]
    pub bump_generation: bool,
    /// Notify the key's listeners after deleting.
    #[default(true)]
    pub notify: bool,
}

pub(crate) type SharedResult = Shared<LocalBoxFuture<'static, StoredResult>>;

#[derive(Clone)]
pub(crate) struct InFlight {
    pub future: SharedResult,
    pub generation: u64,
}

type Listener = Rc<dyn Fn()>;

#[derive(Default)]
struct CacheTables {
    results: HashMap<String, CacheEntry>,
    generations: HashMap<String, u64>,
    listeners: HashMap<String, BTreeMap<ListenerId, Listener>>,
    in_flight: HashMap<String, InFlight>,
    cache_breaks: HashMap<String, u32>,
    debounces: HashMap<String, Debounce>,
    next_debounce_id: u64,
}

struct Debounce {
    id: u64,
    handle: AbortHandle,
}

struct CacheData {
    tables: RefCell<CacheTables>,
    next_listener_id: Cell<u64>,
    spawner: Rc<dyn LocalSpawn>,
    server: bool,
    clock: Rc<dyn Fn() -> u64>,
    stores: RefCell<Option<Rc<dyn Any>>>,
}

/// The table of cached action results for one session.
///
/// A long-lived client session and a single server render each own exactly one `AsyncCache`.
/// Cloning yields another handle to the same tables.
#[derive(Clone)]
pub struct AsyncCache(Rc<CacheData>);

impl AsyncCache {
    /// Creates a client cache that runs operations on `spawner`.
    pub fn new(spawner: impl LocalSpawn + 'static) -> Self {
        Self::builder(spawner).build()
    }
    pub fn builder(spawner: impl LocalSpawn + 'static) -> AsyncCacheBuilder {
        AsyncCacheBuilder {
            spawner: Rc::new(spawner),
            server: false,
            clock: None,
            stores: None,
        }
    }

    /// Returns `true` for a request-scoped cache used for a single server render.
    pub fn is_server(&self) -> bool {
        self.0.server
    }
    pub fn now(&self) -> u64 {
        (self.0.clock)()
    }

    pub fn get_entry(&self, key: &str) -> Option<CacheEntry> {
        self.0.tables.borrow().results.get(key).cloned()
    }
    pub fn contains_entry(&self, key: &str) -> bool {
        self.0.tables.borrow().results.contains_key(key)
    }

    /// Writes an entry without notifying listeners.
    pub fn set_entry(&self, key: &str, entry: CacheEntry) {
        self.0
            .tables
            .borrow_mut()
            .results
            .insert(key.to_string(), entry);
    }

    pub fn delete_entry(&self, key: &str, options: DeleteOptions) -> Option<CacheEntry> {
        let removed = {
            let t = &mut *self.0.tables.borrow_mut();
            if options.bump_generation {
                *t.generations.entry(key.to_string()).or_default() += 1;
                t.in_flight.remove(key);
            }
            t.results.remove(key)
        };
        tracing::trace!(key, bump = options.bump_generation, "cache entry deleted");
        if options.notify {
            self.notify(key);
        }
        removed
    }

    pub fn generation(&self, key: &str) -> u64 {
        self.0
            .tables
            .borrow()
            .generations
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Invalidates any execution in flight for `key` and returns the new generation.
    pub fn bump_generation(&self, key: &str) -> u64 {
        let t = &mut *self.0.tables.borrow_mut();
        t.in_flight.remove(key);
        let g = t.generations.entry(key.to_string()).or_default();
        *g += 1;
        *g
    }

    pub fn keys(&self) -> Vec<String> {
        self.0.tables.borrow().results.keys().cloned().collect()
    }

    pub fn next_listener_id(&self) -> ListenerId {
        let id = self.0.next_listener_id.get();
        self.0.next_listener_id.set(id + 1);
        ListenerId(id)
    }

    /// Registers `listener` for `key`, replacing any listener already registered under `id`.
    pub fn subscribe(&self, key: &str, id: ListenerId, listener: impl Fn() + 'static) {
        self.subscribe_rc(key, id, Rc::new(listener));
    }
    pub(crate) fn subscribe_rc(&self, key: &str, id: ListenerId, listener: Listener) {
        self.0
            .tables
            .borrow_mut()
            .listeners
            .entry(key.to_string())
            .or_default()
            .insert(id, listener);
    }
    pub fn unsubscribe(&self, key: &str, id: ListenerId) {
        let t = &mut *self.0.tables.borrow_mut();
        if let Some(listeners) = t.listeners.get_mut(key) {
            listeners.remove(&id);
            if listeners.is_empty() {
                t.listeners.remove(key);
            }
        }
    }
    pub fn listener_count(&self, key: &str) -> usize {
        self.0
            .tables
            .borrow()
            .listeners
            .get(key)
            .map_or(0, |l| l.len())
    }
    fn is_subscribed(&self, key: &str, id: ListenerId) -> bool {
        self.0
            .tables
            .borrow()
            .listeners
            .get(key)
            .is_some_and(|l| l.contains_key(&id))
    }

    /// Calls every listener registered for `key`, in registration order.
    ///
    /// Listeners may subscribe, unsubscribe or write to the cache while being notified.
    /// A listener removed during the fan-out is not called.
    pub fn notify(&self, key: &str) {
        let listeners: Vec<(ListenerId, Listener)> = match self.0.tables.borrow().listeners.get(key) {
            Some(l) => l.iter().map(|(id, f)| (*id, f.clone())).collect(),
            None => return,
        };
        tracing::trace!(key, count = listeners.len(), "notify");
        for (id, listener) in listeners {
            if self.is_subscribed(key, id) {
                listener();
            }
        }
    }

    /// Deletes every entry that has no listeners and returns how many were deleted.
    pub fn clear_all_unwatched(&self, notify: bool) -> usize {
        self.clear_unwatched_where(|_| true, notify)
    }
    pub(crate) fn clear_unwatched_where(&self, f: impl Fn(&str) -> bool, notify: bool) -> usize {
        let keys: Vec<String> = {
            let t = self.0.tables.borrow();
            t.results
                .keys()
                .filter(|key| f(key) && !t.listeners.contains_key(*key))
                .cloned()
                .collect()
        };
        for key in &keys {
            self.delete_entry(
                key,
                DeleteOptions {
                    bump_generation: true,
                    notify,
                },
            );
        }
        keys.len()
    }

    /// Waits until no execution is in flight, including executions started while waiting.
    pub async fn resolve_pending(&self) {
        loop {
            let pending: Vec<SharedResult> = self
                .0
                .tables
                .borrow()
                .in_flight
                .values()
                .map(|f| f.future.clone())
                .collect();
            if pending.is_empty() {
                break;
            }
            tracing::debug!(count = pending.len(), "waiting for pending actions");
            join_all(pending).await;
        }
    }

    /// Returns the stores supplied by the hosting session.
    ///
    /// # Panics
    ///
    /// Panics if no stores were supplied, or they are not a `T`.
    pub fn stores<T: 'static>(&self) -> Rc<T> {
        match self.try_stores() {
            Ok(stores) => stores,
            Err(e) => panic!("{e}"),
        }
    }
    pub fn try_stores<T: 'static>(&self) -> Result<Rc<T>, CacheError> {
        let stores = self
            .0
            .stores
            .borrow()
            .clone()
            .ok_or(CacheError::StoresNotConfigured)?;
        stores
            .downcast::<T>()
            .map_err(|_| CacheError::StoresTypeMismatch(type_name::<T>()))
    }
    pub fn set_stores<T: 'static>(&self, stores: Rc<T>) {
        *self.0.stores.borrow_mut() = Some(stores as Rc<dyn Any>);
    }

    pub(crate) fn downgrade(&self) -> WeakAsyncCache {
        WeakAsyncCache(Rc::downgrade(&self.0))
    }

    pub(crate) fn spawn(&self, fut: impl Future<Output = ()> + 'static) {
        if let Err(e) = self.0.spawner.spawn_local(fut) {
            tracing::error!("failed to spawn action: {e}");
        }
    }

    pub(crate) fn in_flight(&self, key: &str) -> Option<InFlight> {
        self.0.tables.borrow().in_flight.get(key).cloned()
    }
    pub(crate) fn set_in_flight(&self, key: &str, in_flight: InFlight) {
        self.0
            .tables
            .borrow_mut()
            .in_flight
            .insert(key.to_string(), in_flight);
    }
    /// Removes the in-flight handle only if it was started under `generation`.
    pub(crate) fn clear_in_flight(&self, key: &str, generation: u64) {
        let t = &mut *self.0.tables.borrow_mut();
        if t.in_flight.get(key).is_some_and(|f| f.generation == generation) {
            t.in_flight.remove(key);
        }
    }

    pub(crate) fn update_entry(&self, key: &str, f: impl FnOnce(&mut CacheEntry)) -> bool {
        match self.0.tables.borrow_mut().results.get_mut(key) {
            Some(entry) => {
                f(entry);
                true
            }
            None => false,
        }
    }

    /// Decodes a restored JSON entry into typed form once, so later reads share the value.
    pub(crate) fn get_entry_typed<R, N>(&self, key: &str) -> Option<(CacheEntry, ActionResult<R, N>)>
    where
        R: Clone + Serialize + DeserializeOwned + 'static,
        N: Clone + Serialize + DeserializeOwned + 'static,
    {
        let entry = self.get_entry(key)?;
        match entry.result.typed::<R, N>() {
            Ok(result) => {
                if entry.result.is_json() {
                    let stored = StoredResult::new(result.clone());
                    self.update_entry(key, |e| e.result = stored);
                }
                Some((entry, result))
            }
            Err(source) => {
                let e = CacheError::ResultType {
                    key: key.to_string(),
                    source,
                };
                tracing::warn!("dropping cached result: {e}");
                self.delete_entry(
                    key,
                    DeleteOptions {
                        bump_generation: true,
                        notify: false,
                    },
                );
                None
            }
        }
    }

    pub(crate) fn cache_break_count(&self, key: &str) -> u32 {
        self.0
            .tables
            .borrow()
            .cache_breaks
            .get(key)
            .copied()
            .unwrap_or(0)
    }
    pub(crate) fn record_cache_break(&self, key: &str) -> u32 {
        let t = &mut *self.0.tables.borrow_mut();
        let count = t.cache_breaks.entry(key.to_string()).or_default();
        *count += 1;
        *count
    }
    pub(crate) fn reset_cache_break(&self, key: &str) {
        self.0.tables.borrow_mut().cache_breaks.remove(key);
    }

    /// Registers `handle` as the pending delayed run for `key`.
    ///
    /// Returns the id to pass to `finish_debounce` and the handle it replaced.
    pub(crate) fn replace_debounce(
        &self,
        key: &str,
        handle: AbortHandle,
    ) -> (u64, Option<AbortHandle>) {
        let mut tables = self.0.tables.borrow_mut();
        let id = tables.next_debounce_id;
        tables.next_debounce_id += 1;
        let old = tables
            .debounces
            .insert(key.to_string(), Debounce { id, handle });
        (id, old.map(|d| d.handle))
    }
    pub(crate) fn take_debounce(&self, key: &str) -> Option<AbortHandle> {
        self.0
            .tables
            .borrow_mut()
            .debounces
            .remove(key)
            .map(|d| d.handle)
    }
    /// Forgets the delayed run `id` for `key`, unless a newer one has replaced it.
    pub(crate) fn finish_debounce(&self, key: &str, id: u64) {
        let mut tables = self.0.tables.borrow_mut();
        if tables.debounces.get(key).is_some_and(|d| d.id == id) {
            tables.debounces.remove(key);
        }
    }
    #[cfg(test)]
    pub(crate) fn debounce_count(&self) -> usize {
        self.0.tables.borrow().debounces.len()
    }

    pub(crate) fn results_table(&self) -> BTreeMap<String, CacheEntry> {
        self.0
            .tables
            .borrow()
            .results
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
    pub(crate) fn generations_table(&self) -> BTreeMap<String, u64> {
        self.0
            .tables
            .borrow()
            .generations
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }
    /// Replaces the result and generation tables; listeners are kept.
    pub(crate) fn replace_tables(
        &self,
        results: impl IntoIterator<Item = (String, CacheEntry)>,
        generations: impl IntoIterator<Item = (String, u64)>,
    ) {
        let t = &mut *self.0.tables.borrow_mut();
        t.results = results.into_iter().collect();
        t.generations = generations.into_iter().collect();
        t.in_flight.clear();
        t.cache_breaks.clear();
    }
}
impl fmt::Debug for AsyncCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = self.0.tables.borrow();
        f.debug_struct("AsyncCache")
            .field("server", &self.0.server)
            .field("results", &t.results.len())
            .field("in_flight", &t.in_flight.len())
            .field("watched_keys", &t.listeners.len())
            .finish()
    }
}

#[derive(Clone)]
pub(crate) struct WeakAsyncCache(Weak<CacheData>);

impl WeakAsyncCache {
    pub fn upgrade(&self) -> Option<AsyncCache> {
        self.0.upgrade().map(AsyncCache)
    }
}

/// Options for [`AsyncCache::builder`].
pub struct AsyncCacheBuilder {
    spawner: Rc<dyn LocalSpawn>,
    server: bool,
    clock: Option<Rc<dyn Fn() -> u64>>,
    stores: Option<Rc<dyn Any>>,
}

impl AsyncCacheBuilder {
    /// Marks the cache as request-scoped for a single server render.
    pub fn server(mut self, server: bool) -> Self {
        self.server = server;
        self
    }
    /// Replaces the clock used for `time_cached` (milliseconds since the UNIX epoch).
    pub fn clock(mut self, clock: impl Fn() -> u64 + 'static) -> Self {
        self.clock = Some(Rc::new(clock));
        self
    }
    pub fn stores<T: 'static>(mut self, stores: T) -> Self {
        self.stores = Some(Rc::new(stores) as Rc<dyn Any>);
        self
    }
    pub fn build(self) -> AsyncCache {
        AsyncCache(Rc::new(CacheData {
            tables: RefCell::new(CacheTables::default()),
            next_listener_id: Cell::new(0),
            spawner: self.spawner,
            server: self.server,
            clock: self.clock.unwrap_or_else(|| Rc::new(system_time_millis)),
            stores: RefCell::new(self.stores),
        }))
    }
}
