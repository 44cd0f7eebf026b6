use std::collections::BTreeMap;

use assert_call::{call, CallRecorder};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{CacheError, Store, Stores};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
struct Ui {
    theme: String,
    count: u32,
}

fn ui(theme: &str, count: u32) -> Ui {
    Ui {
        theme: theme.to_string(),
        count,
    }
}

#[test]
fn update() {
    let s = Store::new(ui("light", 0));
    assert_eq!(s.raw_state(), ui("light", 0));
    s.update(|v| v.count += 1);
    assert_eq!(s.raw_state(), ui("light", 1));
    s.set(ui("dark", 5));
    assert_eq!(s.borrow().theme, "dark");
}

#[test]
fn subscribe_selected_change() {
    let mut cr = CallRecorder::new();
    let s = Store::new(ui("light", 0));
    let _sub = s.subscribe(|v| v.count, |count| call!("count {count}"));
    cr.verify(());

    s.update(|v| v.count = 1);
    cr.verify("count 1");

    s.update(|v| v.theme = "dark".into());
    cr.verify(());

    s.update(|v| v.count = 1);
    cr.verify(());
}

#[test]
fn subscribe_order_and_drop() {
    let mut cr = CallRecorder::new();
    let s = Store::new(0);
    let sub0 = s.subscribe(|v| *v, |v| call!("a {v}"));
    let _sub1 = s.subscribe(|v| *v, |v| call!("b {v}"));
    assert_eq!(s.subscriber_count(), 2);

    s.set(1);
    cr.verify(["a 1", "b 1"]);

    drop(sub0);
    assert_eq!(s.subscriber_count(), 1);
    s.set(2);
    cr.verify("b 2");
}

#[test]
fn serialize() {
    let s = Store::new(ui("light", 3));
    assert_eq!(
        serde_json::to_value(&s).unwrap(),
        json!({ "theme": "light", "count": 3 })
    );
    let s: Store<Ui> = serde_json::from_value(json!({ "theme": "dark", "count": 1 })).unwrap();
    assert_eq!(s.raw_state(), ui("dark", 1));
}

#[test]
fn registry() {
    let ui_store = Store::new(ui("light", 0));
    let mut stores = Stores::new();
    stores.register("ui", ui_store.clone());
    stores.register("counter", Store::new(7u32));

    assert_eq!(stores.names().collect::<Vec<_>>(), ["counter", "ui"]);
    assert!(stores.get::<Ui>("ui").is_some());
    assert!(stores.get::<u32>("ui").is_none());
    assert!(stores.get::<Ui>("missing").is_none());

    stores.get::<Ui>("ui").unwrap().update(|v| v.count = 9);
    assert_eq!(ui_store.raw_state().count, 9);
}

#[test]
fn capture_and_restore_states() {
    let mut cr = CallRecorder::new();
    let ui_store = Store::new(ui("light", 0));
    let _sub = ui_store.subscribe(|v| v.theme.clone(), |t| call!("theme {t}"));
    let mut stores = Stores::new();
    stores.register("ui", ui_store.clone());

    let states = stores.capture_states().unwrap();
    assert_eq!(states["ui"], json!({ "theme": "light", "count": 0 }));

    let mut states = BTreeMap::new();
    states.insert("ui".to_string(), json!({ "theme": "dark", "count": 2 }));
    states.insert("unknown".to_string(), json!(1));
    stores.restore_states(&states).unwrap();
    assert_eq!(ui_store.raw_state(), ui("dark", 2));
    cr.verify("theme dark");

    let mut states = BTreeMap::new();
    states.insert("ui".to_string(), json!("not a ui"));
    assert!(matches!(
        stores.restore_states(&states),
        Err(CacheError::Json(_))
    ));
}
