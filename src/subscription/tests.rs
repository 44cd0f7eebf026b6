use super::*;
use assert_call::{call, CallRecorder};
use std::cell::Cell;

fn on_unsubscribe(rc: Rc<Cell<i32>>) {
    call!("{}", rc.get());
}

#[test]
fn from_fn_calls_on_drop() {
    let mut cr = CallRecorder::new();
    {
        let _s = Subscription::from_fn(|| call!("drop"));
    }
    cr.verify("drop");
}

#[test]
fn from_weak_fn_calls_when_alive() {
    let mut cr = CallRecorder::new();
    let rc = Rc::new(Cell::new(9));
    let weak = Rc::downgrade(&rc);
    {
        let _s = Subscription::from_weak_fn(weak, on_unsubscribe);
    }
    cr.verify("9");
}

#[test]
fn from_weak_fn_noop_when_dead() {
    let mut cr = CallRecorder::new();
    let rc = Rc::new(Cell::new(1));
    let weak = Rc::downgrade(&rc);
    drop(rc);
    {
        let _s = Subscription::from_weak_fn(weak, on_unsubscribe);
    }
    cr.verify(());
}

#[test]
fn detach_keeps_registration() {
    let mut cr = CallRecorder::new();
    let s = Subscription::from_fn(|| call!("drop"));
    assert!(!s.is_empty());
    s.detach();
    cr.verify(());
    assert!(Subscription::empty().is_empty());
}
