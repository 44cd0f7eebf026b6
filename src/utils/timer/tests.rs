use std::time::{Duration, Instant};

use futures::{
    executor::block_on,
    future::{select, Either},
    pin_mut,
};

use super::sleep;

#[test]
fn sleep_waits_for_duration() {
    let start = Instant::now();
    block_on(sleep(Duration::from_millis(30)));
    assert!(start.elapsed() >= Duration::from_millis(30));
}

#[test]
fn zero_duration_is_ready() {
    let start = Instant::now();
    block_on(sleep(Duration::ZERO));
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[test]
fn shorter_sleep_finishes_first() {
    let long = sleep(Duration::from_millis(200));
    let short = sleep(Duration::from_millis(10));
    pin_mut!(long);
    pin_mut!(short);
    match block_on(select(long, short)) {
        Either::Left(_) => panic!("long sleep finished first"),
        Either::Right(_) => {}
    }
}
