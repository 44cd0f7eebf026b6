use futures::executor::LocalPool;
use futures::task::LocalSpawnExt;

use assert_call::{call, CallRecorder};

use super::oneshot_broadcast;

#[test]
fn all_receivers_observe_value() {
    let mut cr = CallRecorder::new();
    let mut pool = LocalPool::new();
    let (tx, rx) = oneshot_broadcast::<u32>();
    for name in ["a", "b"] {
        let rx = rx.clone();
        pool.spawner()
            .spawn_local(async move { call!("{name}:{}", rx.recv().await) })
            .unwrap();
    }
    pool.run_until_stalled();
    cr.verify(());

    tx.send(5);
    pool.run_until_stalled();
    cr.verify(["a:5", "b:5"]);
}

#[test]
fn first_send_wins() {
    let (tx, rx) = oneshot_broadcast::<u32>();
    assert_eq!(rx.try_recv(), None);
    tx.send(1);
    tx.send(2);
    assert_eq!(rx.try_recv(), Some(1));
    assert_eq!(futures::executor::block_on(rx.recv()), 1);
}
