pub mod oneshot_broadcast;
