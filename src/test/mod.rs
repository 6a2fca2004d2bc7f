use std::{
    thread,
    time::{Duration, Instant},
};

use crate::{semaphore::SemaphoreHandle, thread::ThreadId, Runtime};

/// Polls until `sem_get_value` reports `expected`, e.g. `-n` once `n` threads are blocked.
pub fn wait_for_value(runtime: &Runtime, sem: SemaphoreHandle, expected: isize) {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let value = runtime.sem_get_value(sem).unwrap();
        if value == expected {
            return;
        }

        assert!(
            Instant::now() < deadline,
            "semaphore value stuck at {value}, expected {expected}"
        );
        thread::sleep(Duration::from_millis(1));
    }
}

/// Identities of `count` distinct (already exited) threads, for driving the registry directly.
pub fn foreign_thread_ids(count: usize) -> Vec<ThreadId> {
    (0..count)
        .map(|_| thread::spawn(ThreadId::current).join().unwrap())
        .collect()
}
