//! Semaphore integration tests.
//!
//! Exercises blocking, FIFO hand-off and the busy-destroy rule with real threads.

use std::{
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use tpsync::prelude::*;

/// Polls until `order` holds `len` entries
fn wait_for_len(order: &Mutex<Vec<usize>>, len: usize) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while order.lock().unwrap().len() < len {
        assert!(Instant::now() < deadline, "waiter {len} never resumed");
        thread::sleep(Duration::from_millis(1));
    }
}

/// Polls until the semaphore reports `expected`, e.g. `-n` once `n` threads are blocked
fn wait_for_value(runtime: &Runtime, sem: SemaphoreHandle, expected: isize) {
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

#[test]
fn test_waiters_released_in_fifo_order() -> Result<()> {
    const WAITERS: usize = 6;
    const RELEASED: usize = 4;

    let runtime = Arc::new(Runtime::new());
    let sem = runtime.sem_create(0)?;
    let order = Arc::new(Mutex::new(Vec::new()));

    let mut handles = Vec::new();
    for index in 0..WAITERS {
        let waiter_runtime = Arc::clone(&runtime);
        let waiter_order = Arc::clone(&order);
        handles.push(thread::spawn(move || {
            waiter_runtime.sem_down(sem).unwrap();
            waiter_order.lock().unwrap().push(index);
        }));

        // Pin the arrival order before starting the next waiter
        wait_for_value(&runtime, sem, -(index as isize + 1));
    }

    for released in 1..=RELEASED {
        runtime.sem_up(sem)?;
        wait_for_len(&order, released);
    }

    // Exactly RELEASED threads resumed, the oldest ones, in arrival order
    assert_eq!(*order.lock().unwrap(), (0..RELEASED).collect::<Vec<_>>());
    assert_eq!(
        runtime.sem_get_value(sem)?,
        -((WAITERS - RELEASED) as isize)
    );
    assert!(matches!(
        runtime.sem_destroy(sem),
        Err(Error::ResourceBusy(n)) if n == WAITERS - RELEASED
    ));

    // One at a time, two runnable waiters would race on `order`
    for released in RELEASED + 1..=WAITERS {
        runtime.sem_up(sem)?;
        wait_for_len(&order, released);
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(*order.lock().unwrap(), (0..WAITERS).collect::<Vec<_>>());
    assert_eq!(runtime.sem_get_value(sem)?, 0);
    runtime.sem_destroy(sem)?;
    Ok(())
}

#[test]
fn test_count_and_waiters_never_coexist() -> Result<()> {
    let runtime = Arc::new(Runtime::new());
    let sem = runtime.sem_create(0)?;

    // No resource, no waiter
    assert_eq!(runtime.sem_get_value(sem)?, 0);

    let waiter = {
        let runtime = Arc::clone(&runtime);
        thread::spawn(move || runtime.sem_down(sem))
    };
    wait_for_value(&runtime, sem, -1);

    // The unit goes to the waiter, the count stays at zero
    runtime.sem_up(sem)?;
    waiter.join().unwrap()?;
    assert_eq!(runtime.sem_get_value(sem)?, 0);

    runtime.sem_up(sem)?;
    runtime.sem_up(sem)?;
    assert_eq!(runtime.sem_get_value(sem)?, 2);

    // Available units are consumed without blocking
    runtime.sem_down(sem)?;
    runtime.sem_down(sem)?;
    assert!(!runtime.sem_try_down(sem)?);

    runtime.sem_destroy(sem)?;
    Ok(())
}

#[test]
fn test_producer_consumer_ping_pong() -> Result<()> {
    const ROUNDS: usize = 200;

    let runtime = Arc::new(Runtime::new());
    let ping = runtime.sem_create(0)?;
    let pong = runtime.sem_create(0)?;

    let partner = {
        let runtime = Arc::clone(&runtime);
        thread::spawn(move || -> Result<()> {
            for _ in 0..ROUNDS {
                runtime.sem_down(ping)?;
                runtime.sem_up(pong)?;
            }
            Ok(())
        })
    };

    for _ in 0..ROUNDS {
        runtime.sem_up(ping)?;
        runtime.sem_down(pong)?;
    }
    partner.join().unwrap()?;

    runtime.sem_destroy(ping)?;
    runtime.sem_destroy(pong)?;
    Ok(())
}

#[test]
fn test_global_functions() -> Result<()> {
    let sem = sem_create(1)?;

    sem_down(sem)?;
    assert_eq!(sem_get_value(sem)?, 0);
    assert!(!sem_try_down(sem)?);
    sem_up(sem)?;
    assert_eq!(sem_get_value(sem)?, 1);

    sem_destroy(sem)?;
    assert!(matches!(
        sem_get_value(sem),
        Err(Error::InvalidArgument { .. })
    ));
    assert!(matches!(
        sem_destroy(SemaphoreHandle::NULL),
        Err(Error::InvalidArgument { .. })
    ));
    Ok(())
}

#[test]
fn test_handle_bound_to_issuing_runtime() -> Result<()> {
    let local = Runtime::new();
    let global_sem = sem_create(3)?;
    let local_sem = local.sem_create(0)?;

    assert!(matches!(
        local.sem_destroy(global_sem),
        Err(Error::InvalidArgument { .. })
    ));
    assert!(matches!(
        sem_up(local_sem),
        Err(Error::InvalidArgument { .. })
    ));

    assert_eq!(sem_get_value(global_sem)?, 3);
    assert_eq!(local.sem_get_value(local_sem)?, 0);

    sem_destroy(global_sem)?;
    local.sem_destroy(local_sem)?;
    Ok(())
}
