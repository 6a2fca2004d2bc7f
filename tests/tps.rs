//! Thread-private storage integration tests.
//!
//! All tests share the process-wide runtime. A TPS area belongs to a thread, so every test body
//! runs on a freshly spawned thread; the harness may reuse one thread for all tests
//! (`--test-threads=1`) and a failed test must not leave an area behind for the next one.

use std::{sync::Once, thread};

use tpsync::prelude::*;

fn init() {
    static INIT: Once = Once::new();
    INIT.call_once(|| tps_init(true).unwrap());
}

/// Runs `body` on a new thread, which starts without a TPS area.
fn isolated(body: impl FnOnce() -> Result<()> + Send + 'static) -> Result<()> {
    init();
    thread::spawn(body).join().unwrap()
}

fn padded(text: &[u8]) -> Vec<u8> {
    let mut buffer = vec![0_u8; TPS_SIZE];
    buffer[..text.len()].copy_from_slice(text);
    buffer
}

#[test]
fn test_init_only_once() {
    init();

    assert!(matches!(tps_init(true), Err(Error::AlreadyInitialized)));
    assert!(matches!(tps_init(false), Err(Error::AlreadyInitialized)));

    // Once claimed, every runtime reports the claim
    assert!(matches!(
        Runtime::new().tps_init(TpsConfig::unprotected()),
        Err(Error::AlreadyInitialized)
    ));
}

#[test]
fn test_create_destroy_cycle() -> Result<()> {
    isolated(|| {
        let runtime = Runtime::global();

        assert!(!runtime.tps_exists()?);
        tps_create()?;
        assert!(runtime.tps_exists()?);
        assert!(matches!(tps_create(), Err(Error::DuplicateResource)));

        tps_destroy()?;
        assert!(matches!(tps_destroy(), Err(Error::NotFound)));

        tps_create()?;
        tps_destroy()?;
        Ok(())
    })
}

#[test]
fn test_round_trip_windows() -> Result<()> {
    isolated(|| {
        tps_create()?;

        let windows = [(0, 1), (0, TPS_SIZE), (17, 100), (TPS_SIZE - 8, 8), (2048, 0)];
        for (round, &(offset, length)) in windows.iter().enumerate() {
            let data: Vec<u8> = (0..length).map(|i| (i + round) as u8).collect();
            tps_write(offset, length, &data)?;

            let mut buffer = vec![0_u8; length];
            tps_read(offset, length, &mut buffer)?;
            assert_eq!(buffer, data, "window {offset}+{length}");
        }

        tps_destroy()?;
        Ok(())
    })
}

#[test]
fn test_invalid_windows() -> Result<()> {
    isolated(|| {
        let mut buffer = vec![0_u8; TPS_SIZE];

        // Without an area every access is invalid
        assert!(matches!(
            tps_read(0, 1, &mut buffer),
            Err(Error::InvalidArgument { .. })
        ));
        assert!(matches!(
            tps_write(0, 1, &buffer),
            Err(Error::InvalidArgument { .. })
        ));

        tps_create()?;
        assert!(matches!(
            tps_read(1, TPS_SIZE, &mut buffer),
            Err(Error::InvalidArgument { .. })
        ));
        assert!(matches!(
            tps_write(TPS_SIZE, 1, &buffer),
            Err(Error::InvalidArgument { .. })
        ));
        assert!(matches!(
            tps_write(usize::MAX, 1, &buffer),
            Err(Error::InvalidArgument { .. })
        ));
        assert!(matches!(
            tps_read(0, 16, &mut buffer[..15]),
            Err(Error::InvalidArgument { .. })
        ));
        tps_destroy()?;
        Ok(())
    })
}

#[test]
fn test_copy_on_write_isolation() -> Result<()> {
    isolated(|| {
        let runtime = Runtime::global();

        tps_create()?;
        tps_write(0, TPS_SIZE, &padded(b"hello world!"))?;
        let owner = ThreadId::current();
        let owner_page = runtime.tps_page_address()?;

        let clone = thread::spawn(move || -> Result<Vec<u8>> {
            let runtime = Runtime::global();

            tps_clone(owner)?;
            assert_eq!(runtime.tps_page_refcount()?, 2);
            assert_eq!(runtime.tps_page_address()?, owner_page);

            tps_write(0, 3, b"HEL")?;
            assert_eq!(runtime.tps_page_refcount()?, 1);
            assert_ne!(runtime.tps_page_address()?, owner_page);

            let mut buffer = vec![0_u8; 12];
            tps_read(0, 12, &mut buffer)?;
            tps_destroy()?;
            Ok(buffer)
        });

        assert_eq!(clone.join().unwrap()?, b"HELlo world!");

        let mut buffer = vec![0_u8; 12];
        tps_read(0, 12, &mut buffer)?;
        assert_eq!(buffer, b"hello world!");
        assert_eq!(runtime.tps_page_refcount()?, 1);
        assert_eq!(runtime.tps_page_address()?, owner_page);

        tps_destroy()?;
        Ok(())
    })
}

#[test]
fn test_clone_chain_with_semaphores() -> Result<()> {
    isolated(|| {
        let cloned = sem_create(0)?;
        let owner_wrote = sem_create(0)?;

        tps_create()?;
        tps_write(0, TPS_SIZE, &padded(b"hello world!"))?;
        let owner = ThreadId::current();

        // first clones the owner, second clones first, all three share one page
        let first = thread::spawn(move || -> Result<Vec<u8>> {
            tps_clone(owner)?;
            let me = ThreadId::current();

            let second = thread::spawn(move || -> Result<Vec<u8>> {
                tps_clone(me)?;
                assert_eq!(Runtime::global().tps_page_refcount()?, 3);
                tps_write(0, 3, b"HEL")?;

                let mut buffer = vec![0_u8; 12];
                tps_read(0, 12, &mut buffer)?;
                tps_destroy()?;
                Ok(buffer)
            });
            let second = second.join().unwrap()?;
            assert_eq!(second, b"HELlo world!");

            sem_up(cloned)?;
            sem_down(owner_wrote)?;

            // The owner's write went to a private copy as well
            let mut buffer = vec![0_u8; 12];
            tps_read(0, 12, &mut buffer)?;
            assert_eq!(Runtime::global().tps_page_refcount()?, 1);
            tps_destroy()?;
            Ok(buffer)
        });

        sem_down(cloned)?;
        tps_write(0, 1, b"H")?;
        sem_up(owner_wrote)?;

        assert_eq!(first.join().unwrap()?, b"hello world!");

        let mut buffer = vec![0_u8; 12];
        tps_read(0, 12, &mut buffer)?;
        assert_eq!(buffer, b"Hello world!");

        tps_destroy()?;
        sem_destroy(cloned)?;
        sem_destroy(owner_wrote)?;
        Ok(())
    })
}

#[test]
fn test_clone_failures() -> Result<()> {
    isolated(|| {
        // Target has no area
        let stranger = thread::spawn(ThreadId::current).join().unwrap();
        assert!(matches!(
            tps_clone(stranger),
            Err(Error::InvalidArgument { .. })
        ));

        // Caller already owns an area
        tps_create()?;
        let owner = ThreadId::current();
        let other = thread::spawn(move || -> Result<()> {
            tps_create()?;
            let result = tps_clone(owner);
            tps_destroy()?;
            assert!(matches!(result, Err(Error::InvalidArgument { .. })));
            Ok(())
        });
        other.join().unwrap()?;

        assert!(matches!(
            tps_clone(owner),
            Err(Error::InvalidArgument { .. })
        ));

        // Target destroyed before the clone
        tps_destroy()?;
        let late = thread::spawn(move || tps_clone(owner)).join().unwrap();
        assert!(matches!(late, Err(Error::InvalidArgument { .. })));
        Ok(())
    })
}

#[test]
fn test_clone_survives_owner_destroy() -> Result<()> {
    isolated(|| {
        tps_create()?;
        tps_write(0, 6, b"legacy")?;
        let owner = ThreadId::current();

        let ready = sem_create(0)?;
        let owner_gone = sem_create(0)?;

        let heir = thread::spawn(move || -> Result<Vec<u8>> {
            tps_clone(owner)?;
            sem_up(ready)?;
            sem_down(owner_gone)?;

            assert_eq!(Runtime::global().tps_page_refcount()?, 1);
            let mut buffer = vec![0_u8; 6];
            tps_read(0, 6, &mut buffer)?;
            tps_destroy()?;
            Ok(buffer)
        });

        sem_down(ready)?;
        tps_destroy()?;
        sem_up(owner_gone)?;

        assert_eq!(heir.join().unwrap()?, b"legacy");
        sem_destroy(ready)?;
        sem_destroy(owner_gone)?;
        Ok(())
    })
}
