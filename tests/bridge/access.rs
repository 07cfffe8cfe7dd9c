//! Execution contexts: flows, exclusive access and its guards

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use guestlink::Error;

use super::{spawner, with_guest};

#[test]
fn test_enter_guest_is_mutually_exclusive() {
    let (entered_tx, entered_rx) = mpsc::channel::<()>();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let inside = Arc::new(AtomicBool::new(false));

    let holder_spawner = spawner();
    let holder = thread::spawn(move || -> guestlink::Result<()> {
        let flow = holder_spawner.new_flow(None)?;
        flow.enter_guest();
        let _ = entered_tx.send(());
        let _ = release_rx.recv();
        flow.leave_guest();
        flow.close()
    });
    assert!(entered_rx.recv().is_ok());

    let waiter_spawner = spawner();
    let waiter_inside = Arc::clone(&inside);
    let waiter = thread::spawn(move || -> guestlink::Result<()> {
        let flow = waiter_spawner.new_flow(None)?;
        flow.enter_guest();
        waiter_inside.store(true, Ordering::SeqCst);
        flow.leave_guest();
        flow.close()
    });

    thread::sleep(Duration::from_millis(100));
    assert!(!inside.load(Ordering::SeqCst), "waiter entered while the holder had access");

    assert!(release_tx.send(()).is_ok());
    assert!(matches!(holder.join(), Ok(Ok(()))));
    assert!(matches!(waiter.join(), Ok(Ok(()))));
    assert!(inside.load(Ordering::SeqCst));
}

#[test]
fn test_flow_starts_without_access() {
    let outcome = thread::spawn(|| -> guestlink::Result<(bool, bool, bool)> {
        let flow = spawner().new_flow(None)?;
        let initially = flow.has_access();
        let during = {
            let _access = flow.access();
            flow.has_access()
        };
        let after = flow.has_access();
        flow.close()?;
        Ok((initially, during, after))
    })
    .join();
    assert!(matches!(outcome, Ok(Ok((false, true, false)))));
}

#[test]
fn test_nested_guards() {
    with_guest(|ctx| {
        {
            let _inner = ctx.access();
            assert!(ctx.has_access());
        }
        assert!(ctx.has_access(), "a guard that did not enter must not leave");
        {
            let _released = ctx.release();
            assert!(!ctx.has_access());
        }
        assert!(ctx.has_access());
    });
}

#[test]
fn test_one_context_per_thread() {
    let outcome = thread::spawn(|| -> guestlink::Result<String> {
        let first = spawner().new_flow(None)?;
        let second = spawner().new_flow(None);
        let message = second.err().map(|e| e.to_string()).unwrap_or_default();
        first.close()?;
        // closing frees the thread for a new context
        spawner().new_flow(None)?.close()?;
        Ok(message)
    })
    .join();
    let message = outcome.ok().and_then(|r| r.ok());
    assert_eq!(
        message.as_deref(),
        Some("this thread already owns a guest context")
    );
}

#[test]
fn test_flows_share_the_embedding() {
    let handles: Vec<_> = (0..4i64)
        .map(|n| {
            let spawner = spawner();
            thread::spawn(move || -> guestlink::Result<i64> {
                let flow = spawner.new_flow(None)?;
                let result = {
                    let _access = flow.access();
                    let o = flow.to_guest(&vec![n; 3])?;
                    let back: Vec<i64> = flow.extract(o)?;
                    flow.decref(o);
                    back.iter().sum()
                };
                flow.close()?;
                Ok(result)
            })
        })
        .collect();
    let sums: Vec<Option<i64>> = handles
        .into_iter()
        .map(|h| h.join().ok().and_then(|r| r.ok()))
        .collect();
    assert_eq!(sums, vec![Some(0), Some(3), Some(6), Some(9)]);
}

#[test]
fn test_errors_are_not_pending_after_catch() {
    with_guest(|ctx| {
        ctx.raise("KeyError", "k");
        assert!(ctx.error_pending());
        let err = ctx.catch_error();
        assert!(matches!(
            err,
            Error::Guest(ref g) if g.type_name == "KeyError" && g.message == "k"
        ));
        assert!(!ctx.error_pending());
    });
}
