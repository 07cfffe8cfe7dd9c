//! Tracebacks of guest exceptions raised under host calls

use guestlink::{Ctx, Error};
use pretty_assertions::assert_eq;

use super::{guest, with_guest};

#[inline(never)]
fn measure_outer(ctx: &Ctx) -> Option<Error> {
    measure_inner(ctx)
}

#[inline(never)]
fn measure_inner(ctx: &Ctx) -> Option<Error> {
    let len = ctx.lookup("builtins.len").ok()?;
    let five = guest(ctx, &5i64);
    let err = ctx.call(len, &[five]).err();
    ctx.decref_all(&[five, len]);
    err
}

fn position(lines: &[String], needle: &str) -> Option<usize> {
    lines.iter().position(|line| line.contains(needle))
}

#[test]
#[allow(clippy::panic)]
fn test_host_frames_lead_to_the_guest_frame() {
    with_guest(|ctx| {
        let err = measure_outer(ctx);
        let Some(guest_err) = err.as_ref().and_then(Error::as_guest) else {
            panic!("expected a guest exception, got {err:?}");
        };
        assert_eq!(guest_err.type_name, "TypeError");
        assert_eq!(guest_err.message, "object of type 'int' has no len()");

        let lines = &guest_err.traceback;
        assert_eq!(
            lines.first().map(String::as_str),
            Some("Traceback (most recent call last):\n")
        );
        assert_eq!(
            lines.last().map(String::as_str),
            Some("  File \"<guest>\", line 1, in len\n")
        );

        // callers come outermost first, then the guest frame
        let outer = position(lines, "measure_outer");
        let inner = position(lines, "measure_inner");
        let guest_frame = position(lines, "<guest>");
        assert!(outer.is_some() && inner.is_some(), "{lines:#?}");
        assert!(outer < inner && inner < guest_frame, "{lines:#?}");

        // the frames that turned the exception into an error are elided
        assert_eq!(position(lines, "catch_error"), None, "{lines:#?}");
        assert_eq!(position(lines, "::wrap"), None, "{lines:#?}");
        assert_eq!(position(lines, "backtrace::"), None, "{lines:#?}");
    });
}
