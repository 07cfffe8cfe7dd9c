//! Reference counting discipline of the object wrapper

use guestlink::Object;

use super::{guest, with_guest};

#[test]
fn test_net_effect_of_increments_and_decrements() {
    with_guest(|ctx| {
        let o = guest(ctx, &"counted");
        assert_eq!(o.refcnt(), 1);

        let extra = ctx.new_ref(o);
        assert_eq!(extra, o);
        ctx.incref(o);
        ctx.incref_all(&[o, o]);
        assert_eq!(o.refcnt(), 5);

        ctx.decref_all(&[o, o, o]);
        assert_eq!(o.refcnt(), 2);
        ctx.decref(extra);
        assert_eq!(o.refcnt(), 1);
        ctx.decref(o);
    });
}

#[test]
fn test_null_is_a_noop() {
    with_guest(|ctx| {
        ctx.incref(Object::NULL);
        ctx.decref(Object::NULL);
        ctx.decref_all(&[Object::NULL, Object::NULL]);
        assert_eq!(ctx.new_ref(Object::NULL), Object::NULL);
        assert!(Object::NULL.type_object().is_null());
    });
}

#[test]
fn test_owned_guard_releases_on_drop() {
    with_guest(|ctx| {
        let o = guest(ctx, &vec![1i64]);
        ctx.incref(o);
        {
            let owned = ctx.owned(o);
            assert_eq!(owned.refcnt(), 2);
        }
        assert_eq!(o.refcnt(), 1);

        let kept = ctx.owned(ctx.new_ref(o)).into_inner();
        assert_eq!(kept.refcnt(), 2);
        ctx.decref_all(&[kept, o]);
    });
}

#[test]
fn test_container_holds_its_items() {
    with_guest(|ctx| {
        let item = guest(ctx, &"item");
        let list = ctx.list(&[item, item]);
        assert_eq!(item.refcnt(), 3);
        ctx.decref(list);
        assert_eq!(item.refcnt(), 1);
        ctx.decref(item);
    });
}

#[test]
fn test_guest_errors_surface_from_wrap() {
    with_guest(|ctx| {
        let o = guest(ctx, &5i64);
        let err = ctx.getattr(o, "missing").err();
        let guest_err = err.as_ref().and_then(|e| e.as_guest());
        assert_eq!(
            guest_err.map(|e| (e.type_name.as_str(), e.message.as_str())),
            Some(("AttributeError", "'int' object has no attribute 'missing'"))
        );
        assert!(!ctx.error_pending());
        ctx.decref(o);
    });
}
