//! Extension modules built by host code on first import

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use guestlink::{Ctx, Dynamic, Error, HostFunction, Object, module};
use pretty_assertions::assert_eq;
use serde::{Deserialize, Serialize};

use super::{call, dynamic, exception, with_guest};

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
struct Vertex {
    x: i64,
    y: i64,
}

guestlink::reflect_struct!(Vertex);

fn attr(ctx: &Ctx, o: Object, name: &str) -> Option<Dynamic> {
    let found = ctx.getattr(o, name).ok()?;
    let value = dynamic(ctx, found);
    ctx.decref(found);
    Some(value)
}

fn build_geometry(ctx: &Ctx, m: Object) -> guestlink::Result<()> {
    ctx.module_set_doc(m, "Plane geometry helpers.")?;
    let area = HostFunction::new(|w: f64, h: f64| w * h).named("area");
    ctx.set_attr_value(m, "area", &area)?;
    ctx.register_struct::<Vertex>()?;
    let ty = ctx.struct_type::<Vertex>()?;
    let added = ctx.module_add_type(m, ty);
    ctx.decref(ty.as_object());
    added
}

#[test]
fn test_module_is_built_once_on_first_import() {
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let defined = module::extend("geometry_ext", move |ctx: &Ctx, m| {
        counter.fetch_add(1, Ordering::SeqCst);
        build_geometry(ctx, m)
    });
    assert!(defined.is_ok());

    with_guest(|ctx| {
        let m = ctx.import("geometry_ext").unwrap_or_default();
        assert!(!m.is_null());
        assert_eq!(
            attr(ctx, m, "__doc__"),
            Some(Dynamic::from("Plane geometry helpers."))
        );

        let area = ctx.getattr(m, "area").unwrap_or_default();
        let result = call(ctx, area, &[&2.0f64, &3.5f64]).unwrap_or_default();
        assert_eq!(dynamic(ctx, result), Dynamic::Float(7.0));
        assert_eq!(attr(ctx, area, "__name__"), Some(Dynamic::from("area")));
        ctx.decref_all(&[result, area]);

        let ty = ctx.getattr(m, "Vertex").unwrap_or_default();
        assert_eq!(attr(ctx, ty, "__name__"), Some(Dynamic::from("Vertex")));
        assert_eq!(
            attr(ctx, ty, "__module__"),
            Some(Dynamic::from("geometry_ext"))
        );

        let again = ctx.import("geometry_ext").unwrap_or_default();
        assert_eq!(again, m);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        ctx.decref_all(&[again, ty, m]);
    });
}

#[test]
fn test_failed_init_raises_and_is_retried() {
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let defined = module::extend("broken_ext", move |_: &Ctx, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        Err(Error::value_error("missing config"))
    });
    assert!(defined.is_ok());

    with_guest(|ctx| {
        let err = ctx.import("broken_ext").err();
        assert_eq!(
            err.as_ref().map(exception),
            Some(("ValueError".to_string(), "missing config".to_string()))
        );
        assert!(!ctx.error_pending());

        assert!(ctx.import("broken_ext").is_err());
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    });
}

#[test]
#[allow(clippy::panic)]
fn test_panicking_init_fails_the_import() {
    let defined = module::extend("panicky_ext", |_: &Ctx, _| panic!("no geometry here"));
    assert!(defined.is_ok());

    with_guest(|ctx| {
        let err = ctx.import("panicky_ext").err();
        assert_eq!(
            err.as_ref().map(exception),
            Some((
                "RuntimeError".to_string(),
                "panic: no geometry here".to_string()
            ))
        );
    });
}

#[test]
fn test_names_are_unique_until_retracted() {
    assert!(module::extend("dup_ext", |_: &Ctx, _| Ok(())).is_ok());
    let err = module::extend("dup_ext", |_: &Ctx, _| Ok(()))
        .err()
        .map(|e| e.to_string());
    assert_eq!(
        err.as_deref(),
        Some("extension module 'dup_ext' is already registered")
    );

    assert!(module::retract("dup_ext"));
    assert!(!module::retract("dup_ext"));

    with_guest(|ctx| {
        let err = ctx.import("dup_ext").err();
        assert_eq!(
            err.as_ref().map(exception),
            Some((
                "ModuleNotFoundError".to_string(),
                "No module named 'dup_ext'".to_string()
            ))
        );
    });
}
