//! Host functions called from the guest

use guestlink::{Ctx, Dynamic, Error, HostFunction, Object, Rest};
use pretty_assertions::assert_eq;

use super::{call, dynamic, exception, guest, with_guest};

fn checked_add(_ctx: &Ctx, a: i64, b: i64) -> guestlink::Result<i64> {
    if a < 0 || b < 0 {
        return Err(Error::value_error(format!("negative input: {a}, {b}")));
    }
    Ok(a + b)
}

#[test]
fn test_sum_and_error_paths() {
    with_guest(|ctx| {
        let f = guest(ctx, &HostFunction::new(checked_add).named("add"));

        let sum = call(ctx, f, &[&2i64, &40i64]);
        let sum = sum.map(|o| {
            let value = dynamic(ctx, o);
            ctx.decref(o);
            value
        });
        assert_eq!(sum.ok(), Some(Dynamic::Int(42)));

        let err = call(ctx, f, &[&-1i64, &1i64]).err();
        assert_eq!(
            err.as_ref().map(exception),
            Some(("ValueError".to_string(), "negative input: -1, 1".to_string()))
        );
        ctx.decref(f);
    });
}

#[test]
fn test_host_errors_raise_runtime_error() {
    with_guest(|ctx| {
        let f = guest(
            ctx,
            &HostFunction::new(|| -> Result<(), String> { Err("disk on fire".into()) }),
        );
        let err = call(ctx, f, &[]).err();
        assert_eq!(
            err.as_ref().map(exception),
            Some(("RuntimeError".to_string(), "disk on fire".to_string()))
        );
        ctx.decref(f);
    });
}

#[test]
fn test_arity_and_argument_errors() {
    with_guest(|ctx| {
        let f = guest(ctx, &HostFunction::new(checked_add).named("add"));

        let err = call(ctx, f, &[&1i64]).err();
        assert_eq!(
            err.as_ref().map(exception),
            Some((
                "TypeError".to_string(),
                "add() takes 2 positional arguments but 1 was given".to_string()
            ))
        );

        let err = call(ctx, f, &[&1i64, &"x"]).err();
        assert_eq!(
            err.as_ref().map(exception),
            Some((
                "TypeError".to_string(),
                "arg #1: cannot convert a guest str to host i64".to_string()
            ))
        );
        ctx.decref(f);
    });
}

#[test]
fn test_keyword_arguments_are_rejected() {
    with_guest(|ctx| {
        let f = guest(ctx, &HostFunction::new(|| 1i64));
        let one = guest(ctx, &1i64);

        let empty = guest(ctx, &Dynamic::Dict(Vec::new()));
        let out = ctx.call_kw(f, &[], empty);
        assert_eq!(out.as_ref().map(|o| dynamic(ctx, *o)).ok(), Some(Dynamic::Int(1)));
        if let Ok(o) = out {
            ctx.decref(o);
        }

        let kwargs = guest(ctx, &Dynamic::Dict(vec![(Dynamic::from("x"), Dynamic::Int(1))]));
        let err = ctx.call_kw(f, &[one], kwargs).err();
        assert_eq!(
            err.as_ref().map(exception),
            Some((
                "TypeError".to_string(),
                "Unexpected keyword arguments".to_string()
            ))
        );
        ctx.decref_all(&[f, one, empty, kwargs]);
    });
}

#[test]
fn test_variadic_tail() {
    with_guest(|ctx| {
        let total = guest(
            ctx,
            &HostFunction::new(|Rest(xs): Rest<f64>| xs.iter().sum::<f64>()),
        );
        for (args, expected) in [
            (vec![], 0.0),
            (vec![1.5f64], 1.5),
            (vec![1.0, 2.0, 3.0], 6.0),
        ] {
            let refs: Vec<&dyn guestlink::Reflect> =
                args.iter().map(|x| x as &dyn guestlink::Reflect).collect();
            let out = call(ctx, total, &refs).ok();
            assert_eq!(out.map(|o| dynamic(ctx, o)), Some(Dynamic::Float(expected)));
            if let Some(o) = out {
                ctx.decref(o);
            }
        }

        let join = guest(
            ctx,
            &HostFunction::new(|first: String, Rest(rest): Rest<String>| {
                std::iter::once(first).chain(rest).collect::<Vec<_>>().join("-")
            }),
        );
        let err = call(ctx, join, &[]).err();
        assert_eq!(
            err.as_ref().map(exception),
            Some((
                "TypeError".to_string(),
                "function() takes at least 1 positional argument but 0 were given".to_string()
            ))
        );
        let out = call(ctx, join, &[&"a", &"b", &"c"]).ok();
        assert_eq!(out.map(|o| dynamic(ctx, o)), Some(Dynamic::from("a-b-c")));
        if let Some(o) = out {
            ctx.decref(o);
        }
        ctx.decref_all(&[total, join]);
    });
}

#[test]
#[allow(clippy::panic)]
fn test_panics_become_runtime_errors() {
    with_guest(|ctx| {
        let f = guest(ctx, &HostFunction::new(|| -> i64 { panic!("kaboom") }));
        let err = call(ctx, f, &[]).err();
        assert_eq!(
            err.as_ref().map(exception),
            Some(("RuntimeError".to_string(), "panic: kaboom".to_string()))
        );
        assert!(ctx.has_access(), "access is restored after a panic");
        ctx.decref(f);
    });
}

#[test]
fn test_access_is_released_by_default() {
    with_guest(|ctx| {
        let released = guest(ctx, &HostFunction::new(|ctx: &Ctx| ctx.has_access()));
        let kept = guest(
            ctx,
            &HostFunction::new(|ctx: &Ctx| ctx.has_access()).interpreter_access(true),
        );
        for (f, expected) in [(released, false), (kept, true)] {
            let out = call(ctx, f, &[]).ok();
            assert_eq!(out.map(|o| dynamic(ctx, o)), Some(Dynamic::Bool(expected)));
            if let Some(o) = out {
                ctx.decref(o);
            }
        }
        assert!(ctx.has_access());
        ctx.decref_all(&[released, kept]);
    });
}

#[test]
fn test_result_shapes() {
    with_guest(|ctx| {
        let unit = guest(ctx, &HostFunction::new(|| {}));
        let pair = guest(ctx, &HostFunction::new(|| (1i64, "two".to_string())));
        let null = guest(ctx, &HostFunction::new(|| Object::NULL));

        let out = call(ctx, unit, &[]).ok();
        assert_eq!(out.map(|o| ctx.is_none(o)), Some(true));

        let out = call(ctx, pair, &[]).ok();
        assert_eq!(out.map(|o| o.type_object().name()).as_deref(), Some("tuple"));
        assert_eq!(
            out.map(|o| dynamic(ctx, o)),
            Some(Dynamic::List(vec![Dynamic::Int(1), Dynamic::from("two")]))
        );
        if let Some(o) = out {
            ctx.decref(o);
        }

        let err = call(ctx, null, &[]).err();
        assert_eq!(
            err.as_ref().map(exception),
            Some((
                "TypeError".to_string(),
                "host function returned the null object".to_string()
            ))
        );
        ctx.decref_all(&[unit, pair, null]);
    });
}

#[test]
fn test_object_arguments_are_released_after_the_call() {
    with_guest(|ctx| {
        let count = guest(ctx, &HostFunction::new(|o: Object| o.refcnt()));
        let identity = guest(ctx, &HostFunction::new(|ctx: &Ctx, o: Object| ctx.new_ref(o)));
        let arg = guest(ctx, &"arg");
        let before = arg.refcnt();

        // the argument tuple and the extracted Object each hold one
        let out = ctx.call(count, &[arg]).ok();
        assert_eq!(out.and_then(|o| ctx.extract::<isize>(o).ok()), Some(before + 2));
        if let Some(o) = out {
            ctx.decref(o);
        }
        assert_eq!(arg.refcnt(), before);

        let same = ctx.call(identity, &[arg]).ok();
        assert_eq!(same, Some(arg));
        assert_eq!(arg.refcnt(), before + 1);
        ctx.decref_all(&[arg, count, identity]);
        if let Some(o) = same {
            ctx.decref(o);
        }
    });
}

#[test]
fn test_function_attributes() {
    with_guest(|ctx| {
        let module = ctx.new_module("fn_attrs").unwrap_or_default();
        let double = HostFunction::new(|x: i64| x * 2);
        assert!(ctx.set_attr_value(module, "double", &double).is_ok());
        let f = ctx.getattr(module, "double").unwrap_or_default();

        let text = |name: &str| {
            ctx.getattr(f, name)
                .and_then(|o| {
                    let s = ctx.str(o);
                    ctx.decref(o);
                    s
                })
                .ok()
        };
        assert_eq!(text("__name__").as_deref(), Some("double"));
        assert_eq!(text("__doc__").as_deref(), Some("fn(i64) -> i64"));
        assert_eq!(text("__module__").as_deref(), Some("None"));
        assert_eq!(f.type_object().name(), "HostFunction");
        assert_eq!(text("__class__").as_deref(), Some("<class 'HostFunction'>"));

        let doc = guest(ctx, &"Doubles its argument.");
        assert!(ctx.setattr(f, "__doc__", doc).is_ok());
        assert_eq!(text("__doc__").as_deref(), Some("Doubles its argument."));

        let err = ctx.setattr(f, "__class__", doc).err();
        assert_eq!(
            err.as_ref().map(exception),
            Some((
                "AttributeError".to_string(),
                "attribute '__class__' of 'HostFunction' objects is not writable".to_string()
            ))
        );
        let err = ctx.getattr(f, "speed").err();
        assert_eq!(
            err.as_ref().map(exception),
            Some((
                "AttributeError".to_string(),
                "'HostFunction' object has no attribute 'speed'".to_string()
            ))
        );
        let err = call(ctx, f, &[]).err().map(|e| e.exception_message());
        assert_eq!(
            err.as_deref(),
            Some("double() takes 1 positional argument but 0 were given")
        );
        ctx.decref_all(&[doc, f, module]);
    });
}

#[test]
fn test_functions_convert_back() {
    with_guest(|ctx| {
        let original = HostFunction::new(|a: i64, b: i64| a * b).named("mul");
        let o = guest(ctx, &original);

        let back: HostFunction = ctx.extract(o).unwrap_or_default();
        assert_eq!(back, original);
        assert_eq!(back.name(), Some("mul"));
        assert_eq!(dynamic(ctx, o), Dynamic::Func(original));

        let args = [guest(ctx, &6i64), guest(ctx, &7i64)];
        let product = back.call(ctx, &args).ok();
        assert_eq!(product.map(|p| dynamic(ctx, p)), Some(Dynamic::Int(42)));
        if let Some(p) = product {
            ctx.decref(p);
        }
        ctx.decref_all(&args);
        ctx.decref(o);
    });
}
