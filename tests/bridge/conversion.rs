//! Scalar conversions: round trips, integer range checks, Dynamic targets

use guestlink::{Dynamic, Error, Object, TypeObject};
use pretty_assertions::assert_eq;

use super::{dynamic, guest, with_guest};

#[test]
fn test_scalar_round_trips() {
    with_guest(|ctx| {
        macro_rules! round_trip {
            ($($value:expr => $ty:ty),* $(,)?) => {
                $(
                    let o = guest(ctx, &$value);
                    assert_eq!(ctx.extract::<$ty>(o).ok(), Some($value));
                    ctx.decref(o);
                )*
            };
        }
        round_trip! {
            true => bool,
            false => bool,
            i8::MIN => i8,
            i16::MAX => i16,
            -7i32 => i32,
            i64::MIN => i64,
            isize::MAX => isize,
            u8::MAX => u8,
            u16::MAX => u16,
            u32::MAX => u32,
            u64::MAX => u64,
            usize::MAX => usize,
            1.5f32 => f32,
            -0.25f64 => f64,
            String::from("héllo") => String,
        }
    });
}

#[test]
fn test_integer_range_edges() {
    with_guest(|ctx| {
        let cases: Vec<(i64, Option<u8>)> = vec![(0, Some(0)), (255, Some(255)), (256, None)];
        for (n, expected) in cases {
            let o = guest(ctx, &n);
            assert_eq!(ctx.extract::<u8>(o).ok(), expected, "u8 from {n}");
            ctx.decref(o);
        }

        let o = guest(ctx, &-129i64);
        let err = ctx.extract::<i8>(o).err();
        assert!(matches!(err, Some(Error::OutOfRange { host: "i8" })));
        ctx.decref(o);

        let o = guest(ctx, &-128i64);
        assert_eq!(ctx.extract::<i8>(o).ok(), Some(i8::MIN));
        ctx.decref(o);
    });
}

#[test]
fn test_negative_into_unsigned_is_distinct() {
    with_guest(|ctx| {
        let o = guest(ctx, &-1i64);
        for err in [
            ctx.extract::<u8>(o).err(),
            ctx.extract::<u32>(o).err(),
            ctx.extract::<usize>(o).err(),
        ] {
            assert!(matches!(err, Some(Error::Negative { .. })), "{err:?}");
        }
        let message = ctx.extract::<u64>(o).err().map(|e| e.to_string());
        assert_eq!(
            message.as_deref(),
            Some("guest int is negative, cannot convert to host u64")
        );
        ctx.decref(o);

        let o = guest(ctx, &u64::MAX);
        let message = ctx.extract::<i64>(o).err().map(|e| e.to_string());
        assert_eq!(
            message.as_deref(),
            Some("guest int doesn't fit, cannot convert to host i64")
        );
        ctx.decref(o);
    });
}

#[test]
fn test_int_requires_guest_int() {
    with_guest(|ctx| {
        let o = guest(ctx, &2.5f64);
        let message = ctx.extract::<i64>(o).err().map(|e| e.to_string());
        assert_eq!(
            message.as_deref(),
            Some("cannot convert a guest float to host i64")
        );
        ctx.decref(o);
    });
}

#[test]
fn test_string_uses_str_protocol() {
    with_guest(|ctx| {
        let o = guest(ctx, &42i64);
        assert_eq!(ctx.extract::<String>(o).ok().as_deref(), Some("42"));
        ctx.decref(o);

        let o = guest(ctx, &"static");
        assert_eq!(ctx.extract::<String>(o).ok().as_deref(), Some("static"));
        ctx.decref(o);
    });
}

#[test]
fn test_bool_uses_truthiness() {
    with_guest(|ctx| {
        let empty = guest(ctx, &Vec::<i64>::new());
        let full = guest(ctx, &vec![0i64]);
        assert_eq!(ctx.extract::<bool>(empty).ok(), Some(false));
        assert_eq!(ctx.extract::<bool>(full).ok(), Some(true));
        ctx.decref_all(&[empty, full]);
    });
}

#[test]
fn test_dynamic_follows_guest_type() {
    with_guest(|ctx| {
        let cases: Vec<(Object, Dynamic)> = vec![
            (guest(ctx, &3i64), Dynamic::Int(3)),
            (guest(ctx, &u64::MAX), Dynamic::UInt(u64::MAX)),
            (guest(ctx, &0.5f64), Dynamic::Float(0.5)),
            (guest(ctx, &true), Dynamic::Bool(true)),
            (guest(ctx, &"x"), Dynamic::Str("x".into())),
            (ctx.new_ref(ctx.none()), Dynamic::None),
        ];
        for (o, expected) in cases {
            assert_eq!(dynamic(ctx, o), expected);
            ctx.decref(o);
        }
    });
}

#[test]
fn test_dynamic_to_guest() {
    with_guest(|ctx| {
        let value = Dynamic::List(vec![
            Dynamic::Int(1),
            Dynamic::Str("two".into()),
            Dynamic::None,
        ]);
        let o = guest(ctx, &value);
        assert_eq!(o.type_object().name(), "list");
        assert_eq!(dynamic(ctx, o), value);
        ctx.decref(o);
    });
}

#[test]
fn test_object_passes_through_as_new_reference() {
    with_guest(|ctx| {
        let o = guest(ctx, &"shared");
        let before = o.refcnt();

        let out = guest(ctx, &o);
        assert_eq!(out, o);
        assert_eq!(o.refcnt(), before + 1);

        let back: Object = ctx.extract(o).unwrap_or_default();
        assert_eq!(back, o);
        assert_eq!(o.refcnt(), before + 2);

        ctx.decref_all(&[out, back]);
        assert_eq!(o.refcnt(), before);
        ctx.decref(o);
    });
}

#[test]
fn test_null_object_is_rejected() {
    with_guest(|ctx| {
        assert!(ctx.to_guest(&Object::NULL).is_err());
        let mut dest = 0i64;
        let message = ctx
            .from_guest(Object::NULL, &mut dest)
            .err()
            .map(|e| e.to_string());
        assert_eq!(
            message.as_deref(),
            Some("cannot convert a guest NULL to host i64")
        );
    });
}

#[test]
fn test_type_objects() {
    with_guest(|ctx| {
        let o = guest(ctx, &"text");
        assert!(ctx.extract::<TypeObject>(o).is_err());

        let ty = o.type_object();
        let back: TypeObject = ctx.extract(ty.as_object()).unwrap_or_default();
        assert_eq!(back, ty);
        assert_eq!(back.name(), "str");
        ctx.decref(back.as_object());
        ctx.decref(o);
    });
}
