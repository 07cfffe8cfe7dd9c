//! Custom conversions added through the public registry

use guestlink::convert::{self, AsAny, Conversion, ReflectMut};
use guestlink::{Dynamic, Error, Reflect, TypeObject};
use pretty_assertions::assert_eq;

use super::{dynamic, guest, with_guest};

#[derive(Debug, Default, Clone, PartialEq)]
struct Celsius(f64);

#[derive(Debug, Default, Clone, PartialEq)]
struct Tag(String);

#[derive(Debug, Default)]
struct Orphan;

guestlink::reflect_opaque!(Celsius, Tag, Orphan);

fn celsius() -> Conversion {
    Conversion::for_type::<Celsius>()
        .to_guest(|ctx, value| {
            let degrees = value.as_any().downcast_ref::<Celsius>().map_or(0.0, |c| c.0);
            ctx.to_guest(&degrees)
        })
        .from_guest(|ctx, o, dest| {
            let degrees: f64 = ctx.extract(o)?;
            match dest.as_any_mut().downcast_mut::<Celsius>() {
                Some(slot) => {
                    *slot = Celsius(degrees);
                    Ok(())
                }
                None => Err(Error::runtime("not a Celsius destination")),
            }
        })
}

/// Tags go to the guest as one comma separated string instead of a list.
fn tag_list() -> Conversion {
    Conversion::for_type::<Vec<Tag>>().to_guest(|ctx, value| {
        let tags = value.as_any().downcast_ref::<Vec<Tag>>();
        let joined = tags
            .map(|tags| tags.iter().map(|t| t.0.as_str()).collect::<Vec<_>>().join(","))
            .unwrap_or_default();
        ctx.to_guest(&joined)
    })
}

#[test]
fn test_exact_type_conversion() {
    with_guest(|ctx| {
        assert!(convert::register(vec![celsius()]).is_ok());
        let o = guest(ctx, &Celsius(21.5));
        assert_eq!(o.type_object().name(), "float");
        assert_eq!(ctx.extract::<Celsius>(o).ok(), Some(Celsius(21.5)));
        ctx.decref(o);
        convert::deregister(&[celsius()]);

        let err = ctx.to_guest(&Celsius(0.0)).err().map(|e| e.to_string());
        assert_eq!(
            err.as_deref(),
            Some("cannot convert a host bridge::registry::Celsius to guest")
        );
    });
}

#[test]
fn test_exact_type_wins_over_kind() {
    with_guest(|ctx| {
        let tags = vec![Tag("a".into()), Tag("b".into())];
        assert!(ctx.to_guest(&tags).is_err(), "Tag itself has no conversion");

        assert!(convert::register(vec![tag_list()]).is_ok());
        let o = guest(ctx, &tags);
        assert_eq!(dynamic(ctx, o), Dynamic::from("a,b"));
        ctx.decref(o);

        // other sequences still go through the kind handler
        let o = guest(ctx, &vec![1i64, 2]);
        assert_eq!(o.type_object().name(), "list");
        ctx.decref(o);
        convert::deregister(&[tag_list()]);
    });
}

#[test]
fn test_batches_are_atomic() {
    with_guest(|ctx| {
        // serde_json::Value is registered by type out of the box
        let clash = Conversion::for_type::<serde_json::Value>()
            .to_guest(|ctx, _| ctx.to_guest(&"clash"));
        let orphan = Conversion::for_type::<Orphan>().to_guest(|ctx, _| ctx.to_guest(&"orphan"));
        let err = convert::register(vec![orphan.clone(), clash])
            .err()
            .map(|e| e.to_string());
        assert_eq!(
            err.as_deref(),
            Some("Type handler is already registered: serde_json::value::Value")
        );
        // neither half of the failed batch took effect
        assert!(matches!(ctx.to_guest(&Orphan).err(), Some(Error::ToGuest { .. })));
        let o = guest(ctx, &serde_json::json!({"a": 1}));
        assert_eq!(o.type_object().name(), "dict");
        ctx.decref(o);

        let err = convert::register(vec![Conversion::new().to_guest(|ctx, _| ctx.to_guest(&0i64))])
            .err()
            .map(|e| e.to_string());
        assert_eq!(
            err.as_deref(),
            Some("either a host type, a kind or a guest type must be set")
        );

        // the same conversion alone goes through
        assert!(convert::register(vec![orphan.clone()]).is_ok());
        let o = guest(ctx, &Orphan);
        assert_eq!(dynamic(ctx, o), Dynamic::from("orphan"));
        ctx.decref(o);
        convert::deregister(&[orphan]);
        assert!(matches!(ctx.to_guest(&Orphan).err(), Some(Error::ToGuest { .. })));
    });
}

#[test]
fn test_guest_type_conversion_fills_dynamic() {
    with_guest(|ctx| {
        let namedtuple = ctx.lookup("collections.namedtuple").unwrap_or_default();
        let args = [guest(ctx, &"Coord"), guest(ctx, &vec!["x", "y"])];
        let ty = ctx.call(namedtuple, &args).unwrap_or_default();
        ctx.decref_all(&args);
        ctx.decref(namedtuple);
        let coord_type = TypeObject::from_object(ty);
        assert_eq!(coord_type.name(), "Coord");

        let point = [guest(ctx, &3i64), guest(ctx, &4i64)];
        let coord = ctx.call(ty, &point).unwrap_or_default();
        ctx.decref_all(&point);
        assert!(ctx.extract::<Dynamic>(coord).is_err());

        let conversion = Conversion::for_guest_type(coord_type).from_guest(|ctx, o, dest| {
            let parts: Vec<i64> = ctx.extract(o)?;
            match dest.reflect_mut() {
                ReflectMut::Any(d) => {
                    *d = Dynamic::Str(format!("{parts:?}"));
                    Ok(())
                }
                _ => Err(Error::runtime("Coord converts to Dynamic only")),
            }
        });
        assert!(convert::register(vec![conversion.clone()]).is_ok());
        assert_eq!(dynamic(ctx, coord), Dynamic::from("[3, 4]"));
        // typed destinations still use their own handlers
        assert_eq!(ctx.extract::<Vec<i64>>(coord).ok(), Some(vec![3, 4]));

        let err = convert::register(vec![conversion.clone()]).err().map(|e| e.to_string());
        assert_eq!(
            err.as_deref(),
            Some("TypeObject handler is already registered: Coord")
        );
        convert::deregister(&[conversion]);
        assert!(ctx.extract::<Dynamic>(coord).is_err());
        ctx.decref_all(&[coord, ty]);
    });
}
