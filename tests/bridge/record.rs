//! Registered host structs and their guest record types

use guestlink::{Dynamic, Error, Object};
use pretty_assertions::assert_eq;
use serde::{Deserialize, Serialize};

use super::{dynamic, guest, with_guest};

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
struct Track {
    id: i64,
    #[serde(rename = "title")]
    name: String,
    rating: f64,
    #[serde(skip)]
    scratch: Vec<u8>,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
struct Album {
    id: i64,
    name: String,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
struct Credit {
    role: String,
    label: Label,
    extra: Extra,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
struct Label {
    name: String,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
struct Extra {
    note: String,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
struct Nothing {}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
struct Seconds(f64);

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
struct Playlist {
    title: String,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
struct Sample {
    id: i64,
    #[serde(rename = "title")]
    name: String,
    rating: f64,
}

guestlink::reflect_struct!(Track, Album, Credit, Label, Extra, Nothing, Seconds, Playlist, Sample);

fn item(ctx: &guestlink::Ctx, o: Object, index: usize) -> Option<Dynamic> {
    let found = ctx.get_item(o, index).ok()?;
    let value = dynamic(ctx, found);
    ctx.decref(found);
    Some(value)
}

#[test]
fn test_struct_round_trip_keeps_fields_and_order() {
    with_guest(|ctx| {
        assert!(ctx.register_struct::<Track>().is_ok());
        let track = Track {
            id: 7,
            name: "Intro".into(),
            rating: 4.5,
            scratch: vec![1, 2, 3],
        };
        let o = guest(ctx, &track);
        assert_eq!(o.type_object().name(), "Track");
        assert_eq!(ctx.len(o).ok(), Some(3));
        assert_eq!(item(ctx, o, 0), Some(Dynamic::Int(7)));
        assert_eq!(item(ctx, o, 1), Some(Dynamic::from("Intro")));
        assert_eq!(item(ctx, o, 2), Some(Dynamic::Float(4.5)));

        let title = ctx.getattr(o, "title").ok();
        assert_eq!(title.map(|t| dynamic(ctx, t)), Some(Dynamic::from("Intro")));
        if let Some(t) = title {
            ctx.decref(t);
        }
        assert!(ctx.getattr(o, "name").is_err());
        assert!(ctx.getattr(o, "scratch").is_err());

        let back: Track = ctx.extract(o).unwrap_or_default();
        assert_eq!(
            back,
            Track {
                scratch: Vec::new(),
                ..track
            }
        );
        ctx.decref(o);
        assert!(ctx.deregister_struct::<Track>().is_ok());
    });
}

#[test]
fn test_dynamic_records() {
    with_guest(|ctx| {
        assert!(ctx.register_struct::<Album>().is_ok());
        let album = Album {
            id: 1,
            name: "Blue".into(),
        };
        let o = guest(ctx, &album);
        let record = match dynamic(ctx, o) {
            Dynamic::Record(record) => Some(record),
            _ => None,
        };
        assert_eq!(record.as_ref().map(|r| r.name()), Some("Album"));
        assert_eq!(
            record.as_ref().and_then(|r| r.downcast_ref::<Album>()),
            Some(&album)
        );

        let again = guest(ctx, &record.map_or(Dynamic::None, Dynamic::Record));
        assert_eq!(again.type_object(), o.type_object());
        assert_eq!(ctx.extract::<Album>(again).ok(), Some(album));
        ctx.decref_all(&[again, o]);
        assert!(ctx.deregister_struct::<Album>().is_ok());
    });
}

#[test]
fn test_nested_structs() {
    with_guest(|ctx| {
        assert!(ctx.register_struct::<Label>().is_ok());
        assert!(ctx.register_struct::<Credit>().is_ok());
        let credit = Credit {
            role: "mixing".into(),
            label: Label {
                name: "Night Shift".into(),
            },
            extra: Extra {
                note: "remaster".into(),
            },
        };
        let o = guest(ctx, &credit);

        // registered: a record; unregistered: a dict
        let label = ctx.getattr(o, "label").ok();
        assert_eq!(label.map(|l| l.type_object().name()).as_deref(), Some("Label"));
        let extra = ctx.getattr(o, "extra").ok();
        assert_eq!(extra.map(|e| e.type_object().name()).as_deref(), Some("dict"));
        assert_eq!(
            extra.map(|e| dynamic(ctx, e)),
            Some(Dynamic::Dict(vec![(
                Dynamic::from("note"),
                Dynamic::from("remaster")
            )]))
        );
        for o in [label, extra].into_iter().flatten() {
            ctx.decref(o);
        }

        assert_eq!(ctx.extract::<Credit>(o).ok(), Some(credit));
        ctx.decref(o);
        assert!(ctx.deregister_struct::<Credit>().is_ok());
        assert!(ctx.deregister_struct::<Label>().is_ok());
    });
}

#[test]
fn test_registration_errors() {
    with_guest(|ctx| {
        assert!(ctx.register_struct::<Playlist>().is_ok());
        let err = ctx.register_struct::<Playlist>().err().map(|e| e.to_string());
        assert_eq!(
            err.as_deref(),
            Some("struct 'Playlist' is already registered")
        );

        let err = ctx.register_struct::<Nothing>().err().map(|e| e.to_string());
        assert_eq!(err.as_deref(), Some("struct 'Nothing' has no exported fields"));
        let err = ctx.register_struct::<Seconds>().err().map(|e| e.to_string());
        assert_eq!(err.as_deref(), Some("struct 'Seconds' has no exported fields"));

        assert!(ctx.deregister_struct::<Playlist>().is_ok());
        let err = ctx.deregister_struct::<Playlist>().err();
        assert!(matches!(err, Some(Error::Struct(_))));
        let err = ctx.struct_type::<Playlist>().err().map(|e| e.to_string());
        assert_eq!(err.as_deref(), Some("struct 'Playlist' is not registered"));

        // Unregistered structs have no conversion of their own.
        let err = ctx
            .to_guest(&Playlist {
                title: "late".into(),
            })
            .err();
        assert!(matches!(err, Some(Error::ToGuest { .. })));
    });
}

#[test]
fn test_struct_type_and_mismatched_sources() {
    with_guest(|ctx| {
        assert!(ctx.register_struct::<Sample>().is_ok());
        let ty = ctx.struct_type::<Sample>();
        assert_eq!(ty.as_ref().map(|t| t.name()).ok().as_deref(), Some("Sample"));

        let sample = Sample {
            id: 3,
            name: "s".into(),
            rating: 1.0,
        };
        let o = guest(ctx, &sample);
        assert_eq!(ty.as_ref().ok().copied(), Some(o.type_object()));

        // A record built by the guest converts like one built by the host.
        let built = ty.as_ref().ok().and_then(|ty| {
            let args = [guest(ctx, &9i64), guest(ctx, &"built"), guest(ctx, &0.5f64)];
            let built = ctx.call(ty.as_object(), &args).ok();
            ctx.decref_all(&args);
            built
        });
        assert_eq!(
            built.and_then(|b| ctx.extract::<Sample>(b).ok()),
            Some(Sample {
                id: 9,
                name: "built".into(),
                rating: 0.5,
            })
        );

        // A dict source is read by key; a missing field is reported by name.
        let dict = guest(
            ctx,
            &Dynamic::Dict(vec![
                (Dynamic::from("id"), Dynamic::Int(4)),
                (Dynamic::from("title"), Dynamic::from("d")),
            ]),
        );
        let err = ctx.extract::<Sample>(dict).err().map(|e| e.to_string());
        assert_eq!(err.as_deref(), Some("missing field `rating`"));

        // Any other source is read by attribute.
        let partial = ctx.lookup("collections.namedtuple").ok().and_then(|namedtuple| {
            let args = [guest(ctx, &"Partial"), guest(ctx, &"id")];
            let partial_type = ctx.call(namedtuple, &args).ok();
            ctx.decref_all(&args);
            ctx.decref(namedtuple);
            let one = guest(ctx, &1i64);
            let partial = partial_type.and_then(|t| {
                let p = ctx.call(t, &[one]).ok();
                ctx.decref(t);
                p
            });
            ctx.decref(one);
            partial
        });
        let err = partial.and_then(|p| ctx.extract::<Sample>(p).err().map(|e| e.to_string()));
        assert!(
            err.as_deref().is_some_and(|e| e.starts_with("attr \"title\": ")),
            "{err:?}"
        );

        for o in [Some(o), built, Some(dict), partial].into_iter().flatten() {
            ctx.decref(o);
        }
        if let Ok(ty) = ty {
            ctx.decref(ty.as_object());
        }
        assert!(ctx.deregister_struct::<Sample>().is_ok());
    });
}
