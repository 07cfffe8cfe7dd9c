//! Host values and their attribute stores

use std::sync::atomic::{AtomicI64, Ordering};

use guestlink::{Attrs, Ctx, Dynamic, Error, HostValue, Object};
use pretty_assertions::assert_eq;

use super::{dynamic, exception, guest, with_guest};

#[derive(Debug)]
struct Session {
    user: String,
}

/// Exposes `limit` as a settable int and `user` read-only.
struct SessionAttrs {
    user: String,
    limit: AtomicI64,
}

impl Attrs for SessionAttrs {
    fn get_attr(&self, ctx: &Ctx, name: &str) -> guestlink::Result<Object> {
        match name {
            "user" => ctx.to_guest(&self.user),
            "limit" => ctx.to_guest(&self.limit.load(Ordering::Relaxed)),
            _ => Err(Error::attribute_error(format!("no attribute '{name}'"))),
        }
    }

    fn set_attr(&self, ctx: &Ctx, name: &str, value: Object) -> guestlink::Result<()> {
        match name {
            "limit" => {
                self.limit.store(ctx.extract(value)?, Ordering::Relaxed);
                Ok(())
            }
            _ => Err(Error::attribute_error(format!("'{name}' is read-only"))),
        }
    }
}

fn attr(ctx: &Ctx, o: Object, name: &str) -> Option<Dynamic> {
    let found = ctx.getattr(o, name).ok()?;
    let value = dynamic(ctx, found);
    ctx.decref(found);
    Some(value)
}

#[test]
fn test_attribute_map() {
    with_guest(|ctx| {
        let value = HostValue::new(Session {
            user: "ann".into(),
        });
        let o = guest(ctx, &value);
        assert_eq!(o.type_object().name(), "HostValue");

        assert_eq!(attr(ctx, o, "anything"), Some(Dynamic::None));
        let limit = guest(ctx, &10i64);
        assert!(ctx.setattr(o, "limit", limit).is_ok());
        assert_eq!(attr(ctx, o, "limit"), Some(Dynamic::Int(10)));
        assert!(ctx.delattr(o, "limit").is_ok());
        assert_eq!(attr(ctx, o, "limit"), Some(Dynamic::None));

        let err = ctx.setattr(o, "__class__", limit).err();
        assert_eq!(
            err.as_ref().map(exception),
            Some((
                "AttributeError".to_string(),
                "attribute '__class__' of 'HostValue' objects is not writable".to_string()
            ))
        );
        let class = ctx.getattr(o, "__class__").ok();
        assert_eq!(class, Some(o.type_object().as_object()));
        ctx.decref_all(&[limit, o]);
        if let Some(class) = class {
            ctx.decref(class);
        }
    });
}

#[test]
fn test_custom_attrs() {
    with_guest(|ctx| {
        let value = HostValue::with_attrs(
            Session {
                user: "bob".into(),
            },
            SessionAttrs {
                user: "bob".into(),
                limit: AtomicI64::new(5),
            },
        );
        let o = guest(ctx, &value);
        assert_eq!(attr(ctx, o, "user"), Some(Dynamic::from("bob")));
        assert_eq!(attr(ctx, o, "limit"), Some(Dynamic::Int(5)));

        let seven = guest(ctx, &7i64);
        assert!(ctx.setattr(o, "limit", seven).is_ok());
        assert_eq!(attr(ctx, o, "limit"), Some(Dynamic::Int(7)));

        let err = ctx.setattr(o, "user", seven).err();
        assert_eq!(
            err.as_ref().map(exception),
            Some(("AttributeError".to_string(), "'user' is read-only".to_string()))
        );
        let err = ctx.getattr(o, "missing").err().map(|e| e.exception_name().to_string());
        assert_eq!(err.as_deref(), Some("AttributeError"));
        assert_eq!(value.get::<Session>().map(|s| s.user.as_str()), Some("bob"));
        ctx.decref_all(&[seven, o]);
    });
}

#[test]
fn test_values_convert_back() {
    with_guest(|ctx| {
        let value = HostValue::new(Session {
            user: "cid".into(),
        });
        let o = guest(ctx, &value);

        let back: HostValue = ctx.extract(o).unwrap_or_default();
        assert_eq!(back, value);
        assert_eq!(back.get::<Session>().map(|s| s.user.clone()).as_deref(), Some("cid"));
        assert_eq!(dynamic(ctx, o), Dynamic::Value(value.clone()));

        let err = ctx.extract::<i64>(o).err().map(|e| e.to_string());
        assert_eq!(
            err.as_deref(),
            Some("cannot convert a guest HostValue to host i64")
        );
        ctx.decref(o);
    });
}

#[test]
fn test_module_attribute_gets_its_name() {
    with_guest(|ctx| {
        let module = ctx.new_module("value_names").unwrap_or_default();
        let value = HostValue::new(Session {
            user: "dee".into(),
        });
        assert!(ctx.set_attr_value(module, "session", &value).is_ok());

        let o = ctx.getattr(module, "session").unwrap_or_default();
        assert_eq!(attr(ctx, o, "__name__"), Some(Dynamic::from("session")));
        assert_eq!(ctx.is_host_object(o).ok(), Some(true));
        assert_eq!(ctx.is_host_object(module).ok(), Some(false));
        ctx.decref_all(&[o, module]);
    });
}

#[test]
fn test_attributes_outlive_the_guest_object_while_shared() {
    with_guest(|ctx| {
        let item = guest(ctx, &"kept");
        let before = item.refcnt();

        let value = HostValue::new(Session {
            user: "eve".into(),
        });
        let o = guest(ctx, &value);
        assert!(ctx.setattr(o, "item", item).is_ok());
        assert_eq!(item.refcnt(), before + 1);

        // the host clone keeps the store alive
        ctx.decref(o);
        assert_eq!(item.refcnt(), before + 1);
        let again = guest(ctx, &value);
        assert_eq!(attr(ctx, again, "item"), Some(Dynamic::from("kept")));

        // the last guest object clears the store once the host lets go
        drop(value);
        ctx.decref(again);
        assert_eq!(item.refcnt(), before);
        ctx.decref(item);
    });
}

#[test]
fn test_dropping_the_last_host_clone_releases_attributes() {
    with_guest(|ctx| {
        let item = guest(ctx, &vec![1i64, 2]);
        let before = item.refcnt();

        let value = HostValue::new(Session {
            user: "mallory".into(),
        });
        let o = guest(ctx, &value);
        assert!(ctx.setattr(o, "item", item).is_ok());
        assert_eq!(item.refcnt(), before + 1);

        // the guest object goes first, the store survives in the host clone
        ctx.decref(o);
        assert_eq!(item.refcnt(), before + 1);

        drop(value);
        assert_eq!(item.refcnt(), before);
        ctx.decref(item);
    });
}
