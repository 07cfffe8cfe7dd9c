//! Booleans, integers, floats, strings, `None` and type objects.

use num_bigint::BigInt;

use super::{Conversion, Dynamic, Kind, Reflect, ReflectMut, ReflectRef, from_guest_error};
use crate::context::Ctx;
use crate::error::{Error, Result};
use crate::guest::{self, types::builtins};
use crate::object::{Object, TypeObject};

pub(super) fn conversions() -> Vec<Conversion> {
    let b = builtins();
    let mut all = vec![
        Conversion::for_kind(Kind::Bool)
            .guest_type(TypeObject::from_ptr(b.bool_))
            .to_guest(bool_to_guest)
            .from_guest(bool_from_guest),
        Conversion::for_kind(Kind::F64)
            .guest_type(TypeObject::from_ptr(b.float))
            .to_guest(float_to_guest)
            .from_guest(float_from_guest),
        Conversion::for_kind(Kind::F32)
            .to_guest(float_to_guest)
            .from_guest(float_from_guest),
        Conversion::for_kind(Kind::Str)
            .guest_type(TypeObject::from_ptr(b.str))
            .to_guest(str_to_guest)
            .from_guest(str_from_guest),
        Conversion::for_guest_type(TypeObject::from_ptr(b.none_type)).from_guest(none_from_guest),
        Conversion::for_type::<TypeObject>()
            .to_guest(type_to_guest)
            .from_guest(type_from_guest),
    ];
    for kind in Kind::INTEGERS {
        let c = Conversion::for_kind(kind)
            .to_guest(int_to_guest)
            .from_guest(int_from_guest);
        all.push(if kind == Kind::I64 {
            c.guest_type(TypeObject::from_ptr(b.int))
        } else {
            c
        });
    }
    all
}

fn bool_to_guest(ctx: &Ctx, value: &dyn Reflect) -> Result<Object> {
    match value.reflect_ref() {
        ReflectRef::Bool(b) => Ok(ctx.new_ref(Object::from_ptr(guest::bool_from(b)))),
        _ => Err(Error::ToGuest {
            host: value.type_name(),
        }),
    }
}

/// Inbound booleans follow guest truthiness.
fn bool_from_guest(ctx: &Ctx, o: Object, dest: &mut dyn Reflect) -> Result<()> {
    match dest.reflect_mut() {
        ReflectMut::Bool(b) => *b = ctx.is_true(o)?,
        ReflectMut::Any(d) => *d = Dynamic::Bool(ctx.is_true(o)?),
        _ => return Err(from_guest_error(o, dest)),
    }
    Ok(())
}

fn int_to_guest(ctx: &Ctx, value: &dyn Reflect) -> Result<Object> {
    match value.reflect_ref() {
        ReflectRef::Int(n) => ctx.wrap(guest::long_from(n)),
        _ => Err(Error::ToGuest {
            host: value.type_name(),
        }),
    }
}

fn int_from_guest(_ctx: &Ctx, o: Object, dest: &mut dyn Reflect) -> Result<()> {
    let Some(n) = guest::long_value(o.as_ptr()) else {
        return Err(from_guest_error(o, dest));
    };
    match dest.reflect_mut() {
        ReflectMut::Int(target) => target.set(&n),
        ReflectMut::Any(d) => {
            *d = dynamic_int(&n)?;
            Ok(())
        }
        _ => Err(from_guest_error(o, dest)),
    }
}

fn dynamic_int(n: &BigInt) -> Result<Dynamic> {
    if let Ok(v) = i64::try_from(n) {
        return Ok(Dynamic::Int(v));
    }
    u64::try_from(n)
        .map(Dynamic::UInt)
        .map_err(|_| Error::OutOfRange { host: "i64" })
}

fn float_to_guest(ctx: &Ctx, value: &dyn Reflect) -> Result<Object> {
    match value.reflect_ref() {
        ReflectRef::Float(x) => ctx.wrap(guest::float_from(x)),
        _ => Err(Error::ToGuest {
            host: value.type_name(),
        }),
    }
}

fn float_from_guest(_ctx: &Ctx, o: Object, dest: &mut dyn Reflect) -> Result<()> {
    let Some(x) = guest::float_value(o.as_ptr()) else {
        return Err(from_guest_error(o, dest));
    };
    match dest.reflect_mut() {
        ReflectMut::Float(target) => target.set(x),
        ReflectMut::Any(d) => *d = Dynamic::Float(x),
        _ => return Err(from_guest_error(o, dest)),
    }
    Ok(())
}

fn str_to_guest(ctx: &Ctx, value: &dyn Reflect) -> Result<Object> {
    match value.reflect_ref() {
        ReflectRef::Str(s) => ctx.wrap(guest::str_from(s)),
        _ => Err(Error::ToGuest {
            host: value.type_name(),
        }),
    }
}

/// Inbound strings go through the guest `str()` protocol.
fn str_from_guest(ctx: &Ctx, o: Object, dest: &mut dyn Reflect) -> Result<()> {
    match dest.reflect_mut() {
        ReflectMut::Str(s) => *s = ctx.str(o)?,
        ReflectMut::Any(d) => *d = Dynamic::Str(ctx.str(o)?),
        _ => return Err(from_guest_error(o, dest)),
    }
    Ok(())
}

fn none_from_guest(_ctx: &Ctx, o: Object, dest: &mut dyn Reflect) -> Result<()> {
    match dest.reflect_mut() {
        ReflectMut::Any(d) => {
            *d = Dynamic::None;
            Ok(())
        }
        _ => Err(from_guest_error(o, dest)),
    }
}

fn type_to_guest(ctx: &Ctx, value: &dyn Reflect) -> Result<Object> {
    match value.as_any().downcast_ref::<TypeObject>() {
        Some(ty) if !ty.is_null() => Ok(ctx.new_ref(ty.as_object())),
        _ => Err(Error::ToGuest {
            host: value.type_name(),
        }),
    }
}

fn type_from_guest(ctx: &Ctx, o: Object, dest: &mut dyn Reflect) -> Result<()> {
    let ty = TypeObject::from_object(o);
    if ty.is_null() {
        return Err(from_guest_error(o, dest));
    }
    match dest.as_any_mut().downcast_mut::<TypeObject>() {
        Some(slot) => {
            *slot = TypeObject::from_object(ctx.new_ref(o));
            Ok(())
        }
        None => Err(from_guest_error(o, dest)),
    }
}
