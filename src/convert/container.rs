//! Sequences and mappings.

use super::{
    Conversion, Dynamic, Kind, MapMut, Reflect, ReflectMut, ReflectRef, SeqMut, describe,
    from_guest_error,
};
use crate::context::Ctx;
use crate::error::{Error, Result};
use crate::guest::{self, ObjPtr, types::builtins};
use crate::object::{Object, TypeObject};

pub(super) fn conversions() -> Vec<Conversion> {
    let b = builtins();
    vec![
        Conversion::for_kind(Kind::Seq)
            .guest_type(TypeObject::from_ptr(b.list))
            .to_guest(|ctx, value| seq_to_guest(ctx, value, false))
            .from_guest(seq_from_guest),
        Conversion::for_kind(Kind::Array)
            .guest_type(TypeObject::from_ptr(b.tuple))
            .to_guest(|ctx, value| seq_to_guest(ctx, value, true))
            .from_guest(seq_from_guest),
        Conversion::for_kind(Kind::Map)
            .guest_type(TypeObject::from_ptr(b.dict))
            .to_guest(map_to_guest)
            .from_guest(map_from_guest),
    ]
}

/// Convert every item, releasing the converted ones on the first failure.
fn convert_items<'a>(
    ctx: &Ctx,
    items: impl Iterator<Item = Option<&'a dyn Reflect>>,
) -> Result<Vec<ObjPtr>> {
    let mut converted = Vec::new();
    for (index, item) in items.enumerate() {
        let result = match item {
            Some(item) => ctx.to_guest(item),
            None => Err(Error::runtime("sequence shrank during conversion")),
        };
        match result {
            Ok(o) => converted.push(o.as_ptr()),
            Err(err) => {
                converted.into_iter().for_each(guest::decref);
                return Err(Error::item(index, err));
            }
        }
    }
    Ok(converted)
}

fn seq_to_guest(ctx: &Ctx, value: &dyn Reflect, tuple: bool) -> Result<Object> {
    let ReflectRef::Seq(seq) = value.reflect_ref() else {
        return Err(Error::ToGuest {
            host: value.type_name(),
        });
    };
    let items = convert_items(ctx, (0..seq.len()).map(|i| seq.item(i)))?;
    let ptr = if tuple {
        guest::tuple_new(items)
    } else {
        guest::list_new(items)
    };
    ctx.wrap(ptr)
}

/// Any object with the length and item protocols fills a host sequence.
///
/// On failure the items filled so far are released; the destination then
/// holds no references the caller owns.
fn seq_from_guest(ctx: &Ctx, o: Object, dest: &mut dyn Reflect) -> Result<()> {
    let len = ctx.len(o)?;
    let mut filled = 0;
    let result = match dest.reflect_mut() {
        ReflectMut::Seq(seq) => fill_seq(ctx, o, len, seq, &mut filled),
        ReflectMut::Any(d) => {
            let mut items: Vec<Dynamic> = Vec::new();
            fill_seq(ctx, o, len, &mut items, &mut filled)?;
            *d = Dynamic::List(items);
            return Ok(());
        }
        _ => return Err(from_guest_error(o, dest)),
    };
    if result.is_err() {
        if let ReflectRef::Seq(seq) = dest.reflect_ref() {
            (0..filled)
                .filter_map(|index| seq.item(index))
                .for_each(|item| release_held(ctx, item));
        }
    }
    result
}

fn fill_seq(
    ctx: &Ctx,
    o: Object,
    len: usize,
    seq: &mut dyn SeqMut,
    filled: &mut usize,
) -> Result<()> {
    seq.fill(len, &mut |index, slot| {
        let item = ctx.owned(ctx.get_item(o, index).map_err(|err| Error::item(index, err))?);
        ctx.from_guest(*item, slot)
            .map_err(|err| Error::item(index, err))?;
        *filled = index + 1;
        Ok(())
    })
}

/// Release the guest references a partially filled host value holds.
fn release_held(ctx: &Ctx, value: &dyn Reflect) {
    if let Some(o) = value.as_any().downcast_ref::<Object>() {
        ctx.decref(*o);
        return;
    }
    match value.reflect_ref() {
        ReflectRef::Seq(seq) => (0..seq.len())
            .filter_map(|index| seq.item(index))
            .for_each(|item| release_held(ctx, item)),
        ReflectRef::Map(map) => map.entries().into_iter().for_each(|(k, v)| {
            release_held(ctx, k);
            release_held(ctx, v);
        }),
        _ => {}
    }
}

fn map_to_guest(ctx: &Ctx, value: &dyn Reflect) -> Result<Object> {
    let ReflectRef::Map(map) = value.reflect_ref() else {
        return Err(Error::ToGuest {
            host: value.type_name(),
        });
    };
    let dict = ctx.owned(ctx.wrap(guest::dict_new())?);
    for (key, value) in map.entries() {
        let k = ctx.owned(ctx.to_guest(key).map_err(|err| Error::key(describe(key), err))?);
        let v = ctx.owned(
            ctx.to_guest(value)
                .map_err(|err| Error::value(describe(key), err))?,
        );
        ctx.wrap_status(guest::dict_set_item(dict.as_ptr(), k.as_ptr(), v.as_ptr()))
            .map_err(|err| Error::key(describe(key), err))?;
    }
    Ok(dict.into_inner())
}

/// `(key, value)` pairs of a mapping as borrowed references into `items`,
/// which the caller keeps alive.
fn pairs(ctx: &Ctx, items: Object) -> Result<Vec<(Object, Object)>> {
    let entries = guest::list_items(items.as_ptr())
        .ok_or_else(|| Error::type_error("items() did not return a list"))?;
    entries
        .into_iter()
        .map(|pair| match guest::tuple_items(pair).as_deref() {
            Some(&[k, v]) => Ok((Object::from_ptr(k), Object::from_ptr(v))),
            _ => Err(Error::type_error(format!(
                "items() entry is not a pair: {}",
                ctx.repr(Object::from_ptr(pair))
            ))),
        })
        .collect()
}

/// Mappings are read through the items protocol. A failure releases the
/// entries filled so far.
fn map_from_guest(ctx: &Ctx, o: Object, dest: &mut dyn Reflect) -> Result<()> {
    let items = ctx.owned(ctx.items(o)?);
    let pairs = pairs(ctx, *items)?;
    let result = match dest.reflect_mut() {
        ReflectMut::Map(map) => fill_map(ctx, &pairs, map),
        ReflectMut::Any(d) => {
            let mut entries = Vec::with_capacity(pairs.len());
            for &(k, v) in &pairs {
                let key: Dynamic = ctx.extract(k).map_err(|err| Error::key(ctx.repr(k), err))?;
                let value: Dynamic = ctx
                    .extract(v)
                    .map_err(|err| Error::value(ctx.repr(k), err))?;
                entries.push((key, value));
            }
            *d = Dynamic::Dict(entries);
            return Ok(());
        }
        _ => return Err(from_guest_error(o, dest)),
    };
    if result.is_err() {
        release_held(ctx, &*dest);
    }
    result
}

fn fill_map(ctx: &Ctx, pairs: &[(Object, Object)], map: &mut dyn MapMut) -> Result<()> {
    map.clear();
    for &(k, v) in pairs {
        map.insert_with(&mut |key, value| {
            ctx.from_guest(k, key)
                .map_err(|err| Error::key(ctx.repr(k), err))?;
            ctx.from_guest(v, value).map_err(|err| {
                release_held(ctx, &*key);
                Error::value(ctx.repr(k), err)
            })
        })?;
    }
    Ok(())
}
