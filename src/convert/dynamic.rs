//! The open destination type.
//!
//! A [`Dynamic`] destination takes whatever the source object is: with no
//! type or kind handler for it, the handler registered for the guest type
//! of the source decides which variant is produced.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use super::{Conversion, Kind, Reflect, ReflectMut, ReflectRef, describe};
use crate::context::Ctx;
use crate::error::{Error, Result};
use crate::expose::{HostFunction, HostValue};
use crate::guest;
use crate::object::Object;

/// Any value a guest object can be converted to.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Dynamic {
    #[default]
    None,
    Bool(bool),
    Int(i64),
    /// An int above `i64::MAX` that fits `u64`.
    UInt(u64),
    Float(f64),
    Str(String),
    /// A guest `list` or `tuple`.
    List(Vec<Dynamic>),
    /// A guest `dict`, in insertion order.
    Dict(Vec<(Dynamic, Dynamic)>),
    Func(HostFunction),
    /// An instance of a registered struct's record type.
    Record(Record),
    Value(HostValue),
    /// Outbound only: a borrowed guest reference.
    Object(Object),
}

impl Dynamic {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Dynamic::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Dynamic::Int(n) => Some(*n),
            Dynamic::UInt(n) => i64::try_from(*n).ok(),
            _ => None,
        }
    }

    /// Value for `key` of a [`Dynamic::Dict`] with string keys.
    pub fn get(&self, key: &str) -> Option<&Dynamic> {
        match self {
            Dynamic::Dict(entries) => entries
                .iter()
                .find(|(k, _)| k.as_str() == Some(key))
                .map(|(_, v)| v),
            _ => None,
        }
    }
}

impl Reflect for Dynamic {
    fn kind(&self) -> Kind {
        Kind::Any
    }

    fn reflect_ref(&self) -> ReflectRef<'_> {
        ReflectRef::Any(self)
    }

    fn reflect_mut(&mut self) -> ReflectMut<'_> {
        ReflectMut::Any(self)
    }
}

macro_rules! dynamic_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Dynamic {
                fn from(value: $ty) -> Self {
                    Dynamic::$variant(value.into())
                }
            }
        )*
    };
}

dynamic_from! {
    bool => Bool,
    i64 => Int,
    i32 => Int,
    u64 => UInt,
    f64 => Float,
    String => Str,
    &str => Str,
    Vec<Dynamic> => List,
    HostFunction => Func,
    HostValue => Value,
}

/// A registered struct value held by a [`Dynamic`].
#[derive(Clone)]
pub struct Record {
    name: &'static str,
    value: Arc<dyn Any + Send + Sync>,
}

impl Record {
    pub(crate) fn new<T: Any + Send + Sync>(name: &'static str, value: T) -> Self {
        Self {
            name,
            value: Arc::new(value),
        }
    }

    /// Name of the record type.
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    pub(crate) fn value(&self) -> &(dyn Any + Send + Sync) {
        &*self.value
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Record").field(&self.name).finish()
    }
}

pub(super) fn conversions() -> Vec<Conversion> {
    vec![Conversion::for_kind(Kind::Any).to_guest(dynamic_to_guest)]
}

fn dynamic_to_guest(ctx: &Ctx, value: &dyn Reflect) -> Result<Object> {
    let ReflectRef::Any(dynamic) = value.reflect_ref() else {
        return Err(Error::ToGuest {
            host: value.type_name(),
        });
    };
    match dynamic {
        Dynamic::None => Ok(ctx.new_ref(ctx.none())),
        Dynamic::Bool(b) => ctx.to_guest(b),
        Dynamic::Int(n) => ctx.to_guest(n),
        Dynamic::UInt(n) => ctx.to_guest(n),
        Dynamic::Float(x) => ctx.to_guest(x),
        Dynamic::Str(s) => ctx.to_guest(s),
        Dynamic::List(items) => ctx.to_guest(items),
        Dynamic::Dict(entries) => dict_to_guest(ctx, entries),
        Dynamic::Func(f) => ctx.to_guest(f),
        Dynamic::Record(record) => super::record::record_to_guest(ctx, record),
        Dynamic::Value(v) => ctx.to_guest(v),
        Dynamic::Object(o) => ctx.to_guest(o),
    }
}

fn dict_to_guest(ctx: &Ctx, entries: &[(Dynamic, Dynamic)]) -> Result<Object> {
    let dict = ctx.owned(ctx.wrap(guest::dict_new())?);
    for (key, value) in entries {
        let k = ctx.owned(ctx.to_guest(key).map_err(|err| Error::key(describe(key), err))?);
        let v = ctx.owned(
            ctx.to_guest(value)
                .map_err(|err| Error::value(describe(key), err))?,
        );
        ctx.wrap_status(guest::dict_set_item(dict.as_ptr(), k.as_ptr(), v.as_ptr()))?;
    }
    Ok(dict.into_inner())
}
