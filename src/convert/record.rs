//! Host structs as guest record types.
//!
//! Registering a struct creates a companion record type with
//! `collections.namedtuple`, named and shaped after the struct's serde
//! representation: renamed fields keep their new names and skipped fields
//! are left out. Instances convert through the serde bridge.
//!
//! Registrations are per embedding and end when the root context closes.

use std::any::{Any, TypeId};
use std::sync::Arc;

use serde::de::{self, DeserializeOwned, Visitor};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::bridge::{GuestSerializer, ObjectDeserializer};
use super::{Conversion, Dynamic, Record, Reflect, ReflectMut, deregister, from_guest_error, register};
use crate::context::{Ctx, State};
use crate::error::{Error, Result};
use crate::object::{Object, TypeObject};
use crate::prelude::FxHashMap;

type AnyToGuest = Arc<dyn Fn(&Ctx, &dyn Any) -> Result<Object> + Send + Sync>;

struct StructEntry {
    name: &'static str,
    ty: TypeObject,
    conversion: Conversion,
    to_guest: AnyToGuest,
}

/// Registered structs of one embedding, by host type.
#[derive(Default)]
pub(crate) struct StructTable {
    entries: FxHashMap<TypeId, StructEntry>,
}

impl StructTable {
    /// Record type registered under the serde name `name`.
    pub(crate) fn record_type(&self, name: &str) -> Option<TypeObject> {
        self.entries
            .values()
            .find(|entry| entry.name == name)
            .map(|entry| entry.ty)
    }

    fn contains_name(&self, name: &str) -> bool {
        self.record_type(name).is_some()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Shape introspection
// ═══════════════════════════════════════════════════════════════════════════════

/// Stops the derived `Deserialize` impl at its `deserialize_struct` call to
/// learn the struct name and field names.
struct Introspect<'a> {
    shape: &'a mut Option<(&'static str, &'static [&'static str])>,
}

impl<'de> de::Deserializer<'de> for Introspect<'_> {
    type Error = Error;

    fn deserialize_any<V: Visitor<'de>>(self, _visitor: V) -> Result<V::Value> {
        Err(Error::Custom("not a struct".into()))
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        name: &'static str,
        fields: &'static [&'static str],
        _visitor: V,
    ) -> Result<V::Value> {
        *self.shape = Some((name, fields));
        Err(Error::Custom("shape recorded".into()))
    }

    serde::forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf option unit unit_struct newtype_struct seq tuple
        tuple_struct map enum identifier ignored_any
    }
}

fn struct_shape<T: DeserializeOwned>() -> Option<(&'static str, &'static [&'static str])> {
    let mut shape = None;
    let _ = T::deserialize(Introspect { shape: &mut shape });
    shape
}

fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Registration
// ═══════════════════════════════════════════════════════════════════════════════

fn serialize_any<T: Serialize + 'static>(ctx: &Ctx, value: &dyn Any) -> Result<Object> {
    match value.downcast_ref::<T>() {
        Some(value) => value.serialize(GuestSerializer::new(ctx)),
        None => Err(Error::ToGuest {
            host: std::any::type_name::<T>(),
        }),
    }
}

impl Ctx {
    /// Register `T` so that its values convert to and from instances of a
    /// companion record type.
    ///
    /// Nested structs are not registered implicitly: a nested value whose
    /// struct is registered becomes a record, any other becomes a dict.
    pub fn register_struct<T>(&self) -> Result<()>
    where
        T: Reflect + Serialize + DeserializeOwned + Send + Sync,
    {
        let state = self.state()?;
        let shape = struct_shape::<T>();
        let name = shape.map_or_else(short_type_name::<T>, |(name, _)| name);
        {
            let structs = state.structs.read();
            if structs.entries.contains_key(&TypeId::of::<T>()) || structs.contains_name(name) {
                return Err(Error::Struct(format!("struct '{name}' is already registered")));
            }
        }
        let fields = match shape {
            Some((_, fields)) if !fields.is_empty() => fields,
            _ => {
                return Err(Error::Struct(format!(
                    "struct '{name}' has no exported fields"
                )));
            }
        };

        let namedtuple = self.owned(self.lookup("collections.namedtuple")?);
        let type_name = self.owned(self.to_guest(&name)?);
        let field_names: Vec<String> = fields.iter().map(|f| (*f).to_string()).collect();
        let field_names = self.owned(self.to_guest(&field_names)?);
        let made = self.owned(self.call(*namedtuple, &[*type_name, *field_names])?);
        if TypeObject::from_object(*made).is_null() {
            return Err(Error::Struct(format!(
                "namedtuple did not return a type for struct '{name}'"
            )));
        }
        let ty = TypeObject::from_object(made.into_inner());

        let to_guest: AnyToGuest = Arc::new(serialize_any::<T>);
        let conversion = Conversion::for_type::<T>()
            .guest_type(ty)
            .to_guest({
                let to_guest = Arc::clone(&to_guest);
                move |ctx, value| to_guest(ctx, value.as_any())
            })
            .from_guest(move |ctx, o, dest| {
                if let Some(slot) = dest.as_any_mut().downcast_mut::<T>() {
                    *slot = T::deserialize(ObjectDeserializer::new(ctx, o))?;
                    return Ok(());
                }
                match dest.reflect_mut() {
                    ReflectMut::Any(d) => {
                        let value = T::deserialize(ObjectDeserializer::new(ctx, o))?;
                        *d = Dynamic::Record(Record::new(name, value));
                        Ok(())
                    }
                    _ => Err(from_guest_error(o, dest)),
                }
            });
        if let Err(err) = register(vec![conversion.clone()]) {
            self.decref(ty.as_object());
            return Err(err);
        }
        state.structs.write().entries.insert(
            TypeId::of::<T>(),
            StructEntry {
                name,
                ty,
                conversion,
                to_guest,
            },
        );
        debug!(name, fields = fields.len(), "struct registered");
        Ok(())
    }

    /// The record type of a registered struct. Returns a new reference.
    pub fn struct_type<T: Reflect>(&self) -> Result<TypeObject> {
        let state = self.state()?;
        let ty = state
            .structs
            .read()
            .entries
            .get(&TypeId::of::<T>())
            .map(|entry| entry.ty);
        match ty {
            Some(ty) => Ok(TypeObject::from_object(self.new_ref(ty.as_object()))),
            None => Err(Error::Struct(format!(
                "struct '{}' is not registered",
                short_type_name::<T>()
            ))),
        }
    }

    /// Remove the registration of `T` and release its record type.
    pub fn deregister_struct<T: Reflect>(&self) -> Result<()> {
        let state = self.state()?;
        let entry = state.structs.write().entries.remove(&TypeId::of::<T>());
        let Some(entry) = entry else {
            return Err(Error::Struct(format!(
                "struct '{}' is not registered",
                short_type_name::<T>()
            )));
        };
        release(self, entry);
        Ok(())
    }
}

fn release(ctx: &Ctx, entry: StructEntry) {
    deregister(&[entry.conversion]);
    ctx.decref(entry.ty.as_object());
    debug!(name = entry.name, "struct deregistered");
}

/// Drop every struct registration of an embedding.
pub(crate) fn deregister_all(ctx: &Ctx, state: &State) {
    let entries: Vec<StructEntry> = state.structs.write().entries.drain().map(|(_, e)| e).collect();
    entries.into_iter().for_each(|entry| release(ctx, entry));
}

/// Outbound conversion of a [`Record`] held by a [`Dynamic`].
pub(crate) fn record_to_guest(ctx: &Ctx, record: &Record) -> Result<Object> {
    let state = ctx.state()?;
    let to_guest = state
        .structs
        .read()
        .entries
        .get(&Any::type_id(record.value()))
        .map(|entry| Arc::clone(&entry.to_guest));
    match to_guest {
        Some(to_guest) => to_guest(ctx, record.value()),
        None => Err(Error::Struct(format!(
            "struct '{}' is not registered",
            record.name()
        ))),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// serde_json::Value
// ═══════════════════════════════════════════════════════════════════════════════

pub(super) fn conversions() -> Vec<Conversion> {
    vec![
        Conversion::for_type::<serde_json::Value>()
            .to_guest(|ctx, value| serialize_any::<serde_json::Value>(ctx, value.as_any()))
            .from_guest(|ctx, o, dest| match dest.as_any_mut().downcast_mut::<serde_json::Value>() {
                Some(slot) => {
                    *slot = serde_json::Value::deserialize(ObjectDeserializer::new(ctx, o))?;
                    Ok(())
                }
                None => Err(from_guest_error(o, dest)),
            }),
    ]
}
