//! serde bridge between host data and guest objects.
//!
//! [`GuestSerializer`] turns any `Serialize` value into a guest object:
//! sequences become lists, tuples become tuples, maps and unregistered
//! structs become dicts, and structs whose name is registered become
//! instances of their record type. Enums are externally tagged.
//!
//! [`ObjectDeserializer`] reads a guest object through serde. Structs are
//! read field by field, by key from a dict and by attribute from anything
//! else.

use serde::de::{
    self, DeserializeSeed, EnumAccess, IntoDeserializer, MapAccess, SeqAccess, VariantAccess,
    Visitor,
};
use serde::ser::{self, Serialize};

use crate::context::Ctx;
use crate::error::{Error, Result};
use crate::guest::{self, ObjPtr};
use crate::object::{Object, Owned, TypeObject};

// ═══════════════════════════════════════════════════════════════════════════════
// Serializer
// ═══════════════════════════════════════════════════════════════════════════════

/// Serializes into a new guest reference.
#[derive(Clone, Copy)]
pub struct GuestSerializer<'a> {
    ctx: &'a Ctx,
}

impl<'a> GuestSerializer<'a> {
    pub fn new(ctx: &'a Ctx) -> Self {
        Self { ctx }
    }

    fn record_type(&self, name: &str) -> Option<TypeObject> {
        let state = self.ctx.state().ok()?;
        let structs = state.structs.read();
        structs.record_type(name)
    }

    fn str(&self, s: &str) -> Result<Object> {
        self.ctx.wrap(guest::str_from(s))
    }

    /// `{variant: value}`, stealing `value`.
    fn tagged(&self, variant: &str, value: Object) -> Result<Object> {
        let value = self.ctx.owned(value);
        let key = self.ctx.owned(self.str(variant)?);
        let dict = self.ctx.owned(self.ctx.wrap(guest::dict_new())?);
        self.ctx
            .wrap_status(guest::dict_set_item(dict.as_ptr(), key.as_ptr(), value.as_ptr()))?;
        Ok(dict.into_inner())
    }
}

/// Collected items of a list or tuple. Unfinished items are released on drop.
pub struct SerializeItems<'a> {
    ser: GuestSerializer<'a>,
    items: Vec<ObjPtr>,
    tuple: bool,
    variant: Option<&'static str>,
}

impl<'a> SerializeItems<'a> {
    fn new(ser: GuestSerializer<'a>, len: Option<usize>, tuple: bool) -> Self {
        Self {
            ser,
            items: Vec::with_capacity(len.unwrap_or(0)),
            tuple,
            variant: None,
        }
    }

    fn push<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<()> {
        let item = value.serialize(self.ser)?;
        self.items.push(item.as_ptr());
        Ok(())
    }

    fn finish(mut self) -> Result<Object> {
        let items = std::mem::take(&mut self.items);
        let ptr = if self.tuple {
            guest::tuple_new(items)
        } else {
            guest::list_new(items)
        };
        let o = self.ser.ctx.wrap(ptr)?;
        match self.variant {
            Some(variant) => self.ser.tagged(variant, o),
            None => Ok(o),
        }
    }
}

impl Drop for SerializeItems<'_> {
    fn drop(&mut self) {
        self.items.drain(..).for_each(guest::decref);
    }
}

/// Entries of a dict under construction.
pub struct SerializeDict<'a> {
    ser: GuestSerializer<'a>,
    dict: Owned<'a>,
    key: Option<Owned<'a>>,
    variant: Option<&'static str>,
}

impl<'a> SerializeDict<'a> {
    fn new(ser: GuestSerializer<'a>) -> Result<Self> {
        Ok(Self {
            ser,
            dict: ser.ctx.owned(ser.ctx.wrap(guest::dict_new())?),
            key: None,
            variant: None,
        })
    }

    fn set(&self, key: Object, value: Object) -> Result<()> {
        let ctx = self.ser.ctx;
        ctx.wrap_status(guest::dict_set_item(
            self.dict.as_ptr(),
            key.as_ptr(),
            value.as_ptr(),
        ))
    }

    fn field<T: ?Sized + Serialize>(&mut self, name: &'static str, value: &T) -> Result<()> {
        let ctx = self.ser.ctx;
        let v = ctx.owned(value.serialize(self.ser).map_err(|err| Error::attr(name, err))?);
        let k = ctx.owned(self.ser.str(name)?);
        self.set(*k, *v)
    }

    fn finish(self) -> Result<Object> {
        let o = self.dict.into_inner();
        match self.variant {
            Some(variant) => self.ser.tagged(variant, o),
            None => Ok(o),
        }
    }
}

/// Fields of a registered struct, placed by name into record order.
pub struct SerializeRecord<'a> {
    ser: GuestSerializer<'a>,
    ty: TypeObject,
    fields: Vec<String>,
    values: Vec<Option<Owned<'a>>>,
}

impl SerializeRecord<'_> {
    fn field<T: ?Sized + Serialize>(&mut self, name: &'static str, value: &T) -> Result<()> {
        let ctx = self.ser.ctx;
        let v = ctx.owned(value.serialize(self.ser).map_err(|err| Error::attr(name, err))?);
        if let Some(slot) = self
            .fields
            .iter()
            .position(|f| f == name)
            .and_then(|i| self.values.get_mut(i))
        {
            *slot = Some(v);
        }
        Ok(())
    }

    fn finish(self) -> Result<Object> {
        let ctx = self.ser.ctx;
        let none = ctx.none();
        let args: Vec<Object> = self
            .values
            .iter()
            .map(|v| v.as_ref().map_or(none, |v| v.get()))
            .collect();
        ctx.call(self.ty.as_object(), &args)
    }
}

pub enum SerializeStruct<'a> {
    Record(SerializeRecord<'a>),
    Dict(SerializeDict<'a>),
}

impl<'a> ser::Serializer for GuestSerializer<'a> {
    type Ok = Object;
    type Error = Error;
    type SerializeSeq = SerializeItems<'a>;
    type SerializeTuple = SerializeItems<'a>;
    type SerializeTupleStruct = SerializeItems<'a>;
    type SerializeTupleVariant = SerializeItems<'a>;
    type SerializeMap = SerializeDict<'a>;
    type SerializeStruct = SerializeStruct<'a>;
    type SerializeStructVariant = SerializeDict<'a>;

    fn serialize_bool(self, v: bool) -> Result<Object> {
        Ok(self.ctx.new_ref(Object::from_ptr(guest::bool_from(v))))
    }

    fn serialize_i8(self, v: i8) -> Result<Object> {
        self.serialize_i64(i64::from(v))
    }

    fn serialize_i16(self, v: i16) -> Result<Object> {
        self.serialize_i64(i64::from(v))
    }

    fn serialize_i32(self, v: i32) -> Result<Object> {
        self.serialize_i64(i64::from(v))
    }

    fn serialize_i64(self, v: i64) -> Result<Object> {
        self.ctx.wrap(guest::long_from(v))
    }

    fn serialize_i128(self, v: i128) -> Result<Object> {
        self.ctx.wrap(guest::long_from(v))
    }

    fn serialize_u8(self, v: u8) -> Result<Object> {
        self.serialize_u64(u64::from(v))
    }

    fn serialize_u16(self, v: u16) -> Result<Object> {
        self.serialize_u64(u64::from(v))
    }

    fn serialize_u32(self, v: u32) -> Result<Object> {
        self.serialize_u64(u64::from(v))
    }

    fn serialize_u64(self, v: u64) -> Result<Object> {
        self.ctx.wrap(guest::long_from(v))
    }

    fn serialize_u128(self, v: u128) -> Result<Object> {
        self.ctx.wrap(guest::long_from(v))
    }

    fn serialize_f32(self, v: f32) -> Result<Object> {
        self.serialize_f64(f64::from(v))
    }

    fn serialize_f64(self, v: f64) -> Result<Object> {
        self.ctx.wrap(guest::float_from(v))
    }

    fn serialize_char(self, v: char) -> Result<Object> {
        self.str(v.encode_utf8(&mut [0u8; 4]))
    }

    fn serialize_str(self, v: &str) -> Result<Object> {
        self.str(v)
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<Object> {
        let mut seq = SerializeItems::new(self, Some(v.len()), false);
        for byte in v {
            seq.push(byte)?;
        }
        seq.finish()
    }

    fn serialize_none(self) -> Result<Object> {
        self.serialize_unit()
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Result<Object> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<Object> {
        Ok(self.ctx.new_ref(self.ctx.none()))
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<Object> {
        self.serialize_unit()
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
    ) -> Result<Object> {
        self.str(variant)
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<Object> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        value: &T,
    ) -> Result<Object> {
        let value = value.serialize(self)?;
        self.tagged(variant, value)
    }

    fn serialize_seq(self, len: Option<usize>) -> Result<SerializeItems<'a>> {
        Ok(SerializeItems::new(self, len, false))
    }

    fn serialize_tuple(self, len: usize) -> Result<SerializeItems<'a>> {
        Ok(SerializeItems::new(self, Some(len), true))
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> Result<SerializeItems<'a>> {
        Ok(SerializeItems::new(self, Some(len), true))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<SerializeItems<'a>> {
        let mut items = SerializeItems::new(self, Some(len), false);
        items.variant = Some(variant);
        Ok(items)
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<SerializeDict<'a>> {
        SerializeDict::new(self)
    }

    fn serialize_struct(self, name: &'static str, _len: usize) -> Result<SerializeStruct<'a>> {
        let record = self
            .record_type(name)
            .and_then(|ty| guest::record_fields(ty.as_ptr()).map(|fields| (ty, fields)));
        match record {
            Some((ty, fields)) => {
                let values = fields.iter().map(|_| None).collect();
                Ok(SerializeStruct::Record(SerializeRecord {
                    ser: self,
                    ty,
                    fields,
                    values,
                }))
            }
            None => Ok(SerializeStruct::Dict(SerializeDict::new(self)?)),
        }
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        _len: usize,
    ) -> Result<SerializeDict<'a>> {
        let mut dict = SerializeDict::new(self)?;
        dict.variant = Some(variant);
        Ok(dict)
    }
}

impl ser::SerializeSeq for SerializeItems<'_> {
    type Ok = Object;
    type Error = Error;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<()> {
        let index = self.items.len();
        self.push(value).map_err(|err| Error::item(index, err))
    }

    fn end(self) -> Result<Object> {
        self.finish()
    }
}

impl ser::SerializeTuple for SerializeItems<'_> {
    type Ok = Object;
    type Error = Error;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<()> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<Object> {
        self.finish()
    }
}

impl ser::SerializeTupleStruct for SerializeItems<'_> {
    type Ok = Object;
    type Error = Error;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<()> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<Object> {
        self.finish()
    }
}

impl ser::SerializeTupleVariant for SerializeItems<'_> {
    type Ok = Object;
    type Error = Error;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<()> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<Object> {
        self.finish()
    }
}

impl ser::SerializeMap for SerializeDict<'_> {
    type Ok = Object;
    type Error = Error;

    fn serialize_key<T: ?Sized + Serialize>(&mut self, key: &T) -> Result<()> {
        let k = key.serialize(self.ser)?;
        self.key = Some(self.ser.ctx.owned(k));
        Ok(())
    }

    fn serialize_value<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<()> {
        let ctx = self.ser.ctx;
        let key = self
            .key
            .take()
            .ok_or_else(|| Error::runtime("map value serialized before its key"))?;
        let v = ctx.owned(
            value
                .serialize(self.ser)
                .map_err(|err| Error::value(ctx.repr(*key), err))?,
        );
        self.set(*key, *v)
    }

    fn end(self) -> Result<Object> {
        self.finish()
    }
}

impl ser::SerializeStruct for SerializeStruct<'_> {
    type Ok = Object;
    type Error = Error;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<()> {
        match self {
            SerializeStruct::Record(record) => record.field(key, value),
            SerializeStruct::Dict(dict) => dict.field(key, value),
        }
    }

    fn end(self) -> Result<Object> {
        match self {
            SerializeStruct::Record(record) => record.finish(),
            SerializeStruct::Dict(dict) => dict.finish(),
        }
    }
}

impl ser::SerializeStructVariant for SerializeDict<'_> {
    type Ok = Object;
    type Error = Error;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<()> {
        self.field(key, value)
    }

    fn end(self) -> Result<Object> {
        self.finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Deserializer
// ═══════════════════════════════════════════════════════════════════════════════

/// Reads a borrowed guest object through serde.
#[derive(Clone, Copy)]
pub struct ObjectDeserializer<'a> {
    ctx: &'a Ctx,
    obj: Object,
}

impl<'a> ObjectDeserializer<'a> {
    pub fn new(ctx: &'a Ctx, obj: Object) -> Self {
        Self { ctx, obj }
    }

    fn unsupported(&self) -> Error {
        Error::FromGuest {
            guest: self.obj.type_object().name(),
            host: "serde data",
        }
    }

    fn dict_entries(&self) -> Result<Entries<'a>> {
        let items = self.ctx.owned(self.ctx.items(self.obj)?);
        let pairs = guest::list_items(items.as_ptr()).unwrap_or_default();
        let mut entries = Vec::with_capacity(pairs.len());
        for pair in pairs {
            if let Some(&[k, v]) = guest::tuple_items(pair).as_deref() {
                entries.push((Key::Object(Object::from_ptr(k)), Object::from_ptr(v)));
            }
        }
        Ok(Entries::new(self.ctx, entries, vec![items]))
    }

    /// Entries read by attribute name.
    fn attr_entries(&self, fields: &'static [&'static str]) -> Result<Entries<'a>> {
        let mut keep = Vec::with_capacity(fields.len());
        let mut entries = Vec::with_capacity(fields.len());
        for field in fields {
            let value = self
                .ctx
                .getattr(self.obj, field)
                .map_err(|err| Error::attr(*field, err))?;
            keep.push(self.ctx.owned(value));
            entries.push((Key::Name((*field).to_string()), value));
        }
        Ok(Entries::new(self.ctx, entries, keep))
    }

    fn is_dict(&self) -> bool {
        guest::dict_pairs(self.obj.as_ptr()).is_some()
    }
}

impl<'de> de::Deserializer<'de> for ObjectDeserializer<'_> {
    type Error = Error;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        let op = self.obj.as_ptr();
        if self.ctx.is_none(self.obj) {
            return visitor.visit_unit();
        }
        if let Some(b) = guest::bool_value(op) {
            return visitor.visit_bool(b);
        }
        if let Some(n) = guest::long_value(op) {
            if let Ok(v) = i64::try_from(&n) {
                return visitor.visit_i64(v);
            }
            if let Ok(v) = u64::try_from(&n) {
                return visitor.visit_u64(v);
            }
            return match i128::try_from(&n) {
                Ok(v) => visitor.visit_i128(v),
                Err(_) => Err(Error::OutOfRange { host: "i128" }),
            };
        }
        if let Some(x) = guest::float_value(op) {
            return visitor.visit_f64(x);
        }
        if let Some(s) = guest::str_value(op) {
            return visitor.visit_string(s);
        }
        if let Some(fields) = guest::record_fields(guest::type_of(op)) {
            let items = guest::tuple_items(op).unwrap_or_default();
            let entries = fields
                .into_iter()
                .zip(items)
                .map(|(name, item)| (Key::Name(name), Object::from_ptr(item)))
                .collect();
            return visitor.visit_map(Entries::new(self.ctx, entries, Vec::new()));
        }
        if let Some(items) = guest::list_items(op).or_else(|| guest::tuple_items(op)) {
            return visitor.visit_seq(Items {
                ctx: self.ctx,
                items,
                index: 0,
            });
        }
        if self.is_dict() {
            return visitor.visit_map(self.dict_entries()?);
        }
        Err(self.unsupported())
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        if self.ctx.is_none(self.obj) {
            visitor.visit_none()
        } else {
            visitor.visit_some(self)
        }
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value> {
        if self.is_dict() {
            return visitor.visit_map(self.dict_entries()?);
        }
        visitor.visit_map(self.attr_entries(fields)?)
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value> {
        if let Some(s) = guest::str_value(self.obj.as_ptr()) {
            return visitor.visit_enum(IntoDeserializer::<Error>::into_deserializer(s));
        }
        let pairs = guest::dict_pairs(self.obj.as_ptr()).unwrap_or_default();
        match pairs.as_slice() {
            &[(variant, value)] => visitor.visit_enum(Variant {
                ctx: self.ctx,
                variant: Object::from_ptr(variant),
                value: Object::from_ptr(value),
            }),
            _ => Err(Error::type_error(format!(
                "expected a str or a single-entry dict, got {}",
                self.obj.type_object().name()
            ))),
        }
    }

    serde::forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf unit unit_struct seq tuple tuple_struct map identifier
        ignored_any
    }
}

struct Items<'a> {
    ctx: &'a Ctx,
    items: Vec<ObjPtr>,
    index: usize,
}

impl<'de> SeqAccess<'de> for Items<'_> {
    type Error = Error;

    fn next_element_seed<T: DeserializeSeed<'de>>(&mut self, seed: T) -> Result<Option<T::Value>> {
        let Some(&item) = self.items.get(self.index) else {
            return Ok(None);
        };
        let index = self.index;
        self.index += 1;
        seed.deserialize(ObjectDeserializer::new(self.ctx, Object::from_ptr(item)))
            .map(Some)
            .map_err(|err| Error::item(index, err))
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.items.len().saturating_sub(self.index))
    }
}

enum Key {
    Name(String),
    Object(Object),
}

/// Map entries with borrowed values; `keep` holds the references that
/// keep them alive.
struct Entries<'a> {
    ctx: &'a Ctx,
    entries: std::vec::IntoIter<(Key, Object)>,
    pending: Option<(Key, Object)>,
    _keep: Vec<Owned<'a>>,
}

impl<'a> Entries<'a> {
    fn new(ctx: &'a Ctx, entries: Vec<(Key, Object)>, keep: Vec<Owned<'a>>) -> Self {
        Self {
            ctx,
            entries: entries.into_iter(),
            pending: None,
            _keep: keep,
        }
    }
}

impl<'de> MapAccess<'de> for Entries<'_> {
    type Error = Error;

    fn next_key_seed<K: DeserializeSeed<'de>>(&mut self, seed: K) -> Result<Option<K::Value>> {
        let Some((key, value)) = self.entries.next() else {
            return Ok(None);
        };
        let result = match &key {
            Key::Name(name) => seed.deserialize(IntoDeserializer::<Error>::into_deserializer(
                name.as_str(),
            )),
            Key::Object(o) => seed
                .deserialize(ObjectDeserializer::new(self.ctx, *o))
                .map_err(|err| Error::key(self.ctx.repr(*o), err)),
        };
        self.pending = Some((key, value));
        result.map(Some)
    }

    fn next_value_seed<V: DeserializeSeed<'de>>(&mut self, seed: V) -> Result<V::Value> {
        let (key, value) = self
            .pending
            .take()
            .ok_or_else(|| Error::runtime("map value requested before its key"))?;
        seed.deserialize(ObjectDeserializer::new(self.ctx, value))
            .map_err(|err| match key {
                Key::Name(name) => Error::attr(name, err),
                Key::Object(o) => Error::value(self.ctx.repr(o), err),
            })
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.entries.len())
    }
}

/// `{variant: value}` read as an externally tagged enum.
struct Variant<'a> {
    ctx: &'a Ctx,
    variant: Object,
    value: Object,
}

impl<'de, 'a> EnumAccess<'de> for Variant<'a> {
    type Error = Error;
    type Variant = ObjectDeserializer<'a>;

    fn variant_seed<V: DeserializeSeed<'de>>(
        self,
        seed: V,
    ) -> Result<(V::Value, ObjectDeserializer<'a>)> {
        let variant = seed.deserialize(ObjectDeserializer::new(self.ctx, self.variant))?;
        Ok((variant, ObjectDeserializer::new(self.ctx, self.value)))
    }
}

impl<'de> VariantAccess<'de> for ObjectDeserializer<'_> {
    type Error = Error;

    fn unit_variant(self) -> Result<()> {
        Ok(())
    }

    fn newtype_variant_seed<T: DeserializeSeed<'de>>(self, seed: T) -> Result<T::Value> {
        seed.deserialize(self)
    }

    fn tuple_variant<V: Visitor<'de>>(self, _len: usize, visitor: V) -> Result<V::Value> {
        de::Deserializer::deserialize_seq(self, visitor)
    }

    fn struct_variant<V: Visitor<'de>>(
        self,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value> {
        de::Deserializer::deserialize_struct(self, "", fields, visitor)
    }
}
