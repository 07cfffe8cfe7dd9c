//! Runtime inspection of host values.
//!
//! [`Reflect`] tells the registry what a host value is made of: its
//! structural [`Kind`] and a borrowed view for reading ([`ReflectRef`]) or
//! filling ([`ReflectMut`]) it. Implementations for the standard scalar,
//! string, sequence and map types live here.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::{BuildHasher, Hash};

use indexmap::IndexMap;
use num_bigint::{BigInt, Sign};

use super::dynamic::Dynamic;
use crate::error::{Error, Result};
use crate::expose::HostFunction;
use crate::object::{Object, TypeObject};

/// Structural category of a host value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Bool,
    I8,
    I16,
    I32,
    I64,
    Isize,
    U8,
    U16,
    U32,
    U64,
    Usize,
    F32,
    F64,
    Str,
    /// Growable sequence, a guest `list`.
    Seq,
    /// Fixed-length sequence, a guest `tuple`.
    Array,
    Map,
    Func,
    /// A registered record-like struct.
    Struct,
    /// The open destination, see [`Dynamic`].
    Any,
    /// Only exact-type handlers apply.
    Opaque,
}

impl Kind {
    pub const INTEGERS: [Kind; 10] = [
        Kind::I8,
        Kind::I16,
        Kind::I32,
        Kind::I64,
        Kind::Isize,
        Kind::U8,
        Kind::U16,
        Kind::U32,
        Kind::U64,
        Kind::Usize,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Kind::Bool => "bool",
            Kind::I8 => "i8",
            Kind::I16 => "i16",
            Kind::I32 => "i32",
            Kind::I64 => "i64",
            Kind::Isize => "isize",
            Kind::U8 => "u8",
            Kind::U16 => "u16",
            Kind::U32 => "u32",
            Kind::U64 => "u64",
            Kind::Usize => "usize",
            Kind::F32 => "f32",
            Kind::F64 => "f64",
            Kind::Str => "str",
            Kind::Seq => "seq",
            Kind::Array => "array",
            Kind::Map => "map",
            Kind::Func => "func",
            Kind::Struct => "struct",
            Kind::Any => "any",
            Kind::Opaque => "opaque",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Type-erasure helpers every [`Reflect`] type gets for free.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn type_name(&self) -> &'static str;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// A host value the conversion registry can inspect.
pub trait Reflect: AsAny {
    fn kind(&self) -> Kind;
    fn reflect_ref(&self) -> ReflectRef<'_>;
    fn reflect_mut(&mut self) -> ReflectMut<'_>;
}

/// Read view of a host value.
pub enum ReflectRef<'a> {
    Bool(bool),
    Int(i128),
    Float(f64),
    Str(&'a str),
    Seq(&'a dyn SeqRef),
    Map(&'a dyn MapRef),
    Func(&'a HostFunction),
    Any(&'a Dynamic),
    Opaque,
}

/// Write view of a host value.
pub enum ReflectMut<'a> {
    Bool(&'a mut bool),
    Int(IntMut<'a>),
    Float(FloatMut<'a>),
    Str(&'a mut String),
    Seq(&'a mut dyn SeqMut),
    Map(&'a mut dyn MapMut),
    Func(&'a mut HostFunction),
    Any(&'a mut Dynamic),
    Opaque,
}

pub trait SeqRef {
    fn len(&self) -> usize;
    fn item(&self, index: usize) -> Option<&dyn Reflect>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub trait SeqMut {
    /// Replace the contents with `len` items, each filled in order by `fill`.
    fn fill(
        &mut self,
        len: usize,
        fill: &mut dyn FnMut(usize, &mut dyn Reflect) -> Result<()>,
    ) -> Result<()>;
}

pub trait MapRef {
    fn len(&self) -> usize;
    fn entries(&self) -> Vec<(&dyn Reflect, &dyn Reflect)>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub trait MapMut {
    fn clear(&mut self);
    /// Insert one entry whose key and value are filled by `fill`.
    fn insert_with(
        &mut self,
        fill: &mut dyn FnMut(&mut dyn Reflect, &mut dyn Reflect) -> Result<()>,
    ) -> Result<()>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Scalars
// ═══════════════════════════════════════════════════════════════════════════════

impl Reflect for bool {
    fn kind(&self) -> Kind {
        Kind::Bool
    }

    fn reflect_ref(&self) -> ReflectRef<'_> {
        ReflectRef::Bool(*self)
    }

    fn reflect_mut(&mut self) -> ReflectMut<'_> {
        ReflectMut::Bool(self)
    }
}

/// Mutable reference to a fixed-width integer.
pub enum IntMut<'a> {
    I8(&'a mut i8),
    I16(&'a mut i16),
    I32(&'a mut i32),
    I64(&'a mut i64),
    Isize(&'a mut isize),
    U8(&'a mut u8),
    U16(&'a mut u16),
    U32(&'a mut u32),
    U64(&'a mut u64),
    Usize(&'a mut usize),
}

macro_rules! reflect_int {
    ($($ty:ident => $kind:ident, signed = $signed:literal;)*) => {
        $(
            impl Reflect for $ty {
                fn kind(&self) -> Kind {
                    Kind::$kind
                }

                fn reflect_ref(&self) -> ReflectRef<'_> {
                    ReflectRef::Int(*self as i128)
                }

                fn reflect_mut(&mut self) -> ReflectMut<'_> {
                    ReflectMut::Int(IntMut::$kind(self))
                }
            }
        )*

        impl IntMut<'_> {
            /// Store `value`, failing when it does not fit the target.
            pub fn set(self, value: &BigInt) -> Result<()> {
                match self {
                    $(IntMut::$kind(target) => {
                        *target = narrow::<$ty>(value, stringify!($ty), $signed)?;
                    })*
                }
                Ok(())
            }
        }
    };
}

reflect_int! {
    i8 => I8, signed = true;
    i16 => I16, signed = true;
    i32 => I32, signed = true;
    i64 => I64, signed = true;
    isize => Isize, signed = true;
    u8 => U8, signed = false;
    u16 => U16, signed = false;
    u32 => U32, signed = false;
    u64 => U64, signed = false;
    usize => Usize, signed = false;
}

fn narrow<T>(value: &BigInt, host: &'static str, signed: bool) -> Result<T>
where
    T: for<'a> TryFrom<&'a BigInt>,
{
    if !signed && value.sign() == Sign::Minus {
        return Err(Error::Negative { host });
    }
    T::try_from(value).map_err(|_| Error::OutOfRange { host })
}

/// Mutable reference to a float.
pub enum FloatMut<'a> {
    F32(&'a mut f32),
    F64(&'a mut f64),
}

impl FloatMut<'_> {
    pub fn set(self, value: f64) {
        match self {
            FloatMut::F32(target) => *target = value as f32,
            FloatMut::F64(target) => *target = value,
        }
    }
}

impl Reflect for f32 {
    fn kind(&self) -> Kind {
        Kind::F32
    }

    fn reflect_ref(&self) -> ReflectRef<'_> {
        ReflectRef::Float(f64::from(*self))
    }

    fn reflect_mut(&mut self) -> ReflectMut<'_> {
        ReflectMut::Float(FloatMut::F32(self))
    }
}

impl Reflect for f64 {
    fn kind(&self) -> Kind {
        Kind::F64
    }

    fn reflect_ref(&self) -> ReflectRef<'_> {
        ReflectRef::Float(*self)
    }

    fn reflect_mut(&mut self) -> ReflectMut<'_> {
        ReflectMut::Float(FloatMut::F64(self))
    }
}

impl Reflect for String {
    fn kind(&self) -> Kind {
        Kind::Str
    }

    fn reflect_ref(&self) -> ReflectRef<'_> {
        ReflectRef::Str(self)
    }

    fn reflect_mut(&mut self) -> ReflectMut<'_> {
        ReflectMut::Str(self)
    }
}

/// Outbound only.
impl Reflect for &'static str {
    fn kind(&self) -> Kind {
        Kind::Str
    }

    fn reflect_ref(&self) -> ReflectRef<'_> {
        ReflectRef::Str(self)
    }

    fn reflect_mut(&mut self) -> ReflectMut<'_> {
        ReflectMut::Opaque
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Sequences
// ═══════════════════════════════════════════════════════════════════════════════

impl<T: Reflect> SeqRef for Vec<T> {
    fn len(&self) -> usize {
        Vec::len(self)
    }

    fn item(&self, index: usize) -> Option<&dyn Reflect> {
        self.get(index).map(|item| item as &dyn Reflect)
    }
}

impl<T: Reflect + Default> SeqMut for Vec<T> {
    fn fill(
        &mut self,
        len: usize,
        fill: &mut dyn FnMut(usize, &mut dyn Reflect) -> Result<()>,
    ) -> Result<()> {
        self.clear();
        self.reserve(len);
        for index in 0..len {
            let mut item = T::default();
            fill(index, &mut item)?;
            self.push(item);
        }
        Ok(())
    }
}

impl<T: Reflect + Default> Reflect for Vec<T> {
    fn kind(&self) -> Kind {
        Kind::Seq
    }

    fn reflect_ref(&self) -> ReflectRef<'_> {
        ReflectRef::Seq(self)
    }

    fn reflect_mut(&mut self) -> ReflectMut<'_> {
        ReflectMut::Seq(self)
    }
}

impl<T: Reflect, const N: usize> SeqRef for [T; N] {
    fn len(&self) -> usize {
        N
    }

    fn item(&self, index: usize) -> Option<&dyn Reflect> {
        self.get(index).map(|item| item as &dyn Reflect)
    }
}

impl<T: Reflect, const N: usize> SeqMut for [T; N] {
    fn fill(
        &mut self,
        len: usize,
        fill: &mut dyn FnMut(usize, &mut dyn Reflect) -> Result<()>,
    ) -> Result<()> {
        if len != N {
            return Err(Error::value_error(format!(
                "expected a sequence of {N} items, got {len}"
            )));
        }
        for (index, item) in self.iter_mut().enumerate() {
            fill(index, item)?;
        }
        Ok(())
    }
}

impl<T: Reflect, const N: usize> Reflect for [T; N] {
    fn kind(&self) -> Kind {
        Kind::Array
    }

    fn reflect_ref(&self) -> ReflectRef<'_> {
        ReflectRef::Seq(self)
    }

    fn reflect_mut(&mut self) -> ReflectMut<'_> {
        ReflectMut::Seq(self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Maps
// ═══════════════════════════════════════════════════════════════════════════════

macro_rules! reflect_map {
    ($map:ident<K, V $(, $hasher:ident)?> where K: $($bound:path)+) => {
        impl<K, V $(, $hasher)?> MapRef for $map<K, V $(, $hasher)?>
        where
            K: Reflect,
            V: Reflect,
            $($hasher: 'static,)?
        {
            fn len(&self) -> usize {
                $map::len(self)
            }

            fn entries(&self) -> Vec<(&dyn Reflect, &dyn Reflect)> {
                self.iter()
                    .map(|(k, v)| (k as &dyn Reflect, v as &dyn Reflect))
                    .collect()
            }
        }

        impl<K, V $(, $hasher)?> MapMut for $map<K, V $(, $hasher)?>
        where
            K: Reflect + Default $(+ $bound)+,
            V: Reflect + Default,
            $($hasher: BuildHasher + 'static,)?
        {
            fn clear(&mut self) {
                $map::clear(self);
            }

            fn insert_with(
                &mut self,
                fill: &mut dyn FnMut(&mut dyn Reflect, &mut dyn Reflect) -> Result<()>,
            ) -> Result<()> {
                let mut key = K::default();
                let mut value = V::default();
                fill(&mut key, &mut value)?;
                self.insert(key, value);
                Ok(())
            }
        }

        impl<K, V $(, $hasher)?> Reflect for $map<K, V $(, $hasher)?>
        where
            K: Reflect + Default $(+ $bound)+,
            V: Reflect + Default,
            $($hasher: BuildHasher + 'static,)?
        {
            fn kind(&self) -> Kind {
                Kind::Map
            }

            fn reflect_ref(&self) -> ReflectRef<'_> {
                ReflectRef::Map(self)
            }

            fn reflect_mut(&mut self) -> ReflectMut<'_> {
                ReflectMut::Map(self)
            }
        }
    };
}

reflect_map!(HashMap<K, V, S> where K: Eq Hash);
reflect_map!(BTreeMap<K, V> where K: Ord);

reflect_map!(IndexMap<K, V, S> where K: Eq Hash);

// ═══════════════════════════════════════════════════════════════════════════════
// Guest references and host-only types
// ═══════════════════════════════════════════════════════════════════════════════

/// Outbound returns a new reference, inbound stores one.
impl Reflect for Object {
    fn kind(&self) -> Kind {
        Kind::Opaque
    }

    fn reflect_ref(&self) -> ReflectRef<'_> {
        ReflectRef::Opaque
    }

    fn reflect_mut(&mut self) -> ReflectMut<'_> {
        ReflectMut::Opaque
    }
}

impl Reflect for TypeObject {
    fn kind(&self) -> Kind {
        Kind::Opaque
    }

    fn reflect_ref(&self) -> ReflectRef<'_> {
        ReflectRef::Opaque
    }

    fn reflect_mut(&mut self) -> ReflectMut<'_> {
        ReflectMut::Opaque
    }
}

/// Implement [`Reflect`] for types converted only by exact-type handlers,
/// such as structs registered with
/// [`Ctx::register_struct`](crate::Ctx::register_struct).
#[macro_export]
macro_rules! reflect_struct {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::convert::Reflect for $ty {
                fn kind(&self) -> $crate::convert::Kind {
                    $crate::convert::Kind::Struct
                }

                fn reflect_ref(&self) -> $crate::convert::ReflectRef<'_> {
                    $crate::convert::ReflectRef::Opaque
                }

                fn reflect_mut(&mut self) -> $crate::convert::ReflectMut<'_> {
                    $crate::convert::ReflectMut::Opaque
                }
            }
        )+
    };
}

/// Same as [`reflect_struct!`] for non-struct host types with their own
/// exact-type conversions.
#[macro_export]
macro_rules! reflect_opaque {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::convert::Reflect for $ty {
                fn kind(&self) -> $crate::convert::Kind {
                    $crate::convert::Kind::Opaque
                }

                fn reflect_ref(&self) -> $crate::convert::ReflectRef<'_> {
                    $crate::convert::ReflectRef::Opaque
                }

                fn reflect_mut(&mut self) -> $crate::convert::ReflectMut<'_> {
                    $crate::convert::ReflectMut::Opaque
                }
            }
        )+
    };
}

reflect_opaque!(serde_json::Value);
