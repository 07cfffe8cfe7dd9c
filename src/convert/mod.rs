//! Bidirectional conversion between host values and guest objects.
//!
//! Conversions are looked up in a process-wide registry keyed three ways:
//! by exact host type, by structural [`Kind`] and by guest type. Outbound
//! ([`Ctx::to_guest`]) tries the exact host type, then the kind. Inbound
//! ([`Ctx::from_guest`]) tries the exact destination type, then the
//! destination kind, then the guest type of the source object. The last
//! step is what fills a [`Dynamic`] destination.
//!
//! The defaults cover scalars, strings, sequences, maps, guest references,
//! host functions and values, files and `serde_json::Value`. More are added
//! with [`register`], typically during start-up:
//!
//! ```no_run
//! use guestlink::convert::{self, Conversion, Kind};
//! # fn main() -> guestlink::Result<()> {
//! struct Celsius(f64);
//! guestlink::reflect_opaque!(Celsius);
//!
//! convert::register(vec![Conversion::for_type::<Celsius>().to_guest(|ctx, value| {
//!     let celsius = value.as_any().downcast_ref::<Celsius>().map_or(0.0, |c| c.0);
//!     ctx.to_guest(&celsius)
//! })])?;
//! # Ok(())
//! # }
//! ```

mod bridge;
mod container;
pub mod dynamic;
pub(crate) mod record;
mod reflect;
mod scalar;

use std::any::TypeId;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::{debug, error};

pub use bridge::{GuestSerializer, ObjectDeserializer};
pub use dynamic::{Dynamic, Record};
pub use reflect::{
    AsAny, FloatMut, IntMut, Kind, MapMut, MapRef, Reflect, ReflectMut, ReflectRef, SeqMut, SeqRef,
};

use crate::context::Ctx;
use crate::error::{Error, Result};
use crate::object::{Object, TypeObject};
use crate::prelude::FxHashMap;

/// Outbound handler: returns a new reference.
pub type ToGuestFn = Arc<dyn Fn(&Ctx, &dyn Reflect) -> Result<Object> + Send + Sync>;
/// Inbound handler: fills the destination from a borrowed object.
pub type FromGuestFn = Arc<dyn Fn(&Ctx, Object, &mut dyn Reflect) -> Result<()> + Send + Sync>;

/// Identity of a host type, used as a registry key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostType {
    id: TypeId,
    name: &'static str,
}

impl HostType {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn name(self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for HostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// One registry entry: the keys it is filed under and its handlers.
#[derive(Clone, Default)]
pub struct Conversion {
    host_type: Option<HostType>,
    kind: Option<Kind>,
    guest_type: Option<TypeObject>,
    to_guest: Option<ToGuestFn>,
    from_guest: Option<FromGuestFn>,
}

impl Conversion {
    /// An empty conversion; set at least one key and one handler.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_type<T: Reflect>() -> Self {
        Self::new().host_type::<T>()
    }

    pub fn for_kind(kind: Kind) -> Self {
        Self::new().kind(kind)
    }

    pub fn for_guest_type(ty: TypeObject) -> Self {
        Self::new().guest_type(ty)
    }

    pub fn host_type<T: Reflect>(mut self) -> Self {
        self.host_type = Some(HostType::of::<T>());
        self
    }

    pub fn kind(mut self, kind: Kind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Also use the inbound handler for source objects of type `ty` when
    /// nothing more specific matches.
    pub fn guest_type(mut self, ty: TypeObject) -> Self {
        self.guest_type = Some(ty);
        self
    }

    pub fn to_guest<F>(mut self, f: F) -> Self
    where
        F: Fn(&Ctx, &dyn Reflect) -> Result<Object> + Send + Sync + 'static,
    {
        self.to_guest = Some(Arc::new(f));
        self
    }

    pub fn from_guest<F>(mut self, f: F) -> Self
    where
        F: Fn(&Ctx, Object, &mut dyn Reflect) -> Result<()> + Send + Sync + 'static,
    {
        self.from_guest = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for Conversion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conversion")
            .field("host_type", &self.host_type)
            .field("kind", &self.kind)
            .field("guest_type", &self.guest_type.map(TypeObject::name))
            .field("to_guest", &self.to_guest.is_some())
            .field("from_guest", &self.from_guest.is_some())
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone, Default)]
struct Registry {
    to_by_type: FxHashMap<TypeId, ToGuestFn>,
    from_by_type: FxHashMap<TypeId, FromGuestFn>,
    to_by_kind: FxHashMap<Kind, ToGuestFn>,
    from_by_kind: FxHashMap<Kind, FromGuestFn>,
    from_by_guest: FxHashMap<TypeObject, FromGuestFn>,
}

impl Registry {
    fn with_defaults() -> Self {
        let mut registry = Registry::default();
        for conversion in defaults() {
            if let Err(err) = registry.apply(&conversion) {
                error!(%err, ?conversion, "default conversion rejected");
            }
        }
        registry
    }

    fn apply(&mut self, c: &Conversion) -> Result<()> {
        if c.host_type.is_none() && c.kind.is_none() && c.guest_type.is_none() {
            return Err(Error::Registry(
                "either a host type, a kind or a guest type must be set".into(),
            ));
        }
        if c.guest_type.is_some() && c.from_guest.is_none() {
            return Err(Error::Registry(
                "a guest type conversion requires from_guest".into(),
            ));
        }
        if c.to_guest.is_none() && c.from_guest.is_none() {
            return Err(Error::Registry("to_guest or from_guest must be set".into()));
        }

        if let Some(host) = c.host_type {
            let taken = (c.to_guest.is_some() && self.to_by_type.contains_key(&host.id))
                || (c.from_guest.is_some() && self.from_by_type.contains_key(&host.id));
            if taken {
                return Err(Error::Registry(format!(
                    "Type handler is already registered: {}",
                    host.name
                )));
            }
        } else if let Some(kind) = c.kind {
            let taken = (c.to_guest.is_some() && self.to_by_kind.contains_key(&kind))
                || (c.from_guest.is_some() && self.from_by_kind.contains_key(&kind));
            if taken {
                return Err(Error::Registry(format!(
                    "Kind handler is already registered: {kind}"
                )));
            }
        }
        if let Some(ty) = c.guest_type {
            if self.from_by_guest.contains_key(&ty) {
                return Err(Error::Registry(format!(
                    "TypeObject handler is already registered: {}",
                    ty.name()
                )));
            }
        }

        // A host type key takes precedence over a kind key.
        if let Some(host) = c.host_type {
            if let Some(f) = &c.to_guest {
                self.to_by_type.insert(host.id, Arc::clone(f));
            }
            if let Some(f) = &c.from_guest {
                self.from_by_type.insert(host.id, Arc::clone(f));
            }
        } else if let Some(kind) = c.kind {
            if let Some(f) = &c.to_guest {
                self.to_by_kind.insert(kind, Arc::clone(f));
            }
            if let Some(f) = &c.from_guest {
                self.from_by_kind.insert(kind, Arc::clone(f));
            }
        }
        if let (Some(ty), Some(f)) = (c.guest_type, &c.from_guest) {
            self.from_by_guest.insert(ty, Arc::clone(f));
        }
        Ok(())
    }

    fn remove(&mut self, c: &Conversion) {
        if let Some(host) = c.host_type {
            self.to_by_type.remove(&host.id);
            self.from_by_type.remove(&host.id);
        } else if let Some(kind) = c.kind {
            self.to_by_kind.remove(&kind);
            self.from_by_kind.remove(&kind);
        }
        if let Some(ty) = c.guest_type {
            self.from_by_guest.remove(&ty);
        }
    }

    fn to_handler(&self, value: &dyn Reflect) -> Option<ToGuestFn> {
        self.to_by_type
            .get(&value.as_any().type_id())
            .or_else(|| self.to_by_kind.get(&value.kind()))
            .cloned()
    }

    fn from_handler(&self, source: TypeObject, dest: &dyn Reflect) -> Option<FromGuestFn> {
        let kind = dest.kind();
        self.from_by_type
            .get(&dest.as_any().type_id())
            .or_else(|| {
                if kind == Kind::Any {
                    None
                } else {
                    self.from_by_kind.get(&kind)
                }
            })
            .or_else(|| self.from_by_guest.get(&source))
            .cloned()
    }
}

static REGISTRY: Lazy<RwLock<Registry>> = Lazy::new(|| RwLock::new(Registry::with_defaults()));

/// Add a batch of conversions. The batch is applied atomically: if any
/// entry is invalid or conflicts with a registered one, nothing changes.
///
/// Registration is meant for start-up; lookups see either the whole batch
/// or none of it.
pub fn register(conversions: impl IntoIterator<Item = Conversion>) -> Result<()> {
    let mut registry = REGISTRY.write();
    let mut next = registry.clone();
    let mut count = 0usize;
    for conversion in conversions {
        next.apply(&conversion)?;
        count += 1;
    }
    *registry = next;
    debug!(count, "conversions registered");
    Ok(())
}

/// Remove conversions by their keys. Unknown keys are ignored.
pub fn deregister(conversions: &[Conversion]) {
    let mut registry = REGISTRY.write();
    conversions.iter().for_each(|c| registry.remove(c));
    debug!(count = conversions.len(), "conversions deregistered");
}

fn defaults() -> Vec<Conversion> {
    let mut all = scalar::conversions();
    all.extend(container::conversions());
    all.extend(dynamic::conversions());
    all.extend(record::conversions());
    all.extend(crate::expose::conversions());
    all.extend(crate::file::conversions());
    all
}

pub(crate) fn from_guest_error(o: Object, dest: &dyn Reflect) -> Error {
    Error::FromGuest {
        guest: o.type_object().name(),
        host: dest.type_name(),
    }
}

/// Short text for a host value in error messages.
pub(crate) fn describe(value: &dyn Reflect) -> String {
    match value.reflect_ref() {
        ReflectRef::Bool(b) => b.to_string(),
        ReflectRef::Int(n) => n.to_string(),
        ReflectRef::Float(x) => x.to_string(),
        ReflectRef::Str(s) => format!("{s:?}"),
        ReflectRef::Any(d) => format!("{d:?}"),
        _ => value.type_name().to_string(),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Entry points
// ═══════════════════════════════════════════════════════════════════════════════

impl Ctx {
    /// Convert a host value to a guest object. Returns a new reference.
    pub fn to_guest(&self, value: &dyn Reflect) -> Result<Object> {
        if let Some(o) = value.as_any().downcast_ref::<Object>() {
            if o.is_null() {
                return Err(Error::ToGuest {
                    host: value.type_name(),
                });
            }
            return Ok(self.new_ref(*o));
        }
        let handler = REGISTRY.read().to_handler(value);
        match handler {
            Some(handler) => handler(self, value),
            None => Err(Error::ToGuest {
                host: value.type_name(),
            }),
        }
    }

    /// Fill `dest` from the borrowed object `o`.
    ///
    /// An [`Object`] destination receives a new reference.
    pub fn from_guest(&self, o: Object, dest: &mut dyn Reflect) -> Result<()> {
        if o.is_null() {
            return Err(Error::FromGuest {
                guest: "NULL".into(),
                host: (*dest).type_name(),
            });
        }
        if let Some(slot) = dest.as_any_mut().downcast_mut::<Object>() {
            *slot = self.new_ref(o);
            return Ok(());
        }
        let handler = REGISTRY.read().from_handler(o.type_object(), dest);
        match handler {
            Some(handler) => handler(self, o, dest),
            None => Err(from_guest_error(o, dest)),
        }
    }

    /// Convert a borrowed object into a fresh `T`.
    pub fn extract<T: Reflect + Default>(&self, o: Object) -> Result<T> {
        let mut value = T::default();
        self.from_guest(o, &mut value)?;
        Ok(value)
    }
}
