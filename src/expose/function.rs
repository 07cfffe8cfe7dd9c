//! Host functions callable from the guest.
//!
//! Any `Fn` of up to six arguments, optionally preceded by `&Ctx`, becomes
//! a [`HostFunction`]. Arguments are converted from the guest with
//! [`FromArgs`], the result back with [`HostReturn`]. While the host body
//! runs, guest access is released unless
//! [`HostFunction::interpreter_access`] asks to keep it.
//!
//! ```no_run
//! # use guestlink::{Ctx, HostFunction, Rest};
//! # fn run(ctx: &Ctx) -> guestlink::Result<()> {
//! let add = HostFunction::new(|a: i64, b: i64| a + b).named("add");
//! let sum = HostFunction::new(|Rest(xs): Rest<f64>| xs.iter().sum::<f64>());
//! let greet = HostFunction::new(|ctx: &Ctx, name: String| {
//!     let _ = ctx;
//!     format!("hello {name}")
//! })
//! .interpreter_access(true);
//! let module = ctx.new_module("tools")?;
//! ctx.set_attr_value(module, "add", &add)?;
//! ctx.set_attr_value(module, "sum", &sum)?;
//! ctx.set_attr_value(module, "greet", &greet)?;
//! ctx.decref(module);
//! # Ok(())
//! # }
//! ```

use std::any::type_name;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::{
    Attrs, AttrsMap, catch_panic, finish_slot, finish_status, get_attr, payload, raise_detached,
    release_context, set_attr,
};
use crate::context::Ctx;
use crate::convert::{Dynamic, Kind, Reflect, ReflectMut, ReflectRef, from_guest_error};
use crate::error::{Error, Result};
use crate::guest::{self, HostSlots, ObjPtr};
use crate::handle::HostAny;
use crate::object::Object;

/// Marker for functions taking `&Ctx` first.
pub struct WithCtx;
/// Marker for functions without a context parameter.
pub struct NoCtx;

struct Call<'a> {
    name: &'a str,
    access: bool,
}

type Invoke = dyn Fn(&Ctx, &Call<'_>, &[Object]) -> Result<Object> + Send + Sync;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// A host callable that can be exposed to the guest.
#[derive(Clone)]
pub struct HostFunction {
    id: u64,
    invoke: Arc<Invoke>,
    signature: Arc<str>,
    name: Option<Arc<str>>,
    interpreter_access: bool,
}

impl HostFunction {
    pub fn new<M, F: IntoHostFunction<M>>(f: F) -> Self {
        f.into_host_function()
    }

    fn from_invoke<F>(signature: String, invoke: F) -> Self
    where
        F: Fn(&Ctx, &Call<'_>, &[Object]) -> Result<Object> + Send + Sync + 'static,
    {
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            invoke: Arc::new(invoke),
            signature: signature.into(),
            name: None,
            interpreter_access: false,
        }
    }

    /// Name reported in `__name__` and in argument errors.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into().into());
        self
    }

    /// Keep exclusive guest access while the host body runs.
    pub fn interpreter_access(mut self, keep: bool) -> Self {
        self.interpreter_access = keep;
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The Rust signature, used as the default `__doc__`.
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Call with borrowed guest arguments, as the guest would. Requires
    /// access. Returns a new reference.
    pub fn call(&self, ctx: &Ctx, args: &[Object]) -> Result<Object> {
        self.invoke(ctx, self.name().unwrap_or("function"), args)
    }

    fn invoke(&self, ctx: &Ctx, name: &str, args: &[Object]) -> Result<Object> {
        let call = Call {
            name,
            access: self.interpreter_access,
        };
        (self.invoke)(ctx, &call, args)
    }
}

impl PartialEq for HostFunction {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunction")
            .field("name", &self.name())
            .field("signature", &self.signature())
            .field("interpreter_access", &self.interpreter_access)
            .finish()
    }
}

impl Reflect for HostFunction {
    fn kind(&self) -> Kind {
        Kind::Func
    }

    fn reflect_ref(&self) -> ReflectRef<'_> {
        ReflectRef::Func(self)
    }

    fn reflect_mut(&mut self) -> ReflectMut<'_> {
        ReflectMut::Func(self)
    }
}

/// Placeholder until filled by a conversion.
impl Default for HostFunction {
    fn default() -> Self {
        HostFunction::new(|| ()).named("undefined")
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Arguments
// ═══════════════════════════════════════════════════════════════════════════════

/// One parameter of a host function, read from the guest arguments.
pub trait FromArgs: Sized {
    /// Takes every remaining argument. Only valid as the last parameter.
    const VARIADIC: bool = false;

    fn from_args(ctx: &Ctx, args: &[Object], index: usize) -> Result<Self>;

    /// Guest references owned by the parsed value, released after the call.
    fn held(&self, _held: &mut Vec<Object>) {}
}

impl<T: Reflect + Default> FromArgs for T {
    fn from_args(ctx: &Ctx, args: &[Object], index: usize) -> Result<Self> {
        let o = args
            .get(index)
            .copied()
            .ok_or_else(|| Error::type_error(format!("missing argument #{index}")))?;
        ctx.extract(o).map_err(|err| Error::arg(index, err))
    }

    fn held(&self, held: &mut Vec<Object>) {
        if let Some(o) = self.as_any().downcast_ref::<Object>() {
            held.push(*o);
        }
    }
}

/// The variadic tail of the arguments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rest<T>(pub Vec<T>);

impl<T> Rest<T> {
    pub fn into_inner(self) -> Vec<T> {
        self.0
    }
}

impl<T> std::ops::Deref for Rest<T> {
    type Target = Vec<T>;

    fn deref(&self) -> &Vec<T> {
        &self.0
    }
}

impl<T: Reflect + Default> FromArgs for Rest<T> {
    const VARIADIC: bool = true;

    fn from_args(ctx: &Ctx, args: &[Object], index: usize) -> Result<Self> {
        args.iter()
            .enumerate()
            .skip(index)
            .map(|(i, o)| ctx.extract(*o).map_err(|err| Error::arg(i, err)))
            .collect::<Result<Vec<T>>>()
            .map(Rest)
    }

    fn held(&self, held: &mut Vec<Object>) {
        self.0.iter().for_each(|item| item.held(held));
    }
}

fn check_arity(name: &str, variadic: &[bool], given: usize) -> Result<()> {
    let required = variadic.iter().filter(|v| !**v).count();
    let open = variadic.last() == Some(&true);
    if (open && given >= required) || (!open && given == required) {
        return Ok(());
    }
    Err(Error::type_error(format!(
        "{name}() takes {}{required} positional argument{} but {given} {} given",
        if open { "at least " } else { "" },
        if required == 1 { "" } else { "s" },
        if given == 1 { "was" } else { "were" },
    )))
}

/// Conversion failures of arguments surface as `TypeError`.
fn argument_error(err: Error) -> Error {
    Error::type_error(err.to_string())
}

/// Run the host body, releasing access around it unless `access` is set.
fn run_body<R>(ctx: &Ctx, access: bool, body: impl FnOnce() -> R) -> Result<R> {
    let _released = (!access).then(|| ctx.release());
    catch_panic("RuntimeError", || Ok(body()))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Results
// ═══════════════════════════════════════════════════════════════════════════════

/// What a host function may return.
pub trait HostReturn {
    /// The guest result as a new reference, or the error to raise.
    fn into_return(self, ctx: &Ctx) -> Result<Object>;
}

impl HostReturn for () {
    fn into_return(self, ctx: &Ctx) -> Result<Object> {
        Ok(ctx.new_ref(ctx.none()))
    }
}

/// A returned [`Object`] is a new reference handed over to the guest, so an
/// argument is returned as `ctx.new_ref(arg)`.
impl<T: Reflect> HostReturn for T {
    fn into_return(self, ctx: &Ctx) -> Result<Object> {
        if let Some(o) = self.as_any().downcast_ref::<Object>() {
            if o.is_null() {
                return Err(Error::type_error("host function returned the null object"));
            }
            return Ok(*o);
        }
        ctx.to_guest(&self).map_err(result_error)
    }
}

impl<T: HostReturn, E: Into<Error>> HostReturn for std::result::Result<T, E> {
    fn into_return(self, ctx: &Ctx) -> Result<Object> {
        match self {
            Ok(value) => value.into_return(ctx),
            Err(err) => Err(err.into()),
        }
    }
}

fn result_error(err: Error) -> Error {
    Error::type_error(err.to_string())
}

macro_rules! tuple_return {
    ($($ty:ident $var:ident),+) => {
        impl<$($ty: Reflect),+> HostReturn for ($($ty,)+) {
            fn into_return(self, ctx: &Ctx) -> Result<Object> {
                let ($($var,)+) = self;
                let mut items = Vec::new();
                $(
                    match ctx.to_guest(&$var) {
                        Ok(o) => items.push(o),
                        Err(err) => {
                            ctx.decref_all(&items);
                            return Err(result_error(err));
                        }
                    }
                )+
                let tuple = ctx.tuple(&items);
                ctx.decref_all(&items);
                Ok(tuple)
            }
        }
    };
}

tuple_return!(A a, B b);
tuple_return!(A a, B b, C c);
tuple_return!(A a, B b, C c, D d);

// ═══════════════════════════════════════════════════════════════════════════════
// Closure adapters
// ═══════════════════════════════════════════════════════════════════════════════

/// Conversion of a Rust callable into a [`HostFunction`]. `M` tells the
/// arities and the context flavor apart.
pub trait IntoHostFunction<M>: Send + Sync + 'static {
    fn into_host_function(self) -> HostFunction;
}

/// `alloc::vec::Vec<alloc::string::String>` becomes `Vec<String>`.
fn short_type_name(full: &str) -> String {
    let mut out = String::with_capacity(full.len());
    let mut segment = String::new();
    for c in full.chars() {
        if c.is_alphanumeric() || c == '_' || c == ':' {
            segment.push(c);
        } else {
            out.push_str(segment.rsplit("::").next().unwrap_or_default());
            segment.clear();
            out.push(c);
        }
    }
    out.push_str(segment.rsplit("::").next().unwrap_or_default());
    out
}

fn signature(with_ctx: bool, params: &[&str], ret: &str) -> String {
    let mut names: Vec<String> = params.iter().map(|p| short_type_name(p)).collect();
    if with_ctx {
        names.insert(0, "&Ctx".to_string());
    }
    let ret = short_type_name(ret);
    if ret == "()" {
        format!("fn({})", names.join(", "))
    } else {
        format!("fn({}) -> {ret}", names.join(", "))
    }
}

macro_rules! host_function {
    ($($ty:ident $var:ident $idx:tt),*) => {
        host_function!(@impl NoCtx, false, [], $($ty $var $idx),*);
        host_function!(@impl WithCtx, true, [ctx], $($ty $var $idx),*);
    };
    (@impl $marker:ident, $with_ctx:literal, [$($ctx:ident)?], $($ty:ident $var:ident $idx:tt),*) => {
        impl<Func, R, $($ty,)*> IntoHostFunction<($marker, fn($($ty,)*) -> R)> for Func
        where
            Func: Fn($(host_function!(@ctx_type $ctx),)? $($ty),*) -> R + Send + Sync + 'static,
            R: HostReturn + 'static,
            $($ty: FromArgs + 'static,)*
        {
            fn into_host_function(self) -> HostFunction {
                let f = self;
                let variadic: Vec<bool> = vec![$(<$ty as FromArgs>::VARIADIC),*];
                let signature = signature($with_ctx, &[$(type_name::<$ty>()),*], type_name::<R>());
                HostFunction::from_invoke(signature, move |ctx: &Ctx, call: &Call<'_>, args: &[Object]| {
                    check_arity(call.name, &variadic, args.len())?;
                    #[allow(unused_mut)]
                    let mut held: Vec<Object> = Vec::new();
                    $(
                        let $var = match <$ty as FromArgs>::from_args(ctx, args, $idx) {
                            Ok(value) => {
                                value.held(&mut held);
                                value
                            }
                            Err(err) => {
                                ctx.decref_all(&held);
                                return Err(argument_error(err));
                            }
                        };
                    )*
                    let out = run_body(ctx, call.access, || f($(host_function!(@ctx_arg $ctx ctx),)? $($var),*));
                    ctx.decref_all(&held);
                    out?.into_return(ctx)
                })
            }
        }
    };
    (@ctx_type $ctx:ident) => { &Ctx };
    (@ctx_arg $ctx:ident $value:ident) => { $value };
}

host_function!();
host_function!(A0 a0 0);
host_function!(A0 a0 0, A1 a1 1);
host_function!(A0 a0 0, A1 a1 1, A2 a2 2);
host_function!(A0 a0 0, A1 a1 1, A2 a2 2, A3 a3 3);
host_function!(A0 a0 0, A1 a1 1, A2 a2 2, A3 a3 3, A4 a4 4);
host_function!(A0 a0 0, A1 a1 1, A2 a2 2, A3 a3 3, A4 a4 4, A5 a5 5);

// ═══════════════════════════════════════════════════════════════════════════════
// Guest type
// ═══════════════════════════════════════════════════════════════════════════════

/// Payload of a guest function object.
struct FunctionObject {
    func: HostFunction,
    attrs: AttrsMap,
}

const ATTRIBUTES: [&str; 4] = ["__class__", "__doc__", "__module__", "__name__"];

pub(super) fn slots() -> HostSlots {
    HostSlots {
        call: Some(call_slot),
        get_attr: Some(getattr_slot),
        set_attr: Some(setattr_slot),
        dealloc: Some(dealloc_slot),
    }
}

pub(super) fn new_object(ctx: &Ctx, f: HostFunction) -> Result<Object> {
    let types = ctx.host_types()?;
    let o = ctx.owned(ctx.wrap(guest::host_object_new(types.function.as_ptr()))?);
    let handle = guest::host_handle(o.as_ptr())
        .ok_or_else(|| Error::runtime("function object without a handle"))?;
    let stored = Arc::new(FunctionObject {
        func: f,
        attrs: AttrsMap::new(),
    });
    handle.set(Arc::clone(&stored) as HostAny);
    stored
        .attrs
        .set_value(ctx, "__doc__", &stored.func.signature().to_string())?;
    if let Some(name) = stored.func.name() {
        stored.attrs.set_value(ctx, "__name__", &name.to_string())?;
    }
    Ok(o.into_inner())
}

pub(super) fn to_guest(ctx: &Ctx, value: &dyn Reflect) -> Result<Object> {
    match value.reflect_ref() {
        ReflectRef::Func(f) => new_object(ctx, f.clone()),
        _ => Err(Error::ToGuest {
            host: value.type_name(),
        }),
    }
}

pub(super) fn from_guest(_ctx: &Ctx, o: Object, dest: &mut dyn Reflect) -> Result<()> {
    let Some(stored) = payload::<FunctionObject>(o.as_ptr()) else {
        return Err(from_guest_error(o, dest));
    };
    match dest.reflect_mut() {
        ReflectMut::Func(slot) => *slot = stored.func.clone(),
        ReflectMut::Any(d) => *d = Dynamic::Func(stored.func.clone()),
        _ => return Err(from_guest_error(o, dest)),
    }
    Ok(())
}

fn stored(o: ObjPtr) -> Result<Arc<FunctionObject>> {
    payload::<FunctionObject>(o).ok_or_else(|| Error::runtime("function object is empty"))
}

fn call_object(ctx: &Ctx, callee: ObjPtr, args: ObjPtr, kwargs: ObjPtr) -> Result<Object> {
    let stored = stored(callee)?;
    if !kwargs.is_null() && guest::length(kwargs) > 0 {
        return Err(Error::type_error("Unexpected keyword arguments"));
    }
    let args: Vec<Object> = guest::tuple_items(args)
        .unwrap_or_default()
        .into_iter()
        .map(Object::from_ptr)
        .collect();
    let name = stored
        .attrs
        .get_str("__name__")
        .unwrap_or_else(|| "function".to_string());
    stored.func.invoke(ctx, &name, &args)
}

fn call_slot(callee: ObjPtr, args: ObjPtr, kwargs: ObjPtr) -> ObjPtr {
    let ctx = match Ctx::extend_object(callee) {
        Ok(ctx) => ctx,
        Err(err) => {
            raise_detached(&err);
            return std::ptr::null_mut();
        }
    };
    let result = call_object(&ctx, callee, args, kwargs);
    finish_slot(&ctx, result)
}

fn no_attribute(o: Object, name: &str) -> Error {
    Error::attribute_error(format!(
        "'{}' object has no attribute '{name}'",
        o.type_object().name()
    ))
}

fn getattr_slot(o: ObjPtr, name: &str) -> ObjPtr {
    let ctx = match Ctx::extend_object(o) {
        Ok(ctx) => ctx,
        Err(err) => {
            raise_detached(&err);
            return std::ptr::null_mut();
        }
    };
    let o = Object::from_ptr(o);
    let result = if ATTRIBUTES.contains(&name) {
        stored(o.as_ptr()).and_then(|stored| get_attr(&ctx, o, &stored.attrs, name))
    } else {
        Err(no_attribute(o, name))
    };
    finish_slot(&ctx, result)
}

fn setattr_slot(o: ObjPtr, name: &str, value: ObjPtr) -> i32 {
    let ctx = match Ctx::extend_object(o) {
        Ok(ctx) => ctx,
        Err(err) => {
            raise_detached(&err);
            return -1;
        }
    };
    let o = Object::from_ptr(o);
    let result = if ATTRIBUTES.contains(&name) {
        stored(o.as_ptr())
            .and_then(|stored| set_attr(&ctx, o, &stored.attrs, name, Object::from_ptr(value)))
    } else {
        Err(no_attribute(o, name))
    };
    finish_status(&ctx, result)
}

fn dealloc_slot(o: ObjPtr) {
    let Some(stored) = payload::<FunctionObject>(o) else {
        return;
    };
    let ctx = release_context(o);
    let _ = catch_panic("RuntimeError", || {
        stored.attrs.clear(&ctx);
        Ok(())
    });
}
