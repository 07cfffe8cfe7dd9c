//! Extension modules: guest modules built by host code on first import.
//!
//! [`extend`] registers an initializer under a module name. The first time
//! the guest imports that name, an empty module is created and the
//! initializer fills it. No [`Ctx::embed`] is involved: the initializer gets
//! a context derived from the module itself, with host types and struct
//! registrations of its own that live as long as the module does.
//!
//! ```no_run
//! use guestlink::{Ctx, HostFunction, module};
//!
//! # fn main() -> guestlink::Result<()> {
//! module::extend("geometry", |ctx: &Ctx, m| {
//!     ctx.module_set_doc(m, "Plane geometry helpers.")?;
//!     let area = HostFunction::new(|w: f64, h: f64| w * h).named("area");
//!     ctx.set_attr_value(m, "area", &area)
//! })?;
//! # Ok(())
//! # }
//! ```

use std::ffi::c_int;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::context::Ctx;
use crate::error::{Error, Result};
use crate::expose::catch_panic;
use crate::guest::{self, ModuleDef, ObjPtr};
use crate::handle::{Handle, HostAny};
use crate::object::{Object, TypeObject};

type InitFn = dyn Fn(&Ctx, Object) -> Result<()> + Send + Sync;

struct Extension {
    init: Box<InitFn>,
}

/// Build module `name` with `init` when the guest first imports it.
///
/// `init` receives the module as a borrowed reference. An error, or a
/// panic, fails the import with the matching guest exception. Fails if an
/// extension with the same name is already registered.
pub fn extend<F>(name: &str, init: F) -> Result<()>
where
    F: Fn(&Ctx, Object) -> Result<()> + Send + Sync + 'static,
{
    let data = Handle::new();
    data.set(Arc::new(Extension {
        init: Box::new(init),
    }) as HostAny);
    let def = ModuleDef {
        name: name.to_string(),
        init: init_slot,
        free: Some(free_slot),
        data,
    };
    if guest::extension_add(def) < 0 {
        return Err(Error::runtime(format!(
            "extension module '{name}' is already registered"
        )));
    }
    Ok(())
}

/// Forget the extension registered under `name`. A module already imported
/// keeps working until the interpreter drops it.
pub fn retract(name: &str) -> bool {
    guest::extension_remove(name) == 0
}

fn init_slot(module: ObjPtr) -> c_int {
    let name = guest::module_name(module).unwrap_or_default();
    let ctx = match Ctx::init_module(module) {
        Ok(ctx) => ctx,
        Err(err) => {
            guest::err_set_string(guest::exception_type("RuntimeError"), &err.to_string());
            return -1;
        }
    };
    let extension = guest::module_def(module).and_then(|def| def.data.get_as::<Extension>());
    let result = match extension {
        Some(extension) => catch_panic("RuntimeError", || {
            (extension.init)(&ctx, Object::from_ptr(module))
        }),
        None => Err(Error::runtime(format!(
            "extension module '{name}' has no initializer"
        ))),
    };
    match result {
        Ok(()) => {
            debug!(%name, "extension module initialized");
            0
        }
        Err(err) => {
            warn!(%name, %err, "extension module initialization failed");
            ctx.set_error(&err);
            -1
        }
    }
}

fn free_slot(module: ObjPtr) {
    Ctx::release_module(module);
}

impl Ctx {
    /// Set the docstring of `module`.
    pub fn module_set_doc(&self, module: Object, doc: &str) -> Result<()> {
        let doc = self.owned(self.to_guest(&doc.to_string())?);
        self.setattr(module, "__doc__", *doc)
    }

    /// Add `ty` to `module` under its own name, recording the module in the
    /// type's `__module__`.
    pub fn module_add_type(&self, module: Object, ty: TypeObject) -> Result<()> {
        let name = self.owned(self.getattr(module, "__name__")?);
        self.setattr(ty.as_object(), "__module__", *name)?;
        self.setattr(module, &ty.name(), ty.as_object())
    }
}
