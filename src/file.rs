//! Sharing open files with the guest.
//!
//! A [`HostFile`] converts to a guest `file` object backed by a duplicate of
//! its descriptor, and a guest `file` converts back the same way. Each side
//! owns its own descriptor and closes it independently; the OS-level file
//! stays open until both have.

use std::fs::File;

use tracing::trace;

use crate::context::Ctx;
use crate::convert::{Conversion, from_guest_error};
use crate::error::{Error, Result};
use crate::guest;
use crate::object::Object;

const BINARY: char = 'b';

/// An open host file with the mode and encoding the guest should see.
#[derive(Debug)]
pub struct HostFile {
    file: File,
    name: String,
    mode: String,
    encoding: Option<String>,
}

impl HostFile {
    /// A text file, mode `"rt"`, encoding `"utf-8"`.
    pub fn new(file: File) -> Self {
        Self {
            file,
            name: "<host file>".to_string(),
            mode: "rt".to_string(),
            encoding: Some("utf-8".to_string()),
        }
    }

    /// Binary modes carry no encoding.
    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = mode.into();
        if self.mode.contains(BINARY) {
            self.encoding = None;
        }
        self
    }

    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = Some(encoding.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    pub fn into_file(self) -> File {
        self.file
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> &str {
        &self.mode
    }

    pub fn encoding(&self) -> Option<&str> {
        self.encoding.as_deref()
    }

    /// Duplicate the descriptor of the guest file `o` (borrowed). Takes the
    /// context to prove access is held.
    pub fn from_object(_ctx: &Ctx, o: Object) -> Result<HostFile> {
        let data = guest::file_data(o.as_ptr()).ok_or_else(|| Error::FromGuest {
            guest: o.type_object().name(),
            host: std::any::type_name::<HostFile>(),
        })?;
        let file = match data.file.lock().as_ref() {
            Some(file) => file.try_clone()?,
            None => return Err(Error::value_error("I/O operation on closed file.")),
        };
        trace!(name = %data.name, "guest file duplicated");
        Ok(HostFile {
            file,
            name: data.name.clone(),
            mode: data.mode.clone(),
            encoding: data.encoding.clone(),
        })
    }

    /// A guest file over a duplicate of this descriptor. Returns a new
    /// reference.
    pub fn to_object(&self, ctx: &Ctx) -> Result<Object> {
        let file = self.file.try_clone()?;
        ctx.wrap(guest::file_new(
            file,
            &self.name,
            &self.mode,
            self.encoding.as_deref(),
        ))
    }
}

crate::reflect_opaque!(HostFile);

pub(crate) fn conversions() -> Vec<Conversion> {
    vec![
        Conversion::for_type::<HostFile>()
            .to_guest(|ctx, value| match value.as_any().downcast_ref::<HostFile>() {
                Some(file) => file.to_object(ctx),
                None => Err(Error::ToGuest {
                    host: value.type_name(),
                }),
            })
            .from_guest(|ctx, o, dest| {
                if guest::file_data(o.as_ptr()).is_none() {
                    return Err(from_guest_error(o, dest));
                }
                let file = HostFile::from_object(ctx, o)?;
                match dest.as_any_mut().downcast_mut::<HostFile>() {
                    Some(slot) => {
                        *slot = file;
                        Ok(())
                    }
                    None => Err(from_guest_error(o, dest)),
                }
            }),
    ]
}
