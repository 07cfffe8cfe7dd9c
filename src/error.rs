//! Error types for the bridging layer

use std::fmt;

use thiserror::Error;

use crate::guest::Frame;

/// A guest exception surfaced to host code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestError {
    /// Exception type name, e.g. `TypeError`.
    pub type_name: String,
    pub message: String,
    /// Formatted traceback lines, outermost first; empty when the exception
    /// never passed through a guest frame.
    pub traceback: Vec<String>,
}

impl GuestError {
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
            traceback: Vec::new(),
        }
    }

    /// Combine the guest frames of an exception with the host frames that led
    /// to the failing guest call.
    pub(crate) fn with_frames(mut self, guest: &[Frame]) -> Self {
        if guest.is_empty() {
            return self;
        }
        let mut lines = vec!["Traceback (most recent call last):\n".to_string()];
        lines.extend(host_frames().iter().map(HostFrame::to_line));
        lines.extend(guest.iter().map(|frame| {
            format!(
                "  File \"{}\", line {}, in {}\n",
                frame.file, frame.line, frame.name
            )
        }));
        self.traceback = lines;
        self
    }
}

impl fmt::Display for GuestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.traceback {
            f.write_str(line)?;
        }
        write!(f, "{}: {}", self.type_name, self.message)
    }
}

impl std::error::Error for GuestError {}

/// Main error type
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Guest(#[from] GuestError),

    #[error("cannot convert a host {host} to guest")]
    ToGuest { host: &'static str },

    #[error("cannot convert a guest {guest} to host {host}")]
    FromGuest { guest: String, host: &'static str },

    #[error("guest int doesn't fit, cannot convert to host {host}")]
    OutOfRange { host: &'static str },

    #[error("guest int is negative, cannot convert to host {host}")]
    Negative { host: &'static str },

    #[error("item #{index}: {source}")]
    Item { index: usize, source: Box<Error> },

    #[error("key {key}: {source}")]
    Key { key: String, source: Box<Error> },

    #[error("value {key}: {source}")]
    Value { key: String, source: Box<Error> },

    #[error("attr \"{name}\": {source}")]
    Attr { name: String, source: Box<Error> },

    #[error("arg #{index}: {source}")]
    Arg { index: usize, source: Box<Error> },

    /// Invalid or conflicting conversion registration.
    #[error("{0}")]
    Registry(String),

    /// Invalid struct registration.
    #[error("{0}")]
    Struct(String),

    #[error("the interpreter is already initialized")]
    AlreadyInitialized,

    #[error("the state is not initialized")]
    NotInitialized,

    #[error("this thread already owns a guest context")]
    ContextOwned,

    /// Host-side failure reported to the guest as `RuntimeError`.
    #[error("{0}")]
    Runtime(String),

    /// Message produced by the serde bridge.
    #[error("{0}")]
    Custom(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn runtime(message: impl Into<String>) -> Self {
        Error::Runtime(message.into())
    }

    /// A guest exception of the given type, without traceback.
    pub fn guest(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Guest(GuestError::new(type_name, message))
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::guest("TypeError", message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::guest("ValueError", message)
    }

    pub fn attribute_error(message: impl Into<String>) -> Self {
        Self::guest("AttributeError", message)
    }

    pub(crate) fn item(index: usize, source: Error) -> Self {
        Error::Item {
            index,
            source: Box::new(source),
        }
    }

    pub(crate) fn key(key: impl Into<String>, source: Error) -> Self {
        Error::Key {
            key: key.into(),
            source: Box::new(source),
        }
    }

    pub(crate) fn value(key: impl Into<String>, source: Error) -> Self {
        Error::Value {
            key: key.into(),
            source: Box::new(source),
        }
    }

    pub(crate) fn attr(name: impl Into<String>, source: Error) -> Self {
        Error::Attr {
            name: name.into(),
            source: Box::new(source),
        }
    }

    pub(crate) fn arg(index: usize, source: Error) -> Self {
        Error::Arg {
            index,
            source: Box::new(source),
        }
    }

    /// Guest exception this error carries, if any.
    pub fn as_guest(&self) -> Option<&GuestError> {
        match self {
            Error::Guest(err) => Some(err),
            _ => None,
        }
    }

    /// Name of the guest exception type this error raises when it crosses
    /// back into the guest.
    pub fn exception_name(&self) -> &str {
        match self {
            Error::Guest(err) => &err.type_name,
            Error::Io(_) => "OSError",
            _ => "RuntimeError",
        }
    }

    /// Message raised into the guest: the bare exception message for guest
    /// errors, the full display text otherwise.
    pub fn exception_message(&self) -> String {
        match self {
            Error::Guest(err) => err.message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<String> for Error {
    fn from(message: String) -> Self {
        Error::Runtime(message)
    }
}

impl From<&str> for Error {
    fn from(message: &str) -> Self {
        Error::Runtime(message.to_string())
    }
}

impl serde::ser::Error for Error {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        Error::Custom(msg.to_string())
    }
}

impl serde::de::Error for Error {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        Error::Custom(msg.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Host frames
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
struct HostFrame {
    name: String,
    file: String,
    line: u32,
}

impl HostFrame {
    fn to_line(&self) -> String {
        format!("  File \"{}\", line {}, in {}\n", self.file, self.line, self.name)
    }

    fn is_runtime(&self) -> bool {
        const RUNTIME_PREFIXES: &[&str] = &[
            "std::", "core::", "alloc::", "backtrace::", "test::", "__rust", "_start", "__libc",
            "start_thread", "clone", "<",
        ];
        RUNTIME_PREFIXES.iter().any(|p| self.name.starts_with(p))
            || self.file.starts_with("/rustc/")
            || self.file.contains("/.cargo/registry/")
    }

    fn is_wrapper(&self) -> bool {
        self.name.starts_with("guestlink::")
            && (self.name.ends_with("::catch_error") || self.name.ends_with("::wrap"))
    }
}

/// Host frames that led here, outermost first, with the error-wrapping
/// frames and the runtime-rooted frames removed.
fn host_frames() -> Vec<HostFrame> {
    let trace = backtrace::Backtrace::new();
    let frames: Vec<HostFrame> = trace
        .frames()
        .iter()
        .flat_map(|frame| frame.symbols())
        .filter_map(|symbol| {
            Some(HostFrame {
                name: format!("{:#}", symbol.name()?),
                file: symbol.filename()?.display().to_string(),
                line: symbol.lineno().unwrap_or(0),
            })
        })
        .collect();
    // innermost first: skip up to and past the first run of wrapping frames
    let callers_start = frames.iter().position(HostFrame::is_wrapper).map_or(0, |first| {
        first
            + frames
                .iter()
                .skip(first)
                .take_while(|frame| frame.is_wrapper())
                .count()
    });
    frames
        .into_iter()
        .skip(callers_start)
        .filter(|frame| !frame.is_runtime())
        .rev()
        .collect()
}
