//! Builtin functions, bound methods and the startup modules.

use std::io::{Read, Write};

use super::exc::err_set_string;
use super::object::{BuiltinFn, ObjPtr, Payload, TypeKind, payload, type_name, type_of};
use super::ops::{length, repr, str_of};
use super::types::{builtins, new_record_type};
use super::value::{
    builtin_new, dict_get_item, dict_pairs, file_data, list_append, list_new, long_from,
    module_data, module_new, none, str_from, str_value, tuple_items,
};

fn raise(exception: &str, message: &str) -> ObjPtr {
    err_set_string(builtins().exception(exception), message);
    std::ptr::null_mut()
}

fn expect_args(name: &str, args: &[ObjPtr], min: usize, max: usize) -> bool {
    if (min..=max).contains(&args.len()) {
        return true;
    }
    let expected = if min == max {
        format!("exactly {min}")
    } else {
        format!("from {min} to {max}")
    };
    raise(
        "TypeError",
        &format!("{name}() takes {expected} arguments ({} given)", args.len()),
    );
    false
}

/// Methods available on instances of builtin types.
pub(crate) fn methods_for(kind: TypeKind) -> &'static [(&'static str, BuiltinFn)] {
    match kind {
        TypeKind::List => &[("append", list_append_method)],
        TypeKind::Dict => &[
            ("items", dict_items_method),
            ("keys", dict_keys_method),
            ("get", dict_get_method),
        ],
        TypeKind::File => &[
            ("read", file_read),
            ("write", file_write),
            ("flush", file_flush),
            ("close", file_close),
        ],
        _ => &[],
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Container methods
// ═══════════════════════════════════════════════════════════════════════════════

fn list_append_method(receiver: ObjPtr, args: &[ObjPtr]) -> ObjPtr {
    if !expect_args("append", args, 1, 1) {
        return std::ptr::null_mut();
    }
    match args.first() {
        Some(item) if list_append(receiver, *item) == 0 => none(),
        _ => std::ptr::null_mut(),
    }
}

fn dict_items_method(receiver: ObjPtr, args: &[ObjPtr]) -> ObjPtr {
    if !expect_args("items", args, 0, 0) {
        return std::ptr::null_mut();
    }
    super::ops::mapping_items(receiver)
}

fn dict_keys_method(receiver: ObjPtr, args: &[ObjPtr]) -> ObjPtr {
    if !expect_args("keys", args, 0, 0) {
        return std::ptr::null_mut();
    }
    let keys = dict_pairs(receiver)
        .unwrap_or_default()
        .into_iter()
        .map(|(key, _)| {
            super::object::incref(key);
            key
        })
        .collect();
    list_new(keys)
}

fn dict_get_method(receiver: ObjPtr, args: &[ObjPtr]) -> ObjPtr {
    if !expect_args("get", args, 1, 2) {
        return std::ptr::null_mut();
    }
    let found = args
        .first()
        .map(|key| dict_get_item(receiver, *key))
        .filter(|value| !value.is_null());
    let value = found.or_else(|| args.get(1).copied()).unwrap_or_else(none);
    super::object::incref(value);
    value
}

// ═══════════════════════════════════════════════════════════════════════════════
// File methods
// ═══════════════════════════════════════════════════════════════════════════════

fn with_open_file(
    receiver: ObjPtr,
    f: impl FnOnce(&mut std::fs::File) -> std::io::Result<ObjPtr>,
) -> ObjPtr {
    let Some(data) = file_data(receiver) else {
        return raise("TypeError", "descriptor requires a 'file' object");
    };
    let mut guard = data.file.lock();
    let Some(file) = guard.as_mut() else {
        return raise("ValueError", "I/O operation on closed file.");
    };
    match f(file) {
        Ok(result) => result,
        Err(err) => raise("OSError", &err.to_string()),
    }
}

fn file_read(receiver: ObjPtr, args: &[ObjPtr]) -> ObjPtr {
    if !expect_args("read", args, 0, 0) {
        return std::ptr::null_mut();
    }
    with_open_file(receiver, |file| {
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        Ok(str_from(&String::from_utf8_lossy(&buf)))
    })
}

fn file_write(receiver: ObjPtr, args: &[ObjPtr]) -> ObjPtr {
    if !expect_args("write", args, 1, 1) {
        return std::ptr::null_mut();
    }
    let Some(text) = args.first().and_then(|arg| str_value(*arg)) else {
        return raise("TypeError", "write() argument must be str");
    };
    with_open_file(receiver, |file| {
        file.write_all(text.as_bytes())?;
        Ok(long_from(text.chars().count()))
    })
}

fn file_flush(receiver: ObjPtr, args: &[ObjPtr]) -> ObjPtr {
    if !expect_args("flush", args, 0, 0) {
        return std::ptr::null_mut();
    }
    with_open_file(receiver, |file| {
        file.flush()?;
        Ok(none())
    })
}

fn file_close(receiver: ObjPtr, args: &[ObjPtr]) -> ObjPtr {
    if !expect_args("close", args, 0, 0) {
        return std::ptr::null_mut();
    }
    if let Some(data) = file_data(receiver) {
        drop(data.file.lock().take());
    }
    none()
}

// ═══════════════════════════════════════════════════════════════════════════════
// Module functions
// ═══════════════════════════════════════════════════════════════════════════════

fn builtin_len(_: ObjPtr, args: &[ObjPtr]) -> ObjPtr {
    if !expect_args("len", args, 1, 1) {
        return std::ptr::null_mut();
    }
    match args.first().map(|arg| length(*arg)) {
        Some(len) if len >= 0 => long_from(len),
        _ => std::ptr::null_mut(),
    }
}

fn builtin_repr(_: ObjPtr, args: &[ObjPtr]) -> ObjPtr {
    if !expect_args("repr", args, 1, 1) {
        return std::ptr::null_mut();
    }
    args.first()
        .map_or(std::ptr::null_mut(), |arg| str_from(&repr(*arg)))
}

/// `namedtuple(typename, field_names)`; field names as a sequence of
/// strings or one space/comma separated string.
fn collections_namedtuple(_: ObjPtr, args: &[ObjPtr]) -> ObjPtr {
    if !expect_args("namedtuple", args, 2, 2) {
        return std::ptr::null_mut();
    }
    let (Some(name), Some(spec)) = (args.first(), args.get(1)) else {
        return std::ptr::null_mut();
    };
    let Some(name) = str_value(*name) else {
        return raise("TypeError", "namedtuple() typename must be str");
    };
    let fields: Vec<String> = match (str_value(*spec), tuple_items(*spec)) {
        (Some(text), _) => text
            .split([',', ' '])
            .filter(|f| !f.is_empty())
            .map(str::to_string)
            .collect(),
        (None, Some(items)) => items.into_iter().map(str_of).collect(),
        (None, None) => match payload(*spec) {
            Some(Payload::List(items)) => items.lock().iter().map(|i| str_of(*i)).collect(),
            _ => {
                return raise(
                    "TypeError",
                    &format!(
                        "namedtuple() field_names must be a sequence, not '{}'",
                        type_name(type_of(*spec))
                    ),
                );
            }
        },
    };
    if let Some(bad) = fields
        .iter()
        .find(|f| !f.chars().all(|c| c.is_alphanumeric() || c == '_') || f.starts_with('_'))
    {
        return raise(
            "ValueError",
            &format!("Field names must be valid identifiers not starting with '_': '{bad}'"),
        );
    }
    new_record_type(&name, "collections", fields)
}

/// Build the startup module table.
pub(crate) fn startup_modules() -> Vec<(String, ObjPtr)> {
    let b = builtins();
    let builtins_mod = module_new("builtins");
    if let Some(module) = module_data(builtins_mod) {
        let mut dict = module.dict.lock();
        let types = [
            ("object", b.object),
            ("type", b.type_),
            ("int", b.int),
            ("bool", b.bool_),
            ("float", b.float),
            ("str", b.str),
            ("tuple", b.tuple),
            ("list", b.list),
            ("dict", b.dict),
            ("None", b.none),
            ("True", b.true_),
            ("False", b.false_),
        ];
        for (name, value) in types {
            dict.insert(name.to_string(), value);
        }
        for (name, exc) in &b.exceptions {
            dict.insert((*name).to_string(), *exc);
        }
        dict.insert(
            "len".to_string(),
            builtin_new("len", builtin_len, std::ptr::null_mut()),
        );
        dict.insert(
            "repr".to_string(),
            builtin_new("repr", builtin_repr, std::ptr::null_mut()),
        );
    }

    let collections = module_new("collections");
    if let Some(module) = module_data(collections) {
        module.dict.lock().insert(
            "namedtuple".to_string(),
            builtin_new("namedtuple", collections_namedtuple, std::ptr::null_mut()),
        );
    }

    vec![
        ("builtins".to_string(), builtins_mod),
        ("collections".to_string(), collections),
    ]
}
