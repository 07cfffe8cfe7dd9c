//! Object protocols: call, attributes, length, sequence and mapping access,
//! string conversion and truthiness.
//!
//! Functions returning `ObjPtr` return a new reference, or null with an
//! exception set. Functions returning `c_int`/`isize` use -1 for errors.

use std::ffi::c_int;

use num_bigint::BigInt;
use num_traits::{ToPrimitive, Zero};

use super::builtin::methods_for;
use super::exc::{err_set_string, pop_frame, push_frame};
use super::object::{
    ExceptionData, ObjPtr, Payload, TypeData, TypeKind, alloc, decref, incref, is_immortal, payload,
    type_data, type_name, type_of,
};
use super::types::builtins;
use super::value::{
    bool_from, builtin_new, dict_new, dict_pairs, dict_set_item, float_from, list_items, list_new,
    long_from,
    str_from, tuple_items, tuple_new,
};

fn raise(exception: &str, message: &str) -> ObjPtr {
    err_set_string(builtins().exception(exception), message);
    std::ptr::null_mut()
}

fn raise_int(exception: &str, message: &str) -> c_int {
    err_set_string(builtins().exception(exception), message);
    -1
}

// ═══════════════════════════════════════════════════════════════════════════════
// Call protocol
// ═══════════════════════════════════════════════════════════════════════════════

/// Call `callable` with the positional `args` tuple and the optional
/// `kwargs` dict (null for none). Arguments are borrowed.
pub fn call(callable: ObjPtr, args: ObjPtr, kwargs: ObjPtr) -> ObjPtr {
    let Some(ty) = type_data(type_of(callable)) else {
        return raise("SystemError", "call on a null object");
    };
    let positional = tuple_items(args).unwrap_or_default();
    let keywords = dict_pairs(kwargs).unwrap_or_default();

    match payload(callable) {
        Some(Payload::Type(target)) => construct(callable, target, &positional, &keywords),
        Some(Payload::Builtin(builtin)) => {
            if !keywords.is_empty() {
                return raise(
                    "TypeError",
                    &format!("{}() takes no keyword arguments", builtin.name),
                );
            }
            push_frame(builtin.name.to_string());
            let result = (builtin.func)(builtin.receiver, &positional);
            pop_frame();
            result
        }
        _ => match ty.slots.call {
            Some(slot) => {
                push_frame(callable_name(callable));
                let result = slot(callable, args, kwargs);
                pop_frame();
                result
            }
            None => raise(
                "TypeError",
                &format!("'{}' object is not callable", ty.name),
            ),
        },
    }
}

/// Look up `name` on `obj` and call it with `args` (a borrowed tuple).
pub fn call_method(obj: ObjPtr, name: &str, args: ObjPtr) -> ObjPtr {
    let method = getattr(obj, name);
    if method.is_null() {
        return method;
    }
    let result = call(method, args, std::ptr::null_mut());
    decref(method);
    result
}

fn callable_name(callable: ObjPtr) -> String {
    let name = getattr(callable, "__name__");
    let text = match payload(name) {
        Some(Payload::Str(s)) => Some(s.clone()),
        _ => None,
    };
    if name.is_null() {
        super::exc::err_clear();
    }
    decref(name);
    text.unwrap_or_else(|| type_name(type_of(callable)))
}

fn construct(
    ty_ptr: ObjPtr,
    target: &TypeData,
    args: &[ObjPtr],
    kwargs: &[(ObjPtr, ObjPtr)],
) -> ObjPtr {
    if target.kind == TypeKind::Record {
        return construct_record(ty_ptr, target, args, kwargs);
    }
    if !kwargs.is_empty() {
        return raise(
            "TypeError",
            &format!("{}() takes no keyword arguments", target.name),
        );
    }
    if args.len() > 1 {
        return raise(
            "TypeError",
            &format!("{}() takes at most 1 argument ({} given)", target.name, args.len()),
        );
    }
    let arg = args.first().copied();

    match (target.kind, arg) {
        (TypeKind::Exception, arg) => {
            let message = arg.map(str_of).unwrap_or_default();
            alloc(
                ty_ptr,
                Payload::Exception(ExceptionData {
                    message,
                    traceback: Vec::new(),
                }),
            )
        }
        (TypeKind::Str, None) => str_from(""),
        (TypeKind::Str, Some(arg)) => object_str(arg),
        (TypeKind::Int, None) => long_from(0),
        (TypeKind::Int, Some(arg)) => int_of(arg),
        (TypeKind::Float, None) => float_from(0.0),
        (TypeKind::Float, Some(arg)) => float_of(arg),
        (TypeKind::Bool, None) => bool_from(false),
        (TypeKind::Bool, Some(arg)) => match is_true(arg) {
            -1 => std::ptr::null_mut(),
            truth => bool_from(truth == 1),
        },
        (TypeKind::List, None) => list_new(Vec::new()),
        (TypeKind::Tuple, None) => tuple_new(Vec::new()),
        (TypeKind::List, Some(arg)) => match collect_items(arg) {
            Some(items) => list_new(items),
            None => std::ptr::null_mut(),
        },
        (TypeKind::Tuple, Some(arg)) => match collect_items(arg) {
            Some(items) => tuple_new(items),
            None => std::ptr::null_mut(),
        },
        (TypeKind::Dict, None) => dict_new(),
        (TypeKind::Dict, Some(arg)) => dict_of(arg),
        (TypeKind::Type, Some(arg)) => {
            let ty = type_of(arg);
            incref(ty);
            ty
        }
        _ => raise(
            "TypeError",
            &format!("cannot create '{}' instances", target.name),
        ),
    }
}

fn construct_record(
    ty_ptr: ObjPtr,
    target: &TypeData,
    args: &[ObjPtr],
    kwargs: &[(ObjPtr, ObjPtr)],
) -> ObjPtr {
    let fields = &target.fields;
    if args.len() > fields.len() {
        return raise(
            "TypeError",
            &format!(
                "{}() takes {} positional arguments but {} were given",
                target.name,
                fields.len(),
                args.len()
            ),
        );
    }
    let mut slots: Vec<ObjPtr> = args.to_vec();
    slots.resize(fields.len(), std::ptr::null_mut());
    for (key, value) in kwargs {
        let key = str_of(*key);
        let position = fields.iter().position(|f| *f == key);
        match position.and_then(|i| slots.get_mut(i)) {
            Some(slot) if slot.is_null() => *slot = *value,
            Some(_) => {
                return raise(
                    "TypeError",
                    &format!("{}() got multiple values for argument '{}'", target.name, key),
                );
            }
            None => {
                return raise(
                    "TypeError",
                    &format!("{}() got an unexpected keyword argument '{}'", target.name, key),
                );
            }
        }
    }
    if let Some(missing) = fields
        .iter()
        .zip(&slots)
        .find(|(_, slot)| slot.is_null())
        .map(|(field, _)| field)
    {
        return raise(
            "TypeError",
            &format!("{}() missing required argument: '{}'", target.name, missing),
        );
    }
    slots.iter().for_each(|item| incref(*item));
    alloc(ty_ptr, Payload::Record(slots))
}

fn int_of(arg: ObjPtr) -> ObjPtr {
    match payload(arg) {
        Some(Payload::Int(v)) => long_from(v.clone()),
        Some(Payload::Bool(b)) => long_from(i64::from(*b)),
        Some(Payload::Float(v)) if v.is_finite() => {
            long_from(BigInt::from(v.trunc().to_i128().unwrap_or_default()))
        }
        Some(Payload::Str(s)) => match s.trim().parse::<BigInt>() {
            Ok(v) => long_from(v),
            Err(_) => raise(
                "ValueError",
                &format!("invalid literal for int() with base 10: '{s}'"),
            ),
        },
        _ => raise(
            "TypeError",
            &format!(
                "int() argument must be a string or a number, not '{}'",
                type_name(type_of(arg))
            ),
        ),
    }
}

fn float_of(arg: ObjPtr) -> ObjPtr {
    match payload(arg) {
        Some(Payload::Float(v)) => float_from(*v),
        Some(Payload::Int(v)) => float_from(v.to_f64().unwrap_or(f64::INFINITY)),
        Some(Payload::Bool(b)) => float_from(if *b { 1.0 } else { 0.0 }),
        Some(Payload::Str(s)) => match s.trim().parse::<f64>() {
            Ok(v) => float_from(v),
            Err(_) => raise(
                "ValueError",
                &format!("could not convert string to float: '{s}'"),
            ),
        },
        _ => raise(
            "TypeError",
            &format!(
                "float() argument must be a string or a number, not '{}'",
                type_name(type_of(arg))
            ),
        ),
    }
}

/// New references to every item of a sequence, or `None` with an exception set.
fn collect_items(seq: ObjPtr) -> Option<Vec<ObjPtr>> {
    let len = length(seq);
    if len < 0 {
        return None;
    }
    let mut items = Vec::new();
    for i in 0..len {
        let item = sequence_get_item(seq, i);
        if item.is_null() {
            items.into_iter().for_each(decref);
            return None;
        }
        items.push(item);
    }
    Some(items)
}

fn dict_of(arg: ObjPtr) -> ObjPtr {
    let items = mapping_items(arg);
    if items.is_null() {
        return items;
    }
    let dict = dict_new();
    for pair in list_items(items).unwrap_or_default() {
        let kv = tuple_items(pair).unwrap_or_default();
        if let [key, value] = kv.as_slice() {
            if dict_set_item(dict, *key, *value) < 0 {
                decref(items);
                decref(dict);
                return std::ptr::null_mut();
            }
        }
    }
    decref(items);
    dict
}

// ═══════════════════════════════════════════════════════════════════════════════
// Attribute protocol
// ═══════════════════════════════════════════════════════════════════════════════

pub fn getattr(obj: ObjPtr, name: &str) -> ObjPtr {
    let ty = type_of(obj);
    let Some(data) = type_data(ty) else {
        return raise("SystemError", "getattr on a null object");
    };
    if let Some(slot) = data.slots.get_attr {
        return slot(obj, name);
    }
    if name == "__class__" {
        incref(ty);
        return ty;
    }

    let found = match payload(obj) {
        Some(Payload::Record(items)) => match data.fields.iter().position(|f| f == name) {
            Some(i) => items.get(i).copied(),
            None if name == "_fields" => return fields_tuple(&data.fields),
            None => None,
        },
        Some(Payload::Module(module)) => match name {
            "__name__" => return str_from(&module.name),
            _ => module.dict.lock().get(name).copied(),
        },
        Some(Payload::Type(target)) => match name {
            "__name__" => return str_from(&target.name),
            "_fields" if target.kind == TypeKind::Record => return fields_tuple(&target.fields),
            _ => target.dict.lock().get(name).copied(),
        },
        Some(Payload::Exception(exc)) if name == "args" => {
            return tuple_new(vec![str_from(&exc.message)]);
        }
        Some(Payload::File(file)) => match name {
            "name" => return str_from(&file.name),
            "mode" => return str_from(&file.mode),
            "encoding" => {
                return file
                    .encoding
                    .as_deref()
                    .map_or_else(super::value::none, str_from);
            }
            "closed" => return bool_from(file.file.lock().is_none()),
            _ => None,
        },
        _ => None,
    };
    if let Some(value) = found {
        incref(value);
        return value;
    }
    if let Some(&(method_name, func)) = methods_for(data.kind)
        .iter()
        .find(|(method, _)| *method == name)
    {
        return builtin_new(method_name, func, obj);
    }

    let message = match payload(obj) {
        Some(Payload::Module(module)) => {
            format!("module '{}' has no attribute '{}'", module.name, name)
        }
        Some(Payload::Type(target)) => {
            format!("type object '{}' has no attribute '{}'", target.name, name)
        }
        _ => format!("'{}' object has no attribute '{}'", data.name, name),
    };
    raise("AttributeError", &message)
}

fn fields_tuple(fields: &[String]) -> ObjPtr {
    tuple_new(fields.iter().map(|f| str_from(f)).collect())
}

/// Set (or, with a null `value`, delete) an attribute. `value` is borrowed.
pub fn setattr(obj: ObjPtr, name: &str, value: ObjPtr) -> c_int {
    let ty = type_of(obj);
    let Some(data) = type_data(ty) else {
        return raise_int("SystemError", "setattr on a null object");
    };
    if let Some(slot) = data.slots.set_attr {
        return slot(obj, name, value);
    }
    let namespace = match payload(obj) {
        Some(Payload::Module(module)) => Some(&module.dict),
        Some(Payload::Type(target)) if !is_immortal(obj) => Some(&target.dict),
        Some(Payload::Type(target)) => {
            return raise_int(
                "TypeError",
                &format!(
                    "cannot set '{}' attribute of immutable type '{}'",
                    name, target.name
                ),
            );
        }
        _ => None,
    };
    let Some(namespace) = namespace else {
        return raise_int(
            "AttributeError",
            &format!("'{}' object has no attribute '{}'", data.name, name),
        );
    };

    let old = if value.is_null() {
        namespace.lock().shift_remove(name)
    } else {
        incref(value);
        namespace.lock().insert(name.to_string(), value)
    };
    match old {
        Some(old) => {
            decref(old);
            0
        }
        None if value.is_null() => raise_int("AttributeError", name),
        None => 0,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Length, sequence and mapping protocols
// ═══════════════════════════════════════════════════════════════════════════════

pub fn length(obj: ObjPtr) -> isize {
    let len = match payload(obj) {
        Some(Payload::Str(s)) => Some(s.chars().count()),
        Some(Payload::Tuple(items)) | Some(Payload::Record(items)) => Some(items.len()),
        Some(Payload::List(items)) => Some(items.lock().len()),
        Some(Payload::Dict(table)) => Some(table.lock().len()),
        _ => None,
    };
    match len {
        Some(len) => isize::try_from(len).unwrap_or(isize::MAX),
        None => {
            err_set_string(
                builtins().exception("TypeError"),
                &format!("object of type '{}' has no len()", type_name(type_of(obj))),
            );
            -1
        }
    }
}

/// Item `index` of a sequence; negative indices count from the end.
pub fn sequence_get_item(obj: ObjPtr, index: isize) -> ObjPtr {
    let resolve = |len: usize| -> Option<usize> {
        let len = isize::try_from(len).ok()?;
        let i = if index < 0 { index + len } else { index };
        if (0..len).contains(&i) { usize::try_from(i).ok() } else { None }
    };
    let item = match payload(obj) {
        Some(Payload::Tuple(items)) | Some(Payload::Record(items)) => {
            resolve(items.len()).and_then(|i| items.get(i).copied())
        }
        Some(Payload::List(items)) => {
            let items = items.lock();
            resolve(items.len()).and_then(|i| items.get(i).copied())
        }
        Some(Payload::Str(s)) => {
            let chars: Vec<char> = s.chars().collect();
            return match resolve(chars.len()).and_then(|i| chars.get(i)) {
                Some(c) => str_from(&c.to_string()),
                None => raise("IndexError", "string index out of range"),
            };
        }
        _ => {
            return raise(
                "TypeError",
                &format!("'{}' object is not a sequence", type_name(type_of(obj))),
            );
        }
    };
    match item {
        Some(item) => {
            incref(item);
            item
        }
        None => raise(
            "IndexError",
            &format!("{} index out of range", type_name(type_of(obj))),
        ),
    }
}

/// List of `(key, value)` tuples. Dicts are enumerated directly; other
/// objects through their `items()` method.
pub fn mapping_items(obj: ObjPtr) -> ObjPtr {
    if let Some(pairs) = dict_pairs(obj) {
        let tuples = pairs
            .into_iter()
            .map(|(key, value)| {
                incref(key);
                incref(value);
                tuple_new(vec![key, value])
            })
            .collect();
        return list_new(tuples);
    }
    let empty = tuple_new(Vec::new());
    let items = call_method(obj, "items", empty);
    decref(empty);
    if items.is_null() {
        return items;
    }
    let collected = collect_items(items);
    decref(items);
    match collected {
        Some(collected) => list_new(collected),
        None => std::ptr::null_mut(),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// String conversion and truthiness
// ═══════════════════════════════════════════════════════════════════════════════

pub fn object_str(obj: ObjPtr) -> ObjPtr {
    if type_data(type_of(obj)).is_none() {
        return raise("SystemError", "str on a null object");
    }
    str_from(&str_of(obj))
}

/// Truthiness: 1, 0, or -1 on error.
pub fn is_true(obj: ObjPtr) -> c_int {
    let truth = match payload(obj) {
        None => return raise_int("SystemError", "truth value of a null object"),
        Some(Payload::None) => false,
        Some(Payload::Bool(b)) => *b,
        Some(Payload::Int(v)) => !v.is_zero(),
        Some(Payload::Float(v)) => *v != 0.0,
        Some(Payload::Str(s)) => !s.is_empty(),
        Some(Payload::Tuple(items)) | Some(Payload::Record(items)) => !items.is_empty(),
        Some(Payload::List(items)) => !items.lock().is_empty(),
        Some(Payload::Dict(table)) => !table.lock().is_empty(),
        Some(_) => true,
    };
    c_int::from(truth)
}

fn float_repr(v: f64) -> String {
    if v.is_nan() {
        "nan".to_string()
    } else if v.is_infinite() {
        if v > 0.0 { "inf" } else { "-inf" }.to_string()
    } else if v == v.trunc() && v.abs() < 1e16 {
        format!("{v:.1}")
    } else {
        format!("{v}")
    }
}

fn join_repr(items: &[ObjPtr]) -> String {
    items.iter().map(|item| repr(*item)).collect::<Vec<_>>().join(", ")
}

/// Text of `str(obj)`.
pub fn str_of(obj: ObjPtr) -> String {
    match payload(obj) {
        Some(Payload::Str(s)) => s.clone(),
        Some(Payload::Exception(exc)) => exc.message.clone(),
        _ => repr(obj),
    }
}

/// Text of `repr(obj)`.
pub fn repr(obj: ObjPtr) -> String {
    let ty = type_of(obj);
    match payload(obj) {
        None => "<NULL>".to_string(),
        Some(Payload::None) => "None".to_string(),
        Some(Payload::Bool(true)) => "True".to_string(),
        Some(Payload::Bool(false)) => "False".to_string(),
        Some(Payload::Int(v)) => v.to_string(),
        Some(Payload::Float(v)) => float_repr(*v),
        Some(Payload::Str(s)) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
        Some(Payload::Tuple(items)) if items.len() == 1 => format!("({},)", join_repr(items)),
        Some(Payload::Tuple(items)) => format!("({})", join_repr(items)),
        Some(Payload::List(items)) => format!("[{}]", join_repr(&items.lock())),
        Some(Payload::Dict(table)) => {
            let entries = table
                .lock()
                .values()
                .map(|(k, v)| format!("{}: {}", repr(*k), repr(*v)))
                .collect::<Vec<_>>();
            format!("{{{}}}", entries.join(", "))
        }
        Some(Payload::Record(items)) => {
            let fields = type_data(ty).map(|t| t.fields.clone()).unwrap_or_default();
            let parts = fields
                .iter()
                .zip(items)
                .map(|(f, v)| format!("{}={}", f, repr(*v)))
                .collect::<Vec<_>>();
            format!("{}({})", type_name(ty), parts.join(", "))
        }
        Some(Payload::Type(target)) => format!("<class '{}'>", target.name),
        Some(Payload::Module(module)) => format!("<module '{}'>", module.name),
        Some(Payload::Builtin(builtin)) => format!("<built-in function {}>", builtin.name),
        Some(Payload::Exception(exc)) => format!("{}('{}')", type_name(ty), exc.message),
        Some(Payload::File(file)) => format!("<file name='{}' mode='{}'>", file.name, file.mode),
        Some(Payload::Host(_)) => format!("<{} object at {:p}>", type_name(ty), obj),
    }
}
