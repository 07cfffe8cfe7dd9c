//! Sequence and mapping conversions, including the error paths

use std::collections::{BTreeMap, HashMap};

use guestlink::{Dynamic, Object};
use indexmap::IndexMap;
use pretty_assertions::assert_eq;

use super::{dynamic, guest, with_guest};

#[test]
fn test_vec_round_trip_keeps_order() {
    with_guest(|ctx| {
        let values = vec![5i64, -1, 3, 0];
        let o = guest(ctx, &values);
        assert_eq!(o.type_object().name(), "list");
        assert_eq!(ctx.len(o).ok(), Some(4));
        assert_eq!(ctx.extract::<Vec<i64>>(o).ok(), Some(values));
        ctx.decref(o);
    });
}

#[test]
fn test_nested_sequences() {
    with_guest(|ctx| {
        let values = vec![vec!["a".to_string()], vec![], vec!["b".into(), "c".into()]];
        let o = guest(ctx, &values);
        assert_eq!(ctx.extract::<Vec<Vec<String>>>(o).ok(), Some(values));
        ctx.decref(o);
    });
}

#[test]
fn test_array_becomes_tuple() {
    with_guest(|ctx| {
        let o = guest(ctx, &[1u8, 2, 3]);
        assert_eq!(o.type_object().name(), "tuple");
        assert_eq!(ctx.extract::<[u8; 3]>(o).ok(), Some([1, 2, 3]));
        assert_eq!(ctx.extract::<Vec<u8>>(o).ok(), Some(vec![1, 2, 3]));

        let message = ctx.extract::<[u8; 2]>(o).err().map(|e| e.exception_message());
        assert_eq!(
            message.as_deref(),
            Some("expected a sequence of 2 items, got 3")
        );
        ctx.decref(o);
    });
}

#[test]
fn test_item_error_reports_index_and_leaks_nothing() {
    with_guest(|ctx| {
        let items: Vec<Object> = vec![
            guest(ctx, &1i64),
            guest(ctx, &2i64),
            guest(ctx, &"three"),
            guest(ctx, &4i64),
        ];
        let list = ctx.list(&items);
        let before: Vec<isize> = items.iter().map(|o| o.refcnt()).collect();

        let message = ctx.extract::<Vec<i64>>(list).err().map(|e| e.to_string());
        assert_eq!(
            message.as_deref(),
            Some("item #2: cannot convert a guest str to host i64")
        );
        let after: Vec<isize> = items.iter().map(|o| o.refcnt()).collect();
        assert_eq!(after, before);

        ctx.decref(list);
        ctx.decref_all(&items);
    });
}

#[test]
fn test_failed_fill_releases_objects_already_stored() {
    with_guest(|ctx| {
        let shared = guest(ctx, &"shared");
        let inner = ctx.list(&[shared]);
        let five = guest(ctx, &5i64);
        let outer = ctx.list(&[inner, five]);
        let before = shared.refcnt();

        let message = ctx
            .extract::<Vec<Vec<Object>>>(outer)
            .err()
            .map(|e| e.to_string())
            .unwrap_or_default();
        assert!(message.starts_with("item #1: "), "{message}");
        assert_eq!(shared.refcnt(), before);

        ctx.decref_all(&[outer, five, inner, shared]);
    });
}

#[test]
fn test_failed_map_fill_releases_objects_already_stored() {
    with_guest(|ctx| {
        let shared = guest(ctx, &"shared");
        let value = Dynamic::Dict(vec![
            (Dynamic::from("a"), Dynamic::List(vec![Dynamic::Object(shared)])),
            (Dynamic::from("b"), Dynamic::Int(5)),
        ]);
        let dict = guest(ctx, &value);
        let before = shared.refcnt();

        let message = ctx
            .extract::<IndexMap<String, Vec<Object>>>(dict)
            .err()
            .map(|e| e.to_string())
            .unwrap_or_default();
        assert!(message.starts_with("value 'b': "), "{message}");
        assert_eq!(shared.refcnt(), before);

        ctx.decref_all(&[dict, shared]);
    });
}

#[test]
fn test_outbound_item_error_releases_converted_items() {
    with_guest(|ctx| {
        let shared = guest(ctx, &"kept");
        let before = shared.refcnt();
        let values = vec![Dynamic::Object(shared), Dynamic::Object(Object::NULL)];

        let message = ctx.to_guest(&values).err().map(|e| e.to_string());
        assert_eq!(
            message.as_deref(),
            Some("item #1: cannot convert a host guestlink::object::Object to guest")
        );
        assert_eq!(shared.refcnt(), before);
        ctx.decref(shared);
    });
}

#[test]
fn test_maps() {
    with_guest(|ctx| {
        let hash: HashMap<String, i64> = [("a".to_string(), 1), ("b".to_string(), 2)].into();
        let o = guest(ctx, &hash);
        assert_eq!(o.type_object().name(), "dict");
        assert_eq!(ctx.extract::<HashMap<String, i64>>(o).ok(), Some(hash));
        ctx.decref(o);

        let tree: BTreeMap<i64, Vec<bool>> = [(2, vec![true]), (1, vec![])].into();
        let o = guest(ctx, &tree);
        assert_eq!(ctx.extract::<BTreeMap<i64, Vec<bool>>>(o).ok(), Some(tree));
        ctx.decref(o);
    });
}

#[test]
fn test_index_map_keeps_insertion_order() {
    with_guest(|ctx| {
        let mut ordered: IndexMap<String, i64> = IndexMap::new();
        ordered.insert("z".into(), 26);
        ordered.insert("a".into(), 1);
        ordered.insert("m".into(), 13);
        let o = guest(ctx, &ordered);
        assert_eq!(ctx.repr(o), "{'z': 26, 'a': 1, 'm': 13}");

        let back: IndexMap<String, i64> = ctx.extract(o).unwrap_or_default();
        assert_eq!(back.keys().collect::<Vec<_>>(), vec!["z", "a", "m"]);
        ctx.decref(o);
    });
}

#[test]
fn test_map_value_error_names_the_key() {
    with_guest(|ctx| {
        let value = Dynamic::Dict(vec![
            (Dynamic::from("ok"), Dynamic::Int(1)),
            (Dynamic::from("bad"), Dynamic::from("x")),
        ]);
        let o = guest(ctx, &value);
        let message = ctx
            .extract::<HashMap<String, i64>>(o)
            .err()
            .map(|e| e.to_string());
        assert_eq!(
            message.as_deref(),
            Some("value 'bad': cannot convert a guest str to host i64")
        );
        ctx.decref(o);
    });
}

#[test]
fn test_dict_into_dynamic() {
    with_guest(|ctx| {
        let value = Dynamic::Dict(vec![
            (Dynamic::from("n"), Dynamic::Int(1)),
            (Dynamic::Int(2), Dynamic::List(vec![Dynamic::Bool(false)])),
        ]);
        let o = guest(ctx, &value);
        let back = dynamic(ctx, o);
        assert_eq!(back, value);
        assert_eq!(back.get("n"), Some(&Dynamic::Int(1)));
        ctx.decref(o);
    });
}
