//! Canonical argument rendering.
//!
//! The same rendering serves as the record field key on write and the lookup
//! key on read, so it must be reproducible bit for bit:
//! - arguments are ordered by name
//! - null or unset values are omitted; if all are omitted the key is the bare name
//! - object keys are ordered; arrays keep their order
//! - floats without a fractional part render as integers

use std::fmt::Write;

use serde_json::{Number, Value};

/// Largest integer a double represents exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Renders `value` as JSON with object keys in sorted order.
pub fn stable_stringify(value: &Value) -> String {
	let mut out = String::new();
	write_stable(value, &mut out);
	out
}

fn write_stable(value: &Value, out: &mut String) {
	match value {
		Value::Null => out.push_str("null"),
		Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
		Value::Number(n) => write_number(n, out),
		Value::String(_) => out.push_str(&value.to_string()),
		Value::Array(items) => {
			out.push('[');
			for (idx, item) in items.iter().enumerate() {
				if idx > 0 {
					out.push(',');
				}
				write_stable(item, out);
			}
			out.push(']');
		}
		Value::Object(map) => {
			let mut keys: Vec<&String> = map.keys().collect();
			keys.sort();
			out.push('{');
			for (idx, key) in keys.into_iter().enumerate() {
				if idx > 0 {
					out.push(',');
				}
				out.push_str(&Value::String(key.clone()).to_string());
				out.push(':');
				write_stable(&map[key], out);
			}
			out.push('}');
		}
	}
}

fn write_number(n: &Number, out: &mut String) {
	if !n.is_i64()
		&& !n.is_u64()
		&& let Some(f) = n.as_f64()
		&& f.fract() == 0.0
		&& f.abs() <= MAX_SAFE_INTEGER
	{
		let _ = write!(out, "{}", f as i64);
		return;
	}
	out.push_str(&n.to_string());
}

/// Formats a field storage key from a name and resolved argument values.
pub fn format_storage_key<'a, I>(name: &str, args: I) -> String
where
	I: IntoIterator<Item = (&'a str, &'a Value)>,
{
	let mut rendered: Vec<(&str, String)> = args
		.into_iter()
		.filter(|(_, value)| !value.is_null())
		.map(|(arg, value)| (arg, stable_stringify(value)))
		.collect();
	if rendered.is_empty() {
		return name.to_owned();
	}
	rendered.sort_by(|a, b| a.0.cmp(b.0));

	let mut key = String::with_capacity(name.len() + 16);
	key.push_str(name);
	key.push('(');
	for (idx, (arg, value)) in rendered.iter().enumerate() {
		if idx > 0 {
			key.push(',');
		}
		key.push_str(arg);
		key.push(':');
		key.push_str(value);
	}
	key.push(')');
	key
}

#[cfg(test)]
mod tests {
	use proptest::prelude::*;
	use serde_json::json;

	use super::*;

	#[test]
	fn test_literal_argument() {
		let size = json!(128);
		assert_eq!(format_storage_key("photo", [("size", &size)]), "photo(size:128)");
	}

	#[test]
	fn test_no_arguments_is_bare_name() {
		assert_eq!(format_storage_key("name", std::iter::empty()), "name");
	}

	#[test]
	fn test_all_unset_collapses_to_name() {
		let null = Value::Null;
		assert_eq!(format_storage_key("friends", [("first", &null), ("after", &null)]), "friends");
	}

	#[test]
	fn test_unset_arguments_omitted_and_rest_sorted() {
		let first = json!(10);
		let after = Value::Null;
		let order = json!("name");
		assert_eq!(
			format_storage_key("friends", [("order", &order), ("first", &first), ("after", &after)]),
			r#"friends(first:10,order:"name")"#
		);
	}

	#[test]
	fn test_object_keys_sorted() {
		let filter = json!({"z": 1, "a": {"d": true, "b": null}});
		assert_eq!(
			format_storage_key("search", [("filter", &filter)]),
			r#"search(filter:{"a":{"b":null,"d":true},"z":1})"#
		);
	}

	#[test]
	fn test_integral_float_renders_as_integer() {
		let size = json!(128.0);
		assert_eq!(format_storage_key("photo", [("size", &size)]), "photo(size:128)");
		let scale = json!(1.5);
		assert_eq!(format_storage_key("photo", [("scale", &scale)]), "photo(scale:1.5)");
	}

	#[test]
	fn test_string_escaping() {
		assert_eq!(stable_stringify(&json!("a\"b")), r#""a\"b""#);
	}

	proptest! {
		/// Argument order never changes the key.
		#[test]
		fn prop_argument_order_irrelevant(a in any::<i32>(), b in "[a-z]{0,8}") {
			let a = json!(a);
			let b = json!(b);
			let forward = format_storage_key("f", [("a", &a), ("b", &b)]);
			let backward = format_storage_key("f", [("b", &b), ("a", &a)]);
			prop_assert_eq!(forward, backward);
		}

		/// Object key insertion order never changes the rendering.
		#[test]
		fn prop_object_rendering_stable(keys in proptest::collection::vec("[a-z]{1,4}", 0..6)) {
			let forward: serde_json::Map<String, Value> = keys.iter().map(|k| (k.clone(), json!(k.len()))).collect();
			let backward: serde_json::Map<String, Value> = keys.iter().rev().map(|k| (k.clone(), json!(k.len()))).collect();
			prop_assert_eq!(stable_stringify(&Value::Object(forward)), stable_stringify(&Value::Object(backward)));
		}
	}
}
