//! Canonical document model
//!
//! Requests, responses and stored values are all [`bson::Document`]s: ordered
//! maps with unique keys and typed values. This module adds the accessors
//! command handlers need (typed option lookup that fails with taxonomy
//! errors), the total ordering used for sorting and comparisons, and the
//! Extended JSON bridge used by the Data API.

use std::cmp::Ordering;

use bson::{Bson, Document};

use crate::error::CommandError;

/// Type name as reported in type mismatch errors and `$type`
#[must_use]
pub fn type_name(value: &Bson) -> &'static str {
    match value {
        Bson::Double(_) => "double",
        Bson::String(_) => "string",
        Bson::Document(_) => "object",
        Bson::Array(_) => "array",
        Bson::Binary(_) => "binData",
        Bson::Undefined => "undefined",
        Bson::ObjectId(_) => "objectId",
        Bson::Boolean(_) => "bool",
        Bson::DateTime(_) => "date",
        Bson::Null => "null",
        Bson::RegularExpression(_) => "regex",
        Bson::DbPointer(_) => "dbPointer",
        Bson::JavaScriptCode(_) => "javascript",
        Bson::Symbol(_) => "symbol",
        Bson::JavaScriptCodeWithScope(_) => "javascriptWithScope",
        Bson::Int32(_) => "int",
        Bson::Timestamp(_) => "timestamp",
        Bson::Int64(_) => "long",
        Bson::Decimal128(_) => "decimal",
        Bson::MinKey => "minKey",
        Bson::MaxKey => "maxKey",
    }
}

/// Integral value of a numeric field, if it has one
#[must_use]
pub fn as_whole_number(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(v) => Some(i64::from(*v)),
        Bson::Int64(v) => Some(*v),
        #[allow(clippy::cast_possible_truncation)]
        Bson::Double(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i64),
        _ => None,
    }
}

/// Numeric value of a field as a float
#[must_use]
pub fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(v) => Some(f64::from(*v)),
        #[allow(clippy::cast_precision_loss)]
        Bson::Int64(v) => Some(*v as f64),
        Bson::Double(v) => Some(*v),
        _ => None,
    }
}

/// Truthiness of a value in option and projection positions
#[must_use]
pub fn is_truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => *b,
        Bson::Null | Bson::Undefined => false,
        other => as_f64(other).map_or(true, |v| v != 0.0),
    }
}

/// Smallest integer type that holds `n`, the way counts are reported
#[must_use]
pub fn count_value(n: u64) -> Bson {
    match i32::try_from(n) {
        Ok(small) => Bson::Int32(small),
        Err(_) => Bson::Int64(i64::try_from(n).unwrap_or(i64::MAX)),
    }
}

/// Resolve a dotted path (`a.b.0.c`) through embedded documents and arrays
#[must_use]
pub fn lookup_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Bson::Document(inner) => inner.get(part)?,
            Bson::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Typed access to command options.
///
/// `command` is the command name used to build `BSON field '<command>.<key>'`
/// in error messages.
pub trait OptionsExt {
    fn opt_document(&self, command: &str, key: &str) -> Result<Option<&Document>, CommandError>;
    fn opt_array(&self, command: &str, key: &str) -> Result<Option<&Vec<Bson>>, CommandError>;
    fn opt_str(&self, command: &str, key: &str) -> Result<Option<&str>, CommandError>;
    fn opt_bool(&self, command: &str, key: &str) -> Result<Option<bool>, CommandError>;
    fn opt_whole_number(&self, command: &str, key: &str) -> Result<Option<i64>, CommandError>;
    fn opt_non_negative(&self, command: &str, key: &str) -> Result<Option<i64>, CommandError>;
}

impl OptionsExt for Document {
    fn opt_document(&self, command: &str, key: &str) -> Result<Option<&Document>, CommandError> {
        match self.get(key) {
            None | Some(Bson::Null) => Ok(None),
            Some(Bson::Document(doc)) => Ok(Some(doc)),
            Some(other) => Err(mismatch(command, key, other, "object")),
        }
    }

    fn opt_array(&self, command: &str, key: &str) -> Result<Option<&Vec<Bson>>, CommandError> {
        match self.get(key) {
            None | Some(Bson::Null) => Ok(None),
            Some(Bson::Array(items)) => Ok(Some(items)),
            Some(other) => Err(mismatch(command, key, other, "array")),
        }
    }

    fn opt_str(&self, command: &str, key: &str) -> Result<Option<&str>, CommandError> {
        match self.get(key) {
            None | Some(Bson::Null) => Ok(None),
            Some(Bson::String(s)) => Ok(Some(s)),
            Some(other) => Err(mismatch(command, key, other, "string")),
        }
    }

    fn opt_bool(&self, command: &str, key: &str) -> Result<Option<bool>, CommandError> {
        match self.get(key) {
            None | Some(Bson::Null) => Ok(None),
            Some(Bson::Boolean(b)) => Ok(Some(*b)),
            Some(value @ (Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_))) => {
                Ok(Some(is_truthy(value)))
            }
            Some(other) => Err(mismatch(command, key, other, "bool")),
        }
    }

    fn opt_whole_number(&self, command: &str, key: &str) -> Result<Option<i64>, CommandError> {
        match self.get(key) {
            None | Some(Bson::Null) => Ok(None),
            Some(value) => as_whole_number(value)
                .map(Some)
                .ok_or_else(|| mismatch(command, key, value, "long")),
        }
    }

    fn opt_non_negative(&self, command: &str, key: &str) -> Result<Option<i64>, CommandError> {
        let Some(n) = self.opt_whole_number(command, key)? else {
            return Ok(None);
        };
        if n < 0 {
            return Err(CommandError::from_code(
                crate::error::ErrorCode::Location(51024),
                format!("BSON field '{}' value must be >= 0, actual value '{}'", key, n),
            )
            .with_field(key));
        }
        Ok(Some(n))
    }
}

fn mismatch(command: &str, key: &str, actual: &Bson, expected: &str) -> CommandError {
    CommandError::type_mismatch(&format!("{}.{}", command, key), type_name(actual), expected)
}

/// Canonical type bracket used when comparing values of different types
fn type_order(value: &Bson) -> u8 {
    match value {
        Bson::MinKey => 0,
        Bson::Null | Bson::Undefined => 1,
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_) => 2,
        Bson::String(_) | Bson::Symbol(_) => 3,
        Bson::Document(_) => 4,
        Bson::Array(_) => 5,
        Bson::Binary(_) => 6,
        Bson::ObjectId(_) => 7,
        Bson::Boolean(_) => 8,
        Bson::DateTime(_) => 9,
        Bson::Timestamp(_) => 10,
        Bson::RegularExpression(_) => 11,
        Bson::DbPointer(_) => 12,
        Bson::JavaScriptCode(_) => 13,
        Bson::JavaScriptCodeWithScope(_) => 14,
        Bson::MaxKey => 15,
    }
}

/// Whether two values fall into the same comparison bracket
#[must_use]
pub fn same_bracket(a: &Bson, b: &Bson) -> bool {
    type_order(a) == type_order(b)
}

/// Total order over values: type bracket first, then value
#[must_use]
pub fn compare_values(a: &Bson, b: &Bson) -> Ordering {
    let by_type = type_order(a).cmp(&type_order(b));
    if by_type != Ordering::Equal {
        return by_type;
    }

    match (a, b) {
        (Bson::Int32(x), Bson::Int32(y)) => x.cmp(y),
        (Bson::Int64(x), Bson::Int64(y)) => x.cmp(y),
        (Bson::Int32(x), Bson::Int64(y)) => i64::from(*x).cmp(y),
        (Bson::Int64(x), Bson::Int32(y)) => x.cmp(&i64::from(*y)),
        (x, y) if as_f64(x).is_some() && as_f64(y).is_some() => {
            let (x, y) = (as_f64(x).unwrap_or_default(), as_f64(y).unwrap_or_default());
            x.partial_cmp(&y).unwrap_or_else(|| x.is_nan().cmp(&y.is_nan()).reverse())
        }
        (Bson::String(x), Bson::String(y)) => x.cmp(y),
        (Bson::Symbol(x), Bson::Symbol(y)) => x.cmp(y),
        (Bson::Document(x), Bson::Document(y)) => compare_documents(x, y),
        (Bson::Array(x), Bson::Array(y)) => {
            for (l, r) in x.iter().zip(y.iter()) {
                let ord = compare_values(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Bson::Binary(x), Bson::Binary(y)) => x
            .bytes
            .len()
            .cmp(&y.bytes.len())
            .then_with(|| u8::from(x.subtype).cmp(&u8::from(y.subtype)))
            .then_with(|| x.bytes.cmp(&y.bytes)),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => x.bytes().cmp(&y.bytes()),
        (Bson::Boolean(x), Bson::Boolean(y)) => x.cmp(y),
        (Bson::DateTime(x), Bson::DateTime(y)) => x.cmp(y),
        (Bson::Timestamp(x), Bson::Timestamp(y)) => {
            (x.time, x.increment).cmp(&(y.time, y.increment))
        }
        (Bson::RegularExpression(x), Bson::RegularExpression(y)) => {
            (&x.pattern, &x.options).cmp(&(&y.pattern, &y.options))
        }
        _ => Ordering::Equal,
    }
}

/// Field-by-field comparison of embedded documents: type bracket, then
/// field name, then value
#[must_use]
pub fn compare_documents(a: &Document, b: &Document) -> Ordering {
    for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
        let ord = type_order(va)
            .cmp(&type_order(vb))
            .then_with(|| ka.cmp(kb))
            .then_with(|| compare_values(va, vb));
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

/// Value equality as used by query matching (numeric types compare by value)
#[must_use]
pub fn values_equal(a: &Bson, b: &Bson) -> bool {
    same_bracket(a, b) && compare_values(a, b) == Ordering::Equal
}

/// Decode a JSON object (relaxed or canonical Extended JSON) into a document
pub fn document_from_json(
    field: &str,
    value: serde_json::Value,
) -> Result<Document, CommandError> {
    match Bson::try_from(value) {
        Ok(Bson::Document(doc)) => Ok(doc),
        Ok(other) => Err(CommandError::malformed(format!(
            "'{}' must be an object, got {}",
            field,
            type_name(&other)
        ))
        .with_field(field)),
        Err(e) => Err(CommandError::malformed(format!("invalid Extended JSON in '{}': {}", field, e))
            .with_field(field)),
    }
}

/// Decode a JSON value (relaxed or canonical Extended JSON) into a BSON value
pub fn value_from_json(field: &str, value: serde_json::Value) -> Result<Bson, CommandError> {
    Bson::try_from(value).map_err(|e| {
        CommandError::malformed(format!("invalid Extended JSON in '{}': {}", field, e))
            .with_field(field)
    })
}

/// Encode a document as relaxed Extended JSON
#[must_use]
pub fn document_to_json(doc: &Document) -> serde_json::Value {
    Bson::Document(doc.clone()).into_relaxed_extjson()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_lookup_path() {
        let doc = doc! { "a": { "b": [ { "c": 1 }, { "c": 2 } ] }, "x": 5 };
        assert_eq!(lookup_path(&doc, "x"), Some(&Bson::Int32(5)));
        assert_eq!(lookup_path(&doc, "a.b.1.c"), Some(&Bson::Int32(2)));
        assert_eq!(lookup_path(&doc, "a.z"), None);
        assert_eq!(lookup_path(&doc, "x.y"), None);
    }

    #[test]
    fn test_numeric_comparison_across_types() {
        assert_eq!(compare_values(&Bson::Int32(42), &Bson::Int64(42)), Ordering::Equal);
        assert_eq!(compare_values(&Bson::Int32(1), &Bson::Double(1.5)), Ordering::Less);
        assert!(values_equal(&Bson::Double(42.0), &Bson::Int32(42)));
    }

    #[test]
    fn test_type_bracket_order() {
        assert_eq!(compare_values(&Bson::Null, &Bson::Int32(0)), Ordering::Less);
        assert_eq!(
            compare_values(&Bson::String("a".into()), &Bson::Int32(100)),
            Ordering::Greater
        );
        assert!(!values_equal(&Bson::String("1".into()), &Bson::Int32(1)));
    }

    #[test]
    fn test_document_comparison_order() {
        // Field name decides before value
        assert_eq!(compare_documents(&doc! { "a": 2 }, &doc! { "b": 1 }), Ordering::Less);
        // Type bracket decides before field name
        assert_eq!(compare_documents(&doc! { "b": 1 }, &doc! { "a": "x" }), Ordering::Less);
        assert_eq!(compare_documents(&doc! { "a": 1 }, &doc! { "a": 2 }), Ordering::Less);
        assert_eq!(
            compare_documents(&doc! { "a": 1 }, &doc! { "a": 1, "b": 0 }),
            Ordering::Less
        );
        assert_eq!(
            compare_values(&Bson::Document(doc! { "a": 2 }), &Bson::Document(doc! { "b": 1 })),
            Ordering::Less
        );
    }

    #[test]
    fn test_opt_accessors() {
        let cmd = doc! { "find": "c", "filter": 1, "limit": -1, "batchSize": 2.0, "sort": { "a": 1 } };
        let err = cmd.opt_document("find", "filter").unwrap_err();
        assert_eq!(err.code().code(), 14);
        assert!(cmd.opt_document("find", "sort").unwrap().is_some());
        assert!(cmd.opt_document("find", "projection").unwrap().is_none());
        assert_eq!(cmd.opt_non_negative("find", "batchSize").unwrap(), Some(2));
        assert_eq!(cmd.opt_non_negative("find", "limit").unwrap_err().code().code(), 51024);
    }

    #[test]
    fn test_extended_json_bridge() {
        let json = serde_json::json!({ "_id": { "$oid": "507f1f77bcf86cd799439011" }, "v": 42 });
        let doc = document_from_json("document", json).unwrap();
        assert!(matches!(doc.get("_id"), Some(Bson::ObjectId(_))));
        assert_eq!(doc.get("v"), Some(&Bson::Int32(42)));

        let back = document_to_json(&doc);
        assert_eq!(back["v"], serde_json::json!(42));
        assert_eq!(back["_id"]["$oid"], serde_json::json!("507f1f77bcf86cd799439011"));

        assert!(document_from_json("filter", serde_json::json!([1])).is_err());
    }

    #[test]
    fn test_count_value_width() {
        assert_eq!(count_value(3), Bson::Int32(3));
        assert_eq!(count_value(u64::from(u32::MAX)), Bson::Int64(i64::from(u32::MAX)));
    }
}
