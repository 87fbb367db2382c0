//! Recursive value validation against the lexicon type graph.
//!
//! Values are checked in place.  In truncate mode an over-long string or
//! bytes value is cut down to its maximum and accepted; every other
//! violation is a [`ValidationError`] naming the offending path.

use std::sync::Arc;

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine as _;
use serde_json::{Map, Value};
use unicode_segmentation::UnicodeSegmentation;
use xr_domain::config::ValidationConfig;
use xr_domain::ValidationError;

use crate::catalog::{Catalog, Resolved};
use crate::formats;
use crate::loader::qualify_ref;
use crate::model::{
    ArrayNode, BlobNode, BytesNode, Definition, IntegerNode, MethodDef, ObjectNode, SchemaNode,
    StringNode, UnionNode,
};

/// Which side of a method a body belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
    /// One subscription frame payload.
    Message,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
            Self::Message => "message",
        }
    }
}

/// How a union value was accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnionMatch {
    /// The first declared variant that accepted the value.
    Variant(String),
    /// An open union let through a `$type` outside its variants.
    Open(String),
}

/// JSON type name used in error messages.
pub fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn child(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{path}.{name}")
    }
}

fn unexpected(path: &str, value: &Value) -> ValidationError {
    ValidationError::new(path, format!("has unexpected type {}", json_type(value)))
}

/// Largest byte index `<= max` that falls on a grapheme boundary.
fn grapheme_floor(s: &str, max: usize) -> usize {
    s.grapheme_indices(true)
        .map(|(i, g)| i + g.len())
        .take_while(|end| *end <= max)
        .last()
        .unwrap_or(0)
}

#[derive(Debug, Clone)]
pub struct Validator {
    catalog: Arc<Catalog>,
    config: ValidationConfig,
}

impl Validator {
    pub fn new(catalog: Arc<Catalog>, config: ValidationConfig) -> Self {
        Self { catalog, config }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn config(&self) -> ValidationConfig {
        self.config
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    // ── Entry points ────────────────────────────────────────────────

    /// Validates `value` against `node`.  `path` prefixes error paths.
    pub fn validate(
        &self,
        node: &SchemaNode,
        value: &mut Value,
        path: &str,
    ) -> Result<(), ValidationError> {
        if !self.config.enabled {
            return Ok(());
        }
        self.check(node, value, path)
    }

    /// Validates decoded query parameters.
    pub fn validate_params(
        &self,
        method: &MethodDef,
        params: &mut Map<String, Value>,
    ) -> Result<(), ValidationError> {
        if !self.config.enabled {
            return Ok(());
        }
        match &method.parameters {
            Some(schema) => self.check_object(schema, params, "parameters"),
            None if params.is_empty() => Ok(()),
            None => Err(ValidationError::new(
                "parameters",
                format!("{} takes no parameters", method.nsid),
            )),
        }
    }

    /// Validates a structured body for one direction of `method`.
    ///
    /// Without a declared body the direction must be empty.  A declared
    /// non-JSON encoding, or a JSON encoding with no schema, accepts any
    /// value.  An absent value is checked as `{}`.
    pub fn validate_direction(
        &self,
        method: &MethodDef,
        direction: Direction,
        value: Option<&mut Value>,
    ) -> Result<(), ValidationError> {
        if !self.config.enabled {
            return Ok(());
        }
        let path = direction.as_str();

        let (declared, schema) = match direction {
            Direction::Input => body_schema(method.input.as_ref()),
            Direction::Output => body_schema(method.output.as_ref()),
            Direction::Message => (
                method.message.is_some() || method.output.is_some(),
                method.message_schema(),
            ),
        };
        let binary = match direction {
            Direction::Input => method.input.as_ref().is_some_and(|b| !b.is_json()),
            Direction::Output => method.output.as_ref().is_some_and(|b| !b.is_json()),
            Direction::Message => false,
        };
        if binary {
            return Ok(());
        }

        let Some(schema) = schema else {
            return match value {
                _ if declared => Ok(()),
                None | Some(Value::Null) => Ok(()),
                Some(Value::Object(m)) if m.is_empty() => Ok(()),
                Some(_) => Err(ValidationError::new(
                    path,
                    format!("{} declares no {path}", method.nsid),
                )),
            };
        };

        match value {
            Some(v) => self.check(schema, v, path),
            None => self.check(schema, &mut Value::Object(Map::new()), path),
        }
    }

    /// Validates one subscription message.  A frame type `t` such as
    /// `#commit` selects the union variant directly when the message schema
    /// is a union that lists it.
    pub fn validate_message(
        &self,
        method: &MethodDef,
        t: Option<&str>,
        value: &mut Value,
    ) -> Result<(), ValidationError> {
        if !self.config.enabled {
            return Ok(());
        }
        if let (Some(t), Some(SchemaNode::Union(union))) = (t, method.message_schema()) {
            let id = qualify_ref(method.nsid.as_str(), t);
            if union.refs.iter().any(|r| *r == id) {
                return self.check_ref(&id, value, Direction::Message.as_str());
            }
        }
        self.validate_direction(method, Direction::Message, Some(value))
    }

    /// Validates a record value against the record definition `nsid`.
    pub fn validate_record(&self, nsid: &str, value: &mut Value) -> Result<(), ValidationError> {
        if !self.config.enabled {
            return Ok(());
        }
        match self.catalog.get(nsid).map(|d| d.as_ref()) {
            Some(Definition::Record(rec)) => {
                check_type_tag(nsid, value, "record")?;
                self.check(&rec.record, value, "record")
            }
            Some(other) => Err(ValidationError::new(
                "record",
                format!("{nsid} is a {}, not a record", other.type_name()),
            )),
            None => Err(ValidationError::new("record", format!("lexicon {nsid} not found"))),
        }
    }

    /// Validates `value` against a union and reports which variant took it.
    pub fn match_union(
        &self,
        union: &UnionNode,
        value: &mut Value,
        path: &str,
    ) -> Result<UnionMatch, ValidationError> {
        let mut last = None;
        for variant in &union.refs {
            let mut candidate = value.clone();
            match self.check_ref(variant, &mut candidate, path) {
                Ok(()) => {
                    *value = candidate;
                    return Ok(UnionMatch::Variant(variant.clone()));
                }
                Err(e) => last = Some(e),
            }
        }

        if !union.closed {
            let tag = value
                .get("$type")
                .and_then(Value::as_str)
                .filter(|t| !union.refs.iter().any(|r| r == t))
                .map(str::to_string);
            if let Some(tag) = tag {
                if self.catalog.get(&tag).is_some() {
                    self.check_ref(&tag, value, path)?;
                } else {
                    tracing::debug!(path, type_tag = %tag, "skipping unknown union type");
                }
                return Ok(UnionMatch::Open(tag));
            }
        }

        Err(last.unwrap_or_else(|| ValidationError::new(path, "matches no union variant")))
    }

    // ── Recursion ───────────────────────────────────────────────────

    fn check(&self, node: &SchemaNode, value: &mut Value, path: &str) -> Result<(), ValidationError> {
        match node {
            SchemaNode::Null(_) => match value {
                Value::Null => Ok(()),
                other => Err(unexpected(path, other)),
            },
            SchemaNode::Boolean(b) => match value {
                Value::Bool(v) => match b.const_value {
                    Some(c) if c != *v => {
                        Err(ValidationError::new(path, format!("is not const value {c}")))
                    }
                    _ => Ok(()),
                },
                other => Err(unexpected(path, other)),
            },
            SchemaNode::Integer(n) => self.check_integer(n, value, path),
            SchemaNode::String(s) => self.check_string(s, value, path),
            SchemaNode::Bytes(b) => self.check_bytes(b, value, path),
            SchemaNode::CidLink(_) => check_cid_link(value, path),
            SchemaNode::Blob(b) => check_blob(b, value, path),
            SchemaNode::Array(a) => self.check_array(a, value, path),
            SchemaNode::Object(o) | SchemaNode::Params(o) => match value {
                Value::Object(map) => self.check_object(o, map, path),
                other => Err(unexpected(path, other)),
            },
            SchemaNode::Token(_) => Err(ValidationError::new(
                path,
                "an anonymous token matches nothing; reference the token definition",
            )),
            SchemaNode::Ref(r) => self.check_ref(&r.target, value, path),
            SchemaNode::Union(u) => self.match_union(u, value, path).map(|_| ()),
            SchemaNode::Unknown(_) => {
                let tag = value
                    .get("$type")
                    .and_then(Value::as_str)
                    .filter(|t| self.catalog.get(t).is_some_and(|d| d.as_method().is_none()))
                    .map(str::to_string);
                match tag {
                    Some(tag) => self.check_ref(&tag, value, path),
                    None => Ok(()),
                }
            }
        }
    }

    fn check_ref(&self, target: &str, value: &mut Value, path: &str) -> Result<(), ValidationError> {
        let resolved = self
            .catalog
            .resolve_ref(target)
            .map_err(|e| ValidationError::new(path, e.to_string()))?;
        self.check_definition(&resolved, value, path)
    }

    fn check_definition(
        &self,
        resolved: &Resolved,
        value: &mut Value,
        path: &str,
    ) -> Result<(), ValidationError> {
        match resolved.def.as_ref() {
            Definition::Node(SchemaNode::Token(_)) => match value {
                Value::String(s) if *s == resolved.id => Ok(()),
                Value::String(_) => Err(ValidationError::new(
                    path,
                    format!("is not token {}", resolved.id),
                )),
                other => Err(unexpected(path, other)),
            },
            Definition::Node(node @ SchemaNode::Object(_)) => {
                check_type_tag(&resolved.id, value, path)?;
                self.check(node, value, path)
            }
            Definition::Record(rec) => {
                check_type_tag(&resolved.id, value, path)?;
                self.check(&rec.record, value, path)
            }
            Definition::Node(node) => self.check(node, value, path),
            Definition::Method(_) => Err(ValidationError::new(
                path,
                format!("{} is a method, not a type", resolved.id),
            )),
        }
    }

    fn check_integer(&self, n: &IntegerNode, value: &Value, path: &str) -> Result<(), ValidationError> {
        let Some(v) = value.as_i64() else {
            return Err(unexpected(path, value));
        };
        if let Some(c) = n.const_value {
            if v != c {
                return Err(ValidationError::new(path, format!("is not const value {c}")));
            }
        }
        if let Some(values) = &n.enum_values {
            if !values.contains(&v) {
                return Err(ValidationError::new(path, "is not one of enum values"));
            }
        }
        if let Some(min) = n.minimum {
            if v < min {
                return Err(ValidationError::new(path, format!("is lower than minimum {min}")));
            }
        }
        if let Some(max) = n.maximum {
            if v > max {
                return Err(ValidationError::new(path, format!("is higher than maximum {max}")));
            }
        }
        Ok(())
    }

    fn check_string(&self, n: &StringNode, value: &mut Value, path: &str) -> Result<(), ValidationError> {
        let truncate = self.config.truncate();
        let Value::String(s) = value else {
            return Err(unexpected(path, value));
        };

        if n.min_graphemes.is_some() || n.max_graphemes.is_some() {
            let count = s.graphemes(true).count();
            if let Some(max) = n.max_graphemes {
                if count > max {
                    if !truncate {
                        return Err(ValidationError::new(
                            path,
                            format!("is longer ({count}) than maxGraphemes {max}"),
                        ));
                    }
                    let end = s
                        .grapheme_indices(true)
                        .nth(max)
                        .map(|(i, _)| i)
                        .unwrap_or(s.len());
                    s.truncate(end);
                }
            }
            if let Some(min) = n.min_graphemes {
                if count < min {
                    return Err(ValidationError::new(
                        path,
                        format!("is shorter ({count}) than minGraphemes {min}"),
                    ));
                }
            }
        }

        if let Some(max) = n.max_length {
            if s.len() > max {
                if !truncate {
                    return Err(ValidationError::new(
                        path,
                        format!("is longer ({}) than maxLength {max}", s.len()),
                    ));
                }
                let end = grapheme_floor(s, max);
                s.truncate(end);
            }
        }
        if let Some(min) = n.min_length {
            if s.len() < min {
                return Err(ValidationError::new(
                    path,
                    format!("is shorter ({}) than minLength {min}", s.len()),
                ));
            }
        }

        let s = s.as_str();
        if let Some(c) = &n.const_value {
            if s != c.as_str() {
                return Err(ValidationError::new(path, format!("is not const value {c}")));
            }
        }
        if let Some(values) = &n.enum_values {
            if !values.iter().any(|v| v == s) {
                return Err(ValidationError::new(path, "is not one of enum values"));
            }
        }
        if let Some(format) = n.format {
            if !formats::check(format, s) {
                let name = serde_json::to_value(format)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default();
                return Err(ValidationError::new(path, format!("is invalid for format {name}")));
            }
        }
        Ok(())
    }

    fn check_bytes(&self, n: &BytesNode, value: &mut Value, path: &str) -> Result<(), ValidationError> {
        let encoded = value
            .as_object()
            .and_then(|m| m.get("$bytes"))
            .and_then(Value::as_str)
            .ok_or_else(|| ValidationError::new(path, "is not a $bytes object"))?;
        let mut bytes = decode_base64(encoded)
            .ok_or_else(|| ValidationError::new(path, "has invalid base64 in $bytes"))?;

        if let Some(max) = n.max_length {
            if bytes.len() > max {
                if !self.config.truncate() {
                    return Err(ValidationError::new(
                        path,
                        format!("is longer ({}) than maxLength {max}", bytes.len()),
                    ));
                }
                bytes.truncate(max);
                if let Some(map) = value.as_object_mut() {
                    map.insert("$bytes".into(), Value::String(STANDARD_NO_PAD.encode(&bytes)));
                }
            }
        }
        if let Some(min) = n.min_length {
            if bytes.len() < min {
                return Err(ValidationError::new(
                    path,
                    format!("is shorter ({}) than minLength {min}", bytes.len()),
                ));
            }
        }
        Ok(())
    }

    fn check_array(&self, n: &ArrayNode, value: &mut Value, path: &str) -> Result<(), ValidationError> {
        let Value::Array(items) = value else {
            return Err(unexpected(path, value));
        };
        if let Some(max) = n.max_length {
            if items.len() > max {
                return Err(ValidationError::new(
                    path,
                    format!("is longer ({}) than maxLength {max}", items.len()),
                ));
            }
        }
        if let Some(min) = n.min_length {
            if items.len() < min {
                return Err(ValidationError::new(
                    path,
                    format!("is shorter ({}) than minLength {min}", items.len()),
                ));
            }
        }
        for (i, item) in items.iter_mut().enumerate() {
            self.check(&n.items, item, &format!("{path}[{i}]"))?;
        }
        Ok(())
    }

    fn check_object(
        &self,
        n: &ObjectNode,
        map: &mut Map<String, Value>,
        path: &str,
    ) -> Result<(), ValidationError> {
        for name in &n.required {
            let present = map.get(name).is_some_and(|v| !v.is_null());
            if !present && !(n.is_nullable(name) && map.contains_key(name)) {
                return Err(ValidationError::new(
                    path,
                    format!("missing required property {name}"),
                ));
            }
        }

        for (name, prop) in &n.properties {
            let Some(v) = map.get_mut(name) else {
                continue;
            };
            if v.is_null() {
                if n.is_nullable(name) || matches!(prop, SchemaNode::Null(_) | SchemaNode::Unknown(_)) {
                    continue;
                }
                return Err(ValidationError::new(
                    child(path, name),
                    "is null but not nullable",
                ));
            }
            self.check(prop, v, &child(path, name))?;
        }
        Ok(())
    }
}

fn body_schema(body: Option<&crate::model::Body>) -> (bool, Option<&SchemaNode>) {
    match body {
        Some(b) => (true, b.schema.as_ref()),
        None => (false, None),
    }
}

/// An object validated as definition `id` may only carry `$type == id`.
fn check_type_tag(id: &str, value: &Value, path: &str) -> Result<(), ValidationError> {
    match value.get("$type") {
        None => Ok(()),
        Some(Value::String(t)) if t == id => Ok(()),
        Some(Value::String(t)) => Err(ValidationError::new(
            path,
            format!("has $type {t}, expected {id}"),
        )),
        Some(other) => Err(ValidationError::new(
            path,
            format!("has $type of type {}", json_type(other)),
        )),
    }
}

fn check_cid_link(value: &Value, path: &str) -> Result<(), ValidationError> {
    let link = value
        .as_object()
        .and_then(|m| m.get("$link"))
        .and_then(Value::as_str)
        .ok_or_else(|| ValidationError::new(path, "is not a $link object"))?;
    if formats::check(crate::model::StringFormat::Cid, link) {
        Ok(())
    } else {
        Err(ValidationError::new(path, "has an invalid CID in $link"))
    }
}

fn check_blob(n: &BlobNode, value: &Value, path: &str) -> Result<(), ValidationError> {
    let Value::Object(map) = value else {
        return Err(unexpected(path, value));
    };
    let mime = map
        .get("mimeType")
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty())
        .ok_or_else(|| ValidationError::new(path, "blob is missing mimeType"))?;

    // Legacy blobs carry a bare `cid` string instead of `$type`/`ref`/`size`.
    if map.get("$type").and_then(Value::as_str) == Some("blob") {
        check_cid_link(map.get("ref").unwrap_or(&Value::Null), &child(path, "ref"))?;
        let size = map
            .get("size")
            .and_then(Value::as_u64)
            .ok_or_else(|| ValidationError::new(path, "blob is missing size"))?;
        if let Some(max) = n.max_size {
            if size > max {
                return Err(ValidationError::new(
                    path,
                    format!("has size {size} over maxSize {max}"),
                ));
            }
        }
    } else if map.get("cid").and_then(Value::as_str).is_none() {
        return Err(ValidationError::new(path, "is not a blob"));
    }

    if !formats::mime_accepted(&n.accept, mime) {
        return Err(ValidationError::new(
            path,
            format!("MIME type {mime} is not one of {}", n.accept.join(", ")),
        ));
    }
    Ok(())
}

fn decode_base64(s: &str) -> Option<Vec<u8>> {
    STANDARD_NO_PAD
        .decode(s)
        .or_else(|_| STANDARD.decode(s))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn catalog() -> Arc<Catalog> {
        Arc::new(
            Catalog::builder()
                .json(json!({
                    "lexicon": 1,
                    "id": "io.example.post",
                    "defs": {
                        "main": {
                            "type": "record",
                            "key": "tid",
                            "record": {
                                "type": "object",
                                "required": ["text"],
                                "properties": {
                                    "text": {"type": "string", "maxGraphemes": 5},
                                    "tags": {"type": "array", "items": {"type": "string"}, "maxLength": 2},
                                },
                            },
                        },
                        "a": {"type": "object", "required": ["x"], "properties": {"x": {"type": "integer"}}},
                        "b": {"type": "object", "properties": {"x": {"type": "integer"}, "y": {"type": "string"}}},
                        "open": {"type": "union", "refs": ["#a"]},
                        "closed": {"type": "union", "refs": ["#a"], "closed": true},
                        "both": {"type": "union", "refs": ["#a", "#b"]},
                        "flag": {"type": "token"},
                    },
                }))
                .build()
                .unwrap(),
        )
    }

    fn node(v: Value) -> SchemaNode {
        serde_json::from_value(v).unwrap()
    }

    fn strict() -> Validator {
        Validator::new(catalog(), ValidationConfig::strict())
    }

    fn truncating() -> Validator {
        Validator::new(catalog(), ValidationConfig::truncating())
    }

    #[test]
    fn truncates_to_exact_grapheme_count() {
        let n = node(json!({"type": "string", "maxGraphemes": 3}));
        let mut v = json!("ab👨‍👩‍👧cd");
        truncating().validate(&n, &mut v, "text").unwrap();
        assert_eq!(v, json!("ab👨‍👩‍👧"));

        let mut v = json!("ab👨‍👩‍👧cd");
        let err = strict().validate(&n, &mut v, "text").unwrap_err();
        assert_eq!(err.path, "text");
        assert!(err.reason.contains("maxGraphemes 3"));
    }

    #[test]
    fn byte_truncation_respects_grapheme_boundaries() {
        let n = node(json!({"type": "string", "maxLength": 5}));
        let mut v = json!("abcé!");
        // "abcé" is 5 bytes; "abcé!" is 6
        truncating().validate(&n, &mut v, "s").unwrap();
        assert_eq!(v, json!("abcé"));

        let mut v = json!("abcdé");
        truncating().validate(&n, &mut v, "s").unwrap();
        assert_eq!(v, json!("abcd"));
    }

    #[test]
    fn lower_bounds_never_truncate() {
        let n = node(json!({"type": "string", "minLength": 3}));
        let mut v = json!("ab");
        assert!(truncating().validate(&n, &mut v, "s").is_err());
    }

    #[test]
    fn array_max_length_is_inclusive() {
        let n = node(json!({"type": "array", "items": {"type": "integer"}, "maxLength": 2}));
        assert!(strict().validate(&n, &mut json!([1, 2]), "a").is_ok());
        let err = strict().validate(&n, &mut json!([1, 2, 3]), "a").unwrap_err();
        assert!(err.reason.contains("maxLength 2"));
        let err = strict().validate(&n, &mut json!([1, "x"]), "a").unwrap_err();
        assert_eq!(err.path, "a[1]");
    }

    #[test]
    fn union_reports_first_matching_variant() {
        let v = strict();
        let union = UnionNode {
            description: None,
            refs: vec!["io.example.post#a".into(), "io.example.post#b".into()],
            closed: false,
        };
        let m = v.match_union(&union, &mut json!({"x": 1}), "u").unwrap();
        assert_eq!(m, UnionMatch::Variant("io.example.post#a".into()));

        let m = v
            .match_union(&union, &mut json!({"$type": "io.example.post#b", "x": 1}), "u")
            .unwrap();
        assert_eq!(m, UnionMatch::Variant("io.example.post#b".into()));
    }

    #[test]
    fn union_failure_reports_last_variant() {
        let n = node(json!({"type": "ref", "ref": "io.example.post#both"}));
        // #a fails on the missing x, #b on y's type; the error is #b's
        let err = strict().validate(&n, &mut json!({"y": 2}), "u").unwrap_err();
        assert_eq!(err.path, "u.y");
    }

    #[test]
    fn open_union_admits_unlisted_type() {
        let v = strict();
        let open = node(json!({"type": "ref", "ref": "io.example.post#open"}));
        let closed = node(json!({"type": "ref", "ref": "io.example.post#closed"}));
        let mut val = json!({"$type": "com.example.other#thing", "x": "nope"});
        assert!(v.validate(&open, &mut val.clone(), "u").is_ok());
        assert!(v.validate(&closed, &mut val, "u").is_err());
    }

    #[test]
    fn required_and_nullable() {
        let n = node(json!({
            "type": "object",
            "required": ["a", "b"],
            "nullable": ["b"],
            "properties": {"a": {"type": "string"}, "b": {"type": "string"}, "c": {"type": "string"}},
        }));
        let v = strict();
        assert!(v.validate(&n, &mut json!({"a": "x", "b": null}), "o").is_ok());
        assert!(v.validate(&n, &mut json!({"a": "x"}), "o").is_err());
        assert!(v.validate(&n, &mut json!({"a": null, "b": "y"}), "o").is_err());
        let err = v.validate(&n, &mut json!({"a": "x", "b": "y", "c": null}), "o").unwrap_err();
        assert_eq!(err.path, "o.c");
        // unknown properties pass through
        let mut val = json!({"a": "x", "b": "y", "extra": 1});
        assert!(v.validate(&n, &mut val, "o").is_ok());
        assert_eq!(val["extra"], 1);
    }

    #[test]
    fn token_must_equal_its_id() {
        let v = strict();
        let anonymous = node(json!({"type": "token"}));
        assert!(v.validate(&anonymous, &mut json!("io.example.post#flag"), "t").is_err());

        let n = node(json!({"type": "ref", "ref": "io.example.post#flag"}));
        assert!(v.validate(&n, &mut json!("io.example.post#flag"), "t").is_ok());
        assert!(v.validate(&n, &mut json!("flag"), "t").is_err());
    }

    #[test]
    fn unknown_validates_known_type_tag() {
        let n = node(json!({"type": "unknown"}));
        let v = strict();
        assert!(v.validate(&n, &mut json!({"anything": [1, 2]}), "u").is_ok());
        assert!(v
            .validate(&n, &mut json!({"$type": "io.example.post#a", "x": "nope"}), "u")
            .is_err());
    }

    #[test]
    fn record_validation_checks_type_tag() {
        let v = strict();
        assert!(v
            .validate_record("io.example.post", &mut json!({"$type": "io.example.post", "text": "hi"}))
            .is_ok());
        assert!(v
            .validate_record("io.example.post", &mut json!({"$type": "io.example.other", "text": "hi"}))
            .is_err());
        assert!(v.validate_record("io.example.post", &mut json!({"tags": []})).is_err());
    }

    #[test]
    fn blob_mime_and_size() {
        let n = node(json!({"type": "blob", "accept": ["image/*"], "maxSize": 1000}));
        let v = strict();
        let blob = |mime: &str, size: u64| {
            json!({
                "$type": "blob",
                "ref": {"$link": "bafkreibme22gw2h7y2h7tg2fhqotaqjucnbc24deqo72b6mkl2egezxhvy"},
                "mimeType": mime,
                "size": size,
            })
        };
        assert!(v.validate(&n, &mut blob("image/png", 10), "b").is_ok());
        assert!(v.validate(&n, &mut blob("video/mp4", 10), "b").is_err());
        assert!(v.validate(&n, &mut blob("image/png", 5000), "b").is_err());
    }

    #[test]
    fn bytes_truncate_reencodes() {
        let n = node(json!({"type": "bytes", "maxLength": 2}));
        let mut v = json!({"$bytes": STANDARD_NO_PAD.encode([1u8, 2, 3, 4])});
        truncating().validate(&n, &mut v, "b").unwrap();
        assert_eq!(v, json!({"$bytes": STANDARD_NO_PAD.encode([1u8, 2])}));
    }

    #[test]
    fn disabled_accepts_anything() {
        let v = Validator::new(catalog(), ValidationConfig::disabled());
        let n = node(json!({"type": "integer"}));
        assert!(v.validate(&n, &mut json!("not a number"), "i").is_ok());
    }

    #[test]
    fn integers_reject_floats_and_bounds() {
        let n = node(json!({"type": "integer", "minimum": 1, "maximum": 3}));
        let v = strict();
        assert!(v.validate(&n, &mut json!(1), "i").is_ok());
        assert!(v.validate(&n, &mut json!(3), "i").is_ok());
        assert!(v.validate(&n, &mut json!(4), "i").is_err());
        assert!(v.validate(&n, &mut json!(1.5), "i").is_err());
    }

    #[test]
    fn typed_message_selects_union_variant() {
        let cat = Arc::new(
            Catalog::builder()
                .json(json!({
                    "lexicon": 1,
                    "id": "io.example.events",
                    "defs": {
                        "main": {
                            "type": "subscription",
                            "message": {"schema": {"type": "union", "refs": ["#tick", "#info"]}},
                        },
                        "tick": {"type": "object", "required": ["n"], "properties": {"n": {"type": "integer"}}},
                        "info": {"type": "object", "required": ["name"], "properties": {"name": {"type": "string"}}},
                    },
                }))
                .build()
                .unwrap(),
        );
        let v = Validator::new(cat.clone(), ValidationConfig::strict());
        let method = cat.method("io.example.events").unwrap();
        assert!(v.validate_message(method, Some("#info"), &mut json!({"name": "x"})).is_ok());
        let err = v
            .validate_message(method, Some("#tick"), &mut json!({"name": "x"}))
            .unwrap_err();
        assert_eq!(err.path, "message");
        assert!(err.reason.contains("missing required property n"));
    }
}
