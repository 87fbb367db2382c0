//! In-memory lexicon type graph.
//!
//! Field nodes deserialize straight from lexicon JSON (`{"type": "string",
//! "maxGraphemes": 300, ...}`).  Top-level definitions are split into
//! methods, records, and plain nodes by [`crate::catalog`], which also
//! rewrites every reference to its fully-qualified form so nodes never need
//! to know which document they came from.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use xr_domain::{MethodKind, Nsid};

/// The encoding used for structured bodies.
pub const JSON_ENCODING: &str = "application/json";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Field nodes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SchemaNode {
    Null(Described),
    Boolean(BooleanNode),
    Integer(IntegerNode),
    String(StringNode),
    Bytes(BytesNode),
    CidLink(Described),
    Blob(BlobNode),
    Array(ArrayNode),
    Object(ObjectNode),
    Params(ObjectNode),
    Token(Described),
    Ref(RefNode),
    Union(UnionNode),
    Unknown(Described),
}

impl SchemaNode {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null(_) => "null",
            Self::Boolean(_) => "boolean",
            Self::Integer(_) => "integer",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::CidLink(_) => "cid-link",
            Self::Blob(_) => "blob",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
            Self::Params(_) => "params",
            Self::Token(_) => "token",
            Self::Ref(_) => "ref",
            Self::Union(_) => "union",
            Self::Unknown(_) => "unknown",
        }
    }

    /// Primitive kinds allowed as query parameters.
    pub fn is_param_primitive(&self) -> bool {
        matches!(
            self,
            Self::Boolean(_) | Self::Integer(_) | Self::String(_) | Self::Unknown(_)
        )
    }

    /// Whether this node is, or nests, a `token`.  Tokens only have an
    /// identity as top-level definitions.
    pub fn contains_token(&self) -> bool {
        match self {
            Self::Token(_) => true,
            Self::Array(a) => a.items.contains_token(),
            Self::Object(o) | Self::Params(o) => o.properties.values().any(Self::contains_token),
            _ => false,
        }
    }

    /// Visits every reference (`ref` targets and `union` variants) reachable
    /// from this node without crossing into other definitions.
    pub fn for_each_ref_mut(&mut self, f: &mut impl FnMut(&mut String)) {
        match self {
            Self::Ref(r) => f(&mut r.target),
            Self::Union(u) => u.refs.iter_mut().for_each(|r| f(r)),
            Self::Array(a) => a.items.for_each_ref_mut(f),
            Self::Object(o) | Self::Params(o) => {
                for prop in o.properties.values_mut() {
                    prop.for_each_ref_mut(f);
                }
            }
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Described {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BooleanNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "const", default, skip_serializing_if = "Option::is_none")]
    pub const_value: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntegerNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<i64>,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<i64>>,
    #[serde(rename = "const", default, skip_serializing_if = "Option::is_none")]
    pub const_value: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StringNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<StringFormat>,
    /// Length limits in UTF-8 bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    /// Length limits in grapheme clusters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_graphemes: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_graphemes: Option<usize>,
    /// Informational only; never enforced.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub known_values: Vec<String>,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
    #[serde(rename = "const", default, skip_serializing_if = "Option::is_none")]
    pub const_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StringFormat {
    Datetime,
    Uri,
    Did,
    Handle,
    AtIdentifier,
    AtUri,
    Nsid,
    Cid,
    Language,
    Tid,
    RecordKey,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BytesNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// MIME patterns such as `image/png`, `image/*`, `*/*`.  Empty = any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub accept: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrayNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub items: Box<SchemaNode>,
    /// Element-count limits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, SchemaNode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nullable: Vec<String>,
}

impl ObjectNode {
    pub fn is_required(&self, name: &str) -> bool {
        self.required.iter().any(|r| r == name)
    }

    pub fn is_nullable(&self, name: &str) -> bool {
        self.nullable.iter().any(|r| r == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "ref")]
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnionNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Variants in priority order.
    pub refs: Vec<String>,
    #[serde(default)]
    pub closed: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Methods & records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A request or response body declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Body {
    /// MIME type or pattern, e.g. `application/json`, `*/*`, `image/*`.
    pub encoding: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<SchemaNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Body {
    pub fn is_json(&self) -> bool {
        self.encoding == JSON_ENCODING
    }
}

/// Per-frame payload declaration of a subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<SchemaNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// The raw shape of a query/procedure/subscription definition.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawMethod {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Option<SchemaNode>,
    #[serde(default)]
    pub input: Option<Body>,
    #[serde(default)]
    pub output: Option<Body>,
    #[serde(default)]
    pub message: Option<MessageBody>,
    #[serde(default)]
    pub errors: Vec<ErrorDef>,
}

/// A loaded method definition.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodDef {
    pub nsid: Nsid,
    pub kind: MethodKind,
    pub description: Option<String>,
    pub parameters: Option<ObjectNode>,
    pub input: Option<Body>,
    pub output: Option<Body>,
    pub message: Option<MessageBody>,
    pub errors: Vec<ErrorDef>,
}

impl MethodDef {
    /// Schema that each subscription frame payload is checked against:
    /// `message.schema`, falling back to `output.schema`.
    pub fn message_schema(&self) -> Option<&SchemaNode> {
        self.message
            .as_ref()
            .and_then(|m| m.schema.as_ref())
            .or_else(|| self.output.as_ref().and_then(|o| o.schema.as_ref()))
    }

    /// Whether `name` is one of this method's declared errors.
    pub fn declares_error(&self, name: &str) -> bool {
        self.errors.iter().any(|e| e.name == name)
    }

    pub(crate) fn nodes_mut(&mut self) -> impl Iterator<Item = &mut SchemaNode> {
        let message = self.message.as_mut().and_then(|m| m.schema.as_mut());
        let input = self.input.as_mut().and_then(|b| b.schema.as_mut());
        let output = self.output.as_mut().and_then(|b| b.schema.as_mut());
        let params = self
            .parameters
            .as_mut()
            .into_iter()
            .flat_map(|p| p.properties.values_mut());
        input.into_iter().chain(output).chain(message).chain(params)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawRecord {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    pub record: SchemaNode,
}

/// A record definition: a named object type stored in repositories.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordDef {
    pub description: Option<String>,
    pub key: Option<String>,
    /// Always an [`SchemaNode::Object`].
    pub record: SchemaNode,
}

/// Any top-level definition in a lexicon document.
#[derive(Debug, Clone, PartialEq)]
pub enum Definition {
    Method(MethodDef),
    Record(RecordDef),
    Node(SchemaNode),
}

impl Definition {
    pub fn as_method(&self) -> Option<&MethodDef> {
        match self {
            Self::Method(m) => Some(m),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Method(m) => m.kind.as_str(),
            Self::Record(_) => "record",
            Self::Node(n) => n.type_name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_node_parses_camel_case_limits() {
        let node: SchemaNode = serde_json::from_value(json!({
            "type": "string",
            "maxGraphemes": 300,
            "maxLength": 3000,
            "format": "at-uri",
        }))
        .unwrap();
        match node {
            SchemaNode::String(s) => {
                assert_eq!(s.max_graphemes, Some(300));
                assert_eq!(s.max_length, Some(3000));
                assert_eq!(s.format, Some(StringFormat::AtUri));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn cid_link_uses_kebab_tag() {
        let node: SchemaNode = serde_json::from_value(json!({"type": "cid-link"})).unwrap();
        assert_eq!(node.type_name(), "cid-link");
    }

    #[test]
    fn unknown_format_is_rejected() {
        let res = serde_json::from_value::<SchemaNode>(json!({"type": "string", "format": "bogus"}));
        assert!(res.is_err());
    }

    #[test]
    fn for_each_ref_mut_reaches_nested_refs() {
        let mut node: SchemaNode = serde_json::from_value(json!({
            "type": "object",
            "properties": {
                "a": {"type": "ref", "ref": "#x"},
                "b": {"type": "array", "items": {"type": "union", "refs": ["#y", "#z"]}},
            },
        }))
        .unwrap();
        let mut seen = Vec::new();
        node.for_each_ref_mut(&mut |r| seen.push(r.clone()));
        seen.sort();
        assert_eq!(seen, vec!["#x", "#y", "#z"]);
    }
}
