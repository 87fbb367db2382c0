//! Lexicon document parsing and on-disk discovery.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use xr_domain::{MethodKind, Nsid, SchemaLoadError};

use crate::model::{Definition, MethodDef, ObjectNode, RawMethod, RawRecord, RecordDef, SchemaNode};

/// The only lexicon format version understood.
pub const LEXICON_VERSION: i64 = 1;

/// One parsed lexicon document.  Definitions are keyed by their qualified
/// id (`nsid` for `main`, `nsid#name` otherwise) and every reference inside
/// them is already qualified.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: Nsid,
    pub description: Option<String>,
    pub defs: BTreeMap<String, Definition>,
}

#[derive(Deserialize)]
struct RawDocument {
    lexicon: Value,
    id: String,
    #[serde(default)]
    description: Option<String>,
    defs: serde_json::Map<String, Value>,
}

/// Qualified id of definition `name` in document `nsid`.
pub fn def_id(nsid: &str, name: &str) -> String {
    if name == "main" {
        nsid.to_string()
    } else {
        format!("{nsid}#{name}")
    }
}

/// Qualifies a reference as written in document `doc_id`.
///
/// `#name` is local, `nsid` is that document's main, `nsid#name` is explicit.
/// A trailing `#main` is dropped.
pub fn qualify_ref(doc_id: &str, reference: &str) -> String {
    match reference.split_once('#') {
        Some(("", name)) => def_id(doc_id, name),
        Some((nsid, name)) => def_id(nsid, name),
        None => reference.to_string(),
    }
}

fn malformed(document: &str, message: impl Into<String>) -> SchemaLoadError {
    SchemaLoadError::Malformed {
        document: document.to_string(),
        message: message.into(),
    }
}

/// Parses a lexicon document from JSON text.  `origin` names the source in
/// errors (a file path or the document id).
pub fn parse_document(text: &str, origin: &str) -> Result<Document, SchemaLoadError> {
    let value: Value = serde_json::from_str(text).map_err(|e| malformed(origin, e.to_string()))?;
    parse_document_value(value, origin)
}

/// Parses a lexicon document that has already been decoded to JSON.
pub fn parse_document_value(value: Value, origin: &str) -> Result<Document, SchemaLoadError> {
    let raw: RawDocument =
        serde_json::from_value(value).map_err(|e| malformed(origin, e.to_string()))?;

    if raw.lexicon.as_i64() != Some(LEXICON_VERSION) {
        return Err(SchemaLoadError::UnsupportedVersion {
            document: raw.id,
            version: raw.lexicon.to_string(),
        });
    }

    let id = Nsid::new(raw.id.clone()).map_err(|e| malformed(origin, e.to_string()))?;
    if raw.defs.is_empty() {
        return Err(malformed(id.as_str(), "no definitions"));
    }

    let mut defs = BTreeMap::new();
    for (name, def) in raw.defs {
        let qualified = def_id(id.as_str(), &name);
        let mut parsed = parse_definition(&id, &name, def)
            .map_err(|message| malformed(&qualified, message))?;
        qualify_definition(id.as_str(), &mut parsed);
        defs.insert(qualified, parsed);
    }

    Ok(Document {
        id,
        description: raw.description,
        defs,
    })
}

const INLINE_TOKEN: &str = "token is only allowed as a top-level definition";

fn parse_definition(doc: &Nsid, name: &str, def: Value) -> Result<Definition, String> {
    let ty = def
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| "missing type".to_string())?
        .to_string();

    let kind = match ty.as_str() {
        "query" => Some(MethodKind::Query),
        "procedure" => Some(MethodKind::Procedure),
        "subscription" => Some(MethodKind::Subscription),
        _ => None,
    };

    if let Some(kind) = kind {
        if name != "main" {
            return Err(format!("{ty} must be the main definition"));
        }
        let raw: RawMethod = serde_json::from_value(def).map_err(|e| e.to_string())?;
        let mut method = method_from_raw(doc.clone(), kind, raw)?;
        if method.nodes_mut().any(|n| n.contains_token()) {
            return Err(INLINE_TOKEN.into());
        }
        return Ok(Definition::Method(method));
    }

    if ty == "record" {
        let raw: RawRecord = serde_json::from_value(def).map_err(|e| e.to_string())?;
        if !matches!(raw.record, SchemaNode::Object(_)) {
            return Err("record must be an object".into());
        }
        if raw.record.contains_token() {
            return Err(INLINE_TOKEN.into());
        }
        return Ok(Definition::Record(RecordDef {
            description: raw.description,
            key: raw.key,
            record: raw.record,
        }));
    }

    let node: SchemaNode = serde_json::from_value(def).map_err(|e| e.to_string())?;
    if matches!(node, SchemaNode::Params(_)) {
        return Err("params is only allowed as method parameters".into());
    }
    if !matches!(node, SchemaNode::Token(_)) && node.contains_token() {
        return Err(INLINE_TOKEN.into());
    }
    Ok(Definition::Node(node))
}

fn method_from_raw(nsid: Nsid, kind: MethodKind, raw: RawMethod) -> Result<MethodDef, String> {
    if raw.input.is_some() && kind != MethodKind::Procedure {
        return Err(format!("a {kind} cannot declare input"));
    }
    if raw.message.is_some() && kind != MethodKind::Subscription {
        return Err(format!("a {kind} cannot declare message"));
    }

    let parameters = match raw.parameters {
        None => None,
        Some(SchemaNode::Params(params)) => {
            check_params(&params)?;
            Some(params)
        }
        Some(other) => {
            return Err(format!(
                "parameters must be params, got {}",
                other.type_name()
            ))
        }
    };

    Ok(MethodDef {
        nsid,
        kind,
        description: raw.description,
        parameters,
        input: raw.input,
        output: raw.output,
        message: raw.message,
        errors: raw.errors,
    })
}

fn check_params(params: &ObjectNode) -> Result<(), String> {
    for (name, node) in &params.properties {
        let ok = match node {
            SchemaNode::Array(a) => a.items.is_param_primitive(),
            other => other.is_param_primitive(),
        };
        if !ok {
            return Err(format!(
                "parameter {name} has unsupported type {}",
                node.type_name()
            ));
        }
    }
    Ok(())
}

fn qualify_definition(doc_id: &str, def: &mut Definition) {
    let mut qualify = |r: &mut String| *r = qualify_ref(doc_id, r);
    match def {
        Definition::Node(node) => node.for_each_ref_mut(&mut qualify),
        Definition::Record(rec) => rec.record.for_each_ref_mut(&mut qualify),
        Definition::Method(m) => {
            for node in m.nodes_mut() {
                node.for_each_ref_mut(&mut qualify);
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Disk
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Loads one lexicon file.
pub fn load_file(path: &Path) -> Result<Document, SchemaLoadError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| SchemaLoadError::Io(format!("{}: {e}", path.display())))?;
    parse_document(&text, &path.display().to_string())
}

/// Loads a single file, or every `*.json` file under a directory tree.
///
/// Files are read in sorted path order so errors are reproducible.
pub fn scan_documents(path: &Path) -> Result<Vec<Document>, SchemaLoadError> {
    if path.is_file() {
        return Ok(vec![load_file(path)?]);
    }
    if !path.is_dir() {
        return Err(SchemaLoadError::Io(format!(
            "{}: no such file or directory",
            path.display()
        )));
    }

    let mut files = Vec::new();
    collect_json_files(path, &mut files)?;
    files.sort();

    let mut docs = Vec::with_capacity(files.len());
    for file in &files {
        tracing::debug!(path = %file.display(), "loading lexicon");
        docs.push(load_file(file)?);
    }
    Ok(docs)
}

fn collect_json_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), SchemaLoadError> {
    let io = |e: std::io::Error| SchemaLoadError::Io(format!("{}: {e}", dir.display()));
    for entry in std::fs::read_dir(dir).map_err(io)? {
        let path = entry.map_err(io)?.path();
        if path.is_dir() {
            collect_json_files(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "json") {
            out.push(path);
        }
    }
    Ok(())
}
