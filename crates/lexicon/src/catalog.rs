//! The loaded set of lexicons and the reference resolver.
//!
//! A [`Catalog`] is built once from a batch of documents through
//! [`CatalogBuilder`].  The batch is checked as a whole (unknown references,
//! reference cycles, duplicate or colliding method identifiers) and either
//! every document is accepted or none is.  After that the catalog is
//! read-only apart from its write-once resolution cache.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use xr_domain::nsid::fold;
use xr_domain::trace::TraceEvent;
use xr_domain::SchemaLoadError;

use crate::loader::{self, def_id, Document};
use crate::model::{Definition, MethodDef, SchemaNode};

/// A reference followed to its concrete (non-`ref`) definition.
#[derive(Debug)]
pub struct Resolved {
    /// Qualified id of the definition the chain ended at.
    pub id: String,
    pub def: Arc<Definition>,
}

#[derive(Debug, Default)]
pub struct Catalog {
    defs: HashMap<String, Arc<Definition>>,
    documents: Vec<String>,
    resolved: RwLock<HashMap<String, Arc<Resolved>>>,
}

impl Catalog {
    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::default()
    }

    /// A catalog holding only the bundled session lexicons.
    pub fn bundled() -> Result<Self, SchemaLoadError> {
        Self::builder().with_bundled().build()
    }

    /// Looks up definition `def_name` of document `nsid`.
    pub fn resolve(&self, nsid: &str, def_name: &str) -> Result<Arc<Definition>, SchemaLoadError> {
        let id = def_id(nsid, def_name);
        self.defs
            .get(&id)
            .cloned()
            .ok_or_else(|| SchemaLoadError::UnknownReference {
                reference: id,
                context: "resolve".into(),
            })
    }

    /// Looks up a definition by qualified id.
    pub fn get(&self, id: &str) -> Option<&Arc<Definition>> {
        self.defs.get(id)
    }

    /// The method defined as `main` of `nsid`, if any.
    pub fn method(&self, nsid: &str) -> Option<&MethodDef> {
        self.defs.get(nsid).and_then(|d| d.as_method())
    }

    /// All method definitions, sorted by NSID.
    pub fn methods(&self) -> Vec<&MethodDef> {
        let mut methods: Vec<&MethodDef> =
            self.defs.values().filter_map(|d| d.as_method()).collect();
        methods.sort_by(|a, b| a.nsid.cmp(&b.nsid));
        methods
    }

    /// Ids of the loaded documents, in load order.
    pub fn documents(&self) -> &[String] {
        &self.documents
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    /// Follows a qualified reference through any chain of `ref`
    /// definitions.  Results are cached; concurrent first resolutions of the
    /// same reference produce the same entry.
    pub fn resolve_ref(&self, reference: &str) -> Result<Arc<Resolved>, SchemaLoadError> {
        if let Some(hit) = self.resolved.read().get(reference) {
            return Ok(hit.clone());
        }

        let mut chain = vec![reference.to_string()];
        let mut seen = HashSet::from([reference.to_string()]);
        let mut current = reference.to_string();
        let def = loop {
            let def = self
                .defs
                .get(&current)
                .ok_or_else(|| SchemaLoadError::UnknownReference {
                    reference: current.clone(),
                    context: reference.to_string(),
                })?;
            match def.as_ref() {
                Definition::Node(SchemaNode::Ref(next)) => {
                    chain.push(next.target.clone());
                    if !seen.insert(next.target.clone()) {
                        return Err(SchemaLoadError::CyclicReference { chain });
                    }
                    current = next.target.clone();
                }
                _ => break def.clone(),
            }
        };

        let resolved = Arc::new(Resolved { id: current, def });
        let mut cache = self.resolved.write();
        Ok(cache
            .entry(reference.to_string())
            .or_insert(resolved)
            .clone())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Builder
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Collects documents, then checks and freezes them into a [`Catalog`].
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    docs: Vec<Document>,
    errors: Vec<SchemaLoadError>,
}

impl CatalogBuilder {
    pub fn document(mut self, doc: Document) -> Self {
        self.docs.push(doc);
        self
    }

    pub fn documents(mut self, docs: impl IntoIterator<Item = Document>) -> Self {
        self.docs.extend(docs);
        self
    }

    /// Parses `value` as a lexicon document.  Parse errors are reported by
    /// [`build`](Self::build).
    pub fn json(mut self, value: serde_json::Value) -> Self {
        let origin = value
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or("<inline>")
            .to_string();
        match loader::parse_document_value(value, &origin) {
            Ok(doc) => self.docs.push(doc),
            Err(e) => self.errors.push(e),
        }
        self
    }

    /// Loads a lexicon file, or every `*.json` file under a directory.
    pub fn load_path(mut self, path: impl AsRef<Path>) -> Self {
        match loader::scan_documents(path.as_ref()) {
            Ok(docs) => self.docs.extend(docs),
            Err(e) => self.errors.push(e),
        }
        self
    }

    /// Adds the lexicons shipped with this crate (session create/refresh).
    pub fn with_bundled(mut self) -> Self {
        for (origin, text) in crate::bundled::DOCUMENTS {
            match loader::parse_document(text, origin) {
                Ok(doc) => {
                    if !self.docs.iter().any(|d| d.id == doc.id) {
                        self.docs.push(doc);
                    }
                }
                Err(e) => self.errors.push(e),
            }
        }
        self
    }

    pub fn build(self) -> Result<Catalog, SchemaLoadError> {
        if let Some(err) = self.errors.into_iter().next() {
            return Err(err);
        }

        let mut defs: HashMap<String, Arc<Definition>> = HashMap::new();
        let mut documents: Vec<String> = Vec::with_capacity(self.docs.len());
        for doc in self.docs {
            if documents.iter().any(|d| d == doc.id.as_str()) {
                return Err(SchemaLoadError::ConflictingDefinition {
                    id: doc.id.to_string(),
                    reason: "defined by more than one document".into(),
                });
            }
            documents.push(doc.id.to_string());
            for (id, def) in doc.defs {
                defs.insert(id, Arc::new(def));
            }
        }

        check_folded_methods(&defs)?;
        check_references(&defs)?;
        check_cycles(&defs)?;

        let catalog = Catalog {
            documents,
            defs,
            resolved: RwLock::new(HashMap::new()),
        };
        TraceEvent::LexiconsLoaded {
            documents: catalog.documents.len(),
            definitions: catalog.defs.len(),
            methods: catalog.defs.values().filter(|d| d.as_method().is_some()).count(),
        }
        .emit();
        Ok(catalog)
    }
}

fn check_folded_methods(defs: &HashMap<String, Arc<Definition>>) -> Result<(), SchemaLoadError> {
    let mut folded: BTreeMap<String, &str> = BTreeMap::new();
    let mut ids: Vec<&String> = defs
        .iter()
        .filter(|(_, d)| d.as_method().is_some())
        .map(|(id, _)| id)
        .collect();
    ids.sort();
    for id in ids {
        if let Some(other) = folded.insert(fold(id), id.as_str()) {
            return Err(SchemaLoadError::ConflictingDefinition {
                id: id.clone(),
                reason: format!("folds to the same name as {other}"),
            });
        }
    }
    Ok(())
}

fn node_refs(node: &SchemaNode, out: &mut Vec<String>) {
    let mut node = node.clone();
    node.for_each_ref_mut(&mut |r| out.push(r.clone()));
}

fn definition_refs(def: &Definition) -> Vec<String> {
    let mut out = Vec::new();
    match def {
        Definition::Node(node) => node_refs(node, &mut out),
        Definition::Record(rec) => node_refs(&rec.record, &mut out),
        Definition::Method(m) => {
            let mut m = m.clone();
            for node in m.nodes_mut() {
                node.for_each_ref_mut(&mut |r| out.push(r.clone()));
            }
        }
    }
    out
}

fn check_references(defs: &HashMap<String, Arc<Definition>>) -> Result<(), SchemaLoadError> {
    let mut ids: Vec<&String> = defs.keys().collect();
    ids.sort();
    for id in ids {
        for reference in definition_refs(&defs[id]) {
            match defs.get(&reference).map(|d| d.as_ref()) {
                None => {
                    return Err(SchemaLoadError::UnknownReference {
                        reference,
                        context: id.clone(),
                    })
                }
                Some(Definition::Method(_)) => {
                    return Err(SchemaLoadError::Malformed {
                        document: id.clone(),
                        message: format!("{reference} is a method and cannot be referenced"),
                    })
                }
                Some(_) => {}
            }
        }
    }
    Ok(())
}

/// Edges between definitions that do not pass through any structure: a
/// `ref` definition points at its target, a `union` definition at each
/// variant.  A loop among these could never consume any input.
fn transparent_edges(def: &Definition) -> Vec<&str> {
    match def {
        Definition::Node(SchemaNode::Ref(r)) => vec![r.target.as_str()],
        Definition::Node(SchemaNode::Union(u)) => u.refs.iter().map(String::as_str).collect(),
        _ => Vec::new(),
    }
}

fn check_cycles(defs: &HashMap<String, Arc<Definition>>) -> Result<(), SchemaLoadError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit<'a>(
        id: &'a str,
        defs: &'a HashMap<String, Arc<Definition>>,
        marks: &mut HashMap<&'a str, Mark>,
        stack: &mut Vec<&'a str>,
    ) -> Result<(), SchemaLoadError> {
        match marks.get(id) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let start = stack.iter().position(|s| *s == id).unwrap_or(0);
                let mut chain: Vec<String> = stack[start..].iter().map(|s| s.to_string()).collect();
                chain.push(id.to_string());
                return Err(SchemaLoadError::CyclicReference { chain });
            }
            None => {}
        }
        let Some(def) = defs.get(id) else {
            return Ok(());
        };
        marks.insert(id, Mark::Visiting);
        stack.push(id);
        for next in transparent_edges(def) {
            visit(next, defs, marks, stack)?;
        }
        stack.pop();
        marks.insert(id, Mark::Done);
        Ok(())
    }

    let mut marks = HashMap::new();
    let mut ids: Vec<&String> = defs.keys().collect();
    ids.sort();
    for id in ids {
        let mut stack = Vec::new();
        visit(id, defs, &mut marks, &mut stack)?;
    }
    Ok(())
}
