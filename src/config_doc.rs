//! XML configuration document.
//!
//! The document mirrors the object tree below the server root:
//!
//! ```xml
//! <Decoders>
//!   <Decoder>
//!     <SystemName>east</SystemName>
//!     <URI>dec-east</URI>
//!     <MAC>02:00:00:00:00:01</MAC>
//!     <AdminState>ENABLE</AdminState>
//!     <SatelliteLink>
//!       <SystemName>link0</SystemName>
//!       <Link>0</Link>
//!       <Satellite>
//!         <SystemName>sat3</SystemName>
//!         <Address>3</Address>
//!       </Satellite>
//!     </SatelliteLink>
//!   </Decoder>
//! </Decoders>
//! ```
//!
//! Elements named after an object kind open a child object; any other
//! element is a field of the enclosing object. Loading a document is one
//! transaction on the server root: objects are matched by system name and
//! created when missing, and any error aborts the whole load.
//!
//! The same element layout is published to a decoder on `configResp`,
//! rendered from committed values.

use std::collections::BTreeSet;

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::info;

use crate::error::ConfigError;
use crate::mo::{fields, MoKind, ObjectId};
use crate::schema::Presence;
use crate::tree::ObjectTree;

/// Root element of a configuration document.
pub const ROOT_ELEMENT: &str = "Decoders";

/// One object element of a parsed document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DocNode {
    /// Object kind.
    pub kind: MoKind,
    /// Field elements in document order.
    pub fields: Vec<(String, String)>,
    /// Nested object elements.
    pub children: Vec<DocNode>,
}

impl DocNode {
    fn new(kind: MoKind) -> Self {
        Self {
            kind,
            fields: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Text of a field element, if present.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

fn element_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

fn malformed(reason: impl Into<String>) -> ConfigError {
    ConfigError::Malformed(reason.into())
}

/// Parses a document into its decoder elements.
///
/// Only structure is checked here; field names and values are checked
/// when the document is applied.
pub fn parse(xml: &str) -> Result<Vec<DocNode>, ConfigError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut root = RootState::Missing;
    let mut stack: Vec<DocNode> = Vec::new();
    let mut field: Option<(String, String)> = None;
    let mut decoders = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = element_name(&e);
                if root.enter(&name)? {
                    continue;
                }
                if let Some((owner, _)) = &field {
                    return Err(malformed(format!("<{}> nested in field <{}>", name, owner)));
                }
                match MoKind::from_element(&name) {
                    Some(kind) => {
                        check_containment(&stack, kind)?;
                        stack.push(DocNode::new(kind));
                    }
                    None if stack.is_empty() => {
                        return Err(malformed(format!("unexpected <{}> in <{}>", name, ROOT_ELEMENT)));
                    }
                    None => field = Some((name, String::new())),
                }
            }
            Ok(Event::Empty(e)) => {
                let name = element_name(&e);
                if root.enter(&name)? {
                    root = RootState::Closed;
                    continue;
                }
                match MoKind::from_element(&name) {
                    Some(kind) => {
                        check_containment(&stack, kind)?;
                        attach(&mut stack, &mut decoders, DocNode::new(kind));
                    }
                    None => match stack.last_mut() {
                        Some(node) => node.fields.push((name, String::new())),
                        None => {
                            return Err(malformed(format!(
                                "unexpected <{}> in <{}>",
                                name, ROOT_ELEMENT
                            )))
                        }
                    },
                }
            }
            Ok(Event::Text(t)) => {
                let text = t.unescape().map_err(|e| malformed(e.to_string()))?;
                match field.as_mut() {
                    Some((_, value)) if root == RootState::Open => value.push_str(&text),
                    _ => return Err(malformed(format!("stray text {:?}", text))),
                }
            }
            Ok(Event::End(_)) => {
                if let Some(done) = field.take() {
                    if let Some(node) = stack.last_mut() {
                        node.fields.push(done);
                    }
                } else if let Some(node) = stack.pop() {
                    attach(&mut stack, &mut decoders, node);
                } else {
                    root = RootState::Closed;
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(malformed(e.to_string())),
            Ok(_) => {}
        }
    }

    match root {
        RootState::Missing => Err(malformed(format!("missing <{}>", ROOT_ELEMENT))),
        RootState::Open => Err(malformed(format!("unterminated <{}>", ROOT_ELEMENT))),
        RootState::Closed => Ok(decoders),
    }
}

/// Progress through the document root.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RootState {
    Missing,
    Open,
    Closed,
}

impl RootState {
    /// Accounts for an opening tag; `true` when it was the root itself.
    fn enter(&mut self, name: &str) -> Result<bool, ConfigError> {
        match self {
            Self::Missing if name == ROOT_ELEMENT => {
                *self = Self::Open;
                Ok(true)
            }
            Self::Missing => Err(malformed(format!("unexpected root <{}>", name))),
            Self::Open => Ok(false),
            Self::Closed => Err(malformed(format!("<{}> after </{}>", name, ROOT_ELEMENT))),
        }
    }
}

fn check_containment(stack: &[DocNode], kind: MoKind) -> Result<(), ConfigError> {
    let parent = stack.last().map(|n| n.kind).unwrap_or(MoKind::Server);
    if parent.allows_child(kind) {
        Ok(())
    } else {
        Err(ConfigError::ChildNotAllowed {
            parent,
            child: kind,
        })
    }
}

fn attach(stack: &mut [DocNode], decoders: &mut Vec<DocNode>, node: DocNode) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => decoders.push(node),
    }
}

// ============================================================================
// Loading
// ============================================================================

/// Parses a document and applies it as one transaction on the server root.
///
/// Returns the ids of the top-level decoders in document order.
pub fn apply_document(tree: &mut ObjectTree, xml: &str) -> Result<Vec<ObjectId>, ConfigError> {
    let decoders = parse(xml)?;
    tree.start_update(ObjectId::ROOT)?;

    let mut ids = Vec::with_capacity(decoders.len());
    let mut staged = BTreeSet::new();
    for doc in &decoders {
        match stage(tree, ObjectId::ROOT, doc, &mut staged) {
            Ok(id) => ids.push(id),
            Err(e) => {
                tree.abort_update(ObjectId::ROOT)?;
                return Err(e);
            }
        }
    }
    tree.commit_update(ObjectId::ROOT)?;
    info!(decoders = ids.len(), "configuration document applied");
    Ok(ids)
}

/// Stages one element and its children.
///
/// `staged` holds every object this document already named; a second
/// sibling element with the same system name is a collision, not an update.
fn stage(
    tree: &mut ObjectTree,
    parent: ObjectId,
    doc: &DocNode,
    staged: &mut BTreeSet<ObjectId>,
) -> Result<ObjectId, ConfigError> {
    let missing = |field: &str| ConfigError::MissingField {
        element: doc.kind.element().to_string(),
        field: field.to_string(),
    };
    let name = doc
        .field(fields::SYSTEM_NAME)
        .ok_or_else(|| missing(fields::SYSTEM_NAME))?;
    let (id, _) = tree.get_or_create_child(parent, doc.kind, name)?;
    if !staged.insert(id) {
        return Err(ConfigError::SystemNameAlreadyInUse(name.to_string()));
    }

    let schema = tree.get(id)?.schema();
    for (spec, _) in schema.fields() {
        if spec.presence == Presence::Mandatory && doc.field(spec.name).is_none() {
            return Err(missing(spec.name));
        }
    }
    for (field, _) in &doc.fields {
        let internal = schema
            .fields()
            .any(|(spec, _)| spec.name == field && spec.presence == Presence::Internal);
        if internal || !schema.contains(field) {
            return Err(ConfigError::NoSuchAttribute(field.clone()));
        }
    }

    for (field, value) in &doc.fields {
        tree.set_attr_text(id, field, value)?;
    }
    for child in &doc.children {
        stage(tree, id, child, staged)?;
    }
    Ok(id)
}

// ============================================================================
// Rendering
// ============================================================================

/// Renders the committed subtree of an object.
pub fn render_object(tree: &ObjectTree, id: ObjectId) -> Result<String, ConfigError> {
    let mut out = String::new();
    write_object(tree, id, &mut out)?;
    Ok(out)
}

/// Renders every committed decoder as a full document.
pub fn render_document(tree: &ObjectTree) -> Result<String, ConfigError> {
    let mut out = format!("<{}>", ROOT_ELEMENT);
    for decoder in tree.get(ObjectId::ROOT)?.committed_children() {
        write_object(tree, decoder, &mut out)?;
    }
    out.push_str(&format!("</{}>", ROOT_ELEMENT));
    Ok(out)
}

fn write_object(tree: &ObjectTree, id: ObjectId, out: &mut String) -> Result<(), ConfigError> {
    let node = tree.get(id)?;
    let element = node.kind().element();
    out.push_str(&format!("<{}>", element));
    for (spec, attr) in node.schema().fields() {
        if spec.presence == Presence::Internal {
            continue;
        }
        if let Some(value) = attr.committed_text() {
            out.push_str(&format!("<{0}>{1}</{0}>", spec.name, escape(value.as_str())));
        }
    }
    for child in node.committed_children() {
        write_object(tree, child, out)?;
    }
    out.push_str(&format!("</{}>", element));
    Ok(())
}
