//! The marshalling and unmarshalling engines.
//!
//! [`marshal`] läuft rekursiv über den Objektgraphen, konsultiert die
//! Registry und treibt die Byte-Primitive; [`unmarshal`] konsumiert den
//! Event-Strom des Decoders und materialisiert den Graphen über den
//! Parse-Stack. Beide Engines sind pro Aufruf strikt sequentiell; geteilt
//! wird nur die unveränderliche [`SchemaRegistry`].
//!
//! # Beispiel
//!
//! ```
//! use wbxmlr::context::WbxmlContext;
//! use wbxmlr::marshal::{marshal, unmarshal};
//! use wbxmlr::page::CodePage;
//! use wbxmlr::schema::{MemberBinding, SchemaBuilder};
//! use wbxmlr::value::{Value, WbxmlObject};
//!
//! let mut builder = SchemaBuilder::new();
//! let ping = builder.bind("Ping", CodePage::new(13, 1), 0x05);
//! builder.members(ping, vec![MemberBinding::text("HeartbeatInterval", 0x0A)]);
//! let registry = builder.build().unwrap();
//!
//! let request = WbxmlObject::new(ping, 1).with(0, Value::text("480"));
//!
//! let mut cntx = WbxmlContext::new();
//! let mut wire = Vec::new();
//! marshal(&registry, &mut cntx, &mut wire, &request, &[]).unwrap();
//!
//! let decoded = unmarshal(&registry, &mut cntx, &wire[..], ping).unwrap();
//! assert_eq!(decoded, request);
//! ```

mod stack;

use std::io::{Read, Write};
use std::rc::Rc;

use log::{debug, warn};

use crate::constants::{CHARSET_UTF8, WBXML_VERSION_1_3};
use crate::context::WbxmlContext;
use crate::decoder::{is_document, WbxmlDecoder, WbxmlEvent};
use crate::encoder;
use crate::page::CodePage;
use crate::schema::{
    Binding, CodePageField, CodePageFinder, ItemKind, MemberBinding, MemberKind, SchemaRegistry,
    TypeId,
};
use crate::value::{Value, WbxmlObject, WbxmlValue};
use crate::{Error, Result};

use stack::{find_member, Attach, Frame, ParseStack};

// ============================================================================
// Marshalling
// ============================================================================

/// Marshals `root` as a WBXML document into `sink`.
///
/// The root's type must be bound; its page is announced with a leading
/// `SWITCH_PAGE` and its element token opens the document. Members are
/// emitted in declaration order, honouring the caller's `filters`
/// (permissive on empty).
pub fn marshal<W: Write>(
    registry: &SchemaRegistry,
    cntx: &mut WbxmlContext,
    sink: &mut W,
    root: &WbxmlObject,
    filters: &[&str],
) -> Result<()> {
    cntx.reset();

    let binding = binding_of(registry, root.type_id())?;
    debug!("marshal root type = {}", binding.name);

    write_preamble(cntx, sink, binding)?;

    cntx.pages().switch_if_needed(binding.page, sink)?;
    encoder::push_element(sink, binding.token, true)?;

    let mut path = vec![binding.name.clone()];
    marshal_members(registry, cntx, sink, root, filters, &mut path)?;

    encoder::pop_element(sink)?;
    cntx.pages().switch_back(sink)?;
    encoder::finalize(sink)
}

/// Writes the preamble (§5.3–§5.7): version, public id, charset, empty
/// string table. Unset context values fall back with a warning.
fn write_preamble<W: Write>(cntx: &WbxmlContext, sink: &mut W, binding: &Binding) -> Result<()> {
    let mut version = cntx.version();
    if version == 0 {
        warn!("no WBXML version in context, defaulting to 1.3");
        version = WBXML_VERSION_1_3;
    }

    let public_id = binding.page.public_id;
    if public_id == 0 {
        warn!("unknown public id for document, recipient may reject");
    }

    let mut encoding = cntx.encoding();
    if encoding == 0 {
        warn!("unspecified document encoding, falling back to UTF-8");
        encoding = CHARSET_UTF8;
    }

    encoder::write_version(sink, version)?;
    encoder::write_public_id(sink, public_id)?;
    encoder::write_encoding(sink, encoding)?;
    encoder::write_string_table(sink, 0)
}

/// Emits all members of `obj` in declaration order, switching to the
/// object's page (and back) when it differs from the active one.
fn marshal_members<W: Write>(
    registry: &SchemaRegistry,
    cntx: &mut WbxmlContext,
    sink: &mut W,
    obj: &WbxmlObject,
    filters: &[&str],
    path: &mut Vec<Rc<str>>,
) -> Result<()> {
    let binding = binding_of(registry, obj.type_id())?;

    let switched = match cntx.pages_ref().peek() {
        None => return Err(Error::PageMissing),
        Some(current) if current.index != binding.page.index => {
            cntx.pages().switch_if_needed(binding.page, sink)?
        }
        _ => false,
    };

    for (index, member) in binding.members.iter().enumerate() {
        marshal_member(registry, cntx, sink, obj, index, member, filters, path)?;
    }

    if switched {
        cntx.pages().switch_back(sink)?;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn marshal_member<W: Write>(
    registry: &SchemaRegistry,
    cntx: &mut WbxmlContext,
    sink: &mut W,
    obj: &WbxmlObject,
    index: usize,
    member: &MemberBinding,
    filters: &[&str],
    path: &mut Vec<Rc<str>>,
) -> Result<()> {
    let Some(value) = obj.get(index) else {
        if member.required {
            return Err(Error::RequiredMissing {
                member: member.name.to_string().into(),
                path: breadcrumb(path),
            });
        }
        return Ok(());
    };

    if !member.matches_filter(filters) {
        debug!("member {} filtered out", member.name);
        return Ok(());
    }

    if member.is_ghost() {
        debug!("ghost member {}", member.name);
    }

    path.push(member.name.clone());
    let result = marshal_value(registry, cntx, sink, member, value, filters, path);
    path.pop();
    result
}

fn marshal_value<W: Write>(
    registry: &SchemaRegistry,
    cntx: &mut WbxmlContext,
    sink: &mut W,
    member: &MemberBinding,
    value: &Value,
    filters: &[&str],
    path: &mut Vec<Rc<str>>,
) -> Result<()> {
    let ghost = member.is_ghost();

    match value {
        Value::List(items) => {
            if member.required && items.is_empty() {
                return Err(Error::RequiredMissing {
                    member: member.name.to_string().into(),
                    path: breadcrumb(path),
                });
            }

            let item_token = match member.kind {
                MemberKind::List { item_token, .. } => item_token,
                _ => None,
            };

            if !ghost {
                encoder::push_element(sink, member_token(member)?, true)?;
            }
            for item in items {
                match item {
                    Value::Object(child) => {
                        if ghost {
                            marshal_bracketed(registry, cntx, sink, child, filters, path)?;
                        } else {
                            marshal_members(registry, cntx, sink, child, filters, path)?;
                        }
                    }
                    Value::Text(s) => {
                        if ghost {
                            let token = item_token.ok_or_else(|| {
                                Error::malformed(format!(
                                    "ghost list '{}' has no item wrapper token",
                                    member.name
                                ))
                            })?;
                            encoder::push_element(sink, token, true)?;
                            emit_string(cntx, sink, s)?;
                            encoder::pop_element(sink)?;
                        } else {
                            emit_string(cntx, sink, s)?;
                        }
                    }
                    Value::Opaque(bytes) => {
                        if let (true, Some(token)) = (ghost, item_token) {
                            encoder::push_opaque(sink, token, bytes)?;
                        } else {
                            encoder::opaque(sink, bytes)?;
                        }
                    }
                    Value::Any(carrier) => {
                        marshal_carrier(cntx, sink, carrier, ghost)?;
                    }
                    Value::Flag(_) | Value::List(_) => {
                        return Err(Error::schema_missing(format!(
                            "collection item of '{}' has no wire form",
                            member.name
                        )));
                    }
                }
            }
            if !ghost {
                encoder::pop_element(sink)?;
            }
        }

        Value::Opaque(bytes) => {
            encoder::push_opaque(sink, member_token(member)?, bytes)?;
        }

        // Präsenz-Element: true = leeres Element, false emittiert nichts.
        Value::Flag(true) => encoder::push_element(sink, member_token(member)?, false)?,
        Value::Flag(false) => {}

        Value::Object(child) => {
            if ghost {
                marshal_bracketed(registry, cntx, sink, child, filters, path)?;
            } else {
                let child_binding = binding_of(registry, child.type_id())?;
                // Der Switch steht VOR dem öffnenden Token, damit der
                // Decoder es im selben Page-Rahmen liest.
                let switched = match cntx.pages_ref().peek() {
                    None => return Err(Error::PageMissing),
                    Some(current) if current.index != child_binding.page.index => {
                        cntx.pages().switch_if_needed(child_binding.page, sink)?
                    }
                    _ => false,
                };
                encoder::push_element(sink, member_token(member)?, true)?;
                marshal_members(registry, cntx, sink, child, filters, path)?;
                encoder::pop_element(sink)?;
                if switched {
                    cntx.pages().switch_back(sink)?;
                }
            }
        }

        Value::Text(s) => {
            if !ghost {
                encoder::push_element(sink, member_token(member)?, true)?;
            }
            emit_string(cntx, sink, s)?;
            if !ghost {
                encoder::pop_element(sink)?;
            }
        }

        Value::Any(carrier) => {
            if !ghost {
                encoder::push_element(sink, member_token(member)?, true)?;
            }
            if let Some(bytes) = &carrier.opaque {
                encoder::opaque(sink, bytes)?;
            }
            if !ghost {
                encoder::pop_element(sink)?;
            }
        }
    }

    Ok(())
}

/// Emits `obj` inside its own root bracket (ghost members and ghost
/// collection items announce the child's element themselves).
fn marshal_bracketed<W: Write>(
    registry: &SchemaRegistry,
    cntx: &mut WbxmlContext,
    sink: &mut W,
    obj: &WbxmlObject,
    filters: &[&str],
    path: &mut Vec<Rc<str>>,
) -> Result<()> {
    let binding = binding_of(registry, obj.type_id())?;

    let switched = match cntx.pages_ref().peek() {
        None => return Err(Error::PageMissing),
        Some(current) if current.index != binding.page.index => {
            cntx.pages().switch_if_needed(binding.page, sink)?
        }
        _ => false,
    };

    encoder::push_element(sink, binding.token, true)?;
    marshal_members(registry, cntx, sink, obj, filters, path)?;
    encoder::pop_element(sink)?;

    if switched {
        cntx.pages().switch_back(sink)?;
    }
    Ok(())
}

/// Re-emits a captured carrier: own bracket (ghost) around the stored
/// payload, switching pages when the carrier came from another one.
fn marshal_carrier<W: Write>(
    cntx: &mut WbxmlContext,
    sink: &mut W,
    carrier: &WbxmlValue,
    ghost: bool,
) -> Result<()> {
    if ghost {
        let switched = match cntx.pages_ref().peek() {
            None => return Err(Error::PageMissing),
            Some(current) if current.index != carrier.page => cntx
                .pages()
                .switch_if_needed(CodePage::new(carrier.page, current.public_id), sink)?,
            _ => false,
        };
        encoder::push_element(sink, carrier.token, true)?;
        if let Some(bytes) = &carrier.opaque {
            encoder::opaque(sink, bytes)?;
        }
        encoder::pop_element(sink)?;
        if switched {
            cntx.pages().switch_back(sink)?;
        }
    } else if let Some(bytes) = &carrier.opaque {
        encoder::opaque(sink, bytes)?;
    }
    Ok(())
}

fn emit_string<W: Write>(cntx: &WbxmlContext, sink: &mut W, s: &str) -> Result<()> {
    if cntx.opaque_strings() {
        encoder::opaque(sink, s.as_bytes())
    } else {
        encoder::inline_string(sink, s)
    }
}

fn member_token(member: &MemberBinding) -> Result<u8> {
    member.token.ok_or_else(|| {
        Error::malformed(format!("ghost member '{}' cannot open its own bracket", member.name))
    })
}

fn binding_of(registry: &SchemaRegistry, ty: TypeId) -> Result<&Binding> {
    registry
        .binding(ty)
        .ok_or_else(|| Error::schema_missing(format!("type #{}", ty.0)))
}

fn breadcrumb(path: &[Rc<str>]) -> String {
    if path.is_empty() {
        "<root>".to_string()
    } else {
        path.join("/")
    }
}

// ============================================================================
// Unmarshalling
// ============================================================================

/// Unmarshals one WBXML document from `source` into a fresh object of
/// `target`.
///
/// The first start element is the root bracket and consumed without a new
/// parse-stack frame; every later element must resolve to a member or the
/// call fails with [`Error::UnmappedElement`].
pub fn unmarshal<R: Read>(
    registry: &SchemaRegistry,
    cntx: &mut WbxmlContext,
    source: R,
    target: TypeId,
) -> Result<WbxmlObject> {
    cntx.reset();

    let binding = binding_of(registry, target)?;
    let root = WbxmlObject::new(target, binding.members.len());
    let mut stack = ParseStack::new(root);
    let mut path: Vec<Rc<str>> = Vec::new();

    let mut decoder = WbxmlDecoder::new(source, Some(registry as &dyn CodePageFinder));
    let mut root_seen = false;

    while let Some(event) = decoder.next()? {
        if cntx.capture_xml() {
            capture_xml(cntx, &event);
        }
        match event {
            WbxmlEvent::StartElement { field, .. } => {
                if root_seen {
                    do_start_element(registry, &mut stack, &field, &path)?;
                } else {
                    root_seen = true;
                }
                path.push(Rc::from(field.display_name()));
            }
            WbxmlEvent::Text { field, text } => do_text(registry, &mut stack, &field, text),
            WbxmlEvent::Opaque { field, data } => {
                do_opaque(registry, &mut stack, &field, data, &path)?;
            }
            WbxmlEvent::EndElement { .. } => {
                // Das Wurzel-END schließt den Boden-Frame, der nie gepoppt
                // wird; der Stack bleibt durchgehend nicht-leer.
                if stack.len() > 1 {
                    stack.pop_and_attach();
                }
                path.pop();
            }
        }
    }

    Ok(stack.into_root())
}

/// Spiegelt ein Event in den XML-Trace (nur Diagnose).
fn capture_xml(cntx: &mut WbxmlContext, event: &WbxmlEvent) {
    use base64::Engine;
    match event {
        WbxmlEvent::StartElement { field, .. } => {
            cntx.trace("<");
            cntx.trace(&field.display_name());
            cntx.trace(">");
        }
        WbxmlEvent::Text { text, .. } => cntx.trace(text),
        WbxmlEvent::Opaque { data, .. } => {
            cntx.trace(&base64::engine::general_purpose::STANDARD.encode(data));
        }
        WbxmlEvent::EndElement { field } => {
            cntx.trace("</");
            cntx.trace(&field.display_name());
            cntx.trace(">");
        }
    }
}

fn do_start_element(
    registry: &SchemaRegistry,
    stack: &mut ParseStack,
    field: &CodePageField,
    path: &[Rc<str>],
) -> Result<()> {
    debug!("StartElement: {}", field.display_name());

    let top_index = stack.top_index();
    let (owner, candidates): (usize, Vec<usize>) = match stack.top() {
        Frame::Object { obj, .. } => {
            let count = registry.binding(obj.type_id()).map_or(0, |b| b.members.len());
            (top_index, (0..count).collect())
        }
        Frame::Slot { owner, member } => (*owner, vec![*member]),
        Frame::ListText { .. } | Frame::Carrier { .. } | Frame::Placeholder { .. } => {
            return Err(unmapped_element(field, path));
        }
    };

    let binding = binding_of(registry, stack.object_type(owner))?;
    let Some(index) = find_member(&binding.members, &candidates, field) else {
        debug!("failed to locate a mapping for element {}", field.display_name());
        return Err(unmapped_element(field, path));
    };

    match binding.members[index].kind {
        MemberKind::Object(ty) => {
            let child_binding = binding_of(registry, ty)?;
            let child = WbxmlObject::new(ty, child_binding.members.len());
            stack.push(Frame::Object { obj: child, owner, attach: Some(Attach::Member(index)) });
        }
        MemberKind::Flag => {
            stack.object_mut(owner).set(index, Value::Flag(true));
            stack.push(Frame::Placeholder { owner });
        }
        MemberKind::List { item, .. } => {
            stack.object_mut(owner).ensure_list(index);
            match item {
                ItemKind::Text => stack.push(Frame::ListText { owner, member: index }),
                ItemKind::Value => stack.push(Frame::Carrier {
                    value: WbxmlValue::from_field(field),
                    owner,
                    attach: Attach::Item(index),
                }),
                ItemKind::Object(declared) => {
                    // Item-Typ aus der Deklaration, übersteuert durch die
                    // Model-Class des eingehenden Tokens.
                    let ty = field.model_class.unwrap_or(declared);
                    let child_binding = binding_of(registry, ty)?;
                    stack.push(Frame::Object {
                        obj: WbxmlObject::new(ty, child_binding.members.len()),
                        owner,
                        attach: Some(Attach::Item(index)),
                    });
                }
            }
        }
        MemberKind::Text | MemberKind::Bytes | MemberKind::Any | MemberKind::Value => {
            stack.push(Frame::Slot { owner, member: index });
        }
    }
    Ok(())
}

/// Text assignment is tolerant: unmapped text is logged and dropped.
fn do_text(registry: &SchemaRegistry, stack: &mut ParseStack, field: &CodePageField, text: String) {
    let top_index = stack.top_index();
    let (owner, candidates): (usize, Vec<usize>) = match stack.top() {
        Frame::ListText { owner, member } => {
            let (owner, member) = (*owner, *member);
            stack.object_mut(owner).push_item(member, Value::Text(text));
            return;
        }
        Frame::Object { obj, .. } => {
            let count = registry.binding(obj.type_id()).map_or(0, |b| b.members.len());
            (top_index, (0..count).collect())
        }
        Frame::Slot { owner, member } => (*owner, vec![*member]),
        Frame::Carrier { .. } | Frame::Placeholder { .. } => {
            debug!("ignoring text under {}", field.display_name());
            return;
        }
    };

    let Some(binding) = registry.binding(stack.object_type(owner)) else { return };
    match find_member(&binding.members, &candidates, field) {
        Some(index)
            if matches!(binding.members[index].kind, MemberKind::Text | MemberKind::Any) =>
        {
            stack.object_mut(owner).set(index, Value::Text(text));
        }
        _ => debug!("ignoring text without mapping under {}", field.display_name()),
    }
}

fn do_opaque(
    registry: &SchemaRegistry,
    stack: &mut ParseStack,
    field: &CodePageField,
    data: Vec<u8>,
    path: &[Rc<str>],
) -> Result<()> {
    let top_index = stack.top_index();
    let (owner, candidates): (usize, Vec<usize>) = match stack.top() {
        // Kein Kandidat auflösbar: der Carrier selbst nimmt die Bytes.
        Frame::Carrier { .. } => {
            if let Frame::Carrier { value, .. } = stack.top_mut() {
                value.set_opaque(data);
            }
            return Ok(());
        }
        // String-Collection: Opaque-Payload als UTF-8 anhängen.
        Frame::ListText { owner, member } => {
            let (owner, member) = (*owner, *member);
            let text = String::from_utf8_lossy(&data).into_owned();
            stack.object_mut(owner).push_item(member, Value::Text(text));
            return Ok(());
        }
        Frame::Object { obj, .. } => {
            let count = registry.binding(obj.type_id()).map_or(0, |b| b.members.len());
            (top_index, (0..count).collect())
        }
        Frame::Slot { owner, member } => (*owner, vec![*member]),
        Frame::Placeholder { .. } => {
            return Err(Error::UnmappedOpaque { path: breadcrumb(path) })
        }
    };

    let binding = binding_of(registry, stack.object_type(owner))?;
    let Some(index) = find_member(&binding.members, &candidates, field) else {
        debug!("failed to locate a mapping for opaque under {}", field.display_name());
        return Err(Error::UnmappedOpaque { path: breadcrumb(path) });
    };
    let member = &binding.members[index];

    let value = match member.kind {
        MemberKind::Text => Value::Text(String::from_utf8_lossy(&data).into_owned()),
        // Generischer Container: ein Nested Document bleibt roh, alles
        // andere wird als String übernommen.
        MemberKind::Any => {
            if is_document(&data) {
                Value::Opaque(data)
            } else {
                Value::Text(String::from_utf8_lossy(&data).into_owned())
            }
        }
        MemberKind::Bytes => Value::Opaque(data),
        MemberKind::Value => {
            let mut carrier = WbxmlValue::from_field(field);
            carrier.set_opaque(data);
            Value::Any(carrier)
        }
        MemberKind::Flag | MemberKind::Object(_) | MemberKind::List { .. } => {
            return Err(Error::UnsupportedOpaqueTarget {
                member: member.name.to_string().into(),
                path: breadcrumb(path),
            });
        }
    };

    stack.object_mut(owner).set(index, value);
    Ok(())
}

fn unmapped_element(field: &CodePageField, path: &[Rc<str>]) -> Error {
    Error::UnmappedElement { page: field.page, token: field.token, path: breadcrumb(path) }
}
