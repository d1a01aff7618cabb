//! Runtime object graph: the typed tree the engines walk and build.
//!
//! Eine Tagged Union (`Value`) statt untypisierter Referenzen: Blätter sind
//! Strings, Byte-Folgen und Booleans; innere Knoten sind gebundene Objekte
//! mit Member-Slots in Deklarationsreihenfolge. Wohlgeformte Graphen sind
//! Bäume; Zyklen sind nicht darstellbar.

use std::rc::Rc;

use crate::schema::{CodePageField, TypeId};

/// One node of the object graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// String scalar, emitted as STR_I (or OPAQUE under `opaque_strings`).
    Text(String),
    /// Byte-sequence scalar, emitted as OPAQUE.
    Opaque(Vec<u8>),
    /// Boolean presence element: `true` emits an empty element, `false` nothing.
    Flag(bool),
    /// A bound child object.
    Object(WbxmlObject),
    /// A collection member's items.
    List(Vec<Value>),
    /// A generic element carrier preserving token identity and payload.
    Any(WbxmlValue),
}

impl Value {
    /// Convenience: a text value from anything string-like.
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    /// String-Sicht, falls dieser Wert ein Text ist.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Byte-Sicht, falls dieser Wert eine Byte-Folge ist.
    pub fn as_opaque(&self) -> Option<&[u8]> {
        match self {
            Self::Opaque(b) => Some(b),
            _ => None,
        }
    }
}

/// An interior node: a bound object with one slot per declared member.
///
/// Slots sind in Deklarationsreihenfolge indiziert; `None` heißt "Member
/// nicht gesetzt".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WbxmlObject {
    type_id: TypeId,
    members: Vec<Option<Value>>,
}

impl WbxmlObject {
    /// Creates an object of `type_id` with `member_count` unset slots.
    pub fn new(type_id: TypeId, member_count: usize) -> Self {
        Self { type_id, members: vec![None; member_count] }
    }

    /// The bound type of this object.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Number of member slots.
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Sets slot `index`, replacing any previous value.
    pub fn set(&mut self, index: usize, value: Value) {
        self.members[index] = Some(value);
    }

    /// Builder-style [`set`](Self::set) for literal graph construction.
    pub fn with(mut self, index: usize, value: Value) -> Self {
        self.set(index, value);
        self
    }

    /// The value in slot `index`, if set.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.members.get(index).and_then(Option::as_ref)
    }

    /// Text in slot `index`, if set and a text.
    pub fn text(&self, index: usize) -> Option<&str> {
        self.get(index).and_then(Value::as_text)
    }

    /// Bytes in slot `index`, if set and opaque.
    pub fn bytes(&self, index: usize) -> Option<&[u8]> {
        self.get(index).and_then(Value::as_opaque)
    }

    /// Boolean presence of slot `index`. Unset reads as `false`.
    pub fn flag(&self, index: usize) -> bool {
        matches!(self.get(index), Some(Value::Flag(true)))
    }

    /// Child object in slot `index`, if set and an object.
    pub fn object(&self, index: usize) -> Option<&WbxmlObject> {
        match self.get(index) {
            Some(Value::Object(o)) => Some(o),
            _ => None,
        }
    }

    /// Items of the collection in slot `index`; empty when unset.
    pub fn list(&self, index: usize) -> &[Value] {
        match self.get(index) {
            Some(Value::List(items)) => items,
            _ => &[],
        }
    }

    /// Appends `item` to the collection in slot `index`, creating the
    /// collection lazily (mirrors the lazy instantiation on decode).
    pub fn push_item(&mut self, index: usize, item: Value) {
        match &mut self.members[index] {
            Some(Value::List(items)) => items.push(item),
            slot => *slot = Some(Value::List(vec![item])),
        }
    }

    /// Stellt sicher, dass Slot `index` eine (ggf. leere) Collection hält.
    pub fn ensure_list(&mut self, index: usize) {
        if !matches!(self.members[index], Some(Value::List(_))) {
            self.members[index] = Some(Value::List(Vec::new()));
        }
    }
}

/// Generic value carrier: an element whose identity must survive together
/// with its payload when the schema permits "any element here".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WbxmlValue {
    /// Code page the element arrived on.
    pub page: u8,
    /// Tag token of the element.
    pub token: u8,
    /// Resolved element name, when the registry knew one.
    pub name: Option<Rc<str>>,
    /// Opaque payload, once one arrived.
    pub opaque: Option<Vec<u8>>,
}

impl WbxmlValue {
    /// Carrier für das Element hinter `field`, noch ohne Payload.
    pub fn from_field(field: &CodePageField) -> Self {
        Self {
            page: field.page,
            token: field.token,
            name: field.name.clone(),
            opaque: None,
        }
    }

    /// Stores the raw payload on this carrier.
    pub fn set_opaque(&mut self, data: Vec<u8>) {
        self.opaque = Some(data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj() -> WbxmlObject {
        WbxmlObject::new(TypeId(0), 3)
    }

    #[test]
    fn slots_start_unset() {
        let o = obj();
        assert_eq!(o.member_count(), 3);
        assert!(o.get(0).is_none());
        assert!(!o.flag(1));
        assert!(o.list(2).is_empty());
    }

    #[test]
    fn set_und_typed_getter() {
        let o = obj()
            .with(0, Value::text("480"))
            .with(1, Value::Flag(true))
            .with(2, Value::Opaque(vec![1, 2, 3]));

        assert_eq!(o.text(0), Some("480"));
        assert!(o.flag(1));
        assert_eq!(o.bytes(2), Some(&[1u8, 2, 3][..]));
        assert_eq!(o.text(2), None);
    }

    /// `push_item` legt die Collection beim ersten Item an (lazy, wie der
    /// Decoder beim ersten StartElement des Members).
    #[test]
    fn push_item_erzeugt_collection_lazy() {
        let mut o = obj();
        o.push_item(2, Value::text("a"));
        o.push_item(2, Value::text("b"));

        assert_eq!(o.list(2).len(), 2);
        assert_eq!(o.list(2)[1].as_text(), Some("b"));
    }

    #[test]
    fn ensure_list_ueberschreibt_nicht() {
        let mut o = obj();
        o.push_item(0, Value::text("x"));
        o.ensure_list(0);
        assert_eq!(o.list(0).len(), 1);
    }

    #[test]
    fn wbxml_value_carrier() {
        let field = CodePageField {
            page: 2,
            token: 0x0D,
            name: Some(Rc::from("ApplicationData")),
            model_class: None,
        };
        let mut carrier = WbxmlValue::from_field(&field);
        assert_eq!(carrier.token, 0x0D);
        assert!(carrier.opaque.is_none());

        carrier.set_opaque(vec![0x03, 0x01]);
        assert_eq!(carrier.opaque.as_deref(), Some(&[0x03, 0x01][..]));
    }
}
