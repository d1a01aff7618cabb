//! Parse stack of the unmarshalling engine.
//!
//! Jeder offene Element-Rahmen ist ein [`Frame`]: eine Tagged Union statt
//! untypisierter Referenzen mit Casts. Frames, die einen Teilbaum im Aufbau
//! besitzen (Objekte, Carrier), hängen ihn beim Schließen der Klammer an
//! ihren Owner-Frame an; Blatt-Zuweisungen (Text, Opaque, Flags, Listen-
//! Items) schreiben direkt zum Event-Zeitpunkt in das Owner-Objekt.
//!
//! `owner` ist immer der Index eines `Object`-Frames weiter unten im Stack;
//! der Boden ist das Wurzelobjekt des Aufrufers und wird nie gepoppt.

use crate::schema::{CodePageField, ItemKind, MemberBinding, MemberKind, TypeId};
use crate::value::{Value, WbxmlObject, WbxmlValue};

/// Where a completed frame's value lands in its owner object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Attach {
    /// Scalar member slot.
    Member(usize),
    /// Appended to the collection in the member slot.
    Item(usize),
}

/// One open-element frame.
#[derive(Debug)]
pub(crate) enum Frame {
    /// A bound object under construction. `attach` is `None` only for the
    /// root frame.
    Object {
        obj: WbxmlObject,
        owner: usize,
        attach: Option<Attach>,
    },
    /// A scalar member awaiting its text/opaque payload; the value is
    /// written straight into the owner object.
    Slot { owner: usize, member: usize },
    /// One item element of a string collection; texts append to the owner's
    /// collection directly.
    ListText { owner: usize, member: usize },
    /// A generic carrier collecting its payload.
    Carrier {
        value: WbxmlValue,
        owner: usize,
        attach: Attach,
    },
    /// Boolean presence was already assigned at the start element; this
    /// frame only balances the matching end element.
    Placeholder { owner: usize },
}

/// The engine's parse stack. Non-empty throughout a decode call; the bottom
/// frame targets the caller-supplied root object.
pub(crate) struct ParseStack {
    frames: Vec<Frame>,
}

impl ParseStack {
    pub(crate) fn new(root: WbxmlObject) -> Self {
        Self { frames: vec![Frame::Object { obj: root, owner: 0, attach: None }] }
    }

    pub(crate) fn len(&self) -> usize {
        self.frames.len()
    }

    pub(crate) fn top(&self) -> &Frame {
        // Invariante: der Boden wird nie gepoppt.
        self.frames.last().expect("parse stack is never empty")
    }

    pub(crate) fn top_mut(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("parse stack is never empty")
    }

    pub(crate) fn top_index(&self) -> usize {
        self.frames.len() - 1
    }

    pub(crate) fn push(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    /// The object owned by the `Object` frame at `index`.
    ///
    /// Owner-Indizes zeigen konstruktionsbedingt immer auf `Object`-Frames.
    pub(crate) fn object_mut(&mut self, index: usize) -> &mut WbxmlObject {
        match &mut self.frames[index] {
            Frame::Object { obj, .. } => obj,
            _ => unreachable!("owner index points at a non-object frame"),
        }
    }

    /// Type of the object at `index` (for candidate lookups).
    pub(crate) fn object_type(&self, index: usize) -> TypeId {
        match &self.frames[index] {
            Frame::Object { obj, .. } => obj.type_id(),
            _ => unreachable!("owner index points at a non-object frame"),
        }
    }

    /// Pops the top frame and attaches any completed subtree to its owner.
    /// The bottom frame is never popped; callers guard against that.
    pub(crate) fn pop_and_attach(&mut self) {
        debug_assert!(self.frames.len() > 1, "attempt to pop the root frame");
        match self.frames.pop() {
            Some(Frame::Object { obj, owner, attach: Some(attach) }) => {
                self.attach(owner, attach, Value::Object(obj));
            }
            Some(Frame::Carrier { value, owner, attach }) => {
                self.attach(owner, attach, Value::Any(value));
            }
            // Blatt-Frames haben bereits zum Event-Zeitpunkt zugewiesen.
            _ => {}
        }
    }

    /// Consumes the stack and returns the root object.
    pub(crate) fn into_root(mut self) -> WbxmlObject {
        // Übrige Frames können bei toleranten Abbrüchen stehen bleiben;
        // nur der Boden trägt das Ergebnis.
        match self.frames.swap_remove(0) {
            Frame::Object { obj, .. } => obj,
            _ => unreachable!("bottom frame is always the root object"),
        }
    }

    fn attach(&mut self, owner: usize, attach: Attach, value: Value) {
        let obj = self.object_mut(owner);
        match attach {
            Attach::Member(m) => obj.set(m, value),
            Attach::Item(m) => obj.push_item(m, value),
        }
    }
}

/// Member resolution for an incoming element.
///
/// Reihenfolge:
/// 1. Token-Match gegen den Member-Token, oder den Item-Wrapper-Token
///    einer Ghost-Collection.
/// 2. Model-Class des Tokens gegen die deklarierten Klassen der Member.
/// 3. Einziger Kandidat und generisch (`Any`): der Container nimmt alles.
/// 4. Einziger Kandidat und Carrier-typisiert (`Value`).
pub(crate) fn find_member(
    members: &[MemberBinding],
    candidates: &[usize],
    cp: &CodePageField,
) -> Option<usize> {
    for &i in candidates {
        if members[i].token == Some(cp.token) {
            return Some(i);
        }
        if let MemberKind::List { item_token: Some(token), .. } = members[i].kind {
            if token == cp.token {
                return Some(i);
            }
        }
    }

    if let Some(model) = cp.model_class {
        for &i in candidates {
            if members[i].declared_class() == Some(model) {
                return Some(i);
            }
        }
    }

    if let [single] = candidates {
        let kind = members[*single].kind;
        if matches!(kind, MemberKind::Any) {
            return Some(*single);
        }
        if matches!(
            kind,
            MemberKind::Value | MemberKind::List { item: ItemKind::Value, .. }
        ) {
            return Some(*single);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    fn field(token: u8, model_class: Option<TypeId>) -> CodePageField {
        CodePageField { page: 0, token, name: Some(Rc::from("f")), model_class }
    }

    fn all(members: &[MemberBinding]) -> Vec<usize> {
        (0..members.len()).collect()
    }

    #[test]
    fn token_match_gewinnt() {
        let members = vec![
            MemberBinding::text("A", 0x05),
            MemberBinding::text("B", 0x06),
        ];
        assert_eq!(find_member(&members, &all(&members), &field(0x06, None)), Some(1));
    }

    /// Der Item-Wrapper-Token einer Ghost-Collection zählt wie ein Member-Token.
    #[test]
    fn ghost_item_wrapper_token_match() {
        let members = vec![MemberBinding::ghost_text_list("Filters", 0x12)];
        assert_eq!(find_member(&members, &all(&members), &field(0x12, None)), Some(0));
    }

    #[test]
    fn model_class_match() {
        let folder = TypeId(3);
        let members = vec![
            MemberBinding::text("SyncKey", 0x05),
            MemberBinding::ghost_list_of("Folders", folder),
        ];
        assert_eq!(find_member(&members, &all(&members), &field(0x07, Some(folder))), Some(1));
    }

    #[test]
    fn singleton_any_faengt_alles() {
        let members = vec![MemberBinding::any("Data", 0x0D)];
        assert_eq!(find_member(&members, &all(&members), &field(0x22, None)), Some(0));
    }

    #[test]
    fn singleton_value_faengt_alles() {
        let members = vec![MemberBinding::value_list("Entries", 0x0D)];
        assert_eq!(find_member(&members, &all(&members), &field(0x22, None)), Some(0));
    }

    /// Fallback 3/4 greift nur bei genau einem Kandidaten.
    #[test]
    fn kein_fallback_bei_mehreren_kandidaten() {
        let members = vec![
            MemberBinding::any("Data", 0x0D),
            MemberBinding::text("Name", 0x0E),
        ];
        assert_eq!(find_member(&members, &all(&members), &field(0x22, None)), None);
    }

    #[test]
    fn pop_and_attach_member() {
        let mut stack = ParseStack::new(WbxmlObject::new(TypeId(0), 2));
        let child = WbxmlObject::new(TypeId(1), 1);
        stack.push(Frame::Object { obj: child, owner: 0, attach: Some(Attach::Member(1)) });
        stack.pop_and_attach();

        let root = stack.into_root();
        assert!(root.object(1).is_some());
    }

    #[test]
    fn pop_and_attach_item_sammelt() {
        let mut stack = ParseStack::new(WbxmlObject::new(TypeId(0), 1));
        for _ in 0..2 {
            let child = WbxmlObject::new(TypeId(1), 0);
            stack.push(Frame::Object { obj: child, owner: 0, attach: Some(Attach::Item(0)) });
            stack.pop_and_attach();
        }

        let root = stack.into_root();
        assert_eq!(root.list(0).len(), 2);
    }

    #[test]
    fn leaf_frames_attach_nichts() {
        let mut stack = ParseStack::new(WbxmlObject::new(TypeId(0), 1));
        stack.push(Frame::Placeholder { owner: 0 });
        stack.pop_and_attach();
        assert_eq!(stack.len(), 1);
    }
}
