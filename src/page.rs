//! Code pages and the runtime code-page stack (WBXML §5.8.1, §5.8.4.1).
//!
//! WBXML-Tags sind nur relativ zur aktiven Code Page eindeutig. Der Stack
//! verfolgt die aktive Page über verschachtelte Objekte hinweg: beim
//! Betreten eines Objekts mit abweichender Page wird gepusht (und
//! `SWITCH_PAGE` emittiert), beim Verlassen gepoppt und zurückgeschaltet.
//!
//! Lifecycle: ein Stack pro Marshal-/Unmarshal-Aufruf, nie geteilt.

use std::io::Write;

use crate::constants::GLOBAL_SWITCH_PAGE;
use crate::Result;

/// A numbered namespace of element tokens (WBXML §5.8.1).
///
/// The `public_id` identifies the document type carrying this page; pages of
/// one schema usually share it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CodePage {
    /// Page index as written after `SWITCH_PAGE` (0–255).
    pub index: u8,
    /// Document public identifier (§5.5). 1 = unknown/missing.
    pub public_id: u32,
}

impl CodePage {
    /// Erstellt eine Code Page mit Index und Public Id.
    pub const fn new(index: u8, public_id: u32) -> Self {
        Self { index, public_id }
    }
}

/// Runtime stack of the currently active code pages.
///
/// The top entry is the active page. Empty between calls; `reset()` on the
/// owning context clears it.
#[derive(Debug, Clone, Default)]
pub struct CodePageStack {
    pages: Vec<CodePage>,
}

impl CodePageStack {
    /// Erstellt einen leeren Stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes `page` without emitting anything.
    pub fn push(&mut self, page: CodePage) {
        self.pages.push(page);
    }

    /// Pops the top page. Returns `None` on an empty stack.
    pub fn pop(&mut self) -> Option<CodePage> {
        self.pages.pop()
    }

    /// The active page, or `None` outside any document.
    pub fn peek(&self) -> Option<CodePage> {
        self.pages.last().copied()
    }

    /// Current nesting depth.
    pub fn depth(&self) -> usize {
        self.pages.len()
    }

    /// Entfernt alle Einträge (Teil von `WbxmlContext::reset`).
    pub fn clear(&mut self) {
        self.pages.clear();
    }

    /// Emit-side switch: writes `SWITCH_PAGE <index>` and pushes `target`
    /// when the active page differs (§5.8.4.1).
    ///
    /// An empty stack always switches: the document start carries no
    /// implicit page in this codec, so the root page is announced
    /// explicitly even when its index is 0.
    ///
    /// Returns `true` when a switch was written (the caller must then
    /// [`switch_back`](Self::switch_back) on exit).
    pub fn switch_if_needed<W: Write>(&mut self, target: CodePage, sink: &mut W) -> Result<bool> {
        match self.peek() {
            Some(current) if current.index == target.index => Ok(false),
            _ => {
                sink.write_all(&[GLOBAL_SWITCH_PAGE, target.index])?;
                self.push(target);
                Ok(true)
            }
        }
    }

    /// Emit-side restore: pops the top page and writes a switch back to the
    /// new top. Symmetric to [`switch_if_needed`](Self::switch_if_needed);
    /// the popped page itself is not re-announced.
    ///
    /// With nothing underneath (root pop) no switch is written; nothing
    /// follows the root's end tag.
    pub fn switch_back<W: Write>(&mut self, sink: &mut W) -> Result<()> {
        self.pop();
        if let Some(restored) = self.peek() {
            sink.write_all(&[GLOBAL_SWITCH_PAGE, restored.index])?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AIRSYNC: CodePage = CodePage::new(0, 1);
    const FOLDERHIERARCHY: CodePage = CodePage::new(7, 1);
    const PING: CodePage = CodePage::new(13, 1);

    #[test]
    fn push_pop_peek() {
        let mut stack = CodePageStack::new();
        assert_eq!(stack.peek(), None);

        stack.push(AIRSYNC);
        stack.push(PING);
        assert_eq!(stack.peek(), Some(PING));
        assert_eq!(stack.pop(), Some(PING));
        assert_eq!(stack.peek(), Some(AIRSYNC));
    }

    /// Leerer Stack: der Root-Switch wird immer geschrieben, auch für Page 0.
    #[test]
    fn empty_stack_always_switches() {
        let mut stack = CodePageStack::new();
        let mut out = Vec::new();

        assert!(stack.switch_if_needed(AIRSYNC, &mut out).unwrap());
        assert_eq!(out, [0x00, 0x00]);
        assert_eq!(stack.peek(), Some(AIRSYNC));
    }

    #[test]
    fn same_page_does_not_switch() {
        let mut stack = CodePageStack::new();
        let mut out = Vec::new();
        stack.switch_if_needed(FOLDERHIERARCHY, &mut out).unwrap();
        out.clear();

        assert!(!stack.switch_if_needed(FOLDERHIERARCHY, &mut out).unwrap());
        assert!(out.is_empty());
        assert_eq!(stack.depth(), 1);
    }

    #[test]
    fn switch_back_restores_parent_page() {
        let mut stack = CodePageStack::new();
        let mut out = Vec::new();
        stack.switch_if_needed(AIRSYNC, &mut out).unwrap();
        stack.switch_if_needed(PING, &mut out).unwrap();
        out.clear();

        stack.switch_back(&mut out).unwrap();
        assert_eq!(out, [0x00, 0x00]);
        assert_eq!(stack.peek(), Some(AIRSYNC));
    }

    /// Root-Pop schreibt keinen Switch: nach dem Wurzel-END folgt nichts.
    #[test]
    fn root_pop_emits_nothing() {
        let mut stack = CodePageStack::new();
        let mut out = Vec::new();
        stack.switch_if_needed(PING, &mut out).unwrap();
        out.clear();

        stack.switch_back(&mut out).unwrap();
        assert!(out.is_empty());
        assert_eq!(stack.depth(), 0);
    }
}
