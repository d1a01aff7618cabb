//! Per-call marshalling context.
//!
//! Ein `WbxmlContext` gehört genau einem laufenden Marshal-/Unmarshal-Aufruf.
//! Konfiguration (Version, Charset, Flags) überlebt `reset()`; Laufzeitzustand
//! (Code-Page-Stack, XML-Trace) wird bei jedem Aufruf geleert. Der Kontext ist
//! bewusst nicht zwischen nebenläufigen Aufrufen teilbar; die Registry ist es.
//!
//! # Beispiel
//!
//! ```
//! use wbxmlr::context::WbxmlContext;
//! use wbxmlr::constants::{CHARSET_UTF8, WBXML_VERSION_1_3};
//!
//! let mut cntx = WbxmlContext::new()
//!     .with_version(WBXML_VERSION_1_3)
//!     .with_encoding(CHARSET_UTF8)
//!     .with_capture_xml(true);
//!
//! assert!(cntx.capture_xml());
//! cntx.reset();
//! assert!(cntx.xml().is_empty());
//! ```

use crate::page::CodePageStack;

/// Mutable state owned by exactly one in-flight codec call.
#[derive(Debug, Clone, Default)]
pub struct WbxmlContext {
    /// WBXML version byte (§5.3). 0 = unset; the encoder falls back with a warning.
    version: u8,
    /// Charset MIBenum (§5.6). 0 = unset; the encoder falls back to UTF-8.
    encoding: u32,
    /// Mitschrift der decodierten Events als XML-Trace (nur Diagnose).
    capture_xml: bool,
    /// Strings als OPAQUE statt STR_I emittieren (ActiveSync ≥ 12.1 Konvention).
    opaque_strings: bool,
    /// Aktive Code Pages des laufenden Aufrufs.
    pages: CodePageStack,
    /// Der aufgebaute XML-Trace (leer ohne `capture_xml`).
    xml: String,
}

impl WbxmlContext {
    /// Creates a context with everything unset; the encoder warns and
    /// applies wire defaults for version and charset.
    pub fn new() -> Self {
        Self::default()
    }

    // --- Getter ---

    /// WBXML version byte, 0 when unset.
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Charset MIBenum, 0 when unset.
    pub fn encoding(&self) -> u32 {
        self.encoding
    }

    /// Whether decode events are mirrored into an XML trace.
    pub fn capture_xml(&self) -> bool {
        self.capture_xml
    }

    /// Whether string values are emitted as OPAQUE instead of STR_I.
    pub fn opaque_strings(&self) -> bool {
        self.opaque_strings
    }

    /// The captured XML trace of the last call.
    pub fn xml(&self) -> &str {
        &self.xml
    }

    // --- Builder ---

    /// Setzt das Versionsbyte (§5.3).
    pub fn with_version(mut self, version: u8) -> Self {
        self.version = version;
        self
    }

    /// Setzt das Charset (IANA MIBenum, §5.6).
    pub fn with_encoding(mut self, encoding: u32) -> Self {
        self.encoding = encoding;
        self
    }

    /// Aktiviert/deaktiviert den XML-Trace.
    pub fn with_capture_xml(mut self, on: bool) -> Self {
        self.capture_xml = on;
        self
    }

    /// Aktiviert/deaktiviert OPAQUE-Emission für Strings.
    pub fn with_opaque_strings(mut self, on: bool) -> Self {
        self.opaque_strings = on;
        self
    }

    // --- Laufzeit ---

    /// Clears per-call state. Must run at the entry of every marshal and
    /// unmarshal call; configuration flags survive.
    pub fn reset(&mut self) {
        self.pages.clear();
        self.xml.clear();
    }

    /// The code-page stack of the running call.
    pub fn pages(&mut self) -> &mut CodePageStack {
        &mut self.pages
    }

    /// Read-only view of the code-page stack.
    pub fn pages_ref(&self) -> &CodePageStack {
        &self.pages
    }

    /// Hängt Text an den XML-Trace an.
    pub(crate) fn trace(&mut self, fragment: &str) {
        self.xml.push_str(fragment);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::CodePage;

    #[test]
    fn default_is_unset() {
        let cntx = WbxmlContext::new();
        assert_eq!(cntx.version(), 0);
        assert_eq!(cntx.encoding(), 0);
        assert!(!cntx.capture_xml());
        assert!(!cntx.opaque_strings());
    }

    #[test]
    fn builder_roundtrip() {
        let cntx = WbxmlContext::new()
            .with_version(0x03)
            .with_encoding(106)
            .with_opaque_strings(true);
        assert_eq!(cntx.version(), 0x03);
        assert_eq!(cntx.encoding(), 106);
        assert!(cntx.opaque_strings());
    }

    /// `reset()` leert Stack und Trace, behält aber die Konfiguration.
    #[test]
    fn reset_behaelt_konfiguration() {
        let mut cntx = WbxmlContext::new().with_version(0x02).with_capture_xml(true);
        cntx.pages().push(CodePage::new(7, 1));
        cntx.trace("<FolderSync>");

        cntx.reset();

        assert_eq!(cntx.version(), 0x02);
        assert!(cntx.capture_xml());
        assert_eq!(cntx.pages_ref().depth(), 0);
        assert!(cntx.xml().is_empty());
    }
}
