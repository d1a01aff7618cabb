//! Byte-level WBXML decoder: a pull-style event stream (§5.8).
//!
//! Liest sequentiell aus einem `io::Read` (oder Byte-Puffer) und liefert
//! [`WbxmlEvent`]s. Tokens werden über den optionalen [`CodePageFinder`]
//! gegen das Schema aufgelöst; ohne Finder (Dokument-Probe) bleiben Felder
//! unaufgelöst. `SWITCH_PAGE` wird intern konsumiert; Konsumenten sehen
//! Tokens immer schon im richtigen Page-Rahmen.
//!
//! Leere Elemente (Content-Bit 0) synthetisieren ihr `EndElement` sofort,
//! damit der Event-Strom für Konsumenten stets balanciert ist.

use std::collections::VecDeque;
use std::io::Read;

use crate::constants::{
    GLOBAL_END, GLOBAL_ENTITY, GLOBAL_LITERAL, GLOBAL_OPAQUE, GLOBAL_STR_I, GLOBAL_STR_T,
    GLOBAL_SWITCH_PAGE, TAG_HAS_ATTRIBUTES, TAG_HAS_CONTENT, TAG_TOKEN_MASK, TAG_TOKEN_MIN,
};
use crate::schema::{CodePageField, CodePageFinder};
use crate::{Error, Result};

/// The decoded preamble (§5.3–§5.7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WbxmlHeader {
    /// Version byte as read.
    pub version: u8,
    /// Document public identifier.
    pub public_id: u32,
    /// Charset MIBenum.
    pub charset: u32,
    /// String-table length. The table content is skipped, never interpreted.
    pub string_table_len: u32,
}

/// One decode event. Content events carry the field of the innermost open
/// element so consumers can resolve assignments without extra state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WbxmlEvent {
    /// An element opened. `empty` elements see their `EndElement` as the
    /// immediately following event.
    StartElement {
        /// Resolved (page, token) of the element.
        field: CodePageField,
        /// Content bit was clear.
        empty: bool,
    },
    /// Inline string content (STR_I).
    Text {
        /// Field of the enclosing element.
        field: CodePageField,
        /// Decoded UTF-8 text.
        text: String,
    },
    /// Opaque payload (OPAQUE).
    Opaque {
        /// Field of the enclosing element.
        field: CodePageField,
        /// Raw payload bytes.
        data: Vec<u8>,
    },
    /// An element closed.
    EndElement {
        /// Field of the element being closed.
        field: CodePageField,
    },
}

impl WbxmlEvent {
    /// The field this event is attributed to.
    pub fn field(&self) -> &CodePageField {
        match self {
            Self::StartElement { field, .. }
            | Self::Text { field, .. }
            | Self::Opaque { field, .. }
            | Self::EndElement { field } => field,
        }
    }
}

/// Pull decoder over a sequential byte source.
pub struct WbxmlDecoder<'a, R: Read> {
    reader: R,
    finder: Option<&'a dyn CodePageFinder>,
    header: Option<WbxmlHeader>,
    /// Aktive Code Page (Decoder-Seite, §5.8.4.1).
    page: u8,
    /// Stack der offenen Elemente für die Event-Attribution.
    open: Vec<CodePageField>,
    /// Synthetisierte Events (EndElement leerer Elemente).
    pending: VecDeque<WbxmlEvent>,
}

impl<'a, R: Read> WbxmlDecoder<'a, R> {
    /// Creates a decoder. Without a `finder` every field stays unresolved,
    /// sufficient for framing checks and the document probe.
    pub fn new(reader: R, finder: Option<&'a dyn CodePageFinder>) -> Self {
        Self {
            reader,
            finder,
            header: None,
            page: 0,
            open: Vec::new(),
            pending: VecDeque::new(),
        }
    }

    /// The preamble, parsing it on first use.
    pub fn header(&mut self) -> Result<&WbxmlHeader> {
        if self.header.is_none() {
            let version = self.read_byte()?;
            let public_id = self.read_mb_u_int32()?;
            let charset = self.read_mb_u_int32()?;
            let string_table_len = self.read_mb_u_int32()?;
            // Inbound-Tabellen sind erlaubt, werden aber nur übersprungen.
            self.skip(string_table_len as usize)?;
            self.header = Some(WbxmlHeader { version, public_id, charset, string_table_len });
        }
        Ok(self.header.as_ref().unwrap())
    }

    /// Next event, or `None` at a clean end of document.
    pub fn next(&mut self) -> Result<Option<WbxmlEvent>> {
        if let Some(event) = self.pending.pop_front() {
            return Ok(Some(event));
        }
        self.header()?;

        loop {
            let byte = match self.read_byte_or_eof()? {
                Some(b) => b,
                None if self.open.is_empty() => return Ok(None),
                None => return Err(Error::malformed("stream ended inside an open element")),
            };

            match byte {
                GLOBAL_SWITCH_PAGE => {
                    self.page = self.read_byte()?;
                }
                GLOBAL_END => {
                    let field = self
                        .open
                        .pop()
                        .ok_or_else(|| Error::malformed("END token without an open element"))?;
                    return Ok(Some(WbxmlEvent::EndElement { field }));
                }
                GLOBAL_STR_I => {
                    let text = self.read_cstring()?;
                    return Ok(Some(WbxmlEvent::Text { field: self.enclosing()?, text }));
                }
                GLOBAL_OPAQUE => {
                    let len = self.read_mb_u_int32()? as usize;
                    let mut data = vec![0u8; len];
                    self.read_exact(&mut data)?;
                    return Ok(Some(WbxmlEvent::Opaque { field: self.enclosing()?, data }));
                }
                GLOBAL_ENTITY => return Err(Error::malformed("ENTITY token not supported")),
                GLOBAL_LITERAL => return Err(Error::malformed("LITERAL token not supported")),
                GLOBAL_STR_T => {
                    return Err(Error::malformed("string-table reference not supported"))
                }
                _ => {
                    if byte & TAG_HAS_ATTRIBUTES != 0 {
                        return Err(Error::malformed(format!(
                            "tag byte 0x{byte:02X} carries attributes (unsupported code space)"
                        )));
                    }
                    let token = byte & TAG_TOKEN_MASK;
                    if token < TAG_TOKEN_MIN {
                        return Err(Error::malformed(format!(
                            "unsupported global token 0x{byte:02X}"
                        )));
                    }
                    let field = self
                        .finder
                        .and_then(|f| f.find(self.page, token))
                        .unwrap_or_else(|| CodePageField::unresolved(self.page, token));
                    let empty = byte & TAG_HAS_CONTENT == 0;
                    if empty {
                        self.pending.push_back(WbxmlEvent::EndElement { field: field.clone() });
                    } else {
                        self.open.push(field.clone());
                    }
                    return Ok(Some(WbxmlEvent::StartElement { field, empty }));
                }
            }
        }
    }

    /// Tiefe der aktuell offenen Elemente.
    pub fn depth(&self) -> usize {
        self.open.len()
    }

    fn enclosing(&self) -> Result<CodePageField> {
        self.open
            .last()
            .cloned()
            .ok_or_else(|| Error::malformed("content outside any element"))
    }

    fn read_byte(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn read_byte_or_eof(&mut self) -> Result<Option<u8>> {
        let mut buf = [0u8; 1];
        match self.reader.read(&mut buf) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(buf[0])),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => self.read_byte_or_eof(),
            Err(e) => Err(e.into()),
        }
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        match self.reader.read_exact(buf) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(Error::malformed("unexpected end of stream"))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Liest mb_u_int32 (§5.1); mehr als 5 Bytes sind ein Framing-Fehler.
    fn read_mb_u_int32(&mut self) -> Result<u32> {
        let mut value: u32 = 0;
        for _ in 0..5 {
            let byte = self.read_byte()?;
            if value >> 25 != 0 {
                return Err(Error::malformed("mb_u_int32 overflows 32 bits"));
            }
            value = (value << 7) | u32::from(byte & 0x7F);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(Error::malformed("mb_u_int32 longer than 5 bytes"))
    }

    fn read_cstring(&mut self) -> Result<String> {
        let mut bytes = Vec::new();
        loop {
            let byte = self.read_byte()?;
            if byte == 0 {
                break;
            }
            bytes.push(byte);
        }
        String::from_utf8(bytes).map_err(|_| Error::malformed("inline string is not valid UTF-8"))
    }

    fn skip(&mut self, mut n: usize) -> Result<()> {
        let mut buf = [0u8; 64];
        while n > 0 {
            let take = n.min(buf.len());
            self.read_exact(&mut buf[..take])?;
            n -= take;
        }
        Ok(())
    }
}

/// Probe: do these bytes open as a WBXML document?
///
/// One-step decode: Header plus erstes Event müssen sich ohne Schema
/// lesen lassen.
pub fn is_document(data: &[u8]) -> bool {
    let mut decoder = WbxmlDecoder::new(data, None);
    decoder.next().is_ok()
}
