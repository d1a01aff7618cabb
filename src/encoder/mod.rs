//! Byte-level WBXML encoder primitives (§5.3–§5.8).
//!
//! Die Marshalling-Engine ruft diese Primitive; sie selbst kennen weder
//! Schema noch Objektgraph. Alle Schreiber arbeiten auf `io::Write` und
//! geben `Err(Io)` des Sinks unverändert weiter.
//!
//! Strings werden immer inline (STR_I) oder als OPAQUE geschrieben; eine
//! String-Tabelle wird nie emittiert (ihre Länge ist konstant 0, §5.6).

use std::io::Write;

use crate::constants::{
    GLOBAL_END, GLOBAL_OPAQUE, GLOBAL_STR_I, GLOBAL_SWITCH_PAGE, TAG_HAS_CONTENT, TAG_TOKEN_MAX,
    TAG_TOKEN_MIN,
};
use crate::{Error, Result};

/// Writes a multi-byte unsigned integer (§5.1): big-endian 7-bit groups,
/// continuation flag in bit 7 of every byte but the last.
pub fn write_mb_u_int32<W: Write>(sink: &mut W, value: u32) -> Result<()> {
    let mut buf = [0u8; 5];
    let mut at = buf.len() - 1;
    buf[at] = (value & 0x7F) as u8;
    let mut rest = value >> 7;
    while rest != 0 {
        at -= 1;
        buf[at] = 0x80 | (rest & 0x7F) as u8;
        rest >>= 7;
    }
    sink.write_all(&buf[at..])?;
    Ok(())
}

/// Writes the version byte (§5.3).
pub fn write_version<W: Write>(sink: &mut W, version: u8) -> Result<()> {
    sink.write_all(&[version])?;
    Ok(())
}

/// Writes the document public identifier (§5.5).
pub fn write_public_id<W: Write>(sink: &mut W, public_id: u32) -> Result<()> {
    write_mb_u_int32(sink, public_id)
}

/// Writes the charset MIBenum (§5.6).
pub fn write_encoding<W: Write>(sink: &mut W, encoding: u32) -> Result<()> {
    write_mb_u_int32(sink, encoding)
}

/// Writes the string-table length (§5.7). This core always writes 0.
pub fn write_string_table<W: Write>(sink: &mut W, length: u32) -> Result<()> {
    write_mb_u_int32(sink, length)
}

/// Opens an element: tag token with the content bit set when children or
/// payload follow (§5.8.2). Tokens outside the application range are a
/// schema defect surfaced here as `Malformed`.
pub fn push_element<W: Write>(sink: &mut W, token: u8, has_content: bool) -> Result<()> {
    if !(TAG_TOKEN_MIN..=TAG_TOKEN_MAX).contains(&token) {
        return Err(Error::malformed(format!("tag token 0x{token:02X} outside application range")));
    }
    let byte = if has_content { token | TAG_HAS_CONTENT } else { token };
    sink.write_all(&[byte])?;
    Ok(())
}

/// Closes the innermost element (§5.8.4.1 END).
pub fn pop_element<W: Write>(sink: &mut W) -> Result<()> {
    sink.write_all(&[GLOBAL_END])?;
    Ok(())
}

/// Writes an inline string: STR_I, UTF-8 bytes, NUL terminator (§5.8.4.1).
///
/// Ein eingebettetes NUL würde das Framing zerstören und wird abgelehnt.
pub fn inline_string<W: Write>(sink: &mut W, s: &str) -> Result<()> {
    if s.as_bytes().contains(&0) {
        return Err(Error::malformed("inline string contains NUL"));
    }
    sink.write_all(&[GLOBAL_STR_I])?;
    sink.write_all(s.as_bytes())?;
    sink.write_all(&[0])?;
    Ok(())
}

/// Writes an opaque payload: OPAQUE, mb_u_int32 length, raw bytes (§5.8.4.6).
pub fn opaque<W: Write>(sink: &mut W, data: &[u8]) -> Result<()> {
    sink.write_all(&[GLOBAL_OPAQUE])?;
    write_mb_u_int32(sink, data.len() as u32)?;
    sink.write_all(data)?;
    Ok(())
}

/// Shorthand: element bracket around one opaque payload.
pub fn push_opaque<W: Write>(sink: &mut W, token: u8, data: &[u8]) -> Result<()> {
    push_element(sink, token, true)?;
    opaque(sink, data)?;
    pop_element(sink)
}

/// Announces a code-page change (§5.8.4.1 SWITCH_PAGE).
pub fn switch_code_page<W: Write>(sink: &mut W, page: u8) -> Result<()> {
    sink.write_all(&[GLOBAL_SWITCH_PAGE, page])?;
    Ok(())
}

/// Finishes the stream. WBXML needs no trailer beyond matched END tags;
/// this only flushes the sink.
pub fn finalize<W: Write>(sink: &mut W) -> Result<()> {
    sink.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mb(value: u32) -> Vec<u8> {
        let mut out = Vec::new();
        write_mb_u_int32(&mut out, value).unwrap();
        out
    }

    // ==================== mb_u_int32 (§5.1) ====================

    #[test]
    fn mb_u_int32_single_byte() {
        assert_eq!(mb(0), [0x00]);
        assert_eq!(mb(1), [0x01]);
        assert_eq!(mb(106), [0x6A]);
        assert_eq!(mb(0x7F), [0x7F]);
    }

    #[test]
    fn mb_u_int32_continuation() {
        // §5.1: 0x80 → 0x81 0x00, 0x3FFF → 0xFF 0x7F
        assert_eq!(mb(0x80), [0x81, 0x00]);
        assert_eq!(mb(0x3FFF), [0xFF, 0x7F]);
        assert_eq!(mb(0xA0), [0x81, 0x20]);
    }

    #[test]
    fn mb_u_int32_max() {
        assert_eq!(mb(u32::MAX), [0x8F, 0xFF, 0xFF, 0xFF, 0x7F]);
    }

    // ==================== Tag-Bytes (§5.8.2) ====================

    #[test]
    fn element_mit_content() {
        let mut out = Vec::new();
        push_element(&mut out, 0x12, true).unwrap();
        assert_eq!(out, [0x52]);
    }

    #[test]
    fn element_ohne_content() {
        let mut out = Vec::new();
        push_element(&mut out, 0x09, false).unwrap();
        assert_eq!(out, [0x09]);
    }

    #[test]
    fn element_rejects_global_range() {
        let mut out = Vec::new();
        assert!(push_element(&mut out, 0x04, true).is_err());
        assert!(push_element(&mut out, 0x40, true).is_err());
        assert!(out.is_empty());
    }

    // ==================== Inline-Strings und Opaque ====================

    #[test]
    fn inline_string_framing() {
        let mut out = Vec::new();
        inline_string(&mut out, "480").unwrap();
        assert_eq!(out, [0x03, 0x34, 0x38, 0x30, 0x00]);
    }

    #[test]
    fn inline_string_leer() {
        let mut out = Vec::new();
        inline_string(&mut out, "").unwrap();
        assert_eq!(out, [0x03, 0x00]);
    }

    #[test]
    fn inline_string_rejects_nul() {
        let mut out = Vec::new();
        assert!(inline_string(&mut out, "a\0b").is_err());
    }

    #[test]
    fn opaque_framing() {
        let mut out = Vec::new();
        opaque(&mut out, &[0xDE, 0xAD]).unwrap();
        assert_eq!(out, [0xC3, 0x02, 0xDE, 0xAD]);
    }

    /// Längen ab 0x80 brauchen ein Fortsetzungsbyte.
    #[test]
    fn opaque_lange_payload() {
        let mut out = Vec::new();
        let data = vec![0xAB; 0x90];
        opaque(&mut out, &data).unwrap();
        assert_eq!(&out[..3], [0xC3, 0x81, 0x10]);
        assert_eq!(out.len(), 3 + 0x90);
    }

    #[test]
    fn push_opaque_komposition() {
        let mut out = Vec::new();
        push_opaque(&mut out, 0x0D, &[0x01]).unwrap();
        assert_eq!(out, [0x4D, 0xC3, 0x01, 0x01, 0x01]);
    }

    #[test]
    fn switch_code_page_bytes() {
        let mut out = Vec::new();
        switch_code_page(&mut out, 13).unwrap();
        assert_eq!(out, [0x00, 0x0D]);
    }

    // ==================== Preamble ====================

    #[test]
    fn preamble_activesync() {
        let mut out = Vec::new();
        write_version(&mut out, 0x03).unwrap();
        write_public_id(&mut out, 1).unwrap();
        write_encoding(&mut out, 106).unwrap();
        write_string_table(&mut out, 0).unwrap();
        assert_eq!(out, [0x03, 0x01, 0x6A, 0x00]);
    }
}
