//! WBXML wire-format constants (WBXML 1.2/1.3, WAP-192).
//!
//! Sammelt die Global Tokens (§5.8.4.1), die Tag-Code-Space-Masken (§5.8.2)
//! und die Header-Konstanten (§5.3, §5.5) an einer Stelle.

/// Switch to a new tag code page; followed by a single page-index byte (§5.8.4.1).
pub const GLOBAL_SWITCH_PAGE: u8 = 0x00;
/// Close the current element (§5.8.4.1).
pub const GLOBAL_END: u8 = 0x01;
/// Character entity; followed by mb_u_int32 (§5.8.4.1). Not emitted by this core.
pub const GLOBAL_ENTITY: u8 = 0x02;
/// Inline string; followed by a NUL-terminated string (§5.8.4.1).
pub const GLOBAL_STR_I: u8 = 0x03;
/// Unknown tag, name in string table (§5.8.4.1). Not emitted by this core.
pub const GLOBAL_LITERAL: u8 = 0x04;
/// String-table reference (§5.8.4.1). Not emitted by this core.
pub const GLOBAL_STR_T: u8 = 0x83;
/// Opaque payload; followed by mb_u_int32 length and raw bytes (§5.8.4.6).
pub const GLOBAL_OPAQUE: u8 = 0xC3;

/// Tag code space (§5.8.2): low 6 bits carry the tag identity.
pub const TAG_TOKEN_MASK: u8 = 0x3F;
/// Tag code space (§5.8.2): bit 6 set = element has content.
pub const TAG_HAS_CONTENT: u8 = 0x40;
/// Tag code space (§5.8.2): bit 7 set = element carries attributes.
/// Attribute code space is out of scope; this bit MUST be 0 on emission.
pub const TAG_HAS_ATTRIBUTES: u8 = 0x80;

/// Smallest valid application tag identity (§5.8.3: values below are global).
pub const TAG_TOKEN_MIN: u8 = 0x05;
/// Largest tag identity expressible in the 6-bit tag code space.
pub const TAG_TOKEN_MAX: u8 = 0x3F;

/// WBXML version byte for 1.2 (§5.3: major − 1 in the high nibble, minor low).
pub const WBXML_VERSION_1_2: u8 = 0x02;
/// WBXML version byte for 1.3. ActiveSync streams lead with this byte.
pub const WBXML_VERSION_1_3: u8 = 0x03;

/// Document public identifier "unknown or missing" (§5.5).
pub const PUBLIC_ID_UNKNOWN: u32 = 0x01;

/// IANA MIBenum for UTF-8 (§5.6). The only charset this core emits.
pub const CHARSET_UTF8: u32 = 106;

#[cfg(test)]
mod tests {
    use super::*;

    /// §5.8.4.6: OPAQUE ist der einzige verwendete Token mit gesetztem Bit 7.
    #[test]
    fn opaque_token_layout() {
        assert_eq!(GLOBAL_OPAQUE & TAG_HAS_ATTRIBUTES, 0x80);
        assert_eq!(GLOBAL_OPAQUE & TAG_HAS_CONTENT, 0x40);
        assert_eq!(GLOBAL_OPAQUE & TAG_TOKEN_MASK, GLOBAL_STR_I);
    }

    /// §5.8.3: Anwendungs-Tags beginnen oberhalb der Global Tokens.
    #[test]
    fn tag_range_excludes_global_tokens() {
        assert!(TAG_TOKEN_MIN > GLOBAL_LITERAL);
        assert_eq!(TAG_TOKEN_MAX, TAG_TOKEN_MASK);
    }

    #[test]
    fn utf8_mibenum() {
        assert_eq!(CHARSET_UTF8, 0x6A);
    }
}
