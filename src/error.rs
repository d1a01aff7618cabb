//! Central error types for the WBXML marshaller.
//!
//! Fatale Fehler tragen einen Breadcrumb: den Pfad der Member-Namen von der
//! Wurzel bis zur fehlgeschlagenen Stelle. Tolerante Pfade (unzuordenbarer
//! Text, Opaque im XML-Trace) loggen auf debug und werden nie zu Fehlern
//! promoviert.

use core::fmt;
use std::borrow::Cow;

/// All error conditions raised by the marshaller, the schema registry and
/// the byte-level codec.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// A root or nested object type has no binding in the registry.
    SchemaMissing {
        /// Name of the unbound type (empty when only a `TypeId` was known).
        type_name: Cow<'static, str>,
    },
    /// No active code page could be determined during encoding.
    PageMissing,
    /// A member marked `required` was unset or an empty collection.
    RequiredMissing {
        /// The member that was missing.
        member: Cow<'static, str>,
        /// Breadcrumb from the root (member names joined with `/`).
        path: String,
    },
    /// An inbound start element resolved to no member and no fallback applied.
    UnmappedElement {
        /// Active code page at the failing element.
        page: u8,
        /// Tag token of the failing element.
        token: u8,
        /// Breadcrumb from the root.
        path: String,
    },
    /// An opaque payload arrived with no assignable target.
    UnmappedOpaque {
        /// Breadcrumb from the root.
        path: String,
    },
    /// An opaque payload targeted a typed member with no inner codec.
    UnsupportedOpaqueTarget {
        /// The member the payload resolved to.
        member: Cow<'static, str>,
        /// Breadcrumb from the root.
        path: String,
    },
    /// The byte stream violates WBXML 1.x framing.
    Malformed(Cow<'static, str>),
    /// The underlying stream failed.
    Io(String),
    /// A schema declaration failed registry-build validation.
    InvalidBinding {
        /// The type whose binding is invalid.
        type_name: Cow<'static, str>,
        /// Was an der Deklaration nicht stimmt.
        reason: Cow<'static, str>,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SchemaMissing { type_name } => {
                if type_name.is_empty() {
                    write!(f, "object type has no schema binding")
                } else {
                    write!(f, "object type '{type_name}' has no schema binding")
                }
            }
            Self::PageMissing => write!(f, "unable to determine the active code page"),
            Self::RequiredMissing { member, path } => {
                write!(f, "member '{member}' is marked required but is unset or empty (at {path})")
            }
            Self::UnmappedElement { page, token, path } => {
                write!(f, "no member maps element token 0x{token:02X} on page {page} (at {path})")
            }
            Self::UnmappedOpaque { path } => {
                write!(f, "opaque payload has no assignable target (at {path})")
            }
            Self::UnsupportedOpaqueTarget { member, path } => {
                write!(f, "member '{member}' cannot receive an opaque payload (at {path})")
            }
            Self::Malformed(msg) => write!(f, "malformed WBXML stream: {msg}"),
            Self::Io(msg) => write!(f, "IO error: {msg}"),
            Self::InvalidBinding { type_name, reason } => {
                write!(f, "invalid binding for '{type_name}': {reason}")
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl Error {
    /// Erstellt einen `SchemaMissing` Fehler mit Typnamen.
    pub fn schema_missing(type_name: impl Into<Cow<'static, str>>) -> Self {
        Self::SchemaMissing { type_name: type_name.into() }
    }

    /// Erstellt einen `Malformed` Fehler mit Nachricht.
    pub fn malformed(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::Malformed(msg.into())
    }

    /// Erstellt einen `InvalidBinding` Fehler mit Typ und Begruendung.
    pub fn invalid_binding(
        type_name: impl Into<Cow<'static, str>>,
        reason: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::InvalidBinding { type_name: type_name.into(), reason: reason.into() }
    }
}

/// A convenience `Result` type alias using [`Error`].
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    /// Every variant must produce a non-empty Display string naming the
    /// failing piece, so breadcrumbs survive into operator logs.

    #[test]
    fn schema_missing_display() {
        let msg = Error::schema_missing("Ping").to_string();
        assert!(msg.contains("Ping"), "{msg}");
        assert!(msg.contains("binding"), "{msg}");
    }

    #[test]
    fn schema_missing_ohne_namen() {
        let msg = Error::schema_missing("").to_string();
        assert!(msg.contains("no schema binding"), "{msg}");
    }

    #[test]
    fn unmapped_element_display() {
        let e = Error::UnmappedElement { page: 13, token: 0x0A, path: "Ping/Folders".into() };
        let msg = e.to_string();
        assert!(msg.contains("0x0A"), "{msg}");
        assert!(msg.contains("page 13"), "{msg}");
        assert!(msg.contains("Ping/Folders"), "{msg}");
    }

    #[test]
    fn required_missing_display() {
        let e = Error::RequiredMissing { member: "SyncKey".into(), path: "FolderSync".into() };
        let msg = e.to_string();
        assert!(msg.contains("SyncKey"), "{msg}");
        assert!(msg.contains("required"), "{msg}");
    }

    #[test]
    fn unsupported_opaque_target_display() {
        let e = Error::UnsupportedOpaqueTarget { member: "Status".into(), path: "Sync".into() };
        let msg = e.to_string();
        assert!(msg.contains("Status"), "{msg}");
        assert!(msg.contains("opaque"), "{msg}");
    }

    #[test]
    fn io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        let e = Error::from(io);
        assert!(matches!(e, Error::Io(_)));
        assert!(e.to_string().contains("eof"));
    }

    #[test]
    fn error_is_clone_and_eq() {
        let e1 = Error::PageMissing;
        assert_eq!(e1, e1.clone());
    }

    #[test]
    fn invalid_binding_display() {
        let msg = Error::invalid_binding("Folder", "token 0x44 outside [0x05, 0x3F]").to_string();
        assert!(msg.contains("Folder"), "{msg}");
        assert!(msg.contains("0x44"), "{msg}");
    }
}
