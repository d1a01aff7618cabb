//! wbxmlr – schema-driven WBXML 1.x marshaller
//!
//! Bidirektionaler Codec zwischen typisierten Objektgraphen und dem
//! WAP-Binary-XML-Wire-Format (ActiveSync, SyncML). Die Abbildung wird
//! out-of-band als Schema deklariert: pro Objekttyp eine Code Page, ein
//! Wurzel-Token und die Member-Belegung.
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
//! // Schema einmalig beim Start deklarieren.
//! let mut builder = SchemaBuilder::new();
//! let ping = builder.bind("Ping", CodePage::new(13, 1), 0x05);
//! builder.members(ping, vec![
//!     MemberBinding::text("HeartbeatInterval", 0x0A),
//! ]);
//! let registry = builder.build().unwrap();
//!
//! // Encode
//! let request = WbxmlObject::new(ping, 1).with(0, Value::text("480"));
//! let mut cntx = WbxmlContext::new();
//! let mut wire = Vec::new();
//! marshal(&registry, &mut cntx, &mut wire, &request, &[]).unwrap();
//! assert_eq!(&wire[..4], [0x03, 0x01, 0x6A, 0x00]);
//!
//! // Decode
//! let response = unmarshal(&registry, &mut cntx, &wire[..], ping).unwrap();
//! assert_eq!(response.text(0), Some("480"));
//! ```

pub mod constants;
pub mod context;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod marshal;
pub mod page;
pub mod schema;
pub mod value;

pub use error::{Error, Result};

/// HashMap mit ahash (schneller, nicht DoS-resistent — für interne Datenstrukturen).
pub(crate) type FastHashMap<K, V> = hashbrown::HashMap<K, V, ahash::RandomState>;

/// IndexMap mit ahash (deterministische Iteration + schnelles Hashing).
pub(crate) type FastIndexMap<K, V> = indexmap::IndexMap<K, V, ahash::RandomState>;

// Public API: Kontext und Schema
pub use context::WbxmlContext;
pub use page::{CodePage, CodePageStack};
pub use schema::{
    Binding, CodePageField, CodePageFinder, ItemKind, MemberBinding, MemberKind, SchemaBuilder,
    SchemaRegistry, TypeId,
};

// Public API: Objektgraph
pub use value::{Value, WbxmlObject, WbxmlValue};

// Public API: Engines und Byte-Ebene
pub use decoder::{WbxmlDecoder, WbxmlEvent, WbxmlHeader};
pub use marshal::{marshal, unmarshal};
