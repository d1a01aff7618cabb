//! Schema binding model: the declarative mapping both engines consume.
//!
//! Bindings werden beim Start programmatisch deklariert ([`SchemaBuilder`]),
//! validiert und zu einer unveränderlichen [`SchemaRegistry`] eingefroren.
//! Pro Aufruf findet keine Introspektion statt; die Registry ist zwischen
//! nebenläufigen Codec-Aufrufen teilbar.
//!
//! Typen referenzieren einander über [`TypeId`]-Indizes, nie über Zeiger;
//! die Registry ist damit ein DAG ohne Ownership-Zyklen.
//!
//! # Beispiel
//!
//! ```
//! use wbxmlr::page::CodePage;
//! use wbxmlr::schema::{MemberBinding, SchemaBuilder};
//!
//! let mut builder = SchemaBuilder::new();
//! let ping = builder.bind("Ping", CodePage::new(13, 1), 0x05);
//! builder.members(ping, vec![
//!     MemberBinding::text("HeartbeatInterval", 0x0A),
//! ]);
//! let registry = builder.build().unwrap();
//!
//! assert!(registry.binding(ping).is_some());
//! assert!(registry.resolve_token(13, 0x0A).is_some());
//! ```

use std::borrow::Cow;
use std::rc::Rc;

use crate::constants::{TAG_TOKEN_MAX, TAG_TOKEN_MIN};
use crate::page::CodePage;
use crate::{Error, FastHashMap, FastIndexMap, Result};

// ============================================================================
// TypeId
// ============================================================================

/// Index of a bound type in the registry's binding table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub usize);

// ============================================================================
// Member layout
// ============================================================================

/// Item type of a collection member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    /// String items (STR_I or OPAQUE payloads).
    Text,
    /// Bound objects of the given type.
    Object(TypeId),
    /// Generic [`crate::value::WbxmlValue`] carriers.
    Value,
}

/// Declared shape of a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    /// String scalar.
    Text,
    /// Byte-sequence scalar, wire form OPAQUE.
    Bytes,
    /// Boolean presence element: `true` = empty element, `false` = absent.
    Flag,
    /// A bound child object.
    Object(TypeId),
    /// Generic container: receives nested-document bytes or a string,
    /// whatever the opaque probe decides.
    Any,
    /// A single generic element carrier.
    Value,
    /// A collection.
    List {
        /// What each item is.
        item: ItemKind,
        /// Per-item wrapper token, used when the member itself is a ghost.
        item_token: Option<u8>,
    },
}

/// One declared member of a binding.
///
/// `token == None` markiert einen Ghost-Member ohne eigene Klammer; seine
/// Kinder erben die Klammer des umgebenden Elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberBinding {
    /// Member name (breadcrumbs, XML trace).
    pub name: Rc<str>,
    /// Element token within the owning binding's page; `None` = ghost.
    pub token: Option<u8>,
    /// Declared shape.
    pub kind: MemberKind,
    /// Concrete type to instantiate when it differs from the declared one.
    pub model_class: Option<TypeId>,
    /// Marshalling fails when a required member is unset or empty.
    pub required: bool,
    /// Filter tags; see [`matches_filter`](Self::matches_filter).
    pub filters: Vec<Rc<str>>,
}

impl MemberBinding {
    fn new(name: &str, token: Option<u8>, kind: MemberKind) -> Self {
        Self {
            name: Rc::from(name),
            token,
            kind,
            model_class: None,
            required: false,
            filters: Vec::new(),
        }
    }

    /// String scalar under `token`.
    pub fn text(name: &str, token: u8) -> Self {
        Self::new(name, Some(token), MemberKind::Text)
    }

    /// Byte-sequence scalar under `token`.
    pub fn bytes(name: &str, token: u8) -> Self {
        Self::new(name, Some(token), MemberKind::Bytes)
    }

    /// Boolean presence element under `token`.
    pub fn flag(name: &str, token: u8) -> Self {
        Self::new(name, Some(token), MemberKind::Flag)
    }

    /// Bound child object of type `ty` under `token`.
    pub fn object(name: &str, token: u8, ty: TypeId) -> Self {
        Self::new(name, Some(token), MemberKind::Object(ty))
    }

    /// Ghost bound child: no member bracket, the child's own root bracket
    /// is emitted instead.
    pub fn ghost_object(name: &str, ty: TypeId) -> Self {
        Self::new(name, None, MemberKind::Object(ty))
    }

    /// Generic container under `token`.
    pub fn any(name: &str, token: u8) -> Self {
        Self::new(name, Some(token), MemberKind::Any)
    }

    /// Single generic element carrier under `token`.
    pub fn value(name: &str, token: u8) -> Self {
        Self::new(name, Some(token), MemberKind::Value)
    }

    /// Collection of bound objects, wrapped in one `token` bracket.
    pub fn list_of(name: &str, token: u8, ty: TypeId) -> Self {
        Self::new(name, Some(token), MemberKind::List { item: ItemKind::Object(ty), item_token: None })
    }

    /// Ghost collection of bound objects: items emit their own root brackets.
    pub fn ghost_list_of(name: &str, ty: TypeId) -> Self {
        Self::new(name, None, MemberKind::List { item: ItemKind::Object(ty), item_token: None })
    }

    /// Collection of strings inside one `token` bracket.
    pub fn text_list(name: &str, token: u8) -> Self {
        Self::new(name, Some(token), MemberKind::List { item: ItemKind::Text, item_token: None })
    }

    /// Ghost collection of strings; each item is wrapped in `item_token`.
    pub fn ghost_text_list(name: &str, item_token: u8) -> Self {
        Self::new(name, None, MemberKind::List { item: ItemKind::Text, item_token: Some(item_token) })
    }

    /// Collection of generic carriers inside one `token` bracket.
    pub fn value_list(name: &str, token: u8) -> Self {
        Self::new(name, Some(token), MemberKind::List { item: ItemKind::Value, item_token: None })
    }

    /// Markiert den Member als verpflichtend.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Setzt die Filter-Tags.
    pub fn with_filters(mut self, filters: &[&str]) -> Self {
        self.filters = filters.iter().map(|f| Rc::from(*f)).collect();
        self
    }

    /// Setzt den Model-Class-Override.
    pub fn with_model_class(mut self, ty: TypeId) -> Self {
        self.model_class = Some(ty);
        self
    }

    /// Whether this member is a ghost (carries no bracket of its own).
    pub fn is_ghost(&self) -> bool {
        self.token.is_none()
    }

    /// Filter check, permissive on empty: an empty caller set admits every
    /// member; a non-empty set admits only members whose tags intersect it.
    pub fn matches_filter(&self, filters: &[&str]) -> bool {
        if filters.is_empty() {
            return true;
        }
        self.filters.iter().any(|tag| filters.iter().any(|f| *f == &**tag))
    }

    /// Die deklarierten Klassen dieses Members (für die Auflösung über den
    /// Model-Class des eingehenden Tokens).
    pub fn declared_class(&self) -> Option<TypeId> {
        match self.kind {
            MemberKind::Object(ty) => Some(ty),
            MemberKind::List { item: ItemKind::Object(ty), .. } => Some(ty),
            _ => self.model_class,
        }
    }
}

// ============================================================================
// Binding
// ============================================================================

/// The full mapping of one object type: root element plus member layout.
#[derive(Debug, Clone)]
pub struct Binding {
    /// Type name (diagnostics, XML trace for root elements).
    pub name: Rc<str>,
    /// Code page all member tokens of this binding live on.
    pub page: CodePage,
    /// Root element token when this type opens its own bracket.
    pub token: u8,
    /// Members in declaration order; emission order equals this order.
    pub members: Vec<MemberBinding>,
}

// ============================================================================
// CodePageField
// ============================================================================

/// A resolved (page, token) pair as seen by the decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodePageField {
    /// Code page the token arrived on.
    pub page: u8,
    /// Tag token (identity bits only).
    pub token: u8,
    /// Element name when the registry declared one.
    pub name: Option<Rc<str>>,
    /// Concrete type this token instantiates (root tokens and declared
    /// overrides), driving polymorphic attachment.
    pub model_class: Option<TypeId>,
}

impl CodePageField {
    /// Ein Feld ohne Registry-Wissen (unbekannter Token).
    pub fn unresolved(page: u8, token: u8) -> Self {
        Self { page, token, name: None, model_class: None }
    }

    /// Anzeigename für Trace und Logs: Elementname oder `token-0xNN`.
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.to_string(),
            None => format!("token-0x{:02X}", self.token),
        }
    }
}

/// Schema-aware token resolver handed to the byte decoder.
pub trait CodePageFinder {
    /// Resolves `(page, token)` to a declared field, if any.
    fn find(&self, page: u8, token: u8) -> Option<CodePageField>;
}

// ============================================================================
// Builder + Registry
// ============================================================================

#[derive(Debug, Clone)]
struct TokenEntry {
    name: Rc<str>,
    model_class: Option<TypeId>,
}

/// Declares bindings and freezes them into a [`SchemaRegistry`].
///
/// Zwei Phasen: erst alle Typen mit [`bind`](Self::bind) anlegen (liefert
/// die `TypeId`s für Vorwärtsreferenzen), dann Member nachtragen.
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    bindings: Vec<Binding>,
    names: FastIndexMap<Rc<str>, TypeId>,
}

impl SchemaBuilder {
    /// Erstellt einen leeren Builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares type `name` rooted at `token` on `page`; members start empty.
    pub fn bind(&mut self, name: &str, page: CodePage, token: u8) -> TypeId {
        let id = TypeId(self.bindings.len());
        let name: Rc<str> = Rc::from(name);
        self.names.insert(name.clone(), id);
        self.bindings.push(Binding { name, page, token, members: Vec::new() });
        id
    }

    /// Sets the member list of `ty` (declaration order = emission order).
    pub fn members(&mut self, ty: TypeId, members: Vec<MemberBinding>) {
        self.bindings[ty.0].members = members;
    }

    /// Validates every declaration and freezes the registry.
    pub fn build(self) -> Result<SchemaRegistry> {
        let type_count = self.bindings.len();
        let mut tokens: FastHashMap<(u8, u8), TokenEntry> = FastHashMap::default();

        for binding in &self.bindings {
            check_token(&binding.name, "root", binding.token)?;
            for member in &binding.members {
                if let Some(token) = member.token {
                    check_token(&binding.name, &member.name, token)?;
                }
                if let MemberKind::List { item, item_token } = member.kind {
                    if let Some(token) = item_token {
                        check_token(&binding.name, &member.name, token)?;
                    }
                    if member.is_ghost() && item == ItemKind::Text && item_token.is_none() {
                        return Err(Error::invalid_binding(
                            Cow::Owned(binding.name.to_string()),
                            Cow::Owned(format!(
                                "ghost text list '{}' needs an item wrapper token",
                                member.name
                            )),
                        ));
                    }
                }
                for target in [member.declared_class(), member.model_class].into_iter().flatten() {
                    if target.0 >= type_count {
                        return Err(Error::invalid_binding(
                            Cow::Owned(binding.name.to_string()),
                            Cow::Owned(format!(
                                "member '{}' references unknown type id {}",
                                member.name, target.0
                            )),
                        ));
                    }
                }
                if member.token.is_none() && matches!(member.kind, MemberKind::Flag | MemberKind::Bytes) {
                    return Err(Error::invalid_binding(
                        Cow::Owned(binding.name.to_string()),
                        Cow::Owned(format!("member '{}' cannot be a ghost", member.name)),
                    ));
                }
            }
        }

        // Token-Tabelle: Member-Tokens und Item-Wrapper zuerst, dann
        // Root-Tokens (die die Model-Class beisteuern, sofern frei).
        for binding in &self.bindings {
            let page = binding.page.index;
            for member in &binding.members {
                if let Some(token) = member.token {
                    tokens.entry((page, token)).or_insert_with(|| TokenEntry {
                        name: member.name.clone(),
                        model_class: member.model_class,
                    });
                }
                if let MemberKind::List { item_token: Some(token), .. } = member.kind {
                    tokens.entry((page, token)).or_insert_with(|| TokenEntry {
                        name: member.name.clone(),
                        model_class: None,
                    });
                }
            }
        }
        for (idx, binding) in self.bindings.iter().enumerate() {
            let entry = tokens
                .entry((binding.page.index, binding.token))
                .or_insert_with(|| TokenEntry { name: binding.name.clone(), model_class: None });
            if entry.model_class.is_none() {
                entry.model_class = Some(TypeId(idx));
            }
        }

        Ok(SchemaRegistry { bindings: self.bindings, names: self.names, tokens })
    }
}

fn check_token(type_name: &Rc<str>, member: &str, token: u8) -> Result<()> {
    if !(TAG_TOKEN_MIN..=TAG_TOKEN_MAX).contains(&token) {
        return Err(Error::invalid_binding(
            Cow::Owned(type_name.to_string()),
            Cow::Owned(format!(
                "token 0x{token:02X} of '{member}' outside [0x{TAG_TOKEN_MIN:02X}, 0x{TAG_TOKEN_MAX:02X}]"
            )),
        ));
    }
    Ok(())
}

/// Immutable binding registry, shared across concurrent codec calls.
#[derive(Debug)]
pub struct SchemaRegistry {
    bindings: Vec<Binding>,
    names: FastIndexMap<Rc<str>, TypeId>,
    tokens: FastHashMap<(u8, u8), TokenEntry>,
}

impl SchemaRegistry {
    /// The binding of `ty`, if declared.
    pub fn binding(&self, ty: TypeId) -> Option<&Binding> {
        self.bindings.get(ty.0)
    }

    /// Lookup by type name.
    pub fn binding_for(&self, name: &str) -> Option<(TypeId, &Binding)> {
        let id = *self.names.get(name)?;
        Some((id, &self.bindings[id.0]))
    }

    /// Typname für Diagnosen; leer bei unbekannter Id.
    pub fn type_name(&self, ty: TypeId) -> &str {
        self.bindings.get(ty.0).map(|b| &*b.name).unwrap_or("")
    }

    /// Resolves `(page, token)` against the declared token table.
    pub fn resolve_token(&self, page: u8, token: u8) -> Option<CodePageField> {
        self.tokens.get(&(page, token)).map(|entry| CodePageField {
            page,
            token,
            name: Some(entry.name.clone()),
            model_class: entry.model_class,
        })
    }

    /// Number of declared types.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// True when no types are declared.
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl CodePageFinder for SchemaRegistry {
    fn find(&self, page: u8, token: u8) -> Option<CodePageField> {
        self.resolve_token(page, token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn folder_schema() -> (SchemaRegistry, TypeId, TypeId) {
        let mut builder = SchemaBuilder::new();
        let folder_sync = builder.bind("FolderSync", CodePage::new(7, 1), 0x16);
        let folder = builder.bind("Folder", CodePage::new(7, 1), 0x07);
        builder.members(folder_sync, vec![
            MemberBinding::text("SyncKey", 0x12).required(),
            MemberBinding::list_of("Changes", 0x0E, folder),
        ]);
        builder.members(folder, vec![
            MemberBinding::text("DisplayName", 0x08),
            MemberBinding::flag("Deleted", 0x09),
        ]);
        (builder.build().unwrap(), folder_sync, folder)
    }

    #[test]
    fn bind_und_lookup() {
        let (registry, folder_sync, folder) = folder_schema();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.binding(folder_sync).unwrap().token, 0x16);
        assert_eq!(registry.binding_for("Folder").unwrap().0, folder);
        assert_eq!(registry.type_name(folder_sync), "FolderSync");
    }

    /// Member-Tokens landen in der Token-Tabelle des Page-Finders.
    #[test]
    fn resolve_member_token() {
        let (registry, _, _) = folder_schema();
        let field = registry.resolve_token(7, 0x12).unwrap();
        assert_eq!(field.name.as_deref(), Some("SyncKey"));
        assert!(field.model_class.is_none());
    }

    /// Root-Tokens tragen ihre TypeId als Model-Class (polymorphe/Ghost-Zuordnung).
    #[test]
    fn root_token_traegt_model_class() {
        let (registry, _, folder) = folder_schema();
        let field = registry.resolve_token(7, 0x07).unwrap();
        assert_eq!(field.model_class, Some(folder));
    }

    #[test]
    fn unknown_token_resolves_to_none() {
        let (registry, _, _) = folder_schema();
        assert!(registry.resolve_token(7, 0x3E).is_none());
        assert!(registry.resolve_token(9, 0x12).is_none());
    }

    /// §5.8.3: Tokens unterhalb 0x05 kollidieren mit Global Tokens.
    #[test]
    fn build_rejects_global_token_range() {
        let mut builder = SchemaBuilder::new();
        builder.bind("Bad", CodePage::new(0, 1), 0x03);
        let err = builder.build().unwrap_err();
        assert!(matches!(err, Error::InvalidBinding { .. }), "{err}");
    }

    #[test]
    fn build_rejects_token_above_six_bits() {
        let mut builder = SchemaBuilder::new();
        let ty = builder.bind("Bad", CodePage::new(0, 1), 0x05);
        builder.members(ty, vec![MemberBinding::text("Wide", 0x40)]);
        assert!(builder.build().is_err());
    }

    #[test]
    fn build_rejects_ghost_text_list_without_item_token() {
        let mut builder = SchemaBuilder::new();
        let ty = builder.bind("Bad", CodePage::new(0, 1), 0x05);
        builder.members(ty, vec![
            MemberBinding::new("Filters", None, MemberKind::List { item: ItemKind::Text, item_token: None }),
        ]);
        assert!(builder.build().is_err());
    }

    #[test]
    fn build_rejects_ghost_flag() {
        let mut builder = SchemaBuilder::new();
        let ty = builder.bind("Bad", CodePage::new(0, 1), 0x05);
        builder.members(ty, vec![MemberBinding::new("DeletesAsMoves", None, MemberKind::Flag)]);
        assert!(builder.build().is_err());
    }

    #[test]
    fn filters_permissive_on_empty() {
        let member = MemberBinding::text("To", 0x15).with_filters(&["SendMail"]);
        assert!(member.matches_filter(&[]));
        assert!(member.matches_filter(&["SendMail", "SmartReply"]));
        assert!(!member.matches_filter(&["FolderSync"]));

        let untagged = MemberBinding::text("Subject", 0x16);
        assert!(untagged.matches_filter(&[]));
        assert!(!untagged.matches_filter(&["SendMail"]));
    }

    #[test]
    fn ghost_member_konstruktion() {
        let (_, _, folder) = folder_schema();
        let ghost = MemberBinding::ghost_list_of("Folders", folder);
        assert!(ghost.is_ghost());
        assert_eq!(ghost.declared_class(), Some(folder));
    }
}
