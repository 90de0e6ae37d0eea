use crate::Error;

/// Whether a member of an imported type is a method or a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberKind {
    Method,
    Field,
}

/// The kind of import a member is annotated with.  Must agree with
/// the member's [`MemberKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImportAttribute {
    Method,
    Field,
}

/// How the value of an imported field is made available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldLoad {
    /// Copy the field's bytes once, when the import is loaded.
    Copy,

    /// Keep the field's address, and read it on each access.
    Proxy,

    /// Copy the field's bytes into storage that is allocated once and
    /// reused by every load.  Unloading zeroes the storage.
    FastOverwrite,
}

/// One member of an [`ImportSpec`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportMember {
    /// Name used to look up the member after loading.
    pub name: String,

    /// Symbol in the image that holds the member's code or storage.
    pub symbol: String,

    pub kind: MemberKind,
    pub attribute: ImportAttribute,

    /// Record the resolved address, for explicit lookup.
    pub map: bool,

    /// Retarget the member's dispatch entry to the resolved address.
    pub bind: bool,

    pub field_load: Option<FieldLoad>,
    pub field_size: usize,
}

/// A set of runtime internals to import, grouped under a type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSpec {
    pub type_name: String,
    pub namespace: Option<String>,

    /// Short name of the module that defines the symbols.
    pub image: String,

    pub members: Vec<ImportMember>,
}

impl MemberKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Method => "method",
            Self::Field => "field",
        }
    }
}

impl ImportAttribute {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Method => "method",
            Self::Field => "field",
        }
    }

    fn accepts(&self, kind: MemberKind) -> bool {
        matches!(
            (self, kind),
            (Self::Method, MemberKind::Method) | (Self::Field, MemberKind::Field)
        )
    }
}

impl ImportMember {
    /// A method import, mapped by default.
    pub fn method(name: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            symbol: symbol.into(),
            kind: MemberKind::Method,
            attribute: ImportAttribute::Method,
            map: true,
            bind: false,
            field_load: None,
            field_size: 0,
        }
    }

    pub fn field(
        name: impl Into<String>,
        symbol: impl Into<String>,
        load: FieldLoad,
        size: usize,
    ) -> Self {
        Self {
            name: name.into(),
            symbol: symbol.into(),
            kind: MemberKind::Field,
            attribute: ImportAttribute::Field,
            map: false,
            bind: false,
            field_load: Some(load),
            field_size: size,
        }
    }

    /// Bind instead of map.
    pub fn bound(mut self) -> Self {
        self.map = false;
        self.bind = true;
        self
    }

    pub fn with_modes(mut self, map: bool, bind: bool) -> Self {
        self.map = map;
        self.bind = bind;
        self
    }

    pub fn with_attribute(mut self, attribute: ImportAttribute) -> Self {
        self.attribute = attribute;
        self
    }

    pub fn with_field_load(mut self, load: Option<FieldLoad>) -> Self {
        self.field_load = load;
        self
    }
}

impl ImportSpec {
    pub fn new(type_name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            namespace: None,
            image: image.into(),
            members: Vec::new(),
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_member(mut self, member: ImportMember) -> Self {
        self.members.push(member);
        self
    }

    pub fn member(&self, name: &str) -> Option<&ImportMember> {
        self.members.iter().find(|member| member.name == name)
    }

    /// Name of the dispatch table entry for a bound member.
    pub fn dispatch_name(&self, member: &str) -> String {
        match &self.namespace {
            Some(namespace) => format!("{namespace}.{}::{member}", self.type_name),
            None => format!("{}::{member}", self.type_name),
        }
    }

    /// Check the import for configuration errors.  Runs before any
    /// symbol is resolved or any memory is accessed.
    pub fn validate(&self) -> Result<(), Error> {
        let has_namespace = self
            .namespace
            .as_deref()
            .is_some_and(|namespace| !namespace.is_empty());
        if !has_namespace {
            return Err(Error::MissingImportNamespace(self.type_name.clone()));
        }

        self.members
            .iter()
            .try_for_each(|member| self.validate_member(member))
    }

    fn validate_member(&self, member: &ImportMember) -> Result<(), Error> {
        if !member.attribute.accepts(member.kind) {
            return Err(Error::ImportKindMismatch {
                type_name: self.type_name.clone(),
                member: member.name.clone(),
                kind: member.kind.as_str(),
                attribute: member.attribute.as_str(),
            });
        }

        if member.map && member.bind {
            return Err(Error::ConflictingBindingModes {
                type_name: self.type_name.clone(),
                member: member.name.clone(),
            });
        }

        if member.kind == MemberKind::Field && member.field_load.is_none() {
            return Err(Error::MissingFieldLoad {
                type_name: self.type_name.clone(),
                member: member.name.clone(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn spec() -> ImportSpec {
        ImportSpec::new("GCHeapUtilities", "libcoreclr.so")
            .with_namespace("Runtime.Internals")
            .with_member(ImportMember::method("IsHeapPointer", "IsHeapPointer"))
            .with_member(ImportMember::field(
                "lowest",
                "g_gc_lowest_address",
                FieldLoad::Copy,
                8,
            ))
    }

    #[test]
    fn valid_spec() -> Result<(), Error> {
        spec().validate()?;
        assert_eq!(
            spec().dispatch_name("IsHeapPointer"),
            "Runtime.Internals.GCHeapUtilities::IsHeapPointer"
        );
        Ok(())
    }

    #[test]
    fn namespace_is_required() {
        let mut spec = spec();
        spec.namespace = None;
        assert!(matches!(
            spec.validate(),
            Err(Error::MissingImportNamespace(_))
        ));

        spec.namespace = Some(String::new());
        assert!(matches!(
            spec.validate(),
            Err(Error::MissingImportNamespace(_))
        ));
    }

    #[test]
    fn field_attribute_on_method() {
        let spec = spec().with_member(
            ImportMember::method("Alloc", "Alloc")
                .with_attribute(ImportAttribute::Field),
        );
        assert!(matches!(
            spec.validate(),
            Err(Error::ImportKindMismatch {
                kind: "method",
                attribute: "field",
                ..
            })
        ));
    }

    #[test]
    fn map_and_bind_conflict() {
        let spec = spec()
            .with_member(ImportMember::method("Alloc", "Alloc").with_modes(true, true));
        assert!(matches!(
            spec.validate(),
            Err(Error::ConflictingBindingModes { .. })
        ));
    }

    #[test]
    fn field_requires_load_strategy() {
        let spec = spec().with_member(
            ImportMember::field("highest", "g_gc_highest_address", FieldLoad::Proxy, 8)
                .with_field_load(None),
        );
        assert!(matches!(spec.validate(), Err(Error::MissingFieldLoad { .. })));
    }
}
