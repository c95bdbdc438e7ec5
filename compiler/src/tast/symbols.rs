//! Resolved declaration facts
//!
//! The front-end hands the translator a [`DeclTable`]: every class,
//! function, constructor, accessor and property it resolved, with the
//! information the backend needs to lower and render references to it.
//! Declarations from other modules live in the same table so that the
//! renderer can import them.

use super::id_types::DeclId;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Source location information for a declaration, expression or statement
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct SourceLocation {
    /// File ID where this construct is defined
    pub file_id: u32,
    /// Line number (1-based)
    pub line: u32,
    /// Column number (1-based)
    pub column: u32,
    /// Byte offset in file
    pub byte_offset: u32,
}

impl SourceLocation {
    pub const fn new(file_id: u32, line: u32, column: u32, byte_offset: u32) -> Self {
        Self {
            file_id,
            line,
            column,
            byte_offset,
        }
    }

    pub const fn unknown() -> Self {
        Self::new(u32::MAX, 0, 0, 0)
    }

    pub const fn is_valid(self) -> bool {
        self.file_id != u32::MAX
    }
}

impl Default for SourceLocation {
    fn default() -> Self {
        Self::unknown()
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "{}:{}:{}", self.file_id, self.line, self.column)
        } else {
            write!(f, "<unknown>")
        }
    }
}

/// Primitive value kinds with dedicated operator lowering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimitiveKind {
    Int,
    Long,
    Short,
    Byte,
    Char,
    Float,
    Double,
    Boolean,
}

impl PrimitiveKind {
    /// Kinds represented by a host number
    pub fn is_number(self) -> bool {
        !matches!(self, PrimitiveKind::Long | PrimitiveKind::Boolean)
    }

    /// Kinds whose arithmetic is truncated to 32 bits
    pub fn is_integral(self) -> bool {
        matches!(
            self,
            PrimitiveKind::Int | PrimitiveKind::Short | PrimitiveKind::Byte | PrimitiveKind::Char
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            PrimitiveKind::Int => "Int",
            PrimitiveKind::Long => "Long",
            PrimitiveKind::Short => "Short",
            PrimitiveKind::Byte => "Byte",
            PrimitiveKind::Char => "Char",
            PrimitiveKind::Float => "Float",
            PrimitiveKind::Double => "Double",
            PrimitiveKind::Boolean => "Boolean",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "Int" => PrimitiveKind::Int,
            "Long" => PrimitiveKind::Long,
            "Short" => PrimitiveKind::Short,
            "Byte" => PrimitiveKind::Byte,
            "Char" => PrimitiveKind::Char,
            "Float" => PrimitiveKind::Float,
            "Double" => PrimitiveKind::Double,
            "Boolean" => PrimitiveKind::Boolean,
            _ => return None,
        })
    }
}

/// Resolved static type, as far as the backend needs to know it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeRef {
    Primitive(PrimitiveKind),
    String,
    Class(DeclId),
    Array(Box<TypeRef>),
    /// Function value with the given arity
    Function(usize),
    Any,
    Unit,
    Nothing,
    Nullable(Box<TypeRef>),
}

impl TypeRef {
    pub fn nullable(self) -> TypeRef {
        match self {
            TypeRef::Nullable(_) => self,
            other => TypeRef::Nullable(Box::new(other)),
        }
    }

    pub fn is_nullable(&self) -> bool {
        matches!(self, TypeRef::Nullable(_))
    }

    /// The type with any nullability stripped
    pub fn non_null(&self) -> &TypeRef {
        match self {
            TypeRef::Nullable(inner) => inner.non_null(),
            other => other,
        }
    }

    pub fn primitive(&self) -> Option<PrimitiveKind> {
        match self {
            TypeRef::Primitive(kind) => Some(*kind),
            _ => None,
        }
    }
}

/// Visibility of a declaration outside its module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Visibility {
    #[default]
    Public,
    Internal,
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Modality {
    #[default]
    Final,
    Open,
    Abstract,
}

/// Annotations the backend reacts to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotations {
    /// Maps the declaration directly onto a host built-in with this name
    #[serde(default)]
    pub native: Option<String>,
    /// Marks the raw-code intrinsic: its single argument is target source text
    #[serde(default)]
    pub raw_code: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassKind {
    Class,
    Interface,
    Object,
    Companion,
}

impl ClassKind {
    pub fn is_singleton(self) -> bool {
        matches!(self, ClassKind::Object | ClassKind::Companion)
    }
}

/// A member of a class that is implemented by forwarding to a delegate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegatedMember {
    /// The class's own (synthesized) member
    pub member: DeclId,
    /// The interface member it forwards to
    pub target: DeclId,
    /// The delegated interface
    pub interface: DeclId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassInfo {
    pub kind: ClassKind,
    pub superclass: Option<DeclId>,
    #[serde(default)]
    pub interfaces: Vec<DeclId>,
    /// Instances hold a reference to an instance of the enclosing class
    #[serde(default)]
    pub is_inner: bool,
    #[serde(default)]
    pub delegated_members: Vec<DelegatedMember>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FunctionKind {
    TopLevel,
    Member,
    Constructor { primary: bool },
    Getter,
    Setter,
    Local,
    Lambda,
}

impl FunctionKind {
    pub fn is_constructor(self) -> bool {
        matches!(self, FunctionKind::Constructor { .. })
    }

    /// Local functions and lambdas are lifted and receive their captures as
    /// leading parameters.
    pub fn is_local(self) -> bool {
        matches!(self, FunctionKind::Local | FunctionKind::Lambda)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamInfo {
    pub name: String,
    pub ty: TypeRef,
    #[serde(default)]
    pub vararg: bool,
}

impl ParamInfo {
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        Self {
            name: name.into(),
            ty,
            vararg: false,
        }
    }

    pub fn vararg(name: impl Into<String>, ty: TypeRef) -> Self {
        Self {
            name: name.into(),
            ty,
            vararg: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionInfo {
    pub kind: FunctionKind,
    pub params: Vec<ParamInfo>,
    #[serde(default)]
    pub has_extension_receiver: bool,
    #[serde(default)]
    pub modality: Modality,
    pub return_type: TypeRef,
    /// Property this function is the getter or setter of
    #[serde(default)]
    pub accessor_of: Option<DeclId>,
}

impl FunctionInfo {
    pub fn new(kind: FunctionKind, params: Vec<ParamInfo>, return_type: TypeRef) -> Self {
        Self {
            kind,
            params,
            has_extension_receiver: false,
            modality: Modality::Final,
            return_type,
            accessor_of: None,
        }
    }

    pub fn is_vararg(&self) -> bool {
        self.params.last().is_some_and(|p| p.vararg)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyInfo {
    pub ty: TypeRef,
    #[serde(default)]
    pub is_var: bool,
    #[serde(default)]
    pub modality: Modality,
    #[serde(default = "default_true")]
    pub has_backing_field: bool,
    /// Custom getter, absent for the default accessor
    #[serde(default)]
    pub getter: Option<DeclId>,
    #[serde(default)]
    pub setter: Option<DeclId>,
}

fn default_true() -> bool {
    true
}

impl PropertyInfo {
    pub fn new(ty: TypeRef, is_var: bool) -> Self {
        Self {
            ty,
            is_var,
            modality: Modality::Final,
            has_backing_field: true,
            getter: None,
            setter: None,
        }
    }

    /// Reads and writes can go straight to the backing field
    pub fn is_field_like(&self) -> bool {
        self.modality == Modality::Final
            && self.has_backing_field
            && self.getter.is_none()
            && self.setter.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeclKind {
    Class(ClassInfo),
    Function(FunctionInfo),
    Property(PropertyInfo),
}

/// One resolved declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclInfo {
    pub name: String,
    /// Stable host-visible name; defaults to `name`
    #[serde(default)]
    pub js_name: Option<String>,
    /// Module the declaration is compiled into
    pub module: String,
    #[serde(default)]
    pub package: Vec<String>,
    /// Enclosing class or function
    #[serde(default)]
    pub parent: Option<DeclId>,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub annotations: Annotations,
    pub kind: DeclKind,
}

impl DeclInfo {
    pub fn new(name: impl Into<String>, module: impl Into<String>, kind: DeclKind) -> Self {
        Self {
            name: name.into(),
            js_name: None,
            module: module.into(),
            package: Vec::new(),
            parent: None,
            visibility: Visibility::Public,
            annotations: Annotations::default(),
            kind,
        }
    }

    pub fn with_parent(mut self, parent: DeclId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_package(mut self, package: &[&str]) -> Self {
        self.package = package.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_js_name(mut self, js_name: impl Into<String>) -> Self {
        self.js_name = Some(js_name.into());
        self
    }

    pub fn with_native(mut self, host_name: impl Into<String>) -> Self {
        self.annotations.native = Some(host_name.into());
        self
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn js_name(&self) -> &str {
        self.js_name.as_deref().unwrap_or(&self.name)
    }

    pub fn as_class(&self) -> Option<&ClassInfo> {
        match &self.kind {
            DeclKind::Class(info) => Some(info),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&FunctionInfo> {
        match &self.kind {
            DeclKind::Function(info) => Some(info),
            _ => None,
        }
    }

    pub fn as_property(&self) -> Option<&PropertyInfo> {
        match &self.kind {
            DeclKind::Property(info) => Some(info),
            _ => None,
        }
    }
}

/// Table of all resolved declarations visible to a compilation unit
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeclTable {
    decls: IndexMap<DeclId, DeclInfo>,
    #[serde(skip)]
    by_name: IndexMap<String, DeclId>,
}

impl DeclTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a declaration and return its identity
    pub fn add(&mut self, info: DeclInfo) -> DeclId {
        let id = DeclId::from_raw(self.decls.len() as u32);
        self.decls.insert(id, info);
        let qualified = self.qualified_name(id);
        self.by_name.entry(qualified).or_insert(id);
        id
    }

    pub fn get(&self, id: DeclId) -> Option<&DeclInfo> {
        self.decls.get(&id)
    }

    pub fn get_mut(&mut self, id: DeclId) -> Option<&mut DeclInfo> {
        self.decls.get_mut(&id)
    }

    pub fn function(&self, id: DeclId) -> Option<&FunctionInfo> {
        self.get(id).and_then(DeclInfo::as_function)
    }

    pub fn class(&self, id: DeclId) -> Option<&ClassInfo> {
        self.get(id).and_then(DeclInfo::as_class)
    }

    pub fn property(&self, id: DeclId) -> Option<&PropertyInfo> {
        self.get(id).and_then(DeclInfo::as_property)
    }

    pub fn iter(&self) -> impl Iterator<Item = (DeclId, &DeclInfo)> {
        self.decls.iter().map(|(id, info)| (*id, info))
    }

    pub fn len(&self) -> usize {
        self.decls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decls.is_empty()
    }

    /// Dotted name: package, enclosing declarations, then the simple name
    pub fn qualified_name(&self, id: DeclId) -> String {
        let mut segments = Vec::new();
        let mut current = Some(id);
        let mut package = &[][..];
        while let Some(decl) = current.and_then(|id| self.get(id)) {
            segments.push(decl.name.as_str());
            package = &decl.package;
            current = decl.parent;
        }
        segments.reverse();
        let mut parts: Vec<&str> = package.iter().map(String::as_str).collect();
        parts.extend(segments);
        parts.join(".")
    }

    /// Look up a declaration by its dotted name. The first registration wins
    /// for overloaded names.
    pub fn lookup(&self, qualified_name: &str) -> Option<DeclId> {
        self.by_name.get(qualified_name).copied()
    }

    /// Rebuild the name index after deserialization
    pub fn reindex(&mut self) {
        self.by_name.clear();
        let ids: Vec<DeclId> = self.decls.keys().copied().collect();
        for id in ids {
            let qualified = self.qualified_name(id);
            self.by_name.entry(qualified).or_insert(id);
        }
    }

    /// The class a member function or property is declared in
    pub fn owner_class(&self, id: DeclId) -> Option<DeclId> {
        let parent = self.get(id)?.parent?;
        self.class(parent).map(|_| parent)
    }

    /// Walks superclass links
    pub fn is_subclass_of(&self, class: DeclId, ancestor: DeclId) -> bool {
        let mut current = Some(class);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            let Some(info) = self.class(id) else {
                return false;
            };
            if info
                .interfaces
                .iter()
                .any(|iface| self.is_subclass_of(*iface, ancestor))
            {
                return true;
            }
            current = info.superclass;
        }
        false
    }
}
