//! IR declarations and the module that owns them
//!
//! A module owns files; files, classes and functions are *containers* whose
//! [`DeclMap`] registers the declarations they own, keyed by the resolved
//! declaration identity. The module keeps the reverse index from identity
//! to container, so a declaration lives in exactly one map at a time.

use super::arena::{
    Arena, ClassId, ClosureFieldId, DelegateFieldId, FunctionId, IrFileId, LabelId, PropertyId,
    VarId,
};
use super::expr::IrExpr;
use super::stmt::IrStmt;
use crate::tast::{ClassKind, DeclId, FunctionKind, SourceLocation};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VariableKind {
    /// Belongs to a function's variable scope
    Local,
    /// Synthesized; created and deleted freely by passes
    Temporary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    /// Suggested display name
    pub name: Option<String>,
    pub kind: VariableKind,
    /// Function whose scope defines the variable
    pub function: FunctionId,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Label {
    pub name: Option<String>,
}

/// Something that owns declarations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Container {
    File(IrFileId),
    Class(ClassId),
    /// Local classes and functions of a function body
    Function(FunctionId),
}

/// A registered declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IrDecl {
    Class(ClassId),
    Function(FunctionId),
    Property(PropertyId),
}

/// Declarations owned by one container, in registration order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeclMap {
    entries: IndexMap<DeclId, IrDecl>,
}

impl DeclMap {
    /// Insert or replace; returns the replaced entry
    pub fn insert(&mut self, key: DeclId, decl: IrDecl) -> Option<IrDecl> {
        self.entries.insert(key, decl)
    }

    /// Remove `key` only if it still maps to exactly `decl`
    pub fn remove_exact(&mut self, key: DeclId, decl: IrDecl) -> bool {
        if self.entries.get(&key) == Some(&decl) {
            self.entries.shift_remove(&key);
            true
        } else {
            false
        }
    }

    pub fn get(&self, key: DeclId) -> Option<IrDecl> {
        self.entries.get(&key).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (DeclId, IrDecl)> + '_ {
        self.entries.iter().map(|(k, v)| (*k, *v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrFile {
    pub name: String,
    pub package: Vec<String>,
    pub decls: DeclMap,
    /// Synthesized function running top-level property initializers
    pub initializer: Option<FunctionId>,
}

/// Delegated supertype waiting for delegation lowering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrDelegation {
    pub interface: DeclId,
    /// Delegate expression, lowered in the primary constructor's scope
    pub initializer: IrExpr,
    /// Statements the initializer needs, also in constructor scope
    pub prelude: Vec<IrStmt>,
    /// Index in the primary constructor body where the delegate is
    /// evaluated
    pub insert_at: usize,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrClass {
    pub decl: DeclId,
    pub name: String,
    pub kind: ClassKind,
    pub container: Container,
    pub decls: DeclMap,
    pub is_inner: bool,
    pub closure_fields: Vec<ClosureFieldId>,
    pub delegate_fields: Vec<DelegateFieldId>,
    pub delegations: Vec<IrDelegation>,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrFunction {
    pub decl: DeclId,
    pub name: String,
    pub kind: FunctionKind,
    pub container: Container,
    pub extension_receiver: Option<VarId>,
    pub params: Vec<VarId>,
    /// Absent for abstract and native functions
    pub body: Option<Vec<IrStmt>>,
    /// Locals and temporaries declared in this function; the liveness registry
    pub variables: IndexSet<VarId>,
    /// Captured variables of a lifted local function, passed ahead of `params`
    pub captures: Vec<VarId>,
    /// A lifted local function reads `this` of its enclosing class
    pub captures_this: bool,
    /// Constructor parameters declared as `val`/`var`
    pub property_params: Vec<(VarId, DeclId)>,
    pub location: SourceLocation,
}

impl IrFunction {
    pub fn new(
        decl: DeclId,
        name: impl Into<String>,
        kind: FunctionKind,
        container: Container,
        location: SourceLocation,
    ) -> Self {
        Self {
            decl,
            name: name.into(),
            kind,
            container,
            extension_receiver: None,
            params: Vec::new(),
            body: None,
            variables: IndexSet::new(),
            captures: Vec::new(),
            captures_this: false,
            property_params: Vec::new(),
            location,
        }
    }

    pub fn is_constructor(&self) -> bool {
        self.kind.is_constructor()
    }

    pub fn is_primary_constructor(&self) -> bool {
        matches!(self.kind, FunctionKind::Constructor { primary: true })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrProperty {
    pub decl: DeclId,
    pub name: String,
    pub container: Container,
    pub has_backing_field: bool,
    pub getter: Option<FunctionId>,
    pub setter: Option<FunctionId>,
}

/// What a closure field holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capture {
    Variable(VarId),
    /// Instance of an enclosing class
    Instance(DeclId),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosureField {
    pub class: ClassId,
    pub capture: Capture,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegateField {
    pub class: ClassId,
    pub interface: DeclId,
    pub name: String,
}

/// A compilation unit's IR
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IrModule {
    pub name: String,
    pub files: Arena<IrFileId, IrFile>,
    pub classes: Arena<ClassId, IrClass>,
    pub functions: Arena<FunctionId, IrFunction>,
    pub properties: Arena<PropertyId, IrProperty>,
    pub variables: Arena<VarId, Variable>,
    pub labels: Arena<LabelId, Label>,
    pub closure_fields: Arena<ClosureFieldId, ClosureField>,
    pub delegate_fields: Arena<DelegateFieldId, DelegateField>,
    /// Local declarations of function bodies
    local_decls: IndexMap<FunctionId, DeclMap>,
    /// Reverse index: declaration identity to owning container
    owners: IndexMap<DeclId, Container>,
}

impl IrModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn add_file(&mut self, name: impl Into<String>, package: Vec<String>) -> IrFileId {
        self.files.alloc(IrFile {
            name: name.into(),
            package,
            decls: DeclMap::default(),
            initializer: None,
        })
    }

    pub fn new_variable(
        &mut self,
        name: Option<String>,
        kind: VariableKind,
        function: FunctionId,
    ) -> VarId {
        let var = self.variables.alloc(Variable {
            name,
            kind,
            function,
        });
        self.functions[function].variables.insert(var);
        var
    }

    /// Parameters live in the function's parameter list, not its registry
    pub fn new_parameter(&mut self, name: impl Into<String>, function: FunctionId) -> VarId {
        self.variables.alloc(Variable {
            name: Some(name.into()),
            kind: VariableKind::Local,
            function,
        })
    }

    /// Drop a variable from its function's registry
    pub fn unregister_variable(&mut self, var: VarId) -> bool {
        let function = self.variables[var].function;
        self.functions[function].variables.shift_remove(&var)
    }

    pub fn new_label(&mut self, name: Option<String>) -> LabelId {
        self.labels.alloc(Label { name })
    }

    fn decl_map_mut(&mut self, container: Container) -> &mut DeclMap {
        match container {
            Container::File(id) => &mut self.files[id].decls,
            Container::Class(id) => &mut self.classes[id].decls,
            Container::Function(id) => self.local_decls.entry(id).or_default(),
        }
    }

    pub fn decl_map(&self, container: Container) -> Option<&DeclMap> {
        match container {
            Container::File(id) => self.files.get(id).map(|f| &f.decls),
            Container::Class(id) => self.classes.get(id).map(|c| &c.decls),
            Container::Function(id) => self.local_decls.get(&id),
        }
    }

    /// Register `decl` under `key` in `container`. A registration under the
    /// same key in another container is removed first.
    pub fn register(&mut self, container: Container, key: DeclId, decl: IrDecl) {
        if let Some(previous) = self.owners.get(&key).copied() {
            if previous != container {
                if let Some(existing) = self.decl_map(previous).and_then(|m| m.get(key)) {
                    self.decl_map_mut(previous).remove_exact(key, existing);
                }
            }
        }
        self.decl_map_mut(container).insert(key, decl);
        self.owners.insert(key, container);
    }

    /// Remove the registration of `decl` under `key`; no-op when the owning
    /// map has since been pointed at a different declaration.
    pub fn unregister(&mut self, key: DeclId, decl: IrDecl) -> bool {
        let Some(container) = self.owners.get(&key).copied() else {
            return false;
        };
        let removed = self.decl_map_mut(container).remove_exact(key, decl);
        if removed {
            self.owners.shift_remove(&key);
        }
        removed
    }

    pub fn owner(&self, key: DeclId) -> Option<Container> {
        self.owners.get(&key).copied()
    }

    pub fn lookup(&self, key: DeclId) -> Option<IrDecl> {
        let container = self.owner(key)?;
        self.decl_map(container)?.get(key)
    }

    pub fn function_by_decl(&self, key: DeclId) -> Option<FunctionId> {
        match self.lookup(key)? {
            IrDecl::Function(id) => Some(id),
            _ => None,
        }
    }

    pub fn class_by_decl(&self, key: DeclId) -> Option<ClassId> {
        match self.lookup(key)? {
            IrDecl::Class(id) => Some(id),
            _ => None,
        }
    }

    pub fn property_by_decl(&self, key: DeclId) -> Option<PropertyId> {
        match self.lookup(key)? {
            IrDecl::Property(id) => Some(id),
            _ => None,
        }
    }

    /// Whether the declaration is defined in this module
    pub fn is_local_decl(&self, key: DeclId) -> bool {
        self.owners.contains_key(&key)
    }

    /// Member functions of a class in registration order
    pub fn class_functions(&self, class: ClassId) -> Vec<FunctionId> {
        self.classes[class]
            .decls
            .iter()
            .filter_map(|(_, decl)| match decl {
                IrDecl::Function(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn constructors(&self, class: ClassId) -> Vec<FunctionId> {
        self.class_functions(class)
            .into_iter()
            .filter(|id| self.functions[*id].is_constructor())
            .collect()
    }

    pub fn primary_constructor(&self, class: ClassId) -> Option<FunctionId> {
        self.class_functions(class)
            .into_iter()
            .find(|id| self.functions[*id].is_primary_constructor())
    }

    /// Local classes and functions declared in a function body
    pub fn local_decls(&self, function: FunctionId) -> Vec<IrDecl> {
        self.local_decls
            .get(&function)
            .map(|m| m.iter().map(|(_, d)| d).collect())
            .unwrap_or_default()
    }

    /// The class whose `this` is in scope inside `function`. Local functions
    /// and lambdas see the `this` of their enclosing function.
    pub fn this_class(&self, function: FunctionId) -> Option<ClassId> {
        let mut current = function;
        loop {
            match self.functions[current].container {
                Container::Class(class) => return Some(class),
                Container::File(_) => return None,
                Container::Function(outer) => {
                    if !self.functions[current].kind.is_local() {
                        return None;
                    }
                    current = outer;
                }
            }
        }
    }

    /// Function a local class is declared in
    pub fn enclosing_function(&self, class: ClassId) -> Option<FunctionId> {
        match self.classes[class].container {
            Container::Function(function) => Some(function),
            _ => None,
        }
    }

    /// True when `function` is lexically nested in `class`, through member
    /// functions, nested classes and local declarations
    pub fn function_is_within(&self, function: FunctionId, class: ClassId) -> bool {
        let mut container = self.functions[function].container;
        loop {
            match container {
                Container::File(_) => return false,
                Container::Class(id) if id == class => return true,
                Container::Class(id) => container = self.classes[id].container,
                Container::Function(id) => container = self.functions[id].container,
            }
        }
    }

    pub fn class_is_within(&self, inner: ClassId, outer: ClassId) -> bool {
        if inner == outer {
            return true;
        }
        let mut container = self.classes[inner].container;
        loop {
            match container {
                Container::File(_) => return false,
                Container::Class(id) if id == outer => return true,
                Container::Class(id) => container = self.classes[id].container,
                Container::Function(id) => container = self.functions[id].container,
            }
        }
    }

    pub fn closure_field_for(&self, class: ClassId, capture: Capture) -> Option<ClosureFieldId> {
        self.classes[class]
            .closure_fields
            .iter()
            .copied()
            .find(|id| self.closure_fields[*id].capture == capture)
    }

    /// Whether `name` already keys a field or property of `class`
    fn is_field_name_taken(&self, class: ClassId, name: &str) -> bool {
        let info = &self.classes[class];
        info.closure_fields
            .iter()
            .any(|id| self.closure_fields[*id].name == name)
            || info
                .delegate_fields
                .iter()
                .any(|id| self.delegate_fields[*id].name == name)
            || info.decls.iter().any(|(_, decl)| match decl {
                IrDecl::Property(id) => self.properties[id].name == name,
                _ => false,
            })
    }

    /// `base`, or `base_0`, `base_1`, ... when the class already uses it
    fn unique_field_name(&self, class: ClassId, base: String) -> String {
        if !self.is_field_name_taken(class, &base) {
            return base;
        }
        let mut index = 0usize;
        loop {
            let candidate = format!("{}_{}", base, index);
            if !self.is_field_name_taken(class, &candidate) {
                return candidate;
            }
            index += 1;
        }
    }

    /// Append a closure field for `capture`, reusing an existing one. The
    /// name is made unique among the class's fields and properties.
    pub fn add_closure_field(&mut self, class: ClassId, capture: Capture, name: String) -> ClosureFieldId {
        if let Some(existing) = self.closure_field_for(class, capture) {
            return existing;
        }
        let name = self.unique_field_name(class, name);
        let id = self.closure_fields.alloc(ClosureField {
            class,
            capture,
            name,
        });
        self.classes[class].closure_fields.push(id);
        id
    }

    pub fn add_delegate_field(&mut self, class: ClassId, interface: DeclId, name: String) -> DelegateFieldId {
        let name = self.unique_field_name(class, name);
        let id = self.delegate_fields.alloc(DelegateField {
            class,
            interface,
            name,
        });
        self.classes[class].delegate_fields.push(id);
        id
    }

    pub fn variable_name(&self, var: VarId) -> Option<&str> {
        self.variables.get(var).and_then(|v| v.name.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc() -> SourceLocation {
        SourceLocation::unknown()
    }

    fn add_function(module: &mut IrModule, raw: u32, container: Container) -> FunctionId {
        module.functions.alloc(IrFunction::new(
            DeclId::from_raw(raw),
            format!("f{}", raw),
            FunctionKind::TopLevel,
            container,
            loc(),
        ))
    }

    fn add_class(module: &mut IrModule, raw: u32, container: Container) -> ClassId {
        module.classes.alloc(IrClass {
            decl: DeclId::from_raw(raw),
            name: format!("C{}", raw),
            kind: ClassKind::Class,
            container,
            decls: DeclMap::default(),
            is_inner: false,
            closure_fields: Vec::new(),
            delegate_fields: Vec::new(),
            delegations: Vec::new(),
            location: loc(),
        })
    }

    #[test]
    fn test_reregistering_replaces_entry() {
        let mut module = IrModule::new("m");
        let file = module.add_file("a.kt", Vec::new());
        let key = DeclId::from_raw(1);
        let first = add_function(&mut module, 1, Container::File(file));
        let second = add_function(&mut module, 1, Container::File(file));

        module.register(Container::File(file), key, IrDecl::Function(first));
        module.register(Container::File(file), key, IrDecl::Function(second));

        assert_eq!(module.files[file].decls.len(), 1);
        assert_eq!(module.function_by_decl(key), Some(second));
        assert_eq!(module.owner(key), Some(Container::File(file)));
    }

    #[test]
    fn test_registering_elsewhere_moves_entry() {
        let mut module = IrModule::new("m");
        let file = module.add_file("a.kt", Vec::new());
        let class = add_class(&mut module, 10, Container::File(file));
        let key = DeclId::from_raw(1);
        let function = add_function(&mut module, 1, Container::File(file));

        module.register(Container::File(file), key, IrDecl::Function(function));
        module.register(Container::Class(class), key, IrDecl::Function(function));

        assert!(module.files[file].decls.is_empty());
        assert_eq!(module.classes[class].decls.get(key), Some(IrDecl::Function(function)));
        assert_eq!(module.owner(key), Some(Container::Class(class)));
        assert_eq!(module.class_functions(class), vec![function]);
    }

    #[test]
    fn test_unregistering_stale_instance_is_noop() {
        let mut module = IrModule::new("m");
        let file = module.add_file("a.kt", Vec::new());
        let key = DeclId::from_raw(1);
        let stale = add_function(&mut module, 1, Container::File(file));
        let current = add_function(&mut module, 1, Container::File(file));
        module.register(Container::File(file), key, IrDecl::Function(stale));
        module.register(Container::File(file), key, IrDecl::Function(current));

        assert!(!module.unregister(key, IrDecl::Function(stale)));
        assert_eq!(module.function_by_decl(key), Some(current));
        assert!(module.is_local_decl(key));

        assert!(module.unregister(key, IrDecl::Function(current)));
        assert!(module.files[file].decls.is_empty());
        assert!(!module.is_local_decl(key));
    }

    #[test]
    fn test_field_names_avoid_fields_and_properties() {
        let mut module = IrModule::new("m");
        let file = module.add_file("a.kt", Vec::new());
        let function = add_function(&mut module, 0, Container::File(file));
        let class = add_class(&mut module, 10, Container::Function(function));
        let property_decl = DeclId::from_raw(11);
        let property = module.properties.alloc(IrProperty {
            decl: property_decl,
            name: "$x".into(),
            container: Container::Class(class),
            has_backing_field: true,
            getter: None,
            setter: None,
        });
        module.register(Container::Class(class), property_decl, IrDecl::Property(property));

        let x = module.new_variable(Some("x".into()), VariableKind::Local, function);
        let y = module.new_variable(Some("x".into()), VariableKind::Local, function);
        let first = module.add_closure_field(class, Capture::Variable(x), "$x".into());
        let second = module.add_closure_field(class, Capture::Variable(y), "$x".into());
        let again = module.add_closure_field(class, Capture::Variable(x), "$x".into());

        assert_eq!(module.closure_fields[first].name, "$x_0");
        assert_eq!(module.closure_fields[second].name, "$x_1");
        assert_eq!(again, first);

        let delegate = module.add_delegate_field(class, DeclId::from_raw(20), "$x".into());
        assert_eq!(module.delegate_fields[delegate].name, "$x_2");
    }
}
