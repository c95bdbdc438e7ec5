//! ES5 renderer
//!
//! Turns finished IR into the target AST. The output is one module wrapper
//! function; its body declares every class and function of the module at
//! top level (nested and local declarations are lifted), runs the file
//! initializers and fills the export object:
//!
//! ```text
//! var app = function (_, $runtime) {
//!   'use strict';
//!   ...declarations...
//!   main$init();
//!   _.main = main;
//!   return _;
//! }(typeof app === 'undefined' ? {} : app, kotlin);
//! ```
//!
//! Names are allocated up front for everything that lives at module level,
//! and per function for locals. Declarations of other modules are bound to
//! module-level variables on first use.

use super::js_ast::{JsBinaryOp, JsCatch, JsExpr, JsFunction, JsProgram, JsStmt, JsSwitchCase, JsUnaryOp, JsVarDecl};
use super::naming::{sanitize, NameScope, EXPORTS, RUNTIME};
use super::runtime;
use crate::error_codes;
use crate::ir::visit::child_lists;
use crate::ir::{
    BinaryOp, CatchClause, ClassId, Container, FunctionId, IrDecl, IrExpr, IrField, IrModule, IrStmt,
    LabelId, OperandKind, PropertyId, StmtKind, UnaryOp, VarId,
};
use crate::tast::{
    ClassInfo, ClassKind, Constant, DeclId, DeclInfo, DeclTable, FunctionInfo, FunctionKind, PropertyInfo,
    SourceLocation, TypeRef, Visibility, BUILTIN_MODULE,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// IR the renderer cannot express in the target
#[derive(Debug, Clone, PartialEq)]
pub struct RenderError {
    pub message: String,
    pub location: SourceLocation,
    pub code: u16,
}

impl RenderError {
    pub fn new(code: u16, message: impl Into<String>, location: SourceLocation) -> Self {
        Self {
            message: message.into(),
            location,
            code,
        }
    }
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at {}: {}",
            error_codes::format_error_code(self.code),
            self.location,
            self.message
        )
    }
}

impl std::error::Error for RenderError {}

pub type RenderResult<T> = Result<T, RenderError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderOptions {
    /// Attach `$metadata$` objects to classes
    pub emit_metadata: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self { emit_metadata: true }
    }
}

/// Render a finished module
pub fn render_module(module: &IrModule, decls: &DeclTable, options: &RenderOptions) -> RenderResult<JsProgram> {
    let mut renderer = JsRenderer::new(module, decls, options.clone());
    let program = renderer.render()?;
    tracing::debug!(
        "rendered module '{}': {} imports, {} external modules",
        module.name,
        renderer.imports.len(),
        renderer.module_bindings.len()
    );
    Ok(program)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum JumpKind {
    Loop,
    Switch,
    Block,
}

/// Per-function rendering state
#[derive(Debug, Default)]
pub(super) struct FunctionFrame {
    pub(super) function: Option<FunctionId>,
    pub(super) decl: DeclId,
    names: NameScope,
    vars: IndexMap<VarId, String>,
    params: HashSet<VarId>,
    /// Temporaries introduced by the renderer itself
    temps: Vec<String>,
    labels: HashMap<LabelId, String>,
    label_scope: NameScope,
    used_labels: HashSet<LabelId>,
    /// Enclosing jump targets, innermost last
    jumps: Vec<(LabelId, JumpKind)>,
    /// What `this` renders as; absent outside of instance code
    this_expr: Option<JsExpr>,
    /// Secondary constructors return the instance they initialized
    returns_this: bool,
}

pub struct JsRenderer<'a> {
    pub(super) module: &'a IrModule,
    pub(super) decls: &'a DeclTable,
    options: RenderOptions,
    globals: NameScope,
    /// Every identifier allocated in a function so far
    local_names: HashSet<String>,
    pub(super) class_names: HashMap<ClassId, String>,
    pub(super) function_names: HashMap<FunctionId, String>,
    property_names: HashMap<PropertyId, String>,
    /// Instance variable and accessor function of each singleton
    pub(super) singletons: HashMap<ClassId, (String, String)>,
    /// Parameter bound to each external module
    module_bindings: IndexMap<String, String>,
    /// Module-level bindings of external declarations
    imports: IndexMap<DeclId, (String, JsExpr)>,
    rendered_classes: HashSet<ClassId>,
    /// Functions some nested function returns from
    non_local_targets: HashSet<DeclId>,
    pub(super) frame: FunctionFrame,
    location: SourceLocation,
}

fn join(prefix: String, name: String) -> String {
    if prefix.is_empty() {
        name
    } else {
        format!("{}${}", prefix, name)
    }
}

/// A property whose accessors are installed on the prototype; its backing
/// field needs a different key
fn has_accessor_property(info: &PropertyInfo) -> bool {
    !info.is_field_like() && (info.getter.is_some() || info.setter.is_some())
}

/// Declarations of the functions that nested functions return from
fn non_local_targets(module: &IrModule) -> HashSet<DeclId> {
    fn collect(stmts: &[IrStmt], own: DeclId, out: &mut HashSet<DeclId>) {
        for stmt in stmts {
            if let StmtKind::Return { target, .. } = &stmt.kind {
                if *target != own {
                    out.insert(*target);
                }
            }
            for list in child_lists(stmt) {
                collect(list, own, out);
            }
        }
    }
    let mut targets = HashSet::new();
    for (_, function) in module.functions.iter() {
        if let Some(body) = &function.body {
            collect(body, function.decl, &mut targets);
        }
    }
    targets
}

fn sequence(setup: Option<JsExpr>, value: JsExpr) -> JsExpr {
    match setup {
        Some(setup) => JsExpr::Sequence(vec![setup, value]),
        None => value,
    }
}

impl<'a> JsRenderer<'a> {
    pub fn new(module: &'a IrModule, decls: &'a DeclTable, options: RenderOptions) -> Self {
        let mut renderer = Self {
            module,
            decls,
            options,
            globals: NameScope::new(),
            local_names: HashSet::new(),
            class_names: HashMap::new(),
            function_names: HashMap::new(),
            property_names: HashMap::new(),
            singletons: HashMap::new(),
            module_bindings: IndexMap::new(),
            imports: IndexMap::new(),
            rendered_classes: HashSet::new(),
            non_local_targets: non_local_targets(module),
            frame: FunctionFrame::default(),
            location: SourceLocation::unknown(),
        };
        renderer.allocate_names();
        renderer
    }

    // ---------------------------------------------------------------------
    // Errors and declaration facts
    // ---------------------------------------------------------------------

    pub(super) fn error(&self, code: u16, message: impl Into<String>) -> RenderError {
        RenderError::new(code, message, self.location)
    }

    pub(super) fn decl_info(&self, decl: DeclId) -> RenderResult<&'a DeclInfo> {
        self.decls.get(decl).ok_or_else(|| {
            self.error(
                error_codes::UNRESOLVED_DECLARATION,
                format!("declaration {} is not in the declaration table", decl),
            )
        })
    }

    pub(super) fn function_info(&self, decl: DeclId) -> RenderResult<&'a FunctionInfo> {
        let info = self.decl_info(decl)?;
        info.as_function().ok_or_else(|| {
            self.error(
                error_codes::DECLARATION_KIND_MISMATCH,
                format!("'{}' is not a function", info.name),
            )
        })
    }

    fn class_info(&self, decl: DeclId) -> RenderResult<&'a ClassInfo> {
        let info = self.decl_info(decl)?;
        info.as_class().ok_or_else(|| {
            self.error(
                error_codes::DECLARATION_KIND_MISMATCH,
                format!("'{}' is not a class", info.name),
            )
        })
    }

    /// Host-visible name of a declaration, sanitized
    pub(super) fn js_name(&self, decl: DeclId, fallback: &str) -> String {
        sanitize(self.decls.get(decl).map_or(fallback, DeclInfo::js_name))
    }

    pub(super) fn is_any(&self, class: DeclId) -> bool {
        self.decls.get(class).is_some_and(|info| info.module == BUILTIN_MODULE)
            && self.decls.qualified_name(class) == "kotlin.Any"
    }

    // ---------------------------------------------------------------------
    // Module-level names
    // ---------------------------------------------------------------------

    fn class_base(&self, class: ClassId) -> String {
        let info = &self.module.classes[class];
        join(self.container_base(info.container), self.js_name(info.decl, &info.name))
    }

    fn function_base(&self, function: FunctionId) -> String {
        let info = &self.module.functions[function];
        let own = self.js_name(info.decl, &info.name);
        match info.container {
            Container::File(_) => own,
            Container::Class(class) if info.is_constructor() => self.class_base(class),
            Container::Class(class) => join(self.class_base(class), own),
            Container::Function(outer) => join(self.function_base(outer), own),
        }
    }

    fn container_base(&self, container: Container) -> String {
        match container {
            Container::File(_) => String::new(),
            Container::Class(class) => self.class_base(class),
            Container::Function(function) => self.function_base(function),
        }
    }

    /// Names of everything declared at module level
    fn allocate_names(&mut self) {
        let module = self.module;
        for (id, class) in module.classes.iter() {
            let base = self.class_base(id);
            let name = self.globals.fresh(&base);
            if class.kind.is_singleton() {
                let instance = self.globals.fresh(&format!("{}_instance", name));
                let getter = self.globals.fresh(&format!("{}_getInstance", name));
                self.singletons.insert(id, (instance, getter));
            }
            self.class_names.insert(id, name);
        }
        for (id, function) in module.functions.iter() {
            let base = match function.container {
                Container::Class(class) if function.is_constructor() && !function.is_primary_constructor() => {
                    format!("{}_init", self.class_names[&class])
                }
                Container::Class(_) => continue,
                _ => self.function_base(id),
            };
            let name = self.globals.fresh(&base);
            self.function_names.insert(id, name);
        }
        for (id, property) in module.properties.iter() {
            if let Container::File(_) = property.container {
                let base = self.js_name(property.decl, &property.name);
                let name = self.globals.fresh(&base);
                self.property_names.insert(id, name);
            }
        }
    }

    /// A module-level name no function has used as a local
    fn fresh_global(&mut self, suggestion: &str) -> String {
        loop {
            let name = self.globals.fresh(suggestion);
            if !self.local_names.contains(&name) {
                self.frame.names.reserve(&name);
                return name;
            }
        }
    }

    fn fresh_local(&mut self, suggestion: &str) -> String {
        let name = self.frame.names.fresh(suggestion);
        self.local_names.insert(name.clone());
        name
    }

    /// Object holding the exports of `module_name`
    fn module_object(&mut self, module_name: &str) -> JsExpr {
        if module_name == BUILTIN_MODULE {
            return JsExpr::ident(RUNTIME);
        }
        if module_name == self.module.name {
            return JsExpr::ident(EXPORTS);
        }
        if let Some(binding) = self.module_bindings.get(module_name) {
            return JsExpr::ident(binding.clone());
        }
        let binding = self.fresh_global(&format!("$module${}", sanitize(module_name)));
        self.module_bindings.insert(module_name.to_string(), binding.clone());
        JsExpr::ident(binding)
    }

    /// Exported name of an external declaration: enclosing classes joined
    /// with `$`
    pub(super) fn external_path(&self, decl: DeclId) -> String {
        let mut parts = Vec::new();
        let mut current = Some(decl);
        while let Some(info) = current.and_then(|id| self.decls.get(id)) {
            parts.push(sanitize(info.js_name()));
            current = info.parent.filter(|parent| self.decls.class(*parent).is_some());
        }
        parts.reverse();
        parts.join("$")
    }

    /// Module-level binding of an external declaration
    pub(super) fn import(&mut self, decl: DeclId) -> RenderResult<JsExpr> {
        if let Some((name, _)) = self.imports.get(&decl) {
            return Ok(JsExpr::ident(name.clone()));
        }
        let info = self.decl_info(decl)?;
        let path = self.external_path(decl);
        let source = match &info.annotations.native {
            Some(host) => JsExpr::path(host),
            None => JsExpr::member(self.module_object(&info.module), path.clone()),
        };
        let name = self.fresh_global(&path);
        self.imports.insert(decl, (name.clone(), source));
        Ok(JsExpr::ident(name))
    }

    pub(super) fn class_ref(&mut self, decl: DeclId) -> RenderResult<JsExpr> {
        match self.module.class_by_decl(decl) {
            Some(id) => Ok(JsExpr::ident(self.class_names[&id].clone())),
            None => self.import(decl),
        }
    }

    /// Reference to a member of an external module without binding it
    pub(super) fn external_member(&mut self, decl: DeclId, suffix: &str) -> RenderResult<JsExpr> {
        let info = self.decl_info(decl)?;
        if let Some(host) = &info.annotations.native {
            return Ok(JsExpr::path(host));
        }
        let object = self.module_object(&info.module);
        Ok(JsExpr::member(object, format!("{}{}", self.external_path(decl), suffix)))
    }

    // ---------------------------------------------------------------------
    // Module
    // ---------------------------------------------------------------------

    pub fn render(&mut self) -> RenderResult<JsProgram> {
        let module = self.module;
        let mut body = Vec::new();
        for (_, file) in module.files.iter() {
            for (_, decl) in file.decls.iter() {
                self.render_decl(decl, &mut body)?;
            }
            if let Some(initializer) = file.initializer {
                self.render_function_decl(initializer, &mut body)?;
            }
        }
        for (_, file) in module.files.iter() {
            if let Some(initializer) = file.initializer {
                let name = self.function_names[&initializer].clone();
                body.push(JsStmt::Expr(JsExpr::call(JsExpr::ident(name), Vec::new())));
            }
        }
        self.render_exports(&mut body)?;
        body.push(JsStmt::Return(Some(JsExpr::ident(EXPORTS))));

        let mut wrapper = vec![JsStmt::Expr(JsExpr::string("use strict"))];
        for (_, (name, source)) in &self.imports {
            wrapper.push(JsStmt::var(name.clone(), Some(source.clone())));
        }
        wrapper.extend(body);

        let module_name = sanitize(&module.name);
        let mut params = vec![EXPORTS.to_string(), RUNTIME.to_string()];
        let mut args = vec![
            JsExpr::conditional(
                JsExpr::binary(
                    JsBinaryOp::StrictEq,
                    JsExpr::unary(JsUnaryOp::TypeOf, JsExpr::ident(module_name.clone())),
                    JsExpr::string("undefined"),
                ),
                JsExpr::Object(Vec::new()),
                JsExpr::ident(module_name.clone()),
            ),
            JsExpr::ident(BUILTIN_MODULE),
        ];
        for (external, binding) in &self.module_bindings {
            params.push(binding.clone());
            args.push(JsExpr::ident(sanitize(external)));
        }
        let wrapper = JsExpr::Function(Box::new(JsFunction::new(None, params, wrapper)));
        Ok(JsProgram {
            body: vec![JsStmt::var(module_name, Some(JsExpr::call(wrapper, args)))],
        })
    }

    fn render_decl(&mut self, decl: IrDecl, out: &mut Vec<JsStmt>) -> RenderResult<()> {
        match decl {
            IrDecl::Class(id) => self.render_class(id, out),
            IrDecl::Function(id) => self.render_function_decl(id, out),
            IrDecl::Property(id) => {
                let property = &self.module.properties[id];
                if property.has_backing_field {
                    if let Some(name) = self.property_names.get(&id) {
                        out.push(JsStmt::var(name.clone(), None));
                    }
                }
                Ok(())
            }
        }
    }

    /// A module-level function declaration, followed by its lifted locals
    fn render_function_decl(&mut self, id: FunctionId, out: &mut Vec<JsStmt>) -> RenderResult<()> {
        if self.module.functions[id].body.is_some() {
            let name = self.function_names.get(&id).cloned();
            let function = self.render_function(id, name)?;
            out.push(JsStmt::Function(function));
        }
        self.render_local_decls(id, out)
    }

    fn render_local_decls(&mut self, function: FunctionId, out: &mut Vec<JsStmt>) -> RenderResult<()> {
        for decl in self.module.local_decls(function) {
            self.render_decl(decl, out)?;
        }
        Ok(())
    }

    fn render_exports(&mut self, out: &mut Vec<JsStmt>) -> RenderResult<()> {
        let module = self.module;
        let exports = JsExpr::ident(EXPORTS);

        for (id, class) in module.classes.iter() {
            let local = self.within_function(class.container);
            let public = self
                .decls
                .get(class.decl)
                .map_or(true, |info| info.visibility == Visibility::Public);
            if local || !public {
                continue;
            }
            let key = self.class_base(id);
            match self.singletons.get(&id) {
                Some((_, getter)) => out.push(define_property(
                    exports.clone(),
                    &key,
                    Some(JsExpr::ident(getter.clone())),
                    None,
                )),
                None => out.push(JsStmt::assign(
                    JsExpr::member(exports.clone(), key),
                    JsExpr::ident(self.class_names[&id].clone()),
                )),
            }
        }

        for (_, file) in module.files.iter() {
            for (key, decl) in file.decls.iter() {
                let Some(info) = self.decls.get(key) else {
                    continue;
                };
                if info.visibility != Visibility::Public {
                    continue;
                }
                let export = sanitize(info.js_name());
                match decl {
                    IrDecl::Function(id) => {
                        let function = &module.functions[id];
                        if function.body.is_none() || matches!(function.kind, FunctionKind::Getter | FunctionKind::Setter) {
                            continue;
                        }
                        out.push(JsStmt::assign(
                            JsExpr::member(exports.clone(), export),
                            JsExpr::ident(self.function_names[&id].clone()),
                        ));
                    }
                    IrDecl::Property(id) => {
                        let Some(property) = info.as_property() else {
                            continue;
                        };
                        let getter = self.top_level_accessor(property.getter, id, false)?;
                        let setter = if property.is_var {
                            self.top_level_accessor(property.setter, id, true)?
                        } else {
                            None
                        };
                        out.push(define_property(exports.clone(), &export, getter, setter));
                    }
                    IrDecl::Class(_) => {}
                }
            }
        }
        Ok(())
    }

    /// The container chain passes through a function body
    fn within_function(&self, container: Container) -> bool {
        match container {
            Container::File(_) => false,
            Container::Function(_) => true,
            Container::Class(class) => self.within_function(self.module.classes[class].container),
        }
    }

    /// Export accessor of a top-level property: its accessor function, or
    /// a closure over the module variable
    fn top_level_accessor(&mut self, accessor: Option<DeclId>, property: PropertyId, setter: bool) -> RenderResult<Option<JsExpr>> {
        if let Some(id) = accessor.and_then(|decl| self.module.function_by_decl(decl)) {
            return Ok(self.function_names.get(&id).map(|name| JsExpr::ident(name.clone())));
        }
        let Some(variable) = self.property_names.get(&property).cloned() else {
            return Ok(None);
        };
        let function = if setter {
            JsFunction::new(
                None,
                vec!["value".to_string()],
                vec![JsStmt::assign(JsExpr::ident(variable), JsExpr::ident("value"))],
            )
        } else {
            JsFunction::new(None, Vec::new(), vec![JsStmt::Return(Some(JsExpr::ident(variable)))])
        };
        Ok(Some(JsExpr::Function(Box::new(function))))
    }

    // ---------------------------------------------------------------------
    // Classes
    // ---------------------------------------------------------------------

    fn render_class(&mut self, id: ClassId, out: &mut Vec<JsStmt>) -> RenderResult<()> {
        if !self.rendered_classes.insert(id) {
            return Ok(());
        }
        let module = self.module;
        let class = &module.classes[id];
        self.location = class.location;
        let info = self.class_info(class.decl)?;

        // The prototype chain is built from the superclass's final prototype
        if let Some(local) = info.superclass.and_then(|s| module.class_by_decl(s)) {
            self.render_class(local, out)?;
        }
        self.location = class.location;

        let name = self.class_names[&id].clone();
        let constructor = JsExpr::ident(name.clone());
        let prototype = JsExpr::member(constructor.clone(), "prototype");

        let primary = module.primary_constructor(id);
        match primary {
            Some(ctor) => {
                let function = self.render_function(ctor, Some(name.clone()))?;
                out.push(JsStmt::Function(function));
            }
            None if class.kind == ClassKind::Interface => {
                out.push(JsStmt::Function(JsFunction::new(Some(name.clone()), Vec::new(), Vec::new())));
            }
            None => {
                return Err(self.error(
                    error_codes::INVALID_CONSTRUCTOR,
                    format!("class '{}' has no primary constructor", class.name),
                ))
            }
        }

        if let Some((instance, getter)) = self.singletons.get(&id).cloned() {
            out.push(JsStmt::var(instance.clone(), Some(JsExpr::Null)));
            out.push(JsStmt::Function(JsFunction::new(
                Some(getter),
                Vec::new(),
                vec![
                    JsStmt::If {
                        condition: JsExpr::binary(JsBinaryOp::StrictEq, JsExpr::ident(instance.clone()), JsExpr::Null),
                        then_body: vec![JsStmt::Expr(JsExpr::new_object(constructor.clone(), Vec::new()))],
                        else_body: Vec::new(),
                    },
                    JsStmt::Return(Some(JsExpr::ident(instance))),
                ],
            )));
        }

        if let Some(superclass) = info.superclass.filter(|s| !self.is_any(*s)) {
            let parent = self.class_ref(superclass)?;
            out.push(JsStmt::assign(
                prototype.clone(),
                JsExpr::call(JsExpr::path("Object.create"), vec![JsExpr::member(parent, "prototype")]),
            ));
            out.push(JsStmt::assign(JsExpr::member(prototype.clone(), "constructor"), constructor.clone()));
        }

        if self.options.emit_metadata {
            let metadata = self.metadata(class.kind, &class.name, info)?;
            out.push(JsStmt::assign(JsExpr::member(constructor.clone(), "$metadata$"), metadata));
        }

        if let Some(ctor) = primary {
            self.render_local_decls(ctor, out)?;
        }

        for (key, decl) in class.decls.iter() {
            match decl {
                IrDecl::Function(function) => {
                    let target = &module.functions[function];
                    if target.is_primary_constructor() {
                        continue;
                    }
                    if target.is_constructor() {
                        let init = self.function_names.get(&function).cloned();
                        let rendered = self.render_function(function, init)?;
                        out.push(JsStmt::Function(rendered));
                    } else if target.body.is_some() {
                        let member = self.js_name(target.decl, &target.name);
                        let rendered = self.render_function(function, None)?;
                        out.push(JsStmt::assign(
                            JsExpr::member(prototype.clone(), member),
                            JsExpr::Function(Box::new(rendered)),
                        ));
                    }
                    self.render_local_decls(function, out)?;
                }
                IrDecl::Property(_) => {
                    if let Some(stmt) = self.member_accessors(&prototype, key) {
                        out.push(stmt);
                    }
                }
                IrDecl::Class(nested) => self.render_class(nested, out)?,
            }
        }
        Ok(())
    }

    fn metadata(&mut self, kind: ClassKind, name: &str, info: &ClassInfo) -> RenderResult<JsExpr> {
        let kind = match kind {
            ClassKind::Class => "class",
            ClassKind::Interface => "interface",
            ClassKind::Object | ClassKind::Companion => "object",
        };
        let mut interfaces = Vec::with_capacity(info.interfaces.len());
        for interface in &info.interfaces {
            interfaces.push(self.class_ref(*interface)?);
        }
        Ok(JsExpr::Object(vec![
            ("kind".to_string(), JsExpr::string(kind)),
            ("simpleName".to_string(), JsExpr::string(name)),
            ("interfaces".to_string(), JsExpr::Array(interfaces)),
        ]))
    }

    /// `Object.defineProperty` for a member property with custom accessors
    fn member_accessors(&self, prototype: &JsExpr, property: DeclId) -> Option<JsStmt> {
        let info = self.decls.property(property)?;
        if !has_accessor_property(info) {
            return None;
        }
        let getter = info.getter.map(|getter| {
            let method = self.js_name(getter, "get");
            JsExpr::Function(Box::new(JsFunction::new(
                None,
                Vec::new(),
                vec![JsStmt::Return(Some(JsExpr::method(JsExpr::This, &method, Vec::new())))],
            )))
        });
        let setter = info.setter.map(|setter| {
            let method = self.js_name(setter, "set");
            JsExpr::Function(Box::new(JsFunction::new(
                None,
                vec!["value".to_string()],
                vec![JsStmt::Expr(JsExpr::method(JsExpr::This, &method, vec![JsExpr::ident("value")]))],
            )))
        });
        Some(define_property(prototype.clone(), &self.js_name(property, "property"), getter, setter))
    }

    // ---------------------------------------------------------------------
    // Functions
    // ---------------------------------------------------------------------

    fn render_function(&mut self, id: FunctionId, name: Option<String>) -> RenderResult<JsFunction> {
        let frame = FunctionFrame {
            function: Some(id),
            decl: self.module.functions[id].decl,
            names: self.globals.child(),
            ..FunctionFrame::default()
        };
        let outer = std::mem::replace(&mut self.frame, frame);
        let result = self.render_function_in_frame(id, name);
        self.frame = outer;
        result
    }

    fn bind_param(&mut self, var: VarId) -> String {
        let suggestion = self.module.variable_name(var).unwrap_or("p").to_string();
        let name = self.fresh_local(&suggestion);
        self.frame.vars.insert(var, name.clone());
        self.frame.params.insert(var);
        name
    }

    fn render_function_in_frame(&mut self, id: FunctionId, name: Option<String>) -> RenderResult<JsFunction> {
        let module = self.module;
        let function = &module.functions[id];
        self.location = function.location;
        let class = match function.container {
            Container::Class(class) => Some(class),
            _ => None,
        };
        let lifted = matches!(function.container, Container::Function(_));
        let secondary = function.is_constructor() && !function.is_primary_constructor();

        let mut params = Vec::new();
        if lifted && function.captures_this {
            let this_name = self.fresh_local("$this");
            params.push(this_name.clone());
            self.frame.this_expr = Some(JsExpr::ident(this_name));
        } else if class.is_some() && !secondary {
            self.frame.this_expr = Some(JsExpr::This);
        }
        if lifted {
            for capture in &function.captures {
                params.push(self.bind_param(*capture));
            }
        }
        if let Some(receiver) = function.extension_receiver {
            params.push(self.bind_param(receiver));
        }
        for param in &function.params {
            params.push(self.bind_param(*param));
        }
        let this_param = if secondary {
            let this_name = self.fresh_local("$this");
            params.push(this_name.clone());
            self.frame.this_expr = Some(JsExpr::ident(this_name.clone()));
            self.frame.returns_this = true;
            Some(this_name)
        } else {
            None
        };

        let mut body = Vec::new();
        if let Some(stmts) = &function.body {
            self.stmts(stmts, &mut body)?;
        }
        if self.non_local_targets.contains(&function.decl) {
            body = self.catch_non_local_returns(function.decl, function.is_constructor(), body)?;
        }

        let mut prologue = Vec::new();
        let locals: Vec<JsVarDecl> = self
            .frame
            .vars
            .iter()
            .filter(|(var, _)| !self.frame.params.contains(*var))
            .map(|(_, name)| name.clone())
            .chain(self.frame.temps.iter().cloned())
            .map(|name| JsVarDecl { name, init: None })
            .collect();
        if !locals.is_empty() {
            prologue.push(JsStmt::Var(locals));
        }
        if let (Some(this_name), Some(class)) = (&this_param, class) {
            let create = JsExpr::call(
                JsExpr::path("Object.create"),
                vec![JsExpr::member(JsExpr::ident(self.class_names[&class].clone()), "prototype")],
            );
            prologue.push(JsStmt::assign(
                JsExpr::ident(this_name.clone()),
                JsExpr::binary(JsBinaryOp::Or, JsExpr::ident(this_name.clone()), create),
            ));
        }
        if function.is_primary_constructor() {
            if let Some((instance, _)) = class.and_then(|c| self.singletons.get(&c)) {
                prologue.push(JsStmt::assign(JsExpr::ident(instance.clone()), JsExpr::This));
            }
        }
        prologue.extend(body);
        if let Some(this_name) = this_param {
            if !prologue.last().is_some_and(JsStmt::is_terminal) {
                prologue.push(JsStmt::Return(Some(JsExpr::ident(this_name))));
            }
        }
        Ok(JsFunction::new(name, params, prologue))
    }

    /// Run `body` so that a non-local return thrown by a nested function
    /// returns from this one
    fn catch_non_local_returns(&mut self, decl: DeclId, constructor: bool, body: Vec<JsStmt>) -> RenderResult<Vec<JsStmt>> {
        let param = self.fresh_local("$e");
        let exception = JsExpr::ident(param.clone());
        let value = if self.frame.returns_this {
            Some(self.this_value()?)
        } else if constructor {
            None
        } else {
            Some(JsExpr::member(exception.clone(), "value"))
        };
        let handler = vec![
            JsStmt::If {
                condition: runtime::is_non_local_return(&exception, decl),
                then_body: vec![JsStmt::Return(value)],
                else_body: Vec::new(),
            },
            JsStmt::Throw(exception),
        ];
        Ok(vec![JsStmt::Try {
            body,
            catch: Some(JsCatch { param, body: handler }),
            finally: None,
        }])
    }

    pub(super) fn this_value(&self) -> RenderResult<JsExpr> {
        self.frame.this_expr.clone().ok_or_else(|| {
            self.error(
                error_codes::THIS_OUT_OF_SCOPE,
                "'this' used outside of instance code",
            )
        })
    }

    pub(super) fn var_name(&mut self, var: VarId) -> RenderResult<String> {
        if let Some(name) = self.frame.vars.get(&var) {
            return Ok(name.clone());
        }
        let Some(variable) = self.module.variables.get(var) else {
            return Err(self.error(error_codes::UNBOUND_LOCAL, format!("{} does not exist", var)));
        };
        if Some(variable.function) != self.frame.function {
            return Err(self.error(
                error_codes::UNLOWERED_CAPTURE,
                format!(
                    "'{}' belongs to another function and is not captured",
                    variable.name.as_deref().unwrap_or("<temp>")
                ),
            ));
        }
        let name = self.fresh_local(variable.name.as_deref().unwrap_or("tmp$"));
        self.frame.vars.insert(var, name.clone());
        Ok(name)
    }

    /// A temporary introduced by the renderer
    fn temp(&mut self) -> String {
        let name = self.fresh_local("tmp$");
        self.frame.temps.push(name.clone());
        name
    }

    /// Split a value into an optional assignment and a side-effect-free
    /// reference to it
    pub(super) fn simple(&mut self, value: JsExpr) -> (Option<JsExpr>, JsExpr) {
        if value.is_simple() {
            return (None, value);
        }
        let temp = JsExpr::ident(self.temp());
        (Some(JsExpr::assign(temp.clone(), value)), temp)
    }

    // ---------------------------------------------------------------------
    // Statements
    // ---------------------------------------------------------------------

    fn stmts(&mut self, stmts: &[IrStmt], out: &mut Vec<JsStmt>) -> RenderResult<()> {
        for stmt in stmts {
            self.stmt(stmt, out)?;
        }
        Ok(())
    }

    fn block(&mut self, stmts: &[IrStmt]) -> RenderResult<Vec<JsStmt>> {
        let mut out = Vec::new();
        self.stmts(stmts, &mut out)?;
        Ok(out)
    }

    fn targeted_block(&mut self, label: LabelId, kind: JumpKind, stmts: &[IrStmt]) -> RenderResult<Vec<JsStmt>> {
        self.frame.jumps.push((label, kind));
        let result = self.block(stmts);
        self.frame.jumps.pop();
        result
    }

    fn labeled(&mut self, label: LabelId, kind: JumpKind, stmt: JsStmt) -> JsStmt {
        if !self.frame.used_labels.contains(&label) {
            return stmt;
        }
        JsStmt::Labeled {
            label: self.label_name(label, kind),
            body: Box::new(stmt),
        }
    }

    fn label_name(&mut self, label: LabelId, kind: JumpKind) -> String {
        if let Some(name) = self.frame.labels.get(&label) {
            return name.clone();
        }
        let suggestion = match self.module.labels.get(label).and_then(|l| l.name.as_deref()) {
            Some(name) => name,
            None => match kind {
                JumpKind::Loop => "loop",
                JumpKind::Switch => "when",
                JumpKind::Block => "block",
            },
        };
        let name = self.frame.label_scope.fresh(suggestion);
        self.frame.labels.insert(label, name.clone());
        name
    }

    /// Target of a jump: `None` when the unlabeled form reaches it
    fn jump_label(&mut self, label: LabelId, is_continue: bool) -> RenderResult<Option<String>> {
        let Some(kind) = self.frame.jumps.iter().rev().find(|(l, _)| *l == label).map(|(_, k)| *k) else {
            return Err(self.error(error_codes::INVALID_JUMP, format!("jump to {} from outside of it", label)));
        };
        if is_continue && kind != JumpKind::Loop {
            return Err(self.error(error_codes::INVALID_JUMP, "continue must target a loop"));
        }
        let default = self
            .frame
            .jumps
            .iter()
            .rev()
            .find(|(_, k)| match k {
                JumpKind::Loop => true,
                JumpKind::Switch => !is_continue,
                JumpKind::Block => false,
            })
            .map(|(l, _)| *l);
        if default == Some(label) {
            return Ok(None);
        }
        self.frame.used_labels.insert(label);
        Ok(Some(self.label_name(label, kind)))
    }

    fn stmt(&mut self, stmt: &IrStmt, out: &mut Vec<JsStmt>) -> RenderResult<()> {
        self.location = stmt.location;
        match &stmt.kind {
            StmtKind::Assign { target: None, value } => {
                if let IrExpr::Invoke(invocation) = value {
                    if self.is_raw_code(invocation.function) {
                        out.extend(self.raw_code_statements(invocation)?);
                        return Ok(());
                    }
                }
                let value = self.expr(value)?;
                // Calls to the root constructor render to nothing
                if value != JsExpr::Undefined {
                    out.push(JsStmt::Expr(value));
                }
            }
            StmtKind::Assign {
                target: Some(target),
                value,
            } => {
                let target = self.target(target)?;
                let value = self.expr(value)?;
                out.push(JsStmt::assign(target, value));
            }
            StmtKind::Block { label: None, body } => self.stmts(body, out)?,
            StmtKind::Block {
                label: Some(label),
                body,
            } => {
                let inner = self.targeted_block(*label, JumpKind::Block, body)?;
                if self.frame.used_labels.contains(label) {
                    let block = JsStmt::Block(inner);
                    out.push(self.labeled(*label, JumpKind::Block, block));
                } else {
                    out.extend(inner);
                }
            }
            StmtKind::If {
                condition,
                then_body,
                else_body,
            } => {
                let condition = self.expr(condition)?;
                let then_body = self.block(then_body)?;
                let else_body = self.block(else_body)?;
                out.push(JsStmt::If {
                    condition,
                    then_body,
                    else_body,
                });
            }
            StmtKind::While { label, condition, body } => {
                let condition = self.expr(condition)?;
                let body = self.targeted_block(*label, JumpKind::Loop, body)?;
                let stmt = JsStmt::While { condition, body };
                out.push(self.labeled(*label, JumpKind::Loop, stmt));
            }
            StmtKind::DoWhile { label, body, condition } => {
                let body = self.targeted_block(*label, JumpKind::Loop, body)?;
                let condition = self.expr(condition)?;
                let stmt = JsStmt::DoWhile { body, condition };
                out.push(self.labeled(*label, JumpKind::Loop, stmt));
            }
            StmtKind::For {
                label,
                pre,
                condition,
                post,
                body,
            } => {
                self.stmts(pre, out)?;
                let condition = match condition {
                    Some(condition) => Some(self.expr(condition)?),
                    None => None,
                };
                let body = self.targeted_block(*label, JumpKind::Loop, body)?;
                let update = self.loop_update(post)?;
                let stmt = JsStmt::For {
                    init: None,
                    condition,
                    update,
                    body,
                };
                out.push(self.labeled(*label, JumpKind::Loop, stmt));
            }
            StmtKind::Switch {
                label,
                value,
                cases,
                default,
            } => {
                let discriminant = self.expr(value)?;
                self.frame.jumps.push((*label, JumpKind::Switch));
                let rendered = self.switch_cases(cases, default.as_deref());
                self.frame.jumps.pop();
                let stmt = JsStmt::Switch {
                    discriminant,
                    cases: rendered?,
                };
                out.push(self.labeled(*label, JumpKind::Switch, stmt));
            }
            StmtKind::Try { body, catches, finally } => {
                let body = self.block(body)?;
                let catch = if catches.is_empty() {
                    None
                } else {
                    Some(self.catch_clauses(catches)?)
                };
                let finally = match finally {
                    Some(stmts) => Some(self.block(stmts)?),
                    None => None,
                };
                out.push(JsStmt::Try { body, catch, finally });
            }
            StmtKind::Return { value, target } => {
                let value = match value {
                    Some(value) => Some(self.expr(value)?),
                    None => None,
                };
                if *target != self.frame.decl {
                    out.push(JsStmt::Throw(runtime::non_local_return(*target, value)));
                    return Ok(());
                }
                if self.frame.returns_this {
                    if let Some(value) = value.filter(|v| !v.is_simple()) {
                        out.push(JsStmt::Expr(value));
                    }
                    out.push(JsStmt::Return(Some(self.this_value()?)));
                } else {
                    out.push(JsStmt::Return(value));
                }
            }
            StmtKind::Throw(value) => {
                let value = self.expr(value)?;
                out.push(JsStmt::Throw(value));
            }
            StmtKind::Break(label) => {
                let label = self.jump_label(*label, false)?;
                out.push(JsStmt::Break(label));
            }
            StmtKind::Continue(label) => {
                let label = self.jump_label(*label, true)?;
                out.push(JsStmt::Continue(label));
            }
        }
        Ok(())
    }

    /// Post statements of a `for` as its update expression
    fn loop_update(&mut self, post: &[IrStmt]) -> RenderResult<Option<JsExpr>> {
        let mut parts = Vec::with_capacity(post.len());
        for stmt in post {
            self.location = stmt.location;
            match &stmt.kind {
                StmtKind::Assign { target: None, value } => parts.push(self.expr(value)?),
                StmtKind::Assign {
                    target: Some(target),
                    value,
                } => {
                    let target = self.target(target)?;
                    let value = self.expr(value)?;
                    parts.push(JsExpr::assign(target, value));
                }
                _ => {
                    return Err(self.error(
                        error_codes::UNSUPPORTED_IR,
                        "loop update must consist of assignments",
                    ))
                }
            }
        }
        Ok(match parts.len() {
            0 => None,
            1 => parts.pop(),
            _ => Some(JsExpr::Sequence(parts)),
        })
    }

    fn switch_cases(&mut self, cases: &[crate::ir::SwitchCase], default: Option<&[IrStmt]>) -> RenderResult<Vec<JsSwitchCase>> {
        let mut rendered = Vec::new();
        for case in cases {
            let Some((last, leading)) = case.values.split_last() else {
                return Err(self.error(error_codes::UNSUPPORTED_IR, "switch case without values"));
            };
            for value in leading {
                rendered.push(JsSwitchCase {
                    test: Some(self.expr(value)?),
                    body: Vec::new(),
                });
            }
            let test = Some(self.expr(last)?);
            let body = self.block(&case.body)?;
            rendered.push(JsSwitchCase { test, body });
        }
        if let Some(default) = default {
            let body = self.block(default)?;
            rendered.push(JsSwitchCase { test: None, body });
        }
        Ok(rendered)
    }

    /// One host `catch` dispatching on the clause filters in order; the
    /// exception is rethrown when no clause accepts it
    fn catch_clauses(&mut self, catches: &[CatchClause]) -> RenderResult<JsCatch> {
        let param = self.fresh_local("$e");
        let exception = JsExpr::ident(param.clone());

        let mut clauses = Vec::with_capacity(catches.len());
        for clause in catches {
            let var = self.var_name(clause.var)?;
            let mut body = vec![JsStmt::assign(JsExpr::ident(var), exception.clone())];
            self.stmts(&clause.body, &mut body)?;
            let test = match &clause.filter {
                Some(ty) if !matches!(ty.non_null(), TypeRef::Any) => Some(self.type_test(&exception, ty)?),
                _ => None,
            };
            clauses.push((test, body));
        }

        let mut chain = vec![JsStmt::Throw(exception)];
        for (test, body) in clauses.into_iter().rev() {
            chain = match test {
                None => body,
                Some(condition) => vec![JsStmt::If {
                    condition,
                    then_body: body,
                    else_body: chain,
                }],
            };
        }
        Ok(JsCatch { param, body: chain })
    }

    // ---------------------------------------------------------------------
    // Expressions
    // ---------------------------------------------------------------------

    pub(super) fn exprs(&mut self, exprs: &[IrExpr]) -> RenderResult<Vec<JsExpr>> {
        exprs.iter().map(|e| self.expr(e)).collect()
    }

    fn target(&mut self, target: &IrExpr) -> RenderResult<JsExpr> {
        match target {
            IrExpr::Var(var_ref) => Ok(JsExpr::ident(self.var_name(var_ref.var)?)),
            IrExpr::Field { receiver, field } => self.field(receiver.as_deref(), *field),
            IrExpr::ArrayGet { array, index } => {
                let array = self.expr(array)?;
                let index = self.expr(index)?;
                Ok(JsExpr::index(array, index))
            }
            _ => Err(self.error(error_codes::UNSUPPORTED_IR, "assignment to a value that is not a location")),
        }
    }

    fn field(&mut self, receiver: Option<&IrExpr>, field: IrField) -> RenderResult<JsExpr> {
        let Some(receiver) = receiver else {
            let IrField::Backing(decl) = field else {
                return Err(self.error(error_codes::UNSUPPORTED_IR, "synthesized field without a receiver"));
            };
            return self.static_property(decl);
        };
        let object = self.expr(receiver)?;
        let key = self.field_key(field)?;
        Ok(JsExpr::member(object, key))
    }

    /// Top-level property storage
    fn static_property(&mut self, decl: DeclId) -> RenderResult<JsExpr> {
        if let Some(id) = self.module.property_by_decl(decl) {
            return match self.property_names.get(&id) {
                Some(name) => Ok(JsExpr::ident(name.clone())),
                None => Err(self.error(error_codes::UNSUPPORTED_IR, "member property read without a receiver")),
            };
        }
        self.external_member(decl, "")
    }

    fn field_key(&self, field: IrField) -> RenderResult<String> {
        Ok(match field {
            IrField::Backing(decl) => {
                let info = self.decl_info(decl)?;
                let name = sanitize(info.js_name());
                match info.as_property() {
                    Some(property) if has_accessor_property(property) => format!("{}_0", name),
                    _ => name,
                }
            }
            IrField::OuterClass(inner) => {
                let outer = self
                    .decl_info(inner)?
                    .parent
                    .and_then(|parent| self.decls.get(parent))
                    .map_or("outer", DeclInfo::js_name);
                format!("this${}", sanitize(outer))
            }
            IrField::Closure(id) => sanitize(&self.module.closure_fields[id].name),
            IrField::Delegate(id) => sanitize(&self.module.delegate_fields[id].name),
        })
    }

    pub(super) fn type_test(&mut self, value: &JsExpr, ty: &TypeRef) -> RenderResult<JsExpr> {
        let mut classes = Vec::new();
        collect_classes(ty, &mut classes);
        let mut refs = HashMap::with_capacity(classes.len());
        for class in classes {
            let class_ref = self.class_ref(class)?;
            refs.insert(class, class_ref);
        }
        Ok(runtime::type_test(value, ty, &|decl| {
            refs.get(&decl).cloned().unwrap_or(JsExpr::Undefined)
        }))
    }

    pub(super) fn expr(&mut self, expr: &IrExpr) -> RenderResult<JsExpr> {
        match expr {
            IrExpr::Constant(constant) => Ok(render_constant(constant)),
            IrExpr::Null => Ok(JsExpr::Null),
            IrExpr::Undefined => Ok(JsExpr::Undefined),
            IrExpr::True => Ok(JsExpr::Bool(true)),
            IrExpr::False => Ok(JsExpr::Bool(false)),
            IrExpr::This => self.this_value(),
            IrExpr::Var(var_ref) => {
                if var_ref.free {
                    return Err(self.error(
                        error_codes::UNLOWERED_CAPTURE,
                        format!("free reference to {} was not lowered", var_ref.var),
                    ));
                }
                Ok(JsExpr::ident(self.var_name(var_ref.var)?))
            }
            IrExpr::Field { receiver, field } => self.field(receiver.as_deref(), *field),
            IrExpr::Invoke(invocation) => self.invocation(invocation),
            IrExpr::New {
                class,
                constructor,
                args,
            } => self.new_instance(*class, *constructor, args),
            IrExpr::FunctionRef(decl) => self.function_ref(*decl),
            IrExpr::InvokeValue { callee, args } => {
                let callee = self.expr(callee)?;
                let args = self.exprs(args)?;
                Ok(JsExpr::call(callee, args))
            }
            IrExpr::ObjectRef(decl) => self.object_ref(*decl),
            IrExpr::OuterThis(class) => Err(self.error(
                error_codes::UNSUPPORTED_IR,
                format!("unresolved reference to the instance of {}", class),
            )),
            IrExpr::ArrayOf(items) => Ok(JsExpr::Array(self.exprs(items)?)),
            IrExpr::Concat(parts) => self.concat(parts),
            IrExpr::Conditional {
                condition,
                then_value,
                else_value,
            } => {
                let condition = self.expr(condition)?;
                let then_value = self.expr(then_value)?;
                let else_value = self.expr(else_value)?;
                Ok(JsExpr::conditional(condition, then_value, else_value))
            }
            IrExpr::Binary { op, kind, lhs, rhs } => {
                let lhs = self.expr(lhs)?;
                let rhs = self.expr(rhs)?;
                Ok(binary_operator(*op, *kind, lhs, rhs))
            }
            IrExpr::Unary { op, kind, operand } => {
                let operand = self.expr(operand)?;
                Ok(unary_operator(*op, *kind, operand))
            }
            IrExpr::ArrayGet { array, index } => {
                let array = self.expr(array)?;
                let index = self.expr(index)?;
                Ok(JsExpr::index(array, index))
            }
            IrExpr::InstanceOf { value, ty } => {
                let value = self.expr(value)?;
                let (setup, value) = self.simple(value);
                let test = self.type_test(&value, ty)?;
                Ok(sequence(setup, test))
            }
            IrExpr::Cast { value, ty, safe } => {
                let value = self.expr(value)?;
                if ty.is_nullable() && matches!(ty.non_null(), TypeRef::Any) {
                    return Ok(value);
                }
                let (setup, value) = self.simple(value);
                let test = self.type_test(&value, ty)?;
                let fallback = if *safe {
                    JsExpr::Null
                } else {
                    runtime::call(runtime::THROW_CCE, Vec::new())
                };
                Ok(sequence(setup, JsExpr::conditional(test, value, fallback)))
            }
            IrExpr::PrimitiveCast { value, from, to } => {
                let value = self.expr(value)?;
                Ok(runtime::primitive_cast(value, *from, *to))
            }
            IrExpr::ThrowNullPointer => Ok(runtime::call(runtime::THROW_NPE, Vec::new())),
        }
    }

    fn concat(&mut self, parts: &[IrExpr]) -> RenderResult<JsExpr> {
        let mut rendered = Vec::with_capacity(parts.len());
        for part in parts {
            rendered.push(match part {
                IrExpr::Constant(Constant::Char(c)) => JsExpr::String(c.to_string()),
                other => self.expr(other)?,
            });
        }
        let mut parts = rendered.into_iter();
        let Some(first) = parts.next() else {
            return Ok(JsExpr::string(""));
        };
        let start = match first {
            JsExpr::String(_) => first,
            other => JsExpr::binary(JsBinaryOp::Add, JsExpr::string(""), other),
        };
        Ok(parts.fold(start, |acc, part| JsExpr::binary(JsBinaryOp::Add, acc, part)))
    }

    fn object_ref(&mut self, decl: DeclId) -> RenderResult<JsExpr> {
        if let Some(id) = self.module.class_by_decl(decl) {
            if let Some((_, getter)) = self.singletons.get(&id) {
                return Ok(JsExpr::call(JsExpr::ident(getter.clone()), Vec::new()));
            }
        }
        self.external_member(decl, "")
    }
}

fn collect_classes(ty: &TypeRef, out: &mut Vec<DeclId>) {
    match ty {
        TypeRef::Class(decl) => out.push(*decl),
        TypeRef::Nullable(inner) | TypeRef::Array(inner) => collect_classes(inner, out),
        _ => {}
    }
}

/// `Object.defineProperty(target, 'key', {configurable: true, get, set})`
fn define_property(target: JsExpr, key: &str, getter: Option<JsExpr>, setter: Option<JsExpr>) -> JsStmt {
    let mut descriptor = vec![("configurable".to_string(), JsExpr::Bool(true))];
    if let Some(getter) = getter {
        descriptor.push(("get".to_string(), getter));
    }
    if let Some(setter) = setter {
        descriptor.push(("set".to_string(), setter));
    }
    JsStmt::Expr(JsExpr::call(
        JsExpr::path("Object.defineProperty"),
        vec![target, JsExpr::string(key), JsExpr::Object(descriptor)],
    ))
}

pub fn render_constant(constant: &Constant) -> JsExpr {
    match constant {
        Constant::Int(v) => JsExpr::Number(*v as f64),
        Constant::Long(v) => runtime::long_constant(*v),
        Constant::Double(v) => JsExpr::Number(*v),
        Constant::Float(v) => JsExpr::Number(*v as f64),
        Constant::Char(c) => JsExpr::Number(*c as u32 as f64),
        Constant::String(s) => JsExpr::String(s.clone()),
        Constant::Boolean(b) => JsExpr::Bool(*b),
    }
}

/// The host operator with the same symbol
fn plain(op: BinaryOp) -> JsBinaryOp {
    match op {
        BinaryOp::Add => JsBinaryOp::Add,
        BinaryOp::Sub => JsBinaryOp::Sub,
        BinaryOp::Mul => JsBinaryOp::Mul,
        BinaryOp::Div => JsBinaryOp::Div,
        BinaryOp::Rem => JsBinaryOp::Rem,
        BinaryOp::BitAnd => JsBinaryOp::BitAnd,
        BinaryOp::BitOr => JsBinaryOp::BitOr,
        BinaryOp::BitXor => JsBinaryOp::BitXor,
        BinaryOp::Shl => JsBinaryOp::Shl,
        BinaryOp::Shr => JsBinaryOp::Shr,
        BinaryOp::Ushr => JsBinaryOp::Ushr,
        BinaryOp::Eq | BinaryOp::IdentityEq => JsBinaryOp::StrictEq,
        BinaryOp::Ne | BinaryOp::IdentityNe => JsBinaryOp::StrictNe,
        BinaryOp::Lt => JsBinaryOp::Lt,
        BinaryOp::Le => JsBinaryOp::Le,
        BinaryOp::Gt => JsBinaryOp::Gt,
        BinaryOp::Ge => JsBinaryOp::Ge,
        BinaryOp::Compare => JsBinaryOp::Sub,
        BinaryOp::LogicalAnd => JsBinaryOp::And,
        BinaryOp::LogicalOr => JsBinaryOp::Or,
    }
}

fn long_method(op: BinaryOp) -> Option<&'static str> {
    Some(match op {
        BinaryOp::Add => "add",
        BinaryOp::Sub => "subtract",
        BinaryOp::Mul => "multiply",
        BinaryOp::Div => "div",
        BinaryOp::Rem => "modulo",
        BinaryOp::BitAnd => "and",
        BinaryOp::BitOr => "or",
        BinaryOp::BitXor => "xor",
        BinaryOp::Shl => "shiftLeft",
        BinaryOp::Shr => "shiftRight",
        BinaryOp::Ushr => "shiftRightUnsigned",
        _ => return None,
    })
}

/// Lowering of one binary operator for its operand kind
pub fn binary_operator(op: BinaryOp, kind: OperandKind, lhs: JsExpr, rhs: JsExpr) -> JsExpr {
    match op {
        BinaryOp::LogicalAnd | BinaryOp::LogicalOr | BinaryOp::IdentityEq | BinaryOp::IdentityNe => {
            JsExpr::binary(plain(op), lhs, rhs)
        }
        BinaryOp::Eq | BinaryOp::Ne => equality(op == BinaryOp::Eq, kind, lhs, rhs),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => match kind {
            OperandKind::Long | OperandKind::String | OperandKind::Reference | OperandKind::Boolean => JsExpr::binary(
                plain(op),
                runtime::call(runtime::COMPARE_TO, vec![lhs, rhs]),
                JsExpr::Number(0.0),
            ),
            _ => JsExpr::binary(plain(op), lhs, rhs),
        },
        BinaryOp::Compare => runtime::call(runtime::COMPARE_TO, vec![lhs, rhs]),
        _ => arithmetic(op, kind, lhs, rhs),
    }
}

fn equality(equal: bool, kind: OperandKind, lhs: JsExpr, rhs: JsExpr) -> JsExpr {
    if lhs == JsExpr::Null || rhs == JsExpr::Null {
        let op = if equal { JsBinaryOp::LooseEq } else { JsBinaryOp::LooseNe };
        return JsExpr::binary(op, lhs, rhs);
    }
    let test = match kind {
        OperandKind::Long => JsExpr::method(lhs, "equals", vec![rhs]),
        OperandKind::Reference => runtime::call(runtime::EQUALS, vec![lhs, rhs]),
        _ => {
            let op = if equal { JsBinaryOp::StrictEq } else { JsBinaryOp::StrictNe };
            return JsExpr::binary(op, lhs, rhs);
        }
    };
    if equal {
        test
    } else {
        JsExpr::not(test)
    }
}

fn arithmetic(op: BinaryOp, kind: OperandKind, lhs: JsExpr, rhs: JsExpr) -> JsExpr {
    match kind {
        OperandKind::Long => match long_method(op) {
            Some(method) => JsExpr::method(lhs, method, vec![rhs]),
            None => JsExpr::binary(plain(op), lhs, rhs),
        },
        OperandKind::Int | OperandKind::Short | OperandKind::Byte => int_arithmetic(op, lhs, rhs),
        OperandKind::Char if op == BinaryOp::Add => runtime::call(
            runtime::TO_CHAR,
            vec![JsExpr::binary(JsBinaryOp::Add, lhs, rhs)],
        ),
        OperandKind::Char => int_arithmetic(op, lhs, rhs),
        // Bitwise operators on booleans yield numbers
        OperandKind::Boolean => JsExpr::not(JsExpr::not(JsExpr::binary(plain(op), lhs, rhs))),
        _ => JsExpr::binary(plain(op), lhs, rhs),
    }
}

/// 32-bit integer arithmetic
fn int_arithmetic(op: BinaryOp, lhs: JsExpr, rhs: JsExpr) -> JsExpr {
    match op {
        BinaryOp::Mul => runtime::call(runtime::IMUL, vec![lhs, rhs]),
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Div | BinaryOp::Ushr => {
            JsExpr::to_int32(JsExpr::binary(plain(op), lhs, rhs))
        }
        _ => JsExpr::binary(plain(op), lhs, rhs),
    }
}

pub fn unary_operator(op: UnaryOp, kind: OperandKind, operand: JsExpr) -> JsExpr {
    match op {
        UnaryOp::Not => JsExpr::not(operand),
        UnaryOp::Negate => match kind {
            OperandKind::Long => JsExpr::method(operand, "negate", Vec::new()),
            OperandKind::Int | OperandKind::Short | OperandKind::Byte | OperandKind::Char => {
                JsExpr::to_int32(JsExpr::unary(JsUnaryOp::Neg, operand))
            }
            _ => JsExpr::unary(JsUnaryOp::Neg, operand),
        },
        UnaryOp::BitNot => match kind {
            OperandKind::Long => JsExpr::method(operand, "inv", Vec::new()),
            _ => JsExpr::unary(JsUnaryOp::BitNot, operand),
        },
        UnaryOp::ArrayLength => JsExpr::member(operand, "length"),
        UnaryOp::Stringify => runtime::call(runtime::TO_STRING, vec![operand]),
        UnaryOp::ArrayCopy => JsExpr::method(operand, "slice", Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::js_printer::{print_expression, print_program};
    use crate::ir::{IrFunction, SwitchCase, VariableKind};
    use crate::tast::{DeclKind, Modality, ParamInfo, PrimitiveKind};

    fn loc() -> SourceLocation {
        SourceLocation::unknown()
    }

    /// A module with one top-level function `f(a, b)` whose body is built
    /// by `body`
    fn function_module(body: impl FnOnce(&mut IrModule, FunctionId, DeclId) -> Vec<IrStmt>) -> (IrModule, DeclTable) {
        let int = TypeRef::Primitive(PrimitiveKind::Int);
        let mut decls = DeclTable::new();
        let decl = decls.add(DeclInfo::new(
            "f",
            "demo",
            DeclKind::Function(FunctionInfo::new(
                FunctionKind::TopLevel,
                vec![ParamInfo::new("a", int.clone()), ParamInfo::new("b", int.clone())],
                int,
            )),
        ));
        let mut module = IrModule::new("demo");
        let file = module.add_file("main.kt", Vec::new());
        let function = module.functions.alloc(IrFunction::new(
            decl,
            "f",
            FunctionKind::TopLevel,
            Container::File(file),
            loc(),
        ));
        module.register(Container::File(file), decl, IrDecl::Function(function));
        let a = module.new_parameter("a", function);
        let b = module.new_parameter("b", function);
        module.functions[function].params = vec![a, b];
        let stmts = body(&mut module, function, decl);
        module.functions[function].body = Some(stmts);
        (module, decls)
    }

    fn render(module: &IrModule, decls: &DeclTable) -> String {
        let program = render_module(module, decls, &RenderOptions::default()).expect("render");
        print_program(&program)
    }

    #[test]
    fn test_top_level_function_is_declared_and_exported() {
        let (module, decls) = function_module(|module, function, decl| {
            let params = module.functions[function].params.clone();
            vec![IrStmt::new(
                StmtKind::Return {
                    value: Some(IrExpr::binary(
                        BinaryOp::Add,
                        OperandKind::Int,
                        IrExpr::var(params[0]),
                        IrExpr::var(params[1]),
                    )),
                    target: decl,
                },
                loc(),
            )]
        });
        let out = render(&module, &decls);
        assert!(out.starts_with("var demo = function (_, $runtime) {\n  'use strict';\n"), "{}", out);
        assert!(out.contains("  function f(a, b) {\n    return a + b | 0;\n  }\n"), "{}", out);
        assert!(out.contains("  _.f = f;\n  return _;\n"), "{}", out);
        assert!(out.ends_with("}(typeof demo === 'undefined' ? {} : demo, kotlin);\n"), "{}", out);
    }

    #[test]
    fn test_break_out_of_switch_labels_the_loop() {
        let (module, decls) = function_module(|module, function, _| {
            let x = module.new_variable(Some("x".to_string()), VariableKind::Local, function);
            let outer = module.new_label(None);
            let when = module.new_label(None);
            vec![IrStmt::new(
                StmtKind::While {
                    label: outer,
                    condition: IrExpr::True,
                    body: vec![IrStmt::new(
                        StmtKind::Switch {
                            label: when,
                            value: IrExpr::var(x),
                            cases: vec![SwitchCase {
                                values: vec![IrExpr::int(1), IrExpr::int(2)],
                                body: vec![IrStmt::new(StmtKind::Break(outer), loc())],
                            }],
                            default: Some(vec![IrStmt::new(StmtKind::Break(when), loc())]),
                        },
                        loc(),
                    )],
                },
                loc(),
            )]
        });
        let out = render(&module, &decls);
        assert!(out.contains("    var x;\n"), "{}", out);
        assert!(out.contains("loop: while (true) {"), "{}", out);
        assert!(out.contains("case 1:\n"), "{}", out);
        assert!(out.contains("break loop;"), "{}", out);
        assert!(out.contains("default:\n"), "{}", out);
        assert!(out.contains("          break;\n"), "{}", out);
    }

    #[test]
    fn test_unused_block_labels_are_dropped() {
        let (module, decls) = function_module(|module, _, decl| {
            let label = module.new_label(Some("outer".to_string()));
            vec![IrStmt::new(
                StmtKind::Block {
                    label: Some(label),
                    body: vec![IrStmt::new(StmtKind::Return { value: None, target: decl }, loc())],
                },
                loc(),
            )]
        });
        let out = render(&module, &decls);
        assert!(!out.contains("outer:"), "{}", out);
        assert!(out.contains("    return;\n"), "{}", out);
    }

    /// `fun f(a, b): Int { run { return@f 1 }; return 0 }`
    #[test]
    fn test_non_local_return_unwinds_to_its_target() {
        let (mut module, decls) = function_module(|_, _, _| Vec::new());
        let f = FunctionId::from_raw(0);
        let f_decl = module.functions[f].decl;
        let lambda_decl = DeclId::from_raw(40);
        let lambda = module.functions.alloc(IrFunction::new(
            lambda_decl,
            "lambda",
            FunctionKind::Lambda,
            Container::Function(f),
            loc(),
        ));
        module.functions[lambda].body = Some(vec![IrStmt::new(
            StmtKind::Return {
                value: Some(IrExpr::int(1)),
                target: f_decl,
            },
            loc(),
        )]);
        module.register(Container::Function(f), lambda_decl, IrDecl::Function(lambda));
        module.functions[f].body = Some(vec![
            IrStmt::eval(
                IrExpr::InvokeValue {
                    callee: Box::new(IrExpr::FunctionRef(lambda_decl)),
                    args: Vec::new(),
                },
                loc(),
            ),
            IrStmt::new(
                StmtKind::Return {
                    value: Some(IrExpr::int(0)),
                    target: f_decl,
                },
                loc(),
            ),
        ]);

        let out = render(&module, &decls);
        let target = f_decl.as_raw();
        let expected_f = [
            "  function f(a, b) {",
            "    try {",
            "      f$lambda();",
            "      return 0;",
            "    } catch ($e) {",
            &format!("      if ($e instanceof $runtime.NonLocalReturn && $e.target === {}) {{", target),
            "        return $e.value;",
            "      }",
            "      throw $e;",
            "    }",
            "  }",
        ]
        .join("\n");
        assert!(out.contains(&expected_f), "{}", out);
        assert!(
            out.contains(&format!(
                "  function f$lambda() {{\n    throw new $runtime.NonLocalReturn({}, 1);\n  }}\n",
                target
            )),
            "{}",
            out
        );
    }

    #[test]
    fn test_local_return_is_not_wrapped() {
        let (module, decls) = function_module(|_, _, decl| {
            vec![IrStmt::new(StmtKind::Return { value: None, target: decl }, loc())]
        });
        let out = render(&module, &decls);
        assert!(!out.contains("try {"), "{}", out);
        assert!(!out.contains("NonLocalReturn"), "{}", out);
    }

    #[test]
    fn test_foreign_variable_is_an_unlowered_capture() {
        let (mut module, decls) = function_module(|_, _, _| Vec::new());
        let other = module.functions.alloc(IrFunction::new(
            DeclId::from_raw(7),
            "g",
            FunctionKind::Local,
            Container::File(crate::ir::IrFileId::from_raw(0)),
            loc(),
        ));
        let foreign = module.new_variable(Some("y".to_string()), VariableKind::Local, other);
        let f = FunctionId::from_raw(0);
        module.functions[f].body = Some(vec![IrStmt::eval(IrExpr::var(foreign), loc())]);
        let err = render_module(&module, &decls, &RenderOptions::default()).unwrap_err();
        assert_eq!(err.code, error_codes::UNLOWERED_CAPTURE);
    }

    fn set_body(module: &mut IrModule, stmts: Vec<IrStmt>) {
        module.functions[FunctionId::from_raw(0)].body = Some(stmts);
    }

    fn param(module: &IrModule, index: usize) -> IrExpr {
        IrExpr::var(module.functions[FunctionId::from_raw(0)].params[index])
    }

    /// `fun log(prefix: String, vararg items: Any)` mapped onto `console.log`
    fn add_native_log(decls: &mut DeclTable) -> DeclId {
        decls.add(
            DeclInfo::new(
                "log",
                "demo",
                DeclKind::Function(FunctionInfo::new(
                    FunctionKind::TopLevel,
                    vec![
                        ParamInfo::new("prefix", TypeRef::String),
                        ParamInfo::vararg("items", TypeRef::Array(Box::new(TypeRef::Any))),
                    ],
                    TypeRef::Unit,
                )),
            )
            .with_native("console.log"),
        )
    }

    fn add_raw_code(decls: &mut DeclTable) -> DeclId {
        let mut info = DeclInfo::new(
            "js",
            BUILTIN_MODULE,
            DeclKind::Function(FunctionInfo::new(
                FunctionKind::TopLevel,
                vec![ParamInfo::new("code", TypeRef::String)],
                TypeRef::Any,
            )),
        );
        info.annotations.raw_code = true;
        decls.add(info)
    }

    fn string(value: &str) -> IrExpr {
        IrExpr::Constant(Constant::String(value.to_string()))
    }

    #[test]
    fn test_native_vararg_literal_is_spread_inline() {
        let (mut module, mut decls) = function_module(|_, _, _| Vec::new());
        let log = add_native_log(&mut decls);
        let call = IrExpr::invoke(
            None,
            log,
            vec![string("p"), IrExpr::ArrayOf(vec![IrExpr::int(1), param(&module, 0)])],
            false,
        );
        set_body(&mut module, vec![IrStmt::eval(call, loc())]);
        let out = render(&module, &decls);
        assert!(out.contains("    console.log('p', 1, a);\n"), "{}", out);
    }

    #[test]
    fn test_native_vararg_array_value_is_applied() {
        let (mut module, mut decls) = function_module(|_, _, _| Vec::new());
        let log = add_native_log(&mut decls);
        let call = IrExpr::invoke(None, log, vec![string("p"), param(&module, 1)], false);
        set_body(&mut module, vec![IrStmt::eval(call, loc())]);
        let out = render(&module, &decls);
        assert!(out.contains("    console.log.apply(null, ['p'].concat(b));\n"), "{}", out);
    }

    #[test]
    fn test_raw_code_in_statement_and_value_position() {
        let (mut module, mut decls) = function_module(|_, _, _| Vec::new());
        let js = add_raw_code(&mut decls);
        let f_decl = module.functions[FunctionId::from_raw(0)].decl;
        set_body(
            &mut module,
            vec![
                IrStmt::eval(IrExpr::invoke(None, js, vec![string("a = a + 1; b = 2;")], false), loc()),
                IrStmt::new(
                    StmtKind::Return {
                        value: Some(IrExpr::invoke(None, js, vec![string("a * b")], false)),
                        target: f_decl,
                    },
                    loc(),
                ),
            ],
        );
        let out = render(&module, &decls);
        assert!(
            out.contains("  function f(a, b) {\n    a = a + 1;\n    b = 2;\n    return a * b;\n  }\n"),
            "{}",
            out
        );
    }

    #[test]
    fn test_raw_code_argument_must_be_constant() {
        let (mut module, mut decls) = function_module(|_, _, _| Vec::new());
        let js = add_raw_code(&mut decls);
        let call = IrExpr::invoke(None, js, vec![param(&module, 0)], false);
        set_body(&mut module, vec![IrStmt::eval(call, loc())]);
        let err = render_module(&module, &decls, &RenderOptions::default()).unwrap_err();
        assert_eq!(err.code, error_codes::NON_CONSTANT_RAW_CODE);
    }

    #[test]
    fn test_static_call_of_open_member_goes_through_prototype() {
        let (mut module, mut decls) = function_module(|_, _, _| Vec::new());
        let shape = decls.add(DeclInfo::new(
            "Shape",
            "geo",
            DeclKind::Class(ClassInfo {
                kind: ClassKind::Class,
                superclass: None,
                interfaces: Vec::new(),
                is_inner: false,
                delegated_members: Vec::new(),
            }),
        ));
        let mut area = FunctionInfo::new(
            FunctionKind::Member,
            vec![ParamInfo::new("scale", TypeRef::Primitive(PrimitiveKind::Int))],
            TypeRef::Primitive(PrimitiveKind::Int),
        );
        area.modality = Modality::Open;
        let area = decls.add(DeclInfo::new("area", "geo", DeclKind::Function(area)).with_parent(shape));

        let receiver = param(&module, 0);
        set_body(
            &mut module,
            vec![
                IrStmt::eval(IrExpr::invoke(Some(receiver.clone()), area, vec![IrExpr::int(2)], true), loc()),
                IrStmt::eval(IrExpr::invoke(Some(receiver), area, vec![IrExpr::int(2)], false), loc()),
            ],
        );
        let out = render(&module, &decls);
        assert!(out.contains("    a.area(2);\n"), "{}", out);
        assert!(out.contains("    Shape.prototype.area.call(a, 2);\n"), "{}", out);
        assert!(out.contains("  var Shape = $module$geo.Shape;\n"), "{}", out);
    }

    #[test]
    fn test_external_function_is_imported_once() {
        let (mut module, mut decls) = function_module(|_, _, _| Vec::new());
        let helper = decls.add(DeclInfo::new(
            "helper",
            "lib",
            DeclKind::Function(FunctionInfo::new(FunctionKind::TopLevel, Vec::new(), TypeRef::Unit)),
        ));
        set_body(
            &mut module,
            vec![
                IrStmt::eval(IrExpr::invoke(None, helper, Vec::new(), false), loc()),
                IrStmt::eval(IrExpr::invoke(None, helper, Vec::new(), false), loc()),
            ],
        );
        let out = render(&module, &decls);
        assert!(out.starts_with("var demo = function (_, $runtime, $module$lib) {\n"), "{}", out);
        assert_eq!(out.matches("var helper = $module$lib.helper;").count(), 1, "{}", out);
        assert_eq!(out.matches("    helper();\n").count(), 2, "{}", out);
        assert!(out.ends_with("}(typeof demo === 'undefined' ? {} : demo, kotlin, lib);\n"), "{}", out);
    }

    #[test]
    fn test_operator_lowering() {
        let a = || JsExpr::ident("a");
        let b = || JsExpr::ident("b");
        let cases = [
            (binary_operator(BinaryOp::Add, OperandKind::Int, a(), b()), "a + b | 0"),
            (binary_operator(BinaryOp::Mul, OperandKind::Int, a(), b()), "$runtime.imul(a, b)"),
            (binary_operator(BinaryOp::Add, OperandKind::Double, a(), b()), "a + b"),
            (binary_operator(BinaryOp::Add, OperandKind::Long, a(), b()), "a.add(b)"),
            (binary_operator(BinaryOp::Eq, OperandKind::Reference, a(), b()), "$runtime.equals(a, b)"),
            (binary_operator(BinaryOp::Ne, OperandKind::Long, a(), b()), "!a.equals(b)"),
            (binary_operator(BinaryOp::Eq, OperandKind::Reference, a(), JsExpr::Null), "a == null"),
            (binary_operator(BinaryOp::IdentityEq, OperandKind::Reference, a(), b()), "a === b"),
            (binary_operator(BinaryOp::Lt, OperandKind::String, a(), b()), "$runtime.compareTo(a, b) < 0"),
            (binary_operator(BinaryOp::Lt, OperandKind::Int, a(), b()), "a < b"),
            (binary_operator(BinaryOp::Compare, OperandKind::Int, a(), b()), "$runtime.compareTo(a, b)"),
            (binary_operator(BinaryOp::Ushr, OperandKind::Int, a(), b()), "a >>> b | 0"),
            (unary_operator(UnaryOp::Negate, OperandKind::Int, a()), "-a | 0"),
            (unary_operator(UnaryOp::Negate, OperandKind::Long, a()), "a.negate()"),
            (unary_operator(UnaryOp::ArrayLength, OperandKind::Reference, a()), "a.length"),
            (unary_operator(UnaryOp::Stringify, OperandKind::Reference, a()), "$runtime.toString(a)"),
        ];
        for (expr, expected) in cases {
            assert_eq!(print_expression(&expr), expected);
        }
    }

    #[test]
    fn test_constants() {
        assert_eq!(print_expression(&render_constant(&Constant::Char('A'))), "65");
        assert_eq!(print_expression(&render_constant(&Constant::Int(-3))), "-3");
        assert_eq!(
            print_expression(&render_constant(&Constant::Long(7))),
            "$runtime.Long.fromInt(7)"
        );
    }
}
