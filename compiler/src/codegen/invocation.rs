//! Call shapes
//!
//! How an [`Invocation`] reaches its target depends on where the target
//! lives: host built-ins are called by their native name, prototype
//! methods through the receiver, super calls through the owner's
//! prototype, lifted functions with their captures in front and
//! constructors with the instance as `this`.

use super::js_ast::{JsExpr, JsStmt};
use super::js_renderer::{JsRenderer, RenderResult};
use super::raw_code;
use crate::error_codes;
use crate::ir::{Container, FunctionId, Invocation, IrExpr};
use crate::tast::{Constant, DeclId, DeclInfo, FunctionInfo, FunctionKind, Modality};

/// `fixed.concat(array)`, or just the array
fn spread(fixed: Vec<JsExpr>, array: JsExpr) -> JsExpr {
    if fixed.is_empty() {
        array
    } else {
        JsExpr::method(JsExpr::Array(fixed), "concat", vec![array])
    }
}

impl<'a> JsRenderer<'a> {
    pub(super) fn is_raw_code(&self, function: DeclId) -> bool {
        self.decls.get(function).is_some_and(|info| info.annotations.raw_code)
    }

    fn raw_code_source<'i>(&self, invocation: &'i Invocation) -> RenderResult<&'i str> {
        match invocation.args.as_slice() {
            [IrExpr::Constant(Constant::String(source))] => Ok(source.as_str()),
            _ => Err(self.error(
                error_codes::NON_CONSTANT_RAW_CODE,
                "raw code must be a single string constant",
            )),
        }
    }

    /// Raw code in statement position: any number of statements
    pub(super) fn raw_code_statements(&self, invocation: &Invocation) -> RenderResult<Vec<JsStmt>> {
        let source = self.raw_code_source(invocation)?;
        raw_code::parse_fragment(source)
            .map_err(|message| self.error(error_codes::INVALID_RAW_CODE, message))
    }

    /// Raw code in value position: exactly one expression
    fn raw_code_expression(&self, invocation: &Invocation) -> RenderResult<JsExpr> {
        let source = self.raw_code_source(invocation)?;
        raw_code::parse_expression(source)
            .map_err(|message| self.error(error_codes::INVALID_RAW_CODE, message))
    }

    pub(super) fn invocation(&mut self, invocation: &Invocation) -> RenderResult<JsExpr> {
        let decl = self.decl_info(invocation.function)?;
        let info = self.function_info(invocation.function)?;
        if decl.annotations.raw_code {
            return self.raw_code_expression(invocation);
        }

        let receiver = match &invocation.receiver {
            Some(receiver) => Some(self.expr(receiver)?),
            None => None,
        };
        let args = self.exprs(&invocation.args)?;

        if let Some(host) = &decl.annotations.native {
            return Ok(self.native_call(host, receiver, args, info.is_vararg()));
        }
        if info.kind.is_constructor() {
            return self.constructor_delegation(invocation.function, info, receiver, args);
        }
        match receiver {
            Some(receiver) => self.member_call(invocation.function, decl, info, receiver, args, invocation.virtual_dispatch),
            None => self.static_call(invocation.function, args),
        }
    }

    /// Host built-in; a packed vararg array is spread into the call
    fn native_call(&mut self, host: &str, receiver: Option<JsExpr>, mut args: Vec<JsExpr>, vararg: bool) -> JsExpr {
        let packed = if vararg {
            match args.pop() {
                Some(JsExpr::Array(items)) => {
                    args.extend(items);
                    None
                }
                other => other,
            }
        } else {
            None
        };
        match (receiver, packed) {
            (Some(receiver), None) => JsExpr::method(receiver, host, args),
            (None, None) => JsExpr::call(JsExpr::path(host), args),
            (Some(receiver), Some(array)) => {
                let (setup, receiver) = self.simple(receiver);
                let call = JsExpr::method(
                    JsExpr::member(receiver.clone(), host),
                    "apply",
                    vec![receiver, spread(args, array)],
                );
                match setup {
                    Some(setup) => JsExpr::Sequence(vec![setup, call]),
                    None => call,
                }
            }
            (None, Some(array)) => JsExpr::method(
                JsExpr::path(host),
                "apply",
                vec![JsExpr::Null, spread(args, array)],
            ),
        }
    }

    /// A constructor invoked on an existing instance: superclass or
    /// sibling constructor delegation
    fn constructor_delegation(
        &mut self,
        function: DeclId,
        info: &FunctionInfo,
        receiver: Option<JsExpr>,
        mut args: Vec<JsExpr>,
    ) -> RenderResult<JsExpr> {
        let Some(owner) = self.decls.owner_class(function) else {
            return Err(self.error(
                error_codes::INVALID_CONSTRUCTOR,
                format!("constructor {} has no owning class", function),
            ));
        };
        // The root class has nothing to initialize
        if self.is_any(owner) {
            return Ok(JsExpr::Undefined);
        }
        let Some(instance) = receiver else {
            return Err(self.error(
                error_codes::UNSUPPORTED_IR,
                "constructor call without an instance",
            ));
        };
        if matches!(info.kind, FunctionKind::Constructor { primary: true }) {
            let class = self.class_ref(owner)?;
            let mut call_args = vec![instance];
            call_args.extend(args);
            return Ok(JsExpr::method(class, "call", call_args));
        }
        let init = self.secondary_constructor(function, owner)?;
        args.push(instance);
        Ok(JsExpr::call(init, args))
    }

    /// The lifted function of a secondary constructor
    fn secondary_constructor(&mut self, constructor: DeclId, owner: DeclId) -> RenderResult<JsExpr> {
        if let Some(name) = self
            .module
            .function_by_decl(constructor)
            .and_then(|id| self.function_names.get(&id))
        {
            return Ok(JsExpr::ident(name.clone()));
        }
        self.external_member(owner, "_init")
    }

    fn member_call(
        &mut self,
        function: DeclId,
        decl: &DeclInfo,
        info: &FunctionInfo,
        receiver: JsExpr,
        args: Vec<JsExpr>,
        virtual_dispatch: bool,
    ) -> RenderResult<JsExpr> {
        let member = self.js_name(function, &decl.name);
        if virtual_dispatch || info.modality == Modality::Final {
            return Ok(JsExpr::method(receiver, &member, args));
        }
        // Statically bound call of an overridable member
        let Some(owner) = self.decls.owner_class(function) else {
            return Err(self.error(
                error_codes::UNSUPPORTED_IR,
                format!("non-virtual call of '{}' without an owning class", decl.name),
            ));
        };
        let class = self.class_ref(owner)?;
        let method = JsExpr::member(JsExpr::member(class, "prototype"), member);
        let mut call_args = vec![receiver];
        call_args.extend(args);
        Ok(JsExpr::method(method, "call", call_args))
    }

    /// Arguments a lifted function receives ahead of its own parameters
    fn capture_args(&mut self, function: FunctionId) -> RenderResult<Vec<JsExpr>> {
        let module = self.module;
        let target = &module.functions[function];
        let mut args = Vec::with_capacity(target.captures.len() + 1);
        if target.captures_this {
            args.push(self.this_value()?);
        }
        for capture in &target.captures {
            args.push(JsExpr::ident(self.var_name(*capture)?));
        }
        Ok(args)
    }

    fn static_call(&mut self, function: DeclId, args: Vec<JsExpr>) -> RenderResult<JsExpr> {
        let Some(id) = self.module.function_by_decl(function) else {
            let callee = self.import(function)?;
            return Ok(JsExpr::call(callee, args));
        };
        let Some(name) = self.function_names.get(&id).cloned() else {
            return Err(self.error(
                error_codes::UNSUPPORTED_IR,
                format!("member '{}' called without a receiver", self.module.functions[id].name),
            ));
        };
        let mut call_args = self.capture_args(id)?;
        call_args.extend(args);
        Ok(JsExpr::call(JsExpr::ident(name), call_args))
    }

    pub(super) fn new_instance(&mut self, class: DeclId, constructor: DeclId, args: &[IrExpr]) -> RenderResult<JsExpr> {
        let info = self.function_info(constructor)?;
        let args = self.exprs(args)?;
        if matches!(info.kind, FunctionKind::Constructor { primary: false }) {
            let init = self.secondary_constructor(constructor, class)?;
            return Ok(JsExpr::call(init, args));
        }
        let class = self.class_ref(class)?;
        Ok(JsExpr::new_object(class, args))
    }

    /// A function as a value. Members become functions taking the receiver
    /// first; lifted functions are bound to their captures.
    pub(super) fn function_ref(&mut self, function: DeclId) -> RenderResult<JsExpr> {
        let Some(id) = self.module.function_by_decl(function) else {
            let decl = self.decl_info(function)?;
            if let Some(host) = &decl.annotations.native {
                return Ok(JsExpr::path(host));
            }
            return match self.decls.owner_class(function) {
                Some(owner) => {
                    let class = self.class_ref(owner)?;
                    Ok(unbound_method(class, self.js_name(function, &decl.name)))
                }
                None => self.import(function),
            };
        };

        let module = self.module;
        let target = &module.functions[id];
        if let Container::Class(class) = target.container {
            let class = JsExpr::ident(self.class_names[&class].clone());
            return Ok(unbound_method(class, self.js_name(function, &target.name)));
        }
        let Some(name) = self.function_names.get(&id).cloned() else {
            return Err(self.error(error_codes::UNSUPPORTED_IR, "reference to an unnamed function"));
        };
        let captures = self.capture_args(id)?;
        if captures.is_empty() {
            return Ok(JsExpr::ident(name));
        }
        let mut bind_args = vec![JsExpr::Null];
        bind_args.extend(captures);
        Ok(JsExpr::method(JsExpr::ident(name), "bind", bind_args))
    }
}

/// `Function.prototype.call.bind(Class.prototype.member)`
fn unbound_method(class: JsExpr, member: String) -> JsExpr {
    JsExpr::method(
        JsExpr::path("Function.prototype.call"),
        "bind",
        vec![JsExpr::member(JsExpr::member(class, "prototype"), member)],
    )
}
