//! Typed tree to IR generation
//!
//! Lowers the resolved typed tree into the structured IR. Expressions are
//! generated into side-effect-ordered trees; anything that needs statements
//! (safe calls, `when`, `try`, blocks used as values) emits them into the
//! current sink of the [`GenerationContext`] and yields a temporary.
//!
//! Constructs that depend on enclosing scopes are left symbolic here and
//! resolved by later passes:
//! - reads of outer locals become `free` variable references
//! - `this` of an enclosing non-inner class becomes an outer-instance node
//! - delegated supertypes are recorded on the class

use super::arena::{ClassId, FunctionId, LabelId, VarId};
use super::context::{GenResult, GenerationContext};
use super::decls::{Container, IrClass, IrDecl, IrDelegation, IrFunction, IrProperty};
use super::expr::{BinaryOp, IrExpr, IrField, OperandKind, UnaryOp};
use super::stmt::{CatchClause, IrStmt, StmtKind, SwitchCase};
use super::visit::{effect_of, for_each_list_mut, Effect};
use super::IrModule;
use crate::error_codes;
use crate::tast::{
    CatchBranch, ClassKind, ComparisonOp, Constant, DeclId, DeclTable, FunctionKind, Modality, PrimitiveKind,
    Receiver, TypeRef, TypedClass, TypedConstructor, TypedDeclaration, TypedExpression,
    TypedExpressionKind, TypedFile, TypedFunction, TypedProperty, TypedStatement,
    TypedStatementKind, WhenBranch, WhenCondition,
};

/// Lower resolved files into a fresh IR module
pub fn generate_module(decls: &DeclTable, files: &[TypedFile], module_name: &str) -> GenResult<IrModule> {
    let mut ctx = GenerationContext::new(decls, module_name);
    for file in files {
        generate_file(&mut ctx, file)?;
    }
    let module = ctx.finish();
    tracing::debug!(
        "generated module '{}': {} classes, {} functions, {} variables",
        module.name,
        module.classes.len(),
        module.functions.len(),
        module.variables.len()
    );
    Ok(module)
}

fn generate_file(ctx: &mut GenerationContext, file: &TypedFile) -> GenResult<()> {
    tracing::debug!("generating IR for file {}", file.name);
    let file_id = ctx.module.add_file(&file.name, file.package.clone());
    let container = Container::File(file_id);

    let mut initialized = Vec::new();
    for declaration in &file.declarations {
        match declaration {
            TypedDeclaration::Class(class) => {
                generate_class(ctx, class, container)?;
            }
            TypedDeclaration::Function(function) => {
                generate_function(ctx, function, container)?;
            }
            TypedDeclaration::Property(property) => {
                generate_property(ctx, property, container)?;
                if property.initializer.is_some() {
                    initialized.push(property);
                }
            }
        }
    }

    if initialized.is_empty() {
        return Ok(());
    }

    // Top-level initializers run once, in declaration order, when the file
    // is loaded
    let stem = file
        .name
        .rsplit('/')
        .next()
        .unwrap_or(&file.name)
        .trim_end_matches(".kt")
        .to_string();
    let init = ctx.module.functions.alloc(IrFunction::new(
        DeclId::invalid(),
        format!("{}$init", stem),
        FunctionKind::TopLevel,
        container,
        initialized[0].location,
    ));
    let (_, body) = ctx.nested_function(init, |ctx| {
        for property in &initialized {
            let Some(initializer) = &property.initializer else {
                continue;
            };
            ctx.at(property.location, |ctx| {
                let value = gen_expr(ctx, initializer)?;
                ctx.emit_assign(IrExpr::field(None, IrField::Backing(property.decl)), value);
                Ok(())
            })?;
        }
        Ok(())
    })?;
    ctx.module.functions[init].body = Some(body);
    ctx.module.files[file_id].initializer = Some(init);
    Ok(())
}

// -------------------------------------------------------------------------
// Declarations
// -------------------------------------------------------------------------

fn generate_class(ctx: &mut GenerationContext, class: &TypedClass, container: Container) -> GenResult<ClassId> {
    ctx.at(class.location, |ctx| {
        let decl = ctx.decl(class.decl)?;
        let info = ctx.class_info(class.decl)?;
        tracing::trace!("generating class {}", decl.name);

        let id = ctx.module.classes.alloc(IrClass {
            decl: class.decl,
            name: decl.name.clone(),
            kind: info.kind,
            container,
            decls: Default::default(),
            is_inner: info.is_inner,
            closure_fields: Vec::new(),
            delegate_fields: Vec::new(),
            delegations: Vec::new(),
            location: class.location,
        });
        ctx.module.register(container, class.decl, IrDecl::Class(id));
        let own = Container::Class(id);

        for member in &class.members {
            match member {
                TypedDeclaration::Class(nested) => {
                    generate_class(ctx, nested, own)?;
                }
                TypedDeclaration::Function(function) => {
                    generate_function(ctx, function, own)?;
                }
                TypedDeclaration::Property(property) => {
                    generate_property(ctx, property, own)?;
                }
            }
        }

        let primaries = class
            .constructors
            .iter()
            .filter(|c| matches!(ctx.decls.function(c.decl).map(|f| f.kind), Some(FunctionKind::Constructor { primary: true })))
            .count();
        let needs_primary = info.kind != ClassKind::Interface;
        if (needs_primary && primaries != 1) || (!needs_primary && !class.constructors.is_empty()) {
            return Err(ctx.error(
                error_codes::INVALID_CONSTRUCTOR,
                format!(
                    "class '{}' must declare exactly one primary constructor, found {}",
                    decl.name, primaries
                ),
            ));
        }
        for constructor in &class.constructors {
            generate_constructor(ctx, class, id, constructor)?;
        }
        Ok(id)
    })
}

fn generate_constructor(
    ctx: &mut GenerationContext,
    class: &TypedClass,
    class_id: ClassId,
    constructor: &TypedConstructor,
) -> GenResult<FunctionId> {
    ctx.at(constructor.location, |ctx| {
        let info = ctx.function_info(constructor.decl)?;
        let FunctionKind::Constructor { primary } = info.kind else {
            return Err(ctx.error(
                error_codes::DECLARATION_KIND_MISMATCH,
                format!("'{}' is not a constructor", ctx.decl(constructor.decl)?.name),
            ));
        };
        if constructor.params.len() != info.params.len() {
            return Err(ctx.error(
                error_codes::ARGUMENT_MISMATCH,
                "constructor parameters do not match its declaration",
            ));
        }
        let is_inner = ctx.module.classes[class_id].is_inner;
        let name = ctx.decl(constructor.decl)?.name.clone();
        let own = Container::Class(class_id);
        let id = ctx.module.functions.alloc(IrFunction::new(
            constructor.decl,
            name,
            info.kind,
            own,
            constructor.location,
        ));
        ctx.module.register(own, constructor.decl, IrDecl::Function(id));

        let (_, body) = ctx.nested_function(id, |ctx| {
            let outer = is_inner.then(|| ctx.module.new_parameter("$outer", id));
            let mut params: Vec<VarId> = outer.into_iter().collect();
            for param in &constructor.params {
                params.push(ctx.declare_parameter(param.local, &param.name, id));
            }
            let offset = params.len() - constructor.params.len();
            ctx.module.functions[id].params = params.clone();

            let delegates_to_own = constructor
                .delegation
                .as_ref()
                .is_some_and(|d| ctx.decls.owner_class(d.constructor) == Some(class.decl));

            // The enclosing instance is linked before any superclass code
            // can observe it
            if let Some(outer) = outer {
                if !delegates_to_own {
                    ctx.emit_assign(
                        IrExpr::field(Some(IrExpr::This), IrField::OuterClass(class.decl)),
                        IrExpr::var(outer),
                    );
                }
            }

            if let Some(delegation) = &constructor.delegation {
                let target = ctx.function_info(delegation.constructor)?;
                if target.params.len() != delegation.args.len() {
                    return Err(ctx.error(
                        error_codes::ARGUMENT_MISMATCH,
                        "constructor delegation arguments do not match the target",
                    ));
                }
                let leading = match outer {
                    Some(outer) if delegates_to_own => vec![IrExpr::var(outer)],
                    _ => Vec::new(),
                };
                let args = gen_ordered(ctx, leading, delegation.args.iter())?;
                ctx.emit_eval(IrExpr::invoke(
                    Some(IrExpr::This),
                    delegation.constructor,
                    args,
                    false,
                ));
            }

            for (index, property) in &constructor.property_params {
                let Some(var) = params.get(index + offset).copied() else {
                    return Err(ctx.error(
                        error_codes::ARGUMENT_MISMATCH,
                        format!("property parameter index {} is out of range", index),
                    ));
                };
                ctx.emit_assign(
                    IrExpr::field(Some(IrExpr::This), IrField::Backing(*property)),
                    IrExpr::var(var),
                );
                ctx.module.functions[id].property_params.push((var, *property));
            }

            if primary {
                for delegation in &class.delegations {
                    let insert_at = ctx.sink_len();
                    let (initializer, prelude) = ctx.nested_block(|ctx| gen_expr(ctx, &delegation.expression))?;
                    ctx.module.classes[class_id].delegations.push(IrDelegation {
                        interface: delegation.interface,
                        initializer,
                        prelude,
                        insert_at,
                        location: delegation.expression.location,
                    });
                }
                generate_initializers(ctx, class)?;
            }

            ctx.nested_variable_scope(|ctx| gen_stmts(ctx, &constructor.body))
        })?;
        ctx.module.functions[id].body = Some(body);
        Ok(id)
    })
}

/// Property initializers and `init` blocks, interleaved in declaration order
fn generate_initializers(ctx: &mut GenerationContext, class: &TypedClass) -> GenResult<()> {
    let mut blocks: Vec<_> = class.init_blocks.iter().collect();
    blocks.sort_by_key(|b| b.position);
    let mut blocks = blocks.into_iter().peekable();

    for (index, member) in class.members.iter().enumerate() {
        while let Some(block) = blocks.next_if(|b| b.position <= index) {
            ctx.nested_variable_scope(|ctx| gen_stmts(ctx, &block.body))?;
        }
        let TypedDeclaration::Property(property) = member else {
            continue;
        };
        let Some(initializer) = &property.initializer else {
            continue;
        };
        ctx.at(property.location, |ctx| {
            let info = ctx.property_info(property.decl)?;
            let value = gen_expr(ctx, initializer)?;
            if info.has_backing_field {
                ctx.emit_assign(
                    IrExpr::field(Some(IrExpr::This), IrField::Backing(property.decl)),
                    value,
                );
            } else if effect_of(&value) == Effect::Effects {
                ctx.emit_eval(value);
            }
            Ok(())
        })?;
    }
    for block in blocks {
        ctx.nested_variable_scope(|ctx| gen_stmts(ctx, &block.body))?;
    }
    Ok(())
}

fn generate_function(ctx: &mut GenerationContext, function: &TypedFunction, container: Container) -> GenResult<FunctionId> {
    ctx.at(function.location, |ctx| {
        let info = ctx.function_info(function.decl)?;
        let decl = ctx.decl(function.decl)?;
        if function.params.len() != info.params.len()
            || function.extension_receiver.is_some() != info.has_extension_receiver
        {
            return Err(ctx.error(
                error_codes::ARGUMENT_MISMATCH,
                format!("parameters of '{}' do not match its declaration", decl.name),
            ));
        }
        let id = ctx.module.functions.alloc(IrFunction::new(
            function.decl,
            decl.name.clone(),
            info.kind,
            container,
            function.location,
        ));
        ctx.module.register(container, function.decl, IrDecl::Function(id));
        tracing::trace!("generating function {}", decl.name);

        let (_, body) = ctx.nested_function(id, |ctx| {
            if let Some(receiver) = &function.extension_receiver {
                let var = ctx.declare_parameter(receiver.local, &receiver.name, id);
                ctx.module.functions[id].extension_receiver = Some(var);
            }
            let params: Vec<VarId> = function
                .params
                .iter()
                .map(|p| ctx.declare_parameter(p.local, &p.name, id))
                .collect();
            ctx.module.functions[id].params = params;
            match &function.body {
                Some(body) => gen_stmts(ctx, body),
                None => Ok(()),
            }
        })?;
        if function.body.is_some() {
            ctx.module.functions[id].body = Some(body);
        }
        Ok(id)
    })
}

fn generate_property(ctx: &mut GenerationContext, property: &TypedProperty, container: Container) -> GenResult<()> {
    ctx.at(property.location, |ctx| {
        let info = ctx.property_info(property.decl)?;
        let name = ctx.decl(property.decl)?.name.clone();
        let getter = match &property.getter {
            Some(getter) => Some(generate_function(ctx, getter, container)?),
            None => None,
        };
        let setter = match &property.setter {
            Some(setter) => Some(generate_function(ctx, setter, container)?),
            None => None,
        };
        let id = ctx.module.properties.alloc(IrProperty {
            decl: property.decl,
            name,
            container,
            has_backing_field: info.has_backing_field,
            getter,
            setter,
        });
        ctx.module.register(container, property.decl, IrDecl::Property(id));
        Ok(())
    })
}

// -------------------------------------------------------------------------
// Statements
// -------------------------------------------------------------------------

fn gen_stmts(ctx: &mut GenerationContext, stmts: &[TypedStatement]) -> GenResult<()> {
    for stmt in stmts {
        gen_stmt(ctx, stmt)?;
    }
    Ok(())
}

fn gen_stmt(ctx: &mut GenerationContext, stmt: &TypedStatement) -> GenResult<()> {
    ctx.at(stmt.location, |ctx| match &stmt.kind {
        TypedStatementKind::LocalVar { local, name, init } => {
            let value = match init {
                Some(init) => Some(gen_expr(ctx, init)?),
                None => None,
            };
            let var = ctx.declare_local(*local, name);
            if let Some(value) = value {
                ctx.emit_assign(IrExpr::var(var), value);
            }
            Ok(())
        }
        TypedStatementKind::Expression(expr) => gen_effect(ctx, expr),
        TypedStatementKind::AssignLocal { local, value } => {
            let value = gen_expr(ctx, value)?;
            let target = ctx.local_ref(*local)?;
            ctx.emit_assign(target, value);
            Ok(())
        }
        TypedStatementKind::AssignProperty {
            property,
            receiver,
            value,
        } => {
            let receiver = gen_receiver(ctx, receiver)?;
            let leading: Vec<IrExpr> = receiver.into_iter().collect();
            let has_receiver = !leading.is_empty();
            let mut values = gen_ordered(ctx, leading, std::iter::once(value))?;
            let value = values.pop().unwrap_or(IrExpr::Undefined);
            let receiver = if has_receiver { values.pop() } else { None };
            gen_property_set(ctx, *property, receiver, value)
        }
        TypedStatementKind::Return { target, value } => {
            if !ctx.is_return_target(*target) {
                return Err(ctx.error(
                    error_codes::INVALID_RETURN_TARGET,
                    format!("return to '{}' from outside of it", ctx.decl(*target)?.name),
                ));
            }
            let value = match value {
                Some(value) => Some(gen_expr(ctx, value)?),
                None => None,
            };
            ctx.emit(StmtKind::Return {
                value,
                target: *target,
            });
            Ok(())
        }
        TypedStatementKind::Break { label } => ctx.emit_break(label.as_deref()),
        TypedStatementKind::Continue { label } => ctx.emit_continue(label.as_deref()),
        TypedStatementKind::Throw(value) => {
            let value = gen_expr(ctx, value)?;
            ctx.emit(StmtKind::Throw(value));
            Ok(())
        }
        TypedStatementKind::While {
            label,
            condition,
            body,
        } => gen_while(ctx, label.clone(), condition, body),
        TypedStatementKind::DoWhile {
            label,
            body,
            condition,
        } => gen_do_while(ctx, label.clone(), body, condition),
        TypedStatementKind::ForIn {
            label,
            local,
            name,
            iterable,
            iterator,
            has_next,
            next,
            body,
        } => {
            let iterable = gen_expr(ctx, iterable)?;
            ctx.with_label(label.clone(), true, |ctx, loop_label| {
                let iterator_var = ctx.new_temp();
                let location = ctx.location();
                let pre = vec![IrStmt::assign(
                    IrExpr::var(iterator_var),
                    IrExpr::invoke(Some(iterable), *iterator, Vec::new(), is_virtual(ctx, *iterator)),
                    location,
                )];
                let (_, body) = ctx.nested_block(|ctx| {
                    ctx.nested_variable_scope(|ctx| {
                        let has_next = IrExpr::invoke(
                            Some(IrExpr::var(iterator_var)),
                            *has_next,
                            Vec::new(),
                            is_virtual(ctx, *has_next),
                        );
                        ctx.emit(StmtKind::If {
                            condition: negate(has_next),
                            then_body: vec![IrStmt::new(StmtKind::Break(loop_label), location)],
                            else_body: Vec::new(),
                        });
                        let element = ctx.declare_local(*local, name);
                        let next = IrExpr::invoke(
                            Some(IrExpr::var(iterator_var)),
                            *next,
                            Vec::new(),
                            is_virtual(ctx, *next),
                        );
                        ctx.emit_assign(IrExpr::var(element), next);
                        gen_stmts(ctx, body)
                    })
                })?;
                ctx.emit(StmtKind::For {
                    label: loop_label,
                    pre,
                    condition: None,
                    post: Vec::new(),
                    body,
                });
                Ok(())
            })
        }
        TypedStatementKind::LocalClass(class) => {
            let container = Container::Function(ctx.current_function());
            generate_class(ctx, class, container).map(|_| ())
        }
        TypedStatementKind::LocalFunction(function) => {
            let container = Container::Function(ctx.current_function());
            generate_function(ctx, function, container).map(|_| ())
        }
    })
}

fn gen_while(
    ctx: &mut GenerationContext,
    label: Option<String>,
    condition: &TypedExpression,
    body: &[TypedStatement],
) -> GenResult<()> {
    ctx.with_label(label, true, |ctx, loop_label| {
        let (condition, prelude) = ctx.nested_block(|ctx| gen_expr(ctx, condition))?;
        let (_, body) = ctx.nested_block(|ctx| ctx.nested_variable_scope(|ctx| gen_stmts(ctx, body)))?;
        if prelude.is_empty() {
            ctx.emit(StmtKind::While {
                label: loop_label,
                condition,
                body,
            });
            return Ok(());
        }
        // while (true) { prelude; if (!c) break; body }
        let location = ctx.location();
        let mut full = prelude;
        full.push(IrStmt::new(
            StmtKind::If {
                condition: negate(condition),
                then_body: vec![IrStmt::new(StmtKind::Break(loop_label), location)],
                else_body: Vec::new(),
            },
            location,
        ));
        full.extend(body);
        ctx.emit(StmtKind::While {
            label: loop_label,
            condition: IrExpr::True,
            body: full,
        });
        Ok(())
    })
}

fn gen_do_while(
    ctx: &mut GenerationContext,
    label: Option<String>,
    body: &[TypedStatement],
    condition: &TypedExpression,
) -> GenResult<()> {
    ctx.with_label(label, true, |ctx, loop_label| {
        // Body locals stay visible in the condition
        ctx.nested_variable_scope(|ctx| {
            let inner = ctx.module.new_label(None);
            let (_, mut body) = ctx.with_continue_replacement(loop_label, inner, |ctx| {
                ctx.nested_block(|ctx| gen_stmts(ctx, body))
            })?;
            let (condition, prelude) = ctx.nested_block(|ctx| gen_expr(ctx, condition))?;
            let location = ctx.location();

            if prelude.is_empty() {
                // No statement runs between the body and the test, so a
                // plain continue is equivalent
                retarget_breaks(&mut body, inner, StmtKind::Continue(loop_label));
                ctx.emit(StmtKind::DoWhile {
                    label: loop_label,
                    body,
                    condition,
                });
                return Ok(());
            }

            let mut full = vec![IrStmt::new(
                StmtKind::Block {
                    label: Some(inner),
                    body,
                },
                location,
            )];
            full.extend(prelude);
            ctx.emit(StmtKind::DoWhile {
                label: loop_label,
                body: full,
                condition,
            });
            Ok(())
        })
    })
}

/// Replace every `break label` in the statements by `replacement`
fn retarget_breaks(stmts: &mut Vec<IrStmt>, label: LabelId, replacement: StmtKind) {
    for_each_list_mut(stmts, &mut |list| {
        for stmt in list.iter_mut() {
            if matches!(stmt.kind, StmtKind::Break(target) if target == label) {
                stmt.kind = replacement.clone();
            }
        }
    });
}

// -------------------------------------------------------------------------
// Expressions
// -------------------------------------------------------------------------

/// Generate `expr` for its value
fn gen_expr(ctx: &mut GenerationContext, expr: &TypedExpression) -> GenResult<IrExpr> {
    ctx.at(expr.location, |ctx| gen_expr_kind(ctx, expr))
}

fn gen_expr_kind(ctx: &mut GenerationContext, expr: &TypedExpression) -> GenResult<IrExpr> {
    let wants_value = !matches!(expr.ty, TypeRef::Unit | TypeRef::Nothing);
    match &expr.kind {
        TypedExpressionKind::Literal(Constant::Boolean(value)) => Ok(IrExpr::boolean(*value)),
        TypedExpressionKind::Literal(constant) => Ok(IrExpr::Constant(constant.clone())),
        TypedExpressionKind::Null => Ok(IrExpr::Null),
        TypedExpressionKind::This { class } => this_ref(ctx, *class),
        TypedExpressionKind::Local(local) => ctx.local_ref(*local),
        TypedExpressionKind::Call {
            function,
            receiver,
            extension_receiver,
            args,
            safe,
            is_super,
        } => gen_call(
            ctx,
            *function,
            receiver,
            extension_receiver.as_deref(),
            args,
            *safe,
            *is_super,
        ),
        TypedExpressionKind::PropertyGet {
            property,
            receiver,
            safe,
        } => {
            let receiver = gen_receiver(ctx, receiver)?;
            if !*safe {
                return property_read(ctx, *property, receiver);
            }
            let Some(receiver) = receiver else {
                return Err(ctx.error(error_codes::ARGUMENT_MISMATCH, "safe access without a receiver"));
            };
            let receiver = ctx.materialize(receiver);
            let read = property_read(ctx, *property, Some(receiver.clone()))?;
            Ok(IrExpr::conditional(IrExpr::is_not_null(receiver), read, IrExpr::Null))
        }
        TypedExpressionKind::New {
            class,
            constructor,
            outer,
            args,
        } => {
            let info = ctx.class_info(*class)?;
            let target = ctx.function_info(*constructor)?;
            if target.params.len() != args.len() {
                return Err(ctx.error(
                    error_codes::ARGUMENT_MISMATCH,
                    format!("'{}' constructor expects {} arguments", ctx.decl(*class)?.name, target.params.len()),
                ));
            }
            let mut leading = Vec::new();
            if info.is_inner {
                let outer = match outer {
                    Some(outer) => gen_expr(ctx, outer)?,
                    None => {
                        let Some(enclosing) = ctx.decls.owner_class(*class) else {
                            return Err(ctx.error(
                                error_codes::INVALID_CONSTRUCTOR,
                                "inner class without an enclosing class",
                            ));
                        };
                        this_ref(ctx, enclosing)?
                    }
                };
                leading.push(outer);
            }
            let args = gen_ordered(ctx, leading, args.iter())?;
            Ok(IrExpr::New {
                class: *class,
                constructor: *constructor,
                args,
            })
        }
        TypedExpressionKind::Lambda(function) => {
            let container = Container::Function(ctx.current_function());
            generate_function(ctx, function, container)?;
            Ok(IrExpr::FunctionRef(function.decl))
        }
        TypedExpressionKind::FunctionReference { function } => {
            ctx.function_info(*function)?;
            Ok(IrExpr::FunctionRef(*function))
        }
        TypedExpressionKind::ObjectRef(object) => {
            let info = ctx.class_info(*object)?;
            if !info.kind.is_singleton() {
                return Err(ctx.error(
                    error_codes::DECLARATION_KIND_MISMATCH,
                    format!("'{}' is not an object", ctx.decl(*object)?.name),
                ));
            }
            Ok(IrExpr::ObjectRef(*object))
        }
        TypedExpressionKind::ArrayOf(items) => Ok(IrExpr::ArrayOf(gen_ordered(ctx, Vec::new(), items.iter())?)),
        TypedExpressionKind::StringTemplate(parts) => {
            Ok(IrExpr::Concat(gen_ordered(ctx, Vec::new(), parts.iter())?))
        }
        TypedExpressionKind::AndAnd(lhs, rhs) => gen_short_circuit(ctx, lhs, rhs, true),
        TypedExpressionKind::OrOr(lhs, rhs) => gen_short_circuit(ctx, lhs, rhs, false),
        TypedExpressionKind::Equals { lhs, rhs, negated } => {
            let kind = equality_kind(lhs, rhs);
            let op = if *negated { BinaryOp::Ne } else { BinaryOp::Eq };
            gen_binary(ctx, op, kind, lhs, rhs)
        }
        TypedExpressionKind::IdentityEquals { lhs, rhs, negated } => {
            let op = if *negated {
                BinaryOp::IdentityNe
            } else {
                BinaryOp::IdentityEq
            };
            gen_binary(ctx, op, OperandKind::Reference, lhs, rhs)
        }
        TypedExpressionKind::Comparison { op, compare } => {
            let value = gen_expr(ctx, compare)?;
            let op = match op {
                ComparisonOp::Lt => BinaryOp::Lt,
                ComparisonOp::Le => BinaryOp::Le,
                ComparisonOp::Gt => BinaryOp::Gt,
                ComparisonOp::Ge => BinaryOp::Ge,
            };
            Ok(IrExpr::binary(op, OperandKind::Int, value, IrExpr::int(0)))
        }
        TypedExpressionKind::Elvis(lhs, rhs) => {
            let value = gen_expr(ctx, lhs)?;
            let (fallback, stmts) = ctx.nested_block(|ctx| gen_expr(ctx, rhs))?;
            if stmts.is_empty() {
                let value = ctx.materialize(value);
                return Ok(IrExpr::conditional(IrExpr::is_not_null(value.clone()), value, fallback));
            }
            let temp = ctx.new_temp();
            ctx.emit_assign(IrExpr::var(temp), value);
            let (_, then_body) = ctx.nested_block(|ctx| {
                ctx.splice(stmts);
                ctx.emit_assign(IrExpr::var(temp), fallback);
                Ok(())
            })?;
            ctx.emit(StmtKind::If {
                condition: IrExpr::is_null(IrExpr::var(temp)),
                then_body,
                else_body: Vec::new(),
            });
            Ok(IrExpr::var(temp))
        }
        TypedExpressionKind::NotNullAssert(value) => {
            let value = gen_expr(ctx, value)?;
            let value = ctx.materialize(value);
            Ok(IrExpr::conditional(
                IrExpr::is_not_null(value.clone()),
                value,
                IrExpr::ThrowNullPointer,
            ))
        }
        TypedExpressionKind::Is { value, ty, negated } => {
            let value = gen_expr(ctx, value)?;
            let test = IrExpr::InstanceOf {
                value: Box::new(value),
                ty: ty.clone(),
            };
            Ok(if *negated { negate(test) } else { test })
        }
        TypedExpressionKind::As { value, ty, safe } => {
            let value = gen_expr(ctx, value)?;
            Ok(IrExpr::Cast {
                value: Box::new(value),
                ty: ty.clone(),
                safe: *safe,
            })
        }
        TypedExpressionKind::If {
            condition,
            then_branch,
            else_branch,
        } => gen_if(ctx, condition, then_branch, else_branch.as_deref(), wants_value),
        TypedExpressionKind::When {
            subject,
            branches,
            else_branch,
        } => gen_when(ctx, subject.as_deref(), branches, else_branch.as_deref(), wants_value),
        TypedExpressionKind::Try {
            body,
            catches,
            finally,
        } => gen_try(ctx, body, catches, finally.as_deref(), wants_value),
        TypedExpressionKind::Block(stmts, result) => ctx.nested_variable_scope(|ctx| {
            gen_stmts(ctx, stmts)?;
            match result {
                Some(result) => gen_expr(ctx, result),
                None => Ok(IrExpr::Undefined),
            }
        }),
    }
}

/// Generate `expr` for its side effects only
fn gen_effect(ctx: &mut GenerationContext, expr: &TypedExpression) -> GenResult<()> {
    ctx.at(expr.location, |ctx| match &expr.kind {
        TypedExpressionKind::If {
            condition,
            then_branch,
            else_branch,
        } => gen_if(ctx, condition, then_branch, else_branch.as_deref(), false).map(|_| ()),
        TypedExpressionKind::When {
            subject,
            branches,
            else_branch,
        } => gen_when(ctx, subject.as_deref(), branches, else_branch.as_deref(), false).map(|_| ()),
        TypedExpressionKind::Try {
            body,
            catches,
            finally,
        } => gen_try(ctx, body, catches, finally.as_deref(), false).map(|_| ()),
        TypedExpressionKind::Block(stmts, result) => ctx.nested_variable_scope(|ctx| {
            gen_stmts(ctx, stmts)?;
            match result {
                Some(result) => gen_effect(ctx, result),
                None => Ok(()),
            }
        }),
        _ => {
            let value = gen_expr_kind(ctx, expr)?;
            if effect_of(&value) == Effect::Effects {
                ctx.emit_eval(value);
            }
            Ok(())
        }
    })
}

/// Generate expressions left to right. When a later expression needs
/// statements, the values already computed are first moved into temporaries
/// so that they keep their evaluation order.
fn gen_ordered<'e>(
    ctx: &mut GenerationContext,
    mut done: Vec<IrExpr>,
    exprs: impl IntoIterator<Item = &'e TypedExpression>,
) -> GenResult<Vec<IrExpr>> {
    for expr in exprs {
        let (value, stmts) = ctx.nested_block(|ctx| gen_expr(ctx, expr))?;
        if !stmts.is_empty() {
            for previous in done.iter_mut() {
                let taken = std::mem::replace(previous, IrExpr::Undefined);
                *previous = ctx.materialize(taken);
            }
            ctx.splice(stmts);
        }
        done.push(value);
    }
    Ok(done)
}

fn gen_binary(
    ctx: &mut GenerationContext,
    op: BinaryOp,
    kind: OperandKind,
    lhs: &TypedExpression,
    rhs: &TypedExpression,
) -> GenResult<IrExpr> {
    let mut values = gen_ordered(ctx, Vec::new(), [lhs, rhs])?;
    let rhs = values.pop().unwrap_or(IrExpr::Undefined);
    let lhs = values.pop().unwrap_or(IrExpr::Undefined);
    Ok(IrExpr::binary(op, kind, lhs, rhs))
}

fn gen_short_circuit(
    ctx: &mut GenerationContext,
    lhs: &TypedExpression,
    rhs: &TypedExpression,
    is_and: bool,
) -> GenResult<IrExpr> {
    let lhs = gen_expr(ctx, lhs)?;
    let (rhs, stmts) = ctx.nested_block(|ctx| gen_expr(ctx, rhs))?;
    if stmts.is_empty() {
        let op = if is_and {
            BinaryOp::LogicalAnd
        } else {
            BinaryOp::LogicalOr
        };
        return Ok(IrExpr::binary(op, OperandKind::Boolean, lhs, rhs));
    }
    combine_lazily(ctx, lhs, stmts, rhs, is_and)
}

/// `t = lhs; if (t) { stmts; t = rhs }` (negated test for `||`)
fn combine_lazily(
    ctx: &mut GenerationContext,
    lhs: IrExpr,
    stmts: Vec<IrStmt>,
    rhs: IrExpr,
    is_and: bool,
) -> GenResult<IrExpr> {
    let temp = ctx.new_temp();
    ctx.emit_assign(IrExpr::var(temp), lhs);
    let (_, then_body) = ctx.nested_block(|ctx| {
        ctx.splice(stmts);
        ctx.emit_assign(IrExpr::var(temp), rhs);
        Ok(())
    })?;
    let condition = if is_and {
        IrExpr::var(temp)
    } else {
        negate(IrExpr::var(temp))
    };
    ctx.emit(StmtKind::If {
        condition,
        then_body,
        else_body: Vec::new(),
    });
    Ok(IrExpr::var(temp))
}

fn gen_receiver(ctx: &mut GenerationContext, receiver: &Receiver) -> GenResult<Option<IrExpr>> {
    match receiver {
        Receiver::None => Ok(None),
        Receiver::Expr(expr) => gen_expr(ctx, expr).map(Some),
        Receiver::Implicit { class } => this_ref(ctx, *class).map(Some),
    }
}

fn is_virtual(ctx: &GenerationContext, function: DeclId) -> bool {
    ctx.decls
        .function(function)
        .is_some_and(|f| f.modality != Modality::Final && !f.kind.is_constructor())
}

#[allow(clippy::too_many_arguments)]
fn gen_call(
    ctx: &mut GenerationContext,
    function: DeclId,
    receiver: &Receiver,
    extension_receiver: Option<&TypedExpression>,
    args: &[TypedExpression],
    safe: bool,
    is_super: bool,
) -> GenResult<IrExpr> {
    let info = ctx.function_info(function)?;
    if info.params.len() != args.len() || info.has_extension_receiver != extension_receiver.is_some() {
        return Err(ctx.error(
            error_codes::ARGUMENT_MISMATCH,
            format!(
                "'{}' expects {} arguments, got {}",
                ctx.decl(function)?.name,
                info.params.len(),
                args.len()
            ),
        ));
    }

    let receiver = gen_receiver(ctx, receiver)?;
    let has_receiver = receiver.is_some();
    let virtual_dispatch = has_receiver && !is_super && is_virtual(ctx, function);
    let build = move |mut values: Vec<IrExpr>| {
        let receiver = if has_receiver && !values.is_empty() {
            Some(values.remove(0))
        } else {
            None
        };
        IrExpr::invoke(receiver, function, values, virtual_dispatch)
    };

    let leading = gen_ordered(ctx, receiver.into_iter().collect(), extension_receiver)?;
    if !safe {
        let values = gen_ordered(ctx, leading, args.iter())?;
        return Ok(build(values));
    }

    // The null-checked value is the dispatch receiver, or the extension
    // receiver of a top-level extension
    let mut leading = leading;
    let Some(first) = leading.first_mut() else {
        return Err(ctx.error(error_codes::ARGUMENT_MISMATCH, "safe call without a receiver"));
    };
    let taken = std::mem::replace(first, IrExpr::Undefined);
    let checked = ctx.materialize(taken);
    *first = checked.clone();

    let (call, stmts) = ctx.nested_block(|ctx| gen_ordered(ctx, leading, args.iter()).map(build))?;
    if stmts.is_empty() {
        return Ok(IrExpr::conditional(IrExpr::is_not_null(checked), call, IrExpr::Null));
    }
    let result = ctx.new_temp();
    let (_, then_body) = ctx.nested_block(|ctx| {
        ctx.splice(stmts);
        ctx.emit_assign(IrExpr::var(result), call);
        Ok(())
    })?;
    let location = ctx.location();
    ctx.emit(StmtKind::If {
        condition: IrExpr::is_not_null(checked),
        then_body,
        else_body: vec![IrStmt::assign(IrExpr::var(result), IrExpr::Null, location)],
    });
    Ok(IrExpr::var(result))
}

fn property_read(ctx: &mut GenerationContext, property: DeclId, receiver: Option<IrExpr>) -> GenResult<IrExpr> {
    let info = ctx.property_info(property)?;
    match info.getter {
        Some(getter) if !info.is_field_like() => {
            let virtual_dispatch = receiver.is_some() && info.modality != Modality::Final;
            Ok(IrExpr::invoke(receiver, getter, Vec::new(), virtual_dispatch))
        }
        _ => Ok(IrExpr::field(receiver, IrField::Backing(property))),
    }
}

fn gen_property_set(
    ctx: &mut GenerationContext,
    property: DeclId,
    receiver: Option<IrExpr>,
    value: IrExpr,
) -> GenResult<()> {
    let info = ctx.property_info(property)?;
    match info.setter {
        Some(setter) if !info.is_field_like() => {
            let virtual_dispatch = receiver.is_some() && info.modality != Modality::Final;
            ctx.emit_eval(IrExpr::invoke(receiver, setter, vec![value], virtual_dispatch));
        }
        _ => ctx.emit_assign(IrExpr::field(receiver, IrField::Backing(property)), value),
    }
    Ok(())
}

/// `this` of `class` as seen from the current function. Inner-class chains
/// are walked through their outer links; anything else is left as an
/// outer-instance reference for closure lowering.
fn this_ref(ctx: &GenerationContext, class: DeclId) -> GenResult<IrExpr> {
    let current = match ctx.in_function().then(|| ctx.module.this_class(ctx.current_function())).flatten() {
        Some(current) => current,
        None => {
            return Err(ctx.error(
                error_codes::THIS_OUT_OF_SCOPE,
                format!("no instance of '{}' is in scope", ctx.decl(class)?.name),
            ))
        }
    };
    let encloses = ctx
        .module
        .class_by_decl(class)
        .is_some_and(|target| ctx.module.function_is_within(ctx.current_function(), target));
    if !encloses {
        return Err(ctx.error(
            error_codes::THIS_OUT_OF_SCOPE,
            format!("'{}' does not enclose this code", ctx.decl(class)?.name),
        ));
    }

    let mut expr = IrExpr::This;
    let mut cursor = current;
    loop {
        let info = &ctx.module.classes[cursor];
        if info.decl == class {
            return Ok(expr);
        }
        match info.container {
            Container::Class(outer) if info.is_inner => {
                expr = IrExpr::field(Some(expr), IrField::OuterClass(info.decl));
                cursor = outer;
            }
            _ => return Ok(IrExpr::OuterThis(class)),
        }
    }
}

fn equality_kind(lhs: &TypedExpression, rhs: &TypedExpression) -> OperandKind {
    if matches!(lhs.kind, TypedExpressionKind::Null) || matches!(rhs.kind, TypedExpressionKind::Null) {
        return OperandKind::Reference;
    }
    match (&lhs.ty, &rhs.ty) {
        (TypeRef::Primitive(a), TypeRef::Primitive(b)) if a == b => (*a).into(),
        (TypeRef::String, TypeRef::String) => OperandKind::String,
        _ => OperandKind::Reference,
    }
}

/// Logical negation, folding double negation and boolean literals
fn negate(expr: IrExpr) -> IrExpr {
    match expr {
        IrExpr::Unary {
            op: UnaryOp::Not,
            operand,
            ..
        } => *operand,
        IrExpr::True => IrExpr::False,
        IrExpr::False => IrExpr::True,
        other => IrExpr::not(other),
    }
}

// -------------------------------------------------------------------------
// Value-producing control flow
// -------------------------------------------------------------------------

/// Generate a branch body, storing its value in `result` when one is
/// wanted
fn gen_branch_into(ctx: &mut GenerationContext, body: &TypedExpression, result: Option<VarId>) -> GenResult<()> {
    match result {
        Some(result) => {
            let value = gen_expr(ctx, body)?;
            ctx.emit_assign(IrExpr::var(result), value);
            Ok(())
        }
        None => gen_effect(ctx, body),
    }
}

fn gen_if(
    ctx: &mut GenerationContext,
    condition: &TypedExpression,
    then_branch: &TypedExpression,
    else_branch: Option<&TypedExpression>,
    wants_value: bool,
) -> GenResult<IrExpr> {
    let condition = gen_expr(ctx, condition)?;
    let wants_value = wants_value && else_branch.is_some();

    if wants_value {
        let (then_value, then_stmts) = ctx.nested_block(|ctx| gen_expr(ctx, then_branch))?;
        let (else_value, else_stmts) = match else_branch {
            Some(branch) => ctx.nested_block(|ctx| gen_expr(ctx, branch))?,
            None => (IrExpr::Undefined, Vec::new()),
        };
        if then_stmts.is_empty() && else_stmts.is_empty() {
            return Ok(IrExpr::conditional(condition, then_value, else_value));
        }
        let result = ctx.new_temp();
        let (_, then_body) = ctx.nested_block(|ctx| {
            ctx.splice(then_stmts);
            ctx.emit_assign(IrExpr::var(result), then_value);
            Ok(())
        })?;
        let (_, else_body) = ctx.nested_block(|ctx| {
            ctx.splice(else_stmts);
            ctx.emit_assign(IrExpr::var(result), else_value);
            Ok(())
        })?;
        ctx.emit(StmtKind::If {
            condition,
            then_body,
            else_body,
        });
        return Ok(IrExpr::var(result));
    }

    let (_, then_body) = ctx.nested_block(|ctx| gen_effect(ctx, then_branch))?;
    let (_, else_body) = match else_branch {
        Some(branch) => ctx.nested_block(|ctx| gen_effect(ctx, branch))?,
        None => ((), Vec::new()),
    };
    if !then_body.is_empty() || !else_body.is_empty() {
        ctx.emit(StmtKind::If {
            condition,
            then_body,
            else_body,
        });
    } else if effect_of(&condition) == Effect::Effects {
        ctx.emit_eval(condition);
    }
    Ok(IrExpr::Undefined)
}

/// Subject values a `switch` can dispatch on directly
fn switch_key(subject: &TypeRef, condition: &WhenCondition) -> Option<Constant> {
    let WhenCondition::Equals(value) = condition else {
        return None;
    };
    let TypedExpressionKind::Literal(constant) = &value.kind else {
        return None;
    };
    match (subject, constant) {
        (TypeRef::Primitive(PrimitiveKind::Int), Constant::Int(_))
        | (TypeRef::Primitive(PrimitiveKind::Char), Constant::Char(_))
        | (TypeRef::String, Constant::String(_)) => Some(constant.clone()),
        _ => None,
    }
}

fn gen_when(
    ctx: &mut GenerationContext,
    subject: Option<&TypedExpression>,
    branches: &[WhenBranch],
    else_branch: Option<&TypedExpression>,
    wants_value: bool,
) -> GenResult<IrExpr> {
    let Some(subject) = subject else {
        let result = wants_value.then(|| ctx.new_temp());
        gen_when_chain(ctx, None, branches, else_branch, result)?;
        return Ok(result.map_or(IrExpr::Undefined, IrExpr::var));
    };

    let value = gen_expr(ctx, subject)?;
    let keys: Option<Vec<Vec<Constant>>> = branches
        .iter()
        .map(|branch| {
            if branch.conditions.is_empty() {
                return None;
            }
            branch
                .conditions
                .iter()
                .map(|c| switch_key(&subject.ty, c))
                .collect()
        })
        .collect();

    match keys {
        Some(keys) if !branches.is_empty() => ctx.with_label(None, false, |ctx, label| {
            let result = wants_value.then(|| ctx.new_temp());
            let mut cases = Vec::with_capacity(branches.len());
            for (branch, values) in branches.iter().zip(keys) {
                let (_, body) = ctx.nested_block(|ctx| {
                    gen_branch_into(ctx, &branch.body, result)?;
                    ctx.emit(StmtKind::Break(label));
                    Ok(())
                })?;
                cases.push(SwitchCase {
                    values: values.into_iter().map(IrExpr::Constant).collect(),
                    body,
                });
            }
            let default = match else_branch {
                Some(branch) => Some(ctx.nested_block(|ctx| gen_branch_into(ctx, branch, result))?.1),
                None => None,
            };
            ctx.emit(StmtKind::Switch {
                label,
                value,
                cases,
                default,
            });
            Ok(result.map_or(IrExpr::Undefined, IrExpr::var))
        }),
        _ => {
            let value = ctx.materialize(value);
            let result = wants_value.then(|| ctx.new_temp());
            gen_when_chain(ctx, Some((&value, &subject.ty)), branches, else_branch, result)?;
            Ok(result.map_or(IrExpr::Undefined, IrExpr::var))
        }
    }
}

/// `if (c1) b1 else if (c2) b2 ... else e`, each test generated only on the
/// path that reaches it
fn gen_when_chain(
    ctx: &mut GenerationContext,
    subject: Option<(&IrExpr, &TypeRef)>,
    branches: &[WhenBranch],
    else_branch: Option<&TypedExpression>,
    result: Option<VarId>,
) -> GenResult<()> {
    let Some((first, rest)) = branches.split_first() else {
        if let Some(branch) = else_branch {
            gen_branch_into(ctx, branch, result)?;
        }
        return Ok(());
    };
    let condition = gen_when_conditions(ctx, subject, &first.conditions)?;
    let (_, then_body) = ctx.nested_block(|ctx| gen_branch_into(ctx, &first.body, result))?;
    let (_, else_body) = ctx.nested_block(|ctx| gen_when_chain(ctx, subject, rest, else_branch, result))?;
    ctx.emit(StmtKind::If {
        condition,
        then_body,
        else_body,
    });
    Ok(())
}

/// Disjunction of a branch's conditions, short-circuiting like `||`
fn gen_when_conditions(
    ctx: &mut GenerationContext,
    subject: Option<(&IrExpr, &TypeRef)>,
    conditions: &[WhenCondition],
) -> GenResult<IrExpr> {
    let Some((first, rest)) = conditions.split_first() else {
        return Ok(IrExpr::True);
    };
    let mut acc = gen_when_condition(ctx, subject, first)?;
    for condition in rest {
        let (next, stmts) = ctx.nested_block(|ctx| gen_when_condition(ctx, subject, condition))?;
        acc = if stmts.is_empty() {
            IrExpr::binary(BinaryOp::LogicalOr, OperandKind::Boolean, acc, next)
        } else {
            combine_lazily(ctx, acc, stmts, next, false)?
        };
    }
    Ok(acc)
}

fn gen_when_condition(
    ctx: &mut GenerationContext,
    subject: Option<(&IrExpr, &TypeRef)>,
    condition: &WhenCondition,
) -> GenResult<IrExpr> {
    match (condition, subject) {
        (WhenCondition::Condition(expr), _) => gen_expr(ctx, expr),
        (WhenCondition::Equals(expr), Some((subject, ty))) => {
            let kind = match (ty, &expr.ty) {
                _ if matches!(expr.kind, TypedExpressionKind::Null) => OperandKind::Reference,
                (TypeRef::Primitive(a), TypeRef::Primitive(b)) if a == b => (*a).into(),
                (TypeRef::String, TypeRef::String) => OperandKind::String,
                _ => OperandKind::Reference,
            };
            let value = gen_expr(ctx, expr)?;
            Ok(IrExpr::binary(BinaryOp::Eq, kind, subject.clone(), value))
        }
        (WhenCondition::Is { ty, negated }, Some((subject, _))) => {
            let test = IrExpr::InstanceOf {
                value: Box::new(subject.clone()),
                ty: ty.clone(),
            };
            Ok(if *negated { negate(test) } else { test })
        }
        (_, None) => Err(ctx.error(
            error_codes::ARGUMENT_MISMATCH,
            "subject condition in a when without a subject",
        )),
    }
}

fn gen_try(
    ctx: &mut GenerationContext,
    body: &TypedExpression,
    catches: &[CatchBranch],
    finally: Option<&[TypedStatement]>,
    wants_value: bool,
) -> GenResult<IrExpr> {
    let result = wants_value.then(|| ctx.new_temp());
    let (_, body) = ctx.nested_block(|ctx| ctx.nested_variable_scope(|ctx| gen_branch_into(ctx, body, result)))?;

    let mut clauses = Vec::with_capacity(catches.len());
    for catch in catches {
        let (var, body) = ctx.nested_block(|ctx| {
            ctx.nested_variable_scope(|ctx| {
                let var = ctx.declare_local(catch.local, &catch.name);
                gen_branch_into(ctx, &catch.body, result)?;
                Ok(var)
            })
        })?;
        clauses.push(CatchClause {
            var,
            filter: catch.ty.clone(),
            body,
        });
    }

    let finally = match finally {
        Some(stmts) => Some(ctx.nested_block(|ctx| ctx.nested_variable_scope(|ctx| gen_stmts(ctx, stmts)))?.1),
        None => None,
    };
    ctx.emit(StmtKind::Try {
        body,
        catches: clauses,
        finally,
    });
    Ok(result.map_or(IrExpr::Undefined, IrExpr::var))
}
