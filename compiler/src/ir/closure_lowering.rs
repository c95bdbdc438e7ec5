//! Closure lowering
//!
//! Makes every capture explicit so that each function can be emitted at
//! file level:
//!
//! 1. Local classes: each entity captured by a class body (a local of an
//!    enclosing function, or the instance of an enclosing class) gets one
//!    closure field on the outermost local class that can still see it.
//!    References become `this` chains ending in that field, every
//!    constructor gains one leading parameter per field, and every
//!    construction site in the module passes the captured values first.
//! 2. Local functions and lambdas: the free variables they read (and those
//!    of the local functions they reference) become `captures`, passed as
//!    leading arguments by the renderer. Use of the enclosing `this` sets
//!    `captures_this`.

use super::arena::{ClassId, FunctionId, VarId};
use super::decls::{Capture, Container, IrModule};
use super::expr::{Invocation, IrExpr, IrField, VarRef};
use super::stmt::IrStmt;
use super::validation::{LoweringError, LoweringErrorKind};
use super::visit::{transform_stmts, visit_exprs};
use indexmap::{IndexMap, IndexSet};

/// Counters reported by [`lower_closures`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClosureStats {
    pub closure_fields: usize,
    pub lowered_classes: usize,
    pub construction_sites: usize,
    pub capturing_functions: usize,
}

/// Lower all captures of the module
pub fn lower_closures(module: &mut IrModule) -> Result<ClosureStats, LoweringError> {
    discover_closure_fields(module)?;
    rewrite_captured_references(module)?;
    let lowered_classes = thread_constructor_parameters(module);
    let construction_sites = supply_construction_arguments(module)?;
    let capturing_functions = lower_local_functions(module)?;

    let stats = ClosureStats {
        closure_fields: module.closure_fields.len(),
        lowered_classes,
        construction_sites,
        capturing_functions,
    };
    tracing::debug!(
        "closure lowering: {} fields on {} classes, {} construction sites, {} capturing functions",
        stats.closure_fields,
        stats.lowered_classes,
        stats.construction_sites,
        stats.capturing_functions
    );
    Ok(stats)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Link {
    /// Inner class: the enclosing instance is in the outer-class link
    Outer,
    /// Local class: the enclosing instance is a captured value
    Capture,
}

/// The class whose instance an instance of `class` can reach, and how
fn enclosing_instance(module: &IrModule, class: ClassId) -> Option<(ClassId, Link)> {
    let info = &module.classes[class];
    match info.container {
        Container::Class(outer) if info.is_inner => Some((outer, Link::Outer)),
        Container::Function(function) => module.this_class(function).map(|outer| (outer, Link::Capture)),
        _ => None,
    }
}

/// `class` is declared somewhere in the body of `function`
fn class_within_function(module: &IrModule, class: ClassId, function: FunctionId) -> bool {
    let mut container = module.classes[class].container;
    loop {
        match container {
            Container::File(_) => return false,
            Container::Function(id) if id == function => return true,
            Container::Function(id) => container = module.functions[id].container,
            Container::Class(id) => container = module.classes[id].container,
        }
    }
}

/// Functions whose locals `function` reads directly: itself and, through
/// local functions and lambdas, the functions enclosing it
fn scope_functions(module: &IrModule, function: FunctionId) -> Vec<FunctionId> {
    let mut scope = vec![function];
    let mut current = function;
    while module.functions[current].kind.is_local() {
        match module.functions[current].container {
            Container::Function(outer) => {
                scope.push(outer);
                current = outer;
            }
            _ => break,
        }
    }
    scope
}

fn field_name(module: &IrModule, capture: Capture) -> String {
    match capture {
        Capture::Variable(var) => format!("${}", module.variable_name(var).unwrap_or("tmp")),
        Capture::Instance(class) => {
            let name = module
                .class_by_decl(class)
                .map_or("outer", |id| module.classes[id].name.as_str());
            format!("$this${}", name)
        }
    }
}

/// One step outwards along the enclosing-instance chain
fn step(module: &mut IrModule, expr: IrExpr, from: ClassId, to: ClassId, link: Link) -> IrExpr {
    match link {
        Link::Outer => IrExpr::field(Some(expr), IrField::OuterClass(module.classes[from].decl)),
        Link::Capture => {
            let capture = Capture::Instance(module.classes[to].decl);
            let name = field_name(module, capture);
            let field = module.add_closure_field(from, capture, name);
            IrExpr::field(Some(expr), IrField::Closure(field))
        }
    }
}

/// Access path from `this` of `from` to the captured entity, creating the
/// closure fields it goes through
fn path_to(module: &mut IrModule, from: ClassId, capture: Capture) -> Option<IrExpr> {
    let mut expr = IrExpr::This;
    match capture {
        Capture::Instance(target) => {
            let mut current = from;
            while module.classes[current].decl != target {
                let (next, link) = enclosing_instance(module, current)?;
                expr = step(module, expr, current, next, link);
                current = next;
            }
            Some(expr)
        }
        Capture::Variable(var) => {
            let owner = module.variables[var].function;
            let mut chain = vec![(from, None)];
            let mut current = from;
            while let Some((next, link)) = enclosing_instance(module, current) {
                if let Some(last) = chain.last_mut() {
                    last.1 = Some(link);
                }
                chain.push((next, None));
                current = next;
            }
            // The outermost class that still sits inside the owner holds it
            let holder = chain
                .iter()
                .rposition(|(class, _)| class_within_function(module, *class, owner))?;
            for index in 0..holder {
                let (class, link) = chain[index];
                let link = link?;
                expr = step(module, expr, class, chain[index + 1].0, link);
            }
            let name = field_name(module, capture);
            let field = module.add_closure_field(chain[holder].0, capture, name);
            Some(IrExpr::field(Some(expr), IrField::Closure(field)))
        }
    }
}

/// The captured entity as seen from inside `site`
fn capture_expr(module: &mut IrModule, site: FunctionId, capture: Capture) -> Option<IrExpr> {
    if let Capture::Variable(var) = capture {
        let owner = module.variables[var].function;
        if scope_functions(module, site).contains(&owner) {
            return Some(IrExpr::Var(VarRef {
                var,
                free: owner != site,
            }));
        }
    }
    let class = module.this_class(site)?;
    path_to(module, class, capture)
}

fn constructed_class(module: &IrModule, expr: &IrExpr) -> Option<ClassId> {
    match expr {
        IrExpr::New { class, .. } => module.class_by_decl(*class),
        IrExpr::Invoke(Invocation { function, .. }) => {
            let id = module.function_by_decl(*function)?;
            if !module.functions[id].is_constructor() {
                return None;
            }
            match module.functions[id].container {
                Container::Class(class) => Some(class),
                _ => None,
            }
        }
        _ => None,
    }
}

fn functions_with_bodies(module: &IrModule) -> Vec<FunctionId> {
    module
        .functions
        .iter()
        .filter(|(_, f)| f.body.is_some())
        .map(|(id, _)| id)
        .collect()
}

fn unresolved(module: &IrModule, function: FunctionId, capture: Capture) -> LoweringError {
    let description = match capture {
        Capture::Variable(var) => format!(
            "variable '{}' is not reachable",
            module.variable_name(var).unwrap_or("<temporary>")
        ),
        Capture::Instance(class) => format!("no enclosing instance of {}", class),
    };
    LoweringError {
        kind: LoweringErrorKind::UnloweredCapture { description },
        function: Some(module.functions[function].name.clone()),
        location: module.functions[function].location,
    }
}

/// Everything `function` needs from enclosing scopes: free variables,
/// outer instances and the captures of classes it constructs
fn collect_needs(module: &IrModule, function: FunctionId) -> Vec<Capture> {
    let Some(body) = module.functions[function].body.as_deref() else {
        return Vec::new();
    };
    let mut needs = Vec::new();
    visit_exprs(body, &mut |expr| match expr {
        IrExpr::Var(v) if v.free => needs.push(Capture::Variable(v.var)),
        IrExpr::OuterThis(class) => needs.push(Capture::Instance(*class)),
        _ => {
            if let Some(class) = constructed_class(module, expr) {
                needs.extend(
                    module.classes[class]
                        .closure_fields
                        .iter()
                        .map(|f| module.closure_fields[*f].capture),
                );
            }
        }
    });
    needs
}

/// Resolve every need until no class gains a closure field. A class that
/// constructs another local class may itself need new fields to supply
/// the other class's captures.
fn discover_closure_fields(module: &mut IrModule) -> Result<(), LoweringError> {
    let mut rounds = 0;
    loop {
        rounds += 1;
        let before = module.closure_fields.len();
        for function in functions_with_bodies(module) {
            for capture in collect_needs(module, function) {
                if capture_expr(module, function, capture).is_none() {
                    return Err(unresolved(module, function, capture));
                }
            }
        }
        if module.closure_fields.len() == before {
            break;
        }
    }
    tracing::trace!("closure fields settled after {} rounds", rounds);
    Ok(())
}

/// Replace class-crossing free references and outer instances by their
/// access paths
fn rewrite_captured_references(module: &mut IrModule) -> Result<(), LoweringError> {
    for function in functions_with_bodies(module) {
        let scope = scope_functions(module, function);
        let Some(mut body) = module.functions[function].body.take() else {
            continue;
        };
        let mut failure = None;
        transform_stmts(&mut body, &mut |expr| {
            let capture = match &expr {
                IrExpr::Var(v) if v.free && !scope.contains(&module.variables[v.var].function) => {
                    Capture::Variable(v.var)
                }
                IrExpr::OuterThis(class) => Capture::Instance(*class),
                _ => return expr,
            };
            match capture_expr(module, function, capture) {
                Some(path) => path,
                None => {
                    failure.get_or_insert(capture);
                    expr
                }
            }
        });
        module.functions[function].body = Some(body);
        if let Some(capture) = failure {
            return Err(unresolved(module, function, capture));
        }
    }
    Ok(())
}

/// Prepend one parameter per closure field to every constructor and store
/// it before any other statement
fn thread_constructor_parameters(module: &mut IrModule) -> usize {
    let mut lowered = 0;
    let classes: Vec<ClassId> = module.classes.ids().collect();
    for class in classes {
        let fields = module.classes[class].closure_fields.clone();
        if fields.is_empty() {
            continue;
        }
        lowered += 1;
        for constructor in module.constructors(class) {
            let params: Vec<VarId> = fields
                .iter()
                .map(|field| {
                    let name = module.closure_fields[*field].name.clone();
                    module.new_parameter(name, constructor)
                })
                .collect();
            let location = module.functions[constructor].location;
            let stores: Vec<IrStmt> = fields
                .iter()
                .zip(&params)
                .map(|(field, param)| {
                    IrStmt::assign(
                        IrExpr::field(Some(IrExpr::This), IrField::Closure(*field)),
                        IrExpr::var(*param),
                        location,
                    )
                })
                .collect();
            let function = &mut module.functions[constructor];
            function.params.splice(0..0, params);
            if let Some(body) = function.body.as_mut() {
                body.splice(0..0, stores);
            }
        }
    }
    lowered
}

/// Pass the captured values as leading arguments at every construction
/// site and constructor delegation of a class with closure fields
fn supply_construction_arguments(module: &mut IrModule) -> Result<usize, LoweringError> {
    let mut sites = 0;
    for function in functions_with_bodies(module) {
        let Some(mut body) = module.functions[function].body.take() else {
            continue;
        };
        let mut failure = None;
        transform_stmts(&mut body, &mut |mut expr| {
            let Some(class) = constructed_class(module, &expr) else {
                return expr;
            };
            let fields = module.classes[class].closure_fields.clone();
            if fields.is_empty() {
                return expr;
            }
            let mut leading = Vec::with_capacity(fields.len());
            for field in fields {
                let capture = module.closure_fields[field].capture;
                match capture_expr(module, function, capture) {
                    Some(value) => leading.push(value),
                    None => {
                        failure.get_or_insert(capture);
                        return expr;
                    }
                }
            }
            if let IrExpr::New { args, .. } | IrExpr::Invoke(Invocation { args, .. }) = &mut expr {
                args.splice(0..0, leading);
                sites += 1;
            }
            expr
        });
        module.functions[function].body = Some(body);
        if let Some(capture) = failure {
            return Err(unresolved(module, function, capture));
        }
    }
    Ok(sites)
}

/// Direct uses of one local function
#[derive(Default)]
struct LocalUses {
    free: IndexSet<VarId>,
    uses_this: bool,
    referenced: Vec<FunctionId>,
}

fn local_uses(module: &IrModule, function: FunctionId) -> LocalUses {
    let mut uses = LocalUses::default();
    let Some(body) = module.functions[function].body.as_deref() else {
        return uses;
    };
    let mut referenced = Vec::new();
    visit_exprs(body, &mut |expr| match expr {
        IrExpr::Var(v) if v.free => {
            uses.free.insert(v.var);
        }
        IrExpr::This => uses.uses_this = true,
        IrExpr::FunctionRef(decl) => referenced.push(*decl),
        IrExpr::Invoke(Invocation { function, .. }) => referenced.push(*function),
        _ => {}
    });
    uses.referenced = referenced
        .into_iter()
        .filter_map(|decl| module.function_by_decl(decl))
        .filter(|id| module.functions[*id].kind.is_local())
        .collect();
    uses
}

/// Compute captures of local functions and lambdas, innermost uses
/// propagating outwards through references, and clear their free flags
fn lower_local_functions(module: &mut IrModule) -> Result<usize, LoweringError> {
    let locals: Vec<FunctionId> = module
        .functions
        .iter()
        .filter(|(_, f)| f.kind.is_local())
        .map(|(id, _)| id)
        .collect();
    let mut uses: IndexMap<FunctionId, LocalUses> =
        locals.iter().map(|id| (*id, local_uses(module, *id))).collect();

    loop {
        let mut changed = false;
        for function in &locals {
            let referenced = uses[function].referenced.clone();
            for callee in referenced {
                if callee == *function {
                    continue;
                }
                let inherited: Vec<VarId> = uses[&callee]
                    .free
                    .iter()
                    .copied()
                    .filter(|var| module.variables[*var].function != *function)
                    .collect();
                let callee_this = uses[&callee].uses_this;
                let entry = &mut uses[function];
                for var in inherited {
                    changed |= entry.free.insert(var);
                }
                if callee_this && !entry.uses_this {
                    entry.uses_this = true;
                    changed = true;
                }
            }
        }
        if !changed {
            break;
        }
    }

    // Non-local functions must own everything the local functions they
    // reference capture
    for function in functions_with_bodies(module) {
        if module.functions[function].kind.is_local() {
            continue;
        }
        for callee in local_uses(module, function).referenced {
            if let Some(var) = uses[&callee]
                .free
                .iter()
                .find(|var| module.variables[**var].function != function)
            {
                return Err(unresolved(module, function, Capture::Variable(*var)));
            }
        }
    }

    let mut capturing = 0;
    for (function, use_info) in uses {
        let entry = &mut module.functions[function];
        entry.captures = use_info.free.into_iter().collect();
        entry.captures_this = use_info.uses_this;
        if !entry.captures.is_empty() || entry.captures_this {
            capturing += 1;
        }
        if let Some(body) = entry.body.as_mut() {
            transform_stmts(body, &mut |expr| match expr {
                IrExpr::Var(v) if v.free => IrExpr::Var(VarRef {
                    var: v.var,
                    free: false,
                }),
                other => other,
            });
        }
    }
    Ok(capturing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::decls::{IrClass, IrDecl, IrFunction, VariableKind};
    use crate::ir::validation::validate_module;
    use crate::tast::{ClassKind, DeclId, FunctionKind, SourceLocation};

    fn loc() -> SourceLocation {
        SourceLocation::unknown()
    }

    fn add_function(module: &mut IrModule, raw: u32, kind: FunctionKind, container: Container) -> FunctionId {
        let decl = DeclId::from_raw(raw);
        let id = module
            .functions
            .alloc(IrFunction::new(decl, format!("f{}", raw), kind, container, loc()));
        module.functions[id].body = Some(Vec::new());
        module.register(container, decl, IrDecl::Function(id));
        id
    }

    #[test]
    fn test_lambda_captures_outer_local() {
        let mut module = IrModule::new("m");
        let file = module.add_file("a.kt", Vec::new());
        let outer = add_function(&mut module, 0, FunctionKind::TopLevel, Container::File(file));
        let x = module.new_variable(Some("x".into()), VariableKind::Local, outer);
        let lambda = add_function(&mut module, 1, FunctionKind::Lambda, Container::Function(outer));
        module.functions[lambda].body = Some(vec![IrStmt::eval(
            IrExpr::Var(VarRef { var: x, free: true }),
            loc(),
        )]);
        module.functions[outer].body = Some(vec![IrStmt::eval(IrExpr::FunctionRef(DeclId::from_raw(1)), loc())]);

        let stats = lower_closures(&mut module).unwrap();
        assert_eq!(stats.capturing_functions, 1);
        assert_eq!(module.functions[lambda].captures, vec![x]);
        assert!(!module.functions[lambda].captures_this);
        assert!(validate_module(&module).is_ok());
    }

    #[test]
    fn test_local_class_gets_field_param_and_argument() {
        let mut module = IrModule::new("m");
        let file = module.add_file("a.kt", Vec::new());
        let outer = add_function(&mut module, 0, FunctionKind::TopLevel, Container::File(file));
        let x = module.new_variable(Some("x".into()), VariableKind::Local, outer);

        let class_decl = DeclId::from_raw(10);
        let class = module.classes.alloc(IrClass {
            decl: class_decl,
            name: "Local".into(),
            kind: ClassKind::Class,
            container: Container::Function(outer),
            decls: Default::default(),
            is_inner: false,
            closure_fields: Vec::new(),
            delegate_fields: Vec::new(),
            delegations: Vec::new(),
            location: loc(),
        });
        module.register(Container::Function(outer), class_decl, IrDecl::Class(class));
        let ctor = add_function(
            &mut module,
            11,
            FunctionKind::Constructor { primary: true },
            Container::Class(class),
        );
        let method = add_function(&mut module, 12, FunctionKind::Member, Container::Class(class));
        module.functions[method].body = Some(vec![IrStmt::eval(
            IrExpr::Var(VarRef { var: x, free: true }),
            loc(),
        )]);
        module.functions[outer].body = Some(vec![IrStmt::eval(
            IrExpr::New {
                class: class_decl,
                constructor: DeclId::from_raw(11),
                args: Vec::new(),
            },
            loc(),
        )]);

        let stats = lower_closures(&mut module).unwrap();
        assert_eq!(stats.closure_fields, 1);
        assert_eq!(stats.construction_sites, 1);
        assert_eq!(module.functions[ctor].params.len(), 1);
        assert_eq!(module.functions[ctor].body.as_ref().unwrap().len(), 1);

        let read = &module.functions[method].body.as_ref().unwrap()[0];
        assert!(matches!(
            read.kind,
            crate::ir::StmtKind::Assign {
                target: None,
                value: IrExpr::Field {
                    field: IrField::Closure(_),
                    ..
                }
            }
        ));
        let site = &module.functions[outer].body.as_ref().unwrap()[0];
        assert!(matches!(
            &site.kind,
            crate::ir::StmtKind::Assign { value: IrExpr::New { args, .. }, .. } if args == &vec![IrExpr::var(x)]
        ));
        assert!(validate_module(&module).is_ok());
    }

    /// ```text
    /// fun f0(x) { { x -> class B { fun f12() { x; x@f0 } }; B() } }
    /// ```
    #[test]
    fn test_same_named_captures_get_distinct_fields() {
        let mut module = IrModule::new("m");
        let file = module.add_file("a.kt", Vec::new());
        let outer = add_function(&mut module, 0, FunctionKind::TopLevel, Container::File(file));
        let outer_x = module.new_parameter("x", outer);
        module.functions[outer].params = vec![outer_x];
        let lambda = add_function(&mut module, 1, FunctionKind::Lambda, Container::Function(outer));
        let lambda_x = module.new_parameter("x", lambda);
        module.functions[lambda].params = vec![lambda_x];

        let class_decl = DeclId::from_raw(10);
        let class = module.classes.alloc(IrClass {
            decl: class_decl,
            name: "B".into(),
            kind: ClassKind::Class,
            container: Container::Function(lambda),
            decls: Default::default(),
            is_inner: false,
            closure_fields: Vec::new(),
            delegate_fields: Vec::new(),
            delegations: Vec::new(),
            location: loc(),
        });
        module.register(Container::Function(lambda), class_decl, IrDecl::Class(class));
        let ctor = add_function(
            &mut module,
            11,
            FunctionKind::Constructor { primary: true },
            Container::Class(class),
        );
        let method = add_function(&mut module, 12, FunctionKind::Member, Container::Class(class));
        module.functions[method].body = Some(vec![
            IrStmt::eval(IrExpr::Var(VarRef { var: lambda_x, free: true }), loc()),
            IrStmt::eval(IrExpr::Var(VarRef { var: outer_x, free: true }), loc()),
        ]);
        module.functions[lambda].body = Some(vec![IrStmt::eval(
            IrExpr::New {
                class: class_decl,
                constructor: DeclId::from_raw(11),
                args: Vec::new(),
            },
            loc(),
        )]);
        module.functions[outer].body = Some(vec![IrStmt::eval(IrExpr::FunctionRef(DeclId::from_raw(1)), loc())]);

        let stats = lower_closures(&mut module).unwrap();
        assert_eq!(stats.closure_fields, 2);

        let name_of = |capture| {
            let field = module.closure_field_for(class, capture).unwrap();
            module.closure_fields[field].name.clone()
        };
        assert_eq!(name_of(Capture::Variable(lambda_x)), "$x");
        assert_eq!(name_of(Capture::Variable(outer_x)), "$x_0");

        let params: Vec<_> = module.functions[ctor]
            .params
            .iter()
            .map(|param| module.variable_name(*param).unwrap().to_string())
            .collect();
        assert_eq!(params, vec!["$x", "$x_0"]);
        assert_eq!(module.functions[lambda].captures, vec![outer_x]);
        assert!(validate_module(&module).is_ok());
    }
}
