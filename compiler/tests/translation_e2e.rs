//! End-to-end translation of small resolved units: generation, lowering,
//! optimization and rendering

mod common;

use common::*;
use compiler::error_codes;
use compiler::ir::closure_lowering::lower_closures;
use compiler::ir::tast_to_ir::generate_module;
use compiler::ir::{dump_module, IrModule, StmtKind, SexpDumper};
use compiler::pipeline::{TranslationError, TranslationInput, Translator, TranslatorConfig};
use compiler::tast::{
    DeclId, FunctionKind, Receiver, TypeRef, TypedClass, TypedConstructor, TypedDeclaration,
    TypedExpressionKind, TypedFile, TypedFunction, TypedProperty, TypedStatementKind, WhenBranch,
    WhenCondition,
};

fn file(declarations: Vec<TypedDeclaration>) -> TypedFile {
    TypedFile {
        name: "main.kt".to_string(),
        package: Vec::new(),
        declarations,
    }
}

fn function(decl: DeclId, params: Vec<compiler::tast::TypedParam>, body: Vec<compiler::tast::TypedStatement>, line: u32) -> TypedFunction {
    TypedFunction {
        decl,
        extension_receiver: None,
        params,
        body: Some(body),
        location: at(line),
    }
}

fn translate(input: &TranslationInput) -> String {
    let mut translator = Translator::with_config(TranslatorConfig {
        validate_ir: true,
        ..TranslatorConfig::default()
    });
    match translator.translate(input) {
        Ok(translation) => translation.source,
        Err(e) => panic!("translation failed: {}", e),
    }
}

fn function_dump(module: &IrModule, input: &TranslationInput, decl: DeclId) -> String {
    let id = module.function_by_decl(decl).expect("function was generated");
    SexpDumper::new(module, &input.decls).function(id)
}

struct LocalClassUnit {
    input: TranslationInput,
    local: DeclId,
    local_ctor: DeclId,
    make: DeclId,
}

/// ```text
/// class Outer(val base: Int) {
///     fun make(): Int {
///         val x = 1
///         class Local { fun get() = x + base }
///         return Local().get()
///     }
/// }
/// ```
fn local_class_unit() -> LocalClassUnit {
    let mut unit = Unit::new();
    let outer = unit.class("Outer", None);
    let outer_ctor = unit.primary_constructor(outer, &[("base", int())]);
    let base = unit.property("base", Some(outer), int());
    let make = unit.function("make", FunctionKind::Member, Some(outer), &[], int());
    let local = unit.class("Local", Some(make));
    let local_ctor = unit.primary_constructor(local, &[]);
    let get = unit.function("get", FunctionKind::Member, Some(local), &[], int());
    let plus = unit.builtin("kotlin.Int.plus");

    let ctor_params = unit.params(&[("base", int())]);
    let x = unit.local();

    let base_read = expr(
        TypedExpressionKind::PropertyGet {
            property: base,
            receiver: Receiver::Implicit { class: outer },
            safe: false,
        },
        int(),
    );
    let get_fn = function(
        get,
        Vec::new(),
        vec![ret(get, method_call(plus, read_local(x, int()), vec![base_read], int()))],
        6,
    );
    let local_class = TypedClass {
        decl: local,
        constructors: vec![TypedConstructor {
            decl: local_ctor,
            params: Vec::new(),
            property_params: Vec::new(),
            delegation: None,
            body: Vec::new(),
            location: at(5),
        }],
        members: vec![TypedDeclaration::Function(get_fn)],
        init_blocks: Vec::new(),
        delegations: Vec::new(),
        location: at(5),
    };
    let construct = expr(
        TypedExpressionKind::New {
            class: local,
            constructor: local_ctor,
            outer: None,
            args: Vec::new(),
        },
        TypeRef::Class(local),
    );
    let make_fn = function(
        make,
        Vec::new(),
        vec![
            stmt_at(
                TypedStatementKind::LocalVar {
                    local: x,
                    name: "x".to_string(),
                    init: Some(int_lit(1)),
                },
                4,
            ),
            stmt_at(TypedStatementKind::LocalClass(local_class), 5),
            ret(make, method_call(get, construct, Vec::new(), int())),
        ],
        3,
    );
    let outer_class = TypedClass {
        decl: outer,
        constructors: vec![TypedConstructor {
            decl: outer_ctor,
            params: ctor_params,
            property_params: vec![(0, base)],
            delegation: None,
            body: Vec::new(),
            location: at(1),
        }],
        members: vec![
            TypedDeclaration::Property(TypedProperty {
                decl: base,
                initializer: None,
                getter: None,
                setter: None,
                location: at(1),
            }),
            TypedDeclaration::Function(make_fn),
        ],
        init_blocks: Vec::new(),
        delegations: Vec::new(),
        location: at(1),
    };

    LocalClassUnit {
        input: unit.into_input(vec![file(vec![TypedDeclaration::Class(outer_class)])]),
        local,
        local_ctor,
        make,
    }
}

#[test]
fn test_local_class_reads_are_left_symbolic_by_generation() {
    let unit = local_class_unit();
    let module = generate_module(&unit.input.decls, &unit.input.files, "app").expect("generation");
    let dump = dump_module(&module, &unit.input.decls);

    assert!(dump.starts_with("; module app\n; file main.kt\n"), "{}", dump);
    assert!(dump.contains("(free-var x)"), "{}", dump);
    assert!(dump.contains("(outer-this Outer)"), "{}", dump);
    assert!(dump.contains("(class Outer.make.Local (closure-fields ))"), "{}", dump);
}

#[test]
fn test_local_class_captures_become_closure_fields() {
    let unit = local_class_unit();
    let mut module = generate_module(&unit.input.decls, &unit.input.files, "app").expect("generation");
    let stats = lower_closures(&mut module).expect("closure lowering");

    assert_eq!(stats.closure_fields, 2);
    assert_eq!(stats.lowered_classes, 1);
    assert_eq!(stats.construction_sites, 1);

    let class = module.class_by_decl(unit.local).expect("local class");
    assert_eq!(module.classes[class].closure_fields.len(), 2);

    let dump = dump_module(&module, &unit.input.decls);
    assert!(
        dump.contains("(class Outer.make.Local (closure-fields (closure $x x) (closure $this$Outer this@Outer)))"),
        "{}",
        dump
    );
    assert!(!dump.contains("free-var"), "{}", dump);
    assert!(!dump.contains("outer-this"), "{}", dump);

    // Every constructor gains one leading parameter per field, stored first
    let ctor = function_dump(&module, &unit.input, unit.local_ctor);
    assert!(ctor.starts_with("(fun Outer.make.Local.<init> ($x $this$Outer)\n"), "{}", ctor);
    assert!(ctor.contains("  (assign (field this (closure $x x)) (var $x))\n"), "{}", ctor);
    let ctor_id = module.function_by_decl(unit.local_ctor).expect("constructor");
    assert_eq!(module.functions[ctor_id].params.len(), 2);

    // The construction site passes the captured local and the enclosing instance
    let make = function_dump(&module, &unit.input, unit.make);
    assert!(make.contains("(new Outer.make.Local (var x) this)"), "{}", make);
}

#[test]
fn test_local_class_renders_with_closure_fields() {
    let unit = local_class_unit();
    let js = translate(&unit.input);

    assert!(js.starts_with("var app = function (_, $runtime) {\n  'use strict';\n"), "{}", js);
    assert!(js.contains("function Outer(base) {"), "{}", js);
    assert!(js.contains("this.base = base;"), "{}", js);
    assert!(js.contains("Outer.prototype.make = function () {"), "{}", js);
    assert!(js.contains("return this.$x + this.$this$Outer.base | 0;"), "{}", js);
    assert!(js.contains("(x, this)"), "{}", js);
    assert!(js.contains("_.Outer = Outer;"), "{}", js);
}

/// ```text
/// fun total(a: Int, b: Int): Int {
///     var sum = 0
///     for (x in a until b) { sum = sum + x }
///     return sum
/// }
/// ```
fn range_loop_unit() -> (TranslationInput, DeclId) {
    let mut unit = Unit::new();
    let total = unit.function(
        "total",
        FunctionKind::TopLevel,
        None,
        &[("a", int()), ("b", int())],
        int(),
    );
    let until = unit.builtin("kotlin.ranges.until");
    let range = unit.builtin("kotlin.ranges.IntRange");
    let iterator = unit.builtin("kotlin.ranges.IntRange.iterator");
    let has_next = unit.builtin("kotlin.collections.IntIterator.hasNext");
    let next = unit.builtin("kotlin.collections.IntIterator.next");
    let plus = unit.builtin("kotlin.Int.plus");

    let params = unit.params(&[("a", int()), ("b", int())]);
    let sum = unit.local();
    let x = unit.local();

    let iterable = expr(
        TypedExpressionKind::Call {
            function: until,
            receiver: Receiver::None,
            extension_receiver: Some(Box::new(read(&params[0]))),
            args: vec![read(&params[1])],
            safe: false,
            is_super: false,
        },
        TypeRef::Class(range),
    );
    let body = vec![
        stmt(TypedStatementKind::LocalVar {
            local: sum,
            name: "sum".to_string(),
            init: Some(int_lit(0)),
        }),
        stmt_at(
            TypedStatementKind::ForIn {
                label: None,
                local: x,
                name: "x".to_string(),
                iterable,
                iterator,
                has_next,
                next,
                body: vec![stmt(TypedStatementKind::AssignLocal {
                    local: sum,
                    value: method_call(plus, read_local(sum, int()), vec![read_local(x, int())], int()),
                })],
            },
            3,
        ),
        ret(total, read_local(sum, int())),
    ];
    let total_fn = function(total, params, body, 1);
    (unit.into_input(vec![file(vec![TypedDeclaration::Function(total_fn)])]), total)
}

#[test]
fn test_range_loop_generates_iterator_protocol() {
    let (input, total) = range_loop_unit();
    let module = generate_module(&input.decls, &input.files, "app").expect("generation");
    let id = module.function_by_decl(total).expect("total");
    let body = module.functions[id].body.as_ref().expect("body");

    assert_eq!(body.len(), 3);
    let StmtKind::For {
        label,
        pre,
        condition,
        post,
        body: loop_body,
    } = &body[1].kind
    else {
        panic!("expected a for loop, got {:?}", body[1].kind);
    };
    assert_eq!(pre.len(), 1);
    assert!(condition.is_none());
    assert!(post.is_empty());

    let dumper = SexpDumper::new(&module, &input.decls);
    let pre = dumper.stmt(&pre[0]);
    assert!(pre.starts_with("(assign (var %"), "{}", pre);
    assert!(
        pre.ends_with(
            "(invoke static (invoke static _ kotlin.ranges.until (var a) (var b)) kotlin.ranges.IntRange.iterator))"
        ),
        "{}",
        pre
    );

    // if (!it.hasNext()) break; x = it.next(); ...
    let StmtKind::If { then_body, .. } = &loop_body[0].kind else {
        panic!("loop body must start with the exit test");
    };
    assert!(matches!(then_body[0].kind, StmtKind::Break(target) if target == *label));
    let exit = dumper.stmt(&loop_body[0]);
    assert!(exit.starts_with("(if (not:boolean (invoke static (var %"), "{}", exit);
    assert!(exit.contains("kotlin.collections.IntIterator.hasNext)"), "{}", exit);
    let element = dumper.stmt(&loop_body[1]);
    assert!(element.starts_with("(assign (var x) (invoke static (var %"), "{}", element);
    assert!(element.ends_with("kotlin.collections.IntIterator.next))"), "{}", element);
}

#[test]
fn test_range_loop_leaves_no_single_use_temporaries() {
    let (input, total) = range_loop_unit();
    let mut translator = Translator::new();
    let mut module = translator.generate(&input).expect("generation");
    translator.transform(&mut module, &input.decls).expect("transform");

    let id = module.function_by_decl(total).expect("total");
    let dump = SexpDumper::new(&module, &input.decls).function(id);
    assert!(dump.contains("(assign (var sum) (add:int (var sum) (var x)))"), "{}", dump);

    for var in module.functions[id].variables.iter() {
        if module.variable_name(*var).is_some() {
            continue;
        }
        let uses = dump.matches(&format!("(var %{})", var.as_raw())).count();
        // One definition plus at least two reads
        assert!(uses >= 3, "temporary %{} survives with {} occurrences:\n{}", var.as_raw(), uses, dump);
    }

    let js = translate(&input);
    assert!(js.contains("function total(a, b) {"), "{}", js);
    assert!(js.contains(".hasNext()"), "{}", js);
    assert!(js.contains("sum = sum + x | 0;"), "{}", js);
    assert!(js.contains("_.total = total;"), "{}", js);
}

/// `when (k) { 1, 2 -> return 10; 3 -> return 20; else -> return 0 }`
#[test]
fn test_constant_when_becomes_switch() {
    let mut unit = Unit::new();
    let pick = unit.function("pick", FunctionKind::TopLevel, None, &[("k", int())], int());
    let params = unit.params(&[("k", int())]);
    let returning = |value: i32| {
        expr(
            TypedExpressionKind::Block(vec![ret(pick, int_lit(value))], None),
            TypeRef::Nothing,
        )
    };
    let when = expr(
        TypedExpressionKind::When {
            subject: Some(Box::new(read(&params[0]))),
            branches: vec![
                WhenBranch {
                    conditions: vec![WhenCondition::Equals(int_lit(1)), WhenCondition::Equals(int_lit(2))],
                    body: returning(10),
                },
                WhenBranch {
                    conditions: vec![WhenCondition::Equals(int_lit(3))],
                    body: returning(20),
                },
            ],
            else_branch: Some(Box::new(returning(0))),
        },
        TypeRef::Unit,
    );
    let pick_fn = function(pick, params, vec![eval(when)], 1);
    let input = unit.into_input(vec![file(vec![TypedDeclaration::Function(pick_fn)])]);

    let module = generate_module(&input.decls, &input.files, "app").expect("generation");
    let dump = function_dump(&module, &input, pick);
    assert!(
        dump.contains("(switch @L0 (var k) (case (values (const int 1) (const int 2)) (body (return pick (const int 10))))"),
        "{}",
        dump
    );
    assert!(dump.contains("(default (return pick (const int 0))))"), "{}", dump);

    let js = translate(&input);
    assert!(js.contains("switch (k) {"), "{}", js);
    assert!(js.contains("case 1:\n"), "{}", js);
    assert!(js.contains("case 2:\n"), "{}", js);
    assert!(js.contains("return 20;"), "{}", js);
    assert!(js.contains("default:\n"), "{}", js);
}

/// `if (a.compareTo(b) >= 0) return a; return b`
#[test]
fn test_compare_against_zero_renders_as_relational_operator() {
    let mut unit = Unit::new();
    let max = unit.function("max", FunctionKind::TopLevel, None, &[("a", int()), ("b", int())], int());
    let compare_to = unit.builtin("kotlin.Int.compareTo");
    let params = unit.params(&[("a", int()), ("b", int())]);
    let test = expr(
        TypedExpressionKind::Comparison {
            op: compiler::tast::ComparisonOp::Ge,
            compare: Box::new(method_call(compare_to, read(&params[0]), vec![read(&params[1])], int())),
        },
        boolean(),
    );
    let body = vec![
        eval(expr(
            TypedExpressionKind::If {
                condition: Box::new(test),
                then_branch: Box::new(expr(
                    TypedExpressionKind::Block(vec![ret(max, read(&params[0]))], None),
                    TypeRef::Nothing,
                )),
                else_branch: None,
            },
            TypeRef::Unit,
        )),
        ret(max, read(&params[1])),
    ];
    let max_fn = function(max, params, body, 1);
    let input = unit.into_input(vec![file(vec![TypedDeclaration::Function(max_fn)])]);

    let mut translator = Translator::new();
    let translation = translator.translate(&input).expect("translation");
    assert_eq!(translator.stats().compares_folded, 1);
    assert_eq!(translator.stats().intrinsics_substituted, 1);

    let id = translation.module.function_by_decl(max).expect("max");
    let dump = SexpDumper::new(&translation.module, &input.decls).function(id);
    assert!(dump.contains("(if (ge:int (var a) (var b)) (then (return max (var a))))"), "{}", dump);
    assert!(translation.source.contains("if (a >= b) {"), "{}", translation.source);
    assert!(!translation.source.contains("compareTo"), "{}", translation.source);
}

#[test]
fn test_class_without_primary_constructor_is_rejected() {
    let mut unit = Unit::new();
    let broken = unit.class("Broken", None);
    let class = TypedClass {
        decl: broken,
        constructors: Vec::new(),
        members: Vec::new(),
        init_blocks: Vec::new(),
        delegations: Vec::new(),
        location: at(2),
    };
    let input = unit.into_input(vec![file(vec![TypedDeclaration::Class(class)])]);

    let mut translator = Translator::new();
    let err = translator.translate(&input).unwrap_err();
    assert!(matches!(err, TranslationError::Generation(_)), "{:?}", err);
    assert_eq!(err.code(), error_codes::INVALID_CONSTRUCTOR);

    let diagnostics = err.to_diagnostics();
    assert_eq!(diagnostics.len(), 1);
    let diagnostic = &diagnostics.diagnostics[0];
    assert_eq!(diagnostic.code.as_deref(), Some("E5003"));
    assert!(diagnostic.message.contains("primary constructor"), "{}", diagnostic.message);
    assert_eq!(diagnostic.span.start.line, 2);
}

#[test]
fn test_json_input_round_trips_through_the_translator() {
    let (input, _) = range_loop_unit();
    let json = serde_json::to_string(&input).expect("serialize");
    let decoded = TranslationInput::from_json(&json).expect("decode");
    assert_eq!(decoded.decls.lookup("total"), input.decls.lookup("total"));
    assert_eq!(translate(&decoded), translate(&input));
}

/// ```text
/// fun f(x: Int): Int {
///     { x: Int ->
///         class B { fun get() = x + x@f }
///         B().get()
///     }
///     return 0
/// }
/// ```
#[test]
fn test_same_named_captures_render_as_separate_fields() {
    let mut unit = Unit::new();
    let f = unit.function("f", FunctionKind::TopLevel, None, &[("x", int())], int());
    let lambda = unit.function("lambda", FunctionKind::Lambda, Some(f), &[("x", int())], int());
    let local = unit.class("B", Some(lambda));
    let local_ctor = unit.primary_constructor(local, &[]);
    let get = unit.function("get", FunctionKind::Member, Some(local), &[], int());
    let plus = unit.builtin("kotlin.Int.plus");

    let f_params = unit.params(&[("x", int())]);
    let lambda_params = unit.params(&[("x", int())]);
    let sum = method_call(plus, read(&lambda_params[0]), vec![read(&f_params[0])], int());
    let local_class = TypedClass {
        decl: local,
        constructors: vec![TypedConstructor {
            decl: local_ctor,
            params: Vec::new(),
            property_params: Vec::new(),
            delegation: None,
            body: Vec::new(),
            location: at(3),
        }],
        members: vec![TypedDeclaration::Function(function(get, Vec::new(), vec![ret(get, sum)], 3))],
        init_blocks: Vec::new(),
        delegations: Vec::new(),
        location: at(3),
    };
    let construct = expr(
        TypedExpressionKind::New {
            class: local,
            constructor: local_ctor,
            outer: None,
            args: Vec::new(),
        },
        TypeRef::Class(local),
    );
    let lambda_fn = function(
        lambda,
        lambda_params,
        vec![
            stmt_at(TypedStatementKind::LocalClass(local_class), 3),
            ret(lambda, method_call(get, construct, Vec::new(), int())),
        ],
        2,
    );
    let f_fn = function(
        f,
        f_params,
        vec![
            eval(expr(TypedExpressionKind::Lambda(Box::new(lambda_fn)), TypeRef::Function(1))),
            ret(f, int_lit(0)),
        ],
        1,
    );
    let input = unit.into_input(vec![file(vec![TypedDeclaration::Function(f_fn)])]);

    let mut module = generate_module(&input.decls, &input.files, "app").expect("generation");
    lower_closures(&mut module).expect("closure lowering");
    let class = module.class_by_decl(local).expect("local class");
    let names: Vec<&str> = module.classes[class]
        .closure_fields
        .iter()
        .map(|field| module.closure_fields[*field].name.as_str())
        .collect();
    assert_eq!(names, vec!["$x", "$x_0"]);

    let js = translate(&input);
    assert!(js.contains("this.$x = $x;"), "{}", js);
    assert!(js.contains("this.$x_0 = $x_0;"), "{}", js);
    assert!(
        js.contains("return this.$x + this.$x_0 | 0;") || js.contains("return this.$x_0 + this.$x | 0;"),
        "{}",
        js
    );
}
