//! ES5 printer
//!
//! Prints [`JsProgram`] trees as source text. Parentheses are derived from
//! operator precedence, so the tree never needs explicit grouping nodes.

use std::fmt::Write;

use super::js_ast::{JsExpr, JsFunction, JsProgram, JsStmt, JsUnaryOp, JsVarDecl};
use super::naming::is_valid_identifier;

const INDENT: &str = "  ";

/// Print a whole program
pub fn print_program(program: &JsProgram) -> String {
    let mut out = String::new();
    print_stmts(&program.body, &mut out, "");
    out
}

/// Print a single statement at top level
pub fn print_statement(stmt: &JsStmt) -> String {
    let mut out = String::new();
    print_stmt(stmt, &mut out, "");
    out
}

/// Print a single expression
pub fn print_expression(expr: &JsExpr) -> String {
    print_expr(expr, 0, "")
}

// ---------------------------------------------------------------------------
// Statements
// ---------------------------------------------------------------------------

fn print_stmts(stmts: &[JsStmt], out: &mut String, indent: &str) {
    for stmt in stmts {
        print_stmt(stmt, out, indent);
    }
}

fn print_body(body: &[JsStmt], out: &mut String, indent: &str) {
    let inner = format!("{indent}{INDENT}");
    print_stmts(body, out, &inner);
}

fn print_stmt(stmt: &JsStmt, out: &mut String, indent: &str) {
    match stmt {
        JsStmt::Var(decls) => {
            let _ = writeln!(out, "{indent}var {};", print_var_decls(decls, indent));
        }
        JsStmt::Expr(expr) => {
            let _ = writeln!(out, "{indent}{};", print_expr_statement(expr, indent));
        }
        JsStmt::Block(body) => {
            let _ = writeln!(out, "{indent}{{");
            print_body(body, out, indent);
            let _ = writeln!(out, "{indent}}}");
        }
        JsStmt::If { .. } => {
            out.push_str(indent);
            print_if_chain(stmt, out, indent);
        }
        JsStmt::While { condition, body } => {
            let _ = writeln!(out, "{indent}while ({}) {{", print_expr(condition, 0, indent));
            print_body(body, out, indent);
            let _ = writeln!(out, "{indent}}}");
        }
        JsStmt::DoWhile { body, condition } => {
            let _ = writeln!(out, "{indent}do {{");
            print_body(body, out, indent);
            let _ = writeln!(out, "{indent}}} while ({});", print_expr(condition, 0, indent));
        }
        JsStmt::For {
            init,
            condition,
            update,
            body,
        } => {
            let part = |e: &Option<JsExpr>| e.as_ref().map(|e| print_expr(e, 0, indent)).unwrap_or_default();
            let condition = condition
                .as_ref()
                .map(|c| format!(" {}", print_expr(c, 0, indent)))
                .unwrap_or_default();
            let update = update
                .as_ref()
                .map(|u| format!(" {}", print_expr(u, 0, indent)))
                .unwrap_or_default();
            let _ = writeln!(out, "{indent}for ({};{};{}) {{", part(init), condition, update);
            print_body(body, out, indent);
            let _ = writeln!(out, "{indent}}}");
        }
        JsStmt::Switch { discriminant, cases } => {
            let _ = writeln!(out, "{indent}switch ({}) {{", print_expr(discriminant, 0, indent));
            let case_indent = format!("{indent}{INDENT}");
            for case in cases {
                match &case.test {
                    Some(test) => {
                        let _ = writeln!(out, "{case_indent}case {}:", print_expr(test, 0, &case_indent));
                    }
                    None => {
                        let _ = writeln!(out, "{case_indent}default:");
                    }
                }
                print_body(&case.body, out, &case_indent);
            }
            let _ = writeln!(out, "{indent}}}");
        }
        JsStmt::Labeled { label, body } => {
            let mut inner = String::new();
            print_stmt(body, &mut inner, indent);
            let _ = write!(out, "{indent}{label}: {}", &inner[indent.len()..]);
        }
        JsStmt::Break(label) => match label {
            Some(label) => {
                let _ = writeln!(out, "{indent}break {label};");
            }
            None => {
                let _ = writeln!(out, "{indent}break;");
            }
        },
        JsStmt::Continue(label) => match label {
            Some(label) => {
                let _ = writeln!(out, "{indent}continue {label};");
            }
            None => {
                let _ = writeln!(out, "{indent}continue;");
            }
        },
        JsStmt::Return(value) => match value {
            Some(value) => {
                let _ = writeln!(out, "{indent}return {};", print_expr(value, 0, indent));
            }
            None => {
                let _ = writeln!(out, "{indent}return;");
            }
        },
        JsStmt::Throw(value) => {
            let _ = writeln!(out, "{indent}throw {};", print_expr(value, 0, indent));
        }
        JsStmt::Try { body, catch, finally } => {
            let _ = writeln!(out, "{indent}try {{");
            print_body(body, out, indent);
            if let Some(catch) = catch {
                let _ = writeln!(out, "{indent}}} catch ({}) {{", catch.param);
                print_body(&catch.body, out, indent);
            }
            if let Some(finally) = finally {
                let _ = writeln!(out, "{indent}}} finally {{");
                print_body(finally, out, indent);
            }
            let _ = writeln!(out, "{indent}}}");
        }
        JsStmt::Function(function) => {
            let _ = writeln!(out, "{indent}{}", print_function(function, indent));
        }
    }
}

/// `if` with `else if` chains; the caller has written the indent
fn print_if_chain(stmt: &JsStmt, out: &mut String, indent: &str) {
    let JsStmt::If {
        condition,
        then_body,
        else_body,
    } = stmt
    else {
        return;
    };
    let _ = writeln!(out, "if ({}) {{", print_expr(condition, 0, indent));
    print_body(then_body, out, indent);
    match else_body.as_slice() {
        [] => {
            let _ = writeln!(out, "{indent}}}");
        }
        [nested @ JsStmt::If { .. }] => {
            let _ = write!(out, "{indent}}} else ");
            print_if_chain(nested, out, indent);
        }
        _ => {
            let _ = writeln!(out, "{indent}}} else {{");
            print_body(else_body, out, indent);
            let _ = writeln!(out, "{indent}}}");
        }
    }
}

fn print_var_decls(decls: &[JsVarDecl], indent: &str) -> String {
    decls
        .iter()
        .map(|decl| match &decl.init {
            Some(init) => format!("{} = {}", decl.name, print_expr(init, 2, indent)),
            None => decl.name.clone(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// An expression statement may not start with `function` or `{`
fn print_expr_statement(expr: &JsExpr, indent: &str) -> String {
    let text = print_expr(expr, 0, indent);
    if text.starts_with("function") || text.starts_with('{') {
        format!("({})", text)
    } else {
        text
    }
}

fn print_function(function: &JsFunction, indent: &str) -> String {
    let mut out = String::new();
    let name = function.name.as_deref().unwrap_or("");
    let _ = writeln!(out, "function {name}({}) {{", function.params.join(", "));
    print_body(&function.body, &mut out, indent);
    let _ = write!(out, "{indent}}}");
    out
}

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

/// Print `expr`, parenthesized when it binds weaker than `min`
fn print_expr(expr: &JsExpr, min: u8, indent: &str) -> String {
    let text = print_expr_inner(expr, indent);
    if expr.precedence() < min {
        format!("({})", text)
    } else {
        text
    }
}

fn print_args(args: &[JsExpr], indent: &str) -> String {
    args.iter()
        .map(|a| print_expr(a, 2, indent))
        .collect::<Vec<_>>()
        .join(", ")
}

fn print_expr_inner(expr: &JsExpr, indent: &str) -> String {
    match expr {
        JsExpr::Number(value) => format_number(*value),
        JsExpr::String(value) => format!("'{}'", escape_js_string(value)),
        JsExpr::Bool(value) => value.to_string(),
        JsExpr::Null => "null".to_string(),
        JsExpr::Undefined => "void 0".to_string(),
        JsExpr::Ident(name) => name.clone(),
        JsExpr::This => "this".to_string(),
        JsExpr::Member { object, property } => {
            format!("{}.{}", print_member_object(object, indent), property)
        }
        JsExpr::Index { object, index } => {
            format!("{}[{}]", print_member_object(object, indent), print_expr(index, 0, indent))
        }
        JsExpr::Call { callee, args } => {
            format!("{}({})", print_expr(callee, 18, indent), print_args(args, indent))
        }
        JsExpr::New { callee, args } => {
            // A call in callee position would take the `new`
            let callee_text = match callee.as_ref() {
                JsExpr::Call { .. } => format!("({})", print_expr(callee, 0, indent)),
                other => print_expr(other, 18, indent),
            };
            format!("new {}({})", callee_text, print_args(args, indent))
        }
        JsExpr::Binary { op, lhs, rhs } => {
            let precedence = op.precedence();
            format!(
                "{} {} {}",
                print_expr(lhs, precedence, indent),
                op.symbol(),
                print_expr(rhs, precedence + 1, indent)
            )
        }
        JsExpr::Unary { op, operand } => {
            let inner = print_expr(operand, 15, indent);
            let clashes = match op {
                JsUnaryOp::Neg => inner.starts_with('-'),
                JsUnaryOp::Plus => inner.starts_with('+'),
                _ => false,
            };
            if clashes {
                format!("{}({})", op.symbol(), inner)
            } else {
                format!("{}{}", op.symbol(), inner)
            }
        }
        JsExpr::Assign { target, value } => {
            format!("{} = {}", print_expr(target, 18, indent), print_expr(value, 2, indent))
        }
        JsExpr::Conditional {
            condition,
            then_value,
            else_value,
        } => format!(
            "{} ? {} : {}",
            print_expr(condition, 4, indent),
            print_expr(then_value, 2, indent),
            print_expr(else_value, 2, indent)
        ),
        JsExpr::Sequence(items) => items
            .iter()
            .map(|item| print_expr(item, 2, indent))
            .collect::<Vec<_>>()
            .join(", "),
        JsExpr::Array(items) => format!("[{}]", print_args(items, indent)),
        JsExpr::Object(entries) => {
            if entries.is_empty() {
                return "{}".to_string();
            }
            let entries = entries
                .iter()
                .map(|(key, value)| {
                    let key = if is_valid_identifier(key) {
                        key.clone()
                    } else {
                        format!("'{}'", escape_js_string(key))
                    };
                    format!("{}: {}", key, print_expr(value, 2, indent))
                })
                .collect::<Vec<_>>()
                .join(", ");
            format!("{{{}}}", entries)
        }
        JsExpr::Function(function) => print_function(function, indent),
    }
}

/// Number literals need parentheses before a `.`
fn print_member_object(object: &JsExpr, indent: &str) -> String {
    match object {
        JsExpr::Number(_) => format!("({})", print_expr(object, 0, indent)),
        _ => print_expr(object, 18, indent),
    }
}

pub fn format_number(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if value == 0.0 && value.is_sign_negative() {
        return "-0".to_string();
    }
    if value.fract() == 0.0 && value.abs() < 1e21 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}

pub fn escape_js_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::js_ast::{JsBinaryOp, JsCatch, JsSwitchCase};

    fn id(name: &str) -> JsExpr {
        JsExpr::ident(name)
    }

    #[test]
    fn test_precedence_parenthesizes() {
        let sum = JsExpr::binary(JsBinaryOp::Add, id("a"), id("b"));
        let product = JsExpr::binary(JsBinaryOp::Mul, sum.clone(), id("c"));
        assert_eq!(print_expression(&product), "(a + b) * c");

        let truncated = JsExpr::to_int32(sum);
        assert_eq!(print_expression(&truncated), "a + b | 0");

        let right = JsExpr::binary(
            JsBinaryOp::Sub,
            id("a"),
            JsExpr::binary(JsBinaryOp::Sub, id("b"), id("c")),
        );
        assert_eq!(print_expression(&right), "a - (b - c)");
    }

    #[test]
    fn test_numbers() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(0.5), "0.5");
        assert_eq!(format_number(f64::NAN), "NaN");
        assert_eq!(format_number(-0.0), "-0");
        let neg = JsExpr::unary(JsUnaryOp::Neg, JsExpr::Number(-1.0));
        assert_eq!(print_expression(&neg), "-(-1)");
        let member = JsExpr::method(JsExpr::Number(1.0), "toString", vec![]);
        assert_eq!(print_expression(&member), "(1).toString()");
    }

    #[test]
    fn test_strings_are_single_quoted_and_escaped() {
        assert_eq!(print_expression(&JsExpr::string("it's\n")), "'it\\'s\\n'");
    }

    #[test]
    fn test_function_expression_statement_is_wrapped() {
        let iife = JsExpr::call(
            JsExpr::Function(Box::new(JsFunction::new(None, vec![], vec![JsStmt::Return(None)]))),
            vec![],
        );
        let text = print_statement(&JsStmt::Expr(iife));
        assert_eq!(text, "(function () {\n  return;\n}());\n");
    }

    #[test]
    fn test_else_if_chain_and_labels() {
        let stmt = JsStmt::Labeled {
            label: "loop".to_string(),
            body: Box::new(JsStmt::While {
                condition: JsExpr::Bool(true),
                body: vec![JsStmt::If {
                    condition: id("a"),
                    then_body: vec![JsStmt::Break(Some("loop".to_string()))],
                    else_body: vec![JsStmt::If {
                        condition: id("b"),
                        then_body: vec![JsStmt::Continue(None)],
                        else_body: vec![],
                    }],
                }],
            }),
        };
        let expected = "loop: while (true) {\n  if (a) {\n    break loop;\n  } else if (b) {\n    continue;\n  }\n}\n";
        assert_eq!(print_statement(&stmt), expected);
    }

    #[test]
    fn test_switch_and_try() {
        let stmt = JsStmt::Try {
            body: vec![JsStmt::Switch {
                discriminant: id("x"),
                cases: vec![
                    JsSwitchCase {
                        test: Some(JsExpr::Number(1.0)),
                        body: vec![JsStmt::Break(None)],
                    },
                    JsSwitchCase {
                        test: None,
                        body: vec![],
                    },
                ],
            }],
            catch: Some(JsCatch {
                param: "$e".to_string(),
                body: vec![JsStmt::Throw(id("$e"))],
            }),
            finally: None,
        };
        let expected = "try {\n  switch (x) {\n    case 1:\n      break;\n    default:\n  }\n} catch ($e) {\n  throw $e;\n}\n";
        assert_eq!(print_statement(&stmt), expected);
    }

    #[test]
    fn test_new_with_call_callee() {
        let expr = JsExpr::new_object(JsExpr::call(id("f"), vec![]), vec![id("a")]);
        assert_eq!(print_expression(&expr), "new (f())(a)");
        let object = JsExpr::Object(vec![("kind".to_string(), JsExpr::string("class"))]);
        assert_eq!(print_expression(&object), "{kind: 'class'}");
    }
}
