//! Raw-code fragments
//!
//! The argument of the raw-code intrinsic is target source text. It is
//! parsed into the target AST so that it takes part in name allocation
//! and printing like everything else. The accepted language is the ES5
//! subset generated code itself uses: variable declarations, `if`,
//! `while`, `return`, `throw`, blocks and expression statements over the
//! full operator set, function expressions and literals.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_until, take_while},
    character::complete::{char, digit1, hex_digit1, multispace1, none_of, satisfy},
    combinator::{all_consuming, map, not, opt, peek, recognize, value},
    multi::{fold_many0, many0, separated_list0},
    sequence::{delimited, pair, preceded, terminated},
    IResult, Parser,
};

use super::js_ast::{
    JsBinaryOp, JsExpr, JsFunction, JsStmt, JsUnaryOp, JsVarDecl,
};

type PResult<'a, T> = IResult<&'a str, T>;

const KEYWORDS: &[&str] = &[
    "var", "function", "return", "if", "else", "while", "throw", "new", "typeof", "void",
    "instanceof", "true", "false", "null", "this", "in", "do", "for", "break", "continue",
];

/// Binary operators, longest first so that prefixes never win
const BINARY_OPERATORS: &[&str] = &[
    ">>>", "===", "!==", "==", "!=", "<=", ">=", "<<", ">>", "&&", "||", "+", "-", "*", "/", "%",
    "<", ">", "&", "|", "^",
];

/// Parse a fragment in statement position
pub fn parse_fragment(source: &str) -> Result<Vec<JsStmt>, String> {
    match all_consuming(terminated(many0(statement), ws)).parse(source) {
        Ok((_, stmts)) => Ok(stmts),
        Err(e) => Err(describe(source, e)),
    }
}

/// Parse a fragment in expression position; it must be one expression
pub fn parse_expression(source: &str) -> Result<JsExpr, String> {
    let parsed = all_consuming(delimited(ws, expression, (ws, opt(char(';')), ws))).parse(source);
    match parsed {
        Ok((_, expr)) => Ok(expr),
        Err(e) => Err(describe(source, e)),
    }
}

fn describe(source: &str, error: nom::Err<nom::error::Error<&str>>) -> String {
    match error {
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            let offset = source.len() - e.input.len();
            let near: String = e.input.chars().take(16).collect();
            if near.is_empty() {
                format!("unexpected end of input at offset {}", offset)
            } else {
                format!("unexpected input at offset {}: '{}'", offset, near)
            }
        }
        nom::Err::Incomplete(_) => "incomplete input".to_string(),
    }
}

// =============================================================================
// Lexical helpers
// =============================================================================

fn line_comment(input: &str) -> PResult<&str> {
    recognize((tag("//"), take_while(|c| c != '\n'))).parse(input)
}

fn block_comment(input: &str) -> PResult<&str> {
    recognize((tag("/*"), take_until("*/"), tag("*/"))).parse(input)
}

/// Skip whitespace and comments
fn ws(input: &str) -> PResult<()> {
    value(
        (),
        many0(alt((
            value((), multispace1),
            value((), line_comment),
            value((), block_comment),
        ))),
    )
    .parse(input)
}

fn symbol<'a>(sym: &'static str) -> impl FnMut(&'a str) -> PResult<'a, &'a str> {
    move |input| {
        let (input, _) = ws(input)?;
        tag(sym).parse(input)
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

fn keyword<'a>(kw: &'static str) -> impl FnMut(&'a str) -> PResult<'a, &'a str> {
    move |input| {
        let (input, _) = ws(input)?;
        terminated(tag(kw), not(peek(satisfy(is_ident_char)))).parse(input)
    }
}

fn identifier(input: &str) -> PResult<String> {
    let (input, _) = ws(input)?;
    let (rest, name) = recognize(pair(
        satisfy(|c| c.is_ascii_alphabetic() || c == '_' || c == '$'),
        take_while(is_ident_char),
    ))
    .parse(input)?;
    if KEYWORDS.contains(&name) {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Tag,
        )));
    }
    Ok((rest, name.to_string()))
}

// =============================================================================
// Statements
// =============================================================================

fn statement(input: &str) -> PResult<JsStmt> {
    alt((
        var_statement,
        return_statement,
        throw_statement,
        if_statement,
        while_statement,
        block_statement,
        empty_statement,
        expression_statement,
    ))
    .parse(input)
}

fn end_of_statement(input: &str) -> PResult<()> {
    value((), opt(symbol(";"))).parse(input)
}

fn var_statement(input: &str) -> PResult<JsStmt> {
    let (input, _) = keyword("var").parse(input)?;
    let (input, decls) = separated_list0(
        symbol(","),
        map(
            pair(identifier, opt(preceded(symbol("="), assignment))),
            |(name, init)| JsVarDecl { name, init },
        ),
    )
    .parse(input)?;
    let (input, _) = end_of_statement(input)?;
    Ok((input, JsStmt::Var(decls)))
}

fn return_statement(input: &str) -> PResult<JsStmt> {
    let (input, _) = keyword("return").parse(input)?;
    let (input, value) = opt(expression).parse(input)?;
    let (input, _) = end_of_statement(input)?;
    Ok((input, JsStmt::Return(value)))
}

fn throw_statement(input: &str) -> PResult<JsStmt> {
    let (input, _) = keyword("throw").parse(input)?;
    let (input, value) = expression(input)?;
    let (input, _) = end_of_statement(input)?;
    Ok((input, JsStmt::Throw(value)))
}

/// Statement body as a list; a block is unwrapped
fn body(input: &str) -> PResult<Vec<JsStmt>> {
    map(statement, |stmt| match stmt {
        JsStmt::Block(stmts) => stmts,
        other => vec![other],
    })
    .parse(input)
}

fn if_statement(input: &str) -> PResult<JsStmt> {
    let (input, _) = keyword("if").parse(input)?;
    let (input, condition) = delimited(symbol("("), expression, symbol(")")).parse(input)?;
    let (input, then_body) = body(input)?;
    let (input, else_body) = opt(preceded(keyword("else"), body)).parse(input)?;
    Ok((
        input,
        JsStmt::If {
            condition,
            then_body,
            else_body: else_body.unwrap_or_default(),
        },
    ))
}

fn while_statement(input: &str) -> PResult<JsStmt> {
    let (input, _) = keyword("while").parse(input)?;
    let (input, condition) = delimited(symbol("("), expression, symbol(")")).parse(input)?;
    let (input, body) = body(input)?;
    Ok((input, JsStmt::While { condition, body }))
}

fn block(input: &str) -> PResult<Vec<JsStmt>> {
    delimited(symbol("{"), many0(statement), symbol("}")).parse(input)
}

fn block_statement(input: &str) -> PResult<JsStmt> {
    map(block, JsStmt::Block).parse(input)
}

fn empty_statement(input: &str) -> PResult<JsStmt> {
    value(JsStmt::Block(Vec::new()), symbol(";")).parse(input)
}

fn expression_statement(input: &str) -> PResult<JsStmt> {
    let (input, expr) = expression(input)?;
    let (input, _) = end_of_statement(input)?;
    Ok((input, JsStmt::Expr(expr)))
}

// =============================================================================
// Expressions
// =============================================================================

/// Comma expression
fn expression(input: &str) -> PResult<JsExpr> {
    let (input, first) = assignment(input)?;
    let (input, rest) = many0(preceded(symbol(","), assignment)).parse(input)?;
    if rest.is_empty() {
        return Ok((input, first));
    }
    let mut items = vec![first];
    items.extend(rest);
    Ok((input, JsExpr::Sequence(items)))
}

fn assignment(input: &str) -> PResult<JsExpr> {
    let (input, target) = conditional(input)?;
    if !matches!(target, JsExpr::Ident(_) | JsExpr::Member { .. } | JsExpr::Index { .. }) {
        return Ok((input, target));
    }
    // `=` but not `==`
    let (input, value) = opt(preceded(
        (symbol("="), not(peek(char('=')))),
        assignment,
    ))
    .parse(input)?;
    Ok(match value {
        Some(value) => (input, JsExpr::assign(target, value)),
        None => (input, target),
    })
}

fn conditional(input: &str) -> PResult<JsExpr> {
    let (input, condition) = binary(input, 0)?;
    let (input, branches) = opt((
        preceded(symbol("?"), assignment),
        preceded(symbol(":"), assignment),
    ))
    .parse(input)?;
    Ok(match branches {
        Some((then_value, else_value)) => (input, JsExpr::conditional(condition, then_value, else_value)),
        None => (input, condition),
    })
}

fn binary_operator(input: &str) -> PResult<JsBinaryOp> {
    let (input, _) = ws(input)?;
    if let Ok((rest, _)) = keyword("instanceof").parse(input) {
        return Ok((rest, JsBinaryOp::InstanceOf));
    }
    for sym in BINARY_OPERATORS {
        if let Some(rest) = input.strip_prefix(sym) {
            // Compound assignments are not part of the language
            if rest.starts_with('=') {
                break;
            }
            if let Some(op) = JsBinaryOp::from_symbol(sym) {
                return Ok((rest, op));
            }
        }
    }
    Err(nom::Err::Error(nom::error::Error::new(
        input,
        nom::error::ErrorKind::Tag,
    )))
}

/// Precedence climbing over left-associative binary operators
fn binary(input: &str, min_precedence: u8) -> PResult<JsExpr> {
    let (mut input, mut lhs) = unary(input)?;
    while let Ok((rest, op)) = binary_operator(input) {
        let precedence = op.precedence();
        if precedence < min_precedence {
            break;
        }
        let (rest, rhs) = binary(rest, precedence + 1)?;
        lhs = JsExpr::binary(op, lhs, rhs);
        input = rest;
    }
    Ok((input, lhs))
}

fn unary_operator(input: &str) -> PResult<JsUnaryOp> {
    alt((
        value(JsUnaryOp::Not, (symbol("!"), not(peek(char('='))))),
        value(JsUnaryOp::Neg, symbol("-")),
        value(JsUnaryOp::Plus, symbol("+")),
        value(JsUnaryOp::BitNot, symbol("~")),
        value(JsUnaryOp::TypeOf, keyword("typeof")),
        value(JsUnaryOp::Void, keyword("void")),
    ))
    .parse(input)
}

fn unary(input: &str) -> PResult<JsExpr> {
    if let Ok((input, op)) = unary_operator(input) {
        let (input, operand) = unary(input)?;
        // Fold negative numeric literals
        if let (JsUnaryOp::Neg, JsExpr::Number(n)) = (op, &operand) {
            return Ok((input, JsExpr::Number(-n)));
        }
        return Ok((input, JsExpr::unary(op, operand)));
    }
    postfix(input)
}

enum Suffix {
    Member(String),
    Index(JsExpr),
    Call(Vec<JsExpr>),
}

fn arguments(input: &str) -> PResult<Vec<JsExpr>> {
    delimited(symbol("("), separated_list0(symbol(","), assignment), symbol(")")).parse(input)
}

fn suffix(input: &str) -> PResult<Suffix> {
    alt((
        map(preceded(symbol("."), identifier_name), Suffix::Member),
        map(delimited(symbol("["), expression, symbol("]")), Suffix::Index),
        map(arguments, Suffix::Call),
    ))
    .parse(input)
}

/// Property names may be reserved words
fn identifier_name(input: &str) -> PResult<String> {
    let (input, _) = ws(input)?;
    map(
        recognize(pair(
            satisfy(|c| c.is_ascii_alphabetic() || c == '_' || c == '$'),
            take_while(is_ident_char),
        )),
        str::to_string,
    )
    .parse(input)
}

fn apply_suffix(expr: JsExpr, suffix: Suffix) -> JsExpr {
    match suffix {
        Suffix::Member(name) => JsExpr::member(expr, name),
        Suffix::Index(index) => JsExpr::index(expr, index),
        Suffix::Call(args) => JsExpr::call(expr, args),
    }
}

fn postfix(input: &str) -> PResult<JsExpr> {
    let (input, head) = alt((new_expression, primary)).parse(input)?;
    let (input, suffixes) = many0(suffix).parse(input)?;
    Ok((input, suffixes.into_iter().fold(head, apply_suffix)))
}

/// `new Callee(args)`; member accesses bind to the callee
fn new_expression(input: &str) -> PResult<JsExpr> {
    let (input, _) = keyword("new").parse(input)?;
    let (input, head) = alt((new_expression, primary)).parse(input)?;
    let (input, members) = many0(alt((
        map(preceded(symbol("."), identifier_name), Suffix::Member),
        map(delimited(symbol("["), expression, symbol("]")), Suffix::Index),
    )))
    .parse(input)?;
    let callee = members.into_iter().fold(head, apply_suffix);
    let (input, args) = opt(arguments).parse(input)?;
    Ok((input, JsExpr::new_object(callee, args.unwrap_or_default())))
}

fn primary(input: &str) -> PResult<JsExpr> {
    let (input, _) = ws(input)?;
    alt((
        number,
        map(string_literal, JsExpr::String),
        value(JsExpr::Bool(true), keyword("true")),
        value(JsExpr::Bool(false), keyword("false")),
        value(JsExpr::Null, keyword("null")),
        value(JsExpr::This, keyword("this")),
        function_expression,
        map(identifier, JsExpr::Ident),
        delimited(symbol("("), expression, symbol(")")),
        map(
            delimited(symbol("["), separated_list0(symbol(","), assignment), symbol("]")),
            JsExpr::Array,
        ),
        object_literal,
    ))
    .parse(input)
}

fn number(input: &str) -> PResult<JsExpr> {
    alt((
        map(preceded(alt((tag("0x"), tag("0X"))), hex_digit1), |digits: &str| {
            JsExpr::Number(i64::from_str_radix(digits, 16).map_or(f64::NAN, |v| v as f64))
        }),
        map(
            recognize((
                digit1,
                opt(pair(char('.'), digit1)),
                opt((
                    alt((char('e'), char('E'))),
                    opt(alt((char('+'), char('-')))),
                    digit1,
                )),
            )),
            |text: &str| JsExpr::Number(text.parse().unwrap_or(f64::NAN)),
        ),
    ))
    .parse(input)
}

fn escape(c: char) -> char {
    match c {
        'n' => '\n',
        'r' => '\r',
        't' => '\t',
        '0' => '\0',
        other => other,
    }
}

fn quoted<'a>(quote: char) -> impl FnMut(&'a str) -> PResult<'a, String> {
    move |input| {
        delimited(
            char(quote),
            fold_many0(
                alt((
                    map(preceded(char('\\'), satisfy(|_| true)), escape),
                    none_of(if quote == '\'' { "'\\" } else { "\"\\" }),
                )),
                String::new,
                |mut acc, c| {
                    acc.push(c);
                    acc
                },
            ),
            char(quote),
        )
        .parse(input)
    }
}

fn string_literal(input: &str) -> PResult<String> {
    alt((quoted('\''), quoted('"'))).parse(input)
}

fn function_expression(input: &str) -> PResult<JsExpr> {
    let (input, _) = keyword("function").parse(input)?;
    let (input, name) = opt(identifier).parse(input)?;
    let (input, params) =
        delimited(symbol("("), separated_list0(symbol(","), identifier), symbol(")")).parse(input)?;
    let (input, body) = block(input)?;
    Ok((input, JsExpr::Function(Box::new(JsFunction::new(name, params, body)))))
}

fn object_literal(input: &str) -> PResult<JsExpr> {
    let key = alt((identifier_name, string_literal));
    let entry = pair(preceded(ws, key), preceded(symbol(":"), assignment));
    map(
        delimited(
            symbol("{"),
            terminated(separated_list0(symbol(","), entry), opt(symbol(","))),
            symbol("}"),
        ),
        JsExpr::Object,
    )
    .parse(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::js_printer::{print_expression, print_statement};

    fn roundtrip_expr(source: &str) -> String {
        print_expression(&parse_expression(source).unwrap())
    }

    #[test]
    fn test_expression_precedence() {
        assert_eq!(roundtrip_expr("1 + 2 * 3"), "1 + 2 * 3");
        assert_eq!(roundtrip_expr("(1 + 2) * 3"), "(1 + 2) * 3");
        assert_eq!(roundtrip_expr("a === b && !c"), "a === b && !c");
        assert_eq!(roundtrip_expr("x = y = 0"), "x = y = 0");
        assert_eq!(roundtrip_expr("a >>> 1"), "a >>> 1");
        assert_eq!(roundtrip_expr("-1"), "-1");
    }

    #[test]
    fn test_member_calls_and_new() {
        assert_eq!(roundtrip_expr("console.log('hi', 1)"), "console.log('hi', 1)");
        assert_eq!(roundtrip_expr("new Date().getTime()"), "new Date().getTime()");
        assert_eq!(roundtrip_expr("a[0].b"), "a[0].b");
        assert_eq!(roundtrip_expr("typeof x === \"string\""), "typeof x === 'string'");
    }

    #[test]
    fn test_function_and_object_literals() {
        let expr = parse_expression("function (a) { return a + 1; }").unwrap();
        let JsExpr::Function(function) = &expr else {
            panic!("expected function, got {:?}", expr);
        };
        assert_eq!(function.params, vec!["a".to_string()]);
        assert_eq!(function.body.len(), 1);
        assert_eq!(roundtrip_expr("{a: 1, 'b c': true}"), "{a: 1, 'b c': true}");
    }

    #[test]
    fn test_statements() {
        let stmts = parse_fragment("var x = 1, y; if (x > 0) { y = x; } else y = -x; // done").unwrap();
        assert_eq!(stmts.len(), 2);
        assert!(matches!(&stmts[0], JsStmt::Var(decls) if decls.len() == 2));
        assert_eq!(
            print_statement(&stmts[1]),
            "if (x > 0) {\n  y = x;\n} else {\n  y = -x;\n}\n"
        );
        assert!(parse_fragment("").unwrap().is_empty());
    }

    #[test]
    fn test_errors() {
        assert!(parse_expression("a b").is_err());
        assert!(parse_expression("1 +").is_err());
        assert!(parse_fragment("if (").is_err());
        assert!(parse_expression("var x = 1").is_err());
    }
}
