//! Runtime library surface
//!
//! Helpers the generated code calls through the `$runtime` binding, and the
//! host-level type tests used by `is`, `as` and typed `catch` clauses.

use super::js_ast::{JsBinaryOp, JsExpr, JsUnaryOp};
use super::naming::RUNTIME;
use crate::tast::{DeclId, PrimitiveKind, TypeRef};

pub const IS_TYPE: &str = "isType";
pub const IS_LONG: &str = "isLong";
pub const THROW_CCE: &str = "throwCCE";
pub const THROW_NPE: &str = "throwNPE";
pub const COMPARE_TO: &str = "compareTo";
pub const EQUALS: &str = "equals";
pub const IMUL: &str = "imul";
pub const TO_STRING: &str = "toString";
pub const NUMBER_TO_INT: &str = "numberToInt";
pub const TO_SHORT: &str = "toShort";
pub const TO_BYTE: &str = "toByte";
pub const TO_CHAR: &str = "toChar";
pub const LONG: &str = "Long";
pub const NON_LOCAL_RETURN: &str = "NonLocalReturn";

/// `$runtime.name`
pub fn helper(name: &str) -> JsExpr {
    JsExpr::member(JsExpr::ident(RUNTIME), name)
}

/// `$runtime.name(args)`
pub fn call(name: &str, args: Vec<JsExpr>) -> JsExpr {
    JsExpr::call(helper(name), args)
}

/// `$runtime.Long.name(args)`
pub fn long_static(name: &str, args: Vec<JsExpr>) -> JsExpr {
    JsExpr::call(JsExpr::member(helper(LONG), name), args)
}

/// `new $runtime.NonLocalReturn(target, value)`: thrown by a nested
/// function to return from the enclosing function `target`
pub fn non_local_return(target: DeclId, value: Option<JsExpr>) -> JsExpr {
    let mut args = vec![JsExpr::Number(target.as_raw() as f64)];
    args.extend(value);
    JsExpr::new_object(helper(NON_LOCAL_RETURN), args)
}

/// The caught `exception` is a non-local return to `target`
pub fn is_non_local_return(exception: &JsExpr, target: DeclId) -> JsExpr {
    JsExpr::binary(
        JsBinaryOp::And,
        JsExpr::binary(JsBinaryOp::InstanceOf, exception.clone(), helper(NON_LOCAL_RETURN)),
        JsExpr::binary(
            JsBinaryOp::StrictEq,
            JsExpr::member(exception.clone(), "target"),
            JsExpr::Number(target.as_raw() as f64),
        ),
    )
}

/// A Long constant: small values go through `fromInt`, everything else is
/// built from its 32-bit halves
pub fn long_constant(value: i64) -> JsExpr {
    if i32::try_from(value).is_ok() {
        return long_static("fromInt", vec![JsExpr::Number(value as f64)]);
    }
    let low = value as i32;
    let high = (value >> 32) as i32;
    JsExpr::new_object(
        helper(LONG),
        vec![JsExpr::Number(low as f64), JsExpr::Number(high as f64)],
    )
}

fn typeof_is(value: JsExpr, tag: &str) -> JsExpr {
    JsExpr::binary(
        JsBinaryOp::StrictEq,
        JsExpr::unary(JsUnaryOp::TypeOf, value),
        JsExpr::string(tag),
    )
}

/// Test of `value` against `ty`. `value` must be free of side effects: it
/// may be evaluated more than once.
pub fn type_test(value: &JsExpr, ty: &TypeRef, class: &dyn Fn(DeclId) -> JsExpr) -> JsExpr {
    match ty {
        TypeRef::Nullable(inner) => JsExpr::binary(
            JsBinaryOp::Or,
            JsExpr::binary(JsBinaryOp::LooseEq, value.clone(), JsExpr::Null),
            type_test(value, inner, class),
        ),
        TypeRef::Primitive(PrimitiveKind::Long) => call(IS_LONG, vec![value.clone()]),
        TypeRef::Primitive(PrimitiveKind::Boolean) => typeof_is(value.clone(), "boolean"),
        TypeRef::Primitive(_) => typeof_is(value.clone(), "number"),
        TypeRef::String => typeof_is(value.clone(), "string"),
        TypeRef::Function(_) => typeof_is(value.clone(), "function"),
        TypeRef::Array(_) => JsExpr::call(JsExpr::path("Array.isArray"), vec![value.clone()]),
        TypeRef::Class(decl) => call(IS_TYPE, vec![value.clone(), class(*decl)]),
        TypeRef::Any | TypeRef::Unit => JsExpr::binary(JsBinaryOp::LooseNe, value.clone(), JsExpr::Null),
        TypeRef::Nothing => JsExpr::Bool(false),
    }
}

/// Conversion between primitive kinds, with the target's truncation
pub fn primitive_cast(value: JsExpr, from: PrimitiveKind, to: PrimitiveKind) -> JsExpr {
    use PrimitiveKind::*;
    if from == to {
        return value;
    }
    match (from, to) {
        (Long, Int) => JsExpr::method(value, "toInt", vec![]),
        (Long, Double) | (Long, Float) => JsExpr::method(value, "toNumber", vec![]),
        (Long, Short) => call(TO_SHORT, vec![JsExpr::method(value, "toInt", vec![])]),
        (Long, Byte) => call(TO_BYTE, vec![JsExpr::method(value, "toInt", vec![])]),
        (Long, Char) => call(TO_CHAR, vec![JsExpr::method(value, "toInt", vec![])]),
        (Int | Short | Byte | Char, Long) => long_static("fromInt", vec![value]),
        (_, Long) => long_static("fromNumber", vec![value]),
        (Double | Float, Int) => call(NUMBER_TO_INT, vec![value]),
        (Double | Float, Short) => call(TO_SHORT, vec![call(NUMBER_TO_INT, vec![value])]),
        (Double | Float, Byte) => call(TO_BYTE, vec![call(NUMBER_TO_INT, vec![value])]),
        (Double | Float, Char) => call(TO_CHAR, vec![call(NUMBER_TO_INT, vec![value])]),
        (_, Short) => call(TO_SHORT, vec![value]),
        (_, Byte) => call(TO_BYTE, vec![value]),
        (_, Char) => call(TO_CHAR, vec![value]),
        // Narrower integral kinds already fit in an Int or a double
        _ => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::js_printer::print_expression;

    fn class_ref(decl: DeclId) -> JsExpr {
        JsExpr::ident(format!("C{}", decl.as_raw()))
    }

    #[test]
    fn test_type_tests() {
        let v = JsExpr::ident("v");
        let cases = [
            (TypeRef::Primitive(PrimitiveKind::Int), "typeof v === 'number'"),
            (TypeRef::Primitive(PrimitiveKind::Long), "$runtime.isLong(v)"),
            (TypeRef::String.nullable(), "v == null || typeof v === 'string'"),
            (TypeRef::Class(DeclId::from_raw(4)), "$runtime.isType(v, C4)"),
            (TypeRef::Array(Box::new(TypeRef::Any)), "Array.isArray(v)"),
            (TypeRef::Any, "v != null"),
        ];
        for (ty, expected) in cases {
            assert_eq!(print_expression(&type_test(&v, &ty, &class_ref)), expected);
        }
    }

    #[test]
    fn test_long_constants() {
        assert_eq!(print_expression(&long_constant(5)), "$runtime.Long.fromInt(5)");
        assert_eq!(
            print_expression(&long_constant(1 << 32)),
            "new $runtime.Long(0, 1)"
        );
    }

    #[test]
    fn test_non_local_return_marker() {
        let target = DeclId::from_raw(12);
        assert_eq!(
            print_expression(&non_local_return(target, Some(JsExpr::ident("x")))),
            "new $runtime.NonLocalReturn(12, x)"
        );
        assert_eq!(
            print_expression(&non_local_return(target, None)),
            "new $runtime.NonLocalReturn(12)"
        );
        assert_eq!(
            print_expression(&is_non_local_return(&JsExpr::ident("$e"), target)),
            "$e instanceof $runtime.NonLocalReturn && $e.target === 12"
        );
    }

    #[test]
    fn test_primitive_casts() {
        let v = JsExpr::ident("v");
        assert_eq!(
            print_expression(&primitive_cast(v.clone(), PrimitiveKind::Double, PrimitiveKind::Int)),
            "$runtime.numberToInt(v)"
        );
        assert_eq!(
            print_expression(&primitive_cast(v.clone(), PrimitiveKind::Int, PrimitiveKind::Long)),
            "$runtime.Long.fromInt(v)"
        );
        assert_eq!(
            print_expression(&primitive_cast(v, PrimitiveKind::Int, PrimitiveKind::Double)),
            "v"
        );
    }
}
