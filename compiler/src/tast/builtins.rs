//! Standard-library binding layer
//!
//! Registers the built-in declarations of the `kotlin` module into a
//! [`DeclTable`]: primitive classes and their operator members, arrays,
//! ranges and iterators, function types, exceptions, the raw-code
//! intrinsic and a few host built-ins. Which host functions exist is
//! environment policy; intrinsic substitution only ever recognises these
//! declarations by qualified name.

use super::id_types::DeclId;
use super::symbols::{
    ClassInfo, ClassKind, DeclInfo, DeclKind, DeclTable, FunctionInfo, FunctionKind, Modality,
    ParamInfo, PrimitiveKind, PropertyInfo, TypeRef,
};
use indexmap::IndexMap;

/// Module name of the built-in declarations
pub const BUILTIN_MODULE: &str = "kotlin";

const NUMERIC_KINDS: [PrimitiveKind; 7] = [
    PrimitiveKind::Int,
    PrimitiveKind::Long,
    PrimitiveKind::Short,
    PrimitiveKind::Byte,
    PrimitiveKind::Char,
    PrimitiveKind::Float,
    PrimitiveKind::Double,
];

const ARITHMETIC: [&str; 5] = ["plus", "minus", "times", "div", "rem"];
const BITWISE: [&str; 3] = ["and", "or", "xor"];
const SHIFTS: [&str; 3] = ["shl", "shr", "ushr"];
const CONVERSIONS: [(&str, PrimitiveKind); 7] = [
    ("toInt", PrimitiveKind::Int),
    ("toLong", PrimitiveKind::Long),
    ("toShort", PrimitiveKind::Short),
    ("toByte", PrimitiveKind::Byte),
    ("toChar", PrimitiveKind::Char),
    ("toFloat", PrimitiveKind::Float),
    ("toDouble", PrimitiveKind::Double),
];

/// Qualified-name index of the registered built-ins
#[derive(Debug, Clone, Default)]
pub struct Builtins {
    names: IndexMap<String, DeclId>,
}

impl Builtins {
    /// Register every built-in declaration into `table`
    pub fn install(table: &mut DeclTable) -> Self {
        let mut builder = BuiltinBuilder {
            table,
            names: IndexMap::new(),
        };
        builder.install_all();
        Builtins {
            names: builder.names,
        }
    }

    pub fn get(&self, qualified_name: &str) -> Option<DeclId> {
        self.names.get(qualified_name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, DeclId)> {
        self.names.iter().map(|(name, id)| (name.as_str(), *id))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

struct BuiltinBuilder<'a> {
    table: &'a mut DeclTable,
    names: IndexMap<String, DeclId>,
}

impl BuiltinBuilder<'_> {
    fn install_all(&mut self) {
        let any = self.class("Any", &["kotlin"], ClassKind::Class, None);
        self.method(any, "toString", vec![], TypeRef::String, Modality::Open);
        self.method(
            any,
            "equals",
            vec![ParamInfo::new("other", TypeRef::Any.nullable())],
            TypeRef::Primitive(PrimitiveKind::Boolean),
            Modality::Open,
        );
        self.method(
            any,
            "hashCode",
            vec![],
            TypeRef::Primitive(PrimitiveKind::Int),
            Modality::Open,
        );

        let comparable = self.class("Comparable", &["kotlin"], ClassKind::Interface, None);
        self.method(
            comparable,
            "compareTo",
            vec![ParamInfo::new("other", TypeRef::Any)],
            TypeRef::Primitive(PrimitiveKind::Int),
            Modality::Abstract,
        );

        for kind in NUMERIC_KINDS {
            self.install_primitive(kind);
        }
        self.install_boolean();
        self.install_string();
        self.install_array();
        self.install_ranges();
        self.install_functions();
        self.install_exceptions(any);
        self.install_host_functions();
    }

    fn add(&mut self, info: DeclInfo) -> DeclId {
        let id = self.table.add(info);
        let qualified = self.table.qualified_name(id);
        self.names.entry(qualified).or_insert(id);
        id
    }

    fn class(
        &mut self,
        name: &str,
        package: &[&str],
        kind: ClassKind,
        superclass: Option<DeclId>,
    ) -> DeclId {
        let info = DeclInfo::new(
            name,
            BUILTIN_MODULE,
            DeclKind::Class(ClassInfo {
                kind,
                superclass,
                interfaces: Vec::new(),
                is_inner: false,
                delegated_members: Vec::new(),
            }),
        )
        .with_package(package);
        self.add(info)
    }

    fn method(
        &mut self,
        owner: DeclId,
        name: &str,
        params: Vec<ParamInfo>,
        return_type: TypeRef,
        modality: Modality,
    ) -> DeclId {
        let mut function = FunctionInfo::new(FunctionKind::Member, params, return_type);
        function.modality = modality;
        self.add(DeclInfo::new(name, BUILTIN_MODULE, DeclKind::Function(function)).with_parent(owner))
    }

    fn install_primitive(&mut self, kind: PrimitiveKind) {
        let ty = TypeRef::Primitive(kind);
        let int = TypeRef::Primitive(PrimitiveKind::Int);
        let boolean = TypeRef::Primitive(PrimitiveKind::Boolean);
        let class = self.class(kind.name(), &["kotlin"], ClassKind::Class, None);

        // Byte, Short and Char arithmetic widens to Int
        let arithmetic_result = match kind {
            PrimitiveKind::Byte | PrimitiveKind::Short | PrimitiveKind::Char => int.clone(),
            _ => ty.clone(),
        };
        if kind != PrimitiveKind::Char {
            for op in ARITHMETIC {
                self.method(
                    class,
                    op,
                    vec![ParamInfo::new("other", ty.clone())],
                    arithmetic_result.clone(),
                    Modality::Final,
                );
            }
            self.method(class, "unaryMinus", vec![], arithmetic_result.clone(), Modality::Final);
            self.method(class, "unaryPlus", vec![], arithmetic_result.clone(), Modality::Final);
        } else {
            self.method(class, "plus", vec![ParamInfo::new("other", int.clone())], ty.clone(), Modality::Final);
            self.method(class, "minus", vec![ParamInfo::new("other", ty.clone())], int.clone(), Modality::Final);
        }
        if matches!(kind, PrimitiveKind::Int | PrimitiveKind::Long) {
            for op in BITWISE {
                self.method(class, op, vec![ParamInfo::new("other", ty.clone())], ty.clone(), Modality::Final);
            }
            for op in SHIFTS {
                self.method(class, op, vec![ParamInfo::new("bitCount", int.clone())], ty.clone(), Modality::Final);
            }
            self.method(class, "inv", vec![], ty.clone(), Modality::Final);
        }
        self.method(class, "inc", vec![], ty.clone(), Modality::Final);
        self.method(class, "dec", vec![], ty.clone(), Modality::Final);
        self.method(class, "compareTo", vec![ParamInfo::new("other", ty.clone())], int.clone(), Modality::Final);
        self.method(class, "equals", vec![ParamInfo::new("other", TypeRef::Any.nullable())], boolean, Modality::Final);
        for (name, target) in CONVERSIONS {
            self.method(class, name, vec![], TypeRef::Primitive(target), Modality::Final);
        }
    }

    fn install_boolean(&mut self) {
        let boolean = TypeRef::Primitive(PrimitiveKind::Boolean);
        let class = self.class("Boolean", &["kotlin"], ClassKind::Class, None);
        self.method(class, "not", vec![], boolean.clone(), Modality::Final);
        for op in BITWISE {
            self.method(class, op, vec![ParamInfo::new("other", boolean.clone())], boolean.clone(), Modality::Final);
        }
        self.method(
            class,
            "compareTo",
            vec![ParamInfo::new("other", boolean.clone())],
            TypeRef::Primitive(PrimitiveKind::Int),
            Modality::Final,
        );
        self.method(class, "equals", vec![ParamInfo::new("other", TypeRef::Any.nullable())], boolean, Modality::Final);
    }

    fn install_string(&mut self) {
        let class = self.class("String", &["kotlin"], ClassKind::Class, None);
        self.method(
            class,
            "plus",
            vec![ParamInfo::new("other", TypeRef::Any.nullable())],
            TypeRef::String,
            Modality::Final,
        );
        self.method(
            class,
            "compareTo",
            vec![ParamInfo::new("other", TypeRef::String)],
            TypeRef::Primitive(PrimitiveKind::Int),
            Modality::Final,
        );
        self.property(class, "length", TypeRef::Primitive(PrimitiveKind::Int));
    }

    fn property(&mut self, owner: DeclId, name: &str, ty: TypeRef) -> DeclId {
        self.add(
            DeclInfo::new(name, BUILTIN_MODULE, DeclKind::Property(PropertyInfo::new(ty, false)))
                .with_parent(owner),
        )
    }

    fn install_array(&mut self) {
        let class = self.class("Array", &["kotlin"], ClassKind::Class, None);
        let int = TypeRef::Primitive(PrimitiveKind::Int);
        let elem = TypeRef::Any.nullable();
        self.method(class, "get", vec![ParamInfo::new("index", int.clone())], elem.clone(), Modality::Final);
        self.method(
            class,
            "set",
            vec![ParamInfo::new("index", int.clone()), ParamInfo::new("value", elem.clone())],
            TypeRef::Unit,
            Modality::Final,
        );
        self.method(
            class,
            "copyOf",
            vec![],
            TypeRef::Array(Box::new(elem.clone())),
            Modality::Final,
        );

        // `size` is a property whose getter is what calls resolve to
        let mut getter = FunctionInfo::new(FunctionKind::Getter, vec![], int.clone());
        let size = self.add(
            DeclInfo::new(
                "size",
                BUILTIN_MODULE,
                DeclKind::Property(PropertyInfo {
                    has_backing_field: false,
                    ..PropertyInfo::new(int, false)
                }),
            )
            .with_parent(class),
        );
        getter.accessor_of = Some(size);
        let get_size = self.add(
            DeclInfo::new("<get-size>", BUILTIN_MODULE, DeclKind::Function(getter)).with_parent(class),
        );
        if let Some(DeclKind::Property(info)) = self.table.get_mut(size).map(|d| &mut d.kind) {
            info.getter = Some(get_size);
        }

        let push = self.method(
            class,
            "push",
            vec![ParamInfo::vararg("elements", elem)],
            TypeRef::Primitive(PrimitiveKind::Int),
            Modality::Final,
        );
        if let Some(info) = self.table.get_mut(push) {
            info.annotations.native = Some("push".to_string());
        }
    }

    fn install_ranges(&mut self) {
        let int = TypeRef::Primitive(PrimitiveKind::Int);
        let iterator = self.class("IntIterator", &["kotlin", "collections"], ClassKind::Class, None);
        self.method(
            iterator,
            "hasNext",
            vec![],
            TypeRef::Primitive(PrimitiveKind::Boolean),
            Modality::Final,
        );
        self.method(iterator, "next", vec![], int.clone(), Modality::Final);

        let range = self.class("IntRange", &["kotlin", "ranges"], ClassKind::Class, None);
        self.method(range, "iterator", vec![], TypeRef::Class(iterator), Modality::Final);

        let mut until = FunctionInfo::new(
            FunctionKind::TopLevel,
            vec![ParamInfo::new("to", int)],
            TypeRef::Class(range),
        );
        until.has_extension_receiver = true;
        self.add(
            DeclInfo::new("until", BUILTIN_MODULE, DeclKind::Function(until))
                .with_package(&["kotlin", "ranges"]),
        );
    }

    fn install_functions(&mut self) {
        for arity in 0..=3usize {
            let name = format!("Function{}", arity);
            let class = self.class(&name, &["kotlin"], ClassKind::Interface, None);
            let params = (0..arity)
                .map(|i| ParamInfo::new(format!("p{}", i + 1), TypeRef::Any.nullable()))
                .collect();
            self.method(class, "invoke", params, TypeRef::Any.nullable(), Modality::Abstract);
        }
    }

    fn install_exceptions(&mut self, any: DeclId) {
        let throwable = self.class("Throwable", &["kotlin"], ClassKind::Class, Some(any));
        let exception = self.class("Exception", &["kotlin"], ClassKind::Class, Some(throwable));
        let runtime = self.class("RuntimeException", &["kotlin"], ClassKind::Class, Some(exception));
        for name in [
            "NullPointerException",
            "ClassCastException",
            "IllegalStateException",
            "IllegalArgumentException",
        ] {
            self.class(name, &["kotlin"], ClassKind::Class, Some(runtime));
        }
    }

    fn install_host_functions(&mut self) {
        let mut js = FunctionInfo::new(
            FunctionKind::TopLevel,
            vec![ParamInfo::new("code", TypeRef::String)],
            TypeRef::Any.nullable(),
        );
        js.modality = Modality::Final;
        let raw = self.add(DeclInfo::new("js", BUILTIN_MODULE, DeclKind::Function(js)).with_package(&["kotlin", "js"]));
        if let Some(info) = self.table.get_mut(raw) {
            info.annotations.raw_code = true;
        }

        let println = FunctionInfo::new(
            FunctionKind::TopLevel,
            vec![ParamInfo::new("message", TypeRef::Any.nullable())],
            TypeRef::Unit,
        );
        self.add(
            DeclInfo::new("println", BUILTIN_MODULE, DeclKind::Function(println))
                .with_package(&["kotlin", "io"])
                .with_native("console.log"),
        );

        let max = FunctionInfo::new(
            FunctionKind::TopLevel,
            vec![ParamInfo::vararg(
                "values",
                TypeRef::Array(Box::new(TypeRef::Primitive(PrimitiveKind::Double))),
            )],
            TypeRef::Primitive(PrimitiveKind::Double),
        );
        self.add(
            DeclInfo::new("max", BUILTIN_MODULE, DeclKind::Function(max))
                .with_package(&["kotlin", "js", "Math"])
                .with_native("Math.max"),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_members_are_registered() {
        let mut table = DeclTable::new();
        let builtins = Builtins::install(&mut table);

        let plus = builtins.get("kotlin.Int.plus").unwrap();
        let info = table.function(plus).unwrap();
        assert_eq!(info.params.len(), 1);
        assert_eq!(info.return_type, TypeRef::Primitive(PrimitiveKind::Int));

        let byte_plus = builtins.get("kotlin.Byte.plus").unwrap();
        assert_eq!(
            table.function(byte_plus).unwrap().return_type,
            TypeRef::Primitive(PrimitiveKind::Int)
        );
        assert!(builtins.get("kotlin.Double.shl").is_none());
    }

    #[test]
    fn test_host_functions_carry_annotations() {
        let mut table = DeclTable::new();
        let builtins = Builtins::install(&mut table);

        let raw = builtins.get("kotlin.js.js").unwrap();
        assert!(table.get(raw).unwrap().annotations.raw_code);

        let max = builtins.get("kotlin.js.Math.max").unwrap();
        assert_eq!(table.get(max).unwrap().annotations.native.as_deref(), Some("Math.max"));
        assert!(table.function(max).unwrap().is_vararg());

        let size = builtins.get("kotlin.Array.size").unwrap();
        let getter = table.property(size).unwrap().getter.unwrap();
        assert_eq!(table.qualified_name(getter), "kotlin.Array.<get-size>");
    }
}
