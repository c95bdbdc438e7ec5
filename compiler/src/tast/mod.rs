//! Resolved front-end input
//!
//! The translator does not parse or type-check. It consumes what the
//! front-end resolved: a [`DeclTable`] describing every visible declaration
//! and a typed tree per file whose calls, receivers and locals are already
//! bound.

pub mod builtins;
pub mod id_types;
pub mod node;
pub mod symbols;

pub use builtins::{Builtins, BUILTIN_MODULE};
pub use id_types::{DeclId, IdType, LocalId};
pub use node::*;
pub use symbols::{
    Annotations, ClassInfo, ClassKind, DeclInfo, DeclKind, DeclTable, DelegatedMember,
    FunctionInfo, FunctionKind, Modality, ParamInfo, PrimitiveKind, PropertyInfo,
    SourceLocation, TypeRef, Visibility,
};
