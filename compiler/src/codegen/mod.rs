//! ES5 code generation
//!
//! The renderer turns finished IR into a [`JsProgram`]; the printer turns
//! that into source text:
//! - [`js_ast`]: the target syntax tree
//! - [`js_renderer`] and [`invocation`]: IR to target tree
//! - [`js_printer`]: target tree to text, with minimal parentheses
//! - [`raw_code`]: parser for raw target source embedded in the input
//! - [`naming`]: identifier sanitizing and collision-free allocation
//! - [`runtime`]: the runtime library surface generated code calls

mod invocation;
pub mod js_ast;
pub mod js_printer;
pub mod js_renderer;
pub mod naming;
pub mod raw_code;
pub mod runtime;

pub use js_ast::{JsExpr, JsFunction, JsProgram, JsStmt};
pub use js_printer::{print_expression, print_program, print_statement};
pub use js_renderer::{render_module, JsRenderer, RenderError, RenderOptions, RenderResult};
