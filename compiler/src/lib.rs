pub mod tast;
pub mod ir;
pub mod codegen;
pub mod pipeline;
pub mod error_codes;
pub mod logging;
