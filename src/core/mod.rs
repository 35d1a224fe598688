//! Core recipe logic: types, parsing, templating, codegen, build, execution.

pub mod builder;
pub mod codegen;
pub mod digest;
pub mod error;
pub mod executor;
pub mod parser;
pub mod shell;
pub mod state;
pub mod template;
pub mod types;
