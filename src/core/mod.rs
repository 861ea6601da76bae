//! Compilation pipeline: lex → parse → bind → check → scope → emit, plus the
//! compilation manager, hand-off cache, request surface, and project config.

pub mod binder;
pub mod cache;
pub mod checker;
pub mod compilation;
pub mod config;
pub mod emitter;
pub mod lexer;
pub mod parser;
pub mod requests;
pub mod scope;
pub mod types;
