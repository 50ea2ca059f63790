// dfsc — Dataflow Specializing Compiler
//
// Library root. Front end, runtime value model and catalogue first, then the
// generated program representation, its analyses, and the passes in the
// order the pipeline runs them.

pub mod ast;
pub mod config;
pub mod diag;
pub mod error;
pub mod eval;
pub mod id;
pub mod lexer;
pub mod parser;
pub mod token;
pub mod types;

pub mod framework;
pub mod library;
pub mod model;
pub mod native;

pub mod builder;
pub mod context;
pub mod dataflow;
pub mod ir;
pub mod tags;

pub mod const_analysis;
pub mod named_obj;
pub mod token_types;

pub mod cleanup;
pub mod codegen;
pub mod dce;
pub mod inline_params;
pub mod inline_tokens;
pub mod materialize;
pub mod reducers;

pub mod pass;
pub mod pipeline;
