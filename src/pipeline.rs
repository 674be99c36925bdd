// src/pipeline.rs
pub mod command;
pub mod config;
pub mod context;
pub mod executor;
pub(crate) mod global_functions;
pub mod stream;
