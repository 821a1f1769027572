//! Cinder CLI library: configuration, the REPL and the file checker shared
//! by the `cinder` binary.

pub mod check;
pub mod colors;
pub mod config;
pub mod repl;
