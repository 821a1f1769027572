pub mod ast;
pub mod dynamic_lookup;
pub mod incremental;
pub mod lexer;
pub mod lir;
pub mod lower;
pub mod parser;
pub mod printer;
pub mod rewriter;
pub mod sema;
pub mod source;
pub mod tokens;
pub mod types;
pub mod validator;
