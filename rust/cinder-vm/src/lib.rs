//! Cinder VM: slot-addressed stack machine for LIR, plus the interpreter
//! session that drives incremental evaluation on top of it.

pub mod driver;
pub mod error;
pub mod host;
pub mod session;
pub mod translation;
pub mod value_printer;
pub mod values;
pub mod vm;

pub use error::CinderError;
pub use host::{HostValue, InterpreterCallbacks};
pub use session::{EvalResult, Session, SessionOptions};
pub use translation::DumpRange;
