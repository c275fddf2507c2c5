//! Host-side driver for an out-of-process stylesheet compiler.
//!
//! The compiler is a sibling executable speaking a length-prefixed
//! protobuf-dialect protocol over its standard input and output. This
//! crate owns the subprocess, multiplexes concurrent compilations over the
//! single pipe pair, and serves the callbacks (custom functions, importers,
//! loggers) the compiler issues back to host code mid-compilation.
//!
//! ```no_run
//! use sasskit::{Compiler, Launcher, StringOptions};
//!
//! # fn main() -> Result<(), sasskit::Error> {
//! let compiler = Compiler::new(&Launcher::new("/usr/local/bin/style-compiler"))?;
//! let result = compiler.compile_string("a {b: c}", &StringOptions::default())?;
//! println!("{}", result.css);
//! compiler.close();
//! # Ok(())
//! # }
//! ```

mod channel;
mod compiler;
mod error;
mod functions;
mod importers;
mod launch;
mod logger;
mod options;
mod router;
mod session;
mod values;

pub use compiler::{CompileResult, Compiler, CompilerVersion};
pub use error::{CompileFailed, Error, Result};
pub use functions::CustomFunction;
pub use importers::{FileImporter, Importer, ImporterHandle, ImporterResult};
pub use launch::Launcher;
pub use logger::{DebugOptions, Logger, WarnOptions};
pub use options::{Options, StringOptions};

pub use sasskit_protocol::proto::{OutputStyle, SourceLocation, SourceSpan, Syntax};
pub use sasskit_value::{
    BoxError, CalculationArg, CalculationOperator, FunctionCallback, FunctionResult,
    ListSeparator, SassArgumentList, SassCalculation, SassColor, SassFunction, SassList, SassMap,
    SassNumber, SassString, Value,
};

/// Poison-tolerant mutex lock; a panicked worker must not wedge the
/// channel or the session tables.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
