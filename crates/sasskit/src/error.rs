//! Error taxonomy for the compiler driver.

use std::fmt;

use sasskit_protocol::proto::SourceSpan;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The compiler reported a compilation failure.
    #[error("{0}")]
    Compile(Box<CompileFailed>),
    /// A host-side precondition failed, e.g. an ambiguous importer
    /// registration or an invalid function signature.
    #[error("{0}")]
    Host(String),
    /// The compiler violated the protocol; the channel is torn down and
    /// every live compilation aborts.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The channel to the compiler is closed.
    #[error("the compiler channel is closed")]
    Closed,
}

/// Details of a compilation failure reported by the compiler.
#[derive(Debug, Clone, PartialEq)]
pub struct CompileFailed {
    pub message: String,
    pub span: Option<SourceSpan>,
    pub stack_trace: Option<String>,
    /// The compiler's own human-readable rendering, when provided.
    pub formatted: Option<String>,
}

impl fmt::Display for CompileFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(formatted) = &self.formatted {
            return f.write_str(formatted);
        }
        f.write_str(&self.message)?;
        if let Some(span) = &self.span {
            write!(f, " at {}:{}", span.start.line + 1, span.start.column + 1)?;
            if let Some(url) = &span.url {
                write!(f, " in {url}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for CompileFailed {}
