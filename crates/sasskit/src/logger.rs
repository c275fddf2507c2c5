//! Logger callbacks for compiler warnings and `@debug` output.

use sasskit_protocol::proto::SourceSpan;

/// Receives the compiler's log events for one compilation. Invocation is
/// best-effort; a logger can never fail the compile.
pub trait Logger: Send + Sync {
    fn warn(&self, message: &str, options: &WarnOptions);

    fn debug(&self, message: &str, options: &DebugOptions);
}

#[derive(Debug, Clone, Default)]
pub struct WarnOptions {
    pub span: Option<SourceSpan>,
    pub stack_trace: Option<String>,
    pub deprecation: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DebugOptions {
    pub span: Option<SourceSpan>,
}
