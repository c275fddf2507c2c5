//! Message envelope types for the embedded compiler protocol.
//!
//! Two top-level sum types cross the pipe: [`InboundMessage`] (host to
//! compiler) and [`OutboundMessage`] (compiler to host). Every
//! compile-scoped message carries the compilation id of its session;
//! request/response pairs within a compilation are correlated by `id`.

/// Reserved compilation id marking a protocol error that is not
/// associated with any compilation.
pub const PROTOCOL_ERROR_ID: u32 = u32::MAX;

#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub compilation_id: u32,
    pub payload: InboundPayload,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundPayload {
    CompileRequest(CompileRequest),
    CanonicalizeResponse(CanonicalizeResponse),
    ImportResponse(ImportResponse),
    FileImportResponse(FileImportResponse),
    FunctionCallResponse(FunctionCallResponse),
    VersionRequest(VersionRequest),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub compilation_id: u32,
    pub payload: OutboundPayload,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutboundPayload {
    CompileResponse(CompileResponse),
    LogEvent(LogEvent),
    CanonicalizeRequest(CanonicalizeRequest),
    ImportRequest(ImportRequest),
    FileImportRequest(FileImportRequest),
    FunctionCallRequest(FunctionCallRequest),
    ProtocolError(ProtocolError),
    VersionResponse(VersionResponse),
}

// ---------------------------------------------------------------------------
// Shared enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Syntax {
    #[default]
    Scss,
    Indented,
    Css,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputStyle {
    #[default]
    Expanded,
    Compressed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogEventKind {
    Warning,
    DeprecationWarning,
    Debug,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolErrorKind {
    Parse,
    Params,
    Internal,
}

// ---------------------------------------------------------------------------
// Compile request / response
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct CompileRequest {
    pub input: CompileInput,
    pub style: OutputStyle,
    pub source_map: bool,
    pub source_map_include_sources: bool,
    pub importers: Vec<ImporterRef>,
    pub global_functions: Vec<String>,
    pub alert_color: bool,
    pub alert_ascii: bool,
    pub verbose: bool,
    pub quiet_deps: bool,
    pub charset: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompileInput {
    String(StringInput),
    Path(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StringInput {
    pub source: String,
    pub url: Option<String>,
    pub syntax: Syntax,
    pub importer: Option<ImporterRef>,
}

/// One entry of the compile request's import resolution chain.
#[derive(Debug, Clone, PartialEq)]
pub enum ImporterRef {
    LoadPath(String),
    ImporterId(u32),
    FileImporterId(u32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompileResponse {
    pub result: CompileOutcome,
    pub loaded_urls: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompileOutcome {
    Success(CompileSuccess),
    Failure(CompileFailure),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompileSuccess {
    pub css: String,
    pub source_map: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompileFailure {
    pub message: String,
    pub span: Option<SourceSpan>,
    pub stack_trace: Option<String>,
    pub formatted: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SourceSpan {
    pub text: String,
    pub start: SourceLocation,
    pub end: Option<SourceLocation>,
    pub url: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceLocation {
    pub offset: u32,
    pub line: u32,
    pub column: u32,
}

// ---------------------------------------------------------------------------
// Log events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    pub kind: LogEventKind,
    pub message: String,
    pub span: Option<SourceSpan>,
    pub stack_trace: Option<String>,
}

// ---------------------------------------------------------------------------
// Importer callbacks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalizeRequest {
    pub id: u32,
    pub importer_id: u32,
    pub url: String,
    pub from_import: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalizeResponse {
    pub id: u32,
    /// `None` means this importer does not recognize the URL.
    pub result: Option<CanonicalizeResult>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CanonicalizeResult {
    Url(String),
    Error(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportRequest {
    pub id: u32,
    pub importer_id: u32,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportResponse {
    pub id: u32,
    pub result: Option<ImportResult>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImportResult {
    Success(ImportSuccess),
    Error(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportSuccess {
    pub contents: String,
    pub syntax: Syntax,
    pub source_map_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileImportRequest {
    pub id: u32,
    pub importer_id: u32,
    pub url: String,
    pub from_import: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileImportResponse {
    pub id: u32,
    pub result: Option<FileImportResult>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FileImportResult {
    FileUrl(String),
    Error(String),
}

// ---------------------------------------------------------------------------
// Function callbacks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCallRequest {
    pub id: u32,
    pub identifier: FunctionIdentifier,
    pub arguments: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FunctionIdentifier {
    Name(String),
    FunctionId(u32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCallResponse {
    pub id: u32,
    pub result: FunctionCallResult,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FunctionCallResult {
    Success(Value),
    Error(String),
}

// ---------------------------------------------------------------------------
// Protocol errors and version handshake
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolError {
    pub kind: ProtocolErrorKind,
    /// Compilation id the error belongs to, or [`PROTOCOL_ERROR_ID`].
    pub id: u32,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VersionRequest {
    pub id: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VersionResponse {
    pub id: u32,
    pub protocol_version: String,
    pub compiler_version: String,
    pub implementation_version: String,
    pub implementation_name: String,
}

// ---------------------------------------------------------------------------
// Wire values
// ---------------------------------------------------------------------------

/// Wire mirror of a stylesheet value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(ValString),
    Number(ValNumber),
    RgbColor(ValColor),
    List(ValList),
    Map(ValMap),
    Singleton(SingletonValue),
    CompilerFunction(u32),
    HostFunction(ValHostFunction),
    ArgumentList(ValArgumentList),
    Calculation(ValCalculation),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValString {
    pub text: String,
    pub quoted: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValNumber {
    pub value: f64,
    pub numerators: Vec<String>,
    pub denominators: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValColor {
    pub red: f64,
    pub green: f64,
    pub blue: f64,
    pub alpha: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireSeparator {
    #[default]
    Comma,
    Space,
    Slash,
    Undecided,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValList {
    pub separator: WireSeparator,
    pub has_brackets: bool,
    pub contents: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValMap {
    pub entries: Vec<(Value, Value)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SingletonValue {
    True,
    False,
    Null,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValHostFunction {
    pub id: u32,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValArgumentList {
    pub id: u32,
    pub separator: WireSeparator,
    pub contents: Vec<Value>,
    pub keywords: Vec<(String, Value)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValCalculation {
    pub name: String,
    pub arguments: Vec<CalcValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CalcValue {
    Number(ValNumber),
    String(String),
    Interpolation(String),
    Operation(Box<CalcOperation>),
    Calculation(ValCalculation),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalcOperator {
    Plus,
    Minus,
    Times,
    Divide,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalcOperation {
    pub operator: CalcOperator,
    pub left: CalcValue,
    pub right: CalcValue,
}
