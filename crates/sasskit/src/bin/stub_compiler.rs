//! Scripted protocol peer for the integration tests.
//!
//! Speaks the compiler side of the embedded protocol over stdin/stdout.
//! Instead of evaluating stylesheets, it scans compile-request source text
//! line by line for directives and drives the corresponding callback
//! traffic back at the host:
//!
//! ```text
//! fn <name>|<arg>     call custom function <name> with one string argument
//! canon <url>         canonicalize+load <url> as an `@import` (from_import)
//! use <url>           same, as a `@use` (not from_import)
//! file <url>          resolve <url> through a file importer
//! log warn <message>  emit a warning log event
//! log debug <message> emit a debug log event
//! error <message>     fail the compilation at this line
//! id                  emit the compilation id into the css
//! sleep <ms>          stall this compilation
//! hang                stall forever (until the host closes)
//! die                 exit the process mid-compilation
//! protoerr            emit an unassociated protocol error
//! rogue               emit an event for a compilation id that was never issued
//! ```
//!
//! Any other non-empty line is copied into the output css verbatim.
//! Canonical URLs are cached per compilation, so a URL is canonicalized
//! and loaded at most once no matter how often it is imported.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use sasskit_protocol::proto::{
    CanonicalizeRequest, CanonicalizeResult, CompileFailure, CompileInput, CompileOutcome,
    CompileRequest, CompileResponse, CompileSuccess, FileImportRequest, FileImportResult,
    FunctionCallRequest, FunctionCallResult, FunctionIdentifier, ImportResult, ImporterRef,
    InboundPayload, LogEvent, LogEventKind, OutboundMessage, OutboundPayload,
    ProtocolError, ProtocolErrorKind, SingletonValue, SourceLocation, SourceSpan, Value,
    ValString, VersionResponse, PROTOCOL_ERROR_ID,
};
use sasskit_protocol::{decode_inbound, encode_outbound, read_frame, write_frame, FrameError};

const CALLBACK_TIMEOUT: Duration = Duration::from_secs(30);

struct Stub {
    stdout: Mutex<io::Stdout>,
    /// Callback responses routed back to the compile thread that asked,
    /// keyed by (compilation id, request id).
    waiting: Mutex<HashMap<(u32, u32), mpsc::Sender<InboundPayload>>>,
    next_request_id: AtomicU32,
}

impl Stub {
    fn send(&self, message: &OutboundMessage) -> Result<()> {
        let payload = encode_outbound(message);
        let mut stdout = self.stdout.lock().unwrap_or_else(|e| e.into_inner());
        write_frame(&mut *stdout, &payload).context("write frame to host")
    }

    /// Sends one callback request and blocks until the host responds.
    fn call(
        &self,
        compilation_id: u32,
        payload: impl FnOnce(u32) -> OutboundPayload,
    ) -> Result<InboundPayload> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel();
        self.waiting
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((compilation_id, request_id), tx);
        self.send(&OutboundMessage {
            compilation_id,
            payload: payload(request_id),
        })?;
        let response = rx
            .recv_timeout(CALLBACK_TIMEOUT)
            .context("host never answered a callback request")?;
        Ok(response)
    }

    fn deliver(&self, compilation_id: u32, request_id: u32, payload: InboundPayload) -> Result<()> {
        let waiter = self
            .waiting
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&(compilation_id, request_id));
        match waiter {
            Some(tx) => {
                let _ = tx.send(payload);
                Ok(())
            }
            None => bail!("unsolicited response {request_id} for compilation {compilation_id}"),
        }
    }
}

fn main() {
    if let Err(err) = run() {
        eprintln!("stub-compiler: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let stub = Arc::new(Stub {
        stdout: Mutex::new(io::stdout()),
        waiting: Mutex::new(HashMap::new()),
        next_request_id: AtomicU32::new(1),
    });

    let mut stdin = io::stdin().lock();
    loop {
        let payload = match read_frame(&mut stdin) {
            Ok(payload) => payload,
            Err(FrameError::Eof) => return Ok(()),
            Err(err) => {
                let _ = stub.send(&protocol_error(format!("unreadable frame: {err}")));
                bail!("unreadable frame: {err}");
            }
        };
        let message = match decode_inbound(&payload) {
            Ok(message) => message,
            Err(err) => {
                let _ = stub.send(&protocol_error(format!("undecodable message: {err}")));
                bail!("undecodable message: {err}");
            }
        };
        let compilation_id = message.compilation_id;
        match message.payload {
            InboundPayload::CompileRequest(request) => {
                let stub = Arc::clone(&stub);
                let _ = thread::Builder::new()
                    .name(format!("stub-compile-{compilation_id}"))
                    .spawn(move || {
                        if let Err(err) = compile(&stub, compilation_id, request) {
                            eprintln!("stub-compiler: compilation {compilation_id}: {err:#}");
                            std::process::exit(1);
                        }
                    })
                    .context("spawn compile thread")?;
            }
            InboundPayload::VersionRequest(request) => {
                stub.send(&OutboundMessage {
                    compilation_id,
                    payload: OutboundPayload::VersionResponse(VersionResponse {
                        id: request.id,
                        protocol_version: "3.2.0".to_string(),
                        compiler_version: "0.0.1".to_string(),
                        implementation_version: "0.0.1".to_string(),
                        implementation_name: "stub-compiler".to_string(),
                    }),
                })?;
            }
            InboundPayload::CanonicalizeResponse(response) => {
                stub.deliver(
                    compilation_id,
                    response.id,
                    InboundPayload::CanonicalizeResponse(response),
                )?;
            }
            InboundPayload::ImportResponse(response) => {
                stub.deliver(
                    compilation_id,
                    response.id,
                    InboundPayload::ImportResponse(response),
                )?;
            }
            InboundPayload::FileImportResponse(response) => {
                stub.deliver(
                    compilation_id,
                    response.id,
                    InboundPayload::FileImportResponse(response),
                )?;
            }
            InboundPayload::FunctionCallResponse(response) => {
                stub.deliver(
                    compilation_id,
                    response.id,
                    InboundPayload::FunctionCallResponse(response),
                )?;
            }
        }
    }
}

fn protocol_error(message: String) -> OutboundMessage {
    OutboundMessage {
        compilation_id: PROTOCOL_ERROR_ID,
        payload: OutboundPayload::ProtocolError(ProtocolError {
            kind: ProtocolErrorKind::Parse,
            id: PROTOCOL_ERROR_ID,
            message,
        }),
    }
}

/// The compile state machine for one compilation.
struct Compilation<'a> {
    stub: &'a Stub,
    id: u32,
    entry_url: Option<String>,
    entry_importer: Option<u32>,
    importers: Vec<u32>,
    file_importers: Vec<u32>,
    /// requested url -> canonical url; at most one canonicalize per URL.
    canonical: HashMap<String, String>,
    /// canonical url -> contents; at most one load per canonical URL.
    loaded: HashMap<String, String>,
    loaded_urls: Vec<String>,
    css: Vec<String>,
}

fn compile(stub: &Stub, id: u32, request: CompileRequest) -> Result<()> {
    let (source, entry_url, entry_importer) = match &request.input {
        CompileInput::String(input) => (
            input.source.clone(),
            input.url.clone(),
            match input.importer {
                Some(ImporterRef::ImporterId(importer_id)) => Some(importer_id),
                _ => None,
            },
        ),
        CompileInput::Path(path) => match fs::read_to_string(path) {
            Ok(source) => (source, Some(format!("file://{path}")), None),
            Err(err) => {
                return respond_failure(
                    stub,
                    id,
                    CompileFailure {
                        message: format!("Cannot open {path}: {err}"),
                        span: None,
                        stack_trace: None,
                        formatted: None,
                    },
                    Vec::new(),
                );
            }
        },
    };

    let mut importers = Vec::new();
    let mut file_importers = Vec::new();
    for importer in &request.importers {
        match importer {
            ImporterRef::ImporterId(importer_id) => importers.push(*importer_id),
            ImporterRef::FileImporterId(importer_id) => file_importers.push(*importer_id),
            ImporterRef::LoadPath(_) => {}
        }
    }

    let mut compilation = Compilation {
        stub,
        id,
        entry_url,
        entry_importer,
        importers,
        file_importers,
        canonical: HashMap::new(),
        loaded: HashMap::new(),
        loaded_urls: Vec::new(),
        css: Vec::new(),
    };

    for (line_index, line) in source.lines().enumerate() {
        if let Some(failure) = compilation.step(line_index, line.trim())? {
            let loaded_urls = std::mem::take(&mut compilation.loaded_urls);
            return respond_failure(stub, id, failure, loaded_urls);
        }
    }

    let css = compilation.css.join("\n");
    let source_map = request.source_map.then(|| {
        serde_json::json!({
            "version": 3,
            "sources": [compilation.entry_url.clone().unwrap_or_default()],
            "mappings": "",
        })
        .to_string()
    });
    stub.send(&OutboundMessage {
        compilation_id: id,
        payload: OutboundPayload::CompileResponse(CompileResponse {
            result: CompileOutcome::Success(CompileSuccess { css, source_map }),
            loaded_urls: compilation.loaded_urls,
        }),
    })
}

fn respond_failure(
    stub: &Stub,
    id: u32,
    failure: CompileFailure,
    loaded_urls: Vec<String>,
) -> Result<()> {
    stub.send(&OutboundMessage {
        compilation_id: id,
        payload: OutboundPayload::CompileResponse(CompileResponse {
            result: CompileOutcome::Failure(failure),
            loaded_urls,
        }),
    })
}

impl Compilation<'_> {
    fn failure(&self, line_index: usize, line: &str, message: String) -> CompileFailure {
        CompileFailure {
            message,
            span: Some(SourceSpan {
                text: line.to_string(),
                start: SourceLocation {
                    offset: 0,
                    line: line_index as u32,
                    column: 0,
                },
                end: None,
                url: self.entry_url.clone(),
                context: None,
            }),
            stack_trace: None,
            formatted: None,
        }
    }

    /// Executes one directive; `Some(failure)` aborts the compilation.
    fn step(&mut self, line_index: usize, line: &str) -> Result<Option<CompileFailure>> {
        if line.is_empty() {
            return Ok(None);
        }
        if let Some(rest) = line.strip_prefix("fn ") {
            return self.call_function(line_index, line, rest);
        }
        if let Some(url) = line.strip_prefix("canon ") {
            return self.import(line_index, line, url.trim(), true);
        }
        if let Some(url) = line.strip_prefix("use ") {
            return self.import(line_index, line, url.trim(), false);
        }
        if let Some(url) = line.strip_prefix("file ") {
            return self.file_import(line_index, line, url.trim());
        }
        if let Some(message) = line.strip_prefix("log warn ") {
            self.stub.send(&OutboundMessage {
                compilation_id: self.id,
                payload: OutboundPayload::LogEvent(LogEvent {
                    kind: LogEventKind::Warning,
                    message: message.to_string(),
                    span: None,
                    stack_trace: Some("- 0:0 root stylesheet".to_string()),
                }),
            })?;
            return Ok(None);
        }
        if let Some(message) = line.strip_prefix("log debug ") {
            self.stub.send(&OutboundMessage {
                compilation_id: self.id,
                payload: OutboundPayload::LogEvent(LogEvent {
                    kind: LogEventKind::Debug,
                    message: message.to_string(),
                    span: None,
                    stack_trace: None,
                }),
            })?;
            return Ok(None);
        }
        if let Some(message) = line.strip_prefix("error ") {
            return Ok(Some(self.failure(line_index, line, message.to_string())));
        }
        match line {
            "id" => {
                self.css.push(format!("compilation: {};", self.id));
                Ok(None)
            }
            "hang" => {
                thread::sleep(Duration::from_secs(3600));
                Ok(None)
            }
            "die" => {
                std::process::exit(1);
            }
            "protoerr" => {
                self.stub
                    .send(&protocol_error("scripted protocol error".to_string()))?;
                // The host closes the channel; park until stdin EOF kills us.
                thread::sleep(Duration::from_secs(3600));
                Ok(None)
            }
            "rogue" => {
                self.stub.send(&OutboundMessage {
                    compilation_id: 999_999,
                    payload: OutboundPayload::LogEvent(LogEvent {
                        kind: LogEventKind::Debug,
                        message: "who am I".to_string(),
                        span: None,
                        stack_trace: None,
                    }),
                })?;
                thread::sleep(Duration::from_secs(3600));
                Ok(None)
            }
            _ => {
                if let Some(ms) = line.strip_prefix("sleep ") {
                    let ms: u64 = ms.trim().parse().context("sleep directive")?;
                    thread::sleep(Duration::from_millis(ms));
                    return Ok(None);
                }
                self.css.push(line.to_string());
                Ok(None)
            }
        }
    }

    fn call_function(
        &mut self,
        line_index: usize,
        line: &str,
        rest: &str,
    ) -> Result<Option<CompileFailure>> {
        let (name, argument) = rest.split_once('|').unwrap_or((rest, ""));
        let arguments = if argument.is_empty() {
            Vec::new()
        } else {
            vec![Value::String(ValString {
                text: argument.to_string(),
                quoted: false,
            })]
        };
        let name = name.to_string();
        let response = self.stub.call(self.id, move |request_id| {
            OutboundPayload::FunctionCallRequest(FunctionCallRequest {
                id: request_id,
                identifier: FunctionIdentifier::Name(name),
                arguments,
            })
        })?;
        let InboundPayload::FunctionCallResponse(response) = response else {
            bail!("expected a function call response, got {response:?}");
        };
        match response.result {
            FunctionCallResult::Success(value) => {
                self.css.push(format!("value: {};", render_value(&value)));
                Ok(None)
            }
            FunctionCallResult::Error(message) => {
                Ok(Some(self.failure(line_index, line, message)))
            }
        }
    }

    /// Canonicalize-then-load, with both steps cached per compilation the
    /// way a real compiler keys its import cache on canonical URLs.
    fn import(
        &mut self,
        line_index: usize,
        line: &str,
        url: &str,
        from_import: bool,
    ) -> Result<Option<CompileFailure>> {
        let canonical = match self.canonical.get(url) {
            Some(canonical) => Some((canonical.clone(), None)),
            None => match self.canonicalize(url, from_import)? {
                Ok(found) => {
                    if let Some((canonical, _)) = &found {
                        self.canonical.insert(url.to_string(), canonical.clone());
                    }
                    found
                }
                Err(message) => return Ok(Some(self.failure(line_index, line, message))),
            },
        };
        let Some((canonical, importer_id)) = canonical else {
            return Ok(Some(self.failure(
                line_index,
                line,
                "Can't find stylesheet to import.".to_string(),
            )));
        };

        if let Some(contents) = self.loaded.get(&canonical) {
            let contents = contents.clone();
            self.append_loaded(&contents);
            return Ok(None);
        }

        // A fresh canonical URL always has the importer that produced it;
        // a cache hit on the requested URL implies the contents are cached
        // too, so this path is only reached with an importer at hand.
        let importer_id = match importer_id {
            Some(importer_id) => importer_id,
            None => match self.entry_importer.into_iter().chain(self.importers.iter().copied()).next() {
                Some(importer_id) => importer_id,
                None => {
                    return Ok(Some(self.failure(
                        line_index,
                        line,
                        "no importer available to load from".to_string(),
                    )))
                }
            },
        };

        let canonical_for_call = canonical.clone();
        let response = self.stub.call(self.id, move |request_id| {
            OutboundPayload::ImportRequest(sasskit_protocol::proto::ImportRequest {
                id: request_id,
                importer_id,
                url: canonical_for_call,
            })
        })?;
        let InboundPayload::ImportResponse(response) = response else {
            bail!("expected an import response, got {response:?}");
        };
        match response.result {
            Some(ImportResult::Success(success)) => {
                self.loaded.insert(canonical.clone(), success.contents.clone());
                self.loaded_urls.push(canonical);
                self.append_loaded(&success.contents);
                Ok(None)
            }
            Some(ImportResult::Error(message)) => {
                Ok(Some(self.failure(line_index, line, message)))
            }
            None => Ok(Some(self.failure(
                line_index,
                line,
                format!("importer did not load {canonical}"),
            ))),
        }
    }

    /// Consults the entry importer (relative URLs only) and then the
    /// importer list in order. `Ok(Err(message))` is a host error string.
    #[allow(clippy::type_complexity)]
    fn canonicalize(
        &self,
        url: &str,
        from_import: bool,
    ) -> Result<std::result::Result<Option<(String, Option<u32>)>, String>> {
        let is_absolute = url.contains(':');
        let mut candidates = Vec::new();
        if !is_absolute {
            if let Some(entry) = self.entry_importer {
                candidates.push(entry);
            }
        }
        candidates.extend(self.importers.iter().copied());

        for importer_id in candidates {
            let url = url.to_string();
            let response = self.stub.call(self.id, move |request_id| {
                OutboundPayload::CanonicalizeRequest(CanonicalizeRequest {
                    id: request_id,
                    importer_id,
                    url,
                    from_import,
                })
            })?;
            let InboundPayload::CanonicalizeResponse(response) = response else {
                bail!("expected a canonicalize response, got {response:?}");
            };
            match response.result {
                Some(CanonicalizeResult::Url(canonical)) => {
                    return Ok(Ok(Some((canonical, Some(importer_id)))));
                }
                Some(CanonicalizeResult::Error(message)) => return Ok(Err(message)),
                None => {}
            }
        }
        Ok(Ok(None))
    }

    fn file_import(
        &mut self,
        line_index: usize,
        line: &str,
        url: &str,
    ) -> Result<Option<CompileFailure>> {
        for importer_id in self.file_importers.clone() {
            let url = url.to_string();
            let response = self.stub.call(self.id, move |request_id| {
                OutboundPayload::FileImportRequest(FileImportRequest {
                    id: request_id,
                    importer_id,
                    url,
                    from_import: false,
                })
            })?;
            let InboundPayload::FileImportResponse(response) = response else {
                bail!("expected a file import response, got {response:?}");
            };
            match response.result {
                Some(FileImportResult::FileUrl(file_url)) => {
                    self.css.push(format!("loaded: {file_url};"));
                    self.loaded_urls.push(file_url);
                    return Ok(None);
                }
                Some(FileImportResult::Error(message)) => {
                    return Ok(Some(self.failure(line_index, line, message)));
                }
                None => {}
            }
        }
        Ok(Some(self.failure(
            line_index,
            line,
            "Can't find stylesheet to import.".to_string(),
        )))
    }

    fn append_loaded(&mut self, contents: &str) {
        for line in contents.lines() {
            let line = line.trim();
            if !line.is_empty() {
                self.css.push(line.to_string());
            }
        }
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(string) if string.quoted => format!("\"{}\"", string.text),
        Value::String(string) => string.text.clone(),
        Value::Number(number) => {
            let mut out = number.value.to_string();
            out.push_str(&number.numerators.join("*"));
            out
        }
        Value::Singleton(SingletonValue::True) => "true".to_string(),
        Value::Singleton(SingletonValue::False) => "false".to_string(),
        Value::Singleton(SingletonValue::Null) => "null".to_string(),
        Value::List(list) => {
            let rendered: Vec<String> = list.contents.iter().map(render_value).collect();
            rendered.join(", ")
        }
        other => format!("<{other:?}>"),
    }
}
