//! The per-compilation state machine.
//!
//! A session lives from the moment its compile request is sent until the
//! compiler's terminal message (or an abort) resolves it. In between it
//! serves the callback requests the compiler issues for this compilation:
//! function calls, canonicalize/import/file-import, and log events. Each
//! callback runs on its own worker thread so a slow host callback never
//! blocks the channel's read loop; the channel's write mutex keeps the
//! out-of-order responses whole on the wire.

use std::collections::HashSet;
use std::sync::{mpsc, Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use sasskit_protocol::proto::{
    CanonicalizeRequest, CanonicalizeResponse, CanonicalizeResult, CompileOutcome,
    CompileResponse, FileImportRequest, FileImportResponse, FileImportResult,
    FunctionCallRequest, FunctionCallResponse, FunctionCallResult, FunctionIdentifier,
    ImportRequest, ImportResponse, ImportResult, ImportSuccess, InboundMessage, InboundPayload,
    LogEvent, LogEventKind, OutboundPayload,
};
use sasskit_value::Value;
use tracing::{debug, trace};
use url::Url;

use crate::channel::Outbox;
use crate::error::{CompileFailed, Error};
use crate::functions::FunctionStore;
use crate::importers::ImporterStore;
use crate::lock;
use crate::logger::{DebugOptions, Logger, WarnOptions};
use crate::values;

/// Terminal state of one compilation; assigned exactly once.
#[derive(Debug)]
pub(crate) enum Outcome {
    Success {
        css: String,
        source_map: Option<String>,
        loaded_urls: Vec<String>,
    },
    Failure(CompileFailed),
    Aborted(Error),
}

pub(crate) struct Session {
    id: u32,
    outbox: Arc<dyn Outbox>,
    functions: FunctionStore,
    importers: ImporterStore,
    logger: Option<Arc<dyn Logger>>,
    terminal: Mutex<Option<mpsc::Sender<Outcome>>>,
    /// Callback request ids currently being served; a request id is in
    /// this set exactly while the compiler awaits its response.
    pending: Mutex<HashSet<u32>>,
    idle: Condvar,
}

impl Session {
    pub fn new(
        id: u32,
        outbox: Arc<dyn Outbox>,
        functions: FunctionStore,
        importers: ImporterStore,
        logger: Option<Arc<dyn Logger>>,
        terminal: mpsc::Sender<Outcome>,
    ) -> Self {
        Self {
            id,
            outbox,
            functions,
            importers,
            logger,
            terminal: Mutex::new(Some(terminal)),
            pending: Mutex::new(HashSet::new()),
            idle: Condvar::new(),
        }
    }

    pub fn compilation_id(&self) -> u32 {
        self.id
    }

    /// Entry point from the router; runs on the channel's read loop and
    /// must not block, so every callback is handed to a worker thread.
    pub fn handle(self: &Arc<Self>, payload: OutboundPayload) {
        match payload {
            OutboundPayload::CompileResponse(response) => self.finish(response),
            OutboundPayload::LogEvent(event) => {
                self.spawn_worker("log", None, move |session| session.serve_log(event));
            }
            OutboundPayload::FunctionCallRequest(request) => {
                let request_id = request.id;
                self.spawn_worker("function", Some(request_id), move |session| {
                    session.serve_function_call(request)
                });
            }
            OutboundPayload::CanonicalizeRequest(request) => {
                let request_id = request.id;
                self.spawn_worker("canonicalize", Some(request_id), move |session| {
                    session.serve_canonicalize(request)
                });
            }
            OutboundPayload::ImportRequest(request) => {
                let request_id = request.id;
                self.spawn_worker("import", Some(request_id), move |session| {
                    session.serve_import(request)
                });
            }
            OutboundPayload::FileImportRequest(request) => {
                let request_id = request.id;
                self.spawn_worker("file-import", Some(request_id), move |session| {
                    session.serve_file_import(request)
                });
            }
            OutboundPayload::ProtocolError(_) | OutboundPayload::VersionResponse(_) => {
                // The router consumes these before they can reach a session.
                self.abort(Error::Protocol(format!(
                    "unexpected message routed to compilation {}",
                    self.id
                )));
            }
        }
    }

    /// Resolves the terminal slot with an abort; a no-op if the session
    /// already reached a terminal state.
    pub fn abort(&self, reason: Error) {
        self.resolve(Outcome::Aborted(reason));
    }

    /// Waits until no callback worker is in flight, up to `timeout`.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut pending = lock(&self.pending);
        while !pending.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .idle
                .wait_timeout(pending, deadline - now)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            pending = guard;
        }
        true
    }

    fn finish(&self, response: CompileResponse) {
        let outcome = match response.result {
            CompileOutcome::Success(success) => Outcome::Success {
                css: success.css,
                source_map: success.source_map,
                loaded_urls: response.loaded_urls,
            },
            CompileOutcome::Failure(failure) => Outcome::Failure(CompileFailed {
                message: failure.message,
                span: failure.span,
                stack_trace: failure.stack_trace,
                formatted: failure.formatted,
            }),
        };
        self.resolve(outcome);
    }

    fn resolve(&self, outcome: Outcome) {
        if let Some(terminal) = lock(&self.terminal).take() {
            debug!(compilation_id = self.id, "compilation reached terminal state");
            let _ = terminal.send(outcome);
        }
    }

    fn spawn_worker<F>(self: &Arc<Self>, kind: &str, request_id: Option<u32>, work: F)
    where
        F: FnOnce(&Session) + Send + 'static,
    {
        if let Some(id) = request_id {
            lock(&self.pending).insert(id);
        }
        let session = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("sasskit-{kind}-{}", self.id))
            .spawn(move || {
                work(&session);
                session.settle_pending(request_id);
            });
        if let Err(err) = spawned {
            self.settle_pending(request_id);
            self.abort(Error::Host(format!("failed to spawn {kind} worker: {err}")));
        }
    }

    fn settle_pending(&self, request_id: Option<u32>) {
        if let Some(id) = request_id {
            let mut pending = lock(&self.pending);
            pending.remove(&id);
            if pending.is_empty() {
                self.idle.notify_all();
            }
        }
    }

    fn respond(&self, payload: InboundPayload) {
        let message = InboundMessage {
            compilation_id: self.id,
            payload,
        };
        // A send failure means the channel is tearing down; the fatal
        // path aborts this session, so there is nothing left to do here.
        if let Err(err) = self.outbox.send(&message) {
            debug!(
                compilation_id = self.id,
                "dropping callback response: {err}"
            );
        }
    }

    fn serve_log(&self, event: LogEvent) {
        trace!(compilation_id = self.id, "log event: {}", event.message);
        match self.logger.as_deref() {
            Some(logger) => match event.kind {
                LogEventKind::Debug => logger.debug(
                    &event.message,
                    &DebugOptions { span: event.span },
                ),
                kind => logger.warn(
                    &event.message,
                    &WarnOptions {
                        span: event.span,
                        stack_trace: event.stack_trace,
                        deprecation: kind == LogEventKind::DeprecationWarning,
                    },
                ),
            },
            None => match event.kind {
                LogEventKind::Warning => eprintln!("WARNING: {}", event.message),
                LogEventKind::DeprecationWarning => {
                    eprintln!("DEPRECATION WARNING: {}", event.message)
                }
                LogEventKind::Debug => eprintln!("DEBUG: {}", event.message),
            },
        }
    }

    fn serve_function_call(&self, request: FunctionCallRequest) {
        let result = match self.call_function(&request) {
            Ok(value) => FunctionCallResult::Success(value),
            Err(message) => FunctionCallResult::Error(message),
        };
        self.respond(InboundPayload::FunctionCallResponse(FunctionCallResponse {
            id: request.id,
            result,
        }));
    }

    fn call_function(
        &self,
        request: &FunctionCallRequest,
    ) -> Result<sasskit_protocol::proto::Value, String> {
        let callback = match &request.identifier {
            FunctionIdentifier::Name(name) => {
                let function = self.functions.by_name(name)?;
                function.signature.check_arity(request.arguments.len())?;
                Arc::clone(&function.callback)
            }
            FunctionIdentifier::FunctionId(id) => self.functions.by_id(*id)?,
        };
        let mut arguments: Vec<Value> = Vec::with_capacity(request.arguments.len());
        for argument in &request.arguments {
            arguments.push(values::to_host(argument)?);
        }
        let value = callback(&arguments).map_err(|err| err.to_string())?;
        values::to_wire(&value, &self.functions)
    }

    fn serve_canonicalize(&self, request: CanonicalizeRequest) {
        let result = match self.importers.importer(request.importer_id) {
            Ok(importer) => match importer.canonicalize(&request.url, request.from_import) {
                Ok(None) => None,
                Ok(Some(url)) => Some(CanonicalizeResult::Url(url.to_string())),
                Err(err) => Some(CanonicalizeResult::Error(err.to_string())),
            },
            Err(message) => Some(CanonicalizeResult::Error(message)),
        };
        self.respond(InboundPayload::CanonicalizeResponse(CanonicalizeResponse {
            id: request.id,
            result,
        }));
    }

    fn serve_import(&self, request: ImportRequest) {
        let result = self.load_import(&request);
        self.respond(InboundPayload::ImportResponse(ImportResponse {
            id: request.id,
            result,
        }));
    }

    fn load_import(&self, request: &ImportRequest) -> Option<ImportResult> {
        let importer = match self.importers.importer(request.importer_id) {
            Ok(importer) => importer,
            Err(message) => return Some(ImportResult::Error(message)),
        };
        let url = match Url::parse(&request.url) {
            Ok(url) => url,
            Err(err) => {
                return Some(ImportResult::Error(format!(
                    "invalid canonical URL {:?}: {err}",
                    request.url
                )))
            }
        };
        match importer.load(&url) {
            Ok(None) => None,
            Ok(Some(result)) => Some(ImportResult::Success(ImportSuccess {
                contents: result.contents,
                syntax: result.syntax,
                source_map_url: result.source_map_url.map(|url| url.to_string()),
            })),
            Err(err) => Some(ImportResult::Error(err.to_string())),
        }
    }

    fn serve_file_import(&self, request: FileImportRequest) {
        let result = match self.importers.file_importer(request.importer_id) {
            Ok(importer) => match importer.find_file_url(&request.url, request.from_import) {
                Ok(None) => None,
                Ok(Some(url)) if url.scheme() == "file" => {
                    Some(FileImportResult::FileUrl(url.to_string()))
                }
                Ok(Some(url)) => Some(FileImportResult::Error(format!(
                    "The file importer must return a file: URL, got {url}"
                ))),
                Err(err) => Some(FileImportResult::Error(err.to_string())),
            },
            Err(message) => Some(FileImportResult::Error(message)),
        };
        self.respond(InboundPayload::FileImportResponse(FileImportResponse {
            id: request.id,
            result,
        }));
    }
}
