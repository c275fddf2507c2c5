//! The host façade: one subprocess, many concurrent compilations.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use sasskit_protocol::proto::{
    CompileInput, CompileRequest, ImporterRef, InboundMessage, InboundPayload, StringInput,
    VersionRequest, PROTOCOL_ERROR_ID,
};
use tracing::debug;
use url::Url;

use crate::channel::{Channel, Outbox};
use crate::error::Error;
use crate::functions::FunctionStore;
use crate::importers::ImporterStoreBuilder;
use crate::launch::Launcher;
use crate::options::{Options, StringOptions};
use crate::router::Router;
use crate::session::{Outcome, Session};

/// How long `close` waits for in-flight callbacks to finish before
/// abandoning their sessions.
const CLOSE_GRACE: Duration = Duration::from_millis(100);

/// A successful compilation.
#[derive(Debug, Clone)]
pub struct CompileResult {
    pub css: String,
    pub source_map: Option<String>,
    /// Canonical URLs of every stylesheet that contributed to the output.
    pub loaded_urls: Vec<Url>,
}

/// Version information reported by the compiler executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerVersion {
    pub protocol_version: String,
    pub compiler_version: String,
    pub implementation_version: String,
    pub implementation_name: String,
}

/// Owns one compiler subprocess and multiplexes compilations over it.
///
/// A `Compiler` may be shared across threads; each compile call runs its
/// own session against the shared channel.
pub struct Compiler {
    channel: Channel,
    router: Arc<Router>,
    next_compilation_id: AtomicU32,
    next_version_id: AtomicU32,
}

impl Compiler {
    /// Launches the compiler subprocess eagerly.
    pub fn new(launcher: &Launcher) -> Result<Self, Error> {
        let router = Arc::new(Router::new());
        let channel = Channel::spawn(launcher, Arc::clone(&router))?;
        Ok(Self {
            channel,
            router,
            next_compilation_id: AtomicU32::new(1),
            next_version_id: AtomicU32::new(1),
        })
    }

    /// Compiles stylesheet text held in memory.
    pub fn compile_string(
        &self,
        source: &str,
        options: &StringOptions,
    ) -> Result<CompileResult, Error> {
        let mut builder = ImporterStoreBuilder::new();
        let entry_importer = match &options.importer {
            Some(handle) => Some(builder.add(handle)?),
            None => None,
        };
        let input = CompileInput::String(StringInput {
            source: source.to_string(),
            url: options.url.as_ref().map(Url::to_string),
            syntax: options.syntax,
            importer: entry_importer,
        });
        self.run(input, &options.common, builder)
    }

    /// Compiles a stylesheet file on disk.
    pub fn compile_file(
        &self,
        path: impl AsRef<Path>,
        options: &Options,
    ) -> Result<CompileResult, Error> {
        let input = CompileInput::Path(path.as_ref().to_string_lossy().into_owned());
        self.run(input, options, ImporterStoreBuilder::new())
    }

    /// Queries the compiler's version information.
    pub fn version(&self) -> Result<CompilerVersion, Error> {
        if self.channel.is_closed() {
            return Err(Error::Closed);
        }
        let id = self.next_version_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel();
        self.router.register_version_waiter(id, tx);
        let message = InboundMessage {
            compilation_id: 0,
            payload: InboundPayload::VersionRequest(VersionRequest { id }),
        };
        if let Err(err) = self.channel.send(&message) {
            self.router.forget_version_waiter(id);
            return Err(err);
        }
        match rx.recv() {
            Ok(Ok(response)) => Ok(CompilerVersion {
                protocol_version: response.protocol_version,
                compiler_version: response.compiler_version,
                implementation_version: response.implementation_version,
                implementation_name: response.implementation_name,
            }),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(Error::Closed),
        }
    }

    /// True once the channel is closed, by [`Compiler::close`] or by a
    /// fatal transport or protocol error.
    pub fn is_closed(&self) -> bool {
        self.channel.is_closed()
    }

    /// Closes the subprocess channel. Every live compilation aborts;
    /// in-flight callbacks get a bounded grace period to finish first.
    /// Idempotent, and compile calls after it fail with [`Error::Closed`].
    pub fn close(&self) {
        for session in self.router.live_sessions() {
            if !session.wait_idle(CLOSE_GRACE) {
                debug!(
                    compilation_id = session.compilation_id(),
                    "abandoning in-flight callbacks on close"
                );
            }
        }
        self.channel.close();
    }

    fn run(
        &self,
        input: CompileInput,
        options: &Options,
        mut builder: ImporterStoreBuilder,
    ) -> Result<CompileResult, Error> {
        if self.channel.is_closed() {
            return Err(Error::Closed);
        }

        let functions = FunctionStore::build(&options.functions)?;
        let mut importers = Vec::with_capacity(options.importers.len() + options.load_paths.len());
        for handle in &options.importers {
            importers.push(builder.add(handle)?);
        }
        for path in &options.load_paths {
            importers.push(ImporterRef::LoadPath(path.to_string_lossy().into_owned()));
        }

        let request = CompileRequest {
            input,
            style: options.style,
            source_map: options.source_map,
            source_map_include_sources: options.source_map_include_sources,
            importers,
            global_functions: functions.signatures().to_vec(),
            alert_color: options.alert_color,
            alert_ascii: options.alert_ascii,
            verbose: options.verbose,
            quiet_deps: options.quiet_deps,
            charset: options.charset,
        };

        let id = self.allocate_compilation_id()?;
        let (tx, rx) = mpsc::channel();
        let session = Arc::new(Session::new(
            id,
            Arc::new(self.channel.clone()) as Arc<dyn Outbox>,
            functions,
            builder.finish(),
            options.logger.clone(),
            tx,
        ));
        self.router.register(id, &session);
        debug!(compilation_id = id, "compilation started");

        let message = InboundMessage {
            compilation_id: id,
            payload: InboundPayload::CompileRequest(request),
        };
        if let Err(err) = self.channel.send(&message) {
            self.router.deregister(id);
            return Err(err);
        }

        let outcome = rx.recv();
        self.router.deregister(id);
        match outcome {
            Ok(Outcome::Success {
                css,
                source_map,
                loaded_urls,
            }) => {
                let mut urls = Vec::with_capacity(loaded_urls.len());
                for url in loaded_urls {
                    urls.push(Url::parse(&url).map_err(|err| {
                        Error::Protocol(format!(
                            "compiler reported an invalid loaded URL {url:?}: {err}"
                        ))
                    })?);
                }
                Ok(CompileResult {
                    css,
                    source_map,
                    loaded_urls: urls,
                })
            }
            Ok(Outcome::Failure(failure)) => Err(Error::Compile(Box::new(failure))),
            Ok(Outcome::Aborted(reason)) => Err(reason),
            // The session was dropped without a terminal message; only
            // possible when the channel died mid-teardown.
            Err(_) => Err(Error::Closed),
        }
    }

    /// Compilation ids are strictly increasing from 1 and never reused
    /// for the lifetime of the subprocess; `u32::MAX` stays reserved for
    /// unassociated protocol errors.
    fn allocate_compilation_id(&self) -> Result<u32, Error> {
        let id = self.next_compilation_id.fetch_add(1, Ordering::SeqCst);
        if id >= PROTOCOL_ERROR_ID {
            return Err(Error::Host(
                "compilation ids for this compiler instance are exhausted".to_string(),
            ));
        }
        Ok(id)
    }
}

impl Drop for Compiler {
    fn drop(&mut self) {
        self.channel.close();
    }
}
