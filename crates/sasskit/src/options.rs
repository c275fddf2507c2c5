//! Compile options.

use std::path::PathBuf;
use std::sync::Arc;

use sasskit_protocol::proto::{OutputStyle, Syntax};
use url::Url;

use crate::functions::CustomFunction;
use crate::importers::ImporterHandle;
use crate::logger::Logger;

/// Options shared by string and file compiles.
#[derive(Clone)]
pub struct Options {
    pub style: OutputStyle,
    pub source_map: bool,
    pub source_map_include_sources: bool,
    /// Emit `@charset`/BOM for non-ASCII output. On by default.
    pub charset: bool,
    pub quiet_deps: bool,
    pub verbose: bool,
    pub alert_ascii: bool,
    pub alert_color: bool,
    /// Filesystem fallback paths, consulted after every importer.
    pub load_paths: Vec<PathBuf>,
    /// Importers, consulted in registration order.
    pub importers: Vec<ImporterHandle>,
    pub functions: Vec<CustomFunction>,
    pub logger: Option<Arc<dyn Logger>>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            style: OutputStyle::Expanded,
            source_map: false,
            source_map_include_sources: false,
            charset: true,
            quiet_deps: false,
            verbose: false,
            alert_ascii: false,
            alert_color: false,
            load_paths: Vec::new(),
            importers: Vec::new(),
            functions: Vec::new(),
            logger: None,
        }
    }
}

/// Options for compiling stylesheet text held in memory.
#[derive(Clone, Default)]
pub struct StringOptions {
    pub common: Options,
    pub syntax: Syntax,
    /// The URL the compiler reports for this stylesheet in spans and
    /// loaded-URL lists.
    pub url: Option<Url>,
    /// Importer used to resolve relative URLs inside the entrypoint.
    /// Takes precedence over [`Options::importers`] for relative URLs but
    /// not absolute ones, and keeps an importer id of its own even when
    /// the same object also appears in the importer list.
    pub importer: Option<ImporterHandle>,
}
