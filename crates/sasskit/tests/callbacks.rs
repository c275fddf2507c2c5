use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use sasskit::{
    BoxError, Compiler, CustomFunction, DebugOptions, Error, FileImporter, Importer,
    ImporterHandle, ImporterResult, Logger, Options, StringOptions, Syntax, Value, WarnOptions,
};
use url::Url;

mod support;

fn options_with(common: Options) -> StringOptions {
    StringOptions {
        common,
        ..StringOptions::default()
    }
}

#[test]
fn custom_function_result_reaches_the_output() {
    let compiler = Compiler::new(&support::launcher()).expect("launch");
    let options = options_with(Options {
        functions: vec![CustomFunction::new("foo($arg)", |_| {
            Ok(Value::string("result"))
        })],
        ..Options::default()
    });
    let result = compiler
        .compile_string("fn foo|bar", &options)
        .expect("compile");
    assert_eq!(result.css, "value: \"result\";");
    compiler.close();
}

#[test]
fn function_lookup_is_dash_normalized() {
    let compiler = Compiler::new(&support::launcher()).expect("launch");
    let options = options_with(Options {
        functions: vec![CustomFunction::new("foo_bar()", |_| {
            Ok(Value::unquoted_string("matched"))
        })],
        ..Options::default()
    });
    let result = compiler
        .compile_string("fn foo-bar", &options)
        .expect("compile");
    assert_eq!(result.css, "value: matched;");
    compiler.close();
}

#[test]
fn invalid_signature_fails_before_any_compile_work() {
    let compiler = Compiler::new(&support::launcher()).expect("launch");
    for signature in ["$foo()", "foo() ", "foo ()", "foo"] {
        let options = options_with(Options {
            functions: vec![CustomFunction::new(signature, |_| Ok(Value::Null))],
            ..Options::default()
        });
        let err = compiler.compile_string("a {}", &options).unwrap_err();
        assert!(matches!(err, Error::Host(_)), "{signature:?} gave {err:?}");
    }
    // The channel survives registration failures.
    let result = compiler
        .compile_string("a {}", &StringOptions::default())
        .expect("compile");
    assert_eq!(result.css, "a {}");
    compiler.close();
}

#[test]
fn failing_callback_becomes_a_compile_error_at_the_call_site() {
    let compiler = Compiler::new(&support::launcher()).expect("launch");
    let options = options_with(Options {
        functions: vec![CustomFunction::new("foo()", |_| Err("heck".into()))],
        ..Options::default()
    });
    let err = compiler.compile_string("fn foo", &options).unwrap_err();
    let Error::Compile(failed) = err else {
        panic!("expected a compile error, got {err:?}");
    };
    assert_eq!(failed.message, "heck");
    let span = failed.span.expect("span");
    assert_eq!(span.start.line, 0);
    compiler.close();
}

#[derive(Default)]
struct CountingImporter {
    canonicalize_calls: AtomicUsize,
    load_calls: AtomicUsize,
    from_import_flags: Mutex<Vec<bool>>,
}

impl Importer for CountingImporter {
    fn canonicalize(&self, _url: &str, from_import: bool) -> Result<Option<Url>, BoxError> {
        self.canonicalize_calls.fetch_add(1, Ordering::SeqCst);
        self.from_import_flags
            .lock()
            .expect("flags")
            .push(from_import);
        Ok(Some(Url::parse("u:blue")?))
    }

    fn load(&self, _canonical_url: &Url) -> Result<Option<ImporterResult>, BoxError> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Some(ImporterResult {
            contents: ".blue {color: blue}".to_string(),
            syntax: Syntax::Scss,
            source_map_url: None,
        }))
    }
}

#[test]
fn repeated_imports_canonicalize_and_load_once() {
    let importer = Arc::new(CountingImporter::default());
    let compiler = Compiler::new(&support::launcher()).expect("launch");
    let options = options_with(Options {
        importers: vec![ImporterHandle {
            importer: Some(importer.clone()),
            file_importer: None,
        }],
        ..Options::default()
    });
    let result = compiler
        .compile_string("canon orange\ncanon orange", &options)
        .expect("compile");
    assert_eq!(result.css, ".blue {color: blue}\n.blue {color: blue}");
    assert_eq!(importer.canonicalize_calls.load(Ordering::SeqCst), 1);
    assert_eq!(importer.load_calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        result.loaded_urls,
        vec![Url::parse("u:blue").expect("url")]
    );
    compiler.close();
}

#[test]
fn import_context_drives_the_from_import_flag() {
    let importer = Arc::new(CountingImporter::default());
    let compiler = Compiler::new(&support::launcher()).expect("launch");
    let options = options_with(Options {
        importers: vec![ImporterHandle {
            importer: Some(importer.clone()),
            file_importer: None,
        }],
        ..Options::default()
    });
    compiler
        .compile_string("canon orange\nuse green", &options)
        .expect("compile");
    assert_eq!(
        *importer.from_import_flags.lock().expect("flags"),
        vec![true, false]
    );
    compiler.close();
}

#[test]
fn unrecognized_import_is_a_compile_error() {
    struct NeverImporter;

    impl Importer for NeverImporter {
        fn canonicalize(&self, _url: &str, _from_import: bool) -> Result<Option<Url>, BoxError> {
            Ok(None)
        }

        fn load(&self, _canonical_url: &Url) -> Result<Option<ImporterResult>, BoxError> {
            Ok(None)
        }
    }

    let compiler = Compiler::new(&support::launcher()).expect("launch");
    let options = options_with(Options {
        importers: vec![ImporterHandle::custom(NeverImporter)],
        ..Options::default()
    });
    let err = compiler.compile_string("canon orange", &options).unwrap_err();
    let Error::Compile(failed) = err else {
        panic!("expected a compile error, got {err:?}");
    };
    assert!(
        failed.message.contains("Can't find stylesheet"),
        "unhelpful message: {}",
        failed.message
    );
    compiler.close();
}

#[test]
fn ambiguous_importer_registration_is_rejected_eagerly() {
    let compiler = Compiler::new(&support::launcher()).expect("launch");
    let options = options_with(Options {
        importers: vec![ImporterHandle {
            importer: Some(Arc::new(CountingImporter::default())),
            file_importer: Some(Arc::new(ResolvingFileImporter {
                base: "file:///resolved".to_string(),
            })),
        }],
        ..Options::default()
    });
    let err = compiler.compile_string("a {}", &options).unwrap_err();
    assert!(matches!(err, Error::Host(_)), "got {err:?}");
    compiler.close();
}

struct ResolvingFileImporter {
    base: String,
}

impl FileImporter for ResolvingFileImporter {
    fn find_file_url(&self, url: &str, _from_import: bool) -> Result<Option<Url>, BoxError> {
        Ok(Some(Url::parse(&format!("{}/{url}", self.base))?))
    }
}

#[test]
fn file_importer_resolves_urls() {
    let compiler = Compiler::new(&support::launcher()).expect("launch");
    let options = options_with(Options {
        importers: vec![ImporterHandle::file(ResolvingFileImporter {
            base: "file:///resolved".to_string(),
        })],
        ..Options::default()
    });
    let result = compiler
        .compile_string("file theme", &options)
        .expect("compile");
    assert_eq!(result.css, "loaded: file:///resolved/theme;");
    assert_eq!(
        result.loaded_urls,
        vec![Url::parse("file:///resolved/theme").expect("url")]
    );
    compiler.close();
}

#[test]
fn non_file_url_from_file_importer_fails_the_compile() {
    let compiler = Compiler::new(&support::launcher()).expect("launch");
    let options = options_with(Options {
        importers: vec![ImporterHandle::file(ResolvingFileImporter {
            base: "https://example.com".to_string(),
        })],
        ..Options::default()
    });
    let err = compiler.compile_string("file theme", &options).unwrap_err();
    let Error::Compile(failed) = err else {
        panic!("expected a compile error, got {err:?}");
    };
    assert!(
        failed.message.contains("file: URL"),
        "unhelpful message: {}",
        failed.message
    );
    compiler.close();
}

#[derive(Default)]
struct CollectingLogger {
    warnings: Mutex<Vec<(String, bool)>>,
    debugs: Mutex<Vec<String>>,
}

impl Logger for CollectingLogger {
    fn warn(&self, message: &str, options: &WarnOptions) {
        self.warnings
            .lock()
            .expect("warnings")
            .push((message.to_string(), options.deprecation));
    }

    fn debug(&self, message: &str, _options: &DebugOptions) {
        self.debugs.lock().expect("debugs").push(message.to_string());
    }
}

#[test]
fn log_events_reach_the_logger_without_failing_the_compile() {
    let logger = Arc::new(CollectingLogger::default());
    let compiler = Compiler::new(&support::launcher()).expect("launch");
    let options = options_with(Options {
        logger: Some(logger.clone()),
        ..Options::default()
    });
    let result = compiler
        .compile_string("log warn watch out\nlog debug a note\na {}", &options)
        .expect("compile");
    assert_eq!(result.css, "a {}");

    // Log callbacks run on their own workers; give them a moment.
    let deadline = Instant::now() + Duration::from_secs(1);
    loop {
        let warned = logger.warnings.lock().expect("warnings").clone();
        let debugged = logger.debugs.lock().expect("debugs").clone();
        if !warned.is_empty() && !debugged.is_empty() {
            assert_eq!(warned, vec![("watch out".to_string(), false)]);
            assert_eq!(debugged, vec!["a note".to_string()]);
            break;
        }
        if Instant::now() >= deadline {
            panic!("logger never saw the events: {warned:?} {debugged:?}");
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    compiler.close();
}

#[test]
fn entrypoint_importer_serves_relative_urls() {
    let importer = Arc::new(CountingImporter::default());
    let compiler = Compiler::new(&support::launcher()).expect("launch");
    let options = StringOptions {
        importer: Some(ImporterHandle {
            importer: Some(importer.clone()),
            file_importer: None,
        }),
        ..StringOptions::default()
    };
    let result = compiler
        .compile_string("canon orange", &options)
        .expect("compile");
    assert_eq!(result.css, ".blue {color: blue}");
    assert_eq!(importer.canonicalize_calls.load(Ordering::SeqCst), 1);
    compiler.close();
}
