use sasskit::{Compiler, Error, Options, StringOptions};
use url::Url;

mod support;

#[test]
fn compiles_a_string_to_css() {
    let compiler = Compiler::new(&support::launcher()).expect("launch");
    let result = compiler
        .compile_string("a {color: red}", &StringOptions::default())
        .expect("compile");
    assert_eq!(result.css, "a {color: red}");
    assert!(result.source_map.is_none());
    assert!(result.loaded_urls.is_empty());
    compiler.close();
}

#[test]
fn blank_lines_are_dropped_from_the_output() {
    let compiler = Compiler::new(&support::launcher()).expect("launch");
    let result = compiler
        .compile_string("a {}\n\n\nb {}", &StringOptions::default())
        .expect("compile");
    assert_eq!(result.css, "a {}\nb {}");
    compiler.close();
}

#[test]
fn compilation_ids_are_strictly_increasing() {
    let compiler = Compiler::new(&support::launcher()).expect("launch");
    let mut seen = Vec::new();
    for _ in 0..3 {
        let result = compiler
            .compile_string("id", &StringOptions::default())
            .expect("compile");
        let id: u32 = result
            .css
            .strip_prefix("compilation: ")
            .and_then(|rest| rest.strip_suffix(';'))
            .expect("id line")
            .parse()
            .expect("numeric id");
        seen.push(id);
    }
    assert!(
        seen.windows(2).all(|pair| pair[0] < pair[1]),
        "ids not strictly increasing: {seen:?}"
    );
    compiler.close();
}

#[test]
fn source_map_is_valid_json_and_names_the_entry_url() {
    let compiler = Compiler::new(&support::launcher()).expect("launch");
    let options = StringOptions {
        common: Options {
            source_map: true,
            ..Options::default()
        },
        url: Some(Url::parse("file:///styles/entry.scss").expect("url")),
        ..StringOptions::default()
    };
    let result = compiler.compile_string("a {}", &options).expect("compile");
    let map = result.source_map.expect("source map requested");
    let parsed: serde_json::Value = serde_json::from_str(&map).expect("well-formed json");
    assert_eq!(parsed["version"], 3);
    assert_eq!(parsed["sources"][0], "file:///styles/entry.scss");
    compiler.close();
}

#[test]
fn compiles_a_file_from_disk() {
    let dir = support::make_temp_dir("compile-file");
    let path = dir.join("entry.scss");
    std::fs::write(&path, ".card {margin: 0}\n").expect("write entry");

    let compiler = Compiler::new(&support::launcher()).expect("launch");
    let result = compiler
        .compile_file(&path, &Options::default())
        .expect("compile");
    assert_eq!(result.css, ".card {margin: 0}");
    compiler.close();
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn missing_file_is_a_compile_error() {
    let dir = support::make_temp_dir("missing-file");
    let path = dir.join("nope.scss");

    let compiler = Compiler::new(&support::launcher()).expect("launch");
    let err = compiler
        .compile_file(&path, &Options::default())
        .unwrap_err();
    let Error::Compile(failed) = err else {
        panic!("expected a compile error, got {err:?}");
    };
    assert!(
        failed.message.contains("Cannot open"),
        "unhelpful message: {}",
        failed.message
    );
    compiler.close();
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn reports_compiler_version() {
    let compiler = Compiler::new(&support::launcher()).expect("launch");
    let version = compiler.version().expect("version");
    assert_eq!(version.protocol_version, "3.2.0");
    assert_eq!(version.implementation_name, "stub-compiler");
    compiler.close();
}

#[test]
fn compile_after_close_fails_with_closed() {
    let compiler = Compiler::new(&support::launcher()).expect("launch");
    compiler.close();
    compiler.close(); // idempotent
    assert!(compiler.is_closed());

    let err = compiler
        .compile_string("a {}", &StringOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::Closed), "got {err:?}");
    let err = compiler.version().unwrap_err();
    assert!(matches!(err, Error::Closed), "got {err:?}");
}
