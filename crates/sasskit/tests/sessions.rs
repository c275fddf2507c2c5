//! Multiplexing and failure semantics across concurrent compilations.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use sasskit::{Compiler, CustomFunction, Error, Options, StringOptions, Value};

mod support;

fn options_with_function(function: CustomFunction) -> StringOptions {
    StringOptions {
        common: Options {
            functions: vec![function],
            ..Options::default()
        },
        ..StringOptions::default()
    }
}

#[test]
fn concurrent_compiles_do_not_contaminate_each_other() {
    let compiler = Arc::new(Compiler::new(&support::launcher()).expect("launch"));
    let mut handles = Vec::new();
    for i in 0..10 {
        let compiler = Arc::clone(&compiler);
        handles.push(thread::spawn(move || {
            let options = options_with_function(CustomFunction::new(
                "test-function($arg)",
                move |_| Ok(Value::string(format!("thread-{i}"))),
            ));
            let result = compiler
                .compile_string("fn test-function|x", &options)
                .expect("compile");
            (i, result.css)
        }));
    }
    for handle in handles {
        let (i, css) = handle.join().expect("compile thread");
        let expected = format!("value: \"thread-{i}\";");
        assert_eq!(css, expected, "thread {i} saw another session's function");
    }
    compiler.close();
}

#[test]
fn close_aborts_an_in_flight_compile() {
    let compiler = Arc::new(Compiler::new(&support::launcher()).expect("launch"));
    let hung = {
        let compiler = Arc::clone(&compiler);
        thread::spawn(move || compiler.compile_string("hang", &StringOptions::default()))
    };
    thread::sleep(Duration::from_millis(200));
    compiler.close();
    let err = hung.join().expect("compile thread").unwrap_err();
    assert!(matches!(err, Error::Closed), "got {err:?}");
}

#[test]
fn compiler_death_aborts_the_compile() {
    let compiler = Compiler::new(&support::launcher()).expect("launch");
    let err = compiler
        .compile_string("die", &StringOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::Closed), "got {err:?}");
    assert!(compiler.is_closed());
}

#[test]
fn protocol_error_aborts_every_live_session() {
    let compiler = Arc::new(Compiler::new(&support::launcher()).expect("launch"));
    let bystander = {
        let compiler = Arc::clone(&compiler);
        thread::spawn(move || compiler.compile_string("hang", &StringOptions::default()))
    };
    thread::sleep(Duration::from_millis(100));

    let err = compiler
        .compile_string("sleep 50\nprotoerr", &StringOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::Protocol(_)), "got {err:?}");

    let err = bystander.join().expect("compile thread").unwrap_err();
    assert!(matches!(err, Error::Protocol(_)), "got {err:?}");

    assert!(compiler.is_closed());
    let err = compiler
        .compile_string("a {}", &StringOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::Closed), "got {err:?}");
}

#[test]
fn message_for_an_unissued_compilation_id_is_fatal() {
    let compiler = Compiler::new(&support::launcher()).expect("launch");
    let err = compiler
        .compile_string("rogue", &StringOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::Protocol(_)), "got {err:?}");
    assert!(compiler.is_closed());
}

#[test]
fn sequential_compiles_reuse_the_subprocess() {
    let compiler = Compiler::new(&support::launcher()).expect("launch");
    for i in 0..5 {
        let result = compiler
            .compile_string(&format!("rule-{i} {{}}"), &StringOptions::default())
            .expect("compile");
        assert_eq!(result.css, format!("rule-{i} {{}}"));
    }
    compiler.close();
}
