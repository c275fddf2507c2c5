#![allow(dead_code)]

use std::path::PathBuf;

use sasskit::Launcher;

/// The scripted protocol peer built alongside this crate.
pub fn launcher() -> Launcher {
    Launcher::new(env!("CARGO_BIN_EXE_stub-compiler"))
}

pub fn make_temp_dir(prefix: &str) -> PathBuf {
    let base = std::env::temp_dir();
    let pid = std::process::id();
    for n in 0..10_000u32 {
        let dir = base.join(format!("sasskit-{prefix}-{pid}-{n}"));
        if std::fs::create_dir(&dir).is_ok() {
            return dir;
        }
    }
    panic!("failed to create temp dir under {}", base.display());
}
