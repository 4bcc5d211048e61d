//! Per-uniform trace output of a full compile.
//!
//! Lives in its own test binary: it installs a process-wide logger.

use std::sync::Mutex;

use glsl_xc::{compile, CompileOptions, DiagnosticLog, Stage};
use log::{Level, LevelFilter, Log, Metadata, Record};

struct Capture;

static RECORDS: Mutex<Vec<String>> = Mutex::new(Vec::new());
static CAPTURE: Capture = Capture;

impl Log for Capture {
    fn enabled(&self, _: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if record.level() == Level::Trace {
            if let Ok(mut records) = RECORDS.lock() {
                records.push(record.args().to_string());
            }
        }
    }

    fn flush(&self) {}
}

#[test]
fn test_each_uniform_is_traced_once() {
    log::set_logger(&CAPTURE).unwrap();
    log::set_max_level(LevelFilter::Trace);

    let mut log = DiagnosticLog::new();
    compile(
        "uniform vec4 u_tint; uniform sampler2D s_albedo; void main(){}",
        &CompileOptions::new(Stage::Fragment, "tint.frag"),
        &mut log,
    )
    .unwrap();

    let records = RECORDS.lock().unwrap();
    let count = |prefix: &str| records.iter().filter(|r| r.starts_with(prefix)).count();
    assert_eq!(count("u_tint, Vec4, 1, 0, 1"), 1, "{:#?}", records);
    assert_eq!(count("s_albedo, Sampler, 1, 1, 1"), 1, "{:#?}", records);
}
