//! On-device TAP (Test Anything Protocol) harness.
//!
//! Tests that need the real ESP-IDF driver, or that should also run on the
//! target to catch platform differences, are written with `#[tap_test]` and
//! collected at link time. The `device-tests` binary runs them over the
//! serial console and prints TAP 14, which host tooling parses.
//!
//! Only built with the `tap-tests` feature, so none of this reaches a
//! production image.
//!
//! ```ignore
//! #[cfg(feature = "tap-tests")]
//! mod tap_tests {
//!     use super::*;
//!     use csi_radio_esp32_macros::tap_test;
//!
//!     #[tap_test]
//!     fn mac_parses() {
//!         assert!("1a:00:00:00:00:00".parse::<MacAddr>().is_ok());
//!     }
//!
//!     #[tap_test(should_panic = "out of range")]
//!     fn rejects_bad_channel() {
//!         validate_channel(15).expect("out of range");
//!     }
//! }
//! ```

use crate::sink::{LineSink, StdoutSink};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

// Re-export inventory for use by the proc-macro
pub use inventory;

/// Result type for test functions.
pub type TestResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Registration hook generated for each test.
pub type TestRegisterFn = fn(&mut TestRunner);

/// A `#[tap_test]`, collected via inventory.
pub struct TapTestEntry {
    /// Module path of the test, used for grouping.
    pub module: &'static str,
    pub name: &'static str,
    pub register: TestRegisterFn,
}

impl TapTestEntry {
    pub const fn new(module: &'static str, name: &'static str, register: TestRegisterFn) -> Self {
        Self {
            module,
            name,
            register,
        }
    }
}

inventory::collect!(TapTestEntry);

/// Registered tests sorted by module, then name. Link order is not stable.
fn sorted_entries() -> Vec<&'static TapTestEntry> {
    let mut entries: Vec<_> = inventory::iter::<TapTestEntry>.into_iter().collect();
    entries.sort_by_key(|e| (e.module, e.name));
    entries
}

pub fn test_count() -> usize {
    inventory::iter::<TapTestEntry>.into_iter().count()
}

/// Run every registered test on stdout. Returns whether all passed.
pub fn run_all_tests() -> bool {
    run_tests(Arc::new(StdoutSink), None)
}

/// Run the registered tests whose module path contains `filter` (all when
/// `None`), writing TAP to `sink`.
pub fn run_tests(sink: Arc<dyn LineSink>, filter: Option<&str>) -> bool {
    let entries: Vec<_> = sorted_entries()
        .into_iter()
        .filter(|e| filter.map_or(true, |f| e.module.contains(f)))
        .collect();

    let mut runner = TestRunner::with_sink(sink);
    runner.print_header(entries.len());

    let mut module = "";
    for entry in entries {
        if entry.module != module {
            module = entry.module;
            runner.comment(module);
        }
        (entry.register)(&mut runner);
    }

    runner.finish()
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs tests and reports each as a TAP line.
pub struct TestRunner {
    sink: Arc<dyn LineSink>,
    tests_run: usize,
    tests_passed: usize,
    tests_failed: usize,
}

impl Default for TestRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl TestRunner {
    pub fn new() -> Self {
        Self::with_sink(Arc::new(StdoutSink))
    }

    pub fn with_sink(sink: Arc<dyn LineSink>) -> Self {
        Self {
            sink,
            tests_run: 0,
            tests_passed: 0,
            tests_failed: 0,
        }
    }

    fn pass(&mut self, name: &str) {
        self.tests_passed += 1;
        self.sink
            .write_line(format_args!("ok {} - {}", self.tests_run, name));
    }

    fn fail(&mut self, name: &str, reason: &str) {
        self.tests_failed += 1;
        self.sink
            .write_line(format_args!("not ok {} - {}", self.tests_run, name));
        self.sink.write_line(format_args!("# {}", reason));
    }

    /// Run a test returning [`TestResult`]. Panics count as failures.
    pub fn run<F>(&mut self, name: &str, test_fn: F)
    where
        F: FnOnce() -> TestResult + std::panic::UnwindSafe,
    {
        self.tests_run += 1;
        match catch_unwind(AssertUnwindSafe(test_fn)) {
            Ok(Ok(())) => self.pass(name),
            Ok(Err(e)) => self.fail(name, &format!("Error: {}", e)),
            Err(payload) => self.fail(name, &format!("Panic: {}", panic_message(&*payload))),
        }
    }

    /// Run a test that signals failure by panicking.
    pub fn run_assert<F>(&mut self, name: &str, test_fn: F)
    where
        F: FnOnce() + std::panic::UnwindSafe,
    {
        self.run(name, || {
            test_fn();
            Ok(())
        });
    }

    /// Run a test that must panic, with a message containing `expected`
    /// when given.
    pub fn run_should_panic<F>(&mut self, name: &str, test_fn: F, expected: Option<&str>)
    where
        F: FnOnce() + std::panic::UnwindSafe,
    {
        self.tests_run += 1;
        let payload = match catch_unwind(AssertUnwindSafe(test_fn)) {
            Ok(()) => {
                self.fail(name, "Expected panic but test completed normally");
                return;
            }
            Err(payload) => payload,
        };

        let msg = panic_message(&*payload);
        match expected {
            Some(expected) if !msg.contains(expected) => self.fail(
                name,
                &format!("Expected panic containing '{}', got '{}'", expected, msg),
            ),
            _ => self.pass(name),
        }
    }

    pub fn print_header(&self, planned_tests: usize) {
        self.sink.write_line(format_args!("TAP version 14"));
        self.sink.write_line(format_args!("1..{}", planned_tests));
    }

    /// Print a diagnostic comment.
    pub fn comment(&self, msg: &str) {
        self.sink.write_line(format_args!("# {}", msg));
    }

    /// Print the summary. Returns true if all tests passed.
    pub fn finish(&self) -> bool {
        self.comment("-----------------------");
        self.comment(&format!("Tests run: {}", self.tests_run));
        self.comment(&format!("Passed: {}", self.tests_passed));
        self.comment(&format!("Failed: {}", self.tests_failed));

        let ok = self.tests_failed == 0;
        self.comment(if ok { "Result: PASS" } else { "Result: FAIL" });
        ok
    }

    pub fn tests_run(&self) -> usize {
        self.tests_run
    }

    pub fn tests_passed(&self) -> usize {
        self.tests_passed
    }

    pub fn tests_failed(&self) -> usize {
        self.tests_failed
    }
}

mod tap_tests {
    use super::*;
    use crate::sink::MemorySink;
    use csi_radio_esp32_macros::tap_test;

    fn runner() -> (Arc<MemorySink>, TestRunner) {
        let sink = Arc::new(MemorySink::new());
        (sink.clone(), TestRunner::with_sink(sink))
    }

    #[tap_test]
    fn runner_reports_pass_and_fail() {
        let (sink, mut runner) = runner();
        runner.run("pass1", || Ok(()));
        runner.run("fail1", || Err("radio not ready".into()));
        assert_eq!(runner.tests_run(), 2);
        assert_eq!(runner.tests_passed(), 1);
        assert_eq!(runner.tests_failed(), 1);
        assert_eq!(
            sink.lines(),
            vec!["ok 1 - pass1", "not ok 2 - fail1", "# Error: radio not ready"]
        );
    }

    #[tap_test]
    fn runner_catches_panic() {
        let (sink, mut runner) = runner();
        runner.run_assert("panicking", || panic!("intentional panic"));
        assert_eq!(runner.tests_failed(), 1);
        assert_eq!(sink.lines()[1], "# Panic: intentional panic");
    }

    #[tap_test]
    fn runner_checks_expected_panic_message() {
        let (_sink, mut runner) = runner();
        runner.run_should_panic("matches", || panic!("bad channel 15"), Some("channel"));
        runner.run_should_panic("mismatch", || panic!("bad mac"), Some("channel"));
        runner.run_should_panic("no_panic", || {}, None);
        assert_eq!(runner.tests_passed(), 1);
        assert_eq!(runner.tests_failed(), 2);
    }

    #[tap_test]
    fn summary_reflects_failures() {
        let (sink, mut runner) = runner();
        runner.run("fail", || Err("x".into()));
        assert!(!runner.finish());
        assert_eq!(sink.lines().last().map(String::as_str), Some("# Result: FAIL"));
    }

    #[tap_test]
    fn entries_are_sorted_by_module() {
        let entries = sorted_entries();
        assert_eq!(entries.len(), test_count());
        assert!(entries
            .windows(2)
            .all(|w| (w[0].module, w[0].name) <= (w[1].module, w[1].name)));
    }
}
