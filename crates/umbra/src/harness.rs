//! Sandbox harness for running suites of shadow-backed tests.
//!
//! Every test runs against the same [`ShadowEnvironment`], reset before the
//! test and entered on the running thread, so default bindings come back,
//! scheduler clocks restart at zero and no state leaks between tests.

use crate::environment::ShadowEnvironment;
use crate::result::UmbraResult;
use serde::Serialize;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Test body
pub type TestFn = Arc<dyn Fn(&ShadowEnvironment) -> UmbraResult<()> + Send + Sync>;

/// A test suite containing multiple tests
#[derive(Debug, Clone)]
pub struct TestSuite {
    /// Suite name
    pub name: String,
    /// Tests in this suite
    pub tests: Vec<TestCase>,
}

impl TestSuite {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tests: Vec::new(),
        }
    }

    pub fn add_test(&mut self, test: TestCase) {
        self.tests.push(test);
    }

    /// Add a test, builder style
    #[must_use]
    pub fn with_test(mut self, test: TestCase) -> Self {
        self.tests.push(test);
        self
    }

    #[must_use]
    pub fn test_count(&self) -> usize {
        self.tests.len()
    }
}

/// A single sandboxed test
#[derive(Clone)]
pub struct TestCase {
    /// Test name
    pub name: String,
    body: TestFn,
}

impl TestCase {
    #[must_use]
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&ShadowEnvironment) -> UmbraResult<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            body: Arc::new(body),
        }
    }

    fn run(&self, env: &ShadowEnvironment) -> Result<(), String> {
        let body = Arc::clone(&self.body);
        match panic::catch_unwind(AssertUnwindSafe(|| body(env))) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err.to_string()),
            Err(payload) => Err(panic_message(payload.as_ref())),
        }
    }
}

impl fmt::Debug for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestCase").field("name", &self.name).finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

/// Result of running a single test
#[derive(Debug, Clone, Serialize)]
pub struct TestResult {
    pub name: String,
    pub passed: bool,
    /// Error message if failed
    pub error: Option<String>,
    pub duration: Duration,
}

impl TestResult {
    #[must_use]
    pub fn pass(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            error: None,
            duration: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn fail(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            error: Some(error.into()),
            duration: Duration::ZERO,
        }
    }

    #[must_use]
    pub const fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }
}

/// Results from running a test suite
#[derive(Debug, Clone, Serialize)]
pub struct SuiteResults {
    pub suite_name: String,
    pub results: Vec<TestResult>,
    /// Tests not run because of fail-fast
    pub skipped: usize,
    pub duration: Duration,
}

impl SuiteResults {
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.skipped == 0 && self.results.iter().all(|r| r.passed)
    }

    #[must_use]
    pub fn passed_count(&self) -> usize {
        self.results.iter().filter(|r| r.passed).count()
    }

    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.results.iter().filter(|r| !r.passed).count()
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.results.len()
    }

    #[must_use]
    pub fn failures(&self) -> Vec<&TestResult> {
        self.results.iter().filter(|r| !r.passed).collect()
    }

    /// Pretty-printed JSON report
    pub fn to_json(&self) -> UmbraResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Runs suites inside one sandbox environment
#[derive(Debug)]
pub struct SandboxHarness {
    env: ShadowEnvironment,
    /// Whether to stop on first failure
    pub fail_fast: bool,
}

impl SandboxHarness {
    #[must_use]
    pub const fn new(env: ShadowEnvironment) -> Self {
        Self {
            env,
            fail_fast: false,
        }
    }

    #[must_use]
    pub const fn with_fail_fast(mut self) -> Self {
        self.fail_fast = true;
        self
    }

    #[must_use]
    pub const fn env(&self) -> &ShadowEnvironment {
        &self.env
    }

    /// Run one test in a freshly reset environment
    #[must_use]
    pub fn run_test(&self, test: &TestCase) -> TestResult {
        self.env.reset();
        let _guard = self.env.enter();
        let start = Instant::now();
        let outcome = test.run(&self.env);
        let duration = start.elapsed();
        match outcome {
            Ok(()) => {
                debug!(test = %test.name, ?duration, "test passed");
                TestResult::pass(&test.name).with_duration(duration)
            }
            Err(error) => {
                warn!(test = %test.name, %error, "test failed");
                TestResult::fail(&test.name, error).with_duration(duration)
            }
        }
    }

    /// Run a test suite
    #[must_use]
    pub fn run(&self, suite: &TestSuite) -> SuiteResults {
        let start = Instant::now();
        let mut results = Vec::with_capacity(suite.test_count());
        for test in &suite.tests {
            let result = self.run_test(test);
            let failed = !result.passed;
            results.push(result);
            if failed && self.fail_fast {
                break;
            }
        }
        self.env.reset();
        let skipped = suite.test_count() - results.len();
        let summary = SuiteResults {
            suite_name: suite.name.clone(),
            results,
            skipped,
            duration: start.elapsed(),
        };
        info!(
            suite = %summary.suite_name,
            passed = summary.passed_count(),
            failed = summary.failed_count(),
            skipped,
            "suite finished"
        );
        summary
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::class::{ClassInfo, RealClass, OBJECT};
    use crate::binder::Call;
    use crate::result::UmbraError;
    use crate::shadow::ShadowClass;
    use crate::value::Value;

    static VIEW: ClassInfo = ClassInfo::extends("android.view.View", &OBJECT);

    #[derive(Default)]
    struct ViewState {
        width: i32,
    }

    fn env() -> ShadowEnvironment {
        let shadow = ShadowClass::builder::<ViewState>("ShadowView", RealClass::of(&VIEW))
            .method("getWidth", &[], |s, _| Ok(Value::Int(s.width)))
            .build()
            .unwrap();
        ShadowEnvironment::builder().shadow(shadow).build().unwrap()
    }

    // =========================================================================
    // TestSuite / TestCase
    // =========================================================================

    #[test]
    fn test_suite_collects_tests() {
        let mut suite = TestSuite::new("views");
        suite.add_test(TestCase::new("a", |_| Ok(())));
        let suite = suite.with_test(TestCase::new("b", |_| Ok(())));
        assert_eq!(suite.test_count(), 2);
        assert!(format!("{:?}", suite.tests[0]).contains("\"a\""));
    }

    #[test]
    fn test_result_builders() {
        let pass = TestResult::pass("ok").with_duration(Duration::from_millis(3));
        assert!(pass.passed);
        assert_eq!(pass.duration, Duration::from_millis(3));
        let fail = TestResult::fail("bad", "boom");
        assert_eq!(fail.error.as_deref(), Some("boom"));
    }

    // =========================================================================
    // SandboxHarness
    // =========================================================================

    #[test]
    fn test_each_test_sees_a_fresh_environment() {
        let suite = TestSuite::new("isolation")
            .with_test(TestCase::new("mutates", |env| {
                env.main_scheduler().advance_by(Duration::from_secs(5))?;
                env.unbind_shadow_class(RealClass::of(&VIEW));
                Ok(())
            }))
            .with_test(TestCase::new("observes", |env| {
                assert_eq!(env.main_scheduler().current_time_ms(), 0);
                let view = env.new_instance(RealClass::of(&VIEW))?;
                assert_eq!(view.invoke(&Call::new("getWidth"))?, Value::Int(0));
                Ok(())
            }));
        let results = SandboxHarness::new(env()).run(&suite);
        assert!(results.all_passed(), "{:?}", results.failures());
        assert_eq!(results.passed_count(), 2);
    }

    #[test]
    fn test_environment_is_current_during_test() {
        let suite = TestSuite::new("current").with_test(TestCase::new("free fns", |_| {
            crate::environment::pause()?;
            assert!(crate::environment::main_scheduler()?.is_paused());
            Ok(())
        }));
        let harness = SandboxHarness::new(ShadowEnvironment::new());
        assert!(harness.run(&suite).all_passed());
        assert!(ShadowEnvironment::current().is_err());
    }

    #[test]
    fn test_errors_and_panics_are_failures() {
        let suite = TestSuite::new("failures")
            .with_test(TestCase::new("error", |env| {
                let view = env.new_instance(RealClass::of(&VIEW))?;
                view.invoke(&Call::new("invalidate"))?;
                Ok(())
            }))
            .with_test(TestCase::new("panic", |_| panic!("kaboom")))
            .with_test(TestCase::new("pass", |_| Ok(())));
        let results = SandboxHarness::new(env()).run(&suite);
        assert_eq!(results.failed_count(), 2);
        assert_eq!(results.passed_count(), 1);
        let failures = results.failures();
        assert!(failures[0].error.as_deref().unwrap().contains("invalidate"));
        assert_eq!(failures[1].error.as_deref(), Some("panicked: kaboom"));
    }

    #[test]
    fn test_fail_fast_skips_remaining() {
        let suite = TestSuite::new("fast")
            .with_test(TestCase::new("fails", |_| Err(UmbraError::NoActiveEnvironment)))
            .with_test(TestCase::new("never runs", |_| Ok(())));
        let results = SandboxHarness::new(env()).with_fail_fast().run(&suite);
        assert_eq!(results.total(), 1);
        assert_eq!(results.skipped, 1);
        assert!(!results.all_passed());
    }

    #[test]
    fn test_json_report() {
        let suite = TestSuite::new("json").with_test(TestCase::new("ok", |_| Ok(())));
        let json = SandboxHarness::new(env()).run(&suite).to_json().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["suite_name"], "json");
        assert_eq!(parsed["results"][0]["passed"], true);
    }
}
