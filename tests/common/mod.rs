//! Instance-counting fixture shared by the integration tests.
//!
//! Counters are per thread: the test harness runs each test on its own
//! thread, so guards never observe objects created by another test.

#![allow(dead_code)]

use std::cell::Cell;

thread_local! {
    static LIVE: Cell<usize> = const { Cell::new(0) };
}

/// Install a test-mode logger once; record lifecycle is logged at trace level.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Number of `TestObject`s alive on this thread.
pub fn live_instances() -> usize {
    LIVE.with(|l| l.get())
}

#[derive(Debug)]
pub struct TestObject {
    value: i32,
}

impl TestObject {
    pub fn new(value: i32) -> Self {
        LIVE.with(|l| l.set(l.get() + 1));
        Self { value }
    }

    pub fn value(&self) -> i32 {
        self.value
    }
}

impl Clone for TestObject {
    fn clone(&self) -> Self {
        Self::new(self.value)
    }
}

impl PartialEq<i32> for TestObject {
    fn eq(&self, other: &i32) -> bool {
        self.value == *other
    }
}

impl Drop for TestObject {
    fn drop(&mut self) {
        LIVE.with(|l| {
            let n = l.get();
            assert!(n > 0, "TestObject destroyed more often than created");
            l.set(n - 1);
        });
    }
}

/// Asserts on drop that every `TestObject` created during its scope is gone.
pub struct NoNewInstancesGuard {
    baseline: usize,
}

impl NoNewInstancesGuard {
    pub fn new() -> Self {
        init_logging();
        Self {
            baseline: live_instances(),
        }
    }

    pub fn expect_no_instances(&self) {
        assert_eq!(live_instances(), self.baseline, "leaked TestObject instances");
    }
}

impl Drop for NoNewInstancesGuard {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            self.expect_no_instances();
        }
    }
}
