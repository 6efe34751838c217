// Shared harness for the integration suites; each test binary uses a subset.
#![allow(dead_code)]

pub mod harness;
