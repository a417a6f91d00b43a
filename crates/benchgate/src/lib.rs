#![forbid(unsafe_code)]

//! Benchmark regression gate.
//!
//! Measures a candidate revision against a baseline revision with one
//! shared set of generated test vectors, in a fixed five-step protocol:
//! generate vectors, checkout baseline, save the baseline snapshot,
//! checkout candidate preserving artifacts, measure and compare. The
//! [`gate::RegressionGate`] engine owns the protocol; the surrounding
//! modules supply trigger policy, concurrency-group supersede handling,
//! runner selection and preflight, and the report artifact.

pub mod baseline;
pub mod checkout;
pub mod env_config;
pub mod error_code;
pub mod gate;
pub mod preflight;
pub mod report;
pub mod runner;
pub mod supersede;
pub mod test_vectors;
pub mod trigger;
