//! Behavior tests
//!
//! Organized by component

mod helpers;
mod native_tests;
