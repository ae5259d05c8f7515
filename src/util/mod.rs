//! Small helpers shared by tests and fixtures

pub mod random;
