//! Integration test crate for barbell velocity analysis.
//!
//! This crate exists solely to hold cross-crate scenario tests, driven by
//! synthetic in-memory videos.

#[cfg(test)]
mod synthetic;

#[cfg(test)]
mod scenarios;

#[cfg(test)]
mod fallback;

#[cfg(test)]
mod determinism;
