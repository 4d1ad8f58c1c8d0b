//! Integration test crate for Kodan.
//!
//! Holds cross-crate tests only. Pipeline tests drive the real job runner
//! against shell scripts that stand in for the external tools, so they run
//! on unix only.

#[cfg(test)]
mod renumbering;

#[cfg(all(test, unix))]
mod fixture;

#[cfg(all(test, unix))]
mod pipeline;
