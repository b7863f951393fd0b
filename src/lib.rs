//! fw-sweep: removes empty subjects, sessions and acquisitions from a
//! Flywheel instance, leaving anything touched in the recency window alone.

pub mod cli;
pub mod config;
pub mod jobs;
pub mod logging;
pub mod services;
pub mod views;
