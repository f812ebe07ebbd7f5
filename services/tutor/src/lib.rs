//! Tutor Service Library Crate
//!
//! Environment configuration, cpal-backed media adapters and terminal
//! rendering for the `tutor` binary, which is a thin wrapper around this
//! library and `tutor-core`.

pub mod audio;
pub mod audio_utils;
pub mod cli;
pub mod config;
pub mod console;
