//! Core domain types
//!
//! This module contains the core domain structures used across Convoy services.
//! They are shared between the runner (which executes and records runs) and the
//! client/CLI (which inspect them).

pub mod build_spec;
pub mod deploy;
pub mod event;
pub mod image;
pub mod log;
pub mod run;
pub mod source;
