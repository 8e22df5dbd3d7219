//! Convoy Core
//!
//! Core types and abstractions for the Convoy continuous-delivery orchestrator.
//!
//! This crate contains:
//! - Domain types: runs, source references, image descriptors, build specifications
//! - DTOs: Data transfer objects for the runner API
//! - Errors: the failure taxonomy shared by the runner, client and CLI

pub mod domain;
pub mod dto;
pub mod error;

pub use error::{ErrorKind, PipelineError};
