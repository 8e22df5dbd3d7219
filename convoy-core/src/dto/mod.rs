//! Data Transfer Objects for the runner API
//!
//! Lightweight request/response shapes exchanged between the runner's HTTP
//! API and its clients.

pub mod run;
