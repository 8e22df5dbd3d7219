//! Repository layer
//!
//! Storage for run records. The controller is the only writer; the API and
//! the CLI read through it. Trait-based so storage can be swapped or faked.

mod runs;

pub use runs::RunRepository;

pub use runs::InMemoryRunRepository;
