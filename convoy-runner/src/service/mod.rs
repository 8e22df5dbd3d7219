//! Service layer
//!
//! Services contain the pipeline's business logic: one per stage, the
//! deploy target, the event bus and notifier, and the controller that drives
//! runs through them.
//!
//! External effects sit behind traits (`CommandRunner`, `ServiceTarget`,
//! `RunRepository`) so every service can be exercised with fakes.

pub mod build;
pub mod deploy;
pub mod events;
pub mod notification;
pub mod pipeline;
pub mod source;
pub mod target;

pub use build::BuildStage;
pub use deploy::{DeployGate, DeploySettings, DeployStage, ServiceTarget};
pub use events::EventBus;
pub use notification::NotificationDispatcher;
pub use pipeline::{ControllerError, PipelineController, Stages};
pub use source::{RegistrySource, SourceAdapter, SourceStage, VcsSource};
pub use target::PodmanServiceTarget;
