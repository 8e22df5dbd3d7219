//! Build specification
//!
//! The build procedure is described declaratively as four ordered phases of
//! shell steps. The runner executes it; the CLI can print it. Specifications
//! are built once per run and never modified afterwards.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::domain::image::{LATEST_TAG, RepositoryUri};
use crate::domain::source::SourceKind;

/// Build specification format version
pub const BUILD_SPEC_VERSION: &str = "0.2";

/// Build phases, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseName {
    Install,
    PreBuild,
    Build,
    PostBuild,
}

impl PhaseName {
    pub const ALL: [PhaseName; 4] = [
        PhaseName::Install,
        PhaseName::PreBuild,
        PhaseName::Build,
        PhaseName::PostBuild,
    ];
}

impl fmt::Display for PhaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhaseName::Install => write!(f, "install"),
            PhaseName::PreBuild => write!(f, "pre_build"),
            PhaseName::Build => write!(f, "build"),
            PhaseName::PostBuild => write!(f, "post_build"),
        }
    }
}

/// A single shell-level step
///
/// The variant tells the executor how to classify a failure and whether the
/// step leaves an external side effect behind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "command", rename_all = "snake_case")]
pub enum Step {
    /// Registry credential exchange and login
    Auth(String),
    /// Any other command
    Run(String),
    /// Image push; irreversible once it completes
    Push(String),
}

impl Step {
    pub fn command(&self) -> &str {
        match self {
            Step::Auth(cmd) | Step::Run(cmd) | Step::Push(cmd) => cmd,
        }
    }
}

/// One phase and its ordered steps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase {
    pub name: PhaseName,
    pub steps: Vec<Step>,
}

/// Inputs the build specification is rendered from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildParameters {
    /// Container name inside the service; becomes the descriptor `name`
    pub service_name: String,
    /// Registry region, exported as `REGION`
    pub region: String,
    /// Target image repository
    pub repository: RepositoryUri,
    /// Container engine binary (`podman`, `docker`)
    pub engine: String,
    /// Commands run during the install phase (toolchain setup)
    #[serde(default)]
    pub install: Vec<String>,
    /// Overrides the registry login command
    #[serde(default)]
    pub login_command: Option<String>,
}

impl BuildParameters {
    /// Login command exchanging short-lived credentials for a registry session
    pub fn login(&self) -> String {
        self.login_command.clone().unwrap_or_else(|| {
            format!(
                "aws ecr get-login-password --region $REGION | {} login --username AWS --password-stdin {}",
                self.engine, self.repository.registry
            )
        })
    }
}

/// Declarative build procedure for one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSpecification {
    version: String,
    env: BTreeMap<String, String>,
    phases: Vec<Phase>,
}

impl BuildSpecification {
    /// Renders the procedure for a source kind
    ///
    /// VCS sources build from the checked-out tree and push both `latest` and
    /// `$IMAGE_TAG`. Registry sources promote the image currently tagged
    /// `latest` under `$IMAGE_TAG` and push only that tag; they never rebuild.
    pub fn for_source(kind: SourceKind, params: &BuildParameters) -> Self {
        let engine = &params.engine;
        let latest = params.repository.image(LATEST_TAG);
        let tagged = params.repository.image("$IMAGE_TAG");

        let install = params.install.iter().cloned().map(Step::Run).collect();

        let pre_build = vec![
            Step::Run("echo Login to registry ...".to_string()),
            Step::Auth(params.login()),
        ];

        let (build, post_build) = match kind {
            SourceKind::Vcs => (
                vec![
                    Step::Run("echo Build image with tag $IMAGE_TAG".to_string()),
                    Step::Run(format!("{} build -t {} .", engine, latest)),
                    Step::Run(format!("{} tag {} {}", engine, latest, tagged)),
                ],
                vec![
                    Step::Run("echo Pushing images ...".to_string()),
                    Step::Push(format!("{} push {}", engine, latest)),
                    Step::Push(format!("{} push {}", engine, tagged)),
                ],
            ),
            SourceKind::Registry => (
                vec![
                    Step::Run(format!("echo Promote {} as $IMAGE_TAG", latest)),
                    Step::Run(format!("{} pull {}", engine, latest)),
                    Step::Run(format!("{} tag {} {}", engine, latest, tagged)),
                ],
                vec![
                    Step::Run("echo Pushing image ...".to_string()),
                    Step::Push(format!("{} push {}", engine, tagged)),
                ],
            ),
        };

        let mut env = BTreeMap::new();
        env.insert("REGION".to_string(), params.region.clone());

        Self {
            version: BUILD_SPEC_VERSION.to_string(),
            env,
            phases: vec![
                Phase {
                    name: PhaseName::Install,
                    steps: install,
                },
                Phase {
                    name: PhaseName::PreBuild,
                    steps: pre_build,
                },
                Phase {
                    name: PhaseName::Build,
                    steps: build,
                },
                Phase {
                    name: PhaseName::PostBuild,
                    steps: post_build,
                },
            ],
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Environment exported to every step
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn phase(&self, name: PhaseName) -> Option<&Phase> {
        self.phases.iter().find(|p| p.name == name)
    }

    /// All steps in execution order, with their phase
    pub fn steps(&self) -> impl Iterator<Item = (PhaseName, &Step)> {
        self.phases
            .iter()
            .flat_map(|phase| phase.steps.iter().map(move |step| (phase.name, step)))
    }
}
