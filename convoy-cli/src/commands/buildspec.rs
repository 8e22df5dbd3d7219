//! Build specification command
//!
//! Renders the build procedure a runner would execute, using the same
//! environment variables the runner reads.

use anyhow::{Context, Result};
use clap::Args;
use colored::*;
use convoy_core::domain::build_spec::{BuildParameters, BuildSpecification, Step};
use convoy_core::domain::image::RepositoryUri;
use convoy_core::domain::source::SourceKind;

/// Build specification inputs
#[derive(Args, Debug)]
pub struct BuildSpecArgs {
    /// Source kind: vcs or registry
    #[arg(long, env = "CONVOY_SOURCE_KIND", default_value = "registry")]
    pub source: SourceKind,

    /// Service container name
    #[arg(long, env = "CONVOY_SERVICE_NAME", default_value = "echo")]
    pub service_name: String,

    /// Registry host
    #[arg(long, env = "CONVOY_REGISTRY")]
    pub registry: String,

    /// Image repository inside the registry
    #[arg(long, env = "CONVOY_ECR_REPOSITORY")]
    pub repository: String,

    /// Registry region
    #[arg(long, env = "REGION", default_value = "ap-northeast-2")]
    pub region: String,

    /// Container engine binary
    #[arg(long, env = "CONVOY_ENGINE", default_value = "podman")]
    pub engine: String,

    /// Print the specification as JSON
    #[arg(long)]
    pub json: bool,
}

impl BuildSpecArgs {
    fn parameters(&self) -> BuildParameters {
        BuildParameters {
            service_name: self.service_name.clone(),
            region: self.region.clone(),
            repository: RepositoryUri::new(&self.registry, &self.repository),
            engine: self.engine.clone(),
            install: Vec::new(),
            login_command: None,
        }
    }
}

pub fn handle_buildspec_command(args: BuildSpecArgs) -> Result<()> {
    let spec = BuildSpecification::for_source(args.source, &args.parameters());

    if args.json {
        let json =
            serde_json::to_string_pretty(&spec).context("Failed to serialize build specification")?;
        println!("{}", json);
        return Ok(());
    }

    print_spec(&spec);
    Ok(())
}

fn print_spec(spec: &BuildSpecification) {
    println!("{}", format!("Build specification v{}", spec.version()).bold());

    if !spec.env().is_empty() {
        println!("\n{}", "Environment:".bold());
        for (key, value) in spec.env() {
            println!("  {} = {}", key.cyan(), value);
        }
    }

    for phase in spec.phases() {
        println!("\n{}", format!("{}:", phase.name).bold());
        for step in &phase.steps {
            let marker = match step {
                Step::Auth(_) => "auth".yellow(),
                Step::Run(_) => "run ".dimmed(),
                Step::Push(_) => "push".green(),
            };
            println!("  {} {}", marker, step.command());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: BuildSpecArgs,
    }

    #[test]
    fn test_parses_source_kind() {
        let cli = TestCli::parse_from([
            "convoy",
            "--source",
            "vcs",
            "--registry",
            "registry.local",
            "--repository",
            "echo",
        ]);
        assert_eq!(cli.args.source, SourceKind::Vcs);
        assert_eq!(
            cli.args.parameters().repository.image("latest"),
            "registry.local/echo:latest"
        );
    }

    #[test]
    fn test_rejects_unknown_source_kind() {
        let result = TestCli::try_parse_from([
            "convoy",
            "--source",
            "svn",
            "--registry",
            "registry.local",
            "--repository",
            "echo",
        ]);
        assert!(result.is_err());
    }
}
