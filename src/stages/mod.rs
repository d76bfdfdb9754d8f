//! The stage protocol: how the pipeline orchestrator hands work to us.
//!
//! A stage gets a tree to operate on, stage-specific options (already
//! validated against the stage's schema upstream), and, for stages that
//! produce artifacts, an output directory. It either returns cleanly or the
//! whole invocation counts as failed.

pub mod ostree;
pub mod tar;

use crate::run::Runner;
use color_eyre::{eyre::bail, eyre::WrapErr, Result};
use serde::de::DeserializeOwned;
use serde_derive::{Deserialize, Serialize};
use std::path::PathBuf;

/// One stage invocation as handed over by the orchestrator.
#[derive(Deserialize, Debug, Clone, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct StageRequest {
	/// The OS root being built.
	pub tree: PathBuf,
	/// Where artifact-producing stages put their output.
	#[serde(default)]
	pub output_dir: Option<PathBuf>,
	/// Stage-specific options.
	#[serde(default)]
	pub options: serde_json::Value,
}

/// A single synchronous pipeline stage.
pub trait Stage {
	fn run(&self, request: &StageRequest, runner: &dyn Runner) -> Result<()>;
}

/// Unrecoverable stage failures. Nothing here is retried; every variant
/// aborts the stage and surfaces to the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
	#[error("`{command}` exited with code {code}")]
	Invocation { command: String, code: i32 },
	#[error("provisioning var/{target} failed with code {code}")]
	Provisioning { target: String, code: i32 },
}

fn options<T: DeserializeOwned>(request: &StageRequest) -> Result<T> {
	serde_json::from_value(request.options.clone()).wrap_err("Malformed stage options")
}

/// Look up a stage by name and run it against `request`.
pub fn run_stage(name: &str, request: &StageRequest, runner: &dyn Runner) -> Result<()> {
	match name {
		tar::NAME => options::<tar::TarStage>(request)?.run(request, runner),
		ostree::NAME => options::<ostree::PopulateVarStage>(request)?.run(request, runner),
		_ => bail!("Unknown stage: {name}"),
	}
}
