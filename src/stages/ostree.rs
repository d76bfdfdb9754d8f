//! Populate an ostree deployment's `/var` from the stateroot's shared var.
//!
//! The stateroot keeps one `var` shared between all of its deployments. We
//! bind-mount it into the target deployment for the duration of the stage,
//! fill in the standard subtree, and detach again, so the only persistent
//! effect is the contents of the shared var itself.

use crate::mount::MountGuard;
use crate::provision;
use crate::run::{Invocation, Runner};
use crate::stages::{Stage, StageError, StageRequest};
use color_eyre::{eyre::bail, Help, Result, SectionExt};
use serde_derive::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

pub const NAME: &str = "ostree-populate-var";

/// One deployment slot inside the tree's ostree layout.
#[derive(Deserialize, Debug, Clone, Serialize)]
pub struct Deployment {
	/// Stateroot (osname) holding the deployment
	pub osname: String,
	/// Ref or commit the deployment was created from
	#[serde(rename = "ref")]
	pub refspec: String,
	/// Deployment serial, 0 for the first deployment of a commit
	#[serde(default)]
	pub serial: u32,
}

/// Options: which deployment's var to populate.
#[derive(Deserialize, Debug, Clone, Serialize)]
pub struct PopulateVarStage {
	pub deployment: Deployment,
}

/// Resolve a deployment to its path under `tree`:
/// `ostree/deploy/<osname>/deploy/<commit>.<serial>`, with the commit
/// resolved through `ostree rev-parse` against the tree's repo.
pub fn deployment_path(tree: &Path, deployment: &Deployment, runner: &dyn Runner) -> Result<PathBuf> {
	let repo = tree.join("ostree/repo");
	let invocation = Invocation::new("ostree")
		.arg("rev-parse")
		.arg(format!("--repo={}", repo.display()))
		.arg(&deployment.refspec);
	let exit = runner.run(&invocation)?;
	if !exit.success() {
		let stderr = exit.stderr_lossy();
		return Err(StageError::Invocation { command: invocation.display(), code: exit.code })
			.with_section(move || stderr.header("Stderr:"));
	}
	let commit = String::from_utf8(exit.stdout)?.trim().to_owned();
	if commit.is_empty() {
		bail!("`{}` resolved {} to nothing", invocation.display(), deployment.refspec);
	}

	Ok(tree
		.join("ostree/deploy")
		.join(&deployment.osname)
		.join("deploy")
		.join(format!("{commit}.{}", deployment.serial)))
}

impl Stage for PopulateVarStage {
	fn run(&self, request: &StageRequest, runner: &dyn Runner) -> Result<()> {
		let dep = &self.deployment;
		if dep.osname.is_empty() || dep.refspec.is_empty() {
			bail!("A deployment needs a non-empty osname and ref");
		}

		let deployment = deployment_path(&request.tree, dep, runner)?;
		let shared_var = request.tree.join("ostree/deploy").join(&dep.osname).join("var");

		info!(deployment = ?deployment, "Populating deployment var");
		let mut guard = MountGuard::new(runner);
		guard.mount(&shared_var, &deployment.join("var"), true, false, Some("0755"))?;
		provision::populate_var(&deployment, runner)?;
		guard.unmount_all()?;
		Ok(())
	}
}
