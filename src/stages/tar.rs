//! Pack a tree into a single (optionally compressed) tar artifact.

use crate::run::{Invocation, Runner};
use crate::stages::{Stage, StageError, StageRequest};
use color_eyre::{eyre::bail, Help, Result, SectionExt};
use serde_derive::{Deserialize, Serialize};
use tracing::info;

pub const NAME: &str = "tar";

const fn _default_true() -> bool {
	true
}

/// Archive format, handed to `--format` as-is.
#[derive(Deserialize, Debug, Clone, Copy, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TarFormat {
	#[default]
	Gnu,
	Oldgnu,
	Posix,
	Ustar,
	V7,
}

impl TarFormat {
	const fn as_flag(self) -> &'static str {
		match self {
			Self::Gnu => "gnu",
			Self::Oldgnu => "oldgnu",
			Self::Posix => "posix",
			Self::Ustar => "ustar",
			Self::V7 => "v7",
		}
	}
}

/// Whether the tree root itself becomes an archive member.
///
/// `Include` archives `.`, so every member carries a `./` prefix; `Omit`
/// archives each immediate child by name instead. The two produce
/// differently-shaped member names throughout the archive, not just a
/// different flag, so they are not interchangeable after the fact.
#[derive(Deserialize, Debug, Clone, Copy, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RootNode {
	#[default]
	Include,
	Omit,
}

/// Options for the tar stage.
#[derive(Deserialize, Debug, Clone, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TarStage {
	/// Output file name, relative to the output directory.
	/// A leading slash is stripped rather than honored.
	pub filename: String,
	#[serde(default)]
	pub format: TarFormat,
	/// Preserve POSIX ACLs
	#[serde(default = "_default_true")]
	pub acls: bool,
	/// Preserve SELinux contexts
	#[serde(default = "_default_true")]
	pub selinux: bool,
	/// Preserve extended attributes
	#[serde(default = "_default_true")]
	pub xattrs: bool,
	#[serde(default)]
	pub root_node: RootNode,
}

impl TarStage {
	fn extra_flags(&self) -> Vec<&'static str> {
		let mut flags = Vec::new();
		if self.acls {
			flags.push("--acls");
		}
		if self.selinux {
			flags.push("--selinux");
		}
		if self.xattrs {
			flags.push("--xattrs");
			flags.push("--xattrs-include=*");
		}
		flags
	}
}

impl Stage for TarStage {
	fn run(&self, request: &StageRequest, runner: &dyn Runner) -> Result<()> {
		let Some(output_dir) = &request.output_dir else {
			bail!("The tar stage needs an output directory");
		};
		let output = output_dir.join(self.filename.trim_start_matches('/'));

		let mut invocation = Invocation::new("tar")
			.arg(format!("--format={}", self.format.as_flag()))
			.args(self.extra_flags())
			// codec picked from the filename suffix
			.arg("--auto-compress")
			.arg("-cf")
			.arg(&output)
			.arg("-C")
			.arg(&request.tree)
			// let the compressor use every core, child env only
			.env("XZ_OPT", "--threads=0");

		invocation = match self.root_node {
			RootNode::Include => invocation.arg("."),
			RootNode::Omit => {
				// member order is whatever the directory listing yields
				let mut invocation = invocation;
				for entry in std::fs::read_dir(&request.tree)? {
					invocation = invocation.arg(entry?.file_name());
				}
				invocation
			},
		};

		info!(output = ?output, "Packing tree");
		let exit = runner.run(&invocation)?;
		if !exit.success() {
			let stderr = exit.stderr_lossy();
			return Err(StageError::Invocation { command: invocation.display(), code: exit.code })
				.with_section(move || stderr.header("Stderr:"));
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::run::testing::ScriptedRunner;
	use serde_json::json;
	use std::path::Path;

	fn stage(options: serde_json::Value) -> TarStage {
		serde_json::from_value(options).unwrap()
	}

	fn request(tree: &Path, output_dir: &Path) -> StageRequest {
		StageRequest {
			tree: tree.to_path_buf(),
			output_dir: Some(output_dir.to_path_buf()),
			options: serde_json::Value::Null,
		}
	}

	fn tar_args(runner: &ScriptedRunner) -> Vec<String> {
		let calls = runner.calls.borrow();
		calls[0].args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
	}

	#[test]
	fn defaults_match_the_schema() {
		let stage = stage(json!({"filename": "tree.tar"}));
		assert_eq!(stage.format, TarFormat::Gnu);
		assert!(stage.acls && stage.selinux && stage.xattrs);
		assert_eq!(stage.root_node, RootNode::Include);
	}

	#[test]
	fn every_flag_subset_maps_exactly() {
		let tree = tempfile::tempdir().unwrap();
		let out = tempfile::tempdir().unwrap();
		for bits in 0..8u8 {
			let (acls, selinux, xattrs) = (bits & 1 != 0, bits & 2 != 0, bits & 4 != 0);
			let stage = stage(json!({
				"filename": "tree.tar",
				"acls": acls,
				"selinux": selinux,
				"xattrs": xattrs,
			}));
			let runner = ScriptedRunner::new();
			stage.run(&request(tree.path(), out.path()), &runner).unwrap();

			let args = tar_args(&runner);
			assert_eq!(args.contains(&"--acls".to_owned()), acls);
			assert_eq!(args.contains(&"--selinux".to_owned()), selinux);
			assert_eq!(args.contains(&"--xattrs".to_owned()), xattrs);
			assert_eq!(args.contains(&"--xattrs-include=*".to_owned()), xattrs);
		}
	}

	#[test]
	fn leading_slash_is_stripped() {
		let tree = tempfile::tempdir().unwrap();
		let out = tempfile::tempdir().unwrap();
		let runner = ScriptedRunner::new();
		stage(json!({"filename": "/tree.tar.gz"}))
			.run(&request(tree.path(), out.path()), &runner)
			.unwrap();

		let expected = out.path().join("tree.tar.gz").display().to_string();
		assert!(tar_args(&runner).contains(&expected));
	}

	#[test]
	fn include_root_archives_dot() {
		let tree = tempfile::tempdir().unwrap();
		std::fs::write(tree.path().join("a.txt"), "a").unwrap();
		let out = tempfile::tempdir().unwrap();
		let runner = ScriptedRunner::new();
		stage(json!({"filename": "tree.tar"}))
			.run(&request(tree.path(), out.path()), &runner)
			.unwrap();

		assert_eq!(tar_args(&runner).last().map(String::as_str), Some("."));
	}

	#[test]
	fn omit_root_lists_the_children() {
		let tree = tempfile::tempdir().unwrap();
		std::fs::write(tree.path().join("a.txt"), "a").unwrap();
		std::fs::create_dir(tree.path().join("etc")).unwrap();
		let out = tempfile::tempdir().unwrap();
		let runner = ScriptedRunner::new();
		stage(json!({"filename": "tree.tar", "root-node": "omit"}))
			.run(&request(tree.path(), out.path()), &runner)
			.unwrap();

		let args = tar_args(&runner);
		let tree_flag = args.iter().position(|a| a == "-C").unwrap();
		let mut members: Vec<_> = args[tree_flag + 2..].to_vec();
		members.sort();
		assert_eq!(members, vec!["a.txt", "etc"]);
	}

	#[test]
	fn compressor_parallelism_is_child_env_only() {
		let tree = tempfile::tempdir().unwrap();
		let out = tempfile::tempdir().unwrap();
		let runner = ScriptedRunner::new();
		stage(json!({"filename": "tree.tar.xz"}))
			.run(&request(tree.path(), out.path()), &runner)
			.unwrap();

		let calls = runner.calls.borrow();
		assert!(calls[0]
			.env
			.iter()
			.any(|(k, v)| k == "XZ_OPT" && v == "--threads=0"));
	}

	#[test]
	fn nonzero_tar_exit_is_fatal() {
		let tree = tempfile::tempdir().unwrap();
		let out = tempfile::tempdir().unwrap();
		let runner = ScriptedRunner::new();
		runner.script_code(2);
		let err = stage(json!({"filename": "tree.tar"}))
			.run(&request(tree.path(), out.path()), &runner)
			.unwrap_err();
		assert!(matches!(
			err.downcast_ref::<StageError>(),
			Some(StageError::Invocation { code: 2, .. })
		));
	}

	#[test]
	fn missing_output_dir_is_rejected() {
		let tree = tempfile::tempdir().unwrap();
		let runner = ScriptedRunner::new();
		let mut request = request(tree.path(), Path::new("/unused"));
		request.output_dir = None;
		assert!(stage(json!({"filename": "tree.tar"})).run(&request, &runner).is_err());
		assert!(runner.commands().is_empty());
	}

	#[test]
	fn ustar_without_acls_archives_a_single_bare_member() {
		let tree = tempfile::tempdir().unwrap();
		std::fs::write(tree.path().join("a.txt"), "a").unwrap();
		let out = tempfile::tempdir().unwrap();
		let runner = ScriptedRunner::new();
		stage(json!({
			"filename": "tree.tar",
			"root-node": "omit",
			"format": "ustar",
			"acls": false,
		}))
		.run(&request(tree.path(), out.path()), &runner)
		.unwrap();

		let args = tar_args(&runner);
		assert!(args.contains(&"--format=ustar".to_owned()));
		assert!(!args.contains(&"--acls".to_owned()));
		assert_eq!(args.last().map(String::as_str), Some("a.txt"));
	}
}
