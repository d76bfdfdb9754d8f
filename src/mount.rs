//! Scoped mount management for stages that need transient bind mounts.

use crate::run::{Invocation, Runner};
use crate::stages::StageError;
use color_eyre::{Help, Result, SectionExt};
use itertools::Itertools;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One active mount performed through a [`MountGuard`].
#[derive(Debug, Clone)]
pub struct MountRecord {
	pub source: PathBuf,
	pub target: PathBuf,
	pub options: Vec<String>,
}

/// A stack of mounts that never outlive their scope.
///
/// Every successful [`MountGuard::mount`] pushes a record; [`MountGuard::unmount_all`]
/// pops them and lazily detaches each in reverse order. Dropping the guard
/// unwinds whatever is still on the stack, so an error raised mid-stage can
/// not leak a mount. Stages should still call `unmount_all` explicitly on
/// their success path, where an unmount failure must abort the stage.
pub struct MountGuard<'r> {
	runner: &'r dyn Runner,
	stack: Vec<MountRecord>,
}

impl<'r> MountGuard<'r> {
	pub fn new(runner: &'r dyn Runner) -> Self {
		Self { runner, stack: Vec::new() }
	}

	/// Mount `source` onto `target` with private propagation.
	pub fn mount(
		&mut self, source: &Path, target: &Path, bind: bool, ro: bool, mode: Option<&str>,
	) -> Result<()> {
		let mut options = Vec::new();
		if bind {
			options.push("bind".to_owned());
		}
		if ro {
			options.push("ro".to_owned());
		}
		if let Some(mode) = mode {
			options.push(format!("mode={mode}"));
		}

		let mut invocation = Invocation::new("mount").arg("--make-private");
		if !options.is_empty() {
			invocation = invocation.arg("-o").arg(options.iter().join(","));
		}
		let invocation = invocation.arg(source).arg(target);

		let exit = self.runner.run(&invocation)?;
		if !exit.success() {
			let stderr = exit.stderr_lossy();
			return Err(StageError::Invocation { command: invocation.display(), code: exit.code })
				.with_section(move || stderr.header("Stderr:"));
		}
		debug!(?source, ?target, "Mounted");
		self.stack.push(MountRecord {
			source: source.to_path_buf(),
			target: target.to_path_buf(),
			options,
		});
		Ok(())
	}

	/// Unmount every recorded mount, newest first, with lazy detach so the
	/// call never blocks on a busy target. Safe to call with nothing mounted.
	pub fn unmount_all(&mut self) -> Result<()> {
		while let Some(record) = self.stack.pop() {
			let invocation = Invocation::new("umount").arg("--lazy").arg(&record.target);
			let exit = self.runner.run(&invocation)?;
			if !exit.success() {
				let stderr = exit.stderr_lossy();
				return Err(StageError::Invocation {
					command: invocation.display(),
					code: exit.code,
				})
				.with_section(move || stderr.header("Stderr:"));
			}
			debug!(source = ?record.source, target = ?record.target, options = ?record.options, "Unmounted");
		}
		Ok(())
	}
}

impl Drop for MountGuard<'_> {
	fn drop(&mut self) {
		if let Err(e) = self.unmount_all() {
			warn!("Failed to unwind mounts: {e}");
		}
	}
}
