//! Standard `/var` layout for ostree deployments.
//!
//! Mirrors what anaconda and the Fedora CoreOS dracut module create at
//! boot, so a freshly deployed tree ends up with the same subtree shape.

use crate::run::{Invocation, Runner};
use crate::stages::StageError;
use color_eyre::{Help, Result, SectionExt};
use std::path::Path;
use tracing::debug;

/// Created unconditionally as plain directories.
const BARE_DIRS: [&str; 2] = ["lib", "log"];

/// Provisioned through systemd-tmpfiles, in this order. Later entries rely
/// on earlier ones having created parent structure (`spool` before
/// `spool/mail`), so the order is load-bearing.
const TARGETS: [&str; 10] = [
	"home",
	"roothome",
	"lib/rpm",
	"opt",
	"srv",
	"usrlocal",
	"mnt",
	"media",
	"spool",
	"spool/mail",
];

/// systemd-tmpfiles: valid config, but some lines were ignored.
const TMPFILES_IGNORED_LINES: i32 = 65;

/// Ensure the standard `var` subtree exists under `deployment`.
///
/// Already-present targets are skipped, so re-running against a populated
/// deployment is a no-op. Any tmpfiles exit outside {0, 65} aborts and names
/// the failing target; 73 in particular means the directory could not be
/// created.
pub fn populate_var(deployment: &Path, runner: &dyn Runner) -> Result<()> {
	let var = deployment.join("var");
	for name in BARE_DIRS {
		std::fs::create_dir_all(var.join(name))?;
	}

	for target in TARGETS {
		if var.join(target).exists() {
			debug!(target, "Already present, skipping");
			continue;
		}
		let invocation = Invocation::new("systemd-tmpfiles")
			.arg("--create")
			.arg("--boot")
			.arg(format!("--root={}", deployment.display()))
			.arg(format!("--prefix=/var/{target}"));
		let exit = runner.run(&invocation)?;
		match exit.code {
			0 | TMPFILES_IGNORED_LINES => {},
			code => {
				let stderr = exit.stderr_lossy();
				return Err(StageError::Provisioning { target: target.to_owned(), code })
					.with_section(move || stderr.header("Stderr:"));
			},
		}
	}
	Ok(())
}
