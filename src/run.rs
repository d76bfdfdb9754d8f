use color_eyre::{eyre::bail, Result};
use std::{
	ffi::{OsStr, OsString},
	process::{Command, Stdio},
};

/// A fully-described external command: program, arguments, and environment
/// overrides that apply to the child process only.
#[derive(Debug, Clone, Default)]
pub struct Invocation {
	pub program: OsString,
	pub args: Vec<OsString>,
	pub env: Vec<(OsString, OsString)>,
}

impl Invocation {
	pub fn new(program: impl AsRef<OsStr>) -> Self {
		Self { program: program.as_ref().to_os_string(), args: vec![], env: vec![] }
	}

	#[must_use]
	pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
		self.args.push(arg.as_ref().to_os_string());
		self
	}

	#[must_use]
	pub fn args<I, S>(mut self, args: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: AsRef<OsStr>,
	{
		self.args.extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
		self
	}

	#[must_use]
	pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
		self.env.push((key.as_ref().to_os_string(), value.as_ref().to_os_string()));
		self
	}

	/// Lossy rendition for logs and error messages.
	pub fn display(&self) -> String {
		let mut s = self.program.to_string_lossy().into_owned();
		for arg in &self.args {
			s.push(' ');
			s.push_str(&arg.to_string_lossy());
		}
		s
	}
}

/// Exit state of a finished command.
#[derive(Debug, Clone, Default)]
pub struct Exit {
	pub code: i32,
	pub stdout: Vec<u8>,
	pub stderr: Vec<u8>,
}

impl Exit {
	#[must_use]
	pub const fn success(&self) -> bool {
		self.code == 0
	}

	/// Captured stderr, rendered for error reports.
	#[must_use]
	pub fn stderr_lossy(&self) -> String {
		String::from_utf8_lossy(&self.stderr).trim().to_owned()
	}
}

/// Runs a command to completion and reports how it went.
///
/// `Err` is reserved for failing to run the command at all; a nonzero exit
/// comes back as an `Ok` [`Exit`] for the caller to judge, since some tools
/// (notably systemd-tmpfiles) have exit codes that are not failures.
pub trait Runner {
	fn run(&self, invocation: &Invocation) -> Result<Exit>;
}

/// Executes commands on the host, blocking until they finish.
pub struct SysRunner;

impl Runner for SysRunner {
	fn run(&self, invocation: &Invocation) -> Result<Exit> {
		tracing::debug!("# {}", invocation.display());
		let out = Command::new(&invocation.program)
			.args(&invocation.args)
			.envs(invocation.env.iter().map(|(k, v)| (k.as_os_str(), v.as_os_str())))
			.stdin(Stdio::null())
			.output()?;
		let Some(code) = out.status.code() else {
			bail!("`{}` was terminated by a signal", invocation.display());
		};
		Ok(Exit { code, stdout: out.stdout, stderr: out.stderr })
	}
}
