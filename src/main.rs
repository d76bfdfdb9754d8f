mod mount;
mod provision;
mod run;
mod stages;

use clap::Parser;
use color_eyre::Result;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Registry};

use crate::stages::StageRequest;

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct BentoCli {
	#[arg(short, long, default_value = "false")]
	verbose: bool,

	/// Stage to run
	stage: String,

	/// Stage request (JSON); read from stdin when omitted
	request: Option<PathBuf>,
}

fn main() -> Result<()> {
	if let Err(e) = dotenvy::dotenv() {
		if !e.not_found() {
			return Err(e.into());
		}
	}

	color_eyre::install()?;

	let cli = BentoCli::parse();

	// default to info level logging, override with BENTO_LOG env var
	let default_level = if cli.verbose { "debug" } else { "info" };
	let filter =
		EnvFilter::try_from_env("BENTO_LOG").unwrap_or_else(|_| EnvFilter::new(default_level));
	let fmtlyr = fmt::layer().pretty().with_filter(filter);
	let subscriber = Registry::default().with(tracing_error::ErrorLayer::default()).with(fmtlyr);
	tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

	// mount and umount need root
	sudo::escalate_if_needed().unwrap();

	let request = load_request(cli.request.as_deref())?;
	tracing::info!(stage = %cli.stage, tree = ?request.tree, "Running stage");
	stages::run_stage(&cli.stage, &request, &run::SysRunner)?;
	Ok(())
}

fn load_request(path: Option<&Path>) -> Result<StageRequest> {
	Ok(match path {
		Some(path) => serde_json::from_reader(std::fs::File::open(path)?)?,
		None => serde_json::from_reader(std::io::stdin().lock())?,
	})
}
