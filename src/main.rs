#![allow(dead_code)]

use std::env;
use std::io::{stdout, Write};
use std::path::PathBuf;

use clap::{command, Parser};
use flexi_logger::{FileSpec, Logger};
use log::{error, info};

use crate::error::{WatchBoxError, WatchBoxExit};
use crate::job::JobSpec;
use crate::utils::default_format;
use crate::watchbox::run;

mod buffer;
mod error;
mod job;
mod kill;
mod memory;
mod pipe;
mod utils;
mod verdict;
mod watchbox;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
  #[arg(help = "Read the JSON job spec from this file [default: stdin]")]
  job: Option<PathBuf>,
}

fn bootstrap() -> Result<(), WatchBoxError> {
  Logger::try_with_str("watchbox=info")?
    .log_to_file(
      FileSpec::default()
        .directory(env::var("WATCHBOX_LOG").unwrap_or("./logs/".into()))
        .basename("watchbox")
        .discriminant(format!(
          "{}",
          chrono::offset::Local::now().format("%Y-%m-%d")
        ))
        .suppress_timestamp(),
    )
    .append()
    .format_for_files(default_format)
    .start()?;

  info!("Start running watchbox");

  let cli = Cli::parse();
  let job = match cli.job {
    Some(path) => JobSpec::from_path(path)?,
    None => JobSpec::from_stdin()?,
  };

  let verdict = match run(&job) {
    Ok(verdict) => verdict,
    Err(err) => {
      error!("Running watchbox failed: {}", err);
      return Err(err);
    }
  };

  // The verdict is the only thing this process may write to stdout.
  let json = verdict.to_json()?;
  stdout().write_all(json.as_bytes())?;

  info!("Running watchbox finished");
  Ok(())
}

fn main() -> WatchBoxExit {
  match bootstrap() {
    Ok(_) => WatchBoxExit::Ok,
    Err(err) => WatchBoxExit::Err(err),
  }
}
