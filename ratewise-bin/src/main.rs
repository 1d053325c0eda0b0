//! `ratewise` fetches URLs through an adaptive, rate-limit-aware scheduler.
//!
//! Every response's rate-limit headers feed back into the pacing of later
//! requests to the same endpoint. With several `--credential` tokens, the
//! scheduler rotates to the next token once one runs low.
//!
//! Run it inside a directory with a `ratewise.toml` to pick up endpoint
//! overrides and classification rules, or point to a configuration file with
//! `--config`.
//!
//! ```sh
//! ratewise fetch https://api.wynncraft.com/v3/player/Salted
//! ratewise fetch --queue --priority 1 https://api.nori.fish/items https://api.nori.fish/recipes
//! ratewise --format json status https://api.nori.fish/items
//! ```
#![warn(clippy::all, clippy::pedantic)]
#![warn(
    absolute_paths_not_starting_with_crate,
    rustdoc::invalid_html_tags,
    missing_copy_implementations,
    missing_debug_implementations,
    semicolon_in_expressions_from_macros,
    unreachable_pub,
    unused_extern_crates,
    variant_size_differences,
    clippy::missing_const_for_fn
)]
#![deny(anonymous_parameters, macro_use_extern_crate)]
#![deny(missing_docs)]

use std::io::{self, ErrorKind, Write};
use std::path::PathBuf;

use anyhow::{Error, Result, bail};
use clap::Parser;
use formatters::{get_report_formatter, log::init_logging};
use log::error;

#[cfg(feature = "native-tls")]
use openssl_sys as _; // required for vendored-openssl feature

use options::RATEWISE_CONFIG_FILE;
use ring as _; // required for apple silicon

mod commands;
mod formatters;
mod options;
mod report;
mod verbosity;

use crate::options::{Command, Config, RatewiseOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitCode {
    Success = 0,
    #[allow(unused)]
    UnexpectedFailure = 1,
    RequestFailure = 2,
    ConfigFile = 3,
}

fn main() -> Result<()> {
    let exit_code = run_main()?;
    std::process::exit(exit_code);
}

fn load_config() -> Result<RatewiseOptions> {
    let mut opts = RatewiseOptions::parse();

    init_logging(&opts.config.verbose);

    if let Some(config_file) = &opts.config_file {
        match Config::load_from_file(config_file) {
            Ok(c) => opts.config.merge(c),
            Err(e) => {
                bail!(
                    "Cannot load configuration file `{}`: {e:?}",
                    config_file.display()
                );
            }
        }
    } else {
        let default_config = PathBuf::from(RATEWISE_CONFIG_FILE);
        if default_config.is_file() {
            match Config::load_from_file(&default_config) {
                Ok(c) => opts.config.merge(c),
                Err(e) => {
                    bail!(
                        "Cannot load default configuration file `{}`: {e:?}",
                        default_config.display()
                    );
                }
            }
        }
    }

    Ok(opts)
}

fn run_main() -> Result<i32> {
    use std::process::exit;

    let opts = match load_config() {
        Ok(opts) => opts,
        Err(e) => {
            error!("Error while loading config: {e}");
            exit(ExitCode::ConfigFile as i32);
        }
    };

    let runtime = tokio::runtime::Runtime::new()?;

    match runtime.block_on(run(&opts)) {
        Err(e) if Some(ErrorKind::BrokenPipe) == underlying_io_error_kind(&e) => {
            exit(ExitCode::Success as i32);
        }
        res => res,
    }
}

fn underlying_io_error_kind(error: &Error) -> Option<io::ErrorKind> {
    for cause in error.chain() {
        if let Some(io_error) = cause.downcast_ref::<io::Error>() {
            return Some(io_error.kind());
        }
    }
    None
}

async fn run(opts: &RatewiseOptions) -> Result<i32> {
    let formatter = get_report_formatter(opts.config.format);

    let (output, exit_code) = match &opts.command {
        Command::Fetch(args) => {
            let report = commands::fetch(args, &opts.config).await?;
            let exit_code = if report.is_success() {
                ExitCode::Success
            } else {
                ExitCode::RequestFailure
            };
            (formatter.format_fetch(&report)?, exit_code)
        }
        Command::Status { targets } => {
            let report = commands::status(targets, &opts.config)?;
            (formatter.format_status(&report)?, ExitCode::Success)
        }
    };

    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{}", output.trim_end())?;
    stdout.flush()?;

    Ok(exit_code as i32)
}
