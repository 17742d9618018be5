use std::process::exit;

use burrow_core::config::PluginConfig;
use env_logger::{Env, Target};
use log::{debug, error};
use serde::Serialize;

use crate::{
    args::{command_from_env, read_stdin, CmdArgs, Command},
    commands::{cmd_add, cmd_check, cmd_del},
    error::PluginError,
    types::{ensure_supported_version, CniError, VersionInfo, IMPLEMENTED_VERSION},
};

mod args;
mod commands;
mod error;
mod types;

const LOG_ENV: &str = "BURROW_LOG";

fn main() {
    configure_logging();

    let mut cni_version = IMPLEMENTED_VERSION.to_owned();

    if let Err(err) = run(&mut cni_version) {
        error!("{err}");
        report_error(&cni_version, &err);
        exit(1)
    }
}

// stdout belongs to the runtime, everything else goes to stderr
fn configure_logging() {
    env_logger::Builder::from_env(Env::default().filter_or(LOG_ENV, "warn"))
        .format_timestamp(None)
        .target(Target::Stderr)
        .init();
}

fn run(cni_version: &mut String) -> Result<(), PluginError> {
    let command = command_from_env()?;

    if let Command::Version = command {
        return print(&VersionInfo::default());
    }

    let args = CmdArgs::from_env(command)?;
    let config = PluginConfig::from_stdin_data(&read_stdin()?)?;

    *cni_version = config.cni_version.to_owned();
    ensure_supported_version(&config.cni_version)?;

    debug!("{command:?} for container {} ({})", args.container_id, args.if_name);

    match command {
        Command::Add => print(&cmd_add(&args, &config)?),
        Command::Del => cmd_del(&args, &config),
        Command::Check => cmd_check(&args, &config),
        Command::Version => Ok(()),
    }
}

fn print<T: Serialize>(value: &T) -> Result<(), PluginError> {
    let json = serde_json::to_string(value).map_err(PluginError::OutputError)?;

    println!("{json}");

    Ok(())
}

fn report_error(cni_version: &str, err: &PluginError) {
    let report = CniError {
        cni_version: cni_version.to_owned(),
        code: err.code(),
        msg: err.to_string(),
        details: String::new(),
    };

    if print(&report).is_err() {
        println!(
            r#"{{"cniVersion":"{cni_version}","code":{},"msg":"internal error"}}"#,
            err.code()
        );
    }
}
