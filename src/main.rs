use anyhow::Context;
use clap::Parser;
use stackrec::cli::{Cli, Command};
use stackrec::commands::record::RecordOptions;
use stackrec::error::exit_code;
use std::process::ExitCode;

fn main() -> ExitCode {
    env_logger::init();

    match run() {
        Ok(()) => ExitCode::from(exit_code::SUCCESS as u8),
        Err(e) => {
            eprintln!("Error: {e:#}");
            if let Some(err) = e.downcast_ref::<stackrec::Error>() {
                ExitCode::from(err.exit_code() as u8)
            } else {
                ExitCode::from(exit_code::GENERAL_ERROR as u8)
            }
        }
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Validate CLI arguments
    cli.validate()
        .map_err(|e| anyhow::anyhow!("{}", e))
        .context("Invalid arguments")?;

    match cli.command {
        Command::Record {
            strategy,
            threads,
            pid,
            process,
            interval,
            duration,
            collect_timeout,
            output,
            force,
        } => {
            let pid = match (pid, process) {
                (Some(pid), _) => pid,
                (_, Some(name)) => stackrec::source::find_process_by_name(&name)?,
                _ => anyhow::bail!("Either --pid or --process is required for recording"),
            };
            let opts = RecordOptions {
                strategy: strategy.into(),
                threads,
                pid,
                interval,
                duration,
                collect_timeout,
                output,
                force,
            };
            stackrec::commands::record::run(&opts)?;
        }
        Command::View { file, query } => {
            stackrec::commands::view::run(&file, &query)?;
        }
        Command::List { dir } => {
            stackrec::commands::list::run(dir.as_deref())?;
        }
        Command::Completions { shell } => {
            use clap::CommandFactory;
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "stackrec", &mut std::io::stdout());
        }
    }

    Ok(())
}
