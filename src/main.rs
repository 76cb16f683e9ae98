// tpm — a minimal package manager for GitHub-released CLI tools on the
// Termux prefix. `main.rs` stays a thin dispatcher: it parses CLI
// arguments, resolves configuration, and translates each subcommand into
// one or more `orchestrator` calls, mapping the returned `Result` to a
// process exit code (spec.md §6).

mod cli;
mod config;
mod error;
mod fsutil;
mod lock;
mod logger;
mod manifest;
mod orchestrator;
mod resolver;
mod schema;
mod signals;
mod store;
mod transaction;

use std::process::ExitCode;

use clap::Parser;
use colored::Colorize;

use cli::{Cli, Commands};
use config::Config;
use error::{Result, TpmError};
use manifest::Manifest;
use resolver::{Resolver, UreqTransport};
use schema::ToolId;

fn main() -> ExitCode {
    let cli = Cli::parse();
    logger::init(cli.debug || cli.verbose);
    signals::install_handler();

    let config = match Config::resolve() {
        Ok(c) => c,
        Err(e) => {
            log_error!("{e}");
            return ExitCode::from(e.exit_code() as u8);
        }
    };
    logger::init_color(config.color.as_str());

    match run(&cli, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log_error!("{e}");
            if let TpmError::TransactionAborted { failed_steps, .. } = &e {
                if *failed_steps > 0 {
                    log_warn!("rollback completed with {failed_steps} failed step(s); the store or PATH may need `tpm repair`");
                }
            }
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

fn run(cli: &Cli, config: &Config) -> Result<()> {
    match &cli.command {
        Commands::Version => {
            println!("tpm {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Install { tool } => {
            let id: ToolId = tool.parse()?;
            let mut manifest = Manifest::load(&config.manifest_file)?;
            let resolver = Resolver::<UreqTransport>::new(config);
            let report = orchestrator::install(config, &resolver, &mut manifest, &id, cli.force)?;
            log_info!(
                "installed {} {} -> {}",
                report.tool.to_string().bold(),
                report.version,
                report.symlink_path.display()
            );
            Ok(())
        }
        Commands::Update { tool, all } => {
            let mut manifest = Manifest::load(&config.manifest_file)?;
            let resolver = Resolver::<UreqTransport>::new(config);

            if *all {
                let results = orchestrator::update_all(config, &resolver, &mut manifest)?;
                let mut any_failed = false;
                for (id, outcome) in results {
                    match outcome {
                        Ok(Some(report)) => log_info!("updated {id} to {}", report.version),
                        Ok(None) => log_info!("{id} already up to date"),
                        Err(e) => {
                            any_failed = true;
                            log_error!("{id}: {e}");
                        }
                    }
                }
                if any_failed {
                    log_warn!("one or more tools failed to update; see above");
                    return Err(TpmError::Internal("partial failure during `update --all`".to_string()));
                }
                Ok(())
            } else {
                let tool = tool
                    .clone()
                    .ok_or_else(|| TpmError::Usage("`update` requires a tool id, or use --all".to_string()))?;
                let id: ToolId = tool.parse()?;
                match orchestrator::update(config, &resolver, &mut manifest, &id)? {
                    Some(report) => log_info!("updated {id} to {}", report.version),
                    None => log_info!("{id} already up to date"),
                }
                Ok(())
            }
        }
        Commands::Remove { tool } => {
            let id: ToolId = tool.parse()?;
            let mut manifest = Manifest::load(&config.manifest_file)?;
            orchestrator::remove(config, &mut manifest, &id)?;
            log_info!("removed {id}");
            Ok(())
        }
        Commands::Info { tool } => {
            let id: ToolId = tool.parse()?;
            let manifest = Manifest::load(&config.manifest_file)?;
            let record = orchestrator::info(&manifest, &id)?;
            println!("tool:          {}", record.tool);
            println!("version:       {}", record.version);
            println!("binary:        {}", record.binary);
            println!("store_path:    {}", record.store_path);
            println!("symlink_path:  {}", record.symlink_path);
            println!("installed_at:  {}", record.installed_at);
            if let Some(checksum) = &record.checksum {
                println!("checksum:      {checksum}");
            }
            Ok(())
        }
        Commands::List { verbose } => {
            let manifest = Manifest::load(&config.manifest_file)?;
            let tools = orchestrator::list(&manifest);
            if tools.is_empty() {
                log_info!("no tools installed");
                return Ok(());
            }
            if *verbose {
                let mut table = prettytable::Table::new();
                table.add_row(prettytable::row!["TOOL", "VERSION", "BINARY", "INSTALLED"]);
                for tool in tools {
                    table.add_row(prettytable::row![tool.tool, tool.version, tool.binary, tool.installed_at]);
                }
                table.printstd();
            } else {
                for tool in tools {
                    println!("{} {}", tool.tool, tool.version);
                }
            }
            Ok(())
        }
        Commands::Repair => {
            let mut manifest = Manifest::load(&config.manifest_file)?;
            let report = orchestrator::repair(config, &mut manifest)?;
            log_info!("repaired {} symlink(s)", report.symlinks_repaired);
            if report.store_errors.is_empty() {
                log_info!("store is consistent");
            } else {
                for error in &report.store_errors {
                    log_warn!("{error}");
                }
            }
            Ok(())
        }
        Commands::Cleanup => {
            let manifest = Manifest::load(&config.manifest_file)?;
            let pruned = orchestrator::cleanup(config, &manifest)?;
            log_info!("pruned {pruned} old version directory(ies)");
            Ok(())
        }
    }
}
