// CLI surface (spec.md §6, SPEC_FULL.md §10.5). Thin by design: this
// module only parses arguments into typed values; `main.rs` translates
// them into `orchestrator` calls and maps the returned `Result` to an
// exit code. Mirrors the teacher's `main.rs` `Cli`/`Commands` derive
// shape (see the old `Cli`/`Commands` that used to live there), adapted
// to spec.md §6's command surface.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "tpm")]
#[command(about = "A minimal package manager for GitHub-released CLI tools on the Termux prefix")]
pub struct Cli {
    /// Enables detailed debug output.
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Enables verbose output (info-level progress messages).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Proceed even when a precondition (e.g. "already installed") would
    /// otherwise stop the operation.
    #[arg(long, global = true)]
    pub force: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Install a tool from its latest GitHub release.
    Install {
        /// `owner/repo` identifying the tool.
        tool: String,
    },
    /// Update one tool, or every installed tool with `--all`.
    Update {
        /// `owner/repo` identifying the tool. Omit when using `--all`.
        tool: Option<String>,
        /// Update every installed tool; per-tool failures are reported
        /// without aborting the remaining tools.
        #[arg(long)]
        all: bool,
    },
    /// Remove an installed tool.
    Remove {
        /// `owner/repo` identifying the tool.
        tool: String,
    },
    /// Show details about one installed tool.
    Info {
        /// `owner/repo` identifying the tool.
        tool: String,
    },
    /// List installed tools.
    List {
        /// Show version, binary path, and install timestamp per tool.
        #[arg(long)]
        verbose: bool,
    },
    /// Recreate broken `PATH` symlinks and report store inconsistencies.
    Repair,
    /// Prune old store versions beyond the retention policy for every tool.
    Cleanup,
    /// Print the tpm version.
    Version,
}
