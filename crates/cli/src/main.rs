use anyhow::Result;
use cfi_warden::commands;
use clap::{Parser, Subcommand};

/// CFI graph and boundary-interception tooling CLI.
///
/// This CLI is a thin wrapper around `warden-core` (exposed in code as
/// `warden_core`). All substantive logic lives in the library so it can be
/// tested thoroughly and reused from other frontends.
#[derive(Parser, Debug)]
#[command(
    name = "cfi-warden",
    version,
    about = "CFG reconstruction and boundary-interception tooling for CFI monitoring",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print size and structure metrics for a serialized module graph.
    Stats {
        /// Path to a serialized graph file.
        #[arg(long)]
        graph: String,

        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Compare the edge sets of two serialized module graphs.
    ///
    /// Exits non-zero when unmasked mismatches exist; edges exercised at
    /// runtime but never predicted statically are the CFI violation signal.
    Diff {
        /// Reference (statically built) graph.
        #[arg(long)]
        left: String,

        /// Graph to compare against (e.g., reconstructed from observation).
        #[arg(long)]
        right: String,

        /// Optional path to write the full diff report as JSON.
        #[arg(long)]
        out: Option<String>,

        /// Emit the report to stdout as JSON instead of a summary.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// List the exported functions and PLT ranges of an ELF shared object.
    Exports {
        /// Path to the ELF binary.
        #[arg(long)]
        binary: String,

        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Build the wrap manifest the interception stub consumes at load time.
    ///
    /// Combines the target executable's code range (from its serialized
    /// graph) with a library's exported entry points. Only exports are
    /// wrapped, never internal static helpers.
    WrapSet {
        /// Serialized graph of the monitored target executable.
        #[arg(long)]
        target_graph: String,

        /// Path to the library ELF whose exports should be wrapped.
        #[arg(long)]
        library: String,

        /// Optional library name. Defaults to the file name.
        #[arg(long)]
        name: Option<String>,

        /// Where to write the manifest JSON.
        #[arg(long)]
        out: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Stats { graph, json } => commands::stats_command(&graph, json),
        Command::Diff { left, right, out, json } => {
            commands::diff_command(&left, &right, out.as_deref(), json)
        }
        Command::Exports { binary, json } => commands::exports_command(&binary, json),
        Command::WrapSet { target_graph, library, name, out } => {
            commands::wrap_set_command(&target_graph, &library, name, &out)
        }
    }
}
