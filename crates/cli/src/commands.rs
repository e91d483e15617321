use clap::{Args, Subcommand};
use std::path::PathBuf;

#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    #[arg(
        long,
        help = "Config file path (defaults to ~/.config/voxbatch/config.json when present)"
    )]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fetch, process and publish batches until the bucket is exhausted
    Run {
        #[command(flatten)]
        config: ConfigArgs,

        #[arg(long, help = "Stop after this many committed cycles")]
        max_cycles: Option<u64>,

        #[arg(
            long,
            num_args = 1..,
            allow_hyphen_values = true,
            value_name = "ARGV",
            help = "Processing command and its arguments, overrides processing.command"
        )]
        step_cmd: Vec<String>,

        #[arg(long, help = "Do not publish the metadata dir when the run ends")]
        skip_metadata: bool,

        #[arg(long, help = "Count admissible objects before the first cycle")]
        count: bool,

        #[arg(long, help = "Print the run summary as JSON")]
        json: bool,
    },
    /// Show the progress ledger
    Progress {
        #[command(flatten)]
        config: ConfigArgs,

        #[arg(
            long,
            help = "If set, prints the progress information as JSON instead of a table"
        )]
        json: bool,
    },
    /// Count admissible remote objects and store the total in the ledger
    Count {
        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Forget the listing cursor so the next run starts from the beginning
    Reset {
        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Push the metadata dir to the store without running any cycle
    PublishMetadata {
        #[command(flatten)]
        config: ConfigArgs,
    },
}
