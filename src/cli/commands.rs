use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "venue-reconcile")]
#[command(about = "Balance reconciliation for a venue's membership cards on the booking platform")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Reconcile every member and the venue as a whole
    All {
        /// Only count records on or after this date (YYYY-MM-DD)
        #[arg(short, long)]
        since: Option<String>,

        /// Members reconciled at once (1-4)
        #[arg(short, long)]
        concurrency: Option<usize>,

        /// Number of unbalanced members to list
        #[arg(short, long, default_value = "20")]
        top: usize,

        /// Don't write the JSON report
        #[arg(long)]
        no_export: bool,
    },

    /// Reconcile a single member
    Member {
        /// Platform member id
        id: String,

        /// Only count records on or after this date (YYYY-MM-DD)
        #[arg(short, long)]
        since: Option<String>,

        /// Print every payment and unparsed ledger entry
        #[arg(short, long)]
        verbose: bool,
    },

    /// Check that the configured token is accepted by the platform
    CheckToken,

    /// Print the effective configuration (token redacted)
    ShowConfig,
}
