pub mod commands;
pub mod error;
pub mod output;

pub use commands::{ConsolidateCommand, RecallCommand, ShowCommand, StatsCommand, StoreCommand};
pub use error::{CliError, CliResult};
pub use output::{OutputFormat, format_timestamp, format_tiers, truncate_string};
