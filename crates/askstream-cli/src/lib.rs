pub mod commands;
pub mod error;
pub mod logging;
pub mod output;

pub use commands::{AskCommand, HistoryCommand};
pub use error::{CliError, CliResult};
pub use output::{OutputFormat, format_timestamp, truncate_string};
