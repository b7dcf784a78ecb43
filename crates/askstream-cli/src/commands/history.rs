use askstream::history::{HistoryEntry, HistorySink, LanceHistoryStore};
use clap::Parser;
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};

use crate::error::CliResult;
use crate::output::{OutputFormat, format_timestamp, truncate_string};

#[derive(Parser)]
pub struct HistoryCommand {
    #[clap(
        long,
        short,
        default_value = "20",
        help = "Maximum number of exchanges to display"
    )]
    pub limit: usize,
}

impl HistoryCommand {
    pub async fn execute(&self, store: &LanceHistoryStore, format: OutputFormat) -> CliResult<()> {
        let entries = store.list_recent(self.limit).await?;

        match format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            }
            OutputFormat::Table => {
                if entries.is_empty() {
                    println!("No history yet.");
                    return Ok(());
                }

                println!("{}", history_table(&entries));
                println!("\nShowing {} of {} exchanges", entries.len(), store.count().await?);
            }
        }

        Ok(())
    }
}

fn history_table(entries: &[HistoryEntry]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(["ID", "Question", "Answer", "Asked"]);

    for entry in entries {
        table.add_row([
            truncate_string(&entry.id.to_string(), 8),
            truncate_string(&entry.question, 40),
            truncate_string(&entry.answer, 60),
            format_timestamp(&entry.created_at),
        ]);
    }

    table
}
