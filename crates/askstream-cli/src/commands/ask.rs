use std::io::Write;
use std::time::Duration;

use askstream::relay::{PayloadStream, RelayError, RelayEvent};
use bytes::Bytes;
use clap::Parser;
use futures::stream::{Stream, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};

use crate::error::{CliError, CliResult};
use crate::output::OutputFormat;

#[derive(Parser)]
pub struct AskCommand {
    #[clap(help = "Question to ask")]
    pub question: String,

    #[clap(
        long,
        short,
        help = "Relay base URL (defaults to the configured listen address)"
    )]
    pub server: Option<String>,
}

impl AskCommand {
    pub async fn execute(&self, server: &str, format: OutputFormat) -> CliResult<()> {
        let url = format!("{}/ask", server.trim_end_matches('/'));

        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .map_err(|e| format!("Progress bar error: {e}"))?;
        spinner.set_style(style);
        spinner.set_message("Waiting for the first token...");
        spinner.enable_steady_tick(Duration::from_millis(100));

        let response = reqwest::Client::new()
            .post(&url)
            .json(&serde_json::json!({ "question": self.question }))
            .send()
            .await
            .map_err(|e| {
                spinner.finish_and_clear();
                CliError(format!("Failed to reach relay at {url}: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            spinner.finish_and_clear();
            let body = response.text().await.unwrap_or_default();
            return Err(CliError(format!(
                "Relay rejected the question ({status}): {}",
                error_message(&body)
            )));
        }

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| RelayError::Network(e.to_string())))
            .boxed();

        let mut stdout = std::io::stdout();
        let streaming = format == OutputFormat::Table;
        let result = read_answer(body, |token| {
            if !spinner.is_finished() {
                spinner.finish_and_clear();
            }
            if streaming {
                write!(stdout, "{token}")?;
                stdout.flush()?;
            }
            Ok(())
        })
        .await;
        spinner.finish_and_clear();

        let answer = result?;
        match format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "question": &self.question,
                    "answer": answer,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Table => println!(),
        }

        Ok(())
    }
}

/// Consume a relay event stream, calling `on_token` for every token in order
///
/// Returns the full answer once the terminator arrives. An error event, a
/// stream that ends without the terminator, or a failing `on_token` (a closed
/// stdout, say) is an error and stops reading.
pub async fn read_answer<S>(
    body: S,
    mut on_token: impl FnMut(&str) -> std::io::Result<()>,
) -> CliResult<String>
where
    S: Stream<Item = Result<Bytes, RelayError>> + Unpin,
{
    let mut payloads = PayloadStream::new(body);
    let mut answer = String::new();

    while let Some(payload) = payloads.next().await {
        match RelayEvent::from_payload(&payload?) {
            Some(RelayEvent::Token(token)) => {
                on_token(&token)?;
                answer.push_str(&token);
            }
            Some(RelayEvent::Error(message)) => {
                return Err(CliError(format!("Relay reported an error: {message}")));
            }
            Some(RelayEvent::Done) => return Ok(answer),
            None => continue,
        }
    }

    Err(CliError(
        "Connection closed before the answer completed".to_string(),
    ))
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}
