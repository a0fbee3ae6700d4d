use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use trading_journal_ai::config::AssistantConfig;
use trading_journal_ai::Assistant;

const USAGE: &str = "Usage:
  journal-assistant ask <question...>
  journal-assistant set-key <api-key>
  journal-assistant clear-key
  journal-assistant simplified <on|off>

The journal lives in $JOURNAL_AI_DATA_DIR (default: ./journal-data).";

fn data_dir() -> PathBuf {
    std::env::var_os("JOURNAL_AI_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("journal-data"))
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some((command, rest)) = args.split_first() else {
        println!("{}", USAGE);
        return Ok(());
    };

    let config = AssistantConfig::from_env();
    let assistant = Assistant::open(&data_dir(), config)
        .await
        .context("Failed to open the trading journal")?;

    match command.as_str() {
        "ask" => {
            if rest.is_empty() {
                bail!("Missing question\n\n{}", USAGE);
            }
            let reply = assistant.service.chat(&rest.join(" ")).await;
            if let Some(err) = &reply.error {
                log::debug!("Reply carried error: {}", err);
            }
            println!("{}", reply.text);
        }
        "set-key" => {
            let key = rest.first().context("Missing API key")?;
            if assistant.service.set_credential(key)? {
                println!("API key saved.");
            } else {
                bail!("That does not look like an API key (too short).");
            }
        }
        "clear-key" => {
            assistant.service.clear_credential()?;
            println!("API key removed.");
        }
        "simplified" => {
            let enabled = match rest.first().map(String::as_str) {
                Some("on") => true,
                Some("off") => false,
                _ => bail!("Expected 'on' or 'off'\n\n{}", USAGE),
            };
            assistant.service.set_simplified_mode(enabled)?;
            println!("Simplified mode {}.", if enabled { "enabled" } else { "disabled" });
        }
        other => bail!("Unknown command '{}'\n\n{}", other, USAGE),
    }

    assistant.shutdown().await;
    Ok(())
}
