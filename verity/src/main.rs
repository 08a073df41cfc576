//! # verity
//!
//! A small utility to sculpt, inspect and key Verity cubes

#![warn(missing_docs, clippy::unwrap_used, clippy::expect_used)]

use std::process::exit;

use clap::Parser;
use cube::definitions::params::CubeFamily;
use cube::keys::CubeKey;
use owo_colors::OwoColorize;
use tokio::io::AsyncReadExt;
use tracing::error;
use verity::utils::formatting::format_report;
use verity::{inspect, keygen, sculpt, SculptOptions};
use veritum::ExchangePublicKey;

use crate::cli::{Cli, Command, FamilyArg};

mod cli;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    if let Err(message) = run(Cli::parse()).await {
        error!("{message}");
        exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), String> {
    match cli.command {
        Command::Sculpt {
            input,
            out,
            family,
            difficulty,
            name,
            media_type,
            notify,
            signing_key,
            update_count,
            recipient,
        } => {
            let payload = match input {
                Some(path) => tokio::fs::read(&path)
                    .await
                    .map_err(|e| format!("Could not read {}: {e}", path.display()))?,
                None => {
                    let mut buf = Vec::new();
                    tokio::io::stdin()
                        .read_to_end(&mut buf)
                        .await
                        .map_err(|e| format!("Could not read stdin: {e}"))?;
                    buf
                }
            };

            let opts = SculptOptions {
                family: match family {
                    FamilyArg::Frozen => CubeFamily::Frozen,
                    FamilyArg::Pic => CubeFamily::Pic,
                    FamilyArg::Muc => CubeFamily::Muc,
                    FamilyArg::Pmuc => CubeFamily::Pmuc,
                },
                difficulty,
                payload,
                content_name: name,
                media_type,
                notify: notify
                    .map(|hex| CubeKey::from_hex(&hex).map_err(|e| format!("Bad notify key: {e}")))
                    .transpose()?,
                signing_key: signing_key
                    .map(|hex| parse_key32(&hex).ok_or("Bad signing key".to_string()))
                    .transpose()?,
                update_count,
                recipients: recipient
                    .iter()
                    .map(|hex| {
                        parse_key32(hex)
                            .map(ExchangePublicKey::from)
                            .ok_or(format!("Bad recipient key: {hex}"))
                    })
                    .collect::<Result<Vec<_>, _>>()?,
                timestamp: None,
            };

            // the nonce search is CPU-bound and must not stall the runtime
            let outcome = tokio::task::spawn_blocking(move || sculpt(&opts))
                .await
                .map_err(|e| format!("Sculpt task failed: {e}"))?
                .map_err(|e| e.to_string())?;

            for (index, chunk) in outcome.chunks.iter().enumerate() {
                let path = out.join(format!("{}.{index}.cube", outcome.key));
                tokio::fs::write(&path, chunk)
                    .await
                    .map_err(|e| format!("Could not write {}: {e}", path.display()))?;
                println!("{} {}", "wrote".green(), path.display());
            }
            println!("{} {}", "key".green().bold(), outcome.key);
        }

        Command::Inspect { file, json } => {
            let bytes = tokio::fs::read(&file)
                .await
                .map_err(|e| format!("Could not read {}: {e}", file.display()))?;
            let report = inspect(&bytes).map_err(|e| e.to_string())?;
            if json {
                let rendered = serde_json::to_string_pretty(&report)
                    .map_err(|e| format!("Could not serialize report: {e}"))?;
                println!("{rendered}");
            } else {
                println!("{}", format_report(&report));
            }
        }

        Command::Keygen { json } => {
            let material = keygen();
            if json {
                let rendered = serde_json::to_string_pretty(&material)
                    .map_err(|e| format!("Could not serialize keys: {e}"))?;
                println!("{rendered}");
            } else {
                println!("{}  {}", "signing secret".yellow(), material.signing_secret);
                println!("{}  {}", "signing public".yellow(), material.signing_public);
                println!("{} {}", "exchange secret".yellow(), material.exchange_secret);
                println!("{} {}", "exchange public".yellow(), material.exchange_public);
            }
        }
    }
    Ok(())
}

fn parse_key32(text: &str) -> Option<[u8; 32]> {
    hex::decode(text).ok()?.try_into().ok()
}
