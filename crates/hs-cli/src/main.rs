use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use hs_ingest::{classify_timestamp, normalize_timestamp, TimestampClass};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "hs")]
#[command(about = "Home-security alert reconciliation CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> site -> local...)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Show how a raw device timestamp is repaired
    Normalize {
        /// Raw timestamp as written by the device
        #[arg(allow_hyphen_values = true)]
        raw: i64,

        /// Reference clock in epoch millis (defaults to now)
        #[arg(long)]
        now: Option<i64>,
    },

    /// Run a JSONL script of device writes and operator actions through the
    /// service on in-memory stores; print the merged view and notifications
    Replay {
        /// Replay script, one JSON step per line
        #[arg(long)]
        events: PathBuf,

        /// Layered config paths in merge order
        #[arg(long = "config")]
        config_paths: Vec<String>,

        /// Start clock in epoch millis (defaults to now)
        #[arg(long)]
        now: Option<i64>,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,

    /// Apply embedded SQL migrations.
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = hs_db::connect_from_env().await?;
            match cmd {
                DbCmd::Status => {
                    let s = hs_db::status(&pool).await?;
                    println!(
                        "db_ok={} has_alerts_table={} alert_count={}",
                        s.ok, s.has_alerts_table, s.alert_count
                    );
                    println!(
                        "last_write_at={}",
                        s.last_write_at
                            .map(|t| t.to_rfc3339())
                            .unwrap_or_else(|| "null".to_string())
                    );
                }
                DbCmd::Migrate => {
                    hs_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let (_, loaded) = hs_config::load_engine_config(&path_refs)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::Normalize { raw, now } => {
            let now = now.unwrap_or_else(|| Utc::now().timestamp_millis());
            let normalized = normalize_timestamp(raw, now);
            println!("raw={raw}");
            println!("class={}", class_name(classify_timestamp(raw)));
            println!("normalized={normalized}");
            println!("utc={}", utc_string(normalized));
        }

        Commands::Replay {
            events,
            config_paths,
            now,
        } => {
            let path_refs: Vec<&str> = config_paths.iter().map(|s| s.as_str()).collect();
            let (cfg, loaded) = hs_config::load_engine_config(&path_refs)?;
            let steps = hs_testkit::load_replay_jsonl(&events)?;
            info!(steps = steps.len(), config_hash = %loaded.config_hash, "replay starting");

            let now = now.unwrap_or_else(|| Utc::now().timestamp_millis());
            let report = hs_testkit::run_replay(cfg, now, &steps).await?;
            let out = serde_json::to_string_pretty(&report).context("serialize replay report")?;
            println!("{out}");
        }
    }

    Ok(())
}

/// Logs go to stderr so stdout stays machine-readable.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn class_name(class: TimestampClass) -> &'static str {
    match class {
        TimestampClass::Plausible => "plausible",
        TimestampClass::SecondsToMillis => "seconds_to_millis",
        TimestampClass::Replaced => "replaced",
    }
}

fn utc_string(millis: i64) -> String {
    Utc.timestamp_millis_opt(millis)
        .single()
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "out_of_range".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utc_string_formats_and_handles_overflow() {
        assert_eq!(utc_string(1_577_836_800_000), "2020-01-01T00:00:00+00:00");
        assert_eq!(utc_string(i64::MAX), "out_of_range");
    }

    #[test]
    fn cli_parses_negative_raw() {
        let cli = Cli::try_parse_from(["hs", "normalize", "-5", "--now", "10"]).unwrap();
        assert!(matches!(
            cli.cmd,
            Commands::Normalize {
                raw: -5,
                now: Some(10)
            }
        ));
    }
}
