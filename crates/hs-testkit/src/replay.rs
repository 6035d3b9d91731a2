//! Scripted replay: drive a [`Harness`] from a JSONL file of steps.
//!
//! One JSON object per line, tagged by `op`. Blank lines and lines starting
//! with `#` are ignored.
//!
//! ```text
//! {"op":"device_write","key":"0","doc":{"type":"GAS_LEAK","timestamp":1577836700,"sensorId":"gas1","message":"m"}}
//! {"op":"advance","ms":60000}
//! {"op":"ack_key","key":"0"}
//! ```

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use hs_config::EngineConfig;
use hs_schemas::{MergedAlert, NewLocalAlert};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Harness;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ReplayStep {
    /// A field device writes `alerts/<key>`.
    DeviceWrite { key: String, doc: Value },
    /// Move the service clock forward.
    Advance { ms: i64 },
    /// Acknowledge by durable id.
    Ack { id: String },
    /// Acknowledge whichever merged alert currently carries `key`.
    AckKey { key: String },
    Local { alert: NewLocalAlert },
    Resync,
    Notifications { enabled: bool },
    ClearNotifications,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplayReport {
    pub alerts: Vec<MergedAlert>,
    pub notifications: Vec<MergedAlert>,
    pub cleared: Vec<String>,
    pub sync_count: u64,
    pub durable_records: usize,
}

pub fn parse_replay_jsonl(text: &str) -> Result<Vec<ReplayStep>> {
    let mut steps = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let step: ReplayStep = serde_json::from_str(line)
            .with_context(|| format!("replay line {}: invalid step", idx + 1))?;
        steps.push(step);
    }
    Ok(steps)
}

pub fn load_replay_jsonl(path: &Path) -> Result<Vec<ReplayStep>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read replay file failed: {}", path.display()))?;
    parse_replay_jsonl(&text)
}

/// Start a fresh harness at `now`, apply every step, and report the end
/// state. The first failing step aborts the replay.
pub async fn run_replay(cfg: EngineConfig, now: i64, steps: &[ReplayStep]) -> Result<ReplayReport> {
    let h = Harness::with_config_at(cfg, now);
    h.service
        .start()
        .await
        .map_err(|e| anyhow!("service start failed: {e}"))?;

    for (idx, step) in steps.iter().enumerate() {
        apply(&h, step)
            .await
            .with_context(|| format!("replay step {} failed", idx + 1))?;
        h.settle().await;
    }

    let report = ReplayReport {
        alerts: h.service.current_alerts(),
        notifications: h.sink.notified(),
        cleared: h.sink.cleared(),
        sync_count: h.service.sync_count(),
        durable_records: h.durable.len(),
    };
    h.service
        .stop()
        .await
        .map_err(|e| anyhow!("service stop failed: {e}"))?;
    Ok(report)
}

async fn apply(h: &Harness, step: &ReplayStep) -> Result<()> {
    match step {
        ReplayStep::DeviceWrite { key, doc } => {
            let Value::Object(fields) = doc else {
                return Err(anyhow!("device_write doc for '{key}' is not an object"));
            };
            h.primary.put_node(key, fields.clone()).await;
        }
        ReplayStep::Advance { ms } => {
            h.clock.advance(*ms);
        }
        ReplayStep::Ack { id } => {
            h.service.acknowledge(id).await?;
        }
        ReplayStep::AckKey { key } => {
            let alert = h
                .alert_for_key(key)
                .ok_or_else(|| anyhow!("no merged alert for key '{key}'"))?;
            h.service.acknowledge(&alert.id).await?;
        }
        ReplayStep::Local { alert } => {
            h.service.record_local_alert(alert.clone()).await?;
        }
        ReplayStep::Resync => {
            h.service.resync_all().await?;
        }
        ReplayStep::Notifications { enabled } => {
            h.service.set_notifications_enabled(*enabled);
        }
        ReplayStep::ClearNotifications => {
            h.service.clear_all_notifications().await;
        }
    }
    Ok(())
}
