//! Notification sink that publishes onto the daemon's SSE bus.

use async_trait::async_trait;
use hs_schemas::MergedAlert;
use hs_store::{NotificationSink, SinkError};
use tokio::sync::broadcast;
use tracing::info;

use crate::state::BusMsg;

/// Every notification becomes a `notify` SSE event; clears become `clear`.
///
/// Having no connected SSE client is not a delivery failure.
#[derive(Clone)]
pub struct BusNotificationSink {
    bus: broadcast::Sender<BusMsg>,
}

impl BusNotificationSink {
    pub fn new(bus: broadcast::Sender<BusMsg>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl NotificationSink for BusNotificationSink {
    async fn notify(&self, alert: &MergedAlert) -> Result<(), SinkError> {
        info!(
            id = %alert.id,
            category = %alert.category,
            sensor_id = %alert.sensor_id,
            "{}",
            alert.category.title()
        );
        let _ = self.bus.send(BusMsg::Notify {
            alert: alert.clone(),
        });
        Ok(())
    }

    async fn clear(&self, alert_id: &str) -> Result<(), SinkError> {
        let _ = self.bus.send(BusMsg::Clear {
            id: alert_id.to_string(),
        });
        Ok(())
    }

    async fn clear_all(&self) -> Result<(), SinkError> {
        let _ = self.bus.send(BusMsg::ClearAll);
        Ok(())
    }
}
