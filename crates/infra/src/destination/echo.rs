use std::sync::Arc;

use async_trait::async_trait;
use beacon_core::ConfigResult;
use beacon_events::{AnalyticsEvent, RequestContext};
use serde_json::Value;
use tracing::info;

use super::{Destination, DestinationError, FactoryContext};

pub fn factory(_options: &Value, _ctx: &FactoryContext) -> ConfigResult<Arc<dyn Destination>> {
    Ok(Arc::new(EchoDestination::new()))
}

/// Logs every event. Handy while wiring up a site.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoDestination;

impl EchoDestination {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Destination for EchoDestination {
    async fn send(
        &self,
        event: &AnalyticsEvent,
        _ctx: &dyn RequestContext,
    ) -> Result<(), DestinationError> {
        let pretty = serde_json::to_string_pretty(event)?;
        info!(
            event_type = %event.event_type,
            message_id = %event.message_id,
            "echo destination received event:\n{pretty}"
        );
        Ok(())
    }

    fn destination_type(&self) -> &str {
        "echo"
    }

    fn describe(&self) -> String {
        "echo".to_string()
    }
}
