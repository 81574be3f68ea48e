//! Table-store upsert through a PostgREST endpoint (Supabase and friends).
//!
//! The event is flattened into a single row keyed by `messageId`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use beacon_core::json::{FlattenOptions, flatten, strip_nulls};
use beacon_core::{ConfigError, ConfigResult};
use beacon_events::{AnalyticsEvent, RequestContext};
use reqwest::Client;
use serde_json::{Map, Value};
use tracing::debug;

use super::{Destination, DestinationError, FactoryContext};
use crate::remote::{RemoteError, RemoteRequest, remote_call};

const PRIMARY_KEY: &str = "messageId";
const TIMESTAMP_COLUMNS: &[&str] = &["timestamp", "sentAt", "receivedAt"];

pub fn factory(options: &Value, ctx: &FactoryContext) -> ConfigResult<Arc<dyn Destination>> {
    Ok(Arc::new(PostgrestDestination::from_options(options, ctx)?))
}

#[derive(Debug, Clone)]
pub struct PostgrestDestination {
    url: String,
    api_key: String,
    client: Client,
    timeout: Duration,
}

impl PostgrestDestination {
    pub fn from_options(options: &Value, ctx: &FactoryContext) -> ConfigResult<Self> {
        let url = ctx
            .option_or_env(options, "url", "POSTGREST_URL")
            .ok_or_else(|| ConfigError::missing_credential("postgrest", "url", "POSTGREST_URL"))?;
        let api_key = ctx
            .option_or_env(options, "apiKey", "POSTGREST_API_KEY")
            .ok_or_else(|| {
                ConfigError::missing_credential("postgrest", "apiKey", "POSTGREST_API_KEY")
            })?;
        Ok(Self {
            url,
            api_key,
            client: ctx.client.clone(),
            timeout: ctx.timeout,
        })
    }
}

/// Flattened, null-free row for `event`.
pub fn event_row(event: &AnalyticsEvent) -> Map<String, Value> {
    let Value::Object(object) = event.to_json() else {
        return Map::new();
    };
    let mut row = Value::Object(flatten(&object, &FlattenOptions::default()));
    strip_nulls(&mut row);
    match row {
        Value::Object(row) => row,
        _ => Map::new(),
    }
}

/// Last path segment of the endpoint URL.
pub fn table_name(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.split('/')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .last()
        .unwrap_or(path)
}

fn column_type(column: &str, value: &Value) -> &'static str {
    if TIMESTAMP_COLUMNS.contains(&column) {
        return "TIMESTAMPTZ";
    }
    match value {
        Value::Bool(_) => "BOOLEAN",
        Value::Number(_) => "DOUBLE PRECISION",
        _ => "TEXT",
    }
}

/// Statements that would make `table` accept `row`.
pub fn schema_hint(table: &str, row: &Map<String, Value>) -> String {
    let mut statements: Vec<String> = row
        .iter()
        .map(|(column, value)| {
            format!(
                r#"ALTER TABLE "{table}" ADD COLUMN IF NOT EXISTS "{column}" {}"#,
                column_type(column, value)
            )
        })
        .collect();
    statements.push(format!(
        r#"ALTER TABLE "{table}" ADD CONSTRAINT {}_pkey PRIMARY KEY ("{PRIMARY_KEY}")"#,
        table.to_lowercase()
    ));
    format!("{};", statements.join(";\n"))
}

#[async_trait]
impl Destination for PostgrestDestination {
    async fn send(
        &self,
        event: &AnalyticsEvent,
        _ctx: &dyn RequestContext,
    ) -> Result<(), DestinationError> {
        let row = event_row(event);
        let request = RemoteRequest::post(Value::Object(row.clone()))
            .with_header("apikey", self.api_key.as_str())
            .with_header("Authorization", format!("Bearer {}", self.api_key))
            .with_header("Prefer", "resolution=merge-duplicates")
            .with_timeout(self.timeout)
            .ignore_body();

        match remote_call(&self.client, &self.url, request).await {
            Ok(_) => {
                debug!(destination = %self.describe(), message_id = %event.message_id, "row upserted");
                Ok(())
            }
            Err(error @ RemoteError::Http { .. }) => Err(DestinationError::rejected(format!(
                "{error}\n\nMake sure the table schema matches the row:\n\n{}",
                schema_hint(table_name(&self.url), &row)
            ))),
            Err(error) => Err(error.into()),
        }
    }

    fn destination_type(&self) -> &str {
        "postgrest"
    }

    fn describe(&self) -> String {
        format!("PostgREST @ {}", self.url)
    }
}
