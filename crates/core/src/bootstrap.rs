use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{error, info, warn};

use crate::gateway::{QueryGateway, SchemaColumn};

pub const DEFAULT_SCHEMA_TABLE: &str = "orders";
pub const SCHEMA_WARNING: &str = "Could not fetch table schema.";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BootstrapState {
    #[default]
    Uninitialized,
    Initializing,
    Ready,
    Failed {
        message: String,
    },
}

impl BootstrapState {
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    #[must_use]
    pub fn failure(&self) -> Option<&str> {
        match self {
            Self::Failed { message } => Some(message),
            _ => None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BootstrapError {
    #[error("gateway initialization was already attempted ({state:?})")]
    AlreadyAttempted { state: BootstrapState },
}

// Only an initialize failure is fatal; the schema fetch is best effort.
#[derive(Debug)]
pub struct BootstrapSequencer {
    schema_table: String,
    state: BootstrapState,
    schema: Vec<SchemaColumn>,
    schema_warning: Option<String>,
    initialize_latency: Option<Duration>,
}

impl Default for BootstrapSequencer {
    fn default() -> Self {
        Self::new(DEFAULT_SCHEMA_TABLE)
    }
}

impl BootstrapSequencer {
    #[must_use]
    pub fn new(schema_table: impl Into<String>) -> Self {
        Self {
            schema_table: schema_table.into(),
            state: BootstrapState::Uninitialized,
            schema: Vec::new(),
            schema_warning: None,
            initialize_latency: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> &BootstrapState {
        &self.state
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    #[must_use]
    pub fn schema_table(&self) -> &str {
        &self.schema_table
    }

    #[must_use]
    pub fn schema(&self) -> &[SchemaColumn] {
        &self.schema
    }

    #[must_use]
    pub fn schema_warning(&self) -> Option<&str> {
        self.schema_warning.as_deref()
    }

    #[must_use]
    pub fn initialize_latency(&self) -> Option<Duration> {
        self.initialize_latency
    }

    pub async fn start<G: QueryGateway + ?Sized>(
        &mut self,
        gateway: &G,
    ) -> Result<&BootstrapState, BootstrapError> {
        if self.state != BootstrapState::Uninitialized {
            return Err(BootstrapError::AlreadyAttempted {
                state: self.state.clone(),
            });
        }

        self.state = BootstrapState::Initializing;
        info!("initializing SQL gateway");
        let started_at = Instant::now();
        if let Err(source) = gateway.initialize().await {
            error!(error = %source, "gateway initialization failed");
            self.state = BootstrapState::Failed {
                message: format!(
                    "Failed to connect to backend: {source}. \
                     Please check if the server is running."
                ),
            };
            return Ok(&self.state);
        }
        let latency = started_at.elapsed();
        self.initialize_latency = Some(latency);
        info!(
            latency_ms = latency.as_secs_f64() * 1_000.0,
            "gateway initialized"
        );

        match gateway.fetch_schema(&self.schema_table).await {
            Ok(schema) => {
                info!(
                    table = %self.schema_table,
                    columns = schema.len(),
                    "schema loaded"
                );
                self.schema = schema;
            }
            Err(source) => {
                warn!(table = %self.schema_table, error = %source, "could not fetch schema");
                self.schema_warning = Some(SCHEMA_WARNING.to_string());
            }
        }

        self.state = BootstrapState::Ready;
        Ok(&self.state)
    }
}
