use std::error::Error;
use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::sync::{Arc, Mutex};

use sqlr_adapters::mysql::MysqlGateway;
use sqlr_core::config::{default_config_dir, AppConfig, FileConfigStore};
use sqlr_core::{QueryGateway, Session};
use sqlr_tui::TuiError;
use tokio::runtime::{Handle, Runtime};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const LOG_FILTER_ENV_VAR: &str = "SQLR_LOG";
const LOG_FILE_NAME: &str = "sqlr.log";

fn open_log_file(log_dir: &Path) -> Result<File, Box<dyn Error>> {
    fs::create_dir_all(log_dir)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join(LOG_FILE_NAME))?;
    Ok(file)
}

/// `SQLR_LOG` wins over the configured filter.
fn log_filter(config: &AppConfig) -> Result<EnvFilter, Box<dyn Error>> {
    match EnvFilter::try_from_env(LOG_FILTER_ENV_VAR) {
        Ok(filter) => Ok(filter),
        Err(_) => Ok(EnvFilter::try_new(&config.log_filter)?),
    }
}

fn initialize_logging(config: &AppConfig, log_dir: &Path) -> Result<(), Box<dyn Error>> {
    let log_file = open_log_file(log_dir)?;
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(config)?)
        .with_writer(Mutex::new(log_file))
        .with_ansi(false)
        .with_target(true)
        .try_init()
        .map_err(|e| -> Box<dyn Error> { e })?;
    Ok(())
}

fn run_app<G: QueryGateway + 'static>(
    config: &AppConfig,
    gateway: Arc<G>,
    runtime: &Runtime,
    run_tui: impl FnOnce(Session<G>, Handle) -> Result<(), TuiError>,
) -> Result<(), Box<dyn Error>> {
    let session = Session::new(gateway, config.schema_table.clone());
    info!(schema_table = %config.schema_table, "starting session");
    run_tui(session, runtime.handle().clone())?;
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let mut store = FileConfigStore::load_default()?;
    if !store.exists() {
        store.persist()?;
    }
    let config = store.config().clone();
    initialize_logging(&config, &default_config_dir()?)?;
    info!(path = %store.path().display(), "configuration loaded");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let gateway = {
        let _guard = runtime.enter();
        Arc::new(MysqlGateway::from_settings(&config.gateway))
    };

    let result = run_app(&config, Arc::clone(&gateway), &runtime, sqlr_tui::run);
    if let Err(error) = runtime.block_on(gateway.disconnect()) {
        warn!(%error, "failed to close gateway pool");
    }
    result
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::{Arc, Mutex};

    use sqlr_core::config::AppConfig;
    use sqlr_core::gateway::{GatewayError, QueryGateway, QueryResult, SchemaColumn};
    use tempfile::TempDir;

    use super::{log_filter, open_log_file, run_app, LOG_FILE_NAME};

    #[derive(Debug, Default)]
    struct RecordingGateway {
        schema_table: Mutex<Option<String>>,
    }

    #[async_trait::async_trait]
    impl QueryGateway for RecordingGateway {
        async fn initialize(&self) -> Result<(), GatewayError> {
            Ok(())
        }

        async fn execute_query(&self, _sql: &str) -> Result<QueryResult, GatewayError> {
            Ok(QueryResult::succeeded(Vec::new(), 0.0))
        }

        async fn fetch_schema(&self, table_name: &str) -> Result<Vec<SchemaColumn>, GatewayError> {
            *self.schema_table.lock().expect("schema lock") = Some(table_name.to_string());
            Ok(Vec::new())
        }
    }

    fn test_runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime should build")
    }

    #[test]
    fn run_app_hands_a_configured_session_to_the_tui() {
        let runtime = test_runtime();
        let gateway = Arc::new(RecordingGateway::default());
        let config = AppConfig {
            schema_table: "customers".to_string(),
            ..AppConfig::default()
        };

        let result = run_app(&config, Arc::clone(&gateway), &runtime, |mut session, handle| {
            handle
                .block_on(session.bootstrap())
                .expect("bootstrap runs once");
            assert!(session.is_ready());
            Ok(())
        });

        assert!(result.is_ok());
        assert_eq!(
            gateway.schema_table.lock().expect("schema lock").as_deref(),
            Some("customers")
        );
    }

    #[test]
    fn run_app_propagates_tui_errors() {
        let runtime = test_runtime();
        let result = run_app(
            &AppConfig::default(),
            Arc::new(RecordingGateway::default()),
            &runtime,
            |_, _| Err(sqlr_tui::TuiError::Io(io::Error::other("boom"))),
        );
        assert!(result.is_err());
    }

    #[test]
    fn log_file_is_created_inside_the_config_dir() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let log_dir = temp_dir.path().join("sqlr");

        open_log_file(&log_dir).expect("log file should open");
        assert!(log_dir.join(LOG_FILE_NAME).exists());
    }

    #[test]
    fn configured_filter_must_parse() {
        let config = AppConfig {
            log_filter: "sqlr_core=debug,info".to_string(),
            ..AppConfig::default()
        };
        assert!(log_filter(&config).is_ok());
    }
}
