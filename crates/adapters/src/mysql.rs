use std::path::PathBuf;
use std::time::Instant;

use async_trait::async_trait;
use futures_util::StreamExt;
use mysql_async::consts::ColumnType;
use mysql_async::prelude::{Query, Queryable};
use mysql_async::{OptsBuilder, Pool, Row as MysqlRow, SslOpts, Value};
use sqlr_core::config::{GatewaySettings, TlsMode, PASSWORD_ENV_VAR};
use sqlr_core::gateway::{
    GatewayError, QueryGateway, QueryResult, Row, ScalarValue, SchemaColumn,
};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct MysqlGateway {
    pool: Pool,
}

impl MysqlGateway {
    #[must_use]
    pub fn from_settings(settings: &GatewaySettings) -> Self {
        Self {
            pool: Pool::new(opts_from_settings(settings)),
        }
    }

    pub async fn disconnect(&self) -> Result<(), GatewayError> {
        self.pool.clone().disconnect().await.map_err(to_gateway_error)
    }
}

#[async_trait]
impl QueryGateway for MysqlGateway {
    async fn initialize(&self) -> Result<(), GatewayError> {
        let mut conn = self.pool.get_conn().await.map_err(to_gateway_error)?;
        conn.ping().await.map_err(to_gateway_error)
    }

    async fn execute_query(&self, sql: &str) -> Result<QueryResult, GatewayError> {
        let started_at = Instant::now();
        let mut stream = match sql.to_string().stream::<MysqlRow, _>(self.pool.clone()).await {
            Ok(stream) => stream,
            Err(error) => return rejected_or_transport(error, started_at),
        };

        let mut rows = Vec::new();
        while let Some(next) = stream.next().await {
            match next {
                Ok(row) => rows.push(convert_row(row)),
                Err(error) => return rejected_or_transport(error, started_at),
            }
        }

        let elapsed_ms = elapsed_ms(started_at);
        debug!(rows = rows.len(), elapsed_ms, "mysql query finished");
        Ok(QueryResult::succeeded(rows, elapsed_ms))
    }

    async fn fetch_schema(&self, table_name: &str) -> Result<Vec<SchemaColumn>, GatewayError> {
        let mut conn = self.pool.get_conn().await.map_err(to_gateway_error)?;
        let columns = conn
            .exec_map(
                "SELECT COLUMN_NAME, DATA_TYPE \
                 FROM information_schema.COLUMNS \
                 WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? \
                 ORDER BY ORDINAL_POSITION",
                (table_name.to_string(),),
                |(name, data_type): (String, String)| SchemaColumn::new(name, data_type),
            )
            .await
            .map_err(to_gateway_error)?;

        if columns.is_empty() {
            return Err(GatewayError::new(format!(
                "table `{table_name}` not found in the current database"
            )));
        }
        Ok(columns)
    }
}

// Server errors are failed results; anything else is a transport failure.
fn rejected_or_transport(
    error: mysql_async::Error,
    started_at: Instant,
) -> Result<QueryResult, GatewayError> {
    match error {
        mysql_async::Error::Server(server_error) => {
            warn!(code = server_error.code, "server rejected query");
            Ok(QueryResult::failed(
                server_error.to_string(),
                Some(elapsed_ms(started_at)),
            ))
        }
        other => Err(to_gateway_error(other)),
    }
}

fn elapsed_ms(started_at: Instant) -> f64 {
    started_at.elapsed().as_secs_f64() * 1_000.0
}

fn opts_from_settings(settings: &GatewaySettings) -> OptsBuilder {
    let mut builder = OptsBuilder::default()
        .ip_or_hostname(settings.host.clone())
        .tcp_port(settings.port)
        .user(Some(settings.user.clone()));

    if let Some(password) = resolve_password() {
        builder = builder.pass(Some(password));
    }

    if let Some(database) = non_empty(settings.database.as_deref()) {
        builder = builder.db_name(Some(database.to_string()));
    }

    if let Some(ssl_opts) = ssl_opts_from_settings(settings) {
        builder = builder.ssl_opts(ssl_opts);
    }

    builder
}

fn resolve_password() -> Option<String> {
    std::env::var(PASSWORD_ENV_VAR)
        .ok()
        .filter(|password| !password.is_empty())
}

fn settings_request_tls(settings: &GatewaySettings) -> bool {
    match settings.tls_mode {
        TlsMode::Disabled => false,
        TlsMode::Prefer => non_empty(settings.tls_ca_cert_path.as_deref()).is_some(),
        TlsMode::Require => true,
    }
}

fn ssl_opts_from_settings(settings: &GatewaySettings) -> Option<SslOpts> {
    if !settings_request_tls(settings) {
        return None;
    }

    let mut ssl_opts = SslOpts::default();
    if let Some(ca_cert_path) = non_empty(settings.tls_ca_cert_path.as_deref()) {
        ssl_opts = ssl_opts.with_root_certs(vec![PathBuf::from(ca_cert_path).into()]);
    }
    Some(ssl_opts)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.and_then(|raw| {
        let trimmed = raw.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    })
}

fn convert_row(row: MysqlRow) -> Row {
    let columns = row.columns();
    columns
        .iter()
        .map(|column| (column.name_str().into_owned(), column.column_type()))
        .zip(row.unwrap())
        .map(|((name, column_type), value)| (name, convert_value(column_type, value)))
        .collect()
}

// Text protocol cells arrive as bytes; the column type decides how to read them.
fn convert_value(column_type: ColumnType, value: Value) -> ScalarValue {
    match value {
        Value::NULL => ScalarValue::Null,
        Value::Int(value) => ScalarValue::Int(value),
        Value::UInt(value) => i64::try_from(value)
            .map_or_else(|_| ScalarValue::Text(value.to_string()), ScalarValue::Int),
        Value::Float(value) => ScalarValue::Float(f64::from(value)),
        Value::Double(value) => ScalarValue::Float(value),
        Value::Bytes(bytes) => {
            let text = String::from_utf8_lossy(&bytes).into_owned();
            if is_integer_type(column_type) {
                text.parse::<i64>()
                    .map_or(ScalarValue::Text(text), ScalarValue::Int)
            } else if is_decimal_type(column_type) {
                text.parse::<f64>()
                    .map_or(ScalarValue::Text(text), ScalarValue::Float)
            } else {
                ScalarValue::Text(text)
            }
        }
        Value::Date(year, month, day, hour, minute, second, micros) => ScalarValue::Text(format!(
            "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}.{micros:06}"
        )),
        Value::Time(is_negative, days, hours, minutes, seconds, micros) => {
            let sign = if is_negative { "-" } else { "" };
            ScalarValue::Text(format!(
                "{sign}{days:03} {hours:02}:{minutes:02}:{seconds:02}.{micros:06}"
            ))
        }
    }
}

fn is_integer_type(column_type: ColumnType) -> bool {
    matches!(
        column_type,
        ColumnType::MYSQL_TYPE_TINY
            | ColumnType::MYSQL_TYPE_SHORT
            | ColumnType::MYSQL_TYPE_INT24
            | ColumnType::MYSQL_TYPE_LONG
            | ColumnType::MYSQL_TYPE_LONGLONG
            | ColumnType::MYSQL_TYPE_YEAR
    )
}

fn is_decimal_type(column_type: ColumnType) -> bool {
    matches!(
        column_type,
        ColumnType::MYSQL_TYPE_FLOAT
            | ColumnType::MYSQL_TYPE_DOUBLE
            | ColumnType::MYSQL_TYPE_DECIMAL
            | ColumnType::MYSQL_TYPE_NEWDECIMAL
    )
}

fn to_gateway_error(error: mysql_async::Error) -> GatewayError {
    GatewayError::new(error.to_string())
}
