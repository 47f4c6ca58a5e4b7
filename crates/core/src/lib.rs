pub mod bootstrap;
pub mod catalog;
pub mod config;
pub mod gateway;
pub mod history;
pub mod lifecycle;
pub mod presentation;
pub mod session;
pub mod validation;

pub use gateway::{GatewayError, QueryGateway, QueryResult, Row, ScalarValue, SchemaColumn};
pub use session::{Session, SessionView};
