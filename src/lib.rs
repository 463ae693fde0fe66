pub mod app;
pub mod cli;
pub mod config;
pub mod error;
pub mod infra;
pub mod logging;
pub mod model;
pub mod repository;
pub mod security; // 安全模块

pub use app::GuardApp;
pub use config::GuardConfig;
pub use error::{Result, ServerError};
pub use infra::database::{
    ConnectionSettings, Connector, DatabaseError, DatabaseRegistry, PgConnector, Row,
    SerializedDatabase, SqlConnection, SqlValue,
};
pub use model::*;
pub use security::{AbuseRateLimiter, SecurityCheckResult, SecurityMode, SecurityService};
