//! 异常日志（exceptions 表）

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::infra::database::{DatabaseError, Row};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteException {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// 错误类型名
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

impl SiteException {
    pub fn from_row(row: &Row) -> Result<Self, DatabaseError> {
        Ok(Self {
            id: row.try_i64("id")?,
            created_at: row.try_timestamp("created_at")?,
            updated_at: row.try_timestamp("updated_at")?,
            kind: row.try_string("type")?,
            message: row.try_string("message")?,
        })
    }
}
