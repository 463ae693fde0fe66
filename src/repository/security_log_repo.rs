//! 安全事件仓库

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::infra::database::{DatabaseError, SerializedDatabase, SqlValue};
use crate::model::{SecurityLog, SecurityLogType};

/// 安全事件仓库 trait
///
/// 记录只追加、不修改；审计读取与窗口计数共用这一接口。
#[async_trait]
pub trait SecurityLogRepository: Send + Sync {
    /// 创建安全事件，返回新ID
    async fn create(
        &self,
        client_ip_address_id: i64,
        log_type: SecurityLogType,
        created_at: DateTime<Utc>,
    ) -> Result<i64, DatabaseError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<SecurityLog>, DatabaseError>;

    /// 统计 `created_at >= since` 的事件数（边界时间点计入）
    async fn count_since(
        &self,
        client_ip_address_id: i64,
        log_type: SecurityLogType,
        since: DateTime<Utc>,
    ) -> Result<u64, DatabaseError>;

    async fn list_by_client(
        &self,
        client_ip_address_id: i64,
    ) -> Result<Vec<SecurityLog>, DatabaseError>;

    async fn list_by_client_and_type(
        &self,
        client_ip_address_id: i64,
        log_type: SecurityLogType,
    ) -> Result<Vec<SecurityLog>, DatabaseError>;

    async fn list_by_client_and_type_since(
        &self,
        client_ip_address_id: i64,
        log_type: SecurityLogType,
        since: DateTime<Utc>,
    ) -> Result<Vec<SecurityLog>, DatabaseError>;

    async fn list_by_type(&self, log_type: SecurityLogType)
        -> Result<Vec<SecurityLog>, DatabaseError>;
}

const SELECT_COLUMNS: &str =
    "SELECT id, created_at, updated_at, client_ip_address_id, log_type FROM security_logs";

/// 基于串行化访问核心的 SQL 实现
#[derive(Clone)]
pub struct SqlSecurityLogRepository {
    db: SerializedDatabase,
}

impl SqlSecurityLogRepository {
    pub fn new(db: SerializedDatabase) -> Self {
        Self { db }
    }

    async fn list(&self, filter: &str, params: &[SqlValue]) -> Result<Vec<SecurityLog>, DatabaseError> {
        let statement = format!("{SELECT_COLUMNS} WHERE {filter} ORDER BY created_at, id");
        let rows = self.db.run_query(&statement, params).await?;
        rows.iter().map(SecurityLog::from_row).collect()
    }
}

#[async_trait]
impl SecurityLogRepository for SqlSecurityLogRepository {
    async fn create(
        &self,
        client_ip_address_id: i64,
        log_type: SecurityLogType,
        created_at: DateTime<Utc>,
    ) -> Result<i64, DatabaseError> {
        self.db
            .run_insert(
                r#"
                INSERT INTO security_logs (created_at, updated_at, client_ip_address_id, log_type)
                VALUES ($1, $1, $2, $3)
                RETURNING id
                "#,
                &[
                    created_at.into(),
                    client_ip_address_id.into(),
                    log_type.as_tag().into(),
                ],
            )
            .await
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<SecurityLog>, DatabaseError> {
        let statement = format!("{SELECT_COLUMNS} WHERE id = $1 LIMIT 1");
        let rows = self.db.run_query(&statement, &[id.into()]).await?;
        rows.first().map(SecurityLog::from_row).transpose()
    }

    async fn count_since(
        &self,
        client_ip_address_id: i64,
        log_type: SecurityLogType,
        since: DateTime<Utc>,
    ) -> Result<u64, DatabaseError> {
        let rows = self
            .db
            .run_query(
                r#"
                SELECT COUNT(*) AS count FROM security_logs
                WHERE client_ip_address_id = $1
                  AND log_type = $2
                  AND created_at >= $3
                "#,
                &[
                    client_ip_address_id.into(),
                    log_type.as_tag().into(),
                    since.into(),
                ],
            )
            .await?;
        match rows.first() {
            Some(row) => Ok(row.try_i64("count")?.max(0) as u64),
            None => Ok(0),
        }
    }

    async fn list_by_client(
        &self,
        client_ip_address_id: i64,
    ) -> Result<Vec<SecurityLog>, DatabaseError> {
        self.list("client_ip_address_id = $1", &[client_ip_address_id.into()])
            .await
    }

    async fn list_by_client_and_type(
        &self,
        client_ip_address_id: i64,
        log_type: SecurityLogType,
    ) -> Result<Vec<SecurityLog>, DatabaseError> {
        self.list(
            "client_ip_address_id = $1 AND log_type = $2",
            &[client_ip_address_id.into(), log_type.as_tag().into()],
        )
        .await
    }

    async fn list_by_client_and_type_since(
        &self,
        client_ip_address_id: i64,
        log_type: SecurityLogType,
        since: DateTime<Utc>,
    ) -> Result<Vec<SecurityLog>, DatabaseError> {
        self.list(
            "client_ip_address_id = $1 AND log_type = $2 AND created_at >= $3",
            &[
                client_ip_address_id.into(),
                log_type.as_tag().into(),
                since.into(),
            ],
        )
        .await
    }

    async fn list_by_type(
        &self,
        log_type: SecurityLogType,
    ) -> Result<Vec<SecurityLog>, DatabaseError> {
        self.list("log_type = $1", &[log_type.as_tag().into()]).await
    }
}
