//! 客户端身份仓库

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::infra::database::{DatabaseError, SerializedDatabase};
use crate::model::ClientIpAddress;

/// 客户端身份仓库 trait
///
/// 所有查询都按哈希进行，原始地址不会进入仓库层。
#[async_trait]
pub trait ClientIpRepository: Send + Sync {
    /// 根据ID查找
    async fn find_by_id(&self, id: i64) -> Result<Option<ClientIpAddress>, DatabaseError>;

    /// 根据哈希精确匹配
    async fn find_by_hash(&self, ip_hash: &str) -> Result<Option<ClientIpAddress>, DatabaseError>;

    /// 创建记录，返回新ID
    async fn create(&self, ip_hash: &str, created_at: DateTime<Utc>) -> Result<i64, DatabaseError>;

    /// 创建时间恰好等于 `created_at` 的记录
    async fn list_created_at(
        &self,
        created_at: DateTime<Utc>,
    ) -> Result<Vec<ClientIpAddress>, DatabaseError>;
}

/// 基于串行化访问核心的 SQL 实现
#[derive(Clone)]
pub struct SqlClientIpRepository {
    db: SerializedDatabase,
}

impl SqlClientIpRepository {
    pub fn new(db: SerializedDatabase) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ClientIpRepository for SqlClientIpRepository {
    async fn find_by_id(&self, id: i64) -> Result<Option<ClientIpAddress>, DatabaseError> {
        let rows = self
            .db
            .run_query(
                "SELECT id, created_at, updated_at, ip_hash FROM client_ip_addresses WHERE id = $1 LIMIT 1",
                &[id.into()],
            )
            .await?;
        rows.first().map(ClientIpAddress::from_row).transpose()
    }

    async fn find_by_hash(&self, ip_hash: &str) -> Result<Option<ClientIpAddress>, DatabaseError> {
        let rows = self
            .db
            .run_query(
                "SELECT id, created_at, updated_at, ip_hash FROM client_ip_addresses WHERE ip_hash = $1 LIMIT 1",
                &[ip_hash.into()],
            )
            .await?;
        rows.first().map(ClientIpAddress::from_row).transpose()
    }

    async fn create(&self, ip_hash: &str, created_at: DateTime<Utc>) -> Result<i64, DatabaseError> {
        self.db
            .run_insert(
                r#"
                INSERT INTO client_ip_addresses (created_at, updated_at, ip_hash)
                VALUES ($1, $1, $2)
                RETURNING id
                "#,
                &[created_at.into(), ip_hash.into()],
            )
            .await
    }

    async fn list_created_at(
        &self,
        created_at: DateTime<Utc>,
    ) -> Result<Vec<ClientIpAddress>, DatabaseError> {
        let rows = self
            .db
            .run_query(
                "SELECT id, created_at, updated_at, ip_hash FROM client_ip_addresses WHERE created_at = $1 ORDER BY id",
                &[created_at.into()],
            )
            .await?;
        rows.iter().map(ClientIpAddress::from_row).collect()
    }
}
