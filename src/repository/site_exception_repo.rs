use chrono::{DateTime, Utc};
use tracing::warn;

use crate::infra::database::{DatabaseError, SerializedDatabase};
use crate::model::SiteException;

/// 异常日志仓库
///
/// 调用方在把内部错误转换成通用响应之前，把原始错误写进这里。
#[derive(Clone)]
pub struct SiteExceptionRepository {
    db: SerializedDatabase,
}

impl SiteExceptionRepository {
    pub fn new(db: SerializedDatabase) -> Self {
        Self { db }
    }

    /// 创建异常记录
    pub async fn create(
        &self,
        kind: &str,
        message: &str,
        created_at: DateTime<Utc>,
    ) -> Result<i64, DatabaseError> {
        self.db
            .run_insert(
                r#"
                INSERT INTO exceptions (created_at, updated_at, type, message)
                VALUES ($1, $1, $2, $3)
                RETURNING id
                "#,
                &[created_at.into(), kind.into(), message.into()],
            )
            .await
    }

    /// 以错误的类型名和 Display 文本记录
    pub async fn create_from_error<E>(&self, err: &E) -> Result<i64, DatabaseError>
    where
        E: std::error::Error + ?Sized,
    {
        let kind = std::any::type_name::<E>();
        warn!("记录异常: {}: {}", kind, err);
        self.create(kind, &err.to_string(), Utc::now()).await
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<SiteException>, DatabaseError> {
        let rows = self
            .db
            .run_query(
                "SELECT id, created_at, updated_at, type, message FROM exceptions WHERE id = $1 LIMIT 1",
                &[id.into()],
            )
            .await?;
        rows.first().map(SiteException::from_row).transpose()
    }

    /// 最新的在前；`limit` 为 None 时返回全部
    pub async fn list_all(&self, limit: Option<i64>) -> Result<Vec<SiteException>, DatabaseError> {
        let rows = match limit {
            Some(limit) => {
                self.db
                    .run_query(
                        "SELECT id, created_at, updated_at, type, message FROM exceptions ORDER BY id DESC LIMIT $1",
                        &[limit.into()],
                    )
                    .await?
            }
            None => {
                self.db
                    .run_query(
                        "SELECT id, created_at, updated_at, type, message FROM exceptions ORDER BY id DESC",
                        &[],
                    )
                    .await?
            }
        };
        rows.iter().map(SiteException::from_row).collect()
    }
}
