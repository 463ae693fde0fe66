use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::config::GuardConfig;
use crate::error::ServerError;
use crate::infra::database::{Connector, DatabaseRegistry, PgConnector, SerializedDatabase};
use crate::model::IpHasher;
use crate::repository::{SiteExceptionRepository, SqlClientIpRepository, SqlSecurityLogRepository};
use crate::security::{AbuseRateLimiter, SecurityService};

/// 组装好的运行时组件
///
/// 注册表、仓库、限流器都在这里显式创建并注入，没有进程级全局状态。
pub struct GuardApp {
    registry: Arc<DatabaseRegistry>,
    database: SerializedDatabase,
    security: Arc<SecurityService>,
    exceptions: SiteExceptionRepository,
}

impl GuardApp {
    /// 使用 PostgreSQL 连接器
    pub fn new(config: &GuardConfig) -> Result<Self> {
        Self::with_connector(config, Arc::new(PgConnector))
    }

    pub fn with_connector(config: &GuardConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        config.validate()?;

        let registry = DatabaseRegistry::new(connector)
            .with_acquire_timeout(config.database.acquire_timeout());
        for settings in &config.database.connections {
            registry.register(settings.clone());
        }
        let registry = Arc::new(registry);
        let database = registry.database(config.database.name.clone());

        let limiter = AbuseRateLimiter::new(
            Arc::new(SqlClientIpRepository::new(database.clone())),
            Arc::new(SqlSecurityLogRepository::new(database.clone())),
            IpHasher::new(config.security.ip_hash_key.clone()),
        );
        let security_config = config
            .security
            .security_config()
            .context("安全策略配置无效")?;
        let security = Arc::new(SecurityService::new(security_config, Arc::new(limiter)));
        let exceptions = SiteExceptionRepository::new(database.clone());

        info!(
            "✅ 组件初始化完成（数据库: {}，等待上限: {:?}）",
            database.name(),
            registry.acquire_timeout()
        );

        Ok(Self {
            registry,
            database,
            security,
            exceptions,
        })
    }

    pub fn registry(&self) -> &Arc<DatabaseRegistry> {
        &self.registry
    }

    pub fn database(&self) -> &SerializedDatabase {
        &self.database
    }

    pub fn security(&self) -> &Arc<SecurityService> {
        &self.security
    }

    pub fn exceptions(&self) -> &SiteExceptionRepository {
        &self.exceptions
    }

    /// 记录内部错误，返回对外的通用文案
    ///
    /// 写异常表本身失败时只打日志。
    pub async fn record_failure(&self, err: &ServerError) -> String {
        if !err.is_user_facing() {
            if let Err(record_err) = self.exceptions.create_from_error(err).await {
                warn!("写入异常记录失败: {}", record_err);
            }
        }
        err.public_message()
    }
}
