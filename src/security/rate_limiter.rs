//! 滥用限流器
//!
//! 以 (客户端身份哈希, 事件类型) 为维度，统计滑动窗口内的安全事件数：
//! - `record_attempt`：解析（必要时创建）客户端身份，然后追加一条安全事件
//! - `should_block`：窗口 `[now - window, now]` 内事件数 >= 阈值时返回 true
//!
//! 窗口随时间滑动，没有显式的"解封"事件。不重试，错误原样交给调用方。

use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, warn};

use crate::infra::clock::{Clock, SystemClock};
use crate::infra::database::DatabaseError;
use crate::infra::metrics;
use crate::model::{ClientIpAddress, IpHasher, SecurityLog, SecurityLogType};
use crate::repository::{ClientIpRepository, SecurityLogRepository};

pub struct AbuseRateLimiter {
    clients: Arc<dyn ClientIpRepository>,
    logs: Arc<dyn SecurityLogRepository>,
    hasher: IpHasher,
    clock: Arc<dyn Clock>,
}

impl AbuseRateLimiter {
    pub fn new(
        clients: Arc<dyn ClientIpRepository>,
        logs: Arc<dyn SecurityLogRepository>,
        hasher: IpHasher,
    ) -> Self {
        Self {
            clients,
            logs,
            hasher,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn hasher(&self) -> &IpHasher {
        &self.hasher
    }

    /// 查找客户端身份（不创建）
    pub async fn find_identity(
        &self,
        raw_client_address: &str,
    ) -> Result<Option<ClientIpAddress>, DatabaseError> {
        let ip_hash = self.hasher.hash(raw_client_address);
        self.clients.find_by_hash(&ip_hash).await
    }

    /// 查找客户端身份，不存在则创建
    pub async fn resolve_identity(
        &self,
        raw_client_address: &str,
    ) -> Result<ClientIpAddress, DatabaseError> {
        let ip_hash = self.hasher.hash(raw_client_address);
        if let Some(existing) = self.clients.find_by_hash(&ip_hash).await? {
            return Ok(existing);
        }

        let created = match self.clients.create(&ip_hash, self.clock.now()).await {
            Ok(id) => self.clients.find_by_id(id).await?,
            Err(e) => {
                // 并发首次出现时另一方可能已经插入（唯一约束），再查一次
                warn!("创建客户端身份失败，重新查找: {}", e);
                match self.clients.find_by_hash(&ip_hash).await? {
                    Some(existing) => Some(existing),
                    None => return Err(e),
                }
            }
        };

        created.ok_or_else(|| {
            DatabaseError::Execution(format!("client identity {ip_hash} vanished after insert"))
        })
    }

    /// 记录一次可疑尝试，返回新事件ID
    pub async fn record_attempt(
        &self,
        raw_client_address: &str,
        log_type: SecurityLogType,
    ) -> Result<i64, DatabaseError> {
        let identity = self.resolve_identity(raw_client_address).await?;
        let id = self
            .logs
            .create(identity.id, log_type, self.clock.now())
            .await?;

        metrics::record_security_event(log_type.as_tag());
        debug!(
            client = %identity.ip_hash,
            log_type = %log_type,
            log_id = id,
            "记录安全事件"
        );
        Ok(id)
    }

    /// 窗口内的事件数；从未出现过的客户端为 0
    pub async fn recent_count(
        &self,
        raw_client_address: &str,
        log_type: SecurityLogType,
        window_minutes: u32,
    ) -> Result<u64, DatabaseError> {
        let Some(identity) = self.find_identity(raw_client_address).await? else {
            return Ok(0);
        };
        let since = self.clock.now() - Duration::minutes(i64::from(window_minutes));
        self.logs.count_since(identity.id, log_type, since).await
    }

    /// 是否应当拦截
    pub async fn should_block(
        &self,
        raw_client_address: &str,
        log_type: SecurityLogType,
        window_minutes: u32,
        max_allowed: u32,
    ) -> Result<bool, DatabaseError> {
        let Some(identity) = self.find_identity(raw_client_address).await? else {
            return Ok(false);
        };
        let since = self.clock.now() - Duration::minutes(i64::from(window_minutes));
        let count = self.logs.count_since(identity.id, log_type, since).await?;
        Ok(count >= u64::from(max_allowed))
    }

    /// 客户端的安全事件历史（审计）
    pub async fn history(
        &self,
        raw_client_address: &str,
        log_type: Option<SecurityLogType>,
    ) -> Result<Vec<SecurityLog>, DatabaseError> {
        let Some(identity) = self.find_identity(raw_client_address).await? else {
            return Ok(Vec::new());
        };
        match log_type {
            Some(log_type) => {
                self.logs
                    .list_by_client_and_type(identity.id, log_type)
                    .await
            }
            None => self.logs.list_by_client(identity.id).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::clock::ManualClock;
    use crate::repository::InMemorySecurityStore;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    fn limiter() -> (AbuseRateLimiter, Arc<InMemorySecurityStore>, Arc<ManualClock>) {
        let store = Arc::new(InMemorySecurityStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let limiter = AbuseRateLimiter::new(store.clone(), store.clone(), IpHasher::default())
            .with_clock(clock.clone());
        (limiter, store, clock)
    }

    #[tokio::test]
    async fn test_unknown_client_is_not_blocked() {
        let (limiter, store, _) = limiter();
        let blocked = limiter
            .should_block("1.2.3.4", SecurityLogType::FailedUserLogin, 15, 2)
            .await
            .unwrap();
        assert!(!blocked);
        // 查询不会创建身份
        assert_eq!(store.client_count(), 0);
    }

    #[tokio::test]
    async fn test_threshold_reached_exactly() {
        let (limiter, _, _) = limiter();
        let t = SecurityLogType::FailedPrivateKeyGuess;

        limiter.record_attempt("5.6.7.8", t).await.unwrap();
        assert!(!limiter.should_block("5.6.7.8", t, 15, 2).await.unwrap());

        limiter.record_attempt("5.6.7.8", t).await.unwrap();
        assert!(limiter.should_block("5.6.7.8", t, 15, 2).await.unwrap());

        // 其他类型、其他地址不受影响
        assert!(!limiter
            .should_block("5.6.7.8", SecurityLogType::FailedUserLogin, 15, 2)
            .await
            .unwrap());
        assert!(!limiter.should_block("5.6.7.9", t, 15, 2).await.unwrap());
    }

    #[tokio::test]
    async fn test_window_boundary_is_inclusive() {
        let (limiter, _, clock) = limiter();
        let t = SecurityLogType::FailedUserLogin;

        limiter.record_attempt("9.9.9.9", t).await.unwrap();

        // 恰好 15 分钟前的事件仍然计入
        clock.advance(Duration::minutes(15));
        assert_eq!(limiter.recent_count("9.9.9.9", t, 15).await.unwrap(), 1);
        assert!(limiter.should_block("9.9.9.9", t, 15, 1).await.unwrap());

        // 再往前一分钟就不计入了
        clock.advance(Duration::minutes(1));
        assert_eq!(limiter.recent_count("9.9.9.9", t, 15).await.unwrap(), 0);
        assert!(!limiter.should_block("9.9.9.9", t, 15, 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_same_address_resolves_to_same_identity() {
        let (limiter, store, _) = limiter();

        let a = limiter.resolve_identity("1.2.3.4").await.unwrap();
        let b = limiter.resolve_identity("1.2.3.4").await.unwrap();
        let c = limiter.resolve_identity("4.3.2.1").await.unwrap();

        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert_ne!(a.ip_hash, c.ip_hash);
        assert_eq!(store.client_count(), 2);
        // 原始地址不会入库
        assert!(!a.ip_hash.contains("1.2.3.4"));
    }

    #[tokio::test]
    async fn test_history() {
        let (limiter, _, _) = limiter();
        limiter
            .record_attempt("1.1.1.1", SecurityLogType::EventCreation)
            .await
            .unwrap();
        limiter
            .record_attempt("1.1.1.1", SecurityLogType::InvalidEventUrlGuess)
            .await
            .unwrap();

        assert_eq!(limiter.history("1.1.1.1", None).await.unwrap().len(), 2);
        assert_eq!(
            limiter
                .history("1.1.1.1", Some(SecurityLogType::EventCreation))
                .await
                .unwrap()
                .len(),
            1
        );
        assert!(limiter.history("2.2.2.2", None).await.unwrap().is_empty());
    }

    /// 创建总是失败的身份仓库
    struct FailingClients;

    #[async_trait]
    impl ClientIpRepository for FailingClients {
        async fn find_by_id(&self, _id: i64) -> Result<Option<ClientIpAddress>, DatabaseError> {
            Ok(None)
        }

        async fn find_by_hash(
            &self,
            _ip_hash: &str,
        ) -> Result<Option<ClientIpAddress>, DatabaseError> {
            Ok(None)
        }

        async fn create(
            &self,
            _ip_hash: &str,
            _created_at: DateTime<Utc>,
        ) -> Result<i64, DatabaseError> {
            Err(DatabaseError::Connection("connection refused".to_string()))
        }

        async fn list_created_at(
            &self,
            _created_at: DateTime<Utc>,
        ) -> Result<Vec<ClientIpAddress>, DatabaseError> {
            Ok(Vec::new())
        }
    }

    /// 第一次按哈希查找时看不到记录，模拟另一个请求抢先插入
    struct LateSighting {
        inner: Arc<InMemorySecurityStore>,
        missed: parking_lot::Mutex<bool>,
    }

    #[async_trait]
    impl ClientIpRepository for LateSighting {
        async fn find_by_id(&self, id: i64) -> Result<Option<ClientIpAddress>, DatabaseError> {
            ClientIpRepository::find_by_id(self.inner.as_ref(), id).await
        }

        async fn find_by_hash(
            &self,
            ip_hash: &str,
        ) -> Result<Option<ClientIpAddress>, DatabaseError> {
            let first = {
                let mut missed = self.missed.lock();
                !std::mem::replace(&mut *missed, true)
            };
            if first {
                return Ok(None);
            }
            self.inner.find_by_hash(ip_hash).await
        }

        async fn create(
            &self,
            ip_hash: &str,
            created_at: DateTime<Utc>,
        ) -> Result<i64, DatabaseError> {
            ClientIpRepository::create(self.inner.as_ref(), ip_hash, created_at).await
        }

        async fn list_created_at(
            &self,
            created_at: DateTime<Utc>,
        ) -> Result<Vec<ClientIpAddress>, DatabaseError> {
            self.inner.list_created_at(created_at).await
        }
    }

    #[tokio::test]
    async fn test_concurrent_first_sighting_reuses_existing_identity() {
        let store = Arc::new(InMemorySecurityStore::new());
        let hasher = IpHasher::default();
        let existing = ClientIpRepository::create(store.as_ref(), &hasher.hash("7.7.7.7"), Utc::now())
            .await
            .unwrap();

        let clients = Arc::new(LateSighting {
            inner: store.clone(),
            missed: parking_lot::Mutex::new(false),
        });
        let limiter = AbuseRateLimiter::new(clients, store.clone(), hasher);

        // 插入撞上唯一约束后重新查找，复用已有身份
        let identity = limiter.resolve_identity("7.7.7.7").await.unwrap();
        assert_eq!(identity.id, existing);
        assert_eq!(store.client_count(), 1);
    }

    #[tokio::test]
    async fn test_identity_creation_failure_propagates() {
        let store = Arc::new(InMemorySecurityStore::new());
        let limiter = AbuseRateLimiter::new(Arc::new(FailingClients), store.clone(), IpHasher::default());

        let err = limiter
            .record_attempt("1.2.3.4", SecurityLogType::FailedUserLogin)
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Connection(_)));
        assert_eq!(store.log_count(), 0);
    }
}
