//! 内存实现（测试、本地演示）
//!
//! 行为与 SQL 实现一致：ID 自增、`ip_hash` 唯一、窗口下界包含边界时间点、列表按 (created_at, id) 排序。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::client_ip_repo::ClientIpRepository;
use super::security_log_repo::SecurityLogRepository;
use crate::infra::database::DatabaseError;
use crate::model::{ClientIpAddress, SecurityLog, SecurityLogType};

#[derive(Default)]
struct Tables {
    clients: Vec<ClientIpAddress>,
    logs: Vec<SecurityLog>,
}

/// 客户端身份 + 安全事件的内存存储
#[derive(Default)]
pub struct InMemorySecurityStore {
    tables: Mutex<Tables>,
}

impl InMemorySecurityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client_count(&self) -> usize {
        self.tables.lock().clients.len()
    }

    pub fn log_count(&self) -> usize {
        self.tables.lock().logs.len()
    }

    fn sorted(mut logs: Vec<SecurityLog>) -> Vec<SecurityLog> {
        logs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        logs
    }

    fn filter_logs<F>(&self, predicate: F) -> Vec<SecurityLog>
    where
        F: Fn(&SecurityLog) -> bool,
    {
        let tables = self.tables.lock();
        Self::sorted(tables.logs.iter().filter(|l| predicate(l)).cloned().collect())
    }
}

#[async_trait]
impl ClientIpRepository for InMemorySecurityStore {
    async fn find_by_id(&self, id: i64) -> Result<Option<ClientIpAddress>, DatabaseError> {
        Ok(self.tables.lock().clients.iter().find(|c| c.id == id).cloned())
    }

    async fn find_by_hash(&self, ip_hash: &str) -> Result<Option<ClientIpAddress>, DatabaseError> {
        Ok(self
            .tables
            .lock()
            .clients
            .iter()
            .find(|c| c.ip_hash == ip_hash)
            .cloned())
    }

    async fn create(&self, ip_hash: &str, created_at: DateTime<Utc>) -> Result<i64, DatabaseError> {
        let mut tables = self.tables.lock();
        if tables.clients.iter().any(|c| c.ip_hash == ip_hash) {
            return Err(DatabaseError::Execution(format!(
                "duplicate key value violates unique constraint: ip_hash={}",
                ip_hash
            )));
        }
        let id = tables.clients.len() as i64 + 1;
        tables.clients.push(ClientIpAddress {
            id,
            created_at,
            updated_at: created_at,
            ip_hash: ip_hash.to_string(),
        });
        Ok(id)
    }

    async fn list_created_at(
        &self,
        created_at: DateTime<Utc>,
    ) -> Result<Vec<ClientIpAddress>, DatabaseError> {
        Ok(self
            .tables
            .lock()
            .clients
            .iter()
            .filter(|c| c.created_at == created_at)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SecurityLogRepository for InMemorySecurityStore {
    async fn create(
        &self,
        client_ip_address_id: i64,
        log_type: SecurityLogType,
        created_at: DateTime<Utc>,
    ) -> Result<i64, DatabaseError> {
        let mut tables = self.tables.lock();
        // 与外键约束一致
        if !tables.clients.iter().any(|c| c.id == client_ip_address_id) {
            return Err(DatabaseError::Execution(format!(
                "client_ip_address_id {client_ip_address_id} does not exist"
            )));
        }
        let id = tables.logs.len() as i64 + 1;
        tables.logs.push(SecurityLog {
            id,
            created_at,
            updated_at: created_at,
            client_ip_address_id,
            log_type,
        });
        Ok(id)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<SecurityLog>, DatabaseError> {
        Ok(self.tables.lock().logs.iter().find(|l| l.id == id).cloned())
    }

    async fn count_since(
        &self,
        client_ip_address_id: i64,
        log_type: SecurityLogType,
        since: DateTime<Utc>,
    ) -> Result<u64, DatabaseError> {
        Ok(self
            .tables
            .lock()
            .logs
            .iter()
            .filter(|l| {
                l.client_ip_address_id == client_ip_address_id
                    && l.log_type == log_type
                    && l.created_at >= since
            })
            .count() as u64)
    }

    async fn list_by_client(
        &self,
        client_ip_address_id: i64,
    ) -> Result<Vec<SecurityLog>, DatabaseError> {
        Ok(self.filter_logs(|l| l.client_ip_address_id == client_ip_address_id))
    }

    async fn list_by_client_and_type(
        &self,
        client_ip_address_id: i64,
        log_type: SecurityLogType,
    ) -> Result<Vec<SecurityLog>, DatabaseError> {
        Ok(self.filter_logs(|l| {
            l.client_ip_address_id == client_ip_address_id && l.log_type == log_type
        }))
    }

    async fn list_by_client_and_type_since(
        &self,
        client_ip_address_id: i64,
        log_type: SecurityLogType,
        since: DateTime<Utc>,
    ) -> Result<Vec<SecurityLog>, DatabaseError> {
        Ok(self.filter_logs(|l| {
            l.client_ip_address_id == client_ip_address_id
                && l.log_type == log_type
                && l.created_at >= since
        }))
    }

    async fn list_by_type(
        &self,
        log_type: SecurityLogType,
    ) -> Result<Vec<SecurityLog>, DatabaseError> {
        Ok(self.filter_logs(|l| l.log_type == log_type))
    }
}
