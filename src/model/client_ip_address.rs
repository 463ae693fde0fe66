//! 客户端身份（IP 哈希）
//!
//! 数据库中只保存 IP 的单向哈希，不保存原始地址。
//! 哈希必须是确定性的（同一地址总是得到同一哈希），才能在 SQL 中精确匹配，
//! 所以这里用 SHA-256 而不是带随机盐的密码哈希。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::infra::database::{DatabaseError, Row};

/// 哈希值前缀；以此开头的输入视为已经哈希过
pub const IP_HASH_PREFIX: char = '$';

/// client_ip_addresses 表记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientIpAddress {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub ip_hash: String,
}

impl ClientIpAddress {
    pub fn from_row(row: &Row) -> Result<Self, DatabaseError> {
        Ok(Self {
            id: row.try_i64("id")?,
            created_at: row.try_timestamp("created_at")?,
            updated_at: row.try_timestamp("updated_at")?,
            ip_hash: row.try_string("ip_hash")?,
        })
    }
}

/// IP 哈希器
///
/// `key` 为可选的服务端密钥，混入哈希输入以防止对 IPv4 空间的穷举反查。
/// 更换 key 会让已有记录无法再被匹配。
#[derive(Clone, Default)]
pub struct IpHasher {
    key: Option<String>,
}

impl IpHasher {
    pub fn new(key: Option<String>) -> Self {
        Self {
            key: key.filter(|k| !k.is_empty()),
        }
    }

    /// `"$" + hex(sha256(key + ip))`；已是哈希的输入原样返回
    pub fn hash(&self, ip_address: &str) -> String {
        if ip_address.starts_with(IP_HASH_PREFIX) {
            return ip_address.to_string();
        }

        let mut hasher = Sha256::new();
        if let Some(key) = &self.key {
            hasher.update(key.as_bytes());
        }
        hasher.update(ip_address.as_bytes());
        format!("{}{:x}", IP_HASH_PREFIX, hasher.finalize())
    }
}

impl std::fmt::Debug for IpHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpHasher")
            .field("keyed", &self.key.is_some())
            .finish()
    }
}
