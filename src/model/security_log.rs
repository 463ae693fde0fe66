//! 安全事件（security_logs 表）

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::infra::database::{DatabaseError, Row};

/// 安全事件类型
///
/// 入库的标签是原始标签的大写形式，解析时不区分大小写。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityLogType {
    /// 创建活动（成功创建也记录，用于限制创建频率）
    EventCreation,
    /// 用户登录失败
    FailedUserLogin,
    /// 参与者登录失败
    FailedAttendeeLogin,
    /// 私密活动密钥猜错
    FailedPrivateKeyGuess,
    /// 访问不存在的活动 URL
    InvalidEventUrlGuess,
}

impl SecurityLogType {
    pub const ALL: [SecurityLogType; 5] = [
        SecurityLogType::EventCreation,
        SecurityLogType::FailedUserLogin,
        SecurityLogType::FailedAttendeeLogin,
        SecurityLogType::FailedPrivateKeyGuess,
        SecurityLogType::InvalidEventUrlGuess,
    ];

    /// 数据库中的标签
    pub fn as_tag(&self) -> &'static str {
        match self {
            SecurityLogType::EventCreation => "EVENT CREATION LOG",
            SecurityLogType::FailedUserLogin => "FAILED USER LOGIN LOG",
            SecurityLogType::FailedAttendeeLogin => "FAILED ATTENDEE LOGIN LOG",
            SecurityLogType::FailedPrivateKeyGuess => "FAILED PRIVATE EVENT SECRET KEY",
            SecurityLogType::InvalidEventUrlGuess => "ENTERED INVALID EVENT URL",
        }
    }

    /// 配置 / CLI 中使用的短名
    pub fn as_key(&self) -> &'static str {
        match self {
            SecurityLogType::EventCreation => "event_creation",
            SecurityLogType::FailedUserLogin => "failed_user_login",
            SecurityLogType::FailedAttendeeLogin => "failed_attendee_login",
            SecurityLogType::FailedPrivateKeyGuess => "failed_private_key_guess",
            SecurityLogType::InvalidEventUrlGuess => "invalid_event_url_guess",
        }
    }
}

impl fmt::Display for SecurityLogType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_key())
    }
}

impl FromStr for SecurityLogType {
    type Err = String;

    /// 接受短名（`failed_user_login` / `failed-user-login`）或数据库标签，不区分大小写
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|t| t.as_key() == normalized || t.as_tag().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown security log type: {s}"))
    }
}

/// security_logs 表记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityLog {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub client_ip_address_id: i64,
    pub log_type: SecurityLogType,
}

impl SecurityLog {
    pub fn from_row(row: &Row) -> Result<Self, DatabaseError> {
        let tag = row.try_string("log_type")?;
        let log_type = tag
            .parse::<SecurityLogType>()
            .map_err(DatabaseError::Decode)?;
        Ok(Self {
            id: row.try_i64("id")?,
            created_at: row.try_timestamp("created_at")?,
            updated_at: row.try_timestamp("updated_at")?,
            client_ip_address_id: row.try_i64("client_ip_address_id")?,
            log_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepts_keys_and_tags() {
        for log_type in SecurityLogType::ALL {
            assert_eq!(log_type.as_key().parse::<SecurityLogType>().unwrap(), log_type);
            assert_eq!(log_type.as_tag().parse::<SecurityLogType>().unwrap(), log_type);
        }
        assert_eq!(
            "Failed User Login Log".parse::<SecurityLogType>().unwrap(),
            SecurityLogType::FailedUserLogin
        );
        assert_eq!(
            "invalid-event-url-guess".parse::<SecurityLogType>().unwrap(),
            SecurityLogType::InvalidEventUrlGuess
        );
        assert!("brute force".parse::<SecurityLogType>().is_err());
    }

    #[test]
    fn test_from_row_rejects_unknown_tag() {
        let now = Utc::now();
        let row = Row::new()
            .with("id", 1i64)
            .with("created_at", now)
            .with("updated_at", now)
            .with("client_ip_address_id", 3i64)
            .with("log_type", "SOMETHING ELSE");
        assert!(matches!(
            SecurityLog::from_row(&row),
            Err(DatabaseError::Decode(_))
        ));

        let row = row.with("log_type", "FAILED USER LOGIN LOG");
        let log = SecurityLog::from_row(&row).unwrap();
        assert_eq!(log.log_type, SecurityLogType::FailedUserLogin);
        assert_eq!(log.client_ip_address_id, 3);
    }
}
