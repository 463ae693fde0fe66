//! 限流策略表：事件类型 -> (窗口分钟数, 触发拦截的次数)

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::SecurityLogType;

/// 单个事件类型的策略
///
/// 窗口内已有 `max_allowed` 条及以上事件时拦截。
/// `record_on_block` 未设置时按事件类型取默认值，见 [`records_blocked_attempt`]。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityPolicy {
    pub window_minutes: u32,
    pub max_allowed: u32,
    /// 被拦截的尝试是否也写入安全事件
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_on_block: Option<bool>,
}

impl SecurityPolicy {
    pub const fn new(window_minutes: u32, max_allowed: u32) -> Self {
        Self {
            window_minutes,
            max_allowed,
            record_on_block: None,
        }
    }

    pub const fn with_record_on_block(mut self, record: bool) -> Self {
        self.record_on_block = Some(record);
        self
    }

    /// 拦截时是否记录这次尝试
    pub fn should_record_blocked(&self, log_type: SecurityLogType) -> bool {
        self.record_on_block
            .unwrap_or_else(|| records_blocked_attempt(log_type))
    }

    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.window_minutes))
    }

    /// 默认策略
    pub const fn default_for(log_type: SecurityLogType) -> Self {
        match log_type {
            // 每个窗口只允许创建一次
            SecurityLogType::EventCreation => Self::new(2, 1),
            SecurityLogType::FailedUserLogin => Self::new(15, 2),
            SecurityLogType::FailedAttendeeLogin => Self::new(15, 2),
            SecurityLogType::FailedPrivateKeyGuess => Self::new(15, 2),
            SecurityLogType::InvalidEventUrlGuess => Self::new(30, 4),
        }
    }
}

/// 拦截时是否记录这次尝试的默认值
///
/// 活动创建只在真正创建成功后记录，被拦截的创建请求不算一次创建；
/// 其余类型的每次尝试本身就是可疑行为，拦截时照样记录。
pub const fn records_blocked_attempt(log_type: SecurityLogType) -> bool {
    !matches!(log_type, SecurityLogType::EventCreation)
}

/// 策略表
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyTable {
    policies: HashMap<SecurityLogType, SecurityPolicy>,
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self {
            policies: SecurityLogType::ALL
                .into_iter()
                .map(|t| (t, SecurityPolicy::default_for(t)))
                .collect(),
        }
    }
}

impl PolicyTable {
    pub fn get(&self, log_type: SecurityLogType) -> SecurityPolicy {
        self.policies
            .get(&log_type)
            .copied()
            .unwrap_or_else(|| SecurityPolicy::default_for(log_type))
    }

    pub fn set(&mut self, log_type: SecurityLogType, policy: SecurityPolicy) {
        self.policies.insert(log_type, policy);
    }

    /// 按固定顺序遍历
    pub fn iter(&self) -> impl Iterator<Item = (SecurityLogType, SecurityPolicy)> + '_ {
        SecurityLogType::ALL.into_iter().map(|t| (t, self.get(t)))
    }
}

/// 拦截时展示给用户的提示
pub fn block_message(log_type: SecurityLogType, window_minutes: u32) -> String {
    match log_type {
        SecurityLogType::EventCreation => format!(
            "To reduce bot activity, each person is limited to creating one event per {} minutes. \
             Please wait before trying again.",
            window_minutes
        ),
        SecurityLogType::FailedUserLogin => format!(
            "You have failed to login too many times. \
             For security purposes, please wait {} minutes before trying again.",
            window_minutes
        ),
        SecurityLogType::FailedAttendeeLogin => format!(
            "You have failed to login as an attendee too many times. \
             Please wait {} minutes before trying again.",
            window_minutes
        ),
        SecurityLogType::FailedPrivateKeyGuess => format!(
            "You have guessed an event's secret key too many times. \
             Please wait {} minutes before trying again.",
            window_minutes
        ),
        SecurityLogType::InvalidEventUrlGuess => format!(
            "It seems as though you are trying to guess an event URL. \
             Access to events will be blocked for the next {} minutes.",
            window_minutes
        ),
    }
}
