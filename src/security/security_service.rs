/// 安全服务
///
/// 把策略表、限流器和执行模式组合成调用方直接使用的两个动作：
/// - `check`：请求进入敏感操作前调用。超限时（按策略）记录这次尝试并（按模式）拒绝
/// - `report`：敏感操作失败（或成功创建活动）后调用，追加一条安全事件
///
/// ## 分阶段启用策略
///
/// - ObserveOnly: 只记录、打点，不拒绝请求
/// - Enforce: 超限即拒绝
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::policy::{block_message, PolicyTable, SecurityPolicy};
use super::rate_limiter::AbuseRateLimiter;
use crate::error::{Result, ServerError};
use crate::infra::metrics;
use crate::model::SecurityLogType;

/// 安全模式（分阶段启用）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityMode {
    /// 观察模式（只记录，不拒绝）
    #[serde(alias = "observe")]
    ObserveOnly,
    /// 执行模式
    #[default]
    Enforce,
}

impl fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecurityMode::ObserveOnly => write!(f, "observe_only"),
            SecurityMode::Enforce => write!(f, "enforce"),
        }
    }
}

impl FromStr for SecurityMode {
    type Err = ServerError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "observe" | "observe_only" => Ok(SecurityMode::ObserveOnly),
            "enforce" => Ok(SecurityMode::Enforce),
            other => Err(ServerError::Configuration(format!(
                "unknown security mode '{}', expected observe_only or enforce",
                other
            ))),
        }
    }
}

/// 安全检查结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecurityCheckResult {
    /// 是否允许继续
    pub allowed: bool,
    pub log_type: SecurityLogType,
    /// 窗口内已超限（ObserveOnly 下 allowed 仍为 true）
    pub over_limit: bool,
    /// 拒绝原因（展示给用户）
    pub reason: Option<String>,
    /// 建议的等待分钟数
    pub retry_after_minutes: Option<u32>,
}

impl SecurityCheckResult {
    pub fn allow(log_type: SecurityLogType) -> Self {
        Self {
            allowed: true,
            log_type,
            over_limit: false,
            reason: None,
            retry_after_minutes: None,
        }
    }

    pub fn deny(log_type: SecurityLogType, reason: String, retry_after_minutes: u32) -> Self {
        Self {
            allowed: false,
            log_type,
            over_limit: true,
            reason: Some(reason),
            retry_after_minutes: Some(retry_after_minutes),
        }
    }

    /// 超限但只观察
    pub fn observed(log_type: SecurityLogType, reason: String) -> Self {
        Self {
            allowed: true,
            log_type,
            over_limit: true,
            reason: Some(reason),
            retry_after_minutes: None,
        }
    }

    /// 拒绝时转换成 `ServerError::RateLimit`
    pub fn into_result(self) -> Result<Self> {
        if self.allowed {
            return Ok(self);
        }
        Err(ServerError::RateLimit(self.reason.unwrap_or_else(|| {
            "too many attempts, please try again later".to_string()
        })))
    }
}

/// 安全配置
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityConfig {
    pub mode: SecurityMode,
    pub policies: PolicyTable,
}

impl SecurityConfig {
    /// 早期阶段：只观察
    pub fn observe_only() -> Self {
        Self {
            mode: SecurityMode::ObserveOnly,
            policies: PolicyTable::default(),
        }
    }
}

/// 安全服务
pub struct SecurityService {
    config: SecurityConfig,
    limiter: Arc<AbuseRateLimiter>,
}

impl SecurityService {
    pub fn new(config: SecurityConfig, limiter: Arc<AbuseRateLimiter>) -> Self {
        info!(
            "🛡️ 安全服务已启动（模式: {}）",
            config.mode
        );
        Self { config, limiter }
    }

    pub fn mode(&self) -> SecurityMode {
        self.config.mode
    }

    pub fn policy(&self, log_type: SecurityLogType) -> SecurityPolicy {
        self.config.policies.get(log_type)
    }

    pub fn limiter(&self) -> &Arc<AbuseRateLimiter> {
        &self.limiter
    }

    /// 敏感操作前检查
    ///
    /// 超限时，`record_on_block` 为真的类型会记录本次尝试，持续尝试会让窗口不断后移；
    /// 活动创建默认不记录，窗口过后即可再次创建。
    pub async fn check(&self, client_ip: &str, log_type: SecurityLogType) -> Result<SecurityCheckResult> {
        let policy = self.policy(log_type);
        let blocked = self
            .limiter
            .should_block(client_ip, log_type, policy.window_minutes, policy.max_allowed)
            .await?;

        if !blocked {
            debug!(log_type = %log_type, "安全检查通过");
            return Ok(SecurityCheckResult::allow(log_type));
        }

        if policy.should_record_blocked(log_type) {
            self.limiter.record_attempt(client_ip, log_type).await?;
        }
        metrics::record_security_block(log_type.as_tag());
        let reason = block_message(log_type, policy.window_minutes);

        match self.config.mode {
            SecurityMode::ObserveOnly => {
                warn!(
                    "⚠️ [ObserveOnly] {} 超限（{} 次 / {} 分钟，只记录）",
                    log_type, policy.max_allowed, policy.window_minutes
                );
                Ok(SecurityCheckResult::observed(log_type, reason))
            }
            SecurityMode::Enforce => {
                warn!(
                    "🚫 [Enforce] {} 超限（{} 次 / {} 分钟），拒绝",
                    log_type, policy.max_allowed, policy.window_minutes
                );
                Ok(SecurityCheckResult::deny(log_type, reason, policy.window_minutes))
            }
        }
    }

    /// 记录一次安全事件（登录失败、猜测失败、成功创建活动等）
    pub async fn report(&self, client_ip: &str, log_type: SecurityLogType) -> Result<i64> {
        Ok(self.limiter.record_attempt(client_ip, log_type).await?)
    }
}
