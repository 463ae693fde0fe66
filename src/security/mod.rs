/// 安全模块
///
/// 按客户端地址（哈希后）统计可疑行为，超过策略阈值时拦截：
/// - 登录失败、参与者登录失败、私钥猜测
/// - 活动 URL 猜测
/// - 频繁创建活动
///
/// ## 分阶段启用策略
///
/// 通过 `SecurityMode` 控制：
/// - `ObserveOnly`: 只记录，不拦截
/// - `Enforce`: 超限即拦截
pub mod client_addr;
pub mod policy;
pub mod rate_limiter;
pub mod security_service;

pub use client_addr::resolve_client_ip;
pub use policy::{block_message, records_blocked_attempt, PolicyTable, SecurityPolicy};
pub use rate_limiter::AbuseRateLimiter;
pub use security_service::{SecurityCheckResult, SecurityConfig, SecurityMode, SecurityService};
