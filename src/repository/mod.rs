//! 数据访问层
//!
//! Repository trait 定义在各自的模块中；SQL 实现全部经过串行化访问核心
//! （`infra::database`），内存实现用于测试与本地演示。
//! 关联记录不在实体内部缓存，需要时由调用方显式查询。

pub mod client_ip_repo;
pub mod memory;
pub mod security_log_repo;
pub mod site_exception_repo;

pub use client_ip_repo::{ClientIpRepository, SqlClientIpRepository};
pub use memory::InMemorySecurityStore;
pub use security_log_repo::{SecurityLogRepository, SqlSecurityLogRepository};
pub use site_exception_repo::SiteExceptionRepository;
