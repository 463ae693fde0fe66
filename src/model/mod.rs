//! 数据模型模块

pub mod client_ip_address;
pub mod security_log;
pub mod site_exception;

pub use client_ip_address::{ClientIpAddress, IpHasher};
pub use security_log::{SecurityLog, SecurityLogType};
pub use site_exception::SiteException;
