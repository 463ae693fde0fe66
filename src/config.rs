use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::infra::database::{ConnectionSettings, DEFAULT_ACQUIRE_TIMEOUT};
use crate::model::SecurityLogType;
use crate::security::{PolicyTable, SecurityConfig, SecurityMode, SecurityPolicy};

/// 默认的逻辑库名
pub const DEFAULT_DB_NAME: &str = "shareable_events_schema";

/// 默认配置文件
pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

/// 完整配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub database: DatabaseConfig,
    pub security: SecuritySection,
    pub logging: LoggingConfig,
}

/// [database]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// 默认逻辑库名
    pub name: String,
    /// 排队等待上限（秒），0 表示不限
    pub acquire_timeout_secs: u64,
    /// 各逻辑库的连接参数
    pub connections: Vec<ConnectionSettings>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_DB_NAME.to_string(),
            acquire_timeout_secs: DEFAULT_ACQUIRE_TIMEOUT.as_secs(),
            connections: vec![ConnectionSettings::new(DEFAULT_DB_NAME)],
        }
    }
}

impl DatabaseConfig {
    pub fn acquire_timeout(&self) -> Option<Duration> {
        match self.acquire_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// 找到（或新建）某个库名的连接参数
    fn connection_mut(&mut self, name: &str) -> &mut ConnectionSettings {
        let idx = match self.connections.iter().position(|c| c.name == name) {
            Some(idx) => idx,
            None => {
                self.connections.push(ConnectionSettings::new(name));
                self.connections.len() - 1
            }
        };
        &mut self.connections[idx]
    }

    /// 新增或替换同名连接参数
    fn upsert(&mut self, settings: ConnectionSettings) {
        let name = settings.name.clone();
        *self.connection_mut(&name) = settings;
    }
}

/// [security]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySection {
    pub mode: SecurityMode,
    /// 混入哈希的密钥（可选）
    pub ip_hash_key: Option<String>,
    /// 覆盖默认策略，键为事件类型短名
    pub policies: BTreeMap<String, SecurityPolicy>,
}

impl Default for SecuritySection {
    fn default() -> Self {
        Self {
            mode: SecurityMode::default(),
            ip_hash_key: None,
            policies: BTreeMap::new(),
        }
    }
}

impl SecuritySection {
    /// 合并默认策略与覆盖项
    pub fn policy_table(&self) -> Result<PolicyTable> {
        let mut table = PolicyTable::default();
        for (key, policy) in &self.policies {
            let log_type: SecurityLogType = key
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))
                .with_context(|| format!("[security.policies.{}]", key))?;
            table.set(log_type, *policy);
        }
        Ok(table)
    }

    pub fn security_config(&self) -> Result<SecurityConfig> {
        Ok(SecurityConfig {
            mode: self.mode,
            policies: self.policy_table()?,
        })
    }
}

/// [logging]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: Option<String>,
    pub format: Option<String>,
    pub file: Option<String>,
}

/// 日志初始化之前读取的 [logging] 段
#[derive(Debug, Default, Deserialize)]
struct EarlyConfig {
    #[serde(default)]
    logging: LoggingConfig,
}

/// 快速读取配置文件的 [logging] 段（不加载完整配置，读取失败时返回默认值）
pub fn load_early_logging_config(config_file: Option<&str>) -> LoggingConfig {
    let path = config_file.unwrap_or(DEFAULT_CONFIG_FILE);
    fs::read_to_string(path)
        .ok()
        .and_then(|content| toml::from_str::<EarlyConfig>(&content).ok())
        .map(|early| early.logging)
        .unwrap_or_default()
}

impl GuardConfig {
    /// 从 TOML 字符串解析
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("配置文件格式错误")
    }

    /// 从 TOML 文件加载配置
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("无法读取配置文件: {:?}", path.as_ref()))?;
        Self::from_toml_str(&content)
    }

    /// 从环境变量合并配置
    pub fn merge_from_env(&mut self) -> Result<()> {
        self.merge_from_vars(|key| env::var(key).ok())
    }

    /// 按给定的变量查找函数合并
    pub fn merge_from_vars<F>(&mut self, var: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = var("DATABASE_URL") {
            self.apply_database_url(&url)?;
        }
        if let Some(name) = var("GUARD_DB_NAME") {
            self.database.name = name;
        }

        let default_name = self.database.name.clone();
        if let Some(host) = var("GUARD_DB_HOST") {
            self.database.connection_mut(&default_name).host = host;
        }
        if let Some(port) = var("GUARD_DB_PORT") {
            self.database.connection_mut(&default_name).port = port
                .parse()
                .with_context(|| format!("GUARD_DB_PORT 不是有效端口: {}", port))?;
        }
        if let Some(user) = var("GUARD_DB_USER") {
            self.database.connection_mut(&default_name).user = user;
        }
        if let Some(password) = var("GUARD_DB_PASSWORD") {
            self.database.connection_mut(&default_name).password = password;
        }
        if let Some(secs) = var("GUARD_ACQUIRE_TIMEOUT_SECS") {
            self.database.acquire_timeout_secs = secs
                .parse()
                .with_context(|| format!("GUARD_ACQUIRE_TIMEOUT_SECS 不是有效数字: {}", secs))?;
        }
        if let Some(mode) = var("GUARD_SECURITY_MODE") {
            self.security.mode = mode.parse()?;
        }
        if let Some(key) = var("GUARD_IP_HASH_KEY") {
            self.security.ip_hash_key = Some(key);
        }
        if let Some(level) = var("GUARD_LOG_LEVEL") {
            self.logging.level = Some(level);
        }
        Ok(())
    }

    /// 从命令行参数合并配置
    pub fn merge_from_cli(&mut self, cli: &crate::cli::Cli) -> Result<()> {
        if let Some(url) = &cli.database_url {
            self.apply_database_url(url)?;
        }
        if let Some(name) = &cli.db_name {
            self.database.name = name.clone();
        }
        if let Some(secs) = cli.acquire_timeout_secs {
            self.database.acquire_timeout_secs = secs;
        }
        if let Some(mode) = &cli.security_mode {
            self.security.mode = mode.parse()?;
        }
        if let Some(level) = cli.get_log_level() {
            self.logging.level = Some(level);
        }
        if let Some(format) = cli.get_log_format() {
            self.logging.format = Some(format);
        }
        if let Some(file) = &cli.log_file {
            self.logging.file = Some(file.clone());
        }
        Ok(())
    }

    /// 加载配置（按优先级：命令行 > 环境变量 > 配置文件 > 默认值）
    pub fn load(cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = match &cli.config_file {
            Some(config_file) if Path::new(config_file).exists() => {
                info!("📄 从配置文件加载: {}", config_file);
                Self::from_toml_file(config_file)?
            }
            Some(config_file) => {
                warn!("⚠️ 配置文件不存在: {}", config_file);
                Self::default()
            }
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                info!("📄 从默认配置文件加载: {}", DEFAULT_CONFIG_FILE);
                Self::from_toml_file(DEFAULT_CONFIG_FILE)?
            }
            None => Self::default(),
        };

        config.merge_from_env()?;
        config.merge_from_cli(cli)?;
        config.validate()?;

        Ok(config)
    }

    /// 检查配置是否可用
    pub fn validate(&self) -> Result<()> {
        if self.database.connections.is_empty() {
            bail!("至少需要一个 [[database.connections]]");
        }
        if !self
            .database
            .connections
            .iter()
            .any(|c| c.name == self.database.name)
        {
            bail!(
                "默认数据库 '{}' 不在 [[database.connections]] 中",
                self.database.name
            );
        }
        for (log_type, policy) in self.security.policy_table()?.iter() {
            if policy.window_minutes == 0 || policy.max_allowed == 0 {
                bail!(
                    "策略 {} 的 window_minutes 和 max_allowed 必须大于 0",
                    log_type
                );
            }
        }
        Ok(())
    }

    /// 隐藏密码后的副本（用于展示）
    pub fn masked(&self) -> Self {
        let mut masked = self.clone();
        for conn in &mut masked.database.connections {
            if !conn.password.is_empty() {
                conn.password = "***".to_string();
            }
        }
        if masked.security.ip_hash_key.is_some() {
            masked.security.ip_hash_key = Some("***".to_string());
        }
        masked
    }

    fn apply_database_url(&mut self, url: &str) -> Result<()> {
        let settings = ConnectionSettings::from_database_url(url)
            .context("DATABASE_URL 无效")?;
        self.database.name = settings.name.clone();
        self.database.upsert(settings);
        Ok(())
    }
}

/// `generate-config` 输出的默认配置
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# Shareable Events Guard 配置文件
# 此文件由 shareable-events-guard generate-config 生成

[database]
name = "shareable_events_schema"
# 排队等待上限（秒），0 表示不限
acquire_timeout_secs = 30

[[database.connections]]
name = "shareable_events_schema"
host = "localhost"
port = 5432
user = "root"
password = "root"

[security]
# "observe_only" 只记录不拦截，"enforce" 超限即拦截
mode = "enforce"
# ip_hash_key = ""

[security.policies.event_creation]
window_minutes = 2
max_allowed = 1
# 被拦截的创建请求不记录（其余类型默认记录）
record_on_block = false

[security.policies.failed_user_login]
window_minutes = 15
max_allowed = 2

[security.policies.failed_attendee_login]
window_minutes = 15
max_allowed = 2

[security.policies.failed_private_key_guess]
window_minutes = 15
max_allowed = 2

[security.policies.invalid_event_url_guess]
window_minutes = 30
max_allowed = 4

[logging]
level = "info"
format = "compact"
# file = "./logs/guard.log"
"#;
