use clap::{Parser, Subcommand};

use crate::model::SecurityLogType;

impl Cli {
    /// 解析命令行参数
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}

/// Shareable Events Guard - 串行化数据库访问与滥用限流工具
#[derive(Parser, Debug)]
#[command(name = "shareable-events-guard")]
#[command(version)]
#[command(about = "按客户端地址统计可疑行为并决定是否拦截", long_about = None)]
pub struct Cli {
    /// 配置文件路径
    #[arg(long, value_name = "FILE", help = "指定配置文件路径", global = true)]
    pub config_file: Option<String>,

    /// 日志级别
    #[arg(
        long,
        value_name = "LEVEL",
        help = "日志级别: trace, debug, info, warn, error",
        global = true
    )]
    pub log_level: Option<String>,

    /// 日志格式
    #[arg(long, value_name = "FORMAT", help = "日志格式: pretty, json, compact", global = true)]
    pub log_format: Option<String>,

    /// 日志文件路径
    #[arg(long, value_name = "PATH", help = "日志输出文件路径", global = true)]
    pub log_file: Option<String>,

    /// 数据库连接 URL
    #[arg(long, value_name = "URL", help = "数据库连接字符串", global = true)]
    pub database_url: Option<String>,

    /// 默认逻辑库名
    #[arg(long, value_name = "NAME", help = "默认逻辑库名", global = true)]
    pub db_name: Option<String>,

    /// 排队等待上限（秒）
    #[arg(long, value_name = "SECS", help = "排队等待上限（秒），0 表示不限", global = true)]
    pub acquire_timeout_secs: Option<u64>,

    /// 安全模式
    #[arg(long, value_name = "MODE", help = "安全模式: observe_only, enforce", global = true)]
    pub security_mode: Option<String>,

    /// 详细输出（可重复使用：-v, -vv, -vvv）
    #[arg(short, action = clap::ArgAction::Count, help = "详细输出级别", global = true)]
    pub verbose: u8,

    /// 静默模式
    #[arg(long, short = 'q', help = "静默模式（不输出日志）", global = true)]
    pub quiet: bool,

    /// 开发模式（等同于 --log-level debug --log-format pretty）
    #[arg(long, help = "启用开发模式", global = true)]
    pub dev: bool,

    /// 子命令
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 查询某地址在某类事件上是否被拦截（不写入）
    Check {
        #[arg(long, value_name = "ADDR")]
        ip: String,
        #[arg(long, value_name = "CATEGORY")]
        category: SecurityLogType,
    },
    /// 记录一次可疑尝试
    Report {
        #[arg(long, value_name = "ADDR")]
        ip: String,
        #[arg(long, value_name = "CATEGORY")]
        category: SecurityLogType,
    },
    /// 先检查再记录（与业务入口的处理一致）
    Attempt {
        #[arg(long, value_name = "ADDR")]
        ip: String,
        #[arg(long, value_name = "CATEGORY")]
        category: SecurityLogType,
    },
    /// 列出某地址的安全事件
    History {
        #[arg(long, value_name = "ADDR")]
        ip: String,
        #[arg(long, value_name = "CATEGORY")]
        category: Option<SecurityLogType>,
    },
    /// 列出最近的异常记录
    Exceptions {
        #[arg(long, value_name = "NUM", default_value_t = 20)]
        limit: i64,
    },
    /// 生成默认配置文件
    GenerateConfig {
        /// 输出文件路径
        #[arg(value_name = "PATH", default_value = "config.toml")]
        path: String,
    },
    /// 验证配置文件
    ValidateConfig {
        /// 配置文件路径
        #[arg(value_name = "PATH", default_value = "config.toml")]
        path: String,
    },
    /// 显示最终配置（合并后的配置，隐藏密码）
    ShowConfig,
}

impl Cli {
    /// 获取日志级别（考虑 verbose 和 quiet）
    pub fn get_log_level(&self) -> Option<String> {
        if self.quiet {
            return Some("error".to_string());
        }

        if self.dev {
            return Some("debug".to_string());
        }

        if let Some(level) = &self.log_level {
            return Some(level.clone());
        }

        // 根据 verbose 级别设置
        match self.verbose {
            0 => None, // 使用默认或配置文件
            1 => Some("info".to_string()),
            2 => Some("debug".to_string()),
            _ => Some("trace".to_string()),
        }
    }

    /// 获取日志格式
    pub fn get_log_format(&self) -> Option<String> {
        if self.dev {
            return Some("pretty".to_string());
        }
        self.log_format.clone()
    }
}
