use anyhow::{Context, Result};
use shareable_events_guard::{
    cli::{Cli, Commands},
    config::{self, GuardConfig},
    logging, GuardApp, SecurityLogType, ServerError,
};
use std::fs;
use std::process;

#[tokio::main]
async fn main() -> Result<()> {
    // 加载 .env 文件（如果存在）
    let _ = dotenvy::dotenv();

    // 解析命令行参数
    let cli = Cli::parse();

    // 不需要日志和数据库的子命令
    match &cli.command {
        Commands::GenerateConfig { path } => return generate_config(path),
        Commands::ValidateConfig { path } => return validate_config(path),
        _ => {}
    }

    // 快速读取 config.toml 的 [logging] 段（不加载完整配置）
    let early_log = config::load_early_logging_config(cli.config_file.as_deref());

    // 合并日志配置（优先级：CLI > config.toml > 默认值）
    let log_level = cli
        .get_log_level()
        .or(early_log.level)
        .unwrap_or_else(|| "warn".to_string());
    let log_format = cli.get_log_format().or(early_log.format);
    let log_file = cli.log_file.clone().or(early_log.file);

    // guard 在 main 结束前保持存活
    let log_guard = logging::init_logging(
        &log_level,
        log_format.as_deref(),
        log_file.as_deref(),
        cli.quiet,
    )?;

    // 加载配置（按优先级：命令行 > 环境变量 > 配置文件 > 默认值）
    let config = GuardConfig::load(&cli).context("加载配置失败")?;

    if let Commands::ShowConfig = &cli.command {
        return show_config(&config);
    }

    let app = GuardApp::new(&config).context("初始化失败")?;

    let outcome = match &cli.command {
        Commands::Check { ip, category } => run_check(&app, ip, *category).await,
        Commands::Report { ip, category } => run_report(&app, ip, *category).await,
        Commands::Attempt { ip, category } => run_attempt(&app, ip, *category).await,
        Commands::History { ip, category } => run_history(&app, ip, *category).await,
        Commands::Exceptions { limit } => run_exceptions(&app, *limit).await,
        Commands::GenerateConfig { .. } | Commands::ValidateConfig { .. } | Commands::ShowConfig => {
            Ok(())
        }
    };

    if let Err(e) = outcome {
        tracing::error!("❌ 执行失败: {}", e);
        let message = app.record_failure(&e).await;
        eprintln!("❌ {}", message);
        // process::exit 不执行析构，先刷出文件日志
        drop(log_guard);
        process::exit(1);
    }

    Ok(())
}

/// 只读检查，不写入事件
async fn run_check(app: &GuardApp, ip: &str, category: SecurityLogType) -> Result<(), ServerError> {
    let security = app.security();
    let policy = security.policy(category);
    let limiter = security.limiter();

    let count = limiter
        .recent_count(ip, category, policy.window_minutes)
        .await?;
    let blocked = limiter
        .should_block(ip, category, policy.window_minutes, policy.max_allowed)
        .await?;

    println!(
        "{} {} / {}: {} 次（{} 分钟内，阈值 {}）",
        if blocked { "🚫" } else { "✅" },
        ip,
        category,
        count,
        policy.window_minutes,
        policy.max_allowed
    );
    if blocked {
        println!("   {}", shareable_events_guard::security::block_message(category, policy.window_minutes));
    }
    Ok(())
}

async fn run_report(app: &GuardApp, ip: &str, category: SecurityLogType) -> Result<(), ServerError> {
    let id = app.security().report(ip, category).await?;
    println!("✅ 已记录安全事件 #{} ({})", id, category.as_tag());
    Ok(())
}

/// 先检查，通过后记录这次尝试
async fn run_attempt(app: &GuardApp, ip: &str, category: SecurityLogType) -> Result<(), ServerError> {
    let result = app.security().check(ip, category).await?;
    if !result.allowed {
        return result.into_result().map(|_| ());
    }
    if result.over_limit {
        println!("⚠️ 已超限（观察模式，未拦截）");
    }
    let id = app.security().report(ip, category).await?;
    println!("✅ 允许，已记录安全事件 #{}", id);
    Ok(())
}

async fn run_history(
    app: &GuardApp,
    ip: &str,
    category: Option<SecurityLogType>,
) -> Result<(), ServerError> {
    let logs = app.security().limiter().history(ip, category).await?;
    if logs.is_empty() {
        println!("📭 没有记录");
        return Ok(());
    }
    for log in &logs {
        println!(
            "  #{:<6} {} {}",
            log.id,
            log.created_at.format("%Y-%m-%d %H:%M:%S"),
            log.log_type.as_tag()
        );
    }
    println!("📊 共 {} 条", logs.len());
    Ok(())
}

async fn run_exceptions(app: &GuardApp, limit: i64) -> Result<(), ServerError> {
    let exceptions = app.exceptions().list_all(Some(limit)).await?;
    for exception in &exceptions {
        println!(
            "  #{:<6} {} [{}] {}",
            exception.id,
            exception.created_at.format("%Y-%m-%d %H:%M:%S"),
            exception.kind,
            exception.message
        );
    }
    println!("📊 共 {} 条", exceptions.len());
    Ok(())
}

/// 生成默认配置文件
fn generate_config(path: &str) -> Result<()> {
    fs::write(path, config::DEFAULT_CONFIG_TEMPLATE)
        .with_context(|| format!("无法写入配置文件: {}", path))?;

    println!("✅ 配置文件已生成: {}", path);
    Ok(())
}

/// 验证配置文件
fn validate_config(path: &str) -> Result<()> {
    let config = GuardConfig::from_toml_file(path)
        .with_context(|| format!("配置文件验证失败: {}", path))?;
    config
        .validate()
        .with_context(|| format!("配置文件验证失败: {}", path))?;

    println!("✅ 配置文件有效: {}", path);
    println!("📊 配置摘要:");
    println!("  - Database: {}", config.database.name);
    println!("  - Connections: {}", config.database.connections.len());
    println!("  - Acquire Timeout: {}s", config.database.acquire_timeout_secs);
    println!("  - Security Mode: {}", config.security.mode);

    Ok(())
}

/// 显示最终配置（合并后的配置）
fn show_config(config: &GuardConfig) -> Result<()> {
    println!("📊 最终配置（合并后的配置）:");
    println!("{}", serde_json::to_string_pretty(&config.masked())?);
    Ok(())
}
