use std::path::PathBuf;
use std::time::Duration;

/// Ledger server configuration
///
/// # 环境变量
///
/// | 环境变量 | 默认值 | 说明 |
/// |----------|--------|------|
/// | WORK_DIR | /var/lib/medledger | 工作目录 |
/// | LEDGER_DB_FILE | ledger.redb | 账本数据库文件名 (相对 WORK_DIR) |
/// | ENVIRONMENT | development | 运行环境 |
/// | LOG_LEVEL | info | 日志级别 |
/// | LOG_DIR | (unset) | 滚动日志目录 |
/// | VERIFY_INTERVAL_SECS | 3600 | 定期全链验证间隔 |
/// | CLOCK_SKEW_TOLERANCE_MS | 0 | 未来时间戳容差 |
/// | APPEND_MAX_RETRIES | 3 | 条件写入重试次数 |
///
/// # 示例
///
/// ```ignore
/// WORK_DIR=/data/ledger VERIFY_INTERVAL_SECS=600 cargo run -p ledger-server
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// 工作目录，存放数据库和日志
    pub work_dir: String,
    pub ledger_db_file: String,
    /// 运行环境: development | staging | production
    pub environment: String,
    pub log_level: String,
    pub log_dir: Option<String>,
    pub verify_interval_secs: u64,
    pub clock_skew_tolerance_ms: i64,
    pub append_max_retries: u32,
}

impl Config {
    /// 从环境变量加载配置
    ///
    /// 如果环境变量未设置或无法解析，使用默认值
    pub fn from_env() -> Self {
        Self {
            work_dir: std::env::var("WORK_DIR").unwrap_or_else(|_| "/var/lib/medledger".into()),
            ledger_db_file: std::env::var("LEDGER_DB_FILE")
                .unwrap_or_else(|_| "ledger.redb".into()),
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            log_dir: std::env::var("LOG_DIR").ok().filter(|d| !d.trim().is_empty()),
            verify_interval_secs: std::env::var("VERIFY_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .unwrap_or(3600),
            clock_skew_tolerance_ms: std::env::var("CLOCK_SKEW_TOLERANCE_MS")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .filter(|ms| *ms >= 0)
                .unwrap_or(0),
            append_max_retries: std::env::var("APPEND_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
        }
    }

    /// 使用自定义工作目录覆盖配置
    ///
    /// 常用于测试场景
    pub fn with_work_dir(work_dir: impl Into<String>) -> Self {
        let mut config = Self::from_env();
        config.work_dir = work_dir.into();
        config
    }

    /// Full path of the ledger database
    pub fn ledger_db_path(&self) -> PathBuf {
        PathBuf::from(&self.work_dir).join(&self.ledger_db_file)
    }

    pub fn verify_interval(&self) -> Duration {
        Duration::from_secs(self.verify_interval_secs)
    }

    /// 是否生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// 是否开发环境
    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
