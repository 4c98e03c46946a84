//! Medical record audit ledger
//!
//! # 架构概述
//!
//! - **账本** (`ledger`): SHA-256 哈希链, 追加引擎, 多范围验证, 报告
//! - **病历** (`records`): 病历生命周期, 每次变更追加一个区块
//! - **核心** (`core`): 配置和状态
//!
//! # 模块结构
//!
//! ```text
//! ledger-server/src/
//! ├── core/          # 配置、状态
//! ├── ledger/        # 哈希链账本
//! ├── records/       # 病历存储和生命周期
//! └── utils/         # 日志
//! ```

pub mod core;
pub mod ledger;
pub mod records;
pub mod utils;

pub use core::{Config, LedgerState};
pub use ledger::{LedgerService, VerificationReport, VerifyScope};
pub use records::{RecordService, RecordStore};
pub use shared::error::{AppError, AppResult, ErrorCategory, ErrorCode};
pub use utils::logger::{init_logger, init_logger_with_file};

/// 设置环境 (dotenv, 日志)
///
/// Loads `.env` if present, then initializes logging from `LOG_LEVEL` /
/// `LOG_DIR`.
pub fn setup_environment() -> AppResult<Config> {
    // 缺少 .env 不是错误
    let _ = dotenv::dotenv();

    let config = Config::from_env();
    init_logger_with_file(
        Some(&config.log_level),
        Some(config.is_production()),
        config.log_dir.as_deref(),
    );
    Ok(config)
}

pub fn print_banner() {
    println!(
        r#"
    __         __
   / /__  ____/ /___ ____  _____
  / / _ \/ __  / __ `/ _ \/ ___/
 / /  __/ /_/ / /_/ /  __/ /
/_/\___/\__,_/\__, /\___/_/
             /____/
    "#
    );
}
