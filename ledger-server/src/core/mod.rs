//! 核心模块 - 配置和状态
//!
//! - [`Config`] - 服务器配置
//! - [`LedgerState`] - 服务器状态

pub mod config;
pub mod state;

pub use config::Config;
pub use state::LedgerState;
