pub mod config;
pub mod error;
pub mod models;
pub mod validation;

// ============ 重新导出常用类型 ============

// 错误处理
pub use error::WebfrontError;

// 配置相关
pub use config::AppConfig;

// 站点模型
pub use models::{Site, SitePayload};

// 验证相关
pub use validation::validate_payload;

// 结果类型
pub use error::Result;
