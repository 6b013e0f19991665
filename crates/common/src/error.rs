//! Webfront 统一错误类型定义
//!
//! 全项目共享一个错误类型，简化错误传播和处理。

use thiserror::Error;

/// Webfront 统一错误类型
#[derive(Error, Debug)]
pub enum WebfrontError {
    /// 资源未找到 (404)
    #[error("资源未找到: {0}")]
    NotFound(String),

    /// 请求参数错误 (400)
    #[error("请求参数错误: {0}")]
    BadRequest(String),

    /// 站点配置验证错误 (400)
    #[error("配置验证失败: {0}")]
    Validation(String),

    /// 未认证或令牌无效 (401)
    #[error("认证失败: {0}")]
    Unauthorized(String),

    /// 证书颁发机构或 DNS 服务拒绝请求 (500)
    #[error("证书签发错误: {0}")]
    Issuance(String),

    /// 轮询签发状态超时 (500)
    #[error("证书签发超时: {0}")]
    IssuanceTimeout(String),

    /// 代理配置检查或重载失败 (500)
    #[error("代理重载失败: {0}")]
    Reload(String),

    /// IO 错误 (500)
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 序列化错误 (500)
    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 其他内部错误 (500)
    #[error("内部错误: {0}")]
    Internal(#[from] anyhow::Error),
}

impl WebfrontError {
    /// 创建未找到错误
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound(resource.into())
    }

    /// 创建验证错误
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// 创建认证错误
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    /// 创建签发错误
    pub fn issuance(msg: impl Into<String>) -> Self {
        Self::Issuance(msg.into())
    }

    /// 创建签发超时错误
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::IssuanceTimeout(msg.into())
    }

    /// 创建重载错误
    pub fn reload(msg: impl Into<String>) -> Self {
        Self::Reload(msg.into())
    }

    /// 判断是否为客户端错误（4xx）
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::BadRequest(_) | Self::Validation(_) | Self::Unauthorized(_)
        )
    }

    /// 判断是否为服务端错误（5xx）
    pub fn is_server_error(&self) -> bool {
        !self.is_client_error()
    }

    /// 获取 HTTP 状态码
    pub fn http_status_code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::BadRequest(_) | Self::Validation(_) => 400,
            Self::Unauthorized(_) => 401,
            _ => 500,
        }
    }

    /// 获取 HTTP 状态码（axum 类型）
    #[cfg(feature = "control-plane")]
    pub fn axum_status_code(&self) -> axum::http::StatusCode {
        axum::http::StatusCode::from_u16(self.http_status_code())
            .unwrap_or(axum::http::StatusCode::INTERNAL_SERVER_ERROR)
    }
}

/// Webfront Result 类型别名
pub type Result<T> = std::result::Result<T, WebfrontError>;

// ============ Axum HTTP 响应支持 ============

#[cfg(feature = "control-plane")]
mod axum_impl {
    use super::*;
    use axum::{
        Json,
        response::{IntoResponse, Response},
    };
    use serde_json::json;

    /// 为 WebfrontError 实现 Axum IntoResponse trait
    impl IntoResponse for WebfrontError {
        fn into_response(self) -> Response {
            let status = self.axum_status_code();

            // 根据错误类型和严重程度记录结构化日志
            match &self {
                // 客户端错误（4xx）- info 级别
                WebfrontError::NotFound(resource) => {
                    tracing::info!(status = status.as_u16(), resource = %resource, "Resource not found");
                }
                WebfrontError::BadRequest(msg) => {
                    tracing::info!(status = status.as_u16(), reason = %msg, "Bad request");
                }
                WebfrontError::Validation(msg) => {
                    tracing::info!(
                        status = status.as_u16(),
                        validation_error = %msg,
                        "Request validation failed"
                    );
                }
                WebfrontError::Unauthorized(msg) => {
                    tracing::info!(status = status.as_u16(), reason = %msg, "Unauthorized request");
                }
                // 签发相关 - warn 级别，通常与外部服务有关
                WebfrontError::Issuance(msg) | WebfrontError::IssuanceTimeout(msg) => {
                    tracing::warn!(status = status.as_u16(), issuance_error = %msg, "Issuance failed");
                }
                WebfrontError::Reload(msg) => {
                    tracing::warn!(status = status.as_u16(), reload_error = %msg, "Proxy reload failed");
                }
                // 其他服务端错误 - error 级别
                WebfrontError::Io(io_err) => {
                    tracing::error!(status = status.as_u16(), io_error = %io_err, "IO operation failed");
                }
                WebfrontError::Serialization(json_err) => {
                    tracing::error!(
                        status = status.as_u16(),
                        serialization_error = %json_err,
                        "JSON serialization failed"
                    );
                }
                WebfrontError::Internal(internal_err) => {
                    tracing::error!(
                        status = status.as_u16(),
                        internal_error = ?internal_err,
                        "Internal server error"
                    );
                }
            }

            let body = Json(json!({"error": self.to_string()}));
            (status, body).into_response()
        }
    }
}
