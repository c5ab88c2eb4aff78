use thiserror::Error;

/// 沙箱执行错误
///
/// 除 `Cancelled` 外，其余错误在运行器边界处都会被转换为
/// `ExecutionStatus::SystemError` 的执行结果，不会直接抛给调用方。
#[derive(Debug, Error)]
pub enum SandboxError {
    /// 创建临时工作区失败
    #[error("无法创建临时工作区: {source}")]
    Workspace {
        #[source]
        source: std::io::Error,
    },
    /// 启动解释器失败
    #[error("无法启动解释器 {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    /// 等待进程或读取输出失败
    #[error("进程 I/O 失败: {0}")]
    Io(#[from] std::io::Error),
    /// 提交已被更新的提交取代
    #[error("执行已被取消")]
    Cancelled,
}

/// 外部能力的调用错误
///
/// 适配层只返回这两类错误，由策略层决定如何降级。
#[derive(Debug, Error)]
pub enum BackendError {
    /// 服务不可用（网络、配额、超时、空响应等）
    #[error("{capability} 服务不可用: {source}")]
    Unavailable {
        capability: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 服务返回了无法解析的内容
    #[error("{capability} 返回内容无法解析")]
    Malformed {
        capability: &'static str,
        raw: String,
    },
}

impl BackendError {
    /// 创建服务不可用错误
    pub fn unavailable(
        capability: &'static str,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        BackendError::Unavailable {
            capability,
            source: source.into(),
        }
    }

    /// 创建响应格式错误
    pub fn malformed(capability: &'static str, raw: impl Into<String>) -> Self {
        BackendError::Malformed {
            capability,
            raw: raw.into(),
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, BackendError::Unavailable { .. })
    }
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 读取配置文件失败
    #[error("读取配置文件失败 ({path}): {source}")]
    ReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// TOML 解析失败
    #[error("TOML解析失败 ({path}): {source}")]
    TomlParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}
