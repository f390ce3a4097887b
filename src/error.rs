use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("请求构建失败: {0}")]
    Build(String),

    #[error("无效的目标: {0}")]
    InvalidTarget(String),

    #[error("HTTP 请求失败: {0}")]
    Http(#[from] reqwest::Error),

    #[error("传输错误: {0}")]
    Transport(String),

    #[error("响应解析错误: {0}")]
    Protocol(String),

    #[error("解压失败: {0}")]
    Decompress(String),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS 错误: {0}")]
    Tls(#[from] native_tls::Error),

    #[error("JSON 解析错误: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL 解析错误: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<ExecError>,
    },

    #[error("{0}")]
    Other(String),
}

impl ExecError {
    /// 为错误附加上下文信息
    pub fn context(self, context: impl Into<String>) -> Self {
        ExecError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// 剥离所有上下文，返回最内层的错误
    pub fn root(&self) -> &ExecError {
        match self {
            ExecError::Context { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<anyhow::Error> for ExecError {
    fn from(err: anyhow::Error) -> Self {
        ExecError::Other(err.to_string())
    }
}

impl From<toml::de::Error> for ExecError {
    fn from(err: toml::de::Error) -> Self {
        ExecError::Config(err.to_string())
    }
}

/// Result type for httpexec crate
pub type Result<T> = std::result::Result<T, ExecError>;

/// 为 `Result` 附加上下文，等价于 `map_err(|e| e.context(..))`
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T, E: Into<ExecError>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().context(context))
    }
}
