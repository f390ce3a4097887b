use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::generator::VariableResolver;
use crate::{ExecError, Result};

fn default_timeout() -> u64 {
    5
}

fn default_retries() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

/// 执行器的不可变配置，每个执行器构建一次
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecuterOptions {
    pub debug: bool,
    pub json: bool,
    /// JSON 输出中附带请求和响应
    pub json_requests: bool,
    pub cookie_reuse: bool,
    #[serde(default = "default_true")]
    pub colored_output: bool,
    /// 单个请求超时 (秒)，0 表示不限时
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
    pub proxy_url: Option<String>,
    pub proxy_socks_url: Option<String>,
    /// `Name: Value`，按顺序应用
    pub custom_headers: Vec<String>,
    pub stop_at_first_match: bool,
    /// 每个目标每秒的请求数，0 表示不限速
    pub rate_limit: u32,
}

impl Default for ExecuterOptions {
    fn default() -> Self {
        Self {
            debug: false,
            json: false,
            json_requests: false,
            cookie_reuse: false,
            colored_output: true,
            timeout: default_timeout(),
            retries: default_retries(),
            proxy_url: None,
            proxy_socks_url: None,
            custom_headers: Vec::new(),
            stop_at_first_match: false,
            rate_limit: 0,
        }
    }
}

impl ExecuterOptions {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout > 0).then(|| Duration::from_secs(self.timeout))
    }

    /// 解析字符串字段中的 ${VAR}
    fn resolve_env(mut self) -> Self {
        let resolve = |value: &mut Option<String>| {
            if let Some(v) = value {
                *v = VariableResolver::resolve_env_vars(v);
            }
        };
        resolve(&mut self.proxy_url);
        resolve(&mut self.proxy_socks_url);
        for header in &mut self.custom_headers {
            *header = VariableResolver::resolve_env_vars(header);
        }
        self
    }
}

/// 配置文件加载器
pub struct ConfigLoader;

impl ConfigLoader {
    /// 配置文件名
    const CONFIG_FILE: &'static str = "httpexec.toml";

    /// 从指定路径加载配置文件
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<ExecuterOptions> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            ExecError::Config(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        let options: ExecuterOptions = toml::from_str(&content)?;
        Ok(options.resolve_env())
    }

    /// 加载配置
    /// 查找顺序：
    /// 1. 显式指定的路径 (读取失败即报错)
    /// 2. 当前目录及其父目录
    /// 3. 用户配置目录 ~/.config/httpexec/
    /// 4. 默认值
    pub fn load(explicit: Option<&Path>) -> Result<ExecuterOptions> {
        if let Some(path) = explicit {
            return Self::load_from_path(path);
        }

        if let Some(options) = Self::find_and_load() {
            return Ok(options);
        }

        tracing::debug!("No config file found, using defaults");
        Ok(ExecuterOptions::default())
    }

    /// 查找并加载配置文件
    pub fn find_and_load() -> Option<ExecuterOptions> {
        Self::try_load_from_current_dir().or_else(Self::try_load_from_user_dir)
    }

    /// 尝试从当前目录及其父目录加载
    fn try_load_from_current_dir() -> Option<ExecuterOptions> {
        let mut current = std::env::current_dir().ok()?;

        loop {
            let config_path = current.join(Self::CONFIG_FILE);
            if config_path.exists() {
                return Self::load_logged(&config_path);
            }

            // 尝试父目录
            if !current.pop() {
                break;
            }
        }

        None
    }

    /// 尝试从用户配置目录加载
    fn try_load_from_user_dir() -> Option<ExecuterOptions> {
        let home = dirs::home_dir()?;
        let config_path = home
            .join(".config")
            .join("httpexec")
            .join(Self::CONFIG_FILE);

        if config_path.exists() {
            Self::load_logged(&config_path)
        } else {
            None
        }
    }

    fn load_logged(path: &Path) -> Option<ExecuterOptions> {
        match Self::load_from_path(path) {
            Ok(options) => {
                tracing::debug!("Loaded config from {}", path.display());
                Some(options)
            }
            Err(e) => {
                tracing::warn!("Ignoring config file {}: {}", path.display(), e);
                None
            }
        }
    }
}
