use std::collections::HashMap;

use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use url::Url;

use crate::{ExecError, Result};

/// 请求的发送通道
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transmission {
    /// reqwest 客户端，带连接池、重试和重定向策略
    Standard,
    /// 用户手写的原始报文，直接写到 socket
    Raw {
        auto_content_length: bool,
        auto_host_header: bool,
    },
    /// 复用长连接的 HTTP pipelining，不经过限速器
    Pipelined,
}

impl Transmission {
    /// 原始报文通道中 header 名大小写敏感
    pub fn is_wire_level(&self) -> bool {
        !matches!(self, Transmission::Standard)
    }
}

/// 一个已经完全解析好的待发送请求
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    /// 完整 URL (目标 + path)，standard 通道直接使用
    pub url: Url,
    /// 写在请求行里的 request-target，raw / pipelined 通道使用
    pub path: String,
    /// 有序 header 列表，允许重复
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub transmission: Transmission,
    /// 构建该请求时使用的 payload 快照
    pub meta: HashMap<String, String>,
}

impl HttpRequest {
    pub fn new(method: &str, url: &str) -> Result<Self> {
        let method = Method::from_bytes(method.trim().to_uppercase().as_bytes())
            .map_err(|_| ExecError::Build(format!("Invalid HTTP method: {}", method)))?;
        let url = Url::parse(url)?;
        let path = request_target(&url);

        Ok(Self {
            method,
            url,
            path,
            headers: Vec::new(),
            body: Vec::new(),
            transmission: Transmission::Standard,
            meta: HashMap::new(),
        })
    }

    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.headers.push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// 覆盖 request-target (raw 报文里可以是任意字符串)
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_transmission(mut self, transmission: Transmission) -> Self {
        self.transmission = transmission;
        self
    }

    pub fn with_meta(mut self, meta: HashMap<String, String>) -> Self {
        self.meta = meta;
        self
    }

    /// 设置 header: 已存在则替换，否则追加
    ///
    /// standard 通道按大小写不敏感匹配，原始报文通道按原样匹配
    pub fn set_header(&mut self, name: &str, value: &str) {
        let wire_level = self.transmission.is_wire_level();
        let existing = self.headers.iter_mut().find(|(k, _)| {
            if wire_level {
                k == name
            } else {
                k.eq_ignore_ascii_case(name)
            }
        });

        match existing {
            Some((_, v)) => *v = value.to_string(),
            None => self.headers.push((name.to_string(), value.to_string())),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// 转换为 reqwest 使用的 HeaderMap
    pub fn header_map(&self) -> Result<HeaderMap> {
        let mut map = HeaderMap::with_capacity(self.headers.len());
        for (key, value) in &self.headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| ExecError::Build(format!("invalid header name {:?}: {}", key, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ExecError::Build(format!("invalid header value for {}: {}", key, e)))?;
            map.append(name, value);
        }
        Ok(map)
    }

    /// 调试输出用的请求转储
    pub fn dump(&self) -> String {
        let mut out = match self.transmission {
            Transmission::Standard => format!("{} {} HTTP/1.1\r\n", self.method, self.url),
            _ => format!("{} {} HTTP/1.1\r\n", self.method, self.path),
        };
        for (key, value) in &self.headers {
            out.push_str(&format!("{}: {}\r\n", key, value));
        }
        out.push_str("\r\n");
        out.push_str(&String::from_utf8_lossy(&self.body));
        out
    }
}

/// URL 中 path + query 部分
pub fn request_target(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}
