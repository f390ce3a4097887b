//! HTTP/1.1 报文的底层读写
//!
//! raw 与 pipelined 两个通道共用: 建立 TCP/TLS 连接、序列化请求、
//! 解析响应头和 body (Content-Length / chunked / 读到 EOF)。

use std::borrow::Cow;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::TcpStream;
use url::Url;

use crate::{ExecError, Result};

/// 连接对象: 普通 TCP 或 TLS
pub trait Io: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Io for T {}

pub type BoxedIo = Box<dyn Io>;

/// 响应 body 上限，超过即视为协议错误
pub const MAX_BODY_SIZE: usize = 10 * 1024 * 1024;
/// 状态行和单个 header 行的长度上限
pub const MAX_LINE_SIZE: usize = 64 * 1024;
/// 单个响应的 header 数量上限
pub const MAX_HEADERS: usize = 256;

/// 序列化时是否自动补全 header
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WireOptions {
    pub auto_content_length: bool,
    pub auto_host_header: bool,
}

/// 解析后的响应头
#[derive(Debug)]
pub struct ResponseHead {
    pub status: u16,
    pub headers: HeaderMap,
}

impl ResponseHead {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// body 以连接关闭为结束标志，读完后连接不可复用
    pub fn is_close_delimited(&self, head_request: bool) -> bool {
        !self.has_no_body(head_request)
            && !self.is_chunked()
            && self.header("content-length").is_none()
    }

    /// 服务端声明响应后关闭连接
    pub fn closes_connection(&self) -> bool {
        self.header("connection")
            .map(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case("close")))
            .unwrap_or(false)
    }

    fn is_chunked(&self) -> bool {
        self.header("transfer-encoding")
            .map(|te| te.to_ascii_lowercase().contains("chunked"))
            .unwrap_or(false)
    }

    fn has_no_body(&self, head_request: bool) -> bool {
        head_request || (100..200).contains(&self.status) || self.status == 204 || self.status == 304
    }
}

/// 把所有裸 `\n` 替换为 `\r\n`，已有的 `\r\n` 保持不变
pub fn normalize_line_endings(body: &[u8]) -> Cow<'_, [u8]> {
    let needs_fix = body
        .iter()
        .enumerate()
        .any(|(i, &b)| b == b'\n' && (i == 0 || body[i - 1] != b'\r'));
    if !needs_fix {
        return Cow::Borrowed(body);
    }

    let mut out = Vec::with_capacity(body.len() + 16);
    for (i, &b) in body.iter().enumerate() {
        if b == b'\n' && (i == 0 || body[i - 1] != b'\r') {
            out.push(b'\r');
        }
        out.push(b);
    }
    Cow::Owned(out)
}

/// `host[:port]`，默认端口省略
pub fn host_header_value(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

/// 按原样序列化请求，header 名大小写和顺序不变
pub fn serialize_request(
    method: &str,
    url: &Url,
    path: &str,
    headers: &[(String, String)],
    body: &[u8],
    options: WireOptions,
) -> Vec<u8> {
    let path = if path.is_empty() { "/" } else { path };
    let mut out = Vec::with_capacity(128 + body.len());
    out.extend_from_slice(format!("{} {} HTTP/1.1\r\n", method, path).as_bytes());

    let has = |name: &str| headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(name));

    if options.auto_host_header && !has("host") {
        out.extend_from_slice(format!("Host: {}\r\n", host_header_value(url)).as_bytes());
    }
    for (key, value) in headers {
        out.extend_from_slice(key.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    if options.auto_content_length && !body.is_empty() && !has("content-length") {
        out.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(body);
    out
}

/// 在可选的时限内完成 future，`None` 表示不限时
pub async fn with_timeout<T>(
    timeout: Option<Duration>,
    future: impl Future<Output = Result<T>>,
    on_timeout: impl FnOnce() -> String,
) -> Result<T> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, future)
            .await
            .map_err(|_| ExecError::Transport(on_timeout()))?,
        None => future.await,
    }
}

/// 建立到目标的连接，https 使用不校验证书的 TLS
pub async fn connect(url: &Url, timeout: Option<Duration>) -> Result<BoxedIo> {
    let host = url
        .host_str()
        .ok_or_else(|| ExecError::InvalidTarget(format!("missing host in {}", url)))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| ExecError::InvalidTarget(format!("missing port in {}", url)))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');

    let tcp = with_timeout(
        timeout,
        async { Ok(TcpStream::connect((host, port)).await?) },
        || format!("connect to {}:{} timed out", host, port),
    )
    .await?;
    tcp.set_nodelay(true)?;

    if url.scheme() == "https" {
        let connector = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()?;
        let connector = tokio_native_tls::TlsConnector::from(connector);
        let tls = connector.connect(host, tcp).await?;
        Ok(Box::new(tls))
    } else {
        Ok(Box::new(tcp))
    }
}

async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Option<String>> {
    let mut buf = Vec::new();
    let n = (&mut *reader)
        .take(MAX_LINE_SIZE as u64 + 1)
        .read_until(b'\n', &mut buf)
        .await?;
    if n == 0 {
        return Ok(None);
    }
    if n > MAX_LINE_SIZE {
        return Err(ExecError::Protocol(format!(
            "line exceeds {} bytes",
            MAX_LINE_SIZE
        )));
    }
    while matches!(buf.last(), Some(b'\n') | Some(b'\r')) {
        buf.pop();
    }
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

/// 读取状态行和 header，跳过 `100 Continue`
pub async fn read_head<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<ResponseHead> {
    loop {
        let status_line = loop {
            match read_line(reader).await? {
                None => {
                    return Err(ExecError::Transport(
                        "connection closed before response".to_string(),
                    ));
                }
                // 上一个响应后可能残留空行
                Some(line) if line.is_empty() => continue,
                Some(line) => break line,
            }
        };
        let status = parse_status_line(&status_line)?;

        let mut headers = HeaderMap::new();
        let mut lines = 0;
        loop {
            let line = read_line(reader)
                .await?
                .ok_or_else(|| ExecError::Protocol("unexpected EOF in headers".to_string()))?;
            if line.is_empty() {
                break;
            }
            lines += 1;
            if lines > MAX_HEADERS {
                return Err(ExecError::Protocol(format!(
                    "more than {} response headers",
                    MAX_HEADERS
                )));
            }
            let Some((name, value)) = line.split_once(':') else {
                tracing::debug!("Ignoring malformed header line: {:?}", line);
                continue;
            };
            match (
                HeaderName::from_bytes(name.trim().as_bytes()),
                HeaderValue::from_str(value.trim()),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.append(name, value);
                }
                _ => tracing::debug!("Ignoring invalid header: {:?}", line),
            }
        }

        if status == 100 {
            continue;
        }
        return Ok(ResponseHead { status, headers });
    }
}

fn parse_status_line(line: &str) -> Result<u16> {
    let mut parts = line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/") {
        return Err(ExecError::Protocol(format!("invalid status line: {:?}", line)));
    }
    parts
        .next()
        .and_then(|code| code.trim().parse::<u16>().ok())
        .ok_or_else(|| ExecError::Protocol(format!("invalid status line: {:?}", line)))
}

/// 按 header 指示读取 body
pub async fn read_body<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    head: &ResponseHead,
    head_request: bool,
) -> Result<Vec<u8>> {
    if head.has_no_body(head_request) {
        return Ok(Vec::new());
    }

    if head.is_chunked() {
        return read_chunked(reader).await;
    }

    if let Some(len) = head.header("content-length") {
        let len: u64 = len
            .trim()
            .parse()
            .map_err(|_| ExecError::Protocol(format!("invalid content-length: {:?}", len)))?;
        if len > MAX_BODY_SIZE as u64 {
            return Err(body_too_large());
        }
        let mut body = Vec::with_capacity(len as usize);
        (&mut *reader).take(len).read_to_end(&mut body).await?;
        if (body.len() as u64) < len {
            return Err(ExecError::Protocol(format!(
                "body truncated: got {} of {} bytes",
                body.len(),
                len
            )));
        }
        return Ok(body);
    }

    let mut body = Vec::new();
    (&mut *reader)
        .take(MAX_BODY_SIZE as u64 + 1)
        .read_to_end(&mut body)
        .await?;
    if body.len() > MAX_BODY_SIZE {
        return Err(body_too_large());
    }
    Ok(body)
}

fn body_too_large() -> ExecError {
    ExecError::Protocol(format!("response body exceeds {} bytes", MAX_BODY_SIZE))
}

async fn read_chunked<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    loop {
        let line = read_line(reader)
            .await?
            .ok_or_else(|| ExecError::Protocol("unexpected EOF in chunk size".to_string()))?;
        let size_str = line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_str, 16)
            .map_err(|_| ExecError::Protocol(format!("invalid chunk size: {:?}", line)))?;

        if size == 0 {
            // trailer
            while let Some(line) = read_line(reader).await? {
                if line.is_empty() {
                    break;
                }
            }
            return Ok(body);
        }

        let end = body
            .len()
            .checked_add(size)
            .filter(|&end| end <= MAX_BODY_SIZE)
            .ok_or_else(body_too_large)?;
        let start = body.len();
        body.resize(end, 0);
        reader.read_exact(&mut body[start..]).await?;
        read_line(reader).await?;
    }
}
