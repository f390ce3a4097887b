use std::time::{Duration, Instant};

use reqwest::Method;
use tokio::io::{AsyncWriteExt, BufReader};

use crate::http::request::{HttpRequest, Transmission};
use crate::http::response::Response;
use crate::http::wire::{self, WireOptions};
use crate::Result;

/// 发送用户手写报文的客户端，每个请求一条新连接
#[derive(Debug, Clone)]
pub struct RawClient {
    timeout: Option<Duration>,
}

impl RawClient {
    /// `timeout` 为 `None` 时不限时
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    pub async fn send(&self, request: &HttpRequest) -> Result<Response> {
        // 自动补全选项只取决于请求本身
        let options = match request.transmission {
            Transmission::Raw {
                auto_content_length,
                auto_host_header,
            } => WireOptions {
                auto_content_length,
                auto_host_header,
            },
            _ => WireOptions::default(),
        };

        // 报文按 CRLF 换行，手写模板里常常只有 LF
        let body = wire::normalize_line_endings(&request.body);
        let bytes = wire::serialize_request(
            request.method.as_str(),
            &request.url,
            &request.path,
            &request.headers,
            &body,
            options,
        );
        let head_request = request.method == Method::HEAD;

        let exchange = async {
            let start = Instant::now();
            let io = wire::connect(&request.url, self.timeout).await?;
            let (read_half, mut write_half) = tokio::io::split(io);
            write_half.write_all(&bytes).await?;
            write_half.flush().await?;

            let mut reader = BufReader::new(read_half);
            let head = wire::read_head(&mut reader).await?;
            let duration = start.elapsed();
            let body = wire::read_body(&mut reader, &head, head_request).await?;

            Response::new(head.status, head.headers, body, duration)
        };
        wire::with_timeout(self.timeout, exchange, || {
            format!("request to {} timed out", request.url)
        })
        .await
    }
}
