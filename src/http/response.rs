use std::borrow::Cow;
use std::io::Read;
use std::time::Duration;

use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use reqwest::header::{CONTENT_ENCODING, HeaderMap};

use crate::http::types::{Status, canonical_header_name};
use crate::{ExecError, Result};

#[derive(Debug, Clone)]
pub struct Response {
    pub status: Status,
    pub headers: HeaderMap,
    /// 原始 body 字节，解压后原地替换
    pub body: Vec<u8>,
    /// 发送前到响应头可用的时间，不含 body 读取
    pub duration: Duration,
}

impl Response {
    pub fn new(status: u16, headers: HeaderMap, body: Vec<u8>, duration: Duration) -> Result<Self> {
        Ok(Self {
            status: Status::new(status)?,
            headers,
            body,
            duration,
        })
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// body 的文本视图，合法 UTF-8 时不拷贝
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// 所有 header 拼成 `Name: Value` 行，以 `\n` 连接
    pub fn header_text(&self) -> String {
        let mut out = String::new();
        for (name, value) in &self.headers {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&canonical_header_name(name.as_str()));
            out.push_str(": ");
            out.push_str(&String::from_utf8_lossy(value.as_bytes()));
        }
        out
    }

    /// 按 Content-Encoding 解压 body
    ///
    /// 传输层从不自动解压，所以匹配前必须在这里处理
    pub fn decompress(&mut self) -> Result<()> {
        let encoding = match self.header(CONTENT_ENCODING.as_str()) {
            Some(enc) => enc.trim().to_ascii_lowercase(),
            None => return Ok(()),
        };
        if self.body.is_empty() {
            return Ok(());
        }

        let decoded = match encoding.as_str() {
            "gzip" | "x-gzip" => read_all(GzDecoder::new(self.body.as_slice()))?,
            // deflate 大多是 zlib 封装，少数服务器发送裸 deflate 流
            "deflate" => read_all(ZlibDecoder::new(self.body.as_slice()))
                .or_else(|_| read_all(DeflateDecoder::new(self.body.as_slice())))?,
            _ => return Ok(()),
        };

        self.body = decoded;
        Ok(())
    }

    /// 调试输出用的响应转储
    pub fn dump(&self) -> String {
        let mut out = format!(
            "HTTP/1.1 {} {}\r\n",
            self.status.code(),
            self.status.reason_phrase()
        );
        for line in self.header_text().lines() {
            out.push_str(line);
            out.push_str("\r\n");
        }
        out.push_str("\r\n");
        out.push_str(&self.text());
        out
    }
}

fn read_all<R: Read>(mut reader: R) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    reader
        .read_to_end(&mut buf)
        .map_err(|e| ExecError::Decompress(e.to_string()))?;
    Ok(buf)
}
