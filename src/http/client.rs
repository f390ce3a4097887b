use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::cookie::Jar;
use reqwest::redirect::Policy;

use crate::http::request::HttpRequest;
use crate::http::response::Response;
use crate::http::types::Status;
use crate::{ExecError, Result, ResultExt};

/// 未指定 max_redirects 时的跟随上限
pub const DEFAULT_MAX_REDIRECTS: usize = 10;

const DIAL_TIMEOUT: Duration = Duration::from_secs(30);
const RETRY_WAIT_MIN: Duration = Duration::from_millis(100);
const RETRY_WAIT_MAX: Duration = Duration::from_secs(10);
/// 单目标模式下每个 host 的空闲连接数
const SINGLE_HOST_POOL_SIZE: usize = 500;

/// 构造 standard 客户端所需的全部参数，构造后不再修改
#[derive(Debug, Clone, Default)]
pub struct ClientSettings {
    /// `None` 表示不限时
    pub timeout: Option<Duration>,
    pub retries: u32,
    pub follow_redirects: bool,
    pub max_redirects: usize,
    /// threads > 0: 同一目标大量请求，保持长连接
    /// 否则为 host-spraying，几乎不复用连接
    pub single_host: bool,
    pub proxy_url: Option<String>,
    pub proxy_socks_url: Option<String>,
    pub cookie_reuse: bool,
    pub cookie_jar: Option<Arc<Jar>>,
}

/// 是否继续跟随重定向
///
/// `previous` 为该链上已经发出的请求数 (含原始请求)
pub fn should_follow_redirect(follow: bool, max_redirects: usize, previous: usize) -> bool {
    if !follow {
        return false;
    }
    let limit = if max_redirects == 0 {
        DEFAULT_MAX_REDIRECTS
    } else {
        max_redirects
    };
    previous <= limit
}

/// 达到上限时停止跟随并返回最后一个响应，不报错
pub fn redirect_policy(follow: bool, max_redirects: usize) -> Policy {
    if !follow {
        return Policy::none();
    }
    Policy::custom(move |attempt| {
        if should_follow_redirect(follow, max_redirects, attempt.previous().len()) {
            attempt.follow()
        } else {
            attempt.stop()
        }
    })
}

/// 带重试的 reqwest 客户端
#[derive(Clone)]
pub struct StandardClient {
    inner: reqwest::Client,
    retries: u32,
}

impl StandardClient {
    pub fn new(settings: &ClientSettings) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(DIAL_TIMEOUT)
            .tcp_keepalive(DIAL_TIMEOUT)
            .danger_accept_invalid_certs(true)
            .redirect(redirect_policy(
                settings.follow_redirects,
                settings.max_redirects,
            ));

        if let Some(timeout) = settings.timeout {
            builder = builder.timeout(timeout);
        }

        builder = if settings.single_host {
            builder.pool_max_idle_per_host(SINGLE_HOST_POOL_SIZE)
        } else {
            builder.pool_max_idle_per_host(0)
        };

        let socks = settings
            .proxy_socks_url
            .as_deref()
            .and_then(socks_proxy);

        if let Some(proxy) = socks {
            if settings.proxy_url.is_some() {
                tracing::warn!("Both HTTP and SOCKS proxies configured, using SOCKS proxy");
            }
            builder = builder.proxy(proxy);
        } else if let Some(proxy_url) = settings.proxy_url.as_deref() {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| ExecError::Config(format!("invalid proxy url {}: {}", proxy_url, e)))?;
            builder = builder.proxy(proxy);
        }

        if let Some(jar) = &settings.cookie_jar {
            builder = builder.cookie_provider(jar.clone());
        } else if settings.cookie_reuse {
            builder = builder.cookie_provider(Arc::new(Jar::default()));
        }

        Ok(Self {
            inner: builder.build()?,
            retries: settings.retries,
        })
    }

    /// 发送请求并读完 body
    ///
    /// 传输失败和 5xx (501 除外) 会按退避策略重试
    pub async fn send(&self, request: &HttpRequest) -> Result<Response> {
        let headers = request.header_map()?;
        let start = Instant::now();
        let mut attempt = 0u32;

        let response = loop {
            let result = self
                .inner
                .request(request.method.clone(), request.url.clone())
                .headers(headers.clone())
                .body(request.body.clone())
                .send()
                .await;

            let retryable = match &result {
                Ok(resp) => Status::new(resp.status().as_u16())
                    .map(|s| s.is_retryable())
                    .unwrap_or(false),
                Err(_) => true,
            };
            if !retryable || attempt >= self.retries {
                break result?;
            }

            let wait = retry_backoff(attempt);
            tracing::debug!(
                "Retrying {} {} in {:?} (attempt {}/{})",
                request.method,
                request.url,
                wait,
                attempt + 1,
                self.retries
            );
            tokio::time::sleep(wait).await;
            attempt += 1;
        };
        let duration = start.elapsed();

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .context("could not read http body")?
            .to_vec();

        Response::new(status, headers, body, duration)
    }
}

fn retry_backoff(attempt: u32) -> Duration {
    RETRY_WAIT_MIN
        .checked_mul(2u32.saturating_pow(attempt))
        .unwrap_or(RETRY_WAIT_MAX)
        .min(RETRY_WAIT_MAX)
}

/// 解析 SOCKS5 代理，URL 非法时回退为直连
fn socks_proxy(raw: &str) -> Option<reqwest::Proxy> {
    let parsed = match url::Url::parse(raw) {
        Ok(url) if url.scheme().starts_with("socks5") && url.host_str().is_some() => url,
        Ok(url) => {
            tracing::warn!("Unsupported SOCKS proxy scheme {:?}, dialing directly", url.scheme());
            return None;
        }
        Err(e) => {
            tracing::warn!("Malformed SOCKS proxy url {:?} ({}), dialing directly", raw, e);
            return None;
        }
    };

    // user:password 随 URL 一起交给 reqwest
    match reqwest::Proxy::all(parsed.as_str()) {
        Ok(proxy) => Some(proxy),
        Err(e) => {
            tracing::warn!("Could not use SOCKS proxy {:?} ({}), dialing directly", raw, e);
            None
        }
    }
}
