//! HTTP pipelining 客户端
//!
//! 每条连接由两个任务驱动: 写任务按到达顺序写出请求，读任务按相同顺序
//! 读回响应并交给等待者。多个请求可以同时在一条连接上处于 in-flight 状态。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use reqwest::Method;
use tokio::io::{AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::sync::{Mutex, mpsc, oneshot};
use url::Url;

use crate::http::request::HttpRequest;
use crate::http::response::Response;
use crate::http::wire::{self, BoxedIo, WireOptions};
use crate::{ExecError, Result};

/// pipelining 默认只开一条连接
pub const DEFAULT_PIPELINE_CONNECTIONS: usize = 1;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub max_connections: usize,
    pub timeout: Option<Duration>,
}

struct Job {
    bytes: Vec<u8>,
    head_request: bool,
    started: Instant,
    reply: oneshot::Sender<Result<Response>>,
}

struct Pending {
    head_request: bool,
    started: Instant,
    reply: oneshot::Sender<Result<Response>>,
}

struct Connection {
    jobs: mpsc::UnboundedSender<Job>,
    /// 读任务确定连接不可复用时置为 false
    alive: Arc<AtomicBool>,
}

impl Connection {
    async fn open(target: &Url, timeout: Option<Duration>) -> Result<Self> {
        let io = wire::connect(target, timeout).await?;
        let (read_half, write_half) = tokio::io::split(io);
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let (pending_tx, pending_rx) = mpsc::unbounded_channel();
        let alive = Arc::new(AtomicBool::new(true));

        tokio::spawn(write_loop(write_half, jobs_rx, pending_tx));
        tokio::spawn(read_loop(read_half, pending_rx, alive.clone()));

        Ok(Self {
            jobs: jobs_tx,
            alive,
        })
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire) && !self.jobs.is_closed()
    }
}

async fn write_loop(
    mut writer: WriteHalf<BoxedIo>,
    mut jobs: mpsc::UnboundedReceiver<Job>,
    pending: mpsc::UnboundedSender<Pending>,
) {
    loop {
        let job = tokio::select! {
            job = jobs.recv() => match job {
                Some(job) => job,
                None => break,
            },
            // 读任务已结束，连接作废
            _ = pending.closed() => break,
        };
        // 先登记再写出，保证读任务看到的顺序与写出顺序一致
        let entry = Pending {
            head_request: job.head_request,
            started: job.started,
            reply: job.reply,
        };
        if pending.send(entry).is_err() {
            break;
        }
        if let Err(e) = writer.write_all(&job.bytes).await {
            tracing::debug!("Pipeline write failed: {}", e);
            break;
        }
        if let Err(e) = writer.flush().await {
            tracing::debug!("Pipeline flush failed: {}", e);
            break;
        }
    }
}

async fn read_loop(
    reader: ReadHalf<BoxedIo>,
    mut pending: mpsc::UnboundedReceiver<Pending>,
    alive: Arc<AtomicBool>,
) {
    let mut reader = BufReader::new(reader);
    while let Some(entry) = pending.recv().await {
        let result = async {
            let head = wire::read_head(&mut reader).await?;
            let duration = entry.started.elapsed();
            let last = head.is_close_delimited(entry.head_request) || head.closes_connection();
            let body = wire::read_body(&mut reader, &head, entry.head_request).await?;
            Ok::<_, ExecError>((Response::new(head.status, head.headers, body, duration)?, last))
        }
        .await;

        // 先标记连接失效再回复，后续请求会改用新连接
        let last = result.as_ref().map(|(_, last)| *last).unwrap_or(true);
        if last {
            alive.store(false, Ordering::Release);
        }
        let _ = entry.reply.send(result.map(|(response, _)| response));
        if last {
            break;
        }
    }
    // 剩余等待者的 oneshot 随 receiver 一起被丢弃，调用方得到连接关闭错误
}

/// 面向单个目标的 pipelining 客户端，连接数有上限，惰性建立
pub struct PipelineClient {
    target: Url,
    timeout: Option<Duration>,
    slots: Vec<Mutex<Option<Connection>>>,
    next: AtomicUsize,
}

impl PipelineClient {
    pub fn new(target: &str, options: PipelineOptions) -> Result<Self> {
        let target = Url::parse(target)?;
        if target.host_str().is_none() {
            return Err(ExecError::InvalidTarget(target.to_string()));
        }
        let connections = options.max_connections.max(1);

        Ok(Self {
            target,
            timeout: options.timeout,
            slots: (0..connections).map(|_| Mutex::new(None)).collect(),
            next: AtomicUsize::new(0),
        })
    }

    pub fn max_connections(&self) -> usize {
        self.slots.len()
    }

    async fn sender(&self) -> Result<mpsc::UnboundedSender<Job>> {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.slots.len();
        let mut slot = self.slots[index].lock().await;

        if let Some(conn) = slot.as_ref()
            && conn.is_alive()
        {
            return Ok(conn.jobs.clone());
        }

        tracing::debug!("Opening pipeline connection #{} to {}", index, self.target);
        let conn = Connection::open(&self.target, self.timeout).await?;
        let jobs = conn.jobs.clone();
        *slot = Some(conn);
        Ok(jobs)
    }

    /// 直接以 method/path/headers/body 发送，不经过限速器
    pub async fn send(&self, request: &HttpRequest) -> Result<Response> {
        let bytes = wire::serialize_request(
            request.method.as_str(),
            &self.target,
            &request.path,
            &request.headers,
            &request.body,
            WireOptions {
                auto_content_length: true,
                auto_host_header: true,
            },
        );

        let (reply_tx, reply_rx) = oneshot::channel();
        let mut job = Job {
            bytes,
            head_request: request.method == Method::HEAD,
            started: Instant::now(),
            reply: reply_tx,
        };
        let mut reopened = false;
        loop {
            let jobs = wire::with_timeout(self.timeout, self.sender(), || {
                format!("connect to {} timed out", self.target)
            })
            .await?;
            match jobs.send(job) {
                Ok(()) => break,
                // 连接刚被关闭，请求尚未写出，换一条新连接再投递一次
                Err(mpsc::error::SendError(returned)) if !reopened => {
                    job = returned;
                    reopened = true;
                }
                Err(_) => {
                    return Err(ExecError::Transport(
                        "pipeline connection closed".to_string(),
                    ));
                }
            }
        }

        let reply = async {
            reply_rx
                .await
                .map_err(|_| ExecError::Transport("pipeline connection closed".to_string()))?
        };
        wire::with_timeout(self.timeout, reply, || {
            format!("request to {} timed out", self.target)
        })
        .await
    }
}
