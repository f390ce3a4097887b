//! 请求执行器
//!
//! 针对单个目标驱动生成器，按串行、并发或 pipelining 策略发送请求，
//! 并把匹配/提取结果汇总到一个 `ExecutionResult` 中。

mod handler;
mod result;

use std::sync::Arc;

use reqwest::cookie::Jar;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::config::ExecuterOptions;
use crate::generator::{DEFAULT_PIPELINE_WORKERS, RequestGenerator, RequestSettings};
use crate::http::pipeline::DEFAULT_PIPELINE_CONNECTIONS;
use crate::http::{
    ClientSettings, CustomHeaders, HttpRequest, PipelineClient, PipelineOptions, RawClient,
    StandardClient,
};
use crate::output::{ConsoleWriter, OutputWriter};
use crate::progress::{NoProgress, Progress};
use crate::ratelimit::{RateLimiter, TokenRateLimiter, Unlimited};
use crate::{ExecError, Result};

pub use handler::RequestHandler;
pub use result::{DynamicValues, ExecutionResult, SharedResult};

/// 每次 `execute` 选定一次的执行策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Serial,
    Parallel {
        threads: usize,
    },
    Pipelined {
        workers: usize,
        connections: usize,
    },
}

impl Strategy {
    /// pipelining 优先，其次线程数 > 0 时并发，否则串行
    pub fn select(settings: &RequestSettings) -> Self {
        if settings.pipeline {
            let (workers, connections) = if settings.pipeline_max_workers > 0 {
                (settings.pipeline_max_workers, settings.pipeline_max_workers)
            } else {
                (DEFAULT_PIPELINE_WORKERS, DEFAULT_PIPELINE_CONNECTIONS)
            };
            Strategy::Pipelined {
                workers,
                connections,
            }
        } else if settings.threads > 0 {
            Strategy::Parallel {
                threads: settings.threads,
            }
        } else {
            Strategy::Serial
        }
    }
}

/// 构建 `HttpExecuter`，运行期对象 (输出、限速、进度、cookie jar) 从这里注入
pub struct ExecuterBuilder {
    generator: Arc<dyn RequestGenerator>,
    options: ExecuterOptions,
    writer: Option<Arc<dyn OutputWriter>>,
    rate_limiter: Option<Arc<dyn RateLimiter>>,
    progress: Option<Arc<dyn Progress>>,
    cookie_jar: Option<Arc<Jar>>,
}

impl ExecuterBuilder {
    pub fn new(generator: Arc<dyn RequestGenerator>) -> Self {
        Self {
            generator,
            options: ExecuterOptions::default(),
            writer: None,
            rate_limiter: None,
            progress: None,
            cookie_jar: None,
        }
    }

    pub fn options(mut self, options: ExecuterOptions) -> Self {
        self.options = options;
        self
    }

    pub fn writer(mut self, writer: Arc<dyn OutputWriter>) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn rate_limiter(mut self, rate_limiter: Arc<dyn RateLimiter>) -> Self {
        self.rate_limiter = Some(rate_limiter);
        self
    }

    pub fn progress(mut self, progress: Arc<dyn Progress>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// 与其他执行器共享的 cookie jar，优先于 `cookie_reuse`
    pub fn cookie_jar(mut self, jar: Arc<Jar>) -> Self {
        self.cookie_jar = Some(jar);
        self
    }

    pub fn build(self) -> Result<HttpExecuter> {
        let options = self.options;
        let settings = self.generator.settings().clone();

        let client_settings = ClientSettings {
            timeout: options.timeout(),
            retries: options.retries,
            follow_redirects: settings.redirects,
            max_redirects: settings.max_redirects,
            single_host: settings.threads > 0,
            proxy_url: options.proxy_url.clone(),
            proxy_socks_url: options.proxy_socks_url.clone(),
            cookie_reuse: options.cookie_reuse,
            cookie_jar: self.cookie_jar,
        };
        let standard = StandardClient::new(&client_settings)?;

        let writer = self.writer.unwrap_or_else(|| {
            Arc::new(ConsoleWriter::new(
                options.json,
                options.json_requests,
                options.colored_output,
            ))
        });
        let rate_limiter = self.rate_limiter.unwrap_or_else(|| {
            if options.rate_limit > 0 {
                Arc::new(TokenRateLimiter::new(options.rate_limit))
            } else {
                Arc::new(Unlimited)
            }
        });

        let handler = RequestHandler {
            standard,
            raw: RawClient::new(options.timeout()),
            custom_headers: Arc::new(CustomHeaders::parse(&options.custom_headers)),
            settings: Arc::new(settings),
            writer,
            debug: options.debug,
            include_dumps: options.json_requests,
        };

        Ok(HttpExecuter {
            generator: self.generator,
            handler,
            rate_limiter,
            progress: self.progress.unwrap_or_else(|| Arc::new(NoProgress)),
            options,
        })
    }
}

/// 针对一组请求模板的执行器，可对多个目标重复调用 `execute`
pub struct HttpExecuter {
    generator: Arc<dyn RequestGenerator>,
    handler: RequestHandler,
    rate_limiter: Arc<dyn RateLimiter>,
    progress: Arc<dyn Progress>,
    options: ExecuterOptions,
}

impl HttpExecuter {
    pub fn builder(generator: Arc<dyn RequestGenerator>) -> ExecuterBuilder {
        ExecuterBuilder::new(generator)
    }

    pub fn options(&self) -> &ExecuterOptions {
        &self.options
    }

    /// 对目标执行全部请求
    ///
    /// 同一目标正在执行时直接返回空结果
    pub async fn execute(&self, target: &str) -> ExecutionResult {
        let target = target.trim();
        if target.is_empty() {
            return ExecutionResult::failed(ExecError::InvalidTarget(
                "target must not be empty".to_string(),
            ));
        }

        if !self.generator.create_generator(target) {
            tracing::debug!("Target {} is already being processed, skipping", target);
            return ExecutionResult::default();
        }

        let strategy = Strategy::select(self.generator.settings());
        tracing::debug!("Executing {} with {:?}", target, strategy);

        let result = Arc::new(SharedResult::new());
        let dynamic_values = Arc::new(DynamicValues::new());

        match strategy {
            Strategy::Serial => {
                self.execute_serial(target, &result, &dynamic_values)
                    .await
            }
            Strategy::Parallel { threads } => {
                self.execute_parallel(target, threads, &result, &dynamic_values)
                    .await
            }
            Strategy::Pipelined {
                workers,
                connections,
            } => {
                self.execute_pipelined(target, workers, connections, &result, &dynamic_values)
                    .await
            }
        }

        self.generator.remove_generator(target);
        tracing::info!("Sent http requests to {}", target);
        result.take()
    }

    /// 构建当前位置的请求，失败时记录错误并放弃剩余进度
    fn next_request(
        &self,
        target: &str,
        dynamic_values: &DynamicValues,
        result: &SharedResult,
        remaining: u64,
    ) -> Option<HttpRequest> {
        let payload = self.generator.current(target);
        match self
            .generator
            .build_request(target, dynamic_values, payload.as_ref())
        {
            Ok(request) => Some(request),
            Err(e) => {
                tracing::debug!("Could not build request for {}: {}", target, e);
                result.set_error(e.context("could not build http request"));
                self.progress.drop_remaining(remaining);
                None
            }
        }
    }

    async fn execute_serial(
        &self,
        target: &str,
        result: &SharedResult,
        dynamic_values: &DynamicValues,
    ) {
        let mut remaining = self.generator.request_count();

        while self.generator.has_next(target) && !result.is_done() {
            if let Some(request) = self.next_request(target, dynamic_values, result, remaining) {
                self.rate_limiter.take(target).await;
                if let Err(e) = self
                    .handler
                    .handle(target, request, None, dynamic_values, result)
                    .await
                {
                    result.set_error(e.context("could not handle http request"));
                    self.progress.drop_remaining(remaining);
                }
            }

            if self.options.stop_at_first_match && result.got_results() {
                self.progress.drop_remaining(remaining);
                result.mark_done();
                break;
            }

            self.generator.advance(target);
            self.progress.tick();
            remaining = remaining.saturating_sub(1);
        }
    }

    async fn execute_parallel(
        &self,
        target: &str,
        threads: usize,
        result: &Arc<SharedResult>,
        dynamic_values: &Arc<DynamicValues>,
    ) {
        let remaining = self.generator.request_count();
        let semaphore = Arc::new(Semaphore::new(threads));
        let mut handles = Vec::new();

        while self.generator.has_next(target) && !result.is_done() {
            if let Some(request) = self.next_request(target, dynamic_values, result, remaining) {
                let Ok(permit) = semaphore.clone().acquire_owned().await else {
                    break;
                };
                let handler = self.handler.clone();
                let rate_limiter = self.rate_limiter.clone();
                let progress = self.progress.clone();
                let result = result.clone();
                let dynamic_values = dynamic_values.clone();
                let target = target.to_string();

                handles.push(tokio::spawn(async move {
                    let _permit = permit;
                    rate_limiter.take(&target).await;
                    if let Err(e) = handler
                        .handle(&target, request, None, &dynamic_values, &result)
                        .await
                    {
                        result.set_error(e.context("could not handle http request"));
                        progress.drop_remaining(remaining);
                    }
                }));
            }

            self.generator.advance(target);
        }

        join_all(handles).await;
    }

    async fn execute_pipelined(
        &self,
        target: &str,
        workers: usize,
        connections: usize,
        result: &Arc<SharedResult>,
        dynamic_values: &Arc<DynamicValues>,
    ) {
        let remaining = self.generator.request_count();
        let client = match PipelineClient::new(
            target,
            PipelineOptions {
                max_connections: connections,
                timeout: self.options.timeout(),
            },
        ) {
            Ok(client) => Arc::new(client),
            Err(e) => {
                result.set_error(e.context("could not create pipeline client"));
                self.progress.drop_remaining(remaining);
                return;
            }
        };

        let semaphore = Arc::new(Semaphore::new(workers));
        let mut handles = Vec::new();

        while self.generator.has_next(target) && !result.is_done() {
            if let Some(request) = self.next_request(target, dynamic_values, result, remaining) {
                let Ok(permit) = semaphore.clone().acquire_owned().await else {
                    break;
                };
                let handler = self.handler.clone();
                let client = client.clone();
                let progress = self.progress.clone();
                let result = result.clone();
                let dynamic_values = dynamic_values.clone();
                let target = target.to_string();

                // pipelining 不经过限速器
                handles.push(tokio::spawn(async move {
                    let _permit = permit;
                    if let Err(e) = handler
                        .handle(&target, request, Some(&client), &dynamic_values, &result)
                        .await
                    {
                        result.set_error(e.context("could not handle http request"));
                        progress.drop_remaining(remaining);
                    }
                }));
            }

            self.generator.advance(target);
        }

        join_all(handles).await;
    }
}

async fn join_all(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        if let Err(e) = handle.await {
            tracing::warn!("Request task failed: {}", e);
        }
    }
}
