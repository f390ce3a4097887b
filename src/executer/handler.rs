use std::sync::Arc;

use chrono::Utc;

use super::result::{DynamicValues, SharedResult};
use crate::error::ResultExt;
use crate::generator::RequestSettings;
use crate::http::{
    CustomHeaders, HttpRequest, PipelineClient, RawClient, Response, StandardClient, Transmission,
};
use crate::operators::{MatchCondition, ResponseContext};
use crate::output::{OutputEvent, OutputWriter};
use crate::{ExecError, Result};

/// 单个请求的完整处理: 发送、读取响应、匹配、提取、输出
///
/// 所有字段都可以廉价克隆，每个并发任务持有一份
#[derive(Clone)]
pub struct RequestHandler {
    pub(crate) standard: StandardClient,
    pub(crate) raw: RawClient,
    pub(crate) custom_headers: Arc<CustomHeaders>,
    pub(crate) settings: Arc<RequestSettings>,
    pub(crate) writer: Arc<dyn OutputWriter>,
    pub(crate) debug: bool,
    /// 输出事件中附带请求和响应的转储
    pub(crate) include_dumps: bool,
}

impl RequestHandler {
    pub async fn handle(
        &self,
        target: &str,
        mut request: HttpRequest,
        pipeline: Option<&PipelineClient>,
        dynamic_values: &DynamicValues,
        result: &SharedResult,
    ) -> Result<()> {
        self.custom_headers.apply(&mut request);

        if self.debug {
            tracing::info!("Dumped HTTP request for {}", target);
            eprintln!("{}", request.dump());
        }

        let mut response = self.transmit(&request, pipeline).await?;

        if self.debug {
            tracing::info!("Dumped HTTP response for {}", target);
            eprintln!("{}", response.dump());
        }

        response
            .decompress()
            .context("could not decompress http body")?;

        tracing::debug!(
            "{} {} -> {} ({}ms)",
            request.method,
            request.url,
            response.status.code(),
            response.duration.as_millis()
        );

        let body = response.text();
        let headers = response.header_text();
        let ctx = ResponseContext::new(&response, &body, &headers);
        self.evaluate(target, &request, &ctx, dynamic_values, result);
        Ok(())
    }

    /// 按请求自身的传输方式选择通道
    async fn transmit(
        &self,
        request: &HttpRequest,
        pipeline: Option<&PipelineClient>,
    ) -> Result<Response> {
        match request.transmission {
            Transmission::Pipelined => match pipeline {
                Some(client) => client.send(request).await,
                None => Err(ExecError::Transport(format!(
                    "no pipeline connection for pipelined request to {}",
                    request.url
                ))),
            },
            Transmission::Raw { .. } => self.raw.send(request).await,
            Transmission::Standard => self.standard.send(request).await,
        }
    }

    /// 先匹配后提取
    ///
    /// AND: 任一匹配器失败即结束，不做提取。
    /// OR: 每个命中的匹配器立即输出一次。
    fn evaluate(
        &self,
        target: &str,
        request: &HttpRequest,
        ctx: &ResponseContext<'_>,
        dynamic_values: &DynamicValues,
        result: &SharedResult,
    ) {
        let condition = self.settings.matchers_condition;

        for matcher in &self.settings.matchers {
            if !matcher.matches(ctx) {
                if condition == MatchCondition::And {
                    return;
                }
            } else if condition == MatchCondition::Or {
                result.record_match(matcher.name(), &request.meta);
                self.write(target, request, ctx.response, Some(matcher.name()), None);
            }
        }

        let mut output_values = Vec::new();
        for extractor in &self.settings.extractors {
            let mut values = Vec::new();
            for value in extractor.extract(ctx) {
                dynamic_values.insert_if_absent(extractor.name(), &value);
                if !extractor.internal() {
                    output_values.push(value.clone());
                }
                values.push(value);
            }
            if !values.is_empty() {
                result.record_extractions(extractor.name(), values, &request.meta);
            }
        }

        if !output_values.is_empty() || condition == MatchCondition::And {
            self.write(target, request, ctx.response, None, Some(output_values));
            result.mark_got_results();
        }
    }

    fn write(
        &self,
        target: &str,
        request: &HttpRequest,
        response: &Response,
        matcher: Option<&str>,
        extracted: Option<Vec<String>>,
    ) {
        let (request_dump, response_dump) = if self.include_dumps {
            (Some(request.dump()), Some(response.dump()))
        } else {
            (None, None)
        };

        self.writer.write(&OutputEvent {
            timestamp: Utc::now(),
            target: target.to_string(),
            matched: request.url.to_string(),
            status: response.status.code(),
            matcher: matcher.map(str::to_string),
            extracted: extracted.filter(|values| !values.is_empty()),
            meta: request.meta.clone(),
            request: request_dump,
            response: response_dump,
        });
    }
}
