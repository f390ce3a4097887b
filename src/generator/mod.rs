pub mod payload;
pub mod resolver;

use std::collections::HashMap;
use std::sync::Arc;

use crate::Result;
use crate::executer::DynamicValues;
use crate::http::HttpRequest;
use crate::operators::{Extractor, MatchCondition, Matcher};

pub use payload::{AttackMode, PayloadGenerator, RequestTemplate};
pub use resolver::VariableResolver;

/// 当前迭代位置对应的 payload 取值
pub type PayloadValues = HashMap<String, String>;

/// pipelining 模式下默认的并发任务数
pub const DEFAULT_PIPELINE_WORKERS: usize = 150;

/// 生成器附带的执行配置
#[derive(Clone, Default)]
pub struct RequestSettings {
    /// > 0 时使用并发策略
    pub threads: usize,
    pub pipeline: bool,
    /// pipelining 的连接数与并发任务数，0 表示使用默认值
    pub pipeline_max_workers: usize,
    pub matchers_condition: MatchCondition,
    pub matchers: Vec<Arc<dyn Matcher>>,
    pub extractors: Vec<Arc<dyn Extractor>>,
    pub redirects: bool,
    pub max_redirects: usize,
}

impl std::fmt::Debug for RequestSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSettings")
            .field("threads", &self.threads)
            .field("pipeline", &self.pipeline)
            .field("pipeline_max_workers", &self.pipeline_max_workers)
            .field("matchers_condition", &self.matchers_condition)
            .field("matchers", &self.matchers.len())
            .field("extractors", &self.extractors.len())
            .field("redirects", &self.redirects)
            .field("max_redirects", &self.max_redirects)
            .finish()
    }
}

/// 按目标维护迭代状态的请求生成器
///
/// 执行器只在调度任务上调用这些方法，从不在并发任务内部调用
pub trait RequestGenerator: Send + Sync {
    /// 该目标是否已有迭代状态 (正在执行中)
    fn has_generator(&self, target: &str) -> bool;

    /// 目标没有迭代状态时创建并返回 true，已存在时返回 false
    fn create_generator(&self, target: &str) -> bool;

    /// 迭代结束后销毁状态
    fn remove_generator(&self, target: &str);

    fn has_next(&self, target: &str) -> bool;

    fn current(&self, target: &str) -> Option<PayloadValues>;

    fn advance(&self, target: &str);

    fn build_request(
        &self,
        target: &str,
        dynamic_values: &DynamicValues,
        payload: Option<&PayloadValues>,
    ) -> Result<HttpRequest>;

    /// 每个目标预计发送的请求总数，用于进度统计
    fn request_count(&self) -> u64;

    fn settings(&self) -> &RequestSettings;
}
