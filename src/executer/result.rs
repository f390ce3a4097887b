use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::ExecError;

/// 一次 `execute` 调用的汇总结果，返回后不再变化
#[derive(Debug, Default)]
pub struct ExecutionResult {
    /// 至少有一次匹配或非 internal 提取
    pub got_results: bool,
    /// 串行模式下因首次匹配而提前结束
    pub done: bool,
    /// 最近一次产生结果的请求所用的 payload
    pub meta: HashMap<String, String>,
    pub matches: BTreeSet<String>,
    /// 提取器名 -> 按观察顺序的所有值
    pub extractions: HashMap<String, Vec<String>>,
    /// 最后一个错误，后来者覆盖
    pub error: Option<ExecError>,
    pub error_count: usize,
}

impl ExecutionResult {
    pub fn failed(error: ExecError) -> Self {
        Self {
            error: Some(error),
            error_count: 1,
            ..Default::default()
        }
    }

    /// 没有任何结果也没有错误 (例如目标正在被另一个调用处理)
    pub fn is_empty(&self) -> bool {
        !self.got_results
            && !self.done
            && self.matches.is_empty()
            && self.extractions.is_empty()
            && self.error.is_none()
    }
}

/// 各个请求任务共享的结果，所有修改都在短临界区内完成
#[derive(Debug, Default)]
pub struct SharedResult {
    inner: Mutex<ExecutionResult>,
}

impl SharedResult {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ExecutionResult> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// OR 模式下单个匹配器命中
    pub fn record_match(&self, matcher: &str, meta: &HashMap<String, String>) {
        let mut result = self.lock();
        result.matches.insert(matcher.to_string());
        result.meta = meta.clone();
        result.got_results = true;
    }

    pub fn record_extractions(
        &self,
        extractor: &str,
        values: Vec<String>,
        meta: &HashMap<String, String>,
    ) {
        let mut result = self.lock();
        result.meta = meta.clone();
        result
            .extractions
            .entry(extractor.to_string())
            .or_default()
            .extend(values);
    }

    pub fn mark_got_results(&self) {
        self.lock().got_results = true;
    }

    pub fn mark_done(&self) {
        self.lock().done = true;
    }

    pub fn got_results(&self) -> bool {
        self.lock().got_results
    }

    pub fn is_done(&self) -> bool {
        self.lock().done
    }

    pub fn set_error(&self, error: ExecError) {
        let mut result = self.lock();
        result.error = Some(error);
        result.error_count += 1;
    }

    /// 取出最终结果，调用前所有任务必须已经结束
    pub fn take(&self) -> ExecutionResult {
        std::mem::take(&mut *self.lock())
    }
}

/// 提取器写入、生成器读取的动态值，每个键只写一次
#[derive(Debug, Default)]
pub struct DynamicValues {
    values: Mutex<HashMap<String, String>>,
}

impl DynamicValues {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 键不存在时写入，返回是否写入
    pub fn insert_if_absent(&self, key: &str, value: &str) -> bool {
        let mut values = self.lock();
        if values.contains_key(key) {
            return false;
        }
        values.insert(key.to_string(), value.to_string());
        true
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }

    pub fn snapshot(&self) -> HashMap<String, String> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
