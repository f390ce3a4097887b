use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Deserialize;
use url::Url;

use super::resolver::VariableResolver;
use super::{PayloadValues, RequestGenerator, RequestSettings};
use crate::executer::DynamicValues;
use crate::http::{HttpRequest, Transmission};
use crate::{ExecError, Result};

/// payload 组合方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttackMode {
    /// 各 payload 列表按下标并行取值，长度取最短
    Pitchfork,
    /// 所有 payload 列表的笛卡尔积
    #[default]
    ClusterBomb,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_true() -> bool {
    true
}

/// 单个请求定义，字段中可以使用 `{{var}}` 占位符
#[derive(Debug, Clone, Deserialize)]
pub struct RequestTemplate {
    #[serde(default = "default_method")]
    pub method: String,
    /// `{{BaseURL}}/admin` 或相对路径 `/admin`
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: String,
    /// 完整的原始报文，设置后忽略 method/path/headers/body
    #[serde(default)]
    pub raw: Option<String>,
    /// 原始报文直接写到 socket，不经过标准客户端
    #[serde(default, rename = "unsafe")]
    pub unsafe_raw: bool,
    #[serde(default = "default_true")]
    pub auto_content_length: bool,
    #[serde(default = "default_true")]
    pub auto_host_header: bool,
}

impl RequestTemplate {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: default_method(),
            path: path.into(),
            headers: BTreeMap::new(),
            body: String::new(),
            raw: None,
            unsafe_raw: false,
            auto_content_length: true,
            auto_host_header: true,
        }
    }

    pub fn raw(raw: impl Into<String>) -> Self {
        Self {
            raw: Some(raw.into()),
            ..Self::get("")
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn unsafe_raw(mut self, unsafe_raw: bool) -> Self {
        self.unsafe_raw = unsafe_raw;
        self
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct IterState {
    request: usize,
    payload: usize,
}

/// 基于请求模板和 payload 列表的生成器
///
/// 每个目标一份迭代状态，保存在内部的 keyed store 中，外部无法直接访问
pub struct PayloadGenerator {
    templates: Vec<RequestTemplate>,
    combinations: Vec<PayloadValues>,
    settings: RequestSettings,
    states: Mutex<HashMap<String, IterState>>,
}

impl PayloadGenerator {
    pub fn new(templates: Vec<RequestTemplate>, settings: RequestSettings) -> Self {
        Self {
            templates,
            combinations: Vec::new(),
            settings,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_payloads(
        mut self,
        payloads: BTreeMap<String, Vec<String>>,
        mode: AttackMode,
    ) -> Self {
        self.combinations = combinations(&payloads, mode);
        self
    }

    fn states(&self) -> MutexGuard<'_, HashMap<String, IterState>> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self, target: &str) -> Option<IterState> {
        self.states().get(target).copied()
    }

    /// 每个请求模板要重复的次数
    fn payload_rounds(&self) -> usize {
        self.combinations.len().max(1)
    }

    fn transmission(&self, template: &RequestTemplate) -> Transmission {
        if self.settings.pipeline {
            Transmission::Pipelined
        } else if template.unsafe_raw {
            Transmission::Raw {
                auto_content_length: template.auto_content_length,
                auto_host_header: template.auto_host_header,
            }
        } else {
            Transmission::Standard
        }
    }
}

impl RequestGenerator for PayloadGenerator {
    fn has_generator(&self, target: &str) -> bool {
        self.states().contains_key(target)
    }

    fn create_generator(&self, target: &str) -> bool {
        match self.states().entry(target.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(IterState::default());
                true
            }
        }
    }

    fn remove_generator(&self, target: &str) {
        self.states().remove(target);
    }

    fn has_next(&self, target: &str) -> bool {
        self.state(target)
            .map(|s| s.request < self.templates.len())
            .unwrap_or(false)
    }

    fn current(&self, target: &str) -> Option<PayloadValues> {
        let state = self.state(target)?;
        self.combinations.get(state.payload).cloned()
    }

    fn advance(&self, target: &str) {
        let rounds = self.payload_rounds();
        if let Some(state) = self.states().get_mut(target) {
            state.payload += 1;
            if state.payload >= rounds {
                state.payload = 0;
                state.request += 1;
            }
        }
    }

    fn build_request(
        &self,
        target: &str,
        dynamic_values: &DynamicValues,
        payload: Option<&PayloadValues>,
    ) -> Result<HttpRequest> {
        let state = self
            .state(target)
            .ok_or_else(|| ExecError::Build(format!("no generator for {}", target)))?;
        let template = self
            .templates
            .get(state.request)
            .ok_or_else(|| ExecError::Build(format!("generator exhausted for {}", target)))?;

        let target_url = Url::parse(target)
            .map_err(|e| ExecError::InvalidTarget(format!("{}: {}", target, e)))?;
        let builtins = VariableResolver::target_variables(&target_url);
        let dynamic = dynamic_values.snapshot();
        let empty = HashMap::new();
        let payload_vars = payload.unwrap_or(&empty);
        let scopes = [payload_vars, &dynamic, &builtins];
        let resolve = |text: &str| VariableResolver::substitute(text, &scopes);

        let mut request = match &template.raw {
            Some(raw) => build_from_raw(&resolve(raw), &target_url)?,
            None => {
                let path = resolve(&template.path);
                let url = if path.starts_with("http://") || path.starts_with("https://") {
                    path
                } else if path.is_empty() {
                    target.to_string()
                } else {
                    format!("{}/{}", builtins["BaseURL"], path.trim_start_matches('/'))
                };

                let mut request = HttpRequest::new(&resolve(&template.method), &url)?
                    .with_body(resolve(&template.body));
                for (key, value) in &template.headers {
                    request.headers.push((resolve(key), resolve(value)));
                }
                request
            }
        };

        request.transmission = self.transmission(template);
        request.meta = payload_vars.clone();
        Ok(request)
    }

    fn request_count(&self) -> u64 {
        (self.templates.len() * self.payload_rounds()) as u64
    }

    fn settings(&self) -> &RequestSettings {
        &self.settings
    }
}

/// 解析原始报文: 请求行、header、空行、body
fn build_from_raw(raw: &str, target: &Url) -> Result<HttpRequest> {
    let raw = raw.trim_start();
    let (head, body) = match raw.find("\r\n\r\n") {
        Some(pos) => (&raw[..pos], &raw[pos + 4..]),
        None => match raw.find("\n\n") {
            Some(pos) => (&raw[..pos], &raw[pos + 2..]),
            None => (raw, ""),
        },
    };

    let mut lines = head.lines();
    let request_line = lines
        .next()
        .ok_or_else(|| ExecError::Build("empty raw request".to_string()))?;
    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(path)) = (parts.next(), parts.next()) else {
        return Err(ExecError::Build(format!(
            "malformed request line: {:?}",
            request_line
        )));
    };

    let url = if path.starts_with("http://") || path.starts_with("https://") {
        Url::parse(path)?
    } else {
        // 相对路径拼到目标的根上，原样保留在请求行里
        let root = format!(
            "{}://{}",
            target.scheme(),
            crate::http::wire::host_header_value(target)
        );
        Url::parse(&root)?.join(path).unwrap_or_else(|_| target.clone())
    };

    let mut request = HttpRequest::new(method, url.as_str())?
        .with_path(path)
        .with_body(body);
    for line in lines {
        if let Some((key, value)) = line.split_once(':') {
            request.headers.push((key.trim().to_string(), value.trim().to_string()));
        }
    }
    Ok(request)
}

fn combinations(payloads: &BTreeMap<String, Vec<String>>, mode: AttackMode) -> Vec<PayloadValues> {
    if payloads.is_empty() {
        return Vec::new();
    }

    match mode {
        AttackMode::Pitchfork => {
            let len = payloads.values().map(Vec::len).min().unwrap_or(0);
            (0..len)
                .map(|i| {
                    payloads
                        .iter()
                        .map(|(k, v)| (k.clone(), v[i].clone()))
                        .collect()
                })
                .collect()
        }
        AttackMode::ClusterBomb => {
            let mut out: Vec<PayloadValues> = vec![HashMap::new()];
            for (key, values) in payloads {
                out = out
                    .into_iter()
                    .flat_map(|combo| {
                        values.iter().map(move |value| {
                            let mut next = combo.clone();
                            next.insert(key.clone(), value.clone());
                            next
                        })
                    })
                    .collect();
            }
            out
        }
    }
}
