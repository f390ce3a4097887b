use regex::Regex;

use super::{Extractor, Part, ResponseContext};
use crate::{ExecError, Result};

/// 正则提取，取指定捕获组
#[derive(Debug, Clone)]
pub struct RegexExtractor {
    name: String,
    regexes: Vec<Regex>,
    group: usize,
    part: Part,
    internal: bool,
}

impl RegexExtractor {
    pub fn new<S: AsRef<str>>(name: impl Into<String>, patterns: &[S]) -> Result<Self> {
        let regexes = patterns
            .iter()
            .map(|p| {
                Regex::new(p.as_ref()).map_err(|e| {
                    ExecError::Config(format!("invalid extractor regex {:?}: {}", p.as_ref(), e))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            name: name.into(),
            regexes,
            group: 0,
            part: Part::Body,
            internal: false,
        })
    }

    pub fn group(mut self, group: usize) -> Self {
        self.group = group;
        self
    }

    pub fn part(mut self, part: Part) -> Self {
        self.part = part;
        self
    }

    pub fn internal(mut self, internal: bool) -> Self {
        self.internal = internal;
        self
    }
}

impl Extractor for RegexExtractor {
    fn name(&self) -> &str {
        &self.name
    }

    fn internal(&self) -> bool {
        self.internal
    }

    fn extract<'a>(&'a self, ctx: &ResponseContext<'a>) -> Box<dyn Iterator<Item = String> + 'a> {
        let group = self.group;
        let text: &'a str = match self.part {
            Part::Body => ctx.body,
            Part::Header => ctx.headers,
            Part::All => {
                // 拼接后的文本无法被迭代器借用，直接收集
                let text = ctx.part(Part::All);
                let values: Vec<String> = self
                    .regexes
                    .iter()
                    .flat_map(|re| {
                        re.captures_iter(&text)
                            .filter_map(|caps| caps.get(group).map(|m| m.as_str().to_string()))
                            .collect::<Vec<_>>()
                    })
                    .collect();
                return Box::new(values.into_iter());
            }
        };

        Box::new(self.regexes.iter().flat_map(move |re| {
            re.captures_iter(text)
                .filter_map(move |caps| caps.get(group).map(|m| m.as_str().to_string()))
        }))
    }
}

/// 按 header 名提取值
#[derive(Debug, Clone)]
pub struct KvalExtractor {
    name: String,
    keys: Vec<String>,
    internal: bool,
}

impl KvalExtractor {
    pub fn new(name: impl Into<String>, keys: Vec<String>) -> Self {
        Self {
            name: name.into(),
            keys,
            internal: false,
        }
    }

    pub fn internal(mut self, internal: bool) -> Self {
        self.internal = internal;
        self
    }
}

impl Extractor for KvalExtractor {
    fn name(&self) -> &str {
        &self.name
    }

    fn internal(&self) -> bool {
        self.internal
    }

    fn extract<'a>(&'a self, ctx: &ResponseContext<'a>) -> Box<dyn Iterator<Item = String> + 'a> {
        let headers = &ctx.response.headers;
        Box::new(self.keys.iter().flat_map(move |key| {
            // 模板里常用下划线代替连字符
            let key = key.replace('_', "-");
            headers
                .get_all(key.as_str())
                .iter()
                .filter_map(|v| v.to_str().ok().map(str::to_string))
                .collect::<Vec<_>>()
        }))
    }
}

/// 从 JSON body 中按点号路径提取
#[derive(Debug, Clone)]
pub struct JsonExtractor {
    name: String,
    paths: Vec<Vec<String>>,
    internal: bool,
}

impl JsonExtractor {
    /// `paths` 形如 `user.token`、`items.0.id`
    pub fn new<S: AsRef<str>>(name: impl Into<String>, paths: &[S]) -> Self {
        Self {
            name: name.into(),
            paths: paths
                .iter()
                .map(|p| {
                    p.as_ref()
                        .trim_start_matches("body.")
                        .split('.')
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .collect(),
            internal: false,
        }
    }

    pub fn internal(mut self, internal: bool) -> Self {
        self.internal = internal;
        self
    }
}

impl Extractor for JsonExtractor {
    fn name(&self) -> &str {
        &self.name
    }

    fn internal(&self) -> bool {
        self.internal
    }

    fn extract<'a>(&'a self, ctx: &ResponseContext<'a>) -> Box<dyn Iterator<Item = String> + 'a> {
        // 非 JSON 响应没有可提取的值
        let Ok(json) = serde_json::from_str::<serde_json::Value>(ctx.body) else {
            return Box::new(std::iter::empty());
        };

        let values: Vec<String> = self
            .paths
            .iter()
            .filter_map(|segments| lookup(&json, segments))
            .filter_map(json_value_to_string)
            .collect();
        Box::new(values.into_iter())
    }
}

fn lookup<'v>(value: &'v serde_json::Value, segments: &[String]) -> Option<&'v serde_json::Value> {
    let mut current = value;
    for segment in segments {
        current = match current {
            serde_json::Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            other => other.get(segment)?,
        };
    }
    Some(current)
}

fn json_value_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Null => None,
        other => Some(other.to_string()),
    }
}
