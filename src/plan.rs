//! TOML 执行计划: 请求模板、payload、匹配器和提取器

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use crate::generator::{AttackMode, PayloadGenerator, RequestSettings, RequestTemplate};
use crate::operators::{
    Extractor, JsonExtractor, KvalExtractor, MatchCondition, Matcher, Part, RegexExtractor,
    RegexMatcher, SizeMatcher, StatusMatcher, WordMatcher,
};
use crate::{ExecError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MatcherSpec {
    Status {
        #[serde(default)]
        name: String,
        status: Vec<u16>,
        #[serde(default)]
        negative: bool,
    },
    Word {
        #[serde(default)]
        name: String,
        words: Vec<String>,
        #[serde(default)]
        part: Part,
        #[serde(default)]
        condition: MatchCondition,
        #[serde(default)]
        case_insensitive: bool,
        #[serde(default)]
        negative: bool,
    },
    Regex {
        #[serde(default)]
        name: String,
        regex: Vec<String>,
        #[serde(default)]
        part: Part,
        #[serde(default)]
        condition: MatchCondition,
        #[serde(default)]
        negative: bool,
    },
    Size {
        #[serde(default)]
        name: String,
        size: Vec<usize>,
    },
}

impl MatcherSpec {
    fn build(self) -> Result<Arc<dyn Matcher>> {
        let matcher: Arc<dyn Matcher> = match self {
            MatcherSpec::Status {
                name,
                status,
                negative,
            } => Arc::new(StatusMatcher::new(or_type(name, "status"), status).negative(negative)),
            MatcherSpec::Word {
                name,
                words,
                part,
                condition,
                case_insensitive,
                negative,
            } => Arc::new(
                WordMatcher::new(or_type(name, "word"), words)
                    .part(part)
                    .condition(condition)
                    .case_insensitive(case_insensitive)
                    .negative(negative),
            ),
            MatcherSpec::Regex {
                name,
                regex,
                part,
                condition,
                negative,
            } => Arc::new(
                RegexMatcher::new(or_type(name, "regex"), &regex)?
                    .part(part)
                    .condition(condition)
                    .negative(negative),
            ),
            MatcherSpec::Size { name, size } => {
                Arc::new(SizeMatcher::new(or_type(name, "size"), size))
            }
        };
        Ok(matcher)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ExtractorSpec {
    Regex {
        name: String,
        regex: Vec<String>,
        #[serde(default)]
        group: usize,
        #[serde(default)]
        part: Part,
        #[serde(default)]
        internal: bool,
    },
    Kval {
        name: String,
        kval: Vec<String>,
        #[serde(default)]
        internal: bool,
    },
    Json {
        name: String,
        json: Vec<String>,
        #[serde(default)]
        internal: bool,
    },
}

impl ExtractorSpec {
    fn build(self) -> Result<Arc<dyn Extractor>> {
        let extractor: Arc<dyn Extractor> = match self {
            ExtractorSpec::Regex {
                name,
                regex,
                group,
                part,
                internal,
            } => Arc::new(
                RegexExtractor::new(name, &regex)?
                    .group(group)
                    .part(part)
                    .internal(internal),
            ),
            ExtractorSpec::Kval {
                name,
                kval,
                internal,
            } => Arc::new(KvalExtractor::new(name, kval).internal(internal)),
            ExtractorSpec::Json {
                name,
                json,
                internal,
            } => Arc::new(JsonExtractor::new(name, &json).internal(internal)),
        };
        Ok(extractor)
    }
}

fn or_type(name: String, kind: &str) -> String {
    if name.is_empty() {
        kind.to_string()
    } else {
        name
    }
}

/// 计划文件的顶层结构
#[derive(Debug, Clone, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub threads: usize,
    #[serde(default)]
    pub pipeline: bool,
    #[serde(default)]
    pub pipeline_max_workers: usize,
    #[serde(default)]
    pub redirects: bool,
    #[serde(default)]
    pub max_redirects: usize,
    #[serde(default)]
    pub matchers_condition: MatchCondition,
    #[serde(default)]
    pub attack: AttackMode,
    #[serde(default)]
    pub payloads: BTreeMap<String, Vec<String>>,
    pub requests: Vec<RequestTemplate>,
    #[serde(default)]
    pub matchers: Vec<MatcherSpec>,
    #[serde(default)]
    pub extractors: Vec<ExtractorSpec>,
}

impl Plan {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            ExecError::Config(format!(
                "Failed to read plan file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let plan: Plan = toml::from_str(content)?;
        if plan.requests.is_empty() {
            return Err(ExecError::Config("plan has no requests".to_string()));
        }
        Ok(plan)
    }

    pub fn into_generator(self) -> Result<PayloadGenerator> {
        let matchers = self
            .matchers
            .into_iter()
            .map(MatcherSpec::build)
            .collect::<Result<Vec<_>>>()?;
        let extractors = self
            .extractors
            .into_iter()
            .map(ExtractorSpec::build)
            .collect::<Result<Vec<_>>>()?;

        let settings = RequestSettings {
            threads: self.threads,
            pipeline: self.pipeline,
            pipeline_max_workers: self.pipeline_max_workers,
            matchers_condition: self.matchers_condition,
            matchers,
            extractors,
            redirects: self.redirects,
            max_redirects: self.max_redirects,
        };

        Ok(PayloadGenerator::new(self.requests, settings).with_payloads(self.payloads, self.attack))
    }
}
