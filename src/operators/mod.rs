/// 匹配器与提取器 - 对响应进行判定和取值
mod extractors;
mod matchers;

use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

use serde::Deserialize;

use crate::http::Response;

pub use extractors::{JsonExtractor, KvalExtractor, RegexExtractor};
pub use matchers::{RegexMatcher, SizeMatcher, StatusMatcher, WordMatcher};

/// 一次响应的扁平化视图，生命周期限定在单个响应的处理过程内
pub struct ResponseContext<'a> {
    pub response: &'a Response,
    pub body: &'a str,
    pub headers: &'a str,
    pub duration: Duration,
}

impl<'a> ResponseContext<'a> {
    pub fn new(response: &'a Response, body: &'a str, headers: &'a str) -> Self {
        Self {
            response,
            body,
            headers,
            duration: response.duration,
        }
    }

    /// 取响应中指定部分的文本
    pub fn part(&self, part: Part) -> Cow<'a, str> {
        match part {
            Part::Body => Cow::Borrowed(self.body),
            Part::Header => Cow::Borrowed(self.headers),
            Part::All => Cow::Owned(format!("{}\n\n{}", self.headers, self.body)),
        }
    }
}

/// 规则作用的响应部分
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Part {
    #[default]
    Body,
    #[serde(alias = "headers")]
    Header,
    #[serde(alias = "response")]
    All,
}

/// 多个匹配器/多个关键字之间的组合方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchCondition {
    And,
    #[default]
    Or,
}

impl MatchCondition {
    pub fn combine(&self, mut results: impl Iterator<Item = bool>) -> bool {
        match self {
            MatchCondition::And => results.all(|m| m),
            MatchCondition::Or => results.any(|m| m),
        }
    }
}

impl fmt::Display for MatchCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchCondition::And => write!(f, "and"),
            MatchCondition::Or => write!(f, "or"),
        }
    }
}

/// 布尔判定规则
pub trait Matcher: Send + Sync {
    fn name(&self) -> &str;

    fn matches(&self, ctx: &ResponseContext<'_>) -> bool;
}

/// 从响应中取出零个或多个字符串
///
/// 返回的迭代器只扫描一次响应，不可重启
pub trait Extractor: Send + Sync {
    fn name(&self) -> &str;

    /// internal 的值不进入用户可见输出，但仍参与动态值传递
    fn internal(&self) -> bool {
        false
    }

    fn extract<'a>(&'a self, ctx: &ResponseContext<'a>) -> Box<dyn Iterator<Item = String> + 'a>;
}
