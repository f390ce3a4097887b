use regex::Regex;

use super::{MatchCondition, Matcher, Part, ResponseContext};
use crate::{ExecError, Result};

/// 状态码匹配
#[derive(Debug, Clone)]
pub struct StatusMatcher {
    name: String,
    codes: Vec<u16>,
    negative: bool,
}

impl StatusMatcher {
    pub fn new(name: impl Into<String>, codes: Vec<u16>) -> Self {
        Self {
            name: name.into(),
            codes,
            negative: false,
        }
    }

    pub fn negative(mut self, negative: bool) -> Self {
        self.negative = negative;
        self
    }
}

impl Matcher for StatusMatcher {
    fn name(&self) -> &str {
        &self.name
    }

    fn matches(&self, ctx: &ResponseContext<'_>) -> bool {
        let status = ctx.response.status.code();
        self.codes.contains(&status) != self.negative
    }
}

/// 关键字匹配
#[derive(Debug, Clone)]
pub struct WordMatcher {
    name: String,
    words: Vec<String>,
    part: Part,
    condition: MatchCondition,
    case_insensitive: bool,
    negative: bool,
}

impl WordMatcher {
    pub fn new(name: impl Into<String>, words: Vec<String>) -> Self {
        Self {
            name: name.into(),
            words,
            part: Part::Body,
            condition: MatchCondition::Or,
            case_insensitive: false,
            negative: false,
        }
    }

    pub fn part(mut self, part: Part) -> Self {
        self.part = part;
        self
    }

    pub fn condition(mut self, condition: MatchCondition) -> Self {
        self.condition = condition;
        self
    }

    pub fn case_insensitive(mut self, case_insensitive: bool) -> Self {
        self.case_insensitive = case_insensitive;
        if case_insensitive {
            self.words = self.words.iter().map(|w| w.to_lowercase()).collect();
        }
        self
    }

    pub fn negative(mut self, negative: bool) -> Self {
        self.negative = negative;
        self
    }
}

impl Matcher for WordMatcher {
    fn name(&self) -> &str {
        &self.name
    }

    fn matches(&self, ctx: &ResponseContext<'_>) -> bool {
        // 空关键字列表永远不匹配
        if self.words.is_empty() {
            return self.negative;
        }

        let text = ctx.part(self.part);
        let text = if self.case_insensitive {
            text.to_lowercase().into()
        } else {
            text
        };

        let matched = self
            .condition
            .combine(self.words.iter().map(|w| text.contains(w.as_str())));
        matched != self.negative
    }
}

/// 正则匹配
#[derive(Debug, Clone)]
pub struct RegexMatcher {
    name: String,
    regexes: Vec<Regex>,
    part: Part,
    condition: MatchCondition,
    negative: bool,
}

impl RegexMatcher {
    pub fn new<S: AsRef<str>>(name: impl Into<String>, patterns: &[S]) -> Result<Self> {
        let regexes = patterns
            .iter()
            .map(|p| {
                Regex::new(p.as_ref()).map_err(|e| {
                    ExecError::Config(format!("invalid matcher regex {:?}: {}", p.as_ref(), e))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            name: name.into(),
            regexes,
            part: Part::Body,
            condition: MatchCondition::Or,
            negative: false,
        })
    }

    pub fn part(mut self, part: Part) -> Self {
        self.part = part;
        self
    }

    pub fn condition(mut self, condition: MatchCondition) -> Self {
        self.condition = condition;
        self
    }

    pub fn negative(mut self, negative: bool) -> Self {
        self.negative = negative;
        self
    }
}

impl Matcher for RegexMatcher {
    fn name(&self) -> &str {
        &self.name
    }

    fn matches(&self, ctx: &ResponseContext<'_>) -> bool {
        if self.regexes.is_empty() {
            return self.negative;
        }
        let text = ctx.part(self.part);
        let matched = self
            .condition
            .combine(self.regexes.iter().map(|re| re.is_match(&text)));
        matched != self.negative
    }
}

/// body 长度匹配
#[derive(Debug, Clone)]
pub struct SizeMatcher {
    name: String,
    sizes: Vec<usize>,
}

impl SizeMatcher {
    pub fn new(name: impl Into<String>, sizes: Vec<usize>) -> Self {
        Self {
            name: name.into(),
            sizes,
        }
    }
}

impl Matcher for SizeMatcher {
    fn name(&self) -> &str {
        &self.name
    }

    fn matches(&self, ctx: &ResponseContext<'_>) -> bool {
        self.sizes.contains(&ctx.response.body.len())
    }
}
