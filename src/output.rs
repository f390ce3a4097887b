use std::collections::HashMap;
use std::io::Write;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::Serialize;

/// 一条匹配或提取结果
#[derive(Debug, Clone, Serialize)]
pub struct OutputEvent {
    pub timestamp: DateTime<Utc>,
    pub target: String,
    /// 实际请求的 URL
    pub matched: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matcher: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted: Option<Vec<String>>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub meta: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
}

/// 结果输出，每个匹配/提取结果调用一次
pub trait OutputWriter: Send + Sync {
    fn write(&self, event: &OutputEvent);
}

/// 输出到 stdout: 彩色文本或 JSON lines
#[derive(Debug, Clone, Default)]
pub struct ConsoleWriter {
    json: bool,
    json_requests: bool,
    colored: bool,
}

impl ConsoleWriter {
    pub fn new(json: bool, json_requests: bool, colored: bool) -> Self {
        Self {
            json,
            json_requests,
            colored,
        }
    }

    /// 格式化单条结果，不含换行
    pub fn format(&self, event: &OutputEvent) -> serde_json::Result<String> {
        if self.json {
            if self.json_requests {
                return serde_json::to_string(event);
            }
            let mut event = event.clone();
            event.request = None;
            event.response = None;
            return serde_json::to_string(&event);
        }

        let timestamp = event.timestamp.format("%Y-%m-%d %H:%M:%S").to_string();
        let matcher = event.matcher.as_deref().unwrap_or("-");
        let extracted = event
            .extracted
            .as_ref()
            .filter(|values| !values.is_empty())
            .map(|values| format!(" [{}]", values.join(",")))
            .unwrap_or_default();

        let line = if self.colored {
            format!(
                "[{}] [{}] [{}] {}{}",
                timestamp.blue(),
                matcher.green(),
                event.status.to_string().cyan(),
                event.matched,
                extracted.bright_cyan()
            )
        } else {
            format!(
                "[{}] [{}] [{}] {}{}",
                timestamp, matcher, event.status, event.matched, extracted
            )
        };
        Ok(line)
    }
}

impl OutputWriter for ConsoleWriter {
    fn write(&self, event: &OutputEvent) {
        let line = match self.format(event) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("Could not serialize output event: {}", e);
                return;
            }
        };

        let mut stdout = std::io::stdout().lock();
        if let Err(e) = writeln!(stdout, "{}", line) {
            tracing::warn!("Could not write output: {}", e);
        }
    }
}

/// 把结果收集在内存里
#[derive(Debug, Default)]
pub struct MemoryWriter {
    events: Mutex<Vec<OutputEvent>>,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<OutputEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl OutputWriter for MemoryWriter {
    fn write(&self, event: &OutputEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}
