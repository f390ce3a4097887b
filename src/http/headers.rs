use crate::http::request::HttpRequest;

/// 用户在命令行/配置中指定的额外 header (`Name: Value`)
///
/// 构造时解析一次，之后对每个请求按顺序应用
#[derive(Debug, Clone, Default)]
pub struct CustomHeaders {
    headers: Vec<(String, String)>,
}

impl CustomHeaders {
    pub fn parse<S: AsRef<str>>(lines: &[S]) -> Self {
        let mut headers = Vec::with_capacity(lines.len());
        for line in lines {
            let line = line.as_ref();
            match line.split_once(':') {
                Some((name, value)) if !name.trim().is_empty() => {
                    headers.push((name.trim().to_string(), value.trim().to_string()));
                }
                _ => tracing::warn!("Skipping invalid custom header: {:?}", line),
            }
        }
        Self { headers }
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    /// 按顺序应用到请求上，同名 header 后者覆盖前者
    pub fn apply(&self, request: &mut HttpRequest) {
        for (name, value) in &self.headers {
            request.set_header(name, value);
        }
    }
}
