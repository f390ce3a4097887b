use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::OnceLock;
use url::Url;

/// 变量替换器
pub struct VariableResolver;

impl VariableResolver {
    /// 替换文本中的所有 {{variable}} 占位符，变量名大小写不敏感
    ///
    /// 按顺序查找各个作用域，先命中者生效；未找到的变量保持原样
    pub fn substitute(text: &str, scopes: &[&HashMap<String, String>]) -> String {
        static VAR_REGEX: OnceLock<Regex> = OnceLock::new();
        let re = VAR_REGEX
            .get_or_init(|| Regex::new(r"\{\{\s*([a-zA-Z_][a-zA-Z0-9_\-]*)\s*\}\}").unwrap());

        re.replace_all(text, |caps: &Captures| {
            let var_name = &caps[1];
            scopes
                .iter()
                .find_map(|scope| {
                    scope.get(var_name).or_else(|| {
                        scope
                            .iter()
                            .find(|(k, _)| k.eq_ignore_ascii_case(var_name))
                            .map(|(_, v)| v)
                    })
                })
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .to_string()
    }

    /// 解析并替换系统环境变量 ${VAR}
    pub fn resolve_env_vars(text: &str) -> String {
        static ENV_REGEX: OnceLock<Regex> = OnceLock::new();
        let re = ENV_REGEX.get_or_init(|| Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap());

        re.replace_all(text, |caps: &Captures| {
            let env_name = &caps[1];
            std::env::var(env_name).unwrap_or_else(|_| caps[0].to_string())
        })
        .to_string()
    }

    /// 目标 URL 派生出的内置变量
    pub fn target_variables(target: &Url) -> HashMap<String, String> {
        let scheme = target.scheme().to_string();
        let hostname = target.host_str().unwrap_or_default().to_string();
        let port = target
            .port_or_known_default()
            .map(|p| p.to_string())
            .unwrap_or_default();
        let host = match target.port() {
            Some(p) => format!("{}:{}", hostname, p),
            None => hostname.clone(),
        };
        let base_url = target.as_str().trim_end_matches('/').to_string();
        let root_url = format!("{}://{}", scheme, host);

        HashMap::from([
            ("BaseURL".to_string(), base_url),
            ("RootURL".to_string(), root_url),
            ("Hostname".to_string(), host),
            ("Host".to_string(), hostname),
            ("Port".to_string(), port),
            ("Scheme".to_string(), scheme),
            ("Path".to_string(), target.path().to_string()),
        ])
    }
}
