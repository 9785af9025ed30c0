//! 产物校验
//!
//! 纯函数：非空、按分隔符切分的 key=value 语法、必需键齐全。失败原因只包含键名，
//! 不包含值，可直接作为纠正反馈写回对话。

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

use crate::config::ValidatorSection;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationVerdict {
    Pass,
    Fail { reason: String },
}

impl ValidationVerdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, ValidationVerdict::Pass)
    }

    fn fail(reason: impl Into<String>) -> Self {
        ValidationVerdict::Fail {
            reason: reason.into(),
        }
    }
}

static KEY_RE: OnceLock<Regex> = OnceLock::new();

fn key_pattern() -> &'static Regex {
    KEY_RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.\-]+$").expect("valid key pattern"))
}

#[derive(Debug, Clone)]
pub struct ResultValidator {
    delimiter: String,
    required_keys: Vec<String>,
}

impl ResultValidator {
    pub fn new(delimiter: impl Into<String>, required_keys: Vec<String>) -> Self {
        let delimiter = delimiter.into();
        Self {
            delimiter: if delimiter.is_empty() { "; ".to_string() } else { delimiter },
            required_keys,
        }
    }

    pub fn from_section(section: &ValidatorSection) -> Self {
        Self::new(section.delimiter.clone(), section.required_keys.clone())
    }

    /// 以请求级必需键替换默认配置
    pub fn with_required_keys(&self, keys: Vec<String>) -> Self {
        Self {
            required_keys: keys,
            ..self.clone()
        }
    }

    pub fn delimiter(&self) -> &str {
        &self.delimiter
    }

    pub fn required_keys(&self) -> &[String] {
        &self.required_keys
    }

    pub fn validate(&self, artifact: &str) -> ValidationVerdict {
        let artifact = artifact.trim();
        if artifact.is_empty() {
            return ValidationVerdict::fail("result is empty");
        }

        // 分隔符两侧的空白不敏感
        let separator = self.delimiter.trim();
        let separator = if separator.is_empty() { self.delimiter.as_str() } else { separator };

        let mut keys = HashSet::new();
        for (index, segment) in artifact
            .split(separator)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .enumerate()
        {
            let Some((key, _value)) = segment.split_once('=') else {
                return ValidationVerdict::fail(format!(
                    "segment {} is not a name=value pair",
                    index + 1
                ));
            };
            let key = key.trim();
            if !key_pattern().is_match(key) {
                return ValidationVerdict::fail(format!(
                    "segment {} has an invalid name",
                    index + 1
                ));
            }
            keys.insert(key.to_string());
        }

        if keys.is_empty() {
            return ValidationVerdict::fail("result contains no name=value pairs");
        }

        let missing: Vec<&str> = self
            .required_keys
            .iter()
            .filter(|k| !keys.contains(k.as_str()))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return ValidationVerdict::fail(format!(
                "missing required keys: {}",
                missing.join(", ")
            ));
        }

        ValidationVerdict::Pass
    }
}
