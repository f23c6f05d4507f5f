//! Decoding the structured fix block out of a diagnosis reply.

use crate::error::{AgentError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrType {
    Hotfix,
    Normal,
}

impl PrType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrType::Hotfix => "hotfix",
            PrType::Normal => "normal",
        }
    }

    /// Capitalized form used in pull-request titles.
    pub fn title(&self) -> &'static str {
        match self {
            PrType::Hotfix => "Hotfix",
            PrType::Normal => "Normal",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "hotfix" => Some(PrType::Hotfix),
            "normal" => Some(PrType::Normal),
            _ => None,
        }
    }
}

impl std::fmt::Display for PrType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fix the model proposed, ready to be applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnosis {
    pub root_cause: Option<String>,
    pub fix: String,
    pub file_path: String,
    /// 1-based.
    pub line_number: usize,
    pub pr_type: PrType,
}

#[derive(Deserialize)]
struct RawBlock {
    root_cause: Option<String>,
    fix: Option<String>,
    file_path: Option<String>,
    line_number: Option<serde_json::Value>,
    pr_type: Option<String>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn line_number_from(value: Option<serde_json::Value>) -> Result<usize> {
    let invalid = |v: &serde_json::Value| AgentError::Parse(format!("invalid line_number {}", v));
    let line = match value {
        None | Some(serde_json::Value::Null) => return Ok(1),
        Some(serde_json::Value::Number(n)) => n
            .as_u64()
            .ok_or_else(|| invalid(&serde_json::Value::Number(n.clone())))?,
        Some(serde_json::Value::String(s)) => s
            .trim()
            .parse::<u64>()
            .map_err(|_| invalid(&serde_json::Value::String(s.clone())))?,
        Some(other) => return Err(invalid(&other)),
    };
    if line == 0 {
        return Err(AgentError::Parse("line_number must be 1 or greater".to_string()));
    }
    usize::try_from(line)
        .map_err(|_| AgentError::Parse(format!("line_number {} is too large", line)))
}

/// Parse the single fenced `json` block of a diagnosis.
///
/// `file_path` and `fix` are required. `line_number` defaults to 1 and
/// `pr_type` to hotfix. Zero or several blocks fail.
pub fn parse_diagnosis(text: &str) -> Result<Diagnosis> {
    let re = Regex::new(r"(?s)```json[ \t]*\r?\n(.*?)```")
        .map_err(|e| AgentError::Parse(e.to_string()))?;
    let blocks: Vec<&str> = re
        .captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();
    let body = match blocks.as_slice() {
        [] => return Err(AgentError::Parse("no ```json block found in the diagnosis".to_string())),
        [one] => one.trim(),
        many => {
            return Err(AgentError::Parse(format!(
                "expected one ```json block, found {}",
                many.len()
            )))
        }
    };

    let raw: RawBlock = serde_json::from_str(body)
        .map_err(|e| AgentError::Parse(format!("fix block is not valid JSON ({})", e)))?;

    let file_path = non_blank(raw.file_path)
        .ok_or_else(|| AgentError::Parse("fix block has no `file_path`".to_string()))?;
    let fix = raw
        .fix
        .filter(|f| !f.trim().is_empty())
        .ok_or_else(|| AgentError::Parse("fix block has no `fix`".to_string()))?;
    let line_number = line_number_from(raw.line_number)?;
    let pr_type = match non_blank(raw.pr_type) {
        None => PrType::Hotfix,
        Some(value) => PrType::parse(&value)
            .ok_or_else(|| AgentError::Parse(format!("unknown pr_type `{}`", value)))?,
    };

    Ok(Diagnosis {
        root_cause: non_blank(raw.root_cause),
        fix,
        file_path,
        line_number,
        pr_type,
    })
}
