//! Fitting a suggested one-line fix to the real source, and writing it in.

use super::parse::Diagnosis;
use crate::error::{AgentError, Result};
use crate::llm::{prompts, ChatModel, ChatRequest, Message};
use regex::Regex;

/// Lines of context on each side of the target line.
pub const WINDOW_RADIUS: usize = 10;

/// Up to [`WINDOW_RADIUS`] lines either side of `line_number` (1-based),
/// clamped to the file, each prefixed with its line number.
pub fn context_window(source: &str, line_number: usize) -> String {
    let lines: Vec<&str> = source.lines().collect();
    if lines.is_empty() {
        return String::new();
    }
    let target = line_number.clamp(1, lines.len()) - 1;
    let start = target.saturating_sub(WINDOW_RADIUS);
    let end = (target + WINDOW_RADIUS + 1).min(lines.len());
    lines[start..end]
        .iter()
        .enumerate()
        .map(|(offset, line)| format!("{:>4} | {}", start + offset + 1, line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Contents of the first fenced code block in `reply`, or the raw reply when
/// it has none. Leading indentation inside the block is preserved.
pub fn extract_code(reply: &str) -> String {
    let block = Regex::new(r"(?s)```[A-Za-z0-9_+.-]*[ \t]*\r?\n(.*?)```")
        .ok()
        .and_then(|re| re.captures(reply))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str());
    match block {
        Some(code) => code
            .trim_start_matches(['\r', '\n'])
            .trim_end()
            .to_string(),
        None => reply.trim().to_string(),
    }
}

/// Ask the model to rewrite `diagnosis.fix` against the actual file contents.
pub async fn refine_fix(
    model: &dyn ChatModel,
    diagnosis: &Diagnosis,
    source: &str,
    temperature: f32,
) -> Result<String> {
    let window = context_window(source, diagnosis.line_number);
    let request = ChatRequest::new(vec![
        Message::system(prompts::REFINE_SYSTEM),
        Message::user(prompts::refine_user(
            &diagnosis.file_path,
            diagnosis.line_number,
            &diagnosis.fix,
            &window,
        )),
    ])
    .with_temperature(temperature);

    let reply = model
        .complete(request)
        .await
        .map_err(|e| AgentError::Model(format!("{:#}", e)))?;
    let refined = reply.content.as_deref().map(extract_code).unwrap_or_default();
    if refined.trim().is_empty() {
        return Err(AgentError::Model(
            "the model returned an empty refined fix".to_string(),
        ));
    }
    let line_count = refined.lines().count();
    if line_count > 1 {
        return Err(AgentError::Model(format!(
            "the refined fix spans {} lines; a single replacement line is required",
            line_count
        )));
    }
    Ok(refined)
}

/// Replace exactly line `line_number` (1-based) of `source` with
/// `replacement`, keeping that line's original terminator. `replacement` is
/// written as given; [`refine_fix`] only ever yields a single line.
pub fn replace_line(source: &str, line_number: usize, replacement: &str) -> Result<String> {
    let lines: Vec<&str> = source.split_inclusive('\n').collect();
    let total = lines.len();
    if line_number == 0 || line_number > total {
        return Err(AgentError::Validation(format!(
            "line {} is outside the file ({} lines)",
            line_number, total
        )));
    }

    let mut patched = String::with_capacity(source.len() + replacement.len());
    for (idx, line) in lines.iter().enumerate() {
        if idx + 1 != line_number {
            patched.push_str(line);
            continue;
        }
        let terminator = if line.ends_with("\r\n") {
            "\r\n"
        } else if line.ends_with('\n') {
            "\n"
        } else {
            ""
        };
        patched.push_str(replacement.trim_end_matches(['\r', '\n']));
        patched.push_str(terminator);
    }
    Ok(patched)
}
