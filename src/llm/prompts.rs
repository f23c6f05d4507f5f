pub const REPHRASE_SYSTEM: &str = r#"You are a utility that rewrites a user's latest message to make it a fully self-contained, clear, and unambiguous instruction for a log analysis assistant. Use prior conversation context to resolve references such as "it", "that service" or "the same thing for yesterday".

Do not ask clarifying questions. Do not respond conversationally. Do not invent an application name that was never mentioned.
Just return a clean, actionable query."#;

pub const ROUTER_SYSTEM: &str = r#"You are a Splunk assistant designed to help users generate Splunk queries for analyzing application logs.

Your role is to decide if a user's message clearly conveys a well-defined goal. If it does, choose the appropriate function from the available tools and provide only the necessary arguments. Do not make assumptions or guess missing information.

If the user input is vague, incomplete, or does not clearly indicate what to search for (e.g., no application name or unclear task), respond with a clarifying question instead of calling a function.

Guidelines:
- Never assume missing details like the application name.
- Only call a function if you are confident the user intends to perform one of the defined tasks (e.g., check status, search for errors).
- Call at most one function per reply.
- If the user's request does not align with any defined functions, or seems incomplete, ask for clarification.

You must be accurate, cautious, and inquisitive when needed."#;

pub const REFINE_SYSTEM: &str = r#"You are a senior developer adjusting a one-line fix so it fits the real source file.

You get the suggested fix and the lines around the target line. Rewrite the fix so it uses the names, types, indentation and syntax that actually appear in the surrounding code.

OUTPUT FORMAT:
Return only the replacement for the target line inside a single fenced code block. No explanation."#;

/// Wraps the user's message for the rephrasing call.
pub fn rephrase_user(original: &str) -> String {
    format!(
        "Original message: '{}'\n\nRephrase it as a clear and complete instruction.",
        original
    )
}

/// Four-field diagnosis request for one log line.
pub fn diagnostic_prompt(app_name: &str, intent: &str, query: &str, raw_log: &str) -> String {
    format!(
        r#"You are an intelligent DevOps assistant with access to logs and source control knowledge.

An error occurred in application `{app_name}` during the `{intent}` check. Here is the Splunk query that found it:

```
{query}
```

And here is the actual log line returned from Splunk:

```
{raw_log}
```

Your task:
1. Identify the **likely cause** of the issue.
2. Suggest a **precise fix or remediation**.
3. Provide the **file path** where the fix should be applied.

Also suggest whether this should be a hotfix or a normal PR.
Only output:
- Root cause
- Fix
- File path for PR
- PR type: hotfix or normal

Then finish with exactly one fenced json block that repeats those answers:

```json
{{"root_cause": "...", "fix": "<single replacement line of code>", "file_path": "<path relative to the repository root>", "line_number": <1-based line>, "pr_type": "hotfix"}}
```"#
    )
}

/// Refinement request: the diagnosis fix plus a numbered window of real source.
pub fn refine_user(
    file_path: &str,
    line_number: usize,
    fix: &str,
    numbered_window: &str,
) -> String {
    format!(
        "File: {}\nTarget line: {}\n\nSuggested fix:\n```\n{}\n```\n\nSurrounding code (line numbers are for reference only):\n```\n{}\n```\n\nRewrite the suggested fix as the exact replacement for line {}.",
        file_path, line_number, fix, numbered_window, line_number
    )
}
