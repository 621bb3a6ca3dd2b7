use std::fmt::Write;

use crate::model::Vulnerability;

const CONTEXT_LINES: usize = 5;

pub const SYSTEM_PROMPT: &str = "You are an application security expert reviewing static-analysis findings. \
Decide whether the reported vulnerability is real and, if so, propose a one-line fix. \
Respond with strict JSON: {\"is_valid\": true|false, \"confidence\": 0.0-1.0, \
\"patch_code\": \"replacement line or null\", \"explanation\": \"...\"}. \
Do not wrap the JSON in markdown.";

/// Numbered window around the sink line, the sink row marked with `>>>`.
pub fn code_context(source: &str, line: u32) -> String {
    let lines: Vec<&str> = source.lines().collect();
    let target = line.saturating_sub(1) as usize;
    let start = target.saturating_sub(CONTEXT_LINES);
    let end = (target + CONTEXT_LINES + 1).min(lines.len());

    let mut out = String::new();
    for (idx, text) in lines.iter().enumerate().take(end).skip(start) {
        let prefix = if idx == target { ">>> " } else { "    " };
        let _ = writeln!(out, "{prefix}{:4} | {text}", idx + 1);
    }
    out
}

/// User message for one vulnerability. When a concrete reachability path is
/// known the richer template is used; otherwise the basic one.
pub fn user_prompt(vulnerability: &Vulnerability, code_context: &str) -> String {
    let primary = &vulnerability.primary;
    let tools: Vec<String> = vulnerability
        .corroborating_tools()
        .into_iter()
        .map(|t| t.to_string())
        .collect();

    let mut out = String::new();
    let _ = writeln!(out, "Rule: {} ({})", primary.rule_id, primary.rule_name);
    let _ = writeln!(out, "Category: {}", vulnerability.category);
    let _ = writeln!(out, "Severity: {}", primary.severity.as_sarif_level());
    let _ = writeln!(
        out,
        "Location: {}:{}",
        primary.file.display(),
        primary.line
    );
    let _ = writeln!(out, "Message: {}", primary.message);
    let _ = writeln!(out, "Reported by: {}", tools.join(", "));
    if vulnerability.is_corroborated() {
        let _ = writeln!(
            out,
            "Multiple independent tools agree on this finding; treat the prior as elevated."
        );
    }

    if let Some(reachability) = &vulnerability.reachability {
        if let Some(path) = reachability.concrete_path() {
            let _ = writeln!(out, "\nReachability: the sink is reachable from an entry point.");
            let _ = writeln!(out, "Call path: {}", path.join(" -> "));
            let _ = writeln!(
                out,
                "Judge exploitability along this path, not just the sink in isolation."
            );
        } else if !reachability.assume_reachable() {
            let _ = writeln!(
                out,
                "\nReachability: no path from known entry points was found; verify whether the sink can still be triggered."
            );
        } else {
            // Unproven reachability is never grounds to downgrade.
            let _ = writeln!(
                out,
                "\nReachability: not proven either way; treat the sink as reachable."
            );
        }
    }

    let _ = writeln!(out, "\nCode context:\n{code_context}");
    let _ = writeln!(
        out,
        "Is this a real vulnerability? If confirmed, supply patch_code replacing the marked line."
    );
    out
}
