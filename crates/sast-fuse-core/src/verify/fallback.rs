use crate::model::{DefectCategory, Patch, PatchSource};

/// Deterministic patches carry a fixed mid-scale confidence; LLM patches
/// rank above them.
const RULE_CONFIDENCE: f32 = 0.5;

type PatchFn = fn(&str) -> Option<(String, String)>;

/// Category → mechanical patch generator. Generators only substitute known
/// dangerous calls or emit advisory markers; none of them invents logic.
/// A generator returning `None` falls through to the generic marker.
const TABLE: &[(DefectCategory, PatchFn)] = &[
    (DefectCategory::MemorySafety, patch_memory_safety),
    (DefectCategory::Injection, patch_injection),
    (DefectCategory::NullDeref, patch_null_deref),
    (DefectCategory::CredentialExposure, patch_credential),
];

/// Produce a rule-based fallback patch. Unmapped categories receive the
/// generic manual-review marker rather than a fabricated fix.
pub fn generate(category: DefectCategory, rule_id: &str, original_line: &str) -> Patch {
    for (mapped, generator) in TABLE {
        if *mapped != category {
            continue;
        }
        if let Some((patched_line, explanation)) = generator(original_line) {
            return Patch {
                original_line: original_line.to_string(),
                patched_line,
                explanation,
                confidence: RULE_CONFIDENCE,
                source: PatchSource::Rule,
            };
        }
    }

    Patch {
        original_line: original_line.to_string(),
        patched_line: format!("// TODO: Manual review required for {rule_id}"),
        explanation: format!("No mechanical fix known for {rule_id}; flagged for manual review"),
        confidence: RULE_CONFIDENCE,
        source: PatchSource::Rule,
    }
}

fn patch_memory_safety(line: &str) -> Option<(String, String)> {
    let substitutions = [
        ("strcpy", "strncpy", "Add size parameter for strncpy"),
        ("strcat", "strncat", "Add size parameter for strncat"),
        ("sprintf", "snprintf", "Add size parameter for snprintf"),
        ("gets", "fgets", "Add size and stream parameters for fgets"),
    ];
    for (unbounded, bounded, todo) in substitutions {
        if line.contains(unbounded) {
            let patched = format!("{}  // TODO: {}", line.replace(unbounded, bounded), todo);
            return Some((
                patched,
                format!("Replaced {unbounded} with bounded {bounded}"),
            ));
        }
    }
    None
}

fn patch_injection(_line: &str) -> Option<(String, String)> {
    Some((
        "// Use a parameterized query instead of string concatenation".to_string(),
        "Flagged query construction for parameterization".to_string(),
    ))
}

fn patch_null_deref(_line: &str) -> Option<(String, String)> {
    Some((
        "// Add null check before dereferencing".to_string(),
        "Flagged dereference for a preceding null check".to_string(),
    ))
}

fn patch_credential(_line: &str) -> Option<(String, String)> {
    Some((
        "// Move secret to configuration or a secret store and rotate it".to_string(),
        "Flagged hardcoded credential for rotation".to_string(),
    ))
}
