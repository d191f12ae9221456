//! Scene declaration scanning and cleanup of provider responses.

use std::sync::LazyLock;

use regex::Regex;

static SCENE_DECL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^class\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(([^)]*)\)").unwrap()
});

/// Extract the entry-point name from script text.
///
/// Scans for the first `class Name(Base)` declaration whose base list names a
/// scene type (any identifier ending in `Scene`, so subclasses like
/// `ThreeDScene` are recognized). Returns `None` when the script has no such
/// declaration.
pub fn extract_scene_class(script: &str) -> Option<String> {
    for caps in SCENE_DECL_RE.captures_iter(script) {
        let bases = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        let is_scene = bases
            .split(',')
            .map(|base| base.trim().rsplit('.').next().unwrap_or(""))
            .any(|base| base.ends_with("Scene"));
        if is_scene {
            return Some(caps[1].to_string());
        }
    }
    None
}

/// Strip fenced-code delimiters and language tags from provider output.
///
/// Providers are instructed to return bare source, but still wrap responses
/// in ```` ```python ```` fences often enough that staging must tolerate it.
/// Text without fences is returned trimmed but otherwise unchanged.
pub fn strip_code_fences(text: &str) -> String {
    if !text.contains("```") {
        return text.trim().to_string();
    }
    let kept: Vec<&str> = text
        .lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect();
    kept.join("\n").trim().to_string()
}
