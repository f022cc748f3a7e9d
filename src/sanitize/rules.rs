//! Field-specific string rules selected by key name.

use std::sync::OnceLock;

use regex::Regex;

/// Keys mentioning a colour must hold `#RGB` or `#RRGGBB`.
pub fn is_color_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.contains("color") || key.contains("colour")
}

/// Keys mentioning css/style carry embedded style text.
pub fn is_style_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.contains("css") || key.contains("style")
}

pub fn is_hex_color(value: &str) -> bool {
    static HEX: OnceLock<Regex> = OnceLock::new();
    HEX.get_or_init(|| {
        Regex::new(r"^#(?:[0-9a-fA-F]{3}|[0-9a-fA-F]{6})$").expect("hex color pattern")
    })
    .is_match(value)
}

fn injection_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?is)<script\b[^>]*>.*?</script\s*>",
            r"(?i)</?script\b[^>]*>?",
            r"(?i)javascript\s*:",
            r"(?i)vbscript\s*:",
            r"(?i)expression\s*\(",
            r"(?i)\bon[a-z]+\s*=",
            r"(?i)@import\b[^;]*;?",
        ]
        .iter()
        .map(|pattern| Regex::new(pattern).expect("script injection pattern"))
        .collect()
    })
}

/// Removes script-injection patterns from style text.
///
/// Stripping repeats until nothing changes, so the output is a fixed point
/// (`strip(strip(x)) == strip(x)`), including for nested payloads such as
/// `<scr<script></script>ipt>`.
pub fn strip_script_injection(input: &str) -> String {
    let mut current = input.trim().to_string();
    loop {
        let mut next = current.clone();
        for pattern in injection_patterns() {
            next = pattern.replace_all(&next, "").into_owned();
        }
        let next = next.trim().to_string();
        if next == current {
            return current;
        }
        current = next;
    }
}
