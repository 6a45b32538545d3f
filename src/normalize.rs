/// Bit-exact normalization rules for alert names and trading symbols.
///
/// Normalization is the single source of truth: every alert/symbol is
/// normalized exactly once at ingress, and all downstream comparisons and
/// keying use the normalized form. Raw forms are preserved only for
/// display.
const ZERO_WIDTH: [char; 4] = ['\u{200B}', '\u{200C}', '\u{200D}', '\u{FEFF}'];

fn strip_zero_width(s: &str) -> String {
    s.chars().filter(|c| !ZERO_WIDTH.contains(c)).collect()
}

/// Strip zero-width chars, lowercase, replace `_` and `-` with space,
/// collapse whitespace.
pub fn normalize_alert_name(raw: &str) -> String {
    let cleaned = strip_zero_width(raw);
    let lower = cleaned.to_lowercase();
    let replaced: String = lower
        .chars()
        .map(|c| if c == '_' || c == '-' { ' ' } else { c })
        .collect();
    replaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Strip zero-width chars, uppercase, drop prefix before first `:`, drop a
/// trailing `.NS`, drop a trailing `-EQ`, retain only `A-Z 0-9 - &`, drop
/// the result if it equals `NSE` or `BSE`.
pub fn normalize_symbol(raw: &str) -> String {
    let cleaned = strip_zero_width(raw);
    let upper = cleaned.trim().to_uppercase();
    if upper.is_empty() {
        return String::new();
    }
    let without_prefix = match upper.split_once(':') {
        Some((_, rest)) => rest,
        None => upper.as_str(),
    };
    let without_ns = without_prefix.strip_suffix(".NS").unwrap_or(without_prefix);
    let without_eq = without_ns.strip_suffix("-EQ").unwrap_or(without_ns);
    let filtered: String = without_eq
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '&')
        .collect();
    if filtered == "NSE" || filtered == "BSE" {
        return String::new();
    }
    filtered
}
