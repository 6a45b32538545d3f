/// Inbound webhook parsing (spec §6): content-type sniffed in order JSON
/// -> form-urlencoded -> raw JSON text, tolerant field-name fallback lists,
/// and flexible symbol-list encodings. Pure function, no I/O: the HTTP
/// front-end that calls this is an external collaborator (spec §1).
use chrono::{DateTime, Utc};
use serde_json::Value;

const ALERT_NAME_FIELDS: &[&str] = &["scan_name", "trigger_name", "scan", "alert", "alert_name", "name"];
const SYMBOLS_FIELDS: &[&str] = &["stocks", "symbols", "stocks[]", "symbol", "stock", "tradingsymbol"];
const TIMESTAMP_FIELDS: &[&str] = &["triggered_at", "time", "timestamp", "datetime"];

#[derive(Debug, Clone)]
pub struct ScanAlert {
    pub alert_name: String,
    pub symbols: Vec<String>,
    pub triggered_at: Option<DateTime<Utc>>,
}

/// Content-type sniffing in spec order: JSON, then form-urlencoded, then
/// raw text re-parsed as JSON.
pub fn parse_scan_alert(content_type: &str, body: &[u8]) -> Option<ScanAlert> {
    let lowered = content_type.to_ascii_lowercase();
    let value = if lowered.contains("application/json") {
        serde_json::from_slice::<Value>(body).ok()
    } else if lowered.contains("application/x-www-form-urlencoded") {
        form_to_value(body)
    } else {
        serde_json::from_slice::<Value>(body).ok().or_else(|| form_to_value(body))
    }?;

    from_value(&value)
}

fn form_to_value(body: &[u8]) -> Option<Value> {
    let text = std::str::from_utf8(body).ok()?;
    let pairs: Vec<(String, String)> = url::form_urlencoded::parse(text.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    let mut map = serde_json::Map::new();
    for (k, v) in pairs {
        map.insert(k, Value::String(v));
    }
    Some(Value::Object(map))
}

fn from_value(value: &Value) -> Option<ScanAlert> {
    let obj = value.as_object()?;

    let alert_name = ALERT_NAME_FIELDS
        .iter()
        .find_map(|field| obj.get(*field))
        .and_then(value_as_str)?;

    let symbols = extract_symbols(obj);

    let triggered_at = TIMESTAMP_FIELDS
        .iter()
        .find_map(|field| obj.get(*field))
        .and_then(value_as_str)
        .and_then(parse_timestamp);

    Some(ScanAlert {
        alert_name,
        symbols,
        triggered_at,
    })
}

fn value_as_str(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Symbols may arrive as a JSON array, a comma/newline-separated string, a
/// pythonic-list-looking string (`"['SBIN', 'INFY']"`), or indexed form
/// fields (`stocks[0]`, `stocks[1]`, ...).
fn extract_symbols(obj: &serde_json::Map<String, Value>) -> Vec<String> {
    for field in SYMBOLS_FIELDS {
        if let Some(value) = obj.get(*field) {
            let parsed = parse_symbols_value(value);
            if !parsed.is_empty() {
                return parsed;
            }
        }
    }

    let mut indexed: Vec<(usize, String)> = Vec::new();
    for (key, value) in obj.iter() {
        if let Some(rest) = key.strip_prefix("stocks[").and_then(|s| s.strip_suffix(']')) {
            if let Ok(idx) = rest.parse::<usize>() {
                if let Some(s) = value_as_str(value) {
                    indexed.push((idx, s));
                }
            }
        }
    }
    indexed.sort_by_key(|(idx, _)| *idx);
    indexed.into_iter().map(|(_, s)| s).collect()
}

fn parse_symbols_value(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(value_as_str).collect(),
        Value::String(s) => parse_symbols_string(s),
        _ => Vec::new(),
    }
}

fn parse_symbols_string(raw: &str) -> Vec<String> {
    let trimmed = raw.trim();
    if trimmed.starts_with('[') && trimmed.ends_with(']') {
        if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(trimmed) {
            return items.into_iter().filter_map(|v| value_as_str(&v)).collect();
        }
        // pythonic list with single quotes: not valid JSON, normalize quotes first
        let normalized = trimmed.replace('\'', "\"");
        if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(&normalized) {
            return items.into_iter().filter_map(|v| value_as_str(&v)).collect();
        }
    }
    trimmed
        .split(|c| c == ',' || c == '\n')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_timestamp(raw: String) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            raw.parse::<i64>()
                .ok()
                .and_then(|epoch| DateTime::from_timestamp(epoch, 0))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_body_with_array_symbols() {
        let body = br#"{"scan_name":"Morning Longs","stocks":["SBIN","INFY"],"triggered_at":"2026-01-15T09:20:00Z"}"#;
        let alert = parse_scan_alert("application/json", body).unwrap();
        assert_eq!(alert.alert_name, "Morning Longs");
        assert_eq!(alert.symbols, vec!["SBIN", "INFY"]);
        assert!(alert.triggered_at.is_some());
    }

    #[test]
    fn parses_comma_separated_symbols_string() {
        let body = br#"{"alert":"breakout","symbols":"SBIN, INFY,  TCS"}"#;
        let alert = parse_scan_alert("application/json", body).unwrap();
        assert_eq!(alert.symbols, vec!["SBIN", "INFY", "TCS"]);
    }

    #[test]
    fn parses_pythonic_list_string() {
        let body = br#"{"alert":"breakout","symbols":"['SBIN', 'INFY']"}"#;
        let alert = parse_scan_alert("application/json", body).unwrap();
        assert_eq!(alert.symbols, vec!["SBIN", "INFY"]);
    }

    #[test]
    fn parses_form_urlencoded_body() {
        let body = b"scan_name=Morning+Longs&stocks=SBIN%2CINFY";
        let alert = parse_scan_alert("application/x-www-form-urlencoded", body).unwrap();
        assert_eq!(alert.alert_name, "Morning Longs");
        assert_eq!(alert.symbols, vec!["SBIN", "INFY"]);
    }

    #[test]
    fn parses_indexed_form_fields() {
        let body = b"alert=scan&stocks%5B0%5D=SBIN&stocks%5B1%5D=INFY";
        let alert = parse_scan_alert("application/x-www-form-urlencoded", body).unwrap();
        assert_eq!(alert.symbols, vec!["SBIN", "INFY"]);
    }

    #[test]
    fn falls_back_to_raw_json_text_for_unknown_content_type() {
        let body = br#"{"name":"scan","symbol":"SBIN"}"#;
        let alert = parse_scan_alert("text/plain", body).unwrap();
        assert_eq!(alert.alert_name, "scan");
        assert_eq!(alert.symbols, vec!["SBIN"]);
    }

    #[test]
    fn missing_alert_name_field_returns_none() {
        let body = br#"{"stocks":["SBIN"]}"#;
        assert!(parse_scan_alert("application/json", body).is_none());
    }
}
