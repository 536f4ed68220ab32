//! Chilean guardian phone numbers.
//!
//! Storage form is `+56` followed by nine digits. Display form groups the
//! local number as `+56 D XXXX XXXX`.

use crate::error::EngineError;

const COUNTRY_CODE: &str = "56";
const LOCAL_LEN: usize = 9;

fn digits(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Keeps only the digits and prefixes the country code when it is missing.
pub fn normalize(raw: &str) -> String {
    let cleaned = digits(raw);
    if cleaned.len() == COUNTRY_CODE.len() + LOCAL_LEN && cleaned.starts_with(COUNTRY_CODE) {
        return format!("+{}", cleaned);
    }
    if cleaned.len() == LOCAL_LEN {
        return format!("+{}{}", COUNTRY_CODE, cleaned);
    }
    if cleaned.starts_with(COUNTRY_CODE) {
        format!("+{}", cleaned)
    } else {
        format!("+{}{}", COUNTRY_CODE, cleaned)
    }
}

/// Eleven digits, country code first, local number starting with 2..=9.
pub fn is_valid_canonical(value: &str) -> bool {
    let d = digits(value);
    if d.len() != COUNTRY_CODE.len() + LOCAL_LEN || !d.starts_with(COUNTRY_CODE) {
        return false;
    }
    matches!(d.as_bytes().get(2), Some(b'2'..=b'9'))
}

pub fn is_valid(raw: &str) -> bool {
    is_valid_canonical(&normalize(raw))
}

pub fn canonicalize(raw: &str) -> Result<String, EngineError> {
    let normalized = normalize(raw);
    if !is_valid_canonical(&normalized) {
        return Err(EngineError::InvalidPhone(raw.trim().to_string()));
    }
    Ok(normalized)
}

/// Progressive display formatting for partially typed input.
pub fn format_display(text: &str) -> String {
    let mut local = digits(text);
    if let Some(rest) = local.strip_prefix(COUNTRY_CODE) {
        local = rest.to_string();
    }
    local.truncate(LOCAL_LEN);
    if local.is_empty() {
        return String::new();
    }
    if !matches!(local.as_bytes()[0], b'2'..=b'9') {
        local.truncate(LOCAL_LEN - 1);
        local.insert(0, '9');
    }

    let (first, rest) = local.split_at(1);
    let mut out = format!("+{} {}", COUNTRY_CODE, first);
    if rest.is_empty() {
        return out;
    }
    if rest.len() <= 4 {
        out.push(' ');
        out.push_str(rest);
    } else {
        let (head, tail) = rest.split_at(4);
        out.push(' ');
        out.push_str(head);
        out.push(' ');
        out.push_str(tail);
    }
    out
}
