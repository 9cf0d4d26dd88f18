use once_cell::sync::Lazy;
use pinax_types::{PinaxRecord, StringOrList, ValidationReport, DCMI_TYPES};
use regex::Regex;
use std::collections::BTreeMap;

static ULID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^[0-9A-HJKMNP-TV-Z]{26}$").unwrap());
static UUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$").unwrap()
});
static LANGUAGE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z]{2,3}(-[A-Z]{2})?$").unwrap());
static YEAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}$").unwrap());
static DATE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{4})-(\d{2})-(\d{2})$").unwrap());

fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 => {
            if is_leap_year(year) {
                29
            } else {
                28
            }
        }
        _ => 0,
    }
}

fn is_valid_created(value: &str) -> bool {
    if let Some(caps) = YEAR_RE.captures(value) {
        let year: i32 = caps[0].parse().unwrap_or(0);
        return (1000..=9999).contains(&year);
    }
    if let Some(caps) = DATE_RE.captures(value) {
        let year: i32 = caps[1].parse().unwrap_or(0);
        let month: u32 = caps[2].parse().unwrap_or(0);
        let day: u32 = caps[3].parse().unwrap_or(0);
        if !(1..=12).contains(&month) {
            return false;
        }
        return day >= 1 && day <= days_in_month(year, month);
    }
    false
}

fn is_valid_id(value: &str) -> bool {
    ULID_RE.is_match(value) || UUID_RE.is_match(value)
}

fn is_valid_access_url(value: &str) -> bool {
    match url::Url::parse(value) {
        Ok(u) => u.scheme() == "http" || u.scheme() == "https",
        Err(_) => false,
    }
}

fn creator_is_missing(creator: &Option<StringOrList>) -> bool {
    match creator {
        None => true,
        Some(c) => c.is_empty(),
    }
}

fn string_is_missing(value: &Option<String>) -> bool {
    match value {
        None => true,
        Some(s) => s.is_empty(),
    }
}

fn mark(
    field_validations: &mut BTreeMap<String, String>,
    field: &str,
    valid: bool,
    message: &str,
) {
    let prefix = if valid { "\u{2713} " } else { "\u{26a0} " };
    field_validations.insert(field.to_string(), format!("{prefix}{message}"));
}

/// Validates a (possibly partial) PINAX record against the fixed schema.
/// Pure: no I/O, no mutation, safe to call from the synchronous
/// `validate-metadata` endpoint or inline after extraction.
pub fn validate(record: &PinaxRecord) -> ValidationReport {
    let mut missing_required = Vec::new();
    let mut warnings = Vec::new();
    let mut field_validations = BTreeMap::new();

    if string_is_missing(&record.title) {
        missing_required.push("title".to_string());
    }
    if string_is_missing(&record.institution) {
        missing_required.push("institution".to_string());
    }
    if creator_is_missing(&record.creator) {
        missing_required.push("creator".to_string());
    }

    if string_is_missing(&record.id) {
        missing_required.push("id".to_string());
    } else {
        let id = record.id.as_deref().unwrap();
        let valid = is_valid_id(id);
        mark(&mut field_validations, "id", valid, "must be a ULID or UUID");
        if !valid {
            missing_required.push("id".to_string());
        }
    }

    if string_is_missing(&record.record_type) {
        missing_required.push("type".to_string());
    } else {
        let t = record.record_type.as_deref().unwrap();
        let valid = DCMI_TYPES.contains(&t);
        mark(
            &mut field_validations,
            "type",
            valid,
            "must be one of the 12 DCMI Type values",
        );
        if !valid {
            missing_required.push("type".to_string());
        }
    }

    if string_is_missing(&record.created) {
        missing_required.push("created".to_string());
    } else {
        let created = record.created.as_deref().unwrap();
        let valid = is_valid_created(created);
        mark(
            &mut field_validations,
            "created",
            valid,
            "must be YYYY or YYYY-MM-DD",
        );
        if !valid {
            missing_required.push("created".to_string());
        }
    }

    if string_is_missing(&record.access_url) {
        missing_required.push("access_url".to_string());
    } else {
        let url = record.access_url.as_deref().unwrap();
        let valid = is_valid_access_url(url);
        mark(
            &mut field_validations,
            "access_url",
            valid,
            "must be an http(s) URL",
        );
        if !valid {
            missing_required.push("access_url".to_string());
        }
    }

    if let Some(language) = &record.language {
        let valid = LANGUAGE_RE.is_match(language);
        mark(
            &mut field_validations,
            "language",
            valid,
            "must be a BCP-47 tag",
        );
    } else {
        warnings.push("missing language".to_string());
    }

    if string_is_missing(&record.description) {
        warnings.push("missing description".to_string());
    }
    if string_is_missing(&record.source) {
        warnings.push("missing source".to_string());
    }
    match &record.subjects {
        Some(s) if !s.is_empty() => {}
        _ => warnings.push("missing or empty subjects".to_string()),
    }

    ValidationReport {
        valid: missing_required.is_empty(),
        missing_required,
        warnings,
        field_validations,
    }
}
