use once_cell::sync::Lazy;
use pinax_types::{PinaxRecord, StringOrList, DCMI_TYPES};
use regex::Regex;

static YEAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(19|20)\d{2}\b").unwrap());
static YEAR_ONLY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}$").unwrap());
static YEAR_MONTH_DAY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap());

/// Accepts `YYYY` or `YYYY-MM-DD` as-is; otherwise extracts the first
/// 4-digit year matching `\b(19|20)\d{2}\b`; otherwise returns the input
/// unchanged so the validator can flag it.
pub fn normalize_date(input: &str) -> String {
    if YEAR_ONLY_RE.is_match(input) || YEAR_MONTH_DAY_RE.is_match(input) {
        return input.to_string();
    }
    if let Some(m) = YEAR_RE.find(input) {
        return m.as_str().to_string();
    }
    input.to_string()
}

/// Exact match, then case-insensitive match to a canonical DCMI value, then
/// a fixed synonym table; otherwise returns the input unchanged.
pub fn normalize_type(input: &str) -> String {
    if DCMI_TYPES.contains(&input) {
        return input.to_string();
    }
    for canonical in DCMI_TYPES {
        if canonical.eq_ignore_ascii_case(input) {
            return canonical.to_string();
        }
    }
    let mapped = match input.to_ascii_lowercase().as_str() {
        "photo" | "photograph" | "picture" => Some("StillImage"),
        "img" | "images" => Some("Image"),
        "video" | "movie" | "film" => Some("MovingImage"),
        "audio" | "recording" => Some("Sound"),
        "document" | "book" | "article" | "manuscript" => Some("Text"),
        "object" | "artifact" => Some("PhysicalObject"),
        _ => None,
    };
    mapped.map(str::to_string).unwrap_or_else(|| input.to_string())
}

/// Applies caller-supplied field overrides on top of the model's output;
/// an override field set to `Some` always wins.
pub fn apply_overrides(mut record: PinaxRecord, overrides: Option<&PinaxRecord>) -> PinaxRecord {
    let Some(o) = overrides else { return record };

    macro_rules! win {
        ($field:ident) => {
            if o.$field.is_some() {
                record.$field = o.$field.clone();
            }
        };
    }
    win!(id);
    win!(title);
    win!(record_type);
    win!(creator);
    win!(institution);
    win!(created);
    win!(access_url);
    win!(language);
    win!(subjects);
    win!(description);
    win!(source);
    win!(rights);
    win!(place);
    record
}

/// Runs every post-processing step after overrides have been merged in:
/// ULID generation, access-url/source defaults, empty-field pruning, and
/// date/type normalization.
pub fn finalize(mut record: PinaxRecord, request_access_url: Option<&str>) -> PinaxRecord {
    let id = record
        .id
        .clone()
        .unwrap_or_else(|| ulid::Ulid::new().to_string());
    record.id = Some(id.clone());

    record.access_url = Some(
        request_access_url
            .map(str::to_string)
            .or_else(|| record.access_url.clone())
            .unwrap_or_else(|| format!("https://arke.institute/{id}")),
    );

    if record.source.as_deref().map(str::is_empty).unwrap_or(true) {
        record.source = Some("PINAX".to_string());
    }

    if let Some(StringOrList::One(s)) = &record.creator {
        if s.is_empty() {
            record.creator = None;
        }
    }
    if let Some(subjects) = &record.subjects {
        if subjects.is_empty() {
            record.subjects = None;
        }
    }

    if let Some(created) = &record.created {
        record.created = Some(normalize_date(created));
    }
    if let Some(record_type) = &record.record_type {
        record.record_type = Some(normalize_type(record_type));
    }

    record
}
