//! Static validation rules for medication fields.
//!
//! Rules fall into two groups:
//! - Hard rules (malicious input, dosage range, name charset, frequency) that
//!   reject the whole operation with [`Error::Rejected`]
//! - Field-level checks (missing unit, overlong free text) reported as a list
//!   of errors the caller can fix and resubmit

use crate::{Dosage, DosageInput, Error, Frequency, RejectionKind, Result};
use once_cell::sync::Lazy;
use regex::Regex;

/// Largest single dosage accepted, in any unit
pub const MAX_DOSAGE: f64 = 10_000.0;

pub const MIN_NAME_LENGTH: usize = 2;
pub const MAX_NAME_LENGTH: usize = 100;
pub const MAX_PRESCRIBER_LENGTH: usize = 100;
pub const MAX_REASON_LENGTH: usize = 500;

/// Dosage units the parser and validator recognize
pub const ALLOWED_UNITS: &[&str] = &[
    "mg", "mcg", "µg", "ug", "g", "kg", "ml", "l", "iu", "meq", "unit", "units", "tablet",
    "tablets", "tab", "tabs", "capsule", "capsules", "cap", "caps", "drop", "drops", "puff",
    "puffs", "patch", "patches", "spray", "sprays",
];

/// Patterns that mark an input as an attack rather than a typo
static MALICIOUS_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)<\s*/?\s*script",
        r"(?i)<\s*(iframe|object|embed|svg|img)\b",
        r"(?i)(javascript|vbscript)\s*:",
        r"(?i)data\s*:\s*text/html",
        r"(?i)\bon[a-z]+\s*=",
        r"(?i)\b(drop|truncate|alter)\s+table\b",
        r"(?i)\bunion\s+(all\s+)?select\b",
        r"(?i);\s*(drop|delete|insert|update|exec)\b",
        r"(?i)'\s*or\s+'?\d+'?\s*=\s*'?\d+",
        r"--",
        r"\.\./",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Substrings stripped from names during sanitization
static SANITIZE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)</?\s*(script|iframe|object|embed|style|svg|img)[^>]*>?",
        r"(?i)(javascript|vbscript)\s*:",
        r"(?i)\b(select|insert|update|delete|drop|union|exec|execute|alter|create|truncate)\b",
        r"(?i)\bon(load|error|click|mouseover|mouseout|focus|blur|change|submit|keydown|keyup)\b",
        r#"[<>"'%&=;]"#,
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9 .,()/+\-]*$").unwrap());

/// Whether the text matches any malicious-input pattern
pub fn is_malicious(text: &str) -> bool {
    MALICIOUS_PATTERNS.iter().any(|re| re.is_match(text))
}

/// Strip dangerous substrings and collapse whitespace
pub fn sanitize(text: &str) -> String {
    let mut cleaned = text.to_string();
    for re in SANITIZE_PATTERNS.iter() {
        cleaned = re.replace_all(&cleaned, "").into_owned();
    }
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Check name charset and length, returning a description of the problem
pub fn check_name(name: &str) -> std::result::Result<(), String> {
    let len = name.chars().count();
    if len < MIN_NAME_LENGTH {
        return Err(format!(
            "Name '{}' is shorter than {} characters",
            name, MIN_NAME_LENGTH
        ));
    }
    if len > MAX_NAME_LENGTH {
        return Err(format!("Name is longer than {} characters", MAX_NAME_LENGTH));
    }
    if !NAME_PATTERN.is_match(name) {
        return Err(format!("Name '{}' contains invalid characters", name));
    }
    Ok(())
}

pub fn is_allowed_unit(unit: &str) -> bool {
    let lower = unit.trim().to_lowercase();
    ALLOWED_UNITS.iter().any(|u| *u == lower)
}

/// Validate a dosage against the hard limits.
///
/// Both bounds of a range dosage must pass the same limits as a single
/// amount, low first. Ranges are not checked against catalog min/max.
pub fn validate_dosage(input: &DosageInput) -> Result<Dosage> {
    let text = match input {
        DosageInput::Number(v) => return check_amount(*v).map(Dosage::Amount),
        DosageInput::Text(text) => text.trim(),
    };

    if let Some((low, high)) = split_range(text) {
        let low_value = check_amount(parse_amount(low, text)?)?;
        let high_value = check_amount(parse_amount(high, text)?)?;
        if low_value > high_value {
            return Err(Error::rejected(
                RejectionKind::DosageOutOfRange,
                format!("Dosage range '{}' has its low bound above its high bound", text),
            ));
        }
        return Ok(Dosage::Range(format!("{}-{}", low, high)));
    }

    check_amount(parse_amount(text, text)?).map(Dosage::Amount)
}

fn parse_amount(part: &str, whole: &str) -> Result<f64> {
    part.parse::<f64>().map_err(|_| {
        Error::rejected(
            RejectionKind::NonNumericDosage,
            format!("Dosage '{}' is not a number", whole),
        )
    })
}

/// Finite and within (0, MAX_DOSAGE]
fn check_amount(value: f64) -> Result<f64> {
    if !value.is_finite() {
        return Err(Error::rejected(
            RejectionKind::NonNumericDosage,
            "Dosage must be a finite number",
        ));
    }
    if value <= 0.0 || value > MAX_DOSAGE {
        return Err(Error::rejected(
            RejectionKind::DosageOutOfRange,
            format!(
                "Dosage {} is outside the allowed range (0, {}]",
                value, MAX_DOSAGE
            ),
        ));
    }
    Ok(value)
}

/// Split "X-Y" into its two trimmed halves
pub(crate) fn split_range(text: &str) -> Option<(&str, &str)> {
    // A leading minus is a negative number, not a range
    let (low, high) = text.get(1..)?.split_once('-')?;
    let low = &text[..low.len() + 1];
    Some((low.trim(), high.trim()))
}

pub fn validate_frequency(text: &str) -> Result<Frequency> {
    text.parse::<Frequency>()
        .map_err(|reason| Error::rejected(RejectionKind::InvalidFrequency, reason))
}

/// Field-level checks that produce a resubmittable error list
pub fn field_errors(
    unit: Option<&str>,
    prescriber: Option<&str>,
    reason: Option<&str>,
) -> Vec<String> {
    let mut errors = Vec::new();

    match unit.map(str::trim) {
        None | Some("") => errors.push("Unit is required".to_string()),
        Some(_) => {}
    }
    if let Some(p) = prescriber {
        if p.chars().count() > MAX_PRESCRIBER_LENGTH {
            errors.push(format!(
                "Prescriber must be at most {} characters",
                MAX_PRESCRIBER_LENGTH
            ));
        }
    }
    if let Some(r) = reason {
        if r.chars().count() > MAX_REASON_LENGTH {
            errors.push(format!(
                "Reason must be at most {} characters",
                MAX_REASON_LENGTH
            ));
        }
    }

    errors
}
