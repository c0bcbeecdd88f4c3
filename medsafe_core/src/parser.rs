//! Free-text medication parser.
//!
//! Turns input like "Lisinopril 10mg once daily" into name, dosage and unit.
//! The parser never rejects text it cannot understand: a missing dosage or an
//! odd unit degrade the result and add warnings, leaving hard rejection to
//! validation.

use crate::validation::{check_name, is_allowed_unit};
use crate::{Dosage, Error, Frequency, Result};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// `<number>[-<number>] <unit>` anywhere in the text
static DOSAGE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d+(?:\.\d+)?)(?:\s*-\s*(\d+(?:\.\d+)?))?\s*([a-zµ]+)\b").unwrap()
});

/// Structured view of a free-text medication entry
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedMedication {
    pub name: String,
    pub dosage: Option<Dosage>,
    pub unit: Option<String>,
    /// Frequency found after the dosage, if any
    pub frequency: Option<Frequency>,
    pub parsed: bool,
    pub confidence: f32,
    pub warnings: Vec<String>,
}

struct DosageMatch<'t> {
    start: usize,
    end: usize,
    low: &'t str,
    high: Option<&'t str>,
    unit: &'t str,
}

impl<'t> DosageMatch<'t> {
    fn from_captures(text: &'t str, caps: &Captures<'t>) -> Option<Self> {
        let whole = caps.get(0)?;
        // "D3 tablets" is part of a name, not a dosage
        let glued = text[..whole.start()]
            .chars()
            .next_back()
            .is_some_and(|c| c.is_alphanumeric() || c == '.');
        if glued {
            return None;
        }
        Some(Self {
            start: whole.start(),
            end: whole.end(),
            low: caps.get(1)?.as_str(),
            high: caps.get(2).map(|m| m.as_str()),
            unit: caps.get(3)?.as_str(),
        })
    }
}

/// Parse free text into a medication.
///
/// Fails only on empty input.
pub fn parse(raw: &str) -> Result<ParsedMedication> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(Error::InvalidInput(
            "Medication text must not be empty".into(),
        ));
    }

    let candidates: Vec<DosageMatch> = DOSAGE_PATTERN
        .captures_iter(text)
        .filter_map(|caps| DosageMatch::from_captures(text, &caps))
        .collect();

    // Rightmost run with a known unit wins; otherwise the rightmost run at all
    let chosen = candidates
        .iter()
        .rev()
        .find(|m| is_allowed_unit(m.unit))
        .or_else(|| candidates.last());

    let Some(found) = chosen else {
        tracing::debug!("No dosage pattern found in {:?}", text);
        let mut warnings = vec![format!("No dosage found in '{}'", text)];
        if let Err(problem) = check_name(text) {
            warnings.push(problem);
        }
        return Ok(ParsedMedication {
            name: text.to_string(),
            dosage: None,
            unit: None,
            frequency: None,
            parsed: false,
            confidence: 0.0,
            warnings,
        });
    };

    let mut warnings = Vec::new();
    let mut confidence: f32 = 0.95;

    let name = text[..found.start].trim().to_string();
    if name.is_empty() {
        warnings.push("No medication name before the dosage".to_string());
        confidence -= 0.5;
    } else if let Err(problem) = check_name(&name) {
        warnings.push(problem);
        confidence -= 0.25;
    }

    let dosage = match found.high {
        Some(high) => {
            confidence -= 0.1;
            Dosage::Range(format!("{}-{}", found.low, high))
        }
        None => match found.low.parse::<f64>() {
            Ok(value) => Dosage::Amount(value),
            // The pattern only admits decimal digits
            Err(_) => Dosage::Range(found.low.to_string()),
        },
    };

    if !is_allowed_unit(found.unit) {
        warnings.push(format!("Unrecognized unit '{}'", found.unit));
        confidence -= 0.35;
    }

    let remainder = text[found.end..].trim();
    let frequency = if remainder.is_empty() {
        None
    } else {
        match remainder.parse::<Frequency>() {
            Ok(freq) => Some(freq),
            Err(_) => {
                warnings.push(format!("Ignored text after dosage: '{}'", remainder));
                None
            }
        }
    };

    let parsed = ParsedMedication {
        name,
        dosage: Some(dosage),
        unit: Some(found.unit.to_string()),
        frequency,
        parsed: true,
        confidence: confidence.max(0.1),
        warnings,
    };
    tracing::debug!(
        "Parsed {:?} -> name={:?} dosage={:?} unit={:?} confidence={:.2}",
        text,
        parsed.name,
        parsed.dosage,
        parsed.unit,
        parsed.confidence
    );
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_name_dosage_unit() {
        let parsed = parse("Lisinopril 10mg").unwrap();
        assert_eq!(parsed.name, "Lisinopril");
        assert_eq!(parsed.dosage, Some(Dosage::Amount(10.0)));
        assert_eq!(parsed.unit.as_deref(), Some("mg"));
        assert!(parsed.parsed);
        assert!(parsed.confidence > 0.0);
        assert!(parsed.warnings.is_empty());
    }

    #[test]
    fn test_reconstructs_numeric_and_unit_portion() {
        for (input, amount, unit) in [
            ("Metformin 500mg", 500.0, "mg"),
            ("Levothyroxine 2.5 mcg", 2.5, "mcg"),
            ("Vitamin D3 1000 IU", 1000.0, "IU"),
            ("Amoxicillin Clavulanate 875mg", 875.0, "mg"),
        ] {
            let parsed = parse(input).unwrap();
            assert!(parsed.parsed, "{} should parse", input);
            assert_eq!(parsed.dosage, Some(Dosage::Amount(amount)), "{}", input);
            assert_eq!(parsed.unit.as_deref(), Some(unit), "{}", input);
        }
    }

    #[test]
    fn test_missing_dosage_is_degraded_not_failed() {
        let parsed = parse("  Vitamin B12  ").unwrap();
        assert_eq!(parsed.name, "Vitamin B12");
        assert!(!parsed.parsed);
        assert_eq!(parsed.dosage, None);
        assert_eq!(parsed.confidence, 0.0);
        assert!(!parsed.warnings.is_empty());
    }

    #[test]
    fn test_empty_input_fails() {
        assert!(matches!(parse(""), Err(Error::InvalidInput(_))));
        assert!(matches!(parse("   "), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_range_dosage_kept_as_text() {
        let parsed = parse("Acetaminophen 1-2 tablets").unwrap();
        assert_eq!(parsed.name, "Acetaminophen");
        assert_eq!(parsed.dosage, Some(Dosage::Range("1-2".into())));
        assert_eq!(parsed.unit.as_deref(), Some("tablets"));
    }

    #[test]
    fn test_unrecognized_unit_warns() {
        let parsed = parse("Cough Syrup 2 spoonfuls").unwrap();
        assert!(parsed.parsed);
        assert_eq!(parsed.unit.as_deref(), Some("spoonfuls"));
        assert!(parsed.warnings.iter().any(|w| w.contains("Unrecognized unit")));
        assert!(parsed.confidence < 0.95);
    }

    #[test]
    fn test_prefers_rightmost_known_unit() {
        let parsed = parse("Tylenol 500mg every 6 hours").unwrap();
        assert_eq!(parsed.name, "Tylenol");
        assert_eq!(parsed.dosage, Some(Dosage::Amount(500.0)));
        assert_eq!(parsed.frequency, Some(Frequency::Every6Hours));
    }

    #[test]
    fn test_trailing_frequency() {
        let parsed = parse("Metformin 500mg twice daily").unwrap();
        assert_eq!(parsed.frequency, Some(Frequency::TwiceDaily));
        assert!(parsed.warnings.is_empty());

        let parsed = parse("Metformin 500mg with breakfast").unwrap();
        assert_eq!(parsed.frequency, None);
        assert!(parsed.warnings.iter().any(|w| w.contains("Ignored text")));
    }

    #[test]
    fn test_invalid_name_only_warns() {
        let parsed = parse("Asp#rin 81mg").unwrap();
        assert!(parsed.parsed);
        assert_eq!(parsed.name, "Asp#rin");
        assert!(parsed.warnings.iter().any(|w| w.contains("invalid characters")));
    }
}
