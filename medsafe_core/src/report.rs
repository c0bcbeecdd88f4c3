//! Adherence (compliance) reporting over intake history.

use crate::MedicationRecord;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Adherence over a trailing window of days
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ComplianceReport {
    /// `None` when the report covers every active medication
    pub medication_id: Option<Uuid>,
    pub period_days: u32,
    pub expected_doses: u32,
    pub actual_doses: u32,
    pub missed_doses: u32,
    /// Percentage, one decimal place
    pub compliance_rate: f64,
    pub side_effects_reported: Vec<String>,
}

#[derive(Default)]
struct Tally {
    expected: u32,
    actual: u32,
    missed: u32,
    side_effects: Vec<String>,
}

/// Build a report for `records` over the `days` days before `now`
pub fn build_report<'a>(
    records: impl IntoIterator<Item = &'a MedicationRecord>,
    medication_id: Option<Uuid>,
    days: u32,
    now: DateTime<Utc>,
) -> ComplianceReport {
    let mut total = Tally::default();

    for record in records {
        let tally = tally_record(record, days, now);
        total.expected = total.expected.saturating_add(tally.expected);
        total.actual = total.actual.saturating_add(tally.actual);
        total.missed = total.missed.saturating_add(tally.missed);
        for effect in tally.side_effects {
            if !total.side_effects.contains(&effect) {
                total.side_effects.push(effect);
            }
        }
    }

    let compliance_rate = if total.expected == 0 {
        100.0
    } else {
        let rate = f64::from(total.actual) / f64::from(total.expected) * 100.0;
        (rate.min(100.0) * 10.0).round() / 10.0
    };

    ComplianceReport {
        medication_id,
        period_days: days,
        expected_doses: total.expected,
        actual_doses: total.actual,
        missed_doses: total.missed,
        compliance_rate,
        side_effects_reported: total.side_effects,
    }
}

fn tally_record(record: &MedicationRecord, days: u32, now: DateTime<Utc>) -> Tally {
    let window_end = record.discontinued_at.unwrap_or(now).min(now);
    // Windows reaching past chrono's range start at the record's start date
    let window_start = Duration::try_days(i64::from(days))
        .and_then(|span| now.checked_sub_signed(span))
        .map_or(record.start_date, |start| start.max(record.start_date));

    if window_start > window_end {
        return Tally::default();
    }

    let seconds = (window_end - window_start).num_seconds();
    let days_in_window = ((seconds as f64) / 86_400.0).ceil().max(1.0);
    let expected = (record.frequency.doses_per_day() * days_in_window).round() as u32;

    let in_window = record
        .intake_log
        .iter()
        .filter(|e| e.timestamp >= window_start && e.timestamp <= window_end);

    let mut tally = Tally {
        expected,
        ..Tally::default()
    };
    let mut explicitly_missed = 0u32;
    for event in in_window {
        if event.missed_dose {
            explicitly_missed += 1;
        } else {
            tally.actual += 1;
        }
        for effect in &event.side_effects {
            let effect = effect.trim();
            if !effect.is_empty() && !tally.side_effects.iter().any(|e| e == effect) {
                tally.side_effects.push(effect.to_string());
            }
        }
    }
    tally.missed = expected.saturating_sub(tally.actual).max(explicitly_missed);
    tally
}
