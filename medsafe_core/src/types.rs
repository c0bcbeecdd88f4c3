//! Core domain types for the Medsafe engine.
//!
//! This module defines the fundamental types used throughout the system:
//! - Regions, jurisdictions and dosing frequencies
//! - Medication records and their intake history
//! - Compliance snapshots
//! - Drug interaction results
//! - Audit entries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Region and Jurisdiction
// ============================================================================

/// Which regulatory catalogs run for new records
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Region {
    #[default]
    #[serde(rename = "US")]
    Us,
    #[serde(rename = "CA")]
    Ca,
    #[serde(rename = "BOTH")]
    Both,
}

impl Region {
    pub fn includes(self, jurisdiction: Jurisdiction) -> bool {
        match (self, jurisdiction) {
            (Region::Both, _) => true,
            (Region::Us, Jurisdiction::Fda) => true,
            (Region::Ca, Jurisdiction::HealthCanada) => true,
            _ => false,
        }
    }
}

impl FromStr for Region {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "US" => Ok(Region::Us),
            "CA" => Ok(Region::Ca),
            "BOTH" => Ok(Region::Both),
            other => Err(crate::Error::Config(format!(
                "Unknown region '{}', expected US, CA or BOTH",
                other
            ))),
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Region::Us => "US",
            Region::Ca => "CA",
            Region::Both => "BOTH",
        };
        f.write_str(s)
    }
}

/// A regulator whose catalog can approve a medication
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Jurisdiction {
    Fda,
    HealthCanada,
}

impl Jurisdiction {
    pub fn label(self) -> &'static str {
        match self {
            Jurisdiction::Fda => "FDA",
            Jurisdiction::HealthCanada => "Health Canada",
        }
    }
}

// ============================================================================
// Frequency
// ============================================================================

/// Whitelisted dosing frequencies
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Frequency {
    #[serde(rename = "once daily")]
    OnceDaily,
    #[serde(rename = "twice daily")]
    TwiceDaily,
    #[serde(rename = "three times daily")]
    ThreeTimesDaily,
    #[serde(rename = "four times daily")]
    FourTimesDaily,
    #[serde(rename = "every 4 hours")]
    Every4Hours,
    #[serde(rename = "every 6 hours")]
    Every6Hours,
    #[serde(rename = "every 8 hours")]
    Every8Hours,
    #[serde(rename = "every 12 hours")]
    Every12Hours,
    #[serde(rename = "at bedtime")]
    AtBedtime,
    #[serde(rename = "as needed")]
    AsNeeded,
    #[serde(rename = "weekly")]
    Weekly,
    #[serde(rename = "monthly")]
    Monthly,
}

impl Frequency {
    pub const ALL: [Frequency; 12] = [
        Frequency::OnceDaily,
        Frequency::TwiceDaily,
        Frequency::ThreeTimesDaily,
        Frequency::FourTimesDaily,
        Frequency::Every4Hours,
        Frequency::Every6Hours,
        Frequency::Every8Hours,
        Frequency::Every12Hours,
        Frequency::AtBedtime,
        Frequency::AsNeeded,
        Frequency::Weekly,
        Frequency::Monthly,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Frequency::OnceDaily => "once daily",
            Frequency::TwiceDaily => "twice daily",
            Frequency::ThreeTimesDaily => "three times daily",
            Frequency::FourTimesDaily => "four times daily",
            Frequency::Every4Hours => "every 4 hours",
            Frequency::Every6Hours => "every 6 hours",
            Frequency::Every8Hours => "every 8 hours",
            Frequency::Every12Hours => "every 12 hours",
            Frequency::AtBedtime => "at bedtime",
            Frequency::AsNeeded => "as needed",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
        }
    }

    /// Scheduled doses per day, used for adherence reporting.
    ///
    /// As-needed medication has no schedule, so nothing is expected.
    pub fn doses_per_day(self) -> f64 {
        match self {
            Frequency::OnceDaily | Frequency::AtBedtime => 1.0,
            Frequency::TwiceDaily | Frequency::Every12Hours => 2.0,
            Frequency::ThreeTimesDaily | Frequency::Every8Hours => 3.0,
            Frequency::FourTimesDaily | Frequency::Every6Hours => 4.0,
            Frequency::Every4Hours => 6.0,
            Frequency::Weekly => 1.0 / 7.0,
            Frequency::Monthly => 1.0 / 30.0,
            Frequency::AsNeeded => 0.0,
        }
    }
}

impl FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
        let freq = match normalized.as_str() {
            "qd" | "daily" | "once a day" => Frequency::OnceDaily,
            "bid" | "twice a day" => Frequency::TwiceDaily,
            "tid" | "three times a day" => Frequency::ThreeTimesDaily,
            "qid" | "four times a day" => Frequency::FourTimesDaily,
            "q4h" => Frequency::Every4Hours,
            "q6h" => Frequency::Every6Hours,
            "q8h" => Frequency::Every8Hours,
            "q12h" => Frequency::Every12Hours,
            "qhs" | "bedtime" => Frequency::AtBedtime,
            "prn" => Frequency::AsNeeded,
            other => {
                return Frequency::ALL
                    .iter()
                    .copied()
                    .find(|f| f.as_str() == other)
                    .ok_or_else(|| format!("Unrecognized frequency '{}'", s.trim()))
            }
        };
        Ok(freq)
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Dosage
// ============================================================================

/// A validated dosage amount.
///
/// Range prescriptions ("1-2 tablets") have no single numeric value and are
/// kept verbatim.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Dosage {
    Amount(f64),
    Range(String),
}

impl Dosage {
    pub fn amount(&self) -> Option<f64> {
        match self {
            Dosage::Amount(v) => Some(*v),
            Dosage::Range(_) => None,
        }
    }
}

impl fmt::Display for Dosage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dosage::Amount(v) => write!(f, "{}", v),
            Dosage::Range(r) => f.write_str(r),
        }
    }
}

/// Dosage as supplied by a caller, before validation
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum DosageInput {
    Number(f64),
    Text(String),
}

impl From<f64> for DosageInput {
    fn from(v: f64) -> Self {
        DosageInput::Number(v)
    }
}

impl From<&str> for DosageInput {
    fn from(s: &str) -> Self {
        DosageInput::Text(s.to_string())
    }
}

// ============================================================================
// Medication Records
// ============================================================================

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MedicationStatus {
    Active,
    Discontinued,
}

/// One recorded intake (or missed dose). Never modified after it is logged.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IntakeEvent {
    pub timestamp: DateTime<Utc>,
    pub dosage: Dosage,
    pub notes: Option<String>,
    pub side_effects: Vec<String>,
    pub missed_dose: bool,
}

/// Result of checking a medication against one regulatory catalog
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ComplianceResult {
    pub approved: bool,
    pub compliant: bool,
    pub message: String,
    pub warnings: Vec<String>,
}

/// Per-jurisdiction compliance taken when the record was created.
///
/// `None` means the catalog was not checked; it serializes as `null`.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct ComplianceSnapshot {
    pub fda_compliance: Option<ComplianceResult>,
    pub health_canada_compliance: Option<ComplianceResult>,
}

impl ComplianceSnapshot {
    pub fn get(&self, jurisdiction: Jurisdiction) -> Option<&ComplianceResult> {
        match jurisdiction {
            Jurisdiction::Fda => self.fda_compliance.as_ref(),
            Jurisdiction::HealthCanada => self.health_canada_compliance.as_ref(),
        }
    }

    pub(crate) fn set(&mut self, jurisdiction: Jurisdiction, result: ComplianceResult) {
        match jurisdiction {
            Jurisdiction::Fda => self.fda_compliance = Some(result),
            Jurisdiction::HealthCanada => self.health_canada_compliance = Some(result),
        }
    }
}

/// A tracked medication
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MedicationRecord {
    pub id: Uuid,
    pub name: String,
    pub dosage: Dosage,
    pub unit: String,
    pub frequency: Frequency,
    pub prescriber: Option<String>,
    pub reason: Option<String>,
    pub start_date: DateTime<Utc>,
    pub status: MedicationStatus,
    pub discontinued_at: Option<DateTime<Utc>>,
    pub discontinuation_reason: Option<String>,
    pub intake_log: Vec<IntakeEvent>,
    pub warnings: BTreeSet<String>,
    pub compliance: ComplianceSnapshot,
    pub region: Region,
    pub updated_at: DateTime<Utc>,
}

impl MedicationRecord {
    pub fn is_active(&self) -> bool {
        self.status == MedicationStatus::Active
    }
}

/// Structured medication fields supplied to `add`
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct NewMedication {
    pub name: Option<String>,
    pub dosage: Option<DosageInput>,
    pub unit: Option<String>,
    pub frequency: Option<String>,
    pub prescriber: Option<String>,
    pub reason: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
}

impl NewMedication {
    /// Convenience constructor for the common name/dosage/unit/frequency case
    pub fn new(
        name: impl Into<String>,
        dosage: impl Into<DosageInput>,
        unit: impl Into<String>,
        frequency: impl Into<String>,
    ) -> Self {
        Self {
            name: Some(name.into()),
            dosage: Some(dosage.into()),
            unit: Some(unit.into()),
            frequency: Some(frequency.into()),
            ..Self::default()
        }
    }
}

/// Input to `add`: either free text to be parsed or structured fields
#[derive(Clone, Debug)]
pub enum MedicationInput {
    Text(String),
    Fields(NewMedication),
}

impl From<&str> for MedicationInput {
    fn from(s: &str) -> Self {
        MedicationInput::Text(s.to_string())
    }
}

impl From<String> for MedicationInput {
    fn from(s: String) -> Self {
        MedicationInput::Text(s)
    }
}

impl From<NewMedication> for MedicationInput {
    fn from(m: NewMedication) -> Self {
        MedicationInput::Fields(m)
    }
}

/// Fields that may change on an existing record
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct MedicationUpdate {
    pub dosage: Option<DosageInput>,
    pub unit: Option<String>,
    pub frequency: Option<String>,
    pub prescriber: Option<String>,
    pub reason: Option<String>,
}

/// Details for a single intake log entry
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct IntakeDetails {
    pub notes: Option<String>,
    pub side_effects: Vec<String>,
    pub missed_dose: bool,
    /// Defaults to now
    pub taken_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Drug Interactions
// ============================================================================

/// Interaction severity, ordered from harmless to critical
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    None,
    Low,
    Moderate,
    High,
    Severe,
    Critical,
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "NONE" => Ok(Severity::None),
            "LOW" | "MINOR" => Ok(Severity::Low),
            "MODERATE" => Ok(Severity::Moderate),
            "HIGH" | "MAJOR" => Ok(Severity::High),
            "SEVERE" => Ok(Severity::Severe),
            "CRITICAL" | "CONTRAINDICATED" => Ok(Severity::Critical),
            other => Err(format!("Unknown severity '{}'", other)),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum InteractionSource {
    ExternalService,
    LocalTable,
}

/// One drug-drug interaction finding
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct InteractionResult {
    pub drug_a: String,
    pub drug_b: String,
    pub severity: Severity,
    pub description: String,
    pub mechanism: Option<String>,
    pub source: InteractionSource,
    pub pregnancy_warning: Option<String>,
}

// ============================================================================
// Audit
// ============================================================================

/// Kind of action recorded in the audit trail
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    MedicationAdded,
    MedicationUpdated,
    MedicationDiscontinued,
    IntakeLogged,
    ValidationFailed,
    SecurityViolation,
    InteractionCheck,
    ComplianceVerified,
    AuditCleared,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::MedicationAdded => "MEDICATION_ADDED",
            AuditAction::MedicationUpdated => "MEDICATION_UPDATED",
            AuditAction::MedicationDiscontinued => "MEDICATION_DISCONTINUED",
            AuditAction::IntakeLogged => "INTAKE_LOGGED",
            AuditAction::ValidationFailed => "VALIDATION_FAILED",
            AuditAction::SecurityViolation => "SECURITY_VIOLATION",
            AuditAction::InteractionCheck => "INTERACTION_CHECK",
            AuditAction::ComplianceVerified => "COMPLIANCE_VERIFIED",
            AuditAction::AuditCleared => "AUDIT_CLEARED",
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum AuditSeverity {
    Info,
    Warning,
    Critical,
}

/// One immutable audit trail entry
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub action: AuditAction,
    pub medication_id: Option<Uuid>,
    pub details: serde_json::Value,
    pub severity: Option<AuditSeverity>,
}
