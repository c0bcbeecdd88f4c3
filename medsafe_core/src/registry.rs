//! Medication registry: owns medication records and runs every public
//! operation through parsing, validation, compliance and audit.
//!
//! ## Add pipeline
//!
//! 1. Free text is parsed (structured input skips this)
//! 2. Hard rules reject missing name/dosage, malicious input, bad dosage,
//!    bad name and unknown frequency; each rejection is audited first
//! 3. Field-level problems come back as `AddOutcome::ValidationFailed`
//! 4. Regulatory catalogs for the configured region are consulted
//! 5. Duplicate check and insert happen under one write lock
//! 6. The addition is audited
//!
//! Calls that may block on the outside world (interaction checks, catalog
//! verification) never hold the record lock.

use crate::audit::{AuditQuery, ClearOutcome};
use crate::catalog::{catalog_for, CatalogVerification, ComplianceQuery};
use crate::interactions::{CheckOptions, InteractionResolver};
use crate::parser::{self, ParsedMedication};
use crate::report::{build_report, ComplianceReport};
use crate::validation::{self, is_allowed_unit, sanitize};
use crate::{
    AuditAction, AuditEntry, AuditLog, AuditSeverity, ComplianceSnapshot, Config, Dosage,
    DosageInput, Error, Frequency, IntakeDetails, IntakeEvent, InteractionResult, Jurisdiction,
    MedicationInput, MedicationRecord, MedicationStatus, MedicationUpdate, NewMedication, Region,
    RejectionKind, Result, Severity,
};
use chrono::Utc;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

const JURISDICTIONS: [Jurisdiction; 2] = [Jurisdiction::Fda, Jurisdiction::HealthCanada];

/// A medication that was added
#[derive(Clone, Debug)]
pub struct AddedMedication {
    pub medication_id: Uuid,
    pub record: MedicationRecord,
    pub warnings: Vec<String>,
}

/// Outcome of `add` when nothing was rejected outright
#[derive(Clone, Debug)]
pub enum AddOutcome {
    Added(AddedMedication),
    ValidationFailed { errors: Vec<String> },
}

impl AddOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AddOutcome::Added(_))
    }

    pub fn added(&self) -> Option<&AddedMedication> {
        match self {
            AddOutcome::Added(added) => Some(added),
            AddOutcome::ValidationFailed { .. } => None,
        }
    }
}

/// Outcome of `update` when nothing was rejected outright
#[derive(Clone, Debug)]
pub enum UpdateOutcome {
    Updated {
        record: MedicationRecord,
        warnings: Vec<String>,
    },
    ValidationFailed {
        errors: Vec<String>,
    },
}

/// Medication fields that passed the hard rules
struct ValidatedMedication {
    name: String,
    dosage: Dosage,
    unit: String,
    frequency: Frequency,
    prescriber: Option<String>,
    reason: Option<String>,
}

enum Checked<T> {
    Valid(T),
    FieldErrors(Vec<String>),
}

/// Medication records for one user session
pub struct MedicationRegistry {
    records: RwLock<Vec<MedicationRecord>>,
    audit: Arc<AuditLog>,
    resolver: InteractionResolver,
    region: Region,
    compliance_enabled: bool,
}

impl MedicationRegistry {
    /// Registry with US compliance checks and the local interaction table
    pub fn new(audit: Arc<AuditLog>) -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            audit,
            resolver: InteractionResolver::local_only(),
            region: Region::default(),
            compliance_enabled: true,
        }
    }

    pub fn from_config(config: &Config, audit: Arc<AuditLog>) -> Result<Self> {
        config.validate()?;
        for jurisdiction in JURISDICTIONS {
            catalog_for(jurisdiction).ensure_valid()?;
        }
        Ok(Self::new(audit)
            .with_region(config.compliance.region)
            .with_compliance_checks(config.compliance.enabled)
            .with_resolver(InteractionResolver::from_config(&config.interactions)?))
    }

    pub fn with_region(mut self, region: Region) -> Self {
        self.region = region;
        self
    }

    pub fn with_compliance_checks(mut self, enabled: bool) -> Self {
        self.compliance_enabled = enabled;
        self
    }

    pub fn with_resolver(mut self, resolver: InteractionResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn region(&self) -> Region {
        self.region
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    fn read_records(&self) -> Result<RwLockReadGuard<'_, Vec<MedicationRecord>>> {
        self.records
            .read()
            .map_err(|_| Error::State("Medication registry lock poisoned".into()))
    }

    fn write_records(&self) -> Result<RwLockWriteGuard<'_, Vec<MedicationRecord>>> {
        self.records
            .write()
            .map_err(|_| Error::State("Medication registry lock poisoned".into()))
    }

    // ========================================================================
    // Add
    // ========================================================================

    /// Add a medication from free text or structured fields
    pub fn add(&self, input: impl Into<MedicationInput>) -> Result<AddOutcome> {
        let mut warnings = Vec::new();

        let new = match input.into() {
            MedicationInput::Fields(new) => new,
            MedicationInput::Text(raw) => match parser::parse(&raw) {
                Ok(parsed) => {
                    warnings.extend(parsed.warnings.iter().cloned());
                    new_medication_from_parsed(parsed)
                }
                Err(e) => {
                    self.audit_rejection(&e, None, json!({ "input": sanitize(&raw) }));
                    return Err(e);
                }
            },
        };

        let validated = match validate_new(&new, &mut warnings) {
            Ok(Checked::Valid(v)) => v,
            Ok(Checked::FieldErrors(errors)) => {
                tracing::info!("Medication add failed field validation: {:?}", errors);
                self.audit.record(
                    AuditAction::ValidationFailed,
                    None,
                    json!({ "operation": "add", "errors": errors, "recoverable": true }),
                    Some(AuditSeverity::Info),
                );
                return Ok(AddOutcome::ValidationFailed { errors });
            }
            Err(e) => {
                self.audit_rejection(&e, None, attempted_fields(&new));
                return Err(e);
            }
        };

        let compliance = self.check_compliance(&validated, &mut warnings);

        let now = Utc::now();
        let record = MedicationRecord {
            id: Uuid::new_v4(),
            name: validated.name,
            dosage: validated.dosage,
            unit: validated.unit,
            frequency: validated.frequency,
            prescriber: validated.prescriber,
            reason: validated.reason,
            start_date: new.start_date.unwrap_or(now),
            status: MedicationStatus::Active,
            discontinued_at: None,
            discontinuation_reason: None,
            intake_log: Vec::new(),
            warnings: warnings.iter().cloned().collect(),
            compliance,
            region: self.region,
            updated_at: now,
        };

        // Duplicate check and insert must see the same table
        let inserted = {
            let mut records = self.write_records()?;
            let lowered = record.name.to_lowercase();
            let duplicate = records
                .iter()
                .find(|r| r.is_active() && r.name.to_lowercase() == lowered)
                .map(|r| r.id);
            match duplicate {
                Some(existing) => Err(existing),
                None => {
                    records.push(record.clone());
                    Ok(())
                }
            }
        };

        if let Err(existing) = inserted {
            let e = Error::rejected(
                RejectionKind::DuplicateMedication,
                format!("{} is already an active medication", record.name),
            );
            self.audit_rejection(
                &e,
                None,
                json!({ "name": record.name, "existing_id": existing }),
            );
            return Err(e);
        }

        tracing::info!("Added medication {} ({})", record.name, record.id);
        self.audit.record(
            AuditAction::MedicationAdded,
            Some(record.id),
            json!({
                "name": record.name,
                "dosage": record.dosage,
                "unit": record.unit,
                "frequency": record.frequency,
                "region": record.region,
                "fda_compliant": record.compliance.fda_compliance.as_ref().map(|c| c.compliant),
                "health_canada_compliant": record
                    .compliance
                    .health_canada_compliance
                    .as_ref()
                    .map(|c| c.compliant),
                "warnings": warnings.len(),
            }),
            if warnings.is_empty() {
                None
            } else {
                Some(AuditSeverity::Warning)
            },
        );

        Ok(AddOutcome::Added(AddedMedication {
            medication_id: record.id,
            record,
            warnings,
        }))
    }

    /// Run the catalogs for the active region, collecting their warnings
    fn check_compliance(
        &self,
        medication: &ValidatedMedication,
        warnings: &mut Vec<String>,
    ) -> ComplianceSnapshot {
        let mut snapshot = ComplianceSnapshot::default();
        if !self.compliance_enabled {
            tracing::debug!("Compliance checks disabled, skipping catalogs");
            return snapshot;
        }

        let query = ComplianceQuery {
            name: &medication.name,
            dosage: &medication.dosage,
            unit: &medication.unit,
            frequency: medication.frequency,
        };
        for jurisdiction in JURISDICTIONS {
            if !self.region.includes(jurisdiction) {
                continue;
            }
            let result = catalog_for(jurisdiction).check_compliance(&query);
            warnings.extend(result.warnings.iter().cloned());
            snapshot.set(jurisdiction, result);
        }
        snapshot
    }

    // ========================================================================
    // Update / Discontinue / Intake
    // ========================================================================

    /// Change dosage, unit, frequency, prescriber or reason of an active record
    pub fn update(&self, id: Uuid, update: MedicationUpdate) -> Result<UpdateOutcome> {
        let current = self.get_medication(id)?;
        if !current.is_active() {
            return Err(Error::State(format!(
                "Cannot update discontinued medication {}",
                id
            )));
        }

        let texts = [
            update.unit.as_deref(),
            update.frequency.as_deref(),
            update.prescriber.as_deref(),
            update.reason.as_deref(),
            dosage_text(update.dosage.as_ref()),
        ];
        if texts.into_iter().flatten().any(validation::is_malicious) {
            let e = Error::rejected(
                RejectionKind::MaliciousInput,
                "Update contains disallowed content",
            );
            self.audit_rejection(&e, Some(id), json!({ "operation": "update" }));
            return Err(e);
        }

        let hard_checks = (|| -> Result<(Option<Dosage>, Option<Frequency>)> {
            let dosage = update.dosage.as_ref().map(validation::validate_dosage).transpose()?;
            let frequency = update
                .frequency
                .as_deref()
                .map(validation::validate_frequency)
                .transpose()?;
            Ok((dosage, frequency))
        })();
        let (dosage, frequency) = match hard_checks {
            Ok(checked) => checked,
            Err(e) => {
                self.audit_rejection(&e, Some(id), json!({ "operation": "update" }));
                return Err(e);
            }
        };

        let errors = validation::field_errors(
            update.unit.as_deref().or(Some(current.unit.as_str())),
            update.prescriber.as_deref(),
            update.reason.as_deref(),
        );
        if !errors.is_empty() {
            self.audit.record(
                AuditAction::ValidationFailed,
                Some(id),
                json!({ "operation": "update", "errors": errors, "recoverable": true }),
                Some(AuditSeverity::Info),
            );
            return Ok(UpdateOutcome::ValidationFailed { errors });
        }

        let mut warnings = Vec::new();
        let mut changes = serde_json::Map::new();

        let record = {
            let mut records = self.write_records()?;
            let record = records
                .iter_mut()
                .find(|r| r.id == id)
                .ok_or(Error::NotFound(id))?;
            if !record.is_active() {
                return Err(Error::State(format!(
                    "Cannot update discontinued medication {}",
                    id
                )));
            }

            if let Some(dosage) = dosage {
                changes.insert("dosage".into(), json!({ "from": record.dosage, "to": dosage }));
                record.dosage = dosage;
            }
            if let Some(unit) = update.unit.as_deref().map(str::trim) {
                if !is_allowed_unit(unit) {
                    warnings.push(format!("Unrecognized unit '{}'", unit));
                }
                changes.insert("unit".into(), json!({ "from": record.unit, "to": unit }));
                record.unit = unit.to_string();
            }
            if let Some(frequency) = frequency {
                changes.insert(
                    "frequency".into(),
                    json!({ "from": record.frequency, "to": frequency }),
                );
                record.frequency = frequency;
            }
            if let Some(prescriber) = update.prescriber.as_deref() {
                let prescriber = non_empty(sanitize(prescriber));
                changes.insert(
                    "prescriber".into(),
                    json!({ "from": record.prescriber, "to": prescriber }),
                );
                record.prescriber = prescriber;
            }
            if let Some(reason) = update.reason.as_deref() {
                let reason = non_empty(sanitize(reason));
                changes.insert("reason".into(), json!({ "from": record.reason, "to": reason }));
                record.reason = reason;
            }

            if changes.contains_key("dosage") || changes.contains_key("unit") {
                let validated = ValidatedMedication {
                    name: record.name.clone(),
                    dosage: record.dosage.clone(),
                    unit: record.unit.clone(),
                    frequency: record.frequency,
                    prescriber: None,
                    reason: None,
                };
                // The creation snapshot stays; new findings become warnings
                self.check_compliance(&validated, &mut warnings);
            }

            record.warnings.extend(warnings.iter().cloned());
            record.updated_at = Utc::now();
            record.clone()
        };

        tracing::info!("Updated medication {} ({} fields)", id, changes.len());
        self.audit.record(
            AuditAction::MedicationUpdated,
            Some(id),
            json!({ "name": record.name, "changes": changes }),
            None,
        );

        Ok(UpdateOutcome::Updated { record, warnings })
    }

    /// Mark a medication discontinued. Discontinuation is final.
    pub fn discontinue(&self, id: Uuid, reason: &str) -> Result<MedicationRecord> {
        let reason = non_empty(sanitize(reason));

        let record = {
            let mut records = self.write_records()?;
            let record = records
                .iter_mut()
                .find(|r| r.id == id)
                .ok_or(Error::NotFound(id))?;
            if record.status == MedicationStatus::Discontinued {
                return Err(Error::State(format!(
                    "Medication {} is already discontinued",
                    id
                )));
            }
            let now = Utc::now();
            record.status = MedicationStatus::Discontinued;
            record.discontinued_at = Some(now);
            record.discontinuation_reason = reason.clone();
            record.updated_at = now;
            record.clone()
        };

        tracing::info!("Discontinued medication {} ({})", record.name, id);
        self.audit.record(
            AuditAction::MedicationDiscontinued,
            Some(id),
            json!({ "name": record.name, "reason": reason }),
            None,
        );
        Ok(record)
    }

    /// Record a dose taken (or missed) for an active medication
    pub fn log_intake(&self, id: Uuid, details: IntakeDetails) -> Result<IntakeEvent> {
        let notes = details.notes.as_deref().map(sanitize).and_then(non_empty);
        let side_effects: Vec<String> = details
            .side_effects
            .iter()
            .map(String::as_str)
            .map(sanitize)
            .filter(|s| !s.is_empty())
            .collect();

        let (name, event) = {
            let mut records = self.write_records()?;
            let record = records
                .iter_mut()
                .find(|r| r.id == id)
                .ok_or(Error::NotFound(id))?;
            if !record.is_active() {
                return Err(Error::State(format!(
                    "Cannot log intake for discontinued medication {}",
                    id
                )));
            }
            let event = IntakeEvent {
                timestamp: details.taken_at.unwrap_or_else(Utc::now),
                dosage: record.dosage.clone(),
                notes,
                side_effects,
                missed_dose: details.missed_dose,
            };
            record.intake_log.push(event.clone());
            (record.name.clone(), event)
        };

        tracing::debug!("Logged intake for {} ({})", name, id);
        self.audit.record(
            AuditAction::IntakeLogged,
            Some(id),
            json!({
                "name": name,
                "dosage": event.dosage,
                "missed_dose": event.missed_dose,
                "side_effects": event.side_effects,
            }),
            if event.side_effects.is_empty() {
                None
            } else {
                Some(AuditSeverity::Warning)
            },
        );
        Ok(event)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn get_medication(&self, id: Uuid) -> Result<MedicationRecord> {
        self.read_records()?
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or(Error::NotFound(id))
    }

    /// Active medications, oldest first
    pub fn get_all_medications(&self) -> Result<Vec<MedicationRecord>> {
        Ok(self
            .read_records()?
            .iter()
            .filter(|r| r.is_active())
            .cloned()
            .collect())
    }

    /// Adherence for one medication, or for all active ones when `id` is None
    pub fn get_compliance_report(&self, id: Option<Uuid>, days: u32) -> Result<ComplianceReport> {
        let records = self.read_records()?;
        let now = Utc::now();
        match id {
            Some(id) => {
                let record = records
                    .iter()
                    .find(|r| r.id == id)
                    .ok_or(Error::NotFound(id))?;
                Ok(build_report([record], Some(id), days, now))
            }
            None => Ok(build_report(
                records.iter().filter(|r| r.is_active()),
                None,
                days,
                now,
            )),
        }
    }

    // ========================================================================
    // Interactions and verification
    // ========================================================================

    /// Check interactions among `names`. Never fails.
    pub fn check_interactions(
        &self,
        names: &[String],
        options: &CheckOptions,
    ) -> Vec<InteractionResult> {
        let results = self.resolver.check(names, options);

        let highest = results.iter().map(|r| r.severity).max();
        let severity = match highest {
            Some(Severity::Severe | Severity::Critical) => Some(AuditSeverity::Critical),
            Some(Severity::High | Severity::Moderate) => Some(AuditSeverity::Warning),
            _ => None,
        };
        self.audit.record(
            AuditAction::InteractionCheck,
            None,
            json!({
                "medications": names,
                "interactions_found": results.len(),
                "highest_severity": highest,
                "gestation_week": options.gestation_week,
            }),
            severity,
        );
        results
    }

    /// Check interactions among all active medications
    pub fn check_active_interactions(
        &self,
        options: &CheckOptions,
    ) -> Result<Vec<InteractionResult>> {
        let names: Vec<String> = self
            .read_records()?
            .iter()
            .filter(|r| r.is_active())
            .map(|r| r.name.clone())
            .collect();
        Ok(self.check_interactions(&names, options))
    }

    /// Run extended catalog verification for a record and merge any new
    /// warnings into it.
    ///
    /// Verification failures are logged and skipped.
    pub fn verify_compliance(&self, id: Uuid) -> Result<Vec<CatalogVerification>> {
        let snapshot = self.get_medication(id)?;
        if !self.compliance_enabled {
            tracing::debug!("Compliance checks disabled, skipping verification");
            return Ok(Vec::new());
        }

        let mut verifications = Vec::new();
        for jurisdiction in JURISDICTIONS {
            if !self.region.includes(jurisdiction) {
                continue;
            }
            match catalog_for(jurisdiction).verify(&snapshot.name) {
                Ok(v) => verifications.push(v),
                Err(e) => tracing::warn!(
                    "{} verification of {} failed, continuing without it: {}",
                    jurisdiction.label(),
                    snapshot.name,
                    e
                ),
            }
        }

        let new_warnings: BTreeSet<String> = verifications
            .iter()
            .flat_map(|v| v.warnings.iter().cloned())
            .collect();

        {
            let mut records = self.write_records()?;
            match records.iter_mut().find(|r| r.id == id) {
                Some(record) => {
                    record.warnings.extend(new_warnings.iter().cloned());
                    if !new_warnings.is_empty() {
                        record.updated_at = Utc::now();
                    }
                }
                None => tracing::warn!("Medication {} disappeared during verification", id),
            }
        }

        self.audit.record(
            AuditAction::ComplianceVerified,
            Some(id),
            json!({
                "name": snapshot.name,
                "verifications": verifications,
            }),
            if new_warnings.is_empty() {
                None
            } else {
                Some(AuditSeverity::Warning)
            },
        );
        Ok(verifications)
    }

    // ========================================================================
    // Audit passthrough
    // ========================================================================

    pub fn get_audit_log(&self, filters: &AuditQuery) -> Vec<AuditEntry> {
        self.audit.query(filters)
    }

    pub fn export_audit_logs(&self) -> Vec<AuditEntry> {
        self.audit.export_all()
    }

    pub fn clear_audit_logs(&self, confirmed: bool) -> ClearOutcome {
        self.audit.clear(confirmed)
    }

    /// Audit a refused operation before its error goes back to the caller
    fn audit_rejection(
        &self,
        error: &Error,
        medication_id: Option<Uuid>,
        context: serde_json::Value,
    ) {
        let (action, severity, kind) = match error {
            Error::Rejected { kind, .. } if kind.is_security_violation() => (
                AuditAction::SecurityViolation,
                AuditSeverity::Critical,
                Some(*kind),
            ),
            Error::Rejected { kind, .. } => {
                (AuditAction::ValidationFailed, AuditSeverity::Warning, Some(*kind))
            }
            _ => (AuditAction::ValidationFailed, AuditSeverity::Warning, None),
        };
        tracing::warn!("Rejected medication input: {}", error);
        self.audit.record(
            action,
            medication_id,
            json!({
                "reason": error.to_string(),
                "kind": kind,
                "input": context,
            }),
            Some(severity),
        );
    }
}

fn new_medication_from_parsed(parsed: ParsedMedication) -> NewMedication {
    NewMedication {
        name: non_empty(parsed.name),
        dosage: parsed.dosage.map(|d| match d {
            Dosage::Amount(v) => DosageInput::Number(v),
            Dosage::Range(r) => DosageInput::Text(r),
        }),
        unit: parsed.unit,
        frequency: parsed.frequency.map(|f| f.as_str().to_string()),
        ..NewMedication::default()
    }
}

fn dosage_text(dosage: Option<&DosageInput>) -> Option<&str> {
    match dosage {
        Some(DosageInput::Text(t)) => Some(t.as_str()),
        _ => None,
    }
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Sanitized copy of the attempted fields, for audit details
fn attempted_fields(new: &NewMedication) -> serde_json::Value {
    json!({
        "name": new.name.as_deref().map(sanitize),
        "dosage": new.dosage,
        "unit": new.unit.as_deref().map(sanitize),
        "frequency": new.frequency.as_deref().map(sanitize),
    })
}

/// Apply the hard rules and field checks to a new medication
fn validate_new(
    new: &NewMedication,
    warnings: &mut Vec<String>,
) -> Result<Checked<ValidatedMedication>> {
    let raw_name = new
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| Error::rejected(RejectionKind::MissingName, "Medication name is required"))?;

    let dosage_input = new
        .dosage
        .as_ref()
        .filter(|d| !matches!(d, DosageInput::Text(t) if t.trim().is_empty()))
        .ok_or_else(|| Error::rejected(RejectionKind::MissingDosage, "Dosage is required"))?;

    let texts = [
        Some(raw_name),
        new.unit.as_deref(),
        new.frequency.as_deref(),
        new.prescriber.as_deref(),
        new.reason.as_deref(),
        dosage_text(Some(dosage_input)),
    ];
    if texts.into_iter().flatten().any(validation::is_malicious) {
        return Err(Error::rejected(
            RejectionKind::MaliciousInput,
            "Input contains disallowed content",
        ));
    }

    let dosage = validation::validate_dosage(dosage_input)?;

    let name = sanitize(raw_name);
    if name.is_empty() {
        return Err(Error::rejected(
            RejectionKind::InvalidName,
            "Medication name is empty after sanitization",
        ));
    }
    validation::check_name(&name)
        .map_err(|problem| Error::rejected(RejectionKind::InvalidName, problem))?;

    let frequency = match new.frequency.as_deref().map(str::trim).filter(|f| !f.is_empty()) {
        Some(text) => validation::validate_frequency(text)?,
        None => {
            warnings.push("No frequency given, assuming once daily".to_string());
            Frequency::OnceDaily
        }
    };

    let errors = validation::field_errors(
        new.unit.as_deref(),
        new.prescriber.as_deref(),
        new.reason.as_deref(),
    );
    if !errors.is_empty() {
        return Ok(Checked::FieldErrors(errors));
    }

    let unit = new.unit.as_deref().map(str::trim).unwrap_or_default().to_string();
    if !is_allowed_unit(&unit) {
        warnings.push(format!("Unrecognized unit '{}'", unit));
    }

    Ok(Checked::Valid(ValidatedMedication {
        name,
        dosage,
        unit,
        frequency,
        prescriber: new.prescriber.as_deref().map(sanitize).and_then(non_empty),
        reason: new.reason.as_deref().map(sanitize).and_then(non_empty),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> MedicationRegistry {
        crate::logging::init_test();
        MedicationRegistry::new(Arc::new(AuditLog::new("tester")))
    }

    fn lisinopril(dosage: f64) -> NewMedication {
        NewMedication::new("Lisinopril", dosage, "mg", "once daily")
    }

    fn added(outcome: AddOutcome) -> AddedMedication {
        match outcome {
            AddOutcome::Added(added) => added,
            AddOutcome::ValidationFailed { errors } => panic!("validation failed: {:?}", errors),
        }
    }

    #[test]
    fn test_add_structured() {
        let registry = registry();
        let result = added(registry.add(lisinopril(10.0)).unwrap());

        let fda = result.record.compliance.fda_compliance.as_ref().unwrap();
        assert!(fda.approved);
        assert!(fda.compliant);
        assert!(result.record.compliance.health_canada_compliance.is_none());
        assert_eq!(result.record.status, MedicationStatus::Active);
        assert_eq!(registry.get_all_medications().unwrap().len(), 1);
    }

    #[test]
    fn test_add_from_text() {
        let registry = registry();
        let result = added(registry.add("Metformin 500mg twice daily").unwrap());
        assert_eq!(result.record.name, "Metformin");
        assert_eq!(result.record.dosage, Dosage::Amount(500.0));
        assert_eq!(result.record.frequency, Frequency::TwiceDaily);
    }

    #[test]
    fn test_text_without_dosage_is_rejected() {
        let registry = registry();
        let err = registry.add("Vitamin B12").unwrap_err();
        assert_eq!(err.rejection_kind(), Some(RejectionKind::MissingDosage));
        assert_eq!(registry.audit().len(), 1);
    }

    #[test]
    fn test_empty_text_is_audited() {
        let registry = registry();
        assert!(matches!(registry.add("  "), Err(Error::InvalidInput(_))));
        let entries = registry.export_audit_logs();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, AuditAction::ValidationFailed);
    }

    #[test]
    fn test_missing_unit_is_recoverable() {
        let registry = registry();
        let mut new = lisinopril(10.0);
        new.unit = None;
        match registry.add(new).unwrap() {
            AddOutcome::ValidationFailed { errors } => {
                assert_eq!(errors, vec!["Unit is required"]);
            }
            AddOutcome::Added(_) => panic!("should not add without a unit"),
        }
        assert!(registry.get_all_medications().unwrap().is_empty());
    }

    #[test]
    fn test_missing_frequency_defaults_with_warning() {
        let registry = registry();
        let mut new = lisinopril(10.0);
        new.frequency = None;
        let result = added(registry.add(new).unwrap());
        assert_eq!(result.record.frequency, Frequency::OnceDaily);
        assert!(result.warnings.iter().any(|w| w.contains("assuming once daily")));
    }

    #[test]
    fn test_name_sanitized() {
        let registry = registry();
        let result = added(
            registry
                .add(NewMedication::new("St. John's Wort", 300.0, "mg", "once daily"))
                .unwrap(),
        );
        assert_eq!(result.record.name, "St. Johns Wort");
    }

    #[test]
    fn test_name_empty_after_sanitizing() {
        let registry = registry();
        let err = registry
            .add(NewMedication::new("<>%", 10.0, "mg", "once daily"))
            .unwrap_err();
        assert_eq!(err.rejection_kind(), Some(RejectionKind::InvalidName));
    }

    #[test]
    fn test_range_dosage_accepted() {
        let registry = registry();
        let result = added(registry.add("Acetaminophen 1-2 tablets").unwrap());
        assert_eq!(result.record.dosage, Dosage::Range("1-2".into()));
    }

    #[test]
    fn test_rediscontinued_name_can_be_added_again() {
        let registry = registry();
        let first = added(registry.add(lisinopril(10.0)).unwrap());
        registry.discontinue(first.medication_id, "switched").unwrap();
        assert!(registry.add(lisinopril(20.0)).unwrap().is_success());
    }

    #[test]
    fn test_update_changes_fields_and_audits() {
        let registry = registry();
        let id = added(registry.add(lisinopril(10.0)).unwrap()).medication_id;

        let outcome = registry
            .update(
                id,
                MedicationUpdate {
                    dosage: Some(DosageInput::Number(100.0)),
                    frequency: Some("twice daily".into()),
                    ..MedicationUpdate::default()
                },
            )
            .unwrap();

        match outcome {
            UpdateOutcome::Updated { record, warnings } => {
                assert_eq!(record.dosage, Dosage::Amount(100.0));
                assert_eq!(record.frequency, Frequency::TwiceDaily);
                assert!(warnings.iter().any(|w| w.contains("exceeds the maximum")));
            }
            UpdateOutcome::ValidationFailed { errors } => panic!("{:?}", errors),
        }

        let updates =
            registry.get_audit_log(&AuditQuery::default().action(AuditAction::MedicationUpdated));
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].medication_id, Some(id));
    }

    #[test]
    fn test_update_rejects_bad_dosage() {
        let registry = registry();
        let id = added(registry.add(lisinopril(10.0)).unwrap()).medication_id;
        let err = registry
            .update(
                id,
                MedicationUpdate {
                    dosage: Some(DosageInput::Number(0.0)),
                    ..MedicationUpdate::default()
                },
            )
            .unwrap_err();
        assert_eq!(err.rejection_kind(), Some(RejectionKind::DosageOutOfRange));
        assert_eq!(registry.get_medication(id).unwrap().dosage, Dosage::Amount(10.0));

        let failures =
            registry.get_audit_log(&AuditQuery::default().action(AuditAction::ValidationFailed));
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].medication_id, Some(id));
        assert!(registry
            .get_audit_log(&AuditQuery::default().action(AuditAction::MedicationUpdated))
            .is_empty());
    }

    #[test]
    fn test_update_with_script_is_a_security_violation() {
        let registry = registry();
        let id = added(registry.add(lisinopril(10.0)).unwrap()).medication_id;
        let err = registry
            .update(
                id,
                MedicationUpdate {
                    prescriber: Some("<script>alert(1)</script>".into()),
                    ..MedicationUpdate::default()
                },
            )
            .unwrap_err();
        assert_eq!(err.rejection_kind(), Some(RejectionKind::MaliciousInput));

        let violations =
            registry.get_audit_log(&AuditQuery::default().action(AuditAction::SecurityViolation));
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].medication_id, Some(id));
        assert_eq!(violations[0].severity, Some(AuditSeverity::Critical));
        assert_eq!(registry.get_medication(id).unwrap().prescriber, None);
    }

    #[test]
    fn test_each_successful_change_audits_once_with_its_id() {
        let registry = registry();
        let id = added(registry.add(lisinopril(10.0)).unwrap()).medication_id;
        let for_record = |action| {
            registry.get_audit_log(&AuditQuery::default().action(action).medication(id))
        };

        registry
            .update(
                id,
                MedicationUpdate {
                    reason: Some("blood pressure".into()),
                    ..MedicationUpdate::default()
                },
            )
            .unwrap();
        registry.log_intake(id, IntakeDetails::default()).unwrap();
        registry.discontinue(id, "switched to losartan").unwrap();

        for action in [
            AuditAction::MedicationAdded,
            AuditAction::MedicationUpdated,
            AuditAction::IntakeLogged,
            AuditAction::MedicationDiscontinued,
        ] {
            assert_eq!(for_record(action).len(), 1, "{:?}", action);
        }
        assert_eq!(registry.audit().len(), 4);

        let discontinued = for_record(AuditAction::MedicationDiscontinued);
        assert_eq!(discontinued[0].details["reason"], "switched to losartan");
    }

    #[test]
    fn test_non_numeric_range_rejected_and_audited() {
        let registry = registry();
        for range in ["nan-inf", "-5-10", "0-0"] {
            let new = NewMedication {
                dosage: Some(DosageInput::from(range)),
                ..lisinopril(10.0)
            };
            assert!(registry.add(new).is_err(), "{} should be rejected", range);
        }
        assert!(registry.get_all_medications().unwrap().is_empty());
        assert_eq!(
            registry
                .get_audit_log(&AuditQuery::default().action(AuditAction::ValidationFailed))
                .len(),
            3
        );
    }

    #[test]
    fn test_report_with_huge_window() {
        let registry = registry();
        registry.add(lisinopril(10.0)).unwrap();
        let report = registry.get_compliance_report(None, u32::MAX).unwrap();
        assert_eq!(report.period_days, u32::MAX);
        assert_eq!(report.expected_doses, 1);
    }

    #[test]
    fn test_update_blank_unit_is_recoverable() {
        let registry = registry();
        let id = added(registry.add(lisinopril(10.0)).unwrap()).medication_id;
        let outcome = registry
            .update(
                id,
                MedicationUpdate {
                    unit: Some(" ".into()),
                    ..MedicationUpdate::default()
                },
            )
            .unwrap();
        assert!(matches!(outcome, UpdateOutcome::ValidationFailed { .. }));
    }

    #[test]
    fn test_discontinue_is_terminal() {
        let registry = registry();
        let id = added(registry.add(lisinopril(10.0)).unwrap()).medication_id;

        let record = registry.discontinue(id, "side effects").unwrap();
        assert_eq!(record.status, MedicationStatus::Discontinued);
        assert_eq!(record.discontinuation_reason.as_deref(), Some("side effects"));

        assert!(matches!(registry.discontinue(id, "again"), Err(Error::State(_))));
        assert!(matches!(
            registry.update(id, MedicationUpdate::default()),
            Err(Error::State(_))
        ));
        assert!(matches!(
            registry.log_intake(id, IntakeDetails::default()),
            Err(Error::State(_))
        ));
        assert!(registry.get_all_medications().unwrap().is_empty());
        // Still retrievable by id
        assert!(registry.get_medication(id).is_ok());
    }

    #[test]
    fn test_log_intake_records_dosage_at_time() {
        let registry = registry();
        let id = added(registry.add(lisinopril(10.0)).unwrap()).medication_id;

        let event = registry
            .log_intake(
                id,
                IntakeDetails {
                    notes: Some("with breakfast".into()),
                    side_effects: vec!["dry cough".into(), " ".into()],
                    ..IntakeDetails::default()
                },
            )
            .unwrap();
        assert_eq!(event.dosage, Dosage::Amount(10.0));
        assert_eq!(event.side_effects, vec!["dry cough"]);

        let record = registry.get_medication(id).unwrap();
        assert_eq!(record.intake_log.len(), 1);
    }

    #[test]
    fn test_unknown_id() {
        let registry = registry();
        let id = Uuid::new_v4();
        assert!(matches!(registry.get_medication(id), Err(Error::NotFound(_))));
        assert!(matches!(registry.discontinue(id, ""), Err(Error::NotFound(_))));
        assert!(matches!(
            registry.get_compliance_report(Some(id), 7),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_compliance_disabled_leaves_both_null() {
        let registry = registry().with_compliance_checks(false);
        let result = added(registry.add(lisinopril(10.0)).unwrap());
        assert_eq!(result.record.compliance, ComplianceSnapshot::default());
    }

    #[test]
    fn test_verify_compliance_merges_pregnancy_warning() {
        let registry = registry().with_region(Region::Both);
        let id = added(
            registry
                .add(NewMedication::new("Warfarin", 5.0, "mg", "once daily"))
                .unwrap(),
        )
        .medication_id;

        let verifications = registry.verify_compliance(id).unwrap();
        assert_eq!(verifications.len(), 2);

        let record = registry.get_medication(id).unwrap();
        assert!(record.warnings.iter().any(|w| w.contains("category X")));
        assert_eq!(
            registry
                .get_audit_log(&AuditQuery::default().action(AuditAction::ComplianceVerified))
                .len(),
            1
        );
    }

    #[test]
    fn test_check_active_interactions() {
        let registry = registry();
        registry.add(NewMedication::new("Warfarin", 5.0, "mg", "once daily")).unwrap();
        registry.add(NewMedication::new("Aspirin", 81.0, "mg", "once daily")).unwrap();

        let results = registry.check_active_interactions(&CheckOptions::default()).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].severity, Severity::Severe);

        let checks =
            registry.get_audit_log(&AuditQuery::default().action(AuditAction::InteractionCheck));
        assert_eq!(checks.len(), 1);
        assert_eq!(checks[0].severity, Some(AuditSeverity::Critical));
    }
}
