//! Built-in regulatory catalogs (FDA and Health Canada).
//!
//! Each catalog maps a canonical medication name to its approved dosage
//! range, unit and usual frequency. Catalogs are built once and shared
//! read-only for the life of the process.

use crate::{ComplianceResult, Dosage, Error, Frequency, Jurisdiction, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Cached FDA catalog
static FDA_CATALOG: Lazy<RegulatoryCatalog> = Lazy::new(build_fda_catalog);

/// Cached Health Canada catalog
static HEALTH_CANADA_CATALOG: Lazy<RegulatoryCatalog> = Lazy::new(build_health_canada_catalog);

/// Get a reference to the cached catalog for a jurisdiction
pub fn catalog_for(jurisdiction: Jurisdiction) -> &'static RegulatoryCatalog {
    match jurisdiction {
        Jurisdiction::Fda => &FDA_CATALOG,
        Jurisdiction::HealthCanada => &HEALTH_CANADA_CATALOG,
    }
}

/// FDA pregnancy risk category
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum PregnancyCategory {
    A,
    B,
    C,
    D,
    X,
}

/// One approved medication
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    pub min_dosage: f64,
    pub max_dosage: f64,
    pub unit: String,
    pub frequency: Frequency,
    pub pregnancy_category: Option<PregnancyCategory>,
}

/// What a compliance check needs to know about a medication
#[derive(Clone, Debug)]
pub struct ComplianceQuery<'a> {
    pub name: &'a str,
    pub dosage: &'a Dosage,
    pub unit: &'a str,
    pub frequency: Frequency,
}

/// Result of the extended verification call
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CatalogVerification {
    pub jurisdiction: Jurisdiction,
    pub approved: bool,
    pub pregnancy_category: Option<PregnancyCategory>,
    pub warnings: Vec<String>,
}

/// A per-jurisdiction table of approved medications
#[derive(Clone, Debug)]
pub struct RegulatoryCatalog {
    pub jurisdiction: Jurisdiction,
    /// Keyed by lowercase name
    entries: HashMap<String, CatalogEntry>,
}

impl RegulatoryCatalog {
    pub fn new(jurisdiction: Jurisdiction, entries: Vec<CatalogEntry>) -> Self {
        let entries = entries
            .into_iter()
            .map(|e| (e.name.to_lowercase(), e))
            .collect();
        Self {
            jurisdiction,
            entries,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Exact, case-insensitive lookup
    pub fn lookup(&self, name: &str) -> Option<&CatalogEntry> {
        self.entries.get(&name.trim().to_lowercase())
    }

    /// Check a medication against this catalog.
    ///
    /// Unknown names are reported as not approved; that is a warning, not an
    /// error.
    pub fn check_compliance(&self, query: &ComplianceQuery<'_>) -> ComplianceResult {
        let label = self.jurisdiction.label();

        let Some(entry) = self.lookup(query.name) else {
            tracing::info!("{} catalog has no entry for {:?}", label, query.name);
            return ComplianceResult {
                approved: false,
                compliant: false,
                message: format!("{} is not in the {} catalog", query.name, label),
                warnings: vec![format!(
                    "{}: {} is not an approved medication",
                    label, query.name
                )],
            };
        };

        let mut warnings = Vec::new();
        let mut compliant = true;

        if !entry.unit.eq_ignore_ascii_case(query.unit.trim()) {
            compliant = false;
            warnings.push(format!(
                "{}: unit '{}' does not match approved unit '{}'",
                label, query.unit, entry.unit
            ));
        }

        match query.dosage {
            Dosage::Amount(value) => {
                if *value < entry.min_dosage {
                    compliant = false;
                    warnings.push(format!(
                        "{}: dosage {}{} is below the minimum of {}{}",
                        label, value, query.unit, entry.min_dosage, entry.unit
                    ));
                } else if *value > entry.max_dosage {
                    compliant = false;
                    warnings.push(format!(
                        "{}: dosage {}{} exceeds the maximum of {}{}",
                        label, value, query.unit, entry.max_dosage, entry.unit
                    ));
                }
            }
            Dosage::Range(range) => {
                warnings.push(format!(
                    "{}: range dosage '{}' was not checked against {}-{}{}",
                    label, range, entry.min_dosage, entry.max_dosage, entry.unit
                ));
            }
        }

        if query.frequency != entry.frequency {
            warnings.push(format!(
                "{}: usual frequency for {} is {}",
                label, entry.name, entry.frequency
            ));
        }

        let message = if compliant {
            format!("{} is approved and within {} guidelines", entry.name, label)
        } else {
            format!("{} is approved but outside {} guidelines", entry.name, label)
        };

        ComplianceResult {
            approved: true,
            compliant,
            message,
            warnings,
        }
    }

    /// Extended verification that also reports pregnancy risk.
    ///
    /// Supplements `check_compliance`; callers treat a failure as "no extra
    /// information".
    pub fn verify(&self, name: &str) -> Result<CatalogVerification> {
        if name.trim().is_empty() {
            return Err(Error::CatalogValidation(
                "Cannot verify an empty medication name".into(),
            ));
        }

        let label = self.jurisdiction.label();
        let entry = self.lookup(name);
        let pregnancy_category = entry.and_then(|e| e.pregnancy_category);

        let mut warnings = Vec::new();
        match pregnancy_category {
            Some(PregnancyCategory::X) => warnings.push(format!(
                "{}: {} is contraindicated in pregnancy (category X)",
                label, name
            )),
            Some(PregnancyCategory::D) => warnings.push(format!(
                "{}: {} has evidence of fetal risk (category D)",
                label, name
            )),
            _ => {}
        }

        Ok(CatalogVerification {
            jurisdiction: self.jurisdiction,
            approved: entry.is_some(),
            pregnancy_category,
            warnings,
        })
    }

    /// Validate the catalog for consistency
    ///
    /// Returns a list of validation errors, or empty Vec if valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        for (key, entry) in &self.entries {
            if entry.name.trim().is_empty() {
                errors.push("Catalog entry has empty name".to_string());
            }
            if key != &entry.name.to_lowercase() {
                errors.push(format!(
                    "Catalog key '{}' doesn't match entry name '{}'",
                    key, entry.name
                ));
            }
            if entry.unit.trim().is_empty() {
                errors.push(format!("'{}' has empty unit", entry.name));
            }
            if entry.min_dosage <= 0.0 {
                errors.push(format!(
                    "'{}': minimum dosage {} must be positive",
                    entry.name, entry.min_dosage
                ));
            }
            if entry.min_dosage > entry.max_dosage {
                errors.push(format!(
                    "'{}': min dosage {} > max {}",
                    entry.name, entry.min_dosage, entry.max_dosage
                ));
            }
        }

        if self.entries.is_empty() {
            errors.push(format!("{} catalog is empty", self.jurisdiction.label()));
        }

        errors
    }

    /// Fail if `validate` reports anything
    pub fn ensure_valid(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::CatalogValidation(errors.join("; ")))
        }
    }
}

fn entry(
    name: &str,
    min_dosage: f64,
    max_dosage: f64,
    unit: &str,
    frequency: Frequency,
    pregnancy_category: Option<PregnancyCategory>,
) -> CatalogEntry {
    CatalogEntry {
        name: name.into(),
        min_dosage,
        max_dosage,
        unit: unit.into(),
        frequency,
        pregnancy_category,
    }
}

/// Builds the FDA catalog
pub fn build_fda_catalog() -> RegulatoryCatalog {
    use Frequency::*;
    use PregnancyCategory::*;

    RegulatoryCatalog::new(
        Jurisdiction::Fda,
        vec![
            entry("Lisinopril", 10.0, 80.0, "mg", OnceDaily, Some(D)),
            entry("Metformin", 500.0, 2550.0, "mg", TwiceDaily, Some(B)),
            entry("Atorvastatin", 10.0, 80.0, "mg", OnceDaily, Some(X)),
            entry("Simvastatin", 5.0, 40.0, "mg", AtBedtime, Some(X)),
            entry("Amlodipine", 2.5, 10.0, "mg", OnceDaily, Some(C)),
            entry("Levothyroxine", 25.0, 300.0, "mcg", OnceDaily, Some(A)),
            entry("Sertraline", 25.0, 200.0, "mg", OnceDaily, Some(C)),
            entry("Fluoxetine", 10.0, 80.0, "mg", OnceDaily, Some(C)),
            entry("Omeprazole", 10.0, 40.0, "mg", OnceDaily, Some(C)),
            entry("Ibuprofen", 200.0, 800.0, "mg", Every6Hours, Some(C)),
            entry("Acetaminophen", 325.0, 1000.0, "mg", Every6Hours, Some(B)),
            entry("Aspirin", 81.0, 1000.0, "mg", OnceDaily, Some(D)),
            entry("Warfarin", 1.0, 10.0, "mg", OnceDaily, Some(X)),
            entry("Amoxicillin", 250.0, 1000.0, "mg", ThreeTimesDaily, Some(B)),
            entry("Ciprofloxacin", 250.0, 750.0, "mg", TwiceDaily, Some(C)),
            entry("Tramadol", 50.0, 400.0, "mg", Every6Hours, Some(C)),
            entry("Spironolactone", 25.0, 200.0, "mg", OnceDaily, Some(C)),
            entry("Methotrexate", 2.5, 25.0, "mg", Weekly, Some(X)),
            entry("Sildenafil", 25.0, 100.0, "mg", AsNeeded, Some(B)),
            entry("Isotretinoin", 10.0, 80.0, "mg", TwiceDaily, Some(X)),
        ],
    )
}

/// Builds the Health Canada catalog
pub fn build_health_canada_catalog() -> RegulatoryCatalog {
    use Frequency::*;
    use PregnancyCategory::*;

    RegulatoryCatalog::new(
        Jurisdiction::HealthCanada,
        vec![
            entry("Lisinopril", 10.0, 80.0, "mg", OnceDaily, Some(D)),
            entry("Ramipril", 1.25, 10.0, "mg", OnceDaily, Some(D)),
            entry("Metformin", 500.0, 2550.0, "mg", TwiceDaily, Some(B)),
            entry("Atorvastatin", 10.0, 80.0, "mg", OnceDaily, Some(X)),
            entry("Rosuvastatin", 5.0, 40.0, "mg", OnceDaily, Some(X)),
            entry("Amlodipine", 2.5, 10.0, "mg", OnceDaily, Some(C)),
            entry("Levothyroxine", 25.0, 300.0, "mcg", OnceDaily, Some(A)),
            entry("Sertraline", 25.0, 200.0, "mg", OnceDaily, Some(C)),
            entry("Citalopram", 10.0, 40.0, "mg", OnceDaily, Some(C)),
            entry("Pantoprazole", 20.0, 40.0, "mg", OnceDaily, Some(B)),
            entry("Ibuprofen", 200.0, 400.0, "mg", Every6Hours, Some(C)),
            entry("Acetaminophen", 325.0, 1000.0, "mg", Every6Hours, Some(B)),
            entry("Acetylsalicylic Acid", 81.0, 650.0, "mg", OnceDaily, Some(D)),
            entry("Warfarin", 1.0, 10.0, "mg", OnceDaily, Some(X)),
            entry("Amoxicillin", 250.0, 1000.0, "mg", ThreeTimesDaily, Some(B)),
            entry("Domperidone", 10.0, 30.0, "mg", ThreeTimesDaily, Some(C)),
        ],
    )
}
