#![forbid(unsafe_code)]

//! Medication safety and compliance engine.
//!
//! This crate provides:
//! - Domain types (medications, intake events, interactions, audit entries)
//! - Free-text medication parsing and field validation
//! - FDA and Health Canada regulatory catalogs
//! - Drug interaction resolution with pregnancy escalation
//! - An append-only audit trail with JSONL persistence and CSV export
//! - The medication registry that ties them together

pub mod types;
pub mod error;
pub mod config;
pub mod logging;
pub mod parser;
pub mod validation;
pub mod catalog;
pub mod interaction_client;
pub mod interactions;
pub mod audit;
pub mod audit_export;
pub mod report;
pub mod registry;

// Re-export commonly used types
pub use error::{Error, RejectionKind, Result};
pub use types::*;
pub use config::Config;
pub use parser::{parse, ParsedMedication};
pub use catalog::{catalog_for, CatalogVerification, PregnancyCategory, RegulatoryCatalog};
pub use interaction_client::{HttpInteractionClient, InteractionService};
pub use interactions::{CheckOptions, InteractionResolver, InteractionStrategy};
pub use audit::{AuditLog, AuditQuery, AuditSink, ClearOutcome, JsonlAuditSink};
pub use report::ComplianceReport;
pub use registry::{AddOutcome, AddedMedication, MedicationRegistry, UpdateOutcome};
