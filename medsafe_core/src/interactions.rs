//! Drug-drug interaction resolution.
//!
//! Resolution runs an ordered list of strategies and keeps the first
//! non-empty answer:
//!
//! 1. **External service** (when configured): failures are logged and skipped
//! 2. **Local table**: loose substring matching over known pairs
//!
//! When a gestation week is supplied, the result is then escalated for
//! pregnancy.

use crate::config::InteractionConfig;
use crate::interaction_client::{HttpInteractionClient, InteractionService};
use crate::{InteractionResult, InteractionSource, Result, Severity};
use std::collections::HashSet;
use std::time::Duration;

/// Last week of the first trimester
const ORGANOGENESIS_LAST_WEEK: u8 = 12;
const FULL_TERM_WEEK: u8 = 40;

/// One stage of the resolution chain
pub trait InteractionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok(None)` means "nothing found here, try the next strategy"
    fn resolve(
        &self,
        names: &[String],
        timeout: Duration,
    ) -> Result<Option<Vec<InteractionResult>>>;
}

/// Asks the external interaction service
pub struct ExternalServiceStrategy {
    service: Box<dyn InteractionService>,
}

impl ExternalServiceStrategy {
    pub fn new(service: impl InteractionService + 'static) -> Self {
        Self {
            service: Box::new(service),
        }
    }
}

impl InteractionStrategy for ExternalServiceStrategy {
    fn name(&self) -> &'static str {
        "external-service"
    }

    fn resolve(
        &self,
        names: &[String],
        timeout: Duration,
    ) -> Result<Option<Vec<InteractionResult>>> {
        let found = self.service.fetch_interactions(names, timeout)?;
        Ok(if found.is_empty() { None } else { Some(found) })
    }
}

/// A known interacting pair in the built-in table
#[derive(Clone, Debug)]
pub struct LocalInteraction {
    pub drug_a: &'static str,
    pub drug_b: &'static str,
    pub severity: Severity,
    pub description: &'static str,
    pub mechanism: &'static str,
}

const LOCAL_INTERACTIONS: &[LocalInteraction] = &[
    LocalInteraction {
        drug_a: "warfarin",
        drug_b: "aspirin",
        severity: Severity::Severe,
        description: "Greatly increased risk of serious bleeding",
        mechanism: "Additive anticoagulant and antiplatelet effects",
    },
    LocalInteraction {
        drug_a: "warfarin",
        drug_b: "ibuprofen",
        severity: Severity::High,
        description: "Increased risk of gastrointestinal bleeding",
        mechanism: "NSAID platelet inhibition and gastric mucosal injury",
    },
    LocalInteraction {
        drug_a: "warfarin",
        drug_b: "ciprofloxacin",
        severity: Severity::High,
        description: "Raised INR and bleeding risk",
        mechanism: "Inhibition of warfarin metabolism",
    },
    LocalInteraction {
        drug_a: "sildenafil",
        drug_b: "nitroglycerin",
        severity: Severity::Critical,
        description: "Severe, potentially fatal hypotension",
        mechanism: "Additive nitric oxide mediated vasodilation",
    },
    LocalInteraction {
        drug_a: "fluoxetine",
        drug_b: "phenelzine",
        severity: Severity::Critical,
        description: "Risk of serotonin syndrome",
        mechanism: "SSRI combined with MAO inhibition",
    },
    LocalInteraction {
        drug_a: "sertraline",
        drug_b: "tramadol",
        severity: Severity::Severe,
        description: "Risk of serotonin syndrome and seizures",
        mechanism: "Additive serotonergic activity",
    },
    LocalInteraction {
        drug_a: "simvastatin",
        drug_b: "clarithromycin",
        severity: Severity::Severe,
        description: "Risk of rhabdomyolysis",
        mechanism: "CYP3A4 inhibition raises statin levels",
    },
    LocalInteraction {
        drug_a: "methotrexate",
        drug_b: "trimethoprim",
        severity: Severity::Severe,
        description: "Bone marrow suppression",
        mechanism: "Additive antifolate effects",
    },
    LocalInteraction {
        drug_a: "lisinopril",
        drug_b: "spironolactone",
        severity: Severity::High,
        description: "Risk of hyperkalemia",
        mechanism: "Combined potassium retention",
    },
    LocalInteraction {
        drug_a: "lisinopril",
        drug_b: "potassium",
        severity: Severity::High,
        description: "Risk of hyperkalemia",
        mechanism: "ACE inhibition reduces potassium excretion",
    },
    LocalInteraction {
        drug_a: "ibuprofen",
        drug_b: "aspirin",
        severity: Severity::Moderate,
        description: "Reduced cardioprotective effect of aspirin",
        mechanism: "Competitive COX-1 binding",
    },
    LocalInteraction {
        drug_a: "amlodipine",
        drug_b: "simvastatin",
        severity: Severity::Moderate,
        description: "Increased statin exposure; limit simvastatin to 20mg",
        mechanism: "CYP3A4 inhibition",
    },
    LocalInteraction {
        drug_a: "levothyroxine",
        drug_b: "calcium",
        severity: Severity::Moderate,
        description: "Reduced levothyroxine absorption",
        mechanism: "Binding in the gastrointestinal tract",
    },
    LocalInteraction {
        drug_a: "ciprofloxacin",
        drug_b: "antacid",
        severity: Severity::Moderate,
        description: "Reduced antibiotic absorption",
        mechanism: "Chelation by polyvalent cations",
    },
    LocalInteraction {
        drug_a: "metformin",
        drug_b: "alcohol",
        severity: Severity::Low,
        description: "Increased risk of lactic acidosis with heavy use",
        mechanism: "Altered lactate metabolism",
    },
];

/// The built-in interaction table
pub fn local_interactions() -> &'static [LocalInteraction] {
    LOCAL_INTERACTIONS
}

/// Loose, bidirectional containment: "Aspirin 81" matches "aspirin" and
/// "asa" would match "aspirin" the other way round.
fn loosely_matches(name: &str, token: &str) -> bool {
    let name = name.to_lowercase();
    let token = token.to_lowercase();
    name.contains(&token) || token.contains(&name)
}

/// Scans the built-in interaction table
pub struct LocalTableStrategy {
    table: &'static [LocalInteraction],
}

impl LocalTableStrategy {
    pub fn new() -> Self {
        Self {
            table: LOCAL_INTERACTIONS,
        }
    }

    pub fn with_table(table: &'static [LocalInteraction]) -> Self {
        Self { table }
    }
}

impl Default for LocalTableStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl InteractionStrategy for LocalTableStrategy {
    fn name(&self) -> &'static str {
        "local-table"
    }

    fn resolve(
        &self,
        names: &[String],
        _timeout: Duration,
    ) -> Result<Option<Vec<InteractionResult>>> {
        let mut found = Vec::new();

        for (i, a) in names.iter().enumerate() {
            for b in &names[i + 1..] {
                for known in self.table {
                    let forward =
                        loosely_matches(a, known.drug_a) && loosely_matches(b, known.drug_b);
                    let reverse =
                        loosely_matches(a, known.drug_b) && loosely_matches(b, known.drug_a);
                    if forward || reverse {
                        found.push(InteractionResult {
                            drug_a: a.clone(),
                            drug_b: b.clone(),
                            severity: known.severity,
                            description: known.description.to_string(),
                            mechanism: Some(known.mechanism.to_string()),
                            source: InteractionSource::LocalTable,
                            pregnancy_warning: None,
                        });
                    }
                }
            }
        }

        Ok(if found.is_empty() { None } else { Some(found) })
    }
}

/// Per-check options
#[derive(Clone, Debug, Default)]
pub struct CheckOptions {
    pub gestation_week: Option<u8>,
    /// Overrides the resolver's default timeout for external calls
    pub timeout: Option<Duration>,
}

impl CheckOptions {
    pub fn pregnant(week: u8) -> Self {
        Self {
            gestation_week: Some(week),
            ..Self::default()
        }
    }
}

/// Ordered chain of interaction strategies
pub struct InteractionResolver {
    strategies: Vec<Box<dyn InteractionStrategy>>,
    default_timeout: Duration,
}

impl InteractionResolver {
    pub fn new(strategies: Vec<Box<dyn InteractionStrategy>>, default_timeout: Duration) -> Self {
        Self {
            strategies,
            default_timeout,
        }
    }

    /// Local table only
    pub fn local_only() -> Self {
        Self::new(
            vec![Box::new(LocalTableStrategy::new())],
            Duration::from_secs(10),
        )
    }

    /// External service first, then the local table
    pub fn with_service(service: impl InteractionService + 'static, timeout: Duration) -> Self {
        Self::new(
            vec![
                Box::new(ExternalServiceStrategy::new(service)),
                Box::new(LocalTableStrategy::new()),
            ],
            timeout,
        )
    }

    pub fn from_config(config: &InteractionConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        match &config.service_url {
            Some(url) => {
                tracing::info!("Using interaction service at {}", url);
                Ok(Self::with_service(HttpInteractionClient::new(url)?, timeout))
            }
            None => Ok(Self {
                default_timeout: timeout,
                ..Self::local_only()
            }),
        }
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Resolve interactions among `names`. Never fails.
    pub fn check(&self, names: &[String], options: &CheckOptions) -> Vec<InteractionResult> {
        let names = distinct_names(names);
        if names.len() < 2 {
            return Vec::new();
        }

        let timeout = options.timeout.unwrap_or(self.default_timeout);
        let mut results = Vec::new();

        for strategy in &self.strategies {
            match strategy.resolve(&names, timeout) {
                Ok(Some(found)) => {
                    tracing::info!(
                        "{} found {} interaction(s) among {} medications",
                        strategy.name(),
                        found.len(),
                        names.len()
                    );
                    results = found;
                    break;
                }
                Ok(None) => {
                    tracing::debug!("{} found no interactions, trying next", strategy.name());
                }
                Err(e) => {
                    tracing::warn!("{} failed, falling through: {}", strategy.name(), e);
                }
            }
        }

        if let Some(week) = options.gestation_week {
            apply_pregnancy_escalation(&mut results, week);
        }
        results
    }
}

/// Trim, drop blanks and case-insensitive duplicates, keep order
fn distinct_names(names: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .iter()
        .map(|n| n.trim())
        .filter(|n| !n.is_empty())
        .filter(|n| seen.insert(n.to_lowercase()))
        .map(str::to_string)
        .collect()
}

/// Adjust interaction severities for a pregnancy at `week`.
///
/// - Weeks 1-12: HIGH/SEVERE become CRITICAL with an organogenesis warning;
///   MODERATE gets a cautionary note
/// - Weeks 13-40: HIGH/SEVERE keep their severity and get a specialist note
pub fn apply_pregnancy_escalation(results: &mut [InteractionResult], week: u8) {
    if week == 0 || week > FULL_TERM_WEEK {
        tracing::warn!("Ignoring out-of-range gestation week {}", week);
        return;
    }

    for result in results.iter_mut() {
        let first_trimester = week <= ORGANOGENESIS_LAST_WEEK;
        match (first_trimester, result.severity) {
            (true, Severity::High | Severity::Severe | Severity::Critical) => {
                if result.severity != Severity::Critical {
                    tracing::info!(
                        "Escalating {}/{} from {:?} to CRITICAL at gestation week {}",
                        result.drug_a,
                        result.drug_b,
                        result.severity,
                        week
                    );
                }
                result.severity = Severity::Critical;
                result.pregnancy_warning = Some(format!(
                    "Week {}: organogenesis period, this combination may cause birth defects. \
                     Avoid unless directed by a specialist.",
                    week
                ));
            }
            (true, Severity::Moderate) => {
                result.pregnancy_warning = Some(format!(
                    "Week {}: first trimester, use with caution and discuss with your provider.",
                    week
                ));
            }
            (false, Severity::High | Severity::Severe | Severity::Critical) => {
                result.pregnancy_warning = Some(format!(
                    "Week {}: consult a maternal-fetal medicine specialist before continuing.",
                    week
                ));
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    struct DownService;

    impl InteractionService for DownService {
        fn fetch_interactions(&self, _: &[String], _: Duration) -> Result<Vec<InteractionResult>> {
            Err(Error::InteractionService("connection refused".into()))
        }
    }

    struct FixedService {
        calls: Arc<AtomicUsize>,
        answer: Vec<InteractionResult>,
    }

    impl InteractionService for FixedService {
        fn fetch_interactions(&self, _: &[String], _: Duration) -> Result<Vec<InteractionResult>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.answer.clone())
        }
    }

    fn remote(a: &str, b: &str, severity: Severity) -> InteractionResult {
        InteractionResult {
            drug_a: a.into(),
            drug_b: b.into(),
            severity,
            description: "remote".into(),
            mechanism: None,
            source: InteractionSource::ExternalService,
            pregnancy_warning: None,
        }
    }

    #[test]
    fn test_zero_or_one_name_is_empty() {
        let resolver = InteractionResolver::local_only();
        assert!(resolver.check(&[], &CheckOptions::default()).is_empty());
        assert!(resolver
            .check(&names(&["Warfarin"]), &CheckOptions::default())
            .is_empty());
        // Duplicates collapse to one name
        assert!(resolver
            .check(&names(&["Warfarin", "warfarin "]), &CheckOptions::default())
            .is_empty());
    }

    #[test]
    fn test_local_table_match_either_order() {
        let resolver = InteractionResolver::local_only();
        let results = resolver.check(&names(&["Aspirin", "Warfarin"]), &CheckOptions::default());
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].severity, Severity::Severe);
        assert_eq!(results[0].source, InteractionSource::LocalTable);
        assert_eq!(results[0].drug_a, "Aspirin");
        assert_eq!(results[0].drug_b, "Warfarin");
    }

    #[test]
    fn test_local_table_substring_matching() {
        let resolver = InteractionResolver::local_only();
        let results = resolver.check(
            &names(&["Warfarin Sodium", "Low Dose Aspirin"]),
            &CheckOptions::default(),
        );
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_every_pair_is_checked() {
        let resolver = InteractionResolver::local_only();
        let results = resolver.check(
            &names(&["Warfarin", "Aspirin", "Ibuprofen"]),
            &CheckOptions::default(),
        );
        // warfarin+aspirin, warfarin+ibuprofen, aspirin+ibuprofen
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn test_no_interaction() {
        let resolver = InteractionResolver::local_only();
        let results = resolver.check(
            &names(&["Amoxicillin", "Omeprazole"]),
            &CheckOptions::default(),
        );
        assert!(results.is_empty());
    }

    #[test]
    fn test_service_failure_falls_through_to_local() {
        let resolver = InteractionResolver::with_service(DownService, Duration::from_secs(1));
        let results = resolver.check(&names(&["Warfarin", "Aspirin"]), &CheckOptions::default());
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source, InteractionSource::LocalTable);
    }

    #[test]
    fn test_service_result_wins() {
        let calls = Arc::new(AtomicUsize::new(0));
        let service = FixedService {
            calls: calls.clone(),
            answer: vec![remote("Warfarin", "Aspirin", Severity::High)],
        };
        let resolver = InteractionResolver::with_service(service, Duration::from_secs(1));
        let results = resolver.check(&names(&["Warfarin", "Aspirin"]), &CheckOptions::default());

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source, InteractionSource::ExternalService);
        assert_eq!(results[0].severity, Severity::High);
    }

    #[test]
    fn test_empty_service_answer_falls_through() {
        let service = FixedService {
            calls: Arc::new(AtomicUsize::new(0)),
            answer: vec![],
        };
        let resolver = InteractionResolver::with_service(service, Duration::from_secs(1));
        let results = resolver.check(&names(&["Warfarin", "Aspirin"]), &CheckOptions::default());
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source, InteractionSource::LocalTable);
    }

    #[test]
    fn test_first_trimester_escalates_to_critical() {
        let resolver = InteractionResolver::local_only();
        let results = resolver.check(&names(&["Warfarin", "Aspirin"]), &CheckOptions::pregnant(6));
        assert_eq!(results[0].severity, Severity::Critical);
        let warning = results[0].pregnancy_warning.as_deref().unwrap();
        assert!(warning.contains("organogenesis"));
    }

    #[test]
    fn test_later_pregnancy_keeps_severity_with_note() {
        let resolver = InteractionResolver::local_only();
        let results = resolver.check(&names(&["Warfarin", "Aspirin"]), &CheckOptions::pregnant(30));
        assert_eq!(results[0].severity, Severity::Severe);
        assert!(results[0]
            .pregnancy_warning
            .as_deref()
            .unwrap()
            .contains("specialist"));
    }

    #[test]
    fn test_moderate_in_first_trimester_gets_caution_only() {
        let mut results = vec![remote("Ibuprofen", "Aspirin", Severity::Moderate)];
        apply_pregnancy_escalation(&mut results, 8);
        assert_eq!(results[0].severity, Severity::Moderate);
        assert!(results[0].pregnancy_warning.as_deref().unwrap().contains("caution"));

        let mut results = vec![remote("Ibuprofen", "Aspirin", Severity::Moderate)];
        apply_pregnancy_escalation(&mut results, 20);
        assert!(results[0].pregnancy_warning.is_none());
    }

    #[test]
    fn test_out_of_range_week_is_ignored() {
        let mut results = vec![remote("Warfarin", "Aspirin", Severity::Severe)];
        apply_pregnancy_escalation(&mut results, 0);
        apply_pregnancy_escalation(&mut results, 41);
        assert_eq!(results[0].severity, Severity::Severe);
        assert!(results[0].pregnancy_warning.is_none());
    }

    #[test]
    fn test_from_config() {
        let config = InteractionConfig::default();
        let resolver = InteractionResolver::from_config(&config).unwrap();
        assert_eq!(resolver.strategy_names(), vec!["local-table"]);

        let config = InteractionConfig {
            service_url: Some("http://localhost:8080".into()),
            timeout_secs: 2,
        };
        let resolver = InteractionResolver::from_config(&config).unwrap();
        assert_eq!(resolver.strategy_names(), vec!["external-service", "local-table"]);
    }
}
