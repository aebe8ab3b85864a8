use std::fmt;
use std::time::{Duration, Instant};

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tracing::info;

use crate::config::BootstrapPlan;
use crate::entities::{self, ModelDefinition};
use crate::error::BootstrapError;
use crate::report::ImportReport;
use crate::store::Store;
use crate::{genes, relations, samples, search};

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressSinkKind {
    Bootstrap,
    Deploy,
}

/// Bootstrap steps in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Step {
    Organisms,
    Xrdbs,
    GeneInfo,
    GeneHistory,
    GeneNames,
    GeneAliases,
    MlModels,
    ParticipationTypes,
    Experiments,
    Samples,
    SamplesInfo,
    Activity,
    GeneNetwork,
    Participation,
    Expression,
    SearchIndexes,
}

impl Step {
    pub const ORDER: [Step; 16] = [
        Step::Organisms,
        Step::Xrdbs,
        Step::GeneInfo,
        Step::GeneHistory,
        Step::GeneNames,
        Step::GeneAliases,
        Step::MlModels,
        Step::ParticipationTypes,
        Step::Experiments,
        Step::Samples,
        Step::SamplesInfo,
        Step::Activity,
        Step::GeneNetwork,
        Step::Participation,
        Step::Expression,
        Step::SearchIndexes,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Step::Organisms => "organisms",
            Step::Xrdbs => "cross-reference databases",
            Step::GeneInfo => "gene info",
            Step::GeneHistory => "gene history",
            Step::GeneNames => "gene names",
            Step::GeneAliases => "gene aliases",
            Step::MlModels => "ML models",
            Step::ParticipationTypes => "participation types",
            Step::Experiments => "experiments",
            Step::Samples => "samples",
            Step::SamplesInfo => "experiment samples_info",
            Step::Activity => "sample-signature activity",
            Step::GeneNetwork => "gene-gene network",
            Step::Participation => "gene-signature participation",
            Step::Expression => "gene-sample expression",
            Step::SearchIndexes => "trigram search indexes",
        }
    }

    fn is_planned(self, plan: &BootstrapPlan) -> bool {
        match self {
            Step::Organisms => !plan.organisms.is_empty(),
            Step::Xrdbs => !plan.xrdbs.is_empty(),
            Step::GeneInfo => !plan.gene_info.is_empty(),
            Step::GeneHistory => !plan.gene_history.is_empty(),
            Step::GeneNames => !plan.gene_names.is_empty(),
            Step::GeneAliases => !plan.gene_aliases.is_empty(),
            Step::MlModels => !plan.ml_models.is_empty(),
            Step::ParticipationTypes => !plan.participation_types.is_empty(),
            Step::Experiments => plan.experiments.is_some(),
            Step::Samples => plan.samples.is_some(),
            Step::SamplesInfo => plan.wants_samples_info(),
            Step::Activity => !plan.activity.is_empty(),
            Step::GeneNetwork => !plan.gene_network.is_empty(),
            Step::Participation => !plan.participation.is_empty(),
            Step::Expression => !plan.expression.is_empty(),
            Step::SearchIndexes => plan.search_indexes,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Completed,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub step: Step,
    pub status: StepStatus,
    pub started_at: Option<String>,
    pub elapsed_ms: u128,
    pub created: usize,
    pub updated: usize,
    pub inserted: usize,
    pub skipped: usize,
    pub warnings: Vec<String>,
}

impl StepResult {
    fn skipped(step: Step) -> Self {
        Self {
            step,
            status: StepStatus::Skipped,
            started_at: None,
            elapsed_ms: 0,
            created: 0,
            updated: 0,
            inserted: 0,
            skipped: 0,
            warnings: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BootstrapResult {
    pub status: String,
    pub database: Option<String>,
    pub steps: Vec<StepResult>,
}

impl BootstrapResult {
    pub fn step(&self, step: Step) -> Option<&StepResult> {
        self.steps.iter().find(|result| result.step == step)
    }

    pub fn total_inserted(&self) -> usize {
        self.steps.iter().map(|step| step.inserted).sum()
    }

    pub fn total_skipped(&self) -> usize {
        self.steps.iter().map(|step| step.skipped).sum()
    }
}

/// Runs import operations against one store.
pub struct App {
    store: Store,
}

impl App {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Runs a single operation, reporting its start and duration to `sink`.
    pub fn run_operation<T>(
        &mut self,
        label: &str,
        sink: &dyn ProgressSink,
        operation: impl FnOnce(&mut Store) -> Result<T, BootstrapError>,
    ) -> Result<T, BootstrapError> {
        sink.event(ProgressEvent {
            message: format!("phase=Import; {label}"),
            elapsed: None,
        });
        let started = Instant::now();
        let result = operation(&mut self.store)?;
        sink.event(ProgressEvent {
            message: format!("phase=Done; {label}"),
            elapsed: Some(started.elapsed()),
        });
        Ok(result)
    }

    /// Executes every planned step in [`Step::ORDER`], stopping at the first
    /// fatal error.
    pub fn bootstrap(
        &mut self,
        plan: &BootstrapPlan,
        sink: &dyn ProgressSink,
    ) -> Result<BootstrapResult, BootstrapError> {
        let mut steps = Vec::with_capacity(Step::ORDER.len());
        for step in Step::ORDER {
            if !step.is_planned(plan) {
                sink.event(ProgressEvent {
                    message: format!("phase=Skip; {step}: no inputs"),
                    elapsed: None,
                });
                steps.push(StepResult::skipped(step));
                continue;
            }

            let started_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
            info!("[{started_at}] {step}");
            sink.event(ProgressEvent {
                message: format!("phase=Import; [{started_at}] {step}"),
                elapsed: None,
            });

            let timer = Instant::now();
            let report = self.run_step(step, plan)?;
            let elapsed = timer.elapsed();
            sink.event(ProgressEvent {
                message: format!("phase=Done; {step}: {}", report.summary()),
                elapsed: Some(elapsed),
            });
            steps.push(StepResult {
                step,
                status: StepStatus::Completed,
                started_at: Some(started_at),
                elapsed_ms: elapsed.as_millis(),
                created: report.created,
                updated: report.updated,
                inserted: report.inserted,
                skipped: report.skipped,
                warnings: report.warnings,
            });
        }

        Ok(BootstrapResult {
            status: "completed".to_string(),
            database: self.store.path().map(|path| path.to_string()),
            steps,
        })
    }

    fn run_step(&mut self, step: Step, plan: &BootstrapPlan) -> Result<ImportReport, BootstrapError> {
        let store = &mut self.store;
        let mut report = ImportReport::new(step.label());
        match step {
            Step::Organisms => {
                let tx = store.transaction()?;
                for organism in &plan.organisms {
                    report.count(entities::upsert_organism(&tx, organism)?.action);
                }
                tx.commit()?;
            }
            Step::Xrdbs => {
                let tx = store.transaction()?;
                for xrdb in &plan.xrdbs {
                    report.count(entities::upsert_xrdb(&tx, xrdb)?.action);
                }
                tx.commit()?;
            }
            Step::GeneInfo => {
                for entry in &plan.gene_info {
                    merge(&mut report, genes::import_gene_info(store, &entry.file, &entry.options)?);
                }
            }
            Step::GeneHistory => {
                for entry in &plan.gene_history {
                    merge(&mut report, genes::import_gene_history(store, &entry.file, &entry.options)?);
                }
            }
            Step::GeneNames => {
                for entry in &plan.gene_names {
                    merge(&mut report, genes::update_gene_names(store, &entry.file, entry.tax_id)?);
                }
            }
            Step::GeneAliases => {
                for path in &plan.gene_aliases {
                    merge(&mut report, genes::add_gene_aliases(store, path)?);
                }
            }
            Step::MlModels => {
                let definitions = plan
                    .ml_models
                    .iter()
                    .map(|path| ModelDefinition::load(path))
                    .collect::<Result<Vec<_>, _>>()?;
                let tx = store.transaction()?;
                for definition in &definitions {
                    report.count(entities::upsert_model(&tx, definition)?.action);
                }
                tx.commit()?;
            }
            Step::ParticipationTypes => {
                let tx = store.transaction()?;
                for participation_type in &plan.participation_types {
                    report.count(entities::upsert_participation_type(&tx, participation_type)?.action);
                }
                tx.commit()?;
            }
            Step::Experiments => {
                if let Some(path) = &plan.experiments {
                    merge(&mut report, samples::import_experiments(store, path)?);
                }
            }
            Step::Samples => {
                if let Some(path) = &plan.samples {
                    merge(&mut report, samples::import_samples(store, path)?);
                }
            }
            Step::SamplesInfo => merge(&mut report, samples::set_samples_info(store)?),
            Step::Activity => {
                for entry in &plan.activity {
                    merge(&mut report, relations::import_activity(store, &entry.file, &entry.ml_model)?);
                }
            }
            Step::GeneNetwork => {
                for entry in &plan.gene_network {
                    merge(
                        &mut report,
                        relations::import_gene_network(store, &entry.file, &entry.ml_model)?,
                    );
                }
            }
            Step::Participation => {
                for entry in &plan.participation {
                    merge(
                        &mut report,
                        relations::import_participation(
                            store,
                            &entry.file,
                            &entry.ml_model,
                            &entry.participation_type,
                        )?,
                    );
                }
            }
            Step::Expression => {
                for entry in &plan.expression {
                    merge(&mut report, relations::import_expression(store, &entry.file, entry.tax_id)?);
                }
            }
            Step::SearchIndexes => {
                let indexed = search::create_search_indexes(store)?;
                report.updated = (indexed.genes_indexed + indexed.experiments_indexed) as usize;
            }
        }
        Ok(report)
    }
}

fn merge(total: &mut ImportReport, part: ImportReport) {
    total.created += part.created;
    total.updated += part.updated;
    total.inserted += part.inserted;
    total.skipped += part.skipped;
    total.warnings.extend(part.warnings);
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::config::ConfigLoader;

    #[derive(Default)]
    struct RecordingSink {
        messages: Mutex<Vec<String>>,
    }

    impl ProgressSink for RecordingSink {
        fn event(&self, event: ProgressEvent) {
            self.messages.lock().unwrap().push(event.message);
        }
    }

    #[test]
    fn empty_plan_skips_every_step() {
        let mut app = App::new(Store::open_in_memory().unwrap());
        let sink = RecordingSink::default();
        let result = app.bootstrap(&BootstrapPlan::default(), &sink).unwrap();
        assert_eq!(result.status, "completed");
        assert_eq!(result.steps.len(), Step::ORDER.len());
        assert!(result.steps.iter().all(|step| step.status == StepStatus::Skipped));
        assert_eq!(sink.messages.lock().unwrap().len(), Step::ORDER.len());
    }

    #[test]
    fn steps_run_in_fixed_order_with_timestamps() {
        let plan = ConfigLoader::parse(
            r#"{
                "participation_types": [{"name": "High-weight genes", "description": "heavy genes"}],
                "organisms": [{"tax_id": 208964, "common_name": "P. aeruginosa", "scientific_name": "Pseudomonas aeruginosa"}],
                "search_indexes": true
            }"#,
        )
        .unwrap();
        let mut app = App::new(Store::open_in_memory().unwrap());
        let sink = RecordingSink::default();
        let result = app.bootstrap(&plan, &sink).unwrap();

        let completed = result
            .steps
            .iter()
            .filter(|step| step.status == StepStatus::Completed)
            .map(|step| step.step)
            .collect::<Vec<_>>();
        assert_eq!(
            completed,
            vec![Step::Organisms, Step::ParticipationTypes, Step::SearchIndexes]
        );
        let organisms = result.step(Step::Organisms).unwrap();
        assert_eq!(organisms.created, 1);
        assert!(
            organisms
                .started_at
                .as_deref()
                .is_some_and(|stamp| chrono::DateTime::parse_from_rfc3339(stamp).is_ok())
        );
    }

    #[test]
    fn fatal_error_halts_the_run() {
        let plan = ConfigLoader::parse(
            r#"{"gene_names": [{"file": "/nonexistent/names.tsv", "tax_id": 208964}], "search_indexes": true}"#,
        )
        .unwrap();
        let mut app = App::new(Store::open_in_memory().unwrap());
        let sink = RecordingSink::default();
        assert!(app.bootstrap(&plan, &sink).is_err());
        assert!(
            !sink
                .messages
                .lock()
                .unwrap()
                .iter()
                .any(|message| message.contains("trigram"))
        );
    }
}
