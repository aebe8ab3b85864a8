use std::fs;
use std::path::PathBuf;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::domain::TaxonomyId;
use crate::entities::{OrganismInput, ParticipationTypeInput, XrdbInput};
use crate::error::BootstrapError;
use crate::genes::{GeneHistoryOptions, GeneInfoOptions};

pub const DEFAULT_CONFIG_FILE: &str = "adage-bootstrap.json";

/// Bootstrap plan: the inputs of every step, in no particular order.
///
/// Relative file paths are resolved against the directory holding the plan.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BootstrapPlan {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub database: Option<Utf8PathBuf>,
    #[serde(default)]
    pub organisms: Vec<OrganismInput>,
    #[serde(default)]
    pub xrdbs: Vec<XrdbInput>,
    #[serde(default)]
    pub gene_info: Vec<GeneInfoEntry>,
    #[serde(default)]
    pub gene_history: Vec<GeneHistoryEntry>,
    #[serde(default)]
    pub gene_names: Vec<GeneNamesEntry>,
    #[serde(default)]
    pub gene_aliases: Vec<Utf8PathBuf>,
    #[serde(default)]
    pub ml_models: Vec<Utf8PathBuf>,
    #[serde(default)]
    pub participation_types: Vec<ParticipationTypeInput>,
    #[serde(default)]
    pub experiments: Option<Utf8PathBuf>,
    #[serde(default)]
    pub samples: Option<Utf8PathBuf>,
    /// Defaults to on whenever experiments or samples are imported.
    #[serde(default)]
    pub samples_info: Option<bool>,
    #[serde(default)]
    pub activity: Vec<ModelFileEntry>,
    #[serde(default)]
    pub gene_network: Vec<ModelFileEntry>,
    #[serde(default)]
    pub participation: Vec<ParticipationEntry>,
    #[serde(default)]
    pub expression: Vec<ExpressionEntry>,
    #[serde(default)]
    pub search_indexes: bool,
    #[serde(default)]
    pub deploy: Option<DeployConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeneInfoEntry {
    pub file: Utf8PathBuf,
    #[serde(flatten)]
    pub options: GeneInfoOptions,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeneHistoryEntry {
    pub file: Utf8PathBuf,
    #[serde(flatten)]
    pub options: GeneHistoryOptions,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeneNamesEntry {
    pub file: Utf8PathBuf,
    pub tax_id: TaxonomyId,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelFileEntry {
    pub file: Utf8PathBuf,
    pub ml_model: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ParticipationEntry {
    pub file: Utf8PathBuf,
    pub ml_model: String,
    pub participation_type: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExpressionEntry {
    pub file: Utf8PathBuf,
    pub tax_id: TaxonomyId,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeployConfig {
    /// Domain the TLS certificate is requested for; no request when absent.
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub files: Vec<InstallFile>,
    #[serde(default = "default_services")]
    pub services: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InstallFile {
    pub source: Utf8PathBuf,
    pub target: Utf8PathBuf,
}

pub fn default_services() -> Vec<String> {
    vec!["nginx".to_string(), "supervisor".to_string()]
}

impl BootstrapPlan {
    pub fn schema_version(&self) -> u32 {
        self.schema_version.unwrap_or(1)
    }

    pub fn wants_samples_info(&self) -> bool {
        self.samples_info
            .unwrap_or(self.experiments.is_some() || self.samples.is_some())
    }

    /// Makes every relative input path relative to `base` instead.
    pub fn rebase(&mut self, base: &Utf8Path) {
        let fix = |path: &mut Utf8PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        if let Some(database) = &mut self.database {
            fix(database);
        }
        self.gene_info.iter_mut().for_each(|entry| fix(&mut entry.file));
        self.gene_history.iter_mut().for_each(|entry| fix(&mut entry.file));
        self.gene_names.iter_mut().for_each(|entry| fix(&mut entry.file));
        self.gene_aliases.iter_mut().for_each(fix);
        self.ml_models.iter_mut().for_each(fix);
        self.experiments.iter_mut().for_each(fix);
        self.samples.iter_mut().for_each(fix);
        self.activity.iter_mut().for_each(|entry| fix(&mut entry.file));
        self.gene_network.iter_mut().for_each(|entry| fix(&mut entry.file));
        self.participation.iter_mut().for_each(|entry| fix(&mut entry.file));
        self.expression.iter_mut().for_each(|entry| fix(&mut entry.file));
        if let Some(deploy) = &mut self.deploy {
            deploy.files.iter_mut().for_each(|file| fix(&mut file.source));
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads the plan at `path`, or `adage-bootstrap.json` in the working
    /// directory when no path is given.
    pub fn resolve(path: Option<&str>) -> Result<BootstrapPlan, BootstrapError> {
        let config_path = Utf8PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if path.is_none() && !config_path.exists() {
            return Err(BootstrapError::MissingConfig);
        }

        let content = fs::read_to_string(config_path.as_std_path())
            .map_err(|_| BootstrapError::ConfigRead(PathBuf::from(config_path.as_str())))?;
        let mut plan = Self::parse(&content)?;
        if let Some(base) = config_path.parent().filter(|dir| !dir.as_str().is_empty()) {
            plan.rebase(base);
        }
        Ok(plan)
    }

    pub fn parse(content: &str) -> Result<BootstrapPlan, BootstrapError> {
        let plan: BootstrapPlan = serde_json::from_str(content)
            .map_err(|err| BootstrapError::ConfigParse(err.to_string()))?;
        if plan.schema_version() != 1 {
            return Err(BootstrapError::ConfigParse(format!(
                "unsupported schema_version {}",
                plan.schema_version()
            )));
        }
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plan_with_defaults() {
        let plan = ConfigLoader::parse(
            r#"{
                "organisms": [{"tax_id": 208964, "common_name": "P. aeruginosa", "scientific_name": "Pseudomonas aeruginosa"}],
                "gene_info": [{"file": "data/Pseudomonas_aeruginosa_PAO1.gene_info.gz", "tax_id": 208964, "gi_tax_id": 208964}],
                "experiments": "data/experiments.tsv",
                "deploy": {"domain": "adage.example.org"}
            }"#,
        )
        .unwrap();
        assert_eq!(plan.schema_version(), 1);
        assert_eq!(plan.gene_info[0].options.symbol_col, 2);
        assert_eq!(plan.gene_info[0].options.alias_col, 4);
        assert!(plan.wants_samples_info());
        assert_eq!(plan.deploy.unwrap().services, default_services());
    }

    #[test]
    fn rebase_keeps_absolute_paths() {
        let mut plan = ConfigLoader::parse(
            r#"{"gene_aliases": ["aliases.tsv", "/srv/data/more.tsv"]}"#,
        )
        .unwrap();
        plan.rebase(Utf8Path::new("/etc/adage"));
        assert_eq!(plan.gene_aliases[0], Utf8PathBuf::from("/etc/adage/aliases.tsv"));
        assert_eq!(plan.gene_aliases[1], Utf8PathBuf::from("/srv/data/more.tsv"));
    }

    #[test]
    fn rejects_unknown_schema_version() {
        let err = ConfigLoader::parse(r#"{"schema_version": 2}"#).unwrap_err();
        assert!(matches!(err, BootstrapError::ConfigParse(_)));
    }
}
