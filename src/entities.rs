//! Create-or-update operations for entities keyed by a natural identifier.

use std::fs;

use camino::Utf8Path;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::{TaxonomyId, UpsertAction, required_text, slugify};
use crate::error::BootstrapError;
use crate::store;

#[derive(Debug, Clone, Serialize)]
pub struct UpsertResult {
    pub entity: &'static str,
    pub key: String,
    pub action: UpsertAction,
}

impl UpsertResult {
    fn new(entity: &'static str, key: impl Into<String>, action: UpsertAction) -> Self {
        let result = Self {
            entity,
            key: key.into(),
            action,
        };
        info!(entity = result.entity, key = %result.key, "{} {}", result.entity, result.action);
        result
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganismInput {
    pub tax_id: TaxonomyId,
    pub common_name: String,
    pub scientific_name: String,
    #[serde(default)]
    pub url_template: Option<String>,
}

pub fn upsert_organism(
    conn: &Connection,
    input: &OrganismInput,
) -> Result<UpsertResult, BootstrapError> {
    let common_name = required_text("common_name", &input.common_name)?;
    let scientific_name = required_text("scientific_name", &input.scientific_name)?;
    let url_template = input
        .url_template
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty());
    let slug = slugify(&scientific_name);

    let action = match store::find_organism(conn, input.tax_id)? {
        Some(id) => {
            conn.execute(
                "UPDATE organism
                 SET common_name = ?1, scientific_name = ?2, slug = ?3, url_template = ?4
                 WHERE id = ?5",
                params![common_name, scientific_name, slug, url_template, id],
            )?;
            UpsertAction::Updated
        }
        None => {
            conn.execute(
                "INSERT INTO organism (taxonomy_id, common_name, scientific_name, slug, url_template)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    input.tax_id.get(),
                    common_name,
                    scientific_name,
                    slug,
                    url_template
                ],
            )?;
            UpsertAction::Created
        }
    };
    Ok(UpsertResult::new("organism", input.tax_id.to_string(), action))
}

/// Placeholder substituted with the external id in a cross-reference URL.
pub const XRDB_PLACEHOLDER: &str = "_REPL_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XrdbInput {
    pub name: String,
    pub url: String,
}

pub fn upsert_xrdb(conn: &Connection, input: &XrdbInput) -> Result<UpsertResult, BootstrapError> {
    let name = required_text("name", &input.name)?;
    let url = required_text("url", &input.url)?;
    if !url.contains(XRDB_PLACEHOLDER) {
        tracing::warn!(%name, %url, "cross-reference URL has no {XRDB_PLACEHOLDER} placeholder");
    }

    let action = match store::find_xrdb(conn, &name)? {
        Some(id) => {
            conn.execute(
                "UPDATE cross_ref_db SET url = ?1 WHERE id = ?2",
                params![url, id],
            )?;
            UpsertAction::Updated
        }
        None => {
            conn.execute(
                "INSERT INTO cross_ref_db (name, url) VALUES (?1, ?2)",
                params![name, url],
            )?;
            UpsertAction::Created
        }
    };
    Ok(UpsertResult::new("xrdb", name, action))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipationTypeInput {
    pub name: String,
    pub description: String,
}

pub fn upsert_participation_type(
    conn: &Connection,
    input: &ParticipationTypeInput,
) -> Result<UpsertResult, BootstrapError> {
    let name = required_text("participation type name", &input.name)?;
    let description = required_text("participation type description", &input.description)?;

    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM participation_type WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )
        .optional()?;
    let action = match existing {
        Some(id) => {
            conn.execute(
                "UPDATE participation_type SET description = ?1 WHERE id = ?2",
                params![description, id],
            )?;
            UpsertAction::Updated
        }
        None => {
            conn.execute(
                "INSERT INTO participation_type (name, description) VALUES (?1, ?2)",
                params![name, description],
            )?;
            UpsertAction::Created
        }
    };
    Ok(UpsertResult::new("participation_type", name, action))
}

/// YAML definition of an ML model, e.g. `data/simple_ml_model.yml`.
///
/// Fields left out of the file keep their stored value when the model
/// already exists.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelDefinition {
    pub title: Option<String>,
    pub organism_tax_id: Option<u32>,
    pub directed_g2g_edge: Option<bool>,
    pub g2g_edge_cutoff: Option<f64>,
    pub authors: Option<String>,
    pub journal: Option<String>,
    pub year: Option<i32>,
    pub affiliations: Option<String>,
    pub funders: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub references: Option<String>,
    pub license: Option<String>,
}

impl ModelDefinition {
    pub fn load(path: &Utf8Path) -> Result<Self, BootstrapError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| BootstrapError::Filesystem(format!("read {path}: {err}")))?;
        Self::parse(path.as_str(), &content)
    }

    pub fn parse(origin: &str, content: &str) -> Result<Self, BootstrapError> {
        serde_yaml::from_str(content).map_err(|err| BootstrapError::ModelDefinition {
            path: origin.to_string(),
            message: err.to_string(),
        })
    }
}

pub fn upsert_model(
    conn: &Connection,
    definition: &ModelDefinition,
) -> Result<UpsertResult, BootstrapError> {
    let (Some(title), Some(tax_id)) = (&definition.title, definition.organism_tax_id) else {
        return Err(BootstrapError::InvalidArgument(
            "`organism_tax_id` or `title` not found in model definition".to_string(),
        ));
    };
    let title = required_text("title", title)?;
    let organism_id = store::require_organism(conn, TaxonomyId::new(tax_id)?)?;

    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM ml_model WHERE title = ?1",
            params![title],
            |row| row.get(0),
        )
        .optional()?;

    let action = match existing {
        Some(id) => {
            conn.execute(
                "UPDATE ml_model SET organism_id = ?2,
                    directed_g2g_edge = COALESCE(?3, directed_g2g_edge),
                    g2g_edge_cutoff = COALESCE(?4, g2g_edge_cutoff),
                    authors = COALESCE(?5, authors),
                    journal = COALESCE(?6, journal),
                    year = COALESCE(?7, year),
                    affiliations = COALESCE(?8, affiliations),
                    funders = COALESCE(?9, funders),
                    description = COALESCE(?10, description),
                    url = COALESCE(?11, url),
                    citation_references = COALESCE(?12, citation_references),
                    license = COALESCE(?13, license)
                 WHERE id = ?1",
                params![
                    id,
                    organism_id,
                    definition.directed_g2g_edge,
                    definition.g2g_edge_cutoff,
                    definition.authors,
                    definition.journal,
                    definition.year,
                    definition.affiliations,
                    definition.funders,
                    definition.description,
                    definition.url,
                    definition.references,
                    definition.license,
                ],
            )?;
            UpsertAction::Updated
        }
        None => {
            conn.execute(
                "INSERT INTO ml_model (title, organism_id, directed_g2g_edge, g2g_edge_cutoff,
                    authors, journal, year, affiliations, funders, description, url,
                    citation_references, license)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    title,
                    organism_id,
                    definition.directed_g2g_edge.unwrap_or(false),
                    definition.g2g_edge_cutoff.unwrap_or(0.0),
                    definition.authors,
                    definition.journal,
                    definition.year,
                    definition.affiliations,
                    definition.funders,
                    definition.description,
                    definition.url,
                    definition.references,
                    definition.license,
                ],
            )?;
            UpsertAction::Created
        }
    };
    Ok(UpsertResult::new("ml_model", title, action))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::store::Store;

    fn pseudomonas() -> OrganismInput {
        OrganismInput {
            tax_id: TaxonomyId::new(208964).unwrap(),
            common_name: " Pseudomonas aeruginosa ".to_string(),
            scientific_name: "Pseudomonas aeruginosa".to_string(),
            url_template: Some("http://www.pseudomonas.com/feature/show/?locus_tag=<systematic_name>".to_string()),
        }
    }

    #[test]
    fn organism_upsert_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let first = upsert_organism(store.connection(), &pseudomonas()).unwrap();
        let second = upsert_organism(store.connection(), &pseudomonas()).unwrap();
        assert_eq!(first.action, UpsertAction::Created);
        assert_eq!(second.action, UpsertAction::Updated);
        assert_eq!(store.count_rows("organism").unwrap(), 1);

        let (common, slug): (String, String) = store
            .connection()
            .query_row("SELECT common_name, slug FROM organism", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!(common, "Pseudomonas aeruginosa");
        assert_eq!(slug, "pseudomonas-aeruginosa");
    }

    #[test]
    fn organism_rejects_blank_names() {
        let store = Store::open_in_memory().unwrap();
        let mut input = pseudomonas();
        input.common_name = "  ".to_string();
        let err = upsert_organism(store.connection(), &input).unwrap_err();
        assert_matches!(err, BootstrapError::InvalidArgument(_));
    }

    #[test]
    fn xrdb_update_replaces_url() {
        let store = Store::open_in_memory().unwrap();
        let mut input = XrdbInput {
            name: "Ensembl".to_string(),
            url: "http://www.ensembl.org/Gene/Summary?g=_REPL_".to_string(),
        };
        upsert_xrdb(store.connection(), &input).unwrap();
        input.url = "https://www.ensembl.org/id/_REPL_".to_string();
        let result = upsert_xrdb(store.connection(), &input).unwrap();
        assert_eq!(result.action, UpsertAction::Updated);
        let url: String = store
            .connection()
            .query_row("SELECT url FROM cross_ref_db WHERE name = 'Ensembl'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(url, "https://www.ensembl.org/id/_REPL_");
    }

    #[test]
    fn model_requires_existing_organism() {
        let store = Store::open_in_memory().unwrap();
        let definition =
            ModelDefinition::parse("inline", "title: Ensemble ADAGE 300\norganism_tax_id: 208964\n")
                .unwrap();
        let err = upsert_model(store.connection(), &definition).unwrap_err();
        assert_matches!(err, BootstrapError::OrganismNotFound(208964));

        upsert_organism(store.connection(), &pseudomonas()).unwrap();
        let result = upsert_model(store.connection(), &definition).unwrap();
        assert_eq!(result.action, UpsertAction::Created);
        let again = upsert_model(store.connection(), &definition).unwrap();
        assert_eq!(again.action, UpsertAction::Updated);
        assert_eq!(store.count_rows("ml_model").unwrap(), 1);
    }

    #[test]
    fn partial_model_update_keeps_omitted_fields() {
        let store = Store::open_in_memory().unwrap();
        upsert_organism(store.connection(), &pseudomonas()).unwrap();
        let full = ModelDefinition::parse(
            "inline",
            "title: Ensemble ADAGE 300\norganism_tax_id: 208964\nauthors: Tan J\n\
             directed_g2g_edge: true\ng2g_edge_cutoff: 0.4\n",
        )
        .unwrap();
        upsert_model(store.connection(), &full).unwrap();

        let partial = ModelDefinition::parse(
            "inline",
            "title: Ensemble ADAGE 300\norganism_tax_id: 208964\ndescription: new text\n",
        )
        .unwrap();
        let result = upsert_model(store.connection(), &partial).unwrap();
        assert_eq!(result.action, UpsertAction::Updated);

        let (authors, description): (Option<String>, Option<String>) = store
            .connection()
            .query_row("SELECT authors, description FROM ml_model", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!(authors.as_deref(), Some("Tan J"));
        assert_eq!(description.as_deref(), Some("new text"));

        let model = store::require_model(store.connection(), "Ensemble ADAGE 300").unwrap();
        assert!(model.directed_g2g_edge);
        assert_eq!(model.g2g_edge_cutoff, 0.4);
    }

    #[test]
    fn model_definition_rejects_string_tax_id() {
        let err = ModelDefinition::parse("inline", "title: x\norganism_tax_id: abc\n").unwrap_err();
        assert_matches!(err, BootstrapError::ModelDefinition { .. });
    }

    #[test]
    fn participation_type_requires_description() {
        let store = Store::open_in_memory().unwrap();
        let err = upsert_participation_type(
            store.connection(),
            &ParticipationTypeInput {
                name: "High-weight genes".to_string(),
                description: "".to_string(),
            },
        )
        .unwrap_err();
        assert_matches!(err, BootstrapError::InvalidArgument(_));
    }
}
