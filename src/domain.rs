use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::BootstrapError;

/// NCBI taxonomy identifier, the natural key of an organism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaxonomyId(u32);

impl TaxonomyId {
    pub fn new(value: u32) -> Result<Self, BootstrapError> {
        if value == 0 {
            return Err(BootstrapError::InvalidTaxonomyId(value.to_string()));
        }
        Ok(Self(value))
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TaxonomyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaxonomyId {
    type Err = BootstrapError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let parsed = value
            .trim()
            .parse::<u32>()
            .map_err(|_| BootstrapError::InvalidTaxonomyId(value.to_string()))?;
        Self::new(parsed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExperimentAccession(String);

impl ExperimentAccession {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExperimentAccession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ExperimentAccession {
    type Err = BootstrapError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        let is_valid = !normalized.is_empty()
            && normalized.len() <= 48
            && !normalized.chars().any(char::is_whitespace);
        if !is_valid {
            return Err(BootstrapError::InvalidAccession(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

/// Outcome of a create-or-update on a natural key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertAction {
    Created,
    Updated,
}

impl fmt::Display for UpsertAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpsertAction::Created => write!(f, "created"),
            UpsertAction::Updated => write!(f, "updated"),
        }
    }
}

/// URL-safe label: lowercase ASCII words joined by single hyphens.
pub fn slugify(value: &str) -> String {
    static NON_WORD: OnceLock<Regex> = OnceLock::new();
    let re = NON_WORD.get_or_init(|| Regex::new(r"[^a-z0-9]+").expect("static regex"));
    let lowered = value.trim().to_lowercase();
    re.replace_all(&lowered, "-").trim_matches('-').to_string()
}

/// Trims a required text argument and rejects it when blank.
pub fn required_text(field: &str, value: &str) -> Result<String, BootstrapError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(BootstrapError::InvalidArgument(format!("{field} is blank")));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_taxonomy_id_valid() {
        let id: TaxonomyId = " 208964 ".parse().unwrap();
        assert_eq!(id.get(), 208964);
    }

    #[test]
    fn parse_taxonomy_id_invalid() {
        let err = "pseudomonas".parse::<TaxonomyId>().unwrap_err();
        assert_matches!(err, BootstrapError::InvalidTaxonomyId(_));
        let err = "0".parse::<TaxonomyId>().unwrap_err();
        assert_matches!(err, BootstrapError::InvalidTaxonomyId(_));
    }

    #[test]
    fn parse_accession() {
        let acc: ExperimentAccession = "E-GEOD-10030".parse().unwrap();
        assert_eq!(acc.as_str(), "E-GEOD-10030");
        assert_matches!(
            "E GEOD".parse::<ExperimentAccession>(),
            Err(BootstrapError::InvalidAccession(_))
        );
    }

    #[test]
    fn slug_from_scientific_name() {
        assert_eq!(slugify("Pseudomonas aeruginosa"), "pseudomonas-aeruginosa");
        assert_eq!(slugify("  Homo   sapiens (human) "), "homo-sapiens-human");
    }
}
