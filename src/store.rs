use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use directories::ProjectDirs;
use rusqlite::{Connection, OptionalExtension, Transaction, params};

use crate::domain::TaxonomyId;
use crate::error::BootstrapError;

pub const DATABASE_FILE: &str = "adage.sqlite3";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS organism (
    id INTEGER PRIMARY KEY,
    taxonomy_id INTEGER NOT NULL UNIQUE,
    common_name TEXT NOT NULL UNIQUE,
    scientific_name TEXT NOT NULL UNIQUE,
    slug TEXT NOT NULL UNIQUE,
    url_template TEXT
);

CREATE TABLE IF NOT EXISTS cross_ref_db (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    url TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS gene (
    id INTEGER PRIMARY KEY,
    entrez_id INTEGER UNIQUE,
    organism_id INTEGER NOT NULL REFERENCES organism(id),
    systematic_name TEXT NOT NULL,
    standard_name TEXT,
    description TEXT NOT NULL DEFAULT '',
    aliases TEXT NOT NULL DEFAULT '',
    obsolete INTEGER NOT NULL DEFAULT 0,
    weight REAL NOT NULL DEFAULT 1.0
);
CREATE INDEX IF NOT EXISTS idx_gene_systematic_name ON gene(systematic_name);
CREATE INDEX IF NOT EXISTS idx_gene_organism ON gene(organism_id);

CREATE TABLE IF NOT EXISTS cross_ref (
    id INTEGER PRIMARY KEY,
    cross_ref_db_id INTEGER NOT NULL REFERENCES cross_ref_db(id),
    xrid TEXT NOT NULL,
    gene_id INTEGER NOT NULL REFERENCES gene(id),
    UNIQUE (cross_ref_db_id, xrid, gene_id)
);

CREATE TABLE IF NOT EXISTS experiment (
    id INTEGER PRIMARY KEY,
    accession TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    description TEXT NOT NULL,
    samples_info TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS sample (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    ml_data_source TEXT UNIQUE
);

CREATE TABLE IF NOT EXISTS experiment_sample (
    experiment_id INTEGER NOT NULL REFERENCES experiment(id),
    sample_id INTEGER NOT NULL REFERENCES sample(id),
    PRIMARY KEY (experiment_id, sample_id)
);

CREATE TABLE IF NOT EXISTS annotation_type (
    id INTEGER PRIMARY KEY,
    typename TEXT NOT NULL UNIQUE,
    description TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS sample_annotation (
    id INTEGER PRIMARY KEY,
    annotation_type_id INTEGER NOT NULL REFERENCES annotation_type(id),
    sample_id INTEGER NOT NULL REFERENCES sample(id) ON DELETE CASCADE,
    text TEXT NOT NULL DEFAULT '',
    UNIQUE (annotation_type_id, sample_id)
);

CREATE TABLE IF NOT EXISTS ml_model (
    id INTEGER PRIMARY KEY,
    title TEXT NOT NULL UNIQUE,
    organism_id INTEGER NOT NULL REFERENCES organism(id),
    directed_g2g_edge INTEGER NOT NULL DEFAULT 0,
    g2g_edge_cutoff REAL NOT NULL DEFAULT 0.0,
    authors TEXT,
    journal TEXT,
    year INTEGER,
    affiliations TEXT,
    funders TEXT,
    description TEXT,
    url TEXT,
    citation_references TEXT,
    license TEXT
);

CREATE TABLE IF NOT EXISTS signature (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    ml_model_id INTEGER NOT NULL REFERENCES ml_model(id),
    UNIQUE (name, ml_model_id)
);

CREATE TABLE IF NOT EXISTS activity (
    id INTEGER PRIMARY KEY,
    sample_id INTEGER NOT NULL REFERENCES sample(id),
    signature_id INTEGER NOT NULL REFERENCES signature(id),
    value REAL NOT NULL,
    UNIQUE (sample_id, signature_id)
);

CREATE TABLE IF NOT EXISTS edge (
    id INTEGER PRIMARY KEY,
    ml_model_id INTEGER NOT NULL REFERENCES ml_model(id),
    gene1_id INTEGER NOT NULL REFERENCES gene(id),
    gene2_id INTEGER NOT NULL REFERENCES gene(id),
    weight REAL NOT NULL,
    UNIQUE (ml_model_id, gene1_id, gene2_id)
);

CREATE TABLE IF NOT EXISTS participation_type (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    description TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS participation (
    id INTEGER PRIMARY KEY,
    signature_id INTEGER NOT NULL REFERENCES signature(id),
    gene_id INTEGER NOT NULL REFERENCES gene(id),
    participation_type_id INTEGER NOT NULL REFERENCES participation_type(id),
    weight REAL,
    UNIQUE (signature_id, gene_id, participation_type_id)
);

CREATE TABLE IF NOT EXISTS expression_value (
    id INTEGER PRIMARY KEY,
    sample_id INTEGER NOT NULL REFERENCES sample(id),
    gene_id INTEGER NOT NULL REFERENCES gene(id),
    value REAL NOT NULL,
    UNIQUE (sample_id, gene_id)
);
";

const TABLES: &[&str] = &[
    "organism",
    "cross_ref_db",
    "gene",
    "cross_ref",
    "experiment",
    "sample",
    "experiment_sample",
    "annotation_type",
    "sample_annotation",
    "ml_model",
    "signature",
    "activity",
    "edge",
    "participation_type",
    "participation",
    "expression_value",
];

pub struct Store {
    conn: Connection,
    path: Option<Utf8PathBuf>,
}

impl Store {
    pub fn open(path: &Utf8Path) -> Result<Self, BootstrapError> {
        if let Some(parent) = path.parent() {
            if !parent.as_str().is_empty() {
                fs::create_dir_all(parent.as_std_path())
                    .map_err(|err| BootstrapError::Filesystem(err.to_string()))?;
            }
        }
        let conn = Connection::open(path.as_std_path())?;
        let store = Self {
            conn,
            path: Some(path.to_owned()),
        };
        store.configure()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, BootstrapError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn, path: None };
        store.configure()?;
        Ok(store)
    }

    /// `<platform data dir>/adage-bootstrap/adage.sqlite3`
    pub fn default_path() -> Result<Utf8PathBuf, BootstrapError> {
        ProjectDirs::from("org", "greenelab", "adage-bootstrap")
            .and_then(|dirs| Utf8PathBuf::from_path_buf(dirs.data_dir().join(DATABASE_FILE)).ok())
            .ok_or_else(|| {
                BootstrapError::Filesystem("unable to resolve data directory".to_string())
            })
    }

    fn configure(&self) -> Result<(), BootstrapError> {
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    pub fn path(&self) -> Option<&Utf8Path> {
        self.path.as_deref()
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn transaction(&mut self) -> Result<Transaction<'_>, BootstrapError> {
        Ok(self.conn.transaction()?)
    }

    pub fn count_rows(&self, table: &str) -> Result<u64, BootstrapError> {
        if !TABLES.contains(&table) {
            return Err(BootstrapError::InvalidArgument(format!(
                "unknown table: {table}"
            )));
        }
        let count: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })?;
        Ok(count as u64)
    }
}

/// Result of resolving a gene by systematic name, which is not unique.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneMatch {
    Missing,
    Unique(i64),
    Ambiguous,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelRecord {
    pub id: i64,
    pub title: String,
    pub organism_id: i64,
    pub directed_g2g_edge: bool,
    pub g2g_edge_cutoff: f64,
}

pub fn find_organism(conn: &Connection, tax_id: TaxonomyId) -> Result<Option<i64>, BootstrapError> {
    Ok(conn
        .query_row(
            "SELECT id FROM organism WHERE taxonomy_id = ?1",
            params![tax_id.get()],
            |row| row.get(0),
        )
        .optional()?)
}

pub fn require_organism(conn: &Connection, tax_id: TaxonomyId) -> Result<i64, BootstrapError> {
    find_organism(conn, tax_id)?.ok_or(BootstrapError::OrganismNotFound(tax_id.get()))
}

pub fn find_gene(
    conn: &Connection,
    systematic_name: &str,
    organism_id: Option<i64>,
) -> Result<GeneMatch, BootstrapError> {
    let mut stmt = conn.prepare_cached(
        "SELECT id FROM gene
         WHERE systematic_name = ?1 AND (?2 IS NULL OR organism_id = ?2)
         LIMIT 2",
    )?;
    let ids = stmt
        .query_map(params![systematic_name, organism_id], |row| row.get::<_, i64>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(match ids.as_slice() {
        [] => GeneMatch::Missing,
        [id] => GeneMatch::Unique(*id),
        _ => GeneMatch::Ambiguous,
    })
}

pub fn find_gene_by_entrez(conn: &Connection, entrez_id: i64) -> Result<Option<i64>, BootstrapError> {
    Ok(conn
        .query_row(
            "SELECT id FROM gene WHERE entrez_id = ?1",
            params![entrez_id],
            |row| row.get(0),
        )
        .optional()?)
}

pub fn find_xrdb(conn: &Connection, name: &str) -> Result<Option<i64>, BootstrapError> {
    Ok(conn
        .query_row(
            "SELECT id FROM cross_ref_db WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )
        .optional()?)
}

pub fn require_model(conn: &Connection, title: &str) -> Result<ModelRecord, BootstrapError> {
    conn.query_row(
        "SELECT id, title, organism_id, directed_g2g_edge, g2g_edge_cutoff
         FROM ml_model WHERE title = ?1",
        params![title],
        |row| {
            Ok(ModelRecord {
                id: row.get(0)?,
                title: row.get(1)?,
                organism_id: row.get(2)?,
                directed_g2g_edge: row.get(3)?,
                g2g_edge_cutoff: row.get(4)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| BootstrapError::ModelNotFound(title.to_string()))
}

pub fn require_participation_type(conn: &Connection, name: &str) -> Result<i64, BootstrapError> {
    conn.query_row(
        "SELECT id FROM participation_type WHERE name = ?1",
        params![name],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| BootstrapError::ParticipationTypeNotFound(name.to_string()))
}

pub fn find_experiment(conn: &Connection, accession: &str) -> Result<Option<i64>, BootstrapError> {
    Ok(conn
        .query_row(
            "SELECT id FROM experiment WHERE accession = ?1",
            params![accession],
            |row| row.get(0),
        )
        .optional()?)
}

pub fn find_sample_by_data_source(
    conn: &Connection,
    data_source: &str,
) -> Result<Option<i64>, BootstrapError> {
    Ok(conn
        .query_row(
            "SELECT id FROM sample WHERE ml_data_source = ?1",
            params![data_source],
            |row| row.get(0),
        )
        .optional()?)
}

pub fn find_signature(
    conn: &Connection,
    name: &str,
    model_id: i64,
) -> Result<Option<i64>, BootstrapError> {
    Ok(conn
        .query_row(
            "SELECT id FROM signature WHERE name = ?1 AND ml_model_id = ?2",
            params![name, model_id],
            |row| row.get(0),
        )
        .optional()?)
}

pub fn get_or_create_signature(
    conn: &Connection,
    name: &str,
    model_id: i64,
) -> Result<i64, BootstrapError> {
    if let Some(id) = find_signature(conn, name, model_id)? {
        return Ok(id);
    }
    conn.execute(
        "INSERT INTO signature (name, ml_model_id) VALUES (?1, ?2)",
        params![name, model_id],
    )?;
    Ok(conn.last_insert_rowid())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_is_reapplied_without_error() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("db").join(DATABASE_FILE)).unwrap();
        drop(Store::open(&path).unwrap());
        let store = Store::open(&path).unwrap();
        assert_eq!(store.count_rows("organism").unwrap(), 0);
        assert_eq!(store.path(), Some(path.as_path()));
    }

    #[test]
    fn count_rows_rejects_unknown_tables() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.count_rows("sqlite_master; DROP TABLE gene").is_err());
    }

    #[test]
    fn gene_lookup_reports_ambiguity() {
        let store = Store::open_in_memory().unwrap();
        let conn = store.connection();
        conn.execute(
            "INSERT INTO organism (taxonomy_id, common_name, scientific_name, slug)
             VALUES (208964, 'Pseudomonas', 'Pseudomonas aeruginosa', 'pseudomonas-aeruginosa')",
            [],
        )
        .unwrap();
        let org = conn.last_insert_rowid();
        conn.execute(
            "INSERT INTO gene (organism_id, systematic_name) VALUES (?1, 'PA0001'), (?1, 'PA0002'), (?1, 'PA0002')",
            params![org],
        )
        .unwrap();

        assert_eq!(find_gene(conn, "PA0000", None).unwrap(), GeneMatch::Missing);
        assert!(matches!(
            find_gene(conn, "PA0001", Some(org)).unwrap(),
            GeneMatch::Unique(_)
        ));
        assert_eq!(find_gene(conn, "PA0002", None).unwrap(), GeneMatch::Ambiguous);
    }
}
