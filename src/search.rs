//! Trigram search indexes.
//!
//! SQLite gets FTS5 virtual tables with the `trigram` tokenizer; the same
//! columns can be indexed on PostgreSQL with `pg_trgm` using
//! [`postgres_script`].

use rusqlite::{Connection, params};
use serde::Serialize;
use tracing::info;

use crate::error::BootstrapError;
use crate::store::Store;

/// A table column covered by a trigram index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrigramColumn {
    pub table: &'static str,
    pub column: &'static str,
}

impl TrigramColumn {
    pub fn index_name(&self) -> String {
        format!("{}_{}_trgm", self.table, self.column)
    }
}

pub const TRIGRAM_COLUMNS: &[TrigramColumn] = &[
    TrigramColumn { table: "gene", column: "systematic_name" },
    TrigramColumn { table: "gene", column: "standard_name" },
    TrigramColumn { table: "gene", column: "aliases" },
    TrigramColumn { table: "gene", column: "description" },
    TrigramColumn { table: "experiment", column: "accession" },
];

pub const GENE_INDEX_TABLE: &str = "gene_trgm";
pub const EXPERIMENT_INDEX_TABLE: &str = "experiment_trgm";

const CREATE_INDEXES: &str = "
CREATE VIRTUAL TABLE IF NOT EXISTS gene_trgm USING fts5(
    systematic_name, standard_name, aliases, description,
    content = 'gene', content_rowid = 'id', tokenize = 'trigram'
);
CREATE VIRTUAL TABLE IF NOT EXISTS experiment_trgm USING fts5(
    accession,
    content = 'experiment', content_rowid = 'id', tokenize = 'trigram'
);

CREATE TRIGGER IF NOT EXISTS gene_trgm_ai AFTER INSERT ON gene BEGIN
    INSERT INTO gene_trgm (rowid, systematic_name, standard_name, aliases, description)
    VALUES (new.id, new.systematic_name, new.standard_name, new.aliases, new.description);
END;
CREATE TRIGGER IF NOT EXISTS gene_trgm_ad AFTER DELETE ON gene BEGIN
    INSERT INTO gene_trgm (gene_trgm, rowid, systematic_name, standard_name, aliases, description)
    VALUES ('delete', old.id, old.systematic_name, old.standard_name, old.aliases, old.description);
END;
CREATE TRIGGER IF NOT EXISTS gene_trgm_au AFTER UPDATE ON gene BEGIN
    INSERT INTO gene_trgm (gene_trgm, rowid, systematic_name, standard_name, aliases, description)
    VALUES ('delete', old.id, old.systematic_name, old.standard_name, old.aliases, old.description);
    INSERT INTO gene_trgm (rowid, systematic_name, standard_name, aliases, description)
    VALUES (new.id, new.systematic_name, new.standard_name, new.aliases, new.description);
END;

CREATE TRIGGER IF NOT EXISTS experiment_trgm_ai AFTER INSERT ON experiment BEGIN
    INSERT INTO experiment_trgm (rowid, accession) VALUES (new.id, new.accession);
END;
CREATE TRIGGER IF NOT EXISTS experiment_trgm_ad AFTER DELETE ON experiment BEGIN
    INSERT INTO experiment_trgm (experiment_trgm, rowid, accession)
    VALUES ('delete', old.id, old.accession);
END;
CREATE TRIGGER IF NOT EXISTS experiment_trgm_au AFTER UPDATE ON experiment BEGIN
    INSERT INTO experiment_trgm (experiment_trgm, rowid, accession)
    VALUES ('delete', old.id, old.accession);
    INSERT INTO experiment_trgm (rowid, accession) VALUES (new.id, new.accession);
END;
";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub indexes: Vec<String>,
    pub genes_indexed: u64,
    pub experiments_indexed: u64,
}

/// Declares the trigram indexes if absent and rebuilds their contents.
///
/// Triggers on `gene` and `experiment` keep the indexes current after the
/// first call.
pub fn create_search_indexes(store: &mut Store) -> Result<IndexReport, BootstrapError> {
    let tx = store.transaction()?;
    tx.execute_batch(CREATE_INDEXES)?;
    tx.execute("INSERT INTO gene_trgm (gene_trgm) VALUES ('rebuild')", [])?;
    tx.execute("INSERT INTO experiment_trgm (experiment_trgm) VALUES ('rebuild')", [])?;
    let genes_indexed = count(&tx, "SELECT COUNT(*) FROM gene")?;
    let experiments_indexed = count(&tx, "SELECT COUNT(*) FROM experiment")?;
    tx.commit()?;

    info!(genes_indexed, experiments_indexed, "trigram indexes rebuilt");
    Ok(IndexReport {
        indexes: vec![GENE_INDEX_TABLE.to_string(), EXPERIMENT_INDEX_TABLE.to_string()],
        genes_indexed,
        experiments_indexed,
    })
}

fn count(conn: &Connection, sql: &str) -> Result<u64, BootstrapError> {
    let value: i64 = conn.query_row(sql, [], |row| row.get(0))?;
    Ok(value as u64)
}

/// Equivalent `pg_trgm` declarations for a PostgreSQL deployment.
pub fn postgres_script() -> String {
    let mut script = String::from("CREATE EXTENSION IF NOT EXISTS pg_trgm;\n");
    for column in TRIGRAM_COLUMNS {
        script.push_str(&format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} USING gin ({} gin_trgm_ops);\n",
            column.index_name(),
            column.table,
            column.column
        ));
    }
    script
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneHit {
    pub id: i64,
    pub systematic_name: String,
    pub standard_name: Option<String>,
    pub weight: f64,
}

/// Substring search over gene names, aliases and descriptions.
///
/// Results are ordered by gene weight. Trigram matching needs at least three
/// characters.
pub fn search_genes(conn: &Connection, query: &str, limit: usize) -> Result<Vec<GeneHit>, BootstrapError> {
    let query = query.trim();
    if query.chars().count() < 3 {
        return Err(BootstrapError::InvalidArgument(format!(
            "search term `{query}` is shorter than three characters"
        )));
    }
    let phrase = format!("\"{}\"", query.replace('"', "\"\""));
    let mut stmt = conn.prepare(
        "SELECT g.id, g.systematic_name, g.standard_name, g.weight
         FROM gene_trgm t JOIN gene g ON g.id = t.rowid
         WHERE gene_trgm MATCH ?1 AND g.obsolete = 0
         ORDER BY g.weight DESC, g.systematic_name
         LIMIT ?2",
    )?;
    let hits = stmt
        .query_map(params![phrase, limit as i64], |row| {
            Ok(GeneHit {
                id: row.get(0)?,
                systematic_name: row.get(1)?,
                standard_name: row.get(2)?,
                weight: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(hits)
}
