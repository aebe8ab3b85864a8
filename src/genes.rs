//! Gene table importers: NCBI `gene_info`, `gene_history`, and the curated
//! name/alias update files.

use std::collections::HashSet;

use camino::Utf8Path;
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::TaxonomyId;
use crate::error::BootstrapError;
use crate::report::ImportReport;
use crate::store::{self, GeneMatch, Store};
use crate::tsv::{ReadOptions, TsvReader};

/// A `gene_info` import must match at least this many lines of the organism.
pub const MIN_ORGANISM_GENES: usize = 10;

const GENE_INFO_TAX_COL: usize = 0;
const GENE_INFO_ENTREZ_COL: usize = 1;
const GENE_INFO_XREF_COL: usize = 5;
const GENE_INFO_CHROMOSOME_COL: usize = 6;
const GENE_INFO_DESCRIPTION_COL: usize = 8;
const GENE_INFO_TYPE_COL: usize = 9;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneInfoOptions {
    pub tax_id: TaxonomyId,
    /// Taxonomy id as written in the file when it differs from the organism's.
    #[serde(default)]
    pub gi_tax_id: Option<TaxonomyId>,
    #[serde(default = "default_symbol_col")]
    pub symbol_col: usize,
    #[serde(default = "default_systematic_col")]
    pub systematic_col: usize,
    #[serde(default = "default_alias_col")]
    pub alias_col: usize,
    #[serde(default)]
    pub systematic_xrdb: Option<String>,
}

fn default_symbol_col() -> usize {
    2
}

fn default_systematic_col() -> usize {
    3
}

fn default_alias_col() -> usize {
    4
}

impl GeneInfoOptions {
    pub fn new(tax_id: TaxonomyId) -> Self {
        Self {
            tax_id,
            gi_tax_id: None,
            symbol_col: default_symbol_col(),
            systematic_col: default_systematic_col(),
            alias_col: default_alias_col(),
            systematic_xrdb: None,
        }
    }
}

/// One parsed `gene_info` line for the target organism.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneInfoRow {
    pub entrez_id: i64,
    pub systematic_name: String,
    pub standard_name: String,
    pub description: String,
    pub aliases: String,
    pub xrefs: Vec<(String, String)>,
    pub weight: f64,
}

impl GeneInfoRow {
    /// Builds the row from raw fields, applying the naming and weighting rules.
    pub fn from_fields(
        reader: &TsvReader,
        line: usize,
        fields: &[String],
        options: &GeneInfoOptions,
    ) -> Result<Self, BootstrapError> {
        let entrez_id = fields[GENE_INFO_ENTREZ_COL]
            .trim()
            .parse::<i64>()
            .map_err(|_| reader.malformed(line, "GeneID column is not an integer"))?;
        let standard_name = fields[options.symbol_col].clone();
        let mut systematic_name = fields[options.systematic_col].clone();
        let aliases = fields[options.alias_col].trim();
        let crossrefs = fields[GENE_INFO_XREF_COL].trim();
        let chromosome = fields[GENE_INFO_CHROMOSOME_COL].trim();
        let description = fields[GENE_INFO_DESCRIPTION_COL].clone();
        let gene_type = fields[GENE_INFO_TYPE_COL].trim();

        if systematic_name.is_empty() || systematic_name == "-" {
            systematic_name = standard_name.clone();
        }
        // Mitochondrial copies get an MT- prefix to keep names distinct.
        if chromosome == "MT" && !systematic_name.starts_with("MT") {
            debug!("renaming {systematic_name} to MT-{systematic_name}, mitochondrial version");
            systematic_name = format!("MT-{systematic_name}");
        }

        let alias_list = if aliases.is_empty() || aliases == "-" {
            Vec::new()
        } else {
            aliases.split('|').collect::<Vec<_>>()
        };

        let mut xrefs = Vec::new();
        if !crossrefs.is_empty() && crossrefs != "-" {
            if let Some(xrdb) = &options.systematic_xrdb {
                xrefs.push((xrdb.clone(), systematic_name.clone()));
            }
            for xref in crossrefs.split('|') {
                match xref.split_once(':') {
                    Some((db, id)) => xrefs.push((db.to_string(), id.to_string())),
                    None => debug!("line {line}: cross reference {xref} has no database prefix"),
                }
            }
            xrefs.sort();
            xrefs.dedup();
        }

        // Better-known genes (more databases, more aliases) rank first in search.
        let mut weight = (2 * xrefs.len() + alias_list.len()) as f64;
        if gene_type == "protein-coding" {
            weight *= 2.0;
        }

        Ok(Self {
            entrez_id,
            systematic_name,
            standard_name,
            description,
            aliases: alias_list.join(" "),
            xrefs,
            weight,
        })
    }
}

pub fn import_gene_info(
    store: &mut Store,
    path: &Utf8Path,
    options: &GeneInfoOptions,
) -> Result<ImportReport, BootstrapError> {
    let mut report = ImportReport::new("gene-info");
    let mut reader = TsvReader::open(path, ReadOptions::annotated())?;
    let tx = store.transaction()?;
    let organism_id = store::require_organism(&tx, options.tax_id)?;
    let gi_tax_id = options.gi_tax_id.unwrap_or(options.tax_id).get();
    let min_fields = [
        GENE_INFO_TYPE_COL,
        options.symbol_col,
        options.systematic_col,
        options.alias_col,
    ]
    .into_iter()
    .max()
    .unwrap_or(GENE_INFO_TYPE_COL)
        + 1;

    let entrez_in_db = organism_entrez_ids(&tx, organism_id)?;
    let mut entrez_seen = HashSet::new();
    let mut org_matches = 0usize;

    while let Some(record) = reader.next_record()? {
        if record.width() < min_fields {
            return Err(reader.malformed(
                record.line,
                format!("expected at least {min_fields} columns, found {}", record.width()),
            ));
        }
        if record.fields[options.symbol_col] == "NEWENTRY" {
            info!("NEWENTRY line skipped");
            continue;
        }
        let row_tax = record.fields[GENE_INFO_TAX_COL]
            .trim()
            .parse::<u32>()
            .map_err(|_| reader.malformed(record.line, "tax_id column is not an integer"))?;
        if row_tax != gi_tax_id {
            continue;
        }
        org_matches += 1;

        let row = GeneInfoRow::from_fields(&reader, record.line, &record.fields, options)?;
        entrez_seen.insert(row.entrez_id);

        let gene_id = if entrez_in_db.contains(&row.entrez_id) {
            let changed = tx.execute(
                "UPDATE gene
                 SET systematic_name = ?2, standard_name = ?3, description = ?4,
                     aliases = ?5, weight = ?6, obsolete = 0
                 WHERE entrez_id = ?1
                   AND (systematic_name IS NOT ?2 OR standard_name IS NOT ?3
                        OR description IS NOT ?4 OR aliases IS NOT ?5
                        OR weight IS NOT ?6 OR obsolete != 0)",
                params![
                    row.entrez_id,
                    row.systematic_name,
                    row.standard_name,
                    row.description,
                    row.aliases,
                    row.weight
                ],
            )?;
            if changed > 0 {
                report.updated += 1;
            }
            store::find_gene_by_entrez(&tx, row.entrez_id)?.ok_or_else(|| {
                BootstrapError::Database(format!("gene {} vanished during import", row.entrez_id))
            })?
        } else {
            tx.execute(
                "INSERT INTO gene (entrez_id, organism_id, systematic_name, standard_name,
                                   description, aliases, obsolete, weight)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
                params![
                    row.entrez_id,
                    organism_id,
                    row.systematic_name,
                    row.standard_name,
                    row.description,
                    row.aliases,
                    row.weight
                ],
            )?;
            report.created += 1;
            tx.last_insert_rowid()
        };

        for (xrdb_name, xrid) in &row.xrefs {
            let Some(xrdb_id) = store::find_xrdb(&tx, xrdb_name)? else {
                report.note(format!(
                    "line #{}: crossrefdb ({xrdb_name}) not in database for pair ({xrdb_name}, {xrid})",
                    record.line
                ));
                continue;
            };
            tx.execute(
                "INSERT OR IGNORE INTO cross_ref (cross_ref_db_id, xrid, gene_id)
                 VALUES (?1, ?2, ?3)",
                params![xrdb_id, xrid, gene_id],
            )?;
        }
    }

    if org_matches < MIN_ORGANISM_GENES {
        return Err(reader.malformed_file(format!(
            "less than {MIN_ORGANISM_GENES} gene records found for taxonomy id {gi_tax_id}; \
             check the input organism tax_id"
        )));
    }

    let mut obsoleted = 0usize;
    for entrez_id in entrez_in_db.difference(&entrez_seen) {
        obsoleted += tx.execute(
            "UPDATE gene SET obsolete = 1 WHERE entrez_id = ?1 AND obsolete = 0",
            params![entrez_id],
        )?;
    }
    tx.commit()?;

    info!(
        found = entrez_seen.intersection(&entrez_in_db).count(),
        updated = report.updated,
        created = report.created,
        obsoleted,
        "gene_info imported"
    );
    report.updated += obsoleted;
    Ok(report)
}

fn organism_entrez_ids(conn: &Connection, organism_id: i64) -> Result<HashSet<i64>, BootstrapError> {
    let mut stmt = conn.prepare(
        "SELECT entrez_id FROM gene WHERE organism_id = ?1 AND entrez_id IS NOT NULL",
    )?;
    let ids = stmt
        .query_map(params![organism_id], |row| row.get::<_, i64>(0))?
        .collect::<Result<HashSet<_>, _>>()?;
    Ok(ids)
}

/// 1-based column numbers of a `gene_history` file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneHistoryOptions {
    pub tax_id: TaxonomyId,
    #[serde(default = "default_history_tax_col")]
    pub tax_id_col: usize,
    #[serde(default = "default_history_id_col")]
    pub discontinued_id_col: usize,
    #[serde(default = "default_history_symbol_col")]
    pub discontinued_symbol_col: usize,
}

fn default_history_tax_col() -> usize {
    1
}

fn default_history_id_col() -> usize {
    3
}

fn default_history_symbol_col() -> usize {
    4
}

impl GeneHistoryOptions {
    pub fn new(tax_id: TaxonomyId) -> Self {
        Self {
            tax_id,
            tax_id_col: default_history_tax_col(),
            discontinued_id_col: default_history_id_col(),
            discontinued_symbol_col: default_history_symbol_col(),
        }
    }
}

pub fn import_gene_history(
    store: &mut Store,
    path: &Utf8Path,
    options: &GeneHistoryOptions,
) -> Result<ImportReport, BootstrapError> {
    let columns = [
        ("tax_id_col", options.tax_id_col),
        ("discontinued_id_col", options.discontinued_id_col),
        ("discontinued_symbol_col", options.discontinued_symbol_col),
    ];
    if columns.iter().any(|(_, col)| *col == 0) {
        return Err(BootstrapError::InvalidArgument(
            "tax_id_col, discontinued_id_col and discontinued_symbol_col must be positive integers"
                .to_string(),
        ));
    }
    let tax_col = options.tax_id_col - 1;
    let id_col = options.discontinued_id_col - 1;
    let symbol_col = options.discontinued_symbol_col - 1;

    let mut report = ImportReport::new("gene-history");
    let mut reader = TsvReader::open(path, ReadOptions::annotated())?;
    let tx = store.transaction()?;
    let organism_id = store::require_organism(&tx, options.tax_id)?;

    while let Some(record) = reader.next_record()? {
        if let Some((name, _)) = columns.iter().find(|(_, col)| *col > record.width()) {
            return Err(reader.malformed(
                record.line,
                format!("column number of {name} is out of range"),
            ));
        }
        let row_tax = record.fields[tax_col]
            .trim()
            .parse::<u32>()
            .map_err(|_| reader.malformed(record.line, "tax_id column is not an integer"))?;
        if row_tax != options.tax_id.get() {
            continue;
        }

        let entrez_id = record.fields[id_col]
            .trim()
            .parse::<i64>()
            .map_err(|_| reader.malformed(record.line, "discontinued GeneID is not an integer"))?;
        match store::find_gene_by_entrez(&tx, entrez_id)? {
            Some(gene_id) => {
                report.updated += tx.execute(
                    "UPDATE gene SET obsolete = 1 WHERE id = ?1 AND obsolete = 0",
                    params![gene_id],
                )?;
            }
            None => {
                let symbol = record.fields[symbol_col].trim();
                tx.execute(
                    "INSERT INTO gene (entrez_id, organism_id, systematic_name, standard_name, obsolete)
                     VALUES (?1, ?2, ?3, ?3, 1)",
                    params![entrez_id, organism_id, symbol],
                )?;
                report.created += 1;
            }
        }
    }
    tx.commit()?;
    Ok(report)
}

/// Applies a `systematic \t standard \t aliases` file; unknown genes are
/// created under `tax_id`.
pub fn update_gene_names(
    store: &mut Store,
    path: &Utf8Path,
    tax_id: TaxonomyId,
) -> Result<ImportReport, BootstrapError> {
    let mut report = ImportReport::new("gene-names");
    let mut reader = TsvReader::open(path, ReadOptions::annotated())?;
    let tx = store.transaction()?;
    let organism_id = store::require_organism(&tx, tax_id)?;

    while let Some(record) = reader.next_record()? {
        if record.width() != 3 {
            return Err(reader.malformed(
                record.line,
                format!("need three fields but {} is found", record.width()),
            ));
        }
        let systematic_name = record.fields[0].trim();
        let standard_name = record.fields[1].trim();
        let aliases = record.fields[2].trim();

        match store::find_gene(&tx, systematic_name, None)? {
            GeneMatch::Missing => {
                tx.execute(
                    "INSERT INTO gene (organism_id, systematic_name, standard_name, aliases)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![organism_id, systematic_name, standard_name, aliases],
                )?;
                report.created += 1;
            }
            GeneMatch::Ambiguous => report.skip(format!(
                "line #{} ignored: {systematic_name} matches multiple genes in database",
                record.line
            )),
            GeneMatch::Unique(gene_id) => {
                if !standard_name.is_empty() {
                    tx.execute(
                        "UPDATE gene SET standard_name = ?1 WHERE id = ?2",
                        params![standard_name, gene_id],
                    )?;
                }
                if !aliases.is_empty() {
                    tx.execute(
                        "UPDATE gene SET aliases = ?1 WHERE id = ?2",
                        params![aliases, gene_id],
                    )?;
                }
                report.updated += 1;
            }
        }
    }
    tx.commit()?;
    Ok(report)
}

/// Appends the alias in column 2 to the gene named in column 1.
pub fn add_gene_aliases(store: &mut Store, path: &Utf8Path) -> Result<ImportReport, BootstrapError> {
    let mut report = ImportReport::new("gene-aliases");
    let mut reader = TsvReader::open(path, ReadOptions::annotated())?;
    let tx = store.transaction()?;

    while let Some(record) = reader.next_record()? {
        if record.width() != 2 {
            return Err(reader.malformed(
                record.line,
                format!("need two fields but {} is found", record.width()),
            ));
        }
        let systematic_name = record.fields[0].trim();
        let alias = record.fields[1].trim();

        let gene_id = match store::find_gene(&tx, systematic_name, None)? {
            GeneMatch::Unique(id) => id,
            GeneMatch::Missing => {
                report.skip(format!(
                    "line #{} ignored: {systematic_name} not found in database",
                    record.line
                ));
                continue;
            }
            GeneMatch::Ambiguous => {
                report.skip(format!(
                    "line #{} ignored: {systematic_name} matches multiple genes in database",
                    record.line
                ));
                continue;
            }
        };

        let current: String = tx.query_row(
            "SELECT aliases FROM gene WHERE id = ?1",
            params![gene_id],
            |row| row.get(0),
        )?;
        let mut alias_list = current.split_whitespace().collect::<Vec<_>>();
        if !alias_list.contains(&alias) {
            alias_list.push(alias);
            tx.execute(
                "UPDATE gene SET aliases = ?1 WHERE id = ?2",
                params![alias_list.join(" "), gene_id],
            )?;
            report.updated += 1;
        }
    }
    tx.commit()?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn fields(line: &str) -> Vec<String> {
        line.split('\t').map(str::to_string).collect()
    }

    fn reader() -> TsvReader {
        TsvReader::from_reader("inline", Cursor::new(Vec::new()), ReadOptions::annotated())
    }

    #[test]
    fn gene_info_row_weights_protein_coding_genes() {
        let options = GeneInfoOptions::new(TaxonomyId::new(9606).unwrap());
        let line = "9606\t7157\tTP53\t-\tBCC7|LFS1\tMIM:191170|HGNC:HGNC:11998\t17\t17p13.1\ttumor protein p53\tprotein-coding";
        let row = GeneInfoRow::from_fields(&reader(), 1, &fields(line), &options).unwrap();
        assert_eq!(row.systematic_name, "TP53");
        assert_eq!(row.aliases, "BCC7 LFS1");
        assert!(row.xrefs.contains(&("HGNC".to_string(), "HGNC:11998".to_string())));
        assert_eq!(row.weight, 12.0);
    }

    #[test]
    fn gene_info_row_prefixes_mitochondrial_genes() {
        let mut options = GeneInfoOptions::new(TaxonomyId::new(9606).unwrap());
        options.systematic_xrdb = Some("Ensembl".to_string());
        let line = "9606\t4508\tATP6\t-\t-\tMIM:516060\tMT\t-\tATP synthase 6\tprotein-coding";
        let row = GeneInfoRow::from_fields(&reader(), 1, &fields(line), &options).unwrap();
        assert_eq!(row.systematic_name, "MT-ATP6");
        assert_eq!(row.xrefs.len(), 2);
        assert_eq!(row.weight, 8.0);
    }
}
