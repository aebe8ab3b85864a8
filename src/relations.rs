//! Relationship loaders: gene-gene network, sample-signature activity,
//! gene-signature participation and gene-sample expression.
//!
//! Each loader streams one file inside one transaction. Rows whose natural
//! keys cannot be resolved are skipped with a warning; malformed rows abort
//! the whole file.

use std::collections::{BTreeMap, HashMap, HashSet};

use camino::Utf8Path;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::info;

use crate::domain::TaxonomyId;
use crate::error::BootstrapError;
use crate::report::ImportReport;
use crate::store::{self, GeneMatch, ModelRecord, Store};
use crate::tsv::{ReadOptions, TsvReader, parse_float};

const NETWORK_COLUMNS: usize = 4;

/// Heavy genes lie beyond this many standard deviations from a node's mean.
pub const HEAVY_GENE_SD: f64 = 2.5;

/// Caches gene lookups by systematic name, remembering misses.
struct GeneResolver {
    organism_id: Option<i64>,
    cache: HashMap<String, GeneMatch>,
}

impl GeneResolver {
    fn new(organism_id: Option<i64>) -> Self {
        Self {
            organism_id,
            cache: HashMap::new(),
        }
    }

    fn resolve(&mut self, conn: &Connection, name: &str) -> Result<GeneMatch, BootstrapError> {
        if let Some(found) = self.cache.get(name) {
            return Ok(*found);
        }
        let found = store::find_gene(conn, name, self.organism_id)?;
        self.cache.insert(name.to_string(), found);
        Ok(found)
    }

    /// Resolves a gene or explains why the row is skipped.
    fn require(&mut self, conn: &Connection, name: &str) -> Result<Result<i64, String>, BootstrapError> {
        Ok(match self.resolve(conn, name)? {
            GeneMatch::Unique(id) => Ok(id),
            GeneMatch::Missing => Err(format!("gene systematic name ({name}) not found in database")),
            GeneMatch::Ambiguous => Err(format!(
                "gene systematic name ({name}) matches multiple records in database"
            )),
        })
    }
}

fn edge_exists(conn: &Connection, model: &ModelRecord, gene1: i64, gene2: i64) -> Result<bool, BootstrapError> {
    let mut stmt = conn.prepare_cached(
        "SELECT 1 FROM edge WHERE ml_model_id = ?1 AND gene1_id = ?2 AND gene2_id = ?3",
    )?;
    if stmt.exists(params![model.id, gene1, gene2])? {
        return Ok(true);
    }
    if model.directed_g2g_edge {
        return Ok(false);
    }
    Ok(stmt.exists(params![model.id, gene2, gene1])?)
}

/// Imports `gene1 \t gene2 \t weight \t sign` edges for a model.
pub fn import_gene_network(
    store: &mut Store,
    path: &Utf8Path,
    model_title: &str,
) -> Result<ImportReport, BootstrapError> {
    let mut report = ImportReport::new("gene-network");
    let mut reader = TsvReader::open(path, ReadOptions::raw())?;
    let tx = store.transaction()?;
    let model = store::require_model(&tx, model_title)?;
    let check_existing = tx
        .query_row(
            "SELECT 1 FROM edge WHERE ml_model_id = ?1 LIMIT 1",
            params![model.id],
            |_| Ok(()),
        )
        .optional()?
        .is_some();

    let mut resolver = GeneResolver::new(Some(model.organism_id));
    let mut pairs_in_file: HashSet<(String, String)> = HashSet::new();
    let mut dropped = 0usize;
    let _header = reader.next_record()?;

    while let Some(record) = reader.next_record()? {
        let line = record.line;
        if record.width() != NETWORK_COLUMNS {
            return Err(reader.malformed(
                line,
                format!("number of fields is not {NETWORK_COLUMNS}"),
            ));
        }
        let (name1, name2) = (record.fields[0].as_str(), record.fields[1].as_str());
        if name1 == name2 {
            return Err(reader.malformed(line, "identical genes in columns #1 and #2"));
        }

        let signed = format!("{}{}", record.fields[3], record.fields[2]);
        let weight = signed
            .parse::<f64>()
            .map_err(|_| reader.malformed(line, format!("weight ({signed}) not floating type")))?;
        if !(-1.0..=1.0).contains(&weight) {
            return Err(reader.malformed(
                line,
                format!("weight ({signed}) out of range of -1.0~1.0"),
            ));
        }
        if weight.abs() < model.g2g_edge_cutoff {
            dropped += 1;
            continue;
        }

        let forward = (name1.to_string(), name2.to_string());
        let reverse = (name2.to_string(), name1.to_string());
        if pairs_in_file.contains(&forward)
            || (!model.directed_g2g_edge && pairs_in_file.contains(&reverse))
        {
            return Err(reader.malformed(
                line,
                format!("duplicate pair of genes ({name1}, {name2})"),
            ));
        }
        pairs_in_file.insert(forward);

        let gene1 = match resolver.require(&tx, name1)? {
            Ok(id) => id,
            Err(reason) => {
                report.skip(format!("line #{line} skipped: {reason}"));
                continue;
            }
        };
        let gene2 = match resolver.require(&tx, name2)? {
            Ok(id) => id,
            Err(reason) => {
                report.skip(format!("line #{line} skipped: {reason}"));
                continue;
            }
        };

        if check_existing && edge_exists(&tx, &model, gene1, gene2)? {
            return Err(reader.malformed(
                line,
                format!("({name1}, {name2}, {}) not unique in database", model.title),
            ));
        }
        tx.execute(
            "INSERT INTO edge (ml_model_id, gene1_id, gene2_id, weight) VALUES (?1, ?2, ?3, ?4)",
            params![model.id, gene1, gene2, weight],
        )?;
        report.inserted += 1;
    }
    tx.commit()?;
    info!(model = %model.title, inserted = report.inserted, below_cutoff = dropped, "gene network imported");
    Ok(report)
}

/// Imports a sample-by-signature activity matrix.
pub fn import_activity(
    store: &mut Store,
    path: &Utf8Path,
    model_title: &str,
) -> Result<ImportReport, BootstrapError> {
    let mut report = ImportReport::new("activity");
    let mut reader = TsvReader::open(path, ReadOptions::raw())?;
    let tx = store.transaction()?;
    let model = store::require_model(&tx, model_title)?;

    let header = reader
        .next_record()?
        .ok_or_else(|| reader.malformed_file("missing header line"))?;
    let mut seen = HashSet::new();
    let mut signature_ids = Vec::with_capacity(header.width().saturating_sub(1));
    for (offset, name) in header.fields.iter().skip(1).enumerate() {
        let column = offset + 2;
        let name = name.trim();
        if name.is_empty() {
            return Err(reader.malformed(1, format!("column #{column}: blank signature name")));
        }
        if !seen.insert(name) {
            return Err(reader.malformed(
                1,
                format!("column #{column}: duplicate signature ({name})"),
            ));
        }
        signature_ids.push(store::get_or_create_signature(&tx, name, model.id)?);
    }

    while let Some(record) = reader.next_record()? {
        let line = record.line;
        if record.fields.iter().all(|field| field.trim().is_empty()) {
            continue;
        }
        if record.width() != signature_ids.len() + 1 {
            return Err(reader.malformed(
                line,
                format!("incorrect number of columns ({})", record.width()),
            ));
        }
        let data_source = record.fields[0].trim();
        let Some(sample_id) = store::find_sample_by_data_source(&tx, data_source)? else {
            report.skip(format!(
                "line #{line} skipped: data source ({data_source}) not found in database"
            ));
            continue;
        };

        let mut values = Vec::with_capacity(signature_ids.len());
        for (offset, value) in record.fields[1..].iter().enumerate() {
            values.push(parse_float(&reader, line, offset + 2, value)?);
        }
        for (signature_id, value) in signature_ids.iter().zip(values) {
            tx.execute(
                "INSERT INTO activity (sample_id, signature_id, value) VALUES (?1, ?2, ?3)",
                params![sample_id, signature_id, value],
            )?;
        }
        report.inserted += 1;
    }
    tx.commit()?;
    Ok(report)
}

/// Gene weights of one node column, keyed by gene systematic name.
pub type NodeWeights = BTreeMap<String, f64>;

/// Reads a gene-by-node weight matrix into per-node columns.
///
/// A repeated node column or gene row replaces the earlier value.
pub fn read_weight_matrix(reader: &mut TsvReader) -> Result<BTreeMap<String, NodeWeights>, BootstrapError> {
    let header = reader
        .next_record()?
        .ok_or_else(|| reader.malformed_file("missing header line"))?;
    let nodes = header.fields[1..]
        .iter()
        .map(|node| node.trim().to_string())
        .collect::<Vec<_>>();
    let mut matrix: BTreeMap<String, NodeWeights> = nodes
        .iter()
        .map(|node| (node.clone(), NodeWeights::new()))
        .collect();

    while let Some(record) = reader.next_record()? {
        if record.fields.iter().all(|field| field.trim().is_empty()) {
            continue;
        }
        if record.width() != header.width() {
            return Err(reader.malformed(record.line, "incorrect number of columns"));
        }
        let gene = record.fields[0].trim();
        for (offset, (node, value)) in nodes.iter().zip(&record.fields[1..]).enumerate() {
            let weight = parse_float(reader, record.line, offset + 2, value)?;
            if let Some(column) = matrix.get_mut(node) {
                column.insert(gene.to_string(), weight);
            }
        }
    }
    Ok(matrix)
}

/// Splits each node's genes into `<node>pos` and `<node>neg` signatures.
pub fn find_heavy_genes(matrix: &BTreeMap<String, NodeWeights>) -> BTreeMap<String, Vec<(String, f64)>> {
    let mut heavy = BTreeMap::new();
    for (node, weights) in matrix {
        let mut positive = Vec::new();
        let mut negative = Vec::new();
        if let Some((mean, sd)) = mean_and_sample_sd(weights) {
            let upper = mean + HEAVY_GENE_SD * sd;
            let lower = mean - HEAVY_GENE_SD * sd;
            for (gene, weight) in weights {
                if *weight > upper {
                    positive.push((gene.clone(), *weight));
                } else if *weight < lower {
                    negative.push((gene.clone(), *weight));
                }
            }
        }
        heavy.insert(format!("{node}pos"), positive);
        heavy.insert(format!("{node}neg"), negative);
    }
    heavy
}

fn mean_and_sample_sd(weights: &NodeWeights) -> Option<(f64, f64)> {
    if weights.len() < 2 {
        return None;
    }
    let n = weights.len() as f64;
    let mean = weights.values().sum::<f64>() / n;
    let variance = weights.values().map(|w| (w - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some((mean, variance.sqrt()))
}

pub fn import_participation(
    store: &mut Store,
    path: &Utf8Path,
    model_title: &str,
    participation_type: &str,
) -> Result<ImportReport, BootstrapError> {
    let mut report = ImportReport::new("participation");
    let mut reader = TsvReader::open(path, ReadOptions::raw())?;
    let tx = store.transaction()?;
    let model = store::require_model(&tx, model_title)?;
    let type_id = store::require_participation_type(&tx, participation_type)?;

    let heavy = find_heavy_genes(&read_weight_matrix(&mut reader)?);
    let mut resolver = GeneResolver::new(Some(model.organism_id));

    for (signature, genes) in &heavy {
        let signature_id = store::find_signature(&tx, signature, model.id)?.ok_or_else(|| {
            BootstrapError::SignatureNotFound {
                signature: signature.clone(),
                model: model.title.clone(),
            }
        })?;
        for (gene_name, weight) in genes {
            let gene_id = match resolver.require(&tx, gene_name)? {
                Ok(id) => id,
                Err(reason) => {
                    report.skip(reason);
                    continue;
                }
            };
            let changed = tx.execute(
                "UPDATE participation SET weight = ?4
                 WHERE signature_id = ?1 AND gene_id = ?2 AND participation_type_id = ?3",
                params![signature_id, gene_id, type_id, weight],
            )?;
            if changed > 0 {
                report.updated += 1;
            } else {
                tx.execute(
                    "INSERT INTO participation (signature_id, gene_id, participation_type_id, weight)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![signature_id, gene_id, type_id, weight],
                )?;
                report.inserted += 1;
            }
        }
    }
    tx.commit()?;
    Ok(report)
}

/// Imports a gene-by-sample expression matrix for one organism.
pub fn import_expression(
    store: &mut Store,
    path: &Utf8Path,
    tax_id: TaxonomyId,
) -> Result<ImportReport, BootstrapError> {
    let mut report = ImportReport::new("expression");
    let mut reader = TsvReader::open(path, ReadOptions::raw())?;
    let tx = store.transaction()?;
    let organism_id = store::require_organism(&tx, tax_id)?;

    let header = reader
        .next_record()?
        .ok_or_else(|| reader.malformed_file("missing header line"))?;
    let mut seen = HashSet::new();
    let mut samples = Vec::with_capacity(header.width().saturating_sub(1));
    for (offset, data_source) in header.fields.iter().skip(1).enumerate() {
        let column = offset + 2;
        if data_source.trim().is_empty() {
            return Err(reader.malformed(1, format!("column #{column}: blank data_source")));
        }
        if !seen.insert(data_source.as_str()) {
            return Err(reader.malformed(
                1,
                format!("column #{column}: duplicate data source ({data_source})"),
            ));
        }
        let sample = store::find_sample_by_data_source(&tx, data_source)?;
        if sample.is_none() {
            report.note(format!(
                "line #1: data_source in column #{column} not found in the database: {data_source}"
            ));
        }
        samples.push(sample);
    }

    let mut resolver = GeneResolver::new(Some(organism_id));
    while let Some(record) = reader.next_record()? {
        let line = record.line;
        if record.width() != samples.len() + 1 {
            return Err(reader.malformed(
                line,
                format!("incorrect number of columns ({})", record.width()),
            ));
        }
        let gene_name = record.fields[0].as_str();
        if gene_name.trim().is_empty() {
            return Err(reader.malformed(line, "gene name (column #1) is blank"));
        }
        let gene_id = match resolver.resolve(&tx, gene_name)? {
            GeneMatch::Unique(id) => id,
            GeneMatch::Missing => {
                report.skip(format!(
                    "line #{line}: gene name {gene_name} (column #1) not found in database"
                ));
                continue;
            }
            GeneMatch::Ambiguous => {
                return Err(reader.malformed(
                    line,
                    format!("gene name {gene_name} (column #1) matches multiple genes in the database"),
                ));
            }
        };

        for (offset, (sample, value)) in samples.iter().zip(&record.fields[1..]).enumerate() {
            let value = parse_float(&reader, line, offset + 2, value)?;
            if let Some(sample_id) = sample {
                tx.execute(
                    "INSERT INTO expression_value (sample_id, gene_id, value) VALUES (?1, ?2, ?3)",
                    params![sample_id, gene_id, value],
                )?;
                report.inserted += 1;
            }
        }
    }
    tx.commit()?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn single_outlier_is_a_positive_heavy_gene() {
        let mut text = String::from("gene\tNode1\n");
        for index in 0..9 {
            text.push_str(&format!("PA000{index}\t0.0\n"));
        }
        text.push_str("PA0009\t1.0\n");
        let mut reader =
            TsvReader::from_reader("inline", Cursor::new(text.into_bytes()), ReadOptions::raw());

        let heavy = find_heavy_genes(&read_weight_matrix(&mut reader).unwrap());
        assert_eq!(heavy["Node1pos"], vec![("PA0009".to_string(), 1.0)]);
        assert!(heavy["Node1neg"].is_empty());
    }

    #[test]
    fn constant_column_has_no_heavy_genes() {
        let mut matrix = BTreeMap::new();
        matrix.insert(
            "Node2".to_string(),
            NodeWeights::from([
                ("A".to_string(), 0.5),
                ("B".to_string(), 0.5),
                ("C".to_string(), 0.5),
            ]),
        );
        let heavy = find_heavy_genes(&matrix);
        assert!(heavy["Node2pos"].is_empty());
        assert!(heavy["Node2neg"].is_empty());
    }

    #[test]
    fn repeated_gene_rows_and_node_columns_replace_earlier_values() {
        let text = "gene\tNode1\tNode1\nPA0001\t0.1\t0.2\nPA0002\t0.3\t0.4\nPA0001\t0.5\t0.6\n";
        let mut reader = TsvReader::from_reader(
            "inline",
            Cursor::new(text.as_bytes().to_vec()),
            ReadOptions::raw(),
        );
        let matrix = read_weight_matrix(&mut reader).unwrap();
        assert_eq!(matrix.len(), 1);
        assert_eq!(
            matrix["Node1"],
            NodeWeights::from([("PA0001".to_string(), 0.6), ("PA0002".to_string(), 0.4)])
        );
    }

    #[test]
    fn weight_matrix_rejects_ragged_rows() {
        let text = "gene\tNode1\tNode2\nPA0001\t0.1\n";
        let mut reader = TsvReader::from_reader(
            "inline",
            Cursor::new(text.as_bytes().to_vec()),
            ReadOptions::raw(),
        );
        let err = read_weight_matrix(&mut reader).unwrap_err();
        assert!(matches!(err, BootstrapError::MalformedRow { line: 2, .. }));
    }
}
