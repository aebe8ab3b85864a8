//! Experiments, samples and their annotations.

use std::collections::{BTreeSet, HashMap};
use std::sync::OnceLock;

use camino::Utf8Path;
use regex::Regex;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{info, warn};

use crate::domain::{ExperimentAccession, required_text};
use crate::error::BootstrapError;
use crate::report::ImportReport;
use crate::store::{self, Store};
use crate::tsv::{ReadOptions, TsvReader};

const ACCESSION_COLUMN: &str = "accession";
const SAMPLE_COLUMN: &str = "sample";
const CEL_FILE_COLUMN: &str = "cel_file";
const IGNORED_COLUMNS: &[&str] = &["expt_summary"];

/// Imports `accession \t name \t description` rows after a header line.
pub fn import_experiments(store: &mut Store, path: &Utf8Path) -> Result<ImportReport, BootstrapError> {
    let mut report = ImportReport::new("experiments");
    let mut reader = TsvReader::open(path, ReadOptions::raw())?;
    if reader.next_record()?.is_none() {
        return Err(reader.malformed_file("missing header line"));
    }

    let tx = store.transaction()?;
    while let Some(record) = reader.next_record()? {
        if record.fields.iter().all(|field| field.trim().is_empty()) {
            continue;
        }
        if record.width() != 3 {
            return Err(reader.malformed(
                record.line,
                format!("need three fields but {} is found", record.width()),
            ));
        }
        let accession: ExperimentAccession = record.fields[0].parse()?;
        let name = required_text("experiment name", &record.fields[1])?;
        let description = record.fields[2].trim();

        match store::find_experiment(&tx, accession.as_str())? {
            Some(id) => {
                tx.execute(
                    "UPDATE experiment SET name = ?1, description = ?2 WHERE id = ?3",
                    params![name, description, id],
                )?;
                report.updated += 1;
            }
            None => {
                tx.execute(
                    "INSERT INTO experiment (accession, name, description) VALUES (?1, ?2, ?3)",
                    params![accession.as_str(), name, description],
                )?;
                report.created += 1;
            }
        }
    }
    tx.commit()?;
    Ok(report)
}

/// How an incoming annotation value combines with the stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnotationMerge {
    Keep,
    Replace,
    Conflict,
}

pub fn merge_annotation(existing: &str, incoming: &str) -> AnnotationMerge {
    if incoming.is_empty() || existing == incoming {
        return AnnotationMerge::Keep;
    }
    if existing.is_empty() {
        return AnnotationMerge::Replace;
    }
    let existing_lower = existing.to_lowercase();
    let incoming_lower = incoming.to_lowercase();
    if existing_lower == incoming_lower || existing_lower.starts_with(&incoming_lower) {
        AnnotationMerge::Keep
    } else if incoming_lower.starts_with(&existing_lower) {
        AnnotationMerge::Replace
    } else {
        AnnotationMerge::Conflict
    }
}

fn annotation_typename_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"))
}

struct SpreadsheetLayout {
    accession: usize,
    sample: usize,
    cel_file: usize,
    annotations: Vec<(String, usize)>,
    width: usize,
}

impl SpreadsheetLayout {
    fn from_header(reader: &TsvReader, header: &[String]) -> Result<Self, BootstrapError> {
        let names = header
            .iter()
            .map(|name| name.trim().to_lowercase())
            .collect::<Vec<_>>();
        let position = |column: &str| {
            names
                .iter()
                .position(|name| name == column)
                .ok_or_else(|| reader.malformed_file(format!("header has no `{column}` column")))
        };
        let accession = position(ACCESSION_COLUMN)?;
        let sample = position(SAMPLE_COLUMN)?;
        let cel_file = position(CEL_FILE_COLUMN)?;

        let mut annotations = Vec::new();
        for (index, name) in names.iter().enumerate() {
            if [accession, sample, cel_file].contains(&index) || IGNORED_COLUMNS.contains(&name.as_str()) {
                continue;
            }
            if !annotation_typename_pattern().is_match(name) {
                return Err(reader.malformed_file(format!(
                    "annotation column `{name}` is not a valid identifier"
                )));
            }
            annotations.push((name.clone(), index));
        }
        Ok(Self {
            accession,
            sample,
            cel_file,
            annotations,
            width: names.len(),
        })
    }
}

struct SpreadsheetRow {
    accession: String,
    sample: String,
    data_source: Option<String>,
    annotations: Vec<(String, String)>,
}

fn read_spreadsheet(path: &Utf8Path) -> Result<Vec<SpreadsheetRow>, BootstrapError> {
    let mut reader = TsvReader::open(path, ReadOptions::raw())?;
    let header = reader
        .next_record()?
        .ok_or_else(|| reader.malformed_file("missing header line"))?;
    let layout = SpreadsheetLayout::from_header(&reader, &header.fields)?;

    let mut rows = Vec::new();
    while let Some(record) = reader.next_record()? {
        if record.fields.iter().all(|field| field.trim().is_empty()) {
            continue;
        }
        if record.width() != layout.width {
            return Err(reader.malformed(
                record.line,
                format!("wrong number of columns: expected {}, found {}", layout.width, record.width()),
            ));
        }
        let cel_file = record.fields[layout.cel_file].trim();
        rows.push(SpreadsheetRow {
            accession: record.fields[layout.accession].trim().to_string(),
            sample: record.fields[layout.sample].trim().to_string(),
            data_source: (!cel_file.is_empty()).then(|| cel_file.to_string()),
            annotations: layout
                .annotations
                .iter()
                .map(|(name, index)| (name.clone(), record.fields[*index].trim().to_string()))
                .collect(),
        });
    }
    Ok(rows)
}

/// Imports the annotated sample spreadsheet.
///
/// Every referenced experiment must already exist. A sample appearing in
/// several experiments is created once; its annotations are merged with
/// [`merge_annotation`] and any unresolvable difference fails the import.
pub fn import_samples(store: &mut Store, path: &Utf8Path) -> Result<ImportReport, BootstrapError> {
    let rows = read_spreadsheet(path)?;
    let tx = store.transaction()?;

    let mut experiment_ids = HashMap::new();
    let mut missing = BTreeSet::new();
    for row in &rows {
        if experiment_ids.contains_key(&row.accession) {
            continue;
        }
        match store::find_experiment(&tx, &row.accession)? {
            Some(id) => {
                experiment_ids.insert(row.accession.clone(), id);
            }
            None => {
                missing.insert(row.accession.clone());
            }
        }
    }
    if !missing.is_empty() {
        return Err(BootstrapError::ExperimentsNotFound(
            missing.into_iter().collect::<Vec<_>>().join(", "),
        ));
    }

    let mut report = ImportReport::new("samples");
    let mut annotation_types = HashMap::new();
    let mut mismatches: BTreeSet<(String, String)> = BTreeSet::new();

    for row in &rows {
        let experiment_id = experiment_ids[&row.accession];
        let (sample_id, created) = get_or_create_sample(&tx, &row.sample, row.data_source.as_deref())?;
        report.inserted += tx.execute(
            "INSERT OR IGNORE INTO experiment_sample (experiment_id, sample_id) VALUES (?1, ?2)",
            params![experiment_id, sample_id],
        )?;

        if created {
            report.created += 1;
            for (typename, text) in &row.annotations {
                if text.is_empty() {
                    continue;
                }
                let type_id = annotation_type_id(&tx, &mut annotation_types, typename)?;
                set_annotation(&tx, type_id, sample_id, text)?;
            }
            continue;
        }

        let existing = annotations_of(&tx, sample_id)?;
        let mut conflicting = Vec::new();
        for (typename, text) in &row.annotations {
            let current = existing.get(typename).map(String::as_str).unwrap_or("");
            match merge_annotation(current, text) {
                AnnotationMerge::Keep => {}
                AnnotationMerge::Replace => {
                    let type_id = annotation_type_id(&tx, &mut annotation_types, typename)?;
                    set_annotation(&tx, type_id, sample_id, text)?;
                    report.updated += 1;
                }
                AnnotationMerge::Conflict => conflicting.push(typename.as_str()),
            }
        }
        if !conflicting.is_empty() {
            warn!(
                sample = %row.sample,
                experiment = %row.accession,
                "sample annotations do not match an earlier experiment (check fields: {})",
                conflicting.join(", ")
            );
            mismatches.insert((row.sample.clone(), row.accession.clone()));
        }
    }

    if !mismatches.is_empty() {
        return Err(BootstrapError::AnnotationMismatch(mismatches.len()));
    }
    tx.commit()?;
    info!(samples = report.created, links = report.inserted, "experiments and samples imported");
    Ok(report)
}

fn get_or_create_sample(
    conn: &Connection,
    name: &str,
    data_source: Option<&str>,
) -> Result<(i64, bool), BootstrapError> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM sample WHERE name = ?1 AND ml_data_source IS ?2",
            params![name, data_source],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(id) = existing {
        return Ok((id, false));
    }
    conn.execute(
        "INSERT INTO sample (name, ml_data_source) VALUES (?1, ?2)",
        params![name, data_source],
    )?;
    Ok((conn.last_insert_rowid(), true))
}

fn annotation_type_id(
    conn: &Connection,
    cache: &mut HashMap<String, i64>,
    typename: &str,
) -> Result<i64, BootstrapError> {
    if let Some(id) = cache.get(typename) {
        return Ok(*id);
    }
    conn.execute(
        "INSERT OR IGNORE INTO annotation_type (typename) VALUES (?1)",
        params![typename],
    )?;
    let id: i64 = conn.query_row(
        "SELECT id FROM annotation_type WHERE typename = ?1",
        params![typename],
        |row| row.get(0),
    )?;
    cache.insert(typename.to_string(), id);
    Ok(id)
}

fn set_annotation(conn: &Connection, type_id: i64, sample_id: i64, text: &str) -> Result<(), BootstrapError> {
    conn.execute(
        "INSERT INTO sample_annotation (annotation_type_id, sample_id, text) VALUES (?1, ?2, ?3)
         ON CONFLICT (annotation_type_id, sample_id) DO UPDATE SET text = excluded.text",
        params![type_id, sample_id, text],
    )?;
    Ok(())
}

fn annotations_of(conn: &Connection, sample_id: i64) -> Result<HashMap<String, String>, BootstrapError> {
    let mut stmt = conn.prepare_cached(
        "SELECT t.typename, a.text FROM sample_annotation a
         JOIN annotation_type t ON t.id = a.annotation_type_id
         WHERE a.sample_id = ?1",
    )?;
    let pairs = stmt
        .query_map(params![sample_id], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<HashMap<_, _>, _>>()?;
    Ok(pairs)
}

/// Rebuilds every experiment's `samples_info` search text.
pub fn set_samples_info(store: &mut Store) -> Result<ImportReport, BootstrapError> {
    let mut report = ImportReport::new("samples-info");
    let tx = store.transaction()?;

    let mut sample_info: HashMap<i64, Vec<String>> = HashMap::new();
    {
        let mut stmt = tx.prepare("SELECT id, name, ml_data_source FROM sample ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, Option<String>>(2)?))
        })?;
        for row in rows {
            let (id, name, data_source) = row?;
            let mut parts = vec![name];
            parts.extend(data_source.filter(|value| !value.is_empty()));
            sample_info.insert(id, parts);
        }

        let mut stmt = tx.prepare(
            "SELECT sample_id, text FROM sample_annotation WHERE text != '' ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?;
        for row in rows {
            let (sample_id, text) = row?;
            if let Some(parts) = sample_info.get_mut(&sample_id) {
                parts.push(text);
            }
        }
    }

    let experiments = {
        let mut stmt = tx.prepare("SELECT id FROM experiment ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        ids
    };
    for experiment_id in experiments {
        let sample_ids = {
            let mut stmt = tx.prepare_cached(
                "SELECT sample_id FROM experiment_sample WHERE experiment_id = ?1 ORDER BY sample_id",
            )?;
            let ids = stmt
                .query_map(params![experiment_id], |row| row.get::<_, i64>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            ids
        };
        let mut text = String::new();
        for sample_id in sample_ids {
            if let Some(parts) = sample_info.get(&sample_id) {
                text.push_str(&parts.join("\n"));
                text.push('\n');
            }
        }
        tx.execute(
            "UPDATE experiment SET samples_info = ?1 WHERE id = ?2",
            params![text, experiment_id],
        )?;
        report.updated += 1;
    }
    tx.commit()?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use assert_matches::assert_matches;
    use camino::Utf8PathBuf;

    use super::*;

    fn write(dir: &tempfile::TempDir, name: &str, content: &str) -> Utf8PathBuf {
        let path = Utf8PathBuf::from_path_buf(dir.path().join(name)).unwrap();
        fs::write(path.as_std_path(), content).unwrap();
        path
    }

    #[test]
    fn merge_rules() {
        assert_eq!(merge_annotation("PAO1", ""), AnnotationMerge::Keep);
        assert_eq!(merge_annotation("", "PAO1"), AnnotationMerge::Replace);
        assert_eq!(merge_annotation("pao1", "PAO1"), AnnotationMerge::Keep);
        assert_eq!(merge_annotation("LB medium, 37C", "LB medium"), AnnotationMerge::Keep);
        assert_eq!(merge_annotation("LB medium", "LB medium, 37C"), AnnotationMerge::Replace);
        assert_eq!(merge_annotation("PAO1", "PA14"), AnnotationMerge::Conflict);
    }

    #[test]
    fn shared_sample_merges_annotations() {
        let temp = tempfile::tempdir().unwrap();
        let experiments = write(
            &temp,
            "experiments.tsv",
            "accession\tname\tdescription\nE-GEOD-1\tFirst\tone\nE-GEOD-2\tSecond\ttwo\n",
        );
        let sheet = write(
            &temp,
            "annotations.tsv",
            "accession\tsample\tcel_file\tstrain\tmedium\texpt_summary\n\
             E-GEOD-1\tGSM1\tGSM1.CEL\tPAO1\t\tsummary\n\
             E-GEOD-2\tGSM1\tGSM1.CEL\tpao1\tLB\tsummary\n",
        );
        let mut store = Store::open_in_memory().unwrap();
        import_experiments(&mut store, &experiments).unwrap();
        let report = import_samples(&mut store, &sheet).unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(report.inserted, 2);
        assert_eq!(store.count_rows("sample_annotation").unwrap(), 2);

        set_samples_info(&mut store).unwrap();
        let info: String = store
            .connection()
            .query_row("SELECT samples_info FROM experiment WHERE accession = 'E-GEOD-2'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(info, "GSM1\nGSM1.CEL\nPAO1\nLB\n");
    }

    #[test]
    fn conflicting_annotations_fail_import() {
        let temp = tempfile::tempdir().unwrap();
        let experiments = write(&temp, "e.tsv", "h\th\th\nE-1\tA\ta\nE-2\tB\tb\n");
        let sheet = write(
            &temp,
            "s.tsv",
            "accession\tsample\tcel_file\tstrain\nE-1\tS1\tS1.CEL\tPAO1\nE-2\tS1\tS1.CEL\tPA14\n",
        );
        let mut store = Store::open_in_memory().unwrap();
        import_experiments(&mut store, &experiments).unwrap();
        let err = import_samples(&mut store, &sheet).unwrap_err();
        assert_matches!(err, BootstrapError::AnnotationMismatch(1));
        assert_eq!(store.count_rows("sample").unwrap(), 0);
    }

    #[test]
    fn unknown_experiment_fails_before_writing() {
        let temp = tempfile::tempdir().unwrap();
        let sheet = write(&temp, "s.tsv", "accession\tsample\tcel_file\nE-9\tS1\t\n");
        let mut store = Store::open_in_memory().unwrap();
        let err = import_samples(&mut store, &sheet).unwrap_err();
        assert_matches!(err, BootstrapError::ExperimentsNotFound(ref list) if list == "E-9");
        assert_eq!(store.count_rows("sample").unwrap(), 0);
    }
}
