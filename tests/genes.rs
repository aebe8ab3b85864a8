use std::fs;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use rusqlite::params;

use adage_bootstrap::domain::TaxonomyId;
use adage_bootstrap::entities::{OrganismInput, XrdbInput, upsert_organism, upsert_xrdb};
use adage_bootstrap::error::BootstrapError;
use adage_bootstrap::genes::{
    GeneHistoryOptions, GeneInfoOptions, add_gene_aliases, import_gene_history, import_gene_info,
    update_gene_names,
};
use adage_bootstrap::store::Store;

const PAO1: u32 = 208964;

fn tax_id() -> TaxonomyId {
    TaxonomyId::new(PAO1).unwrap()
}

fn write(dir: &tempfile::TempDir, name: &str, content: &str) -> Utf8PathBuf {
    let path = Utf8PathBuf::from_path_buf(dir.path().join(name)).unwrap();
    fs::write(path.as_std_path(), content).unwrap();
    path
}

fn store_with_organism() -> Store {
    let store = Store::open_in_memory().unwrap();
    upsert_organism(
        store.connection(),
        &OrganismInput {
            tax_id: tax_id(),
            common_name: "Pseudomonas aeruginosa".to_string(),
            scientific_name: "Pseudomonas aeruginosa PAO1".to_string(),
            url_template: None,
        },
    )
    .unwrap();
    upsert_xrdb(
        store.connection(),
        &XrdbInput {
            name: "PseudoCap".to_string(),
            url: "http://www.pseudomonas.com/feature/show/?locus_tag=_REPL_".to_string(),
        },
    )
    .unwrap();
    store
}

fn gene_info(count: usize) -> String {
    let mut text = String::from(
        "#tax_id\tGeneID\tSymbol\tLocusTag\tSynonyms\tdbXrefs\tchromosome\tmap_location\tdescription\ttype_of_gene\n",
    );
    for index in 1..=count {
        text.push_str(&format!(
            "{PAO1}\t{}\tgene{index}\tPA{index:04}\t-\tPseudoCap:PA{index:04}|UniProtKB:Q{index:05}\t-\t-\tprotein {index}\tprotein-coding\n",
            878400 + index
        ));
    }
    text.push_str(&format!("{PAO1}\t999999\tNEWENTRY\t-\t-\t-\t-\t-\tRecord to support submission\tother\n"));
    text.push_str("287\t12345\tother\tPA14_0001\t-\t-\t-\t-\tother strain\tprotein-coding\n");
    text
}

fn obsolete(store: &Store, systematic_name: &str) -> bool {
    store
        .connection()
        .query_row(
            "SELECT obsolete FROM gene WHERE systematic_name = ?1",
            params![systematic_name],
            |row| row.get(0),
        )
        .unwrap()
}

#[test]
fn gene_info_marks_absent_genes_obsolete_and_revives_them() {
    let temp = tempfile::tempdir().unwrap();
    let full = write(&temp, "full.gene_info", &gene_info(12));
    let partial = write(&temp, "partial.gene_info", &gene_info(11));
    let mut store = store_with_organism();
    let options = GeneInfoOptions::new(tax_id());

    let first = import_gene_info(&mut store, &full, &options).unwrap();
    assert_eq!(first.created, 12);
    assert_eq!(store.count_rows("gene").unwrap(), 12);
    assert_eq!(store.count_rows("cross_ref").unwrap(), 12);
    assert_eq!(first.warnings.len(), 12);

    let second = import_gene_info(&mut store, &partial, &options).unwrap();
    assert_eq!(second.created, 0);
    assert_eq!(second.updated, 1);
    assert!(obsolete(&store, "PA0012"));

    let third = import_gene_info(&mut store, &full, &options).unwrap();
    assert_eq!(third.updated, 1);
    assert!(!obsolete(&store, "PA0012"));
    assert_eq!(store.count_rows("gene").unwrap(), 12);
}

#[test]
fn gene_info_requires_enough_organism_lines() {
    let temp = tempfile::tempdir().unwrap();
    let path = write(&temp, "short.gene_info", &gene_info(9));
    let mut store = store_with_organism();
    let err = import_gene_info(&mut store, &path, &GeneInfoOptions::new(tax_id())).unwrap_err();
    assert_matches!(err, BootstrapError::MalformedFile { .. });
    assert_eq!(store.count_rows("gene").unwrap(), 0);
}

#[test]
fn gene_info_requires_known_organism() {
    let temp = tempfile::tempdir().unwrap();
    let path = write(&temp, "genes.gene_info", &gene_info(12));
    let mut store = Store::open_in_memory().unwrap();
    let err = import_gene_info(&mut store, &path, &GeneInfoOptions::new(tax_id())).unwrap_err();
    assert_matches!(err, BootstrapError::OrganismNotFound(PAO1));
}

#[test]
fn gene_history_flags_and_creates_obsolete_genes() {
    let temp = tempfile::tempdir().unwrap();
    let info = write(&temp, "genes.gene_info", &gene_info(10));
    let history = write(
        &temp,
        "gene_history",
        &format!(
            "#tax_id\tGeneID\tDiscontinued_GeneID\tDiscontinued_Symbol\tDiscontinue_Date\n\
             {PAO1}\t-\t878401\tgene1\t20160101\n\
             {PAO1}\t-\t5550001\tPA9999\t20160101\n\
             287\t-\t5550002\tPA14_9999\t20160101\n"
        ),
    );
    let mut store = store_with_organism();
    import_gene_info(&mut store, &info, &GeneInfoOptions::new(tax_id())).unwrap();

    let report = import_gene_history(&mut store, &history, &GeneHistoryOptions::new(tax_id())).unwrap();
    assert_eq!(report.updated, 1);
    assert_eq!(report.created, 1);
    assert!(obsolete(&store, "PA0001"));
    assert!(obsolete(&store, "PA9999"));
    assert_eq!(store.count_rows("gene").unwrap(), 11);
}

#[test]
fn gene_history_reports_out_of_range_column() {
    let temp = tempfile::tempdir().unwrap();
    let history = write(&temp, "gene_history", &format!("{PAO1}\t-\t878401\n"));
    let mut store = store_with_organism();
    let err = import_gene_history(&mut store, &history, &GeneHistoryOptions::new(tax_id())).unwrap_err();
    assert_matches!(err, BootstrapError::MalformedRow { line: 1, .. });

    let mut options = GeneHistoryOptions::new(tax_id());
    options.tax_id_col = 0;
    let err = import_gene_history(&mut store, &history, &options).unwrap_err();
    assert_matches!(err, BootstrapError::InvalidArgument(_));
}

#[test]
fn gene_names_update_create_and_skip_ambiguous() {
    let temp = tempfile::tempdir().unwrap();
    let names = write(
        &temp,
        "names.tsv",
        "# systematic\tstandard\taliases\nPA0001\tdnaA\t\nPA0500\trpoB\trpoB1\nPA0002\t\tdnaN1\n",
    );
    let mut store = store_with_organism();
    {
        let conn = store.connection();
        conn.execute(
            "INSERT INTO gene (organism_id, systematic_name, standard_name)
             VALUES (1, 'PA0001', 'old'), (1, 'PA0002', 'dnaN'), (1, 'PA0002', 'dup')",
            [],
        )
        .unwrap();
    }

    let report = update_gene_names(&mut store, &names, tax_id()).unwrap();
    assert_eq!(report.created, 1);
    assert_eq!(report.updated, 1);
    assert_eq!(report.skipped, 1);

    let standard: String = store
        .connection()
        .query_row("SELECT standard_name FROM gene WHERE systematic_name = 'PA0001'", [], |row| {
            row.get(0)
        })
        .unwrap();
    assert_eq!(standard, "dnaA");
}

#[test]
fn gene_names_require_three_columns() {
    let temp = tempfile::tempdir().unwrap();
    let names = write(&temp, "names.tsv", "PA0001\tdnaA\n");
    let mut store = store_with_organism();
    let err = update_gene_names(&mut store, &names, tax_id()).unwrap_err();
    assert_matches!(err, BootstrapError::MalformedRow { line: 1, .. });
}

#[test]
fn gene_alias_is_appended_once() {
    let temp = tempfile::tempdir().unwrap();
    let aliases = write(&temp, "aliases.tsv", "PA0001\tdnaA1\nPA0001\tdnaA1\nPA7777\tghost\n");
    let mut store = store_with_organism();
    store
        .connection()
        .execute(
            "INSERT INTO gene (organism_id, systematic_name, aliases) VALUES (1, 'PA0001', 'dnaA0')",
            [],
        )
        .unwrap();

    let report = add_gene_aliases(&mut store, &aliases).unwrap();
    assert_eq!(report.updated, 1);
    assert_eq!(report.skipped, 1);
    let value: String = store
        .connection()
        .query_row("SELECT aliases FROM gene WHERE systematic_name = 'PA0001'", [], |row| row.get(0))
        .unwrap();
    assert_eq!(value, "dnaA0 dnaA1");
}
