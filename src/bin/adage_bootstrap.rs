use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use adage_bootstrap::app::{App, BootstrapResult, ProgressSinkKind, StepStatus};
use adage_bootstrap::config::{ConfigLoader, DeployConfig};
use adage_bootstrap::deploy::{self, SystemRunner};
use adage_bootstrap::domain::TaxonomyId;
use adage_bootstrap::entities::{
    self, ModelDefinition, OrganismInput, ParticipationTypeInput, UpsertResult, XrdbInput,
};
use adage_bootstrap::error::BootstrapError;
use adage_bootstrap::genes::{self, GeneHistoryOptions, GeneInfoOptions};
use adage_bootstrap::output::{JsonOutput, OutputMode};
use adage_bootstrap::report::ImportReport;
use adage_bootstrap::store::Store;
use adage_bootstrap::tui::Tui;
use adage_bootstrap::{relations, samples, search};

#[derive(Parser)]
#[command(name = "adage-bootstrap")]
#[command(about = "Bootstrap the ADAGE database from flat files and set up its process environment")]
#[command(version, author)]
struct Cli {
    /// SQLite database file (defaults to the platform data directory)
    #[arg(long, global = true, env = "ADAGE_DATABASE")]
    database: Option<String>,

    #[arg(long, global = true)]
    non_interactive: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Create or update an organism")]
    Organism(OrganismArgs),
    #[command(about = "Create or update a cross-reference database")]
    Xrdb(XrdbArgs),
    #[command(about = "Import an NCBI gene_info file")]
    GeneInfo(GeneInfoArgs),
    #[command(about = "Import an NCBI gene_history file")]
    GeneHistory(GeneHistoryArgs),
    #[command(about = "Update gene standard names and aliases")]
    GeneNames(GeneNamesArgs),
    #[command(about = "Append gene aliases")]
    GeneAliases(FileArg),
    #[command(about = "Create or update an ML model from a YAML definition")]
    MlModel(FileArg),
    #[command(about = "Create or update a participation type")]
    ParticipationType(ParticipationTypeArgs),
    #[command(about = "Import experiments")]
    Experiments(FileArg),
    #[command(about = "Import samples and annotations from the annotation spreadsheet")]
    Samples(FileArg),
    #[command(about = "Rebuild each experiment's samples_info search text")]
    SamplesInfo,
    #[command(about = "Import sample-signature activity")]
    Activity(ModelFileArgs),
    #[command(about = "Import a gene-gene network")]
    GeneNetwork(ModelFileArgs),
    #[command(about = "Import gene-signature participation from a weight matrix")]
    Participation(ParticipationArgs),
    #[command(about = "Import gene-sample expression values")]
    Expression(ExpressionArgs),
    #[command(about = "Create trigram search indexes")]
    SearchIndex(SearchIndexArgs),
    #[command(about = "Search genes by name, alias or description")]
    Search(SearchArgs),
    #[command(about = "Run every step of the bootstrap plan")]
    Bootstrap(ConfigArg),
    #[command(about = "Install service configs, restart services and request a TLS certificate")]
    Deploy(DeployArgs),
}

#[derive(Args)]
struct OrganismArgs {
    #[arg(long)]
    tax_id: TaxonomyId,
    #[arg(long)]
    common_name: String,
    #[arg(long)]
    scientific_name: String,
    #[arg(long)]
    url_template: Option<String>,
}

#[derive(Args)]
struct XrdbArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    url: String,
}

#[derive(Args)]
struct GeneInfoArgs {
    file: Utf8PathBuf,
    #[arg(long)]
    tax_id: TaxonomyId,
    #[arg(long)]
    gi_tax_id: Option<TaxonomyId>,
    #[arg(long, default_value_t = 2)]
    symbol_col: usize,
    #[arg(long, default_value_t = 3)]
    systematic_col: usize,
    #[arg(long, default_value_t = 4)]
    alias_col: usize,
    /// Also record the systematic name as a cross reference in this xrdb
    #[arg(long)]
    put_systematic_in_xrdb: Option<String>,
}

#[derive(Args)]
struct GeneHistoryArgs {
    file: Utf8PathBuf,
    #[arg(long)]
    tax_id: TaxonomyId,
    #[arg(long, default_value_t = 1)]
    tax_id_col: usize,
    #[arg(long, default_value_t = 3)]
    discontinued_id_col: usize,
    #[arg(long, default_value_t = 4)]
    discontinued_symbol_col: usize,
}

#[derive(Args)]
struct GeneNamesArgs {
    file: Utf8PathBuf,
    #[arg(long)]
    tax_id: TaxonomyId,
}

#[derive(Args)]
struct FileArg {
    file: Utf8PathBuf,
}

#[derive(Args)]
struct ParticipationTypeArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    desc: String,
}

#[derive(Args)]
struct ModelFileArgs {
    #[arg(long)]
    file: Utf8PathBuf,
    #[arg(long)]
    ml_model: String,
}

#[derive(Args)]
struct ParticipationArgs {
    #[arg(long)]
    file: Utf8PathBuf,
    #[arg(long)]
    ml_model: String,
    #[arg(long)]
    participation_type: String,
}

#[derive(Args)]
struct ExpressionArgs {
    #[arg(long)]
    file: Utf8PathBuf,
    #[arg(long)]
    tax_id: TaxonomyId,
}

#[derive(Args)]
struct SearchIndexArgs {
    /// Print the PostgreSQL pg_trgm script instead of indexing SQLite
    #[arg(long)]
    postgres: bool,
}

#[derive(Args)]
struct SearchArgs {
    term: String,
    #[arg(long, default_value_t = 20)]
    limit: usize,
}

#[derive(Args)]
struct ConfigArg {
    #[arg(long)]
    config: Option<String>,
}

#[derive(Args)]
struct DeployArgs {
    #[arg(long)]
    config: Option<String>,
    #[arg(long)]
    dry_run: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<BootstrapError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &BootstrapError) -> u8 {
    match error {
        BootstrapError::MissingConfig
        | BootstrapError::MissingDeployFile(_)
        | BootstrapError::OrganismNotFound(_)
        | BootstrapError::ModelNotFound(_)
        | BootstrapError::ParticipationTypeNotFound(_)
        | BootstrapError::SignatureNotFound { .. }
        | BootstrapError::ExperimentsNotFound(_) => 2,
        BootstrapError::MissingTool(_) | BootstrapError::CommandFailed(_) => 3,
        BootstrapError::MalformedRow { .. }
        | BootstrapError::MalformedFile { .. }
        | BootstrapError::AnnotationMismatch(_)
        | BootstrapError::ModelDefinition { .. }
        | BootstrapError::InvalidTaxonomyId(_)
        | BootstrapError::InvalidAccession(_)
        | BootstrapError::ConfigParse(_) => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };
    let database = cli.database.map(Utf8PathBuf::from);

    match cli.command {
        Commands::Bootstrap(args) => run_bootstrap(args, database, output_mode),
        Commands::Deploy(args) => run_deploy(args, output_mode),
        Commands::SearchIndex(SearchIndexArgs { postgres: true }) => {
            print!("{}", search::postgres_script());
            Ok(())
        }
        command => {
            let store = open_store(database)?;
            run_operation(command, App::new(store), output_mode)
        }
    }
}

fn open_store(database: Option<Utf8PathBuf>) -> miette::Result<Store> {
    let path = match database {
        Some(path) => path,
        None => Store::default_path()?,
    };
    Ok(Store::open(&path)?)
}

fn run_operation(command: Commands, mut app: App, output_mode: OutputMode) -> miette::Result<()> {
    let sink = JsonOutput;
    let outcome = match command {
        Commands::Organism(args) => {
            let input = OrganismInput {
                tax_id: args.tax_id,
                common_name: args.common_name,
                scientific_name: args.scientific_name,
                url_template: args.url_template,
            };
            Outcome::Upsert(app.run_operation("organism", &sink, |store| {
                entities::upsert_organism(store.connection(), &input)
            })?)
        }
        Commands::Xrdb(args) => {
            let input = XrdbInput {
                name: args.name,
                url: args.url,
            };
            Outcome::Upsert(app.run_operation("xrdb", &sink, |store| {
                entities::upsert_xrdb(store.connection(), &input)
            })?)
        }
        Commands::ParticipationType(args) => {
            let input = ParticipationTypeInput {
                name: args.name,
                description: args.desc,
            };
            Outcome::Upsert(app.run_operation("participation-type", &sink, |store| {
                entities::upsert_participation_type(store.connection(), &input)
            })?)
        }
        Commands::MlModel(args) => {
            let definition = ModelDefinition::load(&args.file)?;
            Outcome::Upsert(app.run_operation("ml-model", &sink, |store| {
                entities::upsert_model(store.connection(), &definition)
            })?)
        }
        Commands::GeneInfo(args) => {
            let options = GeneInfoOptions {
                tax_id: args.tax_id,
                gi_tax_id: args.gi_tax_id,
                symbol_col: args.symbol_col,
                systematic_col: args.systematic_col,
                alias_col: args.alias_col,
                systematic_xrdb: args.put_systematic_in_xrdb,
            };
            Outcome::Import(app.run_operation("gene-info", &sink, |store| {
                genes::import_gene_info(store, &args.file, &options)
            })?)
        }
        Commands::GeneHistory(args) => {
            let options = GeneHistoryOptions {
                tax_id: args.tax_id,
                tax_id_col: args.tax_id_col,
                discontinued_id_col: args.discontinued_id_col,
                discontinued_symbol_col: args.discontinued_symbol_col,
            };
            Outcome::Import(app.run_operation("gene-history", &sink, |store| {
                genes::import_gene_history(store, &args.file, &options)
            })?)
        }
        Commands::GeneNames(args) => Outcome::Import(app.run_operation("gene-names", &sink, |store| {
            genes::update_gene_names(store, &args.file, args.tax_id)
        })?),
        Commands::GeneAliases(args) => Outcome::Import(app.run_operation("gene-aliases", &sink, |store| {
            genes::add_gene_aliases(store, &args.file)
        })?),
        Commands::Experiments(args) => Outcome::Import(app.run_operation("experiments", &sink, |store| {
            samples::import_experiments(store, &args.file)
        })?),
        Commands::Samples(args) => Outcome::Import(app.run_operation("samples", &sink, |store| {
            samples::import_samples(store, &args.file)
        })?),
        Commands::SamplesInfo => Outcome::Import(
            app.run_operation("samples-info", &sink, samples::set_samples_info)?,
        ),
        Commands::Activity(args) => Outcome::Import(app.run_operation("activity", &sink, |store| {
            relations::import_activity(store, &args.file, &args.ml_model)
        })?),
        Commands::GeneNetwork(args) => Outcome::Import(app.run_operation("gene-network", &sink, |store| {
            relations::import_gene_network(store, &args.file, &args.ml_model)
        })?),
        Commands::Participation(args) => Outcome::Import(app.run_operation("participation", &sink, |store| {
            relations::import_participation(store, &args.file, &args.ml_model, &args.participation_type)
        })?),
        Commands::Expression(args) => Outcome::Import(app.run_operation("expression", &sink, |store| {
            relations::import_expression(store, &args.file, args.tax_id)
        })?),
        Commands::SearchIndex(_) => {
            let report = app.run_operation("search-index", &sink, search::create_search_indexes)?;
            match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_index(&report).into_diagnostic()?,
                OutputMode::Interactive => println!(
                    "Trigram indexes {} rebuilt: {} genes, {} experiments",
                    report.indexes.join(", "),
                    report.genes_indexed,
                    report.experiments_indexed
                ),
            }
            return Ok(());
        }
        Commands::Search(args) => {
            let hits = search::search_genes(app.store().connection(), &args.term, args.limit)?;
            match output_mode {
                OutputMode::NonInteractive => {
                    println!("{}", serde_json::to_string_pretty(&hits).into_diagnostic()?)
                }
                OutputMode::Interactive => {
                    for hit in &hits {
                        println!(
                            "{:<16} {:<12} {:>6.1}",
                            hit.systematic_name,
                            hit.standard_name.as_deref().unwrap_or("-"),
                            hit.weight
                        );
                    }
                }
            }
            return Ok(());
        }
        Commands::Bootstrap(_) | Commands::Deploy(_) => {
            return Err(miette::Report::msg("bootstrap and deploy are dispatched separately"));
        }
    };

    match (outcome, output_mode) {
        (Outcome::Upsert(result), OutputMode::NonInteractive) => {
            JsonOutput::print_upsert(&result).into_diagnostic()
        }
        (Outcome::Upsert(result), OutputMode::Interactive) => {
            println!("{} {} {}", result.entity, result.key, result.action);
            Ok(())
        }
        (Outcome::Import(report), OutputMode::NonInteractive) => {
            JsonOutput::print_import(&report).into_diagnostic()
        }
        (Outcome::Import(report), OutputMode::Interactive) => {
            print_import_summary(&report);
            Ok(())
        }
    }
}

enum Outcome {
    Upsert(UpsertResult),
    Import(ImportReport),
}

fn run_bootstrap(
    args: ConfigArg,
    database: Option<Utf8PathBuf>,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let plan = ConfigLoader::resolve(args.config.as_deref())?;
    let store = open_store(database.or_else(|| plan.database.clone()))?;
    let mut app = App::new(store);

    match output_mode {
        OutputMode::NonInteractive => {
            let result = app.bootstrap(&plan, &JsonOutput)?;
            JsonOutput::print_bootstrap(&result).into_diagnostic()?;
            Ok(())
        }
        OutputMode::Interactive => {
            let mut tui = Tui::new(ProgressSinkKind::Bootstrap);
            let result = tui.run(move |sink| app.bootstrap(&plan, sink))?;
            tui.finish_bootstrap(&result)?;
            print_bootstrap_summary(&result);
            Ok(())
        }
    }
}

fn run_deploy(args: DeployArgs, output_mode: OutputMode) -> miette::Result<()> {
    let plan = ConfigLoader::resolve(args.config.as_deref())?;
    let config: DeployConfig = plan.deploy.ok_or_else(|| {
        BootstrapError::ConfigParse("plan has no `deploy` section".to_string())
    })?;
    let dry_run = args.dry_run;

    let result = match output_mode {
        OutputMode::NonInteractive => deploy::deploy(&config, &SystemRunner, dry_run)?,
        OutputMode::Interactive => {
            let mut tui = Tui::new(ProgressSinkKind::Deploy);
            tui.run(move |_sink| deploy::deploy(&config, &SystemRunner, dry_run))?
        }
    };
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_deploy(&result).into_diagnostic()?,
        OutputMode::Interactive => {
            for action in &result.actions {
                let mark = if action.performed { "done" } else { "planned" };
                println!("{:<12} {:<8} {}", action.action, mark, action.detail);
            }
        }
    }
    Ok(())
}

fn print_import_summary(report: &ImportReport) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let reset = "\x1b[0m";
    println!("{green}{}{reset}", report.summary());
    for warning in &report.warnings {
        println!("{yellow}  ! {warning}{reset}");
    }
}

fn print_bootstrap_summary(result: &BootstrapResult) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let reset = "\x1b[0m";

    println!("{cyan}ADAGE bootstrap {}{reset}", result.status);
    if let Some(database) = &result.database {
        println!("{cyan}database: {database}{reset}");
    }
    for step in &result.steps {
        match step.status {
            StepStatus::Skipped => println!("{yellow}-  {} (skipped){reset}", step.step),
            StepStatus::Completed => println!(
                "{green}✓  {} created={} updated={} inserted={} skipped={} ({} ms){reset}",
                step.step, step.created, step.updated, step.inserted, step.skipped, step.elapsed_ms
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_inputs_and_tools_get_distinct_exit_codes() {
        assert_eq!(map_exit_code(&BootstrapError::MissingConfig), 2);
        assert_eq!(
            map_exit_code(&BootstrapError::MissingDeployFile("/etc/adage/nginx.conf".to_string())),
            2
        );
        assert_eq!(map_exit_code(&BootstrapError::MissingTool("certbot".to_string())), 3);
        assert_eq!(map_exit_code(&BootstrapError::AnnotationMismatch(3)), 4);
        assert_eq!(map_exit_code(&BootstrapError::Filesystem("disk full".to_string())), 1);
    }
}
