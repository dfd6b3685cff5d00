pub mod classify;
pub mod cli;
pub mod columns;
pub mod data;
pub mod error;
pub mod financial;
pub mod header;
pub mod io_utils;
pub mod merge;
pub mod normalize;
pub mod output;
pub mod process;
pub mod profile;
pub mod project;
pub mod table;
pub mod template;
pub mod workbook;

use std::{collections::BTreeMap, env, path::Path, sync::OnceLock};

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use log::{LevelFilter, debug, info, warn};

use crate::{
    classify::{ClassificationRule, Resolution, RuleStore},
    cli::{Cli, Commands, ProjectCommand, RulesCommand},
    columns::ColumnMapper,
    header::HeaderDetector,
    merge::{MergeOptions, MergeResult, MergeService, OutputTarget},
    normalize::DateNormalizer,
    output::DelimitedOptions,
    process::{NormalizedDocument, Preprocessor},
    project::{MappingUpdate, MergeProject},
    template::MappingTemplate,
    workbook::SourceOptions,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("ledger_merge", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Detect(args) => handle_detect(&args),
        Commands::Normalize(args) => process::execute(&args),
        Commands::Summary(args) => handle_summary(&args),
        Commands::Analyze(args) => handle_analyze(&args),
        Commands::Merge(args) => handle_merge(&args),
        Commands::Classify(args) => handle_classify(&args),
        Commands::Learn(args) => handle_learn(&args),
        Commands::Rules(args) => handle_rules(&args),
        Commands::Project(args) => handle_project(&args),
    }
}

pub(crate) fn source_options(args: &cli::SourceArgs) -> Result<SourceOptions> {
    let encoding = io_utils::resolve_encoding(args.input_encoding.as_deref())?;
    Ok(SourceOptions {
        delimiter: args.delimiter,
        encoding,
        sheet: args.sheet.clone(),
    })
}

fn load_template(path: Option<&Path>) -> Result<Option<MappingTemplate>> {
    path.map(|path| {
        MappingTemplate::load(path).with_context(|| format!("Loading template {path:?}"))
    })
    .transpose()
}

fn parse_mappings(values: &[String]) -> Result<BTreeMap<String, String>> {
    values
        .iter()
        .map(|value| cli::parse_mapping(value).map_err(|err| anyhow!(err)))
        .collect()
}

fn date_normalizer(format: &str) -> Result<DateNormalizer> {
    DateNormalizer::new(format, None).with_context(|| format!("Validating date format '{format}'"))
}

fn handle_detect(args: &cli::DetectArgs) -> Result<()> {
    let source = source_options(&args.source)?;
    info!(
        "Detecting header row in '{}' (scanning {} row(s))",
        args.input.display(),
        args.max_scan_rows
    );
    let table = workbook::read_table(&args.input, &source)
        .with_context(|| format!("Reading {:?}", args.input))?;
    let detector = HeaderDetector::new(args.min_columns, args.max_scan_rows);
    let detection = detector.extract_data_with_header(&table.rows);

    if args.json {
        let value = serde_json::json!({
            "sheet_name": table.sheet_name,
            "header_row_index": detection.header_row_index,
            "headers": detection.headers,
            "preamble_rows": detection.preamble_rows,
            "total_data_rows": detection.total_data_rows(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    table::print_key_values(&[
        ("sheet", table.sheet_name.clone()),
        ("header row", detection.header_row_index.to_string()),
        ("data rows", detection.total_data_rows().to_string()),
        ("preamble rows", detection.preamble_rows.len().to_string()),
    ]);
    println!();
    let headers = (0..detection.headers.len())
        .map(|i| format!("#{i}"))
        .collect::<Vec<_>>();
    table::print_table(&headers, std::slice::from_ref(&detection.headers));
    Ok(())
}

fn handle_summary(args: &cli::SummaryArgs) -> Result<()> {
    let source = source_options(&args.source)?;
    let classifier = process::load_classifier(args.rules.as_deref())?;
    let owner = args.owner.as_deref();
    let document = Preprocessor::default().process_file(&args.input, &source, &classifier, owner)?;
    let Some(summary) = document.summary(&classifier, owner) else {
        warn!("No financial columns detected in {:?}", args.input);
        return Ok(());
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    let mut pairs: Vec<(String, String)> = summary
        .detected_columns
        .iter()
        .map(|(role, header)| (role.as_str().to_string(), header.clone().unwrap_or_default()))
        .collect();
    pairs.push(("transactions".into(), summary.transaction_count.to_string()));
    pairs.push(("total income".into(), normalize::format_number(Some(summary.total_income), 0, true)));
    pairs.push(("total expense".into(), normalize::format_number(Some(summary.total_expense), 0, true)));
    pairs.push(("net".into(), normalize::format_number(Some(summary.net), 0, true)));
    table::print_key_values(&pairs);

    if !summary.category_breakdown.is_empty() {
        println!();
        let headers = ["category", "count", "income", "expense"].map(String::from).to_vec();
        let rows = summary
            .category_breakdown
            .iter()
            .map(|(category, totals)| {
                vec![
                    category.clone(),
                    totals.count.to_string(),
                    normalize::format_number(Some(totals.income), 0, true),
                    normalize::format_number(Some(totals.expense), 0, true),
                ]
            })
            .collect::<Vec<_>>();
        table::print_table(&headers, &rows);
    }
    Ok(())
}

fn handle_analyze(args: &cli::AnalyzeArgs) -> Result<()> {
    let source = source_options(&args.source)?;
    let mut mapper = ColumnMapper::default();
    if let Some(template) = load_template(args.template.as_deref())? {
        template.apply_aliases(&mut mapper);
    }
    let service = MergeService::new(mapper, DateNormalizer::default(), source);
    info!("Analyzing {} file(s)", args.inputs.len());
    let analysis = service.analyze_files(&args.inputs);
    info!(
        "Analysis complete: {} succeeded, {} failed, {} distinct header(s)",
        analysis.files_analyzed,
        analysis.files_failed,
        analysis.all_headers.len()
    );
    let json = serde_json::to_string_pretty(&analysis)?;
    match &args.output {
        Some(path) => std::fs::write(path, json)
            .with_context(|| format!("Writing analysis to {path:?}"))?,
        None => println!("{json}"),
    }
    Ok(())
}

fn handle_merge(args: &cli::MergeArgs) -> Result<()> {
    let source = source_options(&args.source)?;
    let output_encoding = io_utils::resolve_encoding(args.output_encoding.as_deref())?;
    let template = load_template(args.template.as_deref())?;

    let mut mapper = ColumnMapper::default();
    let mut options = MergeOptions {
        add_source_column: !args.no_source_column,
        sort_by: args.sort_by.clone(),
        auto_detect_types: args.auto_detect,
        output: match (&args.output, args.no_output) {
            (_, true) => OutputTarget::Skip,
            (Some(path), false) => OutputTarget::Path(path.clone()),
            (None, false) => OutputTarget::Auto,
        },
        delimited: DelimitedOptions {
            delimiter: args.output_delimiter,
            encoding: output_encoding,
        },
        ..MergeOptions::default()
    };
    let mut date_format = args.date_format.clone();
    if let Some(template) = &template {
        template.apply_aliases(&mut mapper);
        template.apply_to_options(&mut options);
        if args.date_format == normalize::DEFAULT_DATE_OUTPUT_FORMAT {
            date_format = template.date_output_format.clone();
        }
    }
    options.column_mapping.extend(parse_mappings(&args.mappings)?);
    options.date_columns.extend(args.date_columns.iter().cloned());
    options.number_columns.extend(args.number_columns.iter().cloned());
    if let Some(delimiter) = args.output_delimiter {
        debug!("Delimited output uses '{}'", printable_delimiter(delimiter));
    }

    let service = MergeService::new(mapper, date_normalizer(&date_format)?, source);
    info!("Merging {} file(s)", args.inputs.len());
    let result = service.merge_files(&args.inputs, &options);
    if let Some(path) = &args.report {
        std::fs::write(path, serde_json::to_string_pretty(&result)?)
            .with_context(|| format!("Writing merge report to {path:?}"))?;
    }
    print_merge_result(&result);
    if !result.success {
        bail!(
            "Merge failed: {}",
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

fn print_merge_result(result: &MergeResult) {
    let headers = ["file", "status", "header row", "rows", "error"]
        .map(String::from)
        .to_vec();
    let rows = result
        .per_file_log
        .iter()
        .map(|log| {
            vec![
                log.file.clone(),
                format!("{:?}", log.status).to_lowercase(),
                log.header_row.map(|r| r.to_string()).unwrap_or_default(),
                log.rows_processed.to_string(),
                log.error.clone().unwrap_or_default(),
            ]
        })
        .collect::<Vec<_>>();
    table::print_table(&headers, &rows);
    println!();
    table::print_key_values(&[
        ("rows", result.total_rows.to_string()),
        ("files succeeded", result.files_succeeded.to_string()),
        ("files failed", result.files_failed.to_string()),
        ("columns", result.unified_headers.len().to_string()),
        (
            "sort column",
            result.auto_detected.sort_column.clone().unwrap_or_default(),
        ),
        (
            "suspected duplicates",
            result.duplicates.total_suspected.to_string(),
        ),
        (
            "output",
            result
                .output_location
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
        ),
    ]);
}

fn handle_classify(args: &cli::ClassifyArgs) -> Result<()> {
    let classifier = process::load_classifier(args.rules.as_deref())?;
    let headers = ["description", "category", "resolved by"]
        .map(String::from)
        .to_vec();
    let rows = args
        .descriptions
        .iter()
        .map(|description| {
            let result = classifier.classify_detailed(description, args.owner.as_deref());
            let resolved_by = match result.resolved_by {
                Resolution::Rule { id } => format!("rule {id}"),
                Resolution::Keyword => "keyword".to_string(),
                Resolution::Unclassified => "-".to_string(),
            };
            vec![description.clone(), result.category, resolved_by]
        })
        .collect::<Vec<_>>();
    table::print_table(&headers, &rows);
    if let Some(path) = &args.rules {
        classifier
            .rules()
            .save(path)
            .with_context(|| format!("Saving rules to {path:?}"))?;
    }
    Ok(())
}

fn handle_learn(args: &cli::LearnArgs) -> Result<()> {
    let rules = RuleStore::load(&args.rules).with_context(|| format!("Loading rules from {:?}", args.rules))?;
    let learned = match (&args.document, args.row) {
        (Some(path), Some(row)) => {
            let mut document = NormalizedDocument::load(path)
                .with_context(|| format!("Loading document {path:?}"))?;
            let learned = document.reclassify(row, &args.category, &args.owner, &rules)?;
            document
                .save(path)
                .with_context(|| format!("Saving document {path:?}"))?;
            info!("Row {row} of {path:?} reclassified as {}", args.category);
            learned
        }
        _ => {
            let description = args
                .description
                .as_deref()
                .ok_or_else(|| anyhow!("--description is required without --document"))?;
            rules.learn(&args.owner, description, &args.category)
        }
    };
    rules
        .save(&args.rules)
        .with_context(|| format!("Saving rules to {:?}", args.rules))?;
    match learned {
        Some(rule) => print_rules(std::slice::from_ref(&rule)),
        None => warn!("Nothing to learn: the description is empty"),
    }
    Ok(())
}

fn handle_rules(args: &cli::RulesArgs) -> Result<()> {
    let rules = RuleStore::load(&args.rules).with_context(|| format!("Loading rules from {:?}", args.rules))?;
    match &args.command {
        RulesCommand::List => {
            print_rules(&rules.rules_for(&args.owner));
            return Ok(());
        }
        RulesCommand::Add(add) => {
            let rule = rules
                .upsert_rule(
                    &args.owner,
                    &add.pattern,
                    add.match_type.into(),
                    &add.category,
                    add.source.into(),
                    add.priority,
                )
                .ok_or_else(|| anyhow!("Rule pattern cannot be empty"))?;
            print_rules(std::slice::from_ref(&rule));
        }
        RulesCommand::Deactivate { id } => {
            if !rules.deactivate(&args.owner, *id) {
                bail!("Rule {id} not found for owner '{}'", args.owner);
            }
            info!("Rule {id} deactivated");
        }
    }
    rules
        .save(&args.rules)
        .with_context(|| format!("Saving rules to {:?}", args.rules))?;
    Ok(())
}

fn print_rules(rules: &[ClassificationRule]) {
    let headers = ["id", "pattern", "match", "category", "source", "priority", "hits", "active"]
        .map(String::from)
        .to_vec();
    let rows = rules
        .iter()
        .map(|rule| {
            vec![
                rule.id.to_string(),
                rule.pattern.clone(),
                rule.match_type.as_str().to_string(),
                rule.category.clone(),
                rule.source.as_str().to_string(),
                rule.priority.to_string(),
                rule.hit_count.to_string(),
                rule.active.to_string(),
            ]
        })
        .collect::<Vec<_>>();
    table::print_table(&headers, &rows);
}

fn load_project(path: &Path) -> Result<MergeProject> {
    MergeProject::load(path).with_context(|| format!("Loading project {path:?}"))
}

fn save_project(project: &MergeProject, path: &Path) -> Result<()> {
    project
        .save(path)
        .with_context(|| format!("Writing project to {path:?}"))
}

fn handle_project(args: &cli::ProjectArgs) -> Result<()> {
    let path = args.project.as_path();
    match &args.command {
        ProjectCommand::Create { name, description } => {
            if path.exists() {
                bail!("Project file {path:?} already exists");
            }
            let project = MergeProject::new(name.clone(), description.clone());
            save_project(&project, path)?;
            info!("Created project '{}' ({})", project.name, project.id);
        }
        ProjectCommand::Add { files } => {
            let mut project = load_project(path)?;
            for file in files {
                project.add_file(file.clone())?;
            }
            save_project(&project, path)?;
            info!("Project now holds {} file(s)", project.files.len());
        }
        ProjectCommand::Analyze { source } => {
            let mut project = load_project(path)?;
            let service = MergeService::new(
                ColumnMapper::default(),
                date_normalizer(&project.date_output_format)?,
                source_options(source)?,
            );
            project.begin_analysis()?;
            save_project(&project, path)?;
            let analysis = service.analyze_files(&project.file_paths());
            let (analyzed, failed) = (analysis.files_analyzed, analysis.files_failed);
            let groups = project.record_analysis(analysis).suggested_mappings.groups.clone();
            save_project(&project, path)?;
            info!("Analyzed {analyzed} file(s), {failed} failed");
            let headers = ["suggested name", "members"].map(String::from).to_vec();
            let rows = groups
                .iter()
                .map(|g| vec![g.standard_name.clone(), g.members.join(", ")])
                .collect::<Vec<_>>();
            table::print_table(&headers, &rows);
        }
        ProjectCommand::Map(map) => {
            let mut project = load_project(path)?;
            if let Some(template) = load_template(map.template.as_deref())? {
                project.apply_template(&template)?;
            }
            let update = MappingUpdate {
                column_mapping: if map.mappings.is_empty() {
                    None
                } else {
                    Some(parse_mappings(&map.mappings)?)
                },
                date_columns: map.date_columns.clone(),
                number_columns: map.number_columns.clone(),
                date_output_format: map.date_format.clone(),
            };
            project.update_mapping(update)?;
            save_project(&project, path)?;
            if let Some(template_path) = &map.save_template {
                project
                    .to_template(project.name.clone(), project.description.clone())
                    .save(template_path)
                    .with_context(|| format!("Writing template to {template_path:?}"))?;
                info!("Mapping saved as template {template_path:?}");
            }
            info!("Project '{}' is {}", project.name, project.status);
        }
        ProjectCommand::Execute { output, source } => {
            let mut project = load_project(path)?;
            let mut service = MergeService::new(
                ColumnMapper::default(),
                date_normalizer(&project.date_output_format)?,
                source_options(source)?,
            );
            project.begin_merge()?;
            save_project(&project, path)?;
            project.prepare_service(&mut service);
            let target = output
                .clone()
                .map_or(OutputTarget::Auto, OutputTarget::Path);
            let options = project.merge_options(target);
            let result = service.merge_files(&project.file_paths(), &options);
            let result = project.record_merge(result).clone();
            save_project(&project, path)?;
            print_merge_result(&result);
            if !result.success {
                bail!(
                    "Merge failed: {}",
                    result.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
        ProjectCommand::Status { json } => {
            let project = load_project(path)?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&project)?);
                return Ok(());
            }
            table::print_key_values(&[
                ("name", project.name.clone()),
                ("status", project.status.to_string()),
                ("files", project.files.len().to_string()),
                ("mapped columns", project.column_mapping.len().to_string()),
                ("date format", project.date_output_format.clone()),
                ("error", project.error_message.clone().unwrap_or_default()),
            ]);
            println!();
            let headers = ["file", "header row", "rows", "processed", "error"]
                .map(String::from)
                .to_vec();
            let rows = project
                .files
                .iter()
                .map(|file| {
                    let analysis = file.analysis.as_ref().filter(|a| a.is_ok());
                    vec![
                        file.file_name(),
                        analysis
                            .map(|a| a.header_row_index.to_string())
                            .unwrap_or_default(),
                        analysis.map(|a| a.total_rows.to_string()).unwrap_or_default(),
                        file.processed.to_string(),
                        file.error_message.clone().unwrap_or_default(),
                    ]
                })
                .collect::<Vec<_>>();
            table::print_table(&headers, &rows);
        }
    }
    Ok(())
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        b'\n' => "\\n".to_string(),
        other => (other as char).to_string(),
    }
}
