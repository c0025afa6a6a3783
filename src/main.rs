use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};

use docstencil::config::{find_default_config, load_config, AppConfig};
use docstencil::context::{build_context, RenderRequest, TemplateType};
use docstencil::docx::extract::extract_placeholders;
use docstencil::docx::generate::generate_base_template;
use docstencil::docx::render::render_template;
use docstencil::registry::{
    validate_placeholders, JsonRegistry, PlaceholderEntry, Registry,
};
use docstencil::schema::StaticSchema;
use docstencil::store::FsBlobStore;
use docstencil::templates::{
    preview_document, upload_template, TemplateHistory, UploadOutcome,
};

#[derive(Parser, Debug)]
#[command(name = "docstencil")]
#[command(about = "DOCX placeholder templates for invoicing documents (extract, validate, render)", long_about = None)]
struct Args {
    /// Config file path (default: search for docstencil.toml upwards)
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the placeholders found in a template, in document order
    Extract {
        #[arg(value_name = "DOCX")]
        input: PathBuf,
    },
    /// Check every placeholder in a template against the registry and schema
    Validate {
        #[arg(value_name = "DOCX")]
        input: PathBuf,
    },
    /// Validate a template and, if clean, store it as the active one
    Upload {
        #[arg(value_name = "DOCX")]
        input: PathBuf,
        #[arg(short = 't', long)]
        template_type: TemplateType,
    },
    /// Write a starter template pre-seeded with the standard placeholders
    GenBase {
        #[arg(short = 't', long)]
        template_type: TemplateType,
        #[arg(short, long, value_name = "DOCX")]
        output: Option<PathBuf>,
    },
    /// Render the newest uploaded template against a JSON request body
    Preview {
        #[arg(short = 't', long)]
        template_type: TemplateType,
        /// JSON request file; omit to render with preview defaults
        #[arg(short, long, value_name = "JSON")]
        data: Option<PathBuf>,
        #[arg(short, long, value_name = "DOCX")]
        output: Option<PathBuf>,
    },
    /// Render a template file directly, bypassing the store
    Render {
        #[arg(value_name = "DOCX")]
        input: PathBuf,
        #[arg(short = 't', long)]
        template_type: TemplateType,
        #[arg(short, long, value_name = "JSON")]
        data: Option<PathBuf>,
        #[arg(short, long, value_name = "DOCX")]
        output: PathBuf,
    },
    /// Inspect or extend the placeholder registry
    Registry {
        #[command(subcommand)]
        command: RegistryCommand,
    },
}

#[derive(Subcommand, Debug)]
enum RegistryCommand {
    /// List registered placeholder names
    List,
    /// Register a new placeholder mapping
    Add {
        #[arg(value_name = "NAME")]
        name: String,
        #[arg(long)]
        display_name: Option<String>,
        /// Data source as table.field (use the `system` table for computed values)
        #[arg(long, value_name = "TABLE.FIELD")]
        source: String,
        /// Template types the placeholder is meant for (repeatable)
        #[arg(long = "template-type")]
        template_types: Vec<TemplateType>,
    },
}

fn load_app_config(flag: &Option<PathBuf>) -> anyhow::Result<AppConfig> {
    let path = flag.clone().or_else(find_default_config);
    match path {
        Some(p) => {
            log::debug!("using config {}", p.display());
            load_config(&p)
        }
        None => Ok(AppConfig::default()),
    }
}

fn load_schema(cfg: &AppConfig) -> anyhow::Result<StaticSchema> {
    match cfg.schema_path() {
        Some(p) => StaticSchema::load(&p),
        None => {
            log::warn!("no schema_path configured; only system-mapped placeholders validate");
            Ok(StaticSchema::default())
        }
    }
}

fn load_request(path: &Option<PathBuf>) -> anyhow::Result<RenderRequest> {
    match path {
        Some(p) => {
            let bytes = std::fs::read(p)
                .with_context(|| format!("read request file: {}", p.display()))?;
            serde_json::from_slice(&bytes)
                .with_context(|| format!("parse request file: {}", p.display()))
        }
        None => Ok(RenderRequest::default()),
    }
}

fn read_docx(path: &Path) -> anyhow::Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("read template: {}", path.display()))
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();
    let cfg = load_app_config(&args.config)?;

    match args.command {
        Command::Extract { input } => {
            let tokens = extract_placeholders(&read_docx(&input)?)?;
            println!("{}", serde_json::to_string_pretty(&tokens)?);
        }
        Command::Validate { input } => {
            let registry = JsonRegistry::load(&cfg.registry_path())?;
            let schema = load_schema(&cfg)?;
            let tokens = extract_placeholders(&read_docx(&input)?)?;
            let results = validate_placeholders(&tokens, &registry, &schema)?;
            println!("{}", serde_json::to_string_pretty(&results)?);
            if results.iter().any(|r| !r.valid) {
                std::process::exit(1);
            }
        }
        Command::Upload {
            input,
            template_type,
        } => {
            let registry = JsonRegistry::load(&cfg.registry_path())?;
            let schema = load_schema(&cfg)?;
            let store = FsBlobStore::new(cfg.blob_dir());
            let mut history = TemplateHistory::load(&cfg.history_path())?;
            let file_name = input
                .file_name()
                .and_then(|s| s.to_str())
                .unwrap_or("template.docx")
                .to_string();
            let outcome = upload_template(
                &read_docx(&input)?,
                &file_name,
                template_type,
                cfg.max_upload_bytes(),
                &registry,
                &schema,
                &store,
                &mut history,
            )?;
            match outcome {
                UploadOutcome::Stored { template, .. } => {
                    println!("stored {} as {}", template.file_name, template.file_url);
                }
                UploadOutcome::Rejected { failures } => {
                    println!("{}", serde_json::to_string_pretty(&failures)?);
                    std::process::exit(1);
                }
            }
        }
        Command::GenBase {
            template_type,
            output,
        } => {
            let out = output
                .unwrap_or_else(|| PathBuf::from(format!("base_{template_type}.docx")));
            let bytes = generate_base_template(template_type)?;
            std::fs::write(&out, bytes)
                .with_context(|| format!("write template: {}", out.display()))?;
            println!("wrote {}", out.display());
        }
        Command::Preview {
            template_type,
            data,
            output,
        } => {
            let store = FsBlobStore::new(cfg.blob_dir());
            let history = TemplateHistory::load(&cfg.history_path())?;
            let request = load_request(&data)?;
            let doc = preview_document(template_type, &request, &history, &store)?;
            let out = output.unwrap_or_else(|| PathBuf::from(&doc.file_name));
            std::fs::write(&out, doc.bytes)
                .with_context(|| format!("write output: {}", out.display()))?;
            println!("wrote {}", out.display());
        }
        Command::Render {
            input,
            template_type,
            data,
            output,
        } => {
            let request = load_request(&data)?;
            let ctx = build_context(
                template_type,
                &request.document_data,
                &request.customer,
                &request.items,
                &request.settings,
            );
            let bytes = render_template(&read_docx(&input)?, &ctx)?;
            std::fs::write(&output, bytes)
                .with_context(|| format!("write output: {}", output.display()))?;
            println!("wrote {}", output.display());
        }
        Command::Registry { command } => {
            let mut registry = JsonRegistry::load(&cfg.registry_path())?;
            match command {
                RegistryCommand::List => {
                    for name in registry.list_names()? {
                        println!("{name}");
                    }
                }
                RegistryCommand::Add {
                    name,
                    display_name,
                    source,
                    template_types,
                } => {
                    let (table, field) = source.split_once('.').with_context(|| {
                        format!("source must be table.field, got: {source}")
                    })?;
                    registry.insert(PlaceholderEntry {
                        display_name: display_name.unwrap_or_else(|| name.clone()),
                        placeholder_name: name.clone(),
                        data_source_table: table.to_string(),
                        data_source_field: field.to_string(),
                        template_types_allowed: template_types
                            .iter()
                            .map(|t| t.to_string())
                            .collect(),
                    })?;
                    println!("registered {name}");
                }
            }
        }
    }
    Ok(())
}
