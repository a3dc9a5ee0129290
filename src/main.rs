//! Glycorisk: diabetes risk classification
//!
//! Command-line entry point. Every prediction is written to the audit log.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use glycorisk::adapters::sanitize::SanitizingMakeWriter;
use glycorisk::adapters::{load_bundle, JsonlAuditStore, LinearClassifier};
use glycorisk::application::{AuditedPrediction, AuditedPredictionService, PredictionService};
use glycorisk::config::{LogMode, Settings};
use glycorisk::domain::{convert_key, Analyte, Gender, PatientForm, RawRecord, SiUnit};
use glycorisk::ports::AuditStore;
use glycorisk::GlycoriskError;

type Service = AuditedPredictionService<LinearClassifier, JsonlAuditStore>;

#[derive(Parser, Debug)]
#[clap(name = "glycorisk", version, about = "Diabetes risk classification with an audit trail")]
struct Cli {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Classify a JSON record already in SI units (training column names)
    Predict {
        /// JSON file with one record; reads stdin when omitted
        #[clap(long)]
        input: Option<PathBuf>,
    },
    /// Classify a patient from conventional-unit (mg/dL) lab values
    Assess(FormArgs),
    /// Convert a mg/dL value to SI
    Convert { analyte: String, value: f64 },
    /// Inspect the prediction audit log
    Audit {
        #[clap(subcommand)]
        command: AuditCommand,
    },
    /// Load the model bundle and report readiness
    Status,
}

#[derive(Subcommand, Debug)]
enum AuditCommand {
    /// List entries, optionally filtered by date (YYYY-MM-DD) and route
    List {
        #[clap(long)]
        date: Option<String>,
        #[clap(long)]
        route: Option<String>,
        #[clap(long, default_value_t = 0)]
        offset: usize,
        /// Page size; all matches when omitted
        #[clap(long)]
        limit: Option<usize>,
    },
    /// Show one entry by request id
    Show { request_id: String },
}

#[derive(Args, Debug)]
struct FormArgs {
    #[clap(long, default_value = "male")]
    gender: Gender,
    #[clap(long, default_value_t = 39)]
    age: u32,
    /// mg/dL
    #[clap(long, default_value_t = 23.0)]
    urea: f64,
    /// mg/dL
    #[clap(long, default_value_t = 1.05)]
    creatinine: f64,
    /// mg/dL
    #[clap(long, default_value_t = 184.8)]
    cholesterol: f64,
    /// mg/dL
    #[clap(long, default_value_t = 115.0)]
    triglycerides: f64,
    /// mg/dL
    #[clap(long, default_value_t = 62.1)]
    hdl: f64,
    /// mg/dL
    #[clap(long, default_value_t = 99.7)]
    ldl: f64,
    /// mg/dL
    #[clap(long, default_value_t = 23.0)]
    vldl: f64,
    #[clap(long, default_value_t = 24.4)]
    bmi: f64,
    /// Percent; recorded but not a model input
    #[clap(long)]
    hba1c: Option<f64>,
}

impl From<FormArgs> for PatientForm {
    fn from(a: FormArgs) -> Self {
        Self {
            gender: a.gender,
            age: a.age,
            urea: a.urea,
            creatinine: a.creatinine,
            cholesterol: a.cholesterol,
            triglycerides: a.triglycerides,
            hdl: a.hdl,
            ldl: a.ldl,
            vldl: a.vldl,
            bmi: a.bmi,
            hba1c: a.hba1c,
        }
    }
}

fn init_logging(settings: &Settings) -> Result<WorkerGuard> {
    let (writer, guard) = match settings.log_mode {
        LogMode::File => {
            if let Some(parent) = settings.log_file.parent() {
                // Best-effort: opening the file reports the real error.
                let _ = std::fs::create_dir_all(parent);
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&settings.log_file)
                .with_context(|| format!("Cannot open log file {}", settings.log_file.display()))?;
            tracing_appender::non_blocking(file)
        }
        LogMode::Stdout => tracing_appender::non_blocking(std::io::stdout()),
        LogMode::Auto | LogMode::Stderr => tracing_appender::non_blocking(std::io::stderr()),
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(SanitizingMakeWriter::new(writer)))
        .init();
    Ok(guard)
}

fn start_service(settings: &Settings) -> Result<Service> {
    let options = settings.bundle_options()?;
    let dir = settings.model_dir.clone();
    let predictor = PredictionService::start(
        move || load_bundle(&dir, &options).map(|b| (b.classifier, b.schema)),
        settings.model_load_timeout,
    );
    let store = JsonlAuditStore::new(&settings.audit_log);
    Ok(AuditedPredictionService::new(Arc::new(predictor), Arc::new(store)))
}

fn read_record(input: Option<&Path>) -> Result<RawRecord> {
    let raw = match input {
        Some(path) => std::fs::read_to_string(path).with_context(|| format!("Cannot read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf).context("Cannot read stdin")?;
            buf
        }
    };
    serde_json::from_str(&raw).context("Input must be a JSON object of column → value")
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn report<E: std::fmt::Display>(outcome: AuditedPrediction<E>) -> Result<ExitCode> {
    let audit_written = outcome.audit.is_ok();
    match outcome.result {
        Ok(p) => {
            print_json(&json!({
                "request_id": outcome.request_id,
                "prediction": p.label,
                "class_index": p.class_index,
                "status": "success",
                "audit_written": audit_written,
            }))?;
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            let severity = e.severity();
            print_json(&json!({
                "request_id": outcome.request_id,
                "error": e.to_string(),
                "severity": severity,
                "status_code": severity.status_code(),
                "status": "error",
                "audit_written": audit_written,
            }))?;
            Ok(ExitCode::FAILURE)
        }
    }
}

fn convert_reading(analyte: &str, value: f64) -> glycorisk::Result<(f64, SiUnit)> {
    let unit = analyte.parse::<Analyte>()?.si_unit();
    Ok((convert_key(analyte, value)?, unit))
}

fn run_audit(settings: &Settings, command: AuditCommand) -> Result<ExitCode> {
    let store = JsonlAuditStore::new(&settings.audit_log);
    match command {
        AuditCommand::List {
            date,
            route,
            offset,
            limit,
        } => {
            let (date, route) = (date.as_deref(), route.as_deref());
            let value = match limit {
                Some(limit) => serde_json::to_value(store.query_page(date, route, offset, limit)?)?,
                None => {
                    let entries: Vec<_> = store.query(date, route)?.into_iter().skip(offset).collect();
                    serde_json::to_value(entries)?
                }
            };
            print_json(&value)?;
            Ok(ExitCode::SUCCESS)
        }
        AuditCommand::Show { request_id } => match store.get_by_id(&request_id)? {
            Some(entry) => {
                print_json(&serde_json::to_value(entry)?)?;
                Ok(ExitCode::SUCCESS)
            }
            None => {
                eprintln!("No audit entry with id {request_id}");
                Ok(ExitCode::FAILURE)
            }
        },
    }
}

fn run(settings: &Settings, command: Command) -> Result<ExitCode> {
    match command {
        Command::Predict { input } => {
            let record = read_record(input.as_deref())?;
            let service = start_service(settings)?;
            report(service.predict(&settings.predict_route, record))
        }
        Command::Assess(args) => {
            let form = PatientForm::from(args);
            let service = start_service(settings)?;
            match service.predict_form(&settings.predict_route, &form) {
                Ok(outcome) => report(outcome),
                Err(GlycoriskError::Validation(message)) => {
                    print_json(&json!({ "status": "invalid", "error": message }))?;
                    Ok(ExitCode::from(2))
                }
                Err(e) => Err(e.into()),
            }
        }
        Command::Convert { analyte, value } => {
            let (si, unit) = convert_reading(&analyte, value)?;
            print_json(&json!({
                "analyte": analyte.trim(),
                "mg_dl": value,
                "si": si,
                "unit": unit.to_string(),
            }))?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Audit { command } => run_audit(settings, command),
        Command::Status => {
            let service = start_service(settings)?;
            let predictor = service.predictor();
            let value = match predictor.schema() {
                Some(schema) => json!({
                    "ready": true,
                    "schema_version": schema.version,
                    "feature_order": schema.feature_order,
                    "labels": schema.labels,
                }),
                None => json!({
                    "ready": false,
                    "reason": predictor.not_ready_reason(),
                }),
            };
            print_json(&value)?;
            Ok(if predictor.is_ready() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let (settings, warnings) = Settings::from_env();
    let _guard = init_logging(&settings)?;
    for warning in &warnings {
        tracing::warn!("{}", warning);
    }

    tracing::debug!("Settings: {:?}", settings);
    run(&settings, cli.command)
}
