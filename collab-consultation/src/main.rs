use clap::Parser;
use collab_consultation::{
    CollaborativeConsultation, ConsultationConfig, DiscussionMode, EngineRegistry,
};
use std::path::PathBuf;
use tracing::{Instrument, info, info_span};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// Run a collaborative consultation over a patient database.
#[derive(Debug, Parser)]
#[command(name = "collab-consultation", version, about)]
struct Cli {
    /// YAML run configuration
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Patients consulted at the same time
    #[arg(long)]
    max_workers: Option<usize>,

    /// Discussion rounds before the host must write a final diagnosis
    #[arg(long)]
    max_discussion_turn: Option<u32>,

    #[arg(long, value_enum)]
    discussion_mode: Option<DiscussionMode>,

    /// JSONL file records are appended to
    #[arg(long)]
    save_path: Option<PathBuf>,

    /// Use only the first N configured doctors
    #[arg(long)]
    number_of_doctors: Option<usize>,
}

impl Cli {
    fn apply(&self, config: &mut ConsultationConfig) {
        if let Some(max_workers) = self.max_workers {
            config.max_workers = max_workers;
        }
        if let Some(max_discussion_turn) = self.max_discussion_turn {
            config.max_discussion_turn = max_discussion_turn;
        }
        if let Some(mode) = self.discussion_mode {
            config.discussion_mode = mode;
        }
        if let Some(save_path) = &self.save_path {
            config.save_path = save_path.clone();
        }
        if self.number_of_doctors.is_some() {
            config.number_of_doctors = self.number_of_doctors;
        }
    }
}

/// Initialize structured JSON tracing based on environment variables
fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "collab_consultation=debug,consult_flow=info".into());

    match log_format.as_str() {
        "pretty" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_level(true),
                )
                .init();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let run_id = Uuid::new_v4();
    let span = info_span!("run", run_id = %run_id);
    async move {
        let mut config = ConsultationConfig::from_file(&cli.config).await?;
        cli.apply(&mut config);
        config.validate()?;

        let registry = EngineRegistry::from_config(&config.engines, &config.retry)?;
        info!(
            config = %cli.config.display(),
            engines = registry.len(),
            doctors = config.active_doctors().len(),
            mode = ?config.discussion_mode,
            max_discussion_turn = config.max_discussion_turn,
            "Configuration loaded"
        );

        let patients = config.load_patients().await?;
        let consultation = CollaborativeConsultation::from_config(&config, &registry).await?;
        let summary = consultation.run(patients).await?;

        info!(
            completed = summary.completed,
            failed = summary.failed,
            save_path = %config.save_path.display(),
            "All consultations done"
        );
        Ok::<_, anyhow::Error>(())
    }
    .instrument(span)
    .await
}
