//! Service wiring. Everything is built once here and passed down; nothing
//! below this module reaches for a global.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};

use crate::broadcast::ReportEventBroadcaster;
use crate::config::Config;
use crate::db::{default_database_path, report_repo, Database};
use crate::error::{ConfigError, PrismError, QueueError};
use crate::intake::{FolderIntake, WebhookIntake};
use crate::llm::{build_providers, LanguageModel, ProviderChain};
use crate::model::{Report, ReportSource};
use crate::notification::{Dispatcher, MailTransport, NotifyHandler};
use crate::pipeline::{Analysis, AnalyzeHandler, NoopProgress, Pipeline};
use crate::queue::{JobQueue, QueueRunner};
use crate::secrets::expand_home;
use crate::storage::IntakeStorage;
use crate::watcher::{scan_top_level, DirectoryWatcher, WatchFilter};

const EVENT_CAPACITY: usize = 256;

pub struct Services {
    pub config: Config,
    pub db: Database,
    pub queue: JobQueue,
    pub events: ReportEventBroadcaster,
    pub storage: IntakeStorage,
    pub pipeline: Arc<Pipeline>,
    pub dispatcher: Arc<Dispatcher>,
    pub webhook: WebhookIntake,
    pub folder: FolderIntake,
}

impl Services {
    /// Opens the database and builds providers and the mail transport from
    /// `config`.
    pub fn build(config: Config) -> Result<Self, PrismError> {
        let db_path = config
            .database_path
            .as_deref()
            .map(|p| PathBuf::from(expand_home(p)))
            .or_else(default_database_path)
            .unwrap_or_else(|| PathBuf::from("prism.db"));
        let db = Database::open(&db_path)?;
        info!("Using database {}", db_path.display());

        let providers = build_providers(&config.providers)?;
        if providers.is_empty() {
            warn!("No language-model providers configured; analysis runs degraded");
        }
        let model: Arc<dyn LanguageModel> = Arc::new(ProviderChain::new(providers));
        let dispatcher = Dispatcher::from_config(db.clone(), &config.notifications)?;

        Ok(Self::assemble(config, db, model, dispatcher))
    }

    /// Builds services around injected collaborators.
    pub fn with_parts(
        config: Config,
        db: Database,
        model: Arc<dyn LanguageModel>,
        transport: Arc<dyn MailTransport>,
    ) -> Self {
        let dispatcher = Dispatcher::new(db.clone(), transport, &config.notifications);
        Self::assemble(config, db, model, dispatcher)
    }

    fn assemble(config: Config, db: Database, model: Arc<dyn LanguageModel>, dispatcher: Dispatcher) -> Self {
        let queue = JobQueue::new(db.clone(), &config.queue);
        let events = ReportEventBroadcaster::new(EVENT_CAPACITY);
        let storage = IntakeStorage::new(expand_home(&config.intake.staging_directory));
        let pipeline = Arc::new(Pipeline::new(
            db.clone(),
            queue.clone(),
            model,
            &config.analysis,
            storage.clone(),
        ));
        let webhook = WebhookIntake::new(
            db.clone(),
            queue.clone(),
            storage.clone(),
            events.clone(),
            &config.intake,
        );
        let folder = FolderIntake::new(
            db.clone(),
            queue.clone(),
            events.clone(),
            config.intake.default_tenant.clone(),
        );

        Self {
            config,
            db,
            queue,
            events,
            storage,
            pipeline,
            dispatcher: Arc::new(dispatcher),
            webhook,
            folder,
        }
    }

    /// Starts both lane workers.
    pub fn start_queue(&self) -> Result<QueueRunner, QueueError> {
        let analyze = Arc::new(AnalyzeHandler::new(Arc::clone(&self.pipeline), self.events.clone()));
        let notify = Arc::new(NotifyHandler::new(
            self.db.clone(),
            Arc::clone(&self.dispatcher),
            self.config.notifications.manual_review_hours,
        ));
        self.queue.start(analyze, notify)
    }

    pub fn watcher(&self) -> Result<DirectoryWatcher, ConfigError> {
        DirectoryWatcher::from_config(&self.config.intake)
    }

    /// Analyses one file synchronously. The file is staged first so the
    /// original stays where it is.
    pub async fn process_file(&self, path: &Path) -> Result<Option<Analysis>, PrismError> {
        let content = std::fs::read(path).map_err(|e| crate::error::ExtractError::ReadDocument {
            path: path.to_path_buf(),
            source: e,
        })?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed".to_string());

        let mut report = Report::new(
            self.config.intake.default_tenant.as_str(),
            filename,
            ReportSource::Upload,
            None,
            content.len() as u64,
            String::new(),
        );
        let staged = self.storage.stage(&report.id, &report.filename, &content)?;
        report.file_path = staged.to_string_lossy().into_owned();
        report_repo::insert(&self.db, &report)?;

        match self.pipeline.run(&report, &NoopProgress).await {
            Ok(analysis) => Ok(analysis),
            Err(e) => {
                self.pipeline.fail_report(&report.id, &e.to_string(), 1)?;
                Err(e.into())
            }
        }
    }

    /// Queues every eligible top-level file of `dir`.
    pub fn enqueue_directory(&self, dir: &Path) -> Result<Vec<Report>, PrismError> {
        let filter = WatchFilter::new(&self.config.intake.ignore_patterns)?;
        scan_top_level(dir, &filter)
            .iter()
            .map(|(path, _)| self.folder.submit(path, ReportSource::Upload))
            .collect()
    }
}
