//! Service entry point wiring configuration, tools, policy and scheduler.

use std::sync::Arc;

use mf_av::{CliEngine, Engine, ToolRegistry};
use mf_core::config::Config;
use mf_core::events::EventBus;
use mf_core::{ConversionRequest, ConversionResult};
use mf_pipeline::ConversionPipeline;
use mf_policy::{PolicyGuard, PolicyTable};

use crate::scheduler::{JobHandle, JobScheduler};

/// A running conversion service.
///
/// Cheap to clone; clones share the scheduler and event bus.
#[derive(Clone)]
pub struct MediaService {
    config: Arc<Config>,
    scheduler: JobScheduler,
}

impl MediaService {
    /// Discover the external tools and start the service.
    ///
    /// Fails with [`mf_core::ErrorKind::EngineNotFound`] when a required
    /// tool is missing, so a misprovisioned host never accepts a job.
    pub fn start(config: Config) -> mf_core::Result<Self> {
        let tools = ToolRegistry::discover(&config.tools);
        tools.health_check()?;
        for info in tools.check_all() {
            if info.available {
                tracing::info!(
                    "Found {} {}",
                    info.name,
                    info.version.as_deref().unwrap_or("(unknown version)")
                );
            } else {
                tracing::warn!("Optional tool {} not found", info.name);
            }
        }
        let engine = Arc::new(CliEngine::new(Arc::new(tools)));
        Ok(Self::with_engine(config, engine))
    }

    /// Start the service on top of an arbitrary engine.
    pub fn with_engine(config: Config, engine: Arc<dyn Engine>) -> Self {
        for warning in config.validate() {
            tracing::warn!("Config: {warning}");
        }

        let table = Arc::new(PolicyTable::from_config(&config.policy));
        tracing::debug!("Policy table has {} rules", table.len());

        let pipeline = ConversionPipeline::new(engine, config.pipeline.clone());
        let scheduler = JobScheduler::new(
            PolicyGuard::new(table),
            pipeline,
            config.scheduler.clone(),
            Arc::new(EventBus::default()),
        );

        Self {
            config: Arc::new(config),
            scheduler,
        }
    }

    /// Validate and enqueue a request.
    pub fn submit(&self, request: ConversionRequest) -> mf_core::Result<JobHandle> {
        self.scheduler.submit(request)
    }

    /// Submit and wait for the terminal result.
    pub async fn convert(&self, request: ConversionRequest) -> ConversionResult {
        self.submit(request)?.wait().await
    }

    pub fn scheduler(&self) -> &JobScheduler {
        &self.scheduler
    }

    pub fn events(&self) -> &Arc<EventBus> {
        self.scheduler.events()
    }

    pub fn policy(&self) -> &PolicyTable {
        self.scheduler.guard().table()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
