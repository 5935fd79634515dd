//! Model pipelines.
//!
//! Inference itself is a black box living in a model-runner sidecar; a
//! [`Pipeline`] owns one model's load / invoke / cleanup contract against
//! it. Each kind has a lazily-initialized singleton: loaded on first use,
//! never unloaded, memory pool released after each job. The worker plane
//! is single-threaded per process, so the singletons are never invoked
//! concurrently.

use async_trait::async_trait;
use tokio::sync::OnceCell;

use crate::config::WorkerConfig;
use crate::errors::PipelineError;

pub mod runner;
pub mod translate;

pub use runner::RunnerClient;
pub use translate::TranslatePipeline;

const SAM_MODEL: &str = "facebook/sam-vit-base";
const BACKGROUND_MODEL: &str = "briaai/RMBG-1.4";

#[async_trait]
pub trait Pipeline: Send + Sync {
    fn name(&self) -> &str;

    /// Load the model onto the GPU. Called once per process.
    async fn load(&self) -> Result<(), PipelineError>;

    /// Run one model call; returns PNG byte strings.
    async fn invoke(
        &self,
        operation: &str,
        params: serde_json::Value,
    ) -> Result<Vec<Vec<u8>>, PipelineError>;

    /// Release the GPU memory pool without unloading the model.
    async fn cleanup(&self) -> Result<(), PipelineError>;
}

pub struct ModelPipeline {
    name: String,
    model: String,
    runner: RunnerClient,
}

impl ModelPipeline {
    pub fn new(name: &str, model: &str, runner: RunnerClient) -> Self {
        Self {
            name: name.to_string(),
            model: model.to_string(),
            runner,
        }
    }
}

#[async_trait]
impl Pipeline for ModelPipeline {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load(&self) -> Result<(), PipelineError> {
        tracing::info!(pipeline = %self.name, model = %self.model, "Loading pipeline");
        self.runner.load_model(&self.model).await
    }

    async fn invoke(
        &self,
        operation: &str,
        params: serde_json::Value,
    ) -> Result<Vec<Vec<u8>>, PipelineError> {
        self.runner.invoke(operation, &self.model, params).await
    }

    async fn cleanup(&self) -> Result<(), PipelineError> {
        self.runner.release_memory().await
    }
}

/// One instance per pipeline kind, created on first use.
pub struct PipelineSet {
    runner: RunnerClient,
    config: WorkerConfig,
    generate: OnceCell<ModelPipeline>,
    inpaint: OnceCell<ModelPipeline>,
    sam: OnceCell<ModelPipeline>,
    background: OnceCell<ModelPipeline>,
    style: OnceCell<ModelPipeline>,
    translate: OnceCell<TranslatePipeline>,
}

impl PipelineSet {
    pub fn new(runner: RunnerClient, config: WorkerConfig) -> Self {
        Self {
            runner,
            config,
            generate: OnceCell::new(),
            inpaint: OnceCell::new(),
            sam: OnceCell::new(),
            background: OnceCell::new(),
            style: OnceCell::new(),
            translate: OnceCell::new(),
        }
    }

    async fn init<'a>(
        cell: &'a OnceCell<ModelPipeline>,
        name: &str,
        model: &str,
        runner: &RunnerClient,
    ) -> Result<&'a ModelPipeline, PipelineError> {
        cell.get_or_try_init(|| async {
            let pipeline = ModelPipeline::new(name, model, runner.clone());
            pipeline.load().await?;
            Ok(pipeline)
        })
        .await
    }

    pub async fn generate(&self) -> Result<&ModelPipeline, PipelineError> {
        Self::init(
            &self.generate,
            "generate",
            &self.config.model_name,
            &self.runner,
        )
        .await
    }

    pub async fn inpaint(&self) -> Result<&ModelPipeline, PipelineError> {
        Self::init(
            &self.inpaint,
            "inpaint",
            &self.config.model_name,
            &self.runner,
        )
        .await
    }

    pub async fn sam(&self) -> Result<&ModelPipeline, PipelineError> {
        Self::init(&self.sam, "sam", SAM_MODEL, &self.runner).await
    }

    pub async fn background(&self) -> Result<&ModelPipeline, PipelineError> {
        Self::init(&self.background, "background", BACKGROUND_MODEL, &self.runner).await
    }

    pub async fn style(&self) -> Result<&ModelPipeline, PipelineError> {
        Self::init(&self.style, "style", &self.config.model_name, &self.runner).await
    }

    pub async fn translate(&self, text: &str) -> (String, bool) {
        let pipeline = self
            .translate
            .get_or_init(|| async {
                TranslatePipeline::new(
                    self.runner.clone(),
                    self.config.translation_model_name.clone(),
                    self.config.enable_translation,
                )
            })
            .await;
        pipeline.translate(text).await
    }
}
