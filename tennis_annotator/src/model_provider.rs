use crate::{config::ModelConfig, ort_service::OrtDetector};
use std::{
    path::PathBuf,
    sync::{Arc, OnceLock},
};
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ModelError {
    #[error("Model file not found: {0:?}")]
    NotFound(PathBuf),
    #[error("Failed to load model: {0}")]
    LoadFailed(String),
}

type Loader<M> = Box<dyn Fn() -> Result<M, ModelError> + Send + Sync>;

/// Builds the detection model on first use and hands out the same instance afterwards.
///
/// The outcome of the first load is kept, failures included: a model that could not be
/// loaded is never retried by the same provider.
pub struct ModelProvider<M> {
    loader: Loader<M>,
    model: OnceLock<Result<Arc<M>, ModelError>>,
}

impl<M> ModelProvider<M> {
    pub fn new<L>(loader: L) -> Self
    where
        L: Fn() -> Result<M, ModelError> + Send + Sync + 'static,
    {
        Self {
            loader: Box::new(loader),
            model: OnceLock::new(),
        }
    }

    pub fn get_model(&self) -> Result<Arc<M>, ModelError> {
        self.model
            .get_or_init(|| {
                tracing::info!("Loading detection model");
                let loaded = (self.loader)().map(Arc::new);
                if let Err(e) = &loaded {
                    tracing::error!("Detection model could not be loaded: {}", e);
                }
                loaded
            })
            .clone()
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.model.get(), Some(Ok(_)))
    }
}

impl ModelProvider<OrtDetector> {
    pub fn from_config(model_config: &ModelConfig) -> Self {
        let model_config = model_config.clone();
        Self::new(move || OrtDetector::new(&model_config))
    }
}
