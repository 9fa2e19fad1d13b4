//! Identification service: extraction, then store writes or gallery matching.

use crate::engine::{EngineError, EngineHandle};
use crate::extractor::ExtractError;
use crate::identifier::{name_stem, Identifier, IdentifierError, NameMode};
use crate::matcher::{EuclideanMatcher, MatchError, Matcher, DEFAULT_THRESHOLD};
use crate::store::{DescriptorStore, StoreError};
use crate::types::{Descriptor, IdentityRecord, MatchResult};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_MAX_IDENTIFIER_ATTEMPTS: usize = 8;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("no face detected in image")]
    NoFaceDetected,
    #[error("invalid name: {0}")]
    InvalidName(#[from] IdentifierError),
    #[error("face extraction timed out after {0:?}")]
    ExtractionTimeout(Duration),
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
    #[error("match error: {0}")]
    Match(#[from] MatchError),
    #[error("extraction failed: {0}")]
    Extraction(String),
    #[error("extraction engine unavailable")]
    EngineUnavailable,
    #[error("could not allocate a unique identifier after {0} attempts")]
    IdentifierExhausted(usize),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<EngineError> for ServiceError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Extract(ExtractError::NoFaceDetected) => ServiceError::NoFaceDetected,
            EngineError::Extract(ExtractError::InvalidImage(reason)) => {
                tracing::debug!(%reason, "undecodable image treated as no face");
                ServiceError::NoFaceDetected
            }
            EngineError::Extract(other) => ServiceError::Extraction(other.to_string()),
            EngineError::Timeout(limit) => ServiceError::ExtractionTimeout(limit),
            EngineError::ChannelClosed | EngineError::Spawn(_) => ServiceError::EngineUnavailable,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Maximum Euclidean distance for a positive match (strict).
    pub threshold: f32,
    pub name_mode: NameMode,
    pub max_identifier_attempts: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            name_mode: NameMode::default(),
            max_identifier_attempts: DEFAULT_MAX_IDENTIFIER_ATTEMPTS,
        }
    }
}

/// Enrollment and identification on top of an engine and a store.
///
/// Cheap to share behind an `Arc`; holds no per-call state.
pub struct IdentificationService {
    engine: EngineHandle,
    store: Arc<dyn DescriptorStore>,
    matcher: Arc<dyn Matcher + Send + Sync>,
    config: ServiceConfig,
}

impl IdentificationService {
    pub fn new(engine: EngineHandle, store: Arc<dyn DescriptorStore>, config: ServiceConfig) -> Self {
        Self {
            engine,
            store,
            matcher: Arc::new(EuclideanMatcher),
            config,
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Enroll a new identity under a fresh identifier derived from `name`.
    pub async fn enroll(&self, name: &str, image: Vec<u8>) -> Result<Identifier, ServiceError> {
        let stem = name_stem(name, self.config.name_mode)?;
        let descriptor = self.engine.extract(image).await?;

        for attempt in 1..=self.config.max_identifier_attempts {
            let identifier = Identifier::generate(&stem);
            let inserted = {
                let store = Arc::clone(&self.store);
                let identifier = identifier.clone();
                let descriptor = descriptor.clone();
                run_blocking(move || store.insert_new(&identifier, &descriptor)).await??
            };
            if inserted {
                tracing::info!(identifier = %identifier, dim = descriptor.dim(), "identity enrolled");
                return Ok(identifier);
            }
            tracing::warn!(identifier = %identifier, attempt, "identifier collision; regenerating");
        }

        Err(ServiceError::IdentifierExhausted(self.config.max_identifier_attempts))
    }

    /// Store the descriptor of `image` under the caller-chosen `identifier`.
    ///
    /// This is an upsert: an enrolled identifier has its descriptor replaced,
    /// an unknown but valid one is written as a new record. Unlike [`enroll`],
    /// no name stem or unique suffix is involved.
    ///
    /// [`enroll`]: Self::enroll
    pub async fn reenroll(&self, identifier: &str, image: Vec<u8>) -> Result<Identifier, ServiceError> {
        let identifier = Identifier::parse(identifier)?;
        let descriptor = self.engine.extract(image).await?;
        self.put(identifier, descriptor).await
    }

    async fn put(&self, identifier: Identifier, descriptor: Descriptor) -> Result<Identifier, ServiceError> {
        let store = Arc::clone(&self.store);
        let id = identifier.clone();
        run_blocking(move || store.put(&id, &descriptor)).await??;
        tracing::info!(identifier = %identifier, "identity descriptor stored");
        Ok(identifier)
    }

    /// Identify the face in `image` against the current gallery.
    pub async fn identify(&self, image: Vec<u8>) -> Result<MatchResult, ServiceError> {
        let probe = self.engine.extract(image).await?;
        let gallery = self.gallery().await?;

        let result = self
            .matcher
            .best_match(&probe, &gallery, self.config.threshold)
            .map_err(|err| {
                tracing::error!(error = %err, "gallery match failed");
                err
            })?;

        tracing::info!(
            matched = result.matched,
            identifier = result.identifier.as_ref().map(|id| id.as_str()),
            distance = result.distance,
            gallery_size = gallery.len(),
            "identify complete"
        );
        Ok(result)
    }

    /// Snapshot of all enrolled records.
    pub async fn gallery(&self) -> Result<Vec<IdentityRecord>, ServiceError> {
        let store = Arc::clone(&self.store);
        Ok(run_blocking(move || store.list()).await??)
    }

    pub async fn gallery_size(&self) -> Result<usize, ServiceError> {
        let store = Arc::clone(&self.store);
        Ok(run_blocking(move || store.len()).await??)
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, ServiceError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ServiceError::Internal(format!("blocking task failed: {e}")))
}
