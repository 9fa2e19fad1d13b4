//! facewatch-core — Face enrollment and identification engine.
//!
//! Stores one descriptor per enrolled identity in SQLite, extracts
//! descriptors with FaceNet-512 via ONNX Runtime on a worker pool, and
//! identifies probes by nearest Euclidean neighbour under a threshold.

pub mod engine;
pub mod extractor;
pub mod identifier;
pub mod matcher;
pub mod recognizer;
pub mod service;
pub mod store;
pub mod types;

pub use engine::{spawn_engine, EngineError, EngineHandle};
pub use extractor::{ExtractError, Extractor};
pub use identifier::{Identifier, IdentifierError, NameMode};
pub use matcher::{EuclideanMatcher, MatchError, Matcher, DEFAULT_THRESHOLD};
pub use recognizer::FaceNetExtractor;
pub use service::{IdentificationService, ServiceConfig, ServiceError};
pub use store::{DescriptorStore, SqliteStore, StoreError};
pub use types::{Descriptor, IdentityRecord, MatchResult};
