pub mod classifier;
pub mod company;
pub mod config;
pub mod domain_utils;
pub mod domains;
pub mod metadata;
pub mod model;
pub mod patterns;
pub mod pipeline;
pub mod prediction;
pub mod propagation;
pub mod registry;
pub mod store;
pub mod text;

pub use classifier::{ClassificationStage, RuleClassifier, RuleMatch};
pub use company::{CompanyResolution, CompanyResolver, CompanyValidator};
pub use config::Config;
pub use domains::DomainRegistry;
pub use model::{
    ClassificationOutput, Company, CompanySource, CompanyStatus, InboundMessage, Label, Message,
    ThreadAggregate,
};
pub use patterns::PatternRegistry;
pub use pipeline::{Engine, IngestReport, IngestSummary};
pub use prediction::{Prediction, Predictor};
pub use propagation::{LabelPropagator, PropagationOutcome};
pub use store::{AggregateStore, MemoryStore, SqliteStore};
