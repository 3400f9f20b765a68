//! Seam for the external statistical classifier. Training and model storage
//! live outside this crate; the engine only asks for predictions.

use crate::model::Label;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction<T> {
    pub value: T,
    pub confidence: f64,
}

impl<T> Prediction<T> {
    pub fn new(value: T, confidence: f64) -> Self {
        Self { value, confidence }
    }
}

pub trait Predictor: Send + Sync {
    fn predict_label(&self, text: &str) -> anyhow::Result<Option<Prediction<Label>>>;

    fn predict_company(&self, text: &str) -> anyhow::Result<Option<Prediction<String>>>;

    fn name(&self) -> &str;
}

/// Used when no model is configured: every message that no rule matches
/// stays unlabeled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPredictor;

impl Predictor for NoPredictor {
    fn predict_label(&self, _text: &str) -> anyhow::Result<Option<Prediction<Label>>> {
        Ok(None)
    }

    fn predict_company(&self, _text: &str) -> anyhow::Result<Option<Prediction<String>>> {
        Ok(None)
    }

    fn name(&self) -> &str {
        "none"
    }
}
