// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Diagnosis pipeline: decode, classify, advise, store, record

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::artifacts::ArtifactStore;
use crate::classifier::{Classifier, InferenceGate};
use crate::config::AppConfig;
use crate::history::{create_record, History, PredictionRecord};
use crate::knowledge::{advisory_for, status_for, DiseaseLabel, Severity};
use crate::preprocess::{self, PreparedImage, UploadedImage};
use crate::report::ReportContent;
use crate::{LeafscanError, Result};

/// Label and confidence picked from a probability vector
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassificationResult {
    pub label: DiseaseLabel,
    pub confidence: f32,
}

/// Pick the most probable label. Equal maxima resolve to the lowest index.
pub fn interpret(probabilities: &[f32]) -> Result<ClassificationResult> {
    let mut best: Option<(usize, f32)> = None;
    for (index, &p) in probabilities.iter().enumerate() {
        match best {
            Some((_, top)) if p <= top => {}
            _ => best = Some((index, p)),
        }
    }
    let (index, confidence) =
        best.ok_or_else(|| LeafscanError::Inference("empty probability vector".to_string()))?;
    let label = DiseaseLabel::from_index(index)
        .ok_or_else(|| LeafscanError::Inference(format!("no label for class index {}", index)))?;

    Ok(ClassificationResult {
        label,
        confidence: confidence.clamp(0.0, 1.0),
    })
}

/// Body returned by a successful prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub prediction: String,
    pub confidence: f32,
    pub treatment: String,
    pub prevention: String,
    pub severity: Severity,
    pub image_url: String,
    pub report_url: String,
}

/// Composes the preprocessor, classifier, knowledge base, artifact store and ledger
#[derive(Clone)]
pub struct DiagnosisService {
    gate: InferenceGate,
    artifacts: Arc<ArtifactStore>,
    history: Arc<History>,
    input_size: u32,
}

impl DiagnosisService {
    pub fn new(
        gate: InferenceGate,
        artifacts: ArtifactStore,
        history: History,
        input_size: u32,
    ) -> Self {
        Self {
            gate,
            artifacts: Arc::new(artifacts),
            history: Arc::new(history),
            input_size,
        }
    }

    /// Wire a loaded classifier into storage described by `config`
    pub fn from_config(classifier: Arc<dyn Classifier>, config: &AppConfig) -> Result<Self> {
        let gate = InferenceGate::from_config(classifier, &config.model);
        let artifacts = ArtifactStore::from_config(&config.storage)?;
        let history = History::new(config.storage.history_path.clone());
        Ok(Self::new(gate, artifacts, history, config.model.input_size))
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// Run the full pipeline for one upload.
    ///
    /// Nothing is recorded unless every earlier step succeeded.
    pub async fn predict(&self, upload: UploadedImage) -> Result<PredictionResponse> {
        let size = self.input_size;
        let PreparedImage { image, tensor } =
            tokio::task::spawn_blocking(move || preprocess::prepare(&upload, size)).await??;

        let probabilities = self.gate.classify(tensor).await?;
        let result = interpret(&probabilities)?;
        let advisory = advisory_for(result.label);

        let artifacts = Arc::clone(&self.artifacts);
        let history = Arc::clone(&self.history);

        let record = tokio::task::spawn_blocking(move || -> Result<PredictionRecord> {
            let name = result.label.name();
            let report = ReportContent {
                prediction: name,
                confidence: result.confidence,
                advisory: &advisory,
            };
            let stored = artifacts.persist(&image, &report)?;
            let record = create_record(
                name,
                result.confidence,
                advisory.severity,
                status_for(result.label),
                &stored,
            );
            if let Err(e) = history.append(&record) {
                warn!("Discarding artifacts {} after ledger failure", stored.id);
                artifacts.discard(&stored);
                return Err(e);
            }
            Ok(record)
        })
        .await??;

        info!(
            "Diagnosed {} ({:.2}) as {}",
            record.prediction, record.confidence, record.id
        );

        Ok(PredictionResponse {
            prediction: record.prediction,
            confidence: record.confidence,
            treatment: advisory.treatment.to_string(),
            prevention: advisory.prevention.to_string(),
            severity: advisory.severity,
            image_url: record.image_url,
            report_url: record.report_url,
        })
    }

    /// Every recorded prediction in insertion order
    pub async fn list_history(&self) -> Result<Vec<PredictionRecord>> {
        let history = Arc::clone(&self.history);
        tokio::task::spawn_blocking(move || history.read_all()).await?
    }

    /// Bytes of a stored report, by file name
    pub async fn download_report(&self, filename: &str) -> Result<Vec<u8>> {
        let path = self
            .artifacts
            .report_path(filename)
            .ok_or_else(|| LeafscanError::NotFound("PDF".to_string()))?;

        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if is_io_fault(&e) => Err(LeafscanError::FileSystem(e)),
            Err(e) => {
                debug!("Report {:?} unavailable: {}", filename, e);
                Err(LeafscanError::NotFound("PDF".to_string()))
            }
        }
    }
}

/// Errors that point at the server rather than at the requested name
fn is_io_fault(e: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    !matches!(
        e.kind(),
        ErrorKind::NotFound
            | ErrorKind::InvalidInput
            | ErrorKind::IsADirectory
    )
}
