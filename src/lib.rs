// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Leafscan: Apple Leaf Disease Diagnosis
//!
//! Classifies a photo of an apple-tree leaf with a pre-trained model, attaches
//! grower advice, stores the image and a PDF report, and records every
//! diagnosis in an append-only ledger.

pub mod artifacts;
pub mod classifier;
pub mod config;
pub mod error;
pub mod history;
pub mod knowledge;
pub mod preprocess;
pub mod report;
pub mod service;
pub mod web;

pub use config::AppConfig;
pub use error::{LeafscanError, Result};
pub use service::DiagnosisService;
