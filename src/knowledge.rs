// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Static disease knowledge base: labels, severities and grower advice

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Classes the leaf classifier can emit, in model output order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiseaseLabel {
    #[serde(rename = "Apple Scab")]
    AppleScab,
    #[serde(rename = "Apple Black Rot")]
    AppleBlackRot,
    #[serde(rename = "Cedar Apple Rust")]
    CedarAppleRust,
    #[serde(rename = "Healthy")]
    Healthy,
}

impl DiseaseLabel {
    /// All labels indexed by classifier output position
    pub const ALL: [DiseaseLabel; 4] = [
        DiseaseLabel::AppleScab,
        DiseaseLabel::AppleBlackRot,
        DiseaseLabel::CedarAppleRust,
        DiseaseLabel::Healthy,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn name(&self) -> &'static str {
        match self {
            DiseaseLabel::AppleScab => "Apple Scab",
            DiseaseLabel::AppleBlackRot => "Apple Black Rot",
            DiseaseLabel::CedarAppleRust => "Cedar Apple Rust",
            DiseaseLabel::Healthy => "Healthy",
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, DiseaseLabel::Healthy)
    }
}

impl fmt::Display for DiseaseLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DiseaseLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|label| label.name() == s)
            .copied()
            .ok_or_else(|| format!("unknown disease label: {}", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Moderate,
    High,
    #[serde(rename = "N/A")]
    NotApplicable,
    Unknown,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Severity::Low => "Low",
            Severity::Moderate => "Moderate",
            Severity::High => "High",
            Severity::NotApplicable => "N/A",
            Severity::Unknown => "Unknown",
        };
        f.write_str(text)
    }
}

/// Whether a diagnosed leaf needs action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionStatus {
    Healthy,
    Treated,
}

/// Grower advice attached to a label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DiseaseAdvisory {
    pub treatment: &'static str,
    pub prevention: &'static str,
    pub severity: Severity,
}

/// Advice for labels this build does not know about
pub const UNKNOWN_ADVISORY: DiseaseAdvisory = DiseaseAdvisory {
    treatment: "No treatment info available.",
    prevention: "No prevention info available.",
    severity: Severity::Unknown,
};

pub fn advisory_for(label: DiseaseLabel) -> DiseaseAdvisory {
    match label {
        DiseaseLabel::AppleScab => DiseaseAdvisory {
            treatment: "Apply fungicides and prune infected leaves.",
            prevention: "Improve air circulation and avoid overhead watering.",
            severity: Severity::Moderate,
        },
        DiseaseLabel::AppleBlackRot => DiseaseAdvisory {
            treatment: "Remove infected branches and use fungicide.",
            prevention: "Harvest ripe fruit and disinfect tools.",
            severity: Severity::High,
        },
        DiseaseLabel::CedarAppleRust => DiseaseAdvisory {
            treatment: "Use rust-resistant plant varieties.",
            prevention: "Remove nearby cedar trees if possible.",
            severity: Severity::Moderate,
        },
        DiseaseLabel::Healthy => DiseaseAdvisory {
            treatment: "No treatment needed.",
            prevention: "Maintain regular inspection and care.",
            severity: Severity::NotApplicable,
        },
    }
}

/// Look up advice by display name, falling back to [`UNKNOWN_ADVISORY`]
pub fn advisory_for_name(name: &str) -> DiseaseAdvisory {
    name.parse::<DiseaseLabel>()
        .map(advisory_for)
        .unwrap_or(UNKNOWN_ADVISORY)
}

pub fn status_for(label: DiseaseLabel) -> PredictionStatus {
    if label.is_healthy() {
        PredictionStatus::Healthy
    } else {
        PredictionStatus::Treated
    }
}
