use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Closed set of document types the pipeline knows how to structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Financial,
    RentRoll,
    Lease,
    Maintenance,
    Other,
}

impl DocumentType {
    pub const ALL: [DocumentType; 5] = [
        DocumentType::Financial,
        DocumentType::RentRoll,
        DocumentType::Lease,
        DocumentType::Maintenance,
        DocumentType::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Financial => "financial",
            DocumentType::RentRoll => "rent_roll",
            DocumentType::Lease => "lease",
            DocumentType::Maintenance => "maintenance",
            DocumentType::Other => "other",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentType {
    type Err = String;

    /// Accepts the spellings providers tend to produce (`rent-roll`,
    /// `Rent Roll`, `rentroll`, `financial_statement`, ...).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .to_ascii_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();

        let doc_type = match normalized.as_str() {
            "financial" | "financialstatement" | "financials" | "incomestatement" | "pl"
            | "profitandloss" | "budget" | "generalledger" => DocumentType::Financial,
            "rentroll" | "rentrollreport" => DocumentType::RentRoll,
            "lease" | "leaseagreement" | "leaseabstract" => DocumentType::Lease,
            "maintenance" | "workorder" | "workorders" | "maintenancereport" => {
                DocumentType::Maintenance
            }
            "other" | "unknown" => DocumentType::Other,
            _ => return Err(format!("unknown document type '{}'", s)),
        };
        Ok(doc_type)
    }
}

/// Result of the classification stage. Produced once per report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub document_type: DocumentType,
    /// Always within `[0, 1]`.
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub property_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_period: Option<String>,
}

impl Classification {
    pub fn new(document_type: DocumentType, confidence: f64) -> Self {
        Self {
            document_type,
            confidence: clamp_unit(confidence),
            property_name: None,
            report_period: None,
        }
    }

    /// Low-confidence `other` used whenever the provider cannot answer.
    pub fn fallback() -> Self {
        Self::new(DocumentType::Other, 0.0)
    }

    pub fn with_property(mut self, property_name: Option<String>) -> Self {
        self.property_name = property_name.filter(|p| !p.trim().is_empty());
        self
    }

    pub fn with_period(mut self, report_period: Option<String>) -> Self {
        self.report_period = report_period.filter(|p| !p.trim().is_empty());
        self
    }

    pub fn is_degraded(&self) -> bool {
        self.document_type == DocumentType::Other && self.confidence < 0.3
    }
}

pub(crate) fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
