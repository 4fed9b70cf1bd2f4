//! Invoice field extraction on top of a pluggable entity recognizer.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::IngestResult;

/// Invoice fields the extractor knows how to fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceField {
    Amount,
    Date,
}

impl InvoiceField {
    pub const ALL: [InvoiceField; 2] = [InvoiceField::Amount, InvoiceField::Date];

    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceField::Amount => "amount",
            InvoiceField::Date => "date",
        }
    }
}

impl fmt::Display for InvoiceField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verbatim text spans keyed by invoice field. Absent keys mean "not recognized".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvoiceDetails(BTreeMap<InvoiceField, String>);

impl InvoiceDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: InvoiceField, value: impl Into<String>) {
        self.0.insert(field, value.into());
    }

    pub fn get(&self, field: InvoiceField) -> Option<&str> {
        self.0.get(&field).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (InvoiceField, &str)> {
        self.0.iter().map(|(field, value)| (*field, value.as_str()))
    }
}

/// Entity categories a recognizer can emit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityLabel {
    Money,
    Date,
    Other(String),
}

/// A recognized span of the input text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub label: EntityLabel,
    pub text: String,
    pub start: usize,
    pub end: usize,
}

/// Named-entity recognition capability.
///
/// Implementations return entities in text order. An `Err` means the
/// recognizer itself is unavailable, not that nothing was found.
pub trait EntityRecognizer: Send + Sync {
    fn recognize(&self, text: &str) -> IngestResult<Vec<Entity>>;
}

lazy_static! {
    static ref MONEY_PATTERNS: Vec<Regex> = vec![
        // $250.00, € 1.200,50, £10
        Regex::new(r"[$€£¥]\s?\d+(?:[,.]\d{3})*(?:[.,]\d{1,2})?").unwrap(),
        // USD 250, EUR 1,200.00, EUR 1.200,50
        Regex::new(r"\b(?:USD|EUR|GBP|JPY|CHF|CAD|AUD)\s?\d+(?:[,.]\d{3})*(?:[.,]\d{1,2})?").unwrap(),
        // 250.00 EUR, 1.200,50 EUR, 40 dollars
        Regex::new(r"(?i)\b\d+(?:[,.]\d{3})*(?:[.,]\d{1,2})?\s?(?:USD|EUR|GBP|JPY|CHF|CAD|AUD|dollars?|euros?|pounds?)\b").unwrap(),
    ];

    static ref DATE_PATTERNS: Vec<Regex> = vec![
        // 2024-01-15
        Regex::new(r"\b\d{4}-\d{2}-\d{2}\b").unwrap(),
        // 01/15/2024, 15.01.2024
        Regex::new(r"\b\d{1,2}[/.]\d{1,2}[/.]\d{2,4}\b").unwrap(),
        // January 15, 2024 / Jan 15th
        Regex::new(r"(?i)\b(?:jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?)\.?\s+\d{1,2}(?:st|nd|rd|th)?(?:,?\s+\d{4})?\b").unwrap(),
        // 15 Jan 2024
        Regex::new(r"(?i)\b\d{1,2}(?:st|nd|rd|th)?\s+(?:jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?)\.?(?:\s+\d{4})?\b").unwrap(),
    ];
}

/// Rule-based recognizer for monetary amounts and dates.
#[derive(Debug, Default, Clone)]
pub struct PatternRecognizer;

impl PatternRecognizer {
    pub fn new() -> Self {
        Self
    }

    fn collect(text: &str, patterns: &[Regex], label: EntityLabel, out: &mut Vec<Entity>) {
        for pattern in patterns {
            for m in pattern.find_iter(text) {
                out.push(Entity {
                    label: label.clone(),
                    text: m.as_str().trim_end().to_string(),
                    start: m.start(),
                    end: m.end(),
                });
            }
        }
    }
}

impl EntityRecognizer for PatternRecognizer {
    fn recognize(&self, text: &str) -> IngestResult<Vec<Entity>> {
        let mut candidates = Vec::new();
        Self::collect(text, &MONEY_PATTERNS, EntityLabel::Money, &mut candidates);
        Self::collect(text, &DATE_PATTERNS, EntityLabel::Date, &mut candidates);

        // Earliest start first, longest span first on ties; drop overlaps.
        candidates.sort_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)));
        let mut entities: Vec<Entity> = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if entities.last().map_or(true, |last| candidate.start >= last.end) {
                entities.push(candidate);
            }
        }
        Ok(entities)
    }
}

/// Maps recognized entities onto invoice fields.
#[derive(Clone)]
pub struct InvoiceFieldExtractor {
    recognizer: Arc<dyn EntityRecognizer>,
}

impl InvoiceFieldExtractor {
    pub fn new(recognizer: Arc<dyn EntityRecognizer>) -> Self {
        Self { recognizer }
    }

    /// Later entities of the same kind overwrite earlier ones.
    pub fn extract(&self, body: &str) -> IngestResult<InvoiceDetails> {
        let entities = self.recognizer.recognize(body)?;
        let mut details = InvoiceDetails::new();
        for entity in entities {
            match entity.label {
                EntityLabel::Money => details.insert(InvoiceField::Amount, entity.text),
                EntityLabel::Date => details.insert(InvoiceField::Date, entity.text),
                EntityLabel::Other(_) => {}
            }
        }
        debug!("Extracted {} invoice field(s)", details.len());
        Ok(details)
    }
}

impl Default for InvoiceFieldExtractor {
    fn default() -> Self {
        Self::new(Arc::new(PatternRecognizer::new()))
    }
}
