use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::SlaError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Availability {
    Public,
    Private,
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Availability::Public => write!(f, "public"),
            Availability::Private => write!(f, "private"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMethod {
    Dermoscopy,
    Camera,
}

impl fmt::Display for CaptureMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureMethod::Dermoscopy => write!(f, "dermoscopy"),
            CaptureMethod::Camera => write!(f, "camera"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum AvailabilityFilter {
    #[default]
    All,
    Public,
    Private,
}

impl AvailabilityFilter {
    pub fn matches(self, value: Availability) -> bool {
        match self {
            AvailabilityFilter::All => true,
            AvailabilityFilter::Public => value == Availability::Public,
            AvailabilityFilter::Private => value == Availability::Private,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum CaptureFilter {
    #[default]
    All,
    Dermoscopy,
    Camera,
}

impl CaptureFilter {
    pub fn matches(self, value: CaptureMethod) -> bool {
        match self {
            CaptureFilter::All => true,
            CaptureFilter::Dermoscopy => value == CaptureMethod::Dermoscopy,
            CaptureFilter::Camera => value == CaptureMethod::Camera,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Verbosity {
    Totals,
    All,
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DatasetId(String);

impl DatasetId {
    pub(crate) fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetMatch {
    pub requested: String,
    pub id: DatasetId,
    pub confidence: u8,
}

impl DatasetMatch {
    pub fn is_exact(&self) -> bool {
        self.confidence == 100
    }
}

/// Lower-cases and maps separators so that `UDA-1` and `uda 1` both read as `uda_1`.
pub fn normalize_name(value: &str) -> String {
    value
        .trim()
        .to_lowercase()
        .chars()
        .map(|ch| if ch == '-' || ch == ' ' { '_' } else { ch })
        .collect()
}

pub fn match_dataset(input: &str, choices: &[&str]) -> Result<DatasetMatch, SlaError> {
    let normalized = normalize_name(input);
    if normalized.is_empty() {
        return Err(SlaError::UnknownDataset(input.to_string()));
    }

    if let Some(exact) = choices.iter().find(|choice| **choice == normalized) {
        return Ok(DatasetMatch {
            requested: input.to_string(),
            id: DatasetId::new(*exact),
            confidence: 100,
        });
    }

    choices
        .iter()
        .map(|choice| (*choice, similarity(&normalized, choice)))
        .max_by_key(|(_, score)| *score)
        .filter(|(_, score)| *score > 0)
        .map(|(choice, score)| DatasetMatch {
            requested: input.to_string(),
            id: DatasetId::new(choice),
            confidence: score.min(99),
        })
        .ok_or_else(|| SlaError::UnknownDataset(input.to_string()))
}

fn similarity(a: &str, b: &str) -> u8 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 100;
    }
    let distance = levenshtein(a, b);
    let score = 100.0 * (1.0 - distance as f64 / longest as f64);
    score.round().clamp(0.0, 100.0) as u8
}

fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars = b.chars().collect::<Vec<_>>();
    let mut previous = (0..=b_chars.len()).collect::<Vec<_>>();
    let mut current = vec![0; b_chars.len() + 1];
    for (i, ca) in a.chars().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            current[j + 1] = (previous[j + 1] + 1)
                .min(current[j] + 1)
                .min(previous[j] + cost);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b_chars.len()]
}
