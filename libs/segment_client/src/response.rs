//! Decoding of lookup responses
//!
//! The service answers a multi-segment lookup with an object keyed by decimal
//! segment id:
//!
//! ```json
//! {"10": {"ok": true}, "11": {"error": "blocked"}}
//! ```

use crate::error::CheckError;
use serde::Deserialize;
use std::collections::HashMap;

/// Verdict for one segment in a lookup response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentOutcome {
    Member(bool),
    Failed(String),
}

impl SegmentOutcome {
    /// Per-lookup result for `segment_id`
    pub fn into_result(self, segment_id: u32) -> Result<bool, CheckError> {
        match self {
            SegmentOutcome::Member(ok) => Ok(ok),
            SegmentOutcome::Failed(message) => Err(CheckError::CheckFailed {
                segment_id,
                message,
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawOutcome {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

impl From<RawOutcome> for SegmentOutcome {
    fn from(raw: RawOutcome) -> Self {
        match raw.error {
            Some(message) if !message.is_empty() => SegmentOutcome::Failed(message),
            _ => SegmentOutcome::Member(raw.ok),
        }
    }
}

/// Parsed multi-segment response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LookupResponse {
    outcomes: HashMap<u32, SegmentOutcome>,
}

impl LookupResponse {
    pub fn parse(body: &[u8]) -> Result<Self, CheckError> {
        let raw: HashMap<String, RawOutcome> =
            serde_json::from_slice(body).map_err(|e| CheckError::Parse(e.to_string()))?;

        let mut outcomes = HashMap::with_capacity(raw.len());
        for (key, outcome) in raw {
            let segment_id = key
                .parse::<u32>()
                .map_err(|_| CheckError::Parse(format!("segment id {key:?} is not a number")))?;
            outcomes.insert(segment_id, outcome.into());
        }

        Ok(Self { outcomes })
    }

    pub fn get(&self, segment_id: u32) -> Option<&SegmentOutcome> {
        self.outcomes.get(&segment_id)
    }

    /// Result for one lookup: the segment's verdict, or `SegmentNotFound`
    pub fn result_for(&self, segment_id: u32) -> Result<bool, CheckError> {
        match self.outcomes.get(&segment_id) {
            Some(outcome) => outcome.clone().into_result(segment_id),
            None => Err(CheckError::SegmentNotFound { segment_id }),
        }
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct ScanBody {
    intersection: f64,
}

/// Extract the `intersection` share from a scan response
pub fn parse_intersection(body: &[u8]) -> Result<f32, String> {
    let parsed: ScanBody = serde_json::from_slice(body).map_err(|e| e.to_string())?;
    Ok(parsed.intersection as f32)
}
