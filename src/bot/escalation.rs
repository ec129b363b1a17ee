use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::EscalationConfig;

/// Maps a cumulative warning count to an automatic mute duration (minutes)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationPolicy {
    thresholds: BTreeMap<u32, i64>,
}

impl EscalationPolicy {
    pub fn new(thresholds: BTreeMap<u32, i64>) -> Self {
        Self { thresholds }
    }

    pub fn from_config(config: &EscalationConfig) -> Self {
        Self::new(config.thresholds.clone())
    }

    /// Duration for the greatest threshold not above `warning_count`
    ///
    /// Below the lowest threshold there is no mute; at or beyond the highest
    /// the highest threshold's duration applies.
    pub fn mute_for(&self, warning_count: i64) -> Option<i64> {
        let count = u32::try_from(warning_count).ok()?;
        self.thresholds.range(..=count).next_back().map(|(_, minutes)| *minutes)
    }

    pub fn thresholds(&self) -> &BTreeMap<u32, i64> {
        &self.thresholds
    }
}
