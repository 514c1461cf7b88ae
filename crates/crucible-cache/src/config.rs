use serde::{Deserialize, Serialize};

/// The `pac.*` configuration knobs (spec §6), plus the pipeline length the
/// model was built for (fixed per coordinator, not reconfigurable once a
/// [`crate::Pac`] exists).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacConfig {
    /// Learning rate, `(0, 1)`. Typically `0.01`..`0.8`.
    pub alpha: f64,
    /// Size of the submitted-pipeline history ring. At least 1.
    pub history_capacity: usize,
    /// Fixed pipeline length `L` this model tracks one matrix per position for.
    pub pipeline_length: usize,
    /// Enables the "stable-version learning" update rule.
    pub enable_sl: bool,
    /// Enables the "update-direction learning" update rule.
    pub enable_ul: bool,
}

impl Default for PacConfig {
    fn default() -> Self {
        Self {
            alpha: 0.2,
            history_capacity: 50,
            pipeline_length: 0,
            enable_sl: true,
            enable_ul: true,
        }
    }
}
