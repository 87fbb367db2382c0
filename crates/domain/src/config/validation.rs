use serde::{Deserialize, Serialize};

/// What to do with a string or bytes value that is longer than its schema
/// allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowMode {
    /// Reject with a validation error.
    #[default]
    Strict,
    /// Cut the value down to the maximum and accept it.
    Truncate,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// When false, parameters and bodies pass through unchecked.
    #[serde(default = "d_true")]
    pub enabled: bool,
    #[serde(default)]
    pub mode: OverflowMode,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: OverflowMode::Strict,
        }
    }
}

impl ValidationConfig {
    pub fn strict() -> Self {
        Self::default()
    }

    pub fn truncating() -> Self {
        Self {
            enabled: true,
            mode: OverflowMode::Truncate,
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            mode: OverflowMode::Strict,
        }
    }

    pub fn truncate(&self) -> bool {
        self.mode == OverflowMode::Truncate
    }
}

fn d_true() -> bool {
    true
}
