use std::fmt;

use serde::{Deserialize, Serialize};

/// Steps of the per-call state machine, shared by server dispatch and
/// client call preparation.
///
/// `LOOKUP → VALIDATE_PARAMS → VALIDATE_INPUT → INVOKE → VALIDATE_OUTPUT →
/// DONE`; a failure at any step is reported with the step it happened at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Lookup,
    ValidateParams,
    ValidateInput,
    Invoke,
    ValidateOutput,
    Done,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lookup => "lookup",
            Self::ValidateParams => "validate_params",
            Self::ValidateInput => "validate_input",
            Self::Invoke => "invoke",
            Self::ValidateOutput => "validate_output",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
