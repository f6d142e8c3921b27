use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Upper bound on verify/fetch rounds before giving up.
pub const MAX_UPDATE_LOOPS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateState {
    VerifyMetadata,
    FetchPatch,
    ApplyPatch,
    UpdateMetadata,
    VerifyResources,
    FetchResources,
    Launch,
}

impl fmt::Display for UpdateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UpdateState::VerifyMetadata => "verify-metadata",
            UpdateState::FetchPatch => "fetch-patch",
            UpdateState::ApplyPatch => "apply-patch",
            UpdateState::UpdateMetadata => "update-metadata",
            UpdateState::VerifyResources => "verify-resources",
            UpdateState::FetchResources => "fetch-resources",
            UpdateState::Launch => "launch",
        };
        f.write_str(s)
    }
}

pub fn validate_transition(from: UpdateState, to: UpdateState) -> Result<(), CoreError> {
    use UpdateState::{
        ApplyPatch, FetchPatch, FetchResources, Launch, UpdateMetadata, VerifyMetadata,
        VerifyResources,
    };
    let valid = matches!(
        (from, to),
        (VerifyMetadata, FetchPatch | UpdateMetadata | VerifyResources)
            | (FetchPatch, ApplyPatch | UpdateMetadata)
            | (ApplyPatch, UpdateMetadata)
            | (UpdateMetadata | FetchResources, VerifyResources)
            | (VerifyResources, FetchResources | Launch)
    );

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}
