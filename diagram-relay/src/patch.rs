//! Patch primitive: diff, serialize, deserialize and fuzzy-apply edit scripts.
//!
//! The relay treats the primitive as a black box behind [`PatchEngine`].
//! [`DmpPatchEngine`] binds it to `diff-match-patch-rs` in `Compat` mode,
//! whose patch text is interchangeable with the JavaScript
//! `diff_match_patch` running in the drawer.

use diff_match_patch_rs::{Compat, DiffMatchPatch, PatchInput, Patches};

/// Result of applying an edit script to a base text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchOutcome {
    pub text: String,
    /// One flag per hunk: whether it found a place to apply
    pub applied: Vec<bool>,
}

impl PatchOutcome {
    /// Every hunk applied.
    pub fn is_clean(&self) -> bool {
        self.applied.iter().all(|ok| *ok)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatchError {
    #[error("diff failed: {0}")]
    Diff(String),
    #[error("patch serialization failed: {0}")]
    Serialize(String),
    #[error("invalid patch text: {0}")]
    Deserialize(String),
    #[error("patch apply failed: {0}")]
    Apply(String),
}

/// The four operations the relay needs from a diff/patch library.
///
/// `apply` must tolerate a base that differs from the text the script was
/// computed against and return a best-effort result.
pub trait PatchEngine: Send + Sync + 'static {
    type Script: Send;

    fn diff(&self, old_text: &str, new_text: &str) -> Result<Self::Script, PatchError>;

    fn serialize(&self, script: &Self::Script) -> Result<String, PatchError>;

    fn deserialize(&self, text: &str) -> Result<Self::Script, PatchError>;

    fn apply(&self, script: &Self::Script, base_text: &str) -> Result<PatchOutcome, PatchError>;
}

/// `diff-match-patch` with default match/patch settings.
pub struct DmpPatchEngine {
    dmp: DiffMatchPatch,
}

impl DmpPatchEngine {
    pub fn new() -> Self {
        Self {
            dmp: DiffMatchPatch::new(),
        }
    }
}

impl Default for DmpPatchEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PatchEngine for DmpPatchEngine {
    type Script = Patches<Compat>;

    /// Text-to-text `patch_make`, which runs semantic and efficiency cleanup
    /// so hunks cover whole changed words rather than scattered characters.
    fn diff(&self, old_text: &str, new_text: &str) -> Result<Self::Script, PatchError> {
        self.dmp
            .patch_make::<Compat>(PatchInput::new_text_text(old_text, new_text))
            .map_err(|e| PatchError::Diff(format!("{e:?}")))
    }

    fn serialize(&self, script: &Self::Script) -> Result<String, PatchError> {
        Ok(self.dmp.patch_to_text(script))
    }

    fn deserialize(&self, text: &str) -> Result<Self::Script, PatchError> {
        self.dmp
            .patch_from_text::<Compat>(text)
            .map_err(|e| PatchError::Deserialize(format!("{e:?}")))
    }

    fn apply(&self, script: &Self::Script, base_text: &str) -> Result<PatchOutcome, PatchError> {
        let (text, applied) = self
            .dmp
            .patch_apply(script, base_text)
            .map_err(|e| PatchError::Apply(format!("{e:?}")))?;
        Ok(PatchOutcome { text, applied })
    }
}
