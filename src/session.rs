//! View-state machine for one interactive conversion session.
//!
//! ```text
//!          begin            complete
//!   Idle ─────────▶ Processing ─────────▶ Success
//!    ▲                  │                    │
//!    │                  │ fail               │ load_history
//!    │                  ▼                    ▼
//!    └──── reset ──── Error             (Success)
//! ```
//!
//! Every state returns to `Idle` through [`Session::reset`]. A new result,
//! whether converted or loaded from history, always starts locked; editing
//! requires activation.

use crate::binder::{ClipboardItem, PasteDisposition, PlaceholderBinder};
use crate::error::{DocuLatexError, ErrorKind};
use crate::pipeline::input::InputFile;
use crate::storage::{HistoryEntry, LicenseGate};
use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SessionStatus {
    #[default]
    Idle,
    Processing,
    Success,
    Error,
}

/// Outcome of the edit/lock toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditToggle {
    Locked,
    Unlocked,
    /// Not activated; the host should ask for the unlock code.
    ActivationRequired,
}

/// Outcome of a paste event at session level.
#[derive(Debug)]
pub enum SessionPaste {
    /// Idle: the pasted image becomes a new upload.
    Upload(InputFile),
    /// Showing a result: forwarded to the binder.
    Binder(PasteDisposition),
    Ignored,
}

#[derive(Debug, Default)]
pub struct Session {
    status: SessionStatus,
    file_name: Option<String>,
    error: Option<(ErrorKind, String)>,
    binder: PlaceholderBinder,
    activated: bool,
}

impl Session {
    pub fn new(activated: bool) -> Self {
        Self {
            activated,
            ..Self::default()
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn is_activated(&self) -> bool {
        self.activated
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    /// Kind and localised message of the last failure.
    pub fn error(&self) -> Option<(ErrorKind, &str)> {
        self.error.as_ref().map(|(k, m)| (*k, m.as_str()))
    }

    pub fn binder(&self) -> &PlaceholderBinder {
        &self.binder
    }

    pub fn binder_mut(&mut self) -> &mut PlaceholderBinder {
        &mut self.binder
    }

    /// Start converting `file_name`. Rejected while another conversion runs.
    pub fn begin(&mut self, file_name: impl Into<String>) -> Result<(), DocuLatexError> {
        if self.status == SessionStatus::Processing {
            return Err(DocuLatexError::Internal(
                "a conversion is already in progress".to_string(),
            ));
        }
        self.clear();
        self.file_name = Some(file_name.into());
        self.status = SessionStatus::Processing;
        debug!("Session: processing {:?}", self.file_name);
        Ok(())
    }

    /// Show a finished conversion. Ignored unless processing.
    pub fn complete(&mut self, text: impl Into<String>) -> bool {
        if self.status != SessionStatus::Processing {
            return false;
        }
        self.show(text.into());
        true
    }

    /// Record a failed conversion. Ignored unless processing.
    pub fn fail(&mut self, err: &DocuLatexError) -> bool {
        if self.status != SessionStatus::Processing {
            return false;
        }
        self.error = Some((err.kind(), err.user_message()));
        self.status = SessionStatus::Error;
        info!("Session: conversion failed ({})", err.tag());
        true
    }

    /// Show a past conversion. Not allowed mid-conversion.
    pub fn load_history(&mut self, entry: &HistoryEntry) -> bool {
        if self.status == SessionStatus::Processing {
            return false;
        }
        self.clear();
        self.file_name = Some(entry.file_name.clone());
        self.show(entry.markdown.clone());
        true
    }

    /// Back to idle from any state.
    pub fn reset(&mut self) {
        self.clear();
        self.status = SessionStatus::Idle;
    }

    fn clear(&mut self) {
        self.file_name = None;
        self.error = None;
        self.binder = PlaceholderBinder::default();
    }

    fn show(&mut self, text: String) {
        self.binder.replace_text(text);
        self.binder.set_editable(false);
        self.error = None;
        self.status = SessionStatus::Success;
    }

    /// The edit/lock button.
    pub fn toggle_edit(&mut self) -> EditToggle {
        if self.binder.is_editable() {
            self.binder.set_editable(false);
            EditToggle::Locked
        } else if self.activated {
            self.binder.set_editable(true);
            EditToggle::Unlocked
        } else {
            EditToggle::ActivationRequired
        }
    }

    /// Try `code`; on success the current result is unlocked too.
    pub fn activate(&mut self, gate: &LicenseGate<'_>, code: &str) -> Result<bool, DocuLatexError> {
        if !gate.activate(code)? {
            return Ok(false);
        }
        self.activated = true;
        if self.status == SessionStatus::Success {
            self.binder.set_editable(true);
        }
        Ok(true)
    }

    /// Replace the canonical text by hand. Clears every image binding.
    pub fn edit_text(&mut self, text: impl Into<String>) -> Result<(), DocuLatexError> {
        if self.status != SessionStatus::Success || !self.binder.is_editable() {
            return Err(DocuLatexError::EditingLocked);
        }
        self.binder.replace_text(text);
        Ok(())
    }

    /// Route a paste event by state.
    pub fn paste(&mut self, items: &[ClipboardItem]) -> Result<SessionPaste, DocuLatexError> {
        match self.status {
            SessionStatus::Idle => Ok(self
                .accept_pasted_upload(items)?
                .map_or(SessionPaste::Ignored, SessionPaste::Upload)),
            SessionStatus::Success => Ok(SessionPaste::Binder(self.binder.intercept_paste(items))),
            SessionStatus::Processing | SessionStatus::Error => Ok(SessionPaste::Ignored),
        }
    }

    /// While idle, turn the first pasted image into an upload named
    /// `pasted_image_<millis>.png`.
    pub fn accept_pasted_upload(
        &self,
        items: &[ClipboardItem],
    ) -> Result<Option<InputFile>, DocuLatexError> {
        if self.status != SessionStatus::Idle {
            return Ok(None);
        }
        let Some(item) = items.iter().find(|i| i.is_image()) else {
            return Ok(None);
        };
        let name = format!("pasted_image_{}.png", chrono::Utc::now().timestamp_millis());
        InputFile::from_bytes(name, item.data.clone(), Some(&item.mime_type)).map(Some)
    }
}
