//! Placeholder/image binding.
//!
//! Canonical text marks every figure position with the literal token
//! [`IMAGE_TOKEN`]. Placeholders have no identity of their own: the *n*-th
//! token in a left-to-right scan is ordinal *n*, recomputed from the text on
//! every call. [`PlaceholderBinder`] holds the user's ordinal → image
//! bindings, the active ordinal that receives the next paste, and the
//! editability / view-mode flags that gate mutation.
//!
//! ## Why derive numbering instead of storing it?
//!
//! Manual edits can add or remove tokens anywhere. Storing ordinals would need
//! a re-index on every edit; deriving them makes "valid ordinals are exactly
//! `1..=N`" hold by construction. Bindings whose key falls outside that range
//! are stale and every read path treats them as absent.
//!
//! ## Paste
//!
//! There is no global listener. The host forwards paste events to
//! [`PlaceholderBinder::intercept_paste`], which decides from mode,
//! editability and the active ordinal whether to consume the event.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Reserved literal marking a figure slot in canonical text.
pub const IMAGE_TOKEN: &str = "[[IMAGE]]";

/// Ordinal → image map, ordered by ordinal.
pub type ImageBindings = BTreeMap<usize, ImagePayload>;

/// Raw bytes of one bound image plus its MIME type.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePayload {
    pub mime_type: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl ImagePayload {
    pub fn new(mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data,
        }
    }

    /// Decode a base64 body (no `data:` prefix).
    pub fn from_base64(mime_type: impl Into<String>, b64: &str) -> Result<Self, base64::DecodeError> {
        Ok(Self::new(mime_type, STANDARD.decode(b64.trim())?))
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.data)
    }
}

impl std::fmt::Debug for ImagePayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImagePayload")
            .field("mime_type", &self.mime_type)
            .field("bytes", &self.data.len())
            .finish()
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}

/// One item of a clipboard payload, as the host hands it over.
#[derive(Debug, Clone)]
pub struct ClipboardItem {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl ClipboardItem {
    pub fn new(mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data,
        }
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

/// How the canonical text is currently shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ViewMode {
    /// Rendered preview with clickable placeholder slots.
    #[default]
    Preview,
    /// Raw text editor; pastes go to the text.
    Raw,
}

/// What the host should do with a paste event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasteDisposition {
    /// The image was bound to this ordinal; suppress default handling.
    Consumed { ordinal: usize },
    /// Not ours; let the default paste proceed.
    PassThrough,
}

/// Result of the per-slot paste button.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotPaste {
    Bound { ordinal: usize },
    NoImage,
    Rejected,
}

/// Ordinals `1..=N` of every [`IMAGE_TOKEN`] in `text`, in document order.
pub fn scan_placeholders(text: &str) -> Vec<usize> {
    (1..=text.matches(IMAGE_TOKEN).count()).collect()
}

/// Binding state for one canonical document.
#[derive(Debug, Clone, Default)]
pub struct PlaceholderBinder {
    text: String,
    bindings: ImageBindings,
    active: Option<usize>,
    editable: bool,
    view_mode: ViewMode,
}

impl PlaceholderBinder {
    /// A locked binder over `text` in preview mode.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Replace the canonical text. Clears every binding and the active ordinal.
    pub fn replace_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
        self.bindings.clear();
        self.active = None;
    }

    pub fn placeholder_count(&self) -> usize {
        self.text.matches(IMAGE_TOKEN).count()
    }

    pub fn placeholders(&self) -> Vec<usize> {
        scan_placeholders(&self.text)
    }

    fn is_valid(&self, ordinal: usize) -> bool {
        ordinal >= 1 && ordinal <= self.placeholder_count()
    }

    pub fn is_editable(&self) -> bool {
        self.editable
    }

    pub fn set_editable(&mut self, editable: bool) {
        self.editable = editable;
        if !editable {
            self.active = None;
        }
    }

    pub fn view_mode(&self) -> ViewMode {
        self.view_mode
    }

    pub fn set_view_mode(&mut self, mode: ViewMode) {
        self.view_mode = mode;
    }

    /// The ordinal that receives the next paste, if it is still valid.
    pub fn active(&self) -> Option<usize> {
        self.active.filter(|&o| self.is_valid(o))
    }

    /// Make `ordinal` the paste target. No-op unless editable and valid.
    pub fn set_active(&mut self, ordinal: usize) -> bool {
        if !self.editable || !self.is_valid(ordinal) {
            return false;
        }
        self.active = Some(ordinal);
        true
    }

    pub fn clear_active(&mut self) {
        self.active = None;
    }

    /// Bind (or re-bind) an image to `ordinal`, then advance the active slot.
    ///
    /// Rejected when locked or when the ordinal does not exist.
    pub fn bind_image(&mut self, ordinal: usize, payload: ImagePayload) -> bool {
        if !self.editable {
            debug!("bind_image({ordinal}) ignored: editing locked");
            return false;
        }
        if !self.is_valid(ordinal) {
            warn!(
                "bind_image({ordinal}) ignored: document has {} placeholder(s)",
                self.placeholder_count()
            );
            return false;
        }
        self.bindings.insert(ordinal, payload);
        self.auto_advance(ordinal);
        true
    }

    /// Remove the image bound to `ordinal`.
    pub fn unbind(&mut self, ordinal: usize) -> bool {
        if !self.editable {
            return false;
        }
        self.bindings.remove(&ordinal).is_some()
    }

    /// Move the paste target after `bound` was filled.
    ///
    /// If `bound` was the active slot, the next unbound slot after it becomes
    /// active (or none, when every later slot is filled). Otherwise the active
    /// slot is cleared.
    pub fn auto_advance(&mut self, bound: usize) {
        if self.active != Some(bound) {
            self.active = None;
            return;
        }
        let count = self.placeholder_count();
        self.active = (bound + 1..=count).find(|o| !self.bindings.contains_key(o));
    }

    pub fn binding(&self, ordinal: usize) -> Option<&ImagePayload> {
        if !self.is_valid(ordinal) {
            return None;
        }
        self.bindings.get(&ordinal)
    }

    pub fn is_bound(&self, ordinal: usize) -> bool {
        self.binding(ordinal).is_some()
    }

    /// Live bindings only; stale ordinals are filtered out.
    pub fn bindings(&self) -> ImageBindings {
        self.bindings
            .iter()
            .filter(|(&o, _)| self.is_valid(o))
            .map(|(&o, p)| (o, p.clone()))
            .collect()
    }

    /// Ordinals with no live binding, ascending.
    pub fn unbound(&self) -> Vec<usize> {
        self.placeholders()
            .into_iter()
            .filter(|&o| !self.is_bound(o))
            .collect()
    }

    /// Handle a document-level paste event.
    ///
    /// Consumes the event only in preview mode, while editable, with an
    /// active slot, and when the clipboard holds an image. The first image
    /// item wins.
    pub fn intercept_paste(&mut self, items: &[ClipboardItem]) -> PasteDisposition {
        if !self.editable || self.view_mode != ViewMode::Preview {
            return PasteDisposition::PassThrough;
        }
        let Some(ordinal) = self.active() else {
            return PasteDisposition::PassThrough;
        };
        let Some(item) = items.iter().find(|i| i.is_image()) else {
            return PasteDisposition::PassThrough;
        };

        let payload = ImagePayload::new(item.mime_type.clone(), item.data.clone());
        if self.bind_image(ordinal, payload) {
            debug!("paste bound to placeholder {ordinal}");
            PasteDisposition::Consumed { ordinal }
        } else {
            PasteDisposition::PassThrough
        }
    }

    /// The per-slot paste button: target `ordinal`, then bind the first image.
    pub fn paste_into(&mut self, ordinal: usize, items: &[ClipboardItem]) -> SlotPaste {
        if !self.set_active(ordinal) {
            return SlotPaste::Rejected;
        }
        let Some(item) = items.iter().find(|i| i.is_image()) else {
            return SlotPaste::NoImage;
        };
        let payload = ImagePayload::new(item.mime_type.clone(), item.data.clone());
        if self.bind_image(ordinal, payload) {
            SlotPaste::Bound { ordinal }
        } else {
            SlotPaste::Rejected
        }
    }
}
