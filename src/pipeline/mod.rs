//! Pipeline stages for document-to-canonical-text conversion.
//!
//! Each submodule implements exactly one transformation step.
//! Keeping stages separate makes each independently testable and lets the
//! remote call or the renderer be swapped without touching the rest.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ raster ──▶ encode ──▶ llm ──▶ normalize ──▶ materialize
//! (MIME)   (pdfium)   (base64)   (VLM)   (${...}$)     (blocks)
//! ```
//!
//! 1. [`input`]: read the file, sniff its MIME type, reject the rest
//! 2. [`raster`]: render PDF pages in batches (`spawn_blocking`), or
//!    downscale a photo on the optimiser thread
//! 3. [`encode`]: JPEG/PNG encoding and base64 upload inputs
//! 4. [`llm`]: the remote call with bounded retry; the only stage with
//!    network I/O
//! 5. [`normalize`]: rewrite every math span into the `${...}$` form
//! 6. [`materialize`]: canonical text + image bindings → document blocks

pub mod encode;
pub mod input;
pub mod llm;
pub mod materialize;
pub mod normalize;
pub mod raster;
