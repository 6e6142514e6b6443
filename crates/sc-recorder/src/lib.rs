//! `sc-recorder` — The recording session controller.
//!
//! Wires the pipeline together and owns its lifecycle:
//!
//! ```text
//! caller thread                                   writer thread
//! -------------                                   -------------
//! encode_frame -> VideoEncoder -> Annex-B ---+
//!                 NAL scan / record sniff    |--> WriterPump --> Mp4Muxer
//! write_audio  -> AudioEncoder -> AAC AUs ---+      (FIFO)        (file)
//! ```
//!
//! - [`writer`] — the single background thread that serializes disk writes.
//! - [`diag`] — the optional per-session diagnostic text log.
//! - [`recorder`] — the [`Recorder`] facade: `create`, `encode_frame`,
//!   `write_audio`, `finalize`, `close`, `last_error`.

pub mod diag;
pub mod recorder;
pub mod writer;

pub use diag::DiagnosticLog;
pub use recorder::Recorder;
pub use writer::{WriterError, WriterMessage, WriterPump};
