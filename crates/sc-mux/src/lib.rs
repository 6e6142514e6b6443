//! `sc-mux` — Streaming ISO-BMFF (MP4) writer for the SwiftCap recorder.
//!
//! The muxer writes a single-segment MP4 in one forward pass:
//!
//! ```text
//! ftyp | mdat (largesize, patched at finalize) ....samples.... | moov
//! ```
//!
//! Media samples go straight to disk as they arrive; only per-sample
//! bookkeeping (offset, size, duration, sync flag) is held in memory, and
//! the `moov` index is composed from those tables at finalize.
//!
//! Module map:
//!
//! - [`sink`] — append-only file with a cached logical position.
//! - [`atoms`] — in-memory big-endian box writer (`begin_box`/`end_box`).
//! - [`annexb`] — Annex-B NAL scanner and length-prefix transform.
//! - [`codec_config`] — `avcC`/`hvcC`/`esds`/AudioSpecificConfig builders.
//! - [`mp4`] — `moov` composition from the sample tables.
//! - [`muxer`] — the streaming [`Mp4Muxer`] state machine.

pub mod annexb;
pub mod atoms;
pub mod codec_config;
pub mod error;
pub mod mp4;
pub mod muxer;
pub mod sink;

pub use annexb::{parse_annex_b, to_length_prefixed, NalUnit};
pub use atoms::BoxBuilder;
pub use error::{MuxError, MuxResult};
pub use muxer::{AudioTrackParams, Mp4Muxer, MuxerConfig, MuxerState};
pub use sink::ByteSink;
