//! `sc-encoder` — NVENC hardware video encoder session.
//!
//! The nvEncodeAPI library is loaded dynamically at runtime, so the
//! application can degrade gracefully when no NVIDIA hardware is present.
//!
//! # Module Structure
//!
//! - [`nvenc::ffi`] — Raw FFI bindings (loaded via `libloading`).
//! - [`nvenc::params`] — Parameter mapping from `SessionConfig` to NVENC.
//! - [`nvenc::VideoEncoder`] — The session state machine implementing
//!   `sc_common::VideoBackend`.
//!
//! # Encode pipeline
//!
//! ```text
//! 1. Load the NVENC library once via NvencLibrary::load().
//! 2. Open a DirectX-mode session against the caller's device.
//! 3. Per frame: stage/convert the surface, map, submit one picture into
//!    the next bitstream slot of the ring.
//! 4. Consume a slot (doNotWait lock poll) when wrapping onto it.
//! 5. At end of stream, submit an EOS picture and consume every pending
//!    slot in index order.
//! ```

pub mod nvenc;

pub use nvenc::ffi::NvencLibrary;
pub use nvenc::VideoEncoder;
