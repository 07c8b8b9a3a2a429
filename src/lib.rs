//! # Radar Capture Library
//!
//! This crate captures digitized radar pulses streamed over TCP by a radar digitizer, groups
//! them into sweeps (one antenna rotation each) and stores the sweeps durably. The binary
//! (`main.rs`) is a thin CLI over [`session::CaptureSession`]; the `pulse-sender` tool
//! stands in for the digitizer in tests and bench setups.
//!
//! ## Data Flow
//!
//! ```text
//! digitizer --TCP--> ingest --chunks--> ring_buffer --chunks--> persister --sweeps--> storage
//!                  (pulse-ingest thread)                       (caller's thread)
//! ```
//!
//! ## Crate Structure
//!
//! - **`config`**: `CaptureConfig`, loaded from TOML plus `RADAR_CAPTURE_` environment
//!   overrides with figment, and validated before anything binds or opens.
//! - **`error`**: the `CaptureError` enum shared by every stage, and `AppResult<T>`.
//! - **`logging`**: tracing-subscriber setup (pretty, compact or JSON on stderr).
//! - **`validation`**: small validators used by `config`.
//! - **`frame`**: the Pulse Frame wire layout and its magic sentinels.
//! - **`codec`**: the stored sample format word and the bit-packing codec.
//! - **`ring_buffer`**: the single-producer single-consumer chunk ring.
//! - **`ingest`**: `TcpIngestor`, the ring's writer.
//! - **`sweep`**: decoded pulses and sweep-boundary detection.
//! - **`persister`**: `SweepPersister`, the ring's reader.
//! - **`storage`**: the `PulseSink` capability with SQLite and sweep-file backends.
//! - **`session`**: `CaptureSession`, which wires everything together and owns shutdown.

pub mod codec;
pub mod config;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod logging;
pub mod persister;
pub mod ring_buffer;
pub mod session;
pub mod storage;
pub mod sweep;
pub mod validation;

pub use config::CaptureConfig;
pub use error::{AppResult, CaptureError};
pub use session::{CaptureSession, SessionReport, ShutdownHandle};
