//! # Utility Modules
//!
//! Supporting utilities for compression, encryption, buffering, duplicate detection,
//! metrics and logging.
//!
//! ## Components
//! - **Compression**: LZ4 and Zstd with output caps and a ratio guard
//! - **Crypto**: XChaCha20-Poly1305 AEAD with nonce-prefixed ciphertexts
//! - **Buffer Pool**: reusable frame buffers for the encode path
//! - **Recent Window**: bounded FIFO set of recently accepted sequence numbers
//! - **Metrics**: per-engine atomic counters
//! - **Logging**: `tracing-subscriber` setup
//!
//! ## Security
//! - Nonces and key material come from the OS RNG (getrandom)
//! - Decompression bomb protection (configurable cap)
//! - Session keys are zeroed on drop (zeroize crate)

pub mod buffer_pool;
pub mod compression;
pub mod crypto;
pub mod logging;
pub mod metrics;
pub mod recent_window;

pub use crypto::SessionKey;
pub use recent_window::RecentWindow;
