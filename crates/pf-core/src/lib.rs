//! pf-core: shared types, errors, configuration, and extension traits.
//!
//! This crate is the foundational dependency for all other pf-* crates,
//! providing the error taxonomy, the execution [`Scope`], the image-state
//! data model threaded through pipelines, and the [`Step`], [`Hook`],
//! [`Decoder`] and [`Encoder`] capabilities that backends implement.

pub mod codec;
pub mod config;
pub mod error;
pub mod ids;
pub mod media;
pub mod scope;
pub mod source;
pub mod state;
pub mod step;

// Re-export the most commonly used items at the crate root.
pub use codec::{Decoder, EncodeOptions, Encoder};
pub use config::{AdaptiveConfig, Config, StorageConfig};
pub use error::{Category, Error, ErrorKind, Result};
pub use ids::*;
pub use media::*;
pub use scope::Scope;
pub use source::{Source, SourceHints};
pub use state::{DecodedImage, EncodeSettings, ImageState, NativeHandle, NativeImage};
pub use step::{Hook, Step, StepRef};
