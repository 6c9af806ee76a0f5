//! flz2 — block-parallel LZMA2 compression with a radix match finder.
//!
//! The codec compresses arbitrary byte streams into a self-framed
//! LZMA2 container and restores them bit-exactly. Frames are produced
//! block by block: a radix match finder indexes each dictionary block
//! once, worker slices encode against the shared index in parallel,
//! and the outputs are concatenated in input order so the frame is
//! identical in meaning regardless of thread count.
//!
//! **Entry points:**
//!
//! | API | Use |
//! |---|---|
//! | [`compress`] / [`decompress`] | one-shot buffers |
//! | [`CCtx`] / [`DCtx`] | reusable contexts across frames |
//! | [`CompressStream`] / [`DecompressStream`] | cursor-driven streaming |
//! | [`compress_bound`] | worst-case output sizing |
//! | [`find_decompressed_size`] | frame size probe without decoding |

pub mod decoder;
pub mod encoder;
pub mod frame;
pub mod model;
pub mod pipeline;
pub mod pool;
pub mod rangecoder;
pub mod rmf;
pub mod streaming;

#[cfg(test)]
mod validation;

pub use decoder::{DCtx, Lzma2Decoder};
pub use encoder::Strategy;
pub use frame::{compress_bound, find_decompressed_size};
pub use pipeline::{CCtx, CompressOptions, DEFAULT_COMPRESSION_LEVEL, MAX_COMPRESSION_LEVEL};
pub use streaming::{CompressStream, DecompressStream, InBuffer, OutBuffer};

/// Error taxonomy for all public operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Flz2Error {
    /// Unclassified internal failure.
    Generic,
    /// Operation requires an initialized context or stream.
    InitMissing,
    /// An allocation failed.
    MemoryAllocation,
    /// Parameter valid but not supported by this build.
    ParameterUnsupported,
    /// Parameter outside its documented range.
    ParameterOutOfBound,
    /// Literal context plus literal position bits exceed 4.
    LclpMaxExceeded,
    /// Operation not possible in the current context state.
    StageWrong,
    /// Source does not contain exactly one complete frame.
    SrcSizeWrong,
    /// Destination buffer cannot hold the result.
    DstSizeTooSmall,
    /// Compressed input is malformed.
    CorruptionDetected,
    /// Frame trailer does not match the decoded payload.
    ChecksumWrong,
    /// Processing was canceled by a callback.
    Canceled,
    /// Streaming progress halted on full/empty buffers.
    Buffer,
}

impl Flz2Error {
    /// Stable human-readable name, matching [`std::fmt::Display`].
    pub fn name(self) -> &'static str {
        match self {
            Self::Generic => "Error (generic)",
            Self::InitMissing => "Context should be init first",
            Self::MemoryAllocation => "Allocation error : not enough memory",
            Self::ParameterUnsupported => "Unsupported parameter",
            Self::ParameterOutOfBound => "Parameter is out of bound",
            Self::LclpMaxExceeded => "Parameters lc+lp > 4",
            Self::StageWrong => "Not possible at this stage",
            Self::SrcSizeWrong => "Src size is incorrect",
            Self::DstSizeTooSmall => "Destination buffer is too small",
            Self::CorruptionDetected => "Corrupted block detected",
            Self::ChecksumWrong => "Restored data doesn't match checksum",
            Self::Canceled => "Processing was canceled by a callback",
            Self::Buffer => "Streaming progress halted due to buffer(s) full/empty",
        }
    }
}

impl std::fmt::Display for Flz2Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::error::Error for Flz2Error {}

/// Result alias used throughout the crate.
pub type Flz2Result<T> = Result<T, Flz2Error>;

/// Name for an optional error code; `None` is success.
pub fn error_name(err: Option<Flz2Error>) -> &'static str {
    match err {
        None => "No error detected",
        Some(e) => e.name(),
    }
}

/// Highest compression level accepted by [`compress`].
pub fn max_compression_level() -> u32 {
    MAX_COMPRESSION_LEVEL
}

/// Compress `src` into a single frame at the given level (1..=12).
pub fn compress(src: &[u8], level: u32) -> Flz2Result<Vec<u8>> {
    CCtx::with_level(level)?.compress(src)
}

/// Compress with explicit options.
pub fn compress_with_options(src: &[u8], options: &CompressOptions) -> Flz2Result<Vec<u8>> {
    options.validate()?;
    CCtx::with_options(options.clone()).compress(src)
}

/// Decompress a complete frame.
pub fn decompress(src: &[u8]) -> Flz2Result<Vec<u8>> {
    DCtx::new().decompress(src)
}
