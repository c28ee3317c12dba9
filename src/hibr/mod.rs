pub mod cache;
pub mod compression;
pub mod container;
pub mod metadata;
pub mod reader;
pub mod source;

use std::error::Error;
use std::fmt::{Debug, Display};

/// Reason a memory-image-information page was rejected during probing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UnsupportedFormatReason {
    /// The `size` discriminator at `[12..16]` was zero.
    EmptyMetadataPage,
    /// The `size` discriminator did not match any known variant (88, 112, 48, 56).
    UnknownMetadataSize(u32),
    /// `page_size` was not a power of two in `512..=65536`.
    InvalidPageSize,
}

/// Reason the page-map / compressed-group chain failed validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CorruptIndexReason {
    /// A group's payload (plus padding) extends past the end of the source.
    GroupOutOfBounds,
    /// The next page-map offset did not strictly exceed the current one.
    NonMonotonicChain,
    /// The page-map visit count exceeded the cycle-breaker limit.
    CycleLimit,
    /// A page-map's `entry_count` failed the bounds check against the page size.
    InvalidEntryCount,
}

/// Reason LZXPRESS decoding of a compressed page group failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecodeErrorReason {
    /// The input ended in the middle of a tuple or extended-length byte.
    TruncatedInput,
    /// A back-reference pointed before the start of the output.
    BackrefOutOfBounds,
    /// The decoded stream would write past the end of the output buffer.
    OutputOverflow,
    /// The accumulated match length exceeded the `0xFFFB` bound.
    MatchTooLarge,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HibrError {
    Io { offset: u64, message: String },
    UnsupportedFormat { reason: UnsupportedFormatReason },
    CorruptIndex { reason: CorruptIndexReason },
    Decode { reason: DecodeErrorReason },
    InvalidArgument,
    NotOpen,
    AlreadyOpen,
    /// `open` was called on a reader that has already run `close`; distinct
    /// from `AlreadyOpen`, which is reserved for a reader still in the
    /// `Open` state.
    AlreadyClosed,
    Aborted,
}

impl Display for HibrError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl Error for HibrError {}
