use anyhow::{anyhow, Result};
use byteorder::{ByteOrder, LittleEndian};
use num_enum::TryFromPrimitive;
use tracing::{debug, trace};

use super::source::ByteSource;
use super::{HibrError, UnsupportedFormatReason};

/// Size, in bytes, of the first page read while probing the file header.
/// The real page size is not known until the probe itself decodes it; this
/// is only large enough to cover every variant's fixed fields.
const PROBE_PAGE_SIZE: usize = 4096;

/// Tag identifying which of the four known on-disk layouts a hibernation
/// file uses. Determined solely by the byte length the memory-image-
/// information record declares for itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive)]
#[repr(u32)]
pub enum FileVariant {
    Win7_32 = 48,
    Win7_64 = 56,
    WinXP32 = 88,
    WinXP64 = 112,
}

/// Metadata extracted from the memory-image-information record at offset 0.
/// Immutable once probing succeeds; retained verbatim for the info façade,
/// never re-derived mid-operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageMetadata {
    pub variant: FileVariant,
    pub page_size: u32,
    /// Page number of the first page map. Only populated for `WinXP32`;
    /// other variants start their chain at a literal fallback offset.
    pub memory_blocks_page_number: u32,
    /// Total page count. Not present in the Win7 layouts' (truncated)
    /// record; left at 0 there.
    pub total_pages: u32,
    /// Free page count. Not present in the Win7 layouts' record; left at 0
    /// there.
    pub free_pages: u32,
    pub system_time_filetime: u64,
    pub feature_flags: u32,
    pub hibernation_flags: u32,
}

fn validate_page_size(page_size: u32) -> Result<()> {
    if !(512..=65536).contains(&page_size) || !page_size.is_power_of_two() {
        return Err(anyhow!(HibrError::UnsupportedFormat {
            reason: UnsupportedFormatReason::InvalidPageSize,
        }));
    }
    Ok(())
}

/// Reads the first page of `source` and extracts `ImageMetadata`, detecting
/// the file variant from the `size` field of the memory-image-information
/// record and filling in the fields the info façade retains verbatim.
pub fn probe<S: ByteSource + ?Sized>(source: &S) -> Result<ImageMetadata> {
    let read_len = PROBE_PAGE_SIZE.min(source.size() as usize);
    let mut page = vec![0u8; PROBE_PAGE_SIZE];
    let got = source.read_at(0, &mut page[..read_len])?;
    if got < 16 {
        return Err(anyhow!(HibrError::UnsupportedFormat {
            reason: UnsupportedFormatReason::EmptyMetadataPage,
        }));
    }

    // Signature and checksum are read but never validated (spec non-goal).
    let _signature = LittleEndian::read_u32(&page[0..4]);
    let _checksum = LittleEndian::read_u32(&page[8..12]);

    let size = LittleEndian::read_u32(&page[12..16]);
    trace!("memory-image-information size discriminator = {size}");
    if size == 0 {
        return Err(anyhow!(HibrError::UnsupportedFormat {
            reason: UnsupportedFormatReason::EmptyMetadataPage,
        }));
    }

    let variant = FileVariant::try_from_primitive(size).map_err(|_| {
        anyhow!(HibrError::UnsupportedFormat {
            reason: UnsupportedFormatReason::UnknownMetadataSize(size),
        })
    })?;
    debug!(?variant, "detected hibernation file variant");

    let mut metadata = ImageMetadata {
        variant,
        page_size: 0,
        memory_blocks_page_number: 0,
        total_pages: 0,
        free_pages: 0,
        system_time_filetime: 0,
        feature_flags: 0,
        hibernation_flags: 0,
    };

    match variant {
        FileVariant::WinXP32 => {
            metadata.page_size = LittleEndian::read_u32(&page[20..24]);
            metadata.memory_blocks_page_number = LittleEndian::read_u32(&page[68..72]);
            metadata.system_time_filetime = LittleEndian::read_u64(&page[32..40]);
            metadata.feature_flags = LittleEndian::read_u32(&page[48..52]);
            metadata.hibernation_flags = page[52] as u32;
            metadata.free_pages = LittleEndian::read_u32(&page[72..76]);
            metadata.total_pages = LittleEndian::read_u32(&page[84..88]);
        }
        FileVariant::WinXP64 => {
            metadata.page_size = LittleEndian::read_u32(&page[24..28]);
            metadata.system_time_filetime = LittleEndian::read_u64(&page[32..40]);
            metadata.feature_flags = LittleEndian::read_u32(&page[48..52]);
            metadata.hibernation_flags = page[52] as u32;
            metadata.free_pages = LittleEndian::read_u32(&page[80..84]);
            metadata.total_pages = LittleEndian::read_u64(&page[96..104]) as u32;
        }
        FileVariant::Win7_32 => {
            metadata.page_size = LittleEndian::read_u32(&page[16..20]);
            metadata.system_time_filetime = LittleEndian::read_u64(&page[24..32]);
            metadata.feature_flags = LittleEndian::read_u32(&page[40..44]);
            metadata.hibernation_flags = page[44] as u32;
        }
        FileVariant::Win7_64 => {
            // 8-byte page_size field; the upper 4 bytes must fit a u32.
            let wide = LittleEndian::read_u64(&page[16..24]);
            if wide > u32::MAX as u64 {
                return Err(anyhow!(HibrError::UnsupportedFormat {
                    reason: UnsupportedFormatReason::InvalidPageSize,
                }));
            }
            metadata.page_size = wide as u32;
            metadata.system_time_filetime = LittleEndian::read_u64(&page[32..40]);
            metadata.feature_flags = LittleEndian::read_u32(&page[48..52]);
            metadata.hibernation_flags = page[52] as u32;
        }
    }

    validate_page_size(metadata.page_size)?;
    Ok(metadata)
}
