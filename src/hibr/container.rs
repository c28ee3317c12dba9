use anyhow::{anyhow, Result};
use byteorder::{ByteOrder, LittleEndian};
use tracing::trace;

use super::metadata::{FileVariant, ImageMetadata};
use super::source::{read_exact_at, ByteSource};
use super::{CorruptIndexReason, HibrError};

/// Literal byte signature opening every compressed-page-group header.
const GROUP_SIGNATURE: [u8; 8] = [0x81, 0x81, b'x', b'p', b'r', b'e', b's', b's'];
const GROUP_HEADER_SIZE: u64 = 32;

/// Fallback start-of-chain offset used by every variant except `WinXP32`,
/// which instead starts at `memory_blocks_page_number * page_size`. This
/// literal is preserved verbatim from the source format; it is not derived
/// from `page_size` or any other field and its origin is undocumented.
pub const WIN7_PAGE_MAP_FALLBACK_OFFSET: u64 = 0x6000;

/// Describes one compressed page group: where its payload lives in the
/// source, how large the compressed and decompressed forms are, and where
/// its bytes land in the reconstructed logical image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GroupDescriptor {
    /// Absolute byte offset of the compressed payload (immediately after
    /// the 32-byte group header) in the source.
    pub payload_offset: u64,
    /// Compressed byte length, excluding the header and alignment padding.
    pub payload_len: u32,
    /// Bytes of alignment padding (0..=7) following the payload.
    pub padding_len: u8,
    /// Number of uncompressed pages in this group (1..=256).
    pub num_pages: u16,
    /// `num_pages * page_size`.
    pub uncompressed_len: u64,
    /// Cumulative sum of prior groups' `uncompressed_len`.
    pub logical_offset: u64,
}

impl GroupDescriptor {
    fn payload_end(&self) -> u64 {
        self.payload_offset + self.payload_len as u64 + self.padding_len as u64
    }
}

/// The ordered list of compressed page groups making up a hibernation file,
/// built once at open time by walking the chain of page maps.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerIndex {
    pub groups: Vec<GroupDescriptor>,
    pub media_size: u64,
}

impl ContainerIndex {
    /// Binary-searches for the group whose logical range contains
    /// `position`. `position` must already be known to be `< media_size`.
    pub fn group_containing(&self, position: u64) -> Option<usize> {
        if self.groups.is_empty() {
            return None;
        }
        let idx = match self
            .groups
            .binary_search_by(|g| g.logical_offset.cmp(&position))
        {
            Ok(idx) => idx,
            Err(0) => return None,
            Err(idx) => idx - 1,
        };
        let group = &self.groups[idx];
        if position >= group.logical_offset && position < group.logical_offset + group.uncompressed_len {
            Some(idx)
        } else {
            None
        }
    }
}

fn page_map_offsets(variant: FileVariant) -> (std::ops::Range<usize>, std::ops::Range<usize>) {
    match variant {
        FileVariant::WinXP32 => (4..8, 12..16),
        // Win7_64, and by design every other non-XP32 variant.
        _ => (0..4, 8..12),
    }
}

/// Walks the chain of page maps starting from `metadata`'s chain-start
/// offset, scanning each region for compressed-page-group headers and
/// building the file-ordered `ContainerIndex`.
pub fn build<S: ByteSource + ?Sized>(source: &S, metadata: &ImageMetadata) -> Result<ContainerIndex> {
    let ps = metadata.page_size as u64;
    let source_size = source.size();

    let mut cursor = if metadata.memory_blocks_page_number != 0 {
        metadata.memory_blocks_page_number as u64 * ps
    } else {
        WIN7_PAGE_MAP_FALLBACK_OFFSET
    };

    let (next_range, entry_count_range) = page_map_offsets(metadata.variant);
    let cycle_limit = source_size / ps.max(1) + 1;
    let mut page_maps_visited: u64 = 0;

    let mut groups: Vec<GroupDescriptor> = Vec::new();

    while cursor < source_size {
        page_maps_visited += 1;
        if page_maps_visited > cycle_limit {
            return Err(anyhow!(HibrError::CorruptIndex {
                reason: CorruptIndexReason::CycleLimit,
            }));
        }

        let mut page_map = vec![0u8; ps as usize];
        read_exact_at(source, cursor, &mut page_map)?;

        let next_page_number = LittleEndian::read_u32(&page_map[next_range.clone()]);
        let entry_count = LittleEndian::read_u32(&page_map[entry_count_range.clone()]);
        let max_entries = ((ps - 16) / 16) as u32;
        if entry_count > max_entries {
            return Err(anyhow!(HibrError::CorruptIndex {
                reason: CorruptIndexReason::InvalidEntryCount,
            }));
        }
        trace!(cursor, next_page_number, entry_count, "read page map");

        let region_end = if next_page_number != 0 {
            next_page_number as u64 * ps
        } else {
            source_size
        };
        if region_end <= cursor + ps {
            return Err(anyhow!(HibrError::CorruptIndex {
                reason: CorruptIndexReason::NonMonotonicChain,
            }));
        }

        cursor += ps;

        while cursor < region_end {
            let mut header = [0u8; GROUP_HEADER_SIZE as usize];
            let got = source.read_at(cursor, &mut header)?;
            if got < header.len() || header[0..8] != GROUP_SIGNATURE {
                cursor = region_end;
                break;
            }

            let num_pages_minus_one = header[8];
            let raw_size = LittleEndian::read_u32(&header[9..13]);
            let num_pages = num_pages_minus_one as u16 + 1;
            let payload_len = (raw_size >> 2) + 1;
            let padding_len = ((8 - (payload_len % 8)) % 8) as u8;

            let descriptor = GroupDescriptor {
                payload_offset: cursor + GROUP_HEADER_SIZE,
                payload_len,
                padding_len,
                num_pages,
                uncompressed_len: num_pages as u64 * ps,
                logical_offset: 0,
            };
            if descriptor.payload_end() > source_size {
                return Err(anyhow!(HibrError::CorruptIndex {
                    reason: CorruptIndexReason::GroupOutOfBounds,
                }));
            }
            cursor = descriptor.payload_end();
            groups.push(descriptor);
        }

        if next_page_number == 0 {
            break;
        }
        cursor = next_page_number as u64 * ps;
    }

    let mut logical_offset = 0u64;
    for group in &mut groups {
        group.logical_offset = logical_offset;
        logical_offset += group.uncompressed_len;
    }

    Ok(ContainerIndex {
        groups,
        media_size: logical_offset,
    })
}
