use anyhow::{anyhow, Result};
use byteorder::{ByteOrder, LittleEndian};

use super::{DecodeErrorReason, HibrError};

/// Maximum match length after the `+3` bias is applied; an overflow guard on
/// the pre-bias accumulated size (`0x07 + 0x0f + 0xff`... capped at this).
const MAX_MATCH_LEN_RAW: u32 = 0xFFFB;

/// Decompresses an LZXPRESS-compressed page group into `dst`.
///
/// `dst` must be exactly the target uncompressed size; `decompress` never
/// writes fewer bytes than that unless the input is malformed, in which case
/// it returns a `Decode` error instead of a partially-filled buffer.
///
/// The stream is a sequence of 32-bit little-endian indicator words consumed
/// MSB-first, each followed by up to 32 items: a 0 bit copies one literal
/// byte, a 1 bit consumes a 16-bit `(length, offset)` tuple and performs a
/// back-reference copy. Indicator bits beyond the end of `src` are ignored.
pub fn decompress(src: &[u8], dst: &mut [u8]) -> Result<()> {
    let mut decoder = Decoder {
        src,
        src_pos: 0,
        dst,
        dst_pos: 0,
        shared_nibble_index: None,
    };
    decoder.run()
}

struct Decoder<'a> {
    src: &'a [u8],
    src_pos: usize,
    dst: &'a mut [u8],
    dst_pos: usize,
    /// Index into `src` of the byte sharing its low/high nibble between two
    /// consecutive extended-length-7 matches. Reset implicitly by going back
    /// to `None` once the shared byte has been consumed from both sides.
    shared_nibble_index: Option<usize>,
}

fn truncated() -> anyhow::Error {
    anyhow!(HibrError::Decode {
        reason: DecodeErrorReason::TruncatedInput,
    })
}

impl<'a> Decoder<'a> {
    fn run(&mut self) -> Result<()> {
        while self.src_pos < self.src.len() {
            if self.src_pos + 4 > self.src.len() {
                // A trailing partial indicator word with no items left to
                // address is simply the end of the stream, not an error.
                break;
            }
            let indicator = LittleEndian::read_u32(&self.src[self.src_pos..self.src_pos + 4]);
            self.src_pos += 4;

            let mut mask: u32 = 0x8000_0000;
            while mask > 0 {
                if self.src_pos >= self.src.len() {
                    break;
                }
                if indicator & mask != 0 {
                    self.copy_match()?;
                } else {
                    self.copy_literal()?;
                }
                mask >>= 1;
            }
        }
        Ok(())
    }

    fn push_byte(&mut self, byte: u8) -> Result<()> {
        if self.dst_pos >= self.dst.len() {
            return Err(anyhow!(HibrError::Decode {
                reason: DecodeErrorReason::OutputOverflow,
            }));
        }
        self.dst[self.dst_pos] = byte;
        self.dst_pos += 1;
        Ok(())
    }

    fn copy_literal(&mut self) -> Result<()> {
        if self.src_pos >= self.src.len() {
            return Err(truncated());
        }
        let byte = self.src[self.src_pos];
        self.src_pos += 1;
        self.push_byte(byte)
    }

    fn copy_match(&mut self) -> Result<()> {
        if self.src_pos + 2 > self.src.len() {
            return Err(truncated());
        }
        let tuple = LittleEndian::read_u16(&self.src[self.src_pos..self.src_pos + 2]);
        self.src_pos += 2;

        let mut length: u32 = (tuple & 0x7) as u32;
        let offset = ((tuple >> 3) as u32) + 1;

        if length == 0x7 {
            match self.shared_nibble_index {
                None => {
                    if self.src_pos >= self.src.len() {
                        return Err(truncated());
                    }
                    length += (self.src[self.src_pos] & 0x0f) as u32;
                    self.shared_nibble_index = Some(self.src_pos);
                    self.src_pos += 1;
                }
                Some(shared_index) => {
                    length += (self.src[shared_index] >> 4) as u32;
                    self.shared_nibble_index = None;
                }
            }
        }

        if length == 0x07 + 0x0f {
            if self.src_pos >= self.src.len() {
                return Err(truncated());
            }
            length += self.src[self.src_pos] as u32;
            self.src_pos += 1;
        }

        if length == 0x07 + 0x0f + 0xff {
            if self.src_pos + 2 > self.src.len() {
                return Err(truncated());
            }
            length = LittleEndian::read_u16(&self.src[self.src_pos..self.src_pos + 2]) as u32;
            self.src_pos += 2;
        }

        if length > MAX_MATCH_LEN_RAW {
            return Err(anyhow!(HibrError::Decode {
                reason: DecodeErrorReason::MatchTooLarge,
            }));
        }
        let match_len = length + 3;

        if offset as usize > self.dst_pos {
            return Err(anyhow!(HibrError::Decode {
                reason: DecodeErrorReason::BackrefOutOfBounds,
            }));
        }
        let mut copy_from = self.dst_pos - offset as usize;
        for _ in 0..match_len {
            let byte = self.dst[copy_from];
            self.push_byte(byte)?;
            copy_from += 1;
        }
        Ok(())
    }
}
