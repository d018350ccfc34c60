//! Level data transfer.
//!
//! The block array is prefixed with its big-endian length, gzip
//! compressed, and streamed as 1024-byte `LevelDataChunk` packets closed
//! by a `LevelFinalize` carrying the map dimensions. The deflate body
//! comes from `flate2`; the gzip framing around it is written here so the
//! compressor can be driven straight into each chunk's data slot.

use crate::packet::{encode_to_vec, LevelDataChunk, LevelFinalize, PacketId};
use crate::LEVEL_CHUNK_SIZE;
use flate2::{Compress, CompressError, Compression, FlushCompress, Status};

const GZIP_HEADER: [u8; 10] = [0x1f, 0x8b, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff];
const GZIP_TRAILER_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelDimensions {
    pub x: i16,
    pub y: i16,
    pub z: i16,
}

impl LevelDimensions {
    pub fn new(x: i16, y: i16, z: i16) -> Self {
        Self { x, y, z }
    }

    pub fn volume(&self) -> usize {
        self.x.max(0) as usize * self.y.max(0) as usize * self.z.max(0) as usize
    }

    pub fn contains(&self, x: i16, y: i16, z: i16) -> bool {
        (0..self.x).contains(&x) && (0..self.y).contains(&y) && (0..self.z).contains(&z)
    }

    /// Index of a block in the y-major, then z, then x layout.
    pub fn index_of(&self, x: i16, y: i16, z: i16) -> Option<usize> {
        if !self.contains(x, y, z) {
            return None;
        }
        let (x, y, z) = (x as usize, y as usize, z as usize);
        Some((y * self.z as usize + z) * self.x as usize + x)
    }
}

/// Result of one compressor step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeflateProgress {
    pub written: usize,
    pub pending_input: usize,
}

/// Incremental gzip compressor over a length-prefixed block array.
pub struct LevelCompressor<'a> {
    prefix: [u8; 4],
    blocks: &'a [u8],
    consumed: usize,
    deflate: Compress,
    crc: crc32fast::Hasher,
    header_written: usize,
    body_finished: bool,
    trailer: [u8; GZIP_TRAILER_SIZE],
    trailer_written: usize,
}

fn remaining_input<'b>(prefix: &'b [u8; 4], blocks: &'b [u8], consumed: usize) -> &'b [u8] {
    if consumed < prefix.len() {
        &prefix[consumed..]
    } else {
        &blocks[consumed - prefix.len()..]
    }
}

impl<'a> LevelCompressor<'a> {
    pub fn new(blocks: &'a [u8]) -> Self {
        Self {
            prefix: (blocks.len() as u32).to_be_bytes(),
            blocks,
            consumed: 0,
            deflate: Compress::new(Compression::default(), false),
            crc: crc32fast::Hasher::new(),
            header_written: 0,
            body_finished: false,
            trailer: [0; GZIP_TRAILER_SIZE],
            trailer_written: 0,
        }
    }

    pub fn total_input(&self) -> usize {
        self.prefix.len() + self.blocks.len()
    }

    pub fn pending_input(&self) -> usize {
        self.total_input() - self.consumed
    }

    pub fn is_finished(&self) -> bool {
        self.body_finished && self.trailer_written == GZIP_TRAILER_SIZE
    }

    /// Fills as much of `out` as possible and reports how much input is left.
    pub fn deflate_into(&mut self, out: &mut [u8]) -> Result<DeflateProgress, CompressError> {
        let mut written = 0;

        let header = &GZIP_HEADER[self.header_written..];
        let copied = header.len().min(out.len());
        out[..copied].copy_from_slice(&header[..copied]);
        self.header_written += copied;
        written += copied;

        while !self.body_finished && written < out.len() {
            let input = remaining_input(&self.prefix, self.blocks, self.consumed);
            let flush = if self.consumed + input.len() == self.total_input() {
                FlushCompress::Finish
            } else {
                FlushCompress::None
            };

            let before_in = self.deflate.total_in();
            let before_out = self.deflate.total_out();
            let status = self.deflate.compress(input, &mut out[written..], flush)?;
            let read = (self.deflate.total_in() - before_in) as usize;
            let produced = (self.deflate.total_out() - before_out) as usize;

            self.crc.update(&input[..read]);
            self.consumed += read;
            written += produced;

            if status == Status::StreamEnd {
                self.body_finished = true;
                let crc = self.crc.clone().finalize();
                self.trailer[..4].copy_from_slice(&crc.to_le_bytes());
                let total = self.total_input() as u32;
                self.trailer[4..].copy_from_slice(&total.to_le_bytes());
            } else if read == 0 && produced == 0 {
                break;
            }
        }

        if self.body_finished {
            let trailer = &self.trailer[self.trailer_written..];
            let copied = trailer.len().min(out.len() - written);
            out[written..written + copied].copy_from_slice(&trailer[..copied]);
            self.trailer_written += copied;
            written += copied;
        }

        Ok(DeflateProgress {
            written,
            pending_input: self.pending_input(),
        })
    }
}

/// Serializes a whole level into chunk packets followed by the finalize packet.
pub fn serialize_level(blocks: &[u8], dimensions: LevelDimensions) -> Result<Vec<u8>, CompressError> {
    let mut compressor = LevelCompressor::new(blocks);
    let total = compressor.total_input();
    let mut out = Vec::with_capacity(PacketId::LevelDataChunk.size() * (blocks.len() / 256 + 1));

    loop {
        let mut data = [0u8; LEVEL_CHUNK_SIZE];
        let mut length = 0;
        let mut pending = total;

        while length < LEVEL_CHUNK_SIZE && !compressor.is_finished() {
            let progress = compressor.deflate_into(&mut data[length..])?;
            length += progress.written;
            pending = progress.pending_input;
            if progress.written == 0 {
                break;
            }
        }

        if length > 0 {
            let percent_complete = ((total - pending) * 100 / total) as u8;
            encode_to_vec(
                &LevelDataChunk {
                    length: length as i16,
                    data: &data,
                    percent_complete,
                },
                &mut out,
            );
        }

        if compressor.is_finished() || length == 0 {
            break;
        }
    }

    encode_to_vec(
        &LevelFinalize {
            x: dimensions.x,
            y: dimensions.y,
            z: dimensions.z,
        },
        &mut out,
    );

    Ok(out)
}
