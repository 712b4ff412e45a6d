/*
 * decoder.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Corriere, a cross-platform application runtime.
 *
 * Corriere is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Corriere is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Corriere.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Transparent body decoding: gzip and deflate inflation of response chunks
//! before they reach the cache writer, file writer, or caller. Absent (or
//! unrecognized) content-encoding is a pass-through. A single compressed
//! input chunk may inflate to many output chunks; input is fed through the
//! decoder in bounded slices so inflation stays incremental.

use std::io;
use std::io::Write;

use flate2::write::{GzDecoder, ZlibDecoder};

/// Upper bound on the input slice handed to the inflater per write.
pub const SCRATCH_CHUNK: usize = 16 * 1024;

enum Inner {
    Passthrough,
    Gzip(GzDecoder<Vec<u8>>),
    Deflate(ZlibDecoder<Vec<u8>>),
}

/// Streaming body decoder, armed from the response's content-encoding.
/// `feed` appends decoded bytes to `out`; `finish` closes the stream and any
/// input after that is an error.
pub struct BodyDecoder {
    inner: Inner,
    closed: bool,
}

impl BodyDecoder {
    pub fn new(content_encoding: Option<&str>) -> Self {
        let inner = match content_encoding.map(|e| e.trim().to_ascii_lowercase()) {
            Some(enc) if enc == "gzip" || enc == "x-gzip" => {
                Inner::Gzip(GzDecoder::new(Vec::new()))
            }
            Some(enc) if enc == "deflate" => Inner::Deflate(ZlibDecoder::new(Vec::new())),
            _ => Inner::Passthrough,
        };
        Self {
            inner,
            closed: false,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        matches!(self.inner, Inner::Passthrough)
    }

    /// Decode one input chunk, appending the inflated bytes to `out`.
    pub fn feed(&mut self, input: &[u8], out: &mut Vec<u8>) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "body data after end of compressed stream",
            ));
        }
        match &mut self.inner {
            Inner::Passthrough => {
                out.extend_from_slice(input);
            }
            Inner::Gzip(d) => {
                for piece in input.chunks(SCRATCH_CHUNK) {
                    d.write_all(piece)?;
                    d.flush()?;
                    out.append(d.get_mut());
                }
            }
            Inner::Deflate(d) => {
                for piece in input.chunks(SCRATCH_CHUNK) {
                    d.write_all(piece)?;
                    d.flush()?;
                    out.append(d.get_mut());
                }
            }
        }
        Ok(())
    }

    /// Close the stream at end of message, flushing any remaining output.
    /// A truncated compressed stream is an error.
    pub fn finish(&mut self, out: &mut Vec<u8>) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        match std::mem::replace(&mut self.inner, Inner::Passthrough) {
            Inner::Passthrough => Ok(()),
            Inner::Gzip(d) => {
                let rest = d.finish()?;
                out.extend_from_slice(&rest);
                Ok(())
            }
            Inner::Deflate(d) => {
                let rest = d.finish()?;
                out.extend_from_slice(&rest);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::{GzEncoder, ZlibEncoder};
    use flate2::Compression;

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn decode_in_pieces(decoder: &mut BodyDecoder, data: &[u8], step: usize) -> Vec<u8> {
        let mut out = Vec::new();
        for piece in data.chunks(step) {
            decoder.feed(piece, &mut out).unwrap();
        }
        decoder.finish(&mut out).unwrap();
        out
    }

    #[test]
    fn gzip_round_trip_across_many_chunks() {
        let original = sample(100 * 1024); // several SCRATCH_CHUNK spans
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(&original).unwrap();
        let compressed = enc.finish().unwrap();

        let mut dec = BodyDecoder::new(Some("gzip"));
        assert!(!dec.is_passthrough());
        let out = decode_in_pieces(&mut dec, &compressed, 7777);
        assert_eq!(out, original);
    }

    #[test]
    fn deflate_round_trip() {
        let original = sample(40 * 1024);
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(&original).unwrap();
        let compressed = enc.finish().unwrap();

        let mut dec = BodyDecoder::new(Some("deflate"));
        let out = decode_in_pieces(&mut dec, &compressed, 1000);
        assert_eq!(out, original);
    }

    #[test]
    fn absent_encoding_is_passthrough() {
        let mut dec = BodyDecoder::new(None);
        assert!(dec.is_passthrough());
        let mut out = Vec::new();
        dec.feed(b"hello", &mut out).unwrap();
        dec.finish(&mut out).unwrap();
        assert_eq!(out, b"hello");
    }

    #[test]
    fn input_after_finish_is_error() {
        let mut dec = BodyDecoder::new(None);
        let mut out = Vec::new();
        dec.finish(&mut out).unwrap();
        assert!(dec.feed(b"x", &mut out).is_err());
    }
}
