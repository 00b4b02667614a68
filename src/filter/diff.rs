//! Differential filter: an xdelta3 substitute built on `librsync`'s
//! signature/delta/patch streams. `source_block_size` maps to librsync's
//! `block_len`; `window_size` is carried on disk for format fidelity but is
//! inert here, since librsync manages its own working set internally.

use std::io::{self, Read, Seek, SeekFrom};

use librsync::{Delta, Patch, Signature, SignatureType};

use crate::error::FilterError;
use crate::io::{SeekableSource, Source, END_OF_STREAM};

const STRONG_LEN_FULL: usize = 0;

fn wrap_err(codec: &'static str, e: librsync::Error) -> FilterError {
    FilterError::Codec {
        codec,
        message: e.to_string(),
    }
}

/// Owns a boxed [`Source`] and presents it as `std::io::Read`, translating
/// [`END_OF_STREAM`] to a `0`-length read per the `Read` contract.
struct OwnedSourceRead {
    inner: Box<dyn Source>,
    eof: bool,
}

impl OwnedSourceRead {
    fn new(inner: Box<dyn Source>) -> Self {
        Self { inner, eof: false }
    }
}

impl Read for OwnedSourceRead {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.eof {
            return Ok(0);
        }
        let n = self.inner.read(buf)?;
        if n == END_OF_STREAM {
            self.eof = true;
            Ok(0)
        } else {
            Ok(n)
        }
    }
}

/// Owns a boxed [`SeekableSource`] and presents it as `Read + Seek`, as
/// required for the basis file of a [`Patch`].
struct OwnedSeekableSourceRead {
    inner: Box<dyn SeekableSource>,
    pos: u64,
    eof: bool,
}

impl OwnedSeekableSourceRead {
    fn new(inner: Box<dyn SeekableSource>) -> Self {
        Self {
            inner,
            pos: 0,
            eof: false,
        }
    }
}

impl Read for OwnedSeekableSourceRead {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.eof {
            return Ok(0);
        }
        let n = self.inner.read(buf)?;
        if n == END_OF_STREAM {
            self.eof = true;
            Ok(0)
        } else {
            self.pos += n as u64;
            Ok(n)
        }
    }
}

impl Seek for OwnedSeekableSourceRead {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::Current(d) => self.pos as i64 + d,
            SeekFrom::End(d) => self.inner.size() as i64 + d,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to negative offset",
            ));
        }
        self.inner.seek_to(target as u64)?;
        self.pos = target as u64;
        self.eof = false;
        Ok(self.pos)
    }
}

/// Produces a delta between a reference source and incoming new data.
pub struct DiffEncodeSource {
    delta: Delta<OwnedSourceRead>,
}

impl DiffEncodeSource {
    pub fn new(
        reference: Box<dyn SeekableSource>,
        new_data: Box<dyn Source>,
        block_len: usize,
    ) -> Result<Self, FilterError> {
        let mut reference_read = OwnedSeekableSourceRead::new(reference);
        let mut sig = Signature::with_options(
            &mut reference_read,
            block_len,
            STRONG_LEN_FULL,
            SignatureType::Blake2,
        )
        .map_err(|e| wrap_err("diff_signature", e))?;
        let delta = Delta::new(OwnedSourceRead::new(new_data), &mut sig)
            .map_err(|e| wrap_err("diff_delta", e))?;
        Ok(Self { delta })
    }
}

impl Source for DiffEncodeSource {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        let n = self.delta.read(dst)?;
        if n == 0 {
            Ok(END_OF_STREAM)
        } else {
            Ok(n)
        }
    }
}

/// Reconstructs new data from a reference source and a delta produced by
/// [`DiffEncodeSource`].
pub struct DiffDecodeSource<'a> {
    patch: Patch<'a, OwnedSeekableSourceRead, OwnedSourceRead>,
}

impl DiffDecodeSource<'_> {
    pub fn new(
        reference: Box<dyn SeekableSource>,
        delta_data: Box<dyn Source>,
    ) -> Result<Self, FilterError> {
        let base = OwnedSeekableSourceRead::new(reference);
        let delta = OwnedSourceRead::new(delta_data);
        let patch = Patch::new(base, delta).map_err(|e| wrap_err("diff_patch", e))?;
        Ok(Self { patch })
    }
}

impl Source for DiffDecodeSource<'_> {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        let n = self.patch.read(dst)?;
        if n == 0 {
            Ok(END_OF_STREAM)
        } else {
            Ok(n)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemorySource;

    fn drain(mut source: impl Source) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 32];
        loop {
            let n = source.read(&mut buf).unwrap();
            if n == END_OF_STREAM {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        out
    }

    #[test]
    fn diff_encode_then_decode_reconstructs_new_data() {
        let base = b"The quick brown fox jumps over the lazy dog, repeatedly and at length.";
        let new = b"The quick brown fox jumps over the lazy hound, repeatedly and at length, twice.";

        let reference: Box<dyn SeekableSource> = Box::new(MemorySource::new(base));
        let new_data: Box<dyn Source> = Box::new(MemorySource::new(new));
        let encoder = DiffEncodeSource::new(reference, new_data, 64).unwrap();
        let delta = drain(encoder);
        assert!(!delta.is_empty());

        let reference2: Box<dyn SeekableSource> = Box::new(MemorySource::new(base));
        let delta_source: Box<dyn Source> = Box::new(MemorySource::new(&delta));
        let decoder = DiffDecodeSource::new(reference2, delta_source).unwrap();
        assert_eq!(drain(decoder), new.to_vec());
    }
}
