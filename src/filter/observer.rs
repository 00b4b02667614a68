//! Unbuffered observer filters: forward `read` one-to-one to a parent
//! source and call `observe` on each successful chunk. Used for byte
//! counters and the combined CRC32/MD5/SHA1 digester.

use std::cell::RefCell;
use std::io;
use std::rc::Rc;

use digest::Digest as _;
use md5::Md5;
use sha1::Sha1;

use crate::archive::model::DigestInfo;
use crate::io::{Source, END_OF_STREAM};

/// Forwards bytes one-to-one, invoking `observe(chunk)` on every
/// non-empty, non-EOS read.
pub trait Observer {
    fn observe(&mut self, chunk: &[u8]);
}

/// Wraps a parent source, forwarding every byte through unchanged while
/// feeding an [`Observer`].
pub struct ObserverSource<'a, O: Observer> {
    parent: Box<dyn Source + 'a>,
    observer: O,
}

impl<'a, O: Observer> ObserverSource<'a, O> {
    pub fn new(parent: Box<dyn Source + 'a>, observer: O) -> Self {
        Self { parent, observer }
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    pub fn observer_mut(&mut self) -> &mut O {
        &mut self.observer
    }

    pub fn into_observer(self) -> O {
        self.observer
    }
}

impl<O: Observer> Source for ObserverSource<'_, O> {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        let n = self.parent.read(dst)?;
        if n != END_OF_STREAM && n > 0 {
            self.observer.observe(&dst[..n]);
        }
        Ok(n)
    }
}

/// A resettable byte counter, as used around both ends of a stream's filter
/// chain to compute `original_size`, `filtered_size`, and compressed size.
#[derive(Debug, Default, Clone, Copy)]
pub struct ByteCounter {
    count: u64,
}

impl ByteCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }
}

impl Observer for ByteCounter {
    fn observe(&mut self, chunk: &[u8]) {
        self.count += chunk.len() as u64;
    }
}

/// Computes CRC32, MD5, and SHA1 over everything observed, and the total
/// byte count — the entry [`DigestInfo`] in one pass.
#[derive(Default)]
pub struct MultiDigest {
    size: u64,
    crc32: crc32fast::Hasher,
    md5: Md5,
    sha1: Sha1,
}

impl MultiDigest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finalize(self) -> DigestInfo {
        let crc32 = self.crc32.finalize();
        let md5: [u8; 16] = self.md5.finalize().into();
        let sha1: [u8; 20] = self.sha1.finalize().into();
        DigestInfo {
            size: self.size,
            crc32,
            md5,
            sha1,
        }
    }
}

impl Observer for MultiDigest {
    fn observe(&mut self, chunk: &[u8]) {
        self.size += chunk.len() as u64;
        self.crc32.update(chunk);
        self.md5.update(chunk);
        self.sha1.update(chunk);
    }
}

/// Adapts a shared, reference-counted observer so several wrappers (or code
/// outside the pipeline) can read its state after it has been moved into a
/// boxed [`ObserverSource`] — used by the writer to read back per-entry
/// counters and digests once their bytes have flowed through.
pub struct SharedObserver<O>(pub Rc<RefCell<O>>);

impl<O> SharedObserver<O> {
    pub fn new(inner: Rc<RefCell<O>>) -> Self {
        Self(inner)
    }
}

impl<O: Observer> Observer for SharedObserver<O> {
    fn observe(&mut self, chunk: &[u8]) {
        self.0.borrow_mut().observe(chunk);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemorySource;

    #[test]
    fn digest_of_known_string_matches_expected_values() {
        let data = b"The quick brown fox jumps over the lazy dog";
        let mut digest = MultiDigest::new();
        digest.observe(data);
        let info = digest.finalize();
        assert_eq!(info.size, data.len() as u64);
        assert_eq!(info.crc32, 0x414f_a339);
        assert_eq!(hex_encode(&info.md5), "9e107d9d372bb6826bd81d3542a419d6");
    }

    fn hex_encode(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }

    #[test]
    fn counter_tracks_bytes_through_observer_source() {
        let src = MemorySource::new(b"0123456789");
        let mut observed = ObserverSource::new(Box::new(src), ByteCounter::new());
        let mut buf = [0u8; 4];
        loop {
            let n = observed.read(&mut buf).unwrap();
            if n == END_OF_STREAM {
                break;
            }
        }
        assert_eq!(observed.observer().count(), 10);
    }
}
