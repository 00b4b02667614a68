//! Byte producer/consumer interfaces and their memory- and stream-backed
//! implementations.

mod fanin;
mod pipe;

pub use fanin::FanIn;
pub use pipe::PassthroughPipe;

use std::io::{self, Read, Seek, SeekFrom, Write};

/// Sentinel returned by [`Source::read`] in place of a byte count once the
/// producer is exhausted. Distinct from `0`, which means "no bytes available
/// right now, try again" (used by stages that need another `process()` step
/// before they can produce more output).
pub const END_OF_STREAM: usize = usize::MAX;

/// A byte producer.
pub trait Source {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize>;
}

/// A byte consumer. `end()` is the Rust-idiomatic stand-in for the
/// conceptual `write(null, END_OF_STREAM)` call that signals downstream EOS.
pub trait Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;
    fn end(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A [`Source`] that additionally supports absolute seeking and reports its
/// total size; required by codec adapters that need random access to a
/// reference source (the delta filter).
pub trait SeekableSource: Source {
    fn seek_to(&mut self, offset: u64) -> io::Result<()>;
    fn size(&self) -> u64;
}

impl<S: Source + ?Sized> Source for Box<S> {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        (**self).read(dst)
    }
}

impl<S: Sink + ?Sized> Sink for Box<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (**self).write(buf)
    }
    fn end(&mut self) -> io::Result<()> {
        (**self).end()
    }
}

/// Memory-backed source over a borrowed byte slice.
pub struct MemorySource<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> MemorySource<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }
}

impl Source for MemorySource<'_> {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.data.len() {
            return Ok(END_OF_STREAM);
        }
        let n = (self.data.len() - self.pos).min(dst.len());
        dst[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl SeekableSource for MemorySource<'_> {
    fn seek_to(&mut self, offset: u64) -> io::Result<()> {
        self.pos = offset as usize;
        Ok(())
    }
    fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Memory-backed source owning its bytes, for content materialized at read
/// time (the diff filter's reference entry) rather than borrowed from a
/// caller-held buffer.
pub struct OwnedMemorySource {
    data: Vec<u8>,
    pos: usize,
}

impl OwnedMemorySource {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }
}

impl Source for OwnedMemorySource {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.data.len() {
            return Ok(END_OF_STREAM);
        }
        let n = (self.data.len() - self.pos).min(dst.len());
        dst[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl SeekableSource for OwnedMemorySource {
    fn seek_to(&mut self, offset: u64) -> io::Result<()> {
        self.pos = offset as usize;
        Ok(())
    }
    fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Memory-backed sink: an append-only `Vec<u8>`.
#[derive(Default)]
pub struct MemorySink {
    pub buf: Vec<u8>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Sink for MemorySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }
}

/// Adapts any [`std::io::Read`] (a file handle, a cursor, ...) into a
/// non-seekable [`Source`]. A `read` returning `0` is treated as EOF, per
/// the `Read` contract, and translated to [`END_OF_STREAM`].
pub struct ReadSource<R> {
    inner: R,
}

impl<R: Read> ReadSource<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }
}

impl<R: Read> Source for ReadSource<R> {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        if dst.is_empty() {
            return Ok(0);
        }
        let n = self.inner.read(dst)?;
        if n == 0 {
            Ok(END_OF_STREAM)
        } else {
            Ok(n)
        }
    }
}

/// Adapts any `Read + Seek` into a [`SeekableSource`]; the size is probed
/// once at construction by seeking to the end and back.
pub struct SeekableReadSource<R> {
    inner: R,
    len: u64,
}

impl<R: Read + Seek> SeekableReadSource<R> {
    pub fn new(mut inner: R) -> io::Result<Self> {
        let len = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(0))?;
        Ok(Self { inner, len })
    }
}

impl<R: Read> Source for SeekableReadSource<R> {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        if dst.is_empty() {
            return Ok(0);
        }
        let n = self.inner.read(dst)?;
        if n == 0 {
            Ok(END_OF_STREAM)
        } else {
            Ok(n)
        }
    }
}

impl<R: Read + Seek> SeekableSource for SeekableReadSource<R> {
    fn seek_to(&mut self, offset: u64) -> io::Result<()> {
        self.inner.seek(SeekFrom::Start(offset))?;
        Ok(())
    }
    fn size(&self) -> u64 {
        self.len
    }
}

/// Adapts any [`std::io::Write`] into a [`Sink`]; `end()` flushes.
pub struct WriteSink<W> {
    inner: W,
}

impl<W: Write> WriteSink<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Sink for WriteSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }
    fn end(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Bridges a `&mut dyn Source` back into `std::io::Read`, for consumers
/// (notably the `librsync`-backed diff filter) that expect a standard
/// reader rather than our `Source` trait.
pub struct SourceAsRead<'a> {
    source: &'a mut dyn Source,
    eof: bool,
}

impl<'a> SourceAsRead<'a> {
    pub fn new(source: &'a mut dyn Source) -> Self {
        Self { source, eof: false }
    }
}

impl Read for SourceAsRead<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.eof {
            return Ok(0);
        }
        let n = self.source.read(buf)?;
        if n == END_OF_STREAM {
            self.eof = true;
            Ok(0)
        } else {
            Ok(n)
        }
    }
}

/// Bridges a `&mut dyn SeekableSource` into `std::io::Read + Seek`.
pub struct SeekableSourceAsRead<'a> {
    source: &'a mut dyn SeekableSource,
    pos: u64,
    eof: bool,
}

impl<'a> SeekableSourceAsRead<'a> {
    pub fn new(source: &'a mut dyn SeekableSource) -> Self {
        Self {
            source,
            pos: 0,
            eof: false,
        }
    }
}

impl Read for SeekableSourceAsRead<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.eof {
            return Ok(0);
        }
        let n = self.source.read(buf)?;
        if n == END_OF_STREAM {
            self.eof = true;
            Ok(0)
        } else {
            self.pos += n as u64;
            Ok(n)
        }
    }
}

impl Seek for SeekableSourceAsRead<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::Current(d) => self.pos as i64 + d,
            SeekFrom::End(d) => self.source.size() as i64 + d,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to negative offset",
            ));
        }
        self.source.seek_to(target as u64)?;
        self.pos = target as u64;
        self.eof = false;
        Ok(self.pos)
    }
}
