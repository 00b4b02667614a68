//! Concatenates N child sources, invoking lifecycle callbacks around each
//! child's contribution. This is the hook the writer uses to finalize
//! per-entry metadata (compressed size, digests) at the exact moment that
//! entry's last byte has passed through every upstream filter.

use std::io;

use super::{Source, END_OF_STREAM};

/// A source that reads through a sequence of child sources in order,
/// notifying `on_begin`/`on_end` around each child.
pub struct FanIn<'a> {
    sources: Vec<Box<dyn Source + 'a>>,
    on_begin: Box<dyn FnMut(usize) + 'a>,
    on_end: Box<dyn FnMut(usize) + 'a>,
    current: usize,
    began_current: bool,
}

impl<'a> FanIn<'a> {
    pub fn new(
        sources: Vec<Box<dyn Source + 'a>>,
        on_begin: impl FnMut(usize) + 'a,
        on_end: impl FnMut(usize) + 'a,
    ) -> Self {
        Self {
            sources,
            on_begin: Box::new(on_begin),
            on_end: Box::new(on_end),
            current: 0,
            began_current: false,
        }
    }
}

impl Source for FanIn<'_> {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.current >= self.sources.len() {
                return Ok(END_OF_STREAM);
            }
            if !self.began_current {
                (self.on_begin)(self.current);
                self.began_current = true;
            }
            let n = self.sources[self.current].read(dst)?;
            if n == END_OF_STREAM {
                (self.on_end)(self.current);
                self.current += 1;
                self.began_current = false;
                continue;
            }
            return Ok(n);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemorySource;
    use std::cell::RefCell;

    #[test]
    fn concatenates_children_in_order_with_callbacks() {
        let a = MemorySource::new(b"abc");
        let b = MemorySource::new(b"de");
        let begins = RefCell::new(Vec::new());
        let ends = RefCell::new(Vec::new());
        let mut fanin = FanIn::new(
            vec![Box::new(a), Box::new(b)],
            |i| begins.borrow_mut().push(i),
            |i| ends.borrow_mut().push(i),
        );
        let mut out = Vec::new();
        let mut buf = [0u8; 2];
        loop {
            let n = fanin.read(&mut buf).unwrap();
            if n == END_OF_STREAM {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out, b"abcde");
        assert_eq!(*begins.borrow(), vec![0, 1]);
        assert_eq!(*ends.borrow(), vec![0, 1]);
    }
}
