//! Ingest buffer: a fixed-capacity shifting window over the unread tail of a file.
//!
//! Each refill moves the unread bytes to offset 0 and then reads as much as fits
//! from the attached reader. The reader is only ever read forward.

use std::io::{self, Read};

pub struct IngestBuffer<R> {
    buf: Box<[u8]>,
    pos: usize,
    len: usize,
    reader: Option<R>,
    total_read: u64,
    exhausted: bool,
}

impl<R: Read> IngestBuffer<R> {
    /// Allocate a window of `capacity` bytes with no reader attached.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity.max(1)].into_boxed_slice(),
            pos: 0,
            len: 0,
            reader: None,
            total_read: 0,
            exhausted: false,
        }
    }

    /// Replace the reader and discard any buffered bytes from the previous one.
    pub fn attach(&mut self, reader: R) {
        self.reader = Some(reader);
        self.pos = 0;
        self.len = 0;
        self.total_read = 0;
        self.exhausted = false;
    }

    /// Drop the reader (closing it) and empty the window.
    pub fn detach(&mut self) -> Option<R> {
        self.pos = 0;
        self.len = 0;
        self.exhausted = false;
        self.reader.take()
    }

    #[cfg(test)]
    pub(crate) fn is_attached(&self) -> bool {
        self.reader.is_some()
    }

    /// Unread bytes currently held in the window.
    pub fn available(&self) -> usize {
        self.len - self.pos
    }

    /// Total bytes pulled from the current reader.
    pub fn total_read(&self) -> u64 {
        self.total_read
    }

    /// The reader has returned end of file at least once.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn unread(&self) -> &[u8] {
        &self.buf[self.pos..self.len]
    }

    /// Mark `n` unread bytes as used. Clamped to what is available.
    pub fn consume(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.len);
    }

    /// Compact the unread bytes to the front and top the window up from the reader.
    ///
    /// Returns the number of unread bytes afterwards. With no reader attached this
    /// returns 0.
    pub fn fill(&mut self) -> io::Result<usize> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(0);
        };

        if self.pos > 0 {
            if self.len > self.pos {
                self.buf.copy_within(self.pos..self.len, 0);
                self.len -= self.pos;
            } else {
                self.len = 0;
            }
            self.pos = 0;
        }

        while self.len < self.buf.len() {
            match reader.read(&mut self.buf[self.len..]) {
                Ok(0) => {
                    self.exhausted = true;
                    break;
                }
                Ok(n) => {
                    self.len += n;
                    self.total_read += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(self.len - self.pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Reader that hands out at most `step` bytes per call.
    struct Trickle {
        data: Vec<u8>,
        at: usize,
        step: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
            let n = self.step.min(out.len()).min(self.data.len() - self.at);
            out[..n].copy_from_slice(&self.data[self.at..self.at + n]);
            self.at += n;
            Ok(n)
        }
    }

    #[test]
    fn fill_without_reader_is_empty() {
        let mut buf: IngestBuffer<Cursor<Vec<u8>>> = IngestBuffer::new(8);
        assert_eq!(buf.fill().unwrap(), 0);
        assert!(!buf.is_attached());
    }

    #[test]
    fn fill_reads_up_to_capacity() {
        let mut buf = IngestBuffer::new(8);
        buf.attach(Cursor::new((0u8..20).collect::<Vec<_>>()));
        assert_eq!(buf.fill().unwrap(), 8);
        assert_eq!(buf.unread(), &[0, 1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(buf.total_read(), 8);
    }

    #[test]
    fn fill_compacts_unread_bytes_to_front() {
        let mut buf = IngestBuffer::new(8);
        buf.attach(Cursor::new((0u8..20).collect::<Vec<_>>()));
        buf.fill().unwrap();
        buf.consume(5);
        assert_eq!(buf.available(), 3);

        assert_eq!(buf.fill().unwrap(), 8);
        assert_eq!(buf.unread(), &[5, 6, 7, 8, 9, 10, 11, 12]);
    }

    #[test]
    fn fill_loops_over_short_reads() {
        let mut buf = IngestBuffer::new(10);
        buf.attach(Trickle {
            data: (0u8..30).collect(),
            at: 0,
            step: 3,
        });
        assert_eq!(buf.fill().unwrap(), 10);
    }

    #[test]
    fn fill_reports_tail_at_end_of_stream() {
        let mut buf = IngestBuffer::new(8);
        buf.attach(Cursor::new(vec![1u8, 2, 3]));
        assert_eq!(buf.fill().unwrap(), 3);
        assert!(buf.is_exhausted());
        buf.consume(3);
        assert_eq!(buf.fill().unwrap(), 0);
    }

    #[test]
    fn full_window_is_not_exhausted() {
        let mut buf = IngestBuffer::new(4);
        buf.attach(Cursor::new(vec![0u8; 8]));
        buf.fill().unwrap();
        assert!(!buf.is_exhausted());
    }

    #[test]
    fn consume_is_clamped() {
        let mut buf = IngestBuffer::new(8);
        buf.attach(Cursor::new(vec![1u8, 2]));
        buf.fill().unwrap();
        buf.consume(100);
        assert_eq!(buf.available(), 0);
    }

    #[test]
    fn attach_discards_previous_bytes() {
        let mut buf = IngestBuffer::new(8);
        buf.attach(Cursor::new(vec![1u8; 8]));
        buf.fill().unwrap();
        buf.attach(Cursor::new(vec![2u8; 2]));
        assert_eq!(buf.available(), 0);
        assert_eq!(buf.fill().unwrap(), 2);
        assert_eq!(buf.unread(), &[2, 2]);
    }
}
