use std::io;
use std::sync::{Mutex, MutexGuard};

use http::header::HeaderName;
use http::HeaderValue;

/// Writes formatted output into a fixed byte slice.
///
/// A write that doesn't fit is rolled back entirely, which lets callers
/// detect [`Error::OutputOverflow`][crate::Error::OutputOverflow] without
/// leaving half a header in the output.
pub(crate) struct Writer<'a> {
    out: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    pub fn new(out: &'a mut [u8]) -> Writer<'a> {
        Writer { out, pos: 0 }
    }

    pub fn len(&self) -> usize {
        self.pos
    }

    pub fn try_write(&mut self, block: impl Fn(&mut Self) -> io::Result<()>) -> bool {
        let pos = self.pos;
        let success = (block)(self).is_ok();
        if !success {
            self.pos = pos;
        }
        success
    }
}

impl<'a> io::Write for Writer<'a> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let available = &mut self.out[self.pos..];
        if buf.len() > available.len() {
            return Err(io::ErrorKind::WriteZero.into());
        }
        available[..buf.len()].copy_from_slice(buf);
        self.pos += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub(crate) trait HeaderIterExt {
    fn has(self, key: HeaderName, value: &str) -> bool;
}

impl<'a, I: Iterator<Item = (&'a HeaderName, &'a HeaderValue)>> HeaderIterExt for I {
    fn has(self, key: HeaderName, value: &str) -> bool {
        self.filter(|i| i.0 == key).any(|i| {
            i.1.to_str()
                .map(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case(value)))
                .unwrap_or(false)
        })
    }
}

pub(crate) fn log_data(data: &[u8]) {
    if !log_enabled!(log::Level::Trace) {
        return;
    }
    for l in data.chunks(20) {
        trace!("{:?}", String::from_utf8_lossy(l));
    }
}

/// Lock that shrugs off poisoning.
///
/// A panic on another thread holding one of our locks leaves the state
/// consistent enough to tear the connection down.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use http::header;

    #[test]
    fn writer_rolls_back_on_overflow() {
        let mut out = [0_u8; 8];
        let mut w = Writer::new(&mut out);
        assert!(w.try_write(|w| write!(w, "abc")));
        assert!(!w.try_write(|w| write!(w, "defghijk")));
        assert_eq!(w.len(), 3);
        assert!(w.try_write(|w| write!(w, "de")));
        assert_eq!(w.len(), 5);
        assert_eq!(&out[..5], b"abcde");
    }

    #[test]
    fn header_has_token() {
        let mut map = http::HeaderMap::new();
        map.insert(header::CONNECTION, "keep-alive, Close".parse().unwrap());
        assert!(map.iter().has(header::CONNECTION, "close"));
        assert!(!map.iter().has(header::CONNECTION, "upgrade"));
    }
}
