use crate::Error;

// Longest chunk size line we wait for before giving up on it.
const MAX_SIZE_LINE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Size,
    Data(u64),
    DataCrLf,
    Trailer,
    Ended,
}

/// Decoder for `transfer-encoding: chunked`.
#[derive(Debug)]
pub(crate) struct Dechunker {
    state: State,
}

impl Dechunker {
    pub fn new() -> Self {
        Dechunker { state: State::Size }
    }

    pub fn is_ended(&self) -> bool {
        self.state == State::Ended
    }

    /// Decode `input`, passing body data to `out`.
    ///
    /// Returns how much of the input was used. Stops early on an incomplete
    /// size line, chunk end or trailer.
    pub fn decode(&mut self, input: &[u8], out: &mut dyn FnMut(&[u8])) -> Result<usize, Error> {
        let mut pos = 0;

        loop {
            let rest = &input[pos..];

            match self.state {
                State::Size => {
                    let Some(i) = find_crlf(rest) else {
                        if rest.len() > MAX_SIZE_LINE {
                            return Err(Error::ChunkLenNotANumber);
                        }
                        return Ok(pos);
                    };
                    let size = parse_size(&rest[..i])?;
                    pos += i + 2;
                    self.state = if size == 0 {
                        State::Trailer
                    } else {
                        State::Data(size)
                    };
                }

                State::Data(remaining) => {
                    if rest.is_empty() {
                        return Ok(pos);
                    }
                    let n = remaining.min(rest.len() as u64) as usize;
                    out(&rest[..n]);
                    pos += n;
                    let left = remaining - n as u64;
                    self.state = if left == 0 {
                        State::DataCrLf
                    } else {
                        State::Data(left)
                    };
                }

                State::DataCrLf => {
                    let expected = &b"\r\n"[..rest.len().min(2)];
                    if rest[..expected.len()] != *expected {
                        return Err(Error::ChunkExpectedCrLf);
                    }
                    if rest.len() < 2 {
                        return Ok(pos);
                    }
                    pos += 2;
                    self.state = State::Size;
                }

                // Trailer fields are read and dropped.
                State::Trailer => {
                    let Some(i) = find_crlf(rest) else {
                        return Ok(pos);
                    };
                    pos += i + 2;
                    if i == 0 {
                        self.state = State::Ended;
                    }
                }

                State::Ended => return Ok(pos),
            }
        }
    }
}

fn find_crlf(input: &[u8]) -> Option<usize> {
    input.windows(2).position(|w| w == b"\r\n")
}

fn parse_size(line: &[u8]) -> Result<u64, Error> {
    let line = std::str::from_utf8(line)
        .ok()
        .filter(|l| l.is_ascii())
        .ok_or(Error::ChunkLenNotAscii)?;
    // Chunk extensions follow a ';'.
    let size = line.split(';').next().unwrap_or_default().trim();
    u64::from_str_radix(size, 16).map_err(|_| Error::ChunkLenNotANumber)
}
