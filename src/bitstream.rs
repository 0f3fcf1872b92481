//! H.264 Annex-B bitstream splitting.
//!
//! Splits a raw byte stream into NAL units delimited by `00 00 01` or
//! `00 00 00 01` start codes. Each returned unit keeps its start code, which
//! is the form the decoder accepts.

/// Upper bound on one buffered unit. Anything larger is treated as corrupt.
const MAX_UNIT_SIZE: usize = 16 * 1024 * 1024;

const START_CODE: [u8; 3] = [0, 0, 1];

/// Whether `data` opens with an Annex-B start code, allowing leading zero bytes.
pub fn starts_with_start_code(data: &[u8]) -> bool {
    let zeros = data.iter().take_while(|b| **b == 0).count();
    zeros >= 2 && data.get(zeros) == Some(&1)
}

/// Position of the first `00 00 01` at or after `from`.
fn find_start_code(data: &[u8], from: usize) -> Option<usize> {
    data.get(from..)?
        .windows(START_CODE.len())
        .position(|window| window == START_CODE)
        .map(|pos| pos + from)
}

/// Incremental Annex-B parser.
#[derive(Debug, Default)]
pub struct AnnexBParser {
    buffer: Vec<u8>,
    /// Bytes before this offset hold no start code past the leading one.
    scanned: usize,
}

impl AnnexBParser {
    /// Create an empty parser.
    pub const fn new() -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
        }
    }

    /// Whether bytes are buffered that have not been returned as a unit.
    pub fn has_pending(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Feed `input` and return the bytes consumed and the next complete unit.
    ///
    /// All of `input` is always consumed. Several units may complete from one
    /// call; call again with an empty slice to take the rest.
    pub fn parse(&mut self, input: &[u8]) -> Result<(usize, Option<Vec<u8>>), String> {
        self.buffer.extend_from_slice(input);

        let Some(header) = self.sync()? else {
            return Ok((input.len(), None));
        };

        match find_start_code(&self.buffer, self.scanned.max(header)) {
            Some(boundary) => {
                let unit: Vec<u8> = self.buffer.drain(..boundary).collect();
                self.scanned = 0;
                validate_unit(&unit, header)?;
                Ok((input.len(), Some(unit)))
            }
            None => {
                if self.buffer.len() > MAX_UNIT_SIZE {
                    return Err(format!(
                        "no start code within {MAX_UNIT_SIZE} bytes"
                    ));
                }
                // A start code may straddle the next chunk.
                self.scanned = self.buffer.len().saturating_sub(START_CODE.len() - 1);
                Ok((input.len(), None))
            }
        }
    }

    /// Return whatever unit is still buffered once the input is exhausted.
    pub fn flush(&mut self) -> Result<Option<Vec<u8>>, String> {
        let header = self.sync()?;
        self.scanned = 0;
        let unit = std::mem::take(&mut self.buffer);

        match header {
            Some(header) if unit.len() > header => {
                validate_unit(&unit, header)?;
                Ok(Some(unit))
            }
            _ => Ok(None),
        }
    }

    /// Check the buffer opens with a start code and return its length.
    ///
    /// `Ok(None)` means more bytes are needed to tell.
    fn sync(&mut self) -> Result<Option<usize>, String> {
        let zeros = self.buffer.iter().take_while(|b| **b == 0).count();

        if zeros == self.buffer.len() {
            // Only zero bytes so far; keep enough to form a start code.
            let excess = zeros.saturating_sub(3);
            self.buffer.drain(..excess);
            return Ok(None);
        }

        if zeros < 2 || self.buffer.get(zeros) != Some(&1) {
            return Err("stream does not begin with a start code".to_owned());
        }
        if zeros > 3 {
            self.buffer.drain(..zeros - 3);
            self.scanned = self.scanned.saturating_sub(zeros - 3);
        }
        Ok(Some(zeros.min(3) + 1))
    }
}

fn validate_unit(unit: &[u8], header: usize) -> Result<(), String> {
    match unit.get(header) {
        None => Err("empty NAL unit".to_owned()),
        Some(byte) if byte & 0x80 != 0 => {
            Err(format!("forbidden bit set in NAL header 0x{byte:02x}"))
        }
        Some(_) => Ok(()),
    }
}
