//! Chunk-boundary-safe decoding of gzip NDJSON streams.

use std::io::Write;

use flate2::write::GzDecoder;

use crate::Result;

/// Splits a byte stream into complete lines, retaining the trailing partial
/// line across pushes so no line is ever surfaced incomplete.
#[derive(Debug, Default)]
pub struct LineAssembler {
  buf: Vec<u8>,
}

impl LineAssembler {
  pub fn new() -> Self {
    Self::default()
  }

  /// Append `bytes` and return every line completed by them. Blank lines
  /// are dropped; a trailing `\r` is stripped.
  pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
    self.buf.extend_from_slice(bytes);

    let mut lines = Vec::new();
    while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
      let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
      line.pop();
      if line.last() == Some(&b'\r') {
        line.pop();
      }
      if !line.is_empty() {
        lines.push(line);
      }
    }
    lines
  }

  /// The final unterminated line, if any.
  pub fn finish(mut self) -> Option<Vec<u8>> {
    while self.buf.last() == Some(&b'\r') {
      self.buf.pop();
    }
    if self.buf.is_empty() { None } else { Some(self.buf) }
  }
}

/// Decompresses gzip chunks and assembles the output into complete lines.
///
/// Chunks may split the stream anywhere, including inside a multi-byte
/// character or a record; the decoder only ever yields whole lines.
pub struct NdjsonDecoder {
  gz: GzDecoder<Vec<u8>>,
  lines: LineAssembler,
}

impl Default for NdjsonDecoder {
  fn default() -> Self {
    Self::new()
  }
}

impl NdjsonDecoder {
  pub fn new() -> Self {
    Self {
      gz: GzDecoder::new(Vec::new()),
      lines: LineAssembler::new(),
    }
  }

  /// Feed one compressed chunk; returns the lines it completed.
  pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Vec<u8>>> {
    self.gz.write_all(chunk)?;
    self.gz.flush()?;
    let decoded = std::mem::take(self.gz.get_mut());
    Ok(self.lines.push(&decoded))
  }

  /// Flush the decompressor and return the remaining lines, the final
  /// unterminated one included.
  pub fn finish(mut self) -> Result<Vec<Vec<u8>>> {
    let gz = std::mem::replace(&mut self.gz, GzDecoder::new(Vec::new()));
    let tail = gz.finish()?;
    let mut lines = self.lines;
    let mut out = lines.push(&tail);
    if let Some(last) = lines.finish() {
      out.push(last);
    }
    Ok(out)
  }
}
