// src/input.rs - record source: opening, decoding and splitting input

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::PathBuf;

use crate::error::ProcessingError;
use crate::pipeline::context::Record;

/// Text encodings accepted by `--encoding`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Encoding {
    #[default]
    #[value(name = "utf8", alias = "utf-8")]
    Utf8,
    #[value(name = "ascii")]
    Ascii,
    #[value(name = "latin1", alias = "binary")]
    Latin1,
    #[value(name = "utf16le", alias = "ucs2")]
    Utf16le,
}

impl Encoding {
    /// Bytes of the newline character in this encoding
    fn newline(&self) -> &'static [u8] {
        match self {
            Encoding::Utf16le => &[b'\n', 0],
            _ => b"\n",
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> String {
        match self {
            Encoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Encoding::Ascii => bytes.iter().map(|b| (b & 0x7f) as char).collect(),
            Encoding::Latin1 => bytes.iter().map(|&b| b as char).collect(),
            Encoding::Utf16le => {
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                    .collect();
                String::from_utf16_lossy(&units)
            }
        }
    }
}

/// Where records come from
#[derive(Debug, Clone)]
pub enum Input {
    Stdin,
    File(PathBuf),
}

impl Input {
    pub fn describe(&self) -> String {
        match self {
            Input::Stdin => "stdin".to_string(),
            Input::File(path) => path.display().to_string(),
        }
    }
}

/// An opened input stream, not yet split into records
pub struct RecordSource {
    reader: Box<dyn BufRead>,
    encoding: Encoding,
}

impl RecordSource {
    /// Open the input. A missing or unreadable file fails here, before
    /// any record exists.
    pub fn open(input: &Input, encoding: Encoding, buffer_size: usize) -> Result<Self, ProcessingError> {
        let reader: Box<dyn BufRead> = match input {
            Input::Stdin => Box::new(BufReader::with_capacity(buffer_size, io::stdin())),
            Input::File(path) => {
                let file = File::open(path)
                    .map_err(|e| ProcessingError::from_open(e, &path.display().to_string()))?;
                Box::new(BufReader::with_capacity(buffer_size, file))
            }
        };
        tracing::debug!("reading from {} as {:?}", input.describe(), encoding);
        Ok(Self::from_reader(reader, encoding))
    }

    pub fn from_reader(reader: Box<dyn BufRead>, encoding: Encoding) -> Self {
        RecordSource { reader, encoding }
    }

    /// Read the entire input as a single record with index 0
    pub fn whole(mut self) -> io::Result<Record> {
        let mut bytes = Vec::new();
        self.reader.read_to_end(&mut bytes)?;
        Ok(Record::new(self.encoding.decode(&bytes), 0))
    }

    /// Pull-based iterator over newline-delimited records, indexed from 1
    pub fn records(self) -> Records {
        Records {
            source: self,
            index: 0,
            buffer: Vec::new(),
        }
    }

    /// Read one segment into `buf` without its newline. Returns false at
    /// end of input when nothing is left.
    fn read_segment(&mut self, buf: &mut Vec<u8>) -> io::Result<bool> {
        let newline = self.encoding.newline();
        buf.clear();

        loop {
            let read = self.reader.read_until(newline[0], buf)?;
            if read == 0 || buf.last() != Some(&newline[0]) {
                // End of input: a trailing segment without newline
                return Ok(!buf.is_empty());
            }

            let start = buf.len() - 1;
            if start % newline.len() != 0 {
                // Delimiter byte sits inside a multi-byte unit
                continue;
            }

            if newline.len() == 1 {
                buf.truncate(start);
                return Ok(true);
            }

            let rest = &newline[1..];
            let available = self.reader.fill_buf()?;
            if available.starts_with(rest) {
                self.reader.consume(rest.len());
                buf.truncate(start);
                return Ok(true);
            }
        }
    }
}

pub struct Records {
    source: RecordSource,
    index: usize,
    buffer: Vec<u8>,
}

impl Iterator for Records {
    type Item = io::Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.source.read_segment(&mut self.buffer) {
            Ok(true) => {
                self.index += 1;
                let text = self.source.encoding.decode(&self.buffer);
                Some(Ok(Record::new(text, self.index)))
            }
            Ok(false) => None,
            Err(e) => Some(Err(e)),
        }
    }
}
