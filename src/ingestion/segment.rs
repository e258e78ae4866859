//! Line-chunked reading of the source file.
//!
//! The segmenter partitions a file into ordered, non-overlapping [`Chunk`]s of at most
//! `chunk_size` lines. Offsets are byte offsets: a chunk's `next_offset` is where the
//! following chunk starts, so a caller can resume with [`read_chunk`] without keeping the
//! file open.

use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::{LoadError, LoadResult};
use crate::types::Linebreak;

const BOM: char = '\u{feff}';

/// A run of consecutive raw lines, terminators removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Raw lines in file order.
    pub lines: Vec<String>,
    /// Byte offset of the first line.
    pub offset: u64,
    /// Byte offset right after the last line.
    pub next_offset: u64,
    /// `true` iff no bytes remain after this chunk.
    pub is_last: bool,
}

impl Chunk {
    fn empty_at(offset: u64) -> Self {
        Self {
            lines: Vec::new(),
            offset,
            next_offset: offset,
            is_last: true,
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Sequential chunk reader over one open file.
#[derive(Debug)]
pub struct FileSegmenter {
    path: PathBuf,
    reader: BufReader<File>,
    linebreak: Linebreak,
    chunk_size: usize,
    offset: u64,
    exhausted: bool,
}

impl FileSegmenter {
    /// Open `path` for reading from the start.
    pub fn open(path: impl AsRef<Path>, chunk_size: usize, linebreak: Linebreak) -> LoadResult<Self> {
        Self::open_at(path, chunk_size, linebreak, 0)
    }

    /// Open `path` and position the reader at byte `offset`.
    pub fn open_at(
        path: impl AsRef<Path>,
        chunk_size: usize,
        linebreak: Linebreak,
        offset: u64,
    ) -> LoadResult<Self> {
        let path = path.as_ref();
        if chunk_size == 0 {
            return Err(LoadError::InvalidOptions {
                message: "chunk size must be > 0".to_string(),
            });
        }

        let mut file = File::open(path).map_err(|e| LoadError::read(path, e))?;
        if offset > 0 {
            file.seek(SeekFrom::Start(offset))
                .map_err(|e| LoadError::read(path, e))?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            reader: BufReader::with_capacity(1 << 16, file),
            linebreak,
            chunk_size,
            offset,
            exhausted: false,
        })
    }

    /// Byte offset of the next unread line.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read a single line outside of chunking, e.g. to skip a header.
    pub fn next_line(&mut self) -> LoadResult<Option<String>> {
        let terminator = self.linebreak.terminator();
        let mut buf = Vec::new();
        let n = self
            .reader
            .read_until(terminator, &mut buf)
            .map_err(|e| LoadError::read(&self.path, e))?;
        if n == 0 {
            return Ok(None);
        }
        let mut line = decode_line(&buf, terminator);
        if self.offset == 0 && line.starts_with(BOM) {
            line.remove(0);
        }
        self.offset += n as u64;
        Ok(Some(line))
    }

    /// Read the next chunk, or `None` once the file is exhausted.
    pub fn next_chunk(&mut self) -> LoadResult<Option<Chunk>> {
        if self.exhausted {
            return Ok(None);
        }

        let start = self.offset;
        let mut lines = Vec::with_capacity(self.chunk_size.min(8_192));
        while lines.len() < self.chunk_size {
            match self.next_line()? {
                Some(line) => lines.push(line),
                None => break,
            }
        }

        let remaining = self
            .reader
            .fill_buf()
            .map_err(|e| LoadError::read(&self.path, e))?;
        self.exhausted = remaining.is_empty();

        if lines.is_empty() {
            return Ok(None);
        }
        Ok(Some(Chunk {
            lines,
            offset: start,
            next_offset: self.offset,
            is_last: self.exhausted,
        }))
    }
}

/// Read one chunk of up to `chunk_size` lines starting at byte `offset`.
///
/// `offset` must be `0` or the `next_offset` of the previous chunk. At end of file the
/// returned chunk is empty and marked last.
pub fn read_chunk(
    path: impl AsRef<Path>,
    chunk_size: usize,
    offset: u64,
    linebreak: Linebreak,
) -> LoadResult<Chunk> {
    let mut seg = FileSegmenter::open_at(path, chunk_size, linebreak, offset)?;
    Ok(seg.next_chunk()?.unwrap_or_else(|| Chunk::empty_at(offset)))
}

/// Count non-blank lines after the header line.
///
/// Lines are decoded and judged blank exactly as the streaming parser does, so the count
/// matches the rows it will see.
pub fn count_data_rows(path: impl AsRef<Path>, linebreak: Linebreak) -> LoadResult<u64> {
    let mut seg = FileSegmenter::open(path, 1, linebreak)?;
    let mut count = 0u64;
    while let Some(line) = seg.next_line()? {
        if !is_blank(&line) {
            count += 1;
        }
    }
    Ok(count.saturating_sub(1))
}

pub(crate) fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

fn decode_line(raw: &[u8], terminator: u8) -> String {
    let mut end = raw.len();
    if end > 0 && raw[end - 1] == terminator {
        end -= 1;
    }
    if end > 0 && raw[end - 1] == b'\r' {
        end -= 1;
    }
    String::from_utf8_lossy(&raw[..end]).into_owned()
}
