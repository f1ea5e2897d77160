//! In-memory read database
//!
//! Reads come from a FASTA file and are addressed by their 0-based record
//! ordinal. Sequences are normalised to uppercase A/C/G/T/N at load time.
//! Quality streams, when needed, come from a companion `.qvs` file holding
//! one fixed-size block of streams per read.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

pub struct ReadDb {
    reads: Vec<Vec<u8>>,
    qvs: Option<QvStore>,
}

/// Parallel per-read quality streams, `streams` lines per read
struct QvStore {
    streams: usize,
    per_read: Vec<Vec<Vec<u8>>>,
}

impl ReadDb {
    pub fn from_fasta(path: &str) -> io::Result<Self> {
        let file = File::open(path)
            .map_err(|e| io::Error::new(e.kind(), format!("Failed to open '{}': {}", path, e)))?;
        let reader = BufReader::new(file);

        let mut reads: Vec<Vec<u8>> = Vec::new();
        let mut current: Option<Vec<u8>> = None;
        for line in reader.lines() {
            let line = line?;
            if let Some(rest) = line.strip_prefix('>') {
                if let Some(seq) = current.take() {
                    reads.push(seq);
                }
                if rest.trim().is_empty() {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("Empty FASTA header in '{}'", path),
                    ));
                }
                current = Some(Vec::new());
            } else {
                match current.as_mut() {
                    Some(seq) => {
                        seq.extend(line.bytes().filter(|b| !b.is_ascii_whitespace()).map(normalize))
                    }
                    None => {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("Sequence before first header in '{}'", path),
                        ))
                    }
                }
            }
        }
        if let Some(seq) = current.take() {
            reads.push(seq);
        }
        if reads.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("No sequences in '{}'", path),
            ));
        }

        Ok(ReadDb { reads, qvs: None })
    }

    /// Load the companion quality-stream file. Every read must appear, with a
    /// constant number of streams and one stream byte per base. The stream
    /// count is derived from the line count, so stream bytes may be any
    /// printable ASCII.
    pub fn load_qv_streams(&mut self, path: &str) -> io::Result<()> {
        let file = File::open(path)
            .map_err(|e| io::Error::new(e.kind(), format!("Failed to open '{}': {}", path, e)))?;
        let lines: Vec<String> = BufReader::new(file).lines().collect::<io::Result<_>>()?;

        let nreads = self.reads.len();
        if lines.len() % nreads != 0 || lines.len() / nreads < 2 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "'{}' has {} lines, expected a header plus a fixed stream block for each of {} reads",
                    path,
                    lines.len(),
                    nreads
                ),
            ));
        }
        let streams = lines.len() / nreads - 1;

        let mut per_read: Vec<Vec<Vec<u8>>> = Vec::with_capacity(nreads);
        for (rid, read) in self.reads.iter().enumerate() {
            let base = rid * (streams + 1);
            let header = &lines[base];
            let id: Option<usize> = header.strip_prefix('@').and_then(|s| s.trim().parse().ok());
            if id != Some(rid) {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("'{}': expected '@{}', found '{}'", path, rid, header),
                ));
            }
            let mut block: Vec<Vec<u8>> = Vec::with_capacity(streams);
            for s in 0..streams {
                let stream = lines[base + 1 + s].clone().into_bytes();
                if stream.len() != read.len() {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!(
                            "'{}': read {} stream {} has {} bytes, read length is {}",
                            path,
                            rid,
                            s,
                            stream.len(),
                            read.len()
                        ),
                    ));
                }
                block.push(stream);
            }
            per_read.push(block);
        }

        self.qvs = Some(QvStore { streams, per_read });
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn from_reads(reads: Vec<Vec<u8>>) -> Self {
        ReadDb { reads, qvs: None }
    }

    #[cfg(test)]
    pub(crate) fn with_qv_streams(mut self, per_read: Vec<Vec<Vec<u8>>>) -> Self {
        let streams = per_read.first().map_or(0, Vec::len);
        self.qvs = Some(QvStore { streams, per_read });
        self
    }

    pub fn len(&self) -> usize {
        self.reads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reads.is_empty()
    }

    pub fn read(&self, id: i32) -> &[u8] {
        &self.reads[id as usize]
    }

    pub fn read_len(&self, id: i32) -> i32 {
        self.reads[id as usize].len() as i32
    }

    pub fn qv_streams(&self, id: i32) -> Option<&[Vec<u8>]> {
        self.qvs.as_ref().map(|q| q.per_read[id as usize].as_slice())
    }

    pub fn num_qv_streams(&self) -> Option<usize> {
        self.qvs.as_ref().map(|q| q.streams)
    }

    /// Companion quality-stream path for a database path
    pub fn qv_path(db_path: &str) -> String {
        Path::new(db_path)
            .with_extension("qvs")
            .to_string_lossy()
            .into_owned()
    }
}

fn normalize(b: u8) -> u8 {
    match b {
        b'A' | b'a' => b'A',
        b'C' | b'c' => b'C',
        b'G' | b'g' => b'G',
        b'T' | b't' => b'T',
        _ => b'N',
    }
}

fn complement(b: u8) -> u8 {
    match b {
        b'A' => b'T',
        b'C' => b'G',
        b'G' => b'C',
        b'T' => b'A',
        _ => b'N',
    }
}

/// Reverse-complement a normalised sequence in place
pub fn reverse_complement_in_place(seq: &mut [u8]) {
    seq.reverse();
    for b in seq.iter_mut() {
        *b = complement(*b);
    }
}
