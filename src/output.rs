//! FASTA and quality-stream emission
//!
//! Patched reads go out as `>fixed_<id> source=<id>` records, trimmed-only
//! reads as `>trimmed_<id> source=<id>`, each followed by the sequence
//! wrapped at 60 columns. Non-empty annotation tracks are inlined into the
//! header as ` name=b1,e1,b2,e2` fields.

use crate::repair::{FixedRead, RecordKind};
use std::io::{self, Write};

pub const FASTA_WIDTH: usize = 60;

pub struct FastaWriter<W: Write> {
    out: W,
}

impl<W: Write> FastaWriter<W> {
    pub fn new(out: W) -> Self {
        FastaWriter { out }
    }

    pub fn write_record(&mut self, record: &FixedRead) -> io::Result<()> {
        let prefix = match record.kind {
            RecordKind::Fixed => "fixed",
            RecordKind::Trimmed => "trimmed",
        };
        write!(self.out, ">{}_{} source={}", prefix, record.aread, record.aread)?;
        for (name, intervals) in &record.tracks {
            if intervals.is_empty() {
                continue;
            }
            write!(self.out, " {}=", name)?;
            for (i, (b, e)) in intervals.iter().enumerate() {
                if i > 0 {
                    write!(self.out, ",")?;
                }
                write!(self.out, "{},{}", b, e)?;
            }
        }
        writeln!(self.out)?;
        for line in record.seq.chunks(FASTA_WIDTH) {
            self.out.write_all(line)?;
            writeln!(self.out)?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

pub struct QvWriter<W: Write> {
    out: W,
}

impl<W: Write> QvWriter<W> {
    pub fn new(out: W) -> Self {
        QvWriter { out }
    }

    pub fn write_record(&mut self, aread: i32, streams: &[Vec<u8>]) -> io::Result<()> {
        let rlen = streams.first().map_or(0, Vec::len);
        writeln!(self.out, "@fixed/0_{} source={}", rlen, aread)?;
        for stream in streams {
            self.out.write_all(stream)?;
            writeln!(self.out)?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(kind: RecordKind, seq: &[u8], tracks: Vec<(String, Vec<(i32, i32)>)>) -> FixedRead {
        FixedRead {
            aread: 3,
            kind,
            seq: seq.to_vec(),
            qvs: None,
            tracks,
        }
    }

    #[test]
    fn test_fixed_header_and_wrapping() {
        let seq: Vec<u8> = (0..130).map(|i| b"ACGT"[i % 4]).collect();
        let mut w = FastaWriter::new(Vec::new());
        w.write_record(&record(RecordKind::Fixed, &seq, Vec::new())).unwrap();
        let text = String::from_utf8(w.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], ">fixed_3 source=3");
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[1].len(), 60);
        assert_eq!(lines[2].len(), 60);
        assert_eq!(lines[3].len(), 10);
    }

    #[test]
    fn test_trimmed_header_with_tracks() {
        let tracks = vec![
            ("cov".to_string(), vec![(0, 200), (350, 400)]),
            ("rpt".to_string(), Vec::new()),
            ("crisp".to_string(), vec![(5, 10)]),
        ];
        let mut w = FastaWriter::new(Vec::new());
        w.write_record(&record(RecordKind::Trimmed, b"ACGT", tracks)).unwrap();
        let text = String::from_utf8(w.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        // empty track lists do not appear
        assert_eq!(lines[0], ">trimmed_3 source=3 cov=0,200,350,400 crisp=5,10");
        assert_eq!(lines[1], "ACGT");
    }

    #[test]
    fn test_qv_record() {
        let mut w = QvWriter::new(Vec::new());
        w.write_record(7, &[b"abcd".to_vec(), b"wxyz".to_vec()]).unwrap();
        let text = String::from_utf8(w.into_inner()).unwrap();
        assert_eq!(text, "@fixed/0_4 source=7\nabcd\nwxyz\n");
    }
}
