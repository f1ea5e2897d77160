//! Overlap dump parsing
//!
//! An overlap dump is a text file (optionally BGZF-compressed) holding the
//! pairwise alignments of every A-read, grouped by A-read and sorted by
//! (B-read, A-start) within a group. The first line carries the segment
//! width the traces were computed with.

use log::debug;
use noodles::bgzf;
use std::fs::File;
use std::io::{BufRead, BufReader, Error as IoError, Read, Seek, SeekFrom};
use std::num::ParseIntError;

#[derive(Debug)]
pub enum ParseErr {
    NotEnoughFields,
    IoError(IoError),
    InvalidField(ParseIntError),
    InvalidOrientation,
    InvalidInterval(String),
    InvalidTrace(String),
    MissingWidthHeader,
    OutOfOrder(String),
    InvalidFormat(String),
}

impl std::fmt::Display for ParseErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseErr::NotEnoughFields => write!(f, "Not enough fields in overlap record"),
            ParseErr::IoError(e) => write!(f, "IO error: {}", e),
            ParseErr::InvalidField(e) => write!(f, "Invalid field: {}", e),
            ParseErr::InvalidOrientation => write!(f, "Orientation must be 'n' or 'c'"),
            ParseErr::InvalidInterval(msg) => write!(f, "Invalid interval: {}", msg),
            ParseErr::InvalidTrace(msg) => write!(f, "Invalid trace: {}", msg),
            ParseErr::MissingWidthHeader => {
                write!(f, "Overlap dump must start with a 'W<TAB><width>' line")
            }
            ParseErr::OutOfOrder(msg) => write!(f, "Overlap out of order: {}", msg),
            ParseErr::InvalidFormat(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for ParseErr {}

/// Orientation of the B-read in an alignment
#[derive(Default, PartialEq, Clone, Copy, Debug)]
pub enum Strand {
    #[default]
    Forward,
    Reverse,
}

/// One trace pair: diff count and B bases consumed by a W-aligned A-slice
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TracePoint {
    pub diffs: i32,
    pub blen: i32,
}

/// A pairwise alignment from an A-read to a B-read.
///
/// `[abpos, aepos)` is on A's forward strand. `[bbpos, bepos)` is in B's
/// alignment-walk frame: forward coordinates for `Strand::Forward`,
/// reverse-complement coordinates for `Strand::Reverse`.
#[derive(Debug, Clone, PartialEq)]
pub struct Overlap {
    pub aread: i32,
    pub bread: i32,
    pub strand: Strand,
    pub abpos: i32,
    pub aepos: i32,
    pub bbpos: i32,
    pub bepos: i32,
    pub trace: Vec<TracePoint>,
}

impl Overlap {
    pub fn is_comp(&self) -> bool {
        self.strand == Strand::Reverse
    }

    /// Number of W-aligned A-slices covered by `[abpos, aepos)`
    pub fn slice_count(abpos: i32, aepos: i32, twidth: i32) -> i32 {
        (aepos - 1) / twidth - abpos / twidth + 1
    }
}

const BGZF_HEADER_SIZE: usize = 18;

/// Check whether a file starts with a valid BGZF header.
/// Returns `Ok(false)` for regular gzip, too-small files, or plain text.
fn is_bgzf<R: Read + Seek>(reader: &mut R) -> std::io::Result<bool> {
    let mut header = [0u8; BGZF_HEADER_SIZE];
    let result = match reader.read_exact(&mut header) {
        Ok(()) => {
            Ok(header[0..2] == [0x1f, 0x8b]      // gzip magic
                && header[2] == 0x08              // DEFLATE
                && header[3] == 0x04              // FEXTRA
                && header[10..12] == [0x06, 0x00] // XLEN=6
                && header[12..14] == [b'B', b'C'] // BC subfield
                && header[14..16] == [0x02, 0x00]) // SLEN=2
        }
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    };
    reader.seek(SeekFrom::Start(0))?;
    result
}

fn parse_overlap_line(line: &str, twidth: i32) -> Result<Overlap, ParseErr> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < 8 {
        return Err(ParseErr::NotEnoughFields);
    }

    let aread = fields[0].parse::<i32>().map_err(ParseErr::InvalidField)?;
    let bread = fields[1].parse::<i32>().map_err(ParseErr::InvalidField)?;
    let strand = match fields[2] {
        "n" => Strand::Forward,
        "c" => Strand::Reverse,
        _ => return Err(ParseErr::InvalidOrientation),
    };
    let abpos = fields[3].parse::<i32>().map_err(ParseErr::InvalidField)?;
    let aepos = fields[4].parse::<i32>().map_err(ParseErr::InvalidField)?;
    let bbpos = fields[5].parse::<i32>().map_err(ParseErr::InvalidField)?;
    let bepos = fields[6].parse::<i32>().map_err(ParseErr::InvalidField)?;

    if abpos < 0 || abpos >= aepos {
        return Err(ParseErr::InvalidInterval(format!(
            "A interval {}..{}",
            abpos, aepos
        )));
    }
    if bbpos < 0 || bbpos >= bepos {
        return Err(ParseErr::InvalidInterval(format!(
            "B interval {}..{}",
            bbpos, bepos
        )));
    }

    let mut trace = Vec::new();
    for pair in fields[7].split(';') {
        let (diffs, blen) = pair.split_once(',').ok_or_else(|| {
            ParseErr::InvalidTrace(format!("expected 'diffs,blen' pair, found '{}'", pair))
        })?;
        trace.push(TracePoint {
            diffs: diffs.parse().map_err(ParseErr::InvalidField)?,
            blen: blen.parse().map_err(ParseErr::InvalidField)?,
        });
    }

    let nslices = Overlap::slice_count(abpos, aepos, twidth);
    if trace.len() as i32 != nslices {
        return Err(ParseErr::InvalidTrace(format!(
            "A interval {}..{} needs {} trace pairs, found {}",
            abpos,
            aepos,
            nslices,
            trace.len()
        )));
    }
    let bsum: i32 = trace.iter().map(|t| t.blen).sum();
    if bsum != bepos - bbpos {
        return Err(ParseErr::InvalidTrace(format!(
            "trace consumes {} B bases, B interval {}..{} has {}",
            bsum,
            bbpos,
            bepos,
            bepos - bbpos
        )));
    }

    Ok(Overlap {
        aread,
        bread,
        strand,
        abpos,
        aepos,
        bbpos,
        bepos,
        trace,
    })
}

/// Streaming reader yielding one A-group of overlaps at a time
pub struct OverlapDumpReader<R: BufRead> {
    reader: R,
    twidth: i32,
    lookahead: Option<Overlap>,
    line_no: u64,
    done: bool,
}

impl OverlapDumpReader<BufReader<Box<dyn Read>>> {
    /// Open a dump file, transparently handling BGZF compression
    pub fn from_path(path: &str) -> std::io::Result<Self> {
        let inner: Box<dyn Read> = if [".gz", ".bgz"].iter().any(|e| path.ends_with(e)) {
            let mut file = File::open(path)
                .map_err(|e| IoError::new(e.kind(), format!("Failed to open '{}': {}", path, e)))?;
            if !is_bgzf(&mut file)? {
                return Err(IoError::new(
                    std::io::ErrorKind::InvalidData,
                    format!(
                        "'{}' is regular gzip, not BGZF. Convert with: zcat '{}' | bgzip > output.gz",
                        path, path
                    ),
                ));
            }
            debug!("Reading BGZF-compressed overlap dump {}", path);
            Box::new(bgzf::Reader::new(file))
        } else {
            let file = File::open(path)
                .map_err(|e| IoError::new(e.kind(), format!("Failed to open '{}': {}", path, e)))?;
            Box::new(file)
        };

        Self::new(BufReader::new(inner)).map_err(|e| {
            IoError::new(
                std::io::ErrorKind::InvalidData,
                format!("Failed to parse overlap dump '{}': {}", path, e),
            )
        })
    }
}

impl<R: BufRead> OverlapDumpReader<R> {
    /// Wrap a reader; consumes the mandatory width header
    pub fn new(reader: R) -> Result<Self, ParseErr> {
        let mut this = OverlapDumpReader {
            reader,
            twidth: 0,
            lookahead: None,
            line_no: 0,
            done: false,
        };
        let header = match this.next_data_line()? {
            Some(line) => line,
            None => return Err(ParseErr::MissingWidthHeader),
        };
        let width = header
            .strip_prefix("W\t")
            .ok_or(ParseErr::MissingWidthHeader)?
            .parse::<i32>()
            .map_err(ParseErr::InvalidField)?;
        if width <= 0 {
            return Err(ParseErr::InvalidFormat(format!(
                "segment width must be positive, found {}",
                width
            )));
        }
        this.twidth = width;
        Ok(this)
    }

    pub fn twidth(&self) -> i32 {
        self.twidth
    }

    fn next_data_line(&mut self) -> Result<Option<String>, ParseErr> {
        let mut line = String::new();
        loop {
            line.clear();
            let n = self.reader.read_line(&mut line).map_err(ParseErr::IoError)?;
            if n == 0 {
                return Ok(None);
            }
            self.line_no += 1;
            let trimmed = line.trim_end_matches(['\n', '\r']);
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            return Ok(Some(trimmed.to_string()));
        }
    }

    /// Next contiguous run of overlaps sharing an A-read, or `None` at EOF
    pub fn next_group(&mut self) -> Result<Option<Vec<Overlap>>, ParseErr> {
        let mut group: Vec<Overlap> = match self.lookahead.take() {
            Some(ovl) => vec![ovl],
            None => Vec::new(),
        };

        while !self.done {
            let line = match self.next_data_line()? {
                Some(line) => line,
                None => {
                    self.done = true;
                    break;
                }
            };
            let ovl = parse_overlap_line(&line, self.twidth)?;
            match group.last() {
                None => group.push(ovl),
                Some(last) if last.aread == ovl.aread => {
                    if (ovl.bread, ovl.abpos) < (last.bread, last.abpos) {
                        return Err(ParseErr::OutOfOrder(format!(
                            "line {}: A-read {} group not sorted by (B-read, A-start)",
                            self.line_no, ovl.aread
                        )));
                    }
                    group.push(ovl);
                }
                Some(_) => {
                    self.lookahead = Some(ovl);
                    return Ok(Some(group));
                }
            }
        }

        if group.is_empty() {
            Ok(None)
        } else {
            Ok(Some(group))
        }
    }

    /// Read every remaining group into memory
    pub fn collect_groups(&mut self) -> Result<Vec<Vec<Overlap>>, ParseErr> {
        let mut groups = Vec::new();
        while let Some(group) = self.next_group()? {
            groups.push(group);
        }
        Ok(groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader(text: &str) -> OverlapDumpReader<BufReader<&[u8]>> {
        OverlapDumpReader::new(BufReader::new(text.as_bytes())).unwrap()
    }

    #[test]
    fn test_parse_valid_line() {
        let line = "0\t7\tn\t0\t250\t100\t360\t2,60;1,100;0,100";
        let ovl = parse_overlap_line(line, 100).unwrap();
        assert_eq!(ovl.aread, 0);
        assert_eq!(ovl.bread, 7);
        assert_eq!(ovl.strand, Strand::Forward);
        assert_eq!((ovl.abpos, ovl.aepos), (0, 250));
        assert_eq!((ovl.bbpos, ovl.bepos), (100, 360));
        assert_eq!(ovl.trace.len(), 3);
        assert_eq!(ovl.trace[0], TracePoint { diffs: 2, blen: 60 });
    }

    #[test]
    fn test_parse_not_enough_fields() {
        assert!(parse_overlap_line("0\t7\tn\t0\t250\t100\t360", 100).is_err());
    }

    #[test]
    fn test_parse_bad_orientation() {
        let line = "0\t7\t+\t0\t250\t100\t360\t2,60;1,100;0,100";
        assert!(matches!(
            parse_overlap_line(line, 100),
            Err(ParseErr::InvalidOrientation)
        ));
    }

    #[test]
    fn test_parse_trace_count_mismatch() {
        // 0..250 spans three W=100 slices, only two pairs given
        let line = "0\t7\tn\t0\t250\t100\t360\t2,160;1,100";
        assert!(matches!(
            parse_overlap_line(line, 100),
            Err(ParseErr::InvalidTrace(_))
        ));
    }

    #[test]
    fn test_parse_trace_sum_mismatch() {
        let line = "0\t7\tn\t0\t250\t100\t360\t2,60;1,100;0,90";
        assert!(matches!(
            parse_overlap_line(line, 100),
            Err(ParseErr::InvalidTrace(_))
        ));
    }

    #[test]
    fn test_parse_inverted_interval() {
        let line = "0\t7\tn\t250\t0\t100\t360\t2,60;1,100;0,100";
        assert!(matches!(
            parse_overlap_line(line, 100),
            Err(ParseErr::InvalidInterval(_))
        ));
    }

    #[test]
    fn test_missing_width_header() {
        let text = "0\t7\tn\t0\t100\t0\t100\t0,100\n";
        assert!(matches!(
            OverlapDumpReader::new(BufReader::new(text.as_bytes())),
            Err(ParseErr::MissingWidthHeader)
        ));
    }

    #[test]
    fn test_grouping() {
        let text = "W\t100\n\
                    # comment\n\
                    0\t1\tn\t0\t100\t0\t100\t0,100\n\
                    0\t2\tn\t0\t100\t0\t100\t0,100\n\
                    3\t0\tn\t0\t100\t0\t100\t0,100\n";
        let mut r = reader(text);
        assert_eq!(r.twidth(), 100);
        let g1 = r.next_group().unwrap().unwrap();
        assert_eq!(g1.len(), 2);
        assert_eq!(g1[0].aread, 0);
        let g2 = r.next_group().unwrap().unwrap();
        assert_eq!(g2.len(), 1);
        assert_eq!(g2[0].aread, 3);
        assert!(r.next_group().unwrap().is_none());
    }

    #[test]
    fn test_group_order_violation() {
        let text = "W\t100\n\
                    0\t2\tn\t0\t100\t0\t100\t0,100\n\
                    0\t1\tn\t0\t100\t0\t100\t0,100\n";
        let mut r = reader(text);
        assert!(matches!(r.next_group(), Err(ParseErr::OutOfOrder(_))));
    }

    #[test]
    fn test_slice_count() {
        assert_eq!(Overlap::slice_count(0, 100, 100), 1);
        assert_eq!(Overlap::slice_count(0, 101, 100), 2);
        assert_eq!(Overlap::slice_count(50, 150, 100), 2);
        assert_eq!(Overlap::slice_count(99, 100, 100), 1);
        assert_eq!(Overlap::slice_count(100, 201, 100), 2);
    }
}
