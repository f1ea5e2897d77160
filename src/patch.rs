//! Patched-read assembly and coordinate remapping
//!
//! The assembler walks the surviving candidates in A-order, alternating
//! kept A-spans with donor B-spans. Every kept span is recorded in a
//! piecewise-linear map from source to patched coordinates, which later
//! rewrites annotation intervals onto the patched read.

use crate::gaps::Gap;
use crate::read_db::{reverse_complement_in_place, ReadDb};
use log::debug;

/// Adjusted annotation intervals must keep at least this length
pub const MIN_INT_LEN: i32 = 5;

/// One kept A-span: `[src_b, src_e)` lands at `dst` in the patched read
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatchSpan {
    pub src_b: i32,
    pub src_e: i32,
    pub dst: i32,
}

/// Piecewise-linear injection from retained source coordinates to patched
/// coordinates, affine within each kept span
#[derive(Debug, Default)]
pub struct PatchMap {
    pub spans: Vec<PatchSpan>,
}

impl PatchMap {
    /// Map a source interval onto the patched read.
    ///
    /// `None` when the interval misses every kept span or runs past the last
    /// one. An interval swallowed by a removed region maps to an empty (or
    /// inverted) result and is left to the caller's length filter.
    pub fn remap(&self, ib: i32, ie: i32) -> Option<(i32, i32)> {
        let spans = &self.spans;
        let last = spans.last()?;
        if ie < spans[0].src_b || ib > last.src_e {
            return None;
        }

        let mut ib_adj = None;
        let mut ie_adj = None;
        for (j, s) in spans.iter().enumerate() {
            if ib_adj.is_none() && ib < s.src_e {
                let clamped = ib.max(s.src_b);
                ib_adj = Some(s.dst + (clamped - s.src_b));
            }
            if ie_adj.is_none() && ie <= s.src_e {
                if ie < s.src_b && j > 0 {
                    let p = &spans[j - 1];
                    ie_adj = Some(p.dst + (p.src_e - p.src_b));
                    break;
                } else if ie > s.src_b {
                    ie_adj = Some(s.dst + (ie - s.src_b));
                    break;
                }
            }
        }

        match (ib_adj, ie_adj) {
            (Some(b), Some(e)) => Some((b, e)),
            _ => None,
        }
    }
}

/// The product of one assembly: the patched sequence, its quality streams,
/// the coordinate map, and what was spent building it
pub struct AssembledRead {
    pub seq: Vec<u8>,
    pub qvs: Option<Vec<Vec<u8>>>,
    pub map: PatchMap,
    pub gaps_patched: u64,
    pub bases_replaced: u64,
    pub bases_inserted: u64,
}

/// Build the patched read for `aread` from its surviving candidates, sorted
/// by A-position. Candidates straddling the trim window boundaries are
/// stepped over (before the window) or end the walk (past the window).
pub fn assemble(
    db: &ReadDb,
    aread: i32,
    gaps: &[Gap],
    trim_b: i32,
    trim_e: i32,
    with_qvs: bool,
) -> AssembledRead {
    let ra = db.read(aread);
    let qa = if with_qvs { db.qv_streams(aread) } else { None };
    let nstreams = qa.map_or(0, <[Vec<u8>]>::len);

    let mut seq: Vec<u8> = Vec::with_capacity(ra.len());
    let mut qvs: Vec<Vec<u8>> = (0..nstreams).map(|_| Vec::with_capacity(ra.len())).collect();
    let mut map = PatchMap::default();
    let mut gaps_patched = 0;
    let mut bases_replaced = 0;
    let mut bases_inserted = 0;

    let mut ab = trim_b;
    for g in gaps {
        if trim_b > g.ab {
            ab = g.ae;
            continue;
        }
        if trim_e < g.ae {
            break;
        }

        let ae = g.ab;
        if trim_b < ae && trim_b > ab {
            ab = trim_b;
        }
        debug_assert!(ab <= ae);

        if ab < ae {
            map.spans.push(PatchSpan {
                src_b: ab,
                src_e: ae,
                dst: seq.len() as i32,
            });
            if let Some(streams) = qa {
                for (qv, stream) in qvs.iter_mut().zip(streams) {
                    qv.extend_from_slice(&stream[ab as usize..ae as usize]);
                }
            }
            seq.extend_from_slice(&ra[ab as usize..ae as usize]);
        }
        ab = g.ae;

        debug!(
            "read {} splice {} {}..{}{} over {}..{}",
            aread,
            g.bread,
            g.bb,
            g.be,
            if g.comp { " (comp)" } else { "" },
            g.ab,
            g.ae
        );

        if with_qvs {
            if let Some(streams) = db.qv_streams(g.bread) {
                for (qv, stream) in qvs.iter_mut().zip(streams) {
                    let mut donor = stream[g.bb as usize..g.be as usize].to_vec();
                    if g.comp {
                        donor.reverse();
                    }
                    qv.extend_from_slice(&donor);
                }
            }
        }

        let rb = db.read(g.bread);
        let mut donor = rb[g.bb as usize..g.be as usize].to_vec();
        if g.comp {
            reverse_complement_in_place(&mut donor);
        }
        seq.extend_from_slice(&donor);

        gaps_patched += 1;
        bases_replaced += (g.ae - g.ab) as u64;
        bases_inserted += (g.be - g.bb) as u64;
    }

    let ae = trim_e;
    if ab < ae {
        map.spans.push(PatchSpan {
            src_b: ab,
            src_e: ae,
            dst: seq.len() as i32,
        });
        if let Some(streams) = qa {
            for (qv, stream) in qvs.iter_mut().zip(streams) {
                qv.extend_from_slice(&stream[ab as usize..ae as usize]);
            }
        }
        seq.extend_from_slice(&ra[ab as usize..ae as usize]);
    }

    AssembledRead {
        seq,
        qvs: if with_qvs { Some(qvs) } else { None },
        map,
        gaps_patched,
        bases_replaced,
        bases_inserted,
    }
}
