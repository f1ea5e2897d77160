//! Per-read repair pass
//!
//! One A-read's repair is a pure function of its overlap group, the
//! database, and the tracks, so groups are processed in parallel and the
//! results written back in input order.

use crate::flips;
use crate::gaps::{self, Gap};
use crate::output::{FastaWriter, QvWriter};
use crate::overlaps::Overlap;
use crate::patch::{self, MIN_INT_LEN};
use crate::read_db::ReadDb;
use crate::tracks::TrackSet;
use log::{debug, info};
use rayon::prelude::*;
use std::io::{self, Write};

pub struct RepairConfig {
    /// minimum length for an emitted sequence
    pub minlen: i32,
    /// segment quality threshold; 0 or >= this is bad
    pub lowq: u16,
    /// maximum A- or donor-length of a patchable gap
    pub maxgap: i32,
    /// carry quality streams through the patching
    pub with_qvs: bool,
}

#[derive(Clone, Copy, PartialEq)]
pub enum RecordKind {
    Fixed,
    Trimmed,
}

/// One emitted read with its rewritten annotation tracks
pub struct FixedRead {
    pub aread: i32,
    pub kind: RecordKind,
    pub seq: Vec<u8>,
    pub qvs: Option<Vec<Vec<u8>>>,
    pub tracks: Vec<(String, Vec<(i32, i32)>)>,
}

#[derive(Default, Clone, Copy)]
pub struct GroupStats {
    pub flips: u64,
    pub gaps: u64,
    pub bases_replaced: u64,
    pub bases_inserted: u64,
}

#[derive(Default)]
pub struct PassStats {
    pub groups: u64,
    pub records: u64,
    pub flips: u64,
    pub gaps: u64,
    pub bases_replaced: u64,
    pub bases_inserted: u64,
}

impl PassStats {
    fn absorb(&mut self, g: GroupStats) {
        self.groups += 1;
        self.flips += g.flips;
        self.gaps += g.gaps;
        self.bases_replaced += g.bases_replaced;
        self.bases_inserted += g.bases_inserted;
    }
}

pub struct ReadFixer<'a> {
    db: &'a ReadDb,
    tracks: &'a TrackSet,
    cfg: &'a RepairConfig,
    twidth: i32,
}

impl<'a> ReadFixer<'a> {
    pub fn new(db: &'a ReadDb, tracks: &'a TrackSet, cfg: &'a RepairConfig, twidth: i32) -> Self {
        ReadFixer {
            db,
            tracks,
            cfg,
            twidth,
        }
    }

    /// Repair one A-read from its overlap group. `None` when nothing is
    /// emitted for it (empty trim window or result below the length floor).
    pub fn fix_group(&self, ovls: &[Overlap]) -> io::Result<(Option<FixedRead>, GroupStats)> {
        let mut stats = GroupStats::default();
        let Some(first) = ovls.first() else {
            return Ok((None, stats));
        };
        let aread = first.aread;

        for o in ovls {
            for id in [o.aread, o.bread] {
                if id < 0 || id as usize >= self.db.len() {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("overlap references read {} beyond database size {}", id, self.db.len()),
                    ));
                }
            }
            if o.aepos > self.db.read_len(o.aread) || o.bepos > self.db.read_len(o.bread) {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "overlap {} x {} at {}..{} x {}..{} extends beyond its reads",
                        o.aread, o.bread, o.abpos, o.aepos, o.bbpos, o.bepos
                    ),
                ));
            }
        }

        let alen = self.db.read_len(aread);
        let (mut trim_b, mut trim_e) = self.tracks.trim_window(aread, alen);
        if trim_b >= trim_e {
            return Ok((None, stats));
        }

        let (mut flip_b, mut flip_e) = (trim_b, trim_e);
        if flips::narrow_trim(ovls, alen, self.twidth, &mut flip_b, &mut flip_e) {
            stats.flips = 1;
        }
        trim_b = trim_b.max(flip_b);
        trim_e = trim_e.min(flip_e);
        debug!("read {} trim {}..{}", aread, trim_b, trim_e);

        let qa = self.tracks.q.segments(aread);
        let mut candidates: Vec<Gap> = Vec::new();
        gaps::collect_gap_candidates(
            ovls,
            self.db,
            &self.tracks.q,
            &self.tracks.dust,
            self.twidth,
            &mut candidates,
        );
        gaps::reduce_candidates(
            &mut candidates,
            ovls,
            self.cfg.maxgap,
            qa,
            self.cfg.lowq,
            self.twidth,
        );
        gaps::scan_weak_regions(
            ovls,
            self.db,
            &self.tracks.q,
            self.twidth,
            self.cfg.lowq,
            (trim_b, trim_e),
            &mut candidates,
        );

        if candidates.is_empty() {
            return Ok((self.trimmed_record(aread, trim_b, trim_e)?, stats));
        }

        candidates.sort_by(gaps::gap_order);
        gaps::recount_spanners(&mut candidates, ovls);
        for g in &candidates {
            debug!(
                "read {} candidate {}..{} <- {} {}..{} diff {} support {} span {}",
                aread, g.ab, g.ae, g.bread, g.bb, g.be, g.diff, g.support, g.span
            );
        }

        let asm = patch::assemble(self.db, aread, &candidates, trim_b, trim_e, self.cfg.with_qvs);
        stats.gaps = asm.gaps_patched;
        stats.bases_replaced = asm.bases_replaced;
        stats.bases_inserted = asm.bases_inserted;

        let rlen = asm.seq.len() as i32;
        if rlen < self.cfg.minlen {
            return Ok((None, stats));
        }

        let mut tracks_out = Vec::with_capacity(self.tracks.user.len());
        for track in &self.tracks.user {
            let mut adjusted = Vec::new();
            for &(ib, ie) in track.intervals(aread) {
                let Some((b, e)) = asm.map.remap(ib, ie) else {
                    continue;
                };
                if e - b > MIN_INT_LEN {
                    if b < 0 || b > rlen || b > e || e > rlen {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("adjusted interval {}..{} outside read length {}", b, e, rlen),
                        ));
                    }
                    adjusted.push((b, e));
                }
            }
            tracks_out.push((track.name().to_string(), adjusted));
        }

        Ok((
            Some(FixedRead {
                aread,
                kind: RecordKind::Fixed,
                seq: asm.seq,
                qvs: asm.qvs,
                tracks: tracks_out,
            }),
            stats,
        ))
    }

    /// No repairs: emit the trim window verbatim, tracks shifted into it
    fn trimmed_record(&self, aread: i32, trim_b: i32, trim_e: i32) -> io::Result<Option<FixedRead>> {
        let tlen = trim_e - trim_b;
        if tlen < self.cfg.minlen {
            return Ok(None);
        }

        let seq = self.db.read(aread)[trim_b as usize..trim_e as usize].to_vec();
        let qvs = if self.cfg.with_qvs {
            self.db.qv_streams(aread).map(|streams| {
                streams
                    .iter()
                    .map(|s| s[trim_b as usize..trim_e as usize].to_vec())
                    .collect()
            })
        } else {
            None
        };

        let mut tracks_out = Vec::with_capacity(self.tracks.user.len());
        for track in &self.tracks.user {
            let mut adjusted = Vec::new();
            for &(ib, ie) in track.intervals(aread) {
                let b = (ib - trim_b).max(0);
                let e = (ie - trim_b).min(tlen);
                if e - b > MIN_INT_LEN {
                    adjusted.push((b, e));
                }
            }
            tracks_out.push((track.name().to_string(), adjusted));
        }

        Ok(Some(FixedRead {
            aread,
            kind: RecordKind::Trimmed,
            seq,
            qvs,
            tracks: tracks_out,
        }))
    }
}

/// Repair every group and write the results in group order
pub fn run_pass<W1: Write, W2: Write>(
    db: &ReadDb,
    tracks: &TrackSet,
    cfg: &RepairConfig,
    twidth: i32,
    groups: &[Vec<Overlap>],
    fasta: &mut FastaWriter<W1>,
    mut qv: Option<&mut QvWriter<W2>>,
) -> io::Result<PassStats> {
    let fixer = ReadFixer::new(db, tracks, cfg, twidth);

    let results: Vec<io::Result<(Option<FixedRead>, GroupStats)>> =
        groups.par_iter().map(|g| fixer.fix_group(g)).collect();

    let mut stats = PassStats::default();
    for result in results {
        let (record, group_stats) = result?;
        stats.absorb(group_stats);
        if let Some(record) = record {
            fasta.write_record(&record)?;
            if let Some(qv) = qv.as_mut() {
                if let Some(streams) = &record.qvs {
                    qv.write_record(record.aread, streams)?;
                }
            }
            stats.records += 1;
        }
    }
    fasta.flush()?;
    if let Some(qv) = qv.as_mut() {
        qv.flush()?;
    }

    info!(
        "{} reads in, {} written, {} flips, {} gaps patched, replaced {} bases with {}",
        stats.groups, stats.records, stats.flips, stats.gaps, stats.bases_replaced, stats.bases_inserted
    );

    Ok(stats)
}
