//! Repair candidate discovery and reduction
//!
//! Two sources feed the candidate list of an A-read: gaps between
//! consecutive overlaps to the same B-read (the aligner could not bridge a
//! stretch of A), and segments whose own quality is missing or poor while a
//! well-aligned overlap spans them. Candidates are merged by position,
//! weighed by supporting evidence, and rejected when the region is spanned
//! by enough ordinary overlaps to rule out a real break.

use crate::overlaps::Overlap;
use crate::read_db::ReadDb;
use crate::tracks::{IntervalTrack, QualityTrack};
use log::debug;
use std::cmp::Ordering;

/// Spanner margin: an overlap only counts as holding a region together when
/// it extends at least this far on both sides.
pub const MIN_SPAN: i32 = 400;

/// Margin for donor qualification and the final spanner recount
const DONOR_MARGIN: i32 = 100;

/// Donor lengths within this slack merge as the same repair
const EQUAL_MERGE_SLACK: i32 = 40;

/// More spanners than this and the site is not actually broken
const MAX_UNBROKEN_SPANNERS: i32 = 10;

/// Merged evidence needed before a gap candidate is believed
const MIN_MERGED_SUPPORT: i32 = 5;

/// A candidate repair: replace A `[ab, ae)` with B `[bb, be)` of read `bread`
#[derive(Debug, Clone)]
pub struct Gap {
    pub ab: i32,
    pub ae: i32,
    pub bb: i32,
    pub be: i32,
    pub bread: i32,
    /// average donor quality over the window, lower is better
    pub diff: i32,
    pub support: i32,
    pub span: i32,
    pub comp: bool,
    pub retired: bool,
}

pub fn gap_order(a: &Gap, b: &Gap) -> Ordering {
    a.ab.cmp(&b.ab)
        .then(a.ae.cmp(&b.ae))
        .then(a.diff.cmp(&b.diff))
}

/// Count overlaps extending at least `MIN_SPAN` bases beyond both ends of
/// `[b, e)`
pub fn spanners(ovls: &[Overlap], b: i32, e: i32) -> i32 {
    ovls.iter()
        .filter(|o| o.abpos < b - MIN_SPAN && o.aepos > e + MIN_SPAN)
        .count() as i32
}

fn is_bad(q: u16, lowq: u16) -> bool {
    q == 0 || q >= lowq
}

/// Locate inter-overlap gaps and synthesise repair candidates for them.
///
/// A gap shows up as two overlaps to the same B-read, same orientation,
/// disjoint in A. The candidate A-interval is widened to the enclosing
/// segment boundaries; the donor B-interval is taken from the trace pairs
/// flanking the gap, then converted to forward coordinates if needed.
pub fn collect_gap_candidates(
    ovls: &[Overlap],
    db: &ReadDb,
    q: &QualityTrack,
    dust: &IntervalTrack,
    twidth: i32,
    gaps: &mut Vec<Gap>,
) {
    for pair in ovls.windows(2) {
        let (left, right) = (&pair[0], &pair[1]);
        if left.bread != right.bread
            || left.aepos >= right.abpos
            || left.is_comp() != right.is_comp()
        {
            continue;
        }
        let (Some(trace_left), Some(trace_right)) = (left.trace.last(), right.trace.first())
        else {
            continue;
        };

        let ab = (left.aepos - 1) / twidth;
        let ae = right.abpos / twidth + 1;

        let mut bb = left.bepos - trace_left.blen;
        let mut be = right.bbpos + trace_right.blen;
        if bb >= be {
            continue;
        }

        if right.is_comp() {
            let blen = db.read_len(right.bread);
            (bb, be) = (blen - be, blen - bb);
        }

        // a gap caused by a low-complexity stretch of B is no repair donor
        if dust
            .intervals(right.bread)
            .iter()
            .any(|&(db_, de)| bb <= db_ && be >= de)
        {
            continue;
        }

        let qb = q.segments(right.bread);
        let beg = (bb / twidth) as usize;
        let end = ((be / twidth + 1) as usize).min(qb.len());
        let mut qsum: i64 = 0;
        let mut unknown = false;
        for &v in &qb[beg..end] {
            if v == 0 {
                unknown = true;
                break;
            }
            qsum += v as i64;
        }
        if unknown {
            continue;
        }

        debug!(
            "read {} gap {}..{} donor {} {}..{}",
            left.aread,
            ab * twidth,
            ae * twidth,
            right.bread,
            bb,
            be
        );

        gaps.push(Gap {
            ab: ab * twidth,
            ae: ae * twidth,
            bb,
            be,
            bread: right.bread,
            diff: (100.0 * qsum as f64 / (be - bb) as f64) as i32,
            support: 1,
            span: 0,
            comp: right.is_comp(),
            retired: false,
        });
    }
}

/// Merge and filter the collected gap candidates in place.
///
/// Candidates surviving all passes are compacted to the front, in
/// `(ab, ae, diff)` order, with their merged support counts.
pub fn reduce_candidates(
    gaps: &mut Vec<Gap>,
    ovls: &[Overlap],
    maxgap: i32,
    qa: &[u16],
    lowq: u16,
    twidth: i32,
) {
    gaps.sort_by(gap_order);

    // oversized repairs are no repairs; identical intervals with agreeing
    // donor lengths pool their support
    for i in 0..gaps.len() {
        if gaps[i].retired {
            continue;
        }
        if gaps[i].ae - gaps[i].ab >= maxgap || (gaps[i].be - gaps[i].bb).abs() >= maxgap {
            gaps[i].retired = true;
            continue;
        }
        let mut j = i + 1;
        while j < gaps.len() && gaps[i].ab == gaps[j].ab && gaps[i].ae == gaps[j].ae {
            if !gaps[j].retired
                && ((gaps[j].be - gaps[j].bb) - (gaps[i].be - gaps[i].bb)).abs()
                    < EQUAL_MERGE_SLACK
            {
                let add = gaps[j].support;
                gaps[i].support += add;
                gaps[j].retired = true;
            }
            j += 1;
        }
    }

    // overlapping intervals: the better-supported one absorbs the other
    for i in 0..gaps.len() {
        if gaps[i].retired {
            continue;
        }
        let mut j = i + 1;
        while j < gaps.len() && gaps[i].ae > gaps[j].ab && gaps[i].ab < gaps[j].ae {
            if !gaps[j].retired {
                if gaps[i].support > gaps[j].support {
                    let add = gaps[j].support;
                    gaps[i].support += add;
                    gaps[j].retired = true;
                } else {
                    let add = gaps[i].support;
                    gaps[j].support += add;
                    gaps[i].retired = true;
                    break;
                }
            }
            j += 1;
        }
    }

    // enough reads align straight through: the site is not broken
    for g in gaps.iter_mut() {
        if !g.retired && spanners(ovls, g.ab, g.ae) > MAX_UNBROKEN_SPANNERS {
            g.retired = true;
        }
    }

    // keep only well-supported candidates corroborated by a quality drop in A
    gaps.retain(|g| {
        if g.retired || g.support < MIN_MERGED_SUPPORT {
            return false;
        }
        let beg = (g.ab / twidth) as usize;
        let end = ((g.ae / twidth) as usize).min(qa.len());
        qa[beg..end].iter().any(|&v| is_bad(v, lowq))
    });
}

/// Scan the trim window for segments with missing or poor quality and pick a
/// spanning donor for each.
pub fn scan_weak_regions(
    ovls: &[Overlap],
    db: &ReadDb,
    q: &QualityTrack,
    twidth: i32,
    lowq: u16,
    trim: (i32, i32),
    gaps: &mut Vec<Gap>,
) {
    let aread = match ovls.first() {
        Some(o) => o.aread,
        None => return,
    };
    let qa = q.segments(aread);

    let mut seg_first = (trim.0 / twidth) as usize;
    let mut seg_last = ((trim.1 / twidth) as usize).min(qa.len());
    while seg_first < seg_last && qa[seg_first] == 0 {
        seg_first += 1;
    }
    while seg_last > seg_first && qa[seg_last - 1] == 0 {
        seg_last -= 1;
    }

    for i in seg_first..seg_last {
        if !is_bad(qa[i], lowq) {
            continue;
        }

        let ab = i as i32 * twidth;
        let ae = (i as i32 + 1) * twidth;

        // a candidate already covers this segment
        if gaps.iter().any(|g| g.ab <= ae && g.ae >= ab) {
            continue;
        }

        let mut span = 0;
        let mut border = 0;
        let mut best: Option<(f64, i32, i32, usize)> = None;

        for (j, o) in ovls.iter().enumerate() {
            if o.abpos + DONOR_MARGIN <= ab && o.aepos - DONOR_MARGIN >= ae {
                // walk the trace to the B window backing this segment
                let mut bb = -1;
                let mut be = o.bbpos;
                let mut apos = o.abpos;
                let mut k = 0;
                while apos <= ab && k < o.trace.len() {
                    apos = (apos / twidth + 1) * twidth;
                    bb = be;
                    be += o.trace[k].blen;
                    k += 1;
                }
                if bb < 0 {
                    continue;
                }
                if o.is_comp() {
                    let blen = db.read_len(o.bread);
                    (bb, be) = (blen - be, blen - bb);
                }

                let qb = q.segments(o.bread);
                let beg = (bb / twidth) as usize;
                let end = ((be / twidth) as usize).min(qb.len());
                let mut qsum: i64 = 0;
                for &v in &qb[beg..end] {
                    if v == 0 {
                        qsum = 0;
                        break;
                    }
                    qsum += v as i64;
                }
                if qsum == 0 {
                    continue;
                }

                let mean = qsum as f64 / (end - beg) as f64;
                if best.is_none() || best.is_some_and(|(m, ..)| mean < m) {
                    best = Some((mean, bb, be, j));
                }
                span += 1;
            }

            if (o.abpos >= ab && o.abpos <= ae) || (o.aepos >= ab && o.aepos <= ae) {
                border += 1;
            }
        }

        let Some((mean, bb, be, j)) = best else {
            continue;
        };

        debug!(
            "read {} weak segment {}..{} (q {}) donor {} {}..{}",
            aread, ab, ae, qa[i], ovls[j].bread, bb, be
        );

        gaps.push(Gap {
            ab,
            ae,
            bb,
            be,
            bread: ovls[j].bread,
            diff: mean as i32,
            support: border,
            span,
            comp: ovls[j].is_comp(),
            retired: false,
        });
    }
}

/// Recount how many overlaps span each candidate with margin
pub fn recount_spanners(gaps: &mut [Gap], ovls: &[Overlap]) {
    for g in gaps.iter_mut() {
        g.span = 0;
    }
    for o in ovls {
        for g in gaps.iter_mut() {
            if o.abpos + DONOR_MARGIN < g.ab && o.aepos - DONOR_MARGIN > g.ae {
                g.span += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlaps::{Strand, TracePoint};

    fn ovl(bread: i32, strand: Strand, a: (i32, i32), b: (i32, i32), blens: &[i32]) -> Overlap {
        Overlap {
            aread: 0,
            bread,
            strand,
            abpos: a.0,
            aepos: a.1,
            bbpos: b.0,
            bepos: b.1,
            trace: blens
                .iter()
                .map(|&n| TracePoint { diffs: 0, blen: n })
                .collect(),
        }
    }

    fn gap(ab: i32, ae: i32, bb: i32, be: i32, diff: i32, support: i32) -> Gap {
        Gap {
            ab,
            ae,
            bb,
            be,
            bread: 1,
            diff,
            support,
            span: 0,
            comp: false,
            retired: false,
        }
    }

    fn db2() -> ReadDb {
        ReadDb::from_reads(vec![vec![b'A'; 1000], vec![b'C'; 1000]])
    }

    fn flat_q(n: usize, v: u16) -> QualityTrack {
        QualityTrack::from_values(vec![vec![v; n], vec![v; n]])
    }

    fn no_dust() -> IntervalTrack {
        IntervalTrack::from_intervals("dust", vec![])
    }

    #[test]
    fn test_collect_basic_candidate() {
        let ovls = vec![
            ovl(1, Strand::Forward, (0, 300), (0, 300), &[100; 3]),
            ovl(1, Strand::Forward, (500, 800), (450, 750), &[100; 3]),
        ];
        let mut gaps = Vec::new();
        collect_gap_candidates(&ovls, &db2(), &flat_q(10, 5), &no_dust(), 100, &mut gaps);
        assert_eq!(gaps.len(), 1);
        let g = &gaps[0];
        assert_eq!((g.ab, g.ae), (200, 600));
        assert_eq!((g.bb, g.be), (200, 550));
        assert!(!g.comp);
        assert_eq!(g.support, 1);
        // segments 2..6 of B sum to 20; 100 * 20 / 350 = 5
        assert_eq!(g.diff, 5);
    }

    #[test]
    fn test_collect_comp_converts_donor_to_forward() {
        let ovls = vec![
            ovl(1, Strand::Reverse, (0, 300), (0, 300), &[100; 3]),
            ovl(1, Strand::Reverse, (500, 800), (450, 750), &[100; 3]),
        ];
        let mut gaps = Vec::new();
        collect_gap_candidates(&ovls, &db2(), &flat_q(10, 5), &no_dust(), 100, &mut gaps);
        assert_eq!(gaps.len(), 1);
        assert_eq!((gaps[0].bb, gaps[0].be), (450, 800));
        assert!(gaps[0].comp);
    }

    #[test]
    fn test_collect_mixed_orientation_is_no_gap() {
        let ovls = vec![
            ovl(1, Strand::Forward, (0, 300), (0, 300), &[100; 3]),
            ovl(1, Strand::Reverse, (500, 800), (450, 750), &[100; 3]),
        ];
        let mut gaps = Vec::new();
        collect_gap_candidates(&ovls, &db2(), &flat_q(10, 5), &no_dust(), 100, &mut gaps);
        assert!(gaps.is_empty());
    }

    #[test]
    fn test_collect_rejects_dusted_donor() {
        let ovls = vec![
            ovl(1, Strand::Forward, (0, 300), (0, 300), &[100; 3]),
            ovl(1, Strand::Forward, (500, 800), (450, 750), &[100; 3]),
        ];
        let dust = IntervalTrack::from_intervals("dust", vec![(1, vec![(250, 500)])]);
        let mut gaps = Vec::new();
        collect_gap_candidates(&ovls, &db2(), &flat_q(10, 5), &dust, 100, &mut gaps);
        assert!(gaps.is_empty());
    }

    #[test]
    fn test_collect_rejects_unknown_donor_quality() {
        let ovls = vec![
            ovl(1, Strand::Forward, (0, 300), (0, 300), &[100; 3]),
            ovl(1, Strand::Forward, (500, 800), (450, 750), &[100; 3]),
        ];
        let mut qv = vec![vec![5u16; 10], vec![5u16; 10]];
        qv[1][3] = 0;
        let q = QualityTrack::from_values(qv);
        let mut gaps = Vec::new();
        collect_gap_candidates(&ovls, &db2(), &q, &no_dust(), 100, &mut gaps);
        assert!(gaps.is_empty());
    }

    #[test]
    fn test_reduce_size_filter() {
        let mut gaps = vec![gap(0, 600, 0, 100, 5, 1), gap(0, 100, 0, 900, 5, 1)];
        let qa = vec![30u16; 10];
        reduce_candidates(&mut gaps, &[], 500, &qa, 28, 100);
        assert!(gaps.is_empty());
    }

    #[test]
    fn test_reduce_equal_merge_pools_support() {
        let mut gaps = vec![
            gap(200, 400, 0, 100, 9, 1),
            gap(200, 400, 10, 120, 7, 1),
            gap(200, 400, 20, 130, 8, 1),
            gap(200, 400, 30, 140, 9, 1),
            gap(200, 400, 40, 150, 9, 1),
        ];
        let mut qa = vec![5u16; 10];
        qa[2] = 30;
        reduce_candidates(&mut gaps, &[], 500, &qa, 28, 100);
        assert_eq!(gaps.len(), 1);
        // lowest diff is the keeper, with everyone's support
        assert_eq!(gaps[0].diff, 7);
        assert_eq!(gaps[0].support, 5);
    }

    #[test]
    fn test_reduce_equal_merge_respects_donor_slack() {
        let mut gaps = vec![
            gap(200, 400, 0, 100, 7, 1),
            // donor 100 bases longer: a different repair
            gap(200, 400, 0, 200, 8, 1),
        ];
        let mut qa = vec![5u16; 10];
        qa[2] = 30;
        reduce_candidates(&mut gaps, &[], 500, &qa, 28, 100);
        // neither reaches the support threshold alone
        assert!(gaps.is_empty());
    }

    #[test]
    fn test_reduce_overlap_merge_better_supported_wins() {
        let mut gaps = vec![gap(200, 400, 0, 100, 5, 4), gap(300, 500, 0, 100, 5, 2)];
        let mut qa = vec![5u16; 10];
        qa[2] = 30;
        reduce_candidates(&mut gaps, &[], 500, &qa, 28, 100);
        assert_eq!(gaps.len(), 1);
        assert_eq!((gaps[0].ab, gaps[0].ae), (200, 400));
        assert_eq!(gaps[0].support, 6);
    }

    #[test]
    fn test_reduce_overlap_merge_tie_later_wins() {
        let mut gaps = vec![gap(200, 400, 0, 100, 5, 3), gap(300, 500, 0, 100, 5, 3)];
        let mut qa = vec![5u16; 10];
        qa[3] = 30;
        reduce_candidates(&mut gaps, &[], 500, &qa, 28, 100);
        assert_eq!(gaps.len(), 1);
        assert_eq!((gaps[0].ab, gaps[0].ae), (300, 500));
        assert_eq!(gaps[0].support, 6);
    }

    #[test]
    fn test_reduce_spanner_rejection() {
        let mut gaps = vec![gap(2000, 2500, 0, 480, 5, 5)];
        let spanning: Vec<Overlap> = (0..11)
            .map(|i| ovl(10 + i, Strand::Forward, (1500, 3000), (0, 600), &[40; 15]))
            .collect();
        let mut qa = vec![5u16; 50];
        qa[21] = 30;
        reduce_candidates(&mut gaps, &spanning, 600, &qa, 28, 100);
        assert!(gaps.is_empty());
    }

    #[test]
    fn test_reduce_needs_quality_corroboration() {
        // support is there but A looks healthy across the interval
        let mut gaps = vec![gap(200, 400, 0, 100, 5, 5)];
        let qa = vec![5u16; 10];
        reduce_candidates(&mut gaps, &[], 500, &qa, 28, 100);
        assert!(gaps.is_empty());
    }

    #[test]
    fn test_scan_picks_minimum_mean_donor() {
        let mut qa = vec![vec![5u16; 10], vec![5u16; 10], vec![4u16; 10], vec![5u16; 10]];
        qa[0][2] = 30;
        let q = QualityTrack::from_values(qa);
        let db = ReadDb::from_reads(vec![
            vec![b'A'; 1000],
            vec![b'C'; 1000],
            vec![b'G'; 1000],
            vec![b'T'; 1000],
        ]);
        let ovls = vec![
            ovl(1, Strand::Forward, (0, 1000), (0, 1000), &[100; 10]),
            ovl(2, Strand::Forward, (0, 1000), (0, 1000), &[100; 10]),
            ovl(3, Strand::Forward, (0, 200), (0, 200), &[100; 2]),
        ];
        let mut gaps = Vec::new();
        scan_weak_regions(&ovls, &db, &q, 100, 28, (0, 1000), &mut gaps);
        assert_eq!(gaps.len(), 1);
        let g = &gaps[0];
        assert_eq!((g.ab, g.ae), (200, 300));
        // read 2 has the lower per-segment quality
        assert_eq!(g.bread, 2);
        assert_eq!((g.bb, g.be), (200, 300));
        assert_eq!(g.diff, 4);
        assert_eq!(g.span, 2);
        // the short overlap ends inside the segment
        assert_eq!(g.support, 1);
    }

    #[test]
    fn test_scan_skips_covered_segment() {
        let mut qa = vec![vec![5u16; 10], vec![5u16; 10]];
        qa[0][2] = 30;
        let q = QualityTrack::from_values(qa);
        let ovls = vec![ovl(1, Strand::Forward, (0, 1000), (0, 1000), &[100; 10])];
        let mut gaps = vec![gap(200, 400, 0, 100, 5, 5)];
        scan_weak_regions(&ovls, &db2(), &q, 100, 28, (0, 1000), &mut gaps);
        assert_eq!(gaps.len(), 1);
    }

    #[test]
    fn test_scan_skips_zero_quality_donor() {
        let mut qa = vec![vec![5u16; 10], vec![0u16; 10]];
        qa[0][2] = 30;
        let q = QualityTrack::from_values(qa);
        let ovls = vec![ovl(1, Strand::Forward, (0, 1000), (0, 1000), &[100; 10])];
        let mut gaps = Vec::new();
        scan_weak_regions(&ovls, &db2(), &q, 100, 28, (0, 1000), &mut gaps);
        assert!(gaps.is_empty());
    }

    #[test]
    fn test_scan_sentinel_edges_are_skipped() {
        let mut qa = vec![vec![5u16; 10], vec![5u16; 10]];
        qa[0][0] = 0;
        qa[0][9] = 0;
        let q = QualityTrack::from_values(qa);
        let ovls = vec![ovl(1, Strand::Forward, (0, 1000), (0, 1000), &[100; 10])];
        let mut gaps = Vec::new();
        scan_weak_regions(&ovls, &db2(), &q, 100, 28, (0, 1000), &mut gaps);
        assert!(gaps.is_empty());
    }

    #[test]
    fn test_recount_spanners() {
        let mut gaps = vec![gap(200, 300, 0, 100, 5, 5)];
        gaps[0].span = 99;
        let ovls = vec![
            ovl(1, Strand::Forward, (0, 1000), (0, 1000), &[100; 10]),
            ovl(2, Strand::Forward, (150, 350), (0, 200), &[100; 2]),
        ];
        recount_spanners(&mut gaps, &ovls);
        assert_eq!(gaps[0].span, 1);
    }
}
