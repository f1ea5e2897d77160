//! Chimeric-flip detection
//!
//! A read assembled across a hairpin carries two halves that are
//! reverse-complements of each other. Self-overlaps in the complement
//! orientation whose A-interval crosses the mirror diagonal betray the fold;
//! the trim window is pulled back to the fold point, keeping the larger side.

use crate::gaps::spanners;
use crate::overlaps::Overlap;
use log::debug;

fn intersect(ab: i32, ae: i32, bb: i32, be: i32) -> bool {
    ab < be && bb < ae
}

fn keep_larger_side(trim_b: &mut i32, trim_e: &mut i32, cut_b: i32, cut_e: i32) {
    if *trim_b < cut_b && cut_e < *trim_e {
        if cut_b - *trim_b < *trim_e - cut_e {
            *trim_b = cut_e;
        } else {
            *trim_e = cut_b;
        }
    }
}

/// Narrow `[trim_b, trim_e)` at chimeric-fold evidence in the self-overlaps
/// of the group. Returns true when any cut fired.
pub fn narrow_trim(
    ovls: &[Overlap],
    alen: i32,
    twidth: i32,
    trim_b: &mut i32,
    trim_e: &mut i32,
) -> bool {
    let aread = match ovls.first() {
        Some(o) => o.aread,
        None => return false,
    };

    // self-overlaps form a contiguous run under (bread, abpos) ordering
    let b = match ovls.iter().position(|o| o.bread == aread) {
        Some(b) => b,
        None => return false,
    };
    let e = ovls[b..]
        .iter()
        .position(|o| o.bread != aread)
        .map_or(ovls.len(), |n| b + n);
    let selfs = &ovls[b..e];

    if !selfs.iter().any(|o| o.is_comp()) {
        return false;
    }

    let mut trimmed = false;

    // fold crossings inside a single self-complement overlap
    for o in selfs {
        if !o.is_comp() || o.trace.is_empty() {
            continue;
        }
        let (ab_c, ae_c) = (alen - o.bepos, alen - o.bbpos);
        if !intersect(o.abpos, o.aepos, ab_c, ae_c) {
            continue;
        }

        let mut sab = o.abpos;
        let mut sae = (sab / twidth + 1) * twidth;
        let mut sbb = o.bbpos;
        let mut sbe = sbb + o.trace[0].blen;

        // the final slices end at aepos/bepos, off the uniform grid; skip them
        for k in 1..o.trace.len().saturating_sub(1) {
            if intersect(sab, sae, alen - sbe, alen - sbb) {
                debug!(
                    "read {} fold crossing at {}..{} x {}..{}",
                    aread,
                    sab,
                    sae,
                    alen - sbe,
                    alen - sbb
                );
                trimmed = true;
                keep_larger_side(trim_b, trim_e, sab, sae);
            }
            sab = sae;
            sae += twidth;
            sbb = sbe;
            sbe += o.trace[k].blen;
        }
    }

    // an unspanned gap between adjacent self-complement overlaps that
    // overlaps its own mirror is a fold the aligner stepped over
    for pair in selfs.windows(2) {
        let (o1, o2) = (&pair[0], &pair[1]);
        if !o1.is_comp() || !o2.is_comp() {
            continue;
        }
        let (gb, ge) = (o1.aepos, o2.abpos);
        let (gb_c, ge_c) = (alen - o2.bbpos, alen - o1.bepos);
        if intersect(gb, ge, gb_c, ge_c) && spanners(ovls, gb, ge) <= 1 {
            debug!("read {} fold gap at {}..{} x {}..{}", aread, gb, ge, gb_c, ge_c);
            trimmed = true;
            let mid = (gb + ge) / 2;
            if *trim_b < mid && mid < *trim_e {
                if mid - *trim_b < *trim_e - mid {
                    *trim_b = mid;
                } else {
                    *trim_e = mid;
                }
            }
        }
    }

    trimmed
}
