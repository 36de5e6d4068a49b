//! Low-level byte-pair merge engine.
//!
//! Given a fragment's bytes and a rank map, this module produces the exact
//! merge sequence the reference tiktoken implementation produces. The rank of
//! a pair doubles as its merge priority: lower ranks merge earlier, and among
//! pairs of equal rank the leftmost merges first. Getting either rule wrong
//! changes token streams silently, so the loop below sticks to the canonical
//! scan-for-minimum formulation instead of a heap.

use rustc_hash::FxHashMap;

/// Rank used for "no merge possible here".
const NO_MERGE: u32 = u32::MAX;

/// Split `piece` into token ranks using byte-pair merging.
///
/// Fragments that are a single byte resolve through the rank map directly.
///
/// # Panics
///
/// Panics if a surviving span has no rank. Every vocabulary this crate loads
/// contains all 256 single bytes (or their mapped equivalents), which makes
/// every span resolvable.
pub fn byte_pair_encode(piece: &[u8], ranks: &FxHashMap<Vec<u8>, u32>) -> Vec<u32> {
    if piece.len() == 1 {
        return vec![lookup(ranks, piece)];
    }
    byte_pair_merge(piece, ranks)
        .windows(2)
        .map(|bounds| lookup(ranks, &piece[bounds[0].0..bounds[1].0]))
        .collect()
}

/// Split `piece` into the byte spans byte-pair merging leaves behind.
///
/// Useful when the caller wants the surviving substrings rather than ranks.
pub fn byte_pair_split<'a>(piece: &'a [u8], ranks: &FxHashMap<Vec<u8>, u32>) -> Vec<&'a [u8]> {
    if piece.len() == 1 {
        return vec![piece];
    }
    byte_pair_merge(piece, ranks)
        .windows(2)
        .map(|bounds| &piece[bounds[0].0..bounds[1].0])
        .collect()
}

#[inline]
fn lookup(ranks: &FxHashMap<Vec<u8>, u32>, span: &[u8]) -> u32 {
    *ranks
        .get(span)
        .expect("vocabulary covers every single byte, so every span resolves")
}

/// Run the merge loop and return the surviving part boundaries.
///
/// Each part is `(start_index, rank_of_pair_with_next)`, with two sentinel
/// parts at the end so that `windows(2)` over the result yields byte spans.
fn byte_pair_merge(piece: &[u8], ranks: &FxHashMap<Vec<u8>, u32>) -> Vec<(usize, u32)> {
    debug_assert!(piece.len() > 1);

    // Seed every adjacent byte pair with its rank, tracking the global
    // minimum. `min_rank` keeps the leftmost index on ties because only a
    // strictly smaller rank replaces it.
    let mut parts = Vec::with_capacity(piece.len() + 1);
    let mut min_rank: (u32, usize) = (NO_MERGE, usize::MAX);
    for i in 0..piece.len() - 1 {
        let rank = *ranks.get(&piece[i..i + 2]).unwrap_or(&NO_MERGE);
        if rank < min_rank.0 {
            min_rank = (rank, i);
        }
        parts.push((i, rank));
    }
    parts.push((piece.len() - 1, NO_MERGE));
    parts.push((piece.len(), NO_MERGE));

    // Rank of the span formed by parts[i] and its (new) right neighbor.
    let get_rank = |parts: &[(usize, u32)], i: usize| -> u32 {
        if i + 3 < parts.len() {
            *ranks
                .get(&piece[parts[i].0..parts[i + 3].0])
                .unwrap_or(&NO_MERGE)
        } else {
            NO_MERGE
        }
    };

    while min_rank.0 != NO_MERGE {
        let i = min_rank.1;
        // Recompute the two affected pair ranks before dropping the merged
        // right part; both lookups span the merged four-byte window.
        if i > 0 {
            parts[i - 1].1 = get_rank(&parts, i - 1);
        }
        parts[i].1 = get_rank(&parts, i);
        parts.remove(i + 1);

        min_rank = (NO_MERGE, usize::MAX);
        for (i, &(_, rank)) in parts[..parts.len() - 1].iter().enumerate() {
            if rank < min_rank.0 {
                min_rank = (rank, i);
            }
        }
    }

    parts
}
