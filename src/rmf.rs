//! Radix match finder: a per-block index of 2-byte prefixes.
//!
//! The finder is built once per dictionary block and then queried
//! read-only by every encoder slice. All state lives in flat arrays
//! indexed by dictionary position (no node graphs):
//!
//! - `heads`: one bucket per 2-byte prefix, holding the newest position
//!   seen with that prefix.
//! - `links`: one 32-bit cell per position, chaining each position to
//!   the next older position with the same prefix. Following links
//!   visits strictly decreasing positions, so candidates come out
//!   nearest-first.
//! - `hints`: one byte per position caching the shared-suffix length
//!   with the chained position, letting queries skip comparisons.
//!
//! The build runs in two passes. The **bucketing** pass chains
//! positions into their prefix buckets; the **refinement** pass walks
//! each chain computing length hints, truncated at `search_depth`, and
//! optionally recursing over chain halves (`divide_and_conquer`).
//! Buckets are independent, so a parallel build splits the prefix space
//! into contiguous ranges with no cross-range writes; the cells are
//! atomics so worker jobs can share the finder immutably.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use crate::model::{MATCH_LEN_MAX, MATCH_LEN_MIN};

/// End-of-chain sentinel.
pub const NULL_LINK: u32 = u32::MAX;

/// Number of 2-byte prefix buckets.
pub const NUM_BUCKETS: usize = 1 << 16;

/// Hint value meaning "not computed" (position beyond the refinement
/// depth).
const HINT_UNKNOWN: u8 = 0xFF;
/// Hints at or above this are lower bounds, not exact lengths.
const HINT_CAP: u8 = 0xFE;

/// Chains shorter than this are refined linearly even in
/// divide-and-conquer mode.
const DNC_LEAF: usize = 16;

/// A match candidate: `dist` is the backward distance (>= 1), `len` the
/// number of matching bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match {
    pub dist: u32,
    pub len: u32,
}

/// Radix match finder over one dictionary block.
pub struct RadixMatchFinder {
    links: Vec<AtomicU32>,
    hints: Vec<AtomicU8>,
    heads: Vec<AtomicU32>,
    len: usize,
    dict_size: u32,
    search_depth: u32,
    divide_and_conquer: bool,
}

impl RadixMatchFinder {
    pub fn new(dict_size: u32, search_depth: u32, divide_and_conquer: bool) -> Self {
        RadixMatchFinder {
            links: Vec::new(),
            hints: Vec::new(),
            heads: (0..NUM_BUCKETS).map(|_| AtomicU32::new(NULL_LINK)).collect(),
            len: 0,
            dict_size,
            search_depth: search_depth.max(1),
            divide_and_conquer,
        }
    }

    #[inline]
    pub fn indexed_len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn dict_size(&self) -> u32 {
        self.dict_size
    }

    #[inline]
    fn prefix2(data: &[u8], pos: usize) -> usize {
        ((data[pos] as usize) << 8) | data[pos + 1] as usize
    }

    /// Reset the index for a block of `data_len` bytes. Must be called
    /// before `build_range`; requires exclusive access.
    pub fn prepare(&mut self, data_len: usize) {
        if self.links.len() < data_len {
            self.links.resize_with(data_len, || AtomicU32::new(NULL_LINK));
            self.hints.resize_with(data_len, || AtomicU8::new(HINT_UNKNOWN));
        }
        for cell in &self.links[..data_len] {
            cell.store(NULL_LINK, Ordering::Relaxed);
        }
        for cell in &self.hints[..data_len] {
            cell.store(HINT_UNKNOWN, Ordering::Relaxed);
        }
        for head in &self.heads {
            head.store(NULL_LINK, Ordering::Relaxed);
        }
        self.len = data_len;
    }

    /// Index every position whose 2-byte prefix falls in
    /// `[bucket_lo, bucket_hi)`. Ranges partition the prefix space, so
    /// concurrent calls on disjoint ranges never write the same cell.
    pub fn build_range(&self, data: &[u8], bucket_lo: usize, bucket_hi: usize) {
        let n = self.len.min(data.len());
        if n < MATCH_LEN_MIN {
            return;
        }

        // Bucketing pass: chain positions newest-first per prefix.
        for pos in 0..n - 1 {
            let p = Self::prefix2(data, pos);
            if p < bucket_lo || p >= bucket_hi {
                continue;
            }
            let prev = self.heads[p].load(Ordering::Relaxed);
            self.links[pos].store(prev, Ordering::Relaxed);
            self.heads[p].store(pos as u32, Ordering::Relaxed);
        }

        // Refinement pass: cache shared-suffix lengths along each chain,
        // truncated at the search depth.
        let mut chain: Vec<u32> = Vec::with_capacity(self.search_depth as usize + 1);
        for p in bucket_lo..bucket_hi {
            let mut cur = self.heads[p].load(Ordering::Relaxed);
            if cur == NULL_LINK {
                continue;
            }
            chain.clear();
            while cur != NULL_LINK && chain.len() <= self.search_depth as usize {
                chain.push(cur);
                cur = self.links[cur as usize].load(Ordering::Relaxed);
            }
            self.refine_chain(data, &chain);
        }
    }

    /// Build the whole index serially.
    pub fn build(&mut self, data: &[u8]) {
        self.prepare(data.len());
        self.build_range(data, 0, NUM_BUCKETS);
    }

    fn refine_chain(&self, data: &[u8], chain: &[u32]) {
        if chain.len() < 2 {
            return;
        }
        if !self.divide_and_conquer || chain.len() <= DNC_LEAF {
            for pair in chain.windows(2) {
                let lcp = Self::common_len(data, pair[1] as usize, pair[0] as usize, HINT_CAP as usize);
                self.hints[pair[0] as usize].store(lcp as u8, Ordering::Relaxed);
            }
        } else {
            let mid = chain.len() / 2;
            self.refine_chain(data, &chain[..mid + 1]);
            self.refine_chain(data, &chain[mid..]);
        }
    }

    /// Length of the common prefix of the suffixes at `older` and
    /// `newer`, capped at `limit`.
    #[inline]
    fn common_len(data: &[u8], older: usize, newer: usize, limit: usize) -> usize {
        let max = limit.min(data.len() - newer);
        let mut len = 0;
        while len < max && data[older + len] == data[newer + len] {
            len += 1;
        }
        len
    }

    /// Collect match candidates at `pos` into `out`, nearest-first with
    /// strictly increasing lengths, capped at `max_len` and the search
    /// depth. `data` must be the block the index was built over.
    pub fn matches_at(&self, data: &[u8], pos: usize, max_len: usize, out: &mut Vec<Match>) {
        out.clear();
        if pos >= self.len || pos + MATCH_LEN_MIN > data.len() {
            return;
        }
        let max_len = max_len.min(data.len() - pos).min(MATCH_LEN_MAX);
        if max_len < MATCH_LEN_MIN {
            return;
        }

        let mut best = MATCH_LEN_MIN - 1;
        let mut cur = pos;
        // Shared length between `pos` and `cur`; the chain invariant
        // lets it bound every later comparison.
        let mut shared = usize::MAX;

        for _ in 0..self.search_depth {
            let link = self.links[cur].load(Ordering::Relaxed);
            if link == NULL_LINK {
                break;
            }
            let cand = link as usize;
            let dist = pos - cand;
            if dist > self.dict_size as usize {
                break;
            }

            let hint = self.hints[cur].load(Ordering::Relaxed);
            let len = if hint < HINT_CAP && shared > hint as usize {
                // Exact: pos and cur agree past the point where cur and
                // cand diverge, so pos and cand diverge there too.
                (hint as usize).min(max_len)
            } else {
                let lower = if hint == HINT_UNKNOWN {
                    MATCH_LEN_MIN
                } else {
                    hint as usize
                };
                let start = shared.min(lower).min(max_len);
                let mut len = start;
                while len < max_len && data[cand + len] == data[pos + len] {
                    len += 1;
                }
                len
            };

            if len > best {
                out.push(Match {
                    dist: dist as u32,
                    len: len as u32,
                });
                best = len;
                if best >= max_len {
                    break;
                }
            }
            shared = len;
            cur = cand;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
