//! LZMA2 chunk encoder.
//!
//! A [`ChunkEncoder`] turns one slice of a dictionary block into a run
//! of LZMA2 chunks. Match candidates come from the shared radix match
//! finder; the parse is either greedy (`Fast`) or a windowed
//! minimum-price search (`Normal`/`Best`) over the cached price tables.
//!
//! Chunk accounting: a chunk closes when its decoded size reaches the
//! 2^16 limit, its compressed size nears the packed limit, or the slice
//! ends. When the range-coded payload would not beat the raw bytes, the
//! chunk is written uncompressed instead and the next compressed chunk
//! carries a state reset so both sides stay in step.
//!
//! Each slice starts from reset state, making its chunk run
//! independently decodable; slices may still reference earlier block
//! positions through normal match distances.

use crate::frame::{ChunkHeader, ResetMode, MAX_CHUNK_PACKED, MAX_CHUNK_UNPACKED};
use crate::model::{
    bit_price_0, bit_price_1, len_to_pos_state, pos_slot_for, state_after_literal,
    state_after_match, state_after_rep, state_after_short_rep, state_is_literal, DistPrices,
    LenPrices, Probs, Props, END_POS_MODEL_INDEX, MATCH_LEN_MAX, MATCH_LEN_MIN, NUM_ALIGN_BITS,
    PRICE_REFRESH_INTERVAL,
};
use crate::rangecoder::RangeEncoder;
use crate::rmf::{Match, RadixMatchFinder};

/// Match selection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// Greedy selection, fastest.
    Fast,
    /// Windowed optimal parse with a moderate lookahead.
    #[default]
    Normal,
    /// Windowed optimal parse with the full lookahead.
    Best,
}

/// Parameters the pipeline resolves per frame and hands to every slice
/// encoder.
#[derive(Debug, Clone, Copy)]
pub struct EncoderParams {
    pub props: Props,
    pub strategy: Strategy,
    /// A match at least this long is taken immediately.
    pub fast_length: u32,
    /// Lookahead window for the optimal parser.
    pub optimal_window: usize,
}

/// Keep this many spare payload bytes so one more operation can never
/// overrun the packed chunk limit.
const PACKED_MARGIN: usize = 64;

/// Matches of length 2 further away than this are not worth a match op.
const MAX_DIST_FOR_LEN2: u32 = 512;

/// One parse decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Literal,
    ShortRep,
    Rep { idx: usize, len: usize },
    Match { dist: u32, len: usize },
}

impl Op {
    fn advance(self) -> usize {
        match self {
            Op::Literal | Op::ShortRep => 1,
            Op::Rep { len, .. } | Op::Match { len, .. } => len,
        }
    }
}

/// Node of the optimal-parse lattice.
#[derive(Clone, Copy)]
struct Node {
    price: u32,
    from: u32,
    op: NodeOp,
    state: u8,
    reps: [u32; 4],
}

#[derive(Clone, Copy)]
enum NodeOp {
    None,
    Literal,
    ShortRep,
    Rep(u8),
    Match(u32),
}

const UNREACHED: u32 = u32::MAX;

/// Per-worker LZMA2 encoder state.
pub struct ChunkEncoder {
    probs: Probs,
    state: usize,
    /// Rep distances, stored as `distance - 1`.
    reps: [u32; 4],
    len_prices: LenPrices,
    rep_len_prices: LenPrices,
    dist_prices: DistPrices,
    price_countdown: u32,
    matches: Vec<Match>,
    nodes: Vec<Node>,
    plan: Vec<Op>,
}

impl ChunkEncoder {
    pub fn new(props: Props) -> Self {
        ChunkEncoder {
            probs: Probs::new(props),
            state: 0,
            reps: [0; 4],
            len_prices: LenPrices::new(),
            rep_len_prices: LenPrices::new(),
            dist_prices: DistPrices::new(),
            price_countdown: 0,
            matches: Vec::new(),
            nodes: Vec::new(),
            plan: Vec::new(),
        }
    }

    fn reset_coding_state(&mut self, props: Props) {
        self.probs.reset(props);
        self.state = 0;
        self.reps = [0; 4];
        self.price_countdown = 0;
    }

    fn refresh_prices(&mut self) {
        let num_pos_states = 1 << self.probs.props().pb;
        self.len_prices.refresh(&self.probs.len, num_pos_states);
        self.rep_len_prices.refresh(&self.probs.rep_len, num_pos_states);
        self.dist_prices.refresh(&self.probs);
        self.price_countdown = PRICE_REFRESH_INTERVAL;
    }

    /// Encode `data[start..end)` as a run of LZMA2 chunks appended to
    /// `out`.
    ///
    /// `pos_delta` maps block-buffer indices to frame positions
    /// (`frame_pos = pos + pos_delta`); `prev_byte_hint` supplies the
    /// byte preceding `data[0]` when the block carries no overlap.
    /// `first_in_frame` marks the slice that opens the frame, whose
    /// first chunk may carry the dictionary-reset flag.
    #[allow(clippy::too_many_arguments)]
    pub fn encode_slice(
        &mut self,
        data: &[u8],
        start: usize,
        end: usize,
        pos_delta: u64,
        prev_byte_hint: u8,
        rmf: &RadixMatchFinder,
        params: &EncoderParams,
        first_in_frame: bool,
        out: &mut Vec<u8>,
    ) {
        debug_assert!(start <= end && end <= data.len());
        let mut pos = start;
        // Every slice opens by announcing properties, so its chunk run
        // decodes without assumptions about sibling slices. Properties
        // resets leave the dictionary alone; only the frame-opening raw
        // chunk carries a dictionary reset.
        let mut next_reset = ResetMode::ResetAll;
        let mut props_sent = false;
        let mut frame_open = first_in_frame;

        while pos < end {
            if next_reset != ResetMode::Keep {
                self.reset_coding_state(params.props);
            }
            self.refresh_prices();

            let chunk_end = pos + MAX_CHUNK_UNPACKED.min(end - pos);
            let (payload, consumed) =
                self.encode_chunk(data, pos, chunk_end, pos_delta, prev_byte_hint, rmf, params);
            debug_assert!(consumed > 0);

            let compressed_len = payload.len()
                + match next_reset {
                    ResetMode::ResetAll => 6,
                    _ => 5,
                };
            if compressed_len >= consumed + 3 || payload.len() > MAX_CHUNK_PACKED {
                // Raw bytes win; the model diverged while trying, so the
                // next compressed chunk must reset state.
                ChunkHeader::Uncompressed {
                    reset_dict: frame_open,
                    unpacked: consumed,
                }
                .write(out);
                out.extend_from_slice(&data[pos..pos + consumed]);
                next_reset = if props_sent {
                    ResetMode::ResetState
                } else {
                    ResetMode::ResetAll
                };
            } else {
                ChunkHeader::Compressed {
                    reset: next_reset,
                    unpacked: consumed,
                    packed: payload.len(),
                    props: (next_reset == ResetMode::ResetAll).then_some(params.props),
                }
                .write(out);
                out.extend_from_slice(&payload);
                props_sent = true;
                next_reset = ResetMode::Keep;
            }
            frame_open = false;
            pos += consumed;
        }
    }

    /// Encode operations until the chunk fills; returns the payload and
    /// the number of input bytes consumed.
    #[allow(clippy::too_many_arguments)]
    fn encode_chunk(
        &mut self,
        data: &[u8],
        from: usize,
        to: usize,
        pos_delta: u64,
        prev_byte_hint: u8,
        rmf: &RadixMatchFinder,
        params: &EncoderParams,
    ) -> (Vec<u8>, usize) {
        let mut rc = RangeEncoder::new();
        let mut pos = from;

        'outer: while pos < to {
            if self.price_countdown == 0 {
                self.refresh_prices();
            }

            match params.strategy {
                Strategy::Fast => {
                    let op = self.choose_greedy(data, pos, to, rmf, params);
                    self.emit(&mut rc, data, pos, pos_delta, prev_byte_hint, op);
                    pos += op.advance();
                    if rc.pending_len() + PACKED_MARGIN >= MAX_CHUNK_PACKED {
                        break 'outer;
                    }
                }
                Strategy::Normal | Strategy::Best => {
                    self.plan_optimal(data, pos, to, pos_delta, prev_byte_hint, rmf, params);
                    for k in 0..self.plan.len() {
                        let op = self.plan[k];
                        self.emit(&mut rc, data, pos, pos_delta, prev_byte_hint, op);
                        pos += op.advance();
                        if rc.pending_len() + PACKED_MARGIN >= MAX_CHUNK_PACKED {
                            break 'outer;
                        }
                    }
                }
            }
        }

        (rc.finish(), pos - from)
    }

    // -----------------------------------------------------------------
    // Greedy parse
    // -----------------------------------------------------------------

    fn choose_greedy(
        &mut self,
        data: &[u8],
        pos: usize,
        limit: usize,
        rmf: &RadixMatchFinder,
        params: &EncoderParams,
    ) -> Op {
        let max_len = (limit - pos).min(MATCH_LEN_MAX);
        if max_len < MATCH_LEN_MIN {
            return self.literal_or_short_rep(data, pos);
        }

        let (rep_idx, rep_len) = self.best_rep(data, pos, max_len);

        rmf.matches_at(data, pos, max_len, &mut self.matches);
        let main = self.matches.last().copied();

        let (main_dist, main_len) = match main {
            Some(m) if m.len as usize >= MATCH_LEN_MIN => (m.dist, m.len as usize),
            _ => (0, 0),
        };

        // Prefer a rep nearly as long as the main match: it costs far
        // fewer bits.
        if rep_len >= MATCH_LEN_MIN && rep_len + 1 >= main_len {
            return Op::Rep { idx: rep_idx, len: rep_len };
        }
        if main_len >= MATCH_LEN_MIN {
            if main_len >= params.fast_length as usize {
                return Op::Match { dist: main_dist, len: main_len };
            }
            // A bare length-2 match only pays off close by.
            if main_len > 2 || main_dist <= MAX_DIST_FOR_LEN2 {
                return Op::Match { dist: main_dist, len: main_len };
            }
        }
        if rep_len >= MATCH_LEN_MIN {
            return Op::Rep { idx: rep_idx, len: rep_len };
        }
        self.literal_or_short_rep(data, pos)
    }

    fn literal_or_short_rep(&self, data: &[u8], pos: usize) -> Op {
        if !state_is_literal(self.state) {
            let dist = self.reps[0] as usize + 1;
            if dist <= pos && data[pos] == data[pos - dist] {
                return Op::ShortRep;
            }
        }
        Op::Literal
    }

    /// Longest rep-distance match at `pos`, preferring the lowest index
    /// on ties.
    fn best_rep(&self, data: &[u8], pos: usize, max_len: usize) -> (usize, usize) {
        let mut best = (0usize, 0usize);
        for idx in 0..4 {
            let dist = self.reps[idx] as usize + 1;
            if dist > pos {
                continue;
            }
            let len = common_len(data, pos - dist, pos, max_len);
            if len > best.1 {
                best = (idx, len);
            }
        }
        best
    }

    // -----------------------------------------------------------------
    // Optimal parse
    // -----------------------------------------------------------------

    /// Plan a minimum-price op sequence covering up to `optimal_window`
    /// bytes starting at `pos`; the result lands in `self.plan`.
    #[allow(clippy::too_many_arguments)]
    fn plan_optimal(
        &mut self,
        data: &[u8],
        pos: usize,
        limit: usize,
        pos_delta: u64,
        prev_byte_hint: u8,
        rmf: &RadixMatchFinder,
        params: &EncoderParams,
    ) {
        let window = params.optimal_window.min(limit - pos);
        self.plan.clear();

        // Degenerate window or an obviously long match: skip the lattice.
        let max_len0 = (limit - pos).min(MATCH_LEN_MAX);
        if window < MATCH_LEN_MIN {
            self.plan.push(self.literal_or_short_rep(data, pos));
            return;
        }
        let (rep_idx0, rep_len0) = self.best_rep(data, pos, max_len0);
        if rep_len0 >= params.fast_length as usize {
            self.plan.push(Op::Rep { idx: rep_idx0, len: rep_len0 });
            return;
        }
        rmf.matches_at(data, pos, max_len0, &mut self.matches);
        if let Some(m) = self.matches.last() {
            if m.len as usize >= params.fast_length as usize {
                self.plan.push(Op::Match { dist: m.dist, len: m.len as usize });
                return;
            }
        }

        self.nodes.clear();
        self.nodes.resize(
            window + 1,
            Node {
                price: UNREACHED,
                from: 0,
                op: NodeOp::None,
                state: 0,
                reps: [0; 4],
            },
        );
        self.nodes[0].price = 0;
        self.nodes[0].state = self.state as u8;
        self.nodes[0].reps = self.reps;

        let pb_mask = self.probs.props().pb_mask();

        for i in 0..window {
            if self.nodes[i].price == UNREACHED {
                continue;
            }
            let here = self.nodes[i];
            let state = here.state as usize;
            let cur = pos + i;
            let apos = pos_delta + cur as u64;
            let pos_state = apos as usize & pb_mask;
            let base_price = here.price;
            let avail = (window - i).min(MATCH_LEN_MAX);

            // Literal.
            {
                let prev = if cur > 0 { data[cur - 1] } else { prev_byte_hint };
                let mb = if !state_is_literal(state) {
                    let dist = here.reps[0] as usize + 1;
                    debug_assert!(dist <= cur);
                    Some(data[cur - dist])
                } else {
                    None
                };
                let price = base_price
                    + bit_price_0(self.probs.is_match[state][pos_state])
                    + self.literal_price(apos, prev, data[cur], mb);
                self.relax(
                    i + 1,
                    price,
                    i,
                    NodeOp::Literal,
                    state_after_literal(state),
                    here.reps,
                );
            }

            let match_flag = bit_price_1(self.probs.is_match[state][pos_state]);

            // Short rep.
            if !state_is_literal(state) {
                let dist = here.reps[0] as usize + 1;
                if dist <= cur && data[cur] == data[cur - dist] {
                    let price = base_price
                        + match_flag
                        + bit_price_1(self.probs.is_rep[state])
                        + bit_price_0(self.probs.is_rep_g0[state])
                        + bit_price_0(self.probs.is_rep0_long[state][pos_state]);
                    self.relax(
                        i + 1,
                        price,
                        i,
                        NodeOp::ShortRep,
                        state_after_short_rep(state),
                        here.reps,
                    );
                }
            }

            // Rep matches.
            let rep_flag = match_flag + bit_price_1(self.probs.is_rep[state]);
            for idx in 0..4 {
                let dist = here.reps[idx] as usize + 1;
                if dist > cur {
                    continue;
                }
                let len_max = common_len(data, cur - dist, cur, avail);
                if len_max < MATCH_LEN_MIN {
                    continue;
                }
                let sel_price = rep_flag + self.rep_selector_price(state, pos_state, idx);
                let next_state = state_after_rep(state);
                let mut reps = here.reps;
                rotate_rep(&mut reps, idx);
                for len in MATCH_LEN_MIN..=len_max {
                    let price =
                        base_price + sel_price + self.rep_len_prices.price(len, pos_state);
                    self.relax(i + len, price, i, NodeOp::Rep(idx as u8), next_state, reps);
                }
            }

            // Normal matches.
            rmf.matches_at(data, cur, avail, &mut self.matches);
            if !self.matches.is_empty() {
                let matches = std::mem::take(&mut self.matches);
                let normal_flag = match_flag + bit_price_0(self.probs.is_rep[state]);
                let next_state = state_after_match(state);
                let mut start_len = MATCH_LEN_MIN;
                for m in &matches {
                    let dist_val = m.dist - 1;
                    let mut reps = here.reps;
                    rotate_match(&mut reps, dist_val);
                    for len in start_len..=m.len as usize {
                        let price = base_price
                            + normal_flag
                            + self.len_prices.price(len, pos_state)
                            + self.dist_prices.dist_price(&self.probs, dist_val, len);
                        self.relax(i + len, price, i, NodeOp::Match(m.dist), next_state, reps);
                    }
                    start_len = m.len as usize + 1;
                }
                self.matches = matches;
            }
        }

        // Recover the cheapest path ending exactly at the window edge.
        let mut j = window;
        debug_assert!(self.nodes[j].price != UNREACHED);
        while j > 0 {
            let node = self.nodes[j];
            let i = node.from as usize;
            let len = j - i;
            let op = match node.op {
                NodeOp::Literal => Op::Literal,
                NodeOp::ShortRep => Op::ShortRep,
                NodeOp::Rep(idx) => Op::Rep { idx: idx as usize, len },
                NodeOp::Match(dist) => Op::Match { dist, len },
                NodeOp::None => unreachable!("path through unreached node"),
            };
            self.plan.push(op);
            j = i;
        }
        self.plan.reverse();
    }

    #[allow(clippy::too_many_arguments)]
    fn relax(
        &mut self,
        j: usize,
        price: u32,
        from: usize,
        op: NodeOp,
        state: usize,
        reps: [u32; 4],
    ) {
        let node = &mut self.nodes[j];
        if price < node.price {
            node.price = price;
            node.from = from as u32;
            node.op = op;
            node.state = state as u8;
            node.reps = reps;
        }
    }

    fn rep_selector_price(&self, state: usize, pos_state: usize, idx: usize) -> u32 {
        match idx {
            0 => {
                bit_price_0(self.probs.is_rep_g0[state])
                    + bit_price_1(self.probs.is_rep0_long[state][pos_state])
            }
            1 => {
                bit_price_1(self.probs.is_rep_g0[state])
                    + bit_price_0(self.probs.is_rep_g1[state])
            }
            2 => {
                bit_price_1(self.probs.is_rep_g0[state])
                    + bit_price_1(self.probs.is_rep_g1[state])
                    + bit_price_0(self.probs.is_rep_g2[state])
            }
            _ => {
                bit_price_1(self.probs.is_rep_g0[state])
                    + bit_price_1(self.probs.is_rep_g1[state])
                    + bit_price_1(self.probs.is_rep_g2[state])
            }
        }
    }

    /// Approximate price of one literal against the current counters.
    fn literal_price(&self, apos: u64, prev: u8, symbol: u8, match_byte: Option<u8>) -> u32 {
        let base = 0x300 * self.probs.props().literal_context(apos, prev);
        let probs = &self.probs.literal[base..base + 0x300];
        let mut price = 0u32;
        let mut node = 1u32;
        match match_byte {
            Some(mb) => {
                let mut mb = mb as u32;
                let mut matched = true;
                for i in (0..8).rev() {
                    let bit = ((symbol >> i) & 1) as u32;
                    if matched {
                        let match_bit = (mb >> 7) & 1;
                        mb <<= 1;
                        price += crate::model::bit_price(
                            probs[(((1 + match_bit) << 8) + node) as usize],
                            bit,
                        );
                        matched = match_bit == bit;
                    } else {
                        price += crate::model::bit_price(probs[node as usize], bit);
                    }
                    node = (node << 1) | bit;
                }
            }
            None => {
                for i in (0..8).rev() {
                    let bit = ((symbol >> i) & 1) as u32;
                    price += crate::model::bit_price(probs[node as usize], bit);
                    node = (node << 1) | bit;
                }
            }
        }
        price
    }

    // -----------------------------------------------------------------
    // Emission
    // -----------------------------------------------------------------

    /// Encode one operation, updating coding state, rep distances, and
    /// the adaptive counters.
    fn emit(
        &mut self,
        rc: &mut RangeEncoder,
        data: &[u8],
        pos: usize,
        pos_delta: u64,
        prev_byte_hint: u8,
        op: Op,
    ) {
        let apos = pos_delta + pos as u64;
        let pos_state = apos as usize & self.probs.props().pb_mask();
        self.price_countdown = self.price_countdown.saturating_sub(1);

        match op {
            Op::Literal => {
                rc.encode_bit(&mut self.probs.is_match[self.state][pos_state], 0);
                let prev = if pos > 0 { data[pos - 1] } else { prev_byte_hint };
                let mb = if !state_is_literal(self.state) {
                    let dist = self.reps[0] as usize + 1;
                    debug_assert!(dist <= pos);
                    Some(data[pos - dist])
                } else {
                    None
                };
                self.probs.encode_literal(rc, apos, prev, data[pos], mb);
                self.state = state_after_literal(self.state);
            }
            Op::ShortRep => {
                debug_assert_eq!(data[pos], data[pos - self.reps[0] as usize - 1]);
                rc.encode_bit(&mut self.probs.is_match[self.state][pos_state], 1);
                rc.encode_bit(&mut self.probs.is_rep[self.state], 1);
                rc.encode_bit(&mut self.probs.is_rep_g0[self.state], 0);
                rc.encode_bit(&mut self.probs.is_rep0_long[self.state][pos_state], 0);
                self.state = state_after_short_rep(self.state);
            }
            Op::Rep { idx, len } => {
                rc.encode_bit(&mut self.probs.is_match[self.state][pos_state], 1);
                rc.encode_bit(&mut self.probs.is_rep[self.state], 1);
                match idx {
                    0 => {
                        rc.encode_bit(&mut self.probs.is_rep_g0[self.state], 0);
                        rc.encode_bit(&mut self.probs.is_rep0_long[self.state][pos_state], 1);
                    }
                    1 => {
                        rc.encode_bit(&mut self.probs.is_rep_g0[self.state], 1);
                        rc.encode_bit(&mut self.probs.is_rep_g1[self.state], 0);
                    }
                    2 => {
                        rc.encode_bit(&mut self.probs.is_rep_g0[self.state], 1);
                        rc.encode_bit(&mut self.probs.is_rep_g1[self.state], 1);
                        rc.encode_bit(&mut self.probs.is_rep_g2[self.state], 0);
                    }
                    _ => {
                        rc.encode_bit(&mut self.probs.is_rep_g0[self.state], 1);
                        rc.encode_bit(&mut self.probs.is_rep_g1[self.state], 1);
                        rc.encode_bit(&mut self.probs.is_rep_g2[self.state], 1);
                    }
                }
                debug_assert!({
                    let dist = self.reps[idx] as usize + 1;
                    dist <= pos && data[pos - dist..pos - dist + len] == data[pos..pos + len]
                });
                rotate_rep(&mut self.reps, idx);
                self.probs.rep_len.encode(rc, len, pos_state);
                self.state = state_after_rep(self.state);
            }
            Op::Match { dist, len } => {
                debug_assert!(dist as usize <= pos);
                debug_assert!(
                    data[pos - dist as usize..pos - dist as usize + len.min(dist as usize)]
                        == data[pos..pos + len.min(dist as usize)]
                );
                rc.encode_bit(&mut self.probs.is_match[self.state][pos_state], 1);
                rc.encode_bit(&mut self.probs.is_rep[self.state], 0);
                self.probs.len.encode(rc, len, pos_state);

                let dist_val = dist - 1;
                let slot = pos_slot_for(dist_val);
                rc.encode_bit_tree(
                    &mut self.probs.pos_slot[len_to_pos_state(len)],
                    6,
                    slot,
                );
                if slot >= 4 {
                    let direct_bits = (slot >> 1) - 1;
                    let base = (2 | (slot & 1)) << direct_bits;
                    if (slot as usize) < END_POS_MODEL_INDEX {
                        rc.encode_bit_tree_reverse(
                            &mut self.probs.spec_pos[(base - slot) as usize..],
                            direct_bits,
                            dist_val - base,
                        );
                    } else {
                        rc.encode_direct_bits(
                            (dist_val - base) >> NUM_ALIGN_BITS,
                            direct_bits - NUM_ALIGN_BITS,
                        );
                        rc.encode_bit_tree_reverse(
                            &mut self.probs.align,
                            NUM_ALIGN_BITS,
                            dist_val & (crate::model::ALIGN_SIZE as u32 - 1),
                        );
                    }
                }
                rotate_match(&mut self.reps, dist_val);
                self.state = state_after_match(self.state);
            }
        }
    }
}

/// Shift the rep history for a normal match.
#[inline]
fn rotate_match(reps: &mut [u32; 4], dist_val: u32) {
    reps[3] = reps[2];
    reps[2] = reps[1];
    reps[1] = reps[0];
    reps[0] = dist_val;
}

/// Move the selected rep distance to the front.
#[inline]
fn rotate_rep(reps: &mut [u32; 4], idx: usize) {
    match idx {
        0 => {}
        1 => reps.swap(0, 1),
        2 => {
            let d = reps[2];
            reps[2] = reps[1];
            reps[1] = reps[0];
            reps[0] = d;
        }
        _ => {
            let d = reps[3];
            reps[3] = reps[2];
            reps[2] = reps[1];
            reps[1] = reps[0];
            reps[0] = d;
        }
    }
}

/// Common prefix length of `data[a..]` and `data[b..]` (`a < b`), capped
/// at `max_len`. Overlapping extents are allowed.
#[inline]
fn common_len(data: &[u8], a: usize, b: usize, max_len: usize) -> usize {
    let max = max_len.min(data.len() - b);
    let mut len = 0;
    while len < max && data[a + len] == data[b + len] {
        len += 1;
    }
    len
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
