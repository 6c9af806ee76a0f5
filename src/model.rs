//! LZMA probability model, coding-state machine, and price tables.
//!
//! Everything the encoder and decoder must agree on lives here: the
//! context table layout, the 12-state operation history, literal coding
//! (plain and matched), the length coder, and distance-slot coding.
//! The encoder additionally uses the fixed-point price tables at the
//! bottom of this module to steer its parse; the decoder never touches
//! them.

use crate::rangecoder::{RangeDecoder, RangeEncoder, BIT_MODEL_TOTAL, BIT_MODEL_TOTAL_BITS, PROB_INIT};
use crate::{Flz2Error, Flz2Result};

/// Number of coding states (recent-operation history classes).
pub const NUM_STATES: usize = 12;
/// Maximum number of position states (2^pb with pb <= 4).
pub const MAX_POS_STATES: usize = 16;

/// Minimum encodable match length.
pub const MATCH_LEN_MIN: usize = 2;
/// Maximum encodable match length.
pub const MATCH_LEN_MAX: usize = 273;
/// Number of length symbols (lengths 2..=273).
pub const NUM_LEN_SYMBOLS: usize = MATCH_LEN_MAX - MATCH_LEN_MIN + 1;

/// Number of distance slots (6-bit slot tree).
pub const NUM_POS_SLOTS: usize = 64;
/// Length classes used to select a distance-slot context.
pub const NUM_LEN_TO_POS_STATES: usize = 4;
/// Distance slots below this use the modeled reverse tree; above it,
/// direct bits plus the align tree.
pub const END_POS_MODEL_INDEX: usize = 14;
/// Distances below this are fully modeled.
pub const NUM_FULL_DISTANCES: usize = 1 << (END_POS_MODEL_INDEX >> 1);
/// Cells in the modeled mid-range distance table.
pub const NUM_SPEC_POS: usize = NUM_FULL_DISTANCES - END_POS_MODEL_INDEX + 1;
/// Bits in the low-distance align tree.
pub const NUM_ALIGN_BITS: u32 = 4;
/// Size of the align tree.
pub const ALIGN_SIZE: usize = 1 << NUM_ALIGN_BITS;

/// The encoder refreshes cached price tables after this many operations.
pub const PRICE_REFRESH_INTERVAL: u32 = 4096;

// ---------------------------------------------------------------------------
// Coding state transitions
// ---------------------------------------------------------------------------

/// States 0..=6 mean the previous operation was a literal.
#[inline]
pub fn state_is_literal(state: usize) -> bool {
    state < 7
}

#[inline]
pub fn state_after_literal(state: usize) -> usize {
    if state < 4 {
        0
    } else if state < 10 {
        state - 3
    } else {
        state - 6
    }
}

#[inline]
pub fn state_after_match(state: usize) -> usize {
    if state < 7 {
        7
    } else {
        10
    }
}

#[inline]
pub fn state_after_rep(state: usize) -> usize {
    if state < 7 {
        8
    } else {
        11
    }
}

#[inline]
pub fn state_after_short_rep(state: usize) -> usize {
    if state < 7 {
        9
    } else {
        11
    }
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

/// Literal-context / literal-position / position bits, packed into the
/// single properties byte carried by dictionary-reset chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Props {
    pub lc: u32,
    pub lp: u32,
    pub pb: u32,
}

impl Props {
    pub fn new(lc: u32, lp: u32, pb: u32) -> Flz2Result<Self> {
        if lc > 4 || lp > 4 || pb > 4 {
            return Err(Flz2Error::ParameterOutOfBound);
        }
        if lc + lp > 4 {
            return Err(Flz2Error::LclpMaxExceeded);
        }
        Ok(Props { lc, lp, pb })
    }

    /// Encode as `(pb*5 + lp)*9 + lc`.
    pub fn to_byte(self) -> u8 {
        ((self.pb * 5 + self.lp) * 9 + self.lc) as u8
    }

    pub fn from_byte(byte: u8) -> Flz2Result<Self> {
        let v = byte as u32;
        if v >= 225 {
            return Err(Flz2Error::CorruptionDetected);
        }
        let lc = v % 9;
        let lp = (v / 9) % 5;
        let pb = v / 45;
        Props::new(lc, lp, pb).map_err(|_| Flz2Error::CorruptionDetected)
    }

    #[inline]
    pub fn pb_mask(self) -> usize {
        (1 << self.pb) - 1
    }

    #[inline]
    pub fn lp_mask(self) -> usize {
        (1 << self.lp) - 1
    }

    /// Index of the literal coder context for a frame position and the
    /// byte preceding it.
    #[inline]
    pub fn literal_context(self, position: u64, prev_byte: u8) -> usize {
        ((position as usize & self.lp_mask()) << self.lc)
            + (prev_byte as u32 >> (8 - self.lc)) as usize
    }
}

impl Default for Props {
    fn default() -> Self {
        Props { lc: 3, lp: 0, pb: 2 }
    }
}

// ---------------------------------------------------------------------------
// Length coder
// ---------------------------------------------------------------------------

/// Coder for match lengths 2..=273: a two-level choice plus three trees
/// (3-bit low/mid per position state, shared 8-bit high).
#[derive(Clone)]
pub struct LenCoder {
    pub choice: u16,
    pub choice2: u16,
    pub low: [[u16; 8]; MAX_POS_STATES],
    pub mid: [[u16; 8]; MAX_POS_STATES],
    pub high: [u16; 256],
}

impl LenCoder {
    pub fn new() -> Self {
        LenCoder {
            choice: PROB_INIT,
            choice2: PROB_INIT,
            low: [[PROB_INIT; 8]; MAX_POS_STATES],
            mid: [[PROB_INIT; 8]; MAX_POS_STATES],
            high: [PROB_INIT; 256],
        }
    }

    pub fn encode(&mut self, rc: &mut RangeEncoder, len: usize, pos_state: usize) {
        debug_assert!((MATCH_LEN_MIN..=MATCH_LEN_MAX).contains(&len));
        let sym = (len - MATCH_LEN_MIN) as u32;
        if sym < 8 {
            rc.encode_bit(&mut self.choice, 0);
            rc.encode_bit_tree(&mut self.low[pos_state], 3, sym);
        } else if sym < 16 {
            rc.encode_bit(&mut self.choice, 1);
            rc.encode_bit(&mut self.choice2, 0);
            rc.encode_bit_tree(&mut self.mid[pos_state], 3, sym - 8);
        } else {
            rc.encode_bit(&mut self.choice, 1);
            rc.encode_bit(&mut self.choice2, 1);
            rc.encode_bit_tree(&mut self.high, 8, sym - 16);
        }
    }

    pub fn decode(&mut self, rc: &mut RangeDecoder<'_>, pos_state: usize) -> Flz2Result<usize> {
        let sym = if rc.decode_bit(&mut self.choice)? == 0 {
            rc.decode_bit_tree(&mut self.low[pos_state], 3)?
        } else if rc.decode_bit(&mut self.choice2)? == 0 {
            8 + rc.decode_bit_tree(&mut self.mid[pos_state], 3)?
        } else {
            16 + rc.decode_bit_tree(&mut self.high, 8)?
        };
        Ok(MATCH_LEN_MIN + sym as usize)
    }
}

impl Default for LenCoder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Probability tables
// ---------------------------------------------------------------------------

/// All adaptive contexts for one encoder or decoder instance.
///
/// Counters initialize to the neutral probability and adapt by shift;
/// `reset` restores them between frames or on a state-reset chunk.
pub struct Probs {
    pub is_match: [[u16; MAX_POS_STATES]; NUM_STATES],
    pub is_rep: [u16; NUM_STATES],
    pub is_rep_g0: [u16; NUM_STATES],
    pub is_rep_g1: [u16; NUM_STATES],
    pub is_rep_g2: [u16; NUM_STATES],
    pub is_rep0_long: [[u16; MAX_POS_STATES]; NUM_STATES],
    pub pos_slot: [[u16; NUM_POS_SLOTS]; NUM_LEN_TO_POS_STATES],
    pub spec_pos: [u16; NUM_SPEC_POS],
    pub align: [u16; ALIGN_SIZE],
    pub len: LenCoder,
    pub rep_len: LenCoder,
    /// `0x300 << (lc + lp)` literal counters.
    pub literal: Vec<u16>,
    props: Props,
}

impl Probs {
    pub fn new(props: Props) -> Self {
        Probs {
            is_match: [[PROB_INIT; MAX_POS_STATES]; NUM_STATES],
            is_rep: [PROB_INIT; NUM_STATES],
            is_rep_g0: [PROB_INIT; NUM_STATES],
            is_rep_g1: [PROB_INIT; NUM_STATES],
            is_rep_g2: [PROB_INIT; NUM_STATES],
            is_rep0_long: [[PROB_INIT; MAX_POS_STATES]; NUM_STATES],
            pos_slot: [[PROB_INIT; NUM_POS_SLOTS]; NUM_LEN_TO_POS_STATES],
            spec_pos: [PROB_INIT; NUM_SPEC_POS],
            align: [PROB_INIT; ALIGN_SIZE],
            len: LenCoder::new(),
            rep_len: LenCoder::new(),
            literal: vec![PROB_INIT; 0x300 << (props.lc + props.lp)],
            props,
        }
    }

    /// Reset every counter to neutral, resizing the literal table when
    /// the properties changed.
    pub fn reset(&mut self, props: Props) {
        let wanted = 0x300 << (props.lc + props.lp);
        if self.literal.len() != wanted {
            self.literal = vec![PROB_INIT; wanted];
        } else {
            self.literal.fill(PROB_INIT);
        }
        self.props = props;
        self.is_match = [[PROB_INIT; MAX_POS_STATES]; NUM_STATES];
        self.is_rep = [PROB_INIT; NUM_STATES];
        self.is_rep_g0 = [PROB_INIT; NUM_STATES];
        self.is_rep_g1 = [PROB_INIT; NUM_STATES];
        self.is_rep_g2 = [PROB_INIT; NUM_STATES];
        self.is_rep0_long = [[PROB_INIT; MAX_POS_STATES]; NUM_STATES];
        self.pos_slot = [[PROB_INIT; NUM_POS_SLOTS]; NUM_LEN_TO_POS_STATES];
        self.spec_pos = [PROB_INIT; NUM_SPEC_POS];
        self.align = [PROB_INIT; ALIGN_SIZE];
        self.len = LenCoder::new();
        self.rep_len = LenCoder::new();
    }

    #[inline]
    pub fn props(&self) -> Props {
        self.props
    }

    /// Encode one literal. `match_byte` carries the dictionary byte at
    /// the most recent distance when the previous operation was a match
    /// (matched-literal coding).
    pub fn encode_literal(
        &mut self,
        rc: &mut RangeEncoder,
        position: u64,
        prev_byte: u8,
        symbol: u8,
        match_byte: Option<u8>,
    ) {
        let base = 0x300 * self.props.literal_context(position, prev_byte);
        let probs = &mut self.literal[base..base + 0x300];
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
                        rc.encode_bit(
                            &mut probs[(((1 + match_bit) << 8) + node) as usize],
                            bit,
                        );
                        matched = match_bit == bit;
                    } else {
                        rc.encode_bit(&mut probs[node as usize], bit);
                    }
                    node = (node << 1) | bit;
                }
            }
            None => {
                for i in (0..8).rev() {
                    let bit = ((symbol >> i) & 1) as u32;
                    rc.encode_bit(&mut probs[node as usize], bit);
                    node = (node << 1) | bit;
                }
            }
        }
    }

    /// Decode one literal; the mirror of `encode_literal`.
    pub fn decode_literal(
        &mut self,
        rc: &mut RangeDecoder<'_>,
        position: u64,
        prev_byte: u8,
        match_byte: Option<u8>,
    ) -> Flz2Result<u8> {
        let base = 0x300 * self.props.literal_context(position, prev_byte);
        let probs = &mut self.literal[base..base + 0x300];
        let mut node = 1u32;
        if let Some(mb) = match_byte {
            let mut mb = mb as u32;
            while node < 0x100 {
                let match_bit = (mb >> 7) & 1;
                mb <<= 1;
                let bit = rc.decode_bit(&mut probs[(((1 + match_bit) << 8) + node) as usize])?;
                node = (node << 1) | bit;
                if match_bit != bit {
                    break;
                }
            }
        }
        while node < 0x100 {
            node = (node << 1) | rc.decode_bit(&mut probs[node as usize])?;
        }
        Ok((node & 0xFF) as u8)
    }
}

/// Distance-slot context class for a match length.
#[inline]
pub fn len_to_pos_state(len: usize) -> usize {
    (len - MATCH_LEN_MIN).min(NUM_LEN_TO_POS_STATES - 1)
}

/// Slot number for an encoded distance value (`distance - 1`).
#[inline]
pub fn pos_slot_for(dist: u32) -> u32 {
    if dist < 4 {
        dist
    } else {
        let top = 31 - dist.leading_zeros();
        (top << 1) + ((dist >> (top - 1)) & 1)
    }
}

// ---------------------------------------------------------------------------
// Price tables
// ---------------------------------------------------------------------------

const NUM_MOVE_REDUCING_BITS: u32 = 4;
/// Fractional price resolution: one bit costs `1 << PRICE_SHIFT`.
pub const PRICE_SHIFT: u32 = 4;

const fn build_prob_prices() -> [u32; (BIT_MODEL_TOTAL >> NUM_MOVE_REDUCING_BITS) as usize] {
    let mut table = [0u32; (BIT_MODEL_TOTAL >> NUM_MOVE_REDUCING_BITS) as usize];
    let mut i: u32 = (1 << NUM_MOVE_REDUCING_BITS) / 2;
    while i < BIT_MODEL_TOTAL {
        // Iterated squaring approximates -log2(i / 2048) in 1/16-bit units.
        let mut w = i;
        let mut bit_count = 0u32;
        let mut j = 0;
        while j < PRICE_SHIFT {
            w = w * w;
            bit_count <<= 1;
            while w >= (1 << 16) {
                w >>= 1;
                bit_count += 1;
            }
            j += 1;
        }
        table[(i >> NUM_MOVE_REDUCING_BITS) as usize] =
            (BIT_MODEL_TOTAL_BITS << PRICE_SHIFT) - 15 - bit_count;
        i += 1 << NUM_MOVE_REDUCING_BITS;
    }
    table
}

/// Scaled `-log2` price of coding an event whose probability counter
/// bucket is the index.
pub static PROB_PRICES: [u32; (BIT_MODEL_TOTAL >> NUM_MOVE_REDUCING_BITS) as usize] =
    build_prob_prices();

/// Price of coding `bit` against `prob`, in 1/16-bit units.
#[inline]
pub fn bit_price(prob: u16, bit: u32) -> u32 {
    let idx = (prob as u32 ^ (0u32.wrapping_sub(bit) & (BIT_MODEL_TOTAL - 1)))
        >> NUM_MOVE_REDUCING_BITS;
    PROB_PRICES[idx as usize]
}

#[inline]
pub fn bit_price_0(prob: u16) -> u32 {
    PROB_PRICES[(prob >> NUM_MOVE_REDUCING_BITS) as usize]
}

#[inline]
pub fn bit_price_1(prob: u16) -> u32 {
    PROB_PRICES[((prob as u32 ^ (BIT_MODEL_TOTAL - 1)) >> NUM_MOVE_REDUCING_BITS) as usize]
}

/// Price of `num_bits` equiprobable bits.
#[inline]
pub fn direct_price(num_bits: u32) -> u32 {
    num_bits << PRICE_SHIFT
}

/// Price of coding `symbol` through a bit tree.
pub fn tree_price(probs: &[u16], num_bits: u32, symbol: u32) -> u32 {
    let mut m = 1usize;
    let mut price = 0u32;
    for i in (0..num_bits).rev() {
        let bit = (symbol >> i) & 1;
        price += bit_price(probs[m], bit);
        m = (m << 1) | bit as usize;
    }
    price
}

/// Price of coding `symbol` through a reverse bit tree.
pub fn reverse_tree_price(probs: &[u16], num_bits: u32, symbol: u32) -> u32 {
    let mut m = 1usize;
    let mut price = 0u32;
    for i in 0..num_bits {
        let bit = (symbol >> i) & 1;
        price += bit_price(probs[m], bit);
        m = (m << 1) | bit as usize;
    }
    price
}

/// Cached per-symbol length prices, refreshed from a `LenCoder` every
/// `PRICE_REFRESH_INTERVAL` operations.
#[derive(Clone)]
pub struct LenPrices {
    prices: Vec<[u32; NUM_LEN_SYMBOLS]>,
}

impl LenPrices {
    pub fn new() -> Self {
        LenPrices {
            prices: vec![[0; NUM_LEN_SYMBOLS]; MAX_POS_STATES],
        }
    }

    pub fn refresh(&mut self, coder: &LenCoder, num_pos_states: usize) {
        let choice0 = bit_price_0(coder.choice);
        let choice1 = bit_price_1(coder.choice);
        let choice2_0 = bit_price_0(coder.choice2);
        let choice2_1 = bit_price_1(coder.choice2);
        for ps in 0..num_pos_states {
            let row = &mut self.prices[ps];
            for sym in 0..8 {
                row[sym] = choice0 + tree_price(&coder.low[ps], 3, sym as u32);
            }
            for sym in 8..16 {
                row[sym] = choice1 + choice2_0 + tree_price(&coder.mid[ps], 3, (sym - 8) as u32);
            }
            for sym in 16..NUM_LEN_SYMBOLS {
                row[sym] = choice1 + choice2_1 + tree_price(&coder.high, 8, (sym - 16) as u32);
            }
        }
    }

    #[inline]
    pub fn price(&self, len: usize, pos_state: usize) -> u32 {
        self.prices[pos_state][len - MATCH_LEN_MIN]
    }
}

impl Default for LenPrices {
    fn default() -> Self {
        Self::new()
    }
}

/// Cached distance-slot and align prices.
#[derive(Clone)]
pub struct DistPrices {
    slot: [[u32; NUM_POS_SLOTS]; NUM_LEN_TO_POS_STATES],
    align: [u32; ALIGN_SIZE],
}

impl DistPrices {
    pub fn new() -> Self {
        DistPrices {
            slot: [[0; NUM_POS_SLOTS]; NUM_LEN_TO_POS_STATES],
            align: [0; ALIGN_SIZE],
        }
    }

    pub fn refresh(&mut self, probs: &Probs) {
        for ls in 0..NUM_LEN_TO_POS_STATES {
            for s in 0..NUM_POS_SLOTS {
                self.slot[ls][s] = tree_price(&probs.pos_slot[ls], 6, s as u32);
            }
        }
        for a in 0..ALIGN_SIZE {
            self.align[a] = reverse_tree_price(&probs.align, NUM_ALIGN_BITS, a as u32);
        }
    }

    /// Price of a full distance value (`distance - 1`) for a match of
    /// the given length.
    pub fn dist_price(&self, probs: &Probs, dist: u32, len: usize) -> u32 {
        let ls = len_to_pos_state(len);
        let slot = pos_slot_for(dist);
        let mut price = self.slot[ls][slot as usize];
        if slot >= 4 {
            let direct_bits = (slot >> 1) - 1;
            let base = (2 | (slot & 1)) << direct_bits;
            if (slot as usize) < END_POS_MODEL_INDEX {
                price += reverse_tree_price(
                    &probs.spec_pos[(base - slot) as usize..],
                    direct_bits,
                    dist - base,
                );
            } else {
                price += direct_price(direct_bits - NUM_ALIGN_BITS);
                price += self.align[(dist & (ALIGN_SIZE as u32 - 1)) as usize];
            }
        }
        price
    }
}

impl Default for DistPrices {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
