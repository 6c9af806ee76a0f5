//! Compression orchestrator.
//!
//! [`CCtx`] owns the dictionary block buffer, the radix match finder,
//! the worker pool, and one encoder per worker. A frame is produced
//! block by block:
//!
//! 1. The block buffer is filled with the previous block's overlap tail
//!    plus fresh input.
//! 2. The match finder indexes the block — in parallel, each worker
//!    covering a contiguous range of the prefix space.
//! 3. The fresh region is split into per-worker slices on clean
//!    boundaries; every slice encodes its own independently decodable
//!    chunk run against the shared read-only index.
//! 4. Slice outputs are emitted strictly in slice order, followed by
//!    the next block, the terminator, and the optional hash trailer.
//!
//! Output leaves through a caller sink, so one-shot compression, the
//! streaming engine, and the callback API all share this path.

use std::sync::mpsc;
use std::sync::Arc;

use xxhash_rust::xxh64::Xxh64;

use crate::encoder::{ChunkEncoder, EncoderParams, Strategy};
use crate::frame::{compress_bound, dict_prop_byte, CTRL_END, DICT_LOG_MAX, DICT_LOG_MIN};
use crate::model::Props;
use crate::pool::WorkerPool;
use crate::rmf::{RadixMatchFinder, NUM_BUCKETS};
use crate::{Flz2Error, Flz2Result};

/// Highest supported compression level.
pub const MAX_COMPRESSION_LEVEL: u32 = 12;
/// Level used by `CompressOptions::default`.
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;
/// Hard cap on worker threads.
pub const MAX_THREADS: u32 = 200;

/// Slices smaller than this are not worth a worker hand-off.
const MIN_SLICE_BYTES: usize = 1 << 16;

/// Smallest accepted `buffer_log`; smaller per-slice buffers would not
/// hold even a single chunk.
const BUFFER_LOG_MIN: u32 = 10;
const BUFFER_LOG_MAX: u32 = 30;

const SEARCH_DEPTH_MIN: u32 = 6;
const SEARCH_DEPTH_MAX: u32 = 254;
const FAST_LENGTH_MIN: u32 = 6;
const FAST_LENGTH_MAX: u32 = 273;
const CHAIN_LOG_MIN: u32 = 4;
const CHAIN_LOG_MAX: u32 = 16;
const BLOCK_SIZE_LOG_MIN: u32 = 16;
const BLOCK_SIZE_LOG_MAX: u32 = 30;

/// Per-level defaults: dictionary log, chain log, search depth, fast
/// length, strategy.
const LEVEL_PARAMS: [(u32, u32, u32, u32, Strategy); MAX_COMPRESSION_LEVEL as usize] = [
    (20, 7, 32, 32, Strategy::Fast),
    (20, 8, 40, 32, Strategy::Fast),
    (21, 8, 42, 40, Strategy::Fast),
    (22, 9, 48, 48, Strategy::Normal),
    (23, 9, 64, 48, Strategy::Normal),
    (24, 10, 96, 64, Strategy::Normal),
    (25, 10, 128, 64, Strategy::Normal),
    (25, 11, 160, 96, Strategy::Normal),
    (26, 11, 192, 96, Strategy::Normal),
    (26, 12, 224, 128, Strategy::Best),
    (27, 12, 254, 192, Strategy::Best),
    (27, 14, 254, 273, Strategy::Best),
];

/// All tunables, with per-level defaults and validated setters.
#[derive(Debug, Clone)]
pub struct CompressOptions {
    pub compression_level: u32,
    /// Dictionary size as log2, 20..=30.
    pub dict_size_log: u32,
    /// Sixteenths of the dictionary carried between blocks, 0..=15.
    pub overlap_fraction: u32,
    /// Log2 bound on match-chain traversal, 4..=16.
    pub chain_log: u32,
    /// Match-finder chain depth, 6..=254.
    pub search_depth: u32,
    /// Matches at least this long are taken without further search.
    pub fast_length: u32,
    /// Literal context bits (lc), 0..=4.
    pub literal_ctx_bits: u32,
    /// Literal position bits (lp), 0..=4; lc + lp <= 4.
    pub literal_pos_bits: u32,
    /// Position bits (pb), 0..=4.
    pub pos_bits: u32,
    pub strategy: Strategy,
    /// Force the strongest parser regardless of `strategy`.
    pub high_compression: bool,
    /// Recursive chain refinement in the match finder.
    pub divide_and_conquer: bool,
    /// Append an XXH64 trailer and flag it in the frame header.
    pub do_xxhash: bool,
    /// Block size as log2 (16..=30); 0 means one dictionary per block.
    pub block_size_log: u32,
    /// Worker threads; 0 resolves to the available parallelism.
    pub nb_threads: u32,
    /// Log2 of the per-slice output buffer reservation, 10..=30.
    pub buffer_log: u32,
}

impl CompressOptions {
    /// Defaults for a compression level in 1..=12.
    pub fn for_level(level: u32) -> Flz2Result<Self> {
        if level == 0 || level > MAX_COMPRESSION_LEVEL {
            return Err(Flz2Error::ParameterOutOfBound);
        }
        let (dict_size_log, chain_log, search_depth, fast_length, strategy) =
            LEVEL_PARAMS[(level - 1) as usize];
        Ok(CompressOptions {
            compression_level: level,
            dict_size_log,
            overlap_fraction: 2,
            chain_log,
            search_depth,
            fast_length,
            literal_ctx_bits: 3,
            literal_pos_bits: 0,
            pos_bits: 2,
            strategy,
            high_compression: false,
            divide_and_conquer: false,
            do_xxhash: false,
            block_size_log: 0,
            nb_threads: 0,
            buffer_log: 16,
        })
    }

    pub fn set_dict_size_log(&mut self, log: u32) -> Flz2Result<&mut Self> {
        if !(DICT_LOG_MIN..=DICT_LOG_MAX).contains(&log) {
            return Err(Flz2Error::ParameterOutOfBound);
        }
        self.dict_size_log = log;
        Ok(self)
    }

    pub fn set_overlap_fraction(&mut self, fraction: u32) -> Flz2Result<&mut Self> {
        if fraction > 15 {
            return Err(Flz2Error::ParameterOutOfBound);
        }
        self.overlap_fraction = fraction;
        Ok(self)
    }

    pub fn set_search_depth(&mut self, depth: u32) -> Flz2Result<&mut Self> {
        if !(SEARCH_DEPTH_MIN..=SEARCH_DEPTH_MAX).contains(&depth) {
            return Err(Flz2Error::ParameterOutOfBound);
        }
        self.search_depth = depth;
        Ok(self)
    }

    pub fn set_literal_bits(&mut self, lc: u32, lp: u32, pb: u32) -> Flz2Result<&mut Self> {
        Props::new(lc, lp, pb)?;
        self.literal_ctx_bits = lc;
        self.literal_pos_bits = lp;
        self.pos_bits = pb;
        Ok(self)
    }

    pub fn set_block_size_log(&mut self, log: u32) -> Flz2Result<&mut Self> {
        if log != 0 && !(BLOCK_SIZE_LOG_MIN..=BLOCK_SIZE_LOG_MAX).contains(&log) {
            return Err(Flz2Error::ParameterOutOfBound);
        }
        self.block_size_log = log;
        Ok(self)
    }

    pub fn set_nb_threads(&mut self, threads: u32) -> Flz2Result<&mut Self> {
        if threads > MAX_THREADS {
            return Err(Flz2Error::ParameterOutOfBound);
        }
        self.nb_threads = threads;
        Ok(self)
    }

    pub fn set_buffer_log(&mut self, log: u32) -> Flz2Result<&mut Self> {
        if !(BUFFER_LOG_MIN..=BUFFER_LOG_MAX).contains(&log) {
            return Err(Flz2Error::ParameterOutOfBound);
        }
        self.buffer_log = log;
        Ok(self)
    }

    /// Check every field, not just the ones set through setters.
    pub fn validate(&self) -> Flz2Result<()> {
        if !(DICT_LOG_MIN..=DICT_LOG_MAX).contains(&self.dict_size_log)
            || self.overlap_fraction > 15
            || !(CHAIN_LOG_MIN..=CHAIN_LOG_MAX).contains(&self.chain_log)
            || !(SEARCH_DEPTH_MIN..=SEARCH_DEPTH_MAX).contains(&self.search_depth)
            || !(FAST_LENGTH_MIN..=FAST_LENGTH_MAX).contains(&self.fast_length)
            || !(BUFFER_LOG_MIN..=BUFFER_LOG_MAX).contains(&self.buffer_log)
            || self.nb_threads > MAX_THREADS
        {
            return Err(Flz2Error::ParameterOutOfBound);
        }
        if self.block_size_log != 0
            && !(BLOCK_SIZE_LOG_MIN..=BLOCK_SIZE_LOG_MAX).contains(&self.block_size_log)
        {
            return Err(Flz2Error::ParameterOutOfBound);
        }
        Props::new(self.literal_ctx_bits, self.literal_pos_bits, self.pos_bits)?;
        Ok(())
    }

    pub fn dict_size(&self) -> usize {
        1 << self.dict_size_log
    }

    /// Bytes of the previous block retained as match context.
    pub fn overlap_size(&self) -> usize {
        (self.dict_size() >> 4) * self.overlap_fraction as usize
    }

    /// Fresh bytes per block.
    pub fn block_payload(&self) -> usize {
        let dict = self.dict_size();
        if self.block_size_log == 0 {
            dict
        } else {
            dict.min(1 << self.block_size_log)
        }
    }

    fn props(&self) -> Props {
        Props {
            lc: self.literal_ctx_bits,
            lp: self.literal_pos_bits,
            pb: self.pos_bits,
        }
    }

    fn encoder_params(&self) -> EncoderParams {
        let strategy = if self.high_compression {
            Strategy::Best
        } else {
            self.strategy
        };
        let optimal_window = if self.high_compression || strategy == Strategy::Best {
            273
        } else {
            match self.compression_level {
                0..=5 => 32,
                6..=7 => 64,
                _ => 128,
            }
        };
        EncoderParams {
            props: self.props(),
            strategy,
            fast_length: self.fast_length,
            optimal_window,
        }
    }

    fn effective_search_depth(&self) -> u32 {
        self.search_depth.min(1 << self.chain_log)
    }
}

impl Default for CompressOptions {
    fn default() -> Self {
        CompressOptions::for_level(DEFAULT_COMPRESSION_LEVEL).unwrap()
    }
}

/// Resolve a thread-count option: 0 means all available cores.
pub(crate) fn resolve_thread_count(threads: u32) -> usize {
    if threads == 0 {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    } else {
        threads as usize
    }
}

/// Output sink invoked with each frame segment, in order.
pub type Sink<'a> = dyn FnMut(&[u8]) -> Flz2Result<()> + 'a;

// ---------------------------------------------------------------------------
// Compression context
// ---------------------------------------------------------------------------

/// Reusable compression context: dictionary buffer, match finder,
/// worker pool, and per-worker encoder state.
///
/// Not re-entrant; one frame at a time. After an error the context
/// fails fast with `StageWrong` until `reset` is called.
pub struct CCtx {
    options: CompressOptions,
    pool: Option<WorkerPool>,
    encoders: Vec<Option<ChunkEncoder>>,
    rmf: Option<Arc<RadixMatchFinder>>,
    block: Arc<Vec<u8>>,
    carry: Vec<u8>,
    prev_byte: u8,
    frame_pos: u64,
    frame_open: bool,
    hasher: Option<Xxh64>,
    errored: bool,
}

impl CCtx {
    pub fn new() -> Self {
        Self::with_options(CompressOptions::default())
    }

    pub fn with_level(level: u32) -> Flz2Result<Self> {
        Ok(Self::with_options(CompressOptions::for_level(level)?))
    }

    pub fn with_options(options: CompressOptions) -> Self {
        CCtx {
            options,
            pool: None,
            encoders: Vec::new(),
            rmf: None,
            block: Arc::new(Vec::new()),
            carry: Vec::new(),
            prev_byte: 0,
            frame_pos: 0,
            frame_open: false,
            hasher: None,
            errored: false,
        }
    }

    pub fn options(&self) -> &CompressOptions {
        &self.options
    }

    /// Replace the configuration. Takes effect at the next frame.
    pub fn set_options(&mut self, options: CompressOptions) -> Flz2Result<()> {
        options.validate()?;
        self.options = options;
        Ok(())
    }

    /// Clear an error condition and any half-built frame.
    pub fn reset(&mut self) {
        self.errored = false;
        self.frame_open = false;
        self.carry.clear();
        self.prev_byte = 0;
        self.frame_pos = 0;
        self.hasher = None;
    }

    /// Worst-case frame size for `src_size` input bytes.
    pub fn compress_bound(&self, src_size: usize) -> usize {
        compress_bound(src_size)
    }

    fn guard(&self) -> Flz2Result<()> {
        if self.errored {
            return Err(Flz2Error::StageWrong);
        }
        Ok(())
    }

    fn fail<T>(&mut self, err: Flz2Error) -> Flz2Result<T> {
        self.errored = true;
        Err(err)
    }

    // -----------------------------------------------------------------
    // One-shot API
    // -----------------------------------------------------------------

    /// Compress `src` into a single frame.
    pub fn compress(&mut self, src: &[u8]) -> Flz2Result<Vec<u8>> {
        self.guard()?;
        let mut out = Vec::with_capacity(compress_bound(src.len()).min(1 << 24));
        let result = self.compress_to_sink(src, &mut |bytes| {
            out.extend_from_slice(bytes);
            Ok(())
        });
        match result {
            Ok(()) => Ok(out),
            Err(e) => self.fail(e),
        }
    }

    /// Compress into a caller buffer; fails with `DstSizeTooSmall`
    /// without corrupting bytes past what was written.
    pub fn compress_into(&mut self, src: &[u8], dst: &mut [u8]) -> Flz2Result<usize> {
        let frame = self.compress(src)?;
        if frame.len() > dst.len() {
            return Err(Flz2Error::DstSizeTooSmall);
        }
        dst[..frame.len()].copy_from_slice(&frame);
        Ok(frame.len())
    }

    fn compress_to_sink(&mut self, src: &[u8], sink: &mut Sink<'_>) -> Flz2Result<()> {
        self.begin_frame(sink)?;
        let payload = self.options.block_payload();
        for block in src.chunks(payload) {
            self.compress_block(block, sink)?;
        }
        self.end_frame(sink)
    }

    // -----------------------------------------------------------------
    // Frame lifecycle (also the callback-mode API)
    // -----------------------------------------------------------------

    /// Open a frame: validate options, size the match finder, spin up
    /// the pool, and emit the frame properties byte.
    pub fn begin_frame(&mut self, sink: &mut Sink<'_>) -> Flz2Result<()> {
        self.guard()?;
        if self.frame_open {
            return self.fail(Flz2Error::StageWrong);
        }
        self.options.validate()?;

        let threads = resolve_thread_count(self.options.nb_threads).min(MAX_THREADS as usize);
        if threads > 1 {
            let recreate = self
                .pool
                .as_ref()
                .map_or(true, |p| p.thread_count() != threads);
            if recreate {
                self.pool = Some(WorkerPool::new(threads, threads * 2));
            }
        } else {
            self.pool = None;
        }
        self.encoders.resize_with(threads.max(1), || None);

        // Match-finder parameters are latched per frame; option changes
        // between frames take effect here.
        self.rmf = Some(Arc::new(RadixMatchFinder::new(
            self.options.dict_size() as u32,
            self.options.effective_search_depth(),
            self.options.divide_and_conquer,
        )));

        self.hasher = self.options.do_xxhash.then(|| Xxh64::new(0));
        self.carry.clear();
        self.prev_byte = 0;
        self.frame_pos = 0;
        self.frame_open = true;

        sink(&[dict_prop_byte(
            self.options.dict_size_log,
            self.options.do_xxhash,
        )])
    }

    /// Compress one block of fresh input, emitting its chunk run.
    ///
    /// This is the callback-mode entry point: each output segment goes
    /// straight to `sink` with no intermediate pending buffer.
    pub fn compress_block(&mut self, fresh: &[u8], sink: &mut Sink<'_>) -> Flz2Result<()> {
        self.guard()?;
        if !self.frame_open {
            return self.fail(Flz2Error::InitMissing);
        }
        if fresh.is_empty() {
            return Ok(());
        }
        if fresh.len() > self.options.block_payload() {
            return self.fail(Flz2Error::SrcSizeWrong);
        }
        match self.compress_block_inner(fresh, sink) {
            Ok(()) => Ok(()),
            Err(e) => self.fail(e),
        }
    }

    fn compress_block_inner(&mut self, fresh: &[u8], sink: &mut Sink<'_>) -> Flz2Result<()> {
        // Assemble [overlap | fresh] in the block buffer.
        let carry_len = self.carry.len();
        {
            let buf = Arc::get_mut(&mut self.block).ok_or(Flz2Error::Generic)?;
            buf.clear();
            buf.extend_from_slice(&self.carry);
            buf.extend_from_slice(fresh);
        }
        // Index the block: exclusive access for the resize, shared for
        // the build itself.
        {
            let rmf_arc = self.rmf.as_mut().ok_or(Flz2Error::InitMissing)?;
            let finder = Arc::get_mut(rmf_arc).ok_or(Flz2Error::Generic)?;
            finder.prepare(self.block.len());
        }
        let rmf = self.rmf.clone().ok_or(Flz2Error::InitMissing)?;
        let build_jobs = match &self.pool {
            Some(pool) => pool.thread_count(),
            None => 1,
        };
        if build_jobs > 1 {
            let pool = self.pool.as_ref().ok_or(Flz2Error::Generic)?;
            let per = NUM_BUCKETS.div_ceil(build_jobs);
            for j in 0..build_jobs {
                let lo = j * per;
                let hi = ((j + 1) * per).min(NUM_BUCKETS);
                if lo >= hi {
                    continue;
                }
                let rmf = Arc::clone(&rmf);
                let block = Arc::clone(&self.block);
                pool.submit(move || rmf.build_range(&block, lo, hi));
            }
            pool.wait_all();
        } else {
            rmf.build_range(&self.block, 0, NUM_BUCKETS);
        }

        // Split the fresh region into worker slices.
        let fresh_len = fresh.len();
        let max_workers = self.encoders.len();
        let nslices = (fresh_len / MIN_SLICE_BYTES).clamp(1, max_workers);
        let params = self.options.encoder_params();
        let pos_delta = self.frame_pos - carry_len as u64;
        let prev_hint = self.prev_byte;
        let buffer_cap = 1usize << self.options.buffer_log;

        if nslices <= 1 || self.pool.is_none() {
            let mut enc = self.encoders[0]
                .take()
                .unwrap_or_else(|| ChunkEncoder::new(params.props));
            let mut out = Vec::with_capacity(buffer_cap.min(fresh_len * 2 + 64));
            enc.encode_slice(
                &self.block,
                carry_len,
                carry_len + fresh_len,
                pos_delta,
                prev_hint,
                &rmf,
                &params,
                self.frame_pos == 0,
                &mut out,
            );
            self.encoders[0] = Some(enc);
            sink(&out)?;
        } else {
            let pool = self.pool.as_ref().ok_or(Flz2Error::Generic)?;
            let (tx, rx) = mpsc::channel::<(usize, ChunkEncoder, Vec<u8>)>();
            let per = fresh_len.div_ceil(nslices);
            for i in 0..nslices {
                let start = carry_len + i * per;
                let end = (carry_len + (i + 1) * per).min(carry_len + fresh_len);
                let mut enc = self.encoders[i]
                    .take()
                    .unwrap_or_else(|| ChunkEncoder::new(params.props));
                let block = Arc::clone(&self.block);
                let rmf = Arc::clone(&rmf);
                let tx = tx.clone();
                let first = self.frame_pos == 0 && i == 0;
                pool.submit(move || {
                    let mut out = Vec::with_capacity(buffer_cap);
                    enc.encode_slice(
                        &block, start, end, pos_delta, prev_hint, &rmf, &params, first,
                        &mut out,
                    );
                    let _ = tx.send((i, enc, out));
                });
            }
            pool.wait_all();
            drop(tx);

            let mut outputs: Vec<Option<(ChunkEncoder, Vec<u8>)>> =
                (0..nslices).map(|_| None).collect();
            for (idx, enc, out) in rx {
                outputs[idx] = Some((enc, out));
            }
            // Emit strictly in slice order.
            for (idx, slot) in outputs.into_iter().enumerate() {
                let (enc, out) = slot.ok_or(Flz2Error::Generic)?;
                self.encoders[idx] = Some(enc);
                sink(&out)?;
            }
        }

        if let Some(hasher) = &mut self.hasher {
            hasher.update(fresh);
        }
        self.frame_pos += fresh_len as u64;

        // Retain the block tail as context for the next block.
        let overlap = self.options.overlap_size().min(self.block.len());
        self.carry.clear();
        self.carry
            .extend_from_slice(&self.block[self.block.len() - overlap..]);
        if overlap == 0 {
            if let Some(&last) = self.block.last() {
                self.prev_byte = last;
            }
        }
        Ok(())
    }

    /// Close the frame: terminator plus the optional hash trailer.
    pub fn end_frame(&mut self, sink: &mut Sink<'_>) -> Flz2Result<()> {
        self.guard()?;
        if !self.frame_open {
            return self.fail(Flz2Error::InitMissing);
        }
        sink(&[CTRL_END])?;
        if let Some(hasher) = self.hasher.take() {
            sink(&hasher.digest().to_le_bytes())?;
        }
        self.frame_open = false;
        self.carry.clear();
        self.prev_byte = 0;
        self.frame_pos = 0;
        Ok(())
    }
}

impl Default for CCtx {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
