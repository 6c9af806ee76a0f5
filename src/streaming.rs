//! Push/pull streaming compression and decompression.
//!
//! Both directions are cursor-driven: the caller hands in an
//! [`InBuffer`] and [`OutBuffer`] and advances `pos` past whatever was
//! consumed or produced between calls. The engine never writes past a
//! buffer end and never blocks at the API boundary — when input runs
//! dry or output fills, it returns with all state preserved.
//!
//! Compression accumulates fresh input into the current block buffer;
//! a full block (or a flush) runs the block pipeline and parks the
//! produced frame bytes in an internal pending queue, which must drain
//! into caller buffers before new input is accepted. `end` emits the
//! terminator and optional hash trailer, returning the number of bytes
//! still pending — the frame is complete only once it returns zero.

use crate::decoder::Lzma2Decoder;
use crate::pipeline::{CCtx, CompressOptions};
use crate::{Flz2Error, Flz2Result};

/// Caller-supplied input cursor.
#[derive(Debug)]
pub struct InBuffer<'a> {
    pub src: &'a [u8],
    pub pos: usize,
}

impl<'a> InBuffer<'a> {
    pub fn new(src: &'a [u8]) -> Self {
        InBuffer { src, pos: 0 }
    }

    #[inline]
    fn remaining(&self) -> &'a [u8] {
        &self.src[self.pos..]
    }
}

/// Caller-supplied output cursor.
#[derive(Debug)]
pub struct OutBuffer<'a> {
    pub dst: &'a mut [u8],
    pub pos: usize,
}

impl<'a> OutBuffer<'a> {
    pub fn new(dst: &'a mut [u8]) -> Self {
        OutBuffer { dst, pos: 0 }
    }

    #[inline]
    fn space(&self) -> usize {
        self.dst.len() - self.pos
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CStage {
    /// No frame underway; the next `compress` opens one.
    Idle,
    /// Frame open, accepting input.
    Running,
    /// Terminator emitted, pending bytes still draining.
    Ended,
}

/// Streaming compressor.
pub struct CompressStream {
    cctx: CCtx,
    block: Vec<u8>,
    pending: Vec<u8>,
    pending_pos: usize,
    stage: CStage,
}

impl CompressStream {
    /// Create a stream with per-level default options.
    pub fn new(level: u32) -> Flz2Result<Self> {
        Ok(CompressStream {
            cctx: CCtx::with_level(level)?,
            block: Vec::new(),
            pending: Vec::new(),
            pending_pos: 0,
            stage: CStage::Idle,
        })
    }

    pub fn with_options(options: CompressOptions) -> Flz2Result<Self> {
        options.validate()?;
        Ok(CompressStream {
            cctx: CCtx::with_options(options),
            block: Vec::new(),
            pending: Vec::new(),
            pending_pos: 0,
            stage: CStage::Idle,
        })
    }

    /// Reset for a new frame at the given level.
    pub fn init(&mut self, level: u32) -> Flz2Result<()> {
        let mut options = CompressOptions::for_level(level)?;
        options.nb_threads = self.cctx.options().nb_threads;
        options.do_xxhash = self.cctx.options().do_xxhash;
        self.cctx.reset();
        self.cctx.set_options(options)?;
        self.block.clear();
        self.pending.clear();
        self.pending_pos = 0;
        self.stage = CStage::Idle;
        Ok(())
    }

    /// Access the underlying context between frames, e.g. to adjust
    /// options.
    pub fn context_mut(&mut self) -> Flz2Result<&mut CCtx> {
        if self.stage != CStage::Idle {
            return Err(Flz2Error::StageWrong);
        }
        Ok(&mut self.cctx)
    }

    fn pending_left(&self) -> usize {
        self.pending.len() - self.pending_pos
    }

    fn drain(&mut self, output: &mut OutBuffer<'_>) {
        let take = output.space().min(self.pending_left());
        output.dst[output.pos..output.pos + take]
            .copy_from_slice(&self.pending[self.pending_pos..self.pending_pos + take]);
        output.pos += take;
        self.pending_pos += take;
        if self.pending_pos == self.pending.len() {
            self.pending.clear();
            self.pending_pos = 0;
        }
    }

    fn ensure_frame(&mut self) -> Flz2Result<()> {
        match self.stage {
            CStage::Idle => {
                let CompressStream { cctx, pending, .. } = self;
                cctx.begin_frame(&mut |bytes: &[u8]| {
                    pending.extend_from_slice(bytes);
                    Ok(())
                })?;
                self.stage = CStage::Running;
                Ok(())
            }
            CStage::Running => Ok(()),
            CStage::Ended => Err(Flz2Error::StageWrong),
        }
    }

    fn compress_buffered_block(&mut self) -> Flz2Result<()> {
        let CompressStream { cctx, block, pending, .. } = self;
        if block.is_empty() {
            return Ok(());
        }
        cctx.compress_block(block, &mut |bytes: &[u8]| {
            pending.extend_from_slice(bytes);
            Ok(())
        })?;
        block.clear();
        Ok(())
    }

    /// Accept input and emit frame bytes. Returns the number of pending
    /// bytes still buffered internally; input is only consumed while
    /// the pending queue is empty.
    pub fn compress(
        &mut self,
        output: &mut OutBuffer<'_>,
        input: &mut InBuffer<'_>,
    ) -> Flz2Result<usize> {
        self.drain(output);
        self.ensure_frame()?;

        let payload = self.cctx.options().block_payload();
        while self.pending_left() == 0 && input.pos < input.src.len() {
            let want = payload - self.block.len();
            let take = want.min(input.src.len() - input.pos);
            self.block.extend_from_slice(&input.remaining()[..take]);
            input.pos += take;
            if self.block.len() == payload {
                self.compress_buffered_block()?;
                self.drain(output);
            }
        }
        Ok(self.pending_left())
    }

    /// Force a block boundary mid-stream and drain pending output.
    /// Returns the bytes still pending.
    pub fn flush(&mut self, output: &mut OutBuffer<'_>) -> Flz2Result<usize> {
        self.ensure_frame()?;
        self.compress_buffered_block()?;
        self.drain(output);
        Ok(self.pending_left())
    }

    /// Finish the frame. Call until it returns 0; until then no new
    /// frame may begin.
    pub fn end(&mut self, output: &mut OutBuffer<'_>) -> Flz2Result<usize> {
        if self.stage != CStage::Ended {
            self.ensure_frame()?;
            self.compress_buffered_block()?;
            let CompressStream { cctx, pending, .. } = self;
            cctx.end_frame(&mut |bytes: &[u8]| {
                pending.extend_from_slice(bytes);
                Ok(())
            })?;
            self.stage = CStage::Ended;
        }
        self.drain(output);
        let left = self.pending_left();
        if left == 0 {
            self.stage = CStage::Idle;
        }
        Ok(left)
    }
}

// ---------------------------------------------------------------------------
// Streaming decompression
// ---------------------------------------------------------------------------

/// Streaming decompressor.
pub struct DecompressStream {
    dec: Lzma2Decoder,
    flushed: usize,
}

impl DecompressStream {
    pub fn new() -> Self {
        DecompressStream {
            dec: Lzma2Decoder::new(),
            flushed: 0,
        }
    }

    /// Reset for a new frame.
    pub fn init(&mut self) {
        self.dec.reset();
        self.flushed = 0;
    }

    /// Consume compressed bytes and produce decoded bytes. Returns 0
    /// once the frame (and trailer, if any) is complete and fully
    /// drained, nonzero while more input or output space is needed.
    pub fn decompress(
        &mut self,
        output: &mut OutBuffer<'_>,
        input: &mut InBuffer<'_>,
    ) -> Flz2Result<usize> {
        let consumed = self.dec.feed(input.remaining())?;
        input.pos += consumed;

        let decoded = self.dec.output();
        let take = output.space().min(decoded.len() - self.flushed);
        output.dst[output.pos..output.pos + take]
            .copy_from_slice(&decoded[self.flushed..self.flushed + take]);
        output.pos += take;
        self.flushed += take;

        if self.dec.is_finished() && self.flushed == self.dec.output().len() {
            Ok(0)
        } else {
            Ok(1)
        }
    }
}

impl Default for DecompressStream {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Stream-compress `data`, feeding `in_step` input bytes at a time
    /// into `out_step`-sized output buffers.
    fn stream_compress(data: &[u8], level: u32, in_step: usize, out_step: usize) -> Vec<u8> {
        let mut stream = CompressStream::new(level).unwrap();
        let mut frame = Vec::new();
        let mut scratch = vec![0u8; out_step];

        for piece in data.chunks(in_step.max(1)) {
            let mut input = InBuffer::new(piece);
            while input.pos < input.src.len() {
                let mut output = OutBuffer::new(&mut scratch);
                stream.compress(&mut output, &mut input).unwrap();
                frame.extend_from_slice(&output.dst[..output.pos]);
            }
        }
        loop {
            let mut output = OutBuffer::new(&mut scratch);
            let left = stream.end(&mut output).unwrap();
            frame.extend_from_slice(&output.dst[..output.pos]);
            if left == 0 {
                break;
            }
        }
        frame
    }

    fn stream_decompress(frame: &[u8], in_step: usize, out_step: usize) -> Vec<u8> {
        let mut stream = DecompressStream::new();
        let mut decoded = Vec::new();
        let mut scratch = vec![0u8; out_step];
        let mut done = false;

        for piece in frame.chunks(in_step.max(1)) {
            let mut input = InBuffer::new(piece);
            loop {
                let mut output = OutBuffer::new(&mut scratch);
                let status = stream.decompress(&mut output, &mut input).unwrap();
                decoded.extend_from_slice(&output.dst[..output.pos]);
                if status == 0 {
                    done = true;
                    break;
                }
                if input.pos == input.src.len() && output.pos < output.dst.len() {
                    break;
                }
            }
            if done {
                break;
            }
        }
        assert!(done, "frame did not finish");
        decoded
    }

    #[test]
    fn test_stream_round_trip_basic() {
        let data = b"streaming round trip with default buffers ".repeat(500);
        let frame = stream_compress(&data, 2, 4096, 4096);
        assert_eq!(stream_decompress(&frame, 4096, 4096), data);
    }

    #[test]
    fn test_stream_round_trip_tiny_buffers() {
        let data = b"tiny buffer torture ".repeat(200);
        let frame = stream_compress(&data, 1, 7, 1);
        assert_eq!(stream_decompress(&frame, 1, 3), data);
    }

    #[test]
    fn test_stream_matches_one_shot() {
        // Identical frames regardless of how input arrives.
        let data = b"chunking invariance: the frame must not depend on call pattern ".repeat(300);
        let whole = stream_compress(&data, 2, data.len(), 1 << 16);
        for in_step in [1usize, 13, 1000, 65536] {
            let pieces = stream_compress(&data, 2, in_step, 333);
            assert_eq!(pieces, whole, "in_step {} changed the frame", in_step);
        }
    }

    #[test]
    fn test_stream_decompress_odd_chunks() {
        // Mirrors the 0x8101-byte I/O pattern over a multi-block frame.
        let mut stream = CompressStream::with_options({
            let mut o = CompressOptions::for_level(1).unwrap();
            o.set_block_size_log(21).unwrap();
            o.nb_threads = 2;
            o
        })
        .unwrap();

        let data: Vec<u8> = (0..3_000_000u32).map(|i| ((i / 7) % 256) as u8).collect();
        let mut frame = Vec::new();
        let mut scratch = vec![0u8; 1 << 16];
        let mut input = InBuffer::new(&data);
        while input.pos < input.src.len() {
            let mut output = OutBuffer::new(&mut scratch);
            stream.compress(&mut output, &mut input).unwrap();
            frame.extend_from_slice(&output.dst[..output.pos]);
        }
        loop {
            let mut output = OutBuffer::new(&mut scratch);
            let left = stream.end(&mut output).unwrap();
            frame.extend_from_slice(&output.dst[..output.pos]);
            if left == 0 {
                break;
            }
        }

        assert_eq!(stream_decompress(&frame, 0x8101, 0x8101), data);
    }

    #[test]
    fn test_flush_forces_boundary() {
        let mut stream = CompressStream::new(1).unwrap();
        let mut frame = Vec::new();
        let mut scratch = vec![0u8; 1 << 16];

        let data = b"flush me down the stream ".repeat(100);
        let mut input = InBuffer::new(&data);
        let mut output = OutBuffer::new(&mut scratch);
        stream.compress(&mut output, &mut input).unwrap();
        frame.extend_from_slice(&output.dst[..output.pos]);

        // Flush mid-block: buffered input becomes a short block now.
        let mut output = OutBuffer::new(&mut scratch);
        let left = stream.flush(&mut output).unwrap();
        frame.extend_from_slice(&output.dst[..output.pos]);
        assert_eq!(left, 0);
        assert!(!frame.is_empty(), "flush must emit the buffered block");

        let mut output = OutBuffer::new(&mut scratch);
        let mut input = InBuffer::new(&data);
        stream.compress(&mut output, &mut input).unwrap();
        frame.extend_from_slice(&output.dst[..output.pos]);
        loop {
            let mut output = OutBuffer::new(&mut scratch);
            let left = stream.end(&mut output).unwrap();
            frame.extend_from_slice(&output.dst[..output.pos]);
            if left == 0 {
                break;
            }
        }

        let mut both = data.clone();
        both.extend_from_slice(&data);
        assert_eq!(stream_decompress(&frame, 4096, 4096), both);
    }

    #[test]
    fn test_end_reports_pending_with_tiny_output() {
        let mut stream = CompressStream::new(1).unwrap();
        let data = b"pending drain check ".repeat(50);
        let mut input = InBuffer::new(&data);
        let mut big = vec![0u8; 1 << 16];
        let mut output = OutBuffer::new(&mut big);
        stream.compress(&mut output, &mut input).unwrap();

        // One byte of output space at a time: end must keep reporting
        // pending bytes until everything drained.
        let mut frame = Vec::from(&output.dst[..output.pos]);
        let mut one = [0u8; 1];
        let mut saw_pending = false;
        loop {
            let mut output = OutBuffer::new(&mut one);
            let left = stream.end(&mut output).unwrap();
            frame.extend_from_slice(&output.dst[..output.pos]);
            if left == 0 {
                break;
            }
            saw_pending = true;
        }
        assert!(saw_pending);
        assert_eq!(stream_decompress(&frame, 4096, 4096), data);
    }

    #[test]
    fn test_stream_reuse_after_end() {
        let mut stream = CompressStream::new(2).unwrap();
        let mut scratch = vec![0u8; 1 << 16];
        for round in 0..3u8 {
            let data = vec![round; 10_000];
            let mut input = InBuffer::new(&data);
            let mut frame = Vec::new();
            loop {
                let mut output = OutBuffer::new(&mut scratch);
                stream.compress(&mut output, &mut input).unwrap();
                frame.extend_from_slice(&output.dst[..output.pos]);
                if input.pos == input.src.len() {
                    break;
                }
            }
            loop {
                let mut output = OutBuffer::new(&mut scratch);
                let left = stream.end(&mut output).unwrap();
                frame.extend_from_slice(&output.dst[..output.pos]);
                if left == 0 {
                    break;
                }
            }
            assert_eq!(stream_decompress(&frame, 4096, 4096), data);
        }
    }

    #[test]
    fn test_empty_frame_stream() {
        let mut stream = CompressStream::new(1).unwrap();
        let mut scratch = vec![0u8; 64];
        let mut frame = Vec::new();
        loop {
            let mut output = OutBuffer::new(&mut scratch);
            let left = stream.end(&mut output).unwrap();
            frame.extend_from_slice(&output.dst[..output.pos]);
            if left == 0 {
                break;
            }
        }
        assert_eq!(stream_decompress(&frame, 16, 16), b"");
    }
}
