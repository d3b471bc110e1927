//! Entropy coding of quantized coefficients.
//!
//! Two token streams make up a payload: DC residuals (after causal
//! prediction) and AC coefficients (zigzag run-length tokens). Both are
//! coded with per-context canonical Huffman codes built from histograms
//! over the stream itself. The same token emission feeds three consumers:
//! histogram building for the Y-to-B size objective, the actual encoder,
//! and (incrementally, via signed weights) the local Y-to-B search.

use crate::consts::ZIGZAG;
use crate::error::{Error, Result};
use crate::image::{Image, Image3, Image3W};

/// Contexts for the normal path: one histogram per plane.
pub const NUM_CONTEXTS: usize = 3;
/// Contexts for the fast path: a single shared histogram.
pub const NUM_CONTEXTS_FAST: usize = 1;

/// DC residual alphabet: magnitude categories 0..=17.
pub const DC_ALPHABET: usize = 18;
/// AC alphabet: `(run << 4) | category`, EOB = 0x00, ZRL = 0xF0. The
/// category nibble only reaches 15; [`AC_ESCAPE`] carries the rest.
pub const AC_ALPHABET: usize = 256;

/// Escape symbol for AC coefficients whose category exceeds the 4-bit
/// nibble (|v| >= 32768). The extra bits hold the run (4 bits) followed
/// by the category-16 value bits (16 bits).
const AC_ESCAPE: u8 = 0x10;

const MAX_CODE_LENGTH: u8 = 15;

// ---------------------------------------------------------------------------
// Value categories (magnitude classes with sign-complement extra bits)
// ---------------------------------------------------------------------------

/// Number of bits needed for |v|; 0 for v == 0.
#[inline]
pub fn category(v: i32) -> u8 {
    (32 - v.unsigned_abs().leading_zeros()) as u8
}

/// Extra bits for `v` in category `cat`: the value itself when positive,
/// ones-complement style offset when negative.
#[inline]
fn extra_bits_value(v: i32, cat: u8) -> u32 {
    if v < 0 {
        (v + (1i32 << cat) - 1) as u32
    } else {
        v as u32
    }
}

/// Inverse of [`extra_bits_value`].
#[inline]
pub(crate) fn value_from_extra(cat: u8, bits: u32) -> i32 {
    if cat == 0 {
        0
    } else if bits < (1u32 << (cat - 1)) {
        bits as i32 - (1i32 << cat) + 1
    } else {
        bits as i32
    }
}

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct Token {
    pub context: u8,
    pub symbol: u8,
    pub extra_len: u8,
    pub extra: u32,
}

/// Receives tokens from the coefficient processors.
pub trait TokenSink {
    fn token(&mut self, context: usize, symbol: u8, extra_len: u8, extra: u32);
}

/// Collects tokens for actual encoding.
#[derive(Debug, Default)]
pub struct TokenList {
    pub tokens: Vec<Token>,
}

impl TokenSink for TokenList {
    fn token(&mut self, context: usize, symbol: u8, extra_len: u8, extra: u32) {
        self.tokens.push(Token {
            context: context as u8,
            symbol,
            extra_len,
            extra,
        });
    }
}

// ---------------------------------------------------------------------------
// Histograms
// ---------------------------------------------------------------------------

/// Per-context symbol histogram with signed updates.
///
/// `set_weight(-1)` followed by re-emitting a block's tokens removes that
/// block's contribution; the local Y-to-B search pairs every removal with
/// a re-add so the histogram always describes the whole image.
#[derive(Debug, Clone)]
pub struct HistogramBuilder {
    counts: Vec<Vec<i64>>,
    weight: i64,
}

impl HistogramBuilder {
    pub fn new(num_contexts: usize, alphabet: usize) -> Self {
        Self {
            counts: vec![vec![0i64; alphabet]; num_contexts],
            weight: 1,
        }
    }

    pub fn set_weight(&mut self, weight: i64) {
        self.weight = weight;
    }

    /// Estimated encoded size in bytes: per-context histogram header plus
    /// the self-information of the counts. A close lower bound on the size
    /// produced by the actual coder; used as the Y-to-B search objective.
    pub fn encoded_size(&self, ctx_bits: u32, precision: u32) -> usize {
        let mut total = 0usize;
        for counts in &self.counts {
            let sum: i64 = counts.iter().map(|&c| c.max(0)).sum();
            if sum == 0 {
                continue;
            }
            let mut bits = 0.0f64;
            let mut nonzero = 0usize;
            for &c in counts {
                let c = c.max(0);
                if c > 0 {
                    nonzero += 1;
                    bits += c as f64 * (sum as f64 / c as f64).log2();
                }
            }
            let header = (1usize << ctx_bits) + nonzero * precision as usize;
            total += header + (bits / 8.0).ceil() as usize;
        }
        total
    }
}

impl TokenSink for HistogramBuilder {
    fn token(&mut self, context: usize, symbol: u8, _extra_len: u8, _extra: u32) {
        self.counts[context][symbol as usize] += self.weight;
    }
}

// ---------------------------------------------------------------------------
// Coefficient processors
// ---------------------------------------------------------------------------

/// Emits DC residual tokens: one magnitude-category token per value.
#[derive(Debug, Clone, Copy)]
pub struct CoeffProcessor {
    num_contexts: usize,
}

impl CoeffProcessor {
    pub fn new(num_contexts: usize) -> Self {
        Self { num_contexts }
    }

    #[inline]
    fn context(&self, c: usize) -> usize {
        if self.num_contexts == 1 {
            0
        } else {
            c
        }
    }

    pub fn process_value(&self, v: i32, c: usize, sink: &mut impl TokenSink) {
        let cat = category(v);
        sink.token(self.context(c), cat, cat, extra_bits_value(v, cat));
    }
}

/// Emits AC tokens for one block: zigzag scan of coefficients 1..63 with
/// (run, category) combined symbols.
#[derive(Debug, Clone, Copy)]
pub struct AcBlockProcessor {
    num_contexts: usize,
}

impl AcBlockProcessor {
    pub fn new(num_contexts: usize) -> Self {
        Self { num_contexts }
    }

    #[inline]
    fn context(&self, c: usize) -> usize {
        if self.num_contexts == 1 {
            0
        } else {
            c
        }
    }

    pub fn process_block(&self, block: &[i16], c: usize, sink: &mut impl TokenSink) {
        let ctx = self.context(c);
        let mut run = 0usize;
        for k in 1..64 {
            let v = block[ZIGZAG[k]] as i32;
            if v == 0 {
                run += 1;
                continue;
            }
            while run >= 16 {
                sink.token(ctx, 0xF0, 0, 0);
                run -= 16;
            }
            let cat = category(v);
            if cat > 15 {
                let extra = ((run as u32) << 16) | extra_bits_value(v, 16);
                sink.token(ctx, AC_ESCAPE, 20, extra);
            } else {
                sink.token(ctx, ((run as u8) << 4) | cat, cat, extra_bits_value(v, cat));
            }
            run = 0;
        }
        if run > 0 {
            sink.token(ctx, 0x00, 0, 0);
        }
    }
}

// ---------------------------------------------------------------------------
// DC prediction
// ---------------------------------------------------------------------------

/// Median-of-gradients prediction from the causal neighbors.
#[inline]
fn med_predictor(left: i32, top: i32, topleft: i32) -> i32 {
    let mn = left.min(top);
    let mx = left.max(top);
    if topleft >= mx {
        mn
    } else if topleft <= mn {
        mx
    } else {
        left + top - topleft
    }
}

#[inline]
fn dc_prediction(dc: &Image<i32>, bx: usize, by: usize) -> i32 {
    if bx == 0 && by == 0 {
        0
    } else if by == 0 {
        dc.get(bx - 1, 0)
    } else if bx == 0 {
        dc.get(0, by - 1)
    } else {
        med_predictor(
            dc.get(bx - 1, by),
            dc.get(bx, by - 1),
            dc.get(bx - 1, by - 1),
        )
    }
}

/// Extracts per-block DC values from the coefficient image.
fn dc_plane(coeffs: &Image3W, c: usize, block_xsize: usize, block_ysize: usize) -> Image<i32> {
    let mut out = Image::new(block_xsize, block_ysize);
    for by in 0..block_ysize {
        let row = coeffs.row(c, by);
        for bx in 0..block_xsize {
            out.set(bx, by, row[bx * 64] as i32);
        }
    }
    out
}

/// DC residual image at block resolution, one plane per channel.
pub fn predict_dc(coeffs: &Image3W, block_xsize: usize, block_ysize: usize) -> Image3<i32> {
    let mut residuals = Image3::new(block_xsize, block_ysize);
    for c in 0..3 {
        let dc = dc_plane(coeffs, c, block_xsize, block_ysize);
        for by in 0..block_ysize {
            for bx in 0..block_xsize {
                let pred = dc_prediction(&dc, bx, by);
                residuals
                    .plane_mut(c)
                    .set(bx, by, dc.get(bx, by) - pred);
            }
        }
    }
    residuals
}

/// Runs every DC residual through `proc` into `sink`, raster blocks with
/// plane-inner order. The encoder and the Y-to-B objective share this walk.
pub fn process_dc_image(
    residuals: &Image3<i32>,
    proc: &CoeffProcessor,
    sink: &mut impl TokenSink,
) {
    for by in 0..residuals.ysize() {
        for bx in 0..residuals.xsize() {
            for c in 0..3 {
                proc.process_value(residuals.plane(c).get(bx, by), c, sink);
            }
        }
    }
}

/// Runs every AC block through `proc` into `sink`, same walk order as
/// [`process_dc_image`].
pub fn process_ac_image(
    coeffs: &Image3W,
    block_xsize: usize,
    block_ysize: usize,
    proc: &AcBlockProcessor,
    sink: &mut impl TokenSink,
) {
    for by in 0..block_ysize {
        for bx in 0..block_xsize {
            for c in 0..3 {
                let row = coeffs.row(c, by);
                proc.process_block(&row[bx * 64..(bx + 1) * 64], c, sink);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Bit I/O (MSB-first)
// ---------------------------------------------------------------------------

pub struct BitWriter {
    buffer: Vec<u8>,
    bit_buffer: u64,
    bits_in_buffer: u32,
}

impl BitWriter {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(4096),
            bit_buffer: 0,
            bits_in_buffer: 0,
        }
    }

    #[inline]
    pub fn write_bits(&mut self, value: u32, count: u8) {
        if count == 0 {
            return;
        }
        self.bit_buffer = (self.bit_buffer << count) | (value as u64 & ((1u64 << count) - 1));
        self.bits_in_buffer += count as u32;
        while self.bits_in_buffer >= 8 {
            self.bits_in_buffer -= 8;
            self.buffer.push((self.bit_buffer >> self.bits_in_buffer) as u8);
        }
    }

    /// Pads the final partial byte with zero bits.
    pub fn into_bytes(mut self) -> Vec<u8> {
        if self.bits_in_buffer > 0 {
            let pad = 8 - self.bits_in_buffer;
            self.bit_buffer <<= pad;
            self.buffer.push(self.bit_buffer as u8);
        }
        self.buffer
    }
}

impl Default for BitWriter {
    fn default() -> Self {
        Self::new()
    }
}

pub struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
    bit_buffer: u64,
    bits_left: u32,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            bit_buffer: 0,
            bits_left: 0,
        }
    }

    #[inline]
    pub fn read_bits(&mut self, count: u8) -> Result<u32> {
        if count == 0 {
            return Ok(0);
        }
        while self.bits_left < count as u32 {
            if self.pos >= self.data.len() {
                return Err(Error::TruncatedPayload {
                    needed: self.pos + 1,
                    available: self.data.len(),
                });
            }
            self.bit_buffer = (self.bit_buffer << 8) | self.data[self.pos] as u64;
            self.pos += 1;
            self.bits_left += 8;
        }
        self.bits_left -= count as u32;
        Ok(((self.bit_buffer >> self.bits_left) & ((1u64 << count) - 1)) as u32)
    }

    #[inline]
    fn read_bit(&mut self) -> Result<u32> {
        self.read_bits(1)
    }

    /// Bytes pulled from the input so far.
    pub fn bytes_consumed(&self) -> usize {
        self.pos
    }
}

// ---------------------------------------------------------------------------
// Canonical Huffman codes
// ---------------------------------------------------------------------------

/// Code lengths from symbol frequencies, depth-limited by repeatedly
/// halving the counts until the longest code fits.
fn build_code_lengths(counts: &[i64], max_len: u8) -> Vec<u8> {
    let n = counts.len();
    let mut freqs: Vec<i64> = counts.iter().map(|&c| c.max(0)).collect();
    let active = freqs.iter().filter(|&&f| f > 0).count();
    if active == 0 {
        return vec![0; n];
    }
    if active == 1 {
        let mut lengths = vec![0u8; n];
        let sym = freqs.iter().position(|&f| f > 0).unwrap();
        lengths[sym] = 1;
        return lengths;
    }
    loop {
        let lengths = huffman_lengths(&freqs);
        if lengths.iter().all(|&l| l <= max_len) {
            return lengths;
        }
        for f in &mut freqs {
            if *f > 0 {
                *f = (*f + 1) / 2;
            }
        }
    }
}

/// Plain Huffman tree construction; ties broken by node creation order so
/// the lengths are deterministic across platforms.
fn huffman_lengths(freqs: &[i64]) -> Vec<u8> {
    use std::cmp::Reverse;
    use std::collections::BinaryHeap;

    struct Node {
        parent: usize,
        symbol: Option<usize>,
    }
    const NO_PARENT: usize = usize::MAX;

    let mut nodes: Vec<Node> = Vec::new();
    let mut heap: BinaryHeap<Reverse<(i64, usize)>> = BinaryHeap::new();
    for (sym, &f) in freqs.iter().enumerate() {
        if f > 0 {
            let idx = nodes.len();
            nodes.push(Node {
                parent: NO_PARENT,
                symbol: Some(sym),
            });
            heap.push(Reverse((f, idx)));
        }
    }
    while heap.len() > 1 {
        let Reverse((f1, n1)) = heap.pop().unwrap();
        let Reverse((f2, n2)) = heap.pop().unwrap();
        let idx = nodes.len();
        nodes.push(Node {
            parent: NO_PARENT,
            symbol: None,
        });
        nodes[n1].parent = idx;
        nodes[n2].parent = idx;
        heap.push(Reverse((f1 + f2, idx)));
    }
    let mut lengths = vec![0u8; freqs.len()];
    for (idx, node) in nodes.iter().enumerate() {
        if let Some(sym) = node.symbol {
            let mut depth = 0u8;
            let mut cur = idx;
            while nodes[cur].parent != NO_PARENT {
                cur = nodes[cur].parent;
                depth += 1;
            }
            lengths[sym] = depth;
        }
    }
    lengths
}

/// Canonical codes from lengths: symbols sorted by (length, symbol) get
/// consecutive codes.
fn canonical_codes(lengths: &[u8]) -> Vec<(u16, u8)> {
    let mut order: Vec<usize> = (0..lengths.len()).filter(|&s| lengths[s] > 0).collect();
    order.sort_by_key(|&s| (lengths[s], s));
    let mut codes = vec![(0u16, 0u8); lengths.len()];
    let mut code = 0u16;
    let mut prev_len = 0u8;
    for &sym in &order {
        let len = lengths[sym];
        code <<= len - prev_len;
        codes[sym] = (code, len);
        code += 1;
        prev_len = len;
    }
    codes
}

/// Per-context decoding tables rebuilt from serialized code lengths.
pub(crate) struct HuffmanDecoder {
    /// Per context: symbols in canonical order and per-length counts.
    contexts: Vec<(Vec<u8>, [u16; MAX_CODE_LENGTH as usize + 1])>,
}

impl HuffmanDecoder {
    pub(crate) fn read_symbol(&self, ctx: usize, reader: &mut BitReader<'_>) -> Result<u8> {
        let (symbols, len_counts) = &self.contexts[ctx];
        if symbols.is_empty() {
            return Err(Error::DecodeFailure("symbol from empty context"));
        }
        let mut code = 0u32;
        let mut first = 0u32;
        let mut index = 0usize;
        for len in 1..=MAX_CODE_LENGTH as usize {
            code = (code << 1) | reader.read_bit()?;
            let count = len_counts[len] as u32;
            if code < first + count {
                return Ok(symbols[index + (code - first) as usize]);
            }
            index += count as usize;
            first = (first + count) << 1;
        }
        Err(Error::DecodeFailure("invalid Huffman code"))
    }
}

// ---------------------------------------------------------------------------
// Stream framing
// ---------------------------------------------------------------------------

/// Serializes the tokens of one stream: context count, per-context code
/// tables, then the Huffman bitstream.
pub(crate) fn encode_stream(num_contexts: usize, alphabet: usize, tokens: &[Token]) -> Vec<u8> {
    let mut counts = vec![vec![0i64; alphabet]; num_contexts];
    for t in tokens {
        counts[t.context as usize][t.symbol as usize] += 1;
    }
    let codes: Vec<Vec<(u16, u8)>> = counts
        .iter()
        .map(|c| canonical_codes(&build_code_lengths(c, MAX_CODE_LENGTH)))
        .collect();

    let mut out = Vec::new();
    out.push(num_contexts as u8);
    for ctx_codes in &codes {
        let mut entries: Vec<(u8, u8)> = ctx_codes
            .iter()
            .enumerate()
            .filter(|(_, &(_, len))| len > 0)
            .map(|(sym, &(_, len))| (sym as u8, len))
            .collect();
        entries.sort_by_key(|&(sym, len)| (len, sym));
        out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
        for (sym, len) in entries {
            out.push(sym);
            out.push(len);
        }
    }

    let mut writer = BitWriter::new();
    for t in tokens {
        let (code, len) = codes[t.context as usize][t.symbol as usize];
        writer.write_bits(code as u32, len);
        writer.write_bits(t.extra, t.extra_len);
    }
    out.extend_from_slice(&writer.into_bytes());
    out
}

/// Parses the table section written by [`encode_stream`]. Returns the
/// decoder and the offset where the bitstream begins.
pub(crate) fn decode_tables(data: &[u8], alphabet: usize) -> Result<(HuffmanDecoder, usize, usize)> {
    let truncated = |needed: usize| Error::TruncatedPayload {
        needed,
        available: data.len(),
    };
    if data.is_empty() {
        return Err(truncated(1));
    }
    let num_contexts = data[0] as usize;
    if num_contexts == 0 || num_contexts > 4 {
        return Err(Error::DecodeFailure("bad context count"));
    }
    let mut pos = 1usize;
    let mut contexts = Vec::with_capacity(num_contexts);
    for _ in 0..num_contexts {
        if pos + 2 > data.len() {
            return Err(truncated(pos + 2));
        }
        let n = u16::from_le_bytes([data[pos], data[pos + 1]]) as usize;
        pos += 2;
        if pos + 2 * n > data.len() {
            return Err(truncated(pos + 2 * n));
        }
        let mut symbols = Vec::with_capacity(n);
        let mut len_counts = [0u16; MAX_CODE_LENGTH as usize + 1];
        let mut prev = (0u8, 0u8);
        for i in 0..n {
            let sym = data[pos];
            let len = data[pos + 1];
            pos += 2;
            if len == 0 || len > MAX_CODE_LENGTH || sym as usize >= alphabet {
                return Err(Error::DecodeFailure("bad code table entry"));
            }
            if i > 0 && (len, sym) <= (prev.1, prev.0) {
                return Err(Error::DecodeFailure("code table not canonical"));
            }
            prev = (sym, len);
            symbols.push(sym);
            len_counts[len as usize] += 1;
        }
        // Kraft inequality keeps malformed tables from over-consuming bits.
        let mut kraft = 0u64;
        for len in 1..=MAX_CODE_LENGTH as usize {
            kraft += (len_counts[len] as u64) << (MAX_CODE_LENGTH as usize - len);
        }
        if n > 1 && kraft > 1u64 << MAX_CODE_LENGTH {
            return Err(Error::DecodeFailure("code table violates Kraft bound"));
        }
        contexts.push((symbols, len_counts));
    }
    Ok((HuffmanDecoder { contexts }, pos, num_contexts))
}

// ---------------------------------------------------------------------------
// DC / AC stream entry points
// ---------------------------------------------------------------------------

/// Encodes the DC residual image. `num_contexts` is 3 for the normal path,
/// 1 for the fast path.
pub fn encode_dc_stream(residuals: &Image3<i32>, num_contexts: usize) -> Vec<u8> {
    let proc = CoeffProcessor::new(num_contexts);
    let mut tokens = TokenList::default();
    process_dc_image(residuals, &proc, &mut tokens);
    encode_stream(num_contexts, DC_ALPHABET, &tokens.tokens)
}

/// Decodes DC values (prediction already undone). Returns per-plane DC at
/// block resolution and the bytes consumed.
pub fn decode_dc_stream(
    data: &[u8],
    block_xsize: usize,
    block_ysize: usize,
) -> Result<(Image3<i32>, usize)> {
    let (decoder, table_len, num_contexts) = decode_tables(data, DC_ALPHABET)?;
    let mut reader = BitReader::new(&data[table_len..]);
    let mut dc: [Image<i32>; 3] = [
        Image::new(block_xsize, block_ysize),
        Image::new(block_xsize, block_ysize),
        Image::new(block_xsize, block_ysize),
    ];
    for by in 0..block_ysize {
        for bx in 0..block_xsize {
            for (c, plane) in dc.iter_mut().enumerate() {
                let ctx = if num_contexts == 1 { 0 } else { c };
                let cat = decoder.read_symbol(ctx, &mut reader)?;
                if cat as usize >= DC_ALPHABET {
                    return Err(Error::DecodeFailure("DC category out of range"));
                }
                let extra = reader.read_bits(cat)?;
                let residual = value_from_extra(cat, extra);
                let value = dc_prediction(plane, bx, by) + residual;
                if value < i16::MIN as i32 || value > i16::MAX as i32 {
                    return Err(Error::DecodeFailure("DC value out of range"));
                }
                plane.set(bx, by, value);
            }
        }
    }
    let consumed = table_len + reader.pos;
    let mut out = Image3::new(block_xsize, block_ysize);
    for (c, plane) in dc.iter().enumerate() {
        for by in 0..block_ysize {
            out.plane_mut(c).row_mut(by).copy_from_slice(plane.row(by));
        }
    }
    Ok((out, consumed))
}

/// Encodes the AC coefficients of every block.
pub fn encode_ac_stream(
    coeffs: &Image3W,
    block_xsize: usize,
    block_ysize: usize,
    num_contexts: usize,
) -> Vec<u8> {
    let proc = AcBlockProcessor::new(num_contexts);
    let mut tokens = TokenList::default();
    process_ac_image(coeffs, block_xsize, block_ysize, &proc, &mut tokens);
    encode_stream(num_contexts, AC_ALPHABET, &tokens.tokens)
}

/// Decodes AC coefficients into `coeffs` (AC slots only; DC untouched).
/// Returns bytes consumed.
pub fn decode_ac_stream(
    data: &[u8],
    block_xsize: usize,
    block_ysize: usize,
    coeffs: &mut Image3W,
) -> Result<usize> {
    let (decoder, table_len, num_contexts) = decode_tables(data, AC_ALPHABET)?;
    let mut reader = BitReader::new(&data[table_len..]);
    for by in 0..block_ysize {
        for bx in 0..block_xsize {
            for c in 0..3 {
                let ctx = if num_contexts == 1 { 0 } else { c };
                let row = coeffs.row_mut(c, by);
                let block = &mut row[bx * 64..(bx + 1) * 64];
                let mut k = 1usize;
                while k < 64 {
                    let sym = decoder.read_symbol(ctx, &mut reader)?;
                    if sym == 0x00 {
                        break;
                    }
                    if sym == 0xF0 {
                        k += 16;
                        continue;
                    }
                    if sym == AC_ESCAPE {
                        let extra = reader.read_bits(20)?;
                        let run = (extra >> 16) as usize;
                        k += run;
                        if k >= 64 {
                            return Err(Error::DecodeFailure("AC run past block end"));
                        }
                        let value = value_from_extra(16, extra & 0xFFFF);
                        if value < i16::MIN as i32 || value > i16::MAX as i32 {
                            return Err(Error::DecodeFailure("AC value out of range"));
                        }
                        block[ZIGZAG[k]] = value as i16;
                        k += 1;
                        continue;
                    }
                    let run = (sym >> 4) as usize;
                    let cat = sym & 0x0F;
                    k += run;
                    if k >= 64 || cat == 0 {
                        return Err(Error::DecodeFailure("AC run past block end"));
                    }
                    let extra = reader.read_bits(cat)?;
                    let value = value_from_extra(cat, extra);
                    block[ZIGZAG[k]] = value as i16;
                    k += 1;
                }
                if k > 64 {
                    return Err(Error::DecodeFailure("AC run past block end"));
                }
            }
        }
    }
    Ok(table_len + reader.pos)
}

/// Histogram of the DC residual stream for size estimation.
pub fn build_dc_histogram(residuals: &Image3<i32>) -> HistogramBuilder {
    let proc = CoeffProcessor::new(NUM_CONTEXTS);
    let mut histo = HistogramBuilder::new(NUM_CONTEXTS, DC_ALPHABET);
    process_dc_image(residuals, &proc, &mut histo);
    histo
}

/// Histogram of the AC stream for size estimation.
pub fn build_ac_histogram(
    coeffs: &Image3W,
    block_xsize: usize,
    block_ysize: usize,
) -> HistogramBuilder {
    let proc = AcBlockProcessor::new(NUM_CONTEXTS);
    let mut histo = HistogramBuilder::new(NUM_CONTEXTS, AC_ALPHABET);
    process_ac_image(coeffs, block_xsize, block_ysize, &proc, &mut histo);
    histo
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_and_extra_round_trip() {
        for v in [-65534, -32768, -255, -2, -1, 0, 1, 2, 3, 255, 32767, 65534] {
            let cat = category(v);
            let bits = extra_bits_value(v, cat);
            assert_eq!(value_from_extra(cat, bits), v, "v = {}", v);
        }
    }

    #[test]
    fn test_bit_io_round_trip() {
        let mut w = BitWriter::new();
        w.write_bits(0b101, 3);
        w.write_bits(0xFFFF, 16);
        w.write_bits(0, 1);
        w.write_bits(0x1234, 13);
        let bytes = w.into_bytes();
        let mut r = BitReader::new(&bytes);
        assert_eq!(r.read_bits(3).unwrap(), 0b101);
        assert_eq!(r.read_bits(16).unwrap(), 0xFFFF);
        assert_eq!(r.read_bits(1).unwrap(), 0);
        assert_eq!(r.read_bits(13).unwrap(), 0x1234 & 0x1FFF);
    }

    #[test]
    fn test_bit_reader_truncation() {
        let mut r = BitReader::new(&[0xAB]);
        assert!(r.read_bits(8).is_ok());
        assert!(matches!(
            r.read_bits(1),
            Err(Error::TruncatedPayload { .. })
        ));
    }

    #[test]
    fn test_huffman_lengths_are_prefix_valid() {
        let counts: Vec<i64> = vec![100, 50, 20, 10, 5, 5, 1, 1, 0, 0, 3];
        let lengths = build_code_lengths(&counts, MAX_CODE_LENGTH);
        let mut kraft = 0.0f64;
        for (sym, &len) in lengths.iter().enumerate() {
            if counts[sym] > 0 {
                assert!(len > 0 && len <= MAX_CODE_LENGTH);
                kraft += (2f64).powi(-(len as i32));
            } else {
                assert_eq!(len, 0);
            }
        }
        assert!(kraft <= 1.0 + 1e-9);
    }

    #[test]
    fn test_single_symbol_stream() {
        let counts = vec![0i64, 7, 0];
        let lengths = build_code_lengths(&counts, MAX_CODE_LENGTH);
        assert_eq!(lengths, vec![0, 1, 0]);
    }

    #[test]
    fn test_dc_stream_round_trip() {
        let mut residual_src = Image3W::new(3 * 64, 2);
        // Fill DC slots with a pattern; AC slots irrelevant for this test.
        for c in 0..3 {
            for by in 0..2 {
                for bx in 0..3 {
                    let v = (c as i16 * 100) + (by as i16 * 17) - (bx as i16 * 31);
                    residual_src.row_mut(c, by)[bx * 64] = v;
                }
            }
        }
        let residuals = predict_dc(&residual_src, 3, 2);
        let bytes = encode_dc_stream(&residuals, NUM_CONTEXTS);
        let (dc, consumed) = decode_dc_stream(&bytes, 3, 2).unwrap();
        assert_eq!(consumed, bytes.len());
        for c in 0..3 {
            for by in 0..2 {
                for bx in 0..3 {
                    assert_eq!(
                        dc.plane(c).get(bx, by),
                        residual_src.row(c, by)[bx * 64] as i32
                    );
                }
            }
        }
    }

    #[test]
    fn test_ac_stream_round_trip() {
        let mut coeffs = Image3W::new(2 * 64, 2);
        for c in 0..3 {
            for by in 0..2 {
                for bx in 0..2 {
                    let row = coeffs.row_mut(c, by);
                    let block = &mut row[bx * 64..(bx + 1) * 64];
                    block[1] = 5;
                    block[8] = -3;
                    block[37] = (c as i16 + 1) * 7;
                    block[63] = if bx == 1 { -1 } else { 0 };
                }
            }
        }
        let bytes = encode_ac_stream(&coeffs, 2, 2, NUM_CONTEXTS);
        let mut decoded = Image3W::new(2 * 64, 2);
        let consumed = decode_ac_stream(&bytes, 2, 2, &mut decoded).unwrap();
        assert_eq!(consumed, bytes.len());
        for c in 0..3 {
            for by in 0..2 {
                for k in 0..2 * 64 {
                    if k % 64 == 0 {
                        continue; // DC not carried by the AC stream
                    }
                    assert_eq!(decoded.row(c, by)[k], coeffs.row(c, by)[k]);
                }
            }
        }
    }

    #[test]
    fn test_ac_escape_round_trips_extreme_coefficients() {
        // i16::MIN has category 16, which does not fit the 4-bit symbol
        // nibble and must go through the escape code.
        let mut coeffs = Image3W::new(64, 1);
        {
            let block = coeffs.row_mut(0, 0);
            block[1] = i16::MIN;
            // Escape after a short run.
            block[ZIGZAG[5]] = i16::MIN;
            // Escape after a ZRL flush (run of 20 zeros).
            block[ZIGZAG[26]] = i16::MIN;
            block[ZIGZAG[27]] = 32767;
        }
        let bytes = encode_ac_stream(&coeffs, 1, 1, NUM_CONTEXTS);
        let mut decoded = Image3W::new(64, 1);
        let consumed = decode_ac_stream(&bytes, 1, 1, &mut decoded).unwrap();
        assert_eq!(consumed, bytes.len());
        for k in 1..64 {
            assert_eq!(decoded.row(0, 0)[k], coeffs.row(0, 0)[k], "k = {}", k);
        }
    }

    #[test]
    fn test_fast_context_model_round_trips() {
        let mut coeffs = Image3W::new(64, 1);
        coeffs.row_mut(0, 0)[3] = 42;
        coeffs.row_mut(2, 0)[9] = -42;
        let bytes = encode_ac_stream(&coeffs, 1, 1, NUM_CONTEXTS_FAST);
        let mut decoded = Image3W::new(64, 1);
        decode_ac_stream(&bytes, 1, 1, &mut decoded).unwrap();
        assert_eq!(decoded.row(0, 0)[3], 42);
        assert_eq!(decoded.row(2, 0)[9], -42);
    }

    #[test]
    fn test_histogram_set_weight_pairing() {
        let proc = AcBlockProcessor::new(NUM_CONTEXTS);
        let mut block = [0i16; 64];
        block[5] = 9;
        block[20] = -2;
        let mut histo = HistogramBuilder::new(NUM_CONTEXTS, AC_ALPHABET);
        proc.process_block(&block, 0, &mut histo);
        let size_before = histo.encoded_size(1, 2);
        // Remove and re-add the same block: histogram is unchanged.
        histo.set_weight(-1);
        proc.process_block(&block, 0, &mut histo);
        histo.set_weight(1);
        proc.process_block(&block, 0, &mut histo);
        assert_eq!(histo.encoded_size(1, 2), size_before);
    }

    #[test]
    fn test_encoded_size_tracks_entropy() {
        let mut histo = HistogramBuilder::new(1, 4);
        // Uniform counts need more bits than skewed counts of equal total.
        for sym in 0..4u8 {
            for _ in 0..64 {
                histo.token(0, sym, 0, 0);
            }
        }
        let uniform = histo.encoded_size(1, 2);
        let mut skewed = HistogramBuilder::new(1, 4);
        for _ in 0..253 {
            skewed.token(0, 0, 0, 0);
        }
        skewed.token(0, 1, 0, 0);
        skewed.token(0, 2, 0, 0);
        skewed.token(0, 3, 0, 0);
        assert!(skewed.encoded_size(1, 2) < uniform);
    }
}
