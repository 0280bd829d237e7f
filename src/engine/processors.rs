use crate::effects::{
    BitCrusherParams, ChorusParams, DistortionParams, EffectParams, FilterParams, ReverbParams,
};
use crate::util::*;

use super::compressor::Compressor;
use super::filter::CascadeFilter;

/// One effect stage as the renderer runs it. Each processor blends its own output
/// with the dry input according to its wet level.
pub trait Processor: Send {
    fn process(&mut self, l: f32, r: f32) -> (f32, f32);
}

pub fn build(params: &EffectParams, wet: f32, sample_rate: f32) -> Box<dyn Processor> {
    match *params {
        EffectParams::BitCrusher(p) => Box::new(BitCrusher::new(p, wet)),
        EffectParams::Chorus(p) => Box::new(Chorus::new(p, wet, sample_rate)),
        EffectParams::Distortion(p) => Box::new(Distortion::new(p, wet)),
        EffectParams::Reverb(p) => Box::new(Reverb::new(p, wet, sample_rate)),
        EffectParams::Filter(p) => Box::new(Filter::new(p, wet, sample_rate)),
        EffectParams::Compressor(p) => Box::new(Compressor::new(sample_rate, p.threshold, p.ratio, wet)),
    }
}

impl Processor for Compressor {
    fn process(&mut self, l: f32, r: f32) -> (f32, f32) {
        Compressor::process(self, l, r)
    }
}

pub struct BitCrusher {
    half_levels: f32,
    wet: f32,
}

impl BitCrusher {
    pub fn new(params: BitCrusherParams, wet: f32) -> Self {
        Self {
            half_levels: 2.0f32.powf(params.bits - 1.0),
            wet,
        }
    }

    fn quantize(&self, x: f32) -> f32 {
        ((x * self.half_levels).round() / self.half_levels).clamp(-1.0, 1.0)
    }
}

impl Processor for BitCrusher {
    fn process(&mut self, l: f32, r: f32) -> (f32, f32) {
        (
            self.wet.mix(l, self.quantize(l)),
            self.wet.mix(r, self.quantize(r)),
        )
    }
}

struct DelayLine {
    buffer: Vec<f32>,
    write_idx: usize,
}

impl DelayLine {
    fn new(len: usize) -> Self {
        Self {
            buffer: vec![0.0; len.max(2)],
            write_idx: 0,
        }
    }

    /// Reads `delay` samples back, linearly interpolated.
    fn read(&self, delay: f32) -> f32 {
        let len = self.buffer.len();
        let delay = delay.clamp(1.0, (len - 1) as f32);
        let whole = delay.floor() as usize;
        let frac = delay - whole as f32;
        let a = self.buffer[(self.write_idx + len - whole) % len];
        let b = self.buffer[(self.write_idx + len - whole - 1) % len];
        frac.mix(a, b)
    }

    fn write(&mut self, x: f32) {
        self.buffer[self.write_idx] = x;
        self.write_idx = (self.write_idx + 1) % self.buffer.len();
    }
}

pub struct Chorus {
    left: DelayLine,
    right: DelayLine,
    phase: f32,
    phase_step: f32,
    spread: f32,
    base_delay: f32,
    depth: f32,
    feedback: f32,
    wet: f32,
}

impl Chorus {
    pub fn new(params: ChorusParams, wet: f32, sample_rate: f32) -> Self {
        let base_delay = params.delay / 1000.0 * sample_rate;
        let max_delay = (base_delay * (1.0 + params.depth)).ceil() as usize + 2;

        Self {
            left: DelayLine::new(max_delay),
            right: DelayLine::new(max_delay),
            phase: 0.0,
            phase_step: params.frequency / sample_rate,
            spread: params.spread / 360.0,
            base_delay,
            depth: params.depth,
            feedback: params.feedback,
            wet,
        }
    }
}

impl Processor for Chorus {
    fn process(&mut self, l: f32, r: f32) -> (f32, f32) {
        let lfo = |phase: f32| (phase * 2.0 * std::f32::consts::PI).sin();
        let delay_l = self.base_delay * (1.0 + self.depth * lfo(self.phase));
        let delay_r = self.base_delay * (1.0 + self.depth * lfo((self.phase + self.spread) % 1.0));

        let dl = self.left.read(delay_l);
        let dr = self.right.read(delay_r);
        self.left.write(l + self.feedback * dl);
        self.right.write(r + self.feedback * dr);
        self.phase = (self.phase + self.phase_step) % 1.0;

        (self.wet.mix(l, dl), self.wet.mix(r, dr))
    }
}

pub struct Distortion {
    k: f32,
    wet: f32,
}

impl Distortion {
    pub fn new(params: DistortionParams, wet: f32) -> Self {
        Self {
            k: params.amount * 100.0,
            wet,
        }
    }

    fn shape(&self, x: f32) -> f32 {
        use std::f32::consts::PI;
        let deg = PI / 180.0;
        (3.0 + self.k) * x * 20.0 * deg / (PI + self.k * x.abs())
    }
}

impl Processor for Distortion {
    fn process(&mut self, l: f32, r: f32) -> (f32, f32) {
        (
            self.wet.mix(l, self.shape(l)),
            self.wet.mix(r, self.shape(r)),
        )
    }
}

const COMB_TUNING: [usize; 4] = [1116, 1188, 1277, 1356];
const ALLPASS_TUNING: [usize; 2] = [556, 441];
const STEREO_SPREAD: usize = 23;
const REVERB_DAMPING: f32 = 0.2;

struct Comb {
    line: Vec<f32>,
    idx: usize,
    feedback: f32,
    store: f32,
}

impl Comb {
    fn new(len: usize, sample_rate: f32, decay: f32) -> Self {
        // Feedback that makes the loop fall 60 dB over `decay` seconds.
        let loop_time = len as f32 / sample_rate;
        Self {
            line: vec![0.0; len],
            idx: 0,
            feedback: 10.0f32.powf(-3.0 * loop_time / decay),
            store: 0.0,
        }
    }

    fn process(&mut self, x: f32) -> f32 {
        let out = self.line[self.idx];
        self.store = out * (1.0 - REVERB_DAMPING) + self.store * REVERB_DAMPING;
        self.line[self.idx] = x + self.store * self.feedback;
        self.idx = (self.idx + 1) % self.line.len();
        out
    }
}

struct Allpass {
    line: Vec<f32>,
    idx: usize,
}

impl Allpass {
    fn new(len: usize) -> Self {
        Self {
            line: vec![0.0; len],
            idx: 0,
        }
    }

    fn process(&mut self, x: f32) -> f32 {
        let buffered = self.line[self.idx];
        self.line[self.idx] = x + buffered * 0.5;
        self.idx = (self.idx + 1) % self.line.len();
        buffered - x
    }
}

struct ReverbChannel {
    combs: Vec<Comb>,
    allpasses: Vec<Allpass>,
}

impl ReverbChannel {
    fn new(offset: usize, sample_rate: f32, decay: f32) -> Self {
        let scale = sample_rate / 44100.0;
        let len = |n: usize| (((n + offset) as f32 * scale) as usize).max(1);
        Self {
            combs: COMB_TUNING
                .iter()
                .map(|&n| Comb::new(len(n), sample_rate, decay))
                .collect(),
            allpasses: ALLPASS_TUNING.iter().map(|&n| Allpass::new(len(n))).collect(),
        }
    }

    fn process(&mut self, x: f32) -> f32 {
        let mut out: f32 = self.combs.iter_mut().map(|c| c.process(x)).sum();
        out /= self.combs.len() as f32;
        for ap in self.allpasses.iter_mut() {
            out = ap.process(out);
        }
        out
    }
}

pub struct Reverb {
    left: ReverbChannel,
    right: ReverbChannel,
    wet: f32,
}

impl Reverb {
    pub fn new(params: ReverbParams, wet: f32, sample_rate: f32) -> Self {
        Self {
            left: ReverbChannel::new(0, sample_rate, params.decay),
            right: ReverbChannel::new(STEREO_SPREAD, sample_rate, params.decay),
            wet,
        }
    }
}

impl Processor for Reverb {
    fn process(&mut self, l: f32, r: f32) -> (f32, f32) {
        let input = 0.5 * (l + r);
        let wl = self.left.process(input);
        let wr = self.right.process(input);
        (self.wet.mix(l, wl), self.wet.mix(r, wr))
    }
}

pub struct Filter {
    cascade: CascadeFilter,
    wet: f32,
}

impl Filter {
    pub fn new(params: FilterParams, wet: f32, sample_rate: f32) -> Self {
        Self {
            cascade: CascadeFilter::new(params.filter_type, params.frequency, params.stages(), sample_rate),
            wet,
        }
    }
}

impl Processor for Filter {
    fn process(&mut self, l: f32, r: f32) -> (f32, f32) {
        let (fl, fr) = self.cascade.process(l, r);
        (self.wet.mix(l, fl), self.wet.mix(r, fr))
    }
}
