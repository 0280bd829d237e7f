use crate::util::*;

const WINDOW_TIME_MS: f32 = 5.0;
const ATTACK_TIME_S: f32 = 0.003;
const RELEASE_TIME_S: f32 = 0.25;

pub struct Compressor {
    ringbuffer: Vec<f32>,
    ringbuffer_idx: usize,

    threshold: f32,
    ratio: f32,
    att_coeff: f32,
    rel_coeff: f32,
    wet: f32,

    rms2total: f32,
    gain_db: f32,
}

impl Compressor {
    pub fn new(sample_rate: f32, threshold: f32, ratio: f32, wet: f32) -> Self {
        let window_size = ((sample_rate * WINDOW_TIME_MS / 1000.0) as usize).max(1);

        Self {
            ringbuffer: vec![0.0; window_size],
            ringbuffer_idx: 0,

            threshold,
            ratio: ratio.max(1.0),
            att_coeff: (-1.0 / (ATTACK_TIME_S * sample_rate)).exp(),
            rel_coeff: (-1.0 / (RELEASE_TIME_S * sample_rate)).exp(),
            wet,

            rms2total: 0.0,
            gain_db: 0.0,
        }
    }

    /// Gain change in dB the compressor aims for at the given level.
    fn target_gain_db(&self, level_db: f32) -> f32 {
        let over = level_db - self.threshold;
        if over > 0.0 {
            -over * (1.0 - 1.0 / self.ratio)
        } else {
            0.0
        }
    }

    pub fn process(&mut self, l: f32, r: f32) -> (f32, f32) {
        let sqvol = 0.5 * (l * l + r * r);
        self.rms2total -= self.ringbuffer[self.ringbuffer_idx];
        self.rms2total += sqvol;
        self.ringbuffer[self.ringbuffer_idx] = sqvol;
        self.ringbuffer_idx = (self.ringbuffer_idx + 1) % self.ringbuffer.len();

        // Rounding can leave the running sum slightly negative.
        let rms2 = (self.rms2total / self.ringbuffer.len() as f32).max(0.0);
        let level_db = gain_to_db(rms2.sqrt());

        let target = self.target_gain_db(level_db);
        let coeff = if target < self.gain_db {
            self.att_coeff
        } else {
            self.rel_coeff
        };
        self.gain_db = target + coeff * (self.gain_db - target);

        let gain = db_to_gain(self.gain_db);
        let cl = self.wet.mix(l, l * gain);
        let cr = self.wet.mix(r, r * gain);
        (cl, cr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quiet_signal_untouched() {
        let mut c = Compressor::new(48000.0, -24.0, 12.0, 1.0);
        let mut out = (0.0, 0.0);
        for _ in 0..4800 {
            out = c.process(0.01, 0.01);
        }
        assert!((out.0 - 0.01).abs() < 1e-4);
    }

    #[test]
    fn test_loud_signal_reduced() {
        let mut c = Compressor::new(48000.0, -24.0, 12.0, 1.0);
        let mut out = (0.0, 0.0);
        for _ in 0..48000 {
            out = c.process(0.9, 0.9);
        }
        // -0.9 dB in, threshold -24 dB, ratio 12: roughly -21 dB of reduction.
        assert!(out.0 < 0.2);
        assert!(out.0 > 0.0);
    }

    #[test]
    fn test_dry_mix_bypasses() {
        let mut c = Compressor::new(48000.0, -24.0, 12.0, 0.0);
        for _ in 0..4800 {
            assert_eq!(c.process(0.9, -0.9), (0.9, -0.9));
        }
    }
}
