use crate::effects::FilterType;

const BUTTERWORTH_Q: f32 = std::f32::consts::FRAC_1_SQRT_2;

/// Trapezoidal state variable filter, 12 dB/octave.
// From Andrew Simper, "Solving the continuous SVF equations using trapezoidal
// integration and equivalent currents" (Cytomic, 2013).
#[derive(Debug, Clone, Copy)]
pub struct Svf {
    filter_type: FilterType,
    k: f32,
    a1: f32,
    a2: f32,
    a3: f32,
    ic1eq: f32,
    ic2eq: f32,
}

impl Svf {
    pub fn new(filter_type: FilterType, cutoff: f32, sample_rate: f32) -> Self {
        let cutoff = cutoff.clamp(1.0, 0.49 * sample_rate);
        let g = (std::f32::consts::PI * cutoff / sample_rate).tan();
        let k = 1.0 / BUTTERWORTH_Q;
        let a1 = 1.0 / (1.0 + g * (g + k));
        let a2 = g * a1;
        let a3 = g * a2;

        Self {
            filter_type,
            k,
            a1,
            a2,
            a3,
            ic1eq: 0.0,
            ic2eq: 0.0,
        }
    }

    pub fn process(&mut self, v0: f32) -> f32 {
        let v3 = v0 - self.ic2eq;
        let v1 = self.a1 * self.ic1eq + self.a2 * v3;
        let v2 = self.ic2eq + self.a2 * self.ic1eq + self.a3 * v3;
        self.ic1eq = 2.0 * v1 - self.ic1eq;
        self.ic2eq = 2.0 * v2 - self.ic2eq;

        match self.filter_type {
            FilterType::LowPass => v2,
            FilterType::BandPass => v1,
            FilterType::HighPass => v0 - self.k * v1 - v2,
        }
    }
}

/// Cascaded SVF stages for steeper rolloffs.
pub struct CascadeFilter {
    left: Vec<Svf>,
    right: Vec<Svf>,
}

impl CascadeFilter {
    pub fn new(filter_type: FilterType, cutoff: f32, stages: usize, sample_rate: f32) -> Self {
        let stage = Svf::new(filter_type, cutoff, sample_rate);
        Self {
            left: vec![stage; stages.max(1)],
            right: vec![stage; stages.max(1)],
        }
    }

    pub fn process(&mut self, l: f32, r: f32) -> (f32, f32) {
        let l = self.left.iter_mut().fold(l, |x, s| s.process(x));
        let r = self.right.iter_mut().fold(r, |x, s| s.process(x));
        (l, r)
    }
}
