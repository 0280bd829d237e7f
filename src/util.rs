use std::fmt::Display;

pub fn log_if_error<T, E: Display>(msg: &str, result: Result<T, E>) -> Option<T> {
    match result {
        Ok(o) => Some(o),
        Err(e) => {
            log::warn!("{}: {}", msg, e);
            None
        }
    }
}

pub trait Mix {
    /// Blends `a` towards `b`, where `self` is the fraction of `b`.
    fn mix(self, a: f32, b: f32) -> f32;
}

impl Mix for f32 {
    fn mix(self, a: f32, b: f32) -> f32 {
        a + self * (b - a)
    }
}

pub fn db_to_gain(db: f32) -> f32 {
    10.0f32.powf(db / 20.0)
}

pub fn gain_to_db(gain: f32) -> f32 {
    20.0 * gain.max(1e-9).log10()
}

pub fn key_to_pitch(key: u8) -> f32 {
    440.0 * 2.0f32.powf((key as f32 - 69.0) / 12.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mix_endpoints() {
        assert_eq!(0.0f32.mix(0.25, 1.0), 0.25);
        assert_eq!(1.0f32.mix(0.25, 1.0), 1.0);
        assert_eq!(0.5f32.mix(0.0, 1.0), 0.5);
    }

    #[test]
    fn test_db_conversions() {
        assert!((db_to_gain(0.0) - 1.0).abs() < 1e-6);
        assert!((db_to_gain(-20.0) - 0.1).abs() < 1e-6);
        assert!((gain_to_db(0.1) + 20.0).abs() < 1e-4);
    }

    #[test]
    fn test_key_to_pitch() {
        assert!((key_to_pitch(69) - 440.0).abs() < 1e-3);
        assert!((key_to_pitch(81) - 880.0).abs() < 1e-3);
    }
}
