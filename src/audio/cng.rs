//! Comfort noise for ticks without real audio.

/// Low-level noise generator.
///
/// `level` is a divisor applied to the summed pseudo-random value, so a
/// larger level gives quieter noise. Deterministic for a given seed.
#[derive(Debug, Clone)]
pub struct ComfortNoise {
    level: u32,
    state: i16,
}

impl ComfortNoise {
    pub fn new(level: u32) -> Self {
        Self::with_seed(level, 0x2545)
    }

    pub fn with_seed(level: u32, seed: i16) -> Self {
        Self { level, state: seed }
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn is_enabled(&self) -> bool {
        self.level > 0
    }

    /// Write `frames` frames of interleaved noise into `out`, replacing its contents.
    pub fn fill(&mut self, out: &mut Vec<i16>, frames: usize, channels: u16) {
        out.clear();
        if self.level == 0 {
            return;
        }
        let channels = channels.max(1) as usize;
        out.reserve(frames * channels);

        for _ in 0..frames {
            let mut sum: i32 = 0;
            for _ in 0..6 {
                self.state = self.state.wrapping_mul(31821).wrapping_add(13849);
                sum += self.state as i32;
            }
            let sample = ((sum as i16) as i32 / self.level as i32) as i16;
            out.extend(std::iter::repeat_n(sample, channels));
        }
    }
}
