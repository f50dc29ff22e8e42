//! Fast PRNG for trial simulation. Uses SplitMix64 for throughput and good
//! statistical quality. Deterministic: same seed produces the same sequence.
//! Not cryptographically secure.

const SPLITMIX64_GOLDEN: u64 = 0x9e3779b97f4a7c15;
const SPLITMIX64_M1: u64 = 0xbf58476d1ce4e5b9;
const SPLITMIX64_M2: u64 = 0x94d049bb133111eb;

#[derive(Debug, Clone, Copy)]
pub struct Rng {
    state: u64,
}

impl Rng {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Independent stream for one trial within a chunk: the trial index is
    /// mixed through one SplitMix64 round so adjacent trials do not start
    /// with correlated states.
    pub fn for_trial(chunk_seed: u64, trial_index: u64) -> Self {
        let mut rng = Self::new(chunk_seed ^ trial_index.wrapping_mul(SPLITMIX64_GOLDEN));
        rng.next_u64();
        rng
    }

    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(SPLITMIX64_GOLDEN);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(SPLITMIX64_M1);
        z = (z ^ (z >> 27)).wrapping_mul(SPLITMIX64_M2);
        z ^ (z >> 31)
    }

    /// Uniform value in `[0, bound)` via multiply-shift. `bound` must be > 0.
    #[inline]
    pub fn next_bounded(&mut self, bound: u32) -> u32 {
        ((self.next_u64() as u128 * bound as u128) >> 64) as u32
    }
}
