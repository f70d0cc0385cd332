use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, RngCore, SeedableRng};
use std::fmt;

// -----------------------------------------------------------------------------
// ----- Picker ----------------------------------------------------------------

/// Uniform random choice among routing candidates.
///
/// Every pool owns one. Tests seed it so routing is reproducible.
pub struct Picker {
    rng: Mutex<Box<dyn RngCore + Send>>,
}

// -----------------------------------------------------------------------------
// ----- Picker: Static --------------------------------------------------------

impl Picker {
    pub fn from_rng(rng: impl RngCore + Send + 'static) -> Self {
        Self {
            rng: Mutex::new(Box::new(rng)),
        }
    }

    pub fn from_os_rng() -> Self {
        Self::from_rng(StdRng::from_os_rng())
    }

    pub fn seeded(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }
}

// -----------------------------------------------------------------------------
// ----- Picker: Public --------------------------------------------------------

impl Picker {
    /// Each call samples independently; there is no stickiness.
    pub fn pick_index(&self, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }
        let mut rng = self.rng.lock();
        Some(rng.random_range(0..len))
    }

    pub fn choose<'a, T>(&self, items: &'a [T]) -> Option<&'a T> {
        self.pick_index(items.len()).map(|i| &items[i])
    }

    /// Random order, for trying candidates one after another.
    pub fn shuffle<T>(&self, items: &mut [T]) {
        let mut rng = self.rng.lock();
        items.shuffle(&mut **rng);
    }
}

impl Default for Picker {
    fn default() -> Self {
        Self::from_os_rng()
    }
}

impl fmt::Debug for Picker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Picker").finish_non_exhaustive()
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
