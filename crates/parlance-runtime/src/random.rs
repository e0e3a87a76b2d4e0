//! Générateur pseudo-aléatoire des natives `random`, `random_range`,
//! `random_range_float` et `dice`.
//!
//! Injectable : une graine fixe rend les tirages reproductibles (tests,
//! replays), sinon la graine vient de l’entropie du système.

use std::sync::{Arc, Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::SeedableRng;

/// Générateur partagé par les natives d’une `Library` (clonable, `Send + Sync`).
#[derive(Debug, Clone)]
pub struct SharedRng(Arc<Mutex<StdRng>>);

impl SharedRng {
    /// Tirages reproductibles.
    pub fn seeded(seed: u64) -> Self { Self(Arc::new(Mutex::new(StdRng::seed_from_u64(seed)))) }

    /// Graine tirée de l’entropie du système.
    pub fn from_entropy() -> Self { Self(Arc::new(Mutex::new(StdRng::from_entropy()))) }

    /// Exécute `f` avec le générateur verrouillé.
    pub fn with<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        let mut rng = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut rng)
    }
}

impl Default for SharedRng {
    fn default() -> Self { Self::from_entropy() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn same_seed_same_draws() {
        let a = SharedRng::seeded(42);
        let b = SharedRng::seeded(42);
        let draws = |r: &SharedRng| (0..8).map(|_| r.with(|g| g.gen_range(0..1000))).collect::<Vec<u32>>();
        assert_eq!(draws(&a), draws(&b));
    }

    #[test]
    fn clones_share_the_stream() {
        let a = SharedRng::seeded(7);
        let first = a.clone().with(|g| g.gen::<u64>());
        let second = a.with(|g| g.gen::<u64>());
        let fresh = SharedRng::seeded(7).with(|g| g.gen::<u64>());
        assert_eq!(first, fresh);
        assert_ne!(first, second);
    }
}
