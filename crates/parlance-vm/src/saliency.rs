//! Sélection par saillance dans les groupes de lignes `=>`.
//!
//! Chaque candidat porte sa condition évaluée et un score de complexité
//! (nombre de sous-conditions). Une stratégie choisit parmi les candidats
//! dont la condition passe, puis est informée du choix.

use parlance_runtime::Value;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::store::VariableStore;

/// Préfixe des compteurs de vues par contenu.
pub const VIEW_COUNT_PREFIX: &str = "$Parlance.Internal.Content.ViewCount.";

/// Un candidat de groupe de lignes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaliencyCandidate {
    /// Identifiant du contenu (ligne).
    pub content_id: String,
    /// Score de complexité de la condition.
    pub complexity: usize,
    /// Début du bloc du candidat.
    pub destination: usize,
    /// La condition est vraie.
    pub passing: bool,
}

/// Politique de choix entre candidats.
pub trait SaliencyStrategy {
    /// Index du candidat retenu, `None` si aucun ne passe.
    fn select(&mut self, candidates: &[SaliencyCandidate], store: &dyn VariableStore) -> Option<usize>;

    /// Le candidat `selected` va être exécuté.
    fn selected(&mut self, _selected: &SaliencyCandidate, _store: &mut dyn VariableStore) {}
}

/// Stratégies fournies, sélectionnables par configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum SaliencyKind {
    /// Premier candidat qui passe.
    First,
    /// Plus complexe ; le premier en cas d’égalité.
    #[default]
    Best,
    /// Moins vu, puis plus complexe.
    BestLeastRecentlyViewed,
    /// Moins vu, puis plus complexe, au hasard parmi les ex æquo.
    RandomBestLeastRecentlyViewed,
}

impl SaliencyKind {
    /// Instancie la stratégie.
    pub fn strategy(self) -> Box<dyn SaliencyStrategy> {
        match self {
            Self::First => Box::new(First),
            Self::Best => Box::new(Best),
            Self::BestLeastRecentlyViewed => Box::new(BestLeastRecentlyViewed),
            Self::RandomBestLeastRecentlyViewed => Box::new(RandomBestLeastRecentlyViewed::from_entropy()),
        }
    }
}

impl std::str::FromStr for SaliencyKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "first" => Ok(Self::First),
            "best" => Ok(Self::Best),
            "best_least_recently_viewed" | "least-recent" => Ok(Self::BestLeastRecentlyViewed),
            "random_best_least_recently_viewed" | "random" => Ok(Self::RandomBestLeastRecentlyViewed),
            other => Err(format!("unknown saliency strategy `{other}`")),
        }
    }
}

fn passing(candidates: &[SaliencyCandidate]) -> impl Iterator<Item = (usize, &SaliencyCandidate)> {
    candidates.iter().enumerate().filter(|(_, c)| c.passing)
}

/// Premier candidat qui passe.
#[derive(Debug, Clone, Copy, Default)]
pub struct First;

impl SaliencyStrategy for First {
    fn select(&mut self, candidates: &[SaliencyCandidate], _store: &dyn VariableStore) -> Option<usize> {
        passing(candidates).map(|(i, _)| i).next()
    }
}

/// Complexité maximale, premier à égalité.
#[derive(Debug, Clone, Copy, Default)]
pub struct Best;

impl SaliencyStrategy for Best {
    fn select(&mut self, candidates: &[SaliencyCandidate], _store: &dyn VariableStore) -> Option<usize> {
        passing(candidates)
            .fold(None, |best: Option<(usize, usize)>, (i, c)| match best {
                Some((_, score)) if score >= c.complexity => best,
                _ => Some((i, c.complexity)),
            })
            .map(|(i, _)| i)
    }
}

/// Moins de vues, puis complexité maximale, puis ordre source.
///
/// Les vues sont comptées dans le stockage sous [`VIEW_COUNT_PREFIX`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BestLeastRecentlyViewed;

fn view_key(content_id: &str) -> String { format!("{VIEW_COUNT_PREFIX}{content_id}") }

fn views(store: &dyn VariableStore, content_id: &str) -> f64 {
    match store.get(&view_key(content_id)) {
        Value::Number(n) => n,
        _ => 0.0,
    }
}

impl SaliencyStrategy for BestLeastRecentlyViewed {
    fn select(&mut self, candidates: &[SaliencyCandidate], store: &dyn VariableStore) -> Option<usize> {
        passing(candidates)
            .map(|(i, c)| (i, views(store, &c.content_id), c.complexity))
            .fold(None, |best: Option<(usize, f64, usize)>, cur| match best {
                Some((_, v, score)) if v < cur.1 || (v <= cur.1 && score >= cur.2) => best,
                _ => Some(cur),
            })
            .map(|(i, ..)| i)
    }

    fn selected(&mut self, selected: &SaliencyCandidate, store: &mut dyn VariableStore) {
        let seen = views(store, &selected.content_id);
        store.set(&view_key(&selected.content_id), Value::Number(seen + 1.0));
    }
}

/// Comme [`BestLeastRecentlyViewed`], mais les ex æquo (mêmes vues, même
/// complexité) sont départagés au hasard.
#[derive(Debug, Clone)]
pub struct RandomBestLeastRecentlyViewed {
    rng: StdRng,
}

impl RandomBestLeastRecentlyViewed {
    /// Tirages reproductibles.
    pub fn seeded(seed: u64) -> Self { Self { rng: StdRng::seed_from_u64(seed) } }

    /// Graine tirée de l’entropie du système.
    pub fn from_entropy() -> Self { Self { rng: StdRng::from_entropy() } }
}

impl SaliencyStrategy for RandomBestLeastRecentlyViewed {
    fn select(&mut self, candidates: &[SaliencyCandidate], store: &dyn VariableStore) -> Option<usize> {
        let scored: Vec<(usize, f64, usize)> =
            passing(candidates).map(|(i, c)| (i, views(store, &c.content_id), c.complexity)).collect();
        let fewest = scored.iter().map(|s| s.1).fold(f64::INFINITY, f64::min);
        let best = scored.iter().filter(|s| s.1 <= fewest).map(|s| s.2).max()?;
        let tied: Vec<usize> = scored.iter().filter(|s| s.1 <= fewest && s.2 == best).map(|s| s.0).collect();
        tied.choose(&mut self.rng).copied()
    }

    fn selected(&mut self, selected: &SaliencyCandidate, store: &mut dyn VariableStore) {
        BestLeastRecentlyViewed.selected(selected, store);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryVariableStore;
    use pretty_assertions::assert_eq;

    fn candidate(id: &str, complexity: usize, passing: bool) -> SaliencyCandidate {
        SaliencyCandidate { content_id: id.into(), complexity, destination: 0, passing }
    }

    #[test]
    fn first_and_best() {
        let store = MemoryVariableStore::new();
        let cs = [candidate("a", 0, false), candidate("b", 1, true), candidate("c", 3, true), candidate("d", 3, true)];
        assert_eq!(First.select(&cs, &store), Some(1));
        assert_eq!(Best.select(&cs, &store), Some(2));
        assert_eq!(Best.select(&cs[..1], &store), None);
        assert_eq!(First.select(&[], &store), None);
    }

    #[test]
    fn least_recently_viewed_rotates() {
        let mut store = MemoryVariableStore::new();
        let mut strategy = BestLeastRecentlyViewed;
        let cs = [candidate("a", 1, true), candidate("b", 2, true), candidate("c", 5, false)];
        let mut picks = Vec::new();
        for _ in 0..4 {
            let i = strategy.select(&cs, &store).unwrap();
            strategy.selected(&cs[i], &mut store);
            picks.push(cs[i].content_id.clone());
        }
        assert_eq!(picks, vec!["b", "a", "b", "a"]);
        assert_eq!(store.get("$Parlance.Internal.Content.ViewCount.a"), Value::Number(2.0));
    }

    #[test]
    fn random_least_recently_viewed_breaks_ties_at_random() {
        let cs = [candidate("a", 2, true), candidate("b", 2, true), candidate("c", 1, true), candidate("d", 9, false)];
        let mut seen = [0usize; 4];
        for seed in 0..64 {
            let store = MemoryVariableStore::new();
            let i = RandomBestLeastRecentlyViewed::seeded(seed).select(&cs, &store).unwrap();
            seen[i] += 1;
        }
        // seuls les ex æquo les plus complexes sont tirés
        assert!(seen[0] > 0 && seen[1] > 0, "{seen:?}");
        assert_eq!((seen[2], seen[3]), (0, 0));
    }

    #[test]
    fn random_least_recently_viewed_prefers_unseen_content() {
        let mut store = MemoryVariableStore::new();
        let mut strategy = RandomBestLeastRecentlyViewed::seeded(3);
        let cs = [candidate("a", 1, true), candidate("b", 1, true), candidate("c", 1, true)];
        let mut picks = Vec::new();
        for _ in 0..3 {
            let i = strategy.select(&cs, &store).unwrap();
            strategy.selected(&cs[i], &mut store);
            picks.push(cs[i].content_id.clone());
        }
        picks.sort();
        assert_eq!(picks, vec!["a", "b", "c"]);
        assert_eq!(strategy.select(&[candidate("x", 0, false)], &store), None);
    }

    #[test]
    fn kinds_parse() {
        assert_eq!("first".parse::<SaliencyKind>(), Ok(SaliencyKind::First));
        assert_eq!("least-recent".parse::<SaliencyKind>(), Ok(SaliencyKind::BestLeastRecentlyViewed));
        assert_eq!("random".parse::<SaliencyKind>(), Ok(SaliencyKind::RandomBestLeastRecentlyViewed));
        assert!("loudest".parse::<SaliencyKind>().is_err());
    }
}
