//! Random chart selection over a catalog snapshot.

use rand::seq::IteratorRandom;
use rand::Rng;

use crate::catalog::{Catalog, Entry};
use crate::command::FilterSpec;

/// Why nothing was selected. Only the reply wording differs between the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum NoMatch {
    #[error("the catalog is empty")]
    EmptyCatalog,
    #[error("no entry matched the filter")]
    NothingMatched,
}

/// Pick one entry matching `spec`, uniformly at random.
pub fn select<'a, R>(
    catalog: &'a Catalog,
    spec: &FilterSpec,
    rng: &mut R,
) -> Result<&'a Entry, NoMatch>
where
    R: Rng + ?Sized,
{
    if catalog.is_empty() {
        return Err(NoMatch::EmptyCatalog);
    }
    catalog
        .iter()
        .filter(|entry| spec.matches(entry.difficulty, entry.level))
        .choose(rng)
        .ok_or(NoMatch::NothingMatched)
}

/// Pick any entry, uniformly at random. Backs `/all`.
pub fn select_any<'a, R>(catalog: &'a Catalog, rng: &mut R) -> Result<&'a Entry, NoMatch>
where
    R: Rng + ?Sized,
{
    catalog.iter().choose(rng).ok_or(NoMatch::EmptyCatalog)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Tier;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashMap;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(0x5eed)
    }

    fn sample_catalog() -> Catalog {
        Catalog::new(vec![
            Entry::new("Melt", Tier::Easy, 6),
            Entry::new("Melt", Tier::Master, 26),
            Entry::new("Senbonzakura", Tier::Expert, 27),
            Entry::new("Senbonzakura", Tier::Master, 28),
            Entry::new("Ghost Rule", Tier::Expert, 28),
            Entry::new("Ghost Rule", Tier::Master, 30),
            Entry::new("Ghost Rule", Tier::Append, 31),
        ])
    }

    // -- empty catalog -----------------------------------------------------

    #[test]
    fn empty_catalog_never_matches() {
        let catalog = Catalog::default();
        let mut rng = rng();
        for spec in [
            FilterSpec::default(),
            FilterSpec::exact(Some(Tier::Master), 26),
            FilterSpec::new(None, 0, u32::MAX),
        ] {
            assert_eq!(
                select(&catalog, &spec, &mut rng),
                Err(NoMatch::EmptyCatalog)
            );
        }
        assert_eq!(select_any(&catalog, &mut rng), Err(NoMatch::EmptyCatalog));
    }

    // -- filtering ---------------------------------------------------------

    #[test]
    fn unmatched_filter_reports_nothing_matched() {
        let catalog = sample_catalog();
        let spec = FilterSpec::exact(Some(Tier::Easy), 30);
        assert_eq!(select(&catalog, &spec, &mut rng()), Err(NoMatch::NothingMatched));
    }

    #[test]
    fn single_match_is_always_returned() {
        let catalog = sample_catalog();
        let spec = FilterSpec::exact(Some(Tier::Master), 26);
        let mut rng = rng();
        for _ in 0..100 {
            let entry = select(&catalog, &spec, &mut rng).expect("one match");
            assert_eq!(entry, &Entry::new("Melt", Tier::Master, 26));
        }
    }

    #[test]
    fn selection_respects_tier_and_range() {
        let catalog = sample_catalog();
        let spec = FilterSpec::new(Some(Tier::Expert), 27, 28);
        let mut rng = rng();
        for _ in 0..200 {
            let entry = select(&catalog, &spec, &mut rng).expect("two matches");
            assert_eq!(entry.difficulty, Tier::Expert);
            assert!((27..=28).contains(&entry.level));
        }
    }

    #[test]
    fn level_only_filter_spans_tiers() {
        let catalog = sample_catalog();
        let spec = FilterSpec::exact(None, 28);
        let mut seen = HashMap::new();
        let mut rng = rng();
        for _ in 0..500 {
            let entry = select(&catalog, &spec, &mut rng).expect("two matches");
            *seen.entry(entry.difficulty).or_insert(0) += 1;
        }
        assert_eq!(seen.len(), 2);
        assert!(seen.contains_key(&Tier::Expert));
        assert!(seen.contains_key(&Tier::Master));
    }

    // -- distribution ------------------------------------------------------

    #[test]
    fn matches_are_chosen_roughly_uniformly() {
        let catalog = sample_catalog();
        let spec = FilterSpec::tier(Some(Tier::Master));
        let draws = 30_000;
        let mut counts: HashMap<&str, usize> = HashMap::new();
        let mut rng = rng();
        for _ in 0..draws {
            let entry = select(&catalog, &spec, &mut rng).expect("three matches");
            *counts.entry(entry.title.as_str()).or_insert(0) += 1;
        }
        assert_eq!(counts.len(), 3);
        let expected = draws as f64 / 3.0;
        for (title, count) in counts {
            let deviation = (count as f64 - expected).abs() / expected;
            assert!(deviation < 0.05, "{title} drawn {count} times, expected ~{expected}");
        }
    }

    #[test]
    fn select_any_covers_the_whole_catalog() {
        let catalog = sample_catalog();
        let mut rng = rng();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..2_000 {
            let entry = select_any(&catalog, &mut rng).expect("non-empty");
            seen.insert((entry.title.clone(), entry.difficulty));
        }
        assert_eq!(seen.len(), catalog.len());
    }
}
