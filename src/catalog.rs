//! Song catalog: difficulty tiers, playable entries, and the shared store.
//!
//! A [`Catalog`] is an immutable, flattened table of `(title, tier, level)`
//! entries. The [`CatalogStore`] hands out `Arc` snapshots of the current
//! catalog and swaps the whole `Arc` on commit, so a reader in the middle of a
//! command never sees a half-replaced table.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Tier
// ---------------------------------------------------------------------------

/// A chart difficulty category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Tier {
    Easy,
    Normal,
    Hard,
    Expert,
    Master,
    Append,
}

impl Tier {
    /// Every tier, easiest first.
    pub const ALL: [Tier; 6] = [
        Tier::Easy,
        Tier::Normal,
        Tier::Hard,
        Tier::Expert,
        Tier::Master,
        Tier::Append,
    ];

    /// Upper-case display name, as used in the catalog JSON and embeds.
    pub fn name(self) -> &'static str {
        match self {
            Tier::Easy => "EASY",
            Tier::Normal => "NORMAL",
            Tier::Hard => "HARD",
            Tier::Expert => "EXPERT",
            Tier::Master => "MASTER",
            Tier::Append => "APPEND",
        }
    }

    /// The single command letter that selects this tier (`/m26`, `/x`).
    pub fn letter(self) -> char {
        match self {
            Tier::Easy => 'e',
            Tier::Normal => 'n',
            Tier::Hard => 'h',
            Tier::Expert => 'x',
            Tier::Master => 'm',
            Tier::Append => 'a',
        }
    }

    /// Embed color for this tier.
    pub fn color(self) -> u32 {
        match self {
            Tier::Easy => 0x66dd11,
            Tier::Normal => 0x33bbee,
            Tier::Hard => 0xffaa00,
            Tier::Expert => 0xee4466,
            Tier::Master => 0xbb33ee,
            Tier::Append => 0xff7dc9,
        }
    }

    /// Case-insensitive lookup by name (`"master"`, `"Master"`, `"MASTER"`).
    pub fn from_name(name: &str) -> Option<Tier> {
        Tier::ALL
            .into_iter()
            .find(|tier| tier.name().eq_ignore_ascii_case(name))
    }

    /// Lookup by command letter group. Only an exact single known letter
    /// matches; `"xyz"` is not a tier.
    pub fn from_letters(letters: &str) -> Option<Tier> {
        let mut chars = letters.chars();
        let letter = chars.next()?;
        if chars.next().is_some() {
            return None;
        }
        Tier::ALL.into_iter().find(|tier| tier.letter() == letter)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when a string names no known tier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown difficulty tier: {0}")]
pub struct UnknownTier(pub String);

impl FromStr for Tier {
    type Err = UnknownTier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Tier::from_name(s).ok_or_else(|| UnknownTier(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Entry
// ---------------------------------------------------------------------------

/// One playable chart: a song title at a given tier and level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub title: String,
    pub difficulty: Tier,
    pub level: u32,
}

impl Entry {
    pub fn new(title: impl Into<String>, difficulty: Tier, level: u32) -> Self {
        Self {
            title: title.into(),
            difficulty,
            level,
        }
    }
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// An immutable, ordered table of entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    entries: Vec<Entry>,
}

impl Catalog {
    pub fn new(entries: Vec<Entry>) -> Self {
        Self { entries }
    }

    /// Flatten a raw `{ title: { tier: level } }` object into entries.
    ///
    /// Pairs with an unknown tier name or a level that is not a non-negative
    /// JSON integer fitting in `u32` are skipped individually. Titles whose
    /// value is not an object, and empty titles, are skipped entirely.
    pub fn from_raw(raw: &Map<String, Value>) -> Self {
        let entries = raw
            .iter()
            .filter(|(title, _)| !title.is_empty())
            .filter_map(|(title, charts)| charts.as_object().map(|charts| (title, charts)))
            .flat_map(|(title, charts)| {
                charts.iter().filter_map(move |(tier_name, level)| {
                    let tier = Tier::from_name(tier_name)?;
                    let level = level.as_u64().and_then(|l| u32::try_from(l).ok())?;
                    Some(Entry::new(title.clone(), tier, level))
                })
            })
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Entry> {
        self.entries.iter()
    }
}

impl<'a> IntoIterator for &'a Catalog {
    type Item = &'a Entry;
    type IntoIter = std::slice::Iter<'a, Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

// ---------------------------------------------------------------------------
// CatalogStore
// ---------------------------------------------------------------------------

/// One committed state of the store: catalog, revision and commit time
/// always belong together.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub catalog: Arc<Catalog>,
    pub revision: u64,
    pub committed_at: Option<DateTime<Utc>>,
}

/// Holder of the current catalog snapshot.
///
/// Single writer (the refresh scheduler), many readers (command handling).
/// The lock only guards the pointer swap; the catalog itself is never mutated
/// in place.
#[derive(Debug)]
pub struct CatalogStore {
    snapshot: RwLock<Snapshot>,
}

impl Default for CatalogStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CatalogStore {
    /// A store holding an empty catalog at revision 0.
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(Snapshot {
                catalog: Arc::new(Catalog::default()),
                revision: 0,
                committed_at: None,
            }),
        }
    }

    /// The last committed catalog (empty before the first commit).
    pub fn current(&self) -> Arc<Catalog> {
        let snapshot = self.snapshot.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&snapshot.catalog)
    }

    /// Catalog, revision and commit time read under a single lock.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the current catalog. Returns the new revision.
    pub fn commit(&self, catalog: Catalog) -> u64 {
        let catalog = Arc::new(catalog);
        let mut snapshot = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        snapshot.catalog = catalog;
        snapshot.revision += 1;
        snapshot.committed_at = Some(Utc::now());
        snapshot.revision
    }

    /// Number of commits so far.
    pub fn revision(&self) -> u64 {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .revision
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use serde_test::{assert_tokens, Token};
    use static_assertions::assert_impl_all;

    assert_impl_all!(CatalogStore: Send, Sync);
    assert_impl_all!(Catalog: Send, Sync);

    fn raw(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    // -- Tier --------------------------------------------------------------

    #[test]
    fn tier_name_lookup_ignores_case() {
        assert_eq!(Tier::from_name("master"), Some(Tier::Master));
        assert_eq!(Tier::from_name("Expert"), Some(Tier::Expert));
        assert_eq!(Tier::from_name("APPEND"), Some(Tier::Append));
        assert_eq!(Tier::from_name("insane"), None);
        assert_eq!(Tier::from_name(""), None);
    }

    #[test]
    fn tier_letters_map_to_all_six_tiers() {
        let letters: String = Tier::ALL.iter().map(|t| t.letter()).collect();
        assert_eq!(letters, "enhxma");
        for tier in Tier::ALL {
            assert_eq!(Tier::from_letters(&tier.letter().to_string()), Some(tier));
        }
    }

    #[test]
    fn tier_letters_reject_multi_letter_groups() {
        assert_eq!(Tier::from_letters("mm"), None);
        assert_eq!(Tier::from_letters("xyz"), None);
        assert_eq!(Tier::from_letters("z"), None);
        assert_eq!(Tier::from_letters(""), None);
    }

    #[test]
    fn tier_colors_are_distinct() {
        let mut colors: Vec<u32> = Tier::ALL.iter().map(|t| t.color()).collect();
        colors.sort();
        colors.dedup();
        assert_eq!(colors.len(), Tier::ALL.len());
        assert_eq!(Tier::Master.color(), 0xbb33ee);
    }

    #[test]
    fn tier_serializes_as_upper_case_name() {
        assert_tokens(
            &Tier::Expert,
            &[Token::UnitVariant {
                name: "Tier",
                variant: "EXPERT",
            }],
        );
    }

    #[test]
    fn tier_from_str_reports_unknown_name() {
        assert_eq!("hard".parse::<Tier>(), Ok(Tier::Hard));
        assert_eq!(
            "lunatic".parse::<Tier>(),
            Err(UnknownTier("lunatic".to_string()))
        );
    }

    // -- Catalog::from_raw -------------------------------------------------

    #[test]
    fn from_raw_flattens_titles_and_tiers() {
        let catalog = Catalog::from_raw(&raw(json!({
            "Tell Your World": { "easy": 5, "normal": 10, "hard": 16, "expert": 22, "master": 26 },
        })));
        assert_eq!(catalog.len(), 5);
        assert!(catalog
            .iter()
            .all(|e| e.title == "Tell Your World"));
        assert!(catalog
            .iter()
            .any(|e| e.difficulty == Tier::Master && e.level == 26));
    }

    #[test]
    fn from_raw_matches_tier_names_case_insensitively() {
        let catalog = Catalog::from_raw(&raw(json!({
            "Song": { "MASTER": 30, "Append": 31 },
        })));
        let mut tiers: Vec<Tier> = catalog.iter().map(|e| e.difficulty).collect();
        tiers.sort();
        assert_eq!(tiers, vec![Tier::Master, Tier::Append]);
    }

    #[test]
    fn from_raw_skips_invalid_pairs_individually() {
        let catalog = Catalog::from_raw(&raw(json!({
            "Song": {
                "master": 28,
                "lunatic": 40,
                "expert": "24",
                "hard": 17.5,
                "normal": true,
                "easy": -3,
                "append": null,
            },
        })));
        assert_eq!(catalog.entries(), &[Entry::new("Song", Tier::Master, 28)]);
    }

    #[test]
    fn from_raw_skips_non_object_titles_and_empty_titles() {
        let catalog = Catalog::from_raw(&raw(json!({
            "": { "master": 20 },
            "Broken": 12,
            "Listed": [1, 2, 3],
            "Good": { "hard": 14 },
        })));
        assert_eq!(catalog.entries(), &[Entry::new("Good", Tier::Hard, 14)]);
    }

    #[test]
    fn from_raw_rejects_levels_beyond_u32() {
        let catalog = Catalog::from_raw(&raw(json!({
            "Huge": { "master": 5_000_000_000u64, "expert": 4_294_967_295u64 },
        })));
        assert_eq!(catalog.entries(), &[Entry::new("Huge", Tier::Expert, u32::MAX)]);
    }

    #[test]
    fn from_raw_of_empty_object_is_empty() {
        assert!(Catalog::from_raw(&Map::new()).is_empty());
    }

    // -- CatalogStore ------------------------------------------------------

    #[test]
    fn store_starts_empty_at_revision_zero() {
        let store = CatalogStore::new();
        assert!(store.current().is_empty());
        assert_eq!(store.revision(), 0);
        assert!(store.snapshot().committed_at.is_none());
    }

    #[test]
    fn commit_replaces_snapshot_and_bumps_revision() {
        let store = CatalogStore::new();
        let rev = store.commit(Catalog::new(vec![Entry::new("A", Tier::Easy, 3)]));
        assert_eq!(rev, 1);
        assert_eq!(store.current().len(), 1);
        assert!(store.snapshot().committed_at.is_some());

        let rev = store.commit(Catalog::new(vec![
            Entry::new("B", Tier::Hard, 15),
            Entry::new("C", Tier::Hard, 16),
        ]));
        assert_eq!(rev, 2);
        assert_eq!(store.current().len(), 2);
    }

    #[test]
    fn held_snapshot_survives_a_commit() {
        let store = CatalogStore::new();
        store.commit(Catalog::new(vec![Entry::new("Old", Tier::Easy, 1)]));
        let held = store.current();
        store.commit(Catalog::new(vec![Entry::new("New", Tier::Easy, 2)]));
        assert_eq!(held.entries()[0].title, "Old");
        assert_eq!(store.current().entries()[0].title, "New");
    }

    #[test]
    fn snapshot_fields_belong_to_one_commit() {
        let store = Arc::new(CatalogStore::new());
        let empty = store.snapshot();
        assert_eq!(empty.revision, 0);
        assert!(empty.committed_at.is_none());
        assert!(empty.catalog.is_empty());

        // Revision n always holds a catalog of n entries.
        let writer = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for n in 1..=300u32 {
                    let entries = (0..n).map(|i| Entry::new("S", Tier::Hard, i)).collect();
                    assert_eq!(store.commit(Catalog::new(entries)), u64::from(n));
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..2_000 {
                        let snapshot = store.snapshot();
                        assert_eq!(snapshot.catalog.len() as u64, snapshot.revision);
                        assert_eq!(snapshot.committed_at.is_some(), snapshot.revision > 0);
                    }
                })
            })
            .collect();

        writer.join().expect("writer panicked");
        for reader in readers {
            reader.join().expect("reader saw a torn snapshot");
        }
    }

    #[test]
    fn concurrent_readers_see_whole_catalogs_only() {
        let store = Arc::new(CatalogStore::new());
        let size_a = 10;
        let size_b = 25;
        let catalog_of = |title: &str, n: usize| {
            Catalog::new((0..n).map(|i| Entry::new(title, Tier::Master, i as u32)).collect())
        };
        store.commit(catalog_of("A", size_a));

        let writer = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for i in 0..500 {
                    if i % 2 == 0 {
                        store.commit(catalog_of("B", size_b));
                    } else {
                        store.commit(catalog_of("A", size_a));
                    }
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..2_000 {
                        let catalog = store.current();
                        let first = catalog.entries()[0].title.clone();
                        let expected = if first == "A" { size_a } else { size_b };
                        assert_eq!(catalog.len(), expected);
                        assert!(catalog.iter().all(|e| e.title == first));
                    }
                })
            })
            .collect();

        writer.join().expect("writer panicked");
        for reader in readers {
            reader.join().expect("reader observed a mixed catalog");
        }
    }
}
