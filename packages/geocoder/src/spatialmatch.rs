//! Stack assembly.
//!
//! Combines the phrasematches of every index into stacks (at most one
//! phrasematch per index, no two covering the same query token), ranks
//! and rebalances them, then coalesces each stack into spatial matches.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use waymark_geocoder_models::constants::{SPATIALMATCH_STACK_LIMIT, STACKABLE_LIMIT};
use waymark_geocoder_models::mask;
use waymark_geocoder_models::{TokenMask, ValidatedOptions};

use crate::coalesce::{Cover, Spatialmatch, coalesce};
use crate::error::GeocodeError;
use crate::index::IndexSet;
use crate::phrasematch::{Phrasematch, PhrasematchResult};

/// Stacks below this relevance are not kept.
const MIN_STACK_RELEV: f64 = 0.5;

/// Phrasematches from distinct indexes that may be geocoded together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stack {
    /// Members.
    pub members: Vec<Phrasematch>,
    /// Summed member weight.
    pub relev: f64,
}

impl Stack {
    /// Ordinals of the member indexes.
    #[must_use]
    pub fn idxs(&self) -> Vec<usize> {
        self.members.iter().map(|m| m.idx).collect()
    }

    /// Union of member masks.
    #[must_use]
    pub fn mask(&self) -> TokenMask {
        self.members.iter().fold(0, |acc, m| acc | m.mask)
    }
}

/// Spatial matches of a query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpatialmatchResult {
    /// Matches, best first, at most one per feature and direction.
    pub results: Vec<Spatialmatch>,
    /// Best cover seen per feature, keyed by tmpid.
    pub sets: BTreeMap<u64, Cover>,
    /// Member ordinals of stacks that matched nothing.
    pub waste: Vec<Vec<usize>>,
}

#[derive(Default)]
struct Memo {
    stacks: Vec<Stack>,
    max_stacks: Vec<Stack>,
    max_relev: f64,
}

impl Memo {
    fn offer(&mut self, stack: &Stack) {
        if stack.relev <= MIN_STACK_RELEV {
            return;
        }
        #[allow(clippy::float_cmp)]
        if stack.relev > self.max_relev {
            if self.max_stacks.len() >= STACKABLE_LIMIT {
                self.stacks = std::mem::replace(&mut self.max_stacks, vec![stack.clone()]);
            } else {
                self.max_stacks.push(stack.clone());
            }
            self.max_relev = stack.relev;
        } else if stack.relev == self.max_relev {
            self.max_stacks.push(stack.clone());
        } else if self.max_stacks.len() < STACKABLE_LIMIT {
            self.stacks.push(stack.clone());
        }
    }
}

fn stack_level(
    results: &[PhrasematchResult],
    memo: &mut Memo,
    level: usize,
    mask: TokenMask,
    nmask: u64,
    stack: &Stack,
) {
    if level + 1 < results.len() {
        stack_level(results, memo, level + 1, mask, nmask, stack);
    }

    let result = &results[level];
    if stack.members.iter().any(|m| result.bmask.contains(&m.idx)) {
        return;
    }

    for next in &result.phrasematches {
        if mask::overlaps(mask, next.mask) || nmask & result.nmask != 0 {
            continue;
        }
        // Members must read in the same direction as the index order.
        if stack
            .members
            .first()
            .is_some_and(|first| first.idx >= next.idx && mask != 0 && mask < next.mask)
        {
            continue;
        }

        let mut target = stack.clone();
        target.relev = stack.relev + next.weight;
        if next.mask < mask {
            target.members.insert(0, next.clone());
        } else {
            target.members.push(next.clone());
        }
        memo.offer(&target);

        if level + 1 < results.len() {
            stack_level(results, memo, level + 1, mask | next.mask, nmask | result.nmask, &target);
        }
    }
}

/// Every stack worth coalescing, ordered as found.
///
/// `results` must be in index order. A pruned search: once
/// [`STACKABLE_LIMIT`] stacks share the best relevance, weaker ones are
/// no longer kept.
#[must_use]
pub fn stackable(results: &[PhrasematchResult]) -> Vec<Stack> {
    if results.is_empty() {
        return Vec::new();
    }
    let mut memo = Memo::default();
    stack_level(results, &mut memo, 0, 0, 0, &Stack::default());
    memo.stacks.extend(memo.max_stacks);
    memo.stacks
}

/// Keeps stacks whose most specific index is in `allowed_idx`.
#[must_use]
pub fn allowed(stacks: Vec<Stack>, allowed_idx: Option<&BTreeSet<usize>>) -> Vec<Stack> {
    let Some(allowed_idx) = allowed_idx else {
        return stacks;
    };
    stacks
        .into_iter()
        .filter(|s| {
            s.members
                .iter()
                .map(|m| m.idx)
                .max()
                .is_some_and(|idx| allowed_idx.contains(&idx))
        })
        .collect()
}

/// Orders stack members least specific first.
pub fn sort_by_zoom_idx(members: &mut [Phrasematch]) {
    members.sort_by(|a, b| {
        a.zoom
            .cmp(&b.zoom)
            .then(a.idx.cmp(&b.idx))
            .then(b.mask.cmp(&a.mask))
    });
}

/// Orders stacks by relevance, then fewer members, then the score factor
/// of the most specific member, then member ordinals from the end.
pub fn sort_by_relev_length_idx(stacks: &mut [Stack]) {
    stacks.sort_by(|a, b| {
        let last_factor = |s: &Stack| s.members.last().map_or(0.0, |m| m.scorefactor);
        b.relev
            .total_cmp(&a.relev)
            .then(a.members.len().cmp(&b.members.len()))
            .then(last_factor(b).total_cmp(&last_factor(a)))
            .then_with(|| {
                a.members
                    .iter()
                    .rev()
                    .map(|m| m.idx)
                    .cmp(b.members.iter().rev().map(|m| m.idx))
            })
    });
}

/// Reweights a stack against the full query.
///
/// Each member gets an equal share of the query, one share going to
/// unmatched tokens if any are left over, scaled by its edit multiplier.
#[must_use]
pub fn rebalance(query_len: usize, stack: &Stack) -> Stack {
    let covered = mask::count(stack.mask()) as usize;
    let garbage = usize::from(covered != query_len);
    #[allow(clippy::cast_precision_loss)]
    let share = 1.0 / (garbage + stack.members.len()) as f64;

    let members: Vec<Phrasematch> = stack
        .members
        .iter()
        .map(|m| Phrasematch {
            weight: m.edit_multiplier * share,
            ..m.clone()
        })
        .collect();
    Stack {
        relev: members.iter().map(|m| m.weight).sum(),
        members,
    }
}

/// Keeps one match per feature and direction and records the best cover
/// of every feature.
fn finalize(mut combined: Vec<Spatialmatch>, waste: Vec<Vec<usize>>) -> SpatialmatchResult {
    combined.sort_by(|a, b| {
        b.relev
            .total_cmp(&a.relev)
            .then(b.covers[0].scoredist.total_cmp(&a.covers[0].scoredist))
            .then(a.covers[0].idx.cmp(&b.covers[0].idx))
    });

    let mut sets: BTreeMap<u64, Cover> = BTreeMap::new();
    let mut ascending = BTreeSet::new();
    let mut descending = BTreeSet::new();
    let mut single = BTreeSet::new();
    let mut results = Vec::new();

    for spatialmatch in combined {
        for cover in &spatialmatch.covers {
            if sets.get(&cover.tmpid).is_none_or(|best| best.relev < cover.relev) {
                sets.insert(cover.tmpid, cover.clone());
            }
        }
        let covers = &spatialmatch.covers;
        let tmpid = covers[0].tmpid;
        let keep = match covers.get(1) {
            Some(next) if covers[0].idx > next.idx => descending.insert(tmpid),
            Some(next) if covers[0].idx < next.idx => ascending.insert(tmpid),
            Some(_) => false,
            None => {
                !ascending.contains(&tmpid)
                    && !descending.contains(&tmpid)
                    && single.insert(tmpid)
            }
        };
        if keep {
            results.push(spatialmatch);
        }
    }

    SpatialmatchResult {
        results,
        sets,
        waste,
    }
}

/// Assembles, ranks and coalesces stacks from per-index phrasematches.
///
/// Stacks are coalesced concurrently on the blocking pool.
///
/// # Errors
///
/// Returns the first grid lookup error, or [`GeocodeError::Join`] if a
/// coalesce task fails.
pub async fn spatialmatch(
    indexes: Arc<IndexSet>,
    query_len: usize,
    results: &[PhrasematchResult],
    options: &ValidatedOptions,
    allowed_idx: Option<&BTreeSet<usize>>,
) -> Result<SpatialmatchResult, GeocodeError> {
    let mut stacks = allowed(stackable(results), allowed_idx);
    for stack in &mut stacks {
        sort_by_zoom_idx(&mut stack.members);
    }
    sort_by_relev_length_idx(&mut stacks);
    stacks.truncate(SPATIALMATCH_STACK_LIMIT);
    let stacks: Vec<Stack> = stacks.iter().map(|s| rebalance(query_len, s)).collect();

    log::debug!("Coalescing {} stacks", stacks.len());

    let tasks = stacks.iter().map(|stack| {
        let indexes = indexes.clone();
        let members = stack.members.clone();
        let options = options.clone();
        tokio::task::spawn_blocking(move || coalesce(&indexes, &members, &options))
    });
    let coalesced = futures::future::try_join_all(tasks).await?;

    let mut combined = Vec::new();
    let mut waste = Vec::new();
    for (stack, matches) in stacks.iter().zip(coalesced) {
        let matches = matches?;
        if matches.is_empty() {
            waste.push(stack.idxs());
        }
        combined.extend(matches);
    }

    Ok(finalize(combined, waste))
}

#[cfg(test)]
mod tests {
    use waymark_text::tokenize;

    use super::*;
    use crate::config::IndexConfig;
    use crate::phrasematch::phrasematch;
    use crate::testing::{area, feature, index_set};

    fn pm(idx: usize, mask: TokenMask, weight: f64) -> Phrasematch {
        Phrasematch {
            subquery: Vec::new(),
            phrase: format!("{idx}-{mask}"),
            weight,
            mask,
            edit_multiplier: 1.0,
            scorefactor: 1.0,
            idx,
            zoom: 6,
            prefix: false,
            scan_prefix: false,
            cat_match: false,
            partial_number: false,
            language: "default".into(),
        }
    }

    fn result(idx: usize, phrasematches: Vec<Phrasematch>) -> PhrasematchResult {
        PhrasematchResult {
            phrasematches,
            idx,
            nmask: 1 << idx,
            bmask: BTreeSet::new(),
        }
    }

    fn masks(stacks: &[Stack]) -> BTreeSet<Vec<(usize, TokenMask)>> {
        stacks
            .iter()
            .map(|s| s.members.iter().map(|m| (m.idx, m.mask)).collect())
            .collect()
    }

    #[test]
    fn stacks_never_share_tokens() {
        let results = vec![
            result(0, vec![pm(0, 0b01, 0.5), pm(0, 0b11, 1.0)]),
            result(1, vec![pm(1, 0b10, 0.5)]),
        ];
        let stacks = stackable(&results);
        let found = masks(&stacks);
        assert!(found.contains(&vec![(0, 0b11)]));
        assert!(found.contains(&vec![(0, 0b01), (1, 0b10)]));
        assert!(!found.iter().any(|s| s.contains(&(0, 0b11)) && s.len() > 1));
        // Half-query single matches are not worth a stack.
        assert!(!found.contains(&vec![(1, 0b10)]));
    }

    #[test]
    fn stacks_follow_index_direction() {
        // "place region" reads low to high; "region place" reversed.
        let results = vec![
            result(0, vec![pm(0, 0b10, 0.5), pm(0, 0b01, 0.5)]),
            result(1, vec![pm(1, 0b01, 0.5), pm(1, 0b10, 0.5)]),
        ];
        let found = masks(&stackable(&results));
        assert!(found.contains(&vec![(1, 0b01), (0, 0b10)]));
        assert!(found.contains(&vec![(0, 0b01), (1, 0b10)]));
    }

    #[test]
    fn exclusive_stacks_and_names_do_not_combine() {
        let mut excluded = result(1, vec![pm(1, 0b10, 0.5)]);
        excluded.bmask.insert(0);
        let results = vec![result(0, vec![pm(0, 0b01, 0.6)]), excluded];
        assert_eq!(masks(&stackable(&results)), BTreeSet::from([vec![(0, 0b01)]]));

        let mut same_name = result(1, vec![pm(1, 0b10, 0.5)]);
        same_name.nmask = 1;
        let results = vec![result(0, vec![pm(0, 0b01, 0.6)]), same_name];
        assert_eq!(masks(&stackable(&results)), BTreeSet::from([vec![(0, 0b01)]]));
    }

    #[test]
    fn allowed_checks_the_most_specific_member() {
        let stacks = vec![
            Stack {
                members: vec![pm(0, 0b01, 0.5), pm(2, 0b10, 0.5)],
                relev: 1.0,
            },
            Stack {
                members: vec![pm(1, 0b11, 1.0)],
                relev: 1.0,
            },
        ];
        let only_two = BTreeSet::from([2]);
        let kept = allowed(stacks.clone(), Some(&only_two));
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].idxs(), vec![0, 2]);
        assert_eq!(allowed(stacks, None).len(), 2);
    }

    #[test]
    fn rebalance_charges_unmatched_tokens() {
        let full = Stack {
            members: vec![pm(0, 0b001, 0.3), pm(1, 0b110, 0.6)],
            relev: 0.9,
        };
        let balanced = rebalance(3, &full);
        assert!((balanced.relev - 1.0).abs() < 1e-9);
        assert!(balanced.members.iter().all(|m| (m.weight - 0.5).abs() < 1e-9));

        let gappy = rebalance(4, &full);
        assert!((gappy.relev - 2.0 / 3.0).abs() < 1e-9);

        let mut corrected = full;
        corrected.members[1].edit_multiplier = 0.9;
        let balanced = rebalance(3, &corrected);
        assert!((balanced.relev - 0.95).abs() < 1e-9);
    }

    #[test]
    fn more_coverage_ranks_higher() {
        let one = Stack {
            members: vec![pm(0, 0b01, 0.5)],
            relev: 0.5,
        };
        let two = Stack {
            members: vec![pm(0, 0b01, 0.5), pm(1, 0b10, 0.5)],
            relev: 1.0,
        };
        let mut stacks = vec![rebalance(2, &one), rebalance(2, &two)];
        sort_by_relev_length_idx(&mut stacks);
        assert_eq!(stacks[0].members.len(), 2);
        assert!(stacks[0].relev >= stacks[1].relev);
    }

    #[test]
    fn members_sort_least_specific_first() {
        let mut a = pm(2, 0b01, 0.5);
        a.zoom = 14;
        let mut b = pm(0, 0b10, 0.5);
        b.zoom = 6;
        let mut members = vec![a, b];
        sort_by_zoom_idx(&mut members);
        assert_eq!(members.iter().map(|m| m.idx).collect::<Vec<_>>(), vec![0, 2]);
    }

    #[tokio::test]
    async fn coalesces_and_reports_waste() {
        let set = Arc::new(index_set(vec![
            (
                IndexConfig::new("region", 6),
                vec![area(1, "Vermont", [-73.4, 42.7, -71.5, 45.0])],
            ),
            (
                IndexConfig::new("place", 12),
                vec![
                    feature(1, "Springfield", [-72.5, 43.3]),
                    feature(2, "Georgia", [-83.0, 33.0]),
                ],
            ),
        ]));
        let options = ValidatedOptions::default();
        let query = tokenize("springfield vermont");
        let results: Vec<PhrasematchResult> = set
            .iter()
            .map(|index| phrasematch(index, &query, &options).unwrap())
            .collect();

        let matched = spatialmatch(set.clone(), query.len(), &results, &options, None)
            .await
            .unwrap();
        let best = &matched.results[0];
        assert!((best.relev - 1.0).abs() < 1e-9);
        assert_eq!(best.covers.len(), 2);
        assert_eq!(best.covers[0].idx, 1);
        assert!(matched.sets.contains_key(&best.covers[0].tmpid));
        assert!(matched.sets.contains_key(&best.covers[1].tmpid));

        let query = tokenize("georgia vermont");
        let results: Vec<PhrasematchResult> = set
            .iter()
            .map(|index| phrasematch(index, &query, &options).unwrap())
            .collect();
        let matched = spatialmatch(set, query.len(), &results, &options, None)
            .await
            .unwrap();
        assert!(matched.waste.contains(&vec![0, 1]));
        assert!(matched.results.iter().all(|m| m.covers.len() == 1));
    }
}
