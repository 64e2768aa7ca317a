//! Grid coalescing.
//!
//! Turns one stack of phrasematches into spatial matches: features of the
//! most specific member whose grid cells fall inside a cell of every other
//! member. Each member of a match contributes one [`Cover`].

use std::collections::BTreeMap;

use waymark_geocoder_models::constants::{COALESCE_RESULT_LIMIT, LANGUAGE_MISMATCH_PENALTY};
use waymark_geocoder_models::{TokenMask, ValidatedOptions, tmpid};
use waymark_spatial::mercator::{bbox_to_tile_range, tile_to_lon_lat};
use waymark_spatial::proximity::{distance_miles, scoredist};
use waymark_text::termops::decode_3bit_log_scale;

use crate::error::SourceError;
use crate::index::IndexSet;
use crate::phrasematch::Phrasematch;
use crate::source::GridEntry;

/// One member's part in a spatial match.
#[derive(Debug, Clone, PartialEq)]
pub struct Cover {
    /// Grid column at `zoom`.
    pub x: u32,
    /// Grid row at `zoom`.
    pub y: u32,
    /// Weighted relevance of this member.
    pub relev: f64,
    /// Feature id.
    pub id: u64,
    /// Ordinal of the index.
    pub idx: usize,
    /// Request-unique feature id.
    pub tmpid: u64,
    /// Miles from the proximity point to the cell center.
    pub distance: f64,
    /// Decoded feature score.
    pub score: f64,
    /// Score blended with proximity, or the score without one.
    pub scoredist: f64,
    /// Highest score of the index.
    pub scorefactor: f64,
    /// Whether the phrase was in the requested language.
    pub matches_language: bool,
    /// Whether the phrase ended in a prefix.
    pub prefix: bool,
    /// Query tokens covered.
    pub mask: TokenMask,
    /// The indexed phrase matched.
    pub text: String,
    /// Grid zoom.
    pub zoom: u8,
    /// Whether the phrase is a category.
    pub cat_match: bool,
}

/// A set of covers that fit together spatially, most specific first.
#[derive(Debug, Clone, PartialEq)]
pub struct Spatialmatch {
    /// Sum of cover relevances.
    pub relev: f64,
    /// One cover per stack member.
    pub covers: Vec<Cover>,
    /// Whether the match is a speculative house number prefix.
    pub partial_number: bool,
}

impl Spatialmatch {
    /// The cover of the matched feature itself.
    ///
    /// # Panics
    ///
    /// Never: spatial matches are only built with at least one cover.
    #[must_use]
    pub fn feature_cover(&self) -> &Cover {
        &self.covers[0]
    }
}

struct Scoring<'a> {
    options: &'a ValidatedOptions,
    min_score: f64,
    max_score: f64,
}

impl Scoring<'_> {
    fn cover(&self, pm: &Phrasematch, entry: &GridEntry) -> Cover {
        let center = tile_to_lon_lat(f64::from(entry.x) + 0.5, f64::from(entry.y) + 0.5, pm.zoom);
        let distance = self
            .options
            .proximity
            .map_or(0.0, |p| distance_miles(p, center));
        let score = decode_3bit_log_scale(entry.score, pm.scorefactor);
        let scoredist = if self.options.proximity.is_some() {
            scoredist(score, self.min_score, self.max_score, distance, pm.zoom)
        } else {
            score
        };
        let mut relev = entry.relev * pm.weight;
        if !entry.matches_language {
            relev *= LANGUAGE_MISMATCH_PENALTY;
        }
        Cover {
            x: entry.x,
            y: entry.y,
            relev,
            id: entry.id,
            idx: pm.idx,
            tmpid: tmpid(pm.idx, entry.id),
            distance,
            score,
            scoredist,
            scorefactor: pm.scorefactor,
            matches_language: entry.matches_language,
            prefix: pm.prefix,
            mask: pm.mask,
            text: pm.phrase.clone(),
            zoom: pm.zoom,
            cat_match: pm.cat_match,
        }
    }
}

/// Best entry of a member per grid cell.
fn best_by_cell(entries: Vec<GridEntry>) -> BTreeMap<(u32, u32), GridEntry> {
    let mut cells: BTreeMap<(u32, u32), GridEntry> = BTreeMap::new();
    for entry in entries {
        match cells.get(&(entry.x, entry.y)) {
            Some(current)
                if (current.relev, current.score, std::cmp::Reverse(current.id))
                    >= (entry.relev, entry.score, std::cmp::Reverse(entry.id)) => {}
            _ => {
                cells.insert((entry.x, entry.y), entry);
            }
        }
    }
    cells
}

/// Ranks matches best first: relevance, categories, scoredist, then ids.
pub fn sort_spatialmatches(matches: &mut [Spatialmatch]) {
    matches.sort_by(|a, b| {
        let (ca, cb) = (a.feature_cover(), b.feature_cover());
        b.relev
            .total_cmp(&a.relev)
            .then(cb.cat_match.cmp(&ca.cat_match))
            .then(cb.scoredist.total_cmp(&ca.scoredist))
            .then(ca.idx.cmp(&cb.idx))
            .then(ca.id.cmp(&cb.id))
    });
}

/// Coalesces one stack, sorted least specific first, into at most
/// [`COALESCE_RESULT_LIMIT`] spatial matches, one per feature.
///
/// # Errors
///
/// Returns the first grid lookup error.
pub fn coalesce(
    indexes: &IndexSet,
    stack: &[Phrasematch],
    options: &ValidatedOptions,
) -> Result<Vec<Spatialmatch>, SourceError> {
    let Some((feature_pm, parents)) = stack.split_last() else {
        return Ok(Vec::new());
    };
    let grids = |pm: &Phrasematch| -> Result<Vec<GridEntry>, SourceError> {
        let Some(index) = indexes.get(pm.idx) else {
            return Ok(Vec::new());
        };
        index.source.grids.grids(&pm.phrase, pm.scan_prefix, &pm.language)
    };

    let scoring = Scoring {
        options,
        min_score: indexes.min_score(),
        max_score: indexes.max_score(),
    };
    let parent_cells = parents
        .iter()
        .map(|pm| grids(pm).map(best_by_cell))
        .collect::<Result<Vec<_>, _>>()?;
    let range = options.bbox.map(|b| bbox_to_tile_range(&b, feature_pm.zoom));

    let mut matches = Vec::new();
    'entries: for entry in grids(feature_pm)? {
        if range.is_some_and(|r| !r.contains(entry.x, entry.y)) {
            continue;
        }
        let mut covers = vec![scoring.cover(feature_pm, &entry)];
        for (pm, cells) in parents.iter().zip(&parent_cells).rev() {
            let shift = feature_pm.zoom.saturating_sub(pm.zoom);
            let Some(parent) = cells.get(&(entry.x >> shift, entry.y >> shift)) else {
                continue 'entries;
            };
            covers.push(scoring.cover(pm, parent));
        }
        matches.push(Spatialmatch {
            relev: covers.iter().map(|c| c.relev).sum(),
            covers,
            partial_number: feature_pm.partial_number,
        });
    }

    sort_spatialmatches(&mut matches);
    let mut seen = std::collections::BTreeSet::new();
    matches.retain(|m| seen.insert(m.feature_cover().tmpid));
    matches.truncate(COALESCE_RESULT_LIMIT);
    Ok(matches)
}

#[cfg(test)]
mod tests {
    use waymark_text::tokenize;

    use super::*;
    use crate::config::IndexConfig;
    use crate::phrasematch::phrasematch;
    use crate::testing::{area, feature, index_set};

    fn find(set: &IndexSet, idx: usize, query: &str, phrase: &str) -> Phrasematch {
        let result = phrasematch(set.get(idx).unwrap(), &tokenize(query), &ValidatedOptions::default()).unwrap();
        result
            .phrasematches
            .into_iter()
            .find(|p| p.phrase == phrase)
            .unwrap()
    }

    fn regions_and_places() -> IndexSet {
        index_set(vec![
            (
                IndexConfig::new("region", 6),
                vec![
                    area(1, "Georgia", [-85.0, 31.0, -81.0, 35.0]),
                    area(2, "Vermont", [-73.4, 42.7, -71.5, 45.0]),
                ],
            ),
            (
                IndexConfig::new("place", 12),
                vec![
                    feature(1, "Springfield", [-83.0, 33.0]),
                    feature(2, "Springfield", [-72.5, 43.3]),
                ],
            ),
        ])
    }

    #[test]
    fn single_member_stacks_weight_every_entry() {
        let set = regions_and_places();
        let mut pm = find(&set, 1, "springfield", "springfield");
        pm.weight = 0.5;
        let matches = coalesce(&set, &[pm], &ValidatedOptions::default()).unwrap();
        assert_eq!(matches.len(), 2);
        assert!(matches.iter().all(|m| (m.relev - 0.5).abs() < f64::EPSILON));
        assert_eq!(matches[0].covers.len(), 1);
    }

    #[test]
    fn parents_must_contain_the_feature() {
        let set = regions_and_places();
        let mut region = find(&set, 0, "springfield vermont", "vermont");
        let mut place = find(&set, 1, "springfield vermont", "springfield");
        region.weight = 0.5;
        place.weight = 0.5;
        let matches = coalesce(&set, &[region, place], &ValidatedOptions::default()).unwrap();

        assert_eq!(matches.len(), 1);
        let only = &matches[0];
        assert_eq!(only.covers[0].idx, 1);
        assert_eq!(only.covers[0].id, 2);
        assert_eq!(only.covers[1].idx, 0);
        assert_eq!(only.covers[1].id, 2);
        assert!((only.relev - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn proximity_ranks_nearer_cells_first() {
        let set = regions_and_places();
        let pm = find(&set, 1, "springfield", "springfield");
        let near_vermont = ValidatedOptions {
            proximity: Some([-72.5, 43.3]),
            ..ValidatedOptions::default()
        };
        let matches = coalesce(&set, &[pm.clone()], &near_vermont).unwrap();
        assert_eq!(matches[0].covers[0].id, 2);
        assert!(matches[0].covers[0].distance < matches[1].covers[0].distance);

        let near_georgia = ValidatedOptions {
            proximity: Some([-83.0, 33.0]),
            ..ValidatedOptions::default()
        };
        let matches = coalesce(&set, &[pm], &near_georgia).unwrap();
        assert_eq!(matches[0].covers[0].id, 1);
    }

    #[test]
    fn bbox_drops_cells_outside() {
        let set = regions_and_places();
        let pm = find(&set, 1, "springfield", "springfield");
        let options = ValidatedOptions {
            bbox: Some([-74.0, 42.0, -71.0, 45.0]),
            ..ValidatedOptions::default()
        };
        let matches = coalesce(&set, &[pm], &options).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].covers[0].id, 2);
    }

    #[test]
    fn language_mismatch_is_penalized() {
        let mut config = IndexConfig::new("country", 6);
        config.languages = vec!["es".into()];
        let mut us = area(1, "United States", [-125.0, 24.0, -66.0, 49.0]);
        us.properties
            .localized_text
            .insert("es".into(), "Estados Unidos".into());
        let set = index_set(vec![(config, vec![us])]);
        let spanish = ValidatedOptions {
            languages: vec!["es".into()],
            ..ValidatedOptions::default()
        };

        let result = phrasematch(set.get(0).unwrap(), &tokenize("united states"), &spanish).unwrap();
        let pm = result
            .phrasematches
            .into_iter()
            .find(|p| p.phrase == "united states")
            .unwrap();
        let matches = coalesce(&set, &[pm], &spanish).unwrap();
        assert!(!matches[0].covers[0].matches_language);
        assert!((matches[0].relev - LANGUAGE_MISMATCH_PENALTY).abs() < 1e-9);
    }
}
