//! Result de-duplication.
//!
//! Two passes. The first collapses results sharing a place name or a
//! unique address id; the second collapses results with the same house
//! number and text less than 5 km apart. Within a collision exact points
//! beat omitted and interpolated ones, and a street fallback never replaces
//! an address. Survivors are re-sorted by relevance.

use std::collections::BTreeMap;

use waymark_geocoder_models::output::Feature;
use waymark_spatial::proximity::distance_km;

/// Distance under which two results with the same address are one.
const SAME_ADDRESS_KM: f64 = 5.0;

/// A formatted result with its dedupe key beyond the place name.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// The result.
    pub feature: Feature,
    /// Matched texts plus named parents, for address results.
    pub address_id: Option<String>,
}

/// Whether `challenger` should take the slot of `incumbent`.
fn replaces(incumbent: &Feature, challenger: &Feature) -> bool {
    (incumbent.geometry.omitted && !challenger.geometry.omitted)
        || (incumbent.geometry.interpolated && !challenger.geometry.interpolated)
}

fn by_key(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut kept: Vec<Candidate> = Vec::with_capacity(candidates.len());
    let mut slots: BTreeMap<String, usize> = BTreeMap::new();
    for candidate in candidates {
        let keys: Vec<String> = std::iter::once(candidate.feature.place_name.clone())
            .chain(candidate.address_id.clone())
            .collect();
        let Some(slot) = keys.iter().find_map(|k| slots.get(k).copied()) else {
            for key in keys {
                slots.insert(key, kept.len());
            }
            kept.push(candidate);
            continue;
        };

        let incumbent = &kept[slot].feature;
        if incumbent.address.is_some() && candidate.feature.address.is_none() {
            log::trace!("dedupe: street fallback {} dropped", candidate.feature.id);
            continue;
        }
        if replaces(incumbent, &candidate.feature) {
            for key in keys {
                slots.entry(key).or_insert(slot);
            }
            kept[slot] = candidate;
        } else {
            log::trace!("dedupe: {} dropped", candidate.feature.id);
        }
    }
    kept
}

fn by_address(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut kept: Vec<Candidate> = Vec::with_capacity(candidates.len());
    let mut slots: BTreeMap<String, usize> = BTreeMap::new();
    for candidate in candidates {
        let Some(address) = &candidate.feature.address else {
            kept.push(candidate);
            continue;
        };
        let key = format!("{address} {}", candidate.feature.text.to_lowercase());
        let near = slots.get(&key).copied().filter(|slot| {
            distance_km(kept[*slot].feature.center, candidate.feature.center) < SAME_ADDRESS_KM
        });
        match near {
            Some(slot) if replaces(&kept[slot].feature, &candidate.feature) => kept[slot] = candidate,
            Some(_) => log::trace!("dedupe: {} dropped as a nearby address", candidate.feature.id),
            None => {
                slots.insert(key, kept.len());
                kept.push(candidate);
            }
        }
    }
    kept
}

/// Removes duplicate results, keeping the best of each collision, and
/// sorts the rest by relevance.
#[must_use]
pub fn dedupe(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let before = candidates.len();
    let mut kept = by_address(by_key(candidates));
    kept.sort_by(|a, b| b.feature.relevance.total_cmp(&a.feature.relevance));
    log::debug!("dedupe: kept {} of {before}", kept.len());
    kept
}
