//! Market-identity matcher (C3): manual map first, then a two-stage automatic
//! tier (inverted-index candidate generation + weighted similarity subject to
//! hard constraints). The single most delicate component in the scanner —
//! a naive title comparator produces overwhelming false positives in this
//! domain.

use std::collections::{HashMap, HashSet};

use crate::keyword::{self, Keywords};
use crate::model::{ManualMapping, MarketSnapshot, MatchPair};
use crate::venue::Venue;

/// "Exit" / "stay" lexical polarity sets for the directional-reversal hard constraint.
const EXIT_WORDS: &[&str] = &[
    "out", "leave", "resign", "removed", "fired", "ousted", "impeach", "depart", "step", "quit",
];
const STAY_WORDS: &[&str] = &[
    "remain", "stay", "continue", "retain", "keep", "hold", "serve", "reelect", "win",
];

/// Any token whose posting list covers more than this fraction of B-side
/// markets is pruned from the inverted index (floor of 10 listed below).
const PRUNE_FRACTION: f64 = 0.20;
const PRUNE_FLOOR: usize = 10;

/// Below this running score after the cheap set-based components, skip the
/// expensive longest-common-subsequence step.
const EARLY_EXIT_THRESHOLD: f64 = 0.15;

/// Per-venue-pair minimum automatic-match score; configuration, not a constant
/// (see design notes on the source's inconsistent thresholds).
pub fn default_min_similarity() -> f64 {
    0.40
}

struct Indexed<'a> {
    snapshot: &'a MarketSnapshot,
    keywords: Keywords,
}

fn index_catalog(catalog: &[MarketSnapshot]) -> Vec<Indexed<'_>> {
    catalog
        .iter()
        .map(|s| Indexed {
            snapshot: s,
            keywords: keyword::extract(&s.title),
        })
        .collect()
}

fn all_tokens(kw: &Keywords) -> HashSet<String> {
    kw.entities
        .iter()
        .chain(kw.numbers.iter())
        .chain(kw.words.iter())
        .cloned()
        .collect()
}

/// Hard constraints: any failing rejects the pair outright (score := 0).
fn passes_hard_constraints(a: &Keywords, b: &Keywords) -> bool {
    let years_a = a.years();
    let years_b = b.years();
    if !years_a.is_empty() && !years_b.is_empty() && years_a.is_disjoint(&years_b) {
        return false;
    }

    let prices_a = a.prices();
    let prices_b = b.prices();
    if !prices_a.is_empty() && !prices_b.is_empty() && prices_a.is_disjoint(&prices_b) {
        return false;
    }

    let core_a = a.core_words();
    let core_b = b.core_words();
    if core_a.len() >= 2 && core_b.len() >= 2 && core_a.is_disjoint(&core_b) {
        return false;
    }

    if !a.entities.is_disjoint(&b.entities) {
        let a_exit = a.words.iter().any(|w| EXIT_WORDS.contains(&w.as_str()));
        let a_stay = a.words.iter().any(|w| STAY_WORDS.contains(&w.as_str()));
        let b_exit = b.words.iter().any(|w| EXIT_WORDS.contains(&w.as_str()));
        let b_stay = b.words.iter().any(|w| STAY_WORDS.contains(&w.as_str()));
        if (a_exit && b_stay) || (a_stay && b_exit) {
            return false;
        }
    }

    true
}

fn jaccard<T: std::hash::Hash + Eq>(a: &HashSet<T>, b: &HashSet<T>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let inter = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        0.0
    } else {
        inter as f64 / union as f64
    }
}

/// Longest-common-subsequence ratio over lowercased titles.
fn lcs_ratio(a: &str, b: &str) -> f64 {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    if a_chars.is_empty() || b_chars.is_empty() {
        return 0.0;
    }

    let mut prev = vec![0usize; b_chars.len() + 1];
    let mut curr = vec![0usize; b_chars.len() + 1];
    for i in 1..=a_chars.len() {
        for j in 1..=b_chars.len() {
            if a_chars[i - 1] == b_chars[j - 1] {
                curr[j] = prev[j - 1] + 1;
            } else {
                curr[j] = prev[j].max(curr[j - 1]);
            }
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    let lcs_len = prev[b_chars.len()];
    (2 * lcs_len) as f64 / (a_chars.len() + b_chars.len()) as f64
}

/// Weighted score across entities/numbers/words Jaccard plus title similarity,
/// capped at 1.0. Returns 0.0 if a hard constraint rejects the pair.
pub fn score(a: &Keywords, b: &Keywords, title_a: &str, title_b: &str) -> f64 {
    if !passes_hard_constraints(a, b) {
        return 0.0;
    }

    let entity_sim = jaccard(&a.entities, &b.entities);
    let number_sim = jaccard(&a.non_year_price_numbers(), &b.non_year_price_numbers());
    let word_sim = jaccard(&a.words, &b.words);

    let running = entity_sim * 0.25 + number_sim * 0.20 + word_sim * 0.35;
    if running < EARLY_EXIT_THRESHOLD {
        return running.min(1.0);
    }

    let title_sim = lcs_ratio(title_a, title_b);
    (running + title_sim * 0.20).min(1.0)
}

/// All `(marketA, marketB, confidence)` tuples for a platform pair, after
/// applying the manual map then the automatic tier. `catalog_a`/`catalog_b`
/// are each assumed to belong to a single venue.
pub fn match_catalogs(
    catalog_a: &[MarketSnapshot],
    catalog_b: &[MarketSnapshot],
    manual_mappings: &[ManualMapping],
    min_similarity: f64,
) -> Vec<MatchPair> {
    let mut claimed_a: HashSet<String> = HashSet::new();
    let mut claimed_b: HashSet<String> = HashSet::new();
    let mut pairs = Vec::new();

    let venue_a = catalog_a.first().map(|s| s.venue);
    let venue_b = catalog_b.first().map(|s| s.venue);

    if let (Some(va), Some(vb)) = (venue_a, venue_b) {
        for mapping in manual_mappings {
            for leg_map in mapping.outcomes.values() {
                let (Some(leg_a), Some(leg_b)) = (leg_map.get(&va), leg_map.get(&vb)) else {
                    continue;
                };
                let (Some(snap_a), Some(snap_b)) = (
                    catalog_a
                        .iter()
                        .find(|s| s.venue_market_id == leg_a.venue_market_id),
                    catalog_b
                        .iter()
                        .find(|s| s.venue_market_id == leg_b.venue_market_id),
                ) else {
                    continue;
                };
                claimed_a.insert(snap_a.venue_market_id.clone());
                claimed_b.insert(snap_b.venue_market_id.clone());
                pairs.push(MatchPair {
                    snapshot_a: snap_a.clone(),
                    snapshot_b: snap_b.clone(),
                    confidence: 1.0,
                    match_reason: format!("manual map: {}", mapping.slug),
                });
            }
        }
    }

    let indexed_a = index_catalog(catalog_a);
    let indexed_b = index_catalog(catalog_b);

    // Build inverted index token -> b-indices, excluding claimed B markets.
    let mut inverted: HashMap<String, Vec<usize>> = HashMap::new();
    for (i, entry) in indexed_b.iter().enumerate() {
        if claimed_b.contains(&entry.snapshot.venue_market_id) {
            continue;
        }
        for tok in all_tokens(&entry.keywords) {
            inverted.entry(tok).or_default().push(i);
        }
    }

    // Prune noisy tokens that carry no discriminating signal.
    let b_count = indexed_b.len().max(1);
    let prune_limit = ((b_count as f64) * PRUNE_FRACTION).max(PRUNE_FLOOR as f64) as usize;
    inverted.retain(|_, postings| postings.len() <= prune_limit);

    for a_entry in &indexed_a {
        if claimed_a.contains(&a_entry.snapshot.venue_market_id) {
            continue;
        }

        let mut candidates: HashSet<usize> = HashSet::new();
        for tok in all_tokens(&a_entry.keywords) {
            if let Some(postings) = inverted.get(&tok) {
                candidates.extend(postings.iter().copied());
            }
        }

        let mut best: Option<(usize, f64)> = None;
        for &bi in &candidates {
            let b_entry = &indexed_b[bi];
            if claimed_b.contains(&b_entry.snapshot.venue_market_id) {
                continue;
            }
            let s = score(
                &a_entry.keywords,
                &b_entry.keywords,
                &a_entry.snapshot.title,
                &b_entry.snapshot.title,
            );
            if s >= min_similarity && best.map_or(true, |(_, best_s)| s > best_s) {
                best = Some((bi, s));
            }
        }

        if let Some((bi, s)) = best {
            let b_entry = &indexed_b[bi];
            claimed_a.insert(a_entry.snapshot.venue_market_id.clone());
            claimed_b.insert(b_entry.snapshot.venue_market_id.clone());
            pairs.push(MatchPair {
                snapshot_a: a_entry.snapshot.clone(),
                snapshot_b: b_entry.snapshot.clone(),
                confidence: s,
                match_reason: "automatic: weighted similarity".to_string(),
            });
        }
    }

    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn snap(venue: Venue, id: &str, title: &str) -> MarketSnapshot {
        MarketSnapshot {
            venue,
            venue_market_id: id.to_string(),
            title: title.to_string(),
            yes_ask: None,
            yes_bid: None,
            no_ask: None,
            no_bid: None,
            ask_size_yes: None,
            ask_size_no: None,
            liquidity_usd: None,
            volume_24h_usd: None,
            end_time: Some(Utc::now()),
            url: None,
            derived: false,
        }
    }

    #[test]
    fn year_conflict_rejects_the_pair() {
        let a = keyword::extract("Will Trump win in 2024?");
        let b = keyword::extract("Will Trump win in 2028?");
        assert_eq!(score(&a, &b, "Will Trump win in 2024?", "Will Trump win in 2028?"), 0.0);
    }

    #[test]
    fn directional_reversal_rejects_the_pair() {
        let a = keyword::extract("Will Trump remain president?");
        let b = keyword::extract("Trump out by March?");
        assert_eq!(
            score(&a, &b, "Will Trump remain president?", "Trump out by March?"),
            0.0
        );
    }

    #[test]
    fn win_as_stay_word_rejects_pair_with_exit_word() {
        let a = keyword::extract("Will Trump win reelection?");
        let b = keyword::extract("Trump out by March?");
        assert_eq!(
            score(&a, &b, "Will Trump win reelection?", "Trump out by March?"),
            0.0
        );
    }

    #[test]
    fn price_conflict_rejects_the_pair() {
        let a = keyword::extract("Will BTC hit $100,000 this year?");
        let b = keyword::extract("Will BTC hit $150,000 this year?");
        assert_eq!(score(&a, &b, "a", "b"), 0.0);
    }

    #[test]
    fn similar_titles_score_highly() {
        let a = keyword::extract("Will Bitcoin reach $100k by January?");
        let b = keyword::extract("Will Bitcoin hit $100k in January?");
        let s = score(
            &a,
            &b,
            "Will Bitcoin reach $100k by January?",
            "Will Bitcoin hit $100k in January?",
        );
        assert!(s >= 0.5, "expected high score, got {s}");
    }

    #[test]
    fn match_catalogs_claims_each_market_at_most_once() {
        let catalog_a = vec![
            snap(Venue::Poly, "a1", "Will Bitcoin reach $100k by January?"),
            snap(Venue::Poly, "a2", "Will Ethereum reach $5k by January?"),
        ];
        let catalog_b = vec![
            snap(Venue::Kalshi, "b1", "Will Bitcoin hit $100k in January?"),
            snap(Venue::Kalshi, "b2", "Will Ethereum hit $5k in January?"),
        ];

        let pairs = match_catalogs(&catalog_a, &catalog_b, &[], 0.4);

        let mut seen_a = HashSet::new();
        let mut seen_b = HashSet::new();
        for p in &pairs {
            assert!(seen_a.insert(p.snapshot_a.venue_market_id.clone()));
            assert!(seen_b.insert(p.snapshot_b.venue_market_id.clone()));
        }
        assert_eq!(pairs.len(), 2);
    }

    #[test]
    fn manual_map_wins_even_at_low_automatic_score() {
        let catalog_a = vec![snap(Venue::Poly, "X", "Completely unrelated title one")];
        let catalog_b = vec![snap(Venue::Opinion, "Y", "Totally different title two")];

        let mut outcomes = HashMap::new();
        let mut legs = HashMap::new();
        legs.insert(
            Venue::Poly,
            crate::model::MappingLeg {
                venue_market_id: "X".to_string(),
                outcome_label: "yes".to_string(),
            },
        );
        legs.insert(
            Venue::Opinion,
            crate::model::MappingLeg {
                venue_market_id: "Y".to_string(),
                outcome_label: "yes".to_string(),
            },
        );
        outcomes.insert("yes".to_string(), legs);

        let mapping = ManualMapping {
            slug: "pinned-event".to_string(),
            description: "test".to_string(),
            outcomes,
        };

        let pairs = match_catalogs(&catalog_a, &catalog_b, &[mapping], 0.9);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].confidence, 1.0);
    }
}
