//! Closed candidate vocabularies and edit-distance matching.
//!
//! Every box role resolves against a closed set of uppercase strings supplied
//! by the database collaborator. Matching keeps the smallest and
//! second-smallest distinct edit distances; a distance above the ceiling or a
//! tie rejects the match, otherwise confidence is `1 - d1/d2`.

use std::collections::HashMap;

use serde::Deserialize;
use tracing::debug;

use crate::core::config::RecognizeConfig;
use crate::template::BoxRole;

/// Matches farther than this are always rejected.
pub const MAX_EDIT_DISTANCE: usize = 5;

/// Levenshtein distance over Unicode scalar values.
pub fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];
    for (i, &ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

/// The result of matching one OCR string against a vocabulary.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    /// The resolved candidate, or empty when rejected.
    pub text: String,
    /// `1 - d1/d2` for an accepted match, 0 when rejected.
    pub confidence: f32,
}

impl MatchOutcome {
    fn rejected() -> Self {
        Self {
            text: String::new(),
            confidence: 0.0,
        }
    }
}

/// A named, closed set of uppercase candidate strings.
#[derive(Debug, Clone)]
pub struct CandidateVocabulary {
    name: String,
    candidates: Vec<String>,
}

impl CandidateVocabulary {
    /// Builds a vocabulary, uppercasing and deduplicating the candidates.
    pub fn new(name: impl Into<String>, candidates: impl IntoIterator<Item = String>) -> Self {
        let mut seen = std::collections::HashSet::new();
        let candidates = candidates
            .into_iter()
            .map(|c| c.to_uppercase())
            .filter(|c| seen.insert(c.clone()))
            .collect();
        Self {
            name: name.into(),
            candidates,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    /// Resolves an uppercased OCR string against this vocabulary.
    ///
    /// Keeps the smallest distance `d1` and the smallest strictly larger
    /// distance `d2`. Rejected (blank text, confidence 0) when `d1` exceeds
    /// [`MAX_EDIT_DISTANCE`], when two candidates tie at `d1`, or when the
    /// vocabulary holds a single candidate that does not match exactly.
    pub fn find_closest(&self, text: &str) -> MatchOutcome {
        if self.candidates.is_empty() {
            return MatchOutcome::rejected();
        }

        let mut best: Option<(usize, &str)> = None;
        let mut best_count = 0usize;
        let mut second: Option<usize> = None;
        for candidate in &self.candidates {
            let d = edit_distance(text, candidate);
            match best {
                None => {
                    best = Some((d, candidate));
                    best_count = 1;
                }
                Some((d1, _)) if d < d1 => {
                    second = Some(d1);
                    best = Some((d, candidate));
                    best_count = 1;
                }
                Some((d1, _)) if d == d1 => best_count += 1,
                Some(_) => second = Some(second.map_or(d, |s| s.min(d))),
            }
        }

        let (d1, candidate) = best.unwrap_or((usize::MAX, ""));
        debug!(
            vocabulary = %self.name,
            input = %text,
            d1,
            d2 = ?second,
            candidate,
            ties = best_count,
            "edit-distance match"
        );

        if d1 > MAX_EDIT_DISTANCE || best_count > 1 {
            return MatchOutcome::rejected();
        }
        match second {
            Some(d2) => MatchOutcome {
                text: candidate.to_string(),
                confidence: 1.0 - d1 as f32 / d2 as f32,
            },
            // Single-candidate vocabulary: only an exact match is trustworthy.
            None if d1 == 0 => MatchOutcome {
                text: candidate.to_string(),
                confidence: 1.0,
            },
            None => MatchOutcome::rejected(),
        }
    }
}

/// Static facts about one product, used by cross-box inference.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProductInfo {
    /// Display name; matching happens against its uppercased form.
    pub name: String,
    /// Expected unit string, e.g. "500g".
    pub unit: String,
    /// Expected formatted price, e.g. "3.50 CHF".
    pub price: String,
    /// Units still in stock before this accounting round.
    pub previous_quantity: u32,
}

/// The immutable per-run snapshot fetched from the database collaborator.
#[derive(Debug, Clone, Deserialize)]
pub struct VocabularySnapshot {
    pub products: Vec<ProductInfo>,
    pub member_ids: Vec<String>,
}

impl VocabularySnapshot {
    pub fn from_json_path(path: &std::path::Path) -> Result<Self, crate::core::errors::ScanError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            crate::core::errors::ScanError::io(format!("reading vocabulary {}", path.display()), e)
        })?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// The per-role vocabularies for one run, borrowed by every recognition call.
#[derive(Debug, Clone)]
pub struct Vocabularies {
    names: CandidateVocabulary,
    units: CandidateVocabulary,
    prices: CandidateVocabulary,
    page_numbers: CandidateVocabulary,
    members: CandidateVocabulary,
    products: HashMap<String, ProductInfo>,
}

impl Vocabularies {
    /// Builds the role vocabularies from a database snapshot. Page-number
    /// candidates are generated from the configured format for pages
    /// `1..=max_pages_per_product`.
    pub fn build(snapshot: &VocabularySnapshot, config: &RecognizeConfig) -> Self {
        let names = CandidateVocabulary::new(
            "product_names",
            snapshot.products.iter().map(|p| p.name.clone()),
        );
        let units =
            CandidateVocabulary::new("units", snapshot.products.iter().map(|p| p.unit.clone()));
        let prices =
            CandidateVocabulary::new("prices", snapshot.products.iter().map(|p| p.price.clone()));
        let page_numbers = CandidateVocabulary::new(
            "page_numbers",
            (1..=config.max_pages_per_product).map(|n| format_page_number(&config.page_number_format, n)),
        );
        let members = CandidateVocabulary::new("member_ids", snapshot.member_ids.iter().cloned());
        let products = snapshot
            .products
            .iter()
            .map(|p| (p.name.to_uppercase(), p.clone()))
            .collect();
        Self {
            names,
            units,
            prices,
            page_numbers,
            members,
            products,
        }
    }

    /// The vocabulary a box role matches against; `None` for static boxes.
    pub fn for_role(&self, role: BoxRole) -> Option<&CandidateVocabulary> {
        match role {
            BoxRole::Name => Some(&self.names),
            BoxRole::Unit => Some(&self.units),
            BoxRole::Price => Some(&self.prices),
            BoxRole::PageNumber => Some(&self.page_numbers),
            BoxRole::Tally => Some(&self.members),
            BoxRole::Static => None,
        }
    }

    /// Looks up the product behind a resolved (uppercase) name-box text.
    pub fn product(&self, resolved_name: &str) -> Option<&ProductInfo> {
        self.products.get(resolved_name)
    }
}

/// Renders a page-number string from the configured format, replacing the
/// literal `{n}` placeholder.
pub fn format_page_number(format: &str, page: u32) -> String {
    format.replace("{n}", &page.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab(candidates: &[&str]) -> CandidateVocabulary {
        CandidateVocabulary::new("test", candidates.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_edit_distance_basics() {
        assert_eq!(edit_distance("", ""), 0);
        assert_eq!(edit_distance("ABC", ""), 3);
        assert_eq!(edit_distance("", "ABC"), 3);
        assert_eq!(edit_distance("KITTEN", "SITTING"), 3);
        assert_eq!(edit_distance("APPLE", "APPLE"), 0);
        assert_eq!(edit_distance("APPLE", "APPLES"), 1);
    }

    #[test]
    fn test_exact_match_full_confidence() {
        let outcome = vocab(&["APPLE", "APPLES"]).find_closest("APPLE");
        assert_eq!(outcome.text, "APPLE");
        assert_eq!(outcome.confidence, 1.0);
    }

    #[test]
    fn test_tie_rejected() {
        // "AABB" is at distance 2 to both candidates.
        let outcome = vocab(&["AAAA", "BBBB"]).find_closest("AABB");
        assert_eq!(outcome.text, "");
        assert_eq!(outcome.confidence, 0.0);
    }

    #[test]
    fn test_close_call_resolves_with_half_confidence() {
        // "APPLR" is at distance 1 to "APPLE" and 2 to "APPLES".
        let outcome = vocab(&["APPLE", "APPLES"]).find_closest("APPLR");
        assert_eq!(outcome.text, "APPLE");
        assert!((outcome.confidence - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_distance_ceiling_rejected() {
        let outcome = vocab(&["APPLE", "BANANA"]).find_closest("WXYZWXYZWXYZ");
        assert_eq!(outcome.text, "");
        assert_eq!(outcome.confidence, 0.0);
    }

    #[test]
    fn test_confidence_is_one_minus_ratio() {
        // d1 = 1 to "MANGO" (MANGO vs MANGX), d2 = 5 to "PEACH".
        let outcome = vocab(&["MANGO", "PEACH"]).find_closest("MANGX");
        assert_eq!(outcome.text, "MANGO");
        assert!((outcome.confidence - (1.0 - 1.0 / 5.0)).abs() < 1e-6);
    }

    #[test]
    fn test_candidates_are_uppercased() {
        let outcome = vocab(&["apple", "banana"]).find_closest("APPLE");
        assert_eq!(outcome.text, "APPLE");
        assert_eq!(outcome.confidence, 1.0);
    }

    #[test]
    fn test_single_candidate_requires_exact_match() {
        let v = vocab(&["APPLE"]);
        assert_eq!(v.find_closest("APPLE").confidence, 1.0);
        let near = v.find_closest("APPLES");
        assert_eq!(near.text, "");
        assert_eq!(near.confidence, 0.0);
    }

    #[test]
    fn test_empty_vocabulary_rejects() {
        let outcome = vocab(&[]).find_closest("ANYTHING");
        assert_eq!(outcome.confidence, 0.0);
    }

    #[test]
    fn test_role_lookup() {
        let snapshot = VocabularySnapshot {
            products: vec![ProductInfo {
                name: "Mango Chutney".into(),
                unit: "250g".into(),
                price: "4.20 CHF".into(),
                previous_quantity: 12,
            }],
            member_ids: vec!["AB123".into()],
        };
        let config = RecognizeConfig::default();
        let vocabularies = Vocabularies::build(&snapshot, &config);

        assert!(vocabularies.for_role(BoxRole::Static).is_none());
        let pages = vocabularies.for_role(BoxRole::PageNumber).unwrap();
        assert!(pages.candidates().contains(&"PAGE 1".to_string()));
        let product = vocabularies.product("MANGO CHUTNEY").unwrap();
        assert_eq!(product.unit, "250g");
    }

    #[test]
    fn test_format_page_number() {
        assert_eq!(format_page_number("PAGE {n}", 3), "PAGE 3");
    }
}
