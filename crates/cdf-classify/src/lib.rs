// SPDX-License-Identifier: MIT OR Apache-2.0
//! Layer classification: one pre-order pass over a document tree, bucketing
//! every drawable by `(side, card index, finish)`.
//!
//! Classification is a pure function of the document. Name matching never
//! fails; every resolution step ends in a default (`front`, card `0`,
//! `print`), so malformed names degrade instead of erroring.

#![deny(unsafe_code)]

use cdf_core::{Artboard, BucketKey, BucketMap, ClassifiedItem, Document, Finish, RectMm, Side};
use regex::Regex;
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Token tables
// ---------------------------------------------------------------------------

/// Substring tokens that mark die/laser-cut geometry. The bare token `die`
/// is handled separately because it must match as a whole token only.
const DIE_TOKENS: &[&str] = &[
    "laser_cut", "laser-cut", "laser", "cutline", "cut_line", "die_cut", "die-cut", "diecut",
];

/// Substring tokens that mark spot-UV / varnish artwork. The bare token `uv`
/// is handled separately (isolated-token match).
const UV_TOKENS: &[&str] = &[
    "spot_uv",
    "spot-uv",
    "spotuv",
    "varnish",
    "gloss",
    "matte",
    "lamination",
    "raised_uv",
];

fn die_word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:^|[_\-\s])die(?:[_\-\s]|$)").expect("die regex"))
}

fn uv_word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:^|[_\-\s])uv(?:[_\-\s]|$)").expect("uv regex"))
}

fn card_layer_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:front|back)_layer_(\d+)").expect("card layer regex"))
}

fn index_suffix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"_(\d+)").expect("index suffix regex"))
}

// ---------------------------------------------------------------------------
// Per-name resolution
// ---------------------------------------------------------------------------

/// Finish class of a single name, if any token matches.
///
/// Evaluation order is the precedence: `die > emboss > deboss > foil > uv`.
pub fn finish_of_name(name: &str) -> Option<Finish> {
    let n = name.to_lowercase();
    if DIE_TOKENS.iter().any(|t| n.contains(t)) || die_word_re().is_match(&n) {
        return Some(Finish::Die);
    }
    if n.contains("emboss") {
        return Some(Finish::Emboss);
    }
    if n.contains("deboss") {
        return Some(Finish::Deboss);
    }
    if n.contains("foil") {
        return Some(Finish::Foil);
    }
    if UV_TOKENS.iter().any(|t| n.contains(t)) || uv_word_re().is_match(&n) {
        return Some(Finish::Uv);
    }
    None
}

fn side_of_name(name: &str) -> Option<Side> {
    let n = name.to_lowercase();
    if n.contains("front") {
        Some(Side::Front)
    } else if n.contains("back") {
        Some(Side::Back)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Chain resolution
// ---------------------------------------------------------------------------

/// The drawable's own name followed by its ancestors, deepest first. The
/// item is the most specific node of its own chain, so its name is
/// consulted before any container's.
fn chain_deepest_first<'a>(own_name: &'a str, ancestors: &'a [String]) -> Vec<&'a str> {
    let mut names: Vec<&str> = Vec::with_capacity(ancestors.len() + 1);
    if !own_name.is_empty() {
        names.push(own_name);
    }
    for name in ancestors.iter().rev() {
        names.push(name.as_str());
    }
    names
}

fn resolve_finish(names: &[&str]) -> Finish {
    names
        .iter()
        .find_map(|n| finish_of_name(n))
        .unwrap_or(Finish::Print)
}

fn resolve_side(names: &[&str], bounds: &RectMm, artboards: &[Artboard]) -> Side {
    if let Some(side) = names.iter().find_map(|n| side_of_name(n)) {
        return side;
    }

    // No marker anywhere in the chain: fall back to geometry.
    let best = artboards
        .iter()
        .map(|ab| (ab, ab.bounds_mm.intersection_area(bounds)))
        .filter(|(_, area)| *area > 0.0)
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let Some((board, _)) = best else {
        return Side::Front;
    };

    if let Some(side) = side_of_name(&board.name) {
        return side;
    }

    // Unnamed boards: X-order by centre, leftmost is the front.
    let mut by_x: Vec<&Artboard> = artboards.iter().collect();
    by_x.sort_by(|a, b| {
        a.bounds_mm
            .center_x()
            .partial_cmp(&b.bounds_mm.center_x())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    if by_x.len() > 1 && std::ptr::eq(*by_x.last().expect("non-empty"), board) {
        return Side::Back;
    }
    Side::Front
}

fn resolve_card_index(names: &[&str]) -> u32 {
    for n in names {
        let lower = n.to_lowercase();
        if let Some(caps) = card_layer_re().captures(&lower) {
            if let Ok(idx) = caps[1].parse::<u32>() {
                return idx;
            }
        }
    }
    for n in names {
        if let Some(caps) = index_suffix_re().captures(n) {
            if let Ok(idx) = caps[1].parse::<u32>() {
                return idx;
            }
        }
    }
    0
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Classify every drawable of `doc` into ordered buckets.
///
/// Output order is stable: within a bucket, items appear in document
/// (pre-order) order. Zero-area drawables are classified like any other;
/// phantom guide lines signalling die cuts rely on this. Hidden drawables
/// are dropped unless their finish is one of `die`, `print`, `uv`, `foil`,
/// which may define geometry even when hidden at author time.
pub fn classify(doc: &Document) -> BucketMap {
    let mut buckets = BucketMap::new();

    doc.for_each_drawable(|ancestors, effectively_visible, drawable| {
        let names = chain_deepest_first(&drawable.name, ancestors);
        let finish = resolve_finish(&names);

        if !effectively_visible
            && !matches!(
                finish,
                Finish::Die | Finish::Print | Finish::Uv | Finish::Foil
            )
        {
            return;
        }

        let side = resolve_side(&names, &drawable.bounds_mm, &doc.artboards);
        let card_index = resolve_card_index(&names);
        let key = BucketKey {
            side,
            card_index,
            finish,
        };

        buckets.entry(key).or_default().push(ClassifiedItem {
            name: drawable.name.clone(),
            kind: drawable.kind,
            bounds_mm: drawable.bounds_mm,
            visible: drawable.visible,
            opacity: drawable.opacity,
            layer_path: ancestors.to_vec(),
            key,
        });
    });

    buckets
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use cdf_core::{Drawable, DrawableKind, Layer};

    fn rect(l: f64, t: f64, r: f64, b: f64) -> RectMm {
        RectMm::new(l, t, r, b)
    }

    fn drawable(name: &str, bounds: RectMm) -> Drawable {
        Drawable {
            name: name.into(),
            kind: DrawableKind::Path,
            bounds_mm: bounds,
            visible: true,
            locked: false,
            opacity: 100.0,
            layer_path: vec![],
        }
    }

    fn layer(name: &str, drawables: Vec<Drawable>, sublayers: Vec<Layer>) -> Layer {
        Layer {
            name: name.into(),
            visible: true,
            locked: false,
            sublayers,
            drawables,
        }
    }

    fn doc(artboards: Vec<Artboard>, layers: Vec<Layer>) -> Document {
        Document {
            name: "card".into(),
            full_name: "card.ai".into(),
            artboards,
            layers,
        }
    }

    fn artboard(name: &str, index: usize, bounds: RectMm) -> Artboard {
        Artboard {
            name: name.into(),
            index,
            bounds_mm: bounds,
        }
    }

    // -- Token matching -------------------------------------------------

    #[test]
    fn die_tokens_match() {
        for name in [
            "laser_cut",
            "my-laser-cut-line",
            "CutLine",
            "die_cut_outline",
            "DieCut",
            "die",
            "my_die",
            "the die line",
        ] {
            assert_eq!(finish_of_name(name), Some(Finish::Die), "name={name}");
        }
    }

    #[test]
    fn bare_die_requires_word_boundary() {
        assert_eq!(finish_of_name("indie"), None);
        assert_eq!(finish_of_name("died"), None);
        assert_eq!(finish_of_name("soldier"), None);
    }

    #[test]
    fn uv_tokens_match() {
        for name in ["spot_uv", "Spot-UV", "spotuv", "varnish", "gloss", "matte", "lamination", "raised_uv", "uv", "uv_logo", "logo_uv"] {
            assert_eq!(finish_of_name(name), Some(Finish::Uv), "name={name}");
        }
    }

    #[test]
    fn bare_uv_requires_isolation() {
        assert_eq!(finish_of_name("university"), None);
        assert_eq!(finish_of_name("fluvial"), None);
    }

    #[test]
    fn emboss_deboss_foil() {
        assert_eq!(finish_of_name("emboss_logo"), Some(Finish::Emboss));
        assert_eq!(finish_of_name("Debossed Text"), Some(Finish::Deboss));
        assert_eq!(finish_of_name("gold_foil"), Some(Finish::Foil));
    }

    #[test]
    fn precedence_on_one_name() {
        // die beats everything; emboss beats foil; foil beats uv.
        assert_eq!(finish_of_name("die_cut_foil"), Some(Finish::Die));
        assert_eq!(finish_of_name("emboss_foil"), Some(Finish::Emboss));
        assert_eq!(finish_of_name("foil_gloss"), Some(Finish::Foil));
    }

    #[test]
    fn unmatched_names_are_none() {
        assert_eq!(finish_of_name("logo"), None);
        assert_eq!(finish_of_name(""), None);
    }

    // -- Chain resolution ------------------------------------------------

    #[test]
    fn deepest_ancestor_finish_wins() {
        let d = doc(
            vec![],
            vec![layer(
                "foil_group",
                vec![],
                vec![layer("uv_area", vec![drawable("logo", rect(0.0, 0.0, 5.0, 5.0))], vec![])],
            )],
        );
        let buckets = classify(&d);
        let (key, _) = buckets.iter().next().expect("one bucket");
        assert_eq!(key.finish, Finish::Uv);
    }

    #[test]
    fn own_name_beats_ancestors() {
        let d = doc(
            vec![],
            vec![layer(
                "foil_group",
                vec![drawable("emboss_mark", rect(0.0, 0.0, 5.0, 5.0))],
                vec![],
            )],
        );
        let buckets = classify(&d);
        let (key, _) = buckets.iter().next().expect("one bucket");
        assert_eq!(key.finish, Finish::Emboss);
    }

    #[test]
    fn deep_side_marker_is_honored() {
        let d = doc(
            vec![],
            vec![layer(
                "artwork",
                vec![],
                vec![layer(
                    "back_effects",
                    vec![drawable("logo", rect(0.0, 0.0, 5.0, 5.0))],
                    vec![],
                )],
            )],
        );
        let buckets = classify(&d);
        let (key, _) = buckets.iter().next().expect("one bucket");
        assert_eq!(key.side, Side::Back);
    }

    #[test]
    fn side_from_artboard_name_overlap() {
        let d = doc(
            vec![
                artboard("Back Card", 0, rect(0.0, 0.0, 89.0, 51.0)),
                artboard("Front Card", 1, rect(100.0, 0.0, 189.0, 51.0)),
            ],
            vec![layer(
                "art",
                vec![drawable("logo", rect(10.0, 10.0, 20.0, 20.0))],
                vec![],
            )],
        );
        let buckets = classify(&d);
        let (key, _) = buckets.iter().next().expect("one bucket");
        assert_eq!(key.side, Side::Back);
    }

    #[test]
    fn side_from_artboard_x_order() {
        // Unmarked boards: the rightmost one is the back.
        let d = doc(
            vec![
                artboard("Board 1", 0, rect(0.0, 0.0, 89.0, 51.0)),
                artboard("Board 2", 1, rect(100.0, 0.0, 189.0, 51.0)),
            ],
            vec![layer(
                "art",
                vec![drawable("logo", rect(110.0, 10.0, 120.0, 20.0))],
                vec![],
            )],
        );
        let buckets = classify(&d);
        let (key, _) = buckets.iter().next().expect("one bucket");
        assert_eq!(key.side, Side::Back);
    }

    #[test]
    fn side_defaults_to_front() {
        let d = doc(
            vec![],
            vec![layer("art", vec![drawable("logo", rect(0.0, 0.0, 5.0, 5.0))], vec![])],
        );
        let buckets = classify(&d);
        let (key, _) = buckets.iter().next().expect("one bucket");
        assert_eq!(key.side, Side::Front);
    }

    #[test]
    fn card_index_from_layer_pattern() {
        let d = doc(
            vec![],
            vec![layer(
                "front_layer_2",
                vec![drawable("logo", rect(0.0, 0.0, 5.0, 5.0))],
                vec![],
            )],
        );
        let buckets = classify(&d);
        let (key, _) = buckets.iter().next().expect("one bucket");
        assert_eq!(key.card_index, 2);
    }

    #[test]
    fn card_index_from_numeric_suffix() {
        let d = doc(
            vec![],
            vec![layer(
                "card_7",
                vec![drawable("logo", rect(0.0, 0.0, 5.0, 5.0))],
                vec![],
            )],
        );
        let buckets = classify(&d);
        let (key, _) = buckets.iter().next().expect("one bucket");
        assert_eq!(key.card_index, 7);
    }

    #[test]
    fn card_index_defaults_to_zero() {
        let d = doc(
            vec![],
            vec![layer("art", vec![drawable("logo", rect(0.0, 0.0, 5.0, 5.0))], vec![])],
        );
        let buckets = classify(&d);
        let (key, _) = buckets.iter().next().expect("one bucket");
        assert_eq!(key.card_index, 0);
    }

    // -- Visibility ------------------------------------------------------

    #[test]
    fn hidden_emboss_is_dropped() {
        let mut hidden = drawable("emboss_mark", rect(0.0, 0.0, 5.0, 5.0));
        hidden.visible = false;
        let d = doc(vec![], vec![layer("art", vec![hidden], vec![])]);
        assert!(classify(&d).is_empty());
    }

    #[test]
    fn hidden_foil_and_uv_are_kept() {
        let mut foil = drawable("foil_mark", rect(0.0, 0.0, 5.0, 5.0));
        foil.visible = false;
        let mut uv = drawable("uv_mark", rect(0.0, 0.0, 5.0, 5.0));
        uv.visible = false;
        let d = doc(vec![], vec![layer("art", vec![foil, uv], vec![])]);
        let buckets = classify(&d);
        assert_eq!(buckets.len(), 2);
    }

    #[test]
    fn hidden_ancestor_layer_drops_emboss_descendants() {
        let mut off = layer(
            "off",
            vec![],
            vec![layer("inner", vec![drawable("emboss_x", rect(0.0, 0.0, 5.0, 5.0))], vec![])],
        );
        off.visible = false;
        let d = doc(vec![], vec![off]);
        assert!(classify(&d).is_empty());
    }

    // -- Edge cases ------------------------------------------------------

    #[test]
    fn zero_area_drawable_is_classified() {
        let d = doc(
            vec![],
            vec![layer(
                "cutline",
                vec![drawable("guide", rect(10.0, 0.0, 10.0, 51.0))],
                vec![],
            )],
        );
        let buckets = classify(&d);
        let (key, items) = buckets.iter().next().expect("one bucket");
        assert_eq!(key.finish, Finish::Die);
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn empty_document_yields_empty_buckets() {
        let d = doc(vec![], vec![]);
        assert!(classify(&d).is_empty());
    }

    #[test]
    fn bucket_items_keep_preorder() {
        let d = doc(
            vec![],
            vec![layer(
                "art",
                vec![
                    drawable("first", rect(0.0, 0.0, 5.0, 5.0)),
                    drawable("second", rect(0.0, 0.0, 5.0, 5.0)),
                ],
                vec![layer(
                    "sub",
                    vec![drawable("third", rect(0.0, 0.0, 5.0, 5.0))],
                    vec![],
                )],
            )],
        );
        let buckets = classify(&d);
        let items = buckets.values().next().expect("one bucket");
        let names: Vec<&str> = items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second", "third"]);
    }

    #[test]
    fn classification_is_idempotent() {
        let d = doc(
            vec![artboard("front", 0, rect(0.0, 0.0, 89.0, 51.0))],
            vec![layer(
                "front_layer_0",
                vec![
                    drawable("logo", rect(5.0, 5.0, 30.0, 20.0)),
                    drawable("foil_accent", rect(40.0, 5.0, 60.0, 20.0)),
                ],
                vec![],
            )],
        );
        assert_eq!(classify(&d), classify(&d));
    }
}
