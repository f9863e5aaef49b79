// SPDX-License-Identifier: MIT OR Apache-2.0
//! Export planning: turn classified buckets into per-card crop rectangles
//! and the list of asset files the rasterizer must produce.
//!
//! Planning is a pure function of the buckets (plus the artboard list for
//! the final crop fallback); the same input yields a bit-for-bit identical
//! plan.

#![deny(unsafe_code)]

use cdf_core::{
    Artboard, BucketMap, ClassifiedItem, EmbossType, Finish, RectMm, Side, PT_PER_MM,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Plan types
// ---------------------------------------------------------------------------

/// What kind of asset a plan entry produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    /// Printed artwork, transparent background, clipped to crop.
    Albedo,
    /// Foil mask (white on transparent).
    Foil,
    /// Colour sample of the foil artwork with its fill preserved.
    FoilColor,
    /// Spot-UV mask.
    Uv,
    /// Emboss/deboss mask.
    Emboss,
    /// Die-cut vector outline.
    Diecut,
    /// Die-cut raster mask (white = keep, transparent = cut).
    DiecutMask,
}

impl AssetKind {
    /// Filename component, e.g. `foil_color`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Albedo => "albedo",
            Self::Foil => "foil",
            Self::FoilColor => "foil_color",
            Self::Uv => "uv",
            Self::Emboss => "emboss",
            Self::Diecut => "diecut",
            Self::DiecutMask => "diecut_mask",
        }
    }

    /// Expected output format.
    pub fn format(&self) -> AssetFormat {
        match self {
            Self::Diecut => AssetFormat::Svg,
            _ => AssetFormat::Png,
        }
    }

    /// The `produce` token the rasterizer descriptor uses for this asset.
    /// The die-cut SVG and its raster mask share one token.
    pub fn produce_token(&self) -> &'static str {
        match self {
            Self::DiecutMask => "diecut",
            other => other.as_str(),
        }
    }
}

/// File format of a planned asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetFormat {
    /// Raster PNG.
    Png,
    /// Vector SVG.
    Svg,
}

impl AssetFormat {
    /// Filename extension.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Svg => "svg",
        }
    }
}

/// One asset file the rasterizer must produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetPlanEntry {
    /// Asset kind.
    pub kind: AssetKind,
    /// Exact output filename, e.g. `front_layer_0_foil.png`.
    pub output_name: String,
    /// Expected format of the produced file.
    pub expected_format: AssetFormat,
}

/// The plan for one card: a crop rectangle and its asset entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardPlan {
    /// Card face.
    pub side: Side,
    /// Zero-based card index.
    pub card_index: u32,
    /// Filename prefix shared by this card's assets.
    pub prefix: String,
    /// Crop rectangle in points, `[left, top, right, bottom]`.
    pub crop_pt: [f64; 4],
    /// Crop rectangle in millimetres (pre-conversion, for geometry echo).
    pub crop_mm: RectMm,
    /// How an emboss mask, if planned, is to be applied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emboss_type: Option<EmbossType>,
    /// Files to produce, in deterministic order.
    pub entries: Vec<AssetPlanEntry>,
}

impl CardPlan {
    /// Distinct `produce` tokens for the rasterizer descriptor.
    pub fn produce_tokens(&self) -> Vec<&'static str> {
        let mut tokens = Vec::new();
        for entry in &self.entries {
            let tok = entry.kind.produce_token();
            if !tokens.contains(&tok) {
                tokens.push(tok);
            }
        }
        tokens
    }
}

/// The full export plan for a document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExportPlan {
    /// Per-card plans; front cards ascending by index, then back cards.
    pub cards: Vec<CardPlan>,
}

impl ExportPlan {
    /// Every output filename across all cards, in plan order.
    pub fn expected_outputs(&self) -> Vec<String> {
        self.cards
            .iter()
            .flat_map(|c| c.entries.iter().map(|e| e.output_name.clone()))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

fn union_bounds(items: &[&ClassifiedItem]) -> Option<RectMm> {
    let mut iter = items.iter();
    let first = iter.next()?;
    let mut acc = first.bounds_mm.normalized();
    for item in iter {
        acc = acc.union(&item.bounds_mm.normalized());
    }
    Some(acc)
}

/// Crop selection: die bucket, else print, else the effect buckets, else the
/// artboard with the greatest overlap with the card's artwork.
fn select_crop(per_finish: &BTreeMap<Finish, Vec<&ClassifiedItem>>, artboards: &[Artboard]) -> RectMm {
    let bucket = |finish: Finish| per_finish.get(&finish).map(Vec::as_slice).unwrap_or(&[]);

    if let Some(rect) = union_bounds(bucket(Finish::Die)) {
        return rect;
    }
    if let Some(rect) = union_bounds(bucket(Finish::Print)) {
        return rect;
    }

    let effects: Vec<&ClassifiedItem> = [Finish::Foil, Finish::Uv, Finish::Emboss, Finish::Deboss]
        .iter()
        .flat_map(|f| bucket(*f).iter().copied())
        .collect();
    if let Some(rect) = union_bounds(&effects) {
        return rect;
    }

    active_artboard_rect(per_finish, artboards)
}

fn active_artboard_rect(
    per_finish: &BTreeMap<Finish, Vec<&ClassifiedItem>>,
    artboards: &[Artboard],
) -> RectMm {
    let all: Vec<&ClassifiedItem> = per_finish.values().flat_map(|v| v.iter().copied()).collect();
    let artwork = union_bounds(&all);

    let board = artwork
        .and_then(|rect| {
            artboards
                .iter()
                .map(|ab| (ab, ab.bounds_mm.intersection_area(&rect)))
                .filter(|(_, area)| *area > 0.0)
                .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
                .map(|(ab, _)| ab)
        })
        .or_else(|| artboards.first());

    match board {
        Some(ab) => ab.bounds_mm.normalized(),
        // No artboards at all: collapse to the artwork union, or origin.
        None => artwork.unwrap_or(RectMm::new(0.0, 0.0, 0.0, 0.0)),
    }
}

fn to_crop_pt(rect_mm: &RectMm) -> [f64; 4] {
    let mut r = RectMm::new(
        rect_mm.left * PT_PER_MM,
        rect_mm.top * PT_PER_MM,
        rect_mm.right * PT_PER_MM,
        rect_mm.bottom * PT_PER_MM,
    );
    if r.is_degenerate() {
        r = r.padded(1.0);
    }
    [r.left, r.top, r.right, r.bottom]
}

/// Compute the export plan for a document's buckets.
///
/// A card exists for each `(side, card_index)` with at least one bucketed
/// item. The albedo is planned whenever the card carries any non-die
/// artwork; a card whose only bucket is `die` yields just the die-cut pair.
pub fn plan(buckets: &BucketMap, artboards: &[Artboard]) -> ExportPlan {
    // Group buckets per card; BTreeMap keeps front cards first, each side
    // ascending by card index.
    let mut cards: BTreeMap<(Side, u32), BTreeMap<Finish, Vec<&ClassifiedItem>>> = BTreeMap::new();
    for (key, items) in buckets {
        if items.is_empty() {
            continue;
        }
        cards
            .entry((key.side, key.card_index))
            .or_default()
            .insert(key.finish, items.iter().collect());
    }

    let mut plans = Vec::with_capacity(cards.len());
    for ((side, card_index), per_finish) in cards {
        let prefix = format!("{side}_layer_{card_index}");
        let crop_mm = select_crop(&per_finish, artboards).normalized();
        let crop_pt = to_crop_pt(&crop_mm);

        let non_empty = |finish: Finish| per_finish.get(&finish).is_some_and(|v| !v.is_empty());

        let has_die = non_empty(Finish::Die);
        let has_foil = non_empty(Finish::Foil);
        let has_uv = non_empty(Finish::Uv);
        let has_emboss = non_empty(Finish::Emboss);
        let has_deboss = non_empty(Finish::Deboss);
        let has_print = non_empty(Finish::Print);

        let emboss_type = if has_emboss {
            Some(EmbossType::Raised)
        } else if has_deboss {
            Some(EmbossType::Deboss)
        } else {
            None
        };

        let mut entries = Vec::new();
        let mut push = |kind: AssetKind| {
            entries.push(AssetPlanEntry {
                kind,
                output_name: format!("{prefix}_{}.{}", kind.as_str(), kind.format().extension()),
                expected_format: kind.format(),
            });
        };

        if has_print || has_foil || has_uv || has_emboss || has_deboss {
            push(AssetKind::Albedo);
        }
        if has_foil {
            push(AssetKind::Foil);
            push(AssetKind::FoilColor);
        }
        if has_uv {
            push(AssetKind::Uv);
        }
        if has_emboss || has_deboss {
            push(AssetKind::Emboss);
        }
        if has_die {
            push(AssetKind::Diecut);
            push(AssetKind::DiecutMask);
        }

        plans.push(CardPlan {
            side,
            card_index,
            prefix,
            crop_pt,
            crop_mm,
            emboss_type,
            entries,
        });
    }

    ExportPlan { cards: plans }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use cdf_core::{BucketKey, DrawableKind};

    fn rect(l: f64, t: f64, r: f64, b: f64) -> RectMm {
        RectMm::new(l, t, r, b)
    }

    fn item(key: BucketKey, bounds: RectMm) -> ClassifiedItem {
        ClassifiedItem {
            name: "item".into(),
            kind: DrawableKind::Path,
            bounds_mm: bounds,
            visible: true,
            opacity: 100.0,
            layer_path: vec![],
            key,
        }
    }

    fn key(side: Side, card_index: u32, finish: Finish) -> BucketKey {
        BucketKey {
            side,
            card_index,
            finish,
        }
    }

    fn buckets_of(entries: Vec<(BucketKey, RectMm)>) -> BucketMap {
        let mut buckets = BucketMap::new();
        for (k, bounds) in entries {
            buckets.entry(k).or_default().push(item(k, bounds));
        }
        buckets
    }

    fn artboard() -> Artboard {
        Artboard {
            name: "Board".into(),
            index: 0,
            bounds_mm: rect(0.0, 0.0, 89.0, 51.0),
        }
    }

    #[test]
    fn print_card_plans_albedo_only() {
        let buckets = buckets_of(vec![(
            key(Side::Front, 0, Finish::Print),
            rect(0.0, 0.0, 89.0, 51.0),
        )]);
        let plan = plan(&buckets, &[artboard()]);
        assert_eq!(plan.cards.len(), 1);
        let names = plan.expected_outputs();
        assert_eq!(names, vec!["front_layer_0_albedo.png"]);
    }

    #[test]
    fn die_only_card_has_no_albedo() {
        let buckets = buckets_of(vec![(
            key(Side::Front, 0, Finish::Die),
            rect(0.0, 0.0, 89.0, 51.0),
        )]);
        let plan = plan(&buckets, &[artboard()]);
        let names = plan.expected_outputs();
        assert_eq!(
            names,
            vec!["front_layer_0_diecut.svg", "front_layer_0_diecut_mask.png"]
        );
    }

    #[test]
    fn foil_card_plans_mask_and_color() {
        let buckets = buckets_of(vec![
            (key(Side::Front, 0, Finish::Print), rect(0.0, 0.0, 89.0, 51.0)),
            (key(Side::Front, 0, Finish::Foil), rect(10.0, 10.0, 30.0, 20.0)),
        ]);
        let plan = plan(&buckets, &[artboard()]);
        let names = plan.expected_outputs();
        assert_eq!(
            names,
            vec![
                "front_layer_0_albedo.png",
                "front_layer_0_foil.png",
                "front_layer_0_foil_color.png",
            ]
        );
    }

    #[test]
    fn crop_prefers_die_over_print() {
        let buckets = buckets_of(vec![
            (key(Side::Front, 0, Finish::Print), rect(0.0, 0.0, 200.0, 200.0)),
            (key(Side::Front, 0, Finish::Die), rect(10.0, 10.0, 99.0, 61.0)),
        ]);
        let plan = plan(&buckets, &[artboard()]);
        assert_eq!(plan.cards[0].crop_mm, rect(10.0, 10.0, 99.0, 61.0));
    }

    #[test]
    fn crop_falls_back_to_effects_union() {
        let buckets = buckets_of(vec![
            (key(Side::Front, 0, Finish::Foil), rect(10.0, 10.0, 30.0, 20.0)),
            (key(Side::Front, 0, Finish::Uv), rect(40.0, 10.0, 60.0, 20.0)),
        ]);
        let plan = plan(&buckets, &[artboard()]);
        assert_eq!(plan.cards[0].crop_mm, rect(10.0, 10.0, 60.0, 20.0));
    }

    #[test]
    fn crop_converts_to_points() {
        let buckets = buckets_of(vec![(
            key(Side::Front, 0, Finish::Print),
            rect(0.0, 0.0, 25.4, 25.4),
        )]);
        let plan = plan(&buckets, &[artboard()]);
        let crop = plan.cards[0].crop_pt;
        assert!((crop[2] - 72.0).abs() < 1e-9);
        assert!((crop[3] - 72.0).abs() < 1e-9);
    }

    #[test]
    fn degenerate_crop_is_padded() {
        // A vertical guide line has zero width.
        let buckets = buckets_of(vec![(
            key(Side::Front, 0, Finish::Die),
            rect(10.0, 0.0, 10.0, 51.0),
        )]);
        let plan = plan(&buckets, &[]);
        let crop = plan.cards[0].crop_pt;
        assert!(crop[2] - crop[0] > 0.0);
        assert!(crop[3] - crop[1] > 0.0);
    }

    #[test]
    fn emboss_type_raised_beats_deboss() {
        let buckets = buckets_of(vec![
            (key(Side::Front, 0, Finish::Emboss), rect(0.0, 0.0, 10.0, 10.0)),
            (key(Side::Front, 0, Finish::Deboss), rect(20.0, 0.0, 30.0, 10.0)),
        ]);
        let plan = plan(&buckets, &[artboard()]);
        assert_eq!(plan.cards[0].emboss_type, Some(EmbossType::Raised));
    }

    #[test]
    fn deboss_only_carries_deboss_type() {
        let buckets = buckets_of(vec![(
            key(Side::Back, 1, Finish::Deboss),
            rect(0.0, 0.0, 10.0, 10.0),
        )]);
        let plan = plan(&buckets, &[artboard()]);
        assert_eq!(plan.cards[0].emboss_type, Some(EmbossType::Deboss));
        assert_eq!(
            plan.expected_outputs(),
            vec!["back_layer_1_albedo.png", "back_layer_1_emboss.png"]
        );
    }

    #[test]
    fn cards_are_ordered_front_first_then_ascending() {
        let buckets = buckets_of(vec![
            (key(Side::Back, 0, Finish::Print), rect(0.0, 0.0, 10.0, 10.0)),
            (key(Side::Front, 2, Finish::Print), rect(0.0, 0.0, 10.0, 10.0)),
            (key(Side::Front, 0, Finish::Print), rect(0.0, 0.0, 10.0, 10.0)),
        ]);
        let plan = plan(&buckets, &[artboard()]);
        let order: Vec<(Side, u32)> = plan.cards.iter().map(|c| (c.side, c.card_index)).collect();
        assert_eq!(
            order,
            vec![(Side::Front, 0), (Side::Front, 2), (Side::Back, 0)]
        );
    }

    #[test]
    fn produce_tokens_deduplicate_diecut() {
        let buckets = buckets_of(vec![
            (key(Side::Front, 0, Finish::Print), rect(0.0, 0.0, 10.0, 10.0)),
            (key(Side::Front, 0, Finish::Die), rect(0.0, 0.0, 10.0, 10.0)),
        ]);
        let plan = plan(&buckets, &[artboard()]);
        assert_eq!(plan.cards[0].produce_tokens(), vec!["albedo", "diecut"]);
    }

    #[test]
    fn plan_is_deterministic() {
        let buckets = buckets_of(vec![
            (key(Side::Front, 0, Finish::Print), rect(0.0, 0.0, 89.0, 51.0)),
            (key(Side::Front, 0, Finish::Foil), rect(10.0, 10.0, 30.0, 20.0)),
            (key(Side::Back, 0, Finish::Print), rect(0.0, 0.0, 89.0, 51.0)),
        ]);
        let boards = [artboard()];
        let a = plan(&buckets, &boards);
        let b = plan(&buckets, &boards);
        assert_eq!(
            serde_json::to_vec(&a).unwrap(),
            serde_json::to_vec(&b).unwrap()
        );
    }

    #[test]
    fn empty_buckets_yield_empty_plan() {
        let plan = plan(&BucketMap::new(), &[artboard()]);
        assert!(plan.cards.is_empty());
    }
}
