// SPDX-License-Identifier: MIT OR Apache-2.0
//! Retrieval-path adapter: manifest v3 → the stable consumer shape.
//!
//! The adapter is deliberately forgiving about its input. Manifests written
//! by older emitters merged several field spellings (`albedo` vs `print`,
//! `die_mask` vs `die_png`, ...); [`coerce_card_maps`] performs every such
//! union once, up front, and logs which spelling was chosen. Everything
//! downstream of the coercion works on one canonical structure.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Default physical dimensions when the manifest carries no geometry:
/// a standard 89 × 51 mm business card, 0.35 mm stock.
const DEFAULT_DIMENSIONS: Dimensions = Dimensions {
    width_mm: 89.0,
    height_mm: 51.0,
    thickness_mm: 0.35,
};

// ---------------------------------------------------------------------------
// Consumer shape
// ---------------------------------------------------------------------------

/// Physical card dimensions in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dimensions {
    /// Card width.
    pub width_mm: f64,
    /// Card height.
    pub height_mm: f64,
    /// Stock thickness.
    pub thickness_mm: f64,
}

/// One foil application: the mask plus an optional colour sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FoilLayer {
    /// Colour sample of the foil artwork.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_url: Option<String>,
    /// The white-on-transparent mask.
    pub mask_url: String,
}

/// One spot-UV application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UvLayer {
    /// The UV mask.
    pub mask_url: String,
}

/// One emboss/deboss application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbossLayer {
    /// The relief mask.
    pub mask_url: String,
    /// `"raised"` or `"deboss"`.
    #[serde(rename = "type")]
    pub kind: String,
}

/// Render-ready layer stack for one card face.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SideLayers {
    /// Printed artwork.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub albedo_url: Option<String>,
    /// Die-cut vector outline.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub die_cut_url: Option<String>,
    /// Die-cut raster mask.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub die_cut_mask_url: Option<String>,
    /// Foil applications.
    #[serde(default)]
    pub foil_layers: Vec<FoilLayer>,
    /// Spot-UV applications.
    #[serde(default)]
    pub uv_layers: Vec<UvLayer>,
    /// Emboss/deboss applications.
    #[serde(default)]
    pub emboss_layers: Vec<EmbossLayer>,
}

/// The stable shape served to viewers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerManifest {
    /// Job identifier, echoed from the manifest.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    /// Physical dimensions.
    pub dimensions: Dimensions,
    /// First front card, when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub front: Option<SideLayers>,
    /// First back card, when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub back: Option<SideLayers>,
    /// Every front card in manifest order.
    #[serde(default)]
    pub front_layers: Vec<SideLayers>,
    /// Every back card in manifest order.
    #[serde(default)]
    pub back_layers: Vec<SideLayers>,
    /// The raw v3 manifest, untouched.
    pub parse_result: Value,
}

// ---------------------------------------------------------------------------
// Coercion
// ---------------------------------------------------------------------------

/// Canonical per-card map fields after the duck-typed unions.
#[derive(Debug, Default)]
struct CoercedMaps {
    albedo: Option<String>,
    foil: Option<String>,
    foil_color: Option<String>,
    uv: Option<String>,
    emboss: Option<String>,
    emboss_type: Option<String>,
    diecut: Option<String>,
    diecut_mask: Option<String>,
}

fn pick(rec: &Value, canonical: &str, aliases: &[&str]) -> Option<String> {
    if let Some(s) = rec.get(canonical).and_then(Value::as_str) {
        return Some(s.to_string());
    }
    for alias in aliases {
        if let Some(s) = rec.get(alias).and_then(Value::as_str) {
            debug!(field = canonical, alias, "coerced legacy manifest field");
            return Some(s.to_string());
        }
    }
    None
}

/// The single input-shape coercion: all legacy spellings are resolved here
/// and nowhere else.
fn coerce_card_maps(rec: &Value) -> CoercedMaps {
    CoercedMaps {
        albedo: pick(rec, "albedo", &["print"]),
        foil: pick(rec, "foil", &["foil_mask"]),
        foil_color: pick(rec, "foil_color", &["foilColor"]),
        uv: pick(rec, "uv", &["uv_mask", "spot_uv"]),
        emboss: pick(rec, "emboss", &["emboss_mask"]),
        emboss_type: pick(rec, "emboss_type", &["embossType", "type"]),
        diecut: pick(rec, "diecut", &["die_svg", "die"]),
        diecut_mask: pick(rec, "diecut_mask", &["die_mask", "die_png"]),
    }
}

fn side_layers(rec: &Value, base: &str) -> SideLayers {
    let maps = coerce_card_maps(rec);
    let url = |name: Option<String>| name.map(|n| format!("{base}{n}"));

    let foil_layers = match url(maps.foil) {
        Some(mask_url) => vec![FoilLayer {
            color_url: url(maps.foil_color),
            mask_url,
        }],
        None => Vec::new(),
    };
    let uv_layers = match url(maps.uv) {
        Some(mask_url) => vec![UvLayer { mask_url }],
        None => Vec::new(),
    };
    let emboss_layers = match url(maps.emboss) {
        Some(mask_url) => vec![EmbossLayer {
            mask_url,
            kind: maps.emboss_type.unwrap_or_else(|| "raised".to_string()),
        }],
        None => Vec::new(),
    };

    SideLayers {
        albedo_url: url(maps.albedo),
        die_cut_url: url(maps.diecut),
        die_cut_mask_url: url(maps.diecut_mask),
        foil_layers,
        uv_layers,
        emboss_layers,
    }
}

// ---------------------------------------------------------------------------
// Adaptation
// ---------------------------------------------------------------------------

fn size_mm_of(geometry: &Value, side: &str) -> Option<(f64, f64)> {
    let size = geometry.get(side)?.get("size_mm")?.as_array()?;
    let w = size.first()?.as_f64()?;
    let h = size.get(1)?.as_f64()?;
    Some((w, h))
}

fn artboard0_size(raw: &Value) -> Option<(f64, f64)> {
    let bounds = raw
        .get("doc")?
        .get("artboards")?
        .as_array()?
        .first()?
        .get("bounds_mm")?;
    let edge = |k: &str| bounds.get(k).and_then(Value::as_f64);
    let (l, t, r, b) = (edge("left")?, edge("top")?, edge("right")?, edge("bottom")?);
    Some(((r - l).abs(), (b - t).abs()))
}

fn dimensions_of(raw: &Value) -> Dimensions {
    let geometry = raw.get("geometry").cloned().unwrap_or(Value::Null);
    let size = size_mm_of(&geometry, "front")
        .or_else(|| size_mm_of(&geometry, "back"))
        .or_else(|| artboard0_size(raw));
    match size {
        Some((width_mm, height_mm)) => Dimensions {
            width_mm,
            height_mm,
            thickness_mm: DEFAULT_DIMENSIONS.thickness_mm,
        },
        None => DEFAULT_DIMENSIONS,
    }
}

fn cards_of(raw: &Value, side: &str, base: &str) -> Vec<SideLayers> {
    raw.get("maps")
        .and_then(|m| m.get(format!("{side}_cards")))
        .and_then(Value::as_array)
        .map(|cards| {
            cards
                .iter()
                .map(|entry| side_layers(entry.get("maps").unwrap_or(entry), base))
                .collect()
        })
        .unwrap_or_default()
}

/// Map a stored v3 manifest into the consumer shape.
///
/// Never fails: missing sections degrade to empty layer stacks and default
/// dimensions, and the raw input is always carried under `parseResult`.
pub fn adapt(raw: &Value) -> ConsumerManifest {
    let base = raw
        .get("assets_rel_base")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    let front = raw
        .get("maps")
        .and_then(|m| m.get("front"))
        .filter(|v| !v.is_null())
        .map(|rec| side_layers(rec, &base));
    let back = raw
        .get("maps")
        .and_then(|m| m.get("back"))
        .filter(|v| !v.is_null())
        .map(|rec| side_layers(rec, &base));

    ConsumerManifest {
        job_id: raw
            .get("job_id")
            .and_then(Value::as_str)
            .map(str::to_string),
        dimensions: dimensions_of(raw),
        front,
        back,
        front_layers: cards_of(raw, "front", &base),
        back_layers: cards_of(raw, "back", &base),
        parse_result: raw.clone(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
