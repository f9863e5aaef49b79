// SPDX-License-Identifier: MIT OR Apache-2.0
//! The versioned manifest (v3) describing one job's outputs.
//!
//! The manifest's wire format is snake_case by contract; it predates the
//! camelCase HTTP surface and is consumed verbatim by existing viewers.

use crate::bucket::{Finish, Side};
use crate::doc::{Artboard, DrawableKind, RectMm};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Manifest schema version emitted by this crate.
pub const MANIFEST_VERSION: u32 = 3;

// ---------------------------------------------------------------------------
// Document echo
// ---------------------------------------------------------------------------

/// Document metadata echoed into the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocInfo {
    /// Short document name.
    pub name: String,
    /// Full source filename.
    pub full_name: String,
    /// Unit of every length in the manifest; always `"mm"`.
    pub units: String,
    /// Ordered artboards.
    pub artboards: Vec<Artboard>,
}

// ---------------------------------------------------------------------------
// Items
// ---------------------------------------------------------------------------

/// One classified drawable with its bucket metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestItem {
    /// Object name as authored.
    pub name: String,
    /// Type tag.
    pub kind: DrawableKind,
    /// Resolved card face.
    pub side: Side,
    /// Resolved card index.
    pub card_index: u32,
    /// Resolved finish class.
    pub finish: Finish,
    /// Bounds in millimetres.
    pub bounds_mm: RectMm,
    /// Author-time visibility.
    pub visible: bool,
    /// Opacity in percent.
    pub opacity: f64,
    /// Ordered ancestor names from root to container.
    pub layer_path: Vec<String>,
}

// ---------------------------------------------------------------------------
// Maps
// ---------------------------------------------------------------------------

/// How an emboss mask is to be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbossType {
    /// Raised relief.
    Raised,
    /// Recessed relief.
    Deboss,
}

/// Flat asset filenames for one card.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CardMaps {
    /// Printed artwork, transparent background.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub albedo: Option<String>,
    /// Foil mask (white on transparent).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub foil: Option<String>,
    /// Colour sample of the foil artwork.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub foil_color: Option<String>,
    /// Spot-UV mask.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uv: Option<String>,
    /// Emboss/deboss mask.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emboss: Option<String>,
    /// Whether the emboss mask is raised or recessed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emboss_type: Option<EmbossType>,
    /// Die-cut vector outline.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diecut: Option<String>,
    /// Die-cut raster mask (white = keep, transparent = cut).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diecut_mask: Option<String>,
}

/// Maps for one card, positioned by its index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardMapsEntry {
    /// Zero-based card index.
    pub card_index: u32,
    /// Filename prefix shared by this card's assets.
    pub prefix: String,
    /// The card's asset filenames.
    pub maps: CardMaps,
}

/// The convenience view over all per-card maps.
///
/// `front`/`back` alias the first card of each side for single-card
/// consumers; `front_cards`/`back_cards` carry every card in ascending
/// index order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapsSection {
    /// First front card's maps, when any front card exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub front: Option<CardMaps>,
    /// First back card's maps, when any back card exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub back: Option<CardMaps>,
    /// All front cards, ascending by card index.
    #[serde(default)]
    pub front_cards: Vec<CardMapsEntry>,
    /// All back cards, ascending by card index.
    #[serde(default)]
    pub back_cards: Vec<CardMapsEntry>,
}

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

/// Physical and raster geometry for one card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardGeometry {
    /// Crop size in millimetres, `[width, height]`.
    pub size_mm: [f64; 2],
    /// Crop origin in millimetres, `[x, y]`.
    pub origin_mm: [f64; 2],
    /// Raster size in pixels at `dpi`, `[width, height]`.
    pub px: [u32; 2],
    /// Export resolution.
    pub dpi: u32,
}

/// Geometry for one card, positioned by its index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardGeometryEntry {
    /// Zero-based card index.
    pub card_index: u32,
    /// The card's geometry.
    pub meta: CardGeometry,
}

/// The geometry counterpart of [`MapsSection`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeometrySection {
    /// First front card's geometry, when any front card exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub front: Option<CardGeometry>,
    /// First back card's geometry, when any back card exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub back: Option<CardGeometry>,
    /// All front cards, ascending by card index.
    #[serde(default)]
    pub front_cards: Vec<CardGeometryEntry>,
    /// All back cards, ascending by card index.
    #[serde(default)]
    pub back_cards: Vec<CardGeometryEntry>,
}

// ---------------------------------------------------------------------------
// Diagnostics and top level
// ---------------------------------------------------------------------------

/// Per-side bucket counts keyed by finish name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    /// Front-side counts.
    #[serde(default)]
    pub front: BTreeMap<String, usize>,
    /// Back-side counts.
    #[serde(default)]
    pub back: BTreeMap<String, usize>,
}

/// The manifest describing one job's outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// The job this manifest belongs to.
    pub job_id: Uuid,
    /// Document metadata.
    pub doc: DocInfo,
    /// Every classified drawable.
    pub items: Vec<ManifestItem>,
    /// Per-card asset filenames.
    pub maps: MapsSection,
    /// Per-card geometry.
    pub geometry: GeometrySection,
    /// Per-side bucket counts.
    pub diagnostics: Diagnostics,
    /// Relative path prefix every filename resolves under, `assets/{jobId}/`.
    pub assets_rel_base: String,
    /// Schema version; always [`MANIFEST_VERSION`].
    pub v: u32,
}
