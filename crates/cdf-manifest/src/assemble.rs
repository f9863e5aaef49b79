// SPDX-License-Identifier: MIT OR Apache-2.0
//! Manifest assembly: plan + produced files + items → manifest v3.

use cdf_core::{
    BucketMap, CardGeometry, CardGeometryEntry, CardMaps, CardMapsEntry, Diagnostics, DocInfo,
    Document, GeometrySection, Manifest, ManifestItem, MapsSection, Side, MANIFEST_VERSION,
    MM_PER_PT,
};
use cdf_error::ErrorCode;
use cdf_plan::{AssetKind, CardPlan, ExportPlan};
use std::path::Path;
use thiserror::Error;
use uuid::Uuid;

/// Errors from manifest assembly.
#[derive(Debug, Error)]
pub enum AssembleError {
    /// A planned asset does not exist on disk at write time.
    #[error("planned asset missing: {name}")]
    MissingAsset {
        /// The missing filename.
        name: String,
    },

    /// A planned asset exists but is zero bytes.
    #[error("planned asset empty: {name}")]
    EmptyAsset {
        /// The empty filename.
        name: String,
    },

    /// Filesystem inspection failed.
    #[error("result directory i/o: {0}")]
    Io(#[from] std::io::Error),
}

impl AssembleError {
    /// The pipeline error code this maps to.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::MissingAsset { .. } | Self::EmptyAsset { .. } => ErrorCode::RendererIncomplete,
            Self::Io(_) => ErrorCode::Internal,
        }
    }
}

/// Everything assembly needs about one finished render.
pub struct AssembleInput<'a> {
    /// The job the manifest belongs to.
    pub job_id: Uuid,
    /// The probed document.
    pub doc: &'a Document,
    /// Classified buckets (for items and diagnostics).
    pub buckets: &'a BucketMap,
    /// The executed export plan.
    pub plan: &'a ExportPlan,
    /// Directory the rasterizer wrote assets into.
    pub result_dir: &'a Path,
    /// Export resolution used.
    pub dpi: u32,
}

/// Build the v3 manifest, verifying every referenced asset exists on disk
/// with non-zero length.
pub fn assemble(input: &AssembleInput<'_>) -> Result<Manifest, AssembleError> {
    let items: Vec<ManifestItem> = input
        .buckets
        .values()
        .flatten()
        .map(|item| ManifestItem {
            name: item.name.clone(),
            kind: item.kind,
            side: item.key.side,
            card_index: item.key.card_index,
            finish: item.key.finish,
            bounds_mm: item.bounds_mm,
            visible: item.visible,
            opacity: item.opacity,
            layer_path: item.layer_path.clone(),
        })
        .collect();

    let mut maps = MapsSection::default();
    let mut geometry = GeometrySection::default();

    for card in &input.plan.cards {
        verify_card_assets(card, input.result_dir)?;

        let card_maps = card_maps_of(card);
        let card_geometry = card_geometry_of(card, input.dpi);

        let maps_entry = CardMapsEntry {
            card_index: card.card_index,
            prefix: card.prefix.clone(),
            maps: card_maps,
        };
        let geometry_entry = CardGeometryEntry {
            card_index: card.card_index,
            meta: card_geometry,
        };

        match card.side {
            Side::Front => {
                maps.front_cards.push(maps_entry);
                geometry.front_cards.push(geometry_entry);
            }
            Side::Back => {
                maps.back_cards.push(maps_entry);
                geometry.back_cards.push(geometry_entry);
            }
        }
    }

    // Legacy single-card aliases point at the lowest-indexed card per side.
    maps.front = maps.front_cards.first().map(|e| e.maps.clone());
    maps.back = maps.back_cards.first().map(|e| e.maps.clone());
    geometry.front = geometry.front_cards.first().map(|e| e.meta.clone());
    geometry.back = geometry.back_cards.first().map(|e| e.meta.clone());

    Ok(Manifest {
        job_id: input.job_id,
        doc: DocInfo {
            name: input.doc.name.clone(),
            full_name: input.doc.full_name.clone(),
            units: "mm".into(),
            artboards: input.doc.artboards.clone(),
        },
        items,
        maps,
        geometry,
        diagnostics: diagnostics_of(input.buckets),
        assets_rel_base: format!("assets/{}/", input.job_id),
        v: MANIFEST_VERSION,
    })
}

fn verify_card_assets(card: &CardPlan, result_dir: &Path) -> Result<(), AssembleError> {
    for entry in &card.entries {
        let path = result_dir.join(&entry.output_name);
        match std::fs::metadata(&path) {
            Ok(meta) if meta.len() > 0 => {}
            Ok(_) => {
                return Err(AssembleError::EmptyAsset {
                    name: entry.output_name.clone(),
                });
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AssembleError::MissingAsset {
                    name: entry.output_name.clone(),
                });
            }
            Err(e) => return Err(AssembleError::Io(e)),
        }
    }
    Ok(())
}

fn card_maps_of(card: &CardPlan) -> CardMaps {
    let mut maps = CardMaps::default();
    for entry in &card.entries {
        let name = Some(entry.output_name.clone());
        match entry.kind {
            AssetKind::Albedo => maps.albedo = name,
            AssetKind::Foil => maps.foil = name,
            AssetKind::FoilColor => maps.foil_color = name,
            AssetKind::Uv => maps.uv = name,
            AssetKind::Emboss => {
                maps.emboss = name;
                maps.emboss_type = card.emboss_type;
            }
            AssetKind::Diecut => maps.diecut = name,
            AssetKind::DiecutMask => maps.diecut_mask = name,
        }
    }
    maps
}

fn card_geometry_of(card: &CardPlan, dpi: u32) -> CardGeometry {
    let crop = card.crop_pt;
    let width_mm = (crop[2] - crop[0]) * MM_PER_PT;
    let height_mm = (crop[3] - crop[1]) * MM_PER_PT;
    CardGeometry {
        size_mm: [width_mm, height_mm],
        origin_mm: [crop[0] * MM_PER_PT, crop[1] * MM_PER_PT],
        px: [px_at(width_mm, dpi), px_at(height_mm, dpi)],
        dpi,
    }
}

fn px_at(mm: f64, dpi: u32) -> u32 {
    (mm / 25.4 * f64::from(dpi)).round() as u32
}

fn diagnostics_of(buckets: &BucketMap) -> Diagnostics {
    let mut diagnostics = Diagnostics::default();
    for (key, items) in buckets {
        let side = match key.side {
            Side::Front => &mut diagnostics.front,
            Side::Back => &mut diagnostics.back,
        };
        *side.entry(key.finish.as_str().to_string()).or_insert(0) += items.len();
    }
    diagnostics
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
