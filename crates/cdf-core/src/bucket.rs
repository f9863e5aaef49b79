// SPDX-License-Identifier: MIT OR Apache-2.0
//! Bucket keys: the `(side, card index, finish)` coordinate every drawable
//! is classified into.

use crate::doc::{DrawableKind, RectMm};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Which face of the card a drawable belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// The front face.
    Front,
    /// The back face.
    Back,
}

impl Side {
    /// Lowercase wire name, also used in asset filename prefixes.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Front => "front",
            Self::Back => "back",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Print-production class distinguishing a drawable's role.
///
/// The declaration order is the classification precedence: when several
/// finish tokens match one name, the earliest variant wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Finish {
    /// Die/laser cut geometry.
    Die,
    /// Raised emboss.
    Emboss,
    /// Recessed deboss.
    Deboss,
    /// Foil stamping.
    Foil,
    /// Spot UV / varnish.
    Uv,
    /// Plain printed artwork (the default).
    Print,
}

impl Finish {
    /// Lowercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Die => "die",
            Self::Emboss => "emboss",
            Self::Deboss => "deboss",
            Self::Foil => "foil",
            Self::Uv => "uv",
            Self::Print => "print",
        }
    }
}

impl fmt::Display for Finish {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The full classification coordinate for one drawable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BucketKey {
    /// Card face.
    pub side: Side,
    /// Zero-based card index within the sheet.
    pub card_index: u32,
    /// Production finish.
    pub finish: Finish,
}

// Ordering groups a side's cards together and keeps finishes in precedence
// order within a card; BTreeMap iteration over buckets is therefore stable.
impl PartialOrd for BucketKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BucketKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.side, self.card_index, self.finish).cmp(&(
            other.side,
            other.card_index,
            other.finish,
        ))
    }
}

impl BucketKey {
    /// Filename prefix for assets of this bucket's card, e.g.
    /// `front_layer_0`.
    pub fn card_prefix(&self) -> String {
        format!("{}_layer_{}", self.side, self.card_index)
    }
}

/// A document drawable plus its resolved bucket key.
///
/// Bounds are carried verbatim from the drawable; they are the sole source
/// of truth for crop computation downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedItem {
    /// Object name as authored.
    pub name: String,
    /// Type tag.
    pub kind: DrawableKind,
    /// Bounds in millimetres.
    pub bounds_mm: RectMm,
    /// Author-time visibility of the drawable itself.
    pub visible: bool,
    /// Opacity in percent (0–100).
    pub opacity: f64,
    /// Ordered ancestor names from root to container.
    pub layer_path: Vec<String>,
    /// The resolved classification coordinate.
    pub key: BucketKey,
}

/// All classified items of a document, keyed by bucket in deterministic
/// order; each bucket's items keep document (pre-order) order.
pub type BucketMap = BTreeMap<BucketKey, Vec<ClassifiedItem>>;
