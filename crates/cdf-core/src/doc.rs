// SPDX-License-Identifier: MIT OR Apache-2.0
//! Document trees as reported by the rasterizer probe.
//!
//! All geometry is in millimetres with the Y axis growing downward, matching
//! the coordinate space the probe reports artboard bounds in.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// RectMm
// ---------------------------------------------------------------------------

/// An axis-aligned rectangle in millimetres (`left ≤ right`, `top ≤ bottom`
/// once normalized).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RectMm {
    /// Left edge.
    pub left: f64,
    /// Top edge.
    pub top: f64,
    /// Right edge.
    pub right: f64,
    /// Bottom edge.
    pub bottom: f64,
}

impl RectMm {
    /// Construct a rectangle from edges.
    pub fn new(left: f64, top: f64, right: f64, bottom: f64) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Width of the rectangle; negative if not normalized.
    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    /// Height of the rectangle; negative if not normalized.
    pub fn height(&self) -> f64 {
        self.bottom - self.top
    }

    /// Horizontal centre.
    pub fn center_x(&self) -> f64 {
        (self.left + self.right) / 2.0
    }

    /// Vertical centre.
    pub fn center_y(&self) -> f64 {
        (self.top + self.bottom) / 2.0
    }

    /// `true` if either extent is zero or negative.
    pub fn is_degenerate(&self) -> bool {
        self.width() <= 0.0 || self.height() <= 0.0
    }

    /// Return an equivalent rectangle with edges swapped into canonical
    /// order.
    pub fn normalized(&self) -> Self {
        Self {
            left: self.left.min(self.right),
            top: self.top.min(self.bottom),
            right: self.left.max(self.right),
            bottom: self.top.max(self.bottom),
        }
    }

    /// Smallest rectangle containing both `self` and `other`.
    pub fn union(&self, other: &RectMm) -> Self {
        Self {
            left: self.left.min(other.left),
            top: self.top.min(other.top),
            right: self.right.max(other.right),
            bottom: self.bottom.max(other.bottom),
        }
    }

    /// Area of the overlap with `other`, zero when disjoint.
    pub fn intersection_area(&self, other: &RectMm) -> f64 {
        let w = self.right.min(other.right) - self.left.max(other.left);
        let h = self.bottom.min(other.bottom) - self.top.max(other.top);
        if w <= 0.0 || h <= 0.0 { 0.0 } else { w * h }
    }

    /// Grow the rectangle by `amount` on every side.
    pub fn padded(&self, amount: f64) -> Self {
        Self {
            left: self.left - amount,
            top: self.top - amount,
            right: self.right + amount,
            bottom: self.bottom + amount,
        }
    }
}

// ---------------------------------------------------------------------------
// Document tree
// ---------------------------------------------------------------------------

/// A named rectangular page in the source document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artboard {
    /// Artboard name as authored.
    pub name: String,
    /// Zero-based position in the document's artboard list.
    pub index: usize,
    /// Bounds in millimetres.
    pub bounds_mm: RectMm,
}

/// Type tag for a drawable object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrawableKind {
    /// A vector path.
    Path,
    /// A text frame.
    Text,
    /// A placed or embedded raster image.
    Image,
    /// A grouped compound of other drawables reported as one object.
    Group,
    /// Anything the probe could not classify further.
    Other,
}

/// A single graphical object with geometric bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Drawable {
    /// Object name as authored (often empty).
    pub name: String,
    /// Type tag.
    pub kind: DrawableKind,
    /// Bounds in millimetres.
    pub bounds_mm: RectMm,
    /// Author-time visibility flag.
    pub visible: bool,
    /// Author-time lock flag.
    pub locked: bool,
    /// Opacity in percent (0–100).
    pub opacity: f64,
    /// Ordered ancestor names from the root layer to this object's
    /// container.
    pub layer_path: Vec<String>,
}

/// A layer: named container of drawables and sub-layers, both ordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    /// Layer name as authored.
    pub name: String,
    /// Author-time visibility flag.
    pub visible: bool,
    /// Author-time lock flag.
    pub locked: bool,
    /// Ordered child layers.
    #[serde(default)]
    pub sublayers: Vec<Layer>,
    /// Ordered drawables directly in this layer.
    #[serde(default)]
    pub drawables: Vec<Drawable>,
}

/// A whole document as reported by the rasterizer probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Short document name (no extension).
    pub name: String,
    /// Full source filename.
    pub full_name: String,
    /// Ordered artboards.
    pub artboards: Vec<Artboard>,
    /// Ordered root layers.
    pub layers: Vec<Layer>,
}

impl Document {
    /// Visit every drawable in pre-order: for each layer its drawables in
    /// document order, then its sub-layers recursively.
    ///
    /// The callback receives the ancestor name chain (root layer first), the
    /// effective visibility (false as soon as any enclosing layer is
    /// hidden), and the drawable.
    pub fn for_each_drawable<F>(&self, mut f: F)
    where
        F: FnMut(&[String], bool, &Drawable),
    {
        let mut chain: Vec<String> = Vec::new();
        for layer in &self.layers {
            visit_layer(layer, &mut chain, true, &mut f);
        }
    }
}

fn visit_layer<F>(layer: &Layer, chain: &mut Vec<String>, parent_visible: bool, f: &mut F)
where
    F: FnMut(&[String], bool, &Drawable),
{
    let visible = parent_visible && layer.visible;
    chain.push(layer.name.clone());
    for drawable in &layer.drawables {
        f(chain, visible && drawable.visible, drawable);
    }
    for sub in &layer.sublayers {
        visit_layer(sub, chain, visible, f);
    }
    chain.pop();
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(l: f64, t: f64, r: f64, b: f64) -> RectMm {
        RectMm::new(l, t, r, b)
    }

    fn drawable(name: &str) -> Drawable {
        Drawable {
            name: name.into(),
            kind: DrawableKind::Path,
            bounds_mm: rect(0.0, 0.0, 10.0, 10.0),
            visible: true,
            locked: false,
            opacity: 100.0,
            layer_path: vec![],
        }
    }

    #[test]
    fn union_covers_both() {
        let u = rect(0.0, 0.0, 10.0, 10.0).union(&rect(5.0, -5.0, 20.0, 8.0));
        assert_eq!(u, rect(0.0, -5.0, 20.0, 10.0));
    }

    #[test]
    fn intersection_area_disjoint_is_zero() {
        let a = rect(0.0, 0.0, 10.0, 10.0);
        let b = rect(20.0, 20.0, 30.0, 30.0);
        assert_eq!(a.intersection_area(&b), 0.0);
    }

    #[test]
    fn intersection_area_partial() {
        let a = rect(0.0, 0.0, 10.0, 10.0);
        let b = rect(5.0, 5.0, 15.0, 15.0);
        assert_eq!(a.intersection_area(&b), 25.0);
    }

    #[test]
    fn zero_area_rect_is_degenerate() {
        assert!(rect(3.0, 4.0, 3.0, 9.0).is_degenerate());
        assert!(!rect(0.0, 0.0, 1.0, 1.0).is_degenerate());
    }

    #[test]
    fn normalized_swaps_edges() {
        let r = rect(10.0, 8.0, 2.0, 1.0).normalized();
        assert_eq!(r, rect(2.0, 1.0, 10.0, 8.0));
    }

    #[test]
    fn walk_is_preorder_with_chain() {
        let doc = Document {
            name: "card".into(),
            full_name: "card.ai".into(),
            artboards: vec![],
            layers: vec![Layer {
                name: "root".into(),
                visible: true,
                locked: false,
                drawables: vec![drawable("a")],
                sublayers: vec![Layer {
                    name: "child".into(),
                    visible: true,
                    locked: false,
                    drawables: vec![drawable("b")],
                    sublayers: vec![],
                }],
            }],
        };

        let mut seen = Vec::new();
        doc.for_each_drawable(|chain, _, d| {
            seen.push((chain.to_vec(), d.name.clone()));
        });

        assert_eq!(
            seen,
            vec![
                (vec!["root".to_string()], "a".to_string()),
                (vec!["root".to_string(), "child".to_string()], "b".to_string()),
            ]
        );
    }

    #[test]
    fn hidden_layer_hides_descendants() {
        let doc = Document {
            name: "card".into(),
            full_name: "card.ai".into(),
            artboards: vec![],
            layers: vec![Layer {
                name: "off".into(),
                visible: false,
                locked: false,
                drawables: vec![],
                sublayers: vec![Layer {
                    name: "inner".into(),
                    visible: true,
                    locked: false,
                    drawables: vec![drawable("x")],
                    sublayers: vec![],
                }],
            }],
        };

        let mut effective = Vec::new();
        doc.for_each_drawable(|_, vis, _| effective.push(vis));
        assert_eq!(effective, vec![false]);
    }

    #[test]
    fn tree_json_roundtrip() {
        let doc = Document {
            name: "biz".into(),
            full_name: "biz.pdf".into(),
            artboards: vec![Artboard {
                name: "front".into(),
                index: 0,
                bounds_mm: rect(0.0, 0.0, 89.0, 51.0),
            }],
            layers: vec![],
        };
        let json = serde_json::to_string(&doc).unwrap();
        let back: Document = serde_json::from_str(&json).unwrap();
        assert_eq!(back, doc);
    }
}
