// SPDX-License-Identifier: MIT OR Apache-2.0
//! Manifest assembly and adaptation.
//!
//! [`assemble`] merges the export plan, the produced files, and the raw item
//! list into the versioned v3 manifest; [`adapt`] maps a stored v3 manifest
//! into the camelCase consumer shape on the retrieval path.

#![deny(unsafe_code)]

mod adapt;
mod assemble;

pub use adapt::{
    adapt, ConsumerManifest, Dimensions, EmbossLayer, FoilLayer, SideLayers, UvLayer,
};
pub use assemble::{assemble, AssembleError, AssembleInput};

/// Filename of the manifest inside a job's result directory.
pub const MANIFEST_FILENAME: &str = "manifest.json";
