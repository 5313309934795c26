//! Conversion request types.
//!
//! A [`ConversionRequest`] is what the Client Driver assembles from user
//! input; it may be incomplete (an unselected format, an empty CRS). Calling
//! [`ConversionRequest::validate`] turns it into [`ConversionParams`], the
//! fully-populated form the rest of the pipeline works with. Once validation
//! has passed nothing downstream needs to re-check for missing fields.

use crate::error::GeoConvertError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// MIME type used when the caller could not determine one.
pub const FALLBACK_MIME_TYPE: &str = "application/octet-stream";

/// Largest accepted simplification tolerance.
pub const MAX_SIMPLIFICATION: u8 = 100;

/// Spatial file formats understood by the conversion collaborator.
///
/// Serialised as the lowercase name, which is what the collaborator expects
/// in `inputFormat` / `outputFormat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpatialFormat {
    GeoJson,
    Csv,
    Parquet,
    GeoParquet,
    Shapefile,
    Geodatabase,
}

impl SpatialFormat {
    /// Every supported format, in display order.
    pub const ALL: [SpatialFormat; 6] = [
        SpatialFormat::GeoJson,
        SpatialFormat::Csv,
        SpatialFormat::Parquet,
        SpatialFormat::GeoParquet,
        SpatialFormat::Shapefile,
        SpatialFormat::Geodatabase,
    ];

    /// Wire identifier, e.g. `"geoparquet"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            SpatialFormat::GeoJson => "geojson",
            SpatialFormat::Csv => "csv",
            SpatialFormat::Parquet => "parquet",
            SpatialFormat::GeoParquet => "geoparquet",
            SpatialFormat::Shapefile => "shapefile",
            SpatialFormat::Geodatabase => "geodatabase",
        }
    }

    /// Human-facing name, e.g. `"GeoParquet"`.
    pub fn display_name(&self) -> &'static str {
        match self {
            SpatialFormat::GeoJson => "GeoJSON",
            SpatialFormat::Csv => "CSV",
            SpatialFormat::Parquet => "Parquet",
            SpatialFormat::GeoParquet => "GeoParquet",
            SpatialFormat::Shapefile => "Shapefile",
            SpatialFormat::Geodatabase => "Geodatabase",
        }
    }
}

impl fmt::Display for SpatialFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for SpatialFormat {
    type Err = GeoConvertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        SpatialFormat::ALL
            .into_iter()
            .find(|f| f.as_str() == needle)
            .ok_or_else(|| {
                GeoConvertError::validation(format!(
                    "Unsupported format '{}'. Expected one of: geojson, csv, parquet, geoparquet, shapefile, geodatabase.",
                    s.trim()
                ))
            })
    }
}

/// The raw request as assembled by a Client Driver.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionRequest {
    pub source_file_name: String,
    pub declared_mime_type: String,
    pub input_format: Option<SpatialFormat>,
    pub output_format: Option<SpatialFormat>,
    /// EPSG code, e.g. `"EPSG:4326"`.
    #[serde(rename = "inputCRS")]
    pub input_crs: String,
    #[serde(rename = "outputCRS")]
    pub output_crs: String,
    pub simplification_tolerance: u8,
}

impl ConversionRequest {
    /// Check that every field needed to start a workflow is present.
    ///
    /// Fails with [`GeoConvertError::Validation`] naming every missing field
    /// in one message so the user can fix them all at once.
    pub fn validate(&self) -> Result<ConversionParams, GeoConvertError> {
        let mut missing = Vec::new();
        if self.source_file_name.trim().is_empty() {
            missing.push("file");
        }
        if self.declared_mime_type.trim().is_empty() {
            missing.push("file type");
        }
        if self.input_format.is_none() {
            missing.push("input format");
        }
        if self.output_format.is_none() {
            missing.push("output format");
        }
        if self.input_crs.trim().is_empty() {
            missing.push("input CRS");
        }
        if self.output_crs.trim().is_empty() {
            missing.push("output CRS");
        }

        let (Some(input_format), Some(output_format)) = (self.input_format, self.output_format)
        else {
            return Err(missing_fields(&missing));
        };
        if !missing.is_empty() {
            return Err(missing_fields(&missing));
        }

        if self.simplification_tolerance > MAX_SIMPLIFICATION {
            return Err(GeoConvertError::validation(format!(
                "Simplification tolerance must be 0–{MAX_SIMPLIFICATION}, got {}",
                self.simplification_tolerance
            )));
        }

        Ok(ConversionParams {
            source_file_name: self.source_file_name.trim().to_string(),
            mime_type: self.declared_mime_type.trim().to_string(),
            input_format,
            output_format,
            input_crs: self.input_crs.trim().to_string(),
            output_crs: self.output_crs.trim().to_string(),
            simplification: self.simplification_tolerance,
        })
    }
}

fn missing_fields(missing: &[&str]) -> GeoConvertError {
    GeoConvertError::validation(format!(
        "Please select a file, input/output formats, and CRS (missing: {}).",
        missing.join(", ")
    ))
}

/// A validated [`ConversionRequest`]: every field populated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionParams {
    pub source_file_name: String,
    pub mime_type: String,
    pub input_format: SpatialFormat,
    pub output_format: SpatialFormat,
    #[serde(rename = "inputCRS")]
    pub input_crs: String,
    #[serde(rename = "outputCRS")]
    pub output_crs: String,
    pub simplification: u8,
}
