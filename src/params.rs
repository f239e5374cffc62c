//! Maps "make it N% smaller" onto concrete resolution, quality and strategy.

use std::fmt;
use std::str::FromStr;

use crate::analyzer::Analysis;

pub const MIN_TARGET_PERCENT: u8 = 10;
pub const MAX_TARGET_PERCENT: u8 = 90;

/// Resolution every strategy starts from.
pub const BASE_DPI: u32 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    Lossless,
    Hybrid,
    Aggressive,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Lossless => "lossless",
            Strategy::Hybrid => "hybrid",
            Strategy::Aggressive => "aggressive",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lossless" => Ok(Strategy::Lossless),
            "hybrid" => Ok(Strategy::Hybrid),
            "aggressive" => Ok(Strategy::Aggressive),
            other => Err(format!("unknown strategy '{}'", other)),
        }
    }
}

/// How far resolution and quality are allowed to fall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum QualityFloor {
    LosslessLeaning,
    #[default]
    Balanced,
    Aggressive,
}

impl QualityFloor {
    pub fn min_dpi(&self) -> u32 {
        match self {
            QualityFloor::LosslessLeaning => 150,
            QualityFloor::Balanced => 120,
            QualityFloor::Aggressive => 96,
        }
    }

    pub fn min_quality(&self) -> f64 {
        match self {
            QualityFloor::LosslessLeaning => 0.85,
            QualityFloor::Balanced => 0.70,
            QualityFloor::Aggressive => 0.60,
        }
    }
}

impl fmt::Display for QualityFloor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            QualityFloor::LosslessLeaning => "lossless",
            QualityFloor::Balanced => "balanced",
            QualityFloor::Aggressive => "aggressive",
        })
    }
}

impl FromStr for QualityFloor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lossless" | "lossless-leaning" => Ok(QualityFloor::LosslessLeaning),
            "balanced" => Ok(QualityFloor::Balanced),
            "aggressive" => Ok(QualityFloor::Aggressive),
            other => Err(format!("unknown quality floor '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressionParams {
    pub strategy: Strategy,
    pub resolution_dpi: u32,
    /// JPEG quality in (0, 1].
    pub image_quality: f64,
    pub target_reduction_percent: u8,
    /// Advisory only, for display.
    pub predicted_size_bytes: Option<u64>,
}

impl CompressionParams {
    /// Quality on the 1..=100 scale the JPEG encoder takes.
    pub fn jpeg_quality(&self) -> u8 {
        (self.image_quality * 100.0).round().clamp(1.0, 100.0) as u8
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Pure function from analysis + user intent to execution parameters.
pub fn calculate(
    analysis: &Analysis,
    target_percent: u8,
    floor: QualityFloor,
) -> CompressionParams {
    let target = target_percent.clamp(MIN_TARGET_PERCENT, MAX_TARGET_PERCENT);

    // Text-dominant with a modest target never needs rasterising.
    if analysis.image_ratio < 0.2 && target < 30 {
        return CompressionParams {
            strategy: Strategy::Lossless,
            resolution_dpi: BASE_DPI,
            image_quality: 1.0,
            target_reduction_percent: target,
            predicted_size_bytes: None,
        };
    }

    let min_dpi = floor.min_dpi() as f64;
    let min_quality = floor.min_quality();
    let intensity = target as f64 / 100.0;
    let base = BASE_DPI as f64;

    let dpi = min_dpi.max(base - (base - min_dpi) * intensity * 1.5);
    let quality = min_quality.max(1.0 - (1.0 - min_quality) * intensity);

    let strategy = if analysis.is_scanned || (analysis.image_ratio > 0.8 && intensity > 0.7) {
        Strategy::Aggressive
    } else {
        Strategy::Hybrid
    };

    let predicted = analysis.file_size_bytes as f64 * (1.0 - intensity * 0.8);

    CompressionParams {
        strategy,
        resolution_dpi: dpi.round() as u32,
        image_quality: round2(quality),
        target_reduction_percent: target,
        predicted_size_bytes: Some(predicted.round() as u64),
    }
}
