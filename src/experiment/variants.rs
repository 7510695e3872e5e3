//! The four sweep variants.
//!
//! Each variant is a configuration value: which axes are swept (outermost
//! first), which detector supplies frames, the stack title and the operator
//! prompt shown before it runs.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::experiment::controller::AxisRequest;

/// Name of the rotated deflection axis.
pub const DEFLECTION_AXIS: &str = "deflection";
/// Name of the drift-tube energy axis.
pub const ENERGY_AXIS: &str = "energy";
/// Name of the defocus/height axis.
pub const DEFOCUS_AXIS: &str = "defocus";

/// Which detector a variant acquires from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    /// Fast ronchigram camera
    Ronchigram,
    /// EELS spectrometer camera
    Eels,
}

/// A sweep configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SweepVariant {
    /// 2-axis deflection grid, ronchigram frames
    DeflectionRonchigram,
    /// 2-axis deflection grid, EELS frames
    DeflectionEels,
    /// Energy outermost, then the deflection grid, EELS frames
    EnergyDeflectionEels,
    /// Defocus/height only, EELS frames
    DefocusEels,
}

impl SweepVariant {
    /// All variants in the order a session offers them.
    pub const ALL: [SweepVariant; 4] = [
        SweepVariant::DeflectionRonchigram,
        SweepVariant::DeflectionEels,
        SweepVariant::EnergyDeflectionEels,
        SweepVariant::DefocusEels,
    ];

    /// Swept axis names, outermost first.
    pub fn axis_names(self) -> &'static [&'static str] {
        match self {
            SweepVariant::DeflectionRonchigram | SweepVariant::DeflectionEels => {
                &[DEFLECTION_AXIS]
            }
            SweepVariant::EnergyDeflectionEels => &[ENERGY_AXIS, DEFLECTION_AXIS],
            SweepVariant::DefocusEels => &[DEFOCUS_AXIS],
        }
    }

    /// Plan requests using each axis's default grid.
    pub fn requests(self) -> Vec<AxisRequest> {
        self.axis_names()
            .iter()
            .map(|name| AxisRequest::new(name))
            .collect()
    }

    /// Detector supplying frames.
    pub fn detector(self) -> DetectorKind {
        match self {
            SweepVariant::DeflectionRonchigram => DetectorKind::Ronchigram,
            _ => DetectorKind::Eels,
        }
    }

    /// Title the finished stack is published under.
    pub fn title(self) -> &'static str {
        match self {
            SweepVariant::DeflectionRonchigram => "Ronchi_data",
            SweepVariant::DeflectionEels => "EELS_data_3D",
            SweepVariant::EnergyDeflectionEels => "EELS_data_5D",
            SweepVariant::DefocusEels => "EELS_data_thru_focal",
        }
    }

    /// Confirmation asked of the operator before running.
    pub fn prompt(self) -> &'static str {
        match self {
            SweepVariant::DeflectionRonchigram => "Is the detector mode in CCD?",
            SweepVariant::DeflectionEels => {
                "Is the detector mode in EELS now and is the slit in? \
                 Also, you do not want to measure chromatic aberration?"
            }
            SweepVariant::EnergyDeflectionEels => {
                "Is the detector mode in EELS now and is the slit in? \
                 Also, you want to measure both chromatic and geometric aberration?"
            }
            SweepVariant::DefocusEels => {
                "Is the detector mode in EELS now and is the slit in? \
                 You want to measure via through focal series?"
            }
        }
    }
}

impl fmt::Display for SweepVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SweepVariant::DeflectionRonchigram => "deflection-ronchigram",
            SweepVariant::DeflectionEels => "deflection-eels",
            SweepVariant::EnergyDeflectionEels => "energy-deflection-eels",
            SweepVariant::DefocusEels => "defocus-eels",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_energy_variant_nests_energy_outermost() {
        let names: Vec<String> = SweepVariant::EnergyDeflectionEels
            .requests()
            .into_iter()
            .map(|r| r.axis)
            .collect();
        assert_eq!(names, vec![ENERGY_AXIS, DEFLECTION_AXIS]);
    }

    #[test]
    fn test_only_first_variant_uses_ronchigram() {
        let ronchi: Vec<_> = SweepVariant::ALL
            .iter()
            .filter(|v| v.detector() == DetectorKind::Ronchigram)
            .collect();
        assert_eq!(ronchi, vec![&SweepVariant::DeflectionRonchigram]);
    }

    #[test]
    fn test_titles_are_distinct() {
        let mut titles: Vec<_> = SweepVariant::ALL.iter().map(|v| v.title()).collect();
        titles.sort_unstable();
        titles.dedup();
        assert_eq!(titles.len(), 4);
    }

    #[test]
    fn test_display_matches_cli_name() {
        for variant in SweepVariant::ALL {
            let parsed = SweepVariant::from_str(&variant.to_string(), false).unwrap();
            assert_eq!(parsed, variant);
        }
    }
}
