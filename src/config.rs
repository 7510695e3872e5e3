//! Sweep configuration using Figment.
//!
//! Settings are layered, highest precedence last:
//! 1. Built-in defaults (the tuned values the instrument was commissioned with)
//! 2. A TOML file (`config/sweep.toml` by default; a missing file is skipped)
//! 3. Environment variables prefixed with `STEMSWEEP_`, nested keys split on `__`
//!
//! # Environment Variable Overrides
//!
//! ```text
//! STEMSWEEP_APPLICATION__LOG_LEVEL=debug
//! STEMSWEEP_ENERGY__STEP=0.005
//! STEMSWEEP_SWEEP__CANCEL_SCOPE=entire_sweep
//! ```
//!
//! # Example
//!
//! ```no_run
//! use stem_sweep::config::SweepSettings;
//!
//! let settings = SweepSettings::load_from("config/sweep.toml")?;
//! println!("Deflection step: {}", settings.deflection.step);
//! # Ok::<(), stem_sweep::error::SweepError>(())
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{AppResult, SweepError};
use crate::experiment::controller::CancelScope;
use crate::experiment::grid::GridSpec;
use crate::experiment::plan::frame_count;
use crate::experiment::variants::{
    DetectorKind, SweepVariant, DEFLECTION_AXIS, DEFOCUS_AXIS, ENERGY_AXIS,
};
use crate::hardware::axis::{ControlAxis, DeflectionRotation};

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/sweep.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "STEMSWEEP_";

/// Top-level settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepSettings {
    /// Application settings
    pub application: ApplicationSettings,
    /// Rotated deflection pair
    pub deflection: DeflectionSettings,
    /// Drift-tube energy offset
    pub energy: ScalarAxisSettings,
    /// Defocus / stage height
    pub defocus: ScalarAxisSettings,
    /// Detector source ids
    pub detectors: DetectorSettings,
    /// Sweep behaviour
    pub sweep: SweepBehaviour,
}

/// Application-level settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationSettings {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

/// Deflection pair settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeflectionSettings {
    /// Physical X channel
    pub control_a: String,
    /// Physical Y channel
    pub control_b: String,
    /// Unit of the logical coordinates
    pub unit: String,
    /// Hard bound on |Da|
    pub bound_a: f64,
    /// Hard bound on |Db|
    pub bound_b: f64,
    /// Settle time after each command
    #[serde(with = "humantime_serde")]
    pub settle: Duration,
    /// Default grid step
    pub step: f64,
    /// Default grid maximum excursion
    pub max: f64,
    /// Logical-to-physical rotation
    pub rotation: DeflectionRotation,
}

/// Single-channel axis settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarAxisSettings {
    /// Control channel
    pub control: String,
    /// Unit of the commanded value
    pub unit: String,
    /// Hard bound on |value|
    pub bound: f64,
    /// Settle time after each command
    #[serde(with = "humantime_serde")]
    pub settle: Duration,
    /// Default grid step
    pub step: f64,
    /// Default grid maximum excursion
    pub max: f64,
}

/// Detector source ids known to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorSettings {
    /// Ronchigram camera source id
    pub ronchigram: String,
    /// EELS camera source id
    pub eels: String,
}

/// Sweep behaviour switches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepBehaviour {
    /// How far cancellation reaches in multi-axis sweeps
    #[serde(default)]
    pub cancel_scope: CancelScope,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            application: ApplicationSettings {
                name: "stem_sweep".to_string(),
                log_level: "info".to_string(),
            },
            deflection: DeflectionSettings {
                control_a: "CapPure.a".to_string(),
                control_b: "CapPure.b".to_string(),
                unit: "rad".to_string(),
                bound_a: 1.0,
                bound_b: 3.0,
                settle: Duration::from_millis(1500),
                step: 8e-3,
                max: 24e-3,
                rotation: DeflectionRotation::default(),
            },
            energy: ScalarAxisSettings {
                control: "DriftTubeVolts".to_string(),
                unit: "V".to_string(),
                bound: 2.0,
                settle: Duration::from_millis(1500),
                step: 10e-3,
                max: 20e-3,
            },
            defocus: ScalarAxisSettings {
                control: "C10".to_string(),
                unit: "m".to_string(),
                bound: 6e-6,
                settle: Duration::from_secs(3),
                step: 1e-6,
                max: 5e-6,
            },
            detectors: DetectorSettings {
                ronchigram: "autotuning_camera".to_string(),
                eels: "eels_camera".to_string(),
            },
            sweep: SweepBehaviour {
                cancel_scope: CancelScope::InnermostLoop,
            },
        }
    }
}

impl SweepSettings {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from `path` and the environment, then validate.
    ///
    /// # Errors
    /// `Config` if a layer cannot be parsed, `Configuration` if validation fails.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let settings: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validate values that parse but make no physical sense.
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(SweepError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let d = &self.deflection;
        require_name(DEFLECTION_AXIS, "control_a", &d.control_a)?;
        require_name(DEFLECTION_AXIS, "control_b", &d.control_b)?;
        require_positive(DEFLECTION_AXIS, "bound_a", d.bound_a)?;
        require_positive(DEFLECTION_AXIS, "bound_b", d.bound_b)?;
        GridSpec::new(d.step, d.max).validate(DEFLECTION_AXIS)?;
        if !d.rotation.base_angle_rad.is_finite() || !d.rotation.offset_rad.is_finite() {
            return Err(SweepError::Configuration(
                "deflection rotation must be finite".into(),
            ));
        }

        for (name, axis) in [(ENERGY_AXIS, &self.energy), (DEFOCUS_AXIS, &self.defocus)] {
            require_name(name, "control", &axis.control)?;
            require_positive(name, "bound", axis.bound)?;
            GridSpec::new(axis.step, axis.max).validate(name)?;
        }

        for variant in SweepVariant::ALL {
            let dimensions: Vec<usize> = variant
                .axis_names()
                .iter()
                .filter_map(|name| self.axis(name))
                .flat_map(|axis| vec![axis.default_grid.point_count(); axis.components()])
                .collect();
            frame_count(&dimensions)?;
        }

        require_name("detectors", "ronchigram", &self.detectors.ronchigram)?;
        require_name("detectors", "eels", &self.detectors.eels)?;
        Ok(())
    }

    /// Deflection axis descriptor.
    pub fn deflection_axis(&self) -> ControlAxis {
        let d = &self.deflection;
        ControlAxis::rotated_pair(
            DEFLECTION_AXIS,
            &d.unit,
            &d.control_a,
            &d.control_b,
            d.rotation,
            (d.bound_a, d.bound_b),
            d.settle,
            GridSpec::new(d.step, d.max),
        )
    }

    /// Energy axis descriptor.
    pub fn energy_axis(&self) -> ControlAxis {
        scalar_axis(ENERGY_AXIS, &self.energy)
    }

    /// Defocus axis descriptor.
    pub fn defocus_axis(&self) -> ControlAxis {
        scalar_axis(DEFOCUS_AXIS, &self.defocus)
    }

    /// Axis descriptor by name.
    pub fn axis(&self, name: &str) -> Option<ControlAxis> {
        match name {
            DEFLECTION_AXIS => Some(self.deflection_axis()),
            ENERGY_AXIS => Some(self.energy_axis()),
            DEFOCUS_AXIS => Some(self.defocus_axis()),
            _ => None,
        }
    }

    /// Host source id for a detector kind.
    pub fn detector_id(&self, kind: DetectorKind) -> &str {
        match kind {
            DetectorKind::Ronchigram => &self.detectors.ronchigram,
            DetectorKind::Eels => &self.detectors.eels,
        }
    }
}

fn scalar_axis(name: &str, s: &ScalarAxisSettings) -> ControlAxis {
    ControlAxis::scalar(
        name,
        &s.unit,
        &s.control,
        s.bound,
        s.settle,
        GridSpec::new(s.step, s.max),
    )
}

fn require_name(section: &str, key: &str, value: &str) -> AppResult<()> {
    if value.trim().is_empty() {
        return Err(SweepError::Configuration(format!(
            "{section}: '{key}' cannot be empty"
        )));
    }
    Ok(())
}

fn require_positive(section: &str, key: &str, value: f64) -> AppResult<()> {
    if !(value.is_finite() && value > 0.0) {
        return Err(SweepError::Configuration(format!(
            "{section}: '{key}' must be positive, got {value}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_are_valid() {
        let settings = SweepSettings::default();
        settings.validate().unwrap();
        assert_eq!(settings.defocus.settle, Duration::from_secs(3));
        assert_eq!(settings.deflection.rotation.offset_rad, 0.01448);
    }

    #[test]
    #[serial]
    fn test_missing_file_falls_back_to_defaults() {
        let settings = SweepSettings::load_from("does/not/exist.toml").unwrap();
        assert_eq!(settings, SweepSettings::default());
    }

    #[test]
    #[serial]
    fn test_file_overrides_defaults() {
        let file = write_config(
            r#"
            [energy]
            step = 0.005
            settle = "250ms"

            [sweep]
            cancel_scope = "entire_sweep"
            "#,
        );
        let settings = SweepSettings::load_from(file.path()).unwrap();

        assert_eq!(settings.energy.step, 0.005);
        assert_eq!(settings.energy.settle, Duration::from_millis(250));
        assert_eq!(settings.energy.control, "DriftTubeVolts");
        assert_eq!(settings.sweep.cancel_scope, CancelScope::EntireSweep);
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        let file = write_config("[defocus]\nstep = 2e-6\n");
        std::env::set_var("STEMSWEEP_DEFOCUS__STEP", "5e-7");
        let result = SweepSettings::load_from(file.path());
        std::env::remove_var("STEMSWEEP_DEFOCUS__STEP");

        assert_eq!(result.unwrap().defocus.step, 5e-7);
    }

    #[test]
    #[serial]
    fn test_invalid_values_rejected() {
        let file = write_config("[energy]\nbound = -1.0\n");
        let err = SweepSettings::load_from(file.path()).unwrap_err();
        assert!(err.to_string().contains("bound"));

        let file = write_config("[application]\nlog_level = \"loud\"\n");
        assert!(SweepSettings::load_from(file.path()).is_err());
    }

    #[test]
    #[serial]
    fn test_oversized_grid_rejected() {
        let file = write_config("[energy]\nstep = 1e-12\nmax = 1.0\n");
        let err = SweepSettings::load_from(file.path()).unwrap_err();
        assert!(matches!(err, SweepError::GridTooLarge { ref axis, .. } if axis == "energy"));
    }

    #[test]
    #[serial]
    fn test_oversized_variant_rejected() {
        // 201 x 201 deflection points fit alone but not under five energy steps
        let file = write_config("[deflection]\nstep = 1e-3\nmax = 0.1\n");
        let err = SweepSettings::load_from(file.path()).unwrap_err();
        assert!(matches!(
            err,
            SweepError::PlanTooLarge { ref dimensions, .. } if dimensions == &[5, 201, 201]
        ));
    }

    #[test]
    fn test_axis_descriptors_follow_settings() {
        let settings = SweepSettings::default();
        let deflection = settings.axis(DEFLECTION_AXIS).unwrap();
        assert_eq!(deflection.hard_bounds, vec![1.0, 3.0]);
        assert_eq!(deflection.control_names(), vec!["CapPure.a", "CapPure.b"]);

        let defocus = settings.axis(DEFOCUS_AXIS).unwrap();
        assert_eq!(defocus.settle_time, Duration::from_secs(3));
        assert_eq!(defocus.default_grid.point_count(), 11);

        assert!(settings.axis("stage_z").is_none());
        assert_eq!(settings.detector_id(DetectorKind::Eels), "eels_camera");
    }
}
