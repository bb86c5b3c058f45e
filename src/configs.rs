#![warn(clippy::pedantic)]
#![allow(
    clippy::cast_sign_loss,
    clippy::cast_possible_truncation,
    clippy::missing_errors_doc
)]

use crate::characterization::Characterization;
use crate::decimation::DecimationSetup;
use crate::frame::CHANNELS;
use crate::interferometer::{CalibrationModel, ChannelCalibration};
use crate::pipeline::Pipeline;
use crate::util::{tomlget, tomlget_or};

/// Reads a full calibration parameter set from the usual config sections
/// (`[min_intensities]`, `[max_intensities]`, `[output_phases]`,
/// `[system_phases]`, keyed `detector_1..3`). Every calibrated value must be
/// present; validation happens in `CalibrationModel::new`.
pub fn calibration_from_config(cfg: &toml::Value) -> Result<CalibrationModel, String> {
    let mut channels = [ChannelCalibration::default(); CHANNELS];
    for (index, channel) in channels.iter_mut().enumerate() {
        let key = format!("detector_{}", index + 1);
        let key = key.as_str();
        channel.min_intensity = tomlget!(cfg, "min_intensities", key, as_float, f64);
        channel.max_intensity = tomlget!(cfg, "max_intensities", key, as_float, f64);
        channel.output_phase = tomlget!(cfg, "output_phases", key, as_float, f64);
        channel.system_phase = tomlget!(cfg, "system_phases", key, as_float, f64);
    }
    let swapped = tomlget_or!(cfg, "output_phases", "phases_swapped", as_bool, false);
    CalibrationModel::new(channels, swapped).map_err(|error| error.to_string())
}

pub fn decimation_from_config(cfg: &toml::Value) -> Result<DecimationSetup, String> {
    let mut out = DecimationSetup::new();
    out.amplification(tomlget_or!(
        cfg,
        "decimation",
        "amplification",
        as_float,
        f64,
        100.0
    ));
    out.thresholds(
        tomlget_or!(cfg, "decimation", "low_threshold", as_float, f64, 0.1),
        tomlget_or!(cfg, "decimation", "high_threshold", as_float, f64, 0.9),
    );
    Ok(out)
}

pub fn characterization_from_config(cfg: &toml::Value) -> Result<Characterization, String> {
    let mut out = Characterization::new();
    out.edge_margin(tomlget_or!(
        cfg,
        "characterization",
        "edge_margin",
        as_integer,
        usize,
        0
    ));
    out.fit
        .step_size(tomlget_or!(
            cfg,
            "characterization",
            "step_size",
            as_float,
            f64,
            8e-2
        ))
        .gradient_tolerance(tomlget_or!(
            cfg,
            "characterization",
            "gradient_tolerance",
            as_float,
            f64,
            1e-4
        ))
        .max_iterations(tomlget_or!(
            cfg,
            "characterization",
            "max_iterations",
            as_integer,
            u32,
            1000
        ));
    Ok(out)
}

pub fn pipeline_from_config(cfg: &toml::Value) -> Result<Pipeline, String> {
    let model = calibration_from_config(cfg)?;
    let decimation = decimation_from_config(cfg)?;
    let mut pipeline = Pipeline::new(decimation, model);
    pipeline.verbose(tomlget_or!(cfg, "mode", "verbose", as_bool, false));
    Ok(pipeline)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
        [mode]
        verbose = true

        [decimation]
        amplification = 50.0

        [characterization]
        edge_margin = 200
        gradient_tolerance = 1e-6

        [min_intensities]
        detector_1 = 0.5
        detector_2 = 0.4
        detector_3 = 0.6

        [max_intensities]
        detector_1 = 2.5
        detector_2 = 2.2
        detector_3 = 2.9

        [output_phases]
        detector_1 = 0.0
        detector_2 = 2.1
        detector_3 = 4.2
        phases_swapped = false

        [system_phases]
        detector_1 = 0.0
        detector_2 = 2.0
        detector_3 = 4.3
    "#;

    #[test]
    fn reads_calibration_sections() {
        let cfg: toml::Value = CONFIG.parse().unwrap();
        let model = calibration_from_config(&cfg).unwrap();
        assert!(!model.swapped());
        assert!((model.channel(1).min_intensity - 0.4).abs() < 1e-12);
        assert!((model.channel(2).max_intensity - 2.9).abs() < 1e-12);
        assert!((model.channel(1).output_phase - 2.1).abs() < 1e-12);
        assert!((model.channel(2).system_phase - 4.3).abs() < 1e-12);
    }

    #[test]
    fn missing_key_is_an_error() {
        let cfg: toml::Value = "[min_intensities]\ndetector_1 = 0.5".parse().unwrap();
        let error = calibration_from_config(&cfg).unwrap_err();
        assert!(error.contains("max_intensities"), "{error}");
    }

    #[test]
    fn optional_settings_fall_back_to_defaults() {
        let cfg: toml::Value = "[decimation]".parse().unwrap();
        let setup = decimation_from_config(&cfg).unwrap();
        assert!((setup.amplification - 100.0).abs() < 1e-12);
        let characterization = characterization_from_config(&cfg).unwrap();
        assert_eq!(characterization.edge_margin, 0);
        assert_eq!(characterization.fit.max_iterations, 1000);
    }

    #[test]
    fn configured_settings_override_defaults() {
        let cfg: toml::Value = CONFIG.parse().unwrap();
        let setup = decimation_from_config(&cfg).unwrap();
        assert!((setup.amplification - 50.0).abs() < 1e-12);
        let characterization = characterization_from_config(&cfg).unwrap();
        assert_eq!(characterization.edge_margin, 200);
        assert!((characterization.fit.gradient_tolerance - 1e-6).abs() < 1e-18);
    }

    #[test]
    fn calibration_serde_round_trip() {
        let cfg: toml::Value = CONFIG.parse().unwrap();
        let model = calibration_from_config(&cfg).unwrap();
        let serialized = toml::to_string(&model).unwrap();
        let restored: CalibrationModel = toml::from_str(&serialized).unwrap();
        assert_eq!(restored, model);
    }

    #[test]
    fn serde_rejects_malformed_model() {
        // inverted bounds on channel 2 must fail at deserialization time
        let text = "min_intensities = [0.0, 5.0, 0.0]\n\
                    max_intensities = [1.0, 1.0, 1.0]\n\
                    output_phases = [0.0, 2.1, 4.2]\n\
                    system_phases = [0.0, 0.0, 0.0]\n\
                    phases_swapped = false\n";
        assert!(toml::from_str::<CalibrationModel>(text).is_err());
    }

    #[test]
    fn pipeline_from_full_config() {
        let cfg: toml::Value = CONFIG.parse().unwrap();
        assert!(pipeline_from_config(&cfg).is_ok());
    }
}
