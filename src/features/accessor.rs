//! Resolve one feature/property name to one scalar on one sample.
//!
//! Resolution never fails: anything missing, unprocessed or out of range
//! comes back as NaN.

use indexmap::IndexMap;

use crate::dataset::{DscMeasurement, FtirPeak, Sample, SolubilityMeasurement};
use crate::features::path::{
    DscSegment, FeaturePath, PeakAttr, PropertyDomain, PropertyPath, StageAttr, TransitionAttr,
};

/// Resolve a feature name against `sample.synthesis` / `sample.measurements`
pub fn resolve_feature(sample: &Sample, name: &str) -> f64 {
    match FeaturePath::parse(name) {
        Some(path) => resolve_feature_path(sample, &path),
        None => f64::NAN,
    }
}

/// Resolve a property name against `sample.properties`
pub fn resolve_property(sample: &Sample, name: &str) -> f64 {
    match PropertyPath::parse(name) {
        Some(path) => resolve_property_path(sample, &path),
        None => f64::NAN,
    }
}

pub fn resolve_feature_path(sample: &Sample, path: &FeaturePath) -> f64 {
    let m = &sample.measurements;
    let value = match path {
        FeaturePath::Synthesis(key) => sample.synthesis.get(key).copied(),
        FeaturePath::FtirPeak { wavenumber, attr } => m
            .ftir
            .as_ref()
            .filter(|ftir| ftir.processed)
            .and_then(|ftir| nearest_peak(&ftir.peaks, *wavenumber))
            .and_then(|peak| match attr {
                PeakAttr::Intensity => Some(peak.intensity),
                PeakAttr::Area => peak.area,
                PeakAttr::Position => Some(peak.wavenumber),
            }),
        FeaturePath::FtirIndex(key) => m
            .ftir
            .as_ref()
            .filter(|ftir| ftir.processed)
            .and_then(|ftir| ftir.indices.get(key).copied()),
        FeaturePath::TgaStage { stage, attr } => m
            .tga
            .as_ref()
            .filter(|tga| tga.processed)
            .and_then(|tga| stage.checked_sub(1).and_then(|i| tga.stages.get(i)))
            .map(|s| match attr {
                StageAttr::Onset => s.onset,
                StageAttr::Peak => s.peak,
                StageAttr::Endset => s.endset,
                StageAttr::MassLoss => s.mass_loss,
            }),
        FeaturePath::TgaMetric(key) => m.tga.as_ref().and_then(|tga| tga.metrics.get(key).copied()),
        FeaturePath::DscTransition {
            segment,
            transition,
            attr,
        } => {
            let dsc = match segment {
                DscSegment::Heating => m.dsc_heating.as_ref(),
                DscSegment::Cooling => m.dsc_cooling.as_ref(),
            };
            dsc_value(dsc, transition, *attr)
        }
        FeaturePath::Solubility(rest) => solubility_value(&m.solubility, rest),
        FeaturePath::Other(key) => m.other.get(key).copied(),
    };
    value.unwrap_or(f64::NAN)
}

pub fn resolve_property_path(sample: &Sample, path: &PropertyPath) -> f64 {
    let p = &sample.properties;
    let section = match path.domain {
        PropertyDomain::Ftir => &p.ftir_derived,
        PropertyDomain::Tga => &p.tga_derived,
        PropertyDomain::Dsc => &p.dsc_derived,
        PropertyDomain::Solubility => &p.solubility_derived,
        PropertyDomain::Synthesis => &p.synthesis,
        PropertyDomain::Other => &p.other,
    };
    section.get(&path.key).copied().unwrap_or(f64::NAN)
}

/// Split `<solvent>_<field>` on the longest solvent key the sample has,
/// then read a van 't Hoff parameter or a plain metric
fn solubility_value(solubility: &IndexMap<String, SolubilityMeasurement>, rest: &str) -> Option<f64> {
    let (sol, field) = solubility
        .iter()
        .filter_map(|(solvent, sol)| {
            rest.strip_prefix(solvent.as_str())
                .and_then(|tail| tail.strip_prefix('_'))
                .filter(|field| !field.is_empty())
                .map(|field| (solvent.len(), sol, field))
        })
        .max_by_key(|(len, _, _)| *len)
        .map(|(_, sol, field)| (sol, field))?;

    if let Some(param) = field.strip_prefix("vant_hoff_") {
        if let Some(value) = sol.vant_hoff.get(param).filter(|_| sol.processed) {
            return Some(*value);
        }
    }
    sol.metrics.get(field).copied()
}

fn dsc_value(dsc: Option<&DscMeasurement>, transition: &str, attr: TransitionAttr) -> Option<f64> {
    let t = dsc.filter(|d| d.processed)?.transitions.get(transition)?;
    match attr {
        TransitionAttr::Onset => Some(t.onset),
        TransitionAttr::Peak => Some(t.peak),
        TransitionAttr::Endset => Some(t.endset),
        TransitionAttr::Enthalpy => t.enthalpy,
    }
}

/// Detected peak closest to `wavenumber`; ties keep the earlier peak
pub fn nearest_peak(peaks: &[FtirPeak], wavenumber: f64) -> Option<&FtirPeak> {
    let mut best: Option<(&FtirPeak, f64)> = None;
    for peak in peaks.iter().filter(|p| p.wavenumber.is_finite()) {
        let distance = (peak.wavenumber - wavenumber).abs();
        match best {
            Some((_, d)) if distance >= d => {}
            _ => best = Some((peak, distance)),
        }
    }
    best.map(|(peak, _)| peak)
}
