//! Build aligned feature/property matrices from a sample set.

use indexmap::{IndexMap, IndexSet};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::dataset::Sample;
use crate::features::accessor::{resolve_feature_path, resolve_property_path};
use crate::features::path::{
    DscSegment, FeaturePath, PeakAttr, PropertyDomain, PropertyPath, StageAttr, TransitionAttr,
};
use crate::utils::{AnalysisError, Diagnostics, Warning, WarningKind};

/// Aligned matrices (rows = samples) plus their column names
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Extraction {
    pub features: Array2<f64>,
    pub properties: Array2<f64>,
    pub feature_names: Vec<String>,
    pub property_names: Vec<String>,
    pub warnings: Vec<Warning>,
}

/// Discover the feature names a sample exposes, in record order
pub fn discover_feature_names(sample: &Sample) -> Vec<String> {
    let mut names: IndexSet<String> = IndexSet::new();
    let m = &sample.measurements;

    for key in sample.synthesis.keys() {
        names.insert(format!("synthesis_{}", key));
    }

    if let Some(ftir) = m.ftir.as_ref().filter(|f| f.processed) {
        for peak in ftir.peaks.iter().filter(|p| p.wavenumber.is_finite()) {
            names.insert(FeaturePath::peak_name(peak.wavenumber, PeakAttr::Intensity));
            if peak.area.is_some() {
                names.insert(FeaturePath::peak_name(peak.wavenumber, PeakAttr::Area));
            }
        }
        for key in ftir.indices.keys() {
            names.insert(format!("ftir_index_{}", key));
        }
    }

    if let Some(tga) = &m.tga {
        if tga.processed {
            for stage in 1..=tga.stages.len() {
                for attr in StageAttr::ALL {
                    names.insert(FeaturePath::stage_name(stage, attr));
                }
            }
        }
        for key in tga.metrics.keys() {
            names.insert(format!("tga_{}", key));
        }
    }

    for (segment, dsc) in [
        (DscSegment::Heating, &m.dsc_heating),
        (DscSegment::Cooling, &m.dsc_cooling),
    ] {
        let Some(dsc) = dsc.as_ref().filter(|d| d.processed) else {
            continue;
        };
        for (transition, t) in &dsc.transitions {
            for attr in TransitionAttr::ALL {
                if attr == TransitionAttr::Enthalpy && t.enthalpy.is_none() {
                    continue;
                }
                names.insert(FeaturePath::transition_name(segment, transition, attr));
            }
        }
    }

    for (solvent, sol) in &m.solubility {
        if sol.processed {
            for param in sol.vant_hoff.keys() {
                names.insert(format!("solubility_{}_vant_hoff_{}", solvent, param));
            }
        }
        for metric in sol.metrics.keys() {
            names.insert(format!("solubility_{}_{}", solvent, metric));
        }
    }

    for key in m.other.keys() {
        names.insert(format!("other_{}", key));
    }

    names.into_iter().collect()
}

/// Discover the property names a sample exposes, in section order
pub fn discover_property_names(sample: &Sample) -> Vec<String> {
    let p = &sample.properties;
    let mut names: IndexSet<String> = IndexSet::new();

    for domain in PropertyDomain::ALL {
        let section = match domain {
            PropertyDomain::Ftir => &p.ftir_derived,
            PropertyDomain::Tga => &p.tga_derived,
            PropertyDomain::Dsc => &p.dsc_derived,
            PropertyDomain::Solubility => &p.solubility_derived,
            PropertyDomain::Synthesis => &p.synthesis,
            PropertyDomain::Other => &p.other,
        };
        for key in section.keys() {
            names.insert(PropertyPath::name(domain, key));
        }
    }

    names.into_iter().collect()
}

/// Extract feature and property matrices for a sample set
///
/// # Arguments
/// * `samples` - Sample records; names are discovered from the first one
/// * `target_properties` - Optional allow-list of property names
/// * `input_features` - Optional allow-list of feature names
///
/// # Returns
/// * `Ok(Extraction)` - Matrices with NaN for every unresolvable cell
/// * `Err(AnalysisError::ArgumentError)` - Empty sample set or an allow-list
///   that keeps no names
pub fn extract_features(
    samples: &[Sample],
    target_properties: Option<&[String]>,
    input_features: Option<&[String]>,
) -> Result<Extraction, AnalysisError> {
    let first = samples
        .first()
        .ok_or_else(|| AnalysisError::ArgumentError("sample set is empty".to_string()))?;

    let mut diag = Diagnostics::new();
    report_peak_collisions(first, &mut diag);
    let feature_names = apply_allow_list(
        "feature",
        discover_feature_names(first),
        input_features,
        &mut diag,
    )?;
    let property_names = apply_allow_list(
        "property",
        discover_property_names(first),
        target_properties,
        &mut diag,
    )?;

    tracing::debug!(
        samples = samples.len(),
        features = feature_names.len(),
        properties = property_names.len(),
        "extracting matrices"
    );

    Ok(build(samples, feature_names, property_names, diag))
}

/// Extract matrices for a fixed list of names, without discovery
///
/// Used at prediction time so columns line up exactly with training.
pub fn extract_with_names(
    samples: &[Sample],
    feature_names: &[String],
    property_names: &[String],
) -> Result<Extraction, AnalysisError> {
    if samples.is_empty() {
        return Err(AnalysisError::ArgumentError("sample set is empty".to_string()));
    }
    Ok(build(
        samples,
        feature_names.to_vec(),
        property_names.to_vec(),
        Diagnostics::new(),
    ))
}

fn build(
    samples: &[Sample],
    feature_names: Vec<String>,
    property_names: Vec<String>,
    mut diag: Diagnostics,
) -> Extraction {
    let feature_paths: Vec<Option<FeaturePath>> =
        feature_names.iter().map(|n| FeaturePath::parse(n)).collect();
    let property_paths: Vec<Option<PropertyPath>> =
        property_names.iter().map(|n| PropertyPath::parse(n)).collect();

    let features = Array2::from_shape_fn((samples.len(), feature_paths.len()), |(r, c)| {
        feature_paths[c]
            .as_ref()
            .map_or(f64::NAN, |path| resolve_feature_path(&samples[r], path))
    });
    let properties = Array2::from_shape_fn((samples.len(), property_paths.len()), |(r, c)| {
        property_paths[c]
            .as_ref()
            .map_or(f64::NAN, |path| resolve_property_path(&samples[r], path))
    });

    report_missing("feature", &features, &mut diag);
    report_missing("property", &properties, &mut diag);

    Extraction {
        features,
        properties,
        feature_names,
        property_names,
        warnings: diag.into_warnings(),
    }
}

/// Keep discovered names that are allow-listed, in discovery order
fn apply_allow_list(
    kind: &str,
    discovered: Vec<String>,
    allow: Option<&[String]>,
    diag: &mut Diagnostics,
) -> Result<Vec<String>, AnalysisError> {
    let Some(allow) = allow else {
        return Ok(discovered);
    };

    let wanted: IndexSet<&str> = allow.iter().map(String::as_str).collect();
    for name in &wanted {
        if !discovered.iter().any(|d| d == name) {
            diag.warn(
                WarningKind::UnknownName,
                format!("{} '{}' not found in the first sample, dropped", kind, name),
            );
        }
    }

    let kept: Vec<String> = discovered
        .into_iter()
        .filter(|name| wanted.contains(name.as_str()))
        .collect();

    if kept.is_empty() {
        return Err(AnalysisError::ArgumentError(format!(
            "no valid {} names left after filtering",
            kind
        )));
    }
    Ok(kept)
}

/// Peaks are named by rounded wavenumber, so close peaks share one column
/// that resolves to whichever peak is nearest the rounded value
fn report_peak_collisions(sample: &Sample, diag: &mut Diagnostics) {
    let Some(ftir) = sample.measurements.ftir.as_ref().filter(|f| f.processed) else {
        return;
    };
    let mut groups: IndexMap<String, Vec<f64>> = IndexMap::new();
    for peak in ftir.peaks.iter().filter(|p| p.wavenumber.is_finite()) {
        groups
            .entry(FeaturePath::peak_name(peak.wavenumber, PeakAttr::Intensity))
            .or_default()
            .push(peak.wavenumber);
    }
    for (name, wavenumbers) in groups.iter().filter(|(_, w)| w.len() > 1) {
        diag.warn(
            WarningKind::NameCollision,
            format!(
                "{} covers {} peaks at {:?}; only the nearest is extracted",
                name,
                wavenumbers.len(),
                wavenumbers
            ),
        );
    }
}

fn report_missing(kind: &str, matrix: &Array2<f64>, diag: &mut Diagnostics) {
    let missing = matrix.iter().filter(|v| v.is_nan()).count();
    if missing > 0 {
        diag.warn(
            WarningKind::MissingValues,
            format!(
                "{} matrix has {} NaN cells out of {}",
                kind,
                missing,
                matrix.len()
            ),
        );
    }
}
