//! Feature and property name grammar.
//!
//! A name such as `tga_stage2_onset` is parsed once into a [`FeaturePath`]
//! instruction that the accessor interprets against a typed [`Sample`].
//! Unparseable names yield `None` and resolve to NaN.
//!
//! [`Sample`]: crate::dataset::Sample

use std::fmt;

/// Attribute of a matched FTIR peak
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeakAttr {
    Intensity,
    Area,
    Position,
}

/// Attribute of a TGA decomposition stage
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageAttr {
    Onset,
    Peak,
    Endset,
    MassLoss,
}

impl StageAttr {
    pub const ALL: [StageAttr; 4] = [
        StageAttr::Onset,
        StageAttr::Peak,
        StageAttr::Endset,
        StageAttr::MassLoss,
    ];

    fn parse(s: &str) -> Option<Self> {
        match s {
            "onset" => Some(Self::Onset),
            "peak" => Some(Self::Peak),
            "endset" => Some(Self::Endset),
            "mass_loss" => Some(Self::MassLoss),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Onset => "onset",
            Self::Peak => "peak",
            Self::Endset => "endset",
            Self::MassLoss => "mass_loss",
        }
    }
}

/// Attribute of a DSC transition
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransitionAttr {
    Onset,
    Peak,
    Endset,
    Enthalpy,
}

impl TransitionAttr {
    pub const ALL: [TransitionAttr; 4] = [
        TransitionAttr::Onset,
        TransitionAttr::Peak,
        TransitionAttr::Endset,
        TransitionAttr::Enthalpy,
    ];

    fn parse(s: &str) -> Option<Self> {
        match s {
            "onset" => Some(Self::Onset),
            "peak" => Some(Self::Peak),
            "endset" => Some(Self::Endset),
            "enthalpy" => Some(Self::Enthalpy),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Onset => "onset",
            Self::Peak => "peak",
            Self::Endset => "endset",
            Self::Enthalpy => "enthalpy",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DscSegment {
    Heating,
    Cooling,
}

impl DscSegment {
    fn prefix(self) -> &'static str {
        match self {
            Self::Heating => "dsc_heating_",
            Self::Cooling => "dsc_cooling_",
        }
    }
}

/// Parsed traversal path into a sample's `synthesis` / `measurements` tree
#[derive(Clone, Debug, PartialEq)]
pub enum FeaturePath {
    Synthesis(String),
    FtirPeak { wavenumber: f64, attr: PeakAttr },
    FtirIndex(String),
    /// `stage` is 1-based as written in the name
    TgaStage { stage: usize, attr: StageAttr },
    TgaMetric(String),
    DscTransition {
        segment: DscSegment,
        transition: String,
        attr: TransitionAttr,
    },
    /// `<solvent>_<field>`; solvent keys may contain `_`, so the split is
    /// made against the sample's own solvent keys at resolution time
    Solubility(String),
    Other(String),
}

impl FeaturePath {
    /// Parse a feature name; `None` if it matches no known domain layout
    pub fn parse(name: &str) -> Option<Self> {
        if let Some(rest) = name.strip_prefix("synthesis_") {
            return non_empty(rest).map(|k| Self::Synthesis(k.to_string()));
        }
        if let Some(rest) = name.strip_prefix(DscSegment::Heating.prefix()) {
            return parse_dsc(DscSegment::Heating, rest);
        }
        if let Some(rest) = name.strip_prefix(DscSegment::Cooling.prefix()) {
            return parse_dsc(DscSegment::Cooling, rest);
        }
        if let Some(rest) = name.strip_prefix("ftir_peak_") {
            return parse_peak(rest);
        }
        if let Some(rest) = name.strip_prefix("ftir_index_") {
            return non_empty(rest).map(|k| Self::FtirIndex(k.to_string()));
        }
        if let Some(rest) = name.strip_prefix("tga_") {
            if let Some(stage) = parse_stage(rest) {
                return Some(stage);
            }
            return non_empty(rest).map(|k| Self::TgaMetric(k.to_string()));
        }
        if let Some(rest) = name.strip_prefix("solubility_") {
            return non_empty(rest).map(|r| Self::Solubility(r.to_string()));
        }
        if let Some(rest) = name.strip_prefix("other_") {
            return non_empty(rest).map(|k| Self::Other(k.to_string()));
        }
        None
    }

    /// Feature name for a discovered FTIR peak; positions are rounded to whole cm⁻¹
    pub fn peak_name(wavenumber: f64, attr: PeakAttr) -> String {
        let base = format!("ftir_peak_{:.0}", wavenumber);
        match attr {
            PeakAttr::Intensity => base,
            PeakAttr::Area => format!("{}_area", base),
            PeakAttr::Position => format!("{}_position", base),
        }
    }

    pub fn stage_name(stage: usize, attr: StageAttr) -> String {
        format!("tga_stage{}_{}", stage, attr.as_str())
    }

    pub fn transition_name(segment: DscSegment, transition: &str, attr: TransitionAttr) -> String {
        format!("{}{}_{}", segment.prefix(), transition, attr.as_str())
    }
}

fn non_empty(s: &str) -> Option<&str> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn parse_dsc(segment: DscSegment, rest: &str) -> Option<FeaturePath> {
    let (transition, attr) = rest.rsplit_once('_')?;
    let attr = TransitionAttr::parse(attr)?;
    let transition = non_empty(transition)?;
    Some(FeaturePath::DscTransition {
        segment,
        transition: transition.to_string(),
        attr,
    })
}

fn parse_peak(rest: &str) -> Option<FeaturePath> {
    let (position, attr) = match rest.split_once('_') {
        Some((position, "intensity")) => (position, PeakAttr::Intensity),
        Some((position, "area")) => (position, PeakAttr::Area),
        Some((position, "position")) => (position, PeakAttr::Position),
        Some(_) => return None,
        None => (rest, PeakAttr::Intensity),
    };
    let wavenumber: f64 = position.parse().ok()?;
    if !wavenumber.is_finite() {
        return None;
    }
    Some(FeaturePath::FtirPeak { wavenumber, attr })
}

/// `stage<N>_<attr>`; anything else is treated as a plain TGA metric
fn parse_stage(rest: &str) -> Option<FeaturePath> {
    let tail = rest.strip_prefix("stage")?;
    let (digits, attr) = tail.split_once('_')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let stage: usize = digits.parse().ok()?;
    let attr = StageAttr::parse(attr)?;
    Some(FeaturePath::TgaStage { stage, attr })
}

/// Property section under `properties`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PropertyDomain {
    Ftir,
    Tga,
    Dsc,
    Solubility,
    Synthesis,
    Other,
}

impl PropertyDomain {
    /// Discovery order of property sections
    pub const ALL: [PropertyDomain; 6] = [
        PropertyDomain::Ftir,
        PropertyDomain::Tga,
        PropertyDomain::Dsc,
        PropertyDomain::Solubility,
        PropertyDomain::Synthesis,
        PropertyDomain::Other,
    ];

    pub fn prefix(self) -> &'static str {
        match self {
            Self::Ftir => "ftir",
            Self::Tga => "tga",
            Self::Dsc => "dsc",
            Self::Solubility => "solubility",
            Self::Synthesis => "synthesis",
            Self::Other => "other",
        }
    }
}

/// Parsed path into a sample's `properties` tree
#[derive(Clone, Debug, PartialEq)]
pub struct PropertyPath {
    pub domain: PropertyDomain,
    pub key: String,
}

impl PropertyPath {
    pub fn parse(name: &str) -> Option<Self> {
        PropertyDomain::ALL.iter().find_map(|&domain| {
            let rest = name.strip_prefix(domain.prefix())?.strip_prefix('_')?;
            non_empty(rest).map(|key| PropertyPath {
                domain,
                key: key.to_string(),
            })
        })
    }

    pub fn name(domain: PropertyDomain, key: &str) -> String {
        format!("{}_{}", domain.prefix(), key)
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.domain.prefix(), self.key)
    }
}
