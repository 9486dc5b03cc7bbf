//! The fixed set of review areas and the upstream alias table.
//!
//! Upstream control names carry a free-text area prefix (`"LEGAL : L2"`,
//! `"TECHNICAL CAPACITY – AWARD MANAGEMENT : TC-AM5"`). Every spelling we
//! accept is listed in [`ReviewArea::aliases`], keyed by the enum itself so
//! adding a variant without aliases fails the exhaustiveness test.

use std::collections::HashMap;
use std::sync::LazyLock;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Number of review areas every canonical document must carry.
pub const N_FIXED_AREAS: usize = 21;

/// One of the fixed compliance review areas, in canonical report order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ReviewArea {
    Legal,
    FinancialManagement,
    TechnicalCapacityAward,
    TechnicalCapacityProgram,
    TechnicalCapacityProject,
    TransitAssetManagement,
    SatisfactoryContinuingControl,
    Maintenance,
    Procurement,
    TitleVi,
    AdaGeneral,
    AdaParatransit,
    SchoolBus,
    CharterBus,
    DrugFreeWorkplace,
    DrugAndAlcohol,
    Section5307,
    Section5310,
    Section5311,
    Ptasp,
    Cybersecurity,
}

impl ReviewArea {
    /// All areas in canonical order.
    pub const ALL: [ReviewArea; N_FIXED_AREAS] = [
        Self::Legal,
        Self::FinancialManagement,
        Self::TechnicalCapacityAward,
        Self::TechnicalCapacityProgram,
        Self::TechnicalCapacityProject,
        Self::TransitAssetManagement,
        Self::SatisfactoryContinuingControl,
        Self::Maintenance,
        Self::Procurement,
        Self::TitleVi,
        Self::AdaGeneral,
        Self::AdaParatransit,
        Self::SchoolBus,
        Self::CharterBus,
        Self::DrugFreeWorkplace,
        Self::DrugAndAlcohol,
        Self::Section5307,
        Self::Section5310,
        Self::Section5311,
        Self::Ptasp,
        Self::Cybersecurity,
    ];

    /// Display name as it appears in the canonical document and in reports.
    pub fn name(self) -> &'static str {
        match self {
            Self::Legal => "Legal",
            Self::FinancialManagement => "Financial Management and Capacity",
            Self::TechnicalCapacityAward => "Technical Capacity - Award Management",
            Self::TechnicalCapacityProgram => {
                "Technical Capacity - Program Management and Subrecipient Oversight"
            }
            Self::TechnicalCapacityProject => "Technical Capacity - Project Management",
            Self::TransitAssetManagement => "Transit Asset Management",
            Self::SatisfactoryContinuingControl => "Satisfactory Continuing Control",
            Self::Maintenance => "Maintenance",
            Self::Procurement => "Procurement",
            Self::TitleVi => "Title VI",
            Self::AdaGeneral => "Americans with Disabilities Act (ADA) - General",
            Self::AdaParatransit => {
                "Americans with Disabilities Act (ADA) - Complementary Paratransit"
            }
            Self::SchoolBus => "School Bus",
            Self::CharterBus => "Charter Bus",
            Self::DrugFreeWorkplace => "Drug-Free Workplace Act",
            Self::DrugAndAlcohol => "Drug and Alcohol Program",
            Self::Section5307 => "Section 5307 Program Requirements",
            Self::Section5310 => "Section 5310 Program Requirements",
            Self::Section5311 => "Section 5311 Program Requirements",
            Self::Ptasp => "Public Transportation Agency Safety Plan (PTASP)",
            Self::Cybersecurity => "Cybersecurity",
        }
    }

    /// Upstream prefix spellings that map to this area.
    ///
    /// Compared after [`normalize_prefix`], so case, dash style and spacing
    /// differences are already folded; the listed variants document what
    /// upstream has actually sent.
    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            Self::Legal => &["LEGAL"],
            Self::FinancialManagement => {
                &["FINANCIAL MANAGEMENT", "FINANCIAL MANAGEMENT AND CAPACITY"]
            }
            Self::TechnicalCapacityAward => &[
                "TECHNICAL CAPACITY AWARD MANAGEMENT",
                "TECHNICAL CAPACITY – AWARD MANAGEMENT",
                "TECHNICAL CAPACITY - AWARD MANAGEMENT",
                "TC-AM",
            ],
            Self::TechnicalCapacityProgram => &[
                "TECHNICAL CAPACITY PROGRAM MANAGEMENT",
                "TECHNICAL CAPACITY – PROGRAM MANAGEMENT",
                "TECHNICAL CAPACITY - PROGRAM MANAGEMENT AND SUBRECIPIENT OVERSIGHT",
                "TC-PGM",
            ],
            Self::TechnicalCapacityProject => &[
                "TECHNICAL CAPACITY PROJECT MANAGEMENT",
                "TECHNICAL CAPACITY – PROJECT MANAGEMENT",
                "TC-PJM",
            ],
            Self::TransitAssetManagement => &["TRANSIT ASSET MANAGEMENT", "TAM"],
            Self::SatisfactoryContinuingControl => &["SATISFACTORY CONTINUING CONTROL", "SCC"],
            Self::Maintenance => &["MAINTENANCE"],
            Self::Procurement => &["PROCUREMENT"],
            Self::TitleVi => &["TITLE VI", "TITLE 6"],
            Self::AdaGeneral => &[
                "ADA GENERAL",
                "ADA – GENERAL",
                "AMERICANS WITH DISABILITIES ACT (ADA) - GENERAL",
            ],
            Self::AdaParatransit => &[
                "ADA COMPLEMENTARY PARATRANSIT",
                "ADA – COMPLEMENTARY PARATRANSIT",
                "AMERICANS WITH DISABILITIES ACT (ADA) - COMPLEMENTARY PARATRANSIT",
            ],
            Self::SchoolBus => &["SCHOOL BUS"],
            Self::CharterBus => &["CHARTER BUS"],
            Self::DrugFreeWorkplace => &["DRUG FREE WORKPLACE ACT", "DRUG-FREE WORKPLACE ACT", "DFWA"],
            Self::DrugAndAlcohol => &["DRUG AND ALCOHOL PROGRAM", "DRUG & ALCOHOL PROGRAM", "D&A"],
            Self::Section5307 => &["SECTION 5307 PROGRAM REQUIREMENTS", "SECTION 5307", "5307"],
            Self::Section5310 => &["SECTION 5310 PROGRAM REQUIREMENTS", "SECTION 5310", "5310"],
            Self::Section5311 => &["SECTION 5311 PROGRAM REQUIREMENTS", "SECTION 5311", "5311"],
            Self::Ptasp => &[
                "PUBLIC TRANSPORTATION AGENCY SAFETY PLAN",
                "PUBLIC TRANSPORTATION AGENCY SAFETY PLAN (PTASP)",
                "PTASP",
            ],
            Self::Cybersecurity => &["CYBERSECURITY", "CYBER SECURITY"],
        }
    }

    /// Resolve a display name (as written by [`ReviewArea::name`]).
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.name() == name)
    }

    /// Resolve an upstream prefix through the alias table.
    pub fn from_alias(prefix: &str) -> Option<Self> {
        ALIAS_INDEX.get(&normalize_prefix(prefix)).copied()
    }
}

impl std::fmt::Display for ReviewArea {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for ReviewArea {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for ReviewArea {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_name(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown review area '{s}'")))
    }
}

/// Normalized alias -> area, built once from the per-area alias lists.
static ALIAS_INDEX: LazyLock<HashMap<String, ReviewArea>> = LazyLock::new(|| {
    let mut index = HashMap::new();
    for area in ReviewArea::ALL {
        index.insert(normalize_prefix(area.name()), area);
        for alias in area.aliases() {
            index.insert(normalize_prefix(alias), area);
        }
    }
    index
});

/// Fold case, dash variants and runs of whitespace into a lookup key.
pub fn normalize_prefix(raw: &str) -> String {
    raw.chars()
        .map(|c| match c {
            '\u{2013}' | '\u{2014}' | '-' => ' ',
            other => other,
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn every_area_has_an_alias() {
        for area in ReviewArea::ALL {
            assert!(!area.aliases().is_empty(), "{area} has no aliases");
            for alias in area.aliases() {
                assert_eq!(
                    ReviewArea::from_alias(alias),
                    Some(area),
                    "alias {alias:?} does not resolve to {area}"
                );
            }
        }
    }

    #[test]
    fn aliases_do_not_collide() {
        let mut seen = HashSet::new();
        for area in ReviewArea::ALL {
            let own: HashSet<_> = area.aliases().iter().map(|a| normalize_prefix(a)).collect();
            for key in own {
                assert!(seen.insert(key.clone()), "alias {key:?} claimed twice");
            }
        }
    }

    #[test]
    fn names_are_unique_and_round_trip() {
        let names: HashSet<_> = ReviewArea::ALL.iter().map(|a| a.name()).collect();
        assert_eq!(names.len(), N_FIXED_AREAS);
        for area in ReviewArea::ALL {
            assert_eq!(ReviewArea::from_name(area.name()), Some(area));
        }
    }

    #[test]
    fn dash_and_case_variants_fold_together() {
        assert_eq!(
            ReviewArea::from_alias("Technical Capacity – Award Management"),
            Some(ReviewArea::TechnicalCapacityAward)
        );
        assert_eq!(
            ReviewArea::from_alias("TECHNICAL  CAPACITY - AWARD MANAGEMENT"),
            Some(ReviewArea::TechnicalCapacityAward)
        );
        assert_eq!(
            ReviewArea::from_alias("drug-free workplace act"),
            Some(ReviewArea::DrugFreeWorkplace)
        );
        assert_eq!(ReviewArea::from_alias("ptasp"), Some(ReviewArea::Ptasp));
        assert_eq!(ReviewArea::from_alias("DISADVANTAGED BUSINESS ENTERPRISE"), None);
    }

    #[test]
    fn serde_uses_display_names() {
        let json = serde_json::to_string(&ReviewArea::Ptasp).unwrap();
        assert_eq!(json, "\"Public Transportation Agency Safety Plan (PTASP)\"");
        let back: ReviewArea = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ReviewArea::Ptasp);
        assert!(serde_json::from_str::<ReviewArea>("\"Astrology\"").is_err());
    }
}
