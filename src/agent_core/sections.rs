//! Document section layout and per-section generation settings.
//!
//! Each document type has a fixed section order. A handful of sections per
//! type are critical and go through the reflection loop; everything else is
//! generated with a single call.

use super::session::DocumentType;

/// How one section is generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionSpec {
    pub use_reflection: bool,
    /// Upper bound on generation attempts, at least 1.
    pub max_reflection_steps: u32,
}

impl SectionSpec {
    pub const DIRECT: SectionSpec = SectionSpec {
        use_reflection: false,
        max_reflection_steps: 1,
    };

    pub const fn reflective(max_reflection_steps: u32) -> Self {
        SectionSpec {
            use_reflection: true,
            max_reflection_steps,
        }
    }

    /// Apply the global switch and a per-request override.
    pub fn with_overrides(self, reflection_enabled: bool, use_reflection: Option<bool>) -> Self {
        let enabled = reflection_enabled && use_reflection.unwrap_or(true) && self.use_reflection;
        if enabled {
            self
        } else {
            SectionSpec::DIRECT
        }
    }
}

const NDA_SECTIONS: &[&str] = &[
    "header",
    "parties",
    "definitions",
    "confidential_info",
    "obligations",
    "exclusions",
    "term_termination",
    "remedies",
    "general_provisions",
    "signatures",
];

const EMPLOYMENT_SECTIONS: &[&str] = &[
    "header",
    "parties",
    "recitals",
    "position_duties",
    "compensation",
    "benefits",
    "termination",
    "non_compete",
    "intellectual_property",
    "confidentiality",
    "general_provisions",
    "signatures",
];

const SERVICE_SECTIONS: &[&str] = &[
    "header",
    "parties",
    "recitals",
    "scope_of_work",
    "payment_terms",
    "timeline",
    "liability",
    "termination",
    "intellectual_property",
    "general_provisions",
    "signatures",
];

const LEASE_SECTIONS: &[&str] = &[
    "header",
    "parties",
    "property_description",
    "rent_terms",
    "security_deposit",
    "maintenance",
    "rules",
    "termination",
    "general_provisions",
    "signatures",
];

/// Every section name any document type uses, without duplicates.
pub const ALL_SECTIONS: &[&str] = &[
    "header",
    "parties",
    "definitions",
    "confidential_info",
    "obligations",
    "exclusions",
    "term_termination",
    "remedies",
    "general_provisions",
    "signatures",
    "recitals",
    "position_duties",
    "compensation",
    "benefits",
    "termination",
    "non_compete",
    "intellectual_property",
    "confidentiality",
    "scope_of_work",
    "payment_terms",
    "timeline",
    "liability",
    "property_description",
    "rent_terms",
    "security_deposit",
    "maintenance",
    "rules",
];

/// Configured section order for a document type.
pub fn section_order(document_type: DocumentType) -> &'static [&'static str] {
    match document_type {
        DocumentType::Nda => NDA_SECTIONS,
        DocumentType::Employment => EMPLOYMENT_SECTIONS,
        DocumentType::Service => SERVICE_SECTIONS,
        DocumentType::Lease => LEASE_SECTIONS,
    }
}

pub fn is_known_section(document_type: DocumentType, section: &str) -> bool {
    section_order(document_type).iter().any(|s| *s == section)
}

/// Generation settings for one section. Unknown names generate directly.
pub fn section_spec(document_type: DocumentType, section: &str) -> SectionSpec {
    let critical: &[(&str, u32)] = match document_type {
        DocumentType::Nda => &[
            ("confidential_info", 3),
            ("obligations", 3),
            ("exclusions", 2),
            ("remedies", 2),
        ],
        DocumentType::Employment => &[
            ("compensation", 2),
            ("termination", 3),
            ("non_compete", 3),
            ("intellectual_property", 2),
        ],
        DocumentType::Service => &[
            ("scope_of_work", 3),
            ("payment_terms", 2),
            ("liability", 3),
            ("termination", 2),
        ],
        DocumentType::Lease => &[
            ("rent_terms", 2),
            ("maintenance", 2),
            ("termination", 3),
            ("security_deposit", 2),
        ],
    };
    critical
        .iter()
        .find(|(name, _)| *name == section)
        .map(|(_, steps)| SectionSpec::reflective(*steps))
        .unwrap_or(SectionSpec::DIRECT)
}

/// Human-readable heading, e.g. `term_termination` → `Term Termination`.
pub fn section_title(section: &str) -> String {
    section
        .split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_TYPES: [DocumentType; 4] = [
        DocumentType::Nda,
        DocumentType::Employment,
        DocumentType::Service,
        DocumentType::Lease,
    ];

    #[test]
    fn test_all_sections_covers_every_type() {
        for dt in ALL_TYPES {
            for section in section_order(dt) {
                assert!(ALL_SECTIONS.contains(section), "{section} missing for {dt}");
            }
        }
        let mut sorted = ALL_SECTIONS.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), ALL_SECTIONS.len());
    }

    #[test]
    fn test_critical_sections_reflect() {
        let spec = section_spec(DocumentType::Nda, "confidential_info");
        assert!(spec.use_reflection);
        assert_eq!(spec.max_reflection_steps, 3);
        assert_eq!(section_spec(DocumentType::Lease, "termination").max_reflection_steps, 3);
        assert_eq!(section_spec(DocumentType::Nda, "header"), SectionSpec::DIRECT);
    }

    #[test]
    fn test_critical_sections_are_configured_sections() {
        for dt in ALL_TYPES {
            for section in section_order(dt) {
                let spec = section_spec(dt, section);
                assert!(spec.max_reflection_steps >= 1);
            }
        }
    }

    #[test]
    fn test_overrides_force_direct() {
        let spec = SectionSpec::reflective(3);
        assert_eq!(spec.with_overrides(false, None), SectionSpec::DIRECT);
        assert_eq!(spec.with_overrides(true, Some(false)), SectionSpec::DIRECT);
        assert_eq!(spec.with_overrides(true, Some(true)), spec);
        // An override never turns reflection on for a direct section.
        assert_eq!(SectionSpec::DIRECT.with_overrides(true, Some(true)), SectionSpec::DIRECT);
    }

    #[test]
    fn test_section_title() {
        assert_eq!(section_title("term_termination"), "Term Termination");
        assert_eq!(section_title("header"), "Header");
    }
}
