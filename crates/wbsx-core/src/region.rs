//! Region code lookup.

/// Region codes accepted by the request forms and their display names.
pub const REGIONS: &[(&str, &str)] = &[
    ("DE", "Germany"),
    ("NL", "Netherlands"),
    ("SE", "Sweden"),
    ("DK", "Denmark"),
    ("UK", "United Kingdom"),
    ("PL", "Poland"),
];

/// Full name for a region code, or `None` for unknown codes
pub fn region_name(code: &str) -> Option<&'static str> {
    REGIONS
        .iter()
        .find(|(c, _)| c.eq_ignore_ascii_case(code.trim()))
        .map(|(_, name)| *name)
}
