//! Azure location normalization.

/// Lower-case and strip whitespace: `"West US"` becomes `"westus"`.
pub fn normalize(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Like [`normalize`], mapping a missing location to the empty string.
pub fn normalize_nilable(input: Option<&str>) -> String {
    input.map(normalize).unwrap_or_default()
}
