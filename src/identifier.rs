// 🔑 Identifier Normalizer - canonical CNPJ keys
// "11.222.333/0001-44" → "11222333000144"

/// Separators the registry uses when formatting a CNPJ.
const SEPARATORS: [char; 3] = ['.', '/', '-'];

/// Strip separator punctuation from a raw tax identifier.
///
/// Total and pure: input without separators comes back unchanged. Both the
/// ingestion pipeline and history lookups must go through this function so
/// that stored keys and lookup keys agree.
pub fn normalize(raw: &str) -> String {
    raw.chars().filter(|c| !SEPARATORS.contains(c)).collect()
}

/// Render a canonical 14-digit identifier as `NN.NNN.NNN/NNNN-NN`.
///
/// Anything that is not exactly 14 ASCII digits is returned as-is.
pub fn format_cnpj(canonical: &str) -> String {
    if canonical.len() != 14 || !canonical.bytes().all(|b| b.is_ascii_digit()) {
        return canonical.to_string();
    }

    format!(
        "{}.{}.{}/{}-{}",
        &canonical[0..2],
        &canonical[2..5],
        &canonical[5..8],
        &canonical[8..12],
        &canonical[12..14]
    )
}
