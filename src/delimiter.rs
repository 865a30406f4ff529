use crate::AppendError;

/// Maps the `-d` token to a field separator: `csv` → `,`, `tab` → `\t`,
/// any other single character (counted in chars, not bytes) → itself.
pub fn resolve(token: &str) -> Result<char, AppendError> {
    match token {
        "csv" => Ok(','),
        "tab" => Ok('\t'),
        _ => {
            let mut chars = token.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(c),
                _ => Err(AppendError::InvalidDelimiter(token.to_owned())),
            }
        }
    }
}
