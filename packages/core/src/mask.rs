//! Display-safe redaction of secret values.

const MASK: &str = "****";

/// Mask a secret value for display.
///
/// Values of four characters or fewer collapse to `****`. Longer values keep
/// their first and last two characters around a fixed `****`, so the output
/// is always eight characters and never reveals more than four.
///
/// Works on characters, not bytes, so multi-byte input is never split.
///
/// # Example
///
/// ```
/// use keyvault_demo::mask::mask_secret;
///
/// assert_eq!(mask_secret("abcdefgh"), "ab****gh");
/// assert_eq!(mask_secret("ab"), "****");
/// ```
pub fn mask_secret(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 4 {
        return MASK.to_string();
    }

    let head: String = chars[..2].iter().collect();
    let tail: String = chars[chars.len() - 2..].iter().collect();
    format!("{head}{MASK}{tail}")
}
