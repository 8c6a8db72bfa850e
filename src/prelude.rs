use std::sync::Arc;
use tokio::sync::RwLock;

/// Type alias for Arc<RwLock<T>>, a common pattern for shared mutable state
pub type RwArc<T> = Arc<RwLock<T>>;

/// Parse a human-friendly size ("1024", "64kb", "2m", "1GB") into bytes.
///
/// Usable directly as a clap `value_parser`.
pub fn parse_size(s: &str) -> Result<usize, String> {
    let s = s.trim().to_lowercase();

    let (number, suffix) = match s.find(|c: char| !c.is_ascii_digit() && c != '.') {
        Some(pos) => (&s[..pos], s[pos..].trim()),
        None => (s.as_str(), ""),
    };

    let number: f64 = number
        .parse()
        .map_err(|_| format!("Invalid number: {}", number))?;

    let multiplier: f64 = match suffix {
        "" | "b" => 1.0,
        "k" | "kb" => 1024.0,
        "m" | "mb" => 1024.0 * 1024.0,
        "g" | "gb" => 1024.0 * 1024.0 * 1024.0,
        _ => return Err(format!("Unknown size suffix: {}. Use b, kb, mb, or gb", suffix)),
    };

    Ok((number * multiplier) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("1024"), Ok(1024));
        assert_eq!(parse_size("64kb"), Ok(64 * 1024));
        assert_eq!(parse_size(" 2M "), Ok(2 * 1024 * 1024));
        assert_eq!(parse_size("0.5k"), Ok(512));
        assert!(parse_size("ten").is_err());
        assert!(parse_size("5tb").is_err());
    }
}
