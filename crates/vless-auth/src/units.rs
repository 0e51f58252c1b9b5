//! Human-readable byte sizes for the CLI and config.

/// Parse sizes like `10GB`, `500 MB`, `1.5TiB` or plain bytes. `0` or empty is zero.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn parse_bytes(s: &str) -> Result<u64, String> {
    let s = s.trim().to_ascii_uppercase();
    if s.is_empty() || s == "0" {
        return Ok(0);
    }
    let digits_end = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (num, unit) = s.split_at(digits_end);
    let unit = match unit.trim().trim_end_matches("IB").trim_end_matches('B') {
        "" => 1u64,
        "K" => 1 << 10,
        "M" => 1 << 20,
        "G" => 1 << 30,
        "T" => 1 << 40,
        other => return Err(format!("unknown size unit: {other}")),
    };
    let value: f64 = num.parse().map_err(|_| format!("invalid size: {s}"))?;
    if value < 0.0 {
        return Err(format!("invalid size: {s}"));
    }
    Ok((value * unit as f64) as u64)
}

#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [(&str, u64); 4] = [("TB", 1 << 40), ("GB", 1 << 30), ("MB", 1 << 20), ("KB", 1 << 10)];
    for (name, size) in UNITS {
        if bytes >= size {
            return format!("{:.2} {name}", bytes as f64 / size as f64);
        }
    }
    format!("{bytes} B")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_units() {
        assert_eq!(parse_bytes("0").unwrap(), 0);
        assert_eq!(parse_bytes("512").unwrap(), 512);
        assert_eq!(parse_bytes("10GB").unwrap(), 10 << 30);
        assert_eq!(parse_bytes("500 mb").unwrap(), 500 << 20);
        assert_eq!(parse_bytes("1.5KiB").unwrap(), 1536);
        assert!(parse_bytes("12XB").is_err());
        assert!(parse_bytes("GB").is_err());
    }

    #[test]
    fn formats_largest_unit() {
        assert_eq!(format_bytes(999), "999 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(10 << 30), "10.00 GB");
    }
}
