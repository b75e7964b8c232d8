use crc32fast::Hasher;

/// Calculate a CRC32 checksum of the given migration content, line by line.
///
/// Each line is fed into the hasher without its line ending, so CRLF and LF
/// renditions of the same script digest identically. A leading UTF-8 BOM is
/// ignored. The result is cast to `i32` to match the ledger's `checksum`
/// column.
pub fn calculate_checksum(content: &str) -> i32 {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);

    let mut hasher = Hasher::new();
    for line in content.lines() {
        hasher.update(line.as_bytes());
    }
    hasher.finalize() as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_deterministic() {
        let content = "CREATE TABLE users (id int PRIMARY KEY);\n";
        assert_eq!(calculate_checksum(content), calculate_checksum(content));
    }

    #[test]
    fn test_checksum_different_content() {
        assert_ne!(
            calculate_checksum("SELECT 1;"),
            calculate_checksum("SELECT 2;")
        );
    }

    #[test]
    fn test_checksum_line_ending_normalization() {
        let unix = "line1\nline2\nline3";
        let windows = "line1\r\nline2\r\nline3";
        assert_eq!(calculate_checksum(unix), calculate_checksum(windows));
    }

    #[test]
    fn test_checksum_ignores_bom() {
        let with_bom = "\u{feff}SELECT * FROM t;";
        let without_bom = "SELECT * FROM t;";
        assert_eq!(calculate_checksum(with_bom), calculate_checksum(without_bom));
    }

    #[test]
    fn test_checksum_empty() {
        assert_eq!(calculate_checksum(""), 0);
    }

    #[test]
    fn test_checksum_feeds_lines_without_endings() {
        // "CREATE TABLE t (\n  id int\n);\n" digests as three updates over the
        // line bytes alone.
        let content = "CREATE TABLE t (\n  id int\n);\n";
        let checksum = calculate_checksum(content);

        let mut expected = Hasher::new();
        expected.update(b"CREATE TABLE t (");
        expected.update(b"  id int");
        expected.update(b");");
        let expected = expected.finalize() as i32;

        assert_eq!(checksum, expected);
    }
}
