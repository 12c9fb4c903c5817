use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryKind {
    Upc,
    Freetext,
}

/// Barcode format detected for a structured UPC query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpcFormat {
    UpcA,
    UpcE,
}

/// A classified query. Both kinds flow through the same pipeline; only the
/// matching engine treats them differently.
#[derive(Debug, Clone)]
pub struct Query {
    pub kind: QueryKind,
    pub canonical: String,
    pub format: Option<UpcFormat>,
}

impl Query {
    /// Classify a raw input string. Whitespace and dashes are stripped before
    /// the digit check; a 12-digit string with a valid UPC-A checksum (or an
    /// 8-digit string passing the same modular rule) is a structured UPC,
    /// anything else is a free-text descriptor. Fails only on an empty or
    /// whitespace-only input.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(AppError::InvalidQuery("query must not be empty".to_string()));
        }

        let cleaned: String = trimmed.chars().filter(|c| !c.is_whitespace() && *c != '-').collect();

        if cleaned.chars().all(|c| c.is_ascii_digit()) {
            match cleaned.len() {
                12 if checksum_ok(&cleaned) => {
                    return Ok(Self {
                        kind: QueryKind::Upc,
                        canonical: cleaned,
                        format: Some(UpcFormat::UpcA),
                    });
                }
                // Applies the mod-10 rule directly to the 8 digits; no
                // UPC-E -> UPC-A expansion.
                8 if checksum_ok(&cleaned) => {
                    return Ok(Self {
                        kind: QueryKind::Upc,
                        canonical: cleaned,
                        format: Some(UpcFormat::UpcE),
                    });
                }
                _ => {}
            }
        }

        Ok(Self {
            kind: QueryKind::Freetext,
            canonical: trimmed.to_string(),
            format: None,
        })
    }

    pub fn is_upc(&self) -> bool {
        self.kind == QueryKind::Upc
    }
}

/// Modulo-10 check over an all-digit string: three times the sum of the
/// odd-position digits plus the sum of the even-position digits must be a
/// multiple of ten (positions 1-indexed from the left, the last digit being
/// the check digit).
fn checksum_ok(digits: &str) -> bool {
    let sum: u32 = digits
        .bytes()
        .enumerate()
        .map(|(i, b)| {
            let d = u32::from(b - b'0');
            if i % 2 == 0 { 3 * d } else { d }
        })
        .sum();
    sum % 10 == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_upc_a_is_classified_upc() {
        let q = Query::parse("012345678905").unwrap();
        assert_eq!(q.kind, QueryKind::Upc);
        assert_eq!(q.format, Some(UpcFormat::UpcA));
        assert_eq!(q.canonical, "012345678905");
    }

    #[test]
    fn invalid_check_digit_falls_back_to_freetext() {
        let q = Query::parse("012345678906").unwrap();
        assert_eq!(q.kind, QueryKind::Freetext);
        assert_eq!(q.canonical, "012345678906");
    }

    #[test]
    fn dashes_and_whitespace_are_stripped() {
        let q = Query::parse(" 0-12345-67890-5 ").unwrap();
        assert_eq!(q.kind, QueryKind::Upc);
        assert_eq!(q.canonical, "012345678905");
    }

    #[test]
    fn eight_digit_code_uses_same_modular_rule() {
        // 3*(0+2+4+6) + (1+3+5) = 36 + 9 = 45 -> check digit must make it
        // a multiple of 10, so the final even-position digit is 5.
        let q = Query::parse("01234565").unwrap();
        assert_eq!(q.kind, QueryKind::Upc);
        assert_eq!(q.format, Some(UpcFormat::UpcE));
    }

    #[test]
    fn free_text_is_trimmed_and_preserved() {
        let q = Query::parse("  Nike Sneakers ").unwrap();
        assert_eq!(q.kind, QueryKind::Freetext);
        assert_eq!(q.canonical, "Nike Sneakers");
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(Query::parse("").is_err());
        assert!(Query::parse("   ").is_err());
    }

    #[test]
    fn mutating_any_single_digit_invalidates_a_valid_upc_a() {
        let valid = "012345678905";
        for pos in 0..12 {
            for sub in b'0'..=b'9' {
                if valid.as_bytes()[pos] == sub {
                    continue;
                }
                let mut mutated = valid.as_bytes().to_vec();
                mutated[pos] = sub;
                let mutated = String::from_utf8(mutated).unwrap();
                let q = Query::parse(&mutated).unwrap();
                assert_eq!(
                    q.kind,
                    QueryKind::Freetext,
                    "mutation {mutated} at position {pos} should invalidate the checksum"
                );
            }
        }
    }

    #[test]
    fn wrong_length_digit_strings_are_freetext() {
        let q = Query::parse("12345").unwrap();
        assert_eq!(q.kind, QueryKind::Freetext);
    }
}
