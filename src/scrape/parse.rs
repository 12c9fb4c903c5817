use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;

use crate::types::{Condition, Listing};

/// Raw fields extracted from one listing card before parsing. Any field may
/// be malformed; cards that fail title or price parsing are dropped.
#[derive(Debug, Clone, Default)]
pub struct ListingCard {
    pub title: String,
    pub price_text: String,
    pub condition_text: Option<String>,
    pub sold_text: Option<String>,
    pub url: Option<String>,
}

/// Parse one card into a Listing. Returns None when the title is a
/// placeholder, the title is unrelated to the query, or the price does not
/// parse.
pub fn card_to_listing(card: &ListingCard, query: &str) -> Option<Listing> {
    let title = card.title.trim();
    if title.len() < 5 || title.to_lowercase().contains("shop on ebay") {
        return None;
    }
    if !is_relevant(title, query) {
        return None;
    }

    let price = parse_price(&card.price_text)?;

    Some(Listing {
        title: title.to_string(),
        price,
        currency: detect_currency(&card.price_text),
        condition: parse_condition(card.condition_text.as_deref().unwrap_or("")),
        sold_date: card.sold_text.as_deref().and_then(parse_sold_date),
        url: card.url.clone().unwrap_or_default(),
    })
}

/// A card is relevant when its title contains at least one query token of
/// two or more characters. Single-character tokens are skipped, so a query
/// made only of them matches no card.
pub fn is_relevant(title: &str, query: &str) -> bool {
    let title_lower = title.to_lowercase();
    query
        .to_lowercase()
        .split_whitespace()
        .filter(|term| term.len() >= 2)
        .any(|term| title_lower.contains(term))
}

fn price_run_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d[\d.,]*").expect("valid price regex"))
}

/// Extract the numeric portion of a price string.
///
/// Separators are interpreted per the locale hint of the text: when both
/// `,` and `.` appear, the last one is the decimal separator; a lone
/// separator followed by exactly two digits is decimal, anything else is a
/// thousands separator. Handles "$1,299.99", "EUR 349,95", "1.299" alike.
pub fn parse_price(text: &str) -> Option<f64> {
    let run = price_run_re().find(text)?.as_str();

    let last_comma = run.rfind(',');
    let last_dot = run.rfind('.');

    let decimal_sep = match (last_comma, last_dot) {
        (Some(c), Some(d)) => Some(if c > d { ',' } else { '.' }),
        (Some(c), None) => lone_separator_is_decimal(run, c).then_some(','),
        (None, Some(d)) => lone_separator_is_decimal(run, d).then_some('.'),
        (None, None) => None,
    };

    let mut normalized = String::with_capacity(run.len());
    for ch in run.chars() {
        match ch {
            '0'..='9' => normalized.push(ch),
            c if Some(c) == decimal_sep => normalized.push('.'),
            _ => {} // thousands separator
        }
    }
    // Only the last decimal separator counts; earlier ones were grouping.
    if let Some(first) = normalized.find('.') {
        let last = normalized.rfind('.').unwrap_or(first);
        if first != last {
            normalized = normalized.replacen('.', "", normalized.matches('.').count() - 1);
        }
    }

    let value: f64 = normalized.parse().ok()?;
    (value >= 0.0).then_some(value)
}

/// A single separator is decimal when it appears once with exactly two
/// trailing digits ("349,95"); three-digit groups are thousands ("1.299").
fn lone_separator_is_decimal(run: &str, idx: usize) -> bool {
    let sep = run.as_bytes()[idx] as char;
    run.matches(sep).count() == 1 && run.len() - idx == 3
}

pub fn detect_currency(text: &str) -> String {
    if text.contains('€') || text.contains("EUR") {
        "EUR".to_string()
    } else if text.contains('£') || text.contains("GBP") {
        "GBP".to_string()
    } else {
        "USD".to_string()
    }
}

/// Derive a condition from free-text fields with substring matches against a
/// fixed dictionary; anything unmatched is Unknown.
pub fn parse_condition(text: &str) -> Condition {
    let lower = text.to_lowercase();
    if lower.contains("refurbished") {
        Condition::Refurbished
    } else if lower.contains("pre-owned") || lower.contains("used") || lower.contains("open box") {
        Condition::Used
    } else if lower.contains("brand new") || lower.contains("new") || lower.contains("sealed") {
        Condition::New
    } else {
        Condition::Unknown
    }
}

/// Best-effort sold-date parsing; None when no known format matches.
pub fn parse_sold_date(text: &str) -> Option<NaiveDate> {
    let cleaned = text
        .trim()
        .trim_start_matches("Sold")
        .trim_start_matches("Vendido")
        .trim_start_matches(|c: char| !c.is_ascii_alphanumeric());

    const FORMATS: [&str; 3] = ["%b %d, %Y", "%d %b %Y", "%Y-%m-%d"];
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(cleaned.trim(), fmt).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn us_prices_parse_with_thousands_commas() {
        assert_eq!(parse_price("$1,299.99"), Some(1299.99));
        assert_eq!(parse_price("US $45.00"), Some(45.0));
        assert_eq!(parse_price("$12"), Some(12.0));
    }

    #[test]
    fn european_prices_use_comma_decimals() {
        assert_eq!(parse_price("€349,95"), Some(349.95));
        assert_eq!(parse_price("1.299"), Some(1299.0));
        assert_eq!(parse_price("EUR 1.299,50"), Some(1299.5));
    }

    #[test]
    fn garbage_price_text_is_rejected() {
        assert_eq!(parse_price("call for price"), None);
        assert_eq!(parse_price(""), None);
    }

    #[test]
    fn currency_is_detected_from_symbols() {
        assert_eq!(detect_currency("€349,95"), "EUR");
        assert_eq!(detect_currency("£20.00"), "GBP");
        assert_eq!(detect_currency("$45.00"), "USD");
    }

    #[test]
    fn condition_dictionary_matches_substrings() {
        assert_eq!(parse_condition("Brand New"), Condition::New);
        assert_eq!(parse_condition("Pre-Owned"), Condition::Used);
        assert_eq!(parse_condition("Certified - Refurbished"), Condition::Refurbished);
        assert_eq!(parse_condition("Parts only"), Condition::Unknown);
        assert_eq!(parse_condition(""), Condition::Unknown);
    }

    #[test]
    fn sold_dates_parse_best_effort() {
        assert_eq!(
            parse_sold_date("Sold Oct 12, 2025"),
            NaiveDate::from_ymd_opt(2025, 10, 12)
        );
        assert_eq!(
            parse_sold_date("2025-10-12"),
            NaiveDate::from_ymd_opt(2025, 10, 12)
        );
        assert_eq!(parse_sold_date("last week"), None);
    }

    #[test]
    fn irrelevant_and_placeholder_cards_are_dropped() {
        let mut card = ListingCard {
            title: "Shop on eBay".to_string(),
            price_text: "$10.00".to_string(),
            ..Default::default()
        };
        assert!(card_to_listing(&card, "nike sneakers").is_none());

        card.title = "Adidas Samba trainers size 9".to_string();
        assert!(card_to_listing(&card, "nike sneakers").is_none());

        card.title = "Nike Air Max sneakers size 10".to_string();
        let listing = card_to_listing(&card, "nike sneakers").expect("relevant card");
        assert_eq!(listing.price, 10.0);
        assert_eq!(listing.condition, Condition::Unknown);
    }

    #[test]
    fn short_token_queries_match_nothing() {
        assert!(is_relevant("Nike Air Max sneakers", "nike x"));
        assert!(!is_relevant("Nike Air Max sneakers", "a x"));
        let card = ListingCard {
            title: "Nike Air Max sneakers size 10".to_string(),
            price_text: "$10.00".to_string(),
            ..Default::default()
        };
        assert!(card_to_listing(&card, "a").is_none());
    }

    #[test]
    fn malformed_price_drops_the_card() {
        let card = ListingCard {
            title: "Nike Air Max sneakers".to_string(),
            price_text: "see description".to_string(),
            ..Default::default()
        };
        assert!(card_to_listing(&card, "nike").is_none());
    }
}
