//! Redo carrier policy tables.
//!
//! Every carrier-specific rule the engine applies lives here as data so it
//! can be reviewed in one place:
//!
//! | carrier             | priority | forced on | pass-through | offered against | deal size      |
//! |---------------------|----------|-----------|--------------|-----------------|----------------|
//! | First Mile 2-5 Days | 0        |           |              | baseline        | spread         |
//! | USPS Market         | 1        | yes       | yes          | own rate        | $0.35 / won    |
//! | UPS Ground          | 2        | yes       | yes          | own rate        | $0.45 / won    |
//! | UPS Ground Saver    | 3        | yes       | yes          | own rate        | spread         |
//! | FedEx               | 4        |           |              | UPS Ground rate | spread         |
//! | Amazon              | 5        |           |              | UPS Ground rate | spread         |
//! | First Mile 1-3 Days | 6        |           |              | baseline        | spread         |
//! | First Mile 3-8 Days | 7        |           |              | baseline        | spread         |
//! | DHL                 | 8        |           |              | baseline        | spread         |

pub type CarrierName = String;

/// Canonical Redo carrier list, in tie-break priority order.
pub const REDO_CARRIERS: [&str; 9] = [
    "First Mile 2-5 Days",
    "USPS Market",
    "UPS Ground",
    "UPS Ground Saver",
    "FedEx",
    "Amazon",
    "First Mile 1-3 Days",
    "First Mile 3-8 Days",
    "DHL",
];

/// Always part of a merchant's candidate pool.
pub const FORCED_ON: [&str; 3] = ["USPS Market", "UPS Ground", "UPS Ground Saver"];

/// Winning with one of these offers the carrier's own rate to the merchant.
pub const PASS_THROUGH: [&str; 3] = ["USPS Market", "UPS Ground", "UPS Ground Saver"];

const REFERENCE_PRICED: [(&str, &str); 2] = [("FedEx", "UPS Ground"), ("Amazon", "UPS Ground")];

const DEAL_SIZE_OVERRIDES: [(&str, DealSizeFormula); 2] = [
    ("USPS Market", DealSizeFormula::PerWonOrder(0.35)),
    ("UPS Ground", DealSizeFormula::PerWonOrder(0.45)),
];

/// Deal-size rule that replaces the spread sum for a single-carrier run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DealSizeFormula {
    /// Flat platform fee for every won order.
    PerWonOrder(f64),
}

pub fn priority(carrier: &str) -> Option<usize> {
    REDO_CARRIERS.iter().position(|c| *c == carrier)
}

pub fn is_pass_through(carrier: &str) -> bool {
    PASS_THROUGH.contains(&carrier)
}

pub fn is_forced_on(carrier: &str) -> bool {
    FORCED_ON.contains(&carrier)
}

/// Carrier whose rate replaces the merchant baseline as the discount base.
pub fn reference_carrier(carrier: &str) -> Option<&'static str> {
    REFERENCE_PRICED
        .iter()
        .find(|(c, _)| *c == carrier)
        .map(|(_, reference)| *reference)
}

pub fn deal_size_formula(carrier: &str) -> Option<DealSizeFormula> {
    DEAL_SIZE_OVERRIDES
        .iter()
        .find(|(c, _)| *c == carrier)
        .map(|(_, formula)| *formula)
}

/// Uppercase label with parenthesized notes, marketing marks and
/// punctuation removed (`"UPS® Ground (Saver)"` → `"UPS GROUND"`).
pub fn normalize_label(label: &str) -> String {
    let mut without_notes = String::with_capacity(label.len());
    let mut depth = 0_u32;
    for ch in label.chars() {
        match ch {
            '(' => depth += 1,
            ')' if depth > 0 => depth -= 1,
            _ if depth == 0 => without_notes.push(ch),
            _ => {}
        }
    }
    let spaced: String = without_notes
        .chars()
        .map(|ch| {
            if ch.is_alphanumeric() || ch == '_' {
                ch
            } else {
                ' '
            }
        })
        .filter(|ch| *ch != 'Â')
        .collect();
    spaced
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

/// Resolves a free-form label to a canonical Redo carrier name.
pub fn canonical(label: &str) -> Option<&'static str> {
    let normalized = normalize_label(label);
    if normalized.starts_with("UPS GROUND SAVER") {
        return Some("UPS Ground Saver");
    }
    if normalized.starts_with("UPS GROUND") {
        return Some("UPS Ground");
    }
    if normalized.starts_with("USPS MARKET") {
        return Some("USPS Market");
    }
    REDO_CARRIERS
        .iter()
        .copied()
        .find(|carrier| normalize_label(carrier) == normalized)
}

/// Infers which Redo carrier bucket an invoice row shipped with.
pub fn infer_carrier(carrier: &str, service: &str) -> Option<&'static str> {
    let text = normalize_label(&format!("{carrier} {service}"));
    if text.is_empty() {
        return None;
    }

    // "UPS" is a substring of "USPS"; match whole words for it.
    let has_ups = text.split(' ').any(|word| word == "UPS");

    if text.contains("USPS") || text.contains("POSTAL") || text.contains("GROUND ADVANTAGE") {
        return Some("USPS Market");
    }
    if text.contains("UPS GROUND SAVER") || text.contains("UPS SAVER") {
        return Some("UPS Ground Saver");
    }
    if has_ups && text.contains("GROUND") {
        return Some("UPS Ground");
    }
    if text.contains("FEDEX") {
        return Some("FedEx");
    }
    if text.contains("AMAZON") {
        return Some("Amazon");
    }
    if text.contains("DHL") {
        return Some("DHL");
    }
    if text.contains("FIRST MILE") {
        if text.contains("1 3") || text.contains("1 TO 3") {
            return Some("First Mile 1-3 Days");
        }
        if text.contains("3 8") || text.contains("3 TO 8") {
            return Some("First Mile 3-8 Days");
        }
        return Some("First Mile 2-5 Days");
    }
    None
}
