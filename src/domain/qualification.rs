//! Which shipments count toward the analysis.
//!
//! A shipment qualifies when its normalized service is one the merchant
//! includes and its normalized carrier is not excluded. Merchants that never
//! chose services get the default policy below.

use std::collections::HashSet;

use serde::Serialize;

/// Known merchant service levels and whether the default policy keeps them.
///
/// The keyword rule in [`default_includes`] excludes expedited, second-day,
/// air and international services; `DHL SM Parcel Expedited` is kept anyway
/// because it is a ground product despite its name.
pub const SERVICE_POLICY: [ServicePolicyEntry; 6] = [
    ServicePolicyEntry::new("UPS® Ground", true, "ground"),
    ServicePolicyEntry::new("USPS Ground Advantage", true, "ground"),
    ServicePolicyEntry::new("DHL SM Parcel Expedited", true, "ground product, kept by policy"),
    ServicePolicyEntry::new("DHL SM Parcel Expedited Max", false, "expedited"),
    ServicePolicyEntry::new("UPS 2nd Day Air®", false, "second day"),
    ServicePolicyEntry::new("DHL Parcel International Direct - DDU", false, "international"),
];

/// Carrier + service combinations kept even though a keyword would exclude them.
const POLICY_EXCEPTIONS: [(&str, &str); 1] = [("DHL", "SM PARCEL EXPEDITED")];

const EXCLUDED_KEYWORDS: [&str; 6] = [
    "EXPEDITED",
    "2ND DAY",
    "2 DAY",
    "2DAY",
    "AIR",
    "INTERNATIONAL",
];

#[derive(Clone, Copy, Debug, Serialize)]
pub struct ServicePolicyEntry {
    pub service: &'static str,
    pub included: bool,
    pub reason: &'static str,
}

impl ServicePolicyEntry {
    const fn new(service: &'static str, included: bool, reason: &'static str) -> Self {
        Self {
            service,
            included,
            reason,
        }
    }
}

/// Normalizes service and carrier names for matching: drops marketing marks
/// and a trailing `" - variant"` suffix, strips punctuation, collapses
/// whitespace and uppercases.
pub fn normalize_name(raw: &str) -> String {
    let cleaned = raw.replace(['Â', '®', '™'], "");
    let base = match cleaned.rfind(" - ") {
        Some(idx) if idx > 0 => &cleaned[..idx],
        _ => cleaned.as_str(),
    };
    let stripped: String = base
        .chars()
        .filter(|ch| ch.is_alphanumeric() || ch.is_whitespace() || *ch == '_')
        .collect();
    stripped
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

/// Default inclusion for a normalized service name.
pub fn default_includes(service: &str) -> bool {
    if let Some(entry) = SERVICE_POLICY
        .iter()
        .find(|entry| normalize_name(entry.service) == service)
    {
        return entry.included;
    }
    if POLICY_EXCEPTIONS
        .iter()
        .any(|(carrier, product)| service.starts_with(carrier) && service.contains(product))
    {
        return true;
    }
    !EXCLUDED_KEYWORDS
        .iter()
        .any(|keyword| contains_word_sequence(service, keyword))
}

fn contains_word_sequence(haystack: &str, needle: &str) -> bool {
    let words: Vec<&str> = haystack.split(' ').collect();
    let wanted: Vec<&str> = needle.split(' ').collect();
    words.windows(wanted.len()).any(|window| window == wanted.as_slice())
}

/// Coarse service class derived from a normalized service name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ShippingPriority {
    Ground,
    Air,
    Expedited,
    Other,
}

pub fn shipping_priority(service: &str) -> ShippingPriority {
    let service = normalize_name(service);
    if service.contains("GROUND") {
        ShippingPriority::Ground
    } else if service.contains("2ND DAY") || service.contains("2 DAY") || service.contains("2DAY") {
        ShippingPriority::Air
    } else if service.contains("EXPEDITED") {
        ShippingPriority::Expedited
    } else {
        ShippingPriority::Other
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum IncludedServices {
    Chosen(HashSet<String>),
    DefaultPolicy,
}

/// Per-shipment qualification check for one merchant configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QualificationFilter {
    included: IncludedServices,
    excluded_carriers: HashSet<String>,
}

impl QualificationFilter {
    /// `included_services: None` means the merchant did not choose and the
    /// default policy applies.
    pub fn new<S: AsRef<str>>(included_services: Option<&[S]>, excluded_carriers: &[S]) -> Self {
        let included = match included_services {
            Some(services) => IncludedServices::Chosen(
                services.iter().map(|s| normalize_name(s.as_ref())).collect(),
            ),
            None => IncludedServices::DefaultPolicy,
        };
        Self {
            included,
            excluded_carriers: excluded_carriers
                .iter()
                .map(|c| normalize_name(c.as_ref()))
                .collect(),
        }
    }

    /// Both arguments must already be normalized.
    pub fn is_qualified(&self, service: &str, carrier: &str) -> bool {
        !self.excluded_carriers.contains(carrier) && self.includes_service(service)
    }

    /// Service-level half of [`is_qualified`](Self::is_qualified); `service`
    /// must already be normalized.
    pub fn includes_service(&self, service: &str) -> bool {
        if service.is_empty() {
            return false;
        }
        match &self.included {
            IncludedServices::Chosen(set) => set.contains(service),
            IncludedServices::DefaultPolicy => default_includes(service),
        }
    }
}

/// Known service levels that appear in a set of observed service names,
/// in policy-table order.
pub fn available_services<'a, I>(observed: I) -> Vec<&'static str>
where
    I: IntoIterator<Item = &'a str>,
{
    let seen: HashSet<String> = observed.into_iter().map(normalize_name).collect();
    SERVICE_POLICY
        .iter()
        .filter(|entry| seen.contains(&normalize_name(entry.service)))
        .map(|entry| entry.service)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_strips_marks_punctuation_and_variant_suffix() {
        let cases = [
            ("UPSÂ® Ground", "UPS GROUND"),
            ("UPS 2nd Day AirÂ®", "UPS 2ND DAY AIR"),
            ("DHL Parcel International Direct - DDU", "DHL PARCEL INTERNATIONAL DIRECT"),
            ("  usps   ground advantage ", "USPS GROUND ADVANTAGE"),
            ("First Mile 2-5 Days", "FIRST MILE 25 DAYS"),
        ];
        for (input, expected) in cases {
            assert_eq!(normalize_name(input), expected, "input {input:?}");
        }
    }

    #[test]
    fn default_policy_keeps_named_exception() {
        assert!(default_includes("UPS GROUND"));
        assert!(default_includes("DHL SM PARCEL EXPEDITED"));
        assert!(!default_includes("DHL SM PARCEL EXPEDITED MAX"));
        assert!(!default_includes("UPS 2ND DAY AIR"));
        assert!(!default_includes("DHL PARCEL INTERNATIONAL DIRECT"));
        assert!(!default_includes("FEDEX INTERNATIONAL ECONOMY"));
        assert!(default_includes("FEDEX HOME DELIVERY"));
        assert!(!default_includes("UPS NEXT DAY AIR"));
        assert!(default_includes("USPS PRIORITY MAIL"));
    }

    #[test]
    fn chosen_services_and_excluded_carriers_both_apply() {
        let filter = QualificationFilter::new(Some(&["UPS® Ground"][..]), &["FedEx"][..]);
        assert!(filter.is_qualified("UPS GROUND", "UPS"));
        assert!(!filter.is_qualified("USPS GROUND ADVANTAGE", "USPS"));
        assert!(!filter.is_qualified("UPS GROUND", "FEDEX"));
        assert!(!filter.is_qualified("", "UPS"));
    }

    #[test]
    fn available_services_intersects_with_policy_table() {
        let observed = ["UPSÂ® Ground", "USPS Ground Advantage", "Local Courier"];
        assert_eq!(
            available_services(observed),
            vec!["UPS® Ground", "USPS Ground Advantage"]
        );
    }

    #[test]
    fn priority_classes() {
        assert_eq!(shipping_priority("UPS® Ground"), ShippingPriority::Ground);
        assert_eq!(shipping_priority("UPS 2nd Day Air"), ShippingPriority::Air);
        assert_eq!(shipping_priority("DHL SM Parcel Expedited"), ShippingPriority::Expedited);
        assert_eq!(shipping_priority("Overnight"), ShippingPriority::Other);
    }
}
