//! Pricing logic lives here. Nothing in this module touches the disk.

pub mod carriers;
pub mod entities;
pub mod metrics;
pub mod qualification;
pub mod selection;
pub mod weight;

#[allow(unused_imports)]
pub use carriers::CarrierName;
#[allow(unused_imports)]
pub use entities::{
    AggregationPolicy, BaselinePolicy, MetricsResult, PricingControls, Selection, ShipmentRecord,
    Zone,
};
#[allow(unused_imports)]
pub use metrics::{annualization_factor, compute_breakdown, compute_metrics, MetricsAggregator};
#[allow(unused_imports)]
pub use qualification::{
    available_services, normalize_name, shipping_priority, QualificationFilter, ShippingPriority,
};
#[allow(unused_imports)]
pub use selection::{
    CarrierSelector, CellKey, CellOutcome, RateLookup, SelectionRun, SkipReason, SkippedCell,
};
#[allow(unused_imports)]
pub use weight::{RowMapping, WeightBucket};
