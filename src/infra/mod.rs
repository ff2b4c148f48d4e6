//! Everything that touches the filesystem: templates, datasets and caches.

pub mod cache;
pub mod dataset;
pub mod memo;
pub mod rate_tables;
pub mod template;
pub mod workbook;

#[allow(unused_imports)]
pub use cache::{CacheStore, Stamp};
#[allow(unused_imports)]
pub use dataset::Dataset;
#[allow(unused_imports)]
pub use rate_tables::{RateTable, RateTableStore, RateTables};
#[allow(unused_imports)]
pub use template::{CrossCheck, Discrepancy, TemplateMetrics};
#[allow(unused_imports)]
pub use workbook::{CellAddr, RawCell, Sheet, Workbook};
