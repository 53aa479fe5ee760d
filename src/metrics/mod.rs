pub mod tracker;

pub use tracker::{add_metrics, div_metrics, MetricLog, MetricMap};
