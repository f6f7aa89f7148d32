//! Wave-file analysis for the silence gate and the best-clip selector.

mod activity;
mod snr;

pub use activity::{Activity, analyze_activity};
pub use snr::compute_snr_db;
