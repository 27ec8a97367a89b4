mod time_calc;

pub use time_calc::{Stage, TimeCalc};

pub(crate) const CROSS_MARK: &str = "❌";
