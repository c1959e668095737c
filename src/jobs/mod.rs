pub mod price_acquisition;
pub mod skin_discovery;
pub mod price_history_retention;
