use serde::{Deserialize, Serialize};

use crate::jobs::price_acquisition::CycleReport;

#[derive(Debug, Serialize, Deserialize)]
pub struct StoreHealthEntry {
    pub name: String,
    pub healthy: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// "ok" when every store answers, "degraded" otherwise
    pub status: String,
    pub stores: Vec<StoreHealthEntry>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub cycle_running: bool,
    pub last_cycle: Option<CycleReport>,
}
