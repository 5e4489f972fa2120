//! Job costing and the daily budget.

use chrono::NaiveDate;
use serde::Serialize;

use crate::config::CostConfig;

use super::job::{JobKind, JobOutput};

const MB: f64 = 1024.0 * 1024.0;
const GB: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Debug, Clone)]
pub struct CostModel {
    costs: CostConfig,
}

impl CostModel {
    pub fn new(costs: CostConfig) -> Self {
        Self { costs }
    }

    /// Cost charged against the cap at admission time.
    pub fn estimate(&self, kind: &JobKind) -> f64 {
        match kind {
            JobKind::Ocr(job) => job.payload_bytes() as f64 / MB * self.costs.ocr_per_mb,
            JobKind::Transform(job) => {
                job.expected_tables.max(1) as f64 * self.costs.transform_per_table
            }
            JobKind::Compress(_) => self.costs.compress_flat,
            JobKind::Storage(job) => {
                job.size_bytes as f64 / GB * job.retention_days * self.costs.storage_per_gb_day
            }
        }
    }

    /// Cost of a finished job. Transform jobs pay for the tables actually built.
    pub fn actual(&self, kind: &JobKind, output: &JobOutput) -> f64 {
        match (kind, output) {
            (JobKind::Transform(_), JobOutput::Transform(tables)) => {
                tables.len() as f64 * self.costs.transform_per_table
            }
            _ => self.estimate(kind),
        }
    }
}

/// Running total against the daily cap. Resets when the local date changes.
#[derive(Debug, Clone)]
pub struct DailyBudget {
    cap: f64,
    spent: f64,
    day: NaiveDate,
}

impl DailyBudget {
    pub fn new(cap: f64, today: NaiveDate) -> Self {
        Self {
            cap,
            spent: 0.0,
            day: today,
        }
    }

    /// Returns true when the total was reset.
    pub fn roll_over(&mut self, today: NaiveDate) -> bool {
        if today == self.day {
            return false;
        }
        log::info!(
            "Daily cost total reset ({:.2} spent on {})",
            self.spent,
            self.day
        );
        self.day = today;
        self.spent = 0.0;
        true
    }

    pub fn would_exceed(&self, estimated: f64) -> bool {
        self.spent + estimated > self.cap
    }

    pub fn charge(&mut self, amount: f64) {
        self.spent += amount;
    }

    pub fn spent(&self) -> f64 {
        self.spent
    }

    pub fn cap(&self) -> f64 {
        self.cap
    }

    pub fn governance(&self) -> CostGovernance {
        CostGovernance {
            daily_cap: self.cap,
            current_daily_cost: self.spent,
            utilization: if self.cap > 0.0 {
                self.spent / self.cap
            } else {
                1.0
            },
            remaining: (self.cap - self.spent).max(0.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CostGovernance {
    pub daily_cap: f64,
    pub current_daily_cost: f64,
    /// `current_daily_cost / daily_cap`
    pub utilization: f64,
    pub remaining: f64,
}
