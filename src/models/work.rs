use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Station {
    Washing,
    Ironing,
    Packing,
}

impl Station {
    /// Fixed station ordering. Packing has no successor; what follows it
    /// depends on payment status, decided by the transition table.
    pub fn successor(self) -> Option<Station> {
        match self {
            Station::Washing => Some(Station::Ironing),
            Station::Ironing => Some(Station::Packing),
            Station::Packing => None,
        }
    }
}

impl fmt::Display for Station {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Station::Washing => "washing",
            Station::Ironing => "ironing",
            Station::Packing => "packing",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkStatus {
    Pending,
    InProcess,
    BypassRequested,
    Completed,
}

/// One station visit for one order. At most one active row may exist per
/// (order, station); the store key enforces it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderWorkProcess {
    pub id: Uuid,
    pub order_id: Uuid,
    pub outlet_id: Uuid,
    /// Bound worker shift, not a user id. None for PENDING rows seeded by
    /// bypass resolution.
    pub shift_id: Option<Uuid>,
    pub station: Station,
    pub status: WorkStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShiftPeriod {
    Morning,
    Noon,
}

/// A worker's claim on capacity for one station visit; closed on completion
/// or by the shift-boundary sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerShift {
    pub id: Uuid,
    pub worker_id: Uuid,
    pub outlet_id: Uuid,
    pub station: Station,
    pub period: ShiftPeriod,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl WorkerShift {
    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::Station;

    #[test]
    fn station_order_is_washing_ironing_packing() {
        assert_eq!(Station::Washing.successor(), Some(Station::Ironing));
        assert_eq!(Station::Ironing.successor(), Some(Station::Packing));
        assert_eq!(Station::Packing.successor(), None);
    }
}
