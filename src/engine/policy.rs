use std::collections::HashMap;

use chrono::TimeDelta;

use crate::model::{BookingStatus, Role};

/// Statuses a booking may be created with. Cancelled/refused are never initial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InitialStatus {
    Pending,
    Confirmed,
}

impl From<InitialStatus> for BookingStatus {
    fn from(s: InitialStatus) -> Self {
        match s {
            InitialStatus::Pending => BookingStatus::Pending,
            InitialStatus::Confirmed => BookingStatus::Confirmed,
        }
    }
}

/// Role → initial status table. Roles missing from the table go to review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalPolicy {
    table: HashMap<Role, InitialStatus>,
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        Self {
            table: HashMap::from([
                (Role::Student, InitialStatus::Pending),
                (Role::Professor, InitialStatus::Confirmed),
                (Role::Administrator, InitialStatus::Confirmed),
            ]),
        }
    }
}

impl ApprovalPolicy {
    pub fn with(mut self, role: Role, status: InitialStatus) -> Self {
        self.table.insert(role, status);
        self
    }

    pub fn initial_status(&self, role: Role) -> BookingStatus {
        self.table
            .get(&role)
            .copied()
            .unwrap_or(InitialStatus::Pending)
            .into()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingPolicy {
    /// Shortest accepted booking, inclusive.
    pub min_duration: TimeDelta,
    /// Longest accepted booking, inclusive.
    pub max_duration: TimeDelta,
    /// A booking may be cancelled or edited only while its start is strictly further away than this.
    pub modification_lead: TimeDelta,
    pub approval: ApprovalPolicy,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            min_duration: TimeDelta::minutes(30),
            max_duration: TimeDelta::minutes(240),
            modification_lead: TimeDelta::hours(2),
            approval: ApprovalPolicy::default(),
        }
    }
}
