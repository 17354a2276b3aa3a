use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Role a task is routed to. Notifications are grouped by role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Cfo,
    Maintenance,
    Accounting,
    Leasing,
    PropertyManager,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::Cfo,
        Role::Maintenance,
        Role::Accounting,
        Role::Leasing,
        Role::PropertyManager,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Cfo => "cfo",
            Role::Maintenance => "maintenance",
            Role::Accounting => "accounting",
            Role::Leasing => "leasing",
            Role::PropertyManager => "property_manager",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Role::Cfo => "CFO",
            Role::Maintenance => "Maintenance",
            Role::Accounting => "Accounting",
            Role::Leasing => "Leasing",
            Role::PropertyManager => "Property Manager",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .to_ascii_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        match normalized.as_str() {
            "cfo" | "finance" | "chieffinancialofficer" => Ok(Role::Cfo),
            "maintenance" | "facilities" => Ok(Role::Maintenance),
            "accounting" | "accountant" | "ap" | "ar" => Ok(Role::Accounting),
            "leasing" | "leasingagent" => Ok(Role::Leasing),
            "propertymanager" | "pm" | "manager" => Ok(Role::PropertyManager),
            _ => Err(format!("unknown role '{}'", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(format!("unknown task status '{}'", other)),
        }
    }
}

/// Actionable follow-up derived from an insight.
///
/// Invariants after synthesis: `priority` in `1..=5` (1 most urgent),
/// `due_date` within `[today, today + max_due_days(priority)]`,
/// `estimated_hours` in `[0.5, 40]`, `potential_value >= 0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub report_id: String,
    pub title: String,
    pub description: String,
    pub priority: u8,
    pub assigned_role: Role,
    pub due_date: NaiveDate,
    pub estimated_hours: f64,
    pub potential_value: f64,
    pub source_insight: Option<String>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

pub const MIN_TASK_HOURS: f64 = 0.5;
pub const MAX_TASK_HOURS: f64 = 40.0;

/// Upper bound on how far out a task of the given priority may be due.
pub fn max_due_days(priority: u8) -> i64 {
    match priority {
        0..=2 => 3,
        3 => 14,
        _ => 30,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_due_days_table() {
        assert_eq!(max_due_days(1), 3);
        assert_eq!(max_due_days(2), 3);
        assert_eq!(max_due_days(3), 14);
        assert_eq!(max_due_days(4), 30);
        assert_eq!(max_due_days(5), 30);
    }

    #[test]
    fn test_role_parse() {
        assert_eq!("Property Manager".parse::<Role>(), Ok(Role::PropertyManager));
        assert_eq!("CFO".parse::<Role>(), Ok(Role::Cfo));
        assert_eq!("property_manager".parse::<Role>(), Ok(Role::PropertyManager));
        assert!("janitor".parse::<Role>().is_err());
    }
}
