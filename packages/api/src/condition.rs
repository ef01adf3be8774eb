// ABOUTME: Status condition type and builder shared by Sandpit resources
// ABOUTME: Mirrors the usual type/status/reason/message condition shape

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl Default for ConditionStatus {
    fn default() -> Self {
        ConditionStatus::Unknown
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub r#type: String,
    pub status: ConditionStatus,
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default)]
    pub observed_generation: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

/// Fluent builder used by the reconcilers to assemble a condition per pass.
#[derive(Debug, Clone)]
pub struct ConditionBuilder {
    cond: Condition,
}

impl ConditionBuilder {
    pub fn new(condition_type: &str) -> Self {
        Self {
            cond: Condition {
                r#type: condition_type.to_string(),
                status: ConditionStatus::Unknown,
                reason: "Unknown".to_string(),
                message: String::new(),
                observed_generation: 0,
                last_transition_time: None,
            },
        }
    }

    pub fn status(mut self, status: ConditionStatus) -> Self {
        self.cond.status = status;
        self
    }

    pub fn reason(mut self, reason: impl ToString) -> Self {
        self.cond.reason = reason.to_string();
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.cond.message = message.into();
        self
    }

    pub fn generation(mut self, generation: i64) -> Self {
        self.cond.observed_generation = generation;
        self
    }

    pub fn build(self) -> Condition {
        self.cond
    }
}

/// Inserts or replaces the condition with the same type, bumping the
/// transition time only when the status actually changed.
pub fn set_condition(conditions: &mut Vec<Condition>, mut cond: Condition) {
    match conditions.iter_mut().find(|c| c.r#type == cond.r#type) {
        Some(existing) => {
            cond.last_transition_time = if existing.status == cond.status {
                existing.last_transition_time
            } else {
                Some(Utc::now())
            };
            *existing = cond;
        }
        None => {
            cond.last_transition_time = Some(Utc::now());
            conditions.push(cond);
        }
    }
}

pub fn get_condition<'a>(conditions: &'a [Condition], condition_type: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.r#type == condition_type)
}
