use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Observed state of a group. Written by the controller only.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobGroupStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Whole-group restarts performed so far. Never decreases.
    #[serde(default)]
    pub restarts: i32,

    #[serde(default)]
    pub per_member: Vec<ReplicatedJobStatus>,
}

impl JobGroupStatus {
    pub fn condition(&self, type_: ConditionType) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    pub fn is_true(&self, type_: ConditionType) -> bool {
        self.condition(type_)
            .is_some_and(|c| c.status == ConditionStatus::True)
    }

    /// The lifecycle condition currently `True`, if any.
    pub fn current(&self) -> Option<ConditionType> {
        self.conditions
            .iter()
            .find(|c| c.status == ConditionStatus::True)
            .map(|c| c.type_)
    }

    pub fn is_finished(&self) -> bool {
        self.is_true(ConditionType::Completed) || self.is_true(ConditionType::Failed)
    }

    /// Makes `type_` the single `True` lifecycle condition. Conditions whose
    /// status does not change keep their transition time.
    pub fn transition(
        &mut self,
        type_: ConditionType,
        reason: &str,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) {
        let message = message.into();
        let timestamp = now.to_rfc3339_opts(SecondsFormat::Secs, true);

        for condition in self.conditions.iter_mut() {
            if condition.type_ == type_ {
                if condition.status != ConditionStatus::True {
                    condition.status = ConditionStatus::True;
                    condition.last_transition_time = timestamp.clone();
                }
                condition.reason = reason.to_string();
                condition.message = message.clone();
            } else if condition.status == ConditionStatus::True {
                condition.status = ConditionStatus::False;
                condition.reason = format!("Became{type_}");
                condition.message = String::new();
                condition.last_transition_time = timestamp.clone();
            }
        }

        if self.condition(type_).is_none() {
            self.conditions.push(Condition {
                type_,
                status: ConditionStatus::True,
                reason: reason.to_string(),
                message,
                last_transition_time: timestamp,
            });
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: ConditionType,
    pub status: ConditionStatus,
    #[serde(default)]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    /// RFC 3339 timestamp of the last status flip.
    pub last_transition_time: String,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum ConditionType {
    Suspended,
    Resuming,
    Active,
    Completed,
    Failed,
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Suspended => write!(f, "Suspended"),
            Self::Resuming => write!(f, "Resuming"),
            Self::Active => write!(f, "Active"),
            Self::Completed => write!(f, "Completed"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
}

/// Per-member replica counters, one child job per replica.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReplicatedJobStatus {
    pub name: String,
    pub active: i32,
    pub succeeded: i32,
    pub failed: i32,
    #[serde(default)]
    pub suspended: i32,
}
