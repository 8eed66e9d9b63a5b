use k8s_openapi::api::core::v1::PodSpec;
use serde::Deserialize;
use serde_json::{Map, Value};

/// Pod template fields that only steer where replicas land. These are the
/// only member fields an update may touch, and only while the group is
/// suspended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PlacementField {
    NodeSelector,
    Tolerations,
    Affinity,
    SchedulingGates,
}

impl PlacementField {
    pub const ALL: [PlacementField; 4] = [
        PlacementField::NodeSelector,
        PlacementField::Tolerations,
        PlacementField::Affinity,
        PlacementField::SchedulingGates,
    ];

    /// Field name inside a pod spec.
    pub fn key(self) -> &'static str {
        match self {
            PlacementField::NodeSelector => "nodeSelector",
            PlacementField::Tolerations => "tolerations",
            PlacementField::Affinity => "affinity",
            PlacementField::SchedulingGates => "schedulingGates",
        }
    }

    pub fn copy(self, from: &PodSpec, to: &mut PodSpec) {
        match self {
            PlacementField::NodeSelector => to.node_selector = from.node_selector.clone(),
            PlacementField::Tolerations => to.tolerations = from.tolerations.clone(),
            PlacementField::Affinity => to.affinity = from.affinity.clone(),
            PlacementField::SchedulingGates => to.scheduling_gates = from.scheduling_gates.clone(),
        }
    }

    /// The field as JSON; `null` when unset, so it can double as a merge
    /// patch value that clears the field.
    pub fn value(self, pod: &PodSpec) -> Value {
        let value = match self {
            PlacementField::NodeSelector => serde_json::to_value(&pod.node_selector),
            PlacementField::Tolerations => serde_json::to_value(&pod.tolerations),
            PlacementField::Affinity => serde_json::to_value(&pod.affinity),
            PlacementField::SchedulingGates => serde_json::to_value(&pod.scheduling_gates),
        };
        value.unwrap_or(Value::Null)
    }
}

/// The explicit table of member fields that stay mutable while suspended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowList {
    fields: Vec<PlacementField>,
}

impl Default for AllowList {
    fn default() -> Self {
        Self::new(PlacementField::ALL.to_vec())
    }
}

impl AllowList {
    pub fn new(mut fields: Vec<PlacementField>) -> Self {
        fields.sort_unstable();
        fields.dedup();
        Self { fields }
    }

    pub fn fields(&self) -> &[PlacementField] {
        &self.fields
    }

    pub fn contains(&self, field: PlacementField) -> bool {
        self.fields.contains(&field)
    }

    /// Overwrites every allowed field of `to` with the value from `from`.
    pub fn carry_over(&self, from: &PodSpec, to: &mut PodSpec) {
        for field in &self.fields {
            field.copy(from, to);
        }
    }

    /// Merge patch body that turns the allowed fields of `current` into
    /// exactly those of `desired`. Map keys missing from `desired` are sent
    /// as `null` so they are removed rather than merged.
    pub fn patch_towards(&self, current: &PodSpec, desired: &PodSpec) -> Map<String, Value> {
        self.fields
            .iter()
            .map(|field| {
                let patch = replacement(&field.value(current), &field.value(desired));
                (field.key().to_string(), patch)
            })
            .collect()
    }
}

fn replacement(current: &Value, desired: &Value) -> Value {
    match (current, desired) {
        (Value::Object(current), Value::Object(desired)) => {
            let mut patch: Map<String, Value> = current
                .keys()
                .filter(|key| !desired.contains_key(*key))
                .map(|key| (key.clone(), Value::Null))
                .collect();
            for (key, want) in desired {
                let have = current.get(key).unwrap_or(&Value::Null);
                patch.insert(key.clone(), replacement(have, want));
            }
            Value::Object(patch)
        }
        _ => desired.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Toleration;
    use std::collections::BTreeMap;

    fn pod_with_selector() -> PodSpec {
        PodSpec {
            node_selector: Some(BTreeMap::from([(
                "pool".to_string(),
                "gpu".to_string(),
            )])),
            tolerations: Some(vec![Toleration {
                key: Some("gpu".to_string()),
                operator: Some("Exists".to_string()),
                ..Default::default()
            }]),
            hostname: Some("fixed".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_allow_list_table() {
        let cases = [
            (PlacementField::NodeSelector, "nodeSelector"),
            (PlacementField::Tolerations, "tolerations"),
            (PlacementField::Affinity, "affinity"),
            (PlacementField::SchedulingGates, "schedulingGates"),
        ];
        let allow = AllowList::default();
        for (field, key) in cases {
            assert!(allow.contains(field));
            assert_eq!(field.key(), key);
        }
    }

    #[test]
    fn test_carry_over_only_touches_listed_fields() {
        let from = pod_with_selector();
        let mut to = PodSpec::default();
        AllowList::new(vec![PlacementField::NodeSelector]).carry_over(&from, &mut to);

        assert_eq!(to.node_selector, from.node_selector);
        assert!(to.tolerations.is_none());
        assert!(to.hostname.is_none());
    }

    fn selector(pairs: &[(&str, &str)]) -> PodSpec {
        PodSpec {
            node_selector: Some(
                pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            ..Default::default()
        }
    }

    #[test]
    fn test_patch_towards_clears_unset_fields() {
        let patch = AllowList::default().patch_towards(&PodSpec::default(), &pod_with_selector());

        assert_eq!(patch["nodeSelector"]["pool"], "gpu");
        assert_eq!(patch["tolerations"][0]["key"], "gpu");
        assert_eq!(patch["affinity"], Value::Null);
        assert_eq!(patch["schedulingGates"], Value::Null);
    }

    #[test]
    fn test_patch_towards_removes_replaced_selector_keys() {
        let current = selector(&[("zone", "a"), ("disk", "ssd")]);
        let desired = selector(&[("pool", "gpu"), ("disk", "nvme")]);
        let patch = AllowList::new(vec![PlacementField::NodeSelector]).patch_towards(&current, &desired);

        assert_eq!(
            Value::Object(patch.clone()),
            serde_json::json!({"nodeSelector": {"zone": null, "disk": "nvme", "pool": "gpu"}})
        );

        let mut job = serde_json::to_value(&current).unwrap();
        json_patch::merge(&mut job, &Value::Object(patch));
        let merged: PodSpec = serde_json::from_value(job).unwrap();
        assert_eq!(merged.node_selector, desired.node_selector);
    }

    #[test]
    fn test_duplicate_fields_are_collapsed() {
        let allow = AllowList::new(vec![
            PlacementField::NodeSelector,
            PlacementField::Tolerations,
            PlacementField::NodeSelector,
        ]);
        assert_eq!(
            allow.fields(),
            &[PlacementField::NodeSelector, PlacementField::Tolerations]
        );
    }

    #[test]
    fn test_deserialize_field_names() {
        let fields: Vec<PlacementField> =
            serde_yaml::from_str("[nodeSelector, schedulingGates]").unwrap();
        assert_eq!(
            fields,
            vec![PlacementField::NodeSelector, PlacementField::SchedulingGates]
        );
    }
}
