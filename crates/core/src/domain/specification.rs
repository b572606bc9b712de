use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::DomainError;

pub const ADDITIONAL_PROPERTIES_KEY: &str = "additional_properties";

/// One of the five slots every infrastructure request must fill before code
/// can be generated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequiredField {
    SubscriptionName,
    ResourceGroup,
    ResourceName,
    ResourceType,
    Location,
}

impl RequiredField {
    pub const ALL: [RequiredField; 5] = [
        Self::SubscriptionName,
        Self::ResourceGroup,
        Self::ResourceName,
        Self::ResourceType,
        Self::Location,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Self::SubscriptionName => "subscription_name",
            Self::ResourceGroup => "resource_group",
            Self::ResourceName => "resource_name",
            Self::ResourceType => "resource_type",
            Self::Location => "location",
        }
    }

    /// The key with underscores replaced by spaces, as it appears in prose.
    pub fn spoken_name(&self) -> &'static str {
        match self {
            Self::SubscriptionName => "subscription name",
            Self::ResourceGroup => "resource group",
            Self::ResourceName => "resource name",
            Self::ResourceType => "resource type",
            Self::Location => "location",
        }
    }

    /// Shortest phrase that signals the model is asking about this field.
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::SubscriptionName => "subscription",
            other => other.spoken_name(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::SubscriptionName => "Subscription Name",
            Self::ResourceGroup => "Resource Group",
            Self::ResourceName => "Resource Name",
            Self::ResourceType => "Resource Type",
            Self::Location => "Location",
        }
    }

    /// Fields that are absent, null, non-string, or blank in `map`, in
    /// canonical order.
    pub fn missing_from(map: &Map<String, Value>) -> Vec<RequiredField> {
        Self::ALL.into_iter().filter(|field| filled_value(map, field.key()).is_none()).collect()
    }
}

impl fmt::Display for RequiredField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

pub fn is_complete(map: &Map<String, Value>) -> bool {
    RequiredField::missing_from(map).is_empty()
}

pub fn join_fields(fields: &[RequiredField]) -> String {
    fields.iter().map(RequiredField::key).collect::<Vec<_>>().join(", ")
}

fn filled_value<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    map.get(key).and_then(Value::as_str).filter(|value| !value.trim().is_empty())
}

/// A complete request for one cloud resource.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InfrastructureSpec {
    pub subscription_name: String,
    pub resource_group: String,
    pub resource_name: String,
    pub resource_type: String,
    pub location: String,
    /// Echoed as the model sent it, including an empty object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_properties: Option<Map<String, Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl InfrastructureSpec {
    pub fn from_map(mut map: Map<String, Value>) -> Result<Self, DomainError> {
        let missing = RequiredField::missing_from(&map);
        if !missing.is_empty() {
            return Err(DomainError::IncompleteSpecification { missing });
        }

        let mut take = |field: RequiredField| match map.remove(field.key()) {
            Some(Value::String(value)) => value,
            _ => String::new(),
        };
        let subscription_name = take(RequiredField::SubscriptionName);
        let resource_group = take(RequiredField::ResourceGroup);
        let resource_name = take(RequiredField::ResourceName);
        let resource_type = take(RequiredField::ResourceType);
        let location = take(RequiredField::Location);

        // Non-object values stay in `extra` so they serialize unchanged.
        let additional_properties = match map.remove(ADDITIONAL_PROPERTIES_KEY) {
            Some(Value::Object(properties)) => Some(properties),
            Some(other) => {
                map.insert(ADDITIONAL_PROPERTIES_KEY.to_string(), other);
                None
            }
            None => None,
        };

        Ok(Self {
            subscription_name,
            resource_group,
            resource_name,
            resource_type,
            location,
            additional_properties,
            extra: map,
        })
    }

    pub fn field(&self, field: RequiredField) -> &str {
        match field {
            RequiredField::SubscriptionName => &self.subscription_name,
            RequiredField::ResourceGroup => &self.resource_group,
            RequiredField::ResourceName => &self.resource_name,
            RequiredField::ResourceType => &self.resource_type,
            RequiredField::Location => &self.location,
        }
    }

    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| format!("{self:?}"))
    }
}
