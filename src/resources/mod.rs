use std::collections::BTreeMap;
use std::sync::Arc;

use crate::filter::{FieldSchema, FieldSpec, FieldType, FilterOp};

pub const FIREWALLS: &str = "firewalls";
pub const FILTERING_POLICIES: &str = "filtering_policies";
pub const FIREWALL_RULES: &str = "firewall_rules";

pub const RULE_SOURCES: &str = "firewall_rule_sources";
pub const RULE_DESTINATIONS: &str = "firewall_rule_destinations";
pub const RULE_PORTS: &str = "firewall_rule_ports";

/// Read scope guarding a resource's list and lookup routes.
pub fn read_scope(resource: &str) -> String {
    format!("read:{}", resource)
}

fn actions() -> FieldType {
    FieldType::Choice(vec!["allow".to_string(), "deny".to_string()])
}

/// Columns every record carries.
fn base(resource: &str) -> FieldSchema {
    FieldSchema::new(resource, resource)
        .field("created_at", FieldSpec::new("created_at", FieldType::Timestamp))
        .field("updated_at", FieldSpec::new("updated_at", FieldType::Timestamp))
        .soft_delete("deleted_at")
}

pub fn firewalls() -> FieldSchema {
    base(FIREWALLS).field("name", FieldSpec::new("name", FieldType::Text))
}

/// Hidden while their firewall is deleted.
pub fn filtering_policies() -> FieldSchema {
    base(FILTERING_POLICIES)
        .field("name", FieldSpec::new("name", FieldType::Text))
        .field("default_action", FieldSpec::new("default_action", actions()))
        .field("firewall_id", FieldSpec::new("firewall_id", FieldType::Integer))
        .child_of("firewall_id", &firewalls())
}

fn address(table: &str) -> FieldSpec {
    FieldSpec::new("address", FieldType::Text)
        .operators(&[FilterOp::Eq, FilterOp::In])
        .through(table, "firewall_rule_id")
}

fn port(table: &str, column: &str) -> FieldSpec {
    FieldSpec::new(column, FieldType::Integer).through(table, "firewall_rule_id")
}

/// Hidden while their policy or its firewall is deleted. Endpoint fields
/// match when any of the rule's sources, destinations or ports does.
pub fn firewall_rules() -> FieldSchema {
    base(FIREWALL_RULES)
        .field("action", FieldSpec::new("action", actions()))
        .field("priority", FieldSpec::new("priority", FieldType::Integer))
        .field("description", FieldSpec::new("description", FieldType::Text))
        .field(
            "filtering_policy_id",
            FieldSpec::new("filtering_policy_id", FieldType::Integer),
        )
        .field("source_address", address(RULE_SOURCES))
        .field("source_port", port(RULE_SOURCES, "port"))
        .field("destination_address", address(RULE_DESTINATIONS))
        .field("destination_port", port(RULE_DESTINATIONS, "port"))
        .field("port", port(RULE_PORTS, "number"))
        .child_of("filtering_policy_id", &filtering_policies())
}

/// Immutable set of exposed resources, keyed by the name used in URLs.
#[derive(Debug, Clone, Default)]
pub struct ResourceRegistry {
    schemas: BTreeMap<String, Arc<FieldSchema>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The firewall management resources.
    pub fn standard() -> Self {
        Self::new()
            .with(firewalls())
            .with(filtering_policies())
            .with(firewall_rules())
    }

    pub fn with(mut self, schema: FieldSchema) -> Self {
        self.schemas.insert(schema.resource().to_string(), Arc::new(schema));
        self
    }

    pub fn get(&self, resource: &str) -> Option<&Arc<FieldSchema>> {
        self.schemas.get(resource)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<FieldSchema>)> {
        self.schemas.iter().map(|(name, schema)| (name.as_str(), schema))
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}
