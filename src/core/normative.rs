//! TP-013: Embedded normative base types.

use super::error::Result;
use super::types::ServiceTemplate;
use indexmap::IndexMap;

const NORMATIVE_TYPES: &str = r#"
interface_types:
  tosca.interfaces.Root:
    description: Base interface type
  tosca.interfaces.node.lifecycle.Standard:
    derived_from: tosca.interfaces.Root
    create:
      description: Create the node
    configure:
      description: Configure the node
    start:
      description: Start the node
    stop:
      description: Stop the node
    delete:
      description: Delete the node
  tosca.interfaces.relationship.Configure:
    derived_from: tosca.interfaces.Root
    pre_configure_source:
    pre_configure_target:
    post_configure_source:
    post_configure_target:
    add_target:
    add_source:
    target_changed:
    remove_target:

capability_types:
  tosca.capabilities.Root:
    description: Base capability type
  tosca.capabilities.Node:
    derived_from: tosca.capabilities.Root
  tosca.capabilities.Container:
    derived_from: tosca.capabilities.Root
    properties:
      num_cpus: { type: integer, required: false }
      mem_size: { type: scalar-unit.size, required: false }
      disk_size: { type: scalar-unit.size, required: false }
  tosca.capabilities.Endpoint:
    derived_from: tosca.capabilities.Root
    properties:
      protocol: { type: string, default: tcp }
      port: { type: integer, required: false }
      secure: { type: boolean, default: false }
    attributes:
      ip_address: { type: string }

relationship_types:
  tosca.relationships.Root:
    description: Base relationship type
    attributes:
      tosca_id: { type: string }
      tosca_name: { type: string }
      state: { type: string }
    interfaces:
      Configure:
        type: tosca.interfaces.relationship.Configure
  tosca.relationships.DependsOn:
    derived_from: tosca.relationships.Root
    valid_target_types: [tosca.capabilities.Node]
  tosca.relationships.HostedOn:
    derived_from: tosca.relationships.Root
    valid_target_types: [tosca.capabilities.Container]
  tosca.relationships.ConnectsTo:
    derived_from: tosca.relationships.Root
    valid_target_types: [tosca.capabilities.Endpoint]

node_types:
  tosca.nodes.Root:
    description: Base node type
    attributes:
      tosca_id: { type: string }
      tosca_name: { type: string }
      state: { type: string }
    capabilities:
      feature:
        type: tosca.capabilities.Node
    requirements:
      - dependency:
          capability: tosca.capabilities.Node
          node: tosca.nodes.Root
          relationship: tosca.relationships.DependsOn
          occurrences: [0, UNBOUNDED]
    interfaces:
      Standard:
        type: tosca.interfaces.node.lifecycle.Standard
  tosca.nodes.Compute:
    derived_from: tosca.nodes.Root
    attributes:
      private_address: { type: string }
      public_address: { type: string }
    capabilities:
      host:
        type: tosca.capabilities.Container
      endpoint:
        type: tosca.capabilities.Endpoint
  tosca.nodes.SoftwareComponent:
    derived_from: tosca.nodes.Root
    properties:
      component_version: { type: string, required: false }
    requirements:
      - host:
          capability: tosca.capabilities.Container
          node: tosca.nodes.Compute
          relationship: tosca.relationships.HostedOn
"#;

/// The embedded catalog as a template with no topology.
pub fn normative_types() -> Result<ServiceTemplate> {
    Ok(serde_yaml_ng::from_str(NORMATIVE_TYPES)?)
}

/// Append `base` entries whose names `own` does not define. Own types keep their position.
fn fill_missing<T>(own: &mut IndexMap<String, T>, base: IndexMap<String, T>) {
    for (name, ty) in base {
        own.entry(name).or_insert(ty);
    }
}

impl ServiceTemplate {
    /// Add the normative base types the template does not already define.
    pub fn with_normative_types(mut self) -> Result<Self> {
        let base = normative_types()?;
        fill_missing(&mut self.node_types, base.node_types);
        fill_missing(&mut self.relationship_types, base.relationship_types);
        fill_missing(&mut self.capability_types, base.capability_types);
        fill_missing(&mut self.interface_types, base.interface_types);
        fill_missing(&mut self.group_types, base.group_types);
        fill_missing(&mut self.policy_types, base.policy_types);
        Ok(self)
    }
}
