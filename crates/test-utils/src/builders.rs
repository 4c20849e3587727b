#![allow(dead_code)]

use std::collections::BTreeMap;

use flowrun::job::payload::Cardinality;
use flowrun::network::node::{NetworkDefinition, NodeDefinition, NodeKind};
use flowrun::tool::{OutputSpec, ToolSpec};

/// Builder for `NetworkDefinition` to simplify test setup.
pub struct NetworkBuilder {
    def: NetworkDefinition,
}

impl NetworkBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            def: NetworkDefinition {
                id: id.to_string(),
                version: "1.0".to_string(),
                nodes: Vec::new(),
            },
        }
    }

    pub fn version(mut self, version: &str) -> Self {
        self.def.version = version.to_string();
        self
    }

    pub fn node(mut self, node: NodeDefinition) -> Self {
        self.def.nodes.push(node);
        self
    }

    pub fn build(self) -> NetworkDefinition {
        self.def
    }
}

/// Builder for `NodeDefinition`.
pub struct NodeBuilder {
    def: NodeDefinition,
}

impl NodeBuilder {
    fn base(id: &str, kind: NodeKind, tool: &str) -> Self {
        Self {
            def: NodeDefinition {
                id: id.to_string(),
                kind,
                tool: ToolSpec::new(tool, "1.0"),
                depends_on: Vec::new(),
                sample_datatype: None,
                sink_template: None,
                resources: Default::default(),
                preferred_types: Vec::new(),
            },
        }
    }

    pub fn source(id: &str) -> Self {
        let mut builder = Self::base(id, NodeKind::Source, "source-tool");
        builder.def.sample_datatype = Some("Any".to_string());
        builder
    }

    /// A step node with one default output ("out", Any, cardinality 1).
    pub fn step(id: &str, tool: &str) -> Self {
        let mut builder = Self::base(id, NodeKind::Step, tool);
        builder.def.tool.outputs.push(OutputSpec::new("out", "Any"));
        builder
    }

    pub fn sink(id: &str) -> Self {
        Self::base(id, NodeKind::Sink, "sink-tool")
    }

    pub fn tool_version(mut self, version: &str) -> Self {
        self.def.tool.version = version.to_string();
        self
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.def.depends_on.push(dep.to_string());
        self
    }

    pub fn output(mut self, spec: OutputSpec) -> Self {
        self.def.tool.outputs.push(spec);
        self
    }

    pub fn clear_outputs(mut self) -> Self {
        self.def.tool.outputs.clear();
        self
    }

    pub fn sample_datatype(mut self, datatype: &str) -> Self {
        self.def.sample_datatype = Some(datatype.to_string());
        self
    }

    pub fn sink_template(mut self, template: &str) -> Self {
        self.def.sink_template = Some(template.to_string());
        self
    }

    pub fn build(self) -> NodeDefinition {
        self.def
    }
}

/// An output spec with an explicit cardinality.
pub fn output_with_cardinality(name: &str, datatype: &str, cardinality: Cardinality) -> OutputSpec {
    let mut spec = OutputSpec::new(name, datatype);
    spec.cardinality = cardinality;
    spec
}

/// One-sample source binding: `sample -> values`.
pub fn source_binding(samples: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
    samples
        .iter()
        .map(|(sample, values)| {
            (
                sample.to_string(),
                values.iter().map(|v| v.to_string()).collect(),
            )
        })
        .collect()
}
