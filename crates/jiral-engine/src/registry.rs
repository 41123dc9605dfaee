use jiral_core::provider::{FunctionSpec, FunctionTool};
use jiral_core::tools::ToolDescriptor;

/// Map tool descriptors onto the backend's function-calling convention.
///
/// Pure and order-preserving: duplicate names are passed through unchanged.
pub fn register(descriptors: &[ToolDescriptor]) -> Vec<FunctionTool> {
    descriptors
        .iter()
        .map(|d| FunctionTool {
            kind: "function".into(),
            function: FunctionSpec {
                name: d.name.clone(),
                description: d.description.clone(),
                parameters: d.input_schema.clone(),
            },
        })
        .collect()
}

/// Tools registered with a session, in the order the channel listed them.
#[derive(Clone, Debug, Default)]
pub struct ToolRegistry {
    descriptors: Vec<ToolDescriptor>,
    function_tools: Vec<FunctionTool>,
}

impl ToolRegistry {
    pub fn new(descriptors: Vec<ToolDescriptor>) -> Self {
        let function_tools = register(&descriptors);
        Self {
            descriptors,
            function_tools,
        }
    }

    /// Look a tool up by name. With duplicate names the first registered
    /// entry shadows the rest.
    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.descriptors.iter().find(|d| d.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Tool names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.descriptors.iter().map(|d| d.name.clone()).collect()
    }

    /// The list attached to tool-aware backend requests.
    pub fn function_tools(&self) -> &[FunctionTool] {
        &self.function_tools
    }

    pub fn count(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor(name: &str, description: &str) -> ToolDescriptor {
        ToolDescriptor {
            name: name.into(),
            description: description.into(),
            input_schema: json!({
                "type": "object",
                "properties": {"issueKey": {"type": "string"}},
                "required": ["issueKey"]
            }),
        }
    }

    #[test]
    fn register_maps_fields() {
        let tools = register(&[descriptor("get_issue", "Fetch an issue")]);
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].kind, "function");
        assert_eq!(tools[0].function.name, "get_issue");
        assert_eq!(tools[0].function.description, "Fetch an issue");
        assert_eq!(tools[0].function.parameters["required"][0], "issueKey");
    }

    #[test]
    fn register_preserves_order() {
        let tools = register(&[
            descriptor("search_issues", ""),
            descriptor("add_comment", ""),
            descriptor("get_issue", ""),
        ]);
        let names: Vec<&str> = tools.iter().map(|t| t.function.name.as_str()).collect();
        assert_eq!(names, vec!["search_issues", "add_comment", "get_issue"]);
    }

    #[test]
    fn register_empty() {
        assert!(register(&[]).is_empty());
    }

    #[test]
    fn duplicates_shadow_in_lookup_order() {
        let registry = ToolRegistry::new(vec![
            descriptor("get_issue", "first"),
            descriptor("get_issue", "second"),
        ]);
        assert_eq!(registry.count(), 2);
        assert_eq!(registry.function_tools().len(), 2);
        assert_eq!(registry.get("get_issue").map(|d| d.description.as_str()), Some("first"));
    }

    #[test]
    fn lookup_and_names() {
        let registry = ToolRegistry::new(vec![descriptor("get_issue", ""), descriptor("add_comment", "")]);
        assert!(registry.contains("add_comment"));
        assert!(!registry.contains("delete_issue"));
        assert_eq!(registry.names(), vec!["get_issue", "add_comment"]);
        assert!(!registry.is_empty());
        assert!(ToolRegistry::default().is_empty());
    }
}
