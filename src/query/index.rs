//! Visibility-filtered, pre-order node index

use crate::script::{Heap, ObjectId, Value};

/// Flattened view of every visible node, in document order.
#[derive(Debug, Clone, Default)]
pub struct NodeIndex {
    nodes: Vec<ObjectId>,
}

impl NodeIndex {
    /// Walk the tree rooted at `root`. A node is skipped, together with its whole
    /// subtree, when its `visible` property is exactly `false`.
    pub fn build(heap: &Heap, root: &Value) -> Self {
        let mut nodes = Vec::new();
        let mut stack: Vec<ObjectId> = root.as_object().into_iter().collect();

        while let Some(id) = stack.pop() {
            if matches!(heap.get_property(id, "visible"), Some(Value::Bool(false))) {
                continue;
            }
            nodes.push(id);

            let children = heap.get_property(id, "children").and_then(|c| c.as_object());
            if let Some(items) = children.and_then(|c| heap.array_items(c)) {
                stack.extend(items.iter().rev().filter_map(Value::as_object));
            }
        }

        Self { nodes }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.nodes.iter().copied()
    }

    /// First indexed node whose `key` property strictly equals `expected`.
    pub fn find_first(&self, heap: &Heap, key: &str, expected: &Value) -> Option<ObjectId> {
        self.iter()
            .find(|&id| heap.get_property(id, key).is_some_and(|v| v.strict_equals(expected)))
    }

    /// Every indexed node whose `key` property strictly equals `expected`.
    pub fn filter_eq(&self, heap: &Heap, key: &str, expected: &Value) -> Vec<ObjectId> {
        self.iter()
            .filter(|&id| heap.get_property(id, key).is_some_and(|v| v.strict_equals(expected)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{Budget, Interpreter};
    use serde_json::json;

    fn ids(interp: &Interpreter, index: &NodeIndex) -> Vec<String> {
        index
            .iter()
            .map(|id| match interp.heap().get_property(id, "id") {
                Some(Value::String(s)) => s.to_string(),
                _ => String::new(),
            })
            .collect()
    }

    #[test]
    fn test_preorder_with_hidden_subtrees() {
        let mut interp = Interpreter::new(Budget::unbounded());
        let root = interp.import_json(&json!({
            "id": "0",
            "children": [
                {"id": "1", "children": [{"id": "1.1"}, {"id": "1.2", "visible": false}]},
                {"id": "2", "visible": false, "children": [{"id": "2.1"}]},
                {"id": "3", "visible": true}
            ]
        }));

        let index = NodeIndex::build(interp.heap(), &root);
        assert_eq!(ids(&interp, &index), vec!["0", "1", "1.1", "3"]);
    }

    #[test]
    fn test_hidden_root_yields_empty_index() {
        let mut interp = Interpreter::new(Budget::unbounded());
        let root = interp.import_json(&json!({"id": "0", "visible": false, "children": [{"id": "1"}]}));
        assert!(NodeIndex::build(interp.heap(), &root).is_empty());
    }

    #[test]
    fn test_non_boolean_visible_counts_as_visible() {
        let mut interp = Interpreter::new(Budget::unbounded());
        let root = interp.import_json(&json!({"id": "0", "visible": 0, "children": "oops"}));
        let index = NodeIndex::build(interp.heap(), &root);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_deep_document_does_not_recurse() {
        let handle = std::thread::Builder::new()
            .stack_size(256 * 1024 * 1024)
            .spawn(|| {
                // nest by moving; json! interpolation would deep-clone every level
                let mut doc = json!({"id": "leaf"});
                for i in 0..20_000 {
                    let mut node = serde_json::Map::new();
                    node.insert("id".into(), serde_json::Value::String(i.to_string()));
                    node.insert("children".into(), serde_json::Value::Array(vec![doc]));
                    doc = serde_json::Value::Object(node);
                }
                let mut interp = Interpreter::new(Budget::unbounded());
                let root = interp.import_json(&doc);
                NodeIndex::build(interp.heap(), &root).len()
            })
            .unwrap();
        assert_eq!(handle.join().unwrap(), 20_001);
    }

    #[test]
    fn test_find_first_and_filter() {
        let mut interp = Interpreter::new(Budget::unbounded());
        let root = interp.import_json(&json!({
            "id": "0", "type": "DOCUMENT",
            "children": [{"id": "a", "type": "TEXT"}, {"id": "b", "type": "TEXT"}]
        }));
        let index = NodeIndex::build(interp.heap(), &root);
        let heap = interp.heap();

        let found = index.find_first(heap, "id", &Value::string("b")).unwrap();
        assert!(matches!(heap.get_property(found, "type"), Some(Value::String(s)) if &*s == "TEXT"));
        assert_eq!(index.filter_eq(heap, "type", &Value::string("TEXT")).len(), 2);
        assert!(index.find_first(heap, "id", &Value::string("zzz")).is_none());
    }
}
