//! Traversal helpers bound into the query global scope

use std::rc::Rc;

use super::index::NodeIndex;
use crate::script::{Abrupt, HostFunctions, Interpreter, ObjectId, PropertyMap, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Helper {
    FindById,
    FindByType,
    FindByName,
    FindByNameContains,
    GetAllText,
    GetAllComponents,
    GetAllInstances,
    GetAllFrames,
    GetChildren,
    Search,
    GetAllNodes,
}

impl Helper {
    const ALL: [Helper; 11] = [
        Helper::FindById,
        Helper::FindByType,
        Helper::FindByName,
        Helper::FindByNameContains,
        Helper::GetAllText,
        Helper::GetAllComponents,
        Helper::GetAllInstances,
        Helper::GetAllFrames,
        Helper::GetChildren,
        Helper::Search,
        Helper::GetAllNodes,
    ];

    fn name(self) -> &'static str {
        match self {
            Helper::FindById => "findById",
            Helper::FindByType => "findByType",
            Helper::FindByName => "findByName",
            Helper::FindByNameContains => "findByNameContains",
            Helper::GetAllText => "getAllText",
            Helper::GetAllComponents => "getAllComponents",
            Helper::GetAllInstances => "getAllInstances",
            Helper::GetAllFrames => "getAllFrames",
            Helper::GetChildren => "getChildren",
            Helper::Search => "search",
            Helper::GetAllNodes => "getAllNodes",
        }
    }
}

/// Names bound in every query context, `document` included.
pub fn helper_names() -> impl Iterator<Item = &'static str> {
    std::iter::once("document").chain(Helper::ALL.iter().map(|h| h.name()))
}

/// The helper library over one document's node index.
pub struct NodeHelpers {
    index: NodeIndex,
}

impl NodeHelpers {
    /// Index the document at `root` and bind `document` plus every helper as globals.
    pub fn install(interp: &mut Interpreter, root: Value) {
        let index = NodeIndex::build(interp.heap(), &root);
        tracing::debug!(nodes = index.len(), "node index built");

        interp.define_global("document", root);
        for (slot, helper) in Helper::ALL.iter().enumerate() {
            interp.define_host_function(helper.name(), slot);
        }
        interp.set_host(Rc::new(NodeHelpers { index }));
    }

    fn nodes_array(&self, interp: &mut Interpreter, nodes: Vec<ObjectId>) -> Value {
        interp.new_array(nodes.into_iter().map(Value::Object).collect())
    }

    fn by_type(&self, interp: &mut Interpreter, node_type: &str) -> Value {
        let nodes = self.index.filter_eq(interp.heap(), "type", &Value::string(node_type));
        self.nodes_array(interp, nodes)
    }

    fn name_contains(&self, interp: &mut Interpreter, needle: &Value) -> Value {
        let needle = interp.to_js_string(needle).to_lowercase();
        let heap = interp.heap();
        let nodes: Vec<ObjectId> = self
            .index
            .iter()
            .filter(|&id| match heap.get_property(id, "name") {
                Some(Value::String(name)) => name.to_lowercase().contains(&needle),
                _ => false,
            })
            .collect();
        self.nodes_array(interp, nodes)
    }

    fn all_text(&self, interp: &mut Interpreter) -> Value {
        let text_type = Value::string("TEXT");
        let mut entries = Vec::new();
        for id in self.index.iter() {
            let heap = interp.heap();
            if !heap.get_property(id, "type").is_some_and(|t| t.strict_equals(&text_type)) {
                continue;
            }
            let text = heap.get_property(id, "characters").unwrap_or(Value::Undefined);
            if !text.truthy() {
                continue;
            }
            let mut props = PropertyMap::new();
            props.insert("id".into(), heap.get_property(id, "id").unwrap_or(Value::Undefined));
            props.insert("name".into(), heap.get_property(id, "name").unwrap_or(Value::Undefined));
            props.insert("text".into(), text);
            entries.push(interp.new_object(props));
        }
        interp.new_array(entries)
    }

    fn children(&self, interp: &mut Interpreter, node_id: &Value) -> Value {
        let heap = interp.heap();
        let items = self
            .index
            .find_first(heap, "id", node_id)
            .and_then(|id| heap.get_property(id, "children"))
            .and_then(|children| children.as_object())
            .and_then(|children| heap.array_items(children))
            .map(<[Value]>::to_vec)
            .unwrap_or_default();
        interp.new_array(items)
    }

    fn search(&self, interp: &mut Interpreter, predicate: &Value) -> Result<Value, Abrupt> {
        let all = self.nodes_array(interp, self.index.iter().collect());
        let mut matches = Vec::new();
        for (i, id) in self.index.iter().enumerate() {
            let node = Value::Object(id);
            let args = vec![node.clone(), Value::Number(i as f64), all.clone()];
            if interp.call_function(predicate, args)?.truthy() {
                matches.push(node);
            }
        }
        Ok(interp.new_array(matches))
    }
}

impl HostFunctions for NodeHelpers {
    fn call(&self, interp: &mut Interpreter, slot: usize, args: Vec<Value>) -> Result<Value, Abrupt> {
        let Some(&helper) = Helper::ALL.get(slot) else {
            return Err(interp.type_error("unknown helper"));
        };
        interp.tick()?;
        let arg = args.into_iter().next().unwrap_or(Value::Undefined);

        let result = match helper {
            Helper::FindById => self
                .index
                .find_first(interp.heap(), "id", &arg)
                .map(Value::Object)
                .unwrap_or(Value::Undefined),
            Helper::FindByType => {
                let nodes = self.index.filter_eq(interp.heap(), "type", &arg);
                self.nodes_array(interp, nodes)
            }
            Helper::FindByName => {
                let nodes = self.index.filter_eq(interp.heap(), "name", &arg);
                self.nodes_array(interp, nodes)
            }
            Helper::FindByNameContains => self.name_contains(interp, &arg),
            Helper::GetAllText => self.all_text(interp),
            Helper::GetAllComponents => self.by_type(interp, "COMPONENT"),
            Helper::GetAllInstances => self.by_type(interp, "INSTANCE"),
            Helper::GetAllFrames => self.by_type(interp, "FRAME"),
            Helper::GetChildren => self.children(interp, &arg),
            Helper::Search => self.search(interp, &arg)?,
            Helper::GetAllNodes => self.nodes_array(interp, self.index.iter().collect()),
        };
        Ok(result)
    }
}
