use std::collections::HashMap;

use super::error::{BlendError, Result};
use super::types::NodeId;

#[derive(Debug, Clone)]
pub struct NodeData {
    pub id: NodeId,
    pub name: String,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

/// Name to node lookup supplied by the host scene graph. Names match case-insensitively.
#[derive(Default, Debug, Clone)]
pub struct NodePalette {
    pub nodes: Vec<NodeData>,            // Arena storing all node data
    name_to_id: HashMap<String, NodeId>, // Lowercased name lookup
    roots: Vec<NodeId>,
}

impl NodePalette {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flat palette of root nodes.
    pub fn from_names<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut palette = Self::new();
        for name in names {
            palette.add_node(name, None)?;
        }
        Ok(palette)
    }

    pub fn add_node(&mut self, name: impl Into<String>, parent_name: Option<&str>) -> Result<NodeId> {
        let name = name.into();
        let key = name.to_lowercase();
        if self.name_to_id.contains_key(&key) {
            return Err(BlendError::Configuration(format!(
                "node '{name}' already exists in the palette"
            )));
        }
        let parent = match parent_name {
            Some(parent_name) => Some(self.resolve_node(parent_name).ok_or_else(|| {
                BlendError::Configuration(format!(
                    "parent '{parent_name}' of node '{name}' is not in the palette"
                ))
            })?),
            None => None,
        };

        let id = NodeId(self.nodes.len());
        self.nodes.push(NodeData {
            id,
            name,
            parent,
            children: Vec::new(),
        });
        self.name_to_id.insert(key, id);

        match parent {
            Some(parent) => self.nodes[parent.0].children.push(id),
            None => self.roots.push(id),
        }
        Ok(id)
    }

    pub fn resolve_node(&self, name: &str) -> Option<NodeId> {
        self.name_to_id.get(&name.to_lowercase()).copied()
    }

    pub fn get(&self, id: NodeId) -> Option<&NodeData> {
        self.nodes.get(id.0)
    }

    pub fn name(&self, id: NodeId) -> Option<&str> {
        self.get(id).map(|node| node.name.as_str())
    }

    pub fn parent(&self, id: NodeId) -> Option<&NodeData> {
        self.get(id)
            .and_then(|node| node.parent)
            .and_then(|parent| self.get(parent))
    }

    pub fn roots(&self) -> impl Iterator<Item = &NodeData> {
        self.roots.iter().filter_map(|id| self.get(*id))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// `start` and all of its descendants, depth first.
    pub fn subtree(&self, start: &str) -> Vec<NodeId> {
        let mut result = Vec::new();
        let Some(start) = self.resolve_node(start) else {
            return result;
        };
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            result.push(id);
            if let Some(node) = self.get(id) {
                // Reverse so the first child is visited first.
                stack.extend(node.children.iter().rev());
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn palette() -> NodePalette {
        let mut palette = NodePalette::new();
        palette.add_node("Bip01", None).unwrap();
        palette.add_node("Bip01 Spine", Some("Bip01")).unwrap();
        palette.add_node("Bip01 L Hand", Some("bip01 spine")).unwrap();
        palette.add_node("Bip01 R Hand", Some("Bip01 Spine")).unwrap();
        palette
    }

    #[test]
    fn resolves_case_insensitively() {
        let palette = palette();
        assert_eq!(palette.resolve_node("BIP01 SPINE"), Some(NodeId(1)));
        assert_eq!(palette.name(NodeId(2)), Some("Bip01 L Hand"));
        assert!(palette.resolve_node("Weapon").is_none());
    }

    #[test]
    fn duplicate_and_orphan_nodes_are_rejected() {
        let mut palette = palette();
        assert!(palette.add_node("bip01", None).is_err());
        assert!(palette.add_node("Gun", Some("Missing")).is_err());
    }

    #[test]
    fn subtree_is_depth_first() {
        let palette = palette();
        assert_eq!(
            palette.subtree("Bip01"),
            vec![NodeId(0), NodeId(1), NodeId(2), NodeId(3)]
        );
        assert_eq!(palette.parent(NodeId(3)).map(|n| n.id), Some(NodeId(1)));
        assert_eq!(palette.roots().count(), 1);
    }
}
