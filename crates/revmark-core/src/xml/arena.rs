use super::node::XmlNodeData;
use super::xname::{XAttribute, XName};
use indextree::{Arena, NodeId};

/// Arena-backed XML tree.
///
/// Nodes are addressed by `NodeId`; detached nodes stay in the arena until
/// the document is dropped. Iterators follow `indextree` conventions:
/// `descendants` and `ancestors` both yield the starting node first.
#[derive(Clone, Debug)]
pub struct XmlDocument {
    arena: Arena<XmlNodeData>,
    root: Option<NodeId>,
}

impl XmlDocument {
    pub fn new() -> Self {
        Self {
            arena: Arena::new(),
            root: None,
        }
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn set_root(&mut self, root: Option<NodeId>) {
        self.root = root;
    }

    pub fn get(&self, id: NodeId) -> Option<&XmlNodeData> {
        self.arena
            .get(id)
            .filter(|node| !node.is_removed())
            .map(|node| node.get())
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut XmlNodeData> {
        self.arena
            .get_mut(id)
            .filter(|node| !node.is_removed())
            .map(|node| node.get_mut())
    }

    /// Creates a node that is not yet attached anywhere.
    pub fn new_node(&mut self, data: XmlNodeData) -> NodeId {
        self.arena.new_node(data)
    }

    pub fn add_root(&mut self, data: XmlNodeData) -> NodeId {
        let id = self.arena.new_node(data);
        self.root = Some(id);
        id
    }

    pub fn add_child(&mut self, parent: NodeId, data: XmlNodeData) -> NodeId {
        let child = self.arena.new_node(data);
        parent.append(child, &mut self.arena);
        child
    }

    pub fn add_before(&mut self, sibling: NodeId, data: XmlNodeData) -> NodeId {
        let new_node = self.arena.new_node(data);
        sibling.insert_before(new_node, &mut self.arena);
        new_node
    }

    pub fn add_after(&mut self, sibling: NodeId, data: XmlNodeData) -> NodeId {
        let new_node = self.arena.new_node(data);
        sibling.insert_after(new_node, &mut self.arena);
        new_node
    }

    /// Moves an existing (possibly attached) node to the end of `parent`.
    pub fn append(&mut self, parent: NodeId, child: NodeId) {
        child.detach(&mut self.arena);
        parent.append(child, &mut self.arena);
    }

    /// Moves an existing node to the front of `parent`.
    pub fn prepend(&mut self, parent: NodeId, child: NodeId) {
        child.detach(&mut self.arena);
        parent.prepend(child, &mut self.arena);
    }

    /// Moves an existing node so it directly follows `sibling`.
    pub fn move_after(&mut self, sibling: NodeId, node: NodeId) {
        node.detach(&mut self.arena);
        sibling.insert_after(node, &mut self.arena);
    }

    /// Removes a node together with its whole subtree.
    pub fn remove(&mut self, node: NodeId) {
        node.remove_subtree(&mut self.arena);
        if self.root == Some(node) {
            self.root = None;
        }
    }

    /// Removes a node but keeps its children in its place.
    pub fn unwrap(&mut self, node: NodeId) {
        node.remove(&mut self.arena);
    }

    pub fn set_attribute(&mut self, node: NodeId, name: &XName, value: &str) {
        if let Some(attrs) = self.get_mut(node).and_then(|d| d.attributes_mut()) {
            if let Some(attr) = attrs.iter_mut().find(|a| &a.name == name) {
                attr.value = value.to_string();
            } else {
                attrs.push(XAttribute::new(name.clone(), value));
            }
        }
    }

    pub fn attribute(&self, node: NodeId, name: &XName) -> Option<&str> {
        self.get(node)?.attribute(name)
    }

    pub fn name(&self, node: NodeId) -> Option<&XName> {
        self.get(node)?.name()
    }

    pub fn is_named(&self, node: NodeId, namespace: &str, local_name: &str) -> bool {
        self.get(node)
            .is_some_and(|d| d.is_named(namespace, local_name))
    }

    pub fn children(&self, parent: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        parent.children(&self.arena)
    }

    /// Element children only, skipping text, comments and processing instructions.
    pub fn element_children(&self, parent: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.children(parent)
            .filter(move |&c| self.get(c).is_some_and(|d| d.is_element()))
    }

    pub fn descendants(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        node.descendants(&self.arena)
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.arena.get(node)?.parent()
    }

    pub fn ancestors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        node.ancestors(&self.arena)
    }

    pub fn next_sibling(&self, node: NodeId) -> Option<NodeId> {
        self.arena.get(node)?.next_sibling()
    }

    pub fn previous_sibling(&self, node: NodeId) -> Option<NodeId> {
        self.arena.get(node)?.previous_sibling()
    }

    /// Next sibling that is an element.
    pub fn next_element_sibling(&self, node: NodeId) -> Option<NodeId> {
        let mut current = self.next_sibling(node);
        while let Some(id) = current {
            if self.get(id).is_some_and(|d| d.is_element()) {
                return Some(id);
            }
            current = self.next_sibling(id);
        }
        None
    }

    pub fn elements_by_name<'a>(
        &'a self,
        parent: NodeId,
        name: &'a XName,
    ) -> impl Iterator<Item = NodeId> + 'a {
        self.children(parent)
            .filter(move |&child_id| self.name(child_id) == Some(name))
    }

    pub fn first_child_named(&self, parent: NodeId, namespace: &str, local: &str) -> Option<NodeId> {
        self.children(parent)
            .find(|&c| self.is_named(c, namespace, local))
    }

    /// Concatenated text of every text node below `node`.
    pub fn text_of(&self, node: NodeId) -> String {
        self.descendants(node)
            .filter_map(|id| match self.get(id) {
                Some(XmlNodeData::Text(t)) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Copies the subtree rooted at `node` into a new standalone document.
    pub fn extract_subtree(&self, node: NodeId) -> XmlDocument {
        let mut fragment = XmlDocument::new();
        let root = fragment.import_node(self, node, None);
        fragment.set_root(root);
        fragment
    }

    /// Deep-copies `src_node` from `src` below `parent` (or as a detached
    /// node when `parent` is `None`). Returns the new node id.
    pub fn import_node(
        &mut self,
        src: &XmlDocument,
        src_node: NodeId,
        parent: Option<NodeId>,
    ) -> Option<NodeId> {
        let data = src.get(src_node)?.clone();
        let id = match parent {
            Some(p) => self.add_child(p, data),
            None => self.new_node(data),
        };
        for child in src.children(src_node) {
            self.import_node(src, child, Some(id));
        }
        Some(id)
    }

    /// Deep-copies the root of `fragment` below `parent`.
    pub fn import_fragment(&mut self, fragment: &XmlDocument, parent: NodeId) -> Option<NodeId> {
        let root = fragment.root()?;
        self.import_node(fragment, root, Some(parent))
    }
}

impl Default for XmlDocument {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_document_with_root() {
        let mut doc = XmlDocument::new();
        let root_name = XName::new("http://example.com", "root");
        let root_id = doc.add_root(XmlNodeData::element(root_name.clone()));

        assert_eq!(doc.root(), Some(root_id));
        assert_eq!(doc.name(root_id), Some(&root_name));
    }

    #[test]
    fn remove_drops_subtree_and_unwrap_keeps_children() {
        let mut doc = XmlDocument::new();
        let root = doc.add_root(XmlNodeData::element(XName::local("root")));
        let wrapper = doc.add_child(root, XmlNodeData::element(XName::local("wrapper")));
        let inner = doc.add_child(wrapper, XmlNodeData::element(XName::local("inner")));
        let gone = doc.add_child(root, XmlNodeData::element(XName::local("gone")));
        doc.add_child(gone, XmlNodeData::text("x"));

        doc.unwrap(wrapper);
        doc.remove(gone);

        let children: Vec<_> = doc.children(root).collect();
        assert_eq!(children, vec![inner]);
        assert!(doc.get(gone).is_none());
    }

    #[test]
    fn set_and_get_attribute() {
        let mut doc = XmlDocument::new();
        let root_id = doc.add_root(XmlNodeData::element(XName::local("root")));

        let attr_name = XName::local("id");
        doc.set_attribute(root_id, &attr_name, "test123");
        doc.set_attribute(root_id, &attr_name, "test456");

        assert_eq!(doc.attribute(root_id, &attr_name), Some("test456"));
        assert_eq!(doc.get(root_id).unwrap().attributes().unwrap().len(), 1);
    }

    #[test]
    fn extract_and_import_round_trip_subtree() {
        let mut doc = XmlDocument::new();
        let root = doc.add_root(XmlNodeData::element(XName::local("root")));
        let item = doc.add_child(root, XmlNodeData::element(XName::local("item")));
        doc.add_child(item, XmlNodeData::text("hello"));

        let fragment = doc.extract_subtree(item);
        assert_eq!(fragment.text_of(fragment.root().unwrap()), "hello");

        let mut target = XmlDocument::new();
        let target_root = target.add_root(XmlNodeData::element(XName::local("target")));
        let copied = target.import_fragment(&fragment, target_root).unwrap();
        assert_eq!(target.parent(copied), Some(target_root));
        assert_eq!(target.text_of(target_root), "hello");
    }

    #[test]
    fn move_nodes_between_parents() {
        let mut doc = XmlDocument::new();
        let root = doc.add_root(XmlNodeData::element(XName::local("root")));
        let a = doc.add_child(root, XmlNodeData::element(XName::local("a")));
        let b = doc.add_child(root, XmlNodeData::element(XName::local("b")));
        let child = doc.add_child(a, XmlNodeData::element(XName::local("c")));

        doc.prepend(b, child);
        assert_eq!(doc.parent(child), Some(b));
        assert_eq!(doc.children(a).count(), 0);
        assert_eq!(doc.next_element_sibling(a), Some(b));
    }
}
