//! Node List
//!
//! Doubly-linked list stored in a slab. Nodes keep a stable [`NodeId`] for
//! their whole lifetime in the list, which lets an external index splice them
//! out or move them in O(1).

/// Stable handle to a node in a [`NodeList`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct NodeId(usize);

#[derive(Debug)]
struct Node<T> {
    value: Option<T>,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Slab-backed doubly-linked list
#[derive(Debug)]
pub(crate) struct NodeList<T> {
    nodes: Vec<Node<T>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl<T> NodeList<T> {
    pub(crate) fn new() -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn front(&self) -> Option<NodeId> {
        self.head.map(NodeId)
    }

    pub(crate) fn back(&self) -> Option<NodeId> {
        self.tail.map(NodeId)
    }

    pub(crate) fn push_back(&mut self, value: T) -> NodeId {
        let slot = self.alloc(value);
        self.link_back(slot);
        self.len += 1;
        NodeId(slot)
    }

    pub(crate) fn push_front(&mut self, value: T) -> NodeId {
        let slot = self.alloc(value);
        self.link_front(slot);
        self.len += 1;
        NodeId(slot)
    }

    pub(crate) fn pop_front(&mut self) -> Option<T> {
        let head = self.head?;
        self.remove(NodeId(head))
    }

    /// Unlink a node and return its value. Stale ids yield `None`.
    pub(crate) fn remove(&mut self, id: NodeId) -> Option<T> {
        if !self.is_live(id) {
            return None;
        }

        self.unlink(id.0);
        let value = self.nodes[id.0].value.take();
        self.free.push(id.0);
        self.len -= 1;

        if self.len == 0 {
            self.nodes.clear();
            self.free.clear();
        }
        value
    }

    pub(crate) fn get(&self, id: NodeId) -> Option<&T> {
        self.nodes.get(id.0).and_then(|node| node.value.as_ref())
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> Option<&mut T> {
        self.nodes.get_mut(id.0).and_then(|node| node.value.as_mut())
    }

    pub(crate) fn move_to_front(&mut self, id: NodeId) -> bool {
        if !self.is_live(id) {
            return false;
        }
        if self.head != Some(id.0) {
            self.unlink(id.0);
            self.link_front(id.0);
        }
        true
    }

    /// First node (front to back) whose value matches
    pub(crate) fn find(&self, mut pred: impl FnMut(&T) -> bool) -> Option<NodeId> {
        self.iter().find(|(_, value)| pred(value)).map(|(id, _)| id)
    }

    pub(crate) fn iter(&self) -> Iter<'_, T> {
        Iter {
            list: self,
            cursor: self.head,
        }
    }

    /// Remove every value, returned front to back
    pub(crate) fn take_all(&mut self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.len);
        let mut cursor = self.head;
        while let Some(slot) = cursor {
            cursor = self.nodes[slot].next;
            if let Some(value) = self.nodes[slot].value.take() {
                out.push(value);
            }
        }
        self.clear();
        out
    }

    pub(crate) fn clear(&mut self) {
        self.nodes.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
        self.len = 0;
    }

    fn is_live(&self, id: NodeId) -> bool {
        self.nodes
            .get(id.0)
            .is_some_and(|node| node.value.is_some())
    }

    fn alloc(&mut self, value: T) -> usize {
        let node = Node {
            value: Some(value),
            prev: None,
            next: None,
        };
        match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = node;
                slot
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn link_back(&mut self, slot: usize) {
        self.nodes[slot].prev = self.tail;
        self.nodes[slot].next = None;
        match self.tail {
            Some(tail) => self.nodes[tail].next = Some(slot),
            None => self.head = Some(slot),
        }
        self.tail = Some(slot);
    }

    fn link_front(&mut self, slot: usize) {
        self.nodes[slot].prev = None;
        self.nodes[slot].next = self.head;
        match self.head {
            Some(head) => self.nodes[head].prev = Some(slot),
            None => self.tail = Some(slot),
        }
        self.head = Some(slot);
    }

    fn unlink(&mut self, slot: usize) {
        let prev = self.nodes[slot].prev;
        let next = self.nodes[slot].next;

        match prev {
            Some(p) => self.nodes[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.nodes[n].prev = prev,
            None => self.tail = prev,
        }

        self.nodes[slot].prev = None;
        self.nodes[slot].next = None;
    }
}

impl<T> Default for NodeList<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Front-to-back iterator over `(NodeId, &T)`
pub(crate) struct Iter<'a, T> {
    list: &'a NodeList<T>,
    cursor: Option<usize>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = (NodeId, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let slot = self.cursor?;
        let node = &self.list.nodes[slot];
        self.cursor = node.next;
        node.value.as_ref().map(|value| (NodeId(slot), value))
    }
}
