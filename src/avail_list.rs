//! Availability list

use std::mem::replace;

type Index = usize;
const NULL: Index = usize::MAX;
const HEAD: Index = 0;
const SPLIT: Index = 1;
const TAIL: Index = 2;
const OFFSET: Index = 3;

/// Stable position of an entry in an [`AvailabilityList`]
///
/// Stays valid until the entry is removed; after that the index may be handed
/// out again.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Handle(Index);

struct Node<T> {
    prev: Index,
    next: Index,
    idle: bool,
    value: Option<T>,
}

impl<T> Node<T> {
    fn sentinel(prev: Index, next: Index) -> Self {
        Node {
            prev,
            next,
            idle: false,
            value: None,
        }
    }
}

/// Arena-backed ordering of pooled entries
///
/// - "front" holds idle entries, oldest release first, up to a split sentinel
/// - "back" holds entries on loan, most recent loan last
/// - invariant: no idle entry ever sits behind an entry on loan
///
/// Every move is O(1); entries never move in memory, so a [`Handle`] can be
/// stored next to the value it points to.
pub struct AvailabilityList<T> {
    // HEAD <-> idle.. <-> SPLIT <-> busy.. <-> TAIL
    nodes: Vec<Node<T>>,
    free: Vec<Index>,
    idle: usize,
}

// Panics when a handle that is not in the list is passed in.
impl<T> AvailabilityList<T> {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let mut nodes = Vec::with_capacity(capacity + OFFSET);
        nodes.push(Node::sentinel(NULL, SPLIT));
        nodes.push(Node::sentinel(HEAD, TAIL));
        nodes.push(Node::sentinel(SPLIT, NULL));
        AvailabilityList {
            nodes,
            free: vec![],
            idle: 0,
        }
    }

    /// Number of entries, idle or not
    pub fn len(&self) -> usize {
        self.nodes.len() - OFFSET - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn idle_len(&self) -> usize {
        self.idle
    }

    fn node(&self, handle: Handle) -> &Node<T> {
        let node = &self.nodes[handle.0];
        assert!(
            handle.0 >= OFFSET && node.value.is_some(),
            "invalid list handle {handle:?}"
        );
        node
    }

    pub fn get(&self, handle: Handle) -> &T {
        self.node(handle)
            .value
            .as_ref()
            .expect("checked by node()")
    }

    pub fn is_idle(&self, handle: Handle) -> bool {
        self.node(handle).idle
    }

    fn alloc(&mut self, value: T) -> Index {
        let node = Node {
            prev: NULL,
            next: NULL,
            idle: false,
            value: Some(value),
        };
        if let Some(index) = self.free.pop() {
            self.nodes[index] = node;
            index
        } else {
            self.nodes.push(node);
            self.nodes.len() - 1
        }
    }

    // put a node right in front of the node at `at`
    fn insert_before(&mut self, index: Index, at: Index) {
        assert!(at != HEAD && at != index);

        let prev = replace(&mut self.nodes[at].prev, index);

        let node = &mut self.nodes[index];
        node.prev = prev;
        node.next = at;

        self.nodes[prev].next = index;
    }

    // take the node out of the ordering without freeing it
    fn lift(&mut self, index: Index) {
        assert!(index >= OFFSET);

        let node = &mut self.nodes[index];
        let prev = replace(&mut node.prev, NULL);
        let next = replace(&mut node.next, NULL);
        assert!(prev != NULL && next != NULL, "node is not linked");

        self.nodes[prev].next = next;
        self.nodes[next].prev = prev;
    }

    /// Append a new entry on loan at the back
    pub fn push_busy(&mut self, value: T) -> Handle {
        let index = self.alloc(value);
        self.insert_before(index, TAIL);
        Handle(index)
    }

    /// Append a new idle entry behind every other idle entry
    pub fn push_idle(&mut self, value: T) -> Handle {
        let index = self.alloc(value);
        self.insert_before(index, SPLIT);
        self.nodes[index].idle = true;
        self.idle += 1;
        Handle(index)
    }

    /// The idle entry released the longest time ago
    pub fn front_idle(&self) -> Option<Handle> {
        let first = self.nodes[HEAD].next;
        if first == SPLIT {
            None
        } else {
            Some(Handle(first))
        }
    }

    /// Mark an entry as on loan and move it to the very back
    pub fn promote(&mut self, handle: Handle) {
        if self.node(handle).idle {
            self.idle -= 1;
        }
        self.lift(handle.0);
        self.insert_before(handle.0, TAIL);
        self.nodes[handle.0].idle = false;
    }

    /// Mark an entry as idle and move it behind every other idle entry
    pub fn demote(&mut self, handle: Handle) {
        if !self.node(handle).idle {
            self.idle += 1;
        }
        self.lift(handle.0);
        self.insert_before(handle.0, SPLIT);
        self.nodes[handle.0].idle = true;
    }

    pub fn remove(&mut self, handle: Handle) -> T {
        if self.node(handle).idle {
            self.idle -= 1;
        }
        self.lift(handle.0);
        self.free.push(handle.0);
        let node = &mut self.nodes[handle.0];
        node.idle = false;
        node.value.take().expect("checked by node()")
    }

    /// Take every entry out, front to back
    pub fn drain(&mut self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.len());
        let mut index = self.nodes[HEAD].next;
        while index != TAIL {
            let next = self.nodes[index].next;
            if let Some(value) = self.nodes[index].value.take() {
                out.push(value);
            }
            index = next;
        }
        self.nodes.truncate(OFFSET);
        self.nodes[HEAD].next = SPLIT;
        self.nodes[SPLIT].prev = HEAD;
        self.nodes[SPLIT].next = TAIL;
        self.nodes[TAIL].prev = SPLIT;
        self.free.clear();
        self.idle = 0;
        out
    }

    /// Iterate front to back
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            list: self,
            index: self.nodes[HEAD].next,
        }
    }
}

impl<T> Default for AvailabilityList<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Iter<'a, T> {
    list: &'a AvailabilityList<T>,
    index: Index,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = (Handle, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.index == TAIL || self.index == NULL {
                return None;
            }
            let index = self.index;
            let node = &self.list.nodes[index];
            self.index = node.next;
            // skip the split sentinel
            if let Some(value) = node.value.as_ref() {
                return Some((Handle(index), value));
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::AvailabilityList;

    fn assert_list(list: &AvailabilityList<u64>, values: &[u64]) {
        let list_values: Vec<_> = list.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, &list_values);
    }

    #[test]
    fn push_and_counts() {
        let mut list = AvailabilityList::new();
        assert!(list.is_empty());
        assert_eq!(list.front_idle(), None);

        list.push_busy(1);
        list.push_idle(2);
        list.push_busy(3);
        list.push_idle(4);
        assert_list(&list, &[2, 4, 1, 3]);
        assert_eq!(list.len(), 4);
        assert_eq!(list.idle_len(), 2);
        assert_eq!(*list.get(list.front_idle().unwrap()), 2);
    }

    #[test]
    fn promote_and_demote_keep_regions() {
        let mut list = AvailabilityList::new();
        let a = list.push_busy(1);
        let b = list.push_busy(2);
        let c = list.push_busy(3);
        assert_eq!(list.idle_len(), 0);

        list.demote(b);
        list.demote(a);
        assert_list(&list, &[2, 1, 3]);
        assert_eq!(list.idle_len(), 2);
        assert!(list.is_idle(a));
        assert!(!list.is_idle(c));

        // oldest release is loaned first and lands behind everything on loan
        let first = list.front_idle().unwrap();
        assert_eq!(first, b);
        list.promote(first);
        assert_list(&list, &[1, 3, 2]);
        assert_eq!(list.idle_len(), 1);

        list.demote(c);
        assert_list(&list, &[1, 3, 2]);
        assert_eq!(list.idle_len(), 2);
        assert_eq!(list.front_idle(), Some(a));
    }

    #[test]
    fn remove_recycles_handles() {
        let mut list = AvailabilityList::new();
        let a = list.push_busy(1);
        let b = list.push_idle(2);
        assert_eq!(list.remove(b), 2);
        assert_eq!(list.idle_len(), 0);
        assert_eq!(list.remove(a), 1);
        assert!(list.is_empty());

        let c = list.push_busy(3);
        assert!(c == a || c == b);
        assert_list(&list, &[3]);
    }

    #[test]
    #[should_panic(expected = "invalid list handle")]
    fn stale_handle_panics() {
        let mut list = AvailabilityList::new();
        let a = list.push_busy(1);
        list.remove(a);
        list.get(a);
    }

    #[test]
    fn drain_empties() {
        let mut list = AvailabilityList::new();
        let a = list.push_busy(1);
        list.push_busy(2);
        list.demote(a);
        assert_eq!(list.drain(), vec![1, 2]);
        assert!(list.is_empty());
        assert_eq!(list.idle_len(), 0);
        assert_eq!(list.front_idle(), None);

        list.push_idle(5);
        assert_list(&list, &[5]);
    }
}
