//! Fixed-capacity slot pools.
//!
//! Task and timer slots live in arenas and are threaded onto circular
//! doubly-linked lists through prev/next indices. Acquisition dequeues the
//! list head, release re-inserts at the head's predecessor, so steady-state
//! churn never touches the allocator and exhaustion is observable as a
//! distinct error instead of allocator pressure.

use crate::error::{Error, Result};

/// Intrusive list links for one slot. Index-based; a slot that is on no
/// list points at itself.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Link {
    pub(crate) prev: usize,
    pub(crate) next: usize,
}

impl Link {
    fn detached(idx: usize) -> Self {
        Link {
            prev: idx,
            next: idx,
        }
    }
}

/// Build the link arena for a pool of `n` slots, all chained circularly.
pub(crate) fn full_chain(n: usize) -> Box<[Link]> {
    (0..n)
        .map(|i| Link {
            prev: (i + n - 1) % n,
            next: (i + 1) % n,
        })
        .collect()
}

/// Head + length of one circular list over a shared link arena.
///
/// The same arena backs both the free list and the busy list of a pool;
/// a slot is on exactly one of them at any instant.
#[derive(Debug)]
pub(crate) struct SlotList {
    head: Option<usize>,
    len: usize,
}

impl SlotList {
    /// A list currently holding every slot of an `n`-slot arena whose
    /// links came from [`full_chain`].
    pub(crate) fn full(n: usize) -> Self {
        SlotList {
            head: if n > 0 { Some(0) } else { None },
            len: n,
        }
    }

    pub(crate) fn empty() -> Self {
        SlotList { head: None, len: 0 }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Dequeue the head. `Resource` when empty; `Internal` when the link
    /// bookkeeping disagrees with the recorded length.
    pub(crate) fn pop_head(&mut self, links: &mut [Link]) -> Result<usize> {
        let head = match self.head {
            Some(h) => h,
            None => return Err(Error::resource("slot pool empty")),
        };

        if links[head].prev == head && links[head].next == head {
            // taking the final element: length must land on exactly zero
            if self.len != 1 {
                return Err(Error::internal(format!(
                    "single-linked head but list length {}",
                    self.len
                )));
            }
            self.head = None;
            self.len = 0;
        } else {
            if self.len <= 1 {
                return Err(Error::internal(format!(
                    "multi-linked head but list length {}",
                    self.len
                )));
            }
            let prev = links[head].prev;
            let next = links[head].next;
            links[next].prev = prev;
            links[prev].next = next;
            self.head = Some(next);
            self.len -= 1;
        }

        links[head] = Link::detached(head);
        Ok(head)
    }

    /// Enqueue `idx` at the head's predecessor; `idx` becomes the new head.
    pub(crate) fn push_head(&mut self, links: &mut [Link], idx: usize) {
        match self.head {
            None => {
                links[idx] = Link::detached(idx);
            }
            Some(head) => {
                let last = links[head].prev;
                links[idx].prev = last;
                links[last].next = idx;
                links[idx].next = head;
                links[head].prev = idx;
            }
        }
        self.head = Some(idx);
        self.len += 1;
    }

    /// Unlink an arbitrary member (busy-list dequeue).
    pub(crate) fn remove(&mut self, links: &mut [Link], idx: usize) -> Result<()> {
        if self.len == 0 {
            return Err(Error::internal("remove from empty list"));
        }

        if self.len == 1 {
            if self.head != Some(idx) {
                return Err(Error::internal("sole member is not the removed slot"));
            }
            self.head = None;
            self.len = 0;
            links[idx] = Link::detached(idx);
            return Ok(());
        }

        if links[idx].prev == idx && links[idx].next == idx {
            // self-linked slot on a list longer than one: corruption
            return Err(Error::internal("self-linked slot on multi-member list"));
        }

        let prev = links[idx].prev;
        let next = links[idx].next;
        links[prev].next = next;
        links[next].prev = prev;

        if self.head == Some(idx) {
            self.head = Some(next);
        }
        self.len -= 1;
        links[idx] = Link::detached(idx);
        Ok(())
    }

    /// Walk the list in link order starting at the head.
    pub(crate) fn iter<'a>(&self, links: &'a [Link]) -> ListIter<'a> {
        ListIter {
            links,
            head: self.head,
            cur: self.head,
            done: self.head.is_none(),
        }
    }
}

pub(crate) struct ListIter<'a> {
    links: &'a [Link],
    head: Option<usize>,
    cur: Option<usize>,
    done: bool,
}

impl Iterator for ListIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.done {
            return None;
        }
        let cur = self.cur?;
        let next = self.links[cur].next;
        if Some(next) == self.head {
            self.done = true;
        } else {
            self.cur = Some(next);
        }
        Some(cur)
    }
}
