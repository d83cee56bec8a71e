//! Outbound queue: chat text waiting for a registered connection.

use std::collections::VecDeque;

/// FIFO of outbound text. Entries leave only after a successful send, strictly in enqueue order.
#[derive(Debug, Default, Clone)]
pub struct PendingQueue {
    items: VecDeque<String>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to the tail. Never blocks.
    pub fn enqueue(&mut self, text: impl Into<String>) {
        self.items.push_back(text.into());
    }

    pub fn front(&self) -> Option<&str> {
        self.items.front().map(String::as_str)
    }

    pub fn pop_front(&mut self) -> Option<String> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(String::as_str)
    }

    /// Send from the head until empty or `send` fails. A failed head stays queued and nothing
    /// behind it is attempted. Returns how many entries were sent.
    pub fn drain_with<E, F>(&mut self, mut send: F) -> Result<usize, E>
    where
        F: FnMut(&str) -> Result<(), E>,
    {
        let mut sent = 0;
        while let Some(head) = self.items.front() {
            send(head)?;
            self.items.pop_front();
            sent += 1;
        }
        Ok(sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let mut q = PendingQueue::new();
        q.enqueue("a");
        q.enqueue("b");
        assert_eq!(q.len(), 2);
        assert_eq!(q.front(), Some("a"));
        assert_eq!(q.pop_front().as_deref(), Some("a"));
        assert_eq!(q.pop_front().as_deref(), Some("b"));
        assert!(q.is_empty());
    }

    #[test]
    fn drain_stops_at_failure_and_keeps_head() {
        let mut q = PendingQueue::new();
        q.enqueue("A");
        q.enqueue("B");
        q.enqueue("C");
        let mut attempted = Vec::new();
        let r = q.drain_with(|m| {
            attempted.push(m.to_owned());
            if m == "B" {
                Err("socket closed")
            } else {
                Ok(())
            }
        });
        assert_eq!(r, Err("socket closed"));
        assert_eq!(attempted, vec!["A", "B"]);
        assert_eq!(q.front(), Some("B"));
        assert_eq!(q.iter().collect::<Vec<_>>(), vec!["B", "C"]);
    }

    #[test]
    fn drain_after_recovery_sends_rest_in_order() {
        let mut q = PendingQueue::new();
        for m in ["A", "B", "C"] {
            q.enqueue(m);
        }
        let _ = q.drain_with(|m| if m == "B" { Err(()) } else { Ok(()) });
        let mut sent = Vec::new();
        let n = q
            .drain_with::<(), _>(|m| {
                sent.push(m.to_owned());
                Ok(())
            })
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(sent, vec!["B", "C"]);
        assert!(q.is_empty());
    }

    #[test]
    fn drain_empty_queue() {
        let mut q = PendingQueue::new();
        assert_eq!(q.drain_with::<(), _>(|_| panic!("nothing to send")), Ok(0));
    }
}
