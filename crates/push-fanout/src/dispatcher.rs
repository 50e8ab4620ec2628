//! Round-robin assignment of work to workers.

/// Per-worker mailboxes filled in strict rotation.
///
/// The n-th item added (counting from zero) lands in mailbox `n % workers`.
#[derive(Debug)]
pub struct Dispatcher<T> {
    mailboxes: Vec<Vec<T>>,
    counter: usize,
}

impl<T> Dispatcher<T> {
    /// # Panics
    /// Panics if `workers` is zero.
    pub fn new(workers: usize) -> Self {
        assert!(workers > 0, "dispatcher needs at least one worker");
        Self {
            mailboxes: (0..workers).map(|_| Vec::new()).collect(),
            counter: 0,
        }
    }

    pub fn workers(&self) -> usize {
        self.mailboxes.len()
    }

    /// Append to the next mailbox in rotation and return its index.
    pub fn add(&mut self, item: T) -> usize {
        let index = self.counter % self.mailboxes.len();
        self.counter = self.counter.wrapping_add(1);
        self.mailboxes[index].push(item);
        index
    }

    pub fn pending(&self, index: usize) -> &[T] {
        self.mailboxes.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Empty one mailbox.
    pub fn take(&mut self, index: usize) -> Vec<T> {
        self.mailboxes
            .get_mut(index)
            .map(std::mem::take)
            .unwrap_or_default()
    }

    /// Put items back at the front of a mailbox, ahead of anything added since.
    pub fn restore(&mut self, index: usize, mut items: Vec<T>) {
        if let Some(mailbox) = self.mailboxes.get_mut(index) {
            items.append(mailbox);
            *mailbox = items;
        }
    }

    /// Every pending item, mailbox by mailbox.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.mailboxes.iter().flatten()
    }

    pub fn take_all(&mut self) -> Vec<T> {
        self.mailboxes.iter_mut().flat_map(std::mem::take).collect()
    }

    pub fn len(&self) -> usize {
        self.mailboxes.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
