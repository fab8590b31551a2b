//! Fixed-capacity sliding window with FIFO eviction.

/// Bounded ordered buffer: pushing at capacity overwrites the oldest element
/// in place, so the window never grows past its capacity and eviction is O(1).
pub(crate) struct SlidingWindow<T> {
    slots: Vec<Option<T>>,
    head: usize,
    len: usize,
}

impl<T> SlidingWindow<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            head: 0,
            len: 0,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_full(&self) -> bool {
        self.len == self.slots.len()
    }

    pub(crate) fn push(&mut self, item: T) {
        let capacity = self.slots.len();
        if self.len < capacity {
            let tail = (self.head + self.len) % capacity;
            self.slots[tail] = Some(item);
            self.len += 1;
        } else {
            self.slots[self.head] = Some(item);
            self.head = (self.head + 1) % capacity;
        }
    }

    /// When exactly full, drain the contents oldest-first and leave the
    /// window empty; otherwise leave it untouched.
    pub(crate) fn take_full(&mut self) -> Option<Vec<T>> {
        if !self.is_full() {
            return None;
        }

        let capacity = self.slots.len();
        let mut taken = Vec::with_capacity(capacity);
        for offset in 0..capacity {
            if let Some(item) = self.slots[(self.head + offset) % capacity].take() {
                taken.push(item);
            }
        }
        self.head = 0;
        self.len = 0;
        Some(taken)
    }
}

impl<T: Clone> SlidingWindow<T> {
    /// Ordered copy of the current contents, oldest first.
    pub(crate) fn snapshot(&self) -> Vec<T> {
        let capacity = self.slots.len();
        (0..self.len)
            .filter_map(|offset| self.slots[(self.head + offset) % capacity].clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::SlidingWindow;

    #[test]
    fn never_exceeds_capacity() {
        let mut window = SlidingWindow::new(3);
        for value in 0..10 {
            window.push(value);
            assert!(window.len() <= 3);
        }
        assert_eq!(window.len(), 3);
    }

    #[test]
    fn evicts_oldest_first() {
        let mut window = SlidingWindow::new(3);
        for value in 0..5 {
            window.push(value);
        }
        assert_eq!(window.snapshot(), vec![2, 3, 4]);
    }

    #[test]
    fn take_full_requires_a_full_window() {
        let mut window = SlidingWindow::new(4);
        window.push(1);
        window.push(2);
        assert!(window.take_full().is_none());
        assert_eq!(window.len(), 2);

        window.push(3);
        window.push(4);
        assert_eq!(window.take_full(), Some(vec![1, 2, 3, 4]));
        assert_eq!(window.len(), 0);
        assert!(window.take_full().is_none());
    }

    #[test]
    fn refills_cleanly_after_take() {
        let mut window = SlidingWindow::new(2);
        window.push(1);
        window.push(2);
        window.take_full();
        window.push(7);
        window.push(8);
        window.push(9);
        assert_eq!(window.snapshot(), vec![8, 9]);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut window = SlidingWindow::<u8>::new(0);
        assert_eq!(window.capacity(), 1);
        window.push(1);
        window.push(2);
        assert_eq!(window.snapshot(), vec![2]);
    }
}
