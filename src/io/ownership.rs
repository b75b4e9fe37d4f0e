use std::fmt;

/// Party holding a buffer
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Owner {
    Application,
    Device,
    /// The index does not name a buffer of the pool
    Nobody,
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Owner::Application => write!(f, "owned by the application"),
            Owner::Device => write!(f, "owned by the device"),
            Owner::Nobody => write!(f, "out of range"),
        }
    }
}

const BITS: usize = u64::BITS as usize;

/// Per-buffer ownership state of a pool
///
/// A set bit means the application owns the buffer, a clear bit means the device does. Every
/// index of the pool is in exactly one of the two states; indices beyond the pool belong to
/// nobody and every transition on them is refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ownership {
    words: Vec<u64>,
    len: usize,
}

impl Ownership {
    /// Returns a tracker for `len` buffers, all of them owned by the application
    pub fn new(len: usize) -> Self {
        let mut ownership = Ownership {
            words: vec![0; (len + BITS - 1) / BITS],
            len,
        };
        ownership.reset();
        ownership
    }

    /// Number of tracked buffers
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn owner(&self, index: usize) -> Owner {
        if index >= self.len {
            Owner::Nobody
        } else if (self.words[index / BITS] >> (index % BITS)) & 1 == 1 {
            Owner::Application
        } else {
            Owner::Device
        }
    }

    pub fn is_owned_by_app(&self, index: usize) -> bool {
        self.owner(index) == Owner::Application
    }

    pub fn is_owned_by_device(&self, index: usize) -> bool {
        self.owner(index) == Owner::Device
    }

    /// Hand a buffer to the device
    ///
    /// Fails with the actual owner if the application does not hold the buffer.
    pub fn mark_queued(&mut self, index: usize) -> Result<(), Owner> {
        match self.owner(index) {
            Owner::Application => {
                self.words[index / BITS] &= !(1 << (index % BITS));
                Ok(())
            }
            owner => Err(owner),
        }
    }

    /// Take a buffer back from the device
    ///
    /// Fails with the actual owner if the device does not hold the buffer.
    pub fn mark_dequeued(&mut self, index: usize) -> Result<(), Owner> {
        match self.owner(index) {
            Owner::Device => {
                self.words[index / BITS] |= 1 << (index % BITS);
                Ok(())
            }
            owner => Err(owner),
        }
    }

    /// Lowest index currently owned by the application
    pub fn first_app_owned(&self) -> Option<usize> {
        (0..self.len).find(|&index| self.is_owned_by_app(index))
    }

    /// Number of buffers owned by the application
    pub fn app_owned(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Number of buffers owned by the device
    pub fn device_owned(&self) -> usize {
        self.len - self.app_owned()
    }

    /// Return every buffer to the application, used once the device dropped its queue
    pub fn reset(&mut self) {
        for (i, word) in self.words.iter_mut().enumerate() {
            let remaining = self.len - i * BITS;
            *word = if remaining >= BITS {
                u64::MAX
            } else {
                (1u64 << remaining) - 1
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_partition(o: &Ownership) {
        for i in 0..o.len() {
            assert_ne!(o.is_owned_by_app(i), o.is_owned_by_device(i), "index {}", i);
        }
        assert_eq!(o.app_owned() + o.device_owned(), o.len());
    }

    #[test]
    fn starts_application_owned() {
        let o = Ownership::new(3);
        assert_eq!(o.app_owned(), 3);
        assert_eq!(o.first_app_owned(), Some(0));
        assert_partition(&o);
    }

    #[test]
    fn transitions() {
        let mut o = Ownership::new(2);
        o.mark_queued(1).unwrap();
        assert!(o.is_owned_by_device(1));
        assert_partition(&o);

        assert_eq!(o.mark_queued(1), Err(Owner::Device));
        assert_eq!(o.mark_dequeued(0), Err(Owner::Application));

        o.mark_dequeued(1).unwrap();
        assert!(o.is_owned_by_app(1));
        assert_partition(&o);
    }

    #[test]
    fn out_of_range_belongs_to_nobody() {
        let mut o = Ownership::new(2);
        assert_eq!(o.owner(2), Owner::Nobody);
        assert!(!o.is_owned_by_app(2));
        assert!(!o.is_owned_by_device(2));
        assert_eq!(o.mark_queued(2), Err(Owner::Nobody));
        assert_eq!(o.mark_dequeued(7), Err(Owner::Nobody));
        assert_partition(&o);
    }

    #[test]
    fn more_buffers_than_one_word() {
        let mut o = Ownership::new(70);
        assert_eq!(o.app_owned(), 70);
        for i in 0..70 {
            o.mark_queued(i).unwrap();
        }
        assert_eq!(o.first_app_owned(), None);
        assert_eq!(o.device_owned(), 70);
        o.mark_dequeued(65).unwrap();
        assert_eq!(o.first_app_owned(), Some(65));
        assert_partition(&o);

        o.reset();
        assert_eq!(o.app_owned(), 70);
    }

    #[test]
    fn empty() {
        let o = Ownership::new(0);
        assert!(o.is_empty());
        assert_eq!(o.first_app_owned(), None);
    }
}
