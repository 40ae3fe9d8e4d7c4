use bitflags::bitflags;

bitflags! {
    /// Readiness directions a task can wait on.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Interest: u8 {
        const READABLE = 0b01;
        const WRITABLE = 0b10;
    }
}

impl Interest {
    pub fn is_readable(self) -> bool {
        self.contains(Interest::READABLE)
    }

    pub fn is_writable(self) -> bool {
        self.contains(Interest::WRITABLE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directions() {
        let both = Interest::READABLE | Interest::WRITABLE;

        assert!(both.is_readable() && both.is_writable());
        assert!(!Interest::READABLE.is_writable());
        assert_eq!(both - Interest::READABLE, Interest::WRITABLE);
        assert!(Interest::empty().is_empty());
    }
}
