//! Ordering checks for what a processor observed.

/// Checks that sequences arrive contiguously from 0.
#[derive(Debug, Clone, Default)]
pub struct SequenceChecker {
    expected: i64,
    received: u64,
    gaps: u64,
    duplicates: u64,
}

impl SequenceChecker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `sequence`; returns false if it was not the next one expected.
    pub fn check(&mut self, sequence: i64) -> bool {
        self.received += 1;
        if sequence == self.expected {
            self.expected += 1;
            return true;
        }
        if sequence < self.expected {
            self.duplicates += 1;
        } else {
            self.gaps += (sequence - self.expected) as u64;
            self.expected = sequence + 1;
        }
        false
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn gaps(&self) -> u64 {
        self.gaps
    }

    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }

    /// Next sequence expected, i.e. one past the highest seen
    pub fn expected(&self) -> i64 {
        self.expected
    }

    pub fn is_clean(&self) -> bool {
        self.gaps == 0 && self.duplicates == 0
    }
}

/// Checks that entries from each producer arrive in the order that producer
/// published them, whatever the interleaving between producers.
#[derive(Debug, Clone)]
pub struct ProducerOrderChecker {
    next: Vec<u64>,
    violations: u64,
}

impl ProducerOrderChecker {
    pub fn new(producers: usize) -> Self {
        Self {
            next: vec![0; producers],
            violations: 0,
        }
    }

    /// Record entry number `counter` from `producer`.
    pub fn check(&mut self, producer: usize, counter: u64) -> bool {
        match self.next.get_mut(producer) {
            Some(next) if *next == counter => {
                *next += 1;
                true
            }
            Some(next) => {
                self.violations += 1;
                *next = counter + 1;
                false
            }
            None => {
                self.violations += 1;
                false
            }
        }
    }

    pub fn violations(&self) -> u64 {
        self.violations
    }

    /// Entries seen per producer
    pub fn counts(&self) -> &[u64] {
        &self.next
    }
}
