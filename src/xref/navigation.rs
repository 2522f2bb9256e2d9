// Tue Jan 13 2026 - Alex

const DEFAULT_LIMIT: usize = 256;

/// Back/forward history of visited addresses.
#[derive(Debug, Clone)]
pub struct NavigationHistory {
    entries: Vec<u64>,
    current: Option<usize>,
    limit: usize,
}

impl NavigationHistory {
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_LIMIT)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self { entries: Vec::new(), current: None, limit: limit.max(1) }
    }

    /// Visits `addr`, discarding any forward history. Re-visiting the
    /// current address is a no-op.
    pub fn navigate_to(&mut self, addr: u64) {
        if self.current() == Some(addr) {
            return;
        }
        if let Some(index) = self.current {
            self.entries.truncate(index + 1);
        }
        self.entries.push(addr);
        if self.entries.len() > self.limit {
            let excess = self.entries.len() - self.limit;
            self.entries.drain(..excess);
        }
        self.current = Some(self.entries.len() - 1);
    }

    pub fn go_back(&mut self) -> Option<u64> {
        let index = self.current.filter(|&i| i > 0)? - 1;
        self.current = Some(index);
        self.entries.get(index).copied()
    }

    pub fn go_forward(&mut self) -> Option<u64> {
        let index = self.current.filter(|&i| i + 1 < self.entries.len())? + 1;
        self.current = Some(index);
        self.entries.get(index).copied()
    }

    pub fn can_go_back(&self) -> bool {
        matches!(self.current, Some(i) if i > 0)
    }

    pub fn can_go_forward(&self) -> bool {
        matches!(self.current, Some(i) if i + 1 < self.entries.len())
    }

    pub fn current(&self) -> Option<u64> {
        self.current.and_then(|i| self.entries.get(i).copied())
    }

    pub fn entries(&self) -> &[u64] {
        &self.entries
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.current = None;
    }
}

impl Default for NavigationHistory {
    fn default() -> Self {
        Self::new()
    }
}
