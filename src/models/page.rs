use serde::{Deserialize, Serialize};

const DEFAULT_PAGE_SIZE: u32 = 10;
const MAX_PAGE_SIZE: u32 = 100;

/// Zero-based page request, as sent by the HTTP layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PageRequest {
    #[serde(default)]
    pub page: u32,
    #[serde(default = "default_size")]
    pub size: u32,
}

fn default_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 0,
            size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PageRequest {
    pub fn new(page: u32, size: u32) -> Self {
        Self { page, size }
    }

    pub fn size(&self) -> u32 {
        self.size.clamp(1, MAX_PAGE_SIZE)
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.size())
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page) * self.limit()
    }

    /// Slices an already ordered in-memory collection
    pub fn apply<T: Clone>(&self, items: &[T]) -> Page<T> {
        let start = (self.offset() as usize).min(items.len());
        let end = (start + self.size() as usize).min(items.len());

        Page {
            items: items[start..end].to_vec(),
            page: self.page,
            size: self.size(),
            total: items.len() as i64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub size: u32,
    pub total: i64,
}

impl<T> Page<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            size: self.size,
            total: self.total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_is_clamped() {
        assert_eq!(PageRequest::new(0, 0).size(), 1);
        assert_eq!(PageRequest::new(0, 1000).size(), MAX_PAGE_SIZE);
        assert_eq!(PageRequest::new(3, 20).offset(), 60);
    }

    #[test]
    fn test_apply_slices_and_reports_total() {
        let items: Vec<u32> = (0..25).collect();

        let page = PageRequest::new(2, 10).apply(&items);
        assert_eq!(page.items, (20..25).collect::<Vec<_>>());
        assert_eq!(page.total, 25);

        let past_end = PageRequest::new(9, 10).apply(&items);
        assert!(past_end.items.is_empty());
    }
}
