use serde::Serialize;

/// One page of a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// 1-based page number that was served.
    pub page: usize,
    /// `max(1, ceil(total_items / page_size))`, so an empty listing still has
    /// one (empty) page.
    pub total_pages: usize,
    pub total_items: usize,
}

impl<T> Page<T> {
    /// Slices `items` into the requested page. `page` and `page_size` below 1
    /// are read as 1; a page past the end is empty, not an error.
    pub fn paginate(items: Vec<T>, page: usize, page_size: usize) -> Self {
        let page = page.max(1);
        let page_size = page_size.max(1);
        let total_items = items.len();
        let total_pages = total_items.div_ceil(page_size).max(1);

        let start = (page - 1).saturating_mul(page_size);
        let items = items.into_iter().skip(start).take(page_size).collect();

        Self {
            items,
            page,
            total_pages,
            total_items,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            total_pages: self.total_pages,
            total_items: self.total_items,
        }
    }
}
