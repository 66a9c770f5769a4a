//! Page arithmetic for paginated downloads.
//!
//! The server pages collections with `page` (1-based) and `pageSize`. To
//! download exactly `limit` items the last request may need a different page
//! size, or may return more than needed and be trimmed before persisting.

use serde::{Deserialize, Serialize};
use std::ops::Range;

/// One page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    /// 1-based page number
    pub page: usize,
    pub page_size: usize,
    pub is_last_page: bool,
    /// Leading items of this page already covered by earlier pages
    pub items_to_skip_from_previous_page: usize,
    /// Trailing items of this page beyond the limit
    pub items_to_skip_from_current_page: usize,
}

impl Page {
    /// A full page with nothing to trim.
    pub fn full(page: usize, page_size: usize) -> Self {
        Self {
            page,
            page_size,
            is_last_page: false,
            items_to_skip_from_previous_page: 0,
            items_to_skip_from_current_page: 0,
        }
    }

    /// Number of items this page contributes when the server returns a full page.
    pub fn kept(&self) -> usize {
        self.page_size
            .saturating_sub(self.items_to_skip_from_previous_page)
            .saturating_sub(self.items_to_skip_from_current_page)
    }

    /// Absolute item positions covered by this page after trimming.
    pub fn window(&self) -> Range<usize> {
        let start = (self.page - 1) * self.page_size;
        start + self.items_to_skip_from_previous_page
            ..start + self.page_size - self.items_to_skip_from_current_page
    }

    /// Whether a response of `fetched` items means the server has no more data.
    pub fn is_short(&self, fetched: usize) -> bool {
        fetched < self.page_size
    }

    /// Trim a fetched page down to the items that should be persisted.
    pub fn select<T>(&self, mut items: Vec<T>) -> Vec<T> {
        if !self.is_last_page {
            return items;
        }
        if items.len() <= self.items_to_skip_from_previous_page {
            return Vec::new();
        }
        let end = items
            .len()
            .min(self.page_size - self.items_to_skip_from_current_page);
        items.truncate(end);
        items.drain(..self.items_to_skip_from_previous_page);
        items
    }
}

/// Sequence of pages for one download.
///
/// Bounded sequences stop after the page that reaches the limit; unbounded
/// ones yield full pages until the consumer sees a short page and stops.
#[derive(Debug, Clone)]
pub enum Pages {
    Bounded(BoundedPages),
    Unbounded { next: usize, page_size: usize },
}

impl Iterator for Pages {
    type Item = Page;

    fn next(&mut self) -> Option<Page> {
        match self {
            Pages::Bounded(pages) => pages.next(),
            Pages::Unbounded { page_size: 0, .. } => None,
            Pages::Unbounded { next, page_size } => {
                let page = Page::full(*next, *page_size);
                *next += 1;
                Some(page)
            }
        }
    }
}

/// Full pages followed by an optional tail page, generated on demand.
#[derive(Debug, Clone)]
pub struct BoundedPages {
    next: usize,
    full_left: usize,
    page_size: usize,
    tail: Option<Page>,
}

impl BoundedPages {
    fn new(page_size: usize, limit: usize) -> Self {
        if page_size == 0 || limit == 0 {
            return Self::empty();
        }
        if limit < page_size {
            return Self {
                tail: Some(Page {
                    page: 1,
                    page_size,
                    is_last_page: true,
                    items_to_skip_from_previous_page: 0,
                    items_to_skip_from_current_page: page_size - limit,
                }),
                ..Self::empty()
            };
        }

        let full_pages = limit / page_size;
        let remainder = limit % page_size;
        Self {
            next: 1,
            full_left: full_pages,
            page_size,
            tail: (remainder > 0).then(|| tail_page(page_size, full_pages * page_size, remainder)),
        }
    }

    fn empty() -> Self {
        Self {
            next: 1,
            full_left: 0,
            page_size: 0,
            tail: None,
        }
    }

    /// Pages left in the sequence.
    pub fn remaining(&self) -> usize {
        self.full_left + usize::from(self.tail.is_some())
    }
}

impl Iterator for BoundedPages {
    type Item = Page;

    fn next(&mut self) -> Option<Page> {
        if self.full_left > 0 {
            self.full_left -= 1;
            let mut page = Page::full(self.next, self.page_size);
            page.is_last_page = self.full_left == 0 && self.tail.is_none();
            self.next = self.next.saturating_add(1);
            return Some(page);
        }
        self.tail.take()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining();
        (remaining, Some(remaining))
    }
}

/// Compute the pages needed to download `limit` items, or an open-ended
/// sequence when there is no limit.
pub fn compute_pages(page_size: usize, limit: Option<usize>) -> Pages {
    match limit {
        Some(limit) => Pages::Bounded(BoundedPages::new(page_size, limit)),
        None => Pages::Unbounded {
            next: 1,
            page_size,
        },
    }
}

/// Most pages a caller may ask to have listed at once.
pub const MAX_LISTED_PAGES: usize = 10_000;

/// Number of requests needed to download `limit` items.
pub fn page_count(page_size: usize, limit: usize) -> usize {
    BoundedPages::new(page_size, limit).remaining()
}

/// The exact pages needed to download `limit` items.
pub fn bounded_pages(page_size: usize, limit: usize) -> Vec<Page> {
    BoundedPages::new(page_size, limit).collect()
}

/// Smallest page size that starts exactly at `offset` and still holds
/// `remaining` items. `page_size` itself always qualifies since `offset` is a
/// multiple of it.
fn tail_page(page_size: usize, offset: usize, remaining: usize) -> Page {
    let size = (remaining..=page_size)
        .find(|size| offset % size == 0)
        .unwrap_or(page_size);

    Page {
        page: offset / size + 1,
        page_size: size,
        is_last_page: true,
        items_to_skip_from_previous_page: 0,
        items_to_skip_from_current_page: size - remaining,
    }
}
