//! Page-number pagination for post listings.
//!
//! Listings are sliced into fixed-size pages addressed by a 1-based page
//! number taken from the query string. Caller input is never trusted: values
//! that do not parse fall back to the first page and out-of-range values are
//! clamped to the nearest valid page.

use std::num::NonZeroU32;

use serde::Serialize;

/// Default number of posts shown per page.
pub const DEFAULT_PAGE_SIZE: NonZeroU32 = match NonZeroU32::new(10) {
    Some(value) => value,
    None => unreachable!(),
};

/// Row range a repository must fetch for the resolved page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub number: u64,
    pub offset: u64,
    pub limit: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct Paginator {
    per_page: NonZeroU32,
    total: u64,
}

impl Paginator {
    pub fn new(per_page: NonZeroU32, total: u64) -> Self {
        Self { per_page, total }
    }

    pub fn per_page(&self) -> u32 {
        self.per_page.get()
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Number of pages; zero for an empty listing.
    pub fn num_pages(&self) -> u64 {
        self.total.div_ceil(u64::from(self.per_page.get()))
    }

    /// Resolve raw caller input (`?page=`) into a valid window.
    pub fn resolve(&self, requested: Option<&str>) -> PageWindow {
        let number = self.clamp(parse_page_number(requested));
        let per_page = u64::from(self.per_page.get());
        PageWindow {
            number,
            offset: (number - 1) * per_page,
            limit: self.per_page.get(),
        }
    }

    fn clamp(&self, requested: Option<i64>) -> u64 {
        let last = self.num_pages().max(1);
        match requested {
            None => 1,
            Some(value) if value < 1 => 1,
            Some(value) => u64::try_from(value).map_or(last, |value| value.min(last)),
        }
    }

    /// Assemble the page from the rows fetched for `window`.
    pub fn page<T>(&self, window: PageWindow, mut items: Vec<T>) -> Page<T> {
        items.truncate(window.limit as usize);
        Page {
            items,
            number: window.number,
            num_pages: self.num_pages(),
            per_page: self.per_page.get(),
            total: self.total,
        }
    }
}

fn parse_page_number(requested: Option<&str>) -> Option<i64> {
    requested.and_then(|raw| raw.trim().parse::<i64>().ok())
}

/// One page of a listing plus the metadata needed for navigation controls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub number: u64,
    pub num_pages: u64,
    pub per_page: u32,
    pub total: u64,
}

impl<T> Page<T> {
    pub fn has_next(&self) -> bool {
        self.number < self.num_pages
    }

    pub fn has_previous(&self) -> bool {
        self.number > 1
    }

    pub fn has_other_pages(&self) -> bool {
        self.has_next() || self.has_previous()
    }

    pub fn next_page_number(&self) -> Option<u64> {
        self.has_next().then(|| self.number + 1)
    }

    pub fn previous_page_number(&self) -> Option<u64> {
        self.has_previous().then(|| self.number - 1)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            number: self.number,
            num_pages: self.num_pages,
            per_page: self.per_page,
            total: self.total,
        }
    }
}

/// Paginate an already materialized, ordered listing.
#[cfg(test)]
pub(crate) fn paginate<T>(
    items: Vec<T>,
    per_page: NonZeroU32,
    requested: Option<&str>,
) -> Page<T> {
    let paginator = Paginator::new(per_page, items.len() as u64);
    let window = paginator.resolve(requested);
    let slice = items
        .into_iter()
        .skip(window.offset as usize)
        .take(window.limit as usize)
        .collect();
    paginator.page(window, slice)
}
