use serde::Deserialize;
use utoipa::ToSchema;

use crate::response::total_pages;

pub const DEFAULT_PAGE_LIMIT: i64 = 32;
pub const MAX_PAGE_LIMIT: i64 = 100;

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct Pagination {
    /// Page number, 1-based. Default 1.
    pub page: Option<i64>,
    /// Items per page. Default 32, at most 100.
    pub limit: Option<i64>,
}

impl Pagination {
    /// Returns `(page, limit, offset)`.
    pub fn normalize(&self) -> (i64, i64, i64) {
        let page = self.page.unwrap_or(1).max(1);
        let limit = self
            .limit
            .unwrap_or(DEFAULT_PAGE_LIMIT)
            .clamp(1, MAX_PAGE_LIMIT);
        let offset = (page - 1).saturating_mul(limit);
        (page, limit, offset)
    }
}

/// Navigation data for one page of a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageInfo {
    pub current_page: i64,
    pub total_pages: i64,
    pub total: i64,
    pub has_next_page: bool,
    pub has_prev_page: bool,
}

impl PageInfo {
    pub fn new(page: i64, limit: i64, total: i64) -> Self {
        let total_pages = total_pages(total, limit);
        Self {
            current_page: page,
            total_pages,
            total,
            has_next_page: page < total_pages,
            has_prev_page: page > 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(page: i64, limit: i64) -> Pagination {
        Pagination {
            page: Some(page),
            limit: Some(limit),
        }
    }

    #[test]
    fn defaults_and_clamping() {
        assert_eq!(Pagination::default().normalize(), (1, 32, 0));
        assert_eq!(page(0, 0).normalize(), (1, 1, 0));
        assert_eq!(page(-4, 1000).normalize(), (1, 100, 0));
        assert_eq!(page(3, 10).normalize(), (3, 10, 20));
    }

    #[test]
    fn last_partial_page() {
        let info = PageInfo::new(3, 10, 25);
        assert_eq!(info.total_pages, 3);
        assert!(!info.has_next_page);
        assert!(info.has_prev_page);
    }

    #[test]
    fn middle_page() {
        let info = PageInfo::new(2, 10, 25);
        assert_eq!(info.total_pages, 3);
        assert!(info.has_next_page);
        assert!(info.has_prev_page);
    }

    #[test]
    fn out_of_range_page_keeps_metadata() {
        let info = PageInfo::new(9, 10, 25);
        assert_eq!(info.current_page, 9);
        assert_eq!(info.total_pages, 3);
        assert!(!info.has_next_page);
        assert!(info.has_prev_page);
    }

    #[test]
    fn empty_listing() {
        let info = PageInfo::new(1, 10, 0);
        assert_eq!(info.total_pages, 0);
        assert!(!info.has_next_page);
        assert!(!info.has_prev_page);
    }
}
