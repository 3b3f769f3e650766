//! Request and response bodies shared by every route of the API.

use serde::{Deserialize, Serialize};

pub const DEFAULT_LIMIT: u64 = 50;
pub const MAX_LIMIT: u64 = 100;

/// `?page=&limit=` query of the list routes. Pages start at 1.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub page: Option<u64>,
    #[serde(default)]
    pub limit: Option<u64>,
}

impl Pagination {
    /// Defaults to [`DEFAULT_LIMIT`] and is capped at [`MAX_LIMIT`].
    pub fn limit(&self) -> u64 {
        match self.limit {
            Some(0) | None => DEFAULT_LIMIT,
            Some(limit) => limit.min(MAX_LIMIT),
        }
    }

    pub fn page(&self) -> u64 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn offset(&self) -> u64 {
        (self.page() - 1) * self.limit()
    }

    /// The slice of `items` this page selects.
    pub fn paginate<T>(&self, items: Vec<T>) -> Vec<T> {
        items
            .into_iter()
            .skip(self.offset() as usize)
            .take(self.limit() as usize)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u64,
    pub limit: u64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, pagination: Pagination) -> Self {
        Self {
            items,
            page: pagination.page(),
            limit: pagination.limit(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkResponse {
    pub link: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountResponse {
    pub count: u64,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn limit_defaults_and_caps() {
        assert_eq!(50, Pagination::default().limit());
        assert_eq!(100, Pagination { page: None, limit: Some(500) }.limit());
        assert_eq!(
            20,
            Pagination {
                page: Some(3),
                limit: Some(10)
            }
            .offset()
        );
        assert_eq!(0, Pagination { page: Some(0), limit: None }.offset());
    }

    #[test]
    fn paginates_a_listing() {
        let pagination = Pagination {
            page: Some(2),
            limit: Some(2),
        };

        assert_eq!(vec![3, 4], pagination.paginate(vec![1, 2, 3, 4, 5]));
    }
}
