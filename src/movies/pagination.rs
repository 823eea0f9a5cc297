use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PageError {
    #[error("Page is not a number: {0}")]
    NotANumber(String),
    #[error("Page {0} contains no results")]
    Empty(i64),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageInfo {
    pub number: i64,
    pub num_pages: i64,
    pub count: i64,
    pub page_size: i64,
    pub has_next: bool,
    pub has_previous: bool,
}

impl PageInfo {
    pub fn offset(&self) -> i64 {
        (self.number - 1) * self.page_size
    }
}

/// Splits `count` results into 1-based pages of `page_size`.
#[derive(Debug, Clone, Copy)]
pub struct Paginator {
    count: i64,
    page_size: i64,
}

impl Paginator {
    pub fn new(count: i64, page_size: u32) -> Self {
        Self {
            count: count.max(0),
            page_size: i64::from(page_size.max(1)),
        }
    }

    /// Always at least one page, so an empty listing still has page 1.
    pub fn num_pages(&self) -> i64 {
        if self.count == 0 {
            1
        } else {
            (self.count + self.page_size - 1) / self.page_size
        }
    }

    /// Resolve the `page` query value. Missing means 1, "last" means the last page.
    pub fn page(&self, requested: Option<&str>) -> Result<PageInfo, PageError> {
        let num_pages = self.num_pages();
        let number = match requested.map(str::trim) {
            None | Some("") => 1,
            Some("last") => num_pages,
            Some(s) => s
                .parse::<i64>()
                .map_err(|_| PageError::NotANumber(s.to_string()))?,
        };

        if number < 1 || number > num_pages {
            return Err(PageError::Empty(number));
        }

        Ok(PageInfo {
            number,
            num_pages,
            count: self.count,
            page_size: self.page_size,
            has_next: number < num_pages,
            has_previous: number > 1,
        })
    }
}
