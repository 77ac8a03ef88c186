use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use bazaar_core::domain::product::fold_for_search;
use bazaar_core::domain::shop::{ShopId, ShopStatus, ShopType};

/// One-based page window. Sizes are clamped to `1..=MAX_PAGE_SIZE`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page_index: u32,
    pub page_size: u32,
}

impl PageRequest {
    pub const MAX_PAGE_SIZE: u32 = 100;

    pub fn new(page_index: u32, page_size: u32) -> Self {
        Self { page_index: page_index.max(1), page_size: page_size.clamp(1, Self::MAX_PAGE_SIZE) }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page_index.max(1) - 1) * u64::from(self.limit())
    }

    pub fn limit(&self) -> u32 {
        self.page_size.clamp(1, Self::MAX_PAGE_SIZE)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(1, 10)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page_index: u32,
    pub page_size: u32,
    pub total_count: u64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, request: PageRequest, total_count: u64) -> Self {
        Self { items, page_index: request.page_index.max(1), page_size: request.limit(), total_count }
    }

    pub fn total_pages(&self) -> u64 {
        if self.page_size == 0 {
            return 0;
        }
        self.total_count.div_ceil(u64::from(self.page_size))
    }

    pub fn has_next(&self) -> bool {
        u64::from(self.page_index) < self.total_pages()
    }

    pub fn has_previous(&self) -> bool {
        self.page_index > 1
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page_index: self.page_index,
            page_size: self.page_size,
            total_count: self.total_count,
        }
    }

    /// Slice an already filtered, ordered collection.
    pub fn from_all(all: Vec<T>, request: PageRequest) -> Self {
        let total_count = all.len() as u64;
        let offset = usize::try_from(request.offset()).unwrap_or(usize::MAX);
        let items = all.into_iter().skip(offset).take(request.limit() as usize).collect();
        Self::new(items, request, total_count)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShopQuery {
    pub name: Option<String>,
    pub city: Option<String>,
    pub shop_type: Option<ShopType>,
    pub category: Option<String>,
    pub status: Option<ShopStatus>,
    /// When set, keep only shops whose schedule covers this instant.
    pub open_at: Option<DateTime<Utc>>,
    pub page: PageRequest,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductSort {
    #[default]
    NameAsc,
    NameDesc,
    PriceAsc,
    PriceDesc,
    CreatedAsc,
    CreatedDesc,
}

impl ProductSort {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "namedesc" | "name_desc" => Self::NameDesc,
            "priceasc" | "price_asc" => Self::PriceAsc,
            "pricedesc" | "price_desc" => Self::PriceDesc,
            "createdasc" | "created_asc" => Self::CreatedAsc,
            "createddesc" | "created_desc" => Self::CreatedDesc,
            _ => Self::NameAsc,
        }
    }

    pub(crate) fn order_by_sql(&self) -> &'static str {
        match self {
            Self::NameAsc => " ORDER BY p.name COLLATE NOCASE ASC, p.id ASC",
            Self::NameDesc => " ORDER BY p.name COLLATE NOCASE DESC, p.id ASC",
            Self::PriceAsc => " ORDER BY CAST(p.sell_price AS REAL) ASC, p.id ASC",
            Self::PriceDesc => " ORDER BY CAST(p.sell_price AS REAL) DESC, p.id ASC",
            Self::CreatedAsc => " ORDER BY p.created_at ASC, p.id ASC",
            Self::CreatedDesc => " ORDER BY p.created_at DESC, p.id ASC",
        }
    }
}

/// Product listing filter. `search` matches name or description, case-insensitively.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductQuery {
    pub search: Option<String>,
    pub shop_id: Option<ShopId>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    /// When set, keep only products with a promotion active at this instant.
    pub active_promotion_at: Option<DateTime<Utc>>,
    pub sort: ProductSort,
    pub page: PageRequest,
}

impl ProductQuery {
    /// `LIKE` pattern over the folded `search_text` column; pair with `ESCAPE '\'`.
    pub(crate) fn search_pattern(&self) -> Option<String> {
        self.search
            .as_deref()
            .map(fold_for_search)
            .filter(|value| !value.is_empty())
            .map(|value| contains_pattern(&value))
    }
}

/// Wraps already-folded text in `%...%`, escaping `LIKE` wildcards with `\`.
pub(crate) fn contains_pattern(folded: &str) -> String {
    let mut pattern = String::with_capacity(folded.len() + 2);
    pattern.push('%');
    for ch in folded.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

#[cfg(test)]
mod tests {
    use super::{contains_pattern, Page, PageRequest, ProductQuery, ProductSort};

    #[test]
    fn search_patterns_escape_like_wildcards() {
        assert_eq!(contains_pattern("50%_off\\"), "%50\\%\\_off\\\\%");
        let query = ProductQuery { search: Some("  Éclair ".to_string()), ..ProductQuery::default() };
        assert_eq!(query.search_pattern().as_deref(), Some("%éclair%"));
        let blank = ProductQuery { search: Some("   ".to_string()), ..ProductQuery::default() };
        assert_eq!(blank.search_pattern(), None);
    }

    #[test]
    fn page_request_clamps_size_and_index() {
        let request = PageRequest::new(0, 500);
        assert_eq!(request.page_index, 1);
        assert_eq!(request.page_size, PageRequest::MAX_PAGE_SIZE);
        assert_eq!(PageRequest::new(3, 10).offset(), 20);
    }

    #[test]
    fn page_navigation_flags_follow_total_count() {
        let page = Page::from_all((1..=25).collect::<Vec<_>>(), PageRequest::new(2, 10));
        assert_eq!(page.items, (11..=20).collect::<Vec<_>>());
        assert_eq!(page.total_pages(), 3);
        assert!(page.has_next());
        assert!(page.has_previous());

        let last = Page::from_all((1..=25).collect::<Vec<_>>(), PageRequest::new(3, 10));
        assert_eq!(last.items.len(), 5);
        assert!(!last.has_next());
    }

    #[test]
    fn unknown_sort_falls_back_to_name() {
        assert_eq!(ProductSort::parse("priceDesc"), ProductSort::PriceDesc);
        assert_eq!(ProductSort::parse("random"), ProductSort::NameAsc);
    }
}
