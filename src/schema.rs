//! Canonical column names and header resolution for the raw and index sheets.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const DATE: &str = "date";
pub const CAMPAIGN_TYPE: &str = "campaign_type";
pub const CAMPAIGN: &str = "campaign";
pub const AD_GROUP: &str = "ad_group";
pub const KEYWORD: &str = "keyword";
pub const MEDIA: &str = "media";
pub const IMPRESSIONS: &str = "impressions";
pub const CLICKS: &str = "clicks";
pub const COST: &str = "cost";
pub const CONVERSIONS: &str = "conversions";
pub const REVENUE: &str = "revenue";
pub const AVG_RANK: &str = "avg_rank";
pub const CATEGORY: &str = "category";
pub const REGION: &str = "region";
pub const PRODUCT_TYPE: &str = "product_type";

// Derived per-row columns.
pub const DAY: &str = "day";
pub const WEEK: &str = "week";
pub const WEEK_LABEL: &str = "week_label";
pub const MONTH: &str = "month";
pub const PROMOTION_PHASE: &str = "promo_phase";

/// Sentinel written into a facet column by the virtual-total expander.
pub const ALL_SENTINEL: &str = "ALL";

/// Columns the raw sheet must carry.
pub const RAW_REQUIRED: &[&str] = &[
    DATE,
    CAMPAIGN_TYPE,
    CAMPAIGN,
    AD_GROUP,
    KEYWORD,
    MEDIA,
    IMPRESSIONS,
    CLICKS,
    COST,
    CONVERSIONS,
    AVG_RANK,
    REVENUE,
    CATEGORY,
    REGION,
];

/// Columns the index sheet must carry.
pub const INDEX_REQUIRED: &[&str] = &[CAMPAIGN, CATEGORY, REGION];

/// Raw measures coerced to numbers during normalization.
pub const NUMERIC_COLUMNS: &[&str] = &[IMPRESSIONS, CLICKS, COST, CONVERSIONS, REVENUE, AVG_RANK];

/// Text columns carried from the raw sheet into the normalized frame.
pub const TEXT_COLUMNS: &[&str] = &[CAMPAIGN_TYPE, CAMPAIGN, AD_GROUP, KEYWORD, MEDIA];

/// Maps sheet headers onto canonical column names.
///
/// Matching ignores case and surrounding whitespace, and treats spaces and
/// hyphens as underscores, so `Cost-incl-tax` and `cost incl tax` resolve the
/// same way.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeaderAliases {
    pub aliases: BTreeMap<String, Vec<String>>,
}

impl Default for HeaderAliases {
    fn default() -> Self {
        let table: &[(&str, &[&str])] = &[
            (DATE, &["date", "day", "일별"]),
            (CAMPAIGN_TYPE, &["campaign_type", "캠페인유형"]),
            (CAMPAIGN, &["campaign", "campaign_name", "캠페인"]),
            (AD_GROUP, &["ad_group", "adgroup", "광고그룹"]),
            (KEYWORD, &["keyword", "키워드"]),
            (MEDIA, &["media", "pc/mobile", "pc/모바일_매체"]),
            (IMPRESSIONS, &["impressions", "노출수"]),
            (CLICKS, &["clicks", "클릭수"]),
            (COST, &["cost", "cost_incl_tax", "총비용(vat포함,원)"]),
            (CONVERSIONS, &["conversions", "전환수"]),
            (REVENUE, &["revenue", "conversion_revenue", "전환매출액(원)"]),
            (AVG_RANK, &["avg_rank", "average_impression_rank", "평균노출순위"]),
            (
                CATEGORY,
                &["category", "campaign_category", "캠페인카테고리", "카테고리"],
            ),
            (
                REGION,
                &["region", "country", "campaign_country", "캠페인국가", "국가"],
            ),
            (PRODUCT_TYPE, &["product_type", "상품유형"]),
        ];

        let aliases = table
            .iter()
            .map(|(canonical, names)| {
                (
                    canonical.to_string(),
                    names.iter().map(|n| n.to_string()).collect(),
                )
            })
            .collect();

        Self { aliases }
    }
}

impl HeaderAliases {
    /// Resolve one sheet header to its canonical column name.
    pub fn resolve(&self, header: &str) -> Option<String> {
        let key = normalize_header(header);
        if key.is_empty() {
            return None;
        }
        self.aliases.iter().find_map(|(canonical, names)| {
            let hit = normalize_header(canonical) == key
                || names.iter().any(|n| normalize_header(n) == key);
            hit.then(|| canonical.clone())
        })
    }

    /// Resolve a header row, keeping the first column that maps to each
    /// canonical name. Returns one slot per input header.
    pub fn resolve_all(&self, headers: &[String]) -> Vec<Option<String>> {
        let mut seen = std::collections::HashSet::new();
        headers
            .iter()
            .map(|h| {
                self.resolve(h)
                    .filter(|canonical| seen.insert(canonical.clone()))
            })
            .collect()
    }

    /// Required columns absent from a resolved header row.
    pub fn missing(resolved: &[Option<String>], required: &[&str]) -> Vec<String> {
        required
            .iter()
            .filter(|req| !resolved.iter().flatten().any(|c| c == *req))
            .map(|req| req.to_string())
            .collect()
    }
}

fn normalize_header(header: &str) -> String {
    header
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolves_english_and_original_headers() {
        let aliases = HeaderAliases::default();
        assert_eq!(aliases.resolve("  Cost-incl-tax "), Some(COST.to_string()));
        assert_eq!(aliases.resolve("총비용(VAT포함,원)"), Some(COST.to_string()));
        assert_eq!(aliases.resolve("PC/모바일 매체"), Some(MEDIA.to_string()));
        assert_eq!(aliases.resolve("Campaign Country"), Some(REGION.to_string()));
        assert_eq!(aliases.resolve("unrelated"), None);
    }

    #[test]
    fn test_missing_lists_absent_required_columns() {
        let aliases = HeaderAliases::default();
        let headers: Vec<String> = ["campaign", "category"].iter().map(|s| s.to_string()).collect();
        let resolved = aliases.resolve_all(&headers);
        assert_eq!(HeaderAliases::missing(&resolved, INDEX_REQUIRED), vec![REGION.to_string()]);
    }

    #[test]
    fn test_duplicate_headers_keep_first() {
        let aliases = HeaderAliases::default();
        let headers: Vec<String> = ["country", "region"].iter().map(|s| s.to_string()).collect();
        let resolved = aliases.resolve_all(&headers);
        assert_eq!(resolved, vec![Some(REGION.to_string()), None]);
    }
}
