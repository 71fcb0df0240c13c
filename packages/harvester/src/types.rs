//! Core data types for the harvester.
//!
//! Division codes are hierarchical: the leading digits of a code identify the
//! units that contain it. Province, city and county codes are 6 digits,
//! township codes 9 and village codes 12.

use serde::{Deserialize, Serialize};
use url::Url;

/// Tier of the administrative hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    /// Province-level division (省级).
    Province,

    /// Prefecture-level division (地级).
    City,

    /// County-level division (县级).
    County,

    /// Township-level division (乡级).
    Township,

    /// Village-level division (村级). Leaf of the hierarchy.
    Village,
}

impl Level {
    /// All levels, top to bottom.
    pub const ALL: [Level; 5] = [
        Self::Province,
        Self::City,
        Self::County,
        Self::Township,
        Self::Village,
    ];

    /// Get the string value used in records and file names.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Province => "province",
            Self::City => "city",
            Self::County => "county",
            Self::Township => "township",
            Self::Village => "village",
        }
    }

    /// Level of the entries listed on this level's child pages.
    #[must_use]
    pub fn child(&self) -> Option<Level> {
        match self {
            Self::Province => Some(Self::City),
            Self::City => Some(Self::County),
            Self::County => Some(Self::Township),
            Self::Township => Some(Self::Village),
            Self::Village => None,
        }
    }

    /// Whether entries at this level never have children.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.child().is_none()
    }

    /// Number of digits in a normalized code at this level.
    #[must_use]
    pub fn code_len(&self) -> usize {
        match self {
            Self::Province | Self::City | Self::County => 6,
            Self::Township => 9,
            Self::Village => 12,
        }
    }

    /// Number of leading digits every descendant shares with a code at this level.
    #[must_use]
    pub fn prefix_len(&self) -> usize {
        match self {
            Self::Province => 2,
            Self::City => 4,
            Self::County => 6,
            Self::Township => 9,
            Self::Village => 12,
        }
    }

    /// Name of the output file holding records of this level.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}.jsonl", self.as_str())
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the hierarchy as listed on its parent's page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DivisionNode {
    pub code: String,
    pub name: String,
    pub level: Level,

    /// Code of the containing unit; empty for provinces.
    #[serde(default)]
    pub parent_code: String,

    /// Urban/rural classification code (城乡分类代码) printed on village rows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    /// Page listing this node's children. Never set on villages.
    #[serde(skip)]
    pub child_url: Option<Url>,
}

impl DivisionNode {
    /// Create a node without a child page.
    pub fn new(code: impl Into<String>, name: impl Into<String>, level: Level) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            level,
            parent_code: String::new(),
            category: None,
            child_url: None,
        }
    }

    /// Set the child page. Ignored for village-level nodes.
    pub fn with_child_url(mut self, url: Url) -> Self {
        if !self.level.is_leaf() {
            self.child_url = Some(url);
        }
        self
    }

    pub fn with_parent_code(mut self, parent_code: impl Into<String>) -> Self {
        self.parent_code = parent_code.into();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Leading digits shared by all descendants of this node.
    #[must_use]
    pub fn prefix(&self) -> &str {
        let len = self.level.prefix_len().min(self.code.len());
        &self.code[..len]
    }

    /// Whether `child` is encoded as a descendant of this node.
    #[must_use]
    pub fn contains(&self, child: &DivisionNode) -> bool {
        child.level > self.level && child.code.starts_with(self.prefix())
    }
}

/// A page whose subtree could not be crawled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchFailure {
    pub url: String,

    /// Code of the node whose page failed; `None` for a year's index page.
    pub code: Option<String>,

    /// Level of the entries the page should have listed.
    pub level: Level,
    pub error: String,
}

impl std::fmt::Display for BranchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{code} ({}): {}", self.url, self.error),
            None => write!(f, "{}: {}", self.url, self.error),
        }
    }
}

/// Outcome of crawling one year.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct YearReport {
    pub year: i32,
    pub pages: usize,
    pub records: usize,
    pub failures: Vec<BranchFailure>,
}

impl YearReport {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Outcome of a whole run over one or more years.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub years: Vec<YearReport>,
}

impl RunSummary {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.years.iter().all(YearReport::is_complete)
    }

    pub fn failures(&self) -> impl Iterator<Item = &BranchFailure> {
        self.years.iter().flat_map(|y| y.failures.iter())
    }

    #[must_use]
    pub fn records(&self) -> usize {
        self.years.iter().map(|y| y.records).sum()
    }

    /// Human-readable list of failed branches, used in error messages.
    #[must_use]
    pub fn describe_failures(&self) -> String {
        let failures: Vec<String> = self
            .years
            .iter()
            .flat_map(|y| y.failures.iter().map(move |f| format!("[{}] {f}", y.year)))
            .collect();
        format!("{} branch(es) failed: {}", failures.len(), failures.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_child_chain() {
        assert_eq!(Level::Province.child(), Some(Level::City));
        assert_eq!(Level::Township.child(), Some(Level::Village));
        assert_eq!(Level::Village.child(), None);
        assert!(Level::Village.is_leaf());
        assert!(!Level::County.is_leaf());
    }

    #[test]
    fn test_level_file_name() {
        assert_eq!(Level::Township.file_name(), "township.jsonl");
    }

    #[test]
    fn test_level_serialization() {
        let json = serde_json::to_string(&Level::County).unwrap();
        assert_eq!(json, "\"county\"");
        let level: Level = serde_json::from_str("\"village\"").unwrap();
        assert_eq!(level, Level::Village);
    }

    #[test]
    fn test_village_never_gets_child_url() {
        let url = Url::parse("http://example.test/11/01/01/110101001.html").unwrap();
        let village = DivisionNode::new("110101001001", "多福巷社区居委会", Level::Village)
            .with_child_url(url.clone());
        assert!(village.child_url.is_none());

        let town = DivisionNode::new("110101001", "东华门街道", Level::Township).with_child_url(url);
        assert!(town.child_url.is_some());
    }

    #[test]
    fn test_contains_uses_significant_prefix() {
        let province = DivisionNode::new("110000", "北京市", Level::Province);
        let city = DivisionNode::new("110100", "市辖区", Level::City);
        let other = DivisionNode::new("120100", "市辖区", Level::City);

        assert_eq!(province.prefix(), "11");
        assert!(province.contains(&city));
        assert!(!province.contains(&other));
        assert!(!city.contains(&province));
    }

    #[test]
    fn test_node_skips_child_url_when_serialized() {
        let node = DivisionNode::new("110100", "市辖区", Level::City)
            .with_parent_code("110000")
            .with_child_url(Url::parse("http://example.test/11/1101.html").unwrap());
        let json = serde_json::to_string(&node).unwrap();
        assert_eq!(
            json,
            r#"{"code":"110100","name":"市辖区","level":"city","parent_code":"110000"}"#
        );
    }

    #[test]
    fn test_describe_failures() {
        let summary = RunSummary {
            years: vec![YearReport {
                year: 2020,
                pages: 3,
                records: 10,
                failures: vec![BranchFailure {
                    url: "http://example.test/2020/13/1301.html".to_string(),
                    code: Some("130100".to_string()),
                    level: Level::County,
                    error: "HTTP status 404".to_string(),
                }],
            }],
        };
        assert!(!summary.is_complete());
        assert_eq!(
            summary.describe_failures(),
            "1 branch(es) failed: [2020] 130100 (http://example.test/2020/13/1301.html): HTTP status 404"
        );
    }
}
