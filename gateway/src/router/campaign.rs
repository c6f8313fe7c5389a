//! Campaign and rule vocabulary.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Active,
    Paused,
    Archived,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    Contains,
    In,
    Prefix,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    /// A routing field name: `geo`, `device`, `hour`, `day_of_week`, or any raw query-parameter name.
    pub field: String,
    pub operator: Operator,
    pub values: Vec<String>,
    pub priority: u32,
}

impl Rule {
    /// A rule matches when the field's resolved value satisfies the operator against any listed
    /// value. `contains` is case-insensitive; `equals`, `in`, and `prefix` are exact.
    pub fn matches(&self, field_value: Option<&str>) -> bool {
        let Some(field_value) = field_value else {
            return false;
        };

        match self.operator {
            Operator::Equals | Operator::In => self.values.iter().any(|v| v == field_value),
            Operator::Contains => {
                let field_lower = field_value.to_lowercase();
                self.values.iter().any(|v| field_lower.contains(&v.to_lowercase()))
            }
            Operator::Prefix => self.values.iter().any(|v| field_value.starts_with(v.as_str())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub tenant_id: String,
    pub campaign_id: String,
    pub name: String,
    pub status: CampaignStatus,
    pub rules: Vec<Rule>,
    pub default_destination: String,
    pub append_params: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

pub const DEFAULT_CAMPAIGN_ID: &str = "default";

impl Campaign {
    pub fn is_active(&self) -> bool {
        self.status == CampaignStatus::Active
    }

    pub fn is_default(&self) -> bool {
        self.campaign_id == DEFAULT_CAMPAIGN_ID
    }

    /// Sum of the priorities of every rule that matches `fields`. Unknown operators never match
    /// rather than erroring.
    pub fn match_score(&self, fields: &HashMap<String, String>) -> u32 {
        self.rules
            .iter()
            .filter(|rule| rule.matches(fields.get(&rule.field).map(String::as_str)))
            .map(|rule| rule.priority)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn equals_is_case_sensitive() {
        let rule = Rule {
            field: "country".into(),
            operator: Operator::Equals,
            values: vec!["US".into()],
            priority: 10,
        };

        assert!(rule.matches(Some("US")));
        assert!(!rule.matches(Some("us")));
    }

    #[test]
    fn contains_is_case_insensitive() {
        let rule = Rule {
            field: "browser".into(),
            operator: Operator::Contains,
            values: vec!["chrome".into()],
            priority: 5,
        };

        assert!(rule.matches(Some("Mobile Chrome/1.0")));
    }

    #[test]
    fn prefix_is_exact() {
        let rule = Rule {
            field: "source".into(),
            operator: Operator::Prefix,
            values: vec!["fb_".into()],
            priority: 1,
        };

        assert!(rule.matches(Some("fb_campaign1")));
        assert!(!rule.matches(Some("Fb_campaign1")));
    }

    #[test]
    fn match_score_sums_matching_rule_priorities() {
        let campaign = Campaign {
            tenant_id: "org_a".into(),
            campaign_id: "na-launch".into(),
            name: "NA launch".into(),
            status: CampaignStatus::Active,
            rules: vec![
                Rule {
                    field: "country".into(),
                    operator: Operator::In,
                    values: vec!["US".into(), "CA".into()],
                    priority: 90,
                },
                Rule {
                    field: "device_type".into(),
                    operator: Operator::Equals,
                    values: vec!["mobile".into()],
                    priority: 10,
                },
            ],
            default_destination: "https://na.example.com/x".into(),
            append_params: true,
            created_at: OffsetDateTime::UNIX_EPOCH,
            updated_at: OffsetDateTime::UNIX_EPOCH,
        };

        let score = campaign.match_score(&fields(&[("country", "US"), ("device_type", "desktop")]));
        assert_eq!(score, 90);
    }
}
