use tracing::debug;

use crate::config::{Operator, RoleTable};

/// Pure assignment function: which configured operators should see an
/// announcement with this region and matched keyword.
///
/// Keyword matching is exact case-insensitive equality against each
/// operator's keyword list. Region matching is case-insensitive substring
/// containment in either direction, so "Алматы" matches a configured
/// "г. Алматы" and vice versa. Output preserves the configuration order of
/// the operator table; an empty result is a normal outcome.
pub struct Matcher<'a> {
    roles: &'a RoleTable,
}

impl<'a> Matcher<'a> {
    pub fn new(roles: &'a RoleTable) -> Self {
        Self { roles }
    }

    pub fn matches(&self, region: &str, keyword: &str) -> Vec<&'a Operator> {
        let region_lower = region.to_lowercase();
        let keyword_lower = keyword.to_lowercase();

        let matched: Vec<&Operator> = self
            .roles
            .operators()
            .iter()
            .filter(|operator| {
                operator
                    .keywords
                    .iter()
                    .any(|kw| kw.to_lowercase() == keyword_lower)
                    && region_matches(&region_lower, &operator.regions)
            })
            .collect();

        if matched.is_empty() {
            debug!(region, keyword, "no operator matched announcement");
        } else if matched.len() > 1 {
            debug!(
                region,
                keyword,
                count = matched.len(),
                "announcement matched multiple operators, treating as shared lead"
            );
        }

        matched
    }
}

fn region_matches(region_lower: &str, operator_regions: &[String]) -> bool {
    operator_regions.iter().any(|candidate| {
        let candidate_lower = candidate.to_lowercase();
        region_lower.contains(&candidate_lower) || candidate_lower.contains(region_lower)
    })
}
