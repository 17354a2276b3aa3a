//! Keyword routing of tasks to roles.

use crate::model::Role;

/// Checked in order; the first role with a matching keyword wins.
const ROLE_KEYWORDS: &[(Role, &[&str])] = &[
    (
        Role::Cfo,
        &[
            "budget", "strategic", "strategy", "forecast", "capital", "refinanc", "investment",
            "valuation", "noi",
        ],
    ),
    (
        Role::Maintenance,
        &[
            "repair", "hvac", "maintenance", "plumbing", "roof", "inspect", "work order",
            "electrical", "leak", "boiler", "appliance",
        ],
    ),
    (
        Role::Accounting,
        &[
            "payment", "invoice", "reconcil", "receivable", "payable", "delinquen", "billing",
            "collection", "ledger", "audit",
        ],
    ),
    (
        Role::Leasing,
        &[
            "lease", "tenant", "vacan", "renewal", "leasing", "occupancy", "prospect", "move-in",
            "move in",
        ],
    ),
];

pub fn role_for(text: &str) -> Role {
    let text = text.to_lowercase();
    ROLE_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| contains_word_prefix(&text, k)))
        .map(|(role, _)| *role)
        .unwrap_or(Role::PropertyManager)
}

/// Keywords match at the start of a word. Keywords of three letters or
/// fewer must also end one, so `noi` does not match `noise`.
fn contains_word_prefix(text: &str, keyword: &str) -> bool {
    text.match_indices(keyword).any(|(idx, _)| {
        let starts_word = text[..idx]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric());
        let ends_ok = keyword.len() > 3
            || text[idx + keyword.len()..]
                .chars()
                .next()
                .map_or(true, |c| !c.is_alphanumeric());
        starts_word && ends_ok
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_table() {
        assert_eq!(role_for("Revisit the 2025 budget"), Role::Cfo);
        assert_eq!(role_for("Schedule HVAC repair in unit 4"), Role::Maintenance);
        assert_eq!(role_for("Follow up on unpaid invoice #221"), Role::Accounting);
        assert_eq!(role_for("Contact tenant about lease renewal"), Role::Leasing);
        assert_eq!(role_for("Walk the property"), Role::PropertyManager);
    }

    #[test]
    fn test_table_order_breaks_ties() {
        assert_eq!(role_for("Budget for roof repair"), Role::Cfo);
        assert_eq!(role_for("Tenant payment plan"), Role::Accounting);
    }

    #[test]
    fn test_short_keywords_need_whole_words() {
        assert_eq!(role_for("Reduce noise complaints"), Role::PropertyManager);
        assert_eq!(role_for("Protect NOI margin"), Role::Cfo);
    }
}
