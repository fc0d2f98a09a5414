use std::collections::BTreeSet;

use serde::Serialize;

use super::domain::{AdvisoryId, ConditionId};

/// Conditions printed under "general conditions".
pub const GENERAL_CONDITION_IDS: [i64; 2] = [12, 13];
/// Conditions printed under "what you must do".
pub const WHAT_YOU_MUST_DO_CONDITION_IDS: [i64; 11] = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11];
/// Conditions printed under "reporting".
pub const REPORTING_CONDITION_IDS: [i64; 7] = [19, 20, 21, 22, 23, 24, 25];
/// Advisory notes that are included in amendment notifications.
pub const NOTIFIED_ADVISORY_IDS: [i64; 8] = [1, 2, 3, 4, 5, 6, 7, 8];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionCategory {
    General,
    WhatYouMustDo,
    Reporting,
    Optional,
}

/// Maps catalogue ids onto the sections of the licence they belong to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogueCategories {
    general: BTreeSet<ConditionId>,
    what_you_must_do: BTreeSet<ConditionId>,
    reporting: BTreeSet<ConditionId>,
    notified_advisories: BTreeSet<AdvisoryId>,
}

impl CatalogueCategories {
    pub fn new(
        general: impl IntoIterator<Item = ConditionId>,
        what_you_must_do: impl IntoIterator<Item = ConditionId>,
        reporting: impl IntoIterator<Item = ConditionId>,
        notified_advisories: impl IntoIterator<Item = AdvisoryId>,
    ) -> Self {
        Self {
            general: general.into_iter().collect(),
            what_you_must_do: what_you_must_do.into_iter().collect(),
            reporting: reporting.into_iter().collect(),
            notified_advisories: notified_advisories.into_iter().collect(),
        }
    }

    /// Anything outside the three printed sections is an optional condition.
    pub fn category_of(&self, id: ConditionId) -> ConditionCategory {
        if self.general.contains(&id) {
            ConditionCategory::General
        } else if self.what_you_must_do.contains(&id) {
            ConditionCategory::WhatYouMustDo
        } else if self.reporting.contains(&id) {
            ConditionCategory::Reporting
        } else {
            ConditionCategory::Optional
        }
    }

    pub fn notifies_advisory(&self, id: AdvisoryId) -> bool {
        self.notified_advisories.contains(&id)
    }
}

impl Default for CatalogueCategories {
    fn default() -> Self {
        Self::new(
            GENERAL_CONDITION_IDS.map(ConditionId),
            WHAT_YOU_MUST_DO_CONDITION_IDS.map(ConditionId),
            REPORTING_CONDITION_IDS.map(ConditionId),
            NOTIFIED_ADVISORY_IDS.map(AdvisoryId),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_categories_cover_known_sections() {
        let categories = CatalogueCategories::default();
        assert_eq!(
            categories.category_of(ConditionId(12)),
            ConditionCategory::General
        );
        assert_eq!(
            categories.category_of(ConditionId(4)),
            ConditionCategory::WhatYouMustDo
        );
        for id in 19..=25 {
            assert_eq!(
                categories.category_of(ConditionId(id)),
                ConditionCategory::Reporting
            );
        }
        assert_eq!(
            categories.category_of(ConditionId(16)),
            ConditionCategory::Optional
        );
    }

    #[test]
    fn custom_categories_replace_defaults() {
        let categories = CatalogueCategories::new(
            [ConditionId(100)],
            Vec::new(),
            [ConditionId(12)],
            [AdvisoryId(42)],
        );
        assert_eq!(
            categories.category_of(ConditionId(12)),
            ConditionCategory::Reporting
        );
        assert!(categories.notifies_advisory(AdvisoryId(42)));
        assert!(!categories.notifies_advisory(AdvisoryId(1)));
    }
}
