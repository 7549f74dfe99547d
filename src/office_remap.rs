//! Group-name rewriting applied before groups are added to the target.

use std::collections::HashSet;

/// Rewrites a requested group name for a particular target computer.
pub trait GroupRemapPolicy: Send + Sync {
    fn remap(&self, group: &str, target_computer: &str) -> String;
}

/// Leaves every group name unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRemap;

impl GroupRemapPolicy for NoRemap {
    fn remap(&self, group: &str, _target_computer: &str) -> String {
        group.to_string()
    }
}

/// Maps versioned Office 2021 licensing groups to their unversioned
/// counterparts when the target computer name contains an `a` (any case).
#[derive(Debug, Clone, Copy, Default)]
pub struct OfficeSuiteRemap;

const OFFICE_GROUP_MAP: [(&str, &str); 4] = [
    (
        "LSS-App-Office-Professional-2021-Academic",
        "LSS-App-Office-Professional",
    ),
    (
        "LSS-App-Office-Professional-2021-Corporate",
        "LSS-App-Office-Professional",
    ),
    (
        "LSS-App-Office-Standard-2021-Academic",
        "LSS-App-Office-Standard",
    ),
    (
        "LSS-App-Office-Standard-2021-Corporate",
        "LSS-App-Office-Standard",
    ),
];

impl GroupRemapPolicy for OfficeSuiteRemap {
    fn remap(&self, group: &str, target_computer: &str) -> String {
        if !target_computer.contains(['a', 'A']) {
            return group.to_string();
        }

        OFFICE_GROUP_MAP
            .iter()
            .find(|(from, _)| *from == group)
            .map(|(_, to)| to.to_string())
            .unwrap_or_else(|| group.to_string())
    }
}

/// The ordered list of groups to add: selected then additional, remapped,
/// blanks dropped, first occurrence kept.
pub fn resolve_groups_to_add(
    selected: &[String],
    additional: &[String],
    target_computer: &str,
    policy: &dyn GroupRemapPolicy,
) -> Vec<String> {
    let mut seen = HashSet::new();
    selected
        .iter()
        .chain(additional)
        .map(|group| group.trim())
        .filter(|group| !group.is_empty())
        .map(|group| policy.remap(group, target_computer))
        .filter(|group| seen.insert(group.clone()))
        .collect()
}
