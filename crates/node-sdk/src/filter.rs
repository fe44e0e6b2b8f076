//! Structural matching of component profiles.
//!
//! A requested profile matches an available one when every field set in
//! the request passes its comparator:
//!
//! | field                                                   | comparator                          |
//! |---------------------------------------------------------|-------------------------------------|
//! | `id`, `name`, `messageFormat`, `clientId`, `deviceId`, `ioType` | strict equality            |
//! | `tags`                                                  | requested ⊆ available               |
//! | `components`, `processingModules`                       | each requested element matches some available element (recursive) |
//!
//! Unset fields are wildcards.  `topic` is descriptive and never compared.

use tn_protocol::ComponentProfile;

/// A profile field that takes part in matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfileField {
    Id,
    Name,
    MessageFormat,
    ClientId,
    DeviceId,
    IoType,
    Tags,
    Components,
    ProcessingModules,
}

impl ProfileField {
    pub const ALL: [ProfileField; 9] = [
        ProfileField::Id,
        ProfileField::Name,
        ProfileField::MessageFormat,
        ProfileField::ClientId,
        ProfileField::DeviceId,
        ProfileField::IoType,
        ProfileField::Tags,
        ProfileField::Components,
        ProfileField::ProcessingModules,
    ];

    /// Apply this field's comparator.  Returns `None` when `requested`
    /// leaves the field unset.
    pub fn compare(self, requested: &ComponentProfile, available: &ComponentProfile) -> Option<bool> {
        match self {
            ProfileField::Id => scalar(&requested.id, &available.id),
            ProfileField::Name => scalar(&requested.name, &available.name),
            ProfileField::MessageFormat => {
                scalar(&requested.message_format, &available.message_format)
            }
            ProfileField::ClientId => scalar(&requested.client_id, &available.client_id),
            ProfileField::DeviceId => scalar(&requested.device_id, &available.device_id),
            ProfileField::IoType => scalar(&requested.io_type, &available.io_type),
            ProfileField::Tags => requested.tags.as_ref().map(|wanted| {
                wanted
                    .iter()
                    .all(|t| available.tags.as_ref().is_some_and(|have| have.contains(t)))
            }),
            ProfileField::Components => requested
                .components
                .as_deref()
                .map(|wanted| all_satisfied(wanted, available.components.as_deref())),
            ProfileField::ProcessingModules => requested
                .processing_modules
                .as_deref()
                .map(|wanted| all_satisfied(wanted, available.processing_modules.as_deref())),
        }
    }
}

fn scalar<T: PartialEq>(requested: &Option<T>, available: &Option<T>) -> Option<bool> {
    requested.as_ref().map(|r| available.as_ref() == Some(r))
}

/// Every requested element must be matched by at least one available
/// element.  Several requested elements may be satisfied by the same one.
fn all_satisfied(wanted: &[ComponentProfile], available: Option<&[ComponentProfile]>) -> bool {
    let available = available.unwrap_or(&[]);
    wanted
        .iter()
        .all(|w| available.iter().any(|a| matches(w, a)))
}

/// Does `available` satisfy every constraint set in `requested`?
pub fn matches(requested: &ComponentProfile, available: &ComponentProfile) -> bool {
    matches_on(requested, available, &ProfileField::ALL)
}

/// Like [`matches`], but only the comparators for `fields` are consulted.
pub fn matches_on(
    requested: &ComponentProfile,
    available: &ComponentProfile,
    fields: &[ProfileField],
) -> bool {
    fields
        .iter()
        .all(|f| f.compare(requested, available).unwrap_or(true))
}

/// Everything in `available` that matches at least one of `requested`.
///
/// Results keep discovery order and each available element appears at most
/// once, even when several requests select it.
pub fn filter_all<'a>(
    requested: &[ComponentProfile],
    available: &'a [ComponentProfile],
) -> Vec<&'a ComponentProfile> {
    filter_all_on(requested, available, &ProfileField::ALL)
}

/// Like [`filter_all`], but matching only consults `fields`.
pub fn filter_all_on<'a>(
    requested: &[ComponentProfile],
    available: &'a [ComponentProfile],
    fields: &[ProfileField],
) -> Vec<&'a ComponentProfile> {
    let mut taken = vec![false; available.len()];
    let mut out = Vec::new();

    for request in requested {
        for (i, candidate) in available.iter().enumerate() {
            if !taken[i] && matches_on(request, candidate, fields) {
                taken[i] = true;
                out.push(candidate);
            }
        }
    }

    out
}

/// Canonical value equality of two profiles.  Tags compare as sets.
pub fn deep_equal(a: &ComponentProfile, b: &ComponentProfile) -> bool {
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;
    use tn_protocol::IoType;

    fn imu_candidates() -> Vec<ComponentProfile> {
        vec![
            ComponentProfile::new()
                .id("1")
                .io_type(IoType::Input)
                .tags(["imu", "motion"]),
            ComponentProfile::new()
                .id("2")
                .io_type(IoType::Output)
                .tags(["imu"]),
        ]
    }

    #[test]
    fn io_type_and_tag_subset_select_one() {
        let requested = ComponentProfile::new().io_type(IoType::Input).tags(["imu"]);
        let candidates = imu_candidates();
        let ids: Vec<&str> = candidates
            .iter()
            .filter(|c| matches(&requested, c))
            .filter_map(|c| c.id.as_deref())
            .collect();
        assert_eq!(ids, vec!["1"]);
    }

    #[test]
    fn tags_are_subset_not_equality() {
        let requested = ComponentProfile::new().tags(["imu", "gps"]);
        let available = ComponentProfile::new().tags(["imu"]);
        assert!(!matches(&requested, &available));
        assert!(matches(&available, &requested));
    }

    #[test]
    fn empty_tag_request_matches_untagged() {
        let requested = ComponentProfile::new().tags(Vec::<String>::new());
        assert!(matches(&requested, &ComponentProfile::new().id("x")));
    }

    #[test]
    fn wildcard_matches_everything() {
        let any = ComponentProfile::new();
        assert!(imu_candidates().iter().all(|c| matches(&any, c)));
    }

    #[test]
    fn set_scalar_never_matches_unset() {
        let requested = ComponentProfile::new().device_id("dev-1");
        assert!(!matches(&requested, &ComponentProfile::new()));
    }

    #[test]
    fn topic_is_not_compared() {
        let requested = ComponentProfile::new().id("1").topic("/a");
        let available = ComponentProfile::new().id("1").topic("/b");
        assert!(matches(&requested, &available));
    }

    #[test]
    fn nested_lists_are_satisfiability_checks() {
        // Two requested sub-constraints, both satisfied by the same
        // available element.
        let requested = ComponentProfile::new().components(vec![
            ComponentProfile::new().tags(["camera"]),
            ComponentProfile::new().io_type(IoType::Output),
        ]);
        let available = ComponentProfile::new().components(vec![ComponentProfile::new()
            .io_type(IoType::Output)
            .tags(["camera", "rgb"])]);
        assert!(matches(&requested, &available));

        let unsatisfied = ComponentProfile::new()
            .components(vec![ComponentProfile::new().io_type(IoType::Input)]);
        assert!(!matches(&unsatisfied, &available));
    }

    #[test]
    fn nested_request_against_missing_list_fails() {
        let requested = ComponentProfile::new()
            .processing_modules(vec![ComponentProfile::new().name("filter")]);
        assert!(!matches(&requested, &ComponentProfile::new()));

        let empty = ComponentProfile::new().processing_modules(vec![]);
        assert!(matches(&empty, &ComponentProfile::new()));
    }

    #[test]
    fn matches_on_restricts_fields() {
        let requested = ComponentProfile::new().id("1").io_type(IoType::Output);
        let available = &imu_candidates()[0];
        assert!(!matches(&requested, available));
        assert!(matches_on(&requested, available, &[ProfileField::Id]));
    }

    #[test]
    fn filter_all_has_no_duplicates() {
        let candidates = imu_candidates();
        let requested = vec![
            ComponentProfile::new().tags(["imu"]),
            ComponentProfile::new().io_type(IoType::Input),
        ];
        let hits = filter_all(&requested, &candidates);
        let ids: Vec<&str> = hits.iter().filter_map(|c| c.id.as_deref()).collect();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[test]
    fn filter_all_keeps_identical_candidates_apart() {
        // Duplicates are removed by identity, not by value.
        let twin = ComponentProfile::new().name("twin");
        let candidates = vec![twin.clone(), twin];
        let hits = filter_all(&[ComponentProfile::new().name("twin")], &candidates);
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn filter_all_on_restricts_fields() {
        let candidates = imu_candidates();
        let requested = [ComponentProfile::new().io_type(IoType::Input).tags(["imu"])];

        let tags_only = filter_all_on(&requested, &candidates, &[ProfileField::Tags]);
        let ids: Vec<&str> = tags_only.iter().filter_map(|c| c.id.as_deref()).collect();
        assert_eq!(ids, vec!["1", "2"]);

        let all_fields = filter_all(&requested, &candidates);
        assert_eq!(all_fields.len(), 1);
    }

    #[test]
    fn filter_all_with_no_requests_is_empty() {
        assert!(filter_all(&[], &imu_candidates()).is_empty());
    }

    #[test]
    fn deep_equal_is_value_based() {
        let a = ComponentProfile::new().io_type(IoType::Input);
        let b = ComponentProfile::new().io_type(IoType::Input);
        let c = ComponentProfile::new().io_type(IoType::Output);
        assert!(deep_equal(&a, &b));
        assert!(!deep_equal(&a, &c));
    }
}
