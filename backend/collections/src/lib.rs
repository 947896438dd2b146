//! # Collections
//!
//! Wire model shared by the sync endpoint and the poller.
//!
//! A collection is a named partition of records, keyed by record id. Two of
//! them (`announcement` and `maintenance`) are not tables but values derived
//! from the flat settings table.
//!
//! ## Query Parameter
//!
//! - `collections=all`, an empty value, or no parameter at all selects every collection
//! - Otherwise a comma separated list such as `collections=activities,events`
//! - `settings` is accepted as an alias for both settings derived values
//! - Unknown names are ignored, `collections=none` selects nothing

use std::fmt;

pub const TIMESTAMP_FIELD: &str = "_timestamp";
pub const ALL: &str = "all";
pub const SETTINGS_ALIAS: &str = "settings";
/// Rendered for an empty selection, which would otherwise read back as [`ALL`].
pub const NONE: &str = "none";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Policies,
    Members,
    Complaints,
    Activities,
    Qa,
    Events,
    Announcement,
    Maintenance,
}

impl Collection {
    /// Every known collection in declaration order.
    pub const ALL: [Collection; 8] = [
        Collection::Policies,
        Collection::Members,
        Collection::Complaints,
        Collection::Activities,
        Collection::Qa,
        Collection::Events,
        Collection::Announcement,
        Collection::Maintenance,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Collection::Policies => "policies",
            Collection::Members => "members",
            Collection::Complaints => "complaints",
            Collection::Activities => "activities",
            Collection::Qa => "qa",
            Collection::Events => "events",
            Collection::Announcement => "announcement",
            Collection::Maintenance => "maintenance",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }

    /// Derived from the settings table rather than read from a table of its own.
    pub fn is_setting(self) -> bool {
        matches!(self, Collection::Announcement | Collection::Maintenance)
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CollectionSet {
    #[default]
    All,
    Only(Vec<Collection>),
}

impl CollectionSet {
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
            return CollectionSet::All;
        };

        let mut selected = Vec::new();

        for part in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            if part == ALL {
                return CollectionSet::All;
            }

            if part == SETTINGS_ALIAS {
                selected.push(Collection::Announcement);
                selected.push(Collection::Maintenance);
                continue;
            }

            if let Some(collection) = Collection::from_name(part) {
                selected.push(collection);
            }
        }

        selected.sort();
        selected.dedup();

        CollectionSet::Only(selected)
    }

    pub fn only<I: IntoIterator<Item = Collection>>(collections: I) -> Self {
        let mut selected: Vec<Collection> = collections.into_iter().collect();
        selected.sort();
        selected.dedup();

        CollectionSet::Only(selected)
    }

    pub fn contains(&self, collection: Collection) -> bool {
        match self {
            CollectionSet::All => true,
            CollectionSet::Only(selected) => selected.contains(&collection),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Collection> + '_ {
        Collection::ALL.into_iter().filter(|c| self.contains(*c))
    }

    pub fn wants_settings(&self) -> bool {
        self.contains(Collection::Announcement) || self.contains(Collection::Maintenance)
    }

    pub fn to_query(&self) -> String {
        match self {
            CollectionSet::All => ALL.to_string(),
            CollectionSet::Only(selected) if selected.is_empty() => NONE.to_string(),
            CollectionSet::Only(selected) => selected
                .iter()
                .map(|c| c.name())
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_or_empty_means_all() {
        assert_eq!(CollectionSet::parse(None), CollectionSet::All);
        assert_eq!(CollectionSet::parse(Some("")), CollectionSet::All);
        assert_eq!(CollectionSet::parse(Some("  ")), CollectionSet::All);
        assert_eq!(CollectionSet::parse(Some("events,all")), CollectionSet::All);
    }

    #[test]
    fn test_subset() {
        let set = CollectionSet::parse(Some("events, activities,events"));

        assert_eq!(
            set,
            CollectionSet::Only(vec![Collection::Activities, Collection::Events])
        );
        assert!(!set.contains(Collection::Policies));
        assert!(!set.wants_settings());
        assert_eq!(set.to_query(), "activities,events");
    }

    #[test]
    fn test_settings_alias() {
        let set = CollectionSet::parse(Some("settings"));

        assert!(set.contains(Collection::Announcement));
        assert!(set.contains(Collection::Maintenance));
        assert!(set.wants_settings());
    }

    #[test]
    fn test_unknown_names_ignored() {
        let set = CollectionSet::parse(Some("bogus,,qa"));

        assert_eq!(set, CollectionSet::Only(vec![Collection::Qa]));
        assert_eq!(CollectionSet::parse(Some("bogus")), CollectionSet::Only(vec![]));
    }

    #[test]
    fn test_empty_selection_stays_empty_on_the_wire() {
        let empty = CollectionSet::only([]);

        assert_eq!(empty.to_query(), NONE);
        assert_eq!(CollectionSet::parse(Some(&empty.to_query())), empty);
        assert_eq!(empty.iter().count(), 0);
    }

    #[test]
    fn test_names_round_trip() {
        for collection in Collection::ALL {
            assert_eq!(Collection::from_name(collection.name()), Some(collection));
        }
        assert_eq!(Collection::from_name("settings"), None);
    }

    #[test]
    fn test_iter_follows_declaration_order() {
        let set = CollectionSet::only([Collection::Maintenance, Collection::Policies]);

        assert_eq!(
            set.iter().collect::<Vec<_>>(),
            vec![Collection::Policies, Collection::Maintenance]
        );
        assert_eq!(CollectionSet::All.iter().count(), 8);
    }
}
