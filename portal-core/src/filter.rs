//! Derivations over the fetched catalog list.

use crate::catalog::{Catalog, Service};

/// Keep only the actions whose name contains `search` (case-insensitive).
///
/// Every catalog keeps its place, possibly with no actions left. An empty
/// search returns the list unchanged.
pub fn filtered_catalogs(catalogs: &[Catalog], search: &str) -> Vec<Catalog> {
    if search.is_empty() {
        return catalogs.to_vec();
    }
    let needle = search.to_lowercase();
    catalogs
        .iter()
        .map(|catalog| Catalog {
            actions: catalog
                .actions
                .iter()
                .filter(|action| action.name.to_lowercase().contains(&needle))
                .cloned()
                .collect(),
            ..catalog.clone()
        })
        .collect()
}

/// Resolve the selected service from the selected catalog and service slugs.
pub fn selected_service<'a>(
    catalogs: &'a [Catalog],
    catalog_slug: Option<&str>,
    service_slug: Option<&str>,
) -> Option<&'a Service> {
    let (catalog_slug, service_slug) = (catalog_slug?, service_slug?);
    catalogs
        .iter()
        .find(|catalog| catalog.slug == catalog_slug)?
        .service(service_slug)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn catalogs() -> Vec<Catalog> {
        serde_json::from_value(json!([
            {"slug": "infra", "name": "Infra", "actions": [
                {"slug": "new-db", "name": "New Database"},
                {"slug": "new-bucket", "name": "New Bucket"}
            ]},
            {"slug": "data", "name": "Data", "actions": [
                {"slug": "backfill", "name": "Backfill table"}
            ]}
        ]))
        .unwrap()
    }

    #[test]
    fn test_filter_case_insensitive() {
        let filtered = filtered_catalogs(&catalogs(), "DATABASE");
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered[0].actions.len(), 1);
        assert_eq!(filtered[0].actions[0].slug, "new-db");
        assert!(filtered[1].actions.is_empty());
    }

    #[test]
    fn test_filter_empty_search_is_identity() {
        let all = catalogs();
        assert_eq!(filtered_catalogs(&all, ""), all);
    }

    #[test]
    fn test_selected_service() {
        let all = catalogs();
        let service = selected_service(&all, Some("data"), Some("backfill")).unwrap();
        assert_eq!(service.name, "Backfill table");
        assert!(selected_service(&all, Some("data"), Some("new-db")).is_none());
        assert!(selected_service(&all, None, Some("backfill")).is_none());
        assert!(selected_service(&all, Some("infra"), None).is_none());
    }
}
