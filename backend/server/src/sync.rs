//! # Sync
//!
//! Bundles several collections into one response so a page polls once per
//! interval no matter how many collections it renders.
//!
//! ## Failure Handling
//!
//! - All reads share one store transaction, so the response is one consistent view
//! - Store unreachable: the whole call fails
//! - One table broken or missing: that field is left out, everything else is served
//! - Pollers read a missing field as "unchanged", never as an error
use chrono::Utc;
use collections::{Collection, CollectionSet, TIMESTAMP_FIELD};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::{
    database::Store,
    error::StoreError,
    utils::{distribute_settings, to_record_map},
};

pub async fn aggregate(
    store: &dyn Store,
    requested: &CollectionSet,
) -> Result<Map<String, Value>, StoreError> {
    let batch = store.read(requested).await?;

    let mut result = Map::new();

    for (collection, records) in batch.collections {
        match records {
            Ok(records) => {
                debug!("Read {} records from {collection}", records.len());
                result.insert(
                    collection.name().to_string(),
                    Value::Object(to_record_map(records)),
                );
            }
            Err(e) => warn!("Skipping {collection}: {e}"),
        }
    }

    match batch.settings {
        Some(Ok(settings)) => {
            let view = distribute_settings(&settings);

            if requested.contains(Collection::Announcement) {
                result.insert(Collection::Announcement.name().to_string(), view.announcement);
            }
            if requested.contains(Collection::Maintenance) {
                result.insert(
                    Collection::Maintenance.name().to_string(),
                    Value::Bool(view.maintenance),
                );
            }
        }
        Some(Err(e)) => warn!("Skipping settings: {e}"),
        None => {}
    }

    result.insert(
        TIMESTAMP_FIELD.to_string(),
        Value::from(Utc::now().timestamp_millis()),
    );

    Ok(result)
}
