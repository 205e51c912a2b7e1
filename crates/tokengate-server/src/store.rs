//! Customer record store
//!
//! Records are keyed by a lowercase-normalized email address. The in-memory
//! implementation stands in for the managed key-value table the order form
//! writes to.

use std::fmt::Debug;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Store failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The key is not an email address
    #[error("invalid customer key: {0}")]
    InvalidKey(String),

    /// The backing store could not be reached
    #[error("record store unavailable: {0}")]
    Unavailable(String),
}

/// Pizza choice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PizzaSelection {
    /// e.g. `large`
    pub pizza_size: String,
    /// e.g. `pepperoni`
    pub pizza_flavor: String,
}

/// One placed order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PizzaOrder {
    /// `year:month:day:hour:minute` as the order form sends it
    pub order_date: String,
    /// What was ordered
    pub order: PizzaSelection,
}

/// Stored customer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerRecord {
    /// Normalized email, the record key
    pub email: String,
    /// Identity-provider subject that last wrote the record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salutation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    /// Order history, oldest first
    #[serde(default)]
    pub pizza_orders: Vec<PizzaOrder>,
}

impl CustomerRecord {
    /// Fold `update` into this record
    ///
    /// Fields present in `update` win; orders are appended.
    pub fn merge(&mut self, update: CustomerRecord) {
        fn take(slot: &mut Option<String>, new: Option<String>) {
            if let Some(value) = new.filter(|v| !v.is_empty()) {
                *slot = Some(value);
            }
        }
        take(&mut self.sub_id, update.sub_id);
        take(&mut self.salutation, update.salutation);
        take(&mut self.first_name, update.first_name);
        take(&mut self.last_name, update.last_name);
        take(&mut self.phone, update.phone);
        self.pizza_orders.extend(update.pizza_orders);
    }
}

/// Customer persistence
#[async_trait]
pub trait CustomerStore: Send + Sync + Debug {
    /// Look a record up by email
    async fn get(&self, email: &str) -> Result<Option<CustomerRecord>, StoreError>;

    /// Insert or merge a record, returning what is now stored
    async fn put(&self, record: CustomerRecord) -> Result<CustomerRecord, StoreError>;

    /// Remove a record; `false` if there was none
    async fn delete(&self, email: &str) -> Result<bool, StoreError>;
}

/// `DashMap`-backed store
#[derive(Debug, Default)]
pub struct InMemoryCustomerStore {
    records: DashMap<String, CustomerRecord>,
}

impl InMemoryCustomerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl CustomerStore for InMemoryCustomerStore {
    async fn get(&self, email: &str) -> Result<Option<CustomerRecord>, StoreError> {
        let key = normalize_email(email)?;
        Ok(self.records.get(&key).map(|r| r.value().clone()))
    }

    async fn put(&self, mut record: CustomerRecord) -> Result<CustomerRecord, StoreError> {
        let key = normalize_email(&record.email)?;
        record.email = key.clone();

        let stored = match self.records.entry(key) {
            Entry::Occupied(mut existing) => {
                existing.get_mut().merge(record);
                existing.get().clone()
            }
            Entry::Vacant(slot) => slot.insert(record).value().clone(),
        };
        debug!(email = %stored.email, orders = stored.pizza_orders.len(), "Customer stored");
        Ok(stored)
    }

    async fn delete(&self, email: &str) -> Result<bool, StoreError> {
        let key = normalize_email(email)?;
        Ok(self.records.remove(&key).is_some())
    }
}

/// Validate an email-shaped key and lowercase it
///
/// # Errors
///
/// Returns [`StoreError::InvalidKey`] unless the input looks like
/// `local@domain.tld` with no whitespace.
pub fn normalize_email(raw: &str) -> Result<String, StoreError> {
    let invalid = || StoreError::InvalidKey(raw.to_string());

    if raw.is_empty() || raw.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    let (local, domain) = raw.split_once('@').ok_or_else(invalid)?;
    if local.is_empty() || domain.contains('@') {
        return Err(invalid());
    }
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 || labels.iter().any(|l| l.is_empty()) {
        return Err(invalid());
    }
    Ok(raw.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(size: &str) -> PizzaOrder {
        PizzaOrder {
            order_date: "2024:5:1:12:30".to_string(),
            order: PizzaSelection {
                pizza_size: size.to_string(),
                pizza_flavor: "margherita".to_string(),
            },
        }
    }

    #[test]
    fn email_validation() {
        assert_eq!(normalize_email("Jane@Example.COM").unwrap(), "jane@example.com");
        for bad in [
            "",
            "jane",
            "@example.com",
            "jane@",
            "jane@example",
            "jane@@example.com",
            "ja ne@example.com",
            "jane@example..com",
        ] {
            assert!(normalize_email(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[tokio::test]
    async fn put_get_delete() {
        let store = InMemoryCustomerStore::new();
        let record = CustomerRecord {
            email: "Jane@Example.com".to_string(),
            first_name: Some("Jane".to_string()),
            ..Default::default()
        };

        let stored = store.put(record).await.unwrap();
        assert_eq!(stored.email, "jane@example.com");

        let fetched = store.get("JANE@example.com").await.unwrap().unwrap();
        assert_eq!(fetched.first_name.as_deref(), Some("Jane"));

        assert!(store.delete("jane@example.com").await.unwrap());
        assert!(!store.delete("jane@example.com").await.unwrap());
        assert!(store.get("jane@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_merges_orders_and_keeps_fields() {
        let store = InMemoryCustomerStore::new();
        store
            .put(CustomerRecord {
                email: "jane@example.com".to_string(),
                phone: Some("555-0100".to_string()),
                pizza_orders: vec![order("small")],
                ..Default::default()
            })
            .await
            .unwrap();

        let stored = store
            .put(CustomerRecord {
                email: "jane@example.com".to_string(),
                last_name: Some("Doe".to_string()),
                phone: Some(String::new()),
                pizza_orders: vec![order("large")],
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(stored.phone.as_deref(), Some("555-0100"));
        assert_eq!(stored.last_name.as_deref(), Some("Doe"));
        assert_eq!(stored.pizza_orders, vec![order("small"), order("large")]);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn invalid_keys_are_rejected() {
        let store = InMemoryCustomerStore::new();
        assert!(matches!(
            store.get("not-an-email").await,
            Err(StoreError::InvalidKey(_))
        ));
        assert!(matches!(
            store
                .put(CustomerRecord {
                    email: "nope".to_string(),
                    ..Default::default()
                })
                .await,
            Err(StoreError::InvalidKey(_))
        ));
    }

    #[test]
    fn wire_shape_is_camel_case() {
        let record: CustomerRecord = serde_json::from_value(serde_json::json!({
            "email": "jane@example.com",
            "subId": "auth0|1",
            "firstName": "Jane",
            "pizzaOrders": [{
                "orderDate": "2024:5:1:12:30",
                "order": { "pizzaSize": "large", "pizzaFlavor": "pepperoni" }
            }]
        }))
        .unwrap();
        assert_eq!(record.sub_id.as_deref(), Some("auth0|1"));
        assert_eq!(record.pizza_orders[0].order.pizza_size, "large");
    }
}
