//! Operation items: demand lines and their fulfillment math.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use wareflow_core::{AggregateId, DomainError, DomainResult, Entity, UserId, ValueObject};

/// Identifier of a demand line within an operation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationItemId(pub AggregateId);

impl OperationItemId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for OperationItemId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Reference to a product in the catalog (owned elsewhere).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub AggregateId);

impl ProductId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ProductId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Reference to a product variant.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariantId(pub AggregateId);

impl VariantId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for VariantId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Reference to a tracked serial number.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SerialNumberId(pub AggregateId);

impl SerialNumberId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for SerialNumberId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Reference to a warehouse location (rack/bin/dock).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationId(pub AggregateId);

impl LocationId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for LocationId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Lot code plus optional expiry, for lot-tracked stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotRef {
    pub lot_code: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl ValueObject for LotRef {}

/// Item fulfillment state.
///
/// `Pending`, `InProgress` and `Completed` are fully determined by the
/// processed/demanded quantities. `Cancelled` is a manual decision and is
/// never derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl ItemState {
    /// State implied by the quantities of a non-cancelled item.
    pub fn from_quantities(processed: u64, demanded: u64) -> Self {
        if processed == 0 {
            ItemState::Pending
        } else if processed < demanded {
            ItemState::InProgress
        } else {
            ItemState::Completed
        }
    }

    /// Terminal states accept no further fulfillment.
    pub fn is_terminal(self) -> bool {
        matches!(self, ItemState::Completed | ItemState::Cancelled)
    }
}

/// One demand line as supplied at operation creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSpec {
    pub item_id: OperationItemId,
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub serial_id: Option<SerialNumberId>,
    pub demanded: u64,
    pub lot: Option<LotRef>,
    pub source_location: Option<LocationId>,
    pub destination_location: Option<LocationId>,
}

/// One entry of a fulfillment batch: a positive quantity delta for one item.
///
/// Corrections are modeled as a new operation, never as a negative delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemProgress {
    pub item_id: OperationItemId,
    pub quantity: u64,
    pub destination_location: Option<LocationId>,
}

/// One line of demand within an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationItem {
    pub id: OperationItemId,
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub serial_id: Option<SerialNumberId>,
    pub demanded: u64,
    /// Monotonically non-decreasing; never exceeds `demanded`.
    pub processed: u64,
    pub lot: Option<LotRef>,
    pub source_location: Option<LocationId>,
    pub destination_location: Option<LocationId>,
    pub state: ItemState,
    pub processed_by: Option<UserId>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl OperationItem {
    /// Build a pending item from its creation spec.
    pub fn from_spec(spec: &ItemSpec) -> Self {
        Self {
            id: spec.item_id,
            product_id: spec.product_id,
            variant_id: spec.variant_id,
            serial_id: spec.serial_id,
            demanded: spec.demanded,
            processed: 0,
            lot: spec.lot.clone(),
            source_location: spec.source_location,
            destination_location: spec.destination_location,
            state: ItemState::Pending,
            processed_by: None,
            processed_at: None,
        }
    }

    pub fn remaining(&self) -> u64 {
        self.demanded.saturating_sub(self.processed)
    }

    /// Validate a fulfillment delta against this item and return the
    /// resulting processed total.
    ///
    /// Over-receipt is rejected rather than clamped: a delta that would push
    /// `processed` past `demanded` fails with a validation error naming the
    /// overage.
    pub fn check_progress(&self, delta: u64) -> DomainResult<u64> {
        if self.state == ItemState::Cancelled {
            return Err(DomainError::invariant(format!(
                "item {} is cancelled and cannot be processed",
                self.id
            )));
        }

        if delta == 0 {
            return Err(DomainError::validation("quantity delta must be positive"));
        }

        let new_processed = self
            .processed
            .checked_add(delta)
            .ok_or_else(|| DomainError::invariant("processed quantity overflow"))?;

        if new_processed > self.demanded {
            return Err(DomainError::validation(format!(
                "processed quantity {} would exceed demanded quantity {} for item {}",
                new_processed, self.demanded, self.id
            )));
        }

        Ok(new_processed)
    }

    /// Record a validated fulfillment total and re-derive the item state.
    pub fn record_progress(
        &mut self,
        new_processed: u64,
        destination_location: Option<LocationId>,
        processed_by: UserId,
        processed_at: DateTime<Utc>,
    ) {
        self.processed = new_processed;
        if let Some(location) = destination_location {
            self.destination_location = Some(location);
        }
        self.state = ItemState::from_quantities(self.processed, self.demanded);
        self.processed_by = Some(processed_by);
        self.processed_at = Some(processed_at);
    }

    /// Force the item to `Cancelled`. Processed quantity is left untouched.
    pub fn force_cancel(&mut self) {
        self.state = ItemState::Cancelled;
    }
}

impl Entity for OperationItem {
    type Id = OperationItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_item(demanded: u64) -> OperationItem {
        OperationItem::from_spec(&ItemSpec {
            item_id: OperationItemId::new(AggregateId::new()),
            product_id: ProductId::new(AggregateId::new()),
            variant_id: None,
            serial_id: None,
            demanded,
            lot: None,
            source_location: None,
            destination_location: None,
        })
    }

    fn test_user_id() -> UserId {
        UserId::new()
    }

    #[test]
    fn fresh_item_is_pending_with_zero_processed() {
        let item = test_item(10);
        assert_eq!(item.state, ItemState::Pending);
        assert_eq!(item.processed, 0);
        assert_eq!(item.remaining(), 10);
    }

    #[test]
    fn state_follows_quantities() {
        assert_eq!(ItemState::from_quantities(0, 10), ItemState::Pending);
        assert_eq!(ItemState::from_quantities(3, 10), ItemState::InProgress);
        assert_eq!(ItemState::from_quantities(10, 10), ItemState::Completed);
    }

    #[test]
    fn partial_progress_moves_item_to_in_progress() {
        let mut item = test_item(10);
        let new_processed = item.check_progress(4).unwrap();
        item.record_progress(new_processed, None, test_user_id(), Utc::now());

        assert_eq!(item.processed, 4);
        assert_eq!(item.state, ItemState::InProgress);
        assert!(item.processed_by.is_some());
        assert!(item.processed_at.is_some());
    }

    #[test]
    fn exact_fulfillment_completes_item() {
        let mut item = test_item(5);
        let new_processed = item.check_progress(5).unwrap();
        item.record_progress(new_processed, None, test_user_id(), Utc::now());

        assert_eq!(item.state, ItemState::Completed);
        assert_eq!(item.remaining(), 0);
    }

    #[test]
    fn over_receipt_is_rejected() {
        let mut item = test_item(10);
        let new_processed = item.check_progress(7).unwrap();
        item.record_progress(new_processed, None, test_user_id(), Utc::now());

        let err = item.check_progress(4).unwrap_err();
        match err {
            DomainError::Validation(msg) if msg.contains("would exceed demanded") => {}
            other => panic!("expected validation error for over-receipt, got {other:?}"),
        }
        // Rejected delta leaves the item untouched.
        assert_eq!(item.processed, 7);
    }

    #[test]
    fn zero_delta_is_rejected() {
        let item = test_item(10);
        let err = item.check_progress(0).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn cancelled_item_rejects_further_progress() {
        let mut item = test_item(10);
        let new_processed = item.check_progress(3).unwrap();
        item.record_progress(new_processed, None, test_user_id(), Utc::now());
        item.force_cancel();

        assert_eq!(item.state, ItemState::Cancelled);
        assert_eq!(item.processed, 3);

        let err = item.check_progress(1).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn destination_override_sticks() {
        let mut item = test_item(10);
        let dock = LocationId::new(AggregateId::new());
        let new_processed = item.check_progress(2).unwrap();
        item.record_progress(new_processed, Some(dock), test_user_id(), Utc::now());

        assert_eq!(item.destination_location, Some(dock));

        // No override on the next delta keeps the previous destination.
        let new_processed = item.check_progress(2).unwrap();
        item.record_progress(new_processed, None, test_user_id(), Utc::now());
        assert_eq!(item.destination_location, Some(dock));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Conservation: processed never decreases and never exceeds demand,
        /// across any sequence of accepted and rejected deltas.
        #[test]
        fn prop_processed_is_monotonic_and_bounded(
            demanded in 1u64..1_000,
            deltas in prop::collection::vec(0u64..200, 1..40),
        ) {
            let mut item = test_item(demanded);
            let user = test_user_id();
            let mut previous = item.processed;

            for delta in deltas {
                match item.check_progress(delta) {
                    Ok(new_processed) => {
                        item.record_progress(new_processed, None, user, Utc::now());
                    }
                    Err(_) => {
                        // Rejected deltas must not mutate anything.
                        prop_assert_eq!(item.processed, previous);
                    }
                }
                prop_assert!(item.processed >= previous);
                prop_assert!(item.processed <= item.demanded);
                prop_assert_eq!(
                    item.state,
                    ItemState::from_quantities(item.processed, item.demanded)
                );
                previous = item.processed;
            }
        }

        /// A full fill always lands exactly on demand and completes the item.
        #[test]
        fn prop_exact_fill_completes(demanded in 1u64..500) {
            let mut item = test_item(demanded);
            let user = test_user_id();

            let new_processed = item.check_progress(demanded).unwrap();
            item.record_progress(new_processed, None, user, Utc::now());

            prop_assert_eq!(item.processed, demanded);
            prop_assert_eq!(item.state, ItemState::Completed);
            prop_assert!(item.check_progress(1).is_err());
        }
    }
}
