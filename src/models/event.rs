use chrono::{DateTime, Utc};
use std::fmt::Display;

use super::ActorKey;

/// Interaction-logging source the feed follows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceCollection {
    /// Product detail views with dwell time
    ProductViews,
    /// Storefront search queries
    Searches,
    /// Cart add/update/remove
    CartMutations,
    /// Completed orders, only when the backend logs them
    Orders,
}

impl SourceCollection {
    pub const ALL: [SourceCollection; 4] = [
        SourceCollection::ProductViews,
        SourceCollection::Searches,
        SourceCollection::CartMutations,
        SourceCollection::Orders,
    ];

    /// Backing table name
    pub fn table(&self) -> &'static str {
        match self {
            SourceCollection::ProductViews => "product_tracks",
            SourceCollection::Searches => "search_tracks",
            SourceCollection::CartMutations => "cart_tracks",
            SourceCollection::Orders => "order_tracks",
        }
    }

    /// Notification channel raised by the table's insert trigger
    pub fn channel(&self) -> String {
        format!("tracking_feed_{}", self.table())
    }
}

impl Display for SourceCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.table())
    }
}

/// Kind of change a feed notification describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationType {
    Insert,
    Update,
    Replace,
    Delete,
}

impl OperationType {
    pub fn is_insert(&self) -> bool {
        matches!(self, OperationType::Insert)
    }
}

/// Action recorded on a cart tracking row
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CartAction {
    Add,
    Update,
    Remove,
    Other(String),
}

impl From<&str> for CartAction {
    fn from(value: &str) -> Self {
        match value {
            "add" => CartAction::Add,
            "update" => CartAction::Update,
            "remove" => CartAction::Remove,
            other => CartAction::Other(other.to_string()),
        }
    }
}

/// Interaction observed on the feed
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedEvent {
    pub source: SourceCollection,
    pub operation: OperationType,
    pub actor_key: ActorKey,
    pub item_id: Option<String>,
    pub action: Option<CartAction>,
    pub dwell_seconds: Option<f64>,
    pub observed_at: DateTime<Utc>,
}

impl TrackedEvent {
    /// Builds an insert event from a raw tracking row.
    ///
    /// Blank product ids are treated as absent so they can never create a score entry.
    pub fn from_row(source: SourceCollection, row: TrackingRow) -> Self {
        let actor_key = ActorKey::resolve(row.session_id.as_deref(), row.user_id.as_deref());
        let item_id = row
            .product_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());

        Self {
            source,
            operation: OperationType::Insert,
            actor_key,
            item_id,
            action: row.action.as_deref().map(CartAction::from),
            dwell_seconds: row.view_duration,
            observed_at: row.created_at,
        }
    }
}

/// Row shape shared by every tracking table
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct TrackingRow {
    pub id: i64,
    /// Id of the transaction that inserted the row
    pub xact_id: i64,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub product_id: Option<String>,
    pub action: Option<String>,
    pub view_duration: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// Cursor into one source: the inserting transaction, then the row id within it.
///
/// Row ids alone are not safe to resume from because concurrent writers commit them
/// out of order. Transactions below the oldest one still running are all finished,
/// so ordering by `(xact_id, row_id)` and only reading below that horizon never lets
/// a late commit land behind the cursor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FeedPosition {
    pub xact_id: i64,
    pub row_id: i64,
}

impl FeedPosition {
    pub fn new(xact_id: i64, row_id: i64) -> Self {
        Self { xact_id, row_id }
    }
}

impl Display for FeedPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.xact_id, self.row_id)
    }
}

/// A feed event paired with its durable position in the source
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEntry {
    pub position: FeedPosition,
    pub event: TrackedEvent,
}
