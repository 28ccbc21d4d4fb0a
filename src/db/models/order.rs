//! Delivery order model and lifecycle queries.
//!
//! Every status-changing write is a single conditional UPDATE whose WHERE
//! clause carries the full precondition (current status, and for carrier
//! actions the current assignment). Zero rows affected means another actor
//! got there first; callers receive `None` and treat it as an expected
//! outcome, not a failure.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::user::{Profile, Role};
use crate::db::DbPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum OrderStatus {
    Posted,
    Accepted,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Posted => "posted",
            OrderStatus::Accepted => "accepted",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal orders take no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "posted" => Ok(OrderStatus::Posted),
            "accepted" => Ok(OrderStatus::Accepted),
            "delivered" => Ok(OrderStatus::Delivered),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(format!("Unknown order status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub id: String,
    pub pickup_city: String,
    pub dropoff_city: String,
    pub miles: f64,
    pub price: f64,
    pub status: OrderStatus,
    pub created_by_user_id: String,
    /// Set by `accept` only. Terminal rows keep it for history attribution.
    pub accepted_by_user_id: Option<String>,
    pub image_url: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Fields required to post a new order. Validation happens at the API
/// boundary before this is constructed.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub pickup_city: String,
    pub dropoff_city: String,
    pub miles: f64,
    pub price: f64,
    pub created_by_user_id: String,
    pub image_url: Option<String>,
}

impl Order {
    pub async fn find(pool: &DbPool, id: &str) -> sqlx::Result<Option<Order>> {
        sqlx::query_as("SELECT * FROM orders WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Insert a new order in the `posted` state.
    pub async fn insert(pool: &DbPool, new: NewOrder) -> sqlx::Result<Order> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO orders (id, pickup_city, dropoff_city, miles, price, status, \
             created_by_user_id, image_url, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, 'posted', ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&new.pickup_city)
        .bind(&new.dropoff_city)
        .bind(new.miles)
        .bind(new.price)
        .bind(&new.created_by_user_id)
        .bind(&new.image_url)
        .bind(&now)
        .bind(&now)
        .execute(pool)
        .await?;

        sqlx::query_as("SELECT * FROM orders WHERE id = ?")
            .bind(&id)
            .fetch_one(pool)
            .await
    }

    /// List orders in a given status, newest first.
    pub async fn list_by_status(pool: &DbPool, status: OrderStatus) -> sqlx::Result<Vec<Order>> {
        sqlx::query_as("SELECT * FROM orders WHERE status = ? ORDER BY created_at DESC")
            .bind(status)
            .fetch_all(pool)
            .await
    }

    /// List the caller's orders, newest first. Customers see orders they
    /// created, carriers orders they accepted; `terminal` selects the
    /// history view (delivered/cancelled) over the current view.
    pub async fn list_for_actor(
        pool: &DbPool,
        actor: &Profile,
        terminal: bool,
    ) -> sqlx::Result<Vec<Order>> {
        let column = match actor.role {
            Role::Customer => "created_by_user_id",
            Role::Carrier => "accepted_by_user_id",
        };
        let membership = if terminal { "IN" } else { "NOT IN" };
        let sql = format!(
            "SELECT * FROM orders WHERE {column} = ? \
             AND status {membership} ('delivered', 'cancelled') \
             ORDER BY created_at DESC"
        );

        sqlx::query_as(&sql).bind(&actor.id).fetch_all(pool).await
    }

    pub async fn list_all(pool: &DbPool) -> sqlx::Result<Vec<Order>> {
        sqlx::query_as("SELECT * FROM orders ORDER BY created_at DESC")
            .fetch_all(pool)
            .await
    }

    /// Atomically claim a posted order for a carrier. Exactly one of N
    /// concurrent callers observes a row update; the rest get `None`.
    pub async fn accept(
        pool: &DbPool,
        order_id: &str,
        carrier_id: &str,
    ) -> sqlx::Result<Option<Order>> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE orders SET status = 'accepted', accepted_by_user_id = ?, updated_at = ? \
             WHERE id = ? AND status = 'posted'",
        )
        .bind(carrier_id)
        .bind(&now)
        .bind(order_id)
        .execute(pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Self::find(pool, order_id).await
    }

    /// Mark an accepted order delivered. The actor must be the creating
    /// customer or the assigned carrier.
    pub async fn deliver(
        pool: &DbPool,
        order_id: &str,
        actor_id: &str,
    ) -> sqlx::Result<Option<Order>> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE orders SET status = 'delivered', updated_at = ? \
             WHERE id = ? AND status = 'accepted' \
             AND (created_by_user_id = ? OR accepted_by_user_id = ?)",
        )
        .bind(&now)
        .bind(order_id)
        .bind(actor_id)
        .bind(actor_id)
        .execute(pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Self::find(pool, order_id).await
    }

    /// Cancel an order. Only the creating customer may cancel, and only
    /// before delivery.
    pub async fn cancel(
        pool: &DbPool,
        order_id: &str,
        customer_id: &str,
    ) -> sqlx::Result<Option<Order>> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE orders SET status = 'cancelled', updated_at = ? \
             WHERE id = ? AND status IN ('posted', 'accepted') \
             AND created_by_user_id = ?",
        )
        .bind(&now)
        .bind(order_id)
        .bind(customer_id)
        .execute(pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Self::find(pool, order_id).await
    }

    /// Return an accepted order to the feed. Only applies while the order is
    /// still assigned to this carrier; a carrier who already lost the
    /// assignment gets `None`, not an error.
    pub async fn give_up(
        pool: &DbPool,
        order_id: &str,
        carrier_id: &str,
    ) -> sqlx::Result<Option<Order>> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE orders SET status = 'posted', accepted_by_user_id = NULL, updated_at = ? \
             WHERE id = ? AND status = 'accepted' AND accepted_by_user_id = ?",
        )
        .bind(&now)
        .bind(order_id)
        .bind(carrier_id)
        .execute(pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Self::find(pool, order_id).await
    }
}
