//! Order lifecycle endpoints.
//!
//! Authorization is gated on the caller's role and id before any write.
//! Status changes go through the conditional updates in the order model;
//! a lost race comes back as `applied: false` together with the current
//! row so the client can reconcile without a second request.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use super::error::{ApiError, ValidationErrorBuilder};
use super::validation;
use crate::db::{NewOrder, Order, OrderStatus, Profile, Role};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub pickup_city: String,
    pub dropoff_city: String,
    pub miles: f64,
    pub price: f64,
    #[serde(default)]
    pub image_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListOrdersQuery {
    /// Filter on a single status (`posted`, `accepted`, `delivered`, `cancelled`)
    pub status: Option<String>,
    /// Caller-relative view: `current` (non-terminal) or `history` (terminal)
    pub scope: Option<String>,
}

/// Outcome of a status-changing request. `applied: false` means the
/// precondition no longer held (someone else won the race); `order` carries
/// the authoritative current row either way.
#[derive(Debug, Serialize)]
pub struct MutationResponse {
    pub applied: bool,
    pub order: Option<Order>,
}

fn is_linked(order: &Order, profile: &Profile) -> bool {
    order.created_by_user_id == profile.id
        || order.accepted_by_user_id.as_deref() == Some(profile.id.as_str())
}

async fn find_or_404(state: &AppState, id: &str) -> Result<Order, ApiError> {
    Order::find(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Order not found"))
}

/// Post a new order
///
/// POST /api/orders
pub async fn create_order(
    State(state): State<Arc<AppState>>,
    profile: Profile,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<Order>), ApiError> {
    if profile.role != Role::Customer {
        return Err(ApiError::forbidden("Only customers can post orders"));
    }

    let mut errors = ValidationErrorBuilder::new();
    if let Err(e) = validation::validate_required_text(&request.pickup_city, "Pickup city") {
        errors.add("pickup_city", e);
    }
    if let Err(e) = validation::validate_required_text(&request.dropoff_city, "Dropoff city") {
        errors.add("dropoff_city", e);
    }
    if let Err(e) = validation::validate_positive(request.miles, "Miles") {
        errors.add("miles", e);
    }
    if let Err(e) = validation::validate_positive(request.price, "Price") {
        errors.add("price", e);
    }
    if let Err(e) = validation::validate_image_url(&request.image_url) {
        errors.add("image_url", e);
    }
    errors.finish()?;

    let order = Order::insert(
        &state.db,
        NewOrder {
            pickup_city: request.pickup_city.trim().to_string(),
            dropoff_city: request.dropoff_city.trim().to_string(),
            miles: request.miles,
            price: request.price,
            created_by_user_id: profile.id.clone(),
            image_url: request.image_url.filter(|u| !u.is_empty()),
        },
    )
    .await?;

    info!(order = %order.id, customer = %profile.id, "Order posted");

    Ok((StatusCode::CREATED, Json(order)))
}

/// List orders, newest first
///
/// GET /api/orders?status=posted
/// GET /api/orders?scope=current|history
pub async fn list_orders(
    State(state): State<Arc<AppState>>,
    profile: Profile,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<Vec<Order>>, ApiError> {
    let status = match &query.status {
        Some(raw) => Some(
            raw.parse::<OrderStatus>()
                .map_err(|e| ApiError::bad_request(e))?,
        ),
        None => None,
    };

    let orders = match query.scope.as_deref() {
        Some("current") => Order::list_for_actor(&state.db, &profile, false).await?,
        Some("history") => Order::list_for_actor(&state.db, &profile, true).await?,
        Some(other) => {
            return Err(ApiError::bad_request(format!(
                "Unknown scope: {} (expected current or history)",
                other
            )))
        }
        None => match status {
            Some(status) => return Ok(Json(Order::list_by_status(&state.db, status).await?)),
            None => Order::list_all(&state.db).await?,
        },
    };

    // Scoped views can still narrow to one status
    let orders = match status {
        Some(status) => orders.into_iter().filter(|o| o.status == status).collect(),
        None => orders,
    };

    Ok(Json(orders))
}

/// Get a single order
///
/// GET /api/orders/:id
pub async fn get_order(
    State(state): State<Arc<AppState>>,
    _profile: Profile,
    Path(id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    Ok(Json(find_or_404(&state, &id).await?))
}

/// Accept a posted order. Exactly one of N concurrent carriers wins.
///
/// POST /api/orders/:id/accept
pub async fn accept_order(
    State(state): State<Arc<AppState>>,
    profile: Profile,
    Path(id): Path<String>,
) -> Result<Json<MutationResponse>, ApiError> {
    if profile.role != Role::Carrier {
        return Err(ApiError::forbidden("Only carriers can accept orders"));
    }
    find_or_404(&state, &id).await?;

    match Order::accept(&state.db, &id, &profile.id).await? {
        Some(order) => {
            info!(order = %id, carrier = %profile.id, "Order accepted");
            Ok(Json(MutationResponse {
                applied: true,
                order: Some(order),
            }))
        }
        None => {
            info!(order = %id, carrier = %profile.id, "Accept lost the race");
            Ok(Json(MutationResponse {
                applied: false,
                order: Order::find(&state.db, &id).await?,
            }))
        }
    }
}

/// Mark an accepted order delivered
///
/// POST /api/orders/:id/deliver
pub async fn deliver_order(
    State(state): State<Arc<AppState>>,
    profile: Profile,
    Path(id): Path<String>,
) -> Result<Json<MutationResponse>, ApiError> {
    let order = find_or_404(&state, &id).await?;
    if !is_linked(&order, &profile) {
        return Err(ApiError::forbidden("Order does not belong to you"));
    }

    match Order::deliver(&state.db, &id, &profile.id).await? {
        Some(order) => {
            info!(order = %id, actor = %profile.id, "Order delivered");
            Ok(Json(MutationResponse {
                applied: true,
                order: Some(order),
            }))
        }
        None => Ok(Json(MutationResponse {
            applied: false,
            order: Order::find(&state.db, &id).await?,
        })),
    }
}

/// Cancel an order (creating customer only)
///
/// POST /api/orders/:id/cancel
pub async fn cancel_order(
    State(state): State<Arc<AppState>>,
    profile: Profile,
    Path(id): Path<String>,
) -> Result<Json<MutationResponse>, ApiError> {
    let order = find_or_404(&state, &id).await?;
    if profile.role != Role::Customer || order.created_by_user_id != profile.id {
        return Err(ApiError::forbidden("Only the posting customer can cancel"));
    }

    match Order::cancel(&state.db, &id, &profile.id).await? {
        Some(order) => {
            info!(order = %id, customer = %profile.id, "Order cancelled");
            Ok(Json(MutationResponse {
                applied: true,
                order: Some(order),
            }))
        }
        None => Ok(Json(MutationResponse {
            applied: false,
            order: Order::find(&state.db, &id).await?,
        })),
    }
}

/// Return an accepted order to the feed. A carrier who already lost the
/// assignment gets `applied: false`, not an error.
///
/// POST /api/orders/:id/giveup
pub async fn give_up_order(
    State(state): State<Arc<AppState>>,
    profile: Profile,
    Path(id): Path<String>,
) -> Result<Json<MutationResponse>, ApiError> {
    if profile.role != Role::Carrier {
        return Err(ApiError::forbidden("Only carriers can give up orders"));
    }
    find_or_404(&state, &id).await?;

    match Order::give_up(&state.db, &id, &profile.id).await? {
        Some(order) => {
            info!(order = %id, carrier = %profile.id, "Order returned to feed");
            Ok(Json(MutationResponse {
                applied: true,
                order: Some(order),
            }))
        }
        None => {
            info!(order = %id, carrier = %profile.id, "Give-up did not apply");
            Ok(Json(MutationResponse {
                applied: false,
                order: Order::find(&state.db, &id).await?,
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn order(created_by: &str, accepted_by: Option<&str>) -> Order {
        let now = Utc::now().to_rfc3339();
        Order {
            id: "o1".to_string(),
            pickup_city: "Dallas, TX".to_string(),
            dropoff_city: "Houston, TX".to_string(),
            miles: 239.0,
            price: 400.0,
            status: if accepted_by.is_some() {
                OrderStatus::Accepted
            } else {
                OrderStatus::Posted
            },
            created_by_user_id: created_by.to_string(),
            accepted_by_user_id: accepted_by.map(str::to_string),
            image_url: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    fn profile(id: &str, role: Role) -> Profile {
        Profile {
            id: id.to_string(),
            email: format!("{}@example.com", id),
            name: id.to_string(),
            role,
            created_at: Utc::now().to_rfc3339(),
        }
    }

    #[test]
    fn linkage_covers_creator_and_assignee_only() {
        let order = order("cust1", Some("carrier1"));

        assert!(is_linked(&order, &profile("cust1", Role::Customer)));
        assert!(is_linked(&order, &profile("carrier1", Role::Carrier)));
        assert!(!is_linked(&order, &profile("carrier2", Role::Carrier)));
        assert!(!is_linked(&order, &profile("cust2", Role::Customer)));
    }
}
