//! Houseboat catalog entries and their deck plans.
//!
//! A deck plan is a list of decks, each holding positioned items (cabins,
//! lounges, restricted areas). Only cabins can be held or booked; the
//! functions below are the single place where a cabin's status changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow};
use std::collections::HashSet;
use validator::Validate;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CabinStatus {
    Available,
    Booked,
    Held,
    NotBookable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeckItemKind {
    Cabin,
    Lounge,
    Restricted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeckItem {
    pub id: String,
    pub kind: DeckItemKind,
    pub label: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub status: CabinStatus,
    #[serde(default)]
    pub capacity: Option<i32>,
    #[serde(default)]
    pub held_by: Option<i64>,
    #[serde(default)]
    pub held_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub booked_by: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deck {
    pub name: String,
    pub level: i32,
    pub items: Vec<DeckItem>,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum DeckPlanError {
    #[error("deck item '{0}' not found")]
    ItemNotFound(String),
    #[error("deck item '{0}' is not a bookable cabin")]
    NotBookable(String),
    #[error("cabin '{id}' is {status:?}")]
    Unavailable { id: String, status: CabinStatus },
    #[error("cabin '{0}' is held by another guest")]
    HeldByOther(String),
    #[error("hold on cabin '{0}' has expired")]
    HoldExpired(String),
    #[error("cabin '{0}' is not held by you")]
    NotHolder(String),
    #[error("duplicate deck item id '{0}'")]
    DuplicateId(String),
    #[error("restricted area '{0}' must be not_bookable")]
    RestrictedBookable(String),
    #[error("deck item '{0}' has invalid geometry")]
    InvalidGeometry(String),
    #[error("cabin '{0}' can only be held by a guest")]
    HoldNotSettable(String),
}

impl From<DeckPlanError> for AppError {
    fn from(err: DeckPlanError) -> Self {
        let message = err.to_string();
        match err {
            DeckPlanError::ItemNotFound(_) => AppError::NotFound(message),
            DeckPlanError::Unavailable { .. } | DeckPlanError::HeldByOther(_) => {
                AppError::conflict("CABIN_UNAVAILABLE", message)
            }
            DeckPlanError::HoldExpired(_) => AppError::conflict("HOLD_EXPIRED", message),
            DeckPlanError::NotHolder(_) => AppError::conflict("CABIN_NOT_HELD", message),
            DeckPlanError::NotBookable(_)
            | DeckPlanError::DuplicateId(_)
            | DeckPlanError::RestrictedBookable(_)
            | DeckPlanError::InvalidGeometry(_)
            | DeckPlanError::HoldNotSettable(_) => AppError::BadRequest(message),
        }
    }
}

/// Structural checks applied when an admin saves a deck plan.
pub fn validate_deck_plans(decks: &[Deck]) -> Result<(), DeckPlanError> {
    let mut ids = HashSet::new();
    for item in decks.iter().flat_map(|d| d.items.iter()) {
        if !ids.insert(item.id.as_str()) {
            return Err(DeckPlanError::DuplicateId(item.id.clone()));
        }
        if item.kind == DeckItemKind::Restricted && item.status != CabinStatus::NotBookable {
            return Err(DeckPlanError::RestrictedBookable(item.id.clone()));
        }
        let finite = [item.x, item.y, item.width, item.height].iter().all(|v| v.is_finite());
        if !finite || item.width <= 0.0 || item.height <= 0.0 {
            return Err(DeckPlanError::InvalidGeometry(item.id.clone()));
        }
    }
    Ok(())
}

fn find_item_mut<'a>(decks: &'a mut [Deck], item_id: &str) -> Result<&'a mut DeckItem, DeckPlanError> {
    decks
        .iter_mut()
        .flat_map(|d| d.items.iter_mut())
        .find(|item| item.id == item_id)
        .ok_or_else(|| DeckPlanError::ItemNotFound(item_id.to_string()))
}

fn bookable_cabin<'a>(decks: &'a mut [Deck], item_id: &str) -> Result<&'a mut DeckItem, DeckPlanError> {
    let item = find_item_mut(decks, item_id)?;
    if item.kind != DeckItemKind::Cabin {
        return Err(DeckPlanError::NotBookable(item_id.to_string()));
    }
    Ok(item)
}

fn clear_hold(item: &mut DeckItem) {
    item.held_by = None;
    item.held_until = None;
}

fn hold_is_live(item: &DeckItem, now: DateTime<Utc>) -> bool {
    item.status == CabinStatus::Held && item.held_until.is_some_and(|until| until > now)
}

/// available -> held. The holder may renew an existing live hold.
pub fn hold_cabin(
    decks: &mut [Deck],
    item_id: &str,
    user_id: i64,
    now: DateTime<Utc>,
    until: DateTime<Utc>,
) -> Result<DeckItem, DeckPlanError> {
    let item = bookable_cabin(decks, item_id)?;
    match item.status {
        CabinStatus::Available => {}
        CabinStatus::Held if !hold_is_live(item, now) => {}
        CabinStatus::Held if item.held_by == Some(user_id) => {}
        CabinStatus::Held => return Err(DeckPlanError::HeldByOther(item_id.to_string())),
        status => return Err(DeckPlanError::Unavailable { id: item_id.to_string(), status }),
    }
    item.status = CabinStatus::Held;
    item.held_by = Some(user_id);
    item.held_until = Some(until);
    Ok(item.clone())
}

/// held -> available, by the holder only.
pub fn release_cabin(decks: &mut [Deck], item_id: &str, user_id: i64) -> Result<DeckItem, DeckPlanError> {
    let item = bookable_cabin(decks, item_id)?;
    if item.status != CabinStatus::Held || item.held_by != Some(user_id) {
        return Err(DeckPlanError::NotHolder(item_id.to_string()));
    }
    item.status = CabinStatus::Available;
    clear_hold(item);
    Ok(item.clone())
}

/// held -> booked, by the holder while the hold is live.
pub fn book_cabin(
    decks: &mut [Deck],
    item_id: &str,
    user_id: i64,
    now: DateTime<Utc>,
) -> Result<DeckItem, DeckPlanError> {
    let item = bookable_cabin(decks, item_id)?;
    if item.status != CabinStatus::Held || item.held_by != Some(user_id) {
        return Err(DeckPlanError::NotHolder(item_id.to_string()));
    }
    if !hold_is_live(item, now) {
        return Err(DeckPlanError::HoldExpired(item_id.to_string()));
    }
    item.status = CabinStatus::Booked;
    item.booked_by = Some(user_id);
    clear_hold(item);
    Ok(item.clone())
}

/// Admin override. Cabins accept every status except `held`, which needs a
/// holder and an expiry; other items only accept `not_bookable`
/// (restricted) or `available`/`not_bookable` (lounges).
pub fn set_item_status(
    decks: &mut [Deck],
    item_id: &str,
    status: CabinStatus,
) -> Result<DeckItem, DeckPlanError> {
    let item = find_item_mut(decks, item_id)?;
    if status == CabinStatus::Held {
        return Err(DeckPlanError::HoldNotSettable(item_id.to_string()));
    }
    let allowed = match item.kind {
        DeckItemKind::Cabin => true,
        DeckItemKind::Lounge => matches!(status, CabinStatus::Available | CabinStatus::NotBookable),
        DeckItemKind::Restricted => status == CabinStatus::NotBookable,
    };
    if !allowed {
        return Err(DeckPlanError::NotBookable(item_id.to_string()));
    }
    item.status = status;
    clear_hold(item);
    if status != CabinStatus::Booked {
        item.booked_by = None;
    }
    Ok(item.clone())
}

/// Returns every expired hold to `available`; yields the released ids.
pub fn release_expired_holds(decks: &mut [Deck], now: DateTime<Utc>) -> Vec<String> {
    let mut released = Vec::new();
    for item in decks.iter_mut().flat_map(|d| d.items.iter_mut()) {
        if item.status == CabinStatus::Held && !hold_is_live(item, now) {
            item.status = CabinStatus::Available;
            clear_hold(item);
            released.push(item.id.clone());
        }
    }
    released
}

// --- Persistence ---

#[derive(Debug, Clone, FromRow)]
pub struct HouseboatRow {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub location: String,
    pub price_per_night: f64,
    pub deck_plans: Json<Vec<Deck>>,
    pub is_active: bool,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const HOUSEBOAT_COLUMNS: &str = "id, name, description, location, price_per_night, deck_plans, \
     is_active, version, created_at, updated_at";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Houseboat {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub location: String,
    pub price_per_night: f64,
    pub deck_plans: Vec<Deck>,
    pub is_active: bool,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<HouseboatRow> for Houseboat {
    fn from(row: HouseboatRow) -> Self {
        Houseboat {
            id: row.id,
            name: row.name,
            description: row.description,
            location: row.location,
            price_per_night: row.price_per_night,
            deck_plans: row.deck_plans.0,
            is_active: row.is_active,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct HouseboatInput {
    #[validate(length(min = 1, max = 120))]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub location: String,
    #[validate(range(min = 0.0))]
    pub price_per_night: f64,
    #[serde(default)]
    pub deck_plans: Vec<Deck>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    /// Required on update; ignored on create.
    pub version: Option<i32>,
}

fn default_active() -> bool {
    true
}
