use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow};
use validator::{Validate, ValidationError};

use crate::error::AppError;
use crate::models::booking::{parse_stored, BookingStatus, PaymentStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ItineraryDay {
    #[validate(range(min = 1))]
    pub day: i32,
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub activities: Vec<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct PackageRow {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub price: f64,
    pub duration_days: i32,
    pub itinerary: Json<Vec<ItineraryDay>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const PACKAGE_COLUMNS: &str =
    "id, title, description, price, duration_days, itinerary, is_active, created_at, updated_at";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub price: f64,
    pub duration_days: i32,
    pub itinerary: Vec<ItineraryDay>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<PackageRow> for Package {
    fn from(row: PackageRow) -> Self {
        Package {
            id: row.id,
            title: row.title,
            description: row.description,
            price: row.price,
            duration_days: row.duration_days,
            itinerary: row.itinerary.0,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
#[validate(schema(function = "validate_package"))]
pub struct PackageInput {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[validate(range(min = 0.0))]
    pub price: f64,
    pub duration_days: Option<i32>,
    #[validate(length(min = 1), nested)]
    pub itinerary: Vec<ItineraryDay>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl PackageInput {
    pub fn duration(&self) -> i32 {
        self.duration_days.unwrap_or(self.itinerary.len() as i32)
    }
}

fn validate_package(input: &PackageInput) -> Result<(), ValidationError> {
    check_itinerary(&input.itinerary, input.duration_days)
        .map_err(|msg| ValidationError::new("itinerary").with_message(msg.into()))
}

/// Itinerary days must be numbered 1..=n in order, and match the declared
/// duration when one is given.
pub fn check_itinerary(days: &[ItineraryDay], duration_days: Option<i32>) -> Result<(), String> {
    for (index, day) in days.iter().enumerate() {
        let expected = index as i32 + 1;
        if day.day != expected {
            return Err(format!("itinerary day {} found where day {} was expected", day.day, expected));
        }
    }
    if let Some(duration) = duration_days {
        if duration != days.len() as i32 {
            return Err(format!(
                "durationDays is {} but the itinerary has {} days",
                duration,
                days.len()
            ));
        }
    }
    Ok(())
}

// --- Package orders ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Guest {
    #[validate(length(min = 1, max = 120))]
    pub name: String,
    #[validate(range(min = 0, max = 120))]
    pub age: i32,
    #[serde(default)]
    pub gender: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    #[validate(length(min = 1, max = 120))]
    pub name: String,
    #[validate(length(min = 5, max = 20))]
    pub phone: String,
    #[validate(email)]
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyContact {
    #[validate(length(min = 1, max = 120))]
    pub name: String,
    #[validate(length(min = 5, max = 20))]
    pub phone: String,
    #[serde(default)]
    pub relation: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PackageOrderInput {
    pub travel_date: NaiveDate,
    #[validate(length(min = 1, max = 20), nested)]
    pub guests: Vec<Guest>,
    #[validate(nested)]
    pub contact: Contact,
    #[validate(nested)]
    pub emergency_contact: EmergencyContact,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

/// Order total: the package price for each guest.
pub fn order_amount(price: f64, guests: usize) -> f64 {
    price * guests as f64
}

#[derive(Debug, Clone, FromRow)]
pub struct PackageOrderRow {
    pub id: i64,
    pub package_id: i64,
    pub user_id: i64,
    pub travel_date: NaiveDate,
    pub guests: Json<Vec<Guest>>,
    pub contact: Json<Contact>,
    pub emergency_contact: Json<EmergencyContact>,
    pub amount: f64,
    pub booking_status: String,
    pub payment_status: String,
    pub advance_amount: Option<f64>,
    pub remaining_amount: Option<f64>,
    pub notes: Option<String>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const PACKAGE_ORDER_COLUMNS: &str = "id, package_id, user_id, travel_date, guests, contact, \
     emergency_contact, amount, booking_status, payment_status, advance_amount, remaining_amount, \
     notes, version, created_at, updated_at";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageOrder {
    pub id: i64,
    pub package_id: i64,
    pub user_id: i64,
    pub travel_date: NaiveDate,
    pub guests: Vec<Guest>,
    pub contact: Contact,
    pub emergency_contact: EmergencyContact,
    pub amount: f64,
    pub booking_status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub advance_amount: Option<f64>,
    pub remaining_amount: Option<f64>,
    pub notes: Option<String>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<PackageOrderRow> for PackageOrder {
    type Error = AppError;

    fn try_from(row: PackageOrderRow) -> Result<Self, Self::Error> {
        Ok(PackageOrder {
            booking_status: parse_stored(&row.booking_status)?,
            payment_status: parse_stored(&row.payment_status)?,
            id: row.id,
            package_id: row.package_id,
            user_id: row.user_id,
            travel_date: row.travel_date,
            guests: row.guests.0,
            contact: row.contact.0,
            emergency_contact: row.emergency_contact.0,
            amount: row.amount,
            advance_amount: row.advance_amount,
            remaining_amount: row.remaining_amount,
            notes: row.notes,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn day(n: i32) -> ItineraryDay {
        ItineraryDay {
            day: n,
            title: format!("Day {}", n),
            description: String::new(),
            activities: vec![],
        }
    }

    #[test]
    fn itinerary_must_be_consecutive() {
        assert!(check_itinerary(&[day(1), day(2), day(3)], Some(3)).is_ok());
        assert!(check_itinerary(&[day(1), day(3)], None).is_err());
        assert!(check_itinerary(&[day(2)], None).is_err());
        assert!(check_itinerary(&[day(1), day(2)], Some(3)).is_err());
    }

    #[test]
    fn package_input_validates_itinerary() {
        let input: PackageInput = serde_json::from_value(json!({
            "title": "Backwater Escape",
            "price": 12000.0,
            "itinerary": [
                { "day": 1, "title": "Arrive in Kochi" },
                { "day": 2, "title": "Houseboat cruise" }
            ]
        }))
        .unwrap();
        assert!(input.validate().is_ok());
        assert_eq!(input.duration(), 2);

        let input: PackageInput = serde_json::from_value(json!({
            "title": "Broken",
            "price": 100.0,
            "durationDays": 4,
            "itinerary": [{ "day": 1, "title": "Only day" }]
        }))
        .unwrap();
        assert!(input.validate().is_err());
    }

    #[test]
    fn order_input_validates_nested_contacts() {
        let mut value = json!({
            "travelDate": "2030-01-15",
            "guests": [{ "name": "Ravi", "age": 34 }, { "name": "Meera", "age": 31 }],
            "contact": { "name": "Ravi", "phone": "9847000000", "email": "ravi@example.com" },
            "emergencyContact": { "name": "Anil", "phone": "9847111111" }
        });
        let input: PackageOrderInput = serde_json::from_value(value.clone()).unwrap();
        assert!(input.validate().is_ok());
        assert_eq!(order_amount(15000.0, input.guests.len()), 30000.0);

        value["contact"]["email"] = json!("not-an-email");
        let input: PackageOrderInput = serde_json::from_value(value).unwrap();
        assert!(input.validate().is_err());
    }

    #[test]
    fn order_needs_at_least_one_guest() {
        let input: PackageOrderInput = serde_json::from_value(json!({
            "travelDate": "2030-01-15",
            "guests": [],
            "contact": { "name": "Ravi", "phone": "9847000000", "email": "ravi@example.com" },
            "emergencyContact": { "name": "Anil", "phone": "9847111111" }
        }))
        .unwrap();
        assert!(input.validate().is_err());
    }
}
