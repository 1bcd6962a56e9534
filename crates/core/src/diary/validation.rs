//! Input validation.
//!
//! Mirrors the schema's CHECK constraints so bad input is rejected before it
//! reaches a backend, with a message naming the offending field.

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::api_key::NewApiKey;
use super::types::{
    NewAnalysisResult, NewFoodItem, NewMeal, NewMealComponent, NewReading, NewUser, UserUpdate,
};

pub const MIN_READING: f64 = 0.0;
pub const MAX_READING: f64 = 20.0;
pub const MIN_BIRTH_YEAR: i32 = 1900;
pub const MAX_BIRTH_YEAR: i32 = 2100;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("{field} must not be negative, got {value}")]
    Negative { field: &'static str, value: f64 },
    #[error("{field} must not be empty")]
    Empty { field: &'static str },
    #[error("{start_field} must not be after {end_field}")]
    InvalidRange {
        start_field: &'static str,
        end_field: &'static str,
    },
    #[error("API key must grant at least one permission")]
    NoPermissions,
}

fn in_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ValidationError> {
    if value.is_finite() && value >= min && value <= max {
        Ok(())
    } else {
        Err(ValidationError::OutOfRange {
            field,
            value,
            min,
            max,
        })
    }
}

fn non_negative(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ValidationError::Negative { field, value })
    }
}

fn non_empty(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::Empty { field })
    } else {
        Ok(())
    }
}

fn ordered(
    start_field: &'static str,
    start: DateTime<Utc>,
    end_field: &'static str,
    end: DateTime<Utc>,
) -> Result<(), ValidationError> {
    if start <= end {
        Ok(())
    } else {
        Err(ValidationError::InvalidRange {
            start_field,
            end_field,
        })
    }
}

fn birth_year(year: Option<i32>) -> Result<(), ValidationError> {
    match year {
        Some(y) => in_range(
            "birthYear",
            f64::from(y),
            f64::from(MIN_BIRTH_YEAR),
            f64::from(MAX_BIRTH_YEAR),
        ),
        None => Ok(()),
    }
}

pub fn validate_new_user(user: &NewUser) -> Result<(), ValidationError> {
    if let Some(guid) = &user.guid {
        non_empty("guid", guid)?;
    }
    birth_year(user.birth_year)
}

pub fn validate_user_update(update: &UserUpdate) -> Result<(), ValidationError> {
    birth_year(update.birth_year)
}

pub fn validate_new_reading(reading: &NewReading) -> Result<(), ValidationError> {
    non_empty("userId", &reading.user_id)?;
    in_range("value", reading.value, MIN_READING, MAX_READING)
}

pub fn validate_new_meal_component(component: &NewMealComponent) -> Result<(), ValidationError> {
    non_empty("foodItemName", &component.food_item_name)?;
    non_negative("estimatedWeight", component.estimated_weight as f64)?;
    non_negative("purin", component.purin as f64)?;
    non_negative("uricAcid", component.uric_acid as f64)?;
    non_negative("calories", component.calories as f64)?;
    non_negative("protein", component.protein)
}

pub fn validate_new_meal(meal: &NewMeal) -> Result<(), ValidationError> {
    non_empty("userId", &meal.user_id)?;
    non_negative("totalPurin", meal.total_purin as f64)?;
    non_negative("totalUricAcid", meal.total_uric_acid as f64)?;
    non_negative("totalCalories", meal.total_calories as f64)?;
    non_negative("totalProtein", meal.total_protein)?;
    meal.components
        .iter()
        .try_for_each(validate_new_meal_component)
}

pub fn validate_new_food_item(item: &NewFoodItem) -> Result<(), ValidationError> {
    non_empty("userId", &item.user_id)?;
    non_empty("name", &item.name)?;
    non_empty("category", &item.category)?;
    non_negative("purinPer100g", item.purin_per_100g as f64)?;
    non_negative("uricAcidPer100g", item.uric_acid_per_100g as f64)?;
    non_negative("caloriesPer100g", item.calories_per_100g as f64)?;
    non_negative("proteinPercentage", item.protein_percentage)
}

pub fn validate_new_analysis(result: &NewAnalysisResult) -> Result<(), ValidationError> {
    non_empty("userId", &result.user_id)?;
    ordered(
        "dataPeriodStart",
        result.data_period_start,
        "dataPeriodEnd",
        result.data_period_end,
    )?;
    match result.confidence_score {
        Some(score) => in_range("confidenceScore", score, 0.0, 1.0),
        None => Ok(()),
    }
}

pub fn validate_new_api_key(key: &NewApiKey) -> Result<(), ValidationError> {
    non_empty("name", &key.name)?;
    if key.permissions.is_empty() {
        return Err(ValidationError::NoPermissions);
    }
    Ok(())
}

/// Checks an optional start/end filter pair.
pub fn validate_window(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Result<(), ValidationError> {
    match (start, end) {
        (Some(start), Some(end)) => ordered("startDate", start, "endDate", end),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diary::api_key::ApiKeyPermissions;
    use crate::diary::types::MealType;
    use chrono::{Duration, TimeZone};

    fn reading(value: f64) -> NewReading {
        NewReading::new("user-1", Utc::now(), value)
    }

    #[test]
    fn test_reading_bounds() {
        assert!(validate_new_reading(&reading(0.0)).is_ok());
        assert!(validate_new_reading(&reading(20.0)).is_ok());
        assert_eq!(
            validate_new_reading(&reading(20.5)),
            Err(ValidationError::OutOfRange {
                field: "value",
                value: 20.5,
                min: 0.0,
                max: 20.0
            })
        );
        assert!(validate_new_reading(&reading(-0.1)).is_err());
        assert!(validate_new_reading(&reading(f64::NAN)).is_err());
    }

    #[test]
    fn test_meal_rejects_negative_component() {
        let mut meal = NewMeal::new("user-1", Utc::now(), MealType::Lunch);
        meal.components.push(NewMealComponent {
            id: None,
            food_item_name: "Lentils".into(),
            estimated_weight: 150,
            purin: -1,
            uric_acid: 0,
            calories: 170,
            protein: 9.0,
        });
        assert_eq!(
            validate_new_meal(&meal),
            Err(ValidationError::Negative {
                field: "purin",
                value: -1.0
            })
        );
    }

    #[test]
    fn test_food_item_requires_name() {
        let item = NewFoodItem::new("user-1", "  ", "vegetables");
        assert_eq!(
            validate_new_food_item(&item),
            Err(ValidationError::Empty { field: "name" })
        );
    }

    #[test]
    fn test_birth_year_range() {
        let mut user = NewUser::with_guid("guid-1");
        user.birth_year = Some(1899);
        assert!(validate_new_user(&user).is_err());
        user.birth_year = Some(1975);
        assert!(validate_new_user(&user).is_ok());
    }

    #[test]
    fn test_analysis_confidence_and_period() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut result = NewAnalysisResult {
            id: None,
            user_id: "user-1".into(),
            analysis_date: start + Duration::days(31),
            data_period_start: start,
            data_period_end: start + Duration::days(30),
            insights: serde_json::json!([]),
            recommendations: serde_json::json!([]),
            confidence_score: Some(1.2),
        };
        assert!(validate_new_analysis(&result).is_err());

        result.confidence_score = Some(0.8);
        assert!(validate_new_analysis(&result).is_ok());

        result.data_period_end = start - Duration::days(1);
        assert_eq!(
            validate_new_analysis(&result),
            Err(ValidationError::InvalidRange {
                start_field: "dataPeriodStart",
                end_field: "dataPeriodEnd"
            })
        );
    }

    #[test]
    fn test_api_key_needs_permission() {
        let key = NewApiKey::new("importer", ApiKeyPermissions::default());
        assert_eq!(validate_new_api_key(&key), Err(ValidationError::NoPermissions));

        let key = NewApiKey::new(
            "importer",
            ApiKeyPermissions {
                can_read_own_meals: true,
                ..Default::default()
            },
        );
        assert!(validate_new_api_key(&key).is_ok());
    }

    #[test]
    fn test_window() {
        let now = Utc::now();
        assert!(validate_window(Some(now), Some(now)).is_ok());
        assert!(validate_window(Some(now), None).is_ok());
        assert!(validate_window(Some(now), Some(now - Duration::hours(1))).is_err());
    }
}
