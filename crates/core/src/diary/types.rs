use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::serde::{
    deserialize_optional_string, deserialize_optional_timestamp, deserialize_timestamp_patch,
};

/// A stored enum column held an unknown value.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Unknown {kind}: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

/// Self-reported gender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Gender {
    Male,
    Female,
    Diverse,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "MALE",
            Gender::Female => "FEMALE",
            Gender::Diverse => "DIVERSE",
        }
    }
}

impl FromStr for Gender {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MALE" => Ok(Gender::Male),
            "FEMALE" => Ok(Gender::Female),
            "DIVERSE" => Ok(Gender::Diverse),
            _ => Err(ParseEnumError {
                kind: "gender",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The slot of the day a meal belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MealType {
    Breakfast,
    Lunch,
    Dinner,
    Snack,
}

impl MealType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MealType::Breakfast => "BREAKFAST",
            MealType::Lunch => "LUNCH",
            MealType::Dinner => "DINNER",
            MealType::Snack => "SNACK",
        }
    }
}

impl FromStr for MealType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BREAKFAST" => Ok(MealType::Breakfast),
            "LUNCH" => Ok(MealType::Lunch),
            "DINNER" => Ok(MealType::Dinner),
            "SNACK" => Ok(MealType::Snack),
            _ => Err(ParseEnumError {
                kind: "meal type",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for MealType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Users
// ============================================================================

/// A diary owner.
///
/// `guid` is the identifier client devices use to refer to themselves; `id`
/// is internal and never leaves the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub guid: String,
    pub gender: Option<Gender>,
    pub birth_year: Option<i32>,
    pub last_backup_timestamp: Option<DateTime<Utc>>,
    pub email: Option<String>,
    pub google_id: Option<String>,
    pub username: Option<String>,
    #[serde(skip_serializing, default)]
    pub password_hash: Option<String>,
    pub is_admin: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl User {
    /// Whether the user can log in with username and password.
    pub fn has_credentials(&self) -> bool {
        has_credentials(self.username.as_deref(), self.password_hash.as_deref())
    }
}

fn has_credentials(username: Option<&str>, password_hash: Option<&str>) -> bool {
    username.is_some_and(|u| !u.is_empty()) && password_hash.is_some_and(|p| !p.is_empty())
}

/// Input for creating a user, or for merging profile data into an existing
/// user with the same guid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    #[serde(default, deserialize_with = "deserialize_optional_string")]
    pub guid: Option<String>,
    #[serde(default)]
    pub gender: Option<Gender>,
    #[serde(default)]
    pub birth_year: Option<i32>,
    #[serde(default, deserialize_with = "deserialize_optional_string")]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_string")]
    pub google_id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_string")]
    pub username: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_string")]
    pub password_hash: Option<String>,
    #[serde(default)]
    pub is_admin: Option<bool>,
    /// `None` keeps the stored value, `Some(None)` clears it.
    #[serde(default, deserialize_with = "deserialize_timestamp_patch")]
    pub last_backup_timestamp: Option<Option<DateTime<Utc>>>,
}

impl NewUser {
    pub fn with_guid(guid: impl Into<String>) -> Self {
        Self {
            guid: Some(guid.into()),
            ..Default::default()
        }
    }

    pub fn has_credentials(&self) -> bool {
        has_credentials(self.username.as_deref(), self.password_hash.as_deref())
    }

    /// Whether this input carries profile fields worth merging into an
    /// existing user.
    pub fn has_profile_changes(&self) -> bool {
        self.gender.is_some()
            || self.birth_year.is_some()
            || self.email.is_some()
            || self.last_backup_timestamp.is_some()
    }

    /// Decides the admin flag for a brand-new user.
    ///
    /// Users without username and password are never admins. For users with
    /// credentials an explicit flag wins; otherwise the first credentialed
    /// user becomes admin.
    pub fn resolve_admin(&self, credentialed_user_exists: bool) -> bool {
        if !self.has_credentials() {
            return false;
        }
        self.is_admin.unwrap_or(!credentialed_user_exists)
    }
}

/// Profile changes addressed by guid. Absent fields keep their value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserUpdate {
    #[serde(default)]
    pub gender: Option<Gender>,
    #[serde(default)]
    pub birth_year: Option<i32>,
    /// `None` keeps the stored value, `Some(None)` clears it.
    #[serde(default, deserialize_with = "deserialize_timestamp_patch")]
    pub last_backup_timestamp: Option<Option<DateTime<Utc>>>,
}

// ============================================================================
// Readings
// ============================================================================

/// A uric-acid measurement in mg/dL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    pub id: String,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub normal: bool,
    pub much_meat: bool,
    pub much_sport: bool,
    pub much_sugar: bool,
    pub much_alcohol: bool,
    pub fasten: bool,
    pub gout_attack: bool,
    pub notes: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewReading {
    #[serde(default, deserialize_with = "deserialize_optional_string")]
    pub id: Option<String>,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    #[serde(default)]
    pub normal: bool,
    #[serde(default)]
    pub much_meat: bool,
    #[serde(default)]
    pub much_sport: bool,
    #[serde(default)]
    pub much_sugar: bool,
    #[serde(default)]
    pub much_alcohol: bool,
    #[serde(default)]
    pub fasten: bool,
    #[serde(default)]
    pub gout_attack: bool,
    #[serde(default, deserialize_with = "deserialize_optional_string")]
    pub notes: Option<String>,
    /// Client-side modification time, used for last-write-wins.
    #[serde(default, deserialize_with = "deserialize_optional_timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl NewReading {
    pub fn new(user_id: impl Into<String>, timestamp: DateTime<Utc>, value: f64) -> Self {
        Self {
            id: None,
            user_id: user_id.into(),
            timestamp,
            value,
            normal: false,
            much_meat: false,
            much_sport: false,
            much_sugar: false,
            much_alcohol: false,
            fasten: false,
            gout_attack: false,
            notes: None,
            updated_at: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_updated_at(mut self, updated_at: DateTime<Utc>) -> Self {
        self.updated_at = Some(updated_at);
        self
    }
}

/// Aggregates over a user's readings in a trailing window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingStats {
    pub count: i64,
    pub average: f64,
    pub min: f64,
    pub max: f64,
    pub gout_attacks: i64,
}

impl ReadingStats {
    /// Builds stats from raw aggregates, rounding to two decimals and
    /// treating missing aggregates (empty window) as zero.
    pub fn from_aggregates(
        count: i64,
        average: Option<f64>,
        min: Option<f64>,
        max: Option<f64>,
        gout_attacks: Option<i64>,
    ) -> Self {
        Self {
            count,
            average: average.map(|v| round_to(v, 2)).unwrap_or(0.0),
            min: min.map(|v| round_to(v, 2)).unwrap_or(0.0),
            max: max.map(|v| round_to(v, 2)).unwrap_or(0.0),
            gout_attacks: gout_attacks.unwrap_or(0),
        }
    }
}

// ============================================================================
// Meals
// ============================================================================

/// One food within a meal. Replaced wholesale whenever its meal changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MealComponent {
    pub id: String,
    pub meal_id: String,
    pub food_item_name: String,
    pub estimated_weight: i64,
    pub purin: i64,
    pub uric_acid: i64,
    pub calories: i64,
    pub protein: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meal {
    pub id: String,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub meal_type: MealType,
    pub name: Option<String>,
    pub total_purin: i64,
    pub total_uric_acid: i64,
    pub total_calories: i64,
    pub total_protein: f64,
    pub thumbnail_path: Option<String>,
    pub components: Vec<MealComponent>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMealComponent {
    #[serde(default, deserialize_with = "deserialize_optional_string")]
    pub id: Option<String>,
    pub food_item_name: String,
    #[serde(default)]
    pub estimated_weight: i64,
    #[serde(default)]
    pub purin: i64,
    #[serde(default)]
    pub uric_acid: i64,
    #[serde(default)]
    pub calories: i64,
    #[serde(default)]
    pub protein: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMeal {
    #[serde(default, deserialize_with = "deserialize_optional_string")]
    pub id: Option<String>,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub meal_type: MealType,
    #[serde(default, deserialize_with = "deserialize_optional_string")]
    pub name: Option<String>,
    #[serde(default)]
    pub total_purin: i64,
    #[serde(default)]
    pub total_uric_acid: i64,
    #[serde(default)]
    pub total_calories: i64,
    #[serde(default)]
    pub total_protein: f64,
    #[serde(default, deserialize_with = "deserialize_optional_string")]
    pub thumbnail_path: Option<String>,
    #[serde(default)]
    pub components: Vec<NewMealComponent>,
    #[serde(default, deserialize_with = "deserialize_optional_timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl NewMeal {
    pub fn new(user_id: impl Into<String>, timestamp: DateTime<Utc>, meal_type: MealType) -> Self {
        Self {
            id: None,
            user_id: user_id.into(),
            timestamp,
            meal_type,
            name: None,
            total_purin: 0,
            total_uric_acid: 0,
            total_calories: 0,
            total_protein: 0.0,
            thumbnail_path: None,
            components: Vec::new(),
            updated_at: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_updated_at(mut self, updated_at: DateTime<Utc>) -> Self {
        self.updated_at = Some(updated_at);
        self
    }

    pub fn with_component(mut self, component: NewMealComponent) -> Self {
        self.components.push(component);
        self
    }
}

/// Aggregates over a user's meals in a trailing window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DietStats {
    pub meal_count: i64,
    pub avg_purin: i64,
    pub avg_calories: i64,
    pub avg_protein: f64,
}

impl DietStats {
    /// Purine and calorie averages round to whole numbers, protein to two
    /// decimals.
    pub fn from_aggregates(
        meal_count: i64,
        avg_purin: Option<f64>,
        avg_calories: Option<f64>,
        avg_protein: Option<f64>,
    ) -> Self {
        Self {
            meal_count,
            avg_purin: avg_purin.map(|v| v.round() as i64).unwrap_or(0),
            avg_calories: avg_calories.map(|v| v.round() as i64).unwrap_or(0),
            avg_protein: avg_protein.map(|v| round_to(v, 2)).unwrap_or(0.0),
        }
    }
}

// ============================================================================
// Food items
// ============================================================================

/// A user's food catalogue entry. `(user_id, name)` is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FoodItem {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub purin_per_100g: i64,
    pub uric_acid_per_100g: i64,
    pub calories_per_100g: i64,
    pub protein_percentage: f64,
    pub category: String,
    pub image_path: Option<String>,
    pub thumbnail_path: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFoodItem {
    #[serde(default, deserialize_with = "deserialize_optional_string")]
    pub id: Option<String>,
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub purin_per_100g: i64,
    #[serde(default)]
    pub uric_acid_per_100g: i64,
    #[serde(default)]
    pub calories_per_100g: i64,
    #[serde(default)]
    pub protein_percentage: f64,
    pub category: String,
    #[serde(default, deserialize_with = "deserialize_optional_string")]
    pub image_path: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_string")]
    pub thumbnail_path: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl NewFoodItem {
    pub fn new(
        user_id: impl Into<String>,
        name: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            user_id: user_id.into(),
            name: name.into(),
            purin_per_100g: 0,
            uric_acid_per_100g: 0,
            calories_per_100g: 0,
            protein_percentage: 0.0,
            category: category.into(),
            image_path: None,
            thumbnail_path: None,
            updated_at: None,
        }
    }

    pub fn with_updated_at(mut self, updated_at: DateTime<Utc>) -> Self {
        self.updated_at = Some(updated_at);
        self
    }
}

// ============================================================================
// Analysis results
// ============================================================================

/// Stored output of an analysis run over a window of a user's data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub id: String,
    pub user_id: String,
    pub analysis_date: DateTime<Utc>,
    pub data_period_start: DateTime<Utc>,
    pub data_period_end: DateTime<Utc>,
    pub insights: serde_json::Value,
    pub recommendations: serde_json::Value,
    pub confidence_score: Option<f64>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAnalysisResult {
    #[serde(default, deserialize_with = "deserialize_optional_string")]
    pub id: Option<String>,
    pub user_id: String,
    pub analysis_date: DateTime<Utc>,
    pub data_period_start: DateTime<Utc>,
    pub data_period_end: DateTime<Utc>,
    #[serde(default)]
    pub insights: serde_json::Value,
    #[serde(default)]
    pub recommendations: serde_json::Value,
    #[serde(default)]
    pub confidence_score: Option<f64>,
}

/// Rounds half away from zero to `places` decimals.
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
