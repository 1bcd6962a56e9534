//! Row conversion functions.
//!
//! Pure functions turning backend-neutral rows into domain types, testable
//! without a database. Columns added by later schema versions are read with
//! the lenient getters so older rows still convert.

use goutdiary_core::diary::{
    AnalysisResult, ApiKey, ApiKeyPermissions, FoodItem, Gender, Meal, MealComponent, MealType,
    Reading, User,
};
use goutdiary_core::sql::Row;
use goutdiary_core::storage::Result;

// ============================================================================
// User conversions
// ============================================================================

pub fn row_to_user(row: &Row) -> Result<User> {
    let gender = row
        .opt_text("gender")?
        .map(|g| g.parse::<Gender>())
        .transpose()?;

    Ok(User {
        id: row.text("id")?,
        guid: row.text("guid")?,
        gender,
        birth_year: row
            .opt_int("birth_year")?
            .and_then(|y| i32::try_from(y).ok()),
        last_backup_timestamp: row.timestamp_if_present("last_backup_timestamp")?,
        email: row.opt_text("email")?,
        google_id: row.opt_text("google_id")?,
        username: row.opt_text("username")?,
        password_hash: row.opt_text("password_hash")?,
        is_admin: row.flag("is_admin")?,
        created_at: row.timestamp_if_present("created_at")?,
        updated_at: row.timestamp_if_present("updated_at")?,
    })
}

// ============================================================================
// Reading conversions
// ============================================================================

pub fn row_to_reading(row: &Row) -> Result<Reading> {
    Ok(Reading {
        id: row.text("id")?,
        user_id: row.text("user_id")?,
        timestamp: row.timestamp("timestamp")?,
        value: row.real("value")?,
        normal: row.flag("normal")?,
        much_meat: row.flag("much_meat")?,
        much_sport: row.flag("much_sport")?,
        much_sugar: row.flag("much_sugar")?,
        much_alcohol: row.flag("much_alcohol")?,
        fasten: row.flag("fasten")?,
        gout_attack: row.flag("gout_attack")?,
        notes: row.opt_text("notes")?,
        created_at: row.timestamp_if_present("created_at")?,
        updated_at: row.timestamp_if_present("updated_at")?,
    })
}

// ============================================================================
// Meal conversions
// ============================================================================

/// Converts a meal row. Components are loaded separately.
pub fn row_to_meal(row: &Row) -> Result<Meal> {
    let meal_type: MealType = row.text("meal_type")?.parse()?;

    Ok(Meal {
        id: row.text("id")?,
        user_id: row.text("user_id")?,
        timestamp: row.timestamp("timestamp")?,
        meal_type,
        name: row.opt_text("name")?,
        total_purin: row.opt_int("total_purin")?.unwrap_or(0),
        total_uric_acid: row.opt_int("total_uric_acid")?.unwrap_or(0),
        total_calories: row.opt_int("total_calories")?.unwrap_or(0),
        total_protein: row.opt_real("total_protein")?.unwrap_or(0.0),
        thumbnail_path: if row.has_column("thumbnail_path") {
            row.opt_text("thumbnail_path")?
        } else {
            None
        },
        components: Vec::new(),
        created_at: row.timestamp_if_present("created_at")?,
        updated_at: row.timestamp_if_present("updated_at")?,
    })
}

pub fn row_to_component(row: &Row) -> Result<MealComponent> {
    Ok(MealComponent {
        id: row.text("id")?,
        meal_id: row.text("meal_id")?,
        food_item_name: row.text("food_item_name")?,
        estimated_weight: row.opt_int("estimated_weight")?.unwrap_or(0),
        purin: row.opt_int("purin")?.unwrap_or(0),
        uric_acid: row.opt_int("uric_acid")?.unwrap_or(0),
        calories: row.opt_int("calories")?.unwrap_or(0),
        protein: row.opt_real("protein")?.unwrap_or(0.0),
    })
}

// ============================================================================
// Food item conversions
// ============================================================================

pub fn row_to_food_item(row: &Row) -> Result<FoodItem> {
    Ok(FoodItem {
        id: row.text("id")?,
        user_id: row.text("user_id")?,
        name: row.text("name")?,
        purin_per_100g: row.opt_int("purin_per_100g")?.unwrap_or(0),
        uric_acid_per_100g: row.opt_int("uric_acid_per_100g")?.unwrap_or(0),
        calories_per_100g: row.opt_int("calories_per_100g")?.unwrap_or(0),
        protein_percentage: row.opt_real("protein_percentage")?.unwrap_or(0.0),
        category: row.text("category")?,
        image_path: row.opt_text("image_path")?,
        thumbnail_path: row.opt_text("thumbnail_path")?,
        created_at: row.timestamp_if_present("created_at")?,
        updated_at: row.timestamp_if_present("updated_at")?,
    })
}

// ============================================================================
// API key conversions
// ============================================================================

pub fn row_to_api_key(row: &Row) -> Result<ApiKey> {
    let permissions = ApiKeyPermissions {
        can_read_own_uric_acid: row.flag("can_read_own_uric_acid")?,
        can_write_own_uric_acid: row.flag("can_write_own_uric_acid")?,
        can_read_own_meals: row.flag("can_read_own_meals")?,
        can_write_own_meals: row.flag("can_write_own_meals")?,
        can_read_all_uric_acid: row.flag("can_read_all_uric_acid")?,
        can_read_all_meals: row.flag("can_read_all_meals")?,
    };

    Ok(ApiKey {
        id: row.text("id")?,
        key_hash: row.text("key_hash")?,
        name: row.text("name")?,
        description: row.opt_text("description")?,
        permissions,
        created_by: row.opt_text("created_by")?,
        created_at: row.timestamp_if_present("created_at")?,
        last_used_at: row.timestamp_if_present("last_used_at")?,
        is_active: row.flag("is_active")?,
    })
}

// ============================================================================
// Analysis conversions
// ============================================================================

/// Converts an analysis row. Insights and recommendations are stored as
/// JSON text; NULL reads back as JSON `null`.
pub fn row_to_analysis(row: &Row) -> Result<AnalysisResult> {
    Ok(AnalysisResult {
        id: row.text("id")?,
        user_id: row.text("user_id")?,
        analysis_date: row.timestamp("analysis_date")?,
        data_period_start: row.timestamp("data_period_start")?,
        data_period_end: row.timestamp("data_period_end")?,
        insights: json_column(row, "insights")?,
        recommendations: json_column(row, "recommendations")?,
        confidence_score: row.opt_real("confidence_score")?,
        created_at: row.timestamp_if_present("created_at")?,
    })
}

fn json_column(row: &Row, column: &str) -> Result<serde_json::Value> {
    match row.opt_text(column)? {
        Some(text) if !text.trim().is_empty() => Ok(serde_json::from_str(&text)?),
        _ => Ok(serde_json::Value::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use goutdiary_core::sql::{SqlValue, ValueKind};
    use goutdiary_core::storage::RepositoryError;
    use serde_json::json;

    #[test]
    fn test_row_to_user_from_sqlite_spellings() {
        let row = Row::new()
            .with("id", "u1")
            .with("guid", "g1")
            .with("gender", "FEMALE")
            .with("birth_year", 1980i64)
            .with("last_backup_timestamp", SqlValue::Null(ValueKind::Timestamp))
            .with("email", "a@example.com")
            .with("google_id", SqlValue::Null(ValueKind::Text))
            .with("username", SqlValue::Null(ValueKind::Text))
            .with("password_hash", SqlValue::Null(ValueKind::Text))
            .with("is_admin", 1i64)
            .with("created_at", "2024-01-01 10:00:00")
            .with("updated_at", "2024-01-02T10:00:00.000Z");

        let user = row_to_user(&row).unwrap();

        assert_eq!(user.gender, Some(Gender::Female));
        assert_eq!(user.birth_year, Some(1980));
        assert!(user.is_admin);
        assert_eq!(
            user.created_at,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_row_to_reading_with_native_values() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 7, 0, 0).unwrap();
        let row = Row::new()
            .with("id", "r1")
            .with("user_id", "u1")
            .with("timestamp", ts)
            .with("value", 6.2)
            .with("normal", false)
            .with("gout_attack", true)
            .with("notes", SqlValue::Null(ValueKind::Text))
            .with("created_at", ts)
            .with("updated_at", SqlValue::Null(ValueKind::Timestamp));

        let reading = row_to_reading(&row).unwrap();

        assert_eq!(reading.timestamp, ts);
        assert!(reading.gout_attack);
        assert!(!reading.much_meat);
        assert_eq!(reading.updated_at, None);
    }

    #[test]
    fn test_row_to_meal_rejects_unknown_type() {
        let row = Row::new()
            .with("id", "m1")
            .with("user_id", "u1")
            .with("timestamp", "2024-05-01T12:00:00Z")
            .with("meal_type", "BRUNCH");

        assert!(matches!(
            row_to_meal(&row),
            Err(RepositoryError::Serialization(_))
        ));
    }

    #[test]
    fn test_row_to_analysis_parses_json_text() {
        let row = Row::new()
            .with("id", "a1")
            .with("user_id", "u1")
            .with("analysis_date", "2024-05-01T00:00:00Z")
            .with("data_period_start", "2024-04-01")
            .with("data_period_end", "2024-04-30")
            .with("insights", r#"["less meat"]"#)
            .with("recommendations", SqlValue::Null(ValueKind::Text))
            .with("confidence_score", 0.8);

        let analysis = row_to_analysis(&row).unwrap();

        assert_eq!(analysis.insights, json!(["less meat"]));
        assert_eq!(analysis.recommendations, serde_json::Value::Null);
        assert_eq!(analysis.confidence_score, Some(0.8));
        assert_eq!(analysis.created_at, None);
    }
}
