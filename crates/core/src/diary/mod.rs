mod api_key;
mod merge;
mod types;
mod validation;

pub use api_key::{
    can_access_user_data, generate_key, has_permission, hash_key, ApiKey, ApiKeyPermissions,
    ApiKeyUpdate, CreatedApiKey, NewApiKey, Permission, KEY_PREFIX,
};
pub use merge::{decide, decide_versions, write_stamp, SyncDecision, Versioned};
pub use types::{
    round_to, AnalysisResult, DietStats, FoodItem, Gender, Meal, MealComponent, MealType,
    NewAnalysisResult, NewFoodItem, NewMeal, NewMealComponent, NewReading, NewUser,
    ParseEnumError, Reading, ReadingStats, User, UserUpdate,
};
pub use validation::{
    validate_new_analysis, validate_new_api_key, validate_new_food_item, validate_new_meal,
    validate_new_meal_component, validate_new_reading, validate_new_user, validate_user_update,
    validate_window, ValidationError, MAX_BIRTH_YEAR, MAX_READING, MIN_BIRTH_YEAR, MIN_READING,
};
