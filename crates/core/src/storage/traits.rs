use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::diary::{
    hash_key, AnalysisResult, ApiKey, ApiKeyUpdate, CreatedApiKey, DietStats, FoodItem, Meal,
    MealComponent, NewAnalysisResult, NewApiKey, NewFoodItem, NewMeal, NewReading, NewUser,
    Reading, ReadingStats, User, UserUpdate,
};

use super::{ListOptions, Result};

/// Repository for user operations.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Creates a user, or merges profile fields into the user that already
    /// owns the guid.
    async fn create_user(&self, input: &NewUser) -> Result<User>;

    /// Returns the user for a guid, creating a bare one if none exists.
    async fn get_or_create_user(&self, guid: &str) -> Result<User>;

    /// Gets a user by internal ID.
    async fn find_user_by_id(&self, id: &str) -> Result<Option<User>>;

    /// Gets a user by correlation identifier.
    async fn find_user_by_guid(&self, guid: &str) -> Result<Option<User>>;

    /// Gets a user by federated identity.
    async fn find_user_by_google_id(&self, google_id: &str) -> Result<Option<User>>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>>;

    /// All users, newest first.
    async fn list_users(&self) -> Result<Vec<User>>;

    /// Applies profile changes to the user with `guid`.
    async fn update_user(&self, guid: &str, update: &UserUpdate) -> Result<Option<User>>;

    /// Updates the user with the input's guid, or creates it.
    async fn create_or_update_user(&self, input: &NewUser) -> Result<User>;

    /// Deletes a user and, through cascades, everything they own.
    async fn delete_user(&self, id: &str) -> Result<bool>;
}

/// Repository for uric-acid readings.
#[async_trait]
pub trait ReadingRepository: Send + Sync {
    /// Inserts a reading, or replaces the stored one with the same id when
    /// the upload is newer.
    async fn create_reading(&self, input: &NewReading) -> Result<Reading>;

    async fn find_reading_by_id(&self, id: &str) -> Result<Option<Reading>>;

    /// Readings of a user, newest first.
    async fn find_readings_by_user(
        &self,
        user_id: &str,
        options: &ListOptions,
    ) -> Result<Vec<Reading>>;

    /// Overwrites a reading's fields unconditionally.
    async fn update_reading(&self, id: &str, input: &NewReading) -> Result<Option<Reading>>;

    async fn delete_reading(&self, id: &str) -> Result<bool>;

    /// Returns the number of deleted readings.
    async fn delete_readings_by_user(&self, user_id: &str) -> Result<u64>;

    /// Aggregates over the last `days` days.
    async fn reading_stats(&self, user_id: &str, days: u32) -> Result<ReadingStats>;

    async fn last_reading_timestamp(&self, user_id: &str) -> Result<Option<DateTime<Utc>>>;
}

/// Repository for meals and their components.
#[async_trait]
pub trait MealRepository: Send + Sync {
    /// Inserts a meal, or replaces the stored one (components included) with
    /// the same id when the upload is newer.
    async fn create_meal(&self, input: &NewMeal) -> Result<Meal>;

    async fn find_meal_by_id(&self, id: &str) -> Result<Option<Meal>>;

    /// Meals of a user with their components, newest first.
    async fn find_meals_by_user(&self, user_id: &str, options: &ListOptions) -> Result<Vec<Meal>>;

    /// Components of one meal, oldest first.
    async fn find_components_by_meal(&self, meal_id: &str) -> Result<Vec<MealComponent>>;

    /// Overwrites a meal and replaces its components unconditionally.
    async fn update_meal(&self, id: &str, input: &NewMeal) -> Result<Option<Meal>>;

    async fn delete_meal(&self, id: &str) -> Result<bool>;

    async fn delete_meals_by_user(&self, user_id: &str) -> Result<u64>;

    async fn diet_stats(&self, user_id: &str, days: u32) -> Result<DietStats>;

    async fn last_meal_timestamp(&self, user_id: &str) -> Result<Option<DateTime<Utc>>>;
}

/// Repository for the per-user food catalogue.
#[async_trait]
pub trait FoodItemRepository: Send + Sync {
    /// Inserts a food item, or replaces the one with the same owner and name
    /// when the upload is newer.
    async fn create_food_item(&self, input: &NewFoodItem) -> Result<FoodItem>;

    async fn find_food_item_by_id(&self, id: &str) -> Result<Option<FoodItem>>;

    /// Looks up the natural key.
    async fn find_food_item_by_name(&self, user_id: &str, name: &str)
        -> Result<Option<FoodItem>>;

    /// Food items of a user ordered by name. Date bounds apply to the last
    /// update time.
    async fn find_food_items_by_user(
        &self,
        user_id: &str,
        options: &ListOptions,
    ) -> Result<Vec<FoodItem>>;

    async fn update_food_item(&self, id: &str, input: &NewFoodItem) -> Result<Option<FoodItem>>;

    async fn delete_food_item(&self, id: &str) -> Result<bool>;

    async fn delete_food_items_by_user(&self, user_id: &str) -> Result<u64>;
}

/// Repository for API keys.
#[async_trait]
pub trait ApiKeyRepository: Send + Sync {
    /// Creates a key with a freshly generated secret.
    async fn create_api_key(&self, input: &NewApiKey) -> Result<CreatedApiKey>;

    /// Registers a caller-supplied secret. Fails if it is already registered.
    async fn create_api_key_with_key(&self, input: &NewApiKey, key: &str)
        -> Result<CreatedApiKey>;

    /// Gets an active key by secret hash.
    async fn find_api_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>>;

    /// Gets an active key by plaintext secret.
    async fn find_api_key_by_key(&self, key: &str) -> Result<Option<ApiKey>> {
        self.find_api_key_by_hash(&hash_key(key.trim())).await
    }

    async fn find_api_key_by_id(&self, id: &str) -> Result<Option<ApiKey>>;

    /// All keys, newest first.
    async fn list_api_keys(&self) -> Result<Vec<ApiKey>>;

    async fn update_api_key(&self, id: &str, update: &ApiKeyUpdate) -> Result<Option<ApiKey>>;

    /// Records that the key was just used.
    async fn touch_api_key(&self, id: &str) -> Result<()>;

    /// Soft-deletes a key by marking it inactive.
    async fn deactivate_api_key(&self, id: &str) -> Result<bool>;
}

/// Repository for stored analysis results.
#[async_trait]
pub trait AnalysisRepository: Send + Sync {
    async fn create_analysis(&self, input: &NewAnalysisResult) -> Result<AnalysisResult>;

    async fn find_analysis_by_id(&self, id: &str) -> Result<Option<AnalysisResult>>;

    /// The most recent analysis of a user.
    async fn find_latest_analysis(&self, user_id: &str) -> Result<Option<AnalysisResult>>;

    /// Analyses of a user, newest first. Date bounds apply to the analysis
    /// date.
    async fn find_analyses_by_user(
        &self,
        user_id: &str,
        options: &ListOptions,
    ) -> Result<Vec<AnalysisResult>>;

    async fn delete_analysis(&self, id: &str) -> Result<bool>;

    async fn delete_analyses_by_user(&self, user_id: &str) -> Result<u64>;
}
