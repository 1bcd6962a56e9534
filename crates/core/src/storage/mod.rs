mod error;
mod error_response;
mod traits;
mod types;

pub use error::{RepositoryError, Result};
pub use error_response::{repository_error_to_status_code, ErrorCode, ErrorResponse};
pub use traits::{
    AnalysisRepository, ApiKeyRepository, FoodItemRepository, MealRepository, ReadingRepository,
    UserRepository,
};
pub use types::{earliest_window_start, window_start, ListOptions, DEFAULT_STATS_DAYS};
