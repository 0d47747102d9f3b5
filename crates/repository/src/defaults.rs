//! Sentinel rows that must always resolve.

use common::{CategoryId, UserId};
use entity_store::{NewCategory, NewUser};

pub const DEFAULT_USER_ID: UserId = UserId::new(1);
pub const DEFAULT_USER_NAME: &str = "user default";
pub const DEFAULT_USER_EMAIL: &str = "user@gmail.com";

pub const DEFAULT_CATEGORY_ID: CategoryId = CategoryId::new(1);
pub const DEFAULT_CATEGORY_NAME: &str = "Uncategorized";
pub const DEFAULT_CATEGORY_DESCRIPTION: &str = "Product is uncategorized";

/// The default user, inserted with its fixed id.
pub fn default_user() -> NewUser {
    NewUser {
        id: Some(DEFAULT_USER_ID),
        name: DEFAULT_USER_NAME.to_string(),
        email: DEFAULT_USER_EMAIL.to_string(),
        role: "user".to_string(),
        status: "activated".to_string(),
    }
}

/// The default product category, inserted with its fixed id.
pub fn default_category() -> NewCategory {
    NewCategory {
        id: Some(DEFAULT_CATEGORY_ID),
        name: DEFAULT_CATEGORY_NAME.to_string(),
        description: DEFAULT_CATEGORY_DESCRIPTION.to_string(),
    }
}
