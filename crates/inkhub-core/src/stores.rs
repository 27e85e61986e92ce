// Printing-shop store locations.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{AppError, AppResult, ValidationErrors};
use crate::model::{Location, Role, Store, User};
use crate::Marketplace;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoreInput {
    pub storename: String,
    pub description: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub address: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserStore {
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store: Option<Store>,
}

fn validate(input: &StoreInput) -> AppResult<(String, String, Location)> {
    let mut errors = ValidationErrors::new();
    if input.storename.trim().is_empty() {
        errors.add("storename", "The storename field is required.");
    }
    if input.description.trim().is_empty() {
        errors.add("description", "The description field is required.");
    }
    if input.address.trim().is_empty() {
        errors.add("address", "The address field is required.");
    }
    match input.latitude {
        None => errors.add("latitude", "The latitude field is required."),
        Some(lat) if !(-90.0..=90.0).contains(&lat) => {
            errors.add("latitude", "The latitude must be between -90 and 90.")
        }
        Some(_) => {}
    }
    match input.longitude {
        None => errors.add("longitude", "The longitude field is required."),
        Some(lng) if !(-180.0..=180.0).contains(&lng) => {
            errors.add("longitude", "The longitude must be between -180 and 180.")
        }
        Some(_) => {}
    }
    errors.into_result()?;

    Ok((
        input.storename.trim().to_string(),
        input.description.trim().to_string(),
        Location {
            latitude: input.latitude.unwrap_or_default(),
            longitude: input.longitude.unwrap_or_default(),
            address: input.address.trim().to_string(),
        },
    ))
}

impl Marketplace {
    fn owned_store(&self, user: &User, id: i64) -> AppResult<Store> {
        let store = self
            .db
            .get_store(id)?
            .ok_or_else(|| AppError::not_found("Store"))?;
        if store.user_id != user.id {
            return Err(AppError::Forbidden("You can only manage your own store.".into()));
        }
        Ok(store)
    }

    pub fn create_store(&self, user: &User, input: &StoreInput) -> AppResult<Store> {
        if user.role != Role::PrintingShop {
            return Err(AppError::Forbidden(
                "Only printing shops can create a store.".into(),
            ));
        }
        if self.db.store_for_user(user.id)?.is_some() {
            return Err(AppError::invalid("user_id", "You already have a store."));
        }
        let (name, description, location) = validate(input)?;
        let store = self
            .db
            .insert_store(user.id, &name, &description, &location, Utc::now())?;
        info!(store_id = store.id, user_id = user.id, "store created");
        Ok(store)
    }

    pub fn update_store(&self, user: &User, id: i64, input: &StoreInput) -> AppResult<Store> {
        self.owned_store(user, id)?;
        let (name, description, location) = validate(input)?;
        Ok(self
            .db
            .update_store(id, &name, &description, &location, Utc::now())?)
    }

    pub fn delete_store(&self, user: &User, id: i64) -> AppResult<()> {
        self.owned_store(user, id)?;
        self.db.delete_store(id)?;
        info!(store_id = id, user_id = user.id, "store deleted");
        Ok(())
    }

    pub fn list_stores(&self) -> AppResult<Vec<Store>> {
        Ok(self.db.list_stores()?)
    }

    pub fn user_store(&self, user_id: i64) -> AppResult<UserStore> {
        let store = self.db.store_for_user(user_id)?;
        Ok(UserStore {
            exists: store.is_some(),
            store,
        })
    }
}
