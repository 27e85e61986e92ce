// Post listings, CRUD, tag search and post images.

use chrono::Utc;
use serde::Deserialize;
use tracing::info;

use crate::db::PostFields;
use crate::error::{AppError, AppResult, ValidationErrors};
use crate::model::{page_offset, Page, Post, PostImage, Role, Tag, User};
use crate::uploads::{check_upload, store_upload, Upload, IMAGE_EXTENSIONS};
use crate::Marketplace;

const MAX_PAGE_LIMIT: u32 = 100;

/// Highest accepted price: one billion pesos, in centavos.
pub const MAX_PRICE: i64 = 100_000_000_000;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PostInput {
    pub title: String,
    pub content: String,
    /// Centavos.
    pub price: Option<i64>,
    pub quantity: Option<i64>,
    pub tags: Vec<i64>,
}

impl Marketplace {
    fn validate_post(&self, input: &PostInput) -> AppResult<PostFields> {
        let mut errors = ValidationErrors::new();
        let title = input.title.trim();
        if title.is_empty() {
            errors.add("title", "The title field is required.");
        } else if title.chars().count() > 255 {
            errors.add("title", "The title may not be greater than 255 characters.");
        }
        if input.content.trim().is_empty() {
            errors.add("content", "The content field is required.");
        }
        match input.price {
            None => errors.add("price", "The price field is required."),
            Some(p) if p < 0 => errors.add("price", "The price must be at least 0."),
            Some(p) if p > MAX_PRICE => errors.add(
                "price",
                format!("The price may not be greater than {MAX_PRICE}."),
            ),
            Some(_) => {}
        }
        let quantity = input.quantity.unwrap_or(1);
        if quantity < 1 {
            errors.add("quantity", "The quantity must be at least 1.");
        }
        let missing = self.db.missing_tag_ids(&input.tags)?;
        if !missing.is_empty() {
            errors.add("tags", "The selected tags are invalid.");
        }
        errors.into_result()?;

        Ok(PostFields {
            title: title.to_string(),
            content: input.content.trim().to_string(),
            price: input.price.unwrap_or_default(),
            quantity,
            tag_ids: input.tags.clone(),
        })
    }

    fn owned_post(&self, user: &User, post_id: i64) -> AppResult<Post> {
        let post = self
            .db
            .get_post(post_id)?
            .ok_or_else(|| AppError::not_found("Post"))?;
        if post.user_id != user.id {
            return Err(AppError::Forbidden("You can only modify your own posts.".into()));
        }
        Ok(post)
    }

    pub fn create_post(&self, user: &User, input: &PostInput) -> AppResult<Post> {
        if !user.verified {
            return Err(AppError::Forbidden(
                "Your account must be verified before you can post.".into(),
            ));
        }
        let fields = self.validate_post(input)?;
        let post_id = self.db.insert_post(user.id, &fields, Utc::now())?;
        info!(post_id, user_id = user.id, "created post");
        self.db
            .get_post(post_id)?
            .ok_or_else(|| AppError::not_found("Post"))
    }

    pub fn update_post(&self, user: &User, post_id: i64, input: &PostInput) -> AppResult<Post> {
        self.owned_post(user, post_id)?;
        let fields = self.validate_post(input)?;
        self.db.update_post(post_id, &fields, Utc::now())?;
        self.db
            .get_post(post_id)?
            .ok_or_else(|| AppError::not_found("Post"))
    }

    /// Owners and admins may delete.
    pub fn delete_post(&self, user: &User, post_id: i64) -> AppResult<()> {
        if user.role != Role::Admin {
            self.owned_post(user, post_id)?;
        }
        if !self.db.delete_post(post_id)? {
            return Err(AppError::not_found("Post"));
        }
        info!(post_id, user_id = user.id, "deleted post");
        Ok(())
    }

    pub fn list_posts(&self, page: u32, limit: Option<u32>) -> AppResult<Page<Post>> {
        let per_page = limit
            .unwrap_or(self.config.auth.page_size)
            .clamp(1, MAX_PAGE_LIMIT);
        let (page, offset) = page_offset(page, per_page);
        let posts = self.db.list_posts(offset, per_page)?;
        let total = self.db.count_posts()?;
        Ok(Page::new(posts, page, per_page, total))
    }

    pub fn my_posts(&self, user: &User) -> AppResult<Vec<Post>> {
        Ok(self.db.posts_by_user(user.id)?)
    }

    /// Job posts written by clients.
    pub fn client_posts(&self) -> AppResult<Vec<Post>> {
        Ok(self.db.posts_by_role(Role::Client)?)
    }

    pub fn search_posts(&self, query: &str) -> AppResult<Vec<Post>> {
        Ok(self.db.search_posts(query.trim())?)
    }

    /// Any word of `tag` matching part of any tag name, case-insensitively.
    pub fn search_by_tag(&self, tag: Option<&str>) -> AppResult<Vec<Post>> {
        let tag = tag.map(str::trim).unwrap_or_default();
        if tag.is_empty() {
            return Err(AppError::BadRequest("Tag parameter is required".into()));
        }
        let words: Vec<String> = tag.split_whitespace().map(str::to_lowercase).collect();
        Ok(self.db.posts_with_tag_matching(&words)?)
    }

    pub fn all_tags(&self) -> AppResult<Vec<Tag>> {
        Ok(self.db.all_tags()?)
    }

    pub async fn add_post_image(
        &self,
        user: &User,
        post_id: i64,
        upload: &Upload,
    ) -> AppResult<PostImage> {
        self.owned_post(user, post_id)?;
        let ext = check_upload(&self.config.uploads, "image", upload, &IMAGE_EXTENSIONS)?;
        let path = store_upload(&self.config.uploads, "post_images", upload, &ext).await?;
        Ok(self.db.add_post_image(post_id, &path)?)
    }

    pub fn user_images(&self, user_id: i64) -> AppResult<Vec<PostImage>> {
        if self.db.get_user(user_id)?.is_none() {
            return Err(AppError::not_found("User"));
        }
        Ok(self.db.images_for_user(user_id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::seed_user;
    use crate::testing::harness;

    fn input(title: &str, tags: Vec<i64>) -> PostInput {
        PostInput {
            title: title.into(),
            content: "Full colour, glossy".into(),
            price: Some(150_000),
            quantity: Some(1),
            tags,
        }
    }

    #[test]
    fn create_requires_verified_account() {
        let h = harness();
        let mut shop = seed_user(&h.market.db, "shop", Role::PrintingShop);
        shop.verified = false;
        assert!(matches!(
            h.market.create_post(&shop, &input("Flyers", vec![])),
            Err(AppError::Forbidden(_))
        ));
    }

    #[test]
    fn create_validates_fields_and_tags() {
        let h = harness();
        let shop = seed_user(&h.market.db, "shop", Role::PrintingShop);
        let err = h
            .market
            .create_post(
                &shop,
                &PostInput {
                    title: " ".into(),
                    price: Some(-1),
                    tags: vec![999],
                    ..Default::default()
                },
            )
            .unwrap_err();
        let AppError::Validation(errors) = err else {
            panic!("expected validation error");
        };
        for field in ["title", "content", "price", "tags"] {
            assert!(errors.get(field).is_some(), "missing error for {field}");
        }
    }

    #[test]
    fn price_above_limit_is_rejected() {
        let h = harness();
        let shop = seed_user(&h.market.db, "shop", Role::PrintingShop);
        let mut huge = input("Billboards", vec![]);
        huge.price = Some(i64::MAX / 2);
        let Err(AppError::Validation(errors)) = h.market.create_post(&shop, &huge) else {
            panic!("expected validation error");
        };
        assert!(errors.get("price").is_some());

        huge.price = Some(MAX_PRICE);
        assert!(h.market.create_post(&shop, &huge).is_ok());
    }

    #[test]
    fn owner_updates_and_admin_deletes() {
        let h = harness();
        let shop = seed_user(&h.market.db, "shop", Role::PrintingShop);
        let other = seed_user(&h.market.db, "other", Role::GraphicDesigner);
        let admin = seed_user(&h.market.db, "admin", Role::Admin);
        let post = h.market.create_post(&shop, &input("Flyers", vec![2])).unwrap();
        assert_eq!(post.tags[0].name, "Printing");

        assert!(matches!(
            h.market.update_post(&other, post.post_id, &input("Mine", vec![])),
            Err(AppError::Forbidden(_))
        ));
        let updated = h
            .market
            .update_post(&shop, post.post_id, &input("Posters", vec![]))
            .unwrap();
        assert_eq!(updated.title, "Posters");
        assert!(updated.tags.is_empty());

        assert!(h.market.delete_post(&other, post.post_id).is_err());
        h.market.delete_post(&admin, post.post_id).unwrap();
        assert!(matches!(
            h.market.delete_post(&admin, post.post_id),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn search_by_tag_requires_parameter() {
        let h = harness();
        for tag in [None, Some(""), Some("   ")] {
            let err = h.market.search_by_tag(tag).unwrap_err();
            assert_eq!(err.to_string(), "Tag parameter is required");
        }
    }

    #[test]
    fn search_by_tag_matches_any_word() {
        let h = harness();
        let shop = seed_user(&h.market.db, "shop", Role::PrintingShop);
        // 3 = "Logo Design", 6 = "T-shirt Printing"
        h.market.create_post(&shop, &input("Logos", vec![3])).unwrap();
        h.market.create_post(&shop, &input("Shirts", vec![6])).unwrap();
        h.market.create_post(&shop, &input("Untagged", vec![])).unwrap();

        let titles = |posts: Vec<Post>| posts.into_iter().map(|p| p.title).collect::<Vec<_>>();
        assert_eq!(titles(h.market.search_by_tag(Some("LOGO")).unwrap()), vec!["Logos"]);
        assert_eq!(
            titles(h.market.search_by_tag(Some(" logo  shirt ")).unwrap()).len(),
            2
        );
        assert!(h.market.search_by_tag(Some("origami")).unwrap().is_empty());
    }

    #[test]
    fn client_posts_only_lists_clients() {
        let h = harness();
        let client = seed_user(&h.market.db, "client", Role::Client);
        let shop = seed_user(&h.market.db, "shop", Role::PrintingShop);
        h.market.create_post(&client, &input("Need a logo", vec![])).unwrap();
        h.market.create_post(&shop, &input("Flyers", vec![])).unwrap();

        let posts = h.market.client_posts().unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].user.username, "client");
    }

    #[test]
    fn list_posts_clamps_limit() {
        let h = harness();
        let shop = seed_user(&h.market.db, "shop", Role::PrintingShop);
        for i in 0..3 {
            h.market.create_post(&shop, &input(&format!("P{i}"), vec![])).unwrap();
        }
        let page = h.market.list_posts(1, Some(0)).unwrap();
        assert_eq!(page.per_page, 1);
        assert_eq!(page.last_page, 3);
    }
}
