#![allow(dead_code)]

use std::sync::Arc;

use oxide_odm::driver::MemoryDriver;
use oxide_odm::fields::{FieldOptions, ForeignKey, IntegerField, StringField};
use oxide_odm::{Database, Manager, OdmError, Schema, ValidationError};

/// `User{name: string, age: int (optional)}`.
pub fn user_schema() -> Arc<Schema> {
    Schema::builder("User")
        .field("name", StringField::new().max_length(50))
        .field(
            "age",
            IntegerField::new().options(FieldOptions::new().required(false)),
        )
        .build()
        .unwrap()
}

/// `Account{email: string (unique)}`.
pub fn account_schema() -> Arc<Schema> {
    Schema::builder("Account")
        .field(
            "email",
            StringField::new().options(FieldOptions::new().unique(true)),
        )
        .build()
        .unwrap()
}

/// `Post{author: ForeignKey(user, to_field = "name"), title: string}`.
pub fn post_schema(user: &Arc<Schema>) -> Arc<Schema> {
    Schema::builder("Post")
        .field("author", ForeignKey::new(user).to_field("name"))
        .field(
            "title",
            StringField::new().options(FieldOptions::new().required(false)),
        )
        .build()
        .unwrap()
}

/// An in-memory database whose driver stays reachable for inspection.
pub fn memory() -> (Database, Arc<MemoryDriver>) {
    let driver = Arc::new(MemoryDriver::new());
    (Database::new(driver.clone()), driver)
}

/// Creates `count` users named `user0..user{count-1}` with `age = i`.
pub async fn seed_users(db: &Database, user: &Arc<Schema>, count: i64) {
    let users = db.objects(user);
    for i in 0..count {
        users
            .create(vec![
                ("name", oxide_odm::Value::from(format!("user{i}"))),
                ("age", oxide_odm::Value::from(i)),
            ])
            .await
            .unwrap_or_else(|e| panic!("Failed to create user{i}: {e}"));
    }
}

pub fn validation(result: Result<(), OdmError>) -> ValidationError {
    match result {
        Err(OdmError::Validation(error)) => error,
        other => panic!("Expected validation error, got {other:?}"),
    }
}
