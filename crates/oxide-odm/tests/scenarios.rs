//! End-to-end scenarios over the in-memory driver.

mod common;

use std::sync::Arc;

use oxide_odm::{values, Database, ErrorKind, Instance, Manager, Objects, Result, Schema, Value};

#[tokio::test]
async fn test_users_count_slice_and_get() {
    let user = common::user_schema();
    let (db, _) = common::memory();
    common::seed_users(&db, &user, 15).await;
    let users = db.objects(&user);

    assert_eq!(users.all().count().await.unwrap(), 15);
    assert_eq!(users.all().slice(5..10).count().await.unwrap(), 5);

    let user3 = users.filter("name", "user3").get().await.unwrap();
    assert_eq!(user3.get("name").unwrap(), Value::from("user3"));

    let err = users.filter("name", "missing").get().await.unwrap_err();
    assert!(err.is_does_not_exist(&user));
}

#[tokio::test]
async fn test_post_author_by_name() {
    let user = common::user_schema();
    let post = common::post_schema(&user);
    let (db, driver) = common::memory();

    let alice = db
        .objects(&user)
        .create(values! { "name" => "alice" })
        .await
        .unwrap();
    let created = db
        .objects(&post)
        .create(values! { "author" => &alice, "title" => "hello" })
        .await
        .unwrap();

    let stored = db
        .objects(&post)
        .values()
        .get_by("_id", created.id().unwrap())
        .await
        .unwrap();
    assert_eq!(stored.get_str("author").unwrap(), "alice");
    assert_eq!(driver.len("post"), 1);

    let fetched = db.objects(&post).get("_id", created.id().unwrap()).await.unwrap();
    let author: Instance = fetched.get_as("author").unwrap().unwrap();
    assert_eq!(author, alice);
    assert_eq!(author.get("name").unwrap(), Value::from("alice"));

    let ghost = Instance::new(&user, &db, values! { "name" => "ghost" }).unwrap();
    let mut orphan = Instance::new(&post, &db, values! { "author" => ghost }).unwrap();
    let error = common::validation(orphan.validate().await);
    assert_eq!(error.get("author").unwrap().kind(), Some(ErrorKind::ForeignKey));
}

#[tokio::test]
async fn test_author_given_as_key() {
    let user = common::user_schema();
    let post = common::post_schema(&user);
    let (db, _) = common::memory();
    let posts = db.objects(&post);

    db.objects(&user)
        .create(values! { "name" => "bob" })
        .await
        .unwrap();

    let by_key = posts.create(values! { "author" => "bob" }).await.unwrap();
    let author = by_key.get("author").unwrap();
    assert_eq!(
        author.as_instance().unwrap().get("name").unwrap(),
        Value::from("bob")
    );

    let err = posts
        .create(values! { "author" => "nobody" })
        .await
        .unwrap_err();
    assert_eq!(
        err.validation().unwrap().get("author").unwrap().kind(),
        Some(ErrorKind::ForeignKey)
    );
}

#[tokio::test]
async fn test_filter_by_related_instance() {
    let user = common::user_schema();
    let post = common::post_schema(&user);
    let (db, _) = common::memory();
    let users = db.objects(&user);
    let posts = db.objects(&post);

    let alice = users.create(values! { "name" => "alice" }).await.unwrap();
    let bob = users.create(values! { "name" => "bob" }).await.unwrap();
    for (author, title) in [(&alice, "a1"), (&alice, "a2"), (&bob, "b1")] {
        posts
            .create(values! { "author" => author, "title" => title })
            .await
            .unwrap();
    }

    assert_eq!(posts.filter("author", &alice).count().await.unwrap(), 2);
    assert_eq!(posts.filter("author", &bob).count().await.unwrap(), 1);
    assert_eq!(
        posts
            .filter("author__in", vec![&alice, &bob])
            .count()
            .await
            .unwrap(),
        3
    );
}

#[tokio::test]
async fn test_save_twice_keeps_one_document() {
    let user = common::user_schema();
    let (db, driver) = common::memory();

    let mut alice = Instance::new(&user, &db, values! { "name" => "alice" }).unwrap();
    alice.save().await.unwrap();
    let id = alice.id().unwrap();

    alice.save().await.unwrap();
    assert_eq!(alice.id(), Some(id));
    assert_eq!(driver.len("user"), 1);
}

/// A manager whose `create` never writes.
struct AuditOnly(Objects);

impl Manager for AuditOnly {
    fn schema(&self) -> &Arc<Schema> {
        self.0.schema()
    }

    fn database(&self) -> &Database {
        self.0.database()
    }

    async fn create<I, K, V>(&self, values: I) -> Result<Instance>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.build(values)
    }
}

#[tokio::test]
async fn test_custom_manager_create() {
    let user = common::user_schema();
    let (db, driver) = common::memory();
    let audit = AuditOnly(db.objects(&user));

    let instance = audit.create(values! { "name" => "alice" }).await.unwrap();
    assert!(!instance.is_persisted());
    assert_eq!(driver.len("user"), 0);
    assert_eq!(audit.count().await.unwrap(), 0);
}
