//! QuerySet behavior against the in-memory driver.

mod common;

use futures::TryStreamExt;
use oxide_odm::query::{or, regex};
use oxide_odm::{values, Manager, OdmError, OrderBy, Value};

fn ages(rows: &[oxide_odm::Instance]) -> Vec<i64> {
    rows.iter()
        .map(|row| row.get("age").unwrap().as_i64().unwrap())
        .collect()
}

#[tokio::test]
async fn test_slice_matches_nth() {
    let user = common::user_schema();
    let (db, _) = common::memory();
    common::seed_users(&db, &user, 10).await;

    let ordered = db.objects(&user).order_by(&["age"]);
    let all = ordered.fetch_all().await.unwrap();
    let window = ordered.clone().slice(3..6).fetch_all().await.unwrap();
    assert_eq!(ages(&window), vec![3, 4, 5]);

    let seventh = ordered.nth(7).await.unwrap();
    assert_eq!(seventh, all[7]);

    let tail = ordered.clone().slice(8..20).fetch_all().await.unwrap();
    assert_eq!(ages(&tail), vec![8, 9]);

    let err = ordered.nth(42).await.unwrap_err();
    assert!(err.is_does_not_exist(&user));
}

#[tokio::test]
async fn test_nested_slices_compose() {
    let user = common::user_schema();
    let (db, _) = common::memory();
    common::seed_users(&db, &user, 10).await;

    let rows = db
        .objects(&user)
        .order_by(&["-age"])
        .slice(2..8)
        .slice(1..3)
        .fetch_all()
        .await
        .unwrap();
    assert_eq!(ages(&rows), vec![6, 5]);

    let empty = db.objects(&user).all().slice(4..2);
    assert!(empty.fetch_all().await.unwrap().is_empty());
    assert_eq!(empty.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_first_and_last_follow_identity() {
    let user = common::user_schema();
    let (db, _) = common::memory();
    common::seed_users(&db, &user, 4).await;
    let users = db.objects(&user);

    assert_eq!(users.first().await.unwrap().get("name").unwrap(), Value::from("user0"));
    assert_eq!(users.last().await.unwrap().get("name").unwrap(), Value::from("user3"));

    let err = users.filter("age__gt", 100).first().await.unwrap_err();
    assert!(matches!(err, OdmError::DoesNotExist { .. }));
}

#[tokio::test]
async fn test_operator_lookups() {
    let user = common::user_schema();
    let (db, _) = common::memory();
    common::seed_users(&db, &user, 10).await;
    let users = db.objects(&user);

    let between = users.filter("age__gte", 2).filter("age__lt", 5);
    assert_eq!(between.count().await.unwrap(), 3);

    let picked = users.filter("name__in", vec!["user1", "user7", "nobody"]);
    assert_eq!(picked.count().await.unwrap(), 2);

    assert_eq!(users.filter("age__ne", 0).count().await.unwrap(), 9);
    assert_eq!(users.filter("name__regex", "^user1").count().await.unwrap(), 1);

    let string_bound = users.filter("age__lte", "1");
    assert_eq!(string_bound.count().await.unwrap(), 2);

    let exact = users.filter("age", 5);
    assert_eq!(exact.clone().filter("age__gte", 1).count().await.unwrap(), 1);
    assert_eq!(exact.filter("age__gt", 5).count().await.unwrap(), 0);
    assert_eq!(
        users.filter("age__lt", 3).filter("age", 7).count().await.unwrap(),
        0
    );
}

#[tokio::test]
async fn test_lookup_values_match_stored_form() {
    let user = common::user_schema();
    let (db, _) = common::memory();
    let users = db.objects(&user);

    let numbered = users.create(values! { "name" => 5 }).await.unwrap();
    assert_eq!(numbered.get("name").unwrap(), Value::from("5"));

    assert_eq!(users.filter("name", 5).count().await.unwrap(), 1);
    assert_eq!(users.filter("name", "5").count().await.unwrap(), 1);
    assert_eq!(users.filter("name__in", vec![5, 6]).count().await.unwrap(), 1);
    assert_eq!(users.filter("name__ne", 5).count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_raw_expressions() {
    let user = common::user_schema();
    let (db, _) = common::memory();
    common::seed_users(&db, &user, 5).await;
    let users = db.objects(&user);

    let either = users.raw(or([
        bson::doc! { "name": "user0" },
        bson::doc! { "age": { "$gte": 4 } },
    ]));
    assert_eq!(either.count().await.unwrap(), 2);

    assert_eq!(users.raw(regex("name", "[23]$")).count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_invalid_query_raised_on_execution() {
    let user = common::user_schema();
    let (db, _) = common::memory();
    let users = db.objects(&user);

    let bad_filter = users.filter("missing", 1);
    assert!(matches!(
        bad_filter.count().await,
        Err(OdmError::InvalidQuery(_))
    ));

    let bad_sort = users.order_by(&["-missing"]);
    assert!(matches!(
        bad_sort.fetch_all().await,
        Err(OdmError::InvalidQuery(_))
    ));

    let bad_value = users.filter("age", "eleven");
    assert!(matches!(
        bad_value.fetch_all().await,
        Err(OdmError::InvalidQuery(_))
    ));

    let bad_projection = users.only(&["nickname"]);
    assert!(matches!(
        bad_projection.fetch_all().await,
        Err(OdmError::InvalidQuery(_))
    ));
}

#[tokio::test]
async fn test_sorts_are_read_lazily() {
    let user = common::user_schema();
    let (db, _) = common::memory();
    let users = db.objects(&user);

    assert_eq!(users.order_by(&["-name"]).sorts().unwrap(), vec![OrderBy::desc("name")]);
    let pending = users.order_by(&["-missing"]);
    assert!(matches!(pending.sorts(), Err(OdmError::InvalidQuery(_))));
}

#[tokio::test]
async fn test_only_reads_back_defaults() {
    let user = common::user_schema();
    let (db, _) = common::memory();
    common::seed_users(&db, &user, 3).await;

    let rows = db
        .objects(&user)
        .only(&["name"])
        .order_by(&["name"])
        .fetch_all()
        .await
        .unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[1].get("name").unwrap(), Value::from("user1"));
    assert!(rows[1].get("age").unwrap().is_null());
    assert!(rows[1].is_persisted());
}

#[tokio::test]
async fn test_values_and_raw_fields() {
    let user = common::user_schema();
    let post = common::post_schema(&user);
    let (db, _) = common::memory();

    let alice = db
        .objects(&user)
        .create(values! { "name" => "alice" })
        .await
        .unwrap();
    db.objects(&post)
        .create(values! { "author" => &alice })
        .await
        .unwrap();

    let documents = db.objects(&post).values().fetch_all().await.unwrap();
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].get_str("author").unwrap(), "alice");

    let raw = db.objects(&post).raw_fields(&["author"]).get().await.unwrap();
    assert_eq!(raw.get("author").unwrap(), Value::from("alice"));

    let resolved = db.objects(&post).all().get().await.unwrap();
    assert!(resolved.get("author").unwrap().as_instance().is_some());
}

#[tokio::test]
async fn test_cursor_and_stream() {
    let user = common::user_schema();
    let (db, _) = common::memory();
    common::seed_users(&db, &user, 3).await;
    let ordered = db.objects(&user).order_by(&["age"]);

    let mut cursor = ordered.cursor().await.unwrap();
    let mut seen = Vec::new();
    while let Some(row) = cursor.next().await.unwrap() {
        seen.push(row.get("age").unwrap().as_i64().unwrap());
    }
    assert_eq!(seen, vec![0, 1, 2]);
    assert!(cursor.next().await.unwrap().is_none());

    let streamed: Vec<_> = ordered.stream().await.unwrap().try_collect().await.unwrap();
    assert_eq!(ages(&streamed), vec![0, 1, 2]);
}

#[tokio::test]
async fn test_exists_distinct_and_delete() {
    let user = common::user_schema();
    let (db, driver) = common::memory();
    common::seed_users(&db, &user, 6).await;
    let users = db.objects(&user);

    assert!(users.filter("name", "user2").exists().await.unwrap());
    assert!(!users.filter("name", "user9").exists().await.unwrap());

    let mut small = users.filter("age__lt", 3).distinct("age").await.unwrap();
    small.sort_by_key(|value| value.as_i64());
    assert_eq!(small, vec![Value::from(0), Value::from(1), Value::from(2)]);

    let sliced = users.all().slice(..2);
    assert!(matches!(sliced.delete().await, Err(OdmError::InvalidQuery(_))));

    assert_eq!(users.filter("age__gte", 4).delete().await.unwrap(), 2);
    assert_eq!(driver.len("user"), 4);
}

#[tokio::test]
async fn test_branches_do_not_leak() {
    let user = common::user_schema();
    let (db, _) = common::memory();
    common::seed_users(&db, &user, 5).await;

    let base = db.objects(&user).filter("age__gte", 1);
    let narrow = base.clone().filter("age__lte", 2);

    assert_eq!(narrow.count().await.unwrap(), 2);
    assert_eq!(base.count().await.unwrap(), 4);
    assert_eq!(
        base.query().unwrap(),
        &bson::doc! { "age": { "$gte": 1_i64 } }
    );
}
