//! Field kinds: coercion, bounds, wire and storage forms.

mod common;

use std::sync::Arc;

use bson::Bson;
use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use indexmap::IndexMap;
use oxide_odm::fields::{
    ArrayField, BooleanField, ChoiceField, DateField, DateTimeField, EmbeddedField, Field,
    FieldContext, FieldOptions, FloatField, ForeignKey, HostField, IdField, IntegerField,
    JsonField, ManyToMany, MapField, MultipleChoiceField, SlugField, StringField, TimeField,
    UrlField, Widget,
};
use oxide_odm::{values, Choices, Database, ErrorKind, Manager, Schema, Value};

fn context() -> (Database, Arc<Schema>) {
    (Database::memory(), Schema::builder("Sample").build().unwrap())
}

async fn check(field: &dyn Field, value: impl Into<Value>) -> Result<Value, ErrorKind> {
    let (db, schema) = context();
    let cx = FieldContext::new(&db, &schema);
    field
        .validate(value.into(), &cx)
        .await
        .map_err(|e| e.kind().unwrap_or(ErrorKind::Invalid))
}

#[tokio::test]
async fn test_integer_bounds_are_inclusive() {
    let field = IntegerField::new().min_value(1).max_value(10);

    assert_eq!(check(&field, 1).await, Ok(Value::Int(1)));
    assert_eq!(check(&field, 10).await, Ok(Value::Int(10)));
    assert_eq!(check(&field, "7").await, Ok(Value::Int(7)));
    assert_eq!(check(&field, 4.0).await, Ok(Value::Int(4)));
    assert_eq!(check(&field, 0).await, Err(ErrorKind::MinValue));
    assert_eq!(check(&field, 11).await, Err(ErrorKind::MaxValue));
    assert_eq!(check(&field, "seven").await, Err(ErrorKind::Invalid));
    assert_eq!(check(&field, 4.5).await, Err(ErrorKind::Invalid));
}

#[tokio::test]
async fn test_integer_rejects_floats_beyond_range() {
    let field = IntegerField::new();

    assert_eq!(check(&field, 1e20).await, Err(ErrorKind::Invalid));
    assert_eq!(check(&field, -1e20).await, Err(ErrorKind::Invalid));
    assert_eq!(check(&field, 9.223_372_036_854_776e18).await, Err(ErrorKind::Invalid));
    assert_eq!(check(&field, f64::INFINITY).await, Err(ErrorKind::Invalid));
    assert_eq!(check(&field, -9.223_372_036_854_776e18).await, Ok(Value::Int(i64::MIN)));
    assert_eq!(check(&field, 1e15).await, Ok(Value::Int(1_000_000_000_000_000)));
    assert!(field.db_serialize(&Value::Float(1e20)).is_err());

    let user = common::user_schema();
    let db = Database::memory();
    let err = db
        .objects(&user)
        .create(values! { "name" => "big", "age" => 1e20 })
        .await
        .unwrap_err();
    assert_eq!(
        err.validation().unwrap().get("age").unwrap().kind(),
        Some(ErrorKind::Invalid)
    );
    assert_eq!(db.objects(&user).count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_float_bounds() {
    let field = FloatField::new().min_value(0.0).max_value(1.0);

    assert_eq!(check(&field, 0.5).await, Ok(Value::Float(0.5)));
    assert_eq!(check(&field, 1.0).await, Ok(Value::Float(1.0)));
    assert_eq!(check(&field, "0.25").await, Ok(Value::Float(0.25)));
    assert_eq!(check(&field, 1.5).await, Err(ErrorKind::MaxValue));
    assert_eq!(check(&field, -0.1).await, Err(ErrorKind::MinValue));
    assert_eq!(field.db_serialize(&Value::Int(1)).unwrap(), Bson::Double(1.0));
}

#[tokio::test]
async fn test_required_and_optional() {
    let required = StringField::new();
    let optional = StringField::new().options(FieldOptions::new().required(false));

    assert_eq!(check(&required, Value::Null).await, Err(ErrorKind::Required));
    assert_eq!(check(&optional, Value::Null).await, Ok(Value::Null));
}

#[tokio::test]
async fn test_string_rules() {
    let field = StringField::new()
        .min_length(2)
        .max_length(4)
        .pattern(regex::Regex::new("^[a-z]+$").unwrap());

    assert_eq!(check(&field, "abc").await, Ok(Value::from("abc")));
    assert_eq!(check(&field, "a").await, Err(ErrorKind::MinLength));
    assert_eq!(check(&field, "abcde").await, Err(ErrorKind::MaxLength));
    assert_eq!(check(&field, "ab1").await, Err(ErrorKind::Pattern));
    assert_eq!(check(&field, true).await, Err(ErrorKind::Invalid));
}

#[tokio::test]
async fn test_error_message_override() {
    let (db, schema) = context();
    let cx = FieldContext::new(&db, &schema);
    let field = StringField::new().max_length(3).options(
        FieldOptions::new().error(ErrorKind::MaxLength, "keep it under {max_length}"),
    );

    let error = field.validate(Value::from("long"), &cx).await.unwrap_err();
    assert_eq!(error.message(), Some("keep it under 3"));
}

#[tokio::test]
async fn test_text_kinds() {
    assert!(check(&SlugField::new(), "hello-world_2").await.is_ok());
    assert_eq!(check(&SlugField::new(), "hello world").await, Err(ErrorKind::Invalid));

    for host in ["localhost", "db.example.com", "10.0.0.1", "::1", "[::1]"] {
        assert!(check(&HostField::new(), host).await.is_ok(), "{host}");
    }
    assert_eq!(check(&HostField::new(), "bad host").await, Err(ErrorKind::Invalid));

    assert!(check(&UrlField::new(), "https://example.com/a?b=c").await.is_ok());
    assert_eq!(check(&UrlField::new(), "ftp://example.com").await, Err(ErrorKind::Invalid));
    assert_eq!(check(&UrlField::new(), "example.com").await, Err(ErrorKind::Invalid));
}

#[tokio::test]
async fn test_boolean_forms() {
    let field = BooleanField::new();
    for (input, expected) in [("yes", true), ("off", false), ("TRUE", true), ("0", false)] {
        assert_eq!(check(&field, input).await, Ok(Value::Bool(expected)));
    }
    assert_eq!(check(&field, 1).await, Ok(Value::Bool(true)));
    assert_eq!(check(&field, "maybe").await, Err(ErrorKind::Invalid));
}

#[tokio::test]
async fn test_choices() {
    let sizes = Choices::new([("SMALL", "s", "Small"), ("LARGE", "l", "Large")]);
    assert_eq!(sizes.get("LARGE"), Some(&Value::from("l")));
    assert_eq!(sizes.label(&Value::from("s")), Some("Small"));

    let field = ChoiceField::new(sizes.clone());
    assert_eq!(check(&field, "s").await, Ok(Value::from("s")));
    assert_eq!(check(&field, "m").await, Err(ErrorKind::Choices));

    let levels = ChoiceField::new(Choices::new([("LOW", 1, "Low"), ("HIGH", 2, "High")]));
    assert_eq!(check(&levels, "2").await, Ok(Value::Int(2)));

    let many = MultipleChoiceField::new(sizes);
    assert_eq!(
        check(&many, vec!["s", "l"]).await,
        Ok(Value::from(vec!["s", "l"]))
    );
    assert_eq!(check(&many, vec!["s", "xl"]).await, Err(ErrorKind::Choices));
    assert_eq!(check(&many, "s").await, Err(ErrorKind::Invalid));
}

#[tokio::test]
async fn test_temporal_forms() {
    let field = DateTimeField::new();
    let expected = Utc.with_ymd_and_hms(2015, 7, 13, 10, 30, 0).unwrap();

    let parsed = check(&field, "2015-07-13T10:30:00Z").await.unwrap();
    assert_eq!(parsed, Value::DateTime(expected));
    assert_eq!(field.serialize(&parsed), serde_json::json!("2015-07-13T10:30:00Z"));
    assert!(matches!(field.db_serialize(&parsed).unwrap(), Bson::DateTime(_)));

    let date = check(&DateField::new(), "2015-07-13").await.unwrap();
    assert_eq!(date, Value::Date(NaiveDate::from_ymd_opt(2015, 7, 13).unwrap()));
    assert_eq!(DateField::new().serialize(&date), serde_json::json!("2015-07-13"));

    let time = check(&TimeField::new(), "10:30").await.unwrap();
    assert_eq!(time, Value::Time(NaiveTime::from_hms_opt(10, 30, 0).unwrap()));
    assert_eq!(
        TimeField::new().db_serialize(&time).unwrap(),
        Bson::String("10:30:00".to_string())
    );

    assert_eq!(check(&field, "yesterday").await, Err(ErrorKind::Invalid));
}

fn case(
    kind: &'static str,
    field: impl Field + 'static,
    value: Value,
) -> (&'static str, Arc<dyn Field>, Value) {
    (kind, Arc::new(field), value)
}

#[tokio::test]
async fn test_deserialize_is_idempotent() {
    let user = common::user_schema();
    let address = Schema::builder("Address")
        .field("city", StringField::new())
        .field("zip", IntegerField::new())
        .build()
        .unwrap();
    let (db, _) = common::memory();
    let users = db.objects(&user);
    let alice = users.create(values! { "name" => "alice" }).await.unwrap();
    let bob = users.create(values! { "name" => "bob" }).await.unwrap();

    let schema = Schema::builder("Sample").build().unwrap();
    let cx = FieldContext::new(&db, &schema);
    let stamp = Utc.with_ymd_and_hms(2020, 1, 2, 3, 4, 5).unwrap();
    let sizes = Choices::new([("SMALL", "s", "Small"), ("LARGE", "l", "Large")]);
    let city = Value::Map(IndexMap::from([
        ("city".to_string(), Value::from("Oslo")),
        ("zip".to_string(), Value::Int(150)),
    ]));
    let blob = Value::Map(IndexMap::from([
        ("tags".to_string(), Value::from(vec![1, 2])),
        ("flag".to_string(), Value::Bool(true)),
    ]));

    let cases = vec![
        case("integer", IntegerField::new(), Value::Int(5)),
        case("float", FloatField::new(), Value::Float(2.5)),
        case("boolean", BooleanField::new(), Value::Bool(false)),
        case("string", StringField::new(), Value::from("x")),
        case("datetime", DateTimeField::new(), Value::DateTime(stamp)),
        case(
            "date",
            DateField::new(),
            Value::Date(NaiveDate::from_ymd_opt(2020, 1, 2).unwrap()),
        ),
        case(
            "time",
            TimeField::new(),
            Value::Time(NaiveTime::from_hms_opt(23, 59, 1).unwrap()),
        ),
        case("id", IdField::new(), Value::ObjectId(bson::oid::ObjectId::new())),
        case("choice", ChoiceField::new(sizes.clone()), Value::from("l")),
        case(
            "multiple_choice",
            MultipleChoiceField::new(sizes),
            Value::from(vec!["s", "l"]),
        ),
        case(
            "array",
            ArrayField::new().of(IntegerField::new()),
            Value::from(vec![3, 1, 2]),
        ),
        case(
            "map",
            MapField::new().of(StringField::new()),
            Value::Map(IndexMap::from([("en".to_string(), Value::from("hello"))])),
        ),
        case("embedded", EmbeddedField::new(&address), city),
        case("json", JsonField::new(), blob),
        case("foreign_key", ForeignKey::new(&user), Value::from(&alice)),
        case(
            "foreign_key_to_field",
            ForeignKey::new(&user).to_field("name"),
            Value::from(&bob),
        ),
        case(
            "many_to_many",
            ManyToMany::new(&user),
            Value::from(vec![&alice, &bob]),
        ),
    ];

    for (kind, field, value) in cases {
        let stored = Value::from_bson(field.db_serialize(&value).unwrap());
        let once = field.deserialize(stored, &cx).await.unwrap();
        assert_eq!(once, value, "{kind}: storage form");
        let twice = field.deserialize(once.clone(), &cx).await.unwrap();
        assert_eq!(twice, once, "{kind}: deserialize twice");

        let wire = Value::from_json(field.serialize(&value));
        assert_eq!(field.deserialize(wire, &cx).await.unwrap(), value, "{kind}: wire form");
    }
}

#[tokio::test]
async fn test_identity_field() {
    let oid = bson::oid::ObjectId::new();
    assert_eq!(check(&IdField::new(), oid.to_hex()).await, Ok(Value::ObjectId(oid)));
    assert_eq!(check(&IdField::new(), "not-an-id").await, Err(ErrorKind::Invalid));
    assert_eq!(check(&IdField::new(), Value::Null).await, Ok(Value::Null));
}

#[tokio::test]
async fn test_json_and_array_fields() {
    let parsed = check(&JsonField::new(), r#"{"a": [1, 2]}"#).await.unwrap();
    assert_eq!(parsed.to_json(), serde_json::json!({ "a": [1, 2] }));
    assert_eq!(check(&JsonField::new(), "{broken").await, Err(ErrorKind::Invalid));

    let tags = ArrayField::new().of(StringField::new().max_length(5));
    assert_eq!(
        check(&tags, vec!["rust", "odm"]).await,
        Ok(Value::from(vec!["rust", "odm"]))
    );
    assert_eq!(check(&tags, "rust").await, Err(ErrorKind::Invalid));
    assert_eq!(
        tags.db_serialize(&Value::from("rust")).unwrap(),
        Bson::String("rust".to_string())
    );
}

#[tokio::test]
async fn test_array_membership_lookup() {
    let schema = Schema::builder("Article")
        .field("tags", ArrayField::new().of(StringField::new()))
        .build()
        .unwrap();
    let (db, _) = common::memory();
    let articles = db.objects(&schema);

    articles
        .create(values! { "tags" => vec!["rust", "db"] })
        .await
        .unwrap();
    articles
        .create(values! { "tags" => vec!["go"] })
        .await
        .unwrap();

    assert_eq!(articles.filter("tags", "rust").count().await.unwrap(), 1);
    assert_eq!(
        articles
            .filter("tags__all", vec!["rust", "db"])
            .count()
            .await
            .unwrap(),
        1
    );
    assert_eq!(articles.filter("tags__size", 1).count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_many_to_many() {
    let user = common::user_schema();
    let group = Schema::builder("Group")
        .field("members", ManyToMany::new(&user))
        .build()
        .unwrap();
    let (db, _) = common::memory();
    let users = db.objects(&user);

    let alice = users.create(values! { "name" => "alice" }).await.unwrap();
    let bob = users.create(values! { "name" => "bob" }).await.unwrap();
    let ghost = users.build(values! { "name" => "ghost" }).unwrap();

    let created = db
        .objects(&group)
        .create(values! { "members" => vec![&alice, &bob] })
        .await
        .unwrap();

    let stored = db.objects(&group).values().get().await.unwrap();
    assert_eq!(
        stored.get_array("members").unwrap(),
        &vec![
            Bson::ObjectId(alice.id().unwrap()),
            Bson::ObjectId(bob.id().unwrap()),
        ]
    );

    let fetched = db.objects(&group).get("_id", created.id().unwrap()).await.unwrap();
    let members = fetched.get("members").unwrap();
    let members = members.as_array().unwrap();
    assert_eq!(members.len(), 2);
    assert_eq!(members[1].as_instance().unwrap(), &bob);

    let err = db
        .objects(&group)
        .create(values! { "members" => vec![Value::from(&alice), Value::from(ghost)] })
        .await
        .unwrap_err();
    let members = err.validation().unwrap().get("members").unwrap();
    assert_eq!(members.get("1").unwrap().kind(), Some(ErrorKind::ForeignKey));
}

#[tokio::test]
async fn test_many_to_many_item_errors_use_field_messages() {
    let user = common::user_schema();
    let team = Schema::builder("Team")
        .field(
            "members",
            ManyToMany::new(&user).options(
                FieldOptions::new().error(ErrorKind::ForeignKey, "not a registered user"),
            ),
        )
        .build()
        .unwrap();
    let (db, _) = common::memory();
    let alice = db
        .objects(&user)
        .create(values! { "name" => "alice" })
        .await
        .unwrap();
    let ghost = db.objects(&user).build(values! { "name" => "ghost" }).unwrap();

    let err = db
        .objects(&team)
        .create(values! { "members" => vec![Value::from(ghost), Value::from(&alice)] })
        .await
        .unwrap_err();
    let members = err.validation().unwrap().get("members").unwrap();
    let first = members.get("0").unwrap();
    assert_eq!(first.kind(), Some(ErrorKind::ForeignKey));
    assert_eq!(first.message(), Some("not a registered user"));
    assert!(members.get("1").is_none());
}

#[test]
fn test_metadata_and_widgets() {
    let schema = Schema::builder("Signup")
        .field(
            "nick",
            StringField::new().max_length(20).options(
                FieldOptions::new()
                    .label("Nickname")
                    .help_text("Shown to others")
                    .default("anon"),
            ),
        )
        .field("accept", BooleanField::new())
        .field(
            "bio",
            StringField::new().options(FieldOptions::new().widget(Widget::textarea())),
        )
        .build()
        .unwrap();

    let nick = schema.field("nick").unwrap().metadata();
    assert_eq!(nick["name"], "nick");
    assert_eq!(nick["label"], "Nickname");
    assert_eq!(nick["help_text"], "Shown to others");
    assert_eq!(nick["default"], "anon");
    assert_eq!(nick["widget"]["attrs"]["maxlength"], "20");

    let accept = schema.field("accept").unwrap().metadata();
    assert_eq!(accept["widget"]["attrs"]["type"], "checkbox");
    assert_eq!(schema.field("bio").unwrap().widget().tag, "textarea");

    let all = schema.metadata();
    assert_eq!(all.as_array().map(Vec::len), Some(4));
}

#[test]
fn test_field_name_binds_once() {
    let field = StringField::new();
    let schema = Schema::builder("First").field("title", field.clone()).build().unwrap();
    assert_eq!(schema.field("title").unwrap().name(), "title");
    assert_eq!(field.name(), "");
}
