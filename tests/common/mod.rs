//! Shared fixtures: a small user/tag/account/boss schema on in-memory SQLite.

#![allow(dead_code)]

use crudite::prelude::*;
use serde_json::{Value, json};

pub fn registry() -> Registry {
    let user = Model::builder("User")
        .column(Column::text("name").required().unique())
        .relationship(
            Relationship::one_to_many("tags", "Tag", "user_id")
                .cascade()
                .backref("user"),
        )
        .relationship(Relationship::one_to_many("employees", "Account", "user_id").cascade())
        .validator(FieldValidator::text_length("name", Some(1), Some(100)))
        .crudable(Crudable::new().update(["tags", "employees"]))
        .build()
        .unwrap();

    let boss = Model::builder("Boss")
        .column(Column::text("name").required().unique())
        .crudable(Crudable::new())
        .build()
        .unwrap();

    let account = Model::builder("Account")
        .column(Column::uuid("user_id").required())
        .column(Column::text("username").required().unique())
        .column(Column::text("password").required())
        .column(Column::uuid("boss_id"))
        .relationship(Relationship::many_to_one("user", "User", "user_id"))
        .relationship(Relationship::many_to_one("boss", "Boss", "boss_id").backref("employees"))
        .validator(
            FieldValidator::regex(
                "username",
                "[0-9a-zA-z]+",
                "Usernames may only contain alphanumeric characters",
            )
            .unwrap(),
        )
        .crudable(Crudable::new().no_update(["username"]))
        .build()
        .unwrap();

    let tag = Model::builder("Tag")
        .column(Column::text("name").required())
        .column(Column::uuid("user_id").required())
        .unique_together(["user_id", "name"])
        .crudable(Crudable::new().no_update(["name", "user_id"]))
        .build()
        .unwrap();

    let project = Model::builder("Project")
        .column(Column::text("name").required().unique())
        .relationship(
            Relationship::many_to_many(
                "accounts",
                "Account",
                "project_account",
                "project_id",
                "account_id",
            )
            .backref("projects"),
        )
        .crudable(Crudable::new())
        .build()
        .unwrap();

    let secret = Model::builder("Secret")
        .column(Column::text("code"))
        .crudable(Crudable::new().no_read(["id", "code"]).can_delete(false))
        .build()
        .unwrap();

    let event = Model::builder("Event")
        .column(Column::text("name").required())
        .column(Column::new("held_on", FieldType::Date).required())
        .crudable(Crudable::new())
        .build()
        .unwrap();

    Registry::new(vec![user, boss, account, tag, project, secret, event]).unwrap()
}

pub async fn connect() -> Crud {
    let crud = Crud::connect("sqlite::memory:", registry()).await.unwrap();
    crud.initialize_db(false).await.unwrap();
    crud
}

pub struct Seed {
    pub turner: Value,
    pub hooch: Value,
    pub ninja: Value,
    pub pirate: Value,
    pub boss: Value,
    pub turner_account: Value,
    pub hooch_account: Value,
}

pub async fn create_one(crud: &Crud, data: Value) -> Value {
    crud.create(&data).await.unwrap().remove(0)
}

/// Two users with two tags each, one boss and one account per user.
pub async fn seed(crud: &Crud) -> Seed {
    let turner = create_one(crud, json!({"_model": "User", "name": "Turner"})).await;
    let hooch = create_one(crud, json!({"_model": "User", "name": "Hooch"})).await;
    create_one(crud, json!({"_model": "Tag", "user_id": turner["id"], "name": "Male"})).await;
    create_one(crud, json!({"_model": "Tag", "user_id": hooch["id"], "name": "Male"})).await;
    let ninja =
        create_one(crud, json!({"_model": "Tag", "user_id": turner["id"], "name": "Ninja"})).await;
    let pirate =
        create_one(crud, json!({"_model": "Tag", "user_id": hooch["id"], "name": "Pirate"})).await;
    let boss = create_one(crud, json!({"_model": "Boss", "name": "Howard Hyde"})).await;
    let turner_account = create_one(
        crud,
        json!({
            "_model": "Account",
            "username": "turner_account",
            "password": "password",
            "user_id": turner["id"],
            "boss_id": boss["id"],
        }),
    )
    .await;
    let hooch_account = create_one(
        crud,
        json!({
            "_model": "Account",
            "username": "hooch_account",
            "password": "password",
            "user_id": hooch["id"],
        }),
    )
    .await;
    Seed {
        turner,
        hooch,
        ninja,
        pirate,
        boss,
        turner_account,
        hooch_account,
    }
}

/// `{_model, field, value}` selecting `obj` by `attr`.
pub fn query_from(obj: &Value, attr: &str) -> Value {
    json!({"_model": obj["_model"], "field": attr, "value": obj[attr]})
}

/// Label to count of every entry returned by `count`.
pub async fn counts(crud: &Crud, query: Value) -> Vec<(String, Value)> {
    crud.count(&query)
        .await
        .unwrap()
        .into_iter()
        .map(|c| (c["_label"].as_str().unwrap().to_string(), c["count"].clone()))
        .collect()
}

/// `field` of every read result, in result order.
pub fn column(page: &Value, field: &str) -> Vec<Value> {
    page["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r[field].clone())
        .collect()
}
