//! Count queries end to end on in-memory SQLite.

mod common;

use common::*;
use crudite::prelude::*;
use pretty_assertions::assert_eq;
use serde_json::json;

fn labelled(pairs: &[(&str, i64)]) -> Vec<(String, serde_json::Value)> {
    pairs.iter().map(|(l, c)| (l.to_string(), json!(c))).collect()
}

#[tokio::test]
async fn test_single_basic_query() {
    let crud = connect().await;
    seed(&crud).await;

    assert_eq!(counts(&crud, json!("User")).await, labelled(&[("User", 2)]));
    assert_eq!(counts(&crud, json!({"_model": "User"})).await, labelled(&[("User", 2)]));
}

#[tokio::test]
async fn test_multi_basic_query() {
    let crud = connect().await;
    seed(&crud).await;

    let expected = labelled(&[("User", 2), ("Tag", 4)]);
    assert_eq!(counts(&crud, json!(["User", "Tag"])).await, expected);
    assert_eq!(
        counts(&crud, json!([{"_model": "User"}, {"_model": "Tag"}])).await,
        expected
    );
}

#[tokio::test]
async fn test_complex_queries_with_labels() {
    let crud = connect().await;
    seed(&crud).await;

    let hooch = json!({
        "_model": "User",
        "_label": "HoochCount",
        "or": [
            {"field": "name", "value": "Hooch"},
            {"field": "name", "value": "Hoochert"},
        ]
    });
    let turner = json!({"_model": "User", "_label": "TurnerCount", "field": "name", "value": "Turner"});
    let male = json!({"_model": "Tag", "_label": "MaleCount", "field": "name", "value": "Male"});

    assert_eq!(
        counts(&crud, json!([hooch, turner, male, {"_model": "User"}])).await,
        labelled(&[("HoochCount", 1), ("TurnerCount", 1), ("MaleCount", 2), ("User", 2)])
    );
}

#[tokio::test]
async fn test_count_entry_shape() {
    let crud = connect().await;
    seed(&crud).await;

    let result = crud
        .count(&json!({"_model": "tags", "field": "name", "value": "Ninja"}))
        .await
        .unwrap();
    assert_eq!(result, vec![json!({"_model": "tags", "_label": "tags", "count": 1})]);
}

#[tokio::test]
async fn test_groupby() {
    let crud = connect().await;
    seed(&crud).await;

    let result = crud
        .count(&json!({"_model": "Tag", "groupby": "name"}))
        .await
        .unwrap();
    assert_eq!(
        result[0]["count"],
        json!([
            {"name": "Male", "count": 2},
            {"name": "Ninja", "count": 1},
            {"name": "Pirate", "count": 1},
        ])
    );
}

#[tokio::test]
async fn test_groupby_null_key_counts_zero() {
    let crud = connect().await;
    let seed = seed(&crud).await;

    let result = crud
        .count(&json!({"_model": "Account", "groupby": ["boss_id"]}))
        .await
        .unwrap();
    assert_eq!(
        result[0]["count"],
        json!([
            {"boss_id": null, "count": 0},
            {"boss_id": seed.boss["id"], "count": 1},
        ])
    );
}

#[tokio::test]
async fn test_groupby_with_subquery() {
    let crud = connect().await;
    seed(&crud).await;

    let result = crud
        .count(&json!({
            "_model": "Tag",
            "groupby": ["name"],
            "field": "user_id",
            "comparison": "in",
            "value": {"_model": "User", "select": "id", "field": "name", "value": "Turner"}
        }))
        .await
        .unwrap();
    assert_eq!(
        result[0]["count"],
        json!([{"name": "Male", "count": 1}, {"name": "Ninja", "count": 1}])
    );
}

#[tokio::test]
async fn test_compound_subquery() {
    let crud = connect().await;
    seed(&crud).await;

    let result = crud
        .count(&json!({
            "_model": "Tag",
            "groupby": ["name"],
            "field": "user_id",
            "comparison": "in",
            "value": {
                "_model": "User",
                "select": "id",
                "or": [
                    {"field": "name", "value": "Turner"},
                    {"field": "name", "value": "Hooch"},
                ]
            }
        }))
        .await
        .unwrap();
    assert_eq!(
        result[0]["count"],
        json!([
            {"name": "Male", "count": 2},
            {"name": "Ninja", "count": 1},
            {"name": "Pirate", "count": 1},
        ])
    );
}

#[tokio::test]
async fn test_distinct_columns() {
    let crud = connect().await;
    seed(&crud).await;

    assert_eq!(
        counts(&crud, json!({"_model": "Tag", "distinct": ["name"]})).await,
        labelled(&[("Tag", 3)])
    );
}

#[tokio::test]
async fn test_and_or_bounds() {
    let crud = connect().await;
    seed(&crud).await;

    let male = json!({"field": "name", "value": "Male"});
    let ninja = json!({"field": "name", "value": "Ninja"});
    let turners = json!({"field": "user.name", "value": "Turner"});

    let count = |label: &str, counts: Vec<(String, serde_json::Value)>| {
        counts
            .into_iter()
            .find(|(l, _)| l == label)
            .and_then(|(_, c)| c.as_i64())
            .unwrap()
    };
    let all = counts(
        &crud,
        json!([
            {"_model": "Tag", "_label": "male", "and": [male.clone()]},
            {"_model": "Tag", "_label": "turners", "and": [turners.clone()]},
            {"_model": "Tag", "_label": "both", "and": [male.clone(), turners.clone()]},
            {"_model": "Tag", "_label": "either", "or": [ninja.clone(), turners.clone()]},
            {"_model": "Tag", "_label": "ninja", "or": [ninja.clone()]},
        ]),
    )
    .await;

    let male = count("male", all.clone());
    let turners = count("turners", all.clone());
    let both = count("both", all.clone());
    assert_eq!((male, turners, both), (2, 2, 1));
    assert!(both <= male.min(turners));

    let either = count("either", all.clone());
    let ninja = count("ninja", all);
    assert_eq!(either, 2);
    assert!(either >= ninja.max(turners));
}

#[tokio::test]
async fn test_empty_logical_lists_do_not_filter() {
    let crud = connect().await;
    seed(&crud).await;

    assert_eq!(
        counts(&crud, json!([{"_model": "User", "or": []}, {"_model": "User", "and": []}])).await,
        labelled(&[("User", 2), ("User", 2)])
    );
    let page = crud
        .read(&json!({"_model": "User", "or": []}), &json!(["name"]), &json!("name"), None, None)
        .await
        .unwrap();
    assert_eq!(page["total"], json!(2));
}

#[tokio::test]
async fn test_unreadable_model_counts_zero() {
    let crud = connect().await;

    assert_eq!(counts(&crud, json!("Secret")).await, labelled(&[("Secret", 0)]));
    let grouped = crud
        .count(&json!({"_model": "Secret", "groupby": ["code"]}))
        .await
        .unwrap();
    assert_eq!(grouped[0]["count"], json!([]));
}

#[tokio::test]
async fn test_count_errors_are_wrapped() {
    let crud = connect().await;

    let err = crud.count(&json!("Nope")).await.unwrap_err();
    assert_eq!(err.operation(), "count");
    assert_eq!(err.kind(), ErrorKind::UnknownModel);
    assert!(err.to_string().starts_with("crud.count failed: "));

    let err = crud.count(&json!({"and": [{"field": "name"}]})).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MissingModel);

    let err = crud.count(&json!(3)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidQueryShape);
}

async fn seed_events(crud: &Crud) {
    for (name, held_on) in [
        ("launch", "2017-01-05"),
        ("review", "2017-01-20"),
        ("launch", "2017-02-10"),
        ("retro", "2017-04-01"),
    ] {
        create_one(crud, json!({"_model": "Event", "name": name, "held_on": held_on})).await;
    }
}

#[tokio::test]
async fn test_count_by_date_buckets_within_range() {
    let crud = connect().await;
    seed_events(&crud).await;

    let range = DateRange::new().start("2017-01-01").end("2017-02-28");
    let buckets = crud
        .count_by_date(&json!("Event"), "held_on", &range, Interval::months(1))
        .await
        .unwrap();
    assert_eq!(
        buckets,
        vec![
            json!({"held_on": "2017-01-01", "count": 2}),
            json!({"held_on": "2017-02-01", "count": 1}),
        ]
    );

    let launches = crud
        .count_by_date(
            &json!({"_model": "Event", "field": "name", "value": "launch"}),
            "held_on",
            &range,
            Interval::months(1),
        )
        .await
        .unwrap();
    assert_eq!(
        launches,
        vec![
            json!({"held_on": "2017-01-01", "count": 1}),
            json!({"held_on": "2017-02-01", "count": 1}),
        ]
    );
}

#[tokio::test]
async fn test_count_by_date_fills_empty_buckets() {
    let crud = connect().await;
    seed_events(&crud).await;

    let range = DateRange::new().start("2017-01-01").end("2017-01-21");
    let weekly: Interval = "1 week".parse().unwrap();
    let buckets = crud
        .count_by_date(&json!("Event"), "held_on", &range, weekly)
        .await
        .unwrap();
    assert_eq!(
        buckets,
        vec![
            json!({"held_on": "2017-01-01", "count": 1}),
            json!({"held_on": "2017-01-08", "count": 0}),
            json!({"held_on": "2017-01-15", "count": 1}),
        ]
    );
}

#[tokio::test]
async fn test_count_by_date_rejects_non_date_field() {
    let crud = connect().await;
    let range = DateRange::new().start("2017-01-01").end("2017-01-21");

    let err = crud
        .count_by_date(&json!("Event"), "name", &range, Interval::days(1))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidQueryShape);

    let err = crud
        .count_by_date(&json!(["Event", "User"]), "held_on", &range, Interval::days(1))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidQueryShape);
}

#[tokio::test]
async fn test_from_pool_shares_the_database() {
    let crud = connect().await;
    seed(&crud).await;
    assert_eq!(crud.dialect(), Dialect::Sqlite);
    assert_eq!(crud.registry().len(), 7);

    let other = Crud::from_pool(crud.pool().clone(), registry(), crud.dialect());
    assert_eq!(counts(&other, json!("User")).await, labelled(&[("User", 2)]));
}
