//! End-to-end tests against `engine::Database`: the surface the CLI
//! harness drives. Exercises table lifecycle, the non-transactional
//! administrative path, and the hash-join driver across two tables.

mod common;

use common::{database_with_table, rec};
use small_tree::config::{EngineConfig, TreeConfig};
use small_tree::engine::Database;
use small_tree::page::Value;

#[test]
fn insert_find_delete_round_trip_through_the_administrative_path() {
    let (db, _tmp, table) = database_with_table();
    db.insert(table, 1, Value::from_slice(b"hello")).unwrap();

    let trx = db.begin_trx();
    let found = db.find(table, 1, trx).unwrap();
    assert_eq!(found.key, 1);
    db.commit_trx(trx).unwrap();

    let deleted = db.delete(table, 1).unwrap();
    assert_eq!(deleted.key, 1);
    assert!(db.delete(table, 1).is_err());
}

#[test]
fn find_range_reflects_administrative_inserts_without_a_transaction() {
    let (db, _tmp, table) = database_with_table();
    for k in 0..30u64 {
        db.insert(table, k, Value::zero()).unwrap();
    }
    let rows = db.find_range(table, 10, 19).unwrap();
    assert_eq!(rows.len(), 10);
    assert_eq!(rows.first().unwrap().key, 10);
    assert_eq!(rows.last().unwrap().key, 19);
}

#[test]
fn closing_a_table_rejects_further_access_by_that_table_id() {
    let (db, _tmp, table) = database_with_table();
    db.insert(table, 1, Value::zero()).unwrap();
    db.close_table(table).unwrap();
    assert!(db.insert(table, 2, Value::zero()).is_err());
    assert!(db.table_id_by_name("t").is_none());
}

#[test]
fn hash_join_returns_one_pair_per_shared_key_and_ignores_the_rest() {
    let db = Database::new(EngineConfig::default(), TreeConfig::default());
    let tmp_left = tempfile::NamedTempFile::new().unwrap();
    let tmp_right = tempfile::NamedTempFile::new().unwrap();
    let left = db.open_table("left", tmp_left.path()).unwrap();
    let right = db.open_table("right", tmp_right.path()).unwrap();

    for k in 0..20u64 {
        db.insert(left, k, rec(k, "left").value).unwrap();
    }
    for k in 10..30u64 {
        db.insert(right, k, rec(k, "right").value).unwrap();
    }

    let mut pairs = db.hash_join(left, right).unwrap();
    pairs.sort_by_key(|(l, _)| l.key);
    let keys: Vec<u64> = pairs.iter().map(|(l, _)| l.key).collect();
    assert_eq!(keys, (10..20).collect::<Vec<_>>());
    for (l, r) in &pairs {
        assert_eq!(l.key, r.key);
    }
}
