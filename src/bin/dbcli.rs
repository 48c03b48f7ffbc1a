//! Interactive REPL harness: a thin line-oriented front end
//! over `engine::Database`, one command per line. Tables are opened
//! under a short name and addressed by that name from then on; records
//! are addressed by their `u64` primary key.

use std::io::{self, BufRead, Write};

use small_tree::config::{EngineConfig, TreeConfig};
use small_tree::engine::Database;
use small_tree::log::init_log;
use small_tree::page::Value;
use small_tree::{DbError, DbResult};

fn main() {
    init_log();
    let db = Database::new(EngineConfig::default(), TreeConfig::default());

    let stdin = io::stdin();
    print!("> ");
    io::stdout().flush().ok();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.is_empty() {
            print!("> ");
            io::stdout().flush().ok();
            continue;
        }

        match dispatch(&db, &words) {
            Ok(Some(output)) => println!("{}", output),
            Ok(None) => {}
            Err(Quit) => break,
        }
        print!("> ");
        io::stdout().flush().ok();
    }
}

struct Quit;

fn dispatch(db: &Database, words: &[&str]) -> Result<Option<String>, Quit> {
    if matches!(words[0], "quit" | "exit") {
        return Err(Quit);
    }

    let result = match words[0] {
        "open" if words.len() == 3 => cmd_open(db, words[1], words[2]),
        "close" if words.len() == 2 => cmd_close(db, words[1]),
        "begin" if words.len() == 1 => Ok(format!("trxid {}", db.begin_trx())),
        "commit" if words.len() == 2 => parse_u64(words[1]).and_then(|t| db.commit_trx(t)).map(|_| "ok".to_string()),
        "abort" if words.len() == 2 => parse_u64(words[1]).and_then(|t| db.abort_trx(t)).map(|_| "ok".to_string()),
        "insert" if words.len() == 4 => cmd_insert(db, words[1], words[2], words[3]),
        "find" if words.len() == 3 || words.len() == 4 => cmd_find(db, words[1], words[2], words.get(3).copied()),
        "update" if words.len() == 4 || words.len() == 5 => {
            cmd_update(db, words[1], words[2], words[3], words.get(4).copied())
        }
        "delete" if words.len() == 3 => cmd_delete(db, words[1], words[2]),
        "range" if words.len() == 4 => cmd_range(db, words[1], words[2], words[3]),
        "join" if words.len() == 3 => cmd_join(db, words[1], words[2]),
        _ => Err(DbError::Corrupt(format!("unrecognized command: {}", words.join(" ")))),
    };

    match result {
        Ok(output) => Ok(Some(output)),
        Err(e) => {
            eprintln!("error: {:?}", e);
            Ok(None)
        }
    }
}

fn parse_u64(word: &str) -> DbResult<u64> {
    word.parse::<u64>().map_err(|_| DbError::Corrupt(format!("not a number: {}", word)))
}

fn resolve_table(db: &Database, token: &str) -> DbResult<small_tree::catalog::TableId> {
    if let Ok(raw) = token.parse::<u32>() {
        return Ok(small_tree::catalog::TableId(raw));
    }
    db.table_id_by_name(token)
        .ok_or_else(|| DbError::NotOpen(token.to_string()))
}

fn cmd_open(db: &Database, name: &str, path: &str) -> DbResult<String> {
    let table_id = db.open_table(name, path)?;
    log::info!("opened {} -> {:?}", name, table_id);
    Ok(format!("opened {} as {:?}", name, table_id))
}

fn cmd_close(db: &Database, table: &str) -> DbResult<String> {
    let table_id = resolve_table(db, table)?;
    db.close_table(table_id)?;
    Ok("closed".to_string())
}

fn cmd_insert(db: &Database, table: &str, key: &str, value: &str) -> DbResult<String> {
    let table_id = resolve_table(db, table)?;
    let key = parse_u64(key)?;
    db.insert(table_id, key, Value::from_slice(value.as_bytes()))?;
    Ok("inserted".to_string())
}

fn cmd_find(db: &Database, table: &str, key: &str, trx: Option<&str>) -> DbResult<String> {
    let table_id = resolve_table(db, table)?;
    let key = parse_u64(key)?;
    match trx {
        Some(trx) => {
            let trx = parse_u64(trx)?;
            let record = db.find(table_id, key, trx)?;
            Ok(format_record(&record))
        }
        None => {
            let trx = db.begin_trx();
            let record = db.find(table_id, key, trx)?;
            db.commit_trx(trx)?;
            Ok(format_record(&record))
        }
    }
}

/// Decode an `update` value: a `0x`-prefixed or bare all-hex-digit
/// token is read as hex bytes, anything else is taken as plain ASCII —
/// matching `insert`'s plain-ASCII-only values, which never go through
/// this path.
fn parse_hex_or_ascii_value(word: &str) -> Value {
    let hex_digits = word.strip_prefix("0x").unwrap_or(word);
    if !hex_digits.is_empty() && hex_digits.len() % 2 == 0 && hex_digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        if let Ok(bytes) = hex::decode(hex_digits) {
            return Value::from_slice(&bytes);
        }
    }
    Value::from_slice(word.as_bytes())
}

fn cmd_update(db: &Database, table: &str, key: &str, value: &str, trx: Option<&str>) -> DbResult<String> {
    let table_id = resolve_table(db, table)?;
    let key = parse_u64(key)?;
    let value = parse_hex_or_ascii_value(value);
    match trx {
        Some(trx) => {
            let trx = parse_u64(trx)?;
            db.update(table_id, key, value, trx)?;
        }
        None => {
            let trx = db.begin_trx();
            db.update(table_id, key, value, trx)?;
            db.commit_trx(trx)?;
        }
    }
    Ok("updated".to_string())
}

fn cmd_delete(db: &Database, table: &str, key: &str) -> DbResult<String> {
    let table_id = resolve_table(db, table)?;
    let key = parse_u64(key)?;
    let record = db.delete(table_id, key)?;
    Ok(format!("deleted {}", format_record(&record)))
}

fn cmd_range(db: &Database, table: &str, start: &str, end: &str) -> DbResult<String> {
    let table_id = resolve_table(db, table)?;
    let start = parse_u64(start)?;
    let end = parse_u64(end)?;
    let records = db.find_range(table_id, start, end)?;
    Ok(records.iter().map(format_record).collect::<Vec<_>>().join("\n"))
}

fn cmd_join(db: &Database, left: &str, right: &str) -> DbResult<String> {
    let left_id = resolve_table(db, left)?;
    let right_id = resolve_table(db, right)?;
    let pairs = db.hash_join(left_id, right_id)?;
    Ok(pairs
        .iter()
        .map(|(l, r)| format!("{} | {}", format_record(l), format_record(r)))
        .collect::<Vec<_>>()
        .join("\n"))
}

fn format_record(record: &small_tree::page::Record) -> String {
    let text = String::from_utf8_lossy(&record.value.0);
    format!("{}: {}", record.key, text.trim_end_matches('\0'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn parse_hex_or_ascii_value_decodes_0x_prefixed_and_bare_hex() {
        assert_eq!(parse_hex_or_ascii_value("0x68656c6c6f"), Value::from_slice(b"hello"));
        assert_eq!(parse_hex_or_ascii_value("68656c6c6f"), Value::from_slice(b"hello"));
    }

    #[test]
    fn parse_hex_or_ascii_value_falls_back_to_ascii() {
        assert_eq!(parse_hex_or_ascii_value("plainvalue"), Value::from_slice(b"plainvalue"));
        // odd-length hex-looking token is not valid hex, so it is ASCII.
        assert_eq!(parse_hex_or_ascii_value("abc"), Value::from_slice(b"abc"));
    }

    #[test]
    fn update_command_accepts_a_hex_supplied_value() {
        let db = Database::new(EngineConfig::default(), TreeConfig::default());
        let tmp = NamedTempFile::new().unwrap();
        let table_id = db.open_table("t", tmp.path()).unwrap();
        db.insert(table_id, 1, Value::from_slice(b"orig")).unwrap();

        let out = cmd_update(&db, "t", "1", "0x68656c6c6f", None).unwrap();
        assert_eq!(out, "updated");

        let trx = db.begin_trx();
        let record = db.find(table_id, 1, trx).unwrap();
        db.commit_trx(trx).unwrap();
        assert_eq!(record.value, Value::from_slice(b"hello"));
    }
}
