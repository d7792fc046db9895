//! Key and value commands.
//!
//! Every handler checks its argument count before touching the store.
//! Handlers that read a value and write something derived from it run
//! inside a single [`Transaction`](crate::storage::Transaction), so either
//! all of their writes land or none do.

use crate::commands::codec::{format_i64, parse_i64};
use crate::commands::error::{CommandError, CommandResult};
use crate::protocol::Reply;
use crate::storage::{Store, Transaction};
use bytes::{Bytes, BytesMut};

/// Rejects the empty key.
pub(crate) fn check_key(key: &Bytes) -> Result<&Bytes, CommandError> {
    if key.is_empty() {
        return Err(CommandError::invalid("empty key"));
    }
    Ok(key)
}

/// GET key
pub fn get(store: &Store, name: &str, args: &[Bytes]) -> CommandResult {
    match args {
        [key] => store
            .get(check_key(key)?)?
            .map(Reply::Bulk)
            .ok_or(CommandError::NotFound),
        _ => Err(CommandError::wrong_arity(name)),
    }
}

/// SET key value
pub fn set(store: &Store, name: &str, args: &[Bytes]) -> CommandResult {
    match args {
        [key, value] => {
            store.put(check_key(key)?, value)?;
            Ok(Reply::ok())
        }
        _ => Err(CommandError::wrong_arity(name)),
    }
}

/// GETSET key value
///
/// Replies with the previous value, or an empty bulk when there was none.
pub fn getset(store: &Store, name: &str, args: &[Bytes]) -> CommandResult {
    match args {
        [key, value] => {
            let key = check_key(key)?;
            let mut tx = store.begin()?;
            let previous = tx.get(key)?;
            tx.put(key, value)?;
            tx.commit()?;
            Ok(Reply::Bulk(previous.unwrap_or_default()))
        }
        _ => Err(CommandError::wrong_arity(name)),
    }
}

/// MSET key value [key value ...]
pub fn mset(store: &Store, name: &str, args: &[Bytes]) -> CommandResult {
    if args.is_empty() || args.len() % 2 != 0 {
        return Err(CommandError::wrong_arity(name));
    }
    for pair in args.chunks_exact(2) {
        check_key(&pair[0])?;
    }

    if let [key, value] = args {
        store.put(key, value)?;
        return Ok(Reply::ok());
    }

    let mut tx = store.begin()?;
    for pair in args.chunks_exact(2) {
        tx.put(&pair[0], &pair[1])?;
    }
    tx.commit()?;
    Ok(Reply::ok())
}

/// DEL key [key ...]
///
/// Deletes the keys that exist and replies with how many there were.
pub fn del(store: &Store, name: &str, args: &[Bytes]) -> CommandResult {
    if args.is_empty() {
        return Err(CommandError::wrong_arity(name));
    }

    for key in args {
        check_key(key)?;
    }

    let mut tx = store.begin()?;
    let mut deleted = 0;
    for key in args {
        if tx.has(key)? {
            tx.delete(key)?;
            deleted += 1;
        }
    }

    if deleted > 0 {
        tx.commit()?;
    } else {
        tx.discard()?;
    }
    Ok(Reply::integer(deleted))
}

/// EXISTS key [key ...]
///
/// Counts present keys against one snapshot. Repeated keys count each time.
pub fn exists(store: &Store, name: &str, args: &[Bytes]) -> CommandResult {
    if args.is_empty() {
        return Err(CommandError::wrong_arity(name));
    }

    for key in args {
        check_key(key)?;
    }

    let snapshot = store.snapshot()?;
    let mut present = 0;
    for key in args {
        if snapshot.has(key)? {
            present += 1;
        }
    }
    Ok(Reply::integer(present))
}

/// RENAME key newkey
pub fn rename(store: &Store, name: &str, args: &[Bytes]) -> CommandResult {
    match args {
        [key, new_key] => {
            let (key, new_key) = (check_key(key)?, check_key(new_key)?);
            let mut tx = store.begin()?;
            let value = tx.get(key)?.ok_or(CommandError::NotFound)?;
            tx.delete(key)?;
            tx.put(new_key, value)?;
            tx.commit()?;
            Ok(Reply::ok())
        }
        _ => Err(CommandError::wrong_arity(name)),
    }
}

/// APPEND key value
///
/// Replies with the length of the value after appending.
pub fn append(store: &Store, name: &str, args: &[Bytes]) -> CommandResult {
    match args {
        [key, suffix] => {
            let key = check_key(key)?;
            let mut tx = store.begin()?;
            let current = tx.get(key)?.unwrap_or_default();

            let mut value = BytesMut::with_capacity(current.len() + suffix.len());
            value.extend_from_slice(&current);
            value.extend_from_slice(suffix);
            let len = value.len();

            tx.put(key, value)?;
            tx.commit()?;
            Ok(Reply::integer(len as i64))
        }
        _ => Err(CommandError::wrong_arity(name)),
    }
}

/// STRLEN key
pub fn strlen(store: &Store, name: &str, args: &[Bytes]) -> CommandResult {
    match args {
        [key] => {
            let len = store.get(check_key(key)?)?.map_or(0, |v| v.len());
            Ok(Reply::integer(len as i64))
        }
        _ => Err(CommandError::wrong_arity(name)),
    }
}

/// INCR key
pub fn incr(store: &Store, name: &str, args: &[Bytes]) -> CommandResult {
    match args {
        [key] => add_to_counter(store, check_key(key)?, 1),
        _ => Err(CommandError::wrong_arity(name)),
    }
}

/// INCRBY key delta
pub fn incrby(store: &Store, name: &str, args: &[Bytes]) -> CommandResult {
    match args {
        [key, delta] => {
            let key = check_key(key)?;
            let delta = parse_i64(delta).ok_or(CommandError::NotAnInteger)?;
            add_to_counter(store, key, delta)
        }
        _ => Err(CommandError::wrong_arity(name)),
    }
}

fn add_to_counter(store: &Store, key: &Bytes, delta: i64) -> CommandResult {
    let mut tx = store.begin()?;
    let current = read_counter(&tx, key)?;
    let next = current.checked_add(delta).ok_or(CommandError::Overflow)?;
    tx.put(key, format_i64(next))?;
    tx.commit()?;
    Ok(Reply::integer(next))
}

/// Reads a counter. An absent key counts as 0.
fn read_counter(tx: &Transaction<'_>, key: &[u8]) -> Result<i64, CommandError> {
    match tx.get(key)? {
        Some(value) => parse_i64(&value).ok_or(CommandError::NotAnInteger),
        None => Ok(0),
    }
}
