//! GETBIT, SETBIT and BITCOUNT.

use crate::commands::codec::{self, parse_i64};
use crate::commands::error::{CommandError, CommandResult};
use crate::commands::strings::check_key;
use crate::protocol::Reply;
use crate::storage::Store;
use bytes::Bytes;

/// Bit offsets must stay below this, which caps a value at 512 MB.
pub const MAX_BIT_OFFSET: i64 = 1 << 32;

/// Parses a bit offset. `None` means the offset is negative.
fn parse_offset(arg: &[u8]) -> Result<Option<u64>, CommandError> {
    let offset = parse_i64(arg).ok_or_else(|| CommandError::invalid("bit offset is not an integer"))?;
    if offset < 0 {
        return Ok(None);
    }
    if offset >= MAX_BIT_OFFSET {
        return Err(CommandError::invalid("bit offset is out of range"));
    }
    Ok(Some(offset as u64))
}

/// GETBIT key offset
pub fn getbit(store: &Store, name: &str, args: &[Bytes]) -> CommandResult {
    match args {
        [key, offset] => {
            let key = check_key(key)?;
            let offset = match parse_offset(offset)? {
                Some(offset) => offset,
                None => return Ok(Reply::integer(0)),
            };
            let bit = store
                .get(key)?
                .map_or(0, |value| codec::get_bit(&value, offset));
            Ok(Reply::integer(bit.into()))
        }
        _ => Err(CommandError::wrong_arity(name)),
    }
}

/// SETBIT key offset bit
///
/// Replies with the bit's value before the call. The value is only
/// rewritten when the bit actually changes.
pub fn setbit(store: &Store, name: &str, args: &[Bytes]) -> CommandResult {
    match args {
        [key, offset, bit] => {
            let key = check_key(key)?;
            let on = match &bit[..] {
                b"1" => true,
                b"0" => false,
                _ => return Err(CommandError::invalid("bit is not an integer or out of range")),
            };
            let offset = match parse_offset(offset)? {
                Some(offset) => offset,
                None => return Ok(Reply::integer(0)),
            };

            let mut tx = store.begin()?;
            let current = tx.get(key)?.unwrap_or_default();
            if codec::get_bit(&current, offset) == u8::from(on) {
                tx.discard()?;
                return Ok(Reply::integer(u8::from(on).into()));
            }

            let mut value = current.to_vec();
            let previous = codec::set_bit(&mut value, offset, on);
            tx.put(key, value)?;
            tx.commit()?;
            Ok(Reply::integer(previous.into()))
        }
        _ => Err(CommandError::wrong_arity(name)),
    }
}

/// BITCOUNT key [start end]
pub fn bitcount(store: &Store, name: &str, args: &[Bytes]) -> CommandResult {
    let (key, range) = match args {
        [key] => (key, None),
        [key, start, end] => {
            let start = parse_i64(start).ok_or(CommandError::NotAnInteger)?;
            let end = parse_i64(end).ok_or(CommandError::NotAnInteger)?;
            (key, Some((start, end)))
        }
        _ => return Err(CommandError::wrong_arity(name)),
    };

    let value = match store.get(check_key(key)?)? {
        Some(value) => value,
        None => return Ok(Reply::integer(0)),
    };

    let selected = match range {
        None => &value[..],
        Some((start, end)) => match codec::clamp_range(value.len(), start, end) {
            Some((from, to)) => &value[from..=to],
            None => return Ok(Reply::integer(0)),
        },
    };
    Ok(Reply::integer(codec::count_bits(selected) as i64))
}

#[cfg(test)]
mod tests {
    use crate::commands::engine::CommandEngine;
    use crate::protocol::Reply;
    use crate::storage::Store;
    use bytes::Bytes;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn create_engine() -> (CommandEngine, Arc<Store>) {
        let store = Arc::new(Store::in_memory().unwrap());
        (CommandEngine::standard(Arc::clone(&store)), store)
    }

    fn run(engine: &CommandEngine, args: &[&str]) -> Reply {
        engine.execute(Reply::request(args.iter().map(|s| s.to_string())))
    }

    #[test]
    fn test_getbit() {
        let (engine, _) = create_engine();
        run(&engine, &["SET", "k", "a"]);

        assert_eq!(run(&engine, &["GETBIT", "k", "0"]), Reply::integer(0));
        assert_eq!(run(&engine, &["GETBIT", "k", "1"]), Reply::integer(1));
        assert_eq!(run(&engine, &["GETBIT", "k", "7"]), Reply::integer(1));
        assert_eq!(run(&engine, &["GETBIT", "k", "100"]), Reply::integer(0));
        assert_eq!(run(&engine, &["GETBIT", "missing", "3"]), Reply::integer(0));
        assert_eq!(run(&engine, &["GETBIT", "k", "-1"]), Reply::integer(0));
    }

    #[test]
    fn test_setbit_returns_previous_bit() {
        let (engine, _) = create_engine();

        assert_eq!(run(&engine, &["SETBIT", "k", "7", "1"]), Reply::integer(0));
        assert_eq!(run(&engine, &["SETBIT", "k", "7", "1"]), Reply::integer(1));
        assert_eq!(run(&engine, &["SETBIT", "k", "7", "0"]), Reply::integer(1));
        assert_eq!(run(&engine, &["SETBIT", "k", "7", "0"]), Reply::integer(0));
    }

    #[test]
    fn test_setbit_unchanged_bit_writes_nothing() {
        let (engine, store) = create_engine();
        run(&engine, &["SETBIT", "k", "3", "1"]);
        let writes = store.stats().writes;

        assert_eq!(run(&engine, &["SETBIT", "k", "3", "1"]), Reply::integer(1));
        assert_eq!(run(&engine, &["SETBIT", "fresh", "9", "0"]), Reply::integer(0));
        assert_eq!(store.stats().writes, writes);
        assert_eq!(run(&engine, &["EXISTS", "fresh"]), Reply::integer(0));
    }

    #[test]
    fn test_setbit_zero_extends() {
        let (engine, store) = create_engine();
        run(&engine, &["SET", "k", "a"]);

        assert_eq!(run(&engine, &["SETBIT", "k", "23", "1"]), Reply::integer(0));
        assert_eq!(
            store.get(b"k").unwrap(),
            Some(Bytes::from_static(b"a\x00\x01"))
        );
        assert_eq!(run(&engine, &["STRLEN", "k"]), Reply::integer(3));
    }

    #[test]
    fn test_setbit_argument_errors() {
        let (engine, store) = create_engine();

        assert!(run(&engine, &["SETBIT", "k", "1", "2"]).is_error());
        assert!(run(&engine, &["SETBIT", "k", "x", "1"]).is_error());
        assert!(run(&engine, &["SETBIT", "k", "4294967296", "1"]).is_error());
        assert!(run(&engine, &["SETBIT", "k", "1"]).is_error());
        assert_eq!(run(&engine, &["SETBIT", "k", "-3", "1"]), Reply::integer(0));
        assert!(store.is_empty());
    }

    #[test]
    fn test_bitcount() {
        let (engine, _) = create_engine();
        run(&engine, &["SET", "k", "foobar"]);

        assert_eq!(run(&engine, &["BITCOUNT", "k"]), Reply::integer(26));
        assert_eq!(run(&engine, &["BITCOUNT", "k", "0", "0"]), Reply::integer(4));
        assert_eq!(run(&engine, &["BITCOUNT", "k", "1", "1"]), Reply::integer(6));
        assert_eq!(run(&engine, &["BITCOUNT", "k", "0", "-1"]), Reply::integer(26));
        assert_eq!(run(&engine, &["BITCOUNT", "k", "-2", "-1"]), Reply::integer(7));
        assert_eq!(run(&engine, &["BITCOUNT", "k", "4", "2"]), Reply::integer(0));
        assert_eq!(run(&engine, &["BITCOUNT", "missing"]), Reply::integer(0));
        assert!(run(&engine, &["BITCOUNT", "k", "0"]).is_error());
    }

    proptest! {
        #[test]
        fn prop_setbit_then_getbit(offset in 0u64..2048, bit in 0u8..2, seed in "[a-z]{0,16}") {
            let (engine, _) = create_engine();
            if !seed.is_empty() {
                run(&engine, &["SET", "k", seed.as_str()]);
            }
            let offset = offset.to_string();
            let bit = bit.to_string();

            let before = run(&engine, &["GETBIT", "k", offset.as_str()]);
            let previous = run(&engine, &["SETBIT", "k", offset.as_str(), bit.as_str()]);
            prop_assert_eq!(previous, before);

            let after = run(&engine, &["GETBIT", "k", offset.as_str()]);
            prop_assert_eq!(after.to_string(), format!("(integer) {}", bit));
        }
    }
}
