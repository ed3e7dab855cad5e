/*!
 * Per-operation options for `Connection` (distilled spec §4.3).
 */

use crate::bson::{Bson, Document};
use crate::wire::query_flags;
use crate::wire::QueryFlags;

#[derive(Debug, Clone, Copy, Default)]
pub struct ReadFlags {
    pub tailable: bool,
    pub slave_ok: bool,
    pub no_cursor_timeout: bool,
    pub await_data: bool,
    pub exhaust: bool,
    pub partial: bool,
}

impl ReadFlags {
    pub fn to_wire(self) -> QueryFlags {
        let mut flags = QueryFlags::none();
        if self.tailable {
            flags = flags.with(query_flags::TAILABLE_CURSOR);
        }
        if self.slave_ok {
            flags = flags.with(query_flags::SLAVE_OK);
        }
        if self.no_cursor_timeout {
            flags = flags.with(query_flags::NO_CURSOR_TIMEOUT);
        }
        if self.await_data {
            flags = flags.with(query_flags::AWAIT_DATA);
        }
        if self.exhaust {
            flags = flags.with(query_flags::EXHAUST);
        }
        if self.partial {
            flags = flags.with(query_flags::PARTIAL);
        }
        flags
    }
}

#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub projection: Option<Document>,
    pub skip: i32,
    /// Mapped to the wire's `num_return`: 0 for server default, negative
    /// values request at most N documents and close the cursor.
    pub batch_size: i32,
    pub flags: ReadFlags,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WriteFlags {
    pub continue_on_error: bool,
    pub upsert: bool,
    pub multi: bool,
    pub single: bool,
}

impl WriteFlags {
    pub fn insert_bits(self) -> u32 {
        use crate::wire::insert_flags;
        if self.continue_on_error {
            insert_flags::CONTINUE_ON_ERROR
        } else {
            0
        }
    }

    pub fn update_bits(self) -> u32 {
        use crate::wire::update_flags;
        let mut bits = 0;
        if self.upsert {
            bits |= update_flags::UPSERT;
        }
        if self.multi {
            bits |= update_flags::MULTI_UPDATE;
        }
        bits
    }

    pub fn delete_bits(self) -> u32 {
        use crate::wire::delete_flags;
        if self.single {
            delete_flags::SINGLE_REMOVE
        } else {
            0
        }
    }
}

/// Either `{w: 0}` (no getLastError issued) or `{w: n|"majority", j?, wtimeout?}`.
#[derive(Debug, Clone)]
pub enum WriteConcern {
    Unacknowledged,
    Acknowledged { w: Bson, j: bool, wtimeout_ms: Option<i32> },
}

impl WriteConcern {
    pub fn majority() -> Self {
        WriteConcern::Acknowledged { w: Bson::from("majority"), j: false, wtimeout_ms: None }
    }

    pub fn acknowledged(n: i32) -> Self {
        WriteConcern::Acknowledged { w: Bson::Int32(n), j: false, wtimeout_ms: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_flags_combine() {
        let flags = ReadFlags { tailable: true, await_data: true, ..Default::default() }.to_wire();
        assert!(flags.contains(query_flags::TAILABLE_CURSOR));
        assert!(flags.contains(query_flags::AWAIT_DATA));
        assert!(!flags.contains(query_flags::SLAVE_OK));
    }

    #[test]
    fn write_flags_map_to_correct_bits() {
        let flags = WriteFlags { upsert: true, multi: true, ..Default::default() };
        assert_eq!(flags.update_bits(), crate::wire::update_flags::UPSERT | crate::wire::update_flags::MULTI_UPDATE);
    }
}
