/*!
 * Wire op codes (distilled spec §4.2). Only the legacy OP_QUERY/OP_REPLY
 * pair plus OP_GET_MORE/OP_KILL_CURSORS are implemented; OP_MSG is named
 * here as a documented extension point (see Open Question 1 in DESIGN.md).
 */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Reply,
    Update,
    Insert,
    Query,
    GetMore,
    Delete,
    KillCursors,
    Msg,
}

impl OpCode {
    pub fn as_i32(self) -> i32 {
        match self {
            OpCode::Reply => 1,
            OpCode::Update => 2001,
            OpCode::Insert => 2002,
            OpCode::Query => 2004,
            OpCode::GetMore => 2005,
            OpCode::Delete => 2006,
            OpCode::KillCursors => 2007,
            OpCode::Msg => 2013,
        }
    }

    pub fn from_i32(code: i32) -> Option<Self> {
        match code {
            1 => Some(OpCode::Reply),
            2001 => Some(OpCode::Update),
            2002 => Some(OpCode::Insert),
            2004 => Some(OpCode::Query),
            2005 => Some(OpCode::GetMore),
            2006 => Some(OpCode::Delete),
            2007 => Some(OpCode::KillCursors),
            2013 => Some(OpCode::Msg),
            _ => None,
        }
    }
}
