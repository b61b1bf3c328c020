//! Wire protocol types

use bson::Document;

/// Size of the standard message header
pub const HEADER_LEN: usize = 16;

/// Wire protocol opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    OpReply,       // Legacy response to OP_QUERY
    OpUpdate,      // Removed
    OpInsert,      // Removed
    OpQuery,       // Legacy, still used for the initial handshake
    OpGetMore,     // Removed
    OpDelete,      // Removed
    OpKillCursors, // Removed
    OpCompressed,
    OpMsg, // Current
    Unknown(i32),
}

impl From<i32> for OpCode {
    fn from(value: i32) -> Self {
        match value {
            1 => OpCode::OpReply,
            2001 => OpCode::OpUpdate,
            2002 => OpCode::OpInsert,
            2004 => OpCode::OpQuery,
            2005 => OpCode::OpGetMore,
            2006 => OpCode::OpDelete,
            2007 => OpCode::OpKillCursors,
            2012 => OpCode::OpCompressed,
            2013 => OpCode::OpMsg,
            other => OpCode::Unknown(other),
        }
    }
}

impl From<OpCode> for i32 {
    fn from(value: OpCode) -> Self {
        match value {
            OpCode::OpReply => 1,
            OpCode::OpUpdate => 2001,
            OpCode::OpInsert => 2002,
            OpCode::OpQuery => 2004,
            OpCode::OpGetMore => 2005,
            OpCode::OpDelete => 2006,
            OpCode::OpKillCursors => 2007,
            OpCode::OpCompressed => 2012,
            OpCode::OpMsg => 2013,
            OpCode::Unknown(code) => code,
        }
    }
}

/// Message header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgHeader {
    pub message_length: i32,
    pub request_id: i32,
    pub response_to: i32,
    pub op_code: OpCode,
}

/// OP_MSG flag bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MsgFlags(pub u32);

impl MsgFlags {
    pub const CHECKSUM_PRESENT: u32 = 1;
    pub const MORE_TO_COME: u32 = 1 << 1;
    pub const EXHAUST_ALLOWED: u32 = 1 << 16;

    /// Low 16 bits are "required": unknown ones must be rejected
    pub const REQUIRED_MASK: u32 = 0xffff;
    pub const KNOWN_REQUIRED: u32 = Self::CHECKSUM_PRESENT | Self::MORE_TO_COME;

    #[must_use]
    pub fn checksum_present(self) -> bool {
        self.0 & Self::CHECKSUM_PRESENT != 0
    }

    #[must_use]
    pub fn more_to_come(self) -> bool {
        self.0 & Self::MORE_TO_COME != 0
    }

    #[must_use]
    pub fn unknown_required(self) -> u32 {
        self.0 & Self::REQUIRED_MASK & !Self::KNOWN_REQUIRED
    }
}

/// OP_MSG section types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SectionKind {
    Body = 0,
    DocumentSequence = 1,
}

/// One OP_MSG section
#[derive(Debug, Clone, PartialEq)]
pub enum Section {
    Body(Document),
    Sequence {
        identifier: String,
        documents: Vec<Document>,
    },
}

/// Decoded OP_MSG
#[derive(Debug, Clone, PartialEq)]
pub struct OpMsg {
    pub flags: MsgFlags,
    pub sections: Vec<Section>,
}

/// Decoded legacy OP_QUERY
#[derive(Debug, Clone, PartialEq)]
pub struct OpQuery {
    pub flags: i32,
    pub full_collection_name: String,
    pub number_to_skip: i32,
    pub number_to_return: i32,
    pub query: Document,
}

/// A request read off a wire connection
#[derive(Debug, Clone, PartialEq)]
pub enum WireRequest {
    Msg(OpMsg),
    Query(OpQuery),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_conversion() {
        assert_eq!(OpCode::from(2013), OpCode::OpMsg);
        assert_eq!(i32::from(OpCode::OpQuery), 2004);
        assert_eq!(OpCode::from(42), OpCode::Unknown(42));
    }

    #[test]
    fn test_flags() {
        let flags = MsgFlags(MsgFlags::MORE_TO_COME | MsgFlags::EXHAUST_ALLOWED);
        assert!(flags.more_to_come());
        assert!(!flags.checksum_present());
        assert_eq!(flags.unknown_required(), 0);
        assert_eq!(MsgFlags(1 << 3).unknown_required(), 1 << 3);
    }
}
