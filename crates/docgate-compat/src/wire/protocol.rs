//! Wire protocol framing and message (de)serialization

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use bson::Document;
use docgate_common::error::{Error, ProtocolError};

use super::types::*;

/// Parse message header
pub fn parse_header(data: &[u8]) -> Result<MsgHeader, ProtocolError> {
    if data.len() < HEADER_LEN {
        return Err(ProtocolError::IncompleteMessage);
    }

    let mut buf = data;
    let message_length = buf.get_i32_le();
    let request_id = buf.get_i32_le();
    let response_to = buf.get_i32_le();
    let op_code = OpCode::from(buf.get_i32_le());

    Ok(MsgHeader {
        message_length,
        request_id,
        response_to,
        op_code,
    })
}

/// Serialize message header
pub fn serialize_header(header: &MsgHeader, buf: &mut BytesMut) {
    buf.put_i32_le(header.message_length);
    buf.put_i32_le(header.request_id);
    buf.put_i32_le(header.response_to);
    buf.put_i32_le(i32::from(header.op_code));
}

/// Decode a message body according to its opcode
pub fn parse_body(op_code: OpCode, body: &[u8]) -> Result<WireRequest, ProtocolError> {
    match op_code {
        OpCode::OpMsg => parse_op_msg(body).map(WireRequest::Msg),
        OpCode::OpQuery => parse_op_query(body).map(WireRequest::Query),
        other => Err(ProtocolError::UnsupportedOperation(format!(
            "opcode {}",
            i32::from(other)
        ))),
    }
}

/// Parse OP_MSG message body (everything after the header)
pub fn parse_op_msg(data: &[u8]) -> Result<OpMsg, ProtocolError> {
    if data.len() < 5 {
        return Err(ProtocolError::InvalidFormat("OP_MSG too short".to_string()));
    }

    let flags = MsgFlags(u32::from_le_bytes([data[0], data[1], data[2], data[3]]));
    if flags.unknown_required() != 0 {
        return Err(ProtocolError::InvalidFormat(format!(
            "Unrecognized required flags: {:#x}",
            flags.unknown_required()
        )));
    }

    let mut rest = &data[4..];
    if flags.checksum_present() {
        if rest.len() < 4 {
            return Err(ProtocolError::InvalidFormat("OP_MSG checksum missing".to_string()));
        }
        rest = &rest[..rest.len() - 4];
    }

    let mut sections = Vec::new();
    while !rest.is_empty() {
        let kind = rest[0];
        rest = &rest[1..];
        match kind {
            k if k == SectionKind::Body as u8 => {
                let (doc, tail) = read_document(rest)?;
                sections.push(Section::Body(doc));
                rest = tail;
            }
            k if k == SectionKind::DocumentSequence as u8 => {
                let size = read_length(rest)?;
                if size < 4 || size > rest.len() {
                    return Err(ProtocolError::InvalidFormat(
                        "Invalid document sequence size".to_string(),
                    ));
                }
                let (mut section, tail) = rest.split_at(size);
                section = &section[4..];
                let (identifier, mut docs_bytes) = read_cstring(section)?;
                let mut documents = Vec::new();
                while !docs_bytes.is_empty() {
                    let (doc, after) = read_document(docs_bytes)?;
                    documents.push(doc);
                    docs_bytes = after;
                }
                sections.push(Section::Sequence {
                    identifier,
                    documents,
                });
                rest = tail;
            }
            other => {
                return Err(ProtocolError::InvalidFormat(format!(
                    "Unsupported section kind: {}",
                    other
                )));
            }
        }
    }

    Ok(OpMsg { flags, sections })
}

/// Parse legacy OP_QUERY message body
pub fn parse_op_query(data: &[u8]) -> Result<OpQuery, ProtocolError> {
    if data.len() < 4 {
        return Err(ProtocolError::InvalidFormat("OP_QUERY too short".to_string()));
    }

    let mut buf = data;
    let flags = buf.get_i32_le();
    let (full_collection_name, mut buf) = read_cstring(buf)?;
    if buf.len() < 8 {
        return Err(ProtocolError::InvalidFormat("OP_QUERY too short".to_string()));
    }
    let number_to_skip = buf.get_i32_le();
    let number_to_return = buf.get_i32_le();
    let (query, _selector) = read_document(buf)?;

    Ok(OpQuery {
        flags,
        full_collection_name,
        number_to_skip,
        number_to_return,
        query,
    })
}

/// Serialize OP_MSG reply with a single body section
pub fn serialize_op_msg(
    request_id: i32,
    response_to: i32,
    doc: &Document,
) -> Result<BytesMut, ProtocolError> {
    let body = document_bytes(doc)?;
    let message_length = message_length(HEADER_LEN + 4 + 1 + body.len())?;

    let mut buf = BytesMut::with_capacity(HEADER_LEN + 5 + body.len());
    serialize_header(
        &MsgHeader {
            message_length,
            request_id,
            response_to,
            op_code: OpCode::OpMsg,
        },
        &mut buf,
    );

    // Flags (none set)
    buf.put_u32_le(0);
    buf.put_u8(SectionKind::Body as u8);
    buf.extend_from_slice(&body);

    Ok(buf)
}

/// Serialize OP_REPLY carrying one document, the answer to an OP_QUERY
pub fn serialize_op_reply(
    request_id: i32,
    response_to: i32,
    doc: &Document,
) -> Result<BytesMut, ProtocolError> {
    let body = document_bytes(doc)?;
    let message_length = message_length(HEADER_LEN + 20 + body.len())?;

    let mut buf = BytesMut::with_capacity(HEADER_LEN + 20 + body.len());
    serialize_header(
        &MsgHeader {
            message_length,
            request_id,
            response_to,
            op_code: OpCode::OpReply,
        },
        &mut buf,
    );

    buf.put_i32_le(0); // responseFlags
    buf.put_i64_le(0); // cursorID
    buf.put_i32_le(0); // startingFrom
    buf.put_i32_le(1); // numberReturned
    buf.extend_from_slice(&body);

    Ok(buf)
}

/// Serialize an OP_MSG request; used by clients and tests
pub fn serialize_op_msg_request(
    request_id: i32,
    flags: MsgFlags,
    sections: &[Section],
) -> Result<BytesMut, ProtocolError> {
    let mut payload = BytesMut::new();
    payload.put_u32_le(flags.0);
    for section in sections {
        match section {
            Section::Body(doc) => {
                payload.put_u8(SectionKind::Body as u8);
                payload.extend_from_slice(&document_bytes(doc)?);
            }
            Section::Sequence {
                identifier,
                documents,
            } => {
                let mut seq = BytesMut::new();
                seq.extend_from_slice(identifier.as_bytes());
                seq.put_u8(0);
                for doc in documents {
                    seq.extend_from_slice(&document_bytes(doc)?);
                }
                payload.put_u8(SectionKind::DocumentSequence as u8);
                payload.put_i32_le(message_length(seq.len() + 4)?);
                payload.extend_from_slice(&seq);
            }
        }
    }

    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    serialize_header(
        &MsgHeader {
            message_length: message_length(HEADER_LEN + payload.len())?,
            request_id,
            response_to: 0,
            op_code: OpCode::OpMsg,
        },
        &mut buf,
    );
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Serialize a legacy OP_QUERY request; used by clients and tests
pub fn serialize_op_query_request(
    request_id: i32,
    full_collection_name: &str,
    query: &Document,
) -> Result<BytesMut, ProtocolError> {
    let body = document_bytes(query)?;
    let len = HEADER_LEN + 4 + full_collection_name.len() + 1 + 8 + body.len();

    let mut buf = BytesMut::with_capacity(len);
    serialize_header(
        &MsgHeader {
            message_length: message_length(len)?,
            request_id,
            response_to: 0,
            op_code: OpCode::OpQuery,
        },
        &mut buf,
    );
    buf.put_i32_le(0);
    buf.extend_from_slice(full_collection_name.as_bytes());
    buf.put_u8(0);
    buf.put_i32_le(0);
    buf.put_i32_le(-1);
    buf.extend_from_slice(&body);
    Ok(buf)
}

/// Extract the single document from an OP_MSG or OP_REPLY reply body
pub fn parse_reply_document(op_code: OpCode, body: &[u8]) -> Result<Document, ProtocolError> {
    match op_code {
        OpCode::OpMsg => {
            let msg = parse_op_msg(body)?;
            msg.sections
                .into_iter()
                .find_map(|s| match s {
                    Section::Body(doc) => Some(doc),
                    Section::Sequence { .. } => None,
                })
                .ok_or_else(|| ProtocolError::InvalidFormat("reply has no body".to_string()))
        }
        OpCode::OpReply => {
            if body.len() < 20 {
                return Err(ProtocolError::InvalidFormat("OP_REPLY too short".to_string()));
            }
            read_document(&body[20..]).map(|(doc, _)| doc)
        }
        other => Err(ProtocolError::UnsupportedOperation(format!(
            "opcode {}",
            i32::from(other)
        ))),
    }
}

fn document_bytes(doc: &Document) -> Result<Vec<u8>, ProtocolError> {
    let mut body = Vec::new();
    doc.to_writer(&mut body)
        .map_err(|e| ProtocolError::InvalidFormat(format!("Failed to serialize BSON: {}", e)))?;
    Ok(body)
}

fn message_length(len: usize) -> Result<i32, ProtocolError> {
    i32::try_from(len).map_err(|_| ProtocolError::MessageTooLarge {
        size: len,
        max: i32::MAX as usize,
    })
}

fn read_length(data: &[u8]) -> Result<usize, ProtocolError> {
    if data.len() < 4 {
        return Err(ProtocolError::IncompleteMessage);
    }
    let len = i32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    usize::try_from(len)
        .map_err(|_| ProtocolError::InvalidFormat(format!("Negative length: {}", len)))
}

fn read_document(data: &[u8]) -> Result<(Document, &[u8]), ProtocolError> {
    let len = read_length(data)?;
    if len < 5 || len > data.len() {
        return Err(ProtocolError::InvalidFormat(format!(
            "Invalid BSON document length: {}",
            len
        )));
    }
    let (doc_bytes, rest) = data.split_at(len);
    let doc = Document::from_reader(&mut std::io::Cursor::new(doc_bytes))
        .map_err(|e| ProtocolError::InvalidFormat(e.to_string()))?;
    Ok((doc, rest))
}

fn read_cstring(data: &[u8]) -> Result<(String, &[u8]), ProtocolError> {
    let end = data
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| ProtocolError::InvalidFormat("Unterminated string".to_string()))?;
    let s = std::str::from_utf8(&data[..end])
        .map_err(|e| ProtocolError::InvalidFormat(e.to_string()))?
        .to_string();
    Ok((s, &data[end + 1..]))
}

/// A framed message: header plus undecoded body
#[derive(Debug, Clone)]
pub struct Frame {
    pub header: MsgHeader,
    pub body: Bytes,
}

/// Length-prefixed framing for wire connections
#[derive(Debug, Clone)]
pub struct WireCodec {
    max_message_size: usize,
}

impl WireCodec {
    #[must_use]
    pub fn new(max_message_size: usize) -> Self {
        Self { max_message_size }
    }
}

impl Decoder for WireCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let header = parse_header(&src[..HEADER_LEN])?;
        let length = usize::try_from(header.message_length).map_err(|_| {
            ProtocolError::InvalidFormat(format!("Negative message length: {}", header.message_length))
        })?;
        if length < HEADER_LEN {
            return Err(ProtocolError::InvalidFormat(format!(
                "Message length {} is shorter than the header",
                length
            ))
            .into());
        }
        if length > self.max_message_size {
            return Err(ProtocolError::MessageTooLarge {
                size: length,
                max: self.max_message_size,
            }
            .into());
        }

        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(length);
        frame.advance(HEADER_LEN);
        Ok(Some(Frame {
            header,
            body: frame.freeze(),
        }))
    }
}

impl Encoder<Bytes> for WireCodec {
    type Error = Error;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Error> {
        dst.extend_from_slice(&item);
        Ok(())
    }
}
