// Network protocol messages

use crate::core::{
    ensure_consumed, read_array, read_hash, read_u32_le, read_u64_le, read_var_bytes, read_var_str,
    read_varint, write_var_bytes, write_var_str, write_varint, Block, Hash256, Serializable,
    Transaction,
};
use crate::error::{NodeError, Result};
use std::io::{Cursor, Write};

/// Wire format version, checked on every read
pub const PROTOCOL_VERSION: u8 = 1;
/// Node software version advertised in `version`
pub const NODE_VERSION: u32 = 1;
/// Fixed width of the NUL-padded command name
pub const COMMAND_LENGTH: usize = 12;
/// command + wire version + payload length
pub const FRAME_HEADER_SIZE: usize = COMMAND_LENGTH + 1 + 4;
/// Upper bound on one framed message
pub const MAX_MESSAGE_SIZE: usize = 32 * 1024 * 1024;

/// Network message types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Version,
    GetBlocks,
    Inv,
    GetData,
    Block,
    Tx,
    Addr,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Version => "version",
            MessageType::GetBlocks => "getblocks",
            MessageType::Inv => "inv",
            MessageType::GetData => "getdata",
            MessageType::Block => "block",
            MessageType::Tx => "tx",
            MessageType::Addr => "addr",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "version" => Some(MessageType::Version),
            "getblocks" => Some(MessageType::GetBlocks),
            "inv" => Some(MessageType::Inv),
            "getdata" => Some(MessageType::GetData),
            "block" => Some(MessageType::Block),
            "tx" => Some(MessageType::Tx),
            "addr" => Some(MessageType::Addr),
            _ => None,
        }
    }

    fn to_command(self) -> [u8; COMMAND_LENGTH] {
        let mut command = [0u8; COMMAND_LENGTH];
        let name = self.as_str().as_bytes();
        command[..name.len()].copy_from_slice(name);
        command
    }
}

/// Inventory type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvType {
    Block,
    Tx,
}

impl InvType {
    fn to_byte(self) -> u8 {
        match self {
            InvType::Block => 1,
            InvType::Tx => 2,
        }
    }

    fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            1 => Ok(InvType::Block),
            2 => Ok(InvType::Tx),
            other => Err(NodeError::Serialization(format!("Unknown inventory type: {}", other))),
        }
    }
}

/// Network message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Announces the sender's chain height
    Version {
        addr_from: String,
        version: u32,
        best_height: Option<u64>,
    },
    /// Asks for every block hash the receiver has
    GetBlocks { addr_from: String },
    /// Advertises block hashes or transaction IDs
    Inv {
        addr_from: String,
        kind: InvType,
        items: Vec<Hash256>,
    },
    /// Requests one block or transaction
    GetData {
        addr_from: String,
        kind: InvType,
        id: Hash256,
    },
    Block { addr_from: String, block: Block },
    Tx { addr_from: String, tx: Transaction },
    /// Shares known peer addresses
    Addr { addresses: Vec<String> },
}

impl Message {
    /// Get message type
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Version { .. } => MessageType::Version,
            Message::GetBlocks { .. } => MessageType::GetBlocks,
            Message::Inv { .. } => MessageType::Inv,
            Message::GetData { .. } => MessageType::GetData,
            Message::Block { .. } => MessageType::Block,
            Message::Tx { .. } => MessageType::Tx,
            Message::Addr { .. } => MessageType::Addr,
        }
    }

    /// Address the sender listens on, if the message carries one
    pub fn sender(&self) -> Option<&str> {
        match self {
            Message::Version { addr_from, .. }
            | Message::GetBlocks { addr_from }
            | Message::Inv { addr_from, .. }
            | Message::GetData { addr_from, .. }
            | Message::Block { addr_from, .. }
            | Message::Tx { addr_from, .. } => Some(addr_from.as_str()),
            Message::Addr { .. } => None,
        }
    }

    /// Frame: command[12] || wire version || payload length (u32 LE) || payload
    pub fn serialize(&self) -> Vec<u8> {
        let payload = self.serialize_payload();

        let mut bytes = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
        bytes.extend_from_slice(&self.message_type().to_command());
        bytes.push(PROTOCOL_VERSION);
        bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&payload);
        bytes
    }

    fn serialize_payload(&self) -> Vec<u8> {
        let mut bytes = Vec::new();

        match self {
            Message::Version {
                addr_from,
                version,
                best_height,
            } => {
                write_var_str(&mut bytes, addr_from).unwrap();
                bytes.write_all(&version.to_le_bytes()).unwrap();
                match best_height {
                    Some(height) => {
                        bytes.push(1);
                        bytes.write_all(&height.to_le_bytes()).unwrap();
                    }
                    None => bytes.push(0),
                }
            }
            Message::GetBlocks { addr_from } => {
                write_var_str(&mut bytes, addr_from).unwrap();
            }
            Message::Inv {
                addr_from,
                kind,
                items,
            } => {
                write_var_str(&mut bytes, addr_from).unwrap();
                bytes.push(kind.to_byte());
                write_varint(&mut bytes, items.len() as u64).unwrap();
                for hash in items {
                    bytes.write_all(hash.as_bytes()).unwrap();
                }
            }
            Message::GetData { addr_from, kind, id } => {
                write_var_str(&mut bytes, addr_from).unwrap();
                bytes.push(kind.to_byte());
                bytes.write_all(id.as_bytes()).unwrap();
            }
            Message::Block { addr_from, block } => {
                write_var_str(&mut bytes, addr_from).unwrap();
                write_var_bytes(&mut bytes, &block.serialize()).unwrap();
            }
            Message::Tx { addr_from, tx } => {
                write_var_str(&mut bytes, addr_from).unwrap();
                write_var_bytes(&mut bytes, &tx.serialize()).unwrap();
            }
            Message::Addr { addresses } => {
                write_varint(&mut bytes, addresses.len() as u64).unwrap();
                for addr in addresses {
                    write_var_str(&mut bytes, addr).unwrap();
                }
            }
        }

        bytes
    }

    /// Parse one complete frame; trailing bytes are an error
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        if data.len() < FRAME_HEADER_SIZE {
            return Err(NodeError::Serialization(format!("Message too short: {} bytes", data.len())));
        }

        let command = std::str::from_utf8(&data[..COMMAND_LENGTH])
            .map_err(|e| NodeError::Serialization(format!("Invalid command: {}", e)))?
            .trim_end_matches('\0');
        let msg_type = MessageType::from_string(command)
            .ok_or_else(|| NodeError::Serialization(format!("Unknown command: {:?}", command)))?;

        let wire_version = data[COMMAND_LENGTH];
        if wire_version != PROTOCOL_VERSION {
            return Err(NodeError::Serialization(format!(
                "Unsupported wire version {} (expected {})",
                wire_version, PROTOCOL_VERSION
            )));
        }

        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&data[COMMAND_LENGTH + 1..FRAME_HEADER_SIZE]);
        let payload_len = u32::from_le_bytes(len_bytes) as usize;

        let payload = &data[FRAME_HEADER_SIZE..];
        if payload.len() != payload_len {
            return Err(NodeError::Serialization(format!(
                "Payload length mismatch: header says {}, got {}",
                payload_len,
                payload.len()
            )));
        }

        Self::deserialize_payload(msg_type, payload)
    }

    fn deserialize_payload(msg_type: MessageType, payload: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(payload);
        let reader = &mut cursor;

        let message = match msg_type {
            MessageType::Version => {
                let addr_from = read_var_str(reader)?;
                let version = read_u32_le(reader)?;
                let best_height = match read_array::<_, 1>(reader)?[0] {
                    0 => None,
                    1 => Some(read_u64_le(reader)?),
                    flag => {
                        return Err(NodeError::Serialization(format!("Invalid height flag: {}", flag)));
                    }
                };
                Message::Version {
                    addr_from,
                    version,
                    best_height,
                }
            }
            MessageType::GetBlocks => Message::GetBlocks {
                addr_from: read_var_str(reader)?,
            },
            MessageType::Inv => {
                let addr_from = read_var_str(reader)?;
                let kind = InvType::from_byte(read_array::<_, 1>(reader)?[0])?;
                let count = read_varint(reader).map_err(NodeError::serialization)?;
                if count > (payload.len() / 32) as u64 {
                    return Err(NodeError::Serialization(format!("Inventory count too large: {}", count)));
                }
                let mut items = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    items.push(read_hash(reader)?);
                }
                Message::Inv {
                    addr_from,
                    kind,
                    items,
                }
            }
            MessageType::GetData => Message::GetData {
                addr_from: read_var_str(reader)?,
                kind: InvType::from_byte(read_array::<_, 1>(reader)?[0])?,
                id: read_hash(reader)?,
            },
            MessageType::Block => {
                let addr_from = read_var_str(reader)?;
                let data = read_var_bytes(reader).map_err(NodeError::serialization)?;
                Message::Block {
                    addr_from,
                    block: Block::deserialize(&data)?,
                }
            }
            MessageType::Tx => {
                let addr_from = read_var_str(reader)?;
                let data = read_var_bytes(reader).map_err(NodeError::serialization)?;
                Message::Tx {
                    addr_from,
                    tx: Transaction::deserialize(&data)?,
                }
            }
            MessageType::Addr => {
                let count = read_varint(reader).map_err(NodeError::serialization)?;
                let mut addresses = Vec::new();
                for _ in 0..count {
                    addresses.push(read_var_str(reader)?);
                }
                Message::Addr { addresses }
            }
        };

        ensure_consumed(&cursor)?;
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(message: Message) {
        let decoded = Message::deserialize(&message.serialize()).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_message_type_conversion() {
        assert_eq!(MessageType::Version.as_str(), "version");
        assert_eq!(MessageType::from_string("getdata"), Some(MessageType::GetData));
        assert_eq!(MessageType::from_string("verack"), None);
    }

    #[test]
    fn test_frame_layout() {
        let bytes = Message::GetBlocks {
            addr_from: "localhost:3001".to_string(),
        }
        .serialize();

        assert_eq!(&bytes[..9], b"getblocks");
        assert!(bytes[9..COMMAND_LENGTH].iter().all(|b| *b == 0));
        assert_eq!(bytes[COMMAND_LENGTH], PROTOCOL_VERSION);
        let len = u32::from_le_bytes(bytes[13..17].try_into().unwrap()) as usize;
        assert_eq!(len, bytes.len() - FRAME_HEADER_SIZE);
    }

    #[test]
    fn test_version_heights() {
        roundtrip(Message::Version {
            addr_from: "localhost:3000".to_string(),
            version: NODE_VERSION,
            best_height: None,
        });
        roundtrip(Message::Version {
            addr_from: "localhost:3000".to_string(),
            version: NODE_VERSION,
            best_height: Some(0),
        });
    }

    #[test]
    fn test_block_and_tx_payloads() {
        let tx = Transaction::coinbase([5u8; 20], "", 10);
        let block = Block::new(Hash256::zero(), vec![tx.clone()], 8);

        roundtrip(Message::Block {
            addr_from: "localhost:3001".to_string(),
            block,
        });
        roundtrip(Message::Tx {
            addr_from: "localhost:3001".to_string(),
            tx: tx.clone(),
        });
        roundtrip(Message::Inv {
            addr_from: "localhost:3002".to_string(),
            kind: InvType::Tx,
            items: vec![tx.id, Hash256::new([1; 32])],
        });
        roundtrip(Message::Addr {
            addresses: vec!["localhost:3001".to_string(), "localhost:3002".to_string()],
        });
    }

    #[test]
    fn test_rejects_bad_frames() {
        let mut bytes = Message::GetData {
            addr_from: "localhost:3001".to_string(),
            kind: InvType::Block,
            id: Hash256::new([2; 32]),
        }
        .serialize();

        let mut wrong_version = bytes.clone();
        wrong_version[COMMAND_LENGTH] = PROTOCOL_VERSION + 1;
        assert!(matches!(
            Message::deserialize(&wrong_version),
            Err(NodeError::Serialization(_))
        ));

        let mut unknown = bytes.clone();
        unknown[..4].copy_from_slice(b"ping");
        assert!(Message::deserialize(&unknown).is_err());

        bytes.push(0);
        assert!(Message::deserialize(&bytes).is_err());
        assert!(Message::deserialize(&bytes[..10]).is_err());
    }
}
