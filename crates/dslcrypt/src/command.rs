//! Administrative key commands.
//!
//! Commands cross the administrative boundary as CBOR frames carrying a
//! numeric command kind, so a frame from a newer tool with an unknown kind
//! is rejected rather than misread.

use dslcrypt_core::{ObjectId, WrappingKeyProps};
use serde::{Deserialize, Serialize};

use crate::error::{KeyError, Result};

/// Numeric command kinds on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum CommandKind {
    None = 0,
    LoadKey = 1,
    UnloadKey = 2,
    AddKey = 3,
    Rewrap = 4,
}

impl CommandKind {
    pub fn from_u64(kind: u64) -> Option<Self> {
        match kind {
            0 => Some(Self::None),
            1 => Some(Self::LoadKey),
            2 => Some(Self::UnloadKey),
            3 => Some(Self::AddKey),
            4 => Some(Self::Rewrap),
            _ => None,
        }
    }
}

/// A key-management request from the administrative layer.
#[derive(Debug, Clone)]
pub enum KeyCommand {
    /// Unlock: load keychain `kcobj` with the described wrapping key.
    LoadKey {
        kcobj: ObjectId,
        props: WrappingKeyProps,
    },
    /// Lock: unload keychain `kcobj`.
    UnloadKey { kcobj: ObjectId },
    /// Rotate keychain `kcobj` to a fresh random key effective at `txg`.
    AddKey { kcobj: ObjectId, txg: u64 },
    /// Change the wrapping key of keychain `kcobj` in `txg`.
    Rewrap {
        kcobj: ObjectId,
        props: WrappingKeyProps,
        txg: u64,
    },
}

#[derive(Serialize, Deserialize)]
struct CommandFrame {
    kind: u64,
    kcobj: ObjectId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    txg: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    props: Option<WrappingKeyProps>,
}

impl KeyCommand {
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::LoadKey { .. } => CommandKind::LoadKey,
            Self::UnloadKey { .. } => CommandKind::UnloadKey,
            Self::AddKey { .. } => CommandKind::AddKey,
            Self::Rewrap { .. } => CommandKind::Rewrap,
        }
    }

    /// The keychain the command targets.
    pub fn kcobj(&self) -> ObjectId {
        match self {
            Self::LoadKey { kcobj, .. }
            | Self::UnloadKey { kcobj }
            | Self::AddKey { kcobj, .. }
            | Self::Rewrap { kcobj, .. } => *kcobj,
        }
    }

    /// Encode as a CBOR frame.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let (txg, props) = match self {
            Self::LoadKey { props, .. } => (None, Some(props.clone())),
            Self::UnloadKey { .. } => (None, None),
            Self::AddKey { txg, .. } => (Some(*txg), None),
            Self::Rewrap { props, txg, .. } => (Some(*txg), Some(props.clone())),
        };
        let frame = CommandFrame {
            kind: self.kind() as u64,
            kcobj: self.kcobj(),
            txg,
            props,
        };

        let mut buf = Vec::new();
        ciborium::into_writer(&frame, &mut buf)
            .map_err(|e| KeyError::Command(format!("encode failed: {}", e)))?;
        Ok(buf)
    }

    /// Decode a CBOR frame.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let frame: CommandFrame = ciborium::from_reader(bytes)
            .map_err(|e| KeyError::Command(format!("decode failed: {}", e)))?;

        let kind = CommandKind::from_u64(frame.kind)
            .ok_or_else(|| KeyError::Command(format!("unknown command kind {}", frame.kind)))?;
        let kcobj = frame.kcobj;
        let txg = || {
            frame
                .txg
                .ok_or_else(|| KeyError::Command(format!("{:?} requires a txg", kind)))
        };

        Ok(match kind {
            CommandKind::None => return Err(KeyError::Command("no command".into())),
            CommandKind::LoadKey => Self::LoadKey {
                kcobj,
                props: required_props(frame.props.clone(), kind)?,
            },
            CommandKind::UnloadKey => Self::UnloadKey { kcobj },
            CommandKind::AddKey => Self::AddKey { kcobj, txg: txg()? },
            CommandKind::Rewrap => Self::Rewrap {
                kcobj,
                props: required_props(frame.props.clone(), kind)?,
                txg: txg()?,
            },
        })
    }
}

fn required_props(props: Option<WrappingKeyProps>, kind: CommandKind) -> Result<WrappingKeyProps> {
    props.ok_or_else(|| KeyError::Command(format!("{:?} requires wrapping key properties", kind)))
}
