//! Minimal decoder for the SentencePiece model file.
//!
//! A trained SentencePiece model is a protobuf `ModelProto`. The Unigram
//! engine needs three message types out of it — the piece list, three
//! trainer ids, and two normalizer flags — so this module reads the
//! protobuf wire format directly (varint, fixed32, length-delimited) and
//! skips everything else. No descriptors, no codegen.
//!
//! Field numbers follow `sentencepiece_model.proto`:
//!
//! ```text
//! ModelProto:      pieces = 1, trainer_spec = 2, normalizer_spec = 3
//! SentencePiece:   piece = 1, score = 2, type = 3 (default NORMAL)
//! TrainerSpec:     unk_id = 40 (default 0), bos_id = 41 (default 1),
//!                  eos_id = 42 (default 2)
//! NormalizerSpec:  add_dummy_prefix = 3 (default true),
//!                  remove_extra_whitespaces = 4 (default true)
//! ```

use thiserror::Error;

/// Errors produced while decoding a model file.
#[derive(Error, Debug)]
pub enum ModelParseError {
    #[error("Model file truncated at byte {0}")]
    Truncated(usize),
    #[error("Varint overflows 64 bits at byte {0}")]
    VarintOverflow(usize),
    #[error("Unsupported wire type {wire} for field {field}")]
    UnsupportedWireType { field: u32, wire: u8 },
    #[error("Piece string is not valid UTF-8")]
    InvalidPieceString,
    #[error("Unknown piece type {0}")]
    UnknownPieceType(u64),
}

/// The role of a vocabulary piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PieceKind {
    #[default]
    Normal,
    Unknown,
    Control,
    UserDefined,
    Unused,
    Byte,
}

impl PieceKind {
    fn from_wire(value: u64) -> Result<Self, ModelParseError> {
        match value {
            1 => Ok(Self::Normal),
            2 => Ok(Self::Unknown),
            3 => Ok(Self::Control),
            4 => Ok(Self::UserDefined),
            5 => Ok(Self::Unused),
            6 => Ok(Self::Byte),
            other => Err(ModelParseError::UnknownPieceType(other)),
        }
    }
}

/// One vocabulary entry; its index in [`SentencePieceModel::pieces`] is the
/// token id.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelPiece {
    pub piece: String,
    pub score: f32,
    pub kind: PieceKind,
}

/// Reserved ids from the trainer spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrainerIds {
    pub unk_id: i32,
    pub bos_id: i32,
    pub eos_id: i32,
}

impl Default for TrainerIds {
    fn default() -> Self {
        Self {
            unk_id: 0,
            bos_id: 1,
            eos_id: 2,
        }
    }
}

/// Normalizer settings the Unigram engine honors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizerFlags {
    pub add_dummy_prefix: bool,
    pub remove_extra_whitespaces: bool,
}

impl Default for NormalizerFlags {
    fn default() -> Self {
        Self {
            add_dummy_prefix: true,
            remove_extra_whitespaces: true,
        }
    }
}

/// The model record: everything the Unigram engine reads from a
/// SentencePiece file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SentencePieceModel {
    pub pieces: Vec<ModelPiece>,
    pub trainer: TrainerIds,
    pub normalizer: NormalizerFlags,
}

impl SentencePieceModel {
    /// Decode a serialized `ModelProto`.
    pub fn from_binary(data: &[u8]) -> Result<Self, ModelParseError> {
        let mut model = SentencePieceModel::default();
        let mut reader = WireReader::new(data);

        while let Some((field, wire)) = reader.tag()? {
            match (field, wire) {
                (1, WIRE_LEN) => {
                    let body = reader.bytes()?;
                    model.pieces.push(decode_piece(body)?);
                }
                (2, WIRE_LEN) => {
                    let body = reader.bytes()?;
                    model.trainer = decode_trainer(body)?;
                }
                (3, WIRE_LEN) => {
                    let body = reader.bytes()?;
                    model.normalizer = decode_normalizer(body)?;
                }
                _ => reader.skip(field, wire)?,
            }
        }

        Ok(model)
    }
}

fn decode_piece(data: &[u8]) -> Result<ModelPiece, ModelParseError> {
    let mut piece = ModelPiece {
        piece: String::new(),
        score: 0.0,
        kind: PieceKind::Normal,
    };
    let mut reader = WireReader::new(data);
    while let Some((field, wire)) = reader.tag()? {
        match (field, wire) {
            (1, WIRE_LEN) => {
                piece.piece = String::from_utf8(reader.bytes()?.to_vec())
                    .map_err(|_| ModelParseError::InvalidPieceString)?;
            }
            (2, WIRE_FIXED32) => piece.score = f32::from_le_bytes(reader.fixed32()?),
            (3, WIRE_VARINT) => piece.kind = PieceKind::from_wire(reader.varint()?)?,
            _ => reader.skip(field, wire)?,
        }
    }
    Ok(piece)
}

fn decode_trainer(data: &[u8]) -> Result<TrainerIds, ModelParseError> {
    let mut trainer = TrainerIds::default();
    let mut reader = WireReader::new(data);
    while let Some((field, wire)) = reader.tag()? {
        match (field, wire) {
            (40, WIRE_VARINT) => trainer.unk_id = reader.varint()? as i64 as i32,
            (41, WIRE_VARINT) => trainer.bos_id = reader.varint()? as i64 as i32,
            (42, WIRE_VARINT) => trainer.eos_id = reader.varint()? as i64 as i32,
            _ => reader.skip(field, wire)?,
        }
    }
    Ok(trainer)
}

fn decode_normalizer(data: &[u8]) -> Result<NormalizerFlags, ModelParseError> {
    let mut normalizer = NormalizerFlags::default();
    let mut reader = WireReader::new(data);
    while let Some((field, wire)) = reader.tag()? {
        match (field, wire) {
            (3, WIRE_VARINT) => normalizer.add_dummy_prefix = reader.varint()? != 0,
            (4, WIRE_VARINT) => normalizer.remove_extra_whitespaces = reader.varint()? != 0,
            _ => reader.skip(field, wire)?,
        }
    }
    Ok(normalizer)
}

const WIRE_VARINT: u8 = 0;
const WIRE_FIXED64: u8 = 1;
const WIRE_LEN: u8 = 2;
const WIRE_FIXED32: u8 = 5;

/// Cursor over a protobuf message body.
struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Next field tag, or `None` at end of message.
    fn tag(&mut self) -> Result<Option<(u32, u8)>, ModelParseError> {
        if self.pos == self.buf.len() {
            return Ok(None);
        }
        let key = self.varint()?;
        Ok(Some(((key >> 3) as u32, (key & 0x7) as u8)))
    }

    fn varint(&mut self) -> Result<u64, ModelParseError> {
        let mut value: u64 = 0;
        let mut shift = 0u32;
        loop {
            let byte = *self
                .buf
                .get(self.pos)
                .ok_or(ModelParseError::Truncated(self.pos))?;
            self.pos += 1;
            if shift >= 64 {
                return Err(ModelParseError::VarintOverflow(self.pos));
            }
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    fn fixed32(&mut self) -> Result<[u8; 4], ModelParseError> {
        let end = self.pos + 4;
        let bytes = self
            .buf
            .get(self.pos..end)
            .ok_or(ModelParseError::Truncated(self.pos))?;
        self.pos = end;
        Ok([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    fn bytes(&mut self) -> Result<&'a [u8], ModelParseError> {
        let len = self.varint()? as usize;
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.buf.len())
            .ok_or(ModelParseError::Truncated(self.pos))?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    /// Skip a field this decoder does not care about.
    fn skip(&mut self, field: u32, wire: u8) -> Result<(), ModelParseError> {
        match wire {
            WIRE_VARINT => {
                self.varint()?;
            }
            WIRE_FIXED64 => {
                let end = self.pos + 8;
                if end > self.buf.len() {
                    return Err(ModelParseError::Truncated(self.pos));
                }
                self.pos = end;
            }
            WIRE_LEN => {
                self.bytes()?;
            }
            WIRE_FIXED32 => {
                self.fixed32()?;
            }
            _ => return Err(ModelParseError::UnsupportedWireType { field, wire }),
        }
        Ok(())
    }
}
