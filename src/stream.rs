//! stream: формат потока встроенного генератора (ManifestGenerator).
//!
//! Поток (LE):
//!   header(20) = [magic 16 = "snapsend-stream\0"][version u32]
//!   command    = [cmd u16][len u32][crc32 u32] + payload[len]
//!
//! CRC32 считается по header[0..CMD_OFF_CRC) + payload (crc-поле не входит).
//! END: трейлер; в multi-item потоке (extended framing) header один в начале,
//! END один в конце. В legacy режиме каждый item: самостоятельный поток.
//!
//! scan_stream: разбор для тестов и отладки; receive/replay здесь нет.

use anyhow::{anyhow, Result};
use byteorder::{ByteOrder, LittleEndian};
use crc32fast::Hasher as Crc32;
use std::io::{self, Write};
use uuid::Uuid;

pub const STREAM_MAGIC: &[u8; 16] = b"snapsend-stream\0";
pub const STREAM_VERSION: u32 = 1;
pub const STREAM_HDR_SIZE: usize = 16 + 4;

pub const CMD_HDR_SIZE: usize = 2 + 4 + 4;
const CMD_OFF_TYPE: usize = 0;
const CMD_OFF_LEN: usize = 2;
const CMD_OFF_CRC: usize = 6;

// Команды
pub const CMD_SUBVOL: u16 = 1;
pub const CMD_SNAPSHOT: u16 = 2;
pub const CMD_CLONE_SOURCE: u16 = 3;
pub const CMD_END: u16 = 21;

/// Flags in SUBVOL/SNAPSHOT payloads.
pub const FLAG_NO_FILE_DATA: u32 = 0x1;

pub fn write_stream_header<W: Write + ?Sized>(w: &mut W) -> io::Result<()> {
    let mut hdr = [0u8; STREAM_HDR_SIZE];
    hdr[..16].copy_from_slice(STREAM_MAGIC);
    LittleEndian::write_u32(&mut hdr[16..20], STREAM_VERSION);
    w.write_all(&hdr)
}

fn crc_of_parts(hdr: &[u8], payload: &[u8]) -> u32 {
    let mut h = Crc32::new();
    h.update(hdr);
    h.update(payload);
    h.finalize()
}

pub fn build_cmd_hdr(cmd: u16, payload: &[u8]) -> [u8; CMD_HDR_SIZE] {
    let mut hdr = [0u8; CMD_HDR_SIZE];
    LittleEndian::write_u16(&mut hdr[CMD_OFF_TYPE..CMD_OFF_TYPE + 2], cmd);
    LittleEndian::write_u32(&mut hdr[CMD_OFF_LEN..CMD_OFF_LEN + 4], payload.len() as u32);
    let crc = crc_of_parts(&hdr[..CMD_OFF_CRC], payload);
    LittleEndian::write_u32(&mut hdr[CMD_OFF_CRC..CMD_OFF_CRC + 4], crc);
    hdr
}

/// Записать одну команду [hdr][payload].
pub fn write_command<W: Write + ?Sized>(w: &mut W, cmd: u16, payload: &[u8]) -> io::Result<()> {
    if payload.len() > u32::MAX as usize {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("command payload too large: {} bytes", payload.len()),
        ));
    }
    let hdr = build_cmd_hdr(cmd, payload);
    w.write_all(&hdr)?;
    if !payload.is_empty() {
        w.write_all(payload)?;
    }
    Ok(())
}

// ---------------- payloads ----------------

/// SUBVOL: [uuid 16][ctransid u64][root_id u64][flags u32]
pub fn subvol_payload(uuid: &Uuid, ctransid: u64, root_id: u64, flags: u32) -> Vec<u8> {
    let mut p = vec![0u8; 16 + 8 + 8 + 4];
    p[..16].copy_from_slice(uuid.as_bytes());
    LittleEndian::write_u64(&mut p[16..24], ctransid);
    LittleEndian::write_u64(&mut p[24..32], root_id);
    LittleEndian::write_u32(&mut p[32..36], flags);
    p
}

/// SNAPSHOT: SUBVOL payload + [parent_uuid 16][parent_ctransid u64]
pub fn snapshot_payload(
    uuid: &Uuid,
    ctransid: u64,
    root_id: u64,
    flags: u32,
    parent_uuid: &Uuid,
    parent_ctransid: u64,
) -> Vec<u8> {
    let mut p = subvol_payload(uuid, ctransid, root_id, flags);
    p.extend_from_slice(parent_uuid.as_bytes());
    let mut ct = [0u8; 8];
    LittleEndian::write_u64(&mut ct, parent_ctransid);
    p.extend_from_slice(&ct);
    p
}

/// CLONE_SOURCE: [uuid 16][ctransid u64]
pub fn clone_source_payload(uuid: &Uuid, ctransid: u64) -> Vec<u8> {
    let mut p = vec![0u8; 16 + 8];
    p[..16].copy_from_slice(uuid.as_bytes());
    LittleEndian::write_u64(&mut p[16..24], ctransid);
    p
}

// ---------------- decoding ----------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Header { version: u32 },
    Command { cmd: u16, payload: Vec<u8> },
}

impl StreamEvent {
    pub fn is_header(&self) -> bool {
        matches!(self, StreamEvent::Header { .. })
    }

    pub fn is_cmd(&self, which: u16) -> bool {
        matches!(self, StreamEvent::Command { cmd, .. } if *cmd == which)
    }
}

/// Разобрать поток целиком. Header может встречаться между командами
/// (конкатенация legacy-потоков). Неполный хвост или плохой CRC: ошибка.
pub fn scan_stream(bytes: &[u8]) -> Result<Vec<StreamEvent>> {
    let mut out = Vec::new();
    let mut pos = 0usize;

    while pos < bytes.len() {
        let rest = &bytes[pos..];
        if rest.len() >= STREAM_HDR_SIZE && &rest[..16] == STREAM_MAGIC {
            let version = LittleEndian::read_u32(&rest[16..20]);
            if version != STREAM_VERSION {
                return Err(anyhow!("unsupported stream version {} at off {}", version, pos));
            }
            out.push(StreamEvent::Header { version });
            pos += STREAM_HDR_SIZE;
            continue;
        }

        if rest.len() < CMD_HDR_SIZE {
            return Err(anyhow!("truncated command header at off {}", pos));
        }
        let cmd = LittleEndian::read_u16(&rest[CMD_OFF_TYPE..CMD_OFF_TYPE + 2]);
        let len = LittleEndian::read_u32(&rest[CMD_OFF_LEN..CMD_OFF_LEN + 4]) as usize;
        let crc_expected = LittleEndian::read_u32(&rest[CMD_OFF_CRC..CMD_OFF_CRC + 4]);
        if rest.len() < CMD_HDR_SIZE + len {
            return Err(anyhow!(
                "truncated command payload at off {}: need {} bytes, have {}",
                pos,
                CMD_HDR_SIZE + len,
                rest.len()
            ));
        }
        let payload = &rest[CMD_HDR_SIZE..CMD_HDR_SIZE + len];
        if crc_of_parts(&rest[..CMD_OFF_CRC], payload) != crc_expected {
            return Err(anyhow!("command CRC mismatch at off {}", pos));
        }
        out.push(StreamEvent::Command {
            cmd,
            payload: payload.to_vec(),
        });
        pos += CMD_HDR_SIZE + len;
    }
    Ok(out)
}

/// Root id from a SUBVOL/SNAPSHOT payload.
pub fn payload_root_id(payload: &[u8]) -> Option<u64> {
    if payload.len() >= 32 {
        Some(LittleEndian::read_u64(&payload[24..32]))
    } else {
        None
    }
}

/// Parent uuid from a SNAPSHOT payload.
pub fn payload_parent_uuid(payload: &[u8]) -> Option<Uuid> {
    if payload.len() >= 36 + 16 {
        Uuid::from_slice(&payload[36..52]).ok()
    } else {
        None
    }
}
