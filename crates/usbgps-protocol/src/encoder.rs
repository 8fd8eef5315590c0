//! 命令编码器
//!
//! 纯函数：同一个命令值总是编码为同一串字节。

use crate::checksum::{nmea_checksum_hex, sirf_checksum, ubx_checksum};
use crate::error::ProtocolError;
use crate::sirf::{SIRF_END_1, SIRF_END_2, SIRF_MAX_PAYLOAD, SIRF_START_1, SIRF_START_2};
use crate::ubx::{UBX_MAX_PAYLOAD, UBX_SYNC_1, UBX_SYNC_2};

/// 发往接收机的命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingCommand {
    /// NMEA 语句体（不含 `$`、`*`、校验和与 CRLF）
    Nmea(String),
    /// UBX 消息
    Ubx { class: u8, id: u8, payload: Vec<u8> },
    /// SiRF 负载（首字节为消息 ID）
    Sirf(Vec<u8>),
}

impl OutgoingCommand {
    pub fn nmea(body: impl Into<String>) -> Self {
        Self::Nmea(body.into())
    }

    pub fn ubx(class: u8, id: u8, payload: Vec<u8>) -> Self {
        Self::Ubx { class, id, payload }
    }

    /// 编码为线上字节
    ///
    /// # 错误
    ///
    /// - NMEA 语句体包含 `$`、`*`、CR/LF 或非 ASCII 字符
    /// - 负载超出解码端接受的长度（UBX 4096，SiRF 1023）
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        match self {
            Self::Nmea(body) => encode_nmea(body),
            Self::Ubx { class, id, payload } => encode_ubx(*class, *id, payload),
            Self::Sirf(payload) => encode_sirf(payload),
        }
    }
}

fn encode_nmea(body: &str) -> Result<Vec<u8>, ProtocolError> {
    let bad = |c: char| !c.is_ascii() || matches!(c, '$' | '*' | '\r' | '\n');
    if body.is_empty() || body.chars().any(bad) {
        return Err(ProtocolError::InvalidSentence(body.to_string()));
    }
    let mut out = Vec::with_capacity(body.len() + 6);
    out.push(b'$');
    out.extend_from_slice(body.as_bytes());
    out.push(b'*');
    out.extend_from_slice(nmea_checksum_hex(body.as_bytes()).as_bytes());
    out.extend_from_slice(b"\r\n");
    Ok(out)
}

fn encode_ubx(class: u8, id: u8, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    // 解码端把超过 UBX_MAX_PAYLOAD 的长度视为损坏的帧头，编码端不能产生这样的帧
    if payload.len() > UBX_MAX_PAYLOAD {
        return Err(ProtocolError::PayloadTooLarge {
            len: payload.len(),
            max: UBX_MAX_PAYLOAD,
        });
    }
    let len = payload.len() as u16;

    let mut out = Vec::with_capacity(payload.len() + 8);
    out.extend_from_slice(&[UBX_SYNC_1, UBX_SYNC_2, class, id]);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(payload);
    // 校验范围：class 起至负载结束
    let (ck_a, ck_b) = ubx_checksum(&out[2..]);
    out.push(ck_a);
    out.push(ck_b);
    Ok(out)
}

fn encode_sirf(payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    if payload.len() > SIRF_MAX_PAYLOAD {
        return Err(ProtocolError::PayloadTooLarge {
            len: payload.len(),
            max: SIRF_MAX_PAYLOAD,
        });
    }
    let mut out = Vec::with_capacity(payload.len() + 8);
    out.extend_from_slice(&[SIRF_START_1, SIRF_START_2]);
    out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    out.extend_from_slice(payload);
    out.extend_from_slice(&sirf_checksum(payload).to_be_bytes());
    out.extend_from_slice(&[SIRF_END_1, SIRF_END_2]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_nmea() {
        let bytes = OutgoingCommand::nmea("PSRF103,00,00,01,01").encode().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("$PSRF103,00,00,01,01*"));
        assert!(text.ends_with("\r\n"));
        assert_eq!(text.len(), "$PSRF103,00,00,01,01*XX\r\n".len());
    }

    #[test]
    fn test_encode_nmea_reference_checksum() {
        let body = "GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,";
        let bytes = OutgoingCommand::nmea(body).encode().unwrap();
        assert_eq!(&bytes[bytes.len() - 4..], b"47\r\n");
    }

    #[test]
    fn test_encode_nmea_rejects_framing_characters() {
        for body in ["", "GP$GGA", "GPGGA*00", "GPGGA\r\n", "GPGGA,é"] {
            assert!(
                matches!(
                    OutgoingCommand::nmea(body).encode(),
                    Err(ProtocolError::InvalidSentence(_))
                ),
                "body {body:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_encode_ubx_known_frame() {
        let bytes = OutgoingCommand::ubx(0x06, 0x01, vec![0xF0, 0x05])
            .encode()
            .unwrap();
        assert_eq!(bytes, hex::decode("b56206010200f005fe16").unwrap());
    }

    #[test]
    fn test_encode_ubx_too_large() {
        let err = OutgoingCommand::ubx(0x06, 0x01, vec![0; 70_000])
            .encode()
            .unwrap_err();
        assert!(matches!(err, ProtocolError::PayloadTooLarge { len: 70_000, .. }));
    }

    #[test]
    fn test_encode_ubx_payload_limit() {
        let max = vec![0x11; UBX_MAX_PAYLOAD];
        let bytes = OutgoingCommand::ubx(0x02, 0x13, max.clone()).encode().unwrap();
        let frames = crate::FrameDecoder::new(crate::ProtocolMode::Ubx).feed(&bytes);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ubx().unwrap().payload(), max.as_slice());

        let err = OutgoingCommand::ubx(0x02, 0x13, vec![0x11; UBX_MAX_PAYLOAD + 1])
            .encode()
            .unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::PayloadTooLarge { len: 4097, max: UBX_MAX_PAYLOAD }
        ));
    }

    #[test]
    fn test_encode_sirf() {
        let bytes = OutgoingCommand::Sirf(vec![0x84, 0x00]).encode().unwrap();
        assert_eq!(
            bytes,
            vec![0xA0, 0xA2, 0x00, 0x02, 0x84, 0x00, 0x00, 0x84, 0xB0, 0xB3]
        );
    }

    #[test]
    fn test_encode_sirf_too_large() {
        assert!(OutgoingCommand::Sirf(vec![0; 1024]).encode().is_err());
    }
}
