//! 校验和算法
//!
//! 解码器与编码器共用同一套实现，保证两端计算的字节范围一致：
//!
//! | 协议 | 范围 | 算法 |
//! |------|------|------|
//! | NMEA | `$` 与 `*` 之间的所有字节 | XOR，渲染为两位大写十六进制 |
//! | UBX  | class + id + len(2) + payload | 8-bit Fletcher（CK_A, CK_B） |
//! | SiRF | payload | 累加和 & 0x7FFF |

/// NMEA 校验和（XOR）
///
/// `body` 为 `$` 与 `*` 之间的内容，不含这两个字符。
///
/// # 示例
///
/// ```
/// use usbgps_protocol::nmea_checksum;
///
/// let body = b"GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,";
/// assert_eq!(nmea_checksum(body), 0x47);
/// ```
pub fn nmea_checksum(body: &[u8]) -> u8 {
    body.iter().fold(0u8, |acc, b| acc ^ b)
}

/// NMEA 校验和的两位大写十六进制表示
pub fn nmea_checksum_hex(body: &[u8]) -> String {
    format!("{:02X}", nmea_checksum(body))
}

/// UBX 8-bit Fletcher 校验和
///
/// `bytes` 必须是 class、id、2 字节长度和负载的连续拼接。
pub fn ubx_checksum(bytes: &[u8]) -> (u8, u8) {
    let mut ck_a: u8 = 0;
    let mut ck_b: u8 = 0;
    for &b in bytes {
        ck_a = ck_a.wrapping_add(b);
        ck_b = ck_b.wrapping_add(ck_a);
    }
    (ck_a, ck_b)
}

/// SiRF 15-bit 累加和校验
pub fn sirf_checksum(payload: &[u8]) -> u16 {
    let sum = payload.iter().fold(0u32, |acc, &b| acc + b as u32);
    (sum & 0x7FFF) as u16
}

/// 解析两位十六进制字符（大小写均可）
pub(crate) fn parse_hex_byte(hi: u8, lo: u8) -> Option<u8> {
    let digit = |c: u8| -> Option<u8> {
        match c {
            b'0'..=b'9' => Some(c - b'0'),
            b'A'..=b'F' => Some(c - b'A' + 10),
            b'a'..=b'f' => Some(c - b'a' + 10),
            _ => None,
        }
    };
    Some((digit(hi)? << 4) | digit(lo)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nmea_checksum_reference() {
        let body = "GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,";
        assert_eq!(nmea_checksum_hex(body.as_bytes()), "47");

        let body = "GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W";
        assert_eq!(nmea_checksum_hex(body.as_bytes()), "6A");
    }

    #[test]
    fn test_nmea_checksum_renders_two_uppercase_digits() {
        // 单字节 "A" = 0x41；"AB" = 0x41 ^ 0x42 = 0x03 -> 必须补零
        assert_eq!(nmea_checksum_hex(b"AB"), "03");
        assert_eq!(nmea_checksum_hex(b""), "00");
        assert_eq!(nmea_checksum_hex(&[0xAB]), "AB");
    }

    #[test]
    fn test_ubx_checksum_known_frame() {
        // CFG-MSG 轮询：B5 62 06 01 02 00 F0 05 -> FE 16
        let bytes = [0x06, 0x01, 0x02, 0x00, 0xF0, 0x05];
        assert_eq!(ubx_checksum(&bytes), (0xFE, 0x16));
    }

    #[test]
    fn test_ubx_checksum_empty_payload() {
        // MON-VER 轮询：B5 62 0A 04 00 00 -> 0E 34
        assert_eq!(ubx_checksum(&[0x0A, 0x04, 0x00, 0x00]), (0x0E, 0x34));
    }

    #[test]
    fn test_sirf_checksum_masks_to_15_bits() {
        assert_eq!(sirf_checksum(&[0x84, 0x00]), 0x0084);
        let payload = vec![0xFF; 200]; // 200 * 255 = 51000 = 0xC738
        assert_eq!(sirf_checksum(&payload), 0xC738 & 0x7FFF);
    }

    #[test]
    fn test_parse_hex_byte() {
        assert_eq!(parse_hex_byte(b'4', b'7'), Some(0x47));
        assert_eq!(parse_hex_byte(b'a', b'F'), Some(0xAF));
        assert_eq!(parse_hex_byte(b'G', b'0'), None);
    }
}
